/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events, and the logger attached to every block execution context.
//!
//! The event logs defined in this module are printed if the user enabled them via the node's
//! [config](crate::config::Configuration).
//!
//! Drive logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Event log message format
//!
//! Event log messages are CSVs (Comma Separated Values) with at least two values. The first two values
//! are always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [CommitBlock](crate::events::CommitBlockEvent) is printed:
//!
//! ```text
//! CommitBlock, 1701329264, 12, 0, fNGCJyk, 3
//! ```
//!
//! In the snippet:
//! - The third and fourth values are the height and round of the committed block.
//! - The fifth value is the first seven characters of the Base64 encoding of the new app hash.
//! - The sixth value is the number of transactions in the block.
//!
//! ## Context log message format
//!
//! Messages logged through a [`ContextLogger`] start with the ABCI method, height and round of the
//! block execution context they belong to:
//!
//! ```text
//! prepareProposal, 12, 0, delivered 3 transactions
//! ```

use std::{fmt::Display, time::SystemTime};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log::Level;

use crate::{
    events::*,
    types::data_types::{BlockHeight, Round},
};

/// Target of every log record emitted by this crate.
pub const LOG_TARGET: &str = "drive_abci";

// Names of each event in PascalCase for printing:
pub const COMMIT_BLOCK: &str = "CommitBlock";
pub const UPDATE_CHAIN_LOCK: &str = "UpdateChainLock";
pub const ROTATE_VALIDATOR_SET: &str = "RotateValidatorSet";
pub const SYNCHRONIZE_MASTERNODE_IDENTITIES: &str = "SynchronizeMasternodeIdentities";
pub const RECONNECT_ZMQ: &str = "ReconnectZmq";
pub const FATAL_ERROR: &str = "FatalError";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for CommitBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_block_event: &CommitBlockEvent| {
            log::info!(
                target: LOG_TARGET,
                "{}, {}, {}, {}, {}, {}",
                COMMIT_BLOCK,
                secs_since_unix_epoch(commit_block_event.timestamp),
                commit_block_event.height,
                commit_block_event.round,
                first_seven_base64_chars(&commit_block_event.app_hash.bytes()),
                commit_block_event.tx_count
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateChainLockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_chain_lock_event: &UpdateChainLockEvent| {
            log::info!(
                target: LOG_TARGET,
                "{}, {}, {}, {}, {}",
                UPDATE_CHAIN_LOCK,
                secs_since_unix_epoch(update_chain_lock_event.timestamp),
                update_chain_lock_event.chain_lock.height,
                first_seven_base64_chars(&update_chain_lock_event.chain_lock.block_hash.bytes()),
                update_chain_lock_event.chain_lock.is_fallback()
            )
        };
        Box::new(logger)
    }
}

impl Logger for RotateValidatorSetEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |rotate_validator_set_event: &RotateValidatorSetEvent| {
            log::info!(
                target: LOG_TARGET,
                "{}, {}, {}, {}, {}",
                ROTATE_VALIDATOR_SET,
                secs_since_unix_epoch(rotate_validator_set_event.timestamp),
                rotate_validator_set_event.height,
                first_seven_base64_chars(&rotate_validator_set_event.quorum_hash.bytes()),
                rotate_validator_set_event.validator_count
            )
        };
        Box::new(logger)
    }
}

impl Logger for SynchronizeMasternodeIdentitiesEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |sync_event: &SynchronizeMasternodeIdentitiesEvent| {
            log::info!(
                target: LOG_TARGET,
                "{}, {}, {}, {}, {}, {}",
                SYNCHRONIZE_MASTERNODE_IDENTITIES,
                secs_since_unix_epoch(sync_event.timestamp),
                sync_event.core_height,
                sync_event.created_identities,
                sync_event.updated_identities,
                sync_event.removed_reward_shares
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReconnectZmqEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reconnect_zmq_event: &ReconnectZmqEvent| {
            log::warn!(
                target: LOG_TARGET,
                "{}, {}, {}, {}",
                RECONNECT_ZMQ,
                secs_since_unix_epoch(reconnect_zmq_event.timestamp),
                reconnect_zmq_event.attempt,
                reconnect_zmq_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for FatalErrorEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |fatal_error_event: &FatalErrorEvent| {
            log::error!(
                target: LOG_TARGET,
                "{}, {}, {}",
                FATAL_ERROR,
                secs_since_unix_epoch(fatal_error_event.timestamp),
                fatal_error_event.message
            )
        };
        Box::new(logger)
    }
}

/// Logger attached to a block execution context. Prefixes every message with the ABCI method, height,
/// and round the context was created for, so that interleaved log lines of different rounds can be told
/// apart.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContextLogger {
    abci_method: String,
    height: Option<BlockHeight>,
    round: Option<Round>,
}

impl ContextLogger {
    pub fn new(abci_method: &str) -> ContextLogger {
        ContextLogger {
            abci_method: abci_method.to_string(),
            height: None,
            round: None,
        }
    }

    pub fn for_round(abci_method: &str, height: BlockHeight, round: Round) -> ContextLogger {
        ContextLogger {
            abci_method: abci_method.to_string(),
            height: Some(height),
            round: Some(round),
        }
    }

    pub fn abci_method(&self) -> &str {
        &self.abci_method
    }

    pub fn height(&self) -> Option<BlockHeight> {
        self.height
    }

    pub fn round(&self) -> Option<Round> {
        self.round
    }

    pub fn log(&self, level: Level, message: impl Display) {
        let height = self.height.map(|height| height.to_string()).unwrap_or_default();
        let round = self.round.map(|round| round.to_string()).unwrap_or_default();
        log::log!(
            target: LOG_TARGET,
            level,
            "{}, {}, {}, {}",
            self.abci_method,
            height,
            round,
            message
        );
    }

    pub fn trace(&self, message: impl Display) {
        self.log(Level::Trace, message)
    }

    pub fn debug(&self, message: impl Display) {
        self.log(Level::Debug, message)
    }

    pub fn info(&self, message: impl Display) {
        self.log(Level::Info, message)
    }

    pub fn warn(&self, message: impl Display) {
        self.log(Level::Warn, message)
    }

    pub fn error(&self, message: impl Display) {
        self.log(Level::Error, message)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
pub(crate) fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

pub(crate) fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
