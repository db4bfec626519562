/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of Drive events for event handling and logging.
//!
//! Note: an event for a given action indicates that the action has been completed.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::types::{
    chain_lock::ChainLock,
    data_types::{BlockHeight, CoreHeight, CryptoHash, Round},
};

pub enum Event {
    // Events that change persistent state.
    CommitBlock(CommitBlockEvent),
    RotateValidatorSet(RotateValidatorSetEvent),
    SynchronizeMasternodeIdentities(SynchronizeMasternodeIdentitiesEvent),
    // Core chain events.
    UpdateChainLock(UpdateChainLockEvent),
    ReconnectZmq(ReconnectZmqEvent),
    // Process events.
    FatalError(FatalErrorEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // The event bus only goes away during shutdown, when events no longer matter.
            let _ = event_publisher.send(event);
        }
    }
}

/// A block was committed to storage and promoted to "latest".
pub struct CommitBlockEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
    pub round: Round,
    pub app_hash: CryptoHash,
    pub tx_count: usize,
}

/// A new validator quorum was committed.
pub struct RotateValidatorSetEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
    pub quorum_hash: CryptoHash,
    pub validator_count: usize,
}

/// Masternode identities were synchronized with the masternode list at `core_height`.
pub struct SynchronizeMasternodeIdentitiesEvent {
    pub timestamp: SystemTime,
    pub core_height: CoreHeight,
    pub created_identities: usize,
    pub updated_identities: usize,
    pub removed_reward_shares: usize,
}

/// A new chain lock was published to the latest core chain lock.
pub struct UpdateChainLockEvent {
    pub timestamp: SystemTime,
    pub chain_lock: ChainLock,
}

/// The ZMQ listener lost its connection to Core and is reconnecting.
pub struct ReconnectZmqEvent {
    pub timestamp: SystemTime,
    pub attempt: u32,
    pub reason: String,
}

/// The node hit a fatal error and is shutting down.
pub struct FatalErrorEvent {
    pub timestamp: SystemTime,
    pub message: String,
}
