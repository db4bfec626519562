/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Errors of the ABCI handlers.
//!
//! Handlers fail in one of two ways:
//! 1. With an [`AbciError`]: a recoverable error reported to the consensus engine as a response code.
//!    Only `CheckTx` and `Query` produce these, through [`wrap_in_error_handler`].
//! 2. With any other [`HandlerError`]: the node's state can no longer be trusted, and the node halts.

use std::fmt::{self, Display, Formatter};

use crate::{
    block_execution::TimerError,
    core_chain::{ChainLockError, CoreRpcError, SmlError},
    logging::ContextLogger,
    masternodes::MasternodeSyncError,
    state_repository::StateRepositoryError,
    storage::{KVGetError, StorageError},
    types::data_types::{BlockHeight, Round},
    validator_set::ValidatorSetError,
};

/// An error reported to the consensus engine as a gRPC-style status code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbciError {
    pub code: u32,
    pub message: String,
}

impl AbciError {
    pub const INVALID_ARGUMENT: u32 = 3;
    pub const NOT_FOUND: u32 = 5;
    pub const RESOURCE_EXHAUSTED: u32 = 8;
    pub const UNIMPLEMENTED: u32 = 12;
    pub const INTERNAL: u32 = 13;

    pub fn new(code: u32, message: impl Into<String>) -> AbciError {
        AbciError {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> AbciError {
        AbciError::new(AbciError::INVALID_ARGUMENT, message)
    }

    pub fn not_found(message: impl Into<String>) -> AbciError {
        AbciError::new(AbciError::NOT_FOUND, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> AbciError {
        AbciError::new(AbciError::RESOURCE_EXHAUSTED, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> AbciError {
        AbciError::new(AbciError::UNIMPLEMENTED, message)
    }

    pub fn internal(message: impl Into<String>) -> AbciError {
        AbciError::new(AbciError::INTERNAL, message)
    }
}

impl Display for AbciError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "abci error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for AbciError {}

#[derive(Debug)]
pub enum HandlerError {
    Abci(AbciError),
    Read(KVGetError),
    Storage(StorageError),
    CoreRpc(CoreRpcError),
    ChainLock(ChainLockError),
    Sml(SmlError),
    ValidatorSet(ValidatorSetError),
    MasternodeSync(MasternodeSyncError),
    StateRepository(StateRepositoryError),
    Timer(TimerError),
    /// The chain was already initialized, or was not initialized yet.
    ChainState(String),
    UnexpectedHeight { expected: BlockHeight, found: BlockHeight },
    /// `FinalizeBlock` named a round no proposal was executed for.
    UnknownRound { height: BlockHeight, round: Round },
}

macro_rules! impl_from_for_handler_error {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for HandlerError {
                fn from(value: $source) -> Self {
                    HandlerError::$variant(value)
                }
            }
        )*
    };
}

impl_from_for_handler_error! {
    AbciError => Abci,
    KVGetError => Read,
    StorageError => Storage,
    CoreRpcError => CoreRpc,
    ChainLockError => ChainLock,
    SmlError => Sml,
    ValidatorSetError => ValidatorSet,
    MasternodeSyncError => MasternodeSync,
    StateRepositoryError => StateRepository,
    TimerError => Timer,
}

impl Display for HandlerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Abci(err) => Display::fmt(err, f),
            HandlerError::Read(err) => write!(f, "storage read failed: {}", err),
            HandlerError::Storage(err) => write!(f, "storage write failed: {}", err),
            HandlerError::CoreRpc(err) => write!(f, "core rpc failed: {}", err),
            HandlerError::ChainLock(err) => write!(f, "chain lock: {}", err),
            HandlerError::Sml(err) => write!(f, "masternode list: {}", err),
            HandlerError::ValidatorSet(err) => write!(f, "validator set: {}", err),
            HandlerError::MasternodeSync(err) => {
                write!(f, "masternode identity synchronization: {}", err)
            }
            HandlerError::StateRepository(err) => write!(f, "state repository: {}", err),
            HandlerError::Timer(err) => write!(f, "execution timer: {}", err),
            HandlerError::ChainState(message) => f.write_str(message),
            HandlerError::UnexpectedHeight { expected, found } => write!(
                f,
                "expected a request for height {}, got height {}",
                expected, found
            ),
            HandlerError::UnknownRound { height, round } => write!(
                f,
                "no proposal was executed for round {} of height {}",
                round, height
            ),
        }
    }
}

impl std::error::Error for HandlerError {}

/// Run `handler`, turning every error it returns into an [`AbciError`].
///
/// `AbciError`s pass through unchanged. Any other error is logged and becomes `INTERNAL`, with the
/// error's message only if `respond_with_internal_error_details` is set.
pub fn wrap_in_error_handler<T>(
    handler: impl FnOnce() -> Result<T, HandlerError>,
    respond_with_internal_error_details: bool,
    logger: &ContextLogger,
) -> Result<T, AbciError> {
    match handler() {
        Ok(response) => Ok(response),
        Err(HandlerError::Abci(err)) => {
            logger.debug(format_args!("responding with {}", err));
            Err(err)
        }
        Err(err) => {
            logger.error(format_args!("internal error: {}", err));
            let message = if respond_with_internal_error_details {
                err.to_string()
            } else {
                "Internal error".to_string()
            };
            Err(AbciError::internal(message))
        }
    }
}
