/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::fmt::{self, Display, Formatter};

use crate::types::{chain_lock::ChainLock, data_types::CoreHeight};

use super::{
    rpc::CoreRpcError,
    subject::{Subject, Subscription},
};

/// The most recent chain lock Drive has confirmed, shared by every component that needs to know how far
/// Core has progressed.
///
/// Only ever moves forward: [`update`](Self::update) ignores chain locks that are not strictly higher
/// than the current one.
#[derive(Clone)]
pub struct LatestCoreChainLock {
    subject: Subject<ChainLock>,
}

impl Default for LatestCoreChainLock {
    fn default() -> Self {
        Self::new()
    }
}

impl LatestCoreChainLock {
    pub fn new() -> LatestCoreChainLock {
        LatestCoreChainLock {
            subject: Subject::replaying(),
        }
    }

    /// Publish `chain_lock` if it is higher than the current one. Returns whether it was published.
    pub fn update(&self, chain_lock: ChainLock) -> bool {
        self.subject
            .publish_if(chain_lock.clone(), |latest| {
                latest.map_or(true, |latest| chain_lock.height > latest.height)
            })
            .is_some()
    }

    pub fn get(&self) -> Option<ChainLock> {
        self.subject.latest()
    }

    /// Receive every chain lock published from now on, starting with the current one if there is one.
    pub fn subscribe(&self) -> Subscription<ChainLock> {
        self.subject.subscribe()
    }

    /// Block until a chain lock at `height` or above is published, and return it.
    ///
    /// Returns immediately if the current chain lock is already high enough. Fails with
    /// [`ChainLockError::MissingChainLock`] if there is no chain lock yet, and with
    /// [`ChainLockError::Shutdown`] if the chain lock is [closed](Self::close) while waiting.
    pub fn wait_for_chain_locked_height(&self, height: CoreHeight) -> Result<ChainLock, ChainLockError> {
        let subscription = self.subscribe();
        match self.get() {
            None => return Err(ChainLockError::MissingChainLock),
            Some(chain_lock) if chain_lock.height >= height => return Ok(chain_lock),
            Some(_) => (),
        }

        loop {
            match subscription.recv() {
                Ok(chain_lock) if chain_lock.height >= height => return Ok(chain_lock),
                Ok(_) => continue,
                Err(_) => return Err(ChainLockError::Shutdown),
            }
        }
    }

    /// Cancel every wait on this chain lock. Used during shutdown.
    pub fn close(&self) {
        self.subject.close()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainLockError {
    /// No chain lock has been observed yet.
    MissingChainLock,
    /// Core reported a chain lock whose signature does not verify.
    InvalidChainLock { height: CoreHeight },
    CoreRpc(CoreRpcError),
    /// The node is shutting down.
    Shutdown,
}

impl From<CoreRpcError> for ChainLockError {
    fn from(value: CoreRpcError) -> Self {
        ChainLockError::CoreRpc(value)
    }
}

impl Display for ChainLockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ChainLockError::MissingChainLock => write!(f, "no core chain lock available"),
            ChainLockError::InvalidChainLock { height } => {
                write!(f, "chain lock at core height {} is invalid", height)
            }
            ChainLockError::CoreRpc(err) => Display::fmt(err, f),
            ChainLockError::Shutdown => write!(f, "shutting down"),
        }
    }
}

impl std::error::Error for ChainLockError {}
