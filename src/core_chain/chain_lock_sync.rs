/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thread keeping [`LatestCoreChainLock`] up to date.
//!
//! ## Modes
//!
//! In [`ChainLockMode::ChainLocks`] mode the synchronizer bootstraps from `getbestchainlock`, then
//! follows the `rawchainlocksig` topic. In [`ChainLockMode::Fallback`] mode, for networks without chain
//! locks, it follows the `hashblock` topic instead and publishes a [fallback](ChainLock::fallback) chain
//! lock for every new block.
//!
//! In both modes a chain lock is only published once Core has its block: see [`ensure_block`].

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use serde::Deserialize;

use crate::{
    events::{Event, UpdateChainLockEvent},
    logging::LOG_TARGET,
    types::{chain_lock::ChainLock, data_types::CryptoHash},
};

use super::{
    latest_chain_lock::{ChainLockError, LatestCoreChainLock},
    rpc::CoreRpc,
    subject::Subject,
    zmq::ZmqEvents,
};

/// How long the synchronizer waits for a notification before checking for shutdown again.
const NOTIFICATION_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChainLockMode {
    #[default]
    ChainLocks,
    Fallback,
}

/// Return once Core has the block `hash`.
///
/// Subscribes to `hash_blocks` *before* asking Core for the block, so that a block arriving between the
/// two is not missed. If Core knows the block, returns without waiting. If Core answers "not found",
/// waits for a `hashblock` notification carrying exactly `hash`, ignoring every other hash.
pub fn ensure_block<R: CoreRpc + ?Sized>(
    core_rpc: &R,
    hash_blocks: &Subject<CryptoHash>,
    hash: &CryptoHash,
) -> Result<(), ChainLockError> {
    let subscription = hash_blocks.subscribe();

    match core_rpc.get_block(hash) {
        Ok(_) => return Ok(()),
        Err(err) if err.is_not_found() => (),
        Err(err) => return Err(err.into()),
    }

    loop {
        match subscription.recv() {
            Ok(received) if received == *hash => return Ok(()),
            Ok(_) => continue,
            Err(_) => return Err(ChainLockError::Shutdown),
        }
    }
}

pub(crate) struct ChainLockSynchronizer<R: CoreRpc> {
    core_rpc: Arc<R>,
    zmq_events: ZmqEvents,
    latest_chain_lock: LatestCoreChainLock,
    mode: ChainLockMode,
    event_publisher: Option<Sender<Event>>,
    shutdown_signal: Receiver<()>,
}

impl<R: CoreRpc> ChainLockSynchronizer<R> {
    pub(crate) fn new(
        core_rpc: Arc<R>,
        zmq_events: ZmqEvents,
        latest_chain_lock: LatestCoreChainLock,
        mode: ChainLockMode,
        event_publisher: Option<Sender<Event>>,
        shutdown_signal: Receiver<()>,
    ) -> ChainLockSynchronizer<R> {
        ChainLockSynchronizer {
            core_rpc,
            zmq_events,
            latest_chain_lock,
            mode,
            event_publisher,
            shutdown_signal,
        }
    }

    pub(crate) fn start(self) -> JoinHandle<()> {
        thread::spawn(move || match self.mode {
            ChainLockMode::ChainLocks => self.follow_chain_locks(),
            ChainLockMode::Fallback => self.follow_blocks(),
        })
    }

    fn should_stop(&self) -> bool {
        matches!(
            self.shutdown_signal.try_recv(),
            Ok(()) | Err(TryRecvError::Disconnected)
        )
    }

    fn follow_chain_locks(&self) {
        let chain_locks = self.zmq_events.raw_chain_lock_sig.subscribe();

        match self.core_rpc.get_best_chain_lock() {
            Ok(chain_lock) => self.confirm_and_update(chain_lock),
            Err(err) => log::warn!(
                target: LOG_TARGET,
                "no best chain lock available yet, waiting for zmq: {}",
                err
            ),
        }

        loop {
            if self.should_stop() {
                return;
            }
            match chain_locks.recv_timeout(NOTIFICATION_POLL_INTERVAL) {
                Ok(chain_lock) => self.confirm_and_update(chain_lock),
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    fn follow_blocks(&self) {
        let blocks = self.zmq_events.hash_block.subscribe();

        match self.fallback_tip() {
            Ok(chain_lock) => self.update(chain_lock),
            Err(err) => log::warn!(target: LOG_TARGET, "failed to read core tip: {}", err),
        }

        loop {
            if self.should_stop() {
                return;
            }
            match blocks.recv_timeout(NOTIFICATION_POLL_INTERVAL) {
                Ok(hash) => match self.core_rpc.get_block(&hash) {
                    Ok(block) => self.update(ChainLock::fallback(block.height, block.hash)),
                    Err(err) => log::warn!(
                        target: LOG_TARGET,
                        "failed to read new block {}: {}",
                        hash,
                        err
                    ),
                },
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    fn fallback_tip(&self) -> Result<ChainLock, ChainLockError> {
        let height = self.core_rpc.get_block_count()?;
        let hash = self.core_rpc.get_block_hash(height)?;
        Ok(ChainLock::fallback(height, hash))
    }

    fn confirm_and_update(&self, chain_lock: ChainLock) {
        match ensure_block(
            self.core_rpc.as_ref(),
            &self.zmq_events.hash_block,
            &chain_lock.block_hash,
        ) {
            Ok(()) => self.update(chain_lock),
            Err(ChainLockError::Shutdown) => (),
            Err(err) => log::warn!(
                target: LOG_TARGET,
                "dropping chain lock at core height {}: {}",
                chain_lock.height,
                err
            ),
        }
    }

    fn update(&self, chain_lock: ChainLock) {
        if self.latest_chain_lock.update(chain_lock.clone()) {
            Event::publish(
                &self.event_publisher,
                Event::UpdateChainLock(UpdateChainLockEvent {
                    timestamp: SystemTime::now(),
                    chain_lock,
                }),
            );
        }
    }
}
