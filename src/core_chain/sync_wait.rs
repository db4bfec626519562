/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use crate::{logging::LOG_TARGET, types::chain_lock::ChainLock};

use super::{
    latest_chain_lock::{ChainLockError, LatestCoreChainLock},
    rpc::CoreRpc,
};

const CHAIN_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Poll `mnsync status` every `poll_interval` until Core reports it is synced.
///
/// Failed polls are logged and retried, since Core may still be starting. Fails with
/// [`ChainLockError::Shutdown`] as soon as `shutdown_signal` fires or disconnects.
pub fn wait_for_core_sync<R: CoreRpc + ?Sized>(
    core_rpc: &R,
    poll_interval: Duration,
    shutdown_signal: &Receiver<()>,
) -> Result<(), ChainLockError> {
    loop {
        match core_rpc.mnsync_status() {
            Ok(status) if status.is_synced => {
                log::info!(target: LOG_TARGET, "core is synced");
                return Ok(());
            }
            Ok(status) => log::info!(
                target: LOG_TARGET,
                "waiting for core to sync, current asset: {}",
                status.asset_name
            ),
            Err(err) => log::warn!(target: LOG_TARGET, "failed to read core sync status: {}", err),
        }

        match shutdown_signal.recv_timeout(poll_interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return Err(ChainLockError::Shutdown),
            Err(RecvTimeoutError::Timeout) => (),
        }
    }
}

/// Block until `latest_chain_lock` holds a chain lock, and return it.
///
/// Fails with [`ChainLockError::Shutdown`] as soon as `shutdown_signal` fires or disconnects, or when
/// `latest_chain_lock` is closed.
pub fn wait_for_first_chain_lock(
    latest_chain_lock: &LatestCoreChainLock,
    shutdown_signal: &Receiver<()>,
) -> Result<ChainLock, ChainLockError> {
    let chain_locks = latest_chain_lock.subscribe();
    loop {
        match chain_locks.recv_timeout(CHAIN_LOCK_POLL_INTERVAL) {
            Ok(chain_lock) => {
                log::info!(
                    target: LOG_TARGET,
                    "first chain lock at core height {}",
                    chain_lock.height
                );
                return Ok(chain_lock);
            }
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return Err(ChainLockError::Shutdown),
        }

        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return Err(ChainLockError::Shutdown),
            Err(TryRecvError::Empty) => (),
        }
    }
}
