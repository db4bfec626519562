/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Drive's view of Core, the Layer-1 chain.
//!
//! Core is reached in two ways:
//! 1. Requests go through the pluggable [`CoreRpc`] trait ([`JsonRpcCoreClient`] talks to a real node).
//! 2. Notifications arrive over ZMQ through the pluggable [`ZmqSubscriber`] trait, and are re-published
//!    as typed [`ZmqEvents`].
//!
//! On top of these, this module keeps the [`LatestCoreChainLock`] and the [simplified masternode
//! list](SmlTracker) up to date.

pub mod chain_lock_sync;

pub mod json_rpc;

pub mod latest_chain_lock;

pub mod rpc;

pub mod sml;

pub mod subject;

pub mod sync_wait;

pub mod zmq;

pub use chain_lock_sync::{ensure_block, ChainLockMode};
pub use json_rpc::JsonRpcCoreClient;
pub use latest_chain_lock::{ChainLockError, LatestCoreChainLock};
pub use rpc::{
    BlockchainInfo, CoreBlock, CoreRpc, CoreRpcError, MnSyncStatus, RPC_INVALID_ADDRESS_OR_KEY,
};
pub use sml::{SimplifiedMNListStore, SmlError, SmlTracker};
pub use subject::{Subject, Subscription};
pub use sync_wait::{wait_for_core_sync, wait_for_first_chain_lock};
pub use zmq::{ZmqError, ZmqEvents, ZmqListenerConfiguration, ZmqMessage, ZmqSubscriber};
