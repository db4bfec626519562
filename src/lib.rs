/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus-facing application layer of a masternode-based platform chain.
//!
//! Drive answers the ABCI requests of the consensus engine, executing platform state transitions
//! against a transactional store, while following Core, the Layer-1 chain, for chain locks, the
//! masternode list, and the quorum that signs platform blocks.
//!
//! Start a node with [`node::DriveSpec`].

pub mod abci;

pub mod block_execution;

pub mod config;

pub mod core_chain;

pub(crate) mod event_bus;

pub mod events;

pub mod logging;

pub mod masternodes;

pub mod node;

pub mod state_repository;

pub mod state_transition;

pub mod storage;

pub mod types;

pub mod validator_set;
