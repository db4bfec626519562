/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that are used across multiple components of Drive.
//!
//! Types specific to a single component, such as the ABCI request and response messages, live in the
//! module of that component.

pub mod chain_lock;

pub mod crypto_primitives;

pub mod data_types;

pub mod masternode;

pub mod platform_state;

pub mod validator_set;
