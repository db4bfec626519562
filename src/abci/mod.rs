/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The application side of the ABCI protocol.
//!
//! [`AbciApplication`] holds the handlers. The remaining modules hold what they speak and read:
//! [typed messages](messages), [errors](error), the [query router](query), the
//! [system data contracts](system_contracts) registered at genesis, and the
//! [feature flags](feature_flags) that schedule consensus parameter changes.

pub mod application;

pub mod error;

pub mod feature_flags;

pub mod messages;

pub mod query;

pub mod system_contracts;

pub use application::{AbciApplication, DriveRepository};
pub use error::{wrap_in_error_handler, AbciError, HandlerError};
