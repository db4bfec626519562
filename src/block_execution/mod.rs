/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-height, per-round execution state.
//!
//! A height may see several proposal rounds before one of them commits. Each round executes into its
//! own [`BlockExecutionContext`], kept in the [`ProposalRoundCollection`] until `FinalizeBlock` promotes
//! the winning one to "latest" and clears the rest.

pub mod context;

pub mod round_collection;

pub mod scope;

pub mod timer;

pub use context::{BlockExecutionContext, BlockInfo, LastCommitInfo, ThresholdVoteExtension};
pub use round_collection::ProposalRoundCollection;
pub use scope::ExecutionScope;
pub use timer::{ExecutionTimer, TimerError};
