/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::sync::{Arc, Mutex, PoisonError};

use crate::logging::ContextLogger;

use super::BlockInfo;

/// Shared cell telling the state repository which round is executing.
///
/// The ABCI handler that owns a round [enters](Self::enter) it before executing transactions. The state
/// repository reads the round's block info and logger from here, since it is constructed once at
/// startup and outlives every round.
#[derive(Clone, Debug, Default)]
pub struct ExecutionScope(Arc<Mutex<ScopeState>>);

#[derive(Clone, Debug, Default)]
struct ScopeState {
    block_info: Option<BlockInfo>,
    logger: ContextLogger,
}

impl ExecutionScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self, block_info: BlockInfo, logger: ContextLogger) {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        state.block_info = Some(block_info);
        state.logger = logger;
    }

    /// Keep the block info of the last round but log under `logger`, for requests that do not
    /// execute a round.
    pub fn set_logger(&self, logger: ContextLogger) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).logger = logger;
    }

    pub fn block_info(&self) -> Option<BlockInfo> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).block_info
    }

    pub fn logger(&self) -> ContextLogger {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .logger
            .clone()
    }
}
