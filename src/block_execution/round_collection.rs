/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::collections::BTreeMap;

use crate::types::data_types::{BlockHeight, Round};

use super::BlockExecutionContext;

/// The block execution contexts of every proposal round seen at the current height, keyed by round.
///
/// The collection is the authority for round scoping: a context is only reachable through it until
/// `FinalizeBlock` [takes](Self::take) the winning one out, after which the collection is
/// [cleared](Self::clear) entirely.
#[derive(Debug, Default)]
pub struct ProposalRoundCollection {
    rounds: BTreeMap<Round, BlockExecutionContext>,
}

impl ProposalRoundCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `context` under its round, returning the context it replaces.
    ///
    /// Contexts of another height are stale, and are dropped before `context` is inserted.
    pub fn insert(&mut self, context: BlockExecutionContext) -> Option<BlockExecutionContext> {
        if self.height().map_or(false, |height| height != context.height) {
            context.logger.debug(format!(
                "dropping {} stale proposal rounds",
                self.rounds.len()
            ));
            self.rounds.clear();
        }
        self.rounds.insert(context.round, context)
    }

    pub fn get(&self, round: Round) -> Option<&BlockExecutionContext> {
        self.rounds.get(&round)
    }

    pub fn get_mut(&mut self, round: Round) -> Option<&mut BlockExecutionContext> {
        self.rounds.get_mut(&round)
    }

    /// Move the context of `round` out of the collection.
    pub fn take(&mut self, round: Round) -> Option<BlockExecutionContext> {
        self.rounds.remove(&round)
    }

    pub fn contains(&self, round: Round) -> bool {
        self.rounds.contains_key(&round)
    }

    /// The height every context in the collection belongs to, if there is any.
    pub fn height(&self) -> Option<BlockHeight> {
        self.rounds.values().next().map(|context| context.height)
    }

    pub fn rounds(&self) -> impl Iterator<Item = &Round> {
        self.rounds.keys()
    }

    pub fn contexts(&self) -> impl Iterator<Item = &BlockExecutionContext> {
        self.rounds.values()
    }

    pub fn clear(&mut self) {
        self.rounds.clear();
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }
}
