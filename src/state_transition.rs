/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The seam between Drive and the state-transition engine.
//!
//! Decoding, validating, and applying state transitions is the business of the state-transition engine,
//! which the library user plugs in by implementing [`StateTransitionExecutor`]. Drive calls it in two
//! places:
//! 1. `CheckTx` calls [`validate_basic`](StateTransitionExecutor::validate_basic) to pre-validate a
//!    transaction without touching state.
//! 2. `PrepareProposal` and `ProcessProposal` call [`execute`](StateTransitionExecutor::execute) for
//!    every transaction of the proposal, giving the engine a [`StateRepository`] to read and write
//!    state through.
//!
//! An invalid transaction is reported as a [`ConsensusError`], which becomes a non-zero result code for
//! that transaction only. A failure of the state repository itself is not the transaction's fault, and
//! is reported as [`ExecutionError::StateRepository`], which halts the node.

use std::fmt::{self, Debug, Display, Formatter};

use crate::{
    state_repository::{StateRepository, StateRepositoryError},
    types::data_types::FeeResult,
};

/// Processing fee charged per byte read from storage.
pub const READ_BYTE_COST: u64 = 12;

/// Processing fee charged per byte written to storage.
pub const WRITE_BYTE_COST: u64 = 20;

/// Storage fee charged per byte persisted.
pub const STORAGE_BYTE_COST: u64 = 27;

/// Processing fee charged per signature verification.
pub const SIGNATURE_VERIFICATION_COST: u64 = 3_000;

pub trait StateTransitionExecutor: Send + 'static {
    /// The decoded form of a state transition.
    type StateTransition: Debug;

    /// Decode `raw` and perform validation that does not depend on state.
    fn validate_basic(&self, raw: &[u8]) -> Result<Self::StateTransition, ConsensusError>;

    /// Validate `transition` against state and apply it through `state_repository`, recording the fee
    /// operations incurred in `execution_context`.
    fn execute<S: StateRepository>(
        &self,
        transition: &Self::StateTransition,
        state_repository: &S,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<ExecutionOutcome, ExecutionError>;
}

/// Side effects of a successfully executed state transition that Drive itself has to carry forward.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Unsigned withdrawal transactions to be threshold-signed by the validator quorum. The last
    /// [`BLS_SIGNATURE_LENGTH`](crate::types::crypto_primitives::BLS_SIGNATURE_LENGTH) bytes of each
    /// are the slot the recovered quorum signature is written into.
    pub withdrawal_transactions: Vec<Vec<u8>>,
}

/// A state transition was found invalid. Carries the result code reported to the consensus engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsensusError {
    pub code: u32,
    pub message: String,
}

impl ConsensusError {
    /// Build a consensus error. `code` 0 means success on the wire, so it is bumped to 1.
    pub fn new(code: u32, message: impl Into<String>) -> ConsensusError {
        ConsensusError {
            code: code.max(1),
            message: message.into(),
        }
    }
}

impl Display for ConsensusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "consensus error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ConsensusError {}

#[derive(Debug)]
pub enum ExecutionError {
    Consensus(ConsensusError),
    StateRepository(StateRepositoryError),
}

impl From<ConsensusError> for ExecutionError {
    fn from(value: ConsensusError) -> Self {
        ExecutionError::Consensus(value)
    }
}

impl From<StateRepositoryError> for ExecutionError {
    fn from(value: StateRepositoryError) -> Self {
        ExecutionError::StateRepository(value)
    }
}

impl Display for ExecutionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::Consensus(err) => Display::fmt(err, f),
            ExecutionError::StateRepository(err) => write!(f, "state repository failed: {}", err),
        }
    }
}

impl std::error::Error for ExecutionError {}

/// One unit of work a state transition costs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeeOperation {
    Read { value_size: u64 },
    Write { key_size: u64, value_size: u64 },
    Delete { key_size: u64 },
    SignatureVerification,
    PreCalculated(FeeResult),
}

impl FeeOperation {
    pub fn fee(&self) -> FeeResult {
        match self {
            FeeOperation::Read { value_size } => FeeResult::new(value_size * READ_BYTE_COST, 0),
            FeeOperation::Write {
                key_size,
                value_size,
            } => FeeResult::new(
                (key_size + value_size) * WRITE_BYTE_COST,
                (key_size + value_size) * STORAGE_BYTE_COST,
            ),
            FeeOperation::Delete { key_size } => FeeResult::new(key_size * WRITE_BYTE_COST, 0),
            FeeOperation::SignatureVerification => FeeResult::new(SIGNATURE_VERIFICATION_COST, 0),
            FeeOperation::PreCalculated(fee) => *fee,
        }
    }
}

/// Collects the [`FeeOperation`]s one state transition incurs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateTransitionExecutionContext {
    operations: Vec<FeeOperation>,
}

impl StateTransitionExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_operation(&mut self, operation: FeeOperation) {
        self.operations.push(operation);
    }

    pub fn add_operations(&mut self, operations: impl IntoIterator<Item = FeeOperation>) {
        self.operations.extend(operations);
    }

    pub fn operations(&self) -> &[FeeOperation] {
        &self.operations
    }

    pub fn clear(&mut self) {
        self.operations.clear();
    }

    /// Sum of the fees of every operation recorded so far.
    pub fn fee(&self) -> FeeResult {
        let mut total = FeeResult::default();
        for operation in &self.operations {
            total += operation.fee();
        }
        total
    }
}
