//! [`TestExecutor`], a small state-transition engine used by the ABCI tests.
//!
//! Transactions are Borsh-encoded [`TestTransition`]s. They register identities and data contracts, and
//! queue withdrawal transactions, which is enough to exercise every path a round takes through Drive.

use borsh::{BorshDeserialize, BorshSerialize};
use drive_abci::{
    state_repository::StateRepository,
    state_transition::{
        ConsensusError, ExecutionError, ExecutionOutcome, FeeOperation,
        StateTransitionExecutionContext, StateTransitionExecutor,
    },
    types::{
        crypto_primitives::BLS_SIGNATURE_LENGTH,
        data_types::Identifier,
        platform_state::{DataContract, Identity},
    },
};

/// Code of transactions that do not decode.
pub(crate) const DECODE_ERROR_CODE: u32 = 1000;

pub(crate) const IDENTITY_ALREADY_EXISTS_CODE: u32 = 4000;

pub(crate) const IDENTITY_NOT_FOUND_CODE: u32 = 4001;

#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub(crate) enum TestTransition {
    RegisterIdentity {
        id: Identifier,
    },
    RegisterContract {
        id: Identifier,
        owner_id: Identifier,
        document_type: String,
    },
    /// Queue a withdrawal of `amount` from an existing identity.
    Withdraw {
        identity_id: Identifier,
        amount: u64,
    },
    /// Register an identity, then fail with `code`. The registration must not survive.
    RegisterThenFail {
        id: Identifier,
        code: u32,
    },
}

impl TestTransition {
    pub(crate) fn to_tx(&self) -> Vec<u8> {
        self.try_to_vec().unwrap()
    }
}

/// The unsigned withdrawal transaction a [`TestTransition::Withdraw`] queues: the identity and amount,
/// followed by an all-zero signature slot.
pub(crate) fn withdrawal_transaction(identity_id: &Identifier, amount: u64) -> Vec<u8> {
    let mut transaction = identity_id.as_slice().to_vec();
    transaction.extend_from_slice(&amount.to_le_bytes());
    transaction.extend_from_slice(&[0u8; BLS_SIGNATURE_LENGTH]);
    transaction
}

pub(crate) struct TestExecutor;

impl StateTransitionExecutor for TestExecutor {
    type StateTransition = TestTransition;

    fn validate_basic(&self, raw: &[u8]) -> Result<TestTransition, ConsensusError> {
        TestTransition::try_from_slice(raw)
            .map_err(|err| ConsensusError::new(DECODE_ERROR_CODE, format!("undecodable: {}", err)))
    }

    fn execute<S: StateRepository>(
        &self,
        transition: &TestTransition,
        state_repository: &S,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        execution_context.add_operation(FeeOperation::SignatureVerification);

        match transition {
            TestTransition::RegisterIdentity { id } => {
                register_identity(id, state_repository, execution_context)?;
                Ok(ExecutionOutcome::default())
            }
            TestTransition::RegisterContract {
                id,
                owner_id,
                document_type,
            } => {
                let data_contract = DataContract {
                    id: *id,
                    owner_id: *owner_id,
                    version: 1,
                    document_schemas: [(document_type.clone(), "{}".to_string())]
                        .into_iter()
                        .collect(),
                };
                state_repository.create_data_contract(&data_contract, execution_context)?;
                Ok(ExecutionOutcome::default())
            }
            TestTransition::Withdraw {
                identity_id,
                amount,
            } => {
                if state_repository
                    .fetch_identity(identity_id, execution_context)?
                    .is_none()
                {
                    return Err(ConsensusError::new(
                        IDENTITY_NOT_FOUND_CODE,
                        format!("identity {} not found", identity_id),
                    )
                    .into());
                }
                Ok(ExecutionOutcome {
                    withdrawal_transactions: vec![withdrawal_transaction(identity_id, *amount)],
                })
            }
            TestTransition::RegisterThenFail { id, code } => {
                register_identity(id, state_repository, execution_context)?;
                Err(ConsensusError::new(*code, "failed after writing").into())
            }
        }
    }
}

fn register_identity<S: StateRepository>(
    id: &Identifier,
    state_repository: &S,
    execution_context: &mut StateTransitionExecutionContext,
) -> Result<(), ExecutionError> {
    if state_repository
        .fetch_identity(id, execution_context)?
        .is_some()
    {
        return Err(ConsensusError::new(
            IDENTITY_ALREADY_EXISTS_CODE,
            format!("identity {} already exists", id),
        )
        .into());
    }
    state_repository.create_identity(&Identity::new(*id, Vec::new()), execution_context)?;
    Ok(())
}
