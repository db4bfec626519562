/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state repository the state-transition engine reads and writes platform state through.
//!
//! Drive composes three layers implementing [`StateRepository`], each holding the next:
//! 1. [`CachedStateRepository`]: serves data contracts from an LRU [`DataContractCache`].
//! 2. [`LoggedStateRepository`]: traces every call with its parameters and response.
//! 3. [`DriveStateRepository`]: reads and writes the round's storage
//!    [`Transaction`](crate::storage::Transaction), and asks Core for transactions.

pub mod cached;

pub mod drive;

pub mod logged;

use std::fmt::{self, Display, Formatter};

pub use cached::{CachedStateRepository, DataContractCache, DataContractCacheItem};
pub use drive::DriveStateRepository;
pub use logged::LoggedStateRepository;

use crate::{
    core_chain::CoreRpcError,
    state_transition::StateTransitionExecutionContext,
    storage::{KVGetError, StorageError},
    types::{
        data_types::{BlockHeight, CoreHeight, CryptoHash, Identifier, PubKeyHash, Timestamp},
        platform_state::{DataContract, Document, Identity},
    },
};

pub trait StateRepository: Send + Sync {
    /* ↓↓↓ Identities ↓↓↓ */

    fn fetch_identity(
        &self,
        id: &Identifier,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<Option<Identity>, StateRepositoryError>;

    fn create_identity(
        &self,
        identity: &Identity,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError>;

    fn update_identity(
        &self,
        identity: &Identity,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError>;

    fn fetch_identity_id_by_public_key_hash(
        &self,
        hash: &PubKeyHash,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<Option<Identifier>, StateRepositoryError>;

    /* ↓↓↓ Data Contracts ↓↓↓ */

    fn fetch_data_contract(
        &self,
        id: &Identifier,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<Option<DataContract>, StateRepositoryError>;

    fn create_data_contract(
        &self,
        data_contract: &DataContract,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError>;

    fn update_data_contract(
        &self,
        data_contract: &DataContract,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError>;

    /* ↓↓↓ Documents ↓↓↓ */

    fn fetch_document(
        &self,
        data_contract_id: &Identifier,
        id: &Identifier,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<Option<Document>, StateRepositoryError>;

    /// Documents of type `document_type` owned by `owner_id`, in the order they were created.
    fn fetch_documents_by_owner(
        &self,
        data_contract_id: &Identifier,
        document_type: &str,
        owner_id: &Identifier,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<Vec<Document>, StateRepositoryError>;

    fn create_document(
        &self,
        document: &Document,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError>;

    fn update_document(
        &self,
        document: &Document,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError>;

    fn remove_document(
        &self,
        data_contract_id: &Identifier,
        id: &Identifier,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError>;

    /* ↓↓↓ Core and chain state ↓↓↓ */

    /// Raw bytes of the Core transaction `id`, or `None` if Core does not know it.
    fn fetch_transaction(&self, id: &CryptoHash) -> Result<Option<Vec<u8>>, StateRepositoryError>;

    fn fetch_latest_platform_block_height(&self) -> Result<BlockHeight, StateRepositoryError>;

    fn fetch_latest_platform_block_time(&self) -> Result<Timestamp, StateRepositoryError>;

    fn fetch_latest_platform_core_chain_locked_height(
        &self,
    ) -> Result<CoreHeight, StateRepositoryError>;
}

#[derive(Debug)]
pub enum StateRepositoryError {
    ReadError(KVGetError),
    StorageError(StorageError),
    CoreRpcError(CoreRpcError),
    DataContractNotFound { id: Identifier },
    UnknownDocumentType { data_contract_id: Identifier, document_type: String },
}

impl From<KVGetError> for StateRepositoryError {
    fn from(value: KVGetError) -> Self {
        StateRepositoryError::ReadError(value)
    }
}

impl From<StorageError> for StateRepositoryError {
    fn from(value: StorageError) -> Self {
        StateRepositoryError::StorageError(value)
    }
}

impl From<CoreRpcError> for StateRepositoryError {
    fn from(value: CoreRpcError) -> Self {
        StateRepositoryError::CoreRpcError(value)
    }
}

impl Display for StateRepositoryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StateRepositoryError::ReadError(err) => write!(f, "read failed: {}", err),
            StateRepositoryError::StorageError(err) => write!(f, "write failed: {}", err),
            StateRepositoryError::CoreRpcError(err) => write!(f, "core rpc failed: {}", err),
            StateRepositoryError::DataContractNotFound { id } => {
                write!(f, "data contract {} not found", id)
            }
            StateRepositoryError::UnknownDocumentType {
                data_contract_id,
                document_type,
            } => write!(
                f,
                "data contract {} has no document type {}",
                data_contract_id, document_type
            ),
        }
    }
}

impl std::error::Error for StateRepositoryError {}
