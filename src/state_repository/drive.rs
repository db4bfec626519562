/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::sync::{Arc, Mutex, PoisonError};

use borsh::BorshSerialize;

use crate::{
    block_execution::ExecutionScope,
    core_chain::CoreRpc,
    state_transition::{FeeOperation, StateTransitionExecutionContext},
    storage::{lock, KVGet, KVStore, SharedTransaction},
    types::{
        data_types::{BlockHeight, CoreHeight, CryptoHash, Identifier, PubKeyHash, Timestamp},
        platform_state::{DataContract, Document, Identity},
    },
};

use super::{StateRepository, StateRepositoryError};

/// Size of every key component Drive stores values under.
const ID_SIZE: u64 = 32;

/// The base state repository: reads and writes go to the shared round
/// [`Transaction`](crate::storage::Transaction), Core transactions are fetched over RPC.
///
/// Data contracts created or updated through this repository are remembered until the ABCI handler
/// [takes](Self::take_touched_data_contracts) them into its block execution context.
pub struct DriveStateRepository<K: KVStore, R: CoreRpc> {
    transaction: SharedTransaction<K>,
    core_rpc: Arc<R>,
    scope: ExecutionScope,
    touched_data_contracts: Mutex<Vec<DataContract>>,
}

impl<K: KVStore, R: CoreRpc> DriveStateRepository<K, R> {
    pub fn new(
        transaction: SharedTransaction<K>,
        core_rpc: Arc<R>,
        scope: ExecutionScope,
    ) -> DriveStateRepository<K, R> {
        DriveStateRepository {
            transaction,
            core_rpc,
            scope,
            touched_data_contracts: Mutex::new(Vec::new()),
        }
    }

    pub fn take_touched_data_contracts(&self) -> Vec<DataContract> {
        std::mem::take(
            &mut *self
                .touched_data_contracts
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    fn touch_data_contract(&self, data_contract: &DataContract) {
        self.touched_data_contracts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data_contract.clone());
    }

    fn ensure_document_type(&self, document: &Document) -> Result<(), StateRepositoryError> {
        let transaction = lock(&self.transaction);
        match transaction.data_contract(&document.data_contract_id)? {
            None => Err(StateRepositoryError::DataContractNotFound {
                id: document.data_contract_id,
            }),
            Some(data_contract) if !data_contract.has_document_type(&document.document_type) => {
                Err(StateRepositoryError::UnknownDocumentType {
                    data_contract_id: document.data_contract_id,
                    document_type: document.document_type.clone(),
                })
            }
            Some(_) => Ok(()),
        }
    }
}

fn serialized_size<T: BorshSerialize>(value: &T) -> u64 {
    value.try_to_vec().map_or(0, |bytes| bytes.len() as u64)
}

fn read_operation<T: BorshSerialize>(value: &Option<T>) -> FeeOperation {
    FeeOperation::Read {
        value_size: value.as_ref().map_or(0, serialized_size),
    }
}

fn write_operation<T: BorshSerialize>(value: &T) -> FeeOperation {
    FeeOperation::Write {
        key_size: ID_SIZE,
        value_size: serialized_size(value),
    }
}

impl<K: KVStore, R: CoreRpc> StateRepository for DriveStateRepository<K, R> {
    fn fetch_identity(
        &self,
        id: &Identifier,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<Option<Identity>, StateRepositoryError> {
        let identity = lock(&self.transaction).identity(id)?;
        execution_context.add_operation(read_operation(&identity));
        Ok(identity)
    }

    fn create_identity(
        &self,
        identity: &Identity,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        lock(&self.transaction).set_identity(identity)?;
        execution_context.add_operation(write_operation(identity));
        Ok(())
    }

    fn update_identity(
        &self,
        identity: &Identity,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        self.create_identity(identity, execution_context)
    }

    fn fetch_identity_id_by_public_key_hash(
        &self,
        hash: &PubKeyHash,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<Option<Identifier>, StateRepositoryError> {
        let id = lock(&self.transaction).identity_id_by_public_key_hash(hash)?;
        execution_context.add_operation(read_operation(&id));
        Ok(id)
    }

    fn fetch_data_contract(
        &self,
        id: &Identifier,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<Option<DataContract>, StateRepositoryError> {
        let data_contract = lock(&self.transaction).data_contract(id)?;
        execution_context.add_operation(read_operation(&data_contract));
        Ok(data_contract)
    }

    fn create_data_contract(
        &self,
        data_contract: &DataContract,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        lock(&self.transaction).set_data_contract(data_contract)?;
        execution_context.add_operation(write_operation(data_contract));
        self.touch_data_contract(data_contract);
        Ok(())
    }

    fn update_data_contract(
        &self,
        data_contract: &DataContract,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        self.create_data_contract(data_contract, execution_context)
    }

    fn fetch_document(
        &self,
        data_contract_id: &Identifier,
        id: &Identifier,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<Option<Document>, StateRepositoryError> {
        let document = lock(&self.transaction).document(data_contract_id, id)?;
        execution_context.add_operation(read_operation(&document));
        Ok(document)
    }

    fn fetch_documents_by_owner(
        &self,
        data_contract_id: &Identifier,
        document_type: &str,
        owner_id: &Identifier,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<Vec<Document>, StateRepositoryError> {
        let documents = lock(&self.transaction).documents_by_owner(data_contract_id, owner_id)?;
        let documents: Vec<Document> = documents
            .into_iter()
            .filter(|document| document.document_type == document_type)
            .collect();
        for document in &documents {
            execution_context.add_operation(FeeOperation::Read {
                value_size: serialized_size(document),
            });
        }
        Ok(documents)
    }

    fn create_document(
        &self,
        document: &Document,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        self.ensure_document_type(document)?;
        lock(&self.transaction).set_document(document)?;
        execution_context.add_operation(write_operation(document));
        Ok(())
    }

    fn update_document(
        &self,
        document: &Document,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        self.create_document(document, execution_context)
    }

    fn remove_document(
        &self,
        data_contract_id: &Identifier,
        id: &Identifier,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        if lock(&self.transaction).delete_document(data_contract_id, id)? {
            execution_context.add_operation(FeeOperation::Delete {
                key_size: 2 * ID_SIZE,
            });
        }
        Ok(())
    }

    fn fetch_transaction(&self, id: &CryptoHash) -> Result<Option<Vec<u8>>, StateRepositoryError> {
        match self.core_rpc.get_raw_transaction(id) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn fetch_latest_platform_block_height(&self) -> Result<BlockHeight, StateRepositoryError> {
        if let Some(block_info) = self.scope.block_info() {
            return Ok(block_info.height);
        }
        Ok(lock(&self.transaction)
            .latest_block_execution_context()?
            .map(|context| context.height)
            .unwrap_or_default())
    }

    fn fetch_latest_platform_block_time(&self) -> Result<Timestamp, StateRepositoryError> {
        if let Some(block_info) = self.scope.block_info() {
            return Ok(block_info.time);
        }
        Ok(lock(&self.transaction)
            .latest_block_execution_context()?
            .map(|context| context.time)
            .unwrap_or_default())
    }

    fn fetch_latest_platform_core_chain_locked_height(
        &self,
    ) -> Result<CoreHeight, StateRepositoryError> {
        if let Some(block_info) = self.scope.block_info() {
            return Ok(block_info.core_chain_locked_height);
        }
        Ok(lock(&self.transaction)
            .latest_block_execution_context()?
            .map(|context| context.core_chain_locked_height)
            .unwrap_or_default())
    }
}
