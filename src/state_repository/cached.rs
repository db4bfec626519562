/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! State repository layer serving data contracts from an LRU cache.
//!
//! A cache hit must cost the caller exactly what the original fetch cost, so every cached data contract
//! is stored together with the [`FeeOperation`]s its fetch incurred, and those operations are replayed
//! into the caller's execution context on every hit.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;

use crate::{
    state_transition::{FeeOperation, StateTransitionExecutionContext},
    types::{
        data_types::{BlockHeight, CoreHeight, CryptoHash, Identifier, PubKeyHash, Timestamp},
        platform_state::{DataContract, Document, Identity},
    },
};

use super::{StateRepository, StateRepositoryError};

/// A cached data contract and the operations fetching it from storage cost.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataContractCacheItem {
    pub data_contract: DataContract,
    pub operations: Vec<FeeOperation>,
}

impl DataContractCacheItem {
    pub fn new(data_contract: DataContract, operations: Vec<FeeOperation>) -> DataContractCacheItem {
        DataContractCacheItem {
            data_contract,
            operations,
        }
    }

    pub fn key(&self) -> Identifier {
        self.data_contract.id
    }
}

/// LRU cache of data contracts, shared between the state repository and the ABCI handlers.
#[derive(Clone)]
pub struct DataContractCache(Arc<Mutex<LruCache<Identifier, DataContractCacheItem>>>);

impl DataContractCache {
    /// A cache holding at most `size` data contracts. A `size` of 0 is treated as 1.
    pub fn new(size: usize) -> DataContractCache {
        let capacity = NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN);
        DataContractCache(Arc::new(Mutex::new(LruCache::new(capacity))))
    }

    fn cache(&self) -> MutexGuard<'_, LruCache<Identifier, DataContractCacheItem>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: &Identifier) -> Option<DataContractCacheItem> {
        self.cache().get(id).cloned()
    }

    pub fn set(&self, item: DataContractCacheItem) {
        self.cache().put(item.key(), item);
    }

    pub fn delete(&self, id: &Identifier) -> bool {
        self.cache().pop(id).is_some()
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.cache().contains(id)
    }

    pub fn len(&self) -> usize {
        self.cache().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache().is_empty()
    }

    pub fn clear(&self) {
        self.cache().clear()
    }

    /// Replace the cached copy of `data_contract`, if there is one, keeping the operations of the
    /// original fetch.
    pub fn refresh(&self, data_contract: &DataContract) {
        let mut cache = self.cache();
        if let Some(item) = cache.peek_mut(&data_contract.id) {
            item.data_contract = data_contract.clone();
        }
    }
}

pub struct CachedStateRepository<S: StateRepository> {
    inner: S,
    cache: DataContractCache,
}

impl<S: StateRepository> CachedStateRepository<S> {
    pub fn new(inner: S, cache: DataContractCache) -> CachedStateRepository<S> {
        CachedStateRepository { inner, cache }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn cache(&self) -> &DataContractCache {
        &self.cache
    }
}

impl<S: StateRepository> StateRepository for CachedStateRepository<S> {
    fn fetch_identity(
        &self,
        id: &Identifier,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<Option<Identity>, StateRepositoryError> {
        self.inner.fetch_identity(id, execution_context)
    }

    fn create_identity(
        &self,
        identity: &Identity,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        self.inner.create_identity(identity, execution_context)
    }

    fn update_identity(
        &self,
        identity: &Identity,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        self.inner.update_identity(identity, execution_context)
    }

    fn fetch_identity_id_by_public_key_hash(
        &self,
        hash: &PubKeyHash,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<Option<Identifier>, StateRepositoryError> {
        self.inner
            .fetch_identity_id_by_public_key_hash(hash, execution_context)
    }

    fn fetch_data_contract(
        &self,
        id: &Identifier,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<Option<DataContract>, StateRepositoryError> {
        if let Some(item) = self.cache.get(id) {
            execution_context.add_operations(item.operations);
            return Ok(Some(item.data_contract));
        }

        // Fetch in a context of its own so that exactly the operations of this fetch get cached.
        let mut fetch_context = StateTransitionExecutionContext::new();
        let data_contract = self.inner.fetch_data_contract(id, &mut fetch_context)?;
        let operations = fetch_context.operations().to_vec();
        execution_context.add_operations(operations.clone());

        if let Some(data_contract) = &data_contract {
            self.cache
                .set(DataContractCacheItem::new(data_contract.clone(), operations));
        }

        Ok(data_contract)
    }

    fn create_data_contract(
        &self,
        data_contract: &DataContract,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        self.cache.delete(&data_contract.id);
        self.inner
            .create_data_contract(data_contract, execution_context)
    }

    fn update_data_contract(
        &self,
        data_contract: &DataContract,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        self.cache.delete(&data_contract.id);
        self.inner
            .update_data_contract(data_contract, execution_context)
    }

    fn fetch_document(
        &self,
        data_contract_id: &Identifier,
        id: &Identifier,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<Option<Document>, StateRepositoryError> {
        self.inner
            .fetch_document(data_contract_id, id, execution_context)
    }

    fn fetch_documents_by_owner(
        &self,
        data_contract_id: &Identifier,
        document_type: &str,
        owner_id: &Identifier,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<Vec<Document>, StateRepositoryError> {
        self.inner.fetch_documents_by_owner(
            data_contract_id,
            document_type,
            owner_id,
            execution_context,
        )
    }

    fn create_document(
        &self,
        document: &Document,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        self.inner.create_document(document, execution_context)
    }

    fn update_document(
        &self,
        document: &Document,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        self.inner.update_document(document, execution_context)
    }

    fn remove_document(
        &self,
        data_contract_id: &Identifier,
        id: &Identifier,
        execution_context: &mut StateTransitionExecutionContext,
    ) -> Result<(), StateRepositoryError> {
        self.inner
            .remove_document(data_contract_id, id, execution_context)
    }

    fn fetch_transaction(&self, id: &CryptoHash) -> Result<Option<Vec<u8>>, StateRepositoryError> {
        self.inner.fetch_transaction(id)
    }

    fn fetch_latest_platform_block_height(&self) -> Result<BlockHeight, StateRepositoryError> {
        self.inner.fetch_latest_platform_block_height()
    }

    fn fetch_latest_platform_block_time(&self) -> Result<Timestamp, StateRepositoryError> {
        self.inner.fetch_latest_platform_block_time()
    }

    fn fetch_latest_platform_core_chain_locked_height(
        &self,
    ) -> Result<CoreHeight, StateRepositoryError> {
        self.inner.fetch_latest_platform_core_chain_locked_height()
    }
}
