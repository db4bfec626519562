/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The uncommitted storage transaction every proposal round writes into.
//!
//! A [`Transaction`] buffers sets and deletes on top of a [`KVStore`] without touching it. Reads through
//! the transaction see the buffered writes. The buffered writes of a round can be taken out
//! ([`take_pending`](Transaction::take_pending)) and put back later
//! ([`restore`](Transaction::restore)), so that the round that finally wins can be committed in a single
//! [`KVStore::write`] no matter how many rounds were executed in between.

use std::collections::BTreeMap;

use borsh::BorshSerialize;

use crate::{
    block_execution::BlockExecutionContext,
    types::{
        crypto_primitives::CryptoHasher,
        crypto_primitives::Digest,
        data_types::{CoreHeight, CryptoHash, Identifier},
        platform_state::{DataContract, Document, Identity},
        validator_set::ValidatorSet,
    },
};

use super::{
    pluggables::{
        document_key, documents_by_owner_key, Genesis, KVGet, KVGetError, KVStore, Key,
        StorageError, WriteBatch,
    },
    variables::{self, concat},
};

/// Writes buffered by a [`Transaction`]. `None` marks a delete.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingWrites(BTreeMap<Vec<u8>, Option<Vec<u8>>>);

impl PendingWrites {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub struct Transaction<K: KVStore> {
    store: K,
    pending: PendingWrites,
}

impl<K: KVStore> Transaction<K> {
    pub fn new(store: K) -> Transaction<K> {
        Transaction {
            store,
            pending: PendingWrites::default(),
        }
    }

    /// Start a fresh transaction, discarding every write buffered so far.
    pub fn begin(&mut self) {
        self.pending.0.clear();
    }

    /// Discard every buffered write. Equivalent to [`begin`](Self::begin), named for the failure path.
    pub fn rollback(&mut self) {
        self.pending.0.clear();
    }

    pub fn take_pending(&mut self) -> PendingWrites {
        std::mem::take(&mut self.pending)
    }

    /// A copy of the buffered writes, to [`restore`](Self::restore) if a state transition is rejected
    /// after writing.
    pub fn snapshot(&self) -> PendingWrites {
        self.pending.clone()
    }

    /// Replace the buffered writes with `pending`.
    pub fn restore(&mut self, pending: PendingWrites) {
        self.pending = pending;
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Atomically write every buffered set and delete to the underlying store, then start afresh.
    pub fn commit(&mut self) -> Result<(), StorageError> {
        let mut wb = K::WriteBatch::new();
        for (key, value) in &self.pending.0 {
            match value {
                Some(value) => wb.set(key, value),
                None => wb.delete(key),
            }
        }
        self.store.write(wb)?;
        self.pending.0.clear();
        Ok(())
    }

    /// The app hash resulting from applying the buffered writes on top of `previous`.
    ///
    /// Deterministic: the same buffered writes on top of the same previous app hash always yield the
    /// same result, regardless of the order in which they were buffered.
    pub fn app_hash(&self, previous: &CryptoHash) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        hasher.update(previous.bytes());
        for (key, value) in &self.pending.0 {
            hasher.update((key.len() as u64).to_le_bytes());
            hasher.update(key);
            match value {
                Some(value) => {
                    hasher.update([1u8]);
                    hasher.update((value.len() as u64).to_le_bytes());
                    hasher.update(value);
                }
                None => hasher.update([0u8]),
            }
        }
        CryptoHash::new(hasher.finalize().into())
    }

    /// Get a reference to the committed store underneath this transaction.
    pub fn store(&self) -> &K {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut K {
        &mut self.store
    }

    pub fn set(&mut self, key: &[u8], value: &[u8]) {
        self.pending.0.insert(key.to_vec(), Some(value.to_vec()));
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.pending.0.insert(key.to_vec(), None);
    }

    fn set_serialized<T: BorshSerialize>(
        &mut self,
        key: &[u8],
        value: &T,
        name: Key,
    ) -> Result<(), StorageError> {
        let bytes = value
            .try_to_vec()
            .map_err(|err| StorageError::SerializeValueError {
                key: name,
                source: err,
            })?;
        self.set(key, &bytes);
        Ok(())
    }

    /* ↓↓↓ Identities ↓↓↓ */

    /// Store `identity` and index each of its public keys by hash.
    pub fn set_identity(&mut self, identity: &Identity) -> Result<(), StorageError> {
        self.set_serialized(
            &concat(&variables::IDENTITIES, identity.id.as_slice()),
            identity,
            Key::Identity { id: identity.id },
        )?;
        for key in identity.public_keys.values() {
            let hash = key.hash();
            self.set_serialized(
                &concat(&variables::IDENTITY_BY_PUBLIC_KEY_HASH, &hash.bytes()),
                &identity.id,
                Key::IdentityByPublicKeyHash { hash },
            )?;
        }
        Ok(())
    }

    /* ↓↓↓ Data Contracts ↓↓↓ */

    pub fn set_data_contract(&mut self, data_contract: &DataContract) -> Result<(), StorageError> {
        self.set_serialized(
            &concat(&variables::DATA_CONTRACTS, data_contract.id.as_slice()),
            data_contract,
            Key::DataContract {
                id: data_contract.id,
            },
        )
    }

    /* ↓↓↓ Documents ↓↓↓ */

    /// Store `document`, adding it to its owner's index if it is new.
    pub fn set_document(&mut self, document: &Document) -> Result<(), StorageError> {
        let mut owned = self
            .document_ids_by_owner(&document.data_contract_id, &document.owner_id)
            .map_err(read_error)?;
        if !owned.contains(&document.id) {
            owned.push(document.id);
            self.set_owner_index(&document.data_contract_id, &document.owner_id, &owned)?;
        }
        self.set_serialized(
            &document_key(&document.data_contract_id, &document.id),
            document,
            Key::Document {
                data_contract_id: document.data_contract_id,
                id: document.id,
            },
        )
    }

    /// Delete a document and remove it from its owner's index. Returns whether it existed.
    pub fn delete_document(
        &mut self,
        data_contract_id: &Identifier,
        id: &Identifier,
    ) -> Result<bool, StorageError> {
        let document = match self.document(data_contract_id, id).map_err(read_error)? {
            Some(document) => document,
            None => return Ok(false),
        };
        let mut owned = self
            .document_ids_by_owner(data_contract_id, &document.owner_id)
            .map_err(read_error)?;
        owned.retain(|owned_id| owned_id != id);
        self.set_owner_index(data_contract_id, &document.owner_id, &owned)?;
        self.delete(&document_key(data_contract_id, id));
        Ok(true)
    }

    fn set_owner_index(
        &mut self,
        data_contract_id: &Identifier,
        owner_id: &Identifier,
        owned: &Vec<Identifier>,
    ) -> Result<(), StorageError> {
        let key = documents_by_owner_key(data_contract_id, owner_id);
        if owned.is_empty() {
            self.delete(&key);
            Ok(())
        } else {
            self.set_serialized(
                &key,
                owned,
                Key::DocumentsByOwner {
                    data_contract_id: *data_contract_id,
                    owner_id: *owner_id,
                },
            )
        }
    }

    /* ↓↓↓ Chain State ↓↓↓ */

    pub fn set_genesis(&mut self, genesis: &Genesis) -> Result<(), StorageError> {
        self.set_serialized(&variables::GENESIS, genesis, Key::Genesis)
    }

    pub fn set_app_hash(&mut self, app_hash: &CryptoHash) -> Result<(), StorageError> {
        self.set_serialized(&variables::APP_HASH, app_hash, Key::AppHash)
    }

    pub fn set_latest_block_execution_context(
        &mut self,
        context: &BlockExecutionContext,
    ) -> Result<(), StorageError> {
        self.set_serialized(
            &variables::LATEST_BLOCK_EXECUTION_CONTEXT,
            context,
            Key::LatestBlockExecutionContext,
        )
    }

    pub fn set_last_synced_core_height(&mut self, height: CoreHeight) -> Result<(), StorageError> {
        self.set_serialized(
            &variables::LAST_SYNCED_CORE_HEIGHT,
            &height,
            Key::LastSyncedCoreHeight,
        )
    }

    pub fn set_validator_set(&mut self, validator_set: &ValidatorSet) -> Result<(), StorageError> {
        self.set_serialized(&variables::VALIDATOR_SET, validator_set, Key::ValidatorSet)
    }
}

impl<K: KVStore> KVGet for Transaction<K> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.pending.0.get(key) {
            Some(Some(value)) => Some(value.clone()),
            Some(None) => None,
            None => self.store.get(key),
        }
    }
}

fn read_error(err: KVGetError) -> StorageError {
    StorageError::WriteError(format!("index read failed: {}", err))
}
