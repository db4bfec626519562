/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable Drive persistence.
//!
//! The storage engine itself is provided by the library user. Drive only needs three capabilities from
//! it: reading a value by key ([`KVGet`]), atomically writing a batch of sets and deletes
//! ([`KVStore::write`]), and flushing to durable storage ([`KVStore::flush`]).

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    block_execution::BlockExecutionContext,
    types::{
        data_types::{BlockHeight, CoreHeight, CryptoHash, Identifier, PubKeyHash},
        platform_state::{DataContract, Document, Identity},
        validator_set::ValidatorSet,
    },
};

use super::variables::{self, concat};

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;

    /// Atomically apply every set and delete in `wb`.
    fn write(&mut self, wb: Self::WriteBatch) -> Result<(), StorageError>;

    /// Make every previous write durable.
    fn flush(&mut self) -> Result<(), StorageError>;

    /// Release the storage engine. Reads and writes after `close` may fail.
    fn close(&mut self);
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

/// Parameters of the chain fixed by `InitChain`.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Genesis {
    pub chain_id: String,
    pub initial_height: BlockHeight,
    pub initial_core_height: CoreHeight,
    pub genesis_time_ms: u64,
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Read and deserialize the value at `key`, naming it `name` in errors.
    fn get_deserialized<T: BorshDeserialize>(
        &self,
        key: &[u8],
        name: Key,
    ) -> Result<Option<T>, KVGetError>
    where
        Self: Sized,
    {
        match self.get(key) {
            None => Ok(None),
            Some(bytes) => T::deserialize(&mut bytes.as_slice())
                .map(Some)
                .map_err(|err| KVGetError::DeserializeValueError {
                    key: name,
                    source: err,
                }),
        }
    }

    /* ↓↓↓ Identities ↓↓↓ */

    fn identity(&self, id: &Identifier) -> Result<Option<Identity>, KVGetError>
    where
        Self: Sized,
    {
        self.get_deserialized(
            &concat(&variables::IDENTITIES, id.as_slice()),
            Key::Identity { id: *id },
        )
    }

    fn identity_id_by_public_key_hash(
        &self,
        hash: &PubKeyHash,
    ) -> Result<Option<Identifier>, KVGetError>
    where
        Self: Sized,
    {
        self.get_deserialized(
            &concat(&variables::IDENTITY_BY_PUBLIC_KEY_HASH, &hash.bytes()),
            Key::IdentityByPublicKeyHash { hash: *hash },
        )
    }

    /* ↓↓↓ Data Contracts ↓↓↓ */

    fn data_contract(&self, id: &Identifier) -> Result<Option<DataContract>, KVGetError>
    where
        Self: Sized,
    {
        self.get_deserialized(
            &concat(&variables::DATA_CONTRACTS, id.as_slice()),
            Key::DataContract { id: *id },
        )
    }

    /* ↓↓↓ Documents ↓↓↓ */

    fn document(
        &self,
        data_contract_id: &Identifier,
        id: &Identifier,
    ) -> Result<Option<Document>, KVGetError>
    where
        Self: Sized,
    {
        self.get_deserialized(
            &document_key(data_contract_id, id),
            Key::Document {
                data_contract_id: *data_contract_id,
                id: *id,
            },
        )
    }

    fn document_ids_by_owner(
        &self,
        data_contract_id: &Identifier,
        owner_id: &Identifier,
    ) -> Result<Vec<Identifier>, KVGetError>
    where
        Self: Sized,
    {
        Ok(self
            .get_deserialized(
                &documents_by_owner_key(data_contract_id, owner_id),
                Key::DocumentsByOwner {
                    data_contract_id: *data_contract_id,
                    owner_id: *owner_id,
                },
            )?
            .unwrap_or_default())
    }

    /// Every document of `data_contract_id` owned by `owner_id`, in the order they were created.
    fn documents_by_owner(
        &self,
        data_contract_id: &Identifier,
        owner_id: &Identifier,
    ) -> Result<Vec<Document>, KVGetError>
    where
        Self: Sized,
    {
        let mut documents = Vec::new();
        for id in self.document_ids_by_owner(data_contract_id, owner_id)? {
            match self.document(data_contract_id, &id)? {
                Some(document) => documents.push(document),
                None => {
                    return Err(KVGetError::ValueExpectedButNotFound {
                        key: Key::Document {
                            data_contract_id: *data_contract_id,
                            id,
                        },
                    })
                }
            }
        }
        Ok(documents)
    }

    /* ↓↓↓ Chain State ↓↓↓ */

    fn genesis(&self) -> Result<Option<Genesis>, KVGetError>
    where
        Self: Sized,
    {
        self.get_deserialized(&variables::GENESIS, Key::Genesis)
    }

    fn app_hash(&self) -> Result<Option<CryptoHash>, KVGetError>
    where
        Self: Sized,
    {
        self.get_deserialized(&variables::APP_HASH, Key::AppHash)
    }

    fn latest_block_execution_context(
        &self,
    ) -> Result<Option<BlockExecutionContext>, KVGetError>
    where
        Self: Sized,
    {
        self.get_deserialized(
            &variables::LATEST_BLOCK_EXECUTION_CONTEXT,
            Key::LatestBlockExecutionContext,
        )
    }

    fn last_synced_core_height(&self) -> Result<Option<CoreHeight>, KVGetError>
    where
        Self: Sized,
    {
        self.get_deserialized(&variables::LAST_SYNCED_CORE_HEIGHT, Key::LastSyncedCoreHeight)
    }

    fn validator_set(&self) -> Result<Option<ValidatorSet>, KVGetError>
    where
        Self: Sized,
    {
        self.get_deserialized(&variables::VALIDATOR_SET, Key::ValidatorSet)
    }
}

pub(crate) fn document_key(data_contract_id: &Identifier, id: &Identifier) -> Vec<u8> {
    concat(
        &variables::DOCUMENTS,
        &concat(data_contract_id.as_slice(), id.as_slice()),
    )
}

pub(crate) fn documents_by_owner_key(data_contract_id: &Identifier, owner_id: &Identifier) -> Vec<u8> {
    concat(
        &variables::DOCUMENTS_BY_OWNER,
        &concat(data_contract_id.as_slice(), owner_id.as_slice()),
    )
}

/// Error when trying to read a value corresponding to a given key from the [key value store][KVStore].
/// The error may arise in the following circumstances:
/// 1. The value corresponding to a given key cannot be deserialized into its expected type,
/// 2. The value corresponding to a given key cannot be found, although an index says it exists.
#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError { key: Key, source: std::io::Error },
    ValueExpectedButNotFound { key: Key },
}

impl Display for KVGetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            KVGetError::DeserializeValueError { key, source } => {
                write!(f, "failed to deserialize {}: {}", key, source)
            }
            KVGetError::ValueExpectedButNotFound { key } => {
                write!(f, "{} expected but not found", key)
            }
        }
    }
}

impl std::error::Error for KVGetError {}

#[derive(Debug)]
pub enum Key {
    Identity { id: Identifier },
    IdentityByPublicKeyHash { hash: PubKeyHash },
    DataContract { id: Identifier },
    Document { data_contract_id: Identifier, id: Identifier },
    DocumentsByOwner { data_contract_id: Identifier, owner_id: Identifier },
    Genesis,
    AppHash,
    LatestBlockExecutionContext,
    LastSyncedCoreHeight,
    ValidatorSet,
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self {
            &Key::Identity { id } => write!(f, "Identity {}", id),
            &Key::IdentityByPublicKeyHash { hash } => {
                write!(f, "Identity by public key hash {}", hex::encode(hash.bytes()))
            }
            &Key::DataContract { id } => write!(f, "Data Contract {}", id),
            &Key::Document {
                data_contract_id,
                id,
            } => write!(f, "Document {} of contract {}", id, data_contract_id),
            &Key::DocumentsByOwner {
                data_contract_id,
                owner_id,
            } => write!(
                f,
                "Documents of contract {} owned by {}",
                data_contract_id, owner_id
            ),
            &Key::Genesis => write!(f, "Genesis"),
            &Key::AppHash => write!(f, "App Hash"),
            &Key::LatestBlockExecutionContext => write!(f, "Latest Block Execution Context"),
            &Key::LastSyncedCoreHeight => write!(f, "Last Synced Core Height"),
            &Key::ValidatorSet => write!(f, "Validator Set"),
        }
    }
}

/// Error raised by the storage engine or while preparing values for it.
#[derive(Debug)]
pub enum StorageError {
    SerializeValueError { key: Key, source: std::io::Error },
    WriteError(String),
    FlushError(String),
    Closed,
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::SerializeValueError { key, source } => {
                write!(f, "failed to serialize {}: {}", key, source)
            }
            StorageError::WriteError(message) => write!(f, "storage write failed: {}", message),
            StorageError::FlushError(message) => write!(f, "storage flush failed: {}", message),
            StorageError::Closed => write!(f, "storage is closed"),
        }
    }
}

impl std::error::Error for StorageError {}
