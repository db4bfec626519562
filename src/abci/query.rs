/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The `Query` router.
//!
//! Queries are answered from committed state only. Request and response payloads are Borsh-encoded
//! structs, one pair per route:
//!
//! | Path                             | Request                          | Response                  |
//! |----------------------------------|----------------------------------|---------------------------|
//! | `/identities`                    | [`IdentitiesQuery`]              | `Vec<Option<Identity>>`   |
//! | `/identities/by-public-key-hash` | [`IdentitiesByPublicKeyHashQuery`] | `Vec<Option<Identity>>` |
//! | `/dataContracts`                 | [`DataContractQuery`]            | `DataContract`            |
//! | `/dataContracts/documents`       | [`DocumentsQuery`]               | `Vec<Document>`           |
//! | `/proofs`                        | [`ProofsQuery`]                  | [`Proof`]                 |

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    storage::KVGet,
    types::{
        crypto_primitives::sha256,
        data_types::{BlockHeight, CoreHeight, CryptoHash, Identifier, PubKeyHash},
    },
};

use super::{
    error::{AbciError, HandlerError},
    messages::RequestQuery,
};

pub const IDENTITIES_PATH: &str = "/identities";
pub const IDENTITIES_BY_PUBLIC_KEY_HASH_PATH: &str = "/identities/by-public-key-hash";
pub const DATA_CONTRACTS_PATH: &str = "/dataContracts";
pub const DOCUMENTS_PATH: &str = "/dataContracts/documents";
pub const PROOFS_PATH: &str = "/proofs";

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct IdentitiesQuery {
    pub ids: Vec<Identifier>,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct IdentitiesByPublicKeyHashQuery {
    pub public_key_hashes: Vec<PubKeyHash>,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct DataContractQuery {
    pub id: Identifier,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct DocumentsQuery {
    pub data_contract_id: Identifier,
    pub document_type: String,
    pub owner_id: Identifier,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct DocumentRef {
    pub data_contract_id: Identifier,
    pub id: Identifier,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct ProofsQuery {
    pub identity_ids: Vec<Identifier>,
    pub data_contract_ids: Vec<Identifier>,
    pub documents: Vec<DocumentRef>,
}

/// Hash of one requested entry. `value_hash` is `None` if the entry does not exist.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct ProofEntry {
    pub id: Identifier,
    pub value_hash: Option<CryptoHash>,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Proof {
    pub app_hash: CryptoHash,
    pub height: BlockHeight,
    pub core_chain_locked_height: CoreHeight,
    pub entries: Vec<ProofEntry>,
}

/// The committed block queries are answered at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryMetadata {
    pub height: BlockHeight,
    pub core_chain_locked_height: CoreHeight,
    pub app_hash: CryptoHash,
}

pub struct QueryRouter<'a, G: KVGet> {
    store: &'a G,
    metadata: QueryMetadata,
    max_identities_per_request: usize,
}

impl<'a, G: KVGet> QueryRouter<'a, G> {
    pub fn new(store: &'a G, metadata: QueryMetadata, max_identities_per_request: usize) -> Self {
        QueryRouter {
            store,
            metadata,
            max_identities_per_request,
        }
    }

    /// Answer `request` with the Borsh-encoded response of its route.
    pub fn route(&self, request: &RequestQuery) -> Result<Vec<u8>, HandlerError> {
        if request.prove && request.path != PROOFS_PATH {
            return Err(AbciError::unimplemented(format!(
                "proofs for {} are served by {}",
                request.path, PROOFS_PATH
            ))
            .into());
        }

        match request.path.as_str() {
            IDENTITIES_PATH => self.identities(decode(request)?),
            IDENTITIES_BY_PUBLIC_KEY_HASH_PATH => {
                self.identities_by_public_key_hash(decode(request)?)
            }
            DATA_CONTRACTS_PATH => self.data_contract(decode(request)?),
            DOCUMENTS_PATH => self.documents(decode(request)?),
            PROOFS_PATH => self.proofs(decode(request)?),
            path => Err(AbciError::not_found(format!("unknown query path {}", path)).into()),
        }
    }

    fn identities(&self, query: IdentitiesQuery) -> Result<Vec<u8>, HandlerError> {
        self.check_limit(query.ids.len())?;
        let mut identities = Vec::with_capacity(query.ids.len());
        for id in &query.ids {
            identities.push(self.store.identity(id)?);
        }
        encode(&identities)
    }

    fn identities_by_public_key_hash(
        &self,
        query: IdentitiesByPublicKeyHashQuery,
    ) -> Result<Vec<u8>, HandlerError> {
        self.check_limit(query.public_key_hashes.len())?;
        let mut identities = Vec::with_capacity(query.public_key_hashes.len());
        for hash in &query.public_key_hashes {
            let identity = match self.store.identity_id_by_public_key_hash(hash)? {
                Some(id) => self.store.identity(&id)?,
                None => None,
            };
            identities.push(identity);
        }
        encode(&identities)
    }

    fn data_contract(&self, query: DataContractQuery) -> Result<Vec<u8>, HandlerError> {
        match self.store.data_contract(&query.id)? {
            Some(data_contract) => encode(&data_contract),
            None => Err(AbciError::not_found(format!("data contract {} not found", query.id)).into()),
        }
    }

    fn documents(&self, query: DocumentsQuery) -> Result<Vec<u8>, HandlerError> {
        let data_contract = self.store.data_contract(&query.data_contract_id)?.ok_or_else(|| {
            AbciError::not_found(format!("data contract {} not found", query.data_contract_id))
        })?;
        if !data_contract.has_document_type(&query.document_type) {
            return Err(AbciError::invalid_argument(format!(
                "data contract {} has no document type {}",
                query.data_contract_id, query.document_type
            ))
            .into());
        }

        let documents: Vec<_> = self
            .store
            .documents_by_owner(&query.data_contract_id, &query.owner_id)?
            .into_iter()
            .filter(|document| document.document_type == query.document_type)
            .collect();
        encode(&documents)
    }

    fn proofs(&self, query: ProofsQuery) -> Result<Vec<u8>, HandlerError> {
        self.check_limit(query.identity_ids.len())?;
        let mut entries = Vec::new();
        for id in &query.identity_ids {
            entries.push(entry(id, self.store.identity(id)?)?);
        }
        for id in &query.data_contract_ids {
            entries.push(entry(id, self.store.data_contract(id)?)?);
        }
        for document in &query.documents {
            let value = self.store.document(&document.data_contract_id, &document.id)?;
            entries.push(entry(&document.id, value)?);
        }

        encode(&Proof {
            app_hash: self.metadata.app_hash,
            height: self.metadata.height,
            core_chain_locked_height: self.metadata.core_chain_locked_height,
            entries,
        })
    }

    fn check_limit(&self, requested: usize) -> Result<(), HandlerError> {
        if requested > self.max_identities_per_request {
            return Err(AbciError::invalid_argument(format!(
                "{} identities requested, at most {} allowed",
                requested, self.max_identities_per_request
            ))
            .into());
        }
        Ok(())
    }
}

fn entry<T: BorshSerialize>(id: &Identifier, value: Option<T>) -> Result<ProofEntry, HandlerError> {
    let value_hash = match value {
        Some(value) => Some(sha256(&[&encode(&value)?])),
        None => None,
    };
    Ok(ProofEntry {
        id: *id,
        value_hash,
    })
}

fn decode<T: BorshDeserialize>(request: &RequestQuery) -> Result<T, HandlerError> {
    T::try_from_slice(&request.data).map_err(|err| {
        AbciError::invalid_argument(format!("invalid {} request: {}", request.path, err)).into()
    })
}

fn encode<T: BorshSerialize>(value: &T) -> Result<Vec<u8>, HandlerError> {
    value
        .try_to_vec()
        .map_err(|err| AbciError::internal(format!("failed to encode response: {}", err)).into())
}
