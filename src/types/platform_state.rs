/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Identities, data contracts, and documents: the values state transitions create and modify.
//!
//! Validation of these values is the business of the state-transition engine. This crate only needs
//! enough structure to persist them, serve them from `Query`, and create the ones it owns itself
//! (masternode identities, reward shares, and system data contracts).

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::sha256,
    data_types::{Identifier, PubKeyHash, Timestamp},
};

pub type KeyID = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub enum KeyType {
    EcdsaSecp256k1,
    Bls12_381,
    EcdsaHash160,
    Bip13ScriptHash,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub enum Purpose {
    Authentication,
    Encryption,
    Decryption,
    Withdraw,
    Voting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub enum SecurityLevel {
    Master,
    Critical,
    High,
    Medium,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct IdentityPublicKey {
    pub id: KeyID,
    pub key_type: KeyType,
    pub purpose: Purpose,
    pub security_level: SecurityLevel,
    pub data: Vec<u8>,
    pub read_only: bool,
    pub disabled_at: Option<Timestamp>,
}

impl IdentityPublicKey {
    pub fn is_disabled(&self) -> bool {
        self.disabled_at.is_some()
    }

    /// The 20-byte hash this key is indexed under. Hash-typed keys already are one.
    pub fn hash(&self) -> PubKeyHash {
        let mut bytes = [0u8; 20];
        if self.data.len() == 20 {
            bytes.copy_from_slice(&self.data);
        } else {
            bytes.copy_from_slice(&sha256(&[&self.data]).bytes()[..20]);
        }
        PubKeyHash::new(bytes)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Identity {
    pub id: Identifier,
    pub balance: u64,
    pub revision: u64,
    pub public_keys: BTreeMap<KeyID, IdentityPublicKey>,
}

impl Identity {
    /// Create an identity at revision 0 with `public_keys`, numbering the keys from 0 in order.
    pub fn new(id: Identifier, public_keys: Vec<IdentityPublicKey>) -> Identity {
        let public_keys = public_keys
            .into_iter()
            .enumerate()
            .map(|(index, mut key)| {
                key.id = index as KeyID;
                (key.id, key)
            })
            .collect();
        Identity {
            id,
            balance: 0,
            revision: 0,
            public_keys,
        }
    }

    /// The id the next added key should take.
    pub fn next_key_id(&self) -> KeyID {
        self.public_keys
            .keys()
            .next_back()
            .map(|id| id + 1)
            .unwrap_or(0)
    }

    pub fn add_public_key(&mut self, mut key: IdentityPublicKey) -> KeyID {
        key.id = self.next_key_id();
        let id = key.id;
        self.public_keys.insert(id, key);
        id
    }
}

/// A registered data contract. Its document schemas are opaque to this crate.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct DataContract {
    pub id: Identifier,
    pub owner_id: Identifier,
    pub version: u32,
    /// Document type name to JSON schema.
    pub document_schemas: BTreeMap<String, String>,
}

impl DataContract {
    pub fn has_document_type(&self, document_type: &str) -> bool {
        self.document_schemas.contains_key(document_type)
    }
}

/// A document property value.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub enum Value {
    Identifier(Identifier),
    U64(u64),
    Text(String),
    Bytes(Vec<u8>),
    Bool(bool),
}

impl Value {
    pub fn as_identifier(&self) -> Option<&Identifier> {
        match self {
            Value::Identifier(identifier) => Some(identifier),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(int) => Some(*int),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Document {
    pub id: Identifier,
    pub data_contract_id: Identifier,
    pub document_type: String,
    pub owner_id: Identifier,
    pub revision: u64,
    pub created_at: Option<Timestamp>,
    pub properties: BTreeMap<String, Value>,
}

impl Document {
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}
