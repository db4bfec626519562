/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each piece of Drive state is stored in the user-provided key-value
//! store.
//!
//! # List of State Variables
//!
//! ## Platform State
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Identities|[`Identifier`](crate::types::data_types::Identifier) -> [`Identity`](crate::types::platform_state::Identity)|Every identity created by a state transition or by masternode identity synchronization.|
//! |Identity by Public Key Hash|[`PubKeyHash`](crate::types::data_types::PubKeyHash) -> [`Identifier`](crate::types::data_types::Identifier)|Reverse index from the 20-byte hash of each identity public key to the identity owning it.|
//! |Data Contracts|[`Identifier`](crate::types::data_types::Identifier) -> [`DataContract`](crate::types::platform_state::DataContract)|Registered data contracts, system contracts included.|
//! |Documents|([`Identifier`](crate::types::data_types::Identifier), [`Identifier`](crate::types::data_types::Identifier)) -> [`Document`](crate::types::platform_state::Document)|Documents keyed by data contract id then document id.|
//! |Documents by Owner|([`Identifier`](crate::types::data_types::Identifier), [`Identifier`](crate::types::data_types::Identifier)) -> `Vec<Identifier>`|Ids of the documents of a data contract owned by an identity.|
//!
//! ## Chain State
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Genesis|[`Genesis`](super::pluggables::Genesis)|Written once by `InitChain`.|
//! |App Hash|[`CryptoHash`](crate::types::data_types::CryptoHash)|App hash of the last committed block, or of genesis.|
//! |Latest Block Execution Context|[`BlockExecutionContext`](crate::block_execution::BlockExecutionContext)|Checkpoint of the last committed block, used to restore "latest" after a restart.|
//! |Last Synced Core Height|[`CoreHeight`](crate::types::data_types::CoreHeight)|Core height at which masternode identities were last synchronized.|
//! |Validator Set|[`ValidatorSet`](crate::types::validator_set::ValidatorSet)|The committed validator quorum.|
//!
//! # Persistence of state variables
//!
//! Every variable is stored as a **Borsh-serialized value**. Single values live at their one-byte
//! constant key. Mappings live at keys formed by concatenating the variable's one-byte prefix with the
//! raw bytes of the mapping's key (or keys, in order).

// Platform state
pub const IDENTITIES: [u8; 1] = [0];
pub const IDENTITY_BY_PUBLIC_KEY_HASH: [u8; 1] = [1];
pub const DATA_CONTRACTS: [u8; 1] = [2];
pub const DOCUMENTS: [u8; 1] = [3];
pub const DOCUMENTS_BY_OWNER: [u8; 1] = [4];

// Chain state
pub const GENESIS: [u8; 1] = [5];
pub const APP_HASH: [u8; 1] = [6];
pub const LATEST_BLOCK_EXECUTION_CONTEXT: [u8; 1] = [7];
pub const LAST_SYNCED_CORE_HEIGHT: [u8; 1] = [8];
pub const VALIDATOR_SET: [u8; 1] = [9];

/// Concatenate two byteslices into one vector.
pub fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}
