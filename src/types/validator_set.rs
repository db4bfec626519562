/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that store information about validator sets or updates to validator sets.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::Deserialize;

use super::{
    crypto_primitives::BlsPublicKey,
    data_types::CryptoHash,
    masternode::{LlmqType, QuorumEntry},
};

/// Voting power every member of the active quorum gets.
pub const VALIDATOR_POWER: u64 = 100;

/// One member of the active validator quorum.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Validator {
    pub pro_tx_hash: CryptoHash,
    /// The member's share of the quorum's threshold key. Members that did not take part in the DKG
    /// have none.
    pub pub_key_share: Option<BlsPublicKey>,
    pub voting_power: u64,
}

/// The BLS quorum currently signing platform blocks.
///
/// ## Ordering of validators
///
/// `ValidatorSet` keeps its validators in ascending order of their ProTx hash, so every replica builds
/// byte-identical validator set updates from the same quorum.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct ValidatorSet {
    quorum: QuorumEntry,
    validators: Vec<Validator>,
}

impl ValidatorSet {
    pub fn new(quorum: QuorumEntry, mut validators: Vec<Validator>) -> ValidatorSet {
        validators.sort_by(|a, b| a.pro_tx_hash.cmp(&b.pro_tx_hash));
        validators.dedup_by(|a, b| a.pro_tx_hash == b.pro_tx_hash);
        ValidatorSet { quorum, validators }
    }

    pub fn quorum(&self) -> &QuorumEntry {
        &self.quorum
    }

    pub fn quorum_hash(&self) -> CryptoHash {
        self.quorum.quorum_hash
    }

    pub fn llmq_type(&self) -> LlmqType {
        self.quorum.llmq_type
    }

    pub fn threshold_public_key(&self) -> &BlsPublicKey {
        &self.quorum.quorum_public_key
    }

    /// Iterate through validators in ascending order of their ProTx hash.
    pub fn validators(&self) -> std::slice::Iter<'_, Validator> {
        self.validators.iter()
    }

    pub fn contains(&self, pro_tx_hash: &CryptoHash) -> bool {
        self.validators
            .binary_search_by(|validator| validator.pro_tx_hash.cmp(pro_tx_hash))
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn total_power(&self) -> u64 {
        self.validators
            .iter()
            .map(|validator| validator.voting_power)
            .sum()
    }
}

/// Update entry for one validator, handed to the consensus engine.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct ValidatorUpdate {
    pub pro_tx_hash: CryptoHash,
    pub power: u64,
    pub pub_key_share: Option<BlsPublicKey>,
}

/// A full replacement of the consensus engine's validator set.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct ValidatorSetUpdate {
    pub validator_updates: Vec<ValidatorUpdate>,
    pub threshold_public_key: BlsPublicKey,
    pub quorum_hash: CryptoHash,
}

/// Member of a quorum as reported by `quorum info`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuorumMember {
    pub pro_tx_hash: CryptoHash,
    pub valid: bool,
    #[serde(default)]
    pub pub_key_share: Option<BlsPublicKey>,
}

/// The result of `quorum info <type> <hash>`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuorumInfo {
    pub quorum_hash: CryptoHash,
    pub quorum_public_key: BlsPublicKey,
    pub members: Vec<QuorumMember>,
}
