/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Simplified masternode list entries, quorum entries, and the diffs Core's `protx diff` returns.
//!
//! A [`SimplifiedMNList`] is the materialized masternode and quorum set at one Core block. It is built
//! by applying a chain of [`SimplifiedMNListDiff`]s, each of which names the block it applies on top of
//! (`base_block_hash`) and the block it yields (`block_hash`).

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use super::{
    crypto_primitives::BlsPublicKey,
    data_types::{CryptoHash, PubKeyHash},
};

/// Kind of long-living masternode quorum (LLMQ). The numeric values match Core's `llmqType`.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshDeserialize,
    BorshSerialize,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct LlmqType(u8);

impl LlmqType {
    pub const LLMQ_50_60: LlmqType = LlmqType(1);
    pub const LLMQ_400_60: LlmqType = LlmqType(2);
    pub const LLMQ_100_67: LlmqType = LlmqType(4);
    pub const LLMQ_TEST: LlmqType = LlmqType(100);

    pub const fn new(int: u8) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u8 {
        self.0
    }
}

impl Display for LlmqType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, BorshDeserialize, BorshSerialize, Serialize, Deserialize,
)]
pub enum MasternodeType {
    #[default]
    Regular,
    Evo,
}

/// One entry of the simplified masternode list.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasternodeEntry {
    pub pro_reg_tx_hash: CryptoHash,
    pub confirmed_hash: CryptoHash,
    pub service: String,
    pub pub_key_operator: BlsPublicKey,
    /// Hash of the voting key.
    pub voting_address: PubKeyHash,
    pub is_valid: bool,
    /// Current payout script, if Core reports one.
    #[serde(default, with = "optional_hex", rename = "payoutAddress")]
    pub payout_script: Option<Vec<u8>>,
    #[serde(default, rename = "nType", with = "masternode_type")]
    pub masternode_type: MasternodeType,
}

/// A quorum as listed in the simplified masternode list.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuorumEntry {
    pub llmq_type: LlmqType,
    pub quorum_hash: CryptoHash,
    pub quorum_public_key: BlsPublicKey,
}

/// Reference to a quorum removed by a diff.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedQuorum {
    pub llmq_type: LlmqType,
    pub quorum_hash: CryptoHash,
}

/// The result of `protx diff <base> <block>`.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimplifiedMNListDiff {
    pub base_block_hash: CryptoHash,
    pub block_hash: CryptoHash,
    #[serde(default, rename = "deletedMNs")]
    pub deleted_mns: Vec<CryptoHash>,
    #[serde(default)]
    pub mn_list: Vec<MasternodeEntry>,
    #[serde(default)]
    pub deleted_quorums: Vec<DeletedQuorum>,
    #[serde(default)]
    pub new_quorums: Vec<QuorumEntry>,
}

/// Materialized masternode list at one Core block.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SimplifiedMNList {
    block_hash: CryptoHash,
    masternodes: BTreeMap<CryptoHash, MasternodeEntry>,
    quorums: BTreeMap<(LlmqType, CryptoHash), QuorumEntry>,
}

impl SimplifiedMNList {
    /// An empty list positioned before the genesis block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from a diff based on the genesis (all-zero) block hash.
    pub fn from_base_diff(diff: &SimplifiedMNListDiff) -> Result<Self, DiffMismatch> {
        let mut list = Self::new();
        list.apply_diff(diff)?;
        Ok(list)
    }

    /// Apply `diff` on top of this list. Fails without modifying the list if the diff was not computed
    /// against this list's block. A list positioned before genesis accepts any base diff.
    pub fn apply_diff(&mut self, diff: &SimplifiedMNListDiff) -> Result<(), DiffMismatch> {
        let is_base = self.block_hash.is_zero() && self.masternodes.is_empty();
        if !is_base && diff.base_block_hash != self.block_hash {
            return Err(DiffMismatch {
                expected: self.block_hash,
                found: diff.base_block_hash,
            });
        }

        for deleted in &diff.deleted_mns {
            self.masternodes.remove(deleted);
        }
        for entry in &diff.mn_list {
            self.masternodes
                .insert(entry.pro_reg_tx_hash, entry.clone());
        }
        for deleted in &diff.deleted_quorums {
            self.quorums
                .remove(&(deleted.llmq_type, deleted.quorum_hash));
        }
        for quorum in &diff.new_quorums {
            self.quorums
                .insert((quorum.llmq_type, quorum.quorum_hash), quorum.clone());
        }
        self.block_hash = diff.block_hash;

        Ok(())
    }

    pub fn block_hash(&self) -> CryptoHash {
        self.block_hash
    }

    pub fn masternode(&self, pro_reg_tx_hash: &CryptoHash) -> Option<&MasternodeEntry> {
        self.masternodes.get(pro_reg_tx_hash)
    }

    /// Iterate through masternodes in ascending order of their ProRegTx hash.
    pub fn masternodes(&self) -> impl Iterator<Item = &MasternodeEntry> {
        self.masternodes.values()
    }

    pub fn valid_masternodes(&self) -> impl Iterator<Item = &MasternodeEntry> {
        self.masternodes.values().filter(|entry| entry.is_valid)
    }

    pub fn quorums_of_type(&self, llmq_type: LlmqType) -> impl Iterator<Item = &QuorumEntry> {
        self.quorums
            .values()
            .filter(move |quorum| quorum.llmq_type == llmq_type)
    }

    pub fn quorum(&self, llmq_type: LlmqType, quorum_hash: &CryptoHash) -> Option<&QuorumEntry> {
        self.quorums.get(&(llmq_type, *quorum_hash))
    }

    pub fn len(&self) -> usize {
        self.masternodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masternodes.is_empty()
    }
}

/// A diff was applied to a list at a different block than the diff's base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffMismatch {
    pub expected: CryptoHash,
    pub found: CryptoHash,
}

impl Display for DiffMismatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "diff based on block {} cannot be applied to list at block {}",
            self.found, self.expected
        )
    }
}

impl std::error::Error for DiffMismatch {}

/// The special-transaction payload of a ProRegTx, as returned by verbose `getrawtransaction`.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProRegTxPayload {
    #[serde(rename = "keyIDOwner")]
    pub owner_key_hash: PubKeyHash,
    #[serde(rename = "keyIDVoting")]
    pub voting_key_hash: PubKeyHash,
    /// Operator reward in basis points (1/100 of a percent), 0 to 10000.
    #[serde(deserialize_with = "operator_reward_basis_points")]
    pub operator_reward: u16,
    #[serde(with = "hex", rename = "payoutAddress")]
    pub payout_script: Vec<u8>,
}

/// Core reports the operator reward as a percentage with two decimals.
fn operator_reward_basis_points<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let percentage = <f64 as Deserialize>::deserialize(deserializer)?;
    if !(0.0..=100.0).contains(&percentage) {
        return Err(serde::de::Error::custom(format!(
            "operator reward {} out of range",
            percentage
        )));
    }
    Ok((percentage * 100.0).round() as u16)
}

mod optional_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let value: Option<String> = Option::deserialize(deserializer)?;
        value
            .map(|hex_str| hex::decode(hex_str).map_err(serde::de::Error::custom))
            .transpose()
    }
}

mod masternode_type {
    use super::MasternodeType;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &MasternodeType, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(match value {
            MasternodeType::Regular => 0,
            MasternodeType::Evo => 1,
        })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<MasternodeType, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(MasternodeType::Regular),
            1 => Ok(MasternodeType::Evo),
            other => Err(serde::de::Error::custom(format!(
                "unknown masternode type {}",
                other
            ))),
        }
    }
}
