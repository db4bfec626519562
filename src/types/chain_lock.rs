/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Chain locks: Layer-1 quorum signatures attesting that a Core block is final.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use super::{
    crypto_primitives::{BlsSignature, BLS_SIGNATURE_LENGTH},
    data_types::{CoreHeight, CryptoHash},
};

/// Number of bytes of a serialized chain lock: height (4), block hash (32), signature (96).
pub const CHAIN_LOCK_SIZE: usize = 4 + 32 + BLS_SIGNATURE_LENGTH;

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainLock {
    pub height: CoreHeight,
    pub block_hash: CryptoHash,
    pub signature: BlsSignature,
}

impl ChainLock {
    pub fn new(height: CoreHeight, block_hash: CryptoHash, signature: BlsSignature) -> Self {
        Self {
            height,
            block_hash,
            signature,
        }
    }

    /// A chain lock fabricated for networks without chain-lock support. Carries an all-zero signature.
    pub fn fallback(height: CoreHeight, block_hash: CryptoHash) -> Self {
        Self::new(height, block_hash, BlsSignature::zero())
    }

    pub fn is_fallback(&self) -> bool {
        self.signature.is_zero()
    }

    /// Parse the chain lock carried at the tail of a `rawchainlocksig` ZMQ message. The message body is
    /// the raw block followed by the serialized chain lock, whose block hash is in Core's internal byte
    /// order.
    pub fn from_raw_message(payload: &[u8]) -> Option<ChainLock> {
        if payload.len() < CHAIN_LOCK_SIZE {
            return None;
        }
        let raw = &payload[payload.len() - CHAIN_LOCK_SIZE..];

        let mut height = [0u8; 4];
        height.copy_from_slice(&raw[0..4]);
        let mut block_hash = [0u8; 32];
        block_hash.copy_from_slice(&raw[4..36]);
        let signature = BlsSignature::new(raw[36..].to_vec())?;

        Some(ChainLock::new(
            CoreHeight::new(u32::from_le_bytes(height)),
            CryptoHash::from_internal_bytes(block_hash),
            signature,
        ))
    }
}
