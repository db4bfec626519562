/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide two categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: provided by the [`sha2`] crate.
//! 2. **BLS key and signature bytes**: BLS arithmetic is performed by Core and by the consensus engine,
//!    so this crate only carries BLS public keys and signatures around as opaque, length-checked bytes.

use std::fmt::{self, Debug, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use super::data_types::CryptoHash;

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

/// Length in bytes of a compressed BLS12-381 public key.
pub const BLS_PUBLIC_KEY_LENGTH: usize = 48;

/// Length in bytes of a BLS12-381 signature.
pub const BLS_SIGNATURE_LENGTH: usize = 96;

/// Compute the SHA256 hash of the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    for part in parts {
        hasher.update(part);
    }
    CryptoHash::new(hasher.finalize().into())
}

/// Compute SHA256(SHA256(..)) of the concatenation of `parts`, the hash function Core uses for
/// transaction ids and quorum scores.
pub fn double_sha256(parts: &[&[u8]]) -> CryptoHash {
    let first = sha256(parts);
    sha256(&[&first.bytes()])
}

/// A compressed BLS12-381 public key (or public key share).
#[derive(
    Clone, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BlsPublicKey(#[serde(with = "hex")] Vec<u8>);

impl BlsPublicKey {
    /// Wrap `bytes`, returning `None` if they are not [`BLS_PUBLIC_KEY_LENGTH`] long.
    pub fn new(bytes: Vec<u8>) -> Option<Self> {
        if bytes.len() == BLS_PUBLIC_KEY_LENGTH {
            Some(Self(bytes))
        } else {
            None
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for BlsPublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "BlsPublicKey({})", hex::encode(&self.0))
    }
}

/// A BLS12-381 signature.
#[derive(
    Clone, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BlsSignature(#[serde(with = "hex")] Vec<u8>);

impl BlsSignature {
    /// Wrap `bytes`, returning `None` if they are not [`BLS_SIGNATURE_LENGTH`] long.
    pub fn new(bytes: Vec<u8>) -> Option<Self> {
        if bytes.len() == BLS_SIGNATURE_LENGTH {
            Some(Self(bytes))
        } else {
            None
        }
    }

    /// The all-zero placeholder signature used by chain locks fabricated in fallback mode.
    pub fn zero() -> Self {
        Self(vec![0u8; BLS_SIGNATURE_LENGTH])
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|byte| *byte == 0)
    }
}

impl Debug for BlsSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let encoded = hex::encode(&self.0);
        write!(f, "BlsSignature({}..)", &encoded[..encoded.len().min(16)])
    }
}
