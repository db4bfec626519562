/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Identifiers and shapes of the identities Drive creates for masternodes.
//!
//! Every masternode owns up to three identities:
//! - The **masternode identity**, identified by the masternode's ProRegTx hash. It carries the owner key
//!   and, if the masternode has a payout script, a withdrawal key for it.
//! - The **operator identity**, identified by `SHA256(pro_reg_tx_hash || pub_key_operator)`. It carries
//!   the operator's BLS key. A new one is created every time the operator key changes.
//! - The **voting identity**, identified by `SHA256(pro_reg_tx_hash || voting_key_hash)`, if the voting
//!   key differs from the owner key.

use crate::types::{
    crypto_primitives::{sha256, BlsPublicKey},
    data_types::{CryptoHash, Identifier, PubKeyHash},
    platform_state::{Identity, IdentityPublicKey, KeyType, Purpose, SecurityLevel},
};

pub fn masternode_identifier(pro_reg_tx_hash: &CryptoHash) -> Identifier {
    Identifier::from(*pro_reg_tx_hash)
}

pub fn operator_identifier(pro_reg_tx_hash: &CryptoHash, pub_key_operator: &BlsPublicKey) -> Identifier {
    sha256(&[&pro_reg_tx_hash.bytes(), pub_key_operator.bytes()]).into()
}

pub fn voting_identifier(pro_reg_tx_hash: &CryptoHash, voting_key_hash: &PubKeyHash) -> Identifier {
    sha256(&[&pro_reg_tx_hash.bytes(), &voting_key_hash.bytes()]).into()
}

/// The withdrawal key paying out to `payout_script`, if it is a P2PKH or P2SH script.
pub fn withdrawal_key(payout_script: &[u8]) -> Option<IdentityPublicKey> {
    let (key_type, data) = match payout_script {
        // OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG
        [0x76, 0xa9, 0x14, hash @ .., 0x88, 0xac] if hash.len() == 20 => {
            (KeyType::EcdsaHash160, hash.to_vec())
        }
        // OP_HASH160 <20 bytes> OP_EQUAL
        [0xa9, 0x14, hash @ .., 0x87] if hash.len() == 20 => {
            (KeyType::Bip13ScriptHash, hash.to_vec())
        }
        _ => return None,
    };
    Some(IdentityPublicKey {
        id: 0,
        key_type,
        purpose: Purpose::Withdraw,
        security_level: SecurityLevel::Critical,
        data,
        read_only: true,
        disabled_at: None,
    })
}

pub fn masternode_identity(
    pro_reg_tx_hash: &CryptoHash,
    owner_key_hash: &PubKeyHash,
    payout_script: Option<&[u8]>,
) -> Identity {
    let mut public_keys = vec![IdentityPublicKey {
        id: 0,
        key_type: KeyType::EcdsaHash160,
        purpose: Purpose::Authentication,
        security_level: SecurityLevel::Master,
        data: owner_key_hash.bytes().to_vec(),
        read_only: true,
        disabled_at: None,
    }];
    public_keys.extend(payout_script.and_then(withdrawal_key));
    Identity::new(masternode_identifier(pro_reg_tx_hash), public_keys)
}

pub fn operator_identity(pro_reg_tx_hash: &CryptoHash, pub_key_operator: &BlsPublicKey) -> Identity {
    Identity::new(
        operator_identifier(pro_reg_tx_hash, pub_key_operator),
        vec![IdentityPublicKey {
            id: 0,
            key_type: KeyType::Bls12_381,
            purpose: Purpose::Authentication,
            security_level: SecurityLevel::Critical,
            data: pub_key_operator.bytes().to_vec(),
            read_only: true,
            disabled_at: None,
        }],
    )
}

pub fn voting_identity(pro_reg_tx_hash: &CryptoHash, voting_key_hash: &PubKeyHash) -> Identity {
    Identity::new(
        voting_identifier(pro_reg_tx_hash, voting_key_hash),
        vec![IdentityPublicKey {
            id: 0,
            key_type: KeyType::EcdsaHash160,
            purpose: Purpose::Voting,
            security_level: SecurityLevel::High,
            data: voting_key_hash.bytes().to_vec(),
            read_only: true,
            disabled_at: None,
        }],
    )
}
