/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! `rewardShare` documents of the masternode reward shares contract.
//!
//! A reward share document is owned by a masternode identity and pays `percentage` basis points of its
//! rewards to the identity `payToId`. Drive creates one for the operator of every masternode with a
//! non-zero operator reward.

use std::collections::BTreeMap;

use crate::types::{
    crypto_primitives::sha256,
    data_types::{Identifier, Timestamp},
    platform_state::{Document, Value},
};

pub const REWARD_SHARE_DOCUMENT_TYPE: &str = "rewardShare";

pub const PAY_TO_ID_PROPERTY: &str = "payToId";

pub const PERCENTAGE_PROPERTY: &str = "percentage";

/// Maximum number of reward shares a single masternode may own.
pub const MAX_REWARD_SHARES: usize = 16;

pub fn reward_share_document_id(masternode_id: &Identifier, pay_to_id: &Identifier) -> Identifier {
    sha256(&[masternode_id.as_slice(), pay_to_id.as_slice()]).into()
}

pub fn reward_share_document(
    data_contract_id: &Identifier,
    masternode_id: &Identifier,
    pay_to_id: &Identifier,
    percentage: u16,
    created_at: Timestamp,
) -> Document {
    let mut properties = BTreeMap::new();
    properties.insert(PAY_TO_ID_PROPERTY.to_string(), Value::Identifier(*pay_to_id));
    properties.insert(PERCENTAGE_PROPERTY.to_string(), Value::U64(percentage as u64));

    Document {
        id: reward_share_document_id(masternode_id, pay_to_id),
        data_contract_id: *data_contract_id,
        document_type: REWARD_SHARE_DOCUMENT_TYPE.to_string(),
        owner_id: *masternode_id,
        revision: 1,
        created_at: Some(created_at),
        properties,
    }
}

/// The identity a reward share document pays to.
pub fn pay_to_id(document: &Document) -> Option<&Identifier> {
    document
        .property(PAY_TO_ID_PROPERTY)
        .and_then(Value::as_identifier)
}
