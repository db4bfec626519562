/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The data contracts `InitChain` registers, and the identities owning them.

use std::collections::BTreeMap;

use crate::{
    config::{SystemContractConfiguration, SystemContractsConfiguration},
    masternodes::reward_shares::REWARD_SHARE_DOCUMENT_TYPE,
    types::platform_state::{
        DataContract, Identity, IdentityPublicKey, KeyType, Purpose, SecurityLevel,
    },
};

pub const UPDATE_CONSENSUS_PARAMS_DOCUMENT_TYPE: &str = "updateConsensusParams";

const OBJECT_SCHEMA: &str = r#"{"type":"object","additionalProperties":true}"#;

pub struct SystemContract {
    pub owner: Identity,
    pub data_contract: DataContract,
}

/// Feature flags, DPNS, masternode reward shares and DashPay, in the order they are registered.
pub fn system_contracts(configuration: &SystemContractsConfiguration) -> Vec<SystemContract> {
    vec![
        system_contract(
            &configuration.feature_flags,
            &[UPDATE_CONSENSUS_PARAMS_DOCUMENT_TYPE],
        ),
        system_contract(&configuration.dpns, &["domain", "preorder"]),
        system_contract(
            &configuration.masternode_reward_shares,
            &[REWARD_SHARE_DOCUMENT_TYPE],
        ),
        system_contract(
            &configuration.dashpay,
            &["profile", "contactInfo", "contactRequest"],
        ),
    ]
}

fn system_contract(
    configuration: &SystemContractConfiguration,
    document_types: &[&str],
) -> SystemContract {
    let owner = Identity::new(
        configuration.owner_id,
        vec![IdentityPublicKey {
            id: 0,
            key_type: KeyType::EcdsaSecp256k1,
            purpose: Purpose::Authentication,
            security_level: SecurityLevel::Master,
            data: configuration.owner_public_key.clone(),
            read_only: false,
            disabled_at: None,
        }],
    );
    let document_schemas: BTreeMap<String, String> = document_types
        .iter()
        .map(|document_type| (document_type.to_string(), OBJECT_SCHEMA.to_string()))
        .collect();

    SystemContract {
        owner,
        data_contract: DataContract {
            id: configuration.contract_id,
            owner_id: configuration.owner_id,
            version: 1,
            document_schemas,
        },
    }
}
