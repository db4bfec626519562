/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration of a Drive node.
//!
//! A [`Configuration`] can be built in code with [`Configuration::builder`], or loaded from JSON with
//! [`Configuration::from_json`]. Both fill in the same defaults for optional settings.

use std::time::Duration;

use serde::Deserialize;
use typed_builder::TypedBuilder;

use crate::{
    core_chain::ChainLockMode,
    types::{
        data_types::{CoreHeight, Identifier, ProtocolVersion},
        masternode::LlmqType,
    },
};

#[derive(Clone, Debug, TypedBuilder, Deserialize)]
#[serde(rename_all = "camelCase")]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.core_rpc(...)`
    - `.zmq_endpoint(...)`
    - `.initial_core_chain_locked_height(...)`
    - `.validator_set_llmq_type(...)`
    - `.system_contracts(...)`

    Optional:
    - `.chain_lock_mode(...)`
    - `.zmq_max_retry_count(...)`
    - `.zmq_retry_interval(...)`
    - `.validator_set_rotation_block_interval(...)`
    - `.sml_max_lists_limit(...)`
    - `.data_contract_cache_size(...)`
    - `.max_identities_per_request(...)`
    - `.max_state_transition_size(...)`
    - `.core_sync_poll_interval(...)`
    - `.protocol_version(...)`
    - `.log_events(...)`
    - `.respond_with_internal_error_details(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set how to reach Core's JSON-RPC endpoint. Required."))]
    pub core_rpc: CoreRpcConfiguration,
    #[builder(setter(into, doc = "Set Core's ZMQ publisher endpoint, e.g. `tcp://127.0.0.1:29998`. Required."))]
    pub zmq_endpoint: String,
    #[builder(setter(doc = "Set the Core height InitChain starts the chain at. Required."))]
    pub initial_core_chain_locked_height: CoreHeight,
    #[builder(setter(doc = "Set the type of quorum that signs platform blocks. Required."))]
    pub validator_set_llmq_type: LlmqType,
    #[builder(setter(doc = "Set the ids, owners, and owner keys of the system data contracts. Required."))]
    pub system_contracts: SystemContractsConfiguration,

    #[serde(default)]
    #[builder(default, setter(doc = "Set whether Core signs chain locks. Defaults to `ChainLocks`."))]
    pub chain_lock_mode: ChainLockMode,
    #[serde(default = "defaults::zmq_max_retry_count")]
    #[builder(default = defaults::zmq_max_retry_count(), setter(doc = "Set how many consecutive ZMQ failures are tolerated before the node halts. Defaults to 10."))]
    pub zmq_max_retry_count: u32,
    #[serde(default = "defaults::zmq_retry_interval", with = "millis")]
    #[builder(default = defaults::zmq_retry_interval(), setter(doc = "Set how long to wait between ZMQ reconnection attempts. Defaults to 1 second."))]
    pub zmq_retry_interval: Duration,
    #[serde(default = "defaults::validator_set_rotation_block_interval")]
    #[builder(default = defaults::validator_set_rotation_block_interval(), setter(doc = "Set every how many blocks the validator set may rotate. Defaults to 15."))]
    pub validator_set_rotation_block_interval: u64,
    #[serde(default = "defaults::sml_max_lists_limit")]
    #[builder(default = defaults::sml_max_lists_limit(), setter(doc = "Set how many masternode list diffs are retained. Defaults to 16."))]
    pub sml_max_lists_limit: usize,
    #[serde(default = "defaults::data_contract_cache_size")]
    #[builder(default = defaults::data_contract_cache_size(), setter(doc = "Set how many data contracts are cached. Defaults to 500."))]
    pub data_contract_cache_size: usize,
    #[serde(default = "defaults::max_identities_per_request")]
    #[builder(default = defaults::max_identities_per_request(), setter(doc = "Set how many ids an identities query may ask for. Defaults to 25."))]
    pub max_identities_per_request: usize,
    #[serde(default = "defaults::max_state_transition_size")]
    #[builder(default = defaults::max_state_transition_size(), setter(doc = "Set the largest transaction CheckTx accepts, in bytes. Defaults to 20480."))]
    pub max_state_transition_size: usize,
    #[serde(default = "defaults::core_sync_poll_interval", with = "millis")]
    #[builder(default = defaults::core_sync_poll_interval(), setter(doc = "Set how often Core's sync status is polled at startup. Defaults to 5 seconds."))]
    pub core_sync_poll_interval: Duration,
    #[serde(default = "defaults::protocol_version")]
    #[builder(default = defaults::protocol_version(), setter(doc = "Set the platform protocol version. Defaults to 1."))]
    pub protocol_version: ProtocolVersion,
    #[serde(default)]
    #[builder(default, setter(doc = "Enable logging of node events? Defaults to false."))]
    pub log_events: bool,
    #[serde(default)]
    #[builder(default, setter(doc = "Include internal error messages in CheckTx and Query responses? Defaults to false."))]
    pub respond_with_internal_error_details: bool,
}

impl Configuration {
    pub fn from_json(json: &str) -> Result<Configuration, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CoreRpcConfiguration {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// A data contract Drive registers at genesis, and the identity that owns it.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemContractConfiguration {
    pub contract_id: Identifier,
    pub owner_id: Identifier,
    /// Serialized secp256k1 public key of the owner.
    #[serde(with = "hex")]
    pub owner_public_key: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemContractsConfiguration {
    pub feature_flags: SystemContractConfiguration,
    pub dpns: SystemContractConfiguration,
    pub masternode_reward_shares: SystemContractConfiguration,
    pub dashpay: SystemContractConfiguration,
}

mod defaults {
    use std::time::Duration;

    use crate::types::data_types::ProtocolVersion;

    pub(super) fn zmq_max_retry_count() -> u32 {
        10
    }

    pub(super) fn zmq_retry_interval() -> Duration {
        Duration::from_millis(1000)
    }

    pub(super) fn validator_set_rotation_block_interval() -> u64 {
        15
    }

    pub(super) fn sml_max_lists_limit() -> usize {
        16
    }

    pub(super) fn data_contract_cache_size() -> usize {
        500
    }

    pub(super) fn max_identities_per_request() -> usize {
        25
    }

    pub(super) fn max_state_transition_size() -> usize {
        20480
    }

    pub(super) fn core_sync_poll_interval() -> Duration {
        Duration::from_millis(5000)
    }

    pub(super) fn protocol_version() -> ProtocolVersion {
        ProtocolVersion::new(1)
    }
}

/// Durations are written as milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
