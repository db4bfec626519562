/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [`CoreRpc`] over Core's HTTP JSON-RPC endpoint.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    config::CoreRpcConfiguration,
    types::{
        chain_lock::ChainLock,
        crypto_primitives::BlsSignature,
        data_types::{CoreHeight, CryptoHash},
        masternode::{LlmqType, ProRegTxPayload, SimplifiedMNListDiff},
        validator_set::QuorumInfo,
    },
};

use super::rpc::{BlockchainInfo, CoreBlock, CoreRpc, CoreRpcError, MnSyncStatus};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct BestChainLock {
    #[serde(rename = "blockhash")]
    block_hash: CryptoHash,
    height: CoreHeight,
    signature: BlsSignature,
}

#[derive(Deserialize)]
struct VerboseTransaction {
    #[serde(rename = "proRegTx")]
    pro_reg_tx: Option<ProRegTxPayload>,
}

/// Blocking JSON-RPC client for a single Core node, authenticating with HTTP basic auth.
#[derive(Clone)]
pub struct JsonRpcCoreClient {
    inner: Client,
    url: String,
    username: String,
    password: String,
}

impl JsonRpcCoreClient {
    pub fn new(configuration: &CoreRpcConfiguration) -> Result<JsonRpcCoreClient, CoreRpcError> {
        let inner = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| CoreRpcError::Transport(err.to_string()))?;
        Ok(JsonRpcCoreClient {
            inner,
            url: format!("http://{}:{}", configuration.host, configuration.port),
            username: configuration.username.clone(),
            password: configuration.password.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }

    /// Issue a raw JSON-RPC call returning the untyped result.
    pub fn request(&self, method: &str, params: Value) -> Result<Value, CoreRpcError> {
        let payload = JsonRpcRequest {
            jsonrpc: "1.0",
            id: 1,
            method,
            params,
        };

        let response = self
            .inner
            .post(&self.url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&payload)
            .send()
            .map_err(|err| CoreRpcError::Transport(err.to_string()))?;

        // Core answers RPC errors with status 500 and a JSON-RPC body.
        let status = response.status();
        let response: JsonRpcResponse = response.json().map_err(|err| {
            CoreRpcError::Transport(format!("http status {}: {}", status, err))
        })?;

        if let Some(error) = response.error {
            return Err(CoreRpcError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Issue a JSON-RPC call and deserialize the result into `T`.
    pub fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, CoreRpcError> {
        let value = self.request(method, params)?;
        serde_json::from_value(value).map_err(|err| CoreRpcError::Decode(err.to_string()))
    }
}

impl CoreRpc for JsonRpcCoreClient {
    fn get_best_chain_lock(&self) -> Result<ChainLock, CoreRpcError> {
        let best: BestChainLock = self.call("getbestchainlock", json!([]))?;
        Ok(ChainLock::new(best.height, best.block_hash, best.signature))
    }

    fn get_block(&self, hash: &CryptoHash) -> Result<CoreBlock, CoreRpcError> {
        self.call("getblock", json!([hash.to_hex(), 1]))
    }

    fn get_block_hash(&self, height: CoreHeight) -> Result<CryptoHash, CoreRpcError> {
        self.call("getblockhash", json!([height.int()]))
    }

    fn get_block_count(&self) -> Result<CoreHeight, CoreRpcError> {
        self.call("getblockcount", json!([]))
    }

    fn get_blockchain_info(&self) -> Result<BlockchainInfo, CoreRpcError> {
        self.call("getblockchaininfo", json!([]))
    }

    fn get_raw_transaction(&self, id: &CryptoHash) -> Result<Vec<u8>, CoreRpcError> {
        let raw: String = self.call("getrawtransaction", json!([id.to_hex(), 0]))?;
        hex::decode(raw).map_err(|err| CoreRpcError::Decode(err.to_string()))
    }

    fn get_pro_reg_tx_payload(
        &self,
        pro_reg_tx_hash: &CryptoHash,
    ) -> Result<ProRegTxPayload, CoreRpcError> {
        let transaction: VerboseTransaction =
            self.call("getrawtransaction", json!([pro_reg_tx_hash.to_hex(), 1]))?;
        transaction.pro_reg_tx.ok_or_else(|| {
            CoreRpcError::Decode(format!("{} is not a ProRegTx", pro_reg_tx_hash))
        })
    }

    fn send_raw_transaction(&self, transaction: &[u8]) -> Result<CryptoHash, CoreRpcError> {
        self.call("sendrawtransaction", json!([hex::encode(transaction)]))
    }

    fn protx_diff(
        &self,
        base: CoreHeight,
        block: CoreHeight,
    ) -> Result<SimplifiedMNListDiff, CoreRpcError> {
        self.call("protx", json!(["diff", base.int(), block.int()]))
    }

    fn quorum_info(
        &self,
        llmq_type: LlmqType,
        quorum_hash: &CryptoHash,
    ) -> Result<QuorumInfo, CoreRpcError> {
        self.call(
            "quorum",
            json!(["info", llmq_type.int(), quorum_hash.to_hex()]),
        )
    }

    fn mnsync_status(&self) -> Result<MnSyncStatus, CoreRpcError> {
        self.call("mnsync", json!(["status"]))
    }

    fn verify_chain_lock(&self, chain_lock: &ChainLock) -> Result<bool, CoreRpcError> {
        self.call(
            "verifychainlock",
            json!([
                chain_lock.block_hash.to_hex(),
                hex::encode(chain_lock.signature.bytes()),
                chain_lock.height.int()
            ]),
        )
    }
}
