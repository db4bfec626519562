/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](CoreRpc) for the subset of Core's JSON-RPC interface Drive depends on.
//!
//! The library user may provide their own implementation (for example, one multiplexing several Core
//! nodes), or use the bundled [`JsonRpcCoreClient`](super::JsonRpcCoreClient).

use std::fmt::{self, Display, Formatter};

use serde::Deserialize;

use crate::types::{
    chain_lock::ChainLock,
    data_types::{CoreHeight, CryptoHash},
    masternode::{LlmqType, ProRegTxPayload, SimplifiedMNListDiff},
    validator_set::QuorumInfo,
};

/// Code Core returns when a block, transaction, or key it was asked for is unknown to it.
pub const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;

pub trait CoreRpc: Send + Sync + 'static {
    /// `getbestchainlock`: the chain lock with the greatest height Core has seen.
    fn get_best_chain_lock(&self) -> Result<ChainLock, CoreRpcError>;

    /// `getblock <hash>`: fails with [`RPC_INVALID_ADDRESS_OR_KEY`] if Core does not have the block yet.
    fn get_block(&self, hash: &CryptoHash) -> Result<CoreBlock, CoreRpcError>;

    /// `getblockhash <height>`.
    fn get_block_hash(&self, height: CoreHeight) -> Result<CryptoHash, CoreRpcError>;

    /// `getblockcount`: height of the tip of Core's best chain.
    fn get_block_count(&self) -> Result<CoreHeight, CoreRpcError>;

    /// `getblockchaininfo`.
    fn get_blockchain_info(&self) -> Result<BlockchainInfo, CoreRpcError>;

    /// `getrawtransaction <id>`: the transaction's raw bytes.
    fn get_raw_transaction(&self, id: &CryptoHash) -> Result<Vec<u8>, CoreRpcError>;

    /// `getrawtransaction <id> 1`, reading the ProRegTx special payload out of the verbose result.
    fn get_pro_reg_tx_payload(
        &self,
        pro_reg_tx_hash: &CryptoHash,
    ) -> Result<ProRegTxPayload, CoreRpcError>;

    /// `sendrawtransaction <hex>`: returns the id of the relayed transaction.
    fn send_raw_transaction(&self, transaction: &[u8]) -> Result<CryptoHash, CoreRpcError>;

    /// `protx diff <base> <block>`.
    fn protx_diff(
        &self,
        base: CoreHeight,
        block: CoreHeight,
    ) -> Result<SimplifiedMNListDiff, CoreRpcError>;

    /// `quorum info <type> <hash>`.
    fn quorum_info(
        &self,
        llmq_type: LlmqType,
        quorum_hash: &CryptoHash,
    ) -> Result<QuorumInfo, CoreRpcError>;

    /// `mnsync status`.
    fn mnsync_status(&self) -> Result<MnSyncStatus, CoreRpcError>;

    /// `verifychainlock <hash> <signature> <height>`.
    fn verify_chain_lock(&self, chain_lock: &ChainLock) -> Result<bool, CoreRpcError>;
}

/// The part of a verbose `getblock` result Drive reads.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CoreBlock {
    pub hash: CryptoHash,
    pub height: CoreHeight,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct BlockchainInfo {
    pub chain: String,
    pub blocks: CoreHeight,
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: CryptoHash,
    #[serde(rename = "initialblockdownload", default)]
    pub initial_block_download: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct MnSyncStatus {
    #[serde(rename = "AssetName")]
    pub asset_name: String,
    #[serde(rename = "IsBlockchainSynced", default)]
    pub is_blockchain_synced: bool,
    #[serde(rename = "IsSynced")]
    pub is_synced: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoreRpcError {
    /// The request never got a JSON-RPC response: connection refused, timeout, HTTP error status.
    Transport(String),
    /// Core answered with a JSON-RPC error object.
    Rpc { code: i64, message: String },
    /// Core's answer could not be decoded into the expected type.
    Decode(String),
}

impl CoreRpcError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreRpcError::Rpc { code, .. } if *code == RPC_INVALID_ADDRESS_OR_KEY)
    }
}

impl Display for CoreRpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CoreRpcError::Transport(message) => write!(f, "core rpc transport error: {}", message),
            CoreRpcError::Rpc { code, message } => {
                write!(f, "core rpc error {}: {}", code, message)
            }
            CoreRpcError::Decode(message) => {
                write!(f, "core rpc response could not be decoded: {}", message)
            }
        }
    }
}

impl std::error::Error for CoreRpcError {}
