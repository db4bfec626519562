/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Typed ABCI requests and responses.
//!
//! These mirror the fields of the consensus engine's ABCI messages that Drive reads or writes. Framing
//! and encoding them on the socket is the business of the ABCI server the library user plugs
//! [`Drive`](crate::node::Drive) into.

use crate::{
    block_execution::{LastCommitInfo, ThresholdVoteExtension},
    types::{
        chain_lock::ChainLock,
        crypto_primitives::BlsSignature,
        data_types::{BlockHeight, CoreHeight, CryptoHash, ProtocolVersion, Round, Timestamp},
        validator_set::ValidatorSetUpdate,
    },
};

/* ↓↓↓ Info ↓↓↓ */

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestInfo {
    pub version: String,
    pub block_version: u64,
    pub p2p_version: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseInfo {
    pub version: String,
    pub app_version: ProtocolVersion,
    pub last_block_height: BlockHeight,
    /// `None` until the first block is committed.
    pub last_block_app_hash: Option<CryptoHash>,
    pub last_core_chain_locked_height: CoreHeight,
}

/* ↓↓↓ InitChain ↓↓↓ */

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestInitChain {
    pub time: Timestamp,
    pub chain_id: String,
    pub initial_height: BlockHeight,
    /// Overrides the configured initial core chain-locked height if set.
    pub initial_core_height: Option<CoreHeight>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseInitChain {
    pub app_hash: CryptoHash,
    pub validator_set_update: ValidatorSetUpdate,
    pub initial_core_height: CoreHeight,
}

/* ↓↓↓ CheckTx ↓↓↓ */

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CheckTxType {
    #[default]
    New,
    Recheck,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestCheckTx {
    pub tx: Vec<u8>,
    pub check_type: CheckTxType,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseCheckTx {
    pub code: u32,
    pub info: String,
}

impl ResponseCheckTx {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/* ↓↓↓ Proposals ↓↓↓ */

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestPrepareProposal {
    pub max_tx_bytes: u64,
    pub txs: Vec<Vec<u8>>,
    pub local_last_commit: Option<LastCommitInfo>,
    pub height: BlockHeight,
    pub round: Round,
    pub time: Timestamp,
    /// Core chain-locked height of the previous block.
    pub core_chain_locked_height: CoreHeight,
    pub proposer_pro_tx_hash: CryptoHash,
    pub proposed_app_version: ProtocolVersion,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxAction {
    Unmodified,
    Removed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxRecord {
    pub action: TxAction,
    pub tx: Vec<u8>,
}

/// Result of executing one transaction of a proposal.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecTxResult {
    pub code: u32,
    pub info: String,
    pub gas_used: u64,
}

impl ExecTxResult {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockParams {
    pub max_bytes: u64,
    pub max_gas: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EvidenceParams {
    pub max_age_num_blocks: u64,
    pub max_age_duration_ms: u64,
    pub max_bytes: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionParams {
    pub app_version: u64,
}

/// Consensus parameter changes, set by feature flags.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsensusParams {
    pub block: Option<BlockParams>,
    pub evidence: Option<EvidenceParams>,
    pub version: Option<VersionParams>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponsePrepareProposal {
    pub tx_records: Vec<TxRecord>,
    pub app_hash: CryptoHash,
    pub tx_results: Vec<ExecTxResult>,
    pub consensus_param_updates: Option<ConsensusParams>,
    pub core_chain_lock_update: Option<ChainLock>,
    pub validator_set_update: Option<ValidatorSetUpdate>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestProcessProposal {
    pub txs: Vec<Vec<u8>>,
    pub proposed_last_commit: Option<LastCommitInfo>,
    pub height: BlockHeight,
    pub round: Round,
    pub time: Timestamp,
    pub core_chain_locked_height: CoreHeight,
    pub core_chain_lock_update: Option<ChainLock>,
    pub proposer_pro_tx_hash: CryptoHash,
    pub proposed_app_version: ProtocolVersion,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProposalStatus {
    Accept,
    Reject,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseProcessProposal {
    pub status: ProposalStatus,
    pub app_hash: Option<CryptoHash>,
    pub tx_results: Vec<ExecTxResult>,
    pub consensus_param_updates: Option<ConsensusParams>,
    pub validator_set_update: Option<ValidatorSetUpdate>,
}

impl ResponseProcessProposal {
    pub fn reject() -> ResponseProcessProposal {
        ResponseProcessProposal {
            status: ProposalStatus::Reject,
            app_hash: None,
            tx_results: Vec::new(),
            consensus_param_updates: None,
            validator_set_update: None,
        }
    }
}

/* ↓↓↓ Vote extensions ↓↓↓ */

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteExtensionType {
    /// The quorum recovers a threshold signature over the extension.
    ThresholdRecover,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteExtension {
    pub extension_type: VoteExtensionType,
    pub extension: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestExtendVote {
    pub hash: CryptoHash,
    pub height: BlockHeight,
    pub round: Round,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseExtendVote {
    pub vote_extensions: Vec<VoteExtension>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestVerifyVoteExtension {
    pub hash: CryptoHash,
    pub validator_pro_tx_hash: CryptoHash,
    pub height: BlockHeight,
    pub round: Round,
    pub vote_extensions: Vec<VoteExtension>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyStatus {
    Accept,
    Reject,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseVerifyVoteExtension {
    pub status: VerifyStatus,
}

/* ↓↓↓ FinalizeBlock ↓↓↓ */

/// The commit of the block being finalized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitInfo {
    pub round: Round,
    pub quorum_hash: CryptoHash,
    pub block_signature: Option<BlsSignature>,
    pub threshold_vote_extensions: Vec<ThresholdVoteExtension>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestFinalizeBlock {
    pub commit: CommitInfo,
    pub hash: CryptoHash,
    pub height: BlockHeight,
    pub round: Round,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseFinalizeBlock {
    pub retain_height: BlockHeight,
}

/* ↓↓↓ Query ↓↓↓ */

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestQuery {
    pub path: String,
    /// Borsh-encoded request payload of the route.
    pub data: Vec<u8>,
    pub prove: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseQuery {
    pub code: u32,
    pub log: String,
    /// Borsh-encoded response payload of the route.
    pub value: Vec<u8>,
    pub height: BlockHeight,
    pub core_chain_locked_height: CoreHeight,
}
