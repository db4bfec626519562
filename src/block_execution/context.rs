/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-round mutable scratch state of block execution.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    abci::messages::ConsensusParams,
    logging::ContextLogger,
    storage::PendingWrites,
    types::{
        chain_lock::ChainLock,
        crypto_primitives::{double_sha256, BlsSignature},
        data_types::{
            BlockHeight, CoreHeight, CryptoHash, FeeResult, Identifier, ProtocolVersion, Round,
            Timestamp,
        },
        platform_state::DataContract,
        validator_set::{ValidatorSet, ValidatorSetUpdate},
    },
};

/// A vote extension together with the threshold signature the quorum recovered for it.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct ThresholdVoteExtension {
    pub extension: Vec<u8>,
    pub signature: BlsSignature,
}

/// Information about the commit of the previous block, as handed over by the consensus engine.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct LastCommitInfo {
    pub quorum_hash: CryptoHash,
    pub round: Round,
    pub block_signature: Option<BlsSignature>,
    pub threshold_vote_extensions: Vec<ThresholdVoteExtension>,
}

/// The block-level values a round executes against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct BlockInfo {
    pub height: BlockHeight,
    pub time: Timestamp,
    pub core_chain_locked_height: CoreHeight,
}

/// Scratch state of one proposal round.
///
/// Created fresh by `PrepareProposal` or `ProcessProposal`, kept in the
/// [`ProposalRoundCollection`](super::ProposalRoundCollection) under its round number, and moved out of
/// it by `FinalizeBlock` if its round wins. The winning context is persisted as the "latest" checkpoint,
/// without its logger and without the round's pending storage writes.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct BlockExecutionContext {
    pub height: BlockHeight,
    pub round: Round,
    pub time: Timestamp,
    pub core_chain_locked_height: CoreHeight,
    pub version: ProtocolVersion,
    pub proposer_pro_tx_hash: Option<CryptoHash>,
    pub last_commit_info: Option<LastCommitInfo>,
    /// Data contracts created or updated this round.
    pub data_contracts: BTreeMap<Identifier, DataContract>,
    /// Unsigned withdrawal transactions, keyed by their double-SHA256 hash.
    pub withdrawal_transactions: BTreeMap<CryptoHash, Vec<u8>>,
    pub fees: FeeResult,
    /// App hash after executing this round. `None` until the round ends.
    pub app_hash: Option<CryptoHash>,
    /// Raw transactions executed this round, valid or not, in order.
    pub txs: Vec<Vec<u8>>,

    #[borsh_skip]
    pub core_chain_lock_update: Option<ChainLock>,
    #[borsh_skip]
    pub validator_set_update: Option<ValidatorSetUpdate>,
    /// The validator set to commit if this round wins, when it rotated the quorum.
    #[borsh_skip]
    pub next_validator_set: Option<ValidatorSet>,
    #[borsh_skip]
    pub consensus_param_updates: Option<ConsensusParams>,
    #[borsh_skip]
    pub state_changes: PendingWrites,
    #[borsh_skip]
    pub logger: ContextLogger,
}

impl BlockExecutionContext {
    pub fn new(
        height: BlockHeight,
        round: Round,
        time: Timestamp,
        core_chain_locked_height: CoreHeight,
        version: ProtocolVersion,
        logger: ContextLogger,
    ) -> BlockExecutionContext {
        BlockExecutionContext {
            height,
            round,
            time,
            core_chain_locked_height,
            version,
            proposer_pro_tx_hash: None,
            last_commit_info: None,
            data_contracts: BTreeMap::new(),
            withdrawal_transactions: BTreeMap::new(),
            fees: FeeResult::default(),
            app_hash: None,
            txs: Vec::new(),
            core_chain_lock_update: None,
            validator_set_update: None,
            next_validator_set: None,
            consensus_param_updates: None,
            state_changes: PendingWrites::default(),
            logger,
        }
    }

    pub fn block_info(&self) -> BlockInfo {
        BlockInfo {
            height: self.height,
            time: self.time,
            core_chain_locked_height: self.core_chain_locked_height,
        }
    }

    pub fn add_data_contract(&mut self, data_contract: DataContract) {
        self.data_contracts.insert(data_contract.id, data_contract);
    }

    /// Record an unsigned withdrawal transaction, returning the hash it is keyed under.
    pub fn add_withdrawal_transaction(&mut self, transaction: Vec<u8>) -> CryptoHash {
        let hash = double_sha256(&[&transaction]);
        self.withdrawal_transactions.insert(hash, transaction);
        hash
    }

    pub fn withdrawal_transaction(&self, hash: &CryptoHash) -> Option<&Vec<u8>> {
        self.withdrawal_transactions.get(hash)
    }

    pub fn add_fees(&mut self, fees: FeeResult) {
        self.fees += fees;
    }

    /// Entropy the validator set rotation of this round uses: the hash of the previous block's commit
    /// signature, or all zeroes when there is none.
    pub fn rotation_entropy(&self) -> CryptoHash {
        self.last_commit_info
            .as_ref()
            .and_then(|info| info.block_signature.as_ref())
            .map(|signature| crate::types::crypto_primitives::sha256(&[signature.bytes()]))
            .unwrap_or_default()
    }
}
