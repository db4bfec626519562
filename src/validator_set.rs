/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Selection and rotation of the BLS quorum that signs platform blocks.
//!
//! ## Choosing a quorum
//!
//! Every quorum of the configured LLMQ type in the masternode list at the chain-locked Core height is
//! scored with `SHA256d(entropy || quorum_hash)`, and the quorum with the lowest score wins. The
//! entropy is public (the previous block's commit signature), so every validator picks the same quorum.
//!
//! ## Rotation
//!
//! [`ValidatorSetManager::rotate`] is called once per block, but only rotates on heights that are a
//! multiple of the rotation interval. Proposal rounds rotate a *clone* of the manager, and the winning
//! round's validator set is [restored](ValidatorSetManager::restore) into the committed manager by
//! `FinalizeBlock`.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use crate::{
    core_chain::{CoreRpc, CoreRpcError, SmlError, SmlTracker},
    logging::LOG_TARGET,
    types::{
        crypto_primitives::double_sha256,
        data_types::{BlockHeight, CoreHeight, CryptoHash},
        masternode::{LlmqType, QuorumEntry, SimplifiedMNList},
        validator_set::{
            Validator, ValidatorSet, ValidatorSetUpdate, ValidatorUpdate, VALIDATOR_POWER,
        },
    },
};

pub struct ValidatorSetManager<R: CoreRpc> {
    core_rpc: Arc<R>,
    sml_tracker: Arc<SmlTracker<R>>,
    llmq_type: LlmqType,
    rotation_block_interval: u64,
    current: Option<ValidatorSet>,
}

impl<R: CoreRpc> Clone for ValidatorSetManager<R> {
    fn clone(&self) -> Self {
        ValidatorSetManager {
            core_rpc: Arc::clone(&self.core_rpc),
            sml_tracker: Arc::clone(&self.sml_tracker),
            llmq_type: self.llmq_type,
            rotation_block_interval: self.rotation_block_interval,
            current: self.current.clone(),
        }
    }
}

impl<R: CoreRpc> ValidatorSetManager<R> {
    pub fn new(
        core_rpc: Arc<R>,
        sml_tracker: Arc<SmlTracker<R>>,
        llmq_type: LlmqType,
        rotation_block_interval: u64,
    ) -> ValidatorSetManager<R> {
        ValidatorSetManager {
            core_rpc,
            sml_tracker,
            llmq_type,
            rotation_block_interval: rotation_block_interval.max(1),
            current: None,
        }
    }

    /// Pick the first validator set from the masternode list at `core_height`, with all-zero entropy.
    pub fn initialize(&mut self, core_height: CoreHeight) -> Result<&ValidatorSet, ValidatorSetError> {
        let validator_set = self.select(core_height, &CryptoHash::default())?;
        Ok(self.current.insert(validator_set))
    }

    /// Rotate to the quorum `entropy` selects at `core_height`, if `height` is a rotation height. Returns
    /// whether the validator set changed.
    pub fn rotate(
        &mut self,
        height: BlockHeight,
        core_height: CoreHeight,
        entropy: &CryptoHash,
    ) -> Result<bool, ValidatorSetError> {
        if height.int() % self.rotation_block_interval != 0 {
            return Ok(false);
        }

        let quorum = self.choose(core_height, entropy)?;
        if let Some(current) = &self.current {
            if current.quorum_hash() == quorum.quorum_hash {
                return Ok(false);
            }
        }

        let validator_set = self.fetch_validator_set(quorum)?;
        log::debug!(
            target: LOG_TARGET,
            "rotating validator set at height {} to quorum {} with {} members",
            height,
            validator_set.quorum_hash(),
            validator_set.len()
        );
        self.current = Some(validator_set);
        Ok(true)
    }

    pub fn current(&self) -> Option<&ValidatorSet> {
        self.current.as_ref()
    }

    /// Replace the active validator set, e.g. with the one a winning proposal round rotated to, or the
    /// one persisted before a restart.
    pub fn restore(&mut self, validator_set: ValidatorSet) {
        self.current = Some(validator_set);
    }

    pub fn llmq_type(&self) -> LlmqType {
        self.llmq_type
    }

    pub fn rotation_block_interval(&self) -> u64 {
        self.rotation_block_interval
    }

    fn select(
        &self,
        core_height: CoreHeight,
        entropy: &CryptoHash,
    ) -> Result<ValidatorSet, ValidatorSetError> {
        let quorum = self.choose(core_height, entropy)?;
        self.fetch_validator_set(quorum)
    }

    fn choose(
        &self,
        core_height: CoreHeight,
        entropy: &CryptoHash,
    ) -> Result<QuorumEntry, ValidatorSetError> {
        let list = self.list_at(core_height)?;
        choose_quorum(&list, self.llmq_type, entropy)
            .cloned()
            .ok_or(ValidatorSetError::NoQuorum {
                llmq_type: self.llmq_type,
                core_height,
            })
    }

    fn list_at(&self, core_height: CoreHeight) -> Result<SimplifiedMNList, ValidatorSetError> {
        self.sml_tracker
            .list_at_or_rebuild(core_height)?
            .ok_or(ValidatorSetError::MissingMasternodeList { core_height })
    }

    fn fetch_validator_set(&self, quorum: QuorumEntry) -> Result<ValidatorSet, ValidatorSetError> {
        let info = self
            .core_rpc
            .quorum_info(quorum.llmq_type, &quorum.quorum_hash)?;
        let validators = info
            .members
            .into_iter()
            .filter(|member| member.valid)
            .map(|member| Validator {
                pro_tx_hash: member.pro_tx_hash,
                pub_key_share: member.pub_key_share,
                voting_power: VALIDATOR_POWER,
            })
            .collect();
        Ok(ValidatorSet::new(quorum, validators))
    }
}

/// The quorum of type `llmq_type` in `list` with the lowest `SHA256d(entropy || quorum_hash)`.
pub fn choose_quorum<'a>(
    list: &'a SimplifiedMNList,
    llmq_type: LlmqType,
    entropy: &CryptoHash,
) -> Option<&'a QuorumEntry> {
    list.quorums_of_type(llmq_type).min_by_key(|quorum| {
        double_sha256(&[&entropy.bytes(), &quorum.quorum_hash.bytes()])
    })
}

/// The update handing `validator_set` to the consensus engine: one entry per validator, with a public
/// key share only for validators that have one, and the quorum's threshold key and hash.
pub fn create_validator_set_update(validator_set: &ValidatorSet) -> ValidatorSetUpdate {
    ValidatorSetUpdate {
        validator_updates: validator_set
            .validators()
            .map(|validator| ValidatorUpdate {
                pro_tx_hash: validator.pro_tx_hash,
                power: validator.voting_power,
                pub_key_share: validator.pub_key_share.clone(),
            })
            .collect(),
        threshold_public_key: validator_set.threshold_public_key().clone(),
        quorum_hash: validator_set.quorum_hash(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidatorSetError {
    MissingMasternodeList { core_height: CoreHeight },
    NoQuorum { llmq_type: LlmqType, core_height: CoreHeight },
    CoreRpc(CoreRpcError),
    Sml(SmlError),
}

impl From<CoreRpcError> for ValidatorSetError {
    fn from(value: CoreRpcError) -> Self {
        ValidatorSetError::CoreRpc(value)
    }
}

impl From<SmlError> for ValidatorSetError {
    fn from(value: SmlError) -> Self {
        ValidatorSetError::Sml(value)
    }
}

impl Display for ValidatorSetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ValidatorSetError::MissingMasternodeList { core_height } => {
                write!(f, "no masternode list at core height {}", core_height)
            }
            ValidatorSetError::NoQuorum {
                llmq_type,
                core_height,
            } => write!(
                f,
                "no quorum of llmq type {} at core height {}",
                llmq_type, core_height
            ),
            ValidatorSetError::CoreRpc(err) => Display::fmt(err, f),
            ValidatorSetError::Sml(err) => Display::fmt(err, f),
        }
    }
}

impl std::error::Error for ValidatorSetError {}
