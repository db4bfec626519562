/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use crate::{
    core_chain::{CoreRpc, CoreRpcError, SmlError, SmlTracker},
    logging::LOG_TARGET,
    state_repository::{StateRepository, StateRepositoryError},
    state_transition::StateTransitionExecutionContext,
    types::{
        data_types::{CoreHeight, Identifier, Timestamp},
        masternode::{DiffMismatch, MasternodeEntry, ProRegTxPayload, SimplifiedMNList},
        platform_state::{Identity, Purpose},
    },
};

use super::{
    diff::{classify_changes, MasternodeListChanges},
    identities::{
        masternode_identifier, masternode_identity, operator_identifier, operator_identity,
        voting_identity, withdrawal_key,
    },
    reward_shares::{
        reward_share_document, reward_share_document_id, MAX_REWARD_SHARES,
        REWARD_SHARE_DOCUMENT_TYPE,
    },
};

/// Counts of the changes one synchronization pass made.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SynchronizationResult {
    pub created_identities: usize,
    pub updated_identities: usize,
    pub created_reward_shares: usize,
    pub removed_reward_shares: usize,
}

/// Keeps the identities and reward shares of masternodes in step with the masternode list.
pub struct MasternodeIdentitySynchronizer<R: CoreRpc> {
    core_rpc: Arc<R>,
    sml_tracker: Arc<SmlTracker<R>>,
    reward_shares_contract_id: Identifier,
}

impl<R: CoreRpc> MasternodeIdentitySynchronizer<R> {
    pub fn new(
        core_rpc: Arc<R>,
        sml_tracker: Arc<SmlTracker<R>>,
        reward_shares_contract_id: Identifier,
    ) -> MasternodeIdentitySynchronizer<R> {
        MasternodeIdentitySynchronizer {
            core_rpc,
            sml_tracker,
            reward_shares_contract_id,
        }
    }

    /// Apply the changes between the masternode list at `last_synced_core_height` and the one at
    /// `core_height` through `state_repository`.
    ///
    /// On the first synchronization (`last_synced_core_height` is `None`) every valid masternode is new.
    pub fn synchronize<S: StateRepository + ?Sized>(
        &self,
        state_repository: &S,
        last_synced_core_height: Option<CoreHeight>,
        core_height: CoreHeight,
        block_time: Timestamp,
    ) -> Result<SynchronizationResult, MasternodeSyncError> {
        if let Some(last_synced) = last_synced_core_height {
            if last_synced >= core_height {
                return Ok(SynchronizationResult::default());
            }
        }

        let current = self
            .sml_tracker
            .list_at_or_rebuild(core_height)?
            .ok_or(MasternodeSyncError::MissingMasternodeList { core_height })?;
        let previous = match last_synced_core_height {
            Some(height) => self.previous_list(height)?,
            None => SimplifiedMNList::new(),
        };

        let changes = classify_changes(&previous, &current);
        if changes.is_empty() {
            return Ok(SynchronizationResult::default());
        }

        let mut pass = SyncPass {
            core_rpc: self.core_rpc.as_ref(),
            state_repository,
            data_contract_id: self.reward_shares_contract_id,
            block_time,
            execution_context: StateTransitionExecutionContext::new(),
            result: SynchronizationResult::default(),
        };
        pass.apply(changes)?;

        log::debug!(
            target: LOG_TARGET,
            "synchronized masternode identities to core height {}: {:?}",
            core_height,
            pass.result
        );
        Ok(pass.result)
    }

    fn previous_list(&self, height: CoreHeight) -> Result<SimplifiedMNList, MasternodeSyncError> {
        if let Some(list) = self.sml_tracker.list_at(height) {
            return Ok(list);
        }
        let diff = self.core_rpc.protx_diff(CoreHeight::new(1), height)?;
        Ok(SimplifiedMNList::from_base_diff(&diff)?)
    }
}

struct SyncPass<'a, R: CoreRpc, S: StateRepository + ?Sized> {
    core_rpc: &'a R,
    state_repository: &'a S,
    data_contract_id: Identifier,
    block_time: Timestamp,
    execution_context: StateTransitionExecutionContext,
    result: SynchronizationResult,
}

impl<R: CoreRpc, S: StateRepository + ?Sized> SyncPass<'_, R, S> {
    fn apply(&mut self, changes: MasternodeListChanges) -> Result<(), MasternodeSyncError> {
        for entry in changes.removed.iter().chain(&changes.became_invalid) {
            self.remove_reward_shares(entry)?;
        }
        for entry in &changes.new {
            self.create_masternode(entry)?;
        }
        for (previous, current) in &changes.operator_changed {
            self.change_operator(previous, current)?;
        }
        for (_, current) in &changes.voting_changed {
            let payload = self.core_rpc.get_pro_reg_tx_payload(&current.pro_reg_tx_hash)?;
            self.create_voting_identity(current, &payload)?;
        }
        for (previous, current) in &changes.payout_changed {
            self.change_payout(previous, current)?;
        }
        Ok(())
    }

    fn create_masternode(&mut self, entry: &MasternodeEntry) -> Result<(), MasternodeSyncError> {
        let payload = self.core_rpc.get_pro_reg_tx_payload(&entry.pro_reg_tx_hash)?;
        let payout_script = entry
            .payout_script
            .as_deref()
            .unwrap_or(&payload.payout_script);
        let identity = masternode_identity(
            &entry.pro_reg_tx_hash,
            &payload.owner_key_hash,
            Some(payout_script),
        );
        self.create_identity_if_absent(&identity)?;

        if payload.operator_reward > 0 {
            self.create_operator_reward_share(entry, payload.operator_reward)?;
        }
        self.create_voting_identity(entry, &payload)
    }

    fn change_operator(
        &mut self,
        previous: &MasternodeEntry,
        current: &MasternodeEntry,
    ) -> Result<(), MasternodeSyncError> {
        let masternode_id = masternode_identifier(&current.pro_reg_tx_hash);
        let stale_operator_id =
            operator_identifier(&previous.pro_reg_tx_hash, &previous.pub_key_operator);
        let stale_share_id = reward_share_document_id(&masternode_id, &stale_operator_id);
        if self
            .state_repository
            .fetch_document(&self.data_contract_id, &stale_share_id, &mut self.execution_context)?
            .is_some()
        {
            self.state_repository.remove_document(
                &self.data_contract_id,
                &stale_share_id,
                &mut self.execution_context,
            )?;
            self.result.removed_reward_shares += 1;
        }

        let payload = self.core_rpc.get_pro_reg_tx_payload(&current.pro_reg_tx_hash)?;
        if payload.operator_reward > 0 {
            self.create_operator_reward_share(current, payload.operator_reward)?;
        }
        Ok(())
    }

    /// Disable the withdrawal key for the previous payout script and add one for the current script.
    fn change_payout(
        &mut self,
        previous: &MasternodeEntry,
        current: &MasternodeEntry,
    ) -> Result<(), MasternodeSyncError> {
        let masternode_id = masternode_identifier(&current.pro_reg_tx_hash);
        let Some(mut identity) = self
            .state_repository
            .fetch_identity(&masternode_id, &mut self.execution_context)?
        else {
            return self.create_masternode(current);
        };

        let stale_key = previous.payout_script.as_deref().and_then(withdrawal_key);
        for key in identity.public_keys.values_mut() {
            let is_stale = stale_key
                .as_ref()
                .map_or(false, |stale| stale.data == key.data);
            if key.purpose == Purpose::Withdraw && !key.is_disabled() && is_stale {
                key.disabled_at = Some(self.block_time);
            }
        }
        if let Some(key) = current.payout_script.as_deref().and_then(withdrawal_key) {
            identity.add_public_key(key);
        }
        identity.revision += 1;

        self.state_repository
            .update_identity(&identity, &mut self.execution_context)?;
        self.result.updated_identities += 1;
        Ok(())
    }

    fn create_operator_reward_share(
        &mut self,
        entry: &MasternodeEntry,
        operator_reward: u16,
    ) -> Result<(), MasternodeSyncError> {
        let operator = operator_identity(&entry.pro_reg_tx_hash, &entry.pub_key_operator);
        self.create_identity_if_absent(&operator)?;

        let masternode_id = masternode_identifier(&entry.pro_reg_tx_hash);
        let document = reward_share_document(
            &self.data_contract_id,
            &masternode_id,
            &operator.id,
            operator_reward,
            self.block_time,
        );
        if self
            .state_repository
            .fetch_document(&self.data_contract_id, &document.id, &mut self.execution_context)?
            .is_some()
        {
            return Ok(());
        }

        let owned = self.state_repository.fetch_documents_by_owner(
            &self.data_contract_id,
            REWARD_SHARE_DOCUMENT_TYPE,
            &masternode_id,
            &mut self.execution_context,
        )?;
        if owned.len() >= MAX_REWARD_SHARES {
            log::warn!(
                target: LOG_TARGET,
                "masternode {} already has {} reward shares, not creating one for operator {}",
                masternode_id,
                owned.len(),
                operator.id
            );
            return Ok(());
        }

        self.state_repository
            .create_document(&document, &mut self.execution_context)?;
        self.result.created_reward_shares += 1;
        Ok(())
    }

    /// Voting identities only exist for masternodes whose voting key is not their owner key.
    fn create_voting_identity(
        &mut self,
        entry: &MasternodeEntry,
        payload: &ProRegTxPayload,
    ) -> Result<(), MasternodeSyncError> {
        if entry.voting_address == payload.owner_key_hash {
            return Ok(());
        }
        let identity = voting_identity(&entry.pro_reg_tx_hash, &entry.voting_address);
        self.create_identity_if_absent(&identity)
    }

    fn remove_reward_shares(&mut self, entry: &MasternodeEntry) -> Result<(), MasternodeSyncError> {
        let masternode_id = masternode_identifier(&entry.pro_reg_tx_hash);
        let documents = self.state_repository.fetch_documents_by_owner(
            &self.data_contract_id,
            REWARD_SHARE_DOCUMENT_TYPE,
            &masternode_id,
            &mut self.execution_context,
        )?;
        for document in documents {
            self.state_repository.remove_document(
                &self.data_contract_id,
                &document.id,
                &mut self.execution_context,
            )?;
            self.result.removed_reward_shares += 1;
        }
        Ok(())
    }

    fn create_identity_if_absent(&mut self, identity: &Identity) -> Result<(), MasternodeSyncError> {
        if self
            .state_repository
            .fetch_identity(&identity.id, &mut self.execution_context)?
            .is_some()
        {
            return Ok(());
        }
        self.state_repository
            .create_identity(identity, &mut self.execution_context)?;
        self.result.created_identities += 1;
        Ok(())
    }
}

#[derive(Debug)]
pub enum MasternodeSyncError {
    MissingMasternodeList { core_height: CoreHeight },
    CoreRpc(CoreRpcError),
    DiffMismatch(DiffMismatch),
    Sml(SmlError),
    StateRepository(StateRepositoryError),
}

impl From<SmlError> for MasternodeSyncError {
    fn from(value: SmlError) -> Self {
        MasternodeSyncError::Sml(value)
    }
}

impl From<CoreRpcError> for MasternodeSyncError {
    fn from(value: CoreRpcError) -> Self {
        MasternodeSyncError::CoreRpc(value)
    }
}

impl From<DiffMismatch> for MasternodeSyncError {
    fn from(value: DiffMismatch) -> Self {
        MasternodeSyncError::DiffMismatch(value)
    }
}

impl From<StateRepositoryError> for MasternodeSyncError {
    fn from(value: StateRepositoryError) -> Self {
        MasternodeSyncError::StateRepository(value)
    }
}

impl Display for MasternodeSyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MasternodeSyncError::MissingMasternodeList { core_height } => {
                write!(f, "no masternode list at core height {}", core_height)
            }
            MasternodeSyncError::CoreRpc(err) => Display::fmt(err, f),
            MasternodeSyncError::DiffMismatch(err) => Display::fmt(err, f),
            MasternodeSyncError::Sml(err) => Display::fmt(err, f),
            MasternodeSyncError::StateRepository(err) => Display::fmt(err, f),
        }
    }
}

impl std::error::Error for MasternodeSyncError {}
