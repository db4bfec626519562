/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Classification of the changes between two masternode lists.

use crate::types::masternode::{MasternodeEntry, SimplifiedMNList};

/// Changes between two masternode lists, matched by ProRegTx hash.
///
/// An entry that was valid in the previous list and is invalid in the current one is only classified as
/// `became_invalid`. Key and payout changes are only reported for entries valid in both lists.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MasternodeListChanges {
    /// Valid in the current list, and absent or invalid in the previous one.
    pub new: Vec<MasternodeEntry>,
    /// Present in the previous list, and absent from the current one.
    pub removed: Vec<MasternodeEntry>,
    pub became_invalid: Vec<MasternodeEntry>,
    /// Pairs of (previous, current) entries.
    pub operator_changed: Vec<(MasternodeEntry, MasternodeEntry)>,
    pub voting_changed: Vec<(MasternodeEntry, MasternodeEntry)>,
    pub payout_changed: Vec<(MasternodeEntry, MasternodeEntry)>,
}

impl MasternodeListChanges {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty()
            && self.removed.is_empty()
            && self.became_invalid.is_empty()
            && self.operator_changed.is_empty()
            && self.voting_changed.is_empty()
            && self.payout_changed.is_empty()
    }
}

pub fn classify_changes(
    previous: &SimplifiedMNList,
    current: &SimplifiedMNList,
) -> MasternodeListChanges {
    let mut changes = MasternodeListChanges::default();

    for entry in current.masternodes() {
        let Some(prev) = previous.masternode(&entry.pro_reg_tx_hash) else {
            if entry.is_valid {
                changes.new.push(entry.clone());
            }
            continue;
        };

        if prev.is_valid && !entry.is_valid {
            changes.became_invalid.push(entry.clone());
            continue;
        }
        if !prev.is_valid && entry.is_valid {
            changes.new.push(entry.clone());
            continue;
        }
        if !entry.is_valid {
            continue;
        }

        if prev.pub_key_operator != entry.pub_key_operator {
            changes
                .operator_changed
                .push((prev.clone(), entry.clone()));
        }
        if prev.voting_address != entry.voting_address {
            changes.voting_changed.push((prev.clone(), entry.clone()));
        }
        if prev.payout_script != entry.payout_script {
            changes.payout_changed.push((prev.clone(), entry.clone()));
        }
    }

    changes.removed = previous
        .masternodes()
        .filter(|entry| current.masternode(&entry.pro_reg_tx_hash).is_none())
        .cloned()
        .collect();

    changes
}
