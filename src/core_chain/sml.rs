/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The simplified masternode list, kept as a base list plus a sliding window of per-block diffs.
//!
//! ## Retention window
//!
//! [`SimplifiedMNListStore`] holds a base list and at most `max_lists_limit` diffs on top of it, one
//! per Core block. Adding a diff beyond the limit folds the oldest diff into the base. Within the window
//! the list at any height can be rebuilt with [`list_at`](SimplifiedMNListStore::list_at), which is
//! what verifying quorum signatures made at recent heights needs.

use std::collections::VecDeque;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    logging::LOG_TARGET,
    types::{
        data_types::{CoreHeight, CryptoHash},
        masternode::{DiffMismatch, SimplifiedMNList, SimplifiedMNListDiff},
    },
};

use super::{latest_chain_lock::LatestCoreChainLock, rpc::CoreRpc, rpc::CoreRpcError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimplifiedMNListStore {
    base: SimplifiedMNList,
    base_height: CoreHeight,
    diffs: VecDeque<(CoreHeight, SimplifiedMNListDiff)>,
    current: SimplifiedMNList,
    max_lists_limit: usize,
}

impl SimplifiedMNListStore {
    /// Start a store from `base_diff`, the diff from genesis to `base_height`.
    pub fn new(
        base_diff: &SimplifiedMNListDiff,
        base_height: CoreHeight,
        max_lists_limit: usize,
    ) -> Result<SimplifiedMNListStore, SmlError> {
        let base = SimplifiedMNList::from_base_diff(base_diff)?;
        Ok(SimplifiedMNListStore {
            current: base.clone(),
            base,
            base_height,
            diffs: VecDeque::new(),
            max_lists_limit,
        })
    }

    /// Append the diff yielding the list at `height`. The diff must be based on the current tip, and
    /// `height` must be directly above it.
    pub fn add_diff(
        &mut self,
        height: CoreHeight,
        diff: SimplifiedMNListDiff,
    ) -> Result<(), SmlError> {
        if height != self.tip_height().next() {
            return Err(SmlError::UnexpectedHeight {
                expected: self.tip_height().next(),
                found: height,
            });
        }
        self.current.apply_diff(&diff)?;
        self.diffs.push_back((height, diff));

        while self.diffs.len() > self.max_lists_limit {
            if let Some((height, oldest)) = self.diffs.pop_front() {
                self.base.apply_diff(&oldest)?;
                self.base_height = height;
            }
        }
        Ok(())
    }

    /// Append `diffs` in order, stopping at the first one that does not apply.
    pub fn apply_diffs(
        &mut self,
        diffs: impl IntoIterator<Item = (CoreHeight, SimplifiedMNListDiff)>,
    ) -> Result<(), SmlError> {
        for (height, diff) in diffs {
            self.add_diff(height, diff)?;
        }
        Ok(())
    }

    pub fn current_list(&self) -> &SimplifiedMNList {
        &self.current
    }

    /// Block hash of the newest list held.
    pub fn block_hash(&self) -> CryptoHash {
        self.current.block_hash()
    }

    /// The list at `height`, if `height` is inside the retention window.
    pub fn list_at(&self, height: CoreHeight) -> Option<SimplifiedMNList> {
        if height < self.base_height || height > self.tip_height() {
            return None;
        }
        let mut list = self.base.clone();
        for (_, diff) in self.diffs.iter().take_while(|(diff_height, _)| *diff_height <= height) {
            list.apply_diff(diff).ok()?;
        }
        Some(list)
    }

    pub fn base_height(&self) -> CoreHeight {
        self.base_height
    }

    pub fn tip_height(&self) -> CoreHeight {
        self.diffs
            .back()
            .map_or(self.base_height, |(height, _)| *height)
    }

    /// Iterate through the retained diffs, oldest first.
    pub fn diffs(&self) -> impl Iterator<Item = &(CoreHeight, SimplifiedMNListDiff)> {
        self.diffs.iter()
    }

    pub fn max_lists_limit(&self) -> usize {
        self.max_lists_limit
    }
}

/// Keeps a shared [`SimplifiedMNListStore`] in step with Core's chain-locked height.
pub struct SmlTracker<R: CoreRpc> {
    core_rpc: Arc<R>,
    latest_chain_lock: LatestCoreChainLock,
    store: Mutex<Option<SimplifiedMNListStore>>,
    is_processing: AtomicBool,
    max_lists_limit: usize,
}

/// Clears the processing flag when an update finishes, however it finishes.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<R: CoreRpc> SmlTracker<R> {
    pub fn new(
        core_rpc: Arc<R>,
        latest_chain_lock: LatestCoreChainLock,
        max_lists_limit: usize,
    ) -> SmlTracker<R> {
        SmlTracker {
            core_rpc,
            latest_chain_lock,
            store: Mutex::new(None),
            is_processing: AtomicBool::new(false),
            max_lists_limit,
        }
    }

    fn store(&self) -> MutexGuard<'_, Option<SimplifiedMNListStore>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring the store up to `core_height`. Returns `Ok(false)` if there was nothing to do, or if another
    /// update was already in progress.
    ///
    /// The first update seeds the store with the diff from genesis to `core_height - max_lists_limit`
    /// followed by one diff per block up to `core_height`. Later updates append one diff per block.
    pub fn update(&self, core_height: CoreHeight) -> Result<bool, SmlError> {
        if self.latest_chain_lock.get().is_none() {
            return Err(SmlError::MissingChainLock);
        }
        if self
            .is_processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::debug!(target: LOG_TARGET, "sml update already in progress, skipping");
            return Ok(false);
        }
        let _guard = ProcessingGuard(&self.is_processing);

        let mut store = self.store();
        let (mut working, from) = match store.as_ref() {
            Some(existing) if existing.tip_height() >= core_height => return Ok(false),
            Some(existing) => (existing.clone(), existing.tip_height()),
            None => {
                let start = CoreHeight::new(
                    core_height
                        .int()
                        .saturating_sub(self.max_lists_limit as u32)
                        .max(1),
                );
                let base_diff = self.core_rpc.protx_diff(CoreHeight::new(1), start)?;
                let seeded =
                    SimplifiedMNListStore::new(&base_diff, start, self.max_lists_limit)?;
                (seeded, start)
            }
        };

        let mut height = from;
        while height < core_height {
            let next = height.next();
            let diff = self.core_rpc.protx_diff(height, next)?;
            working.add_diff(next, diff)?;
            height = next;
        }

        log::debug!(
            target: LOG_TARGET,
            "sml updated to core height {}, block {}",
            core_height,
            working.block_hash()
        );
        *store = Some(working);
        Ok(true)
    }

    pub fn current_list(&self) -> Option<SimplifiedMNList> {
        self.store().as_ref().map(|store| store.current_list().clone())
    }

    pub fn list_at(&self, height: CoreHeight) -> Option<SimplifiedMNList> {
        self.store().as_ref().and_then(|store| store.list_at(height))
    }

    /// The list at `height`, rebuilt from Core if `height` has already left the retention window.
    ///
    /// `None` if the store was never seeded or has not reached `height` yet. The list of another height
    /// is never substituted.
    pub fn list_at_or_rebuild(&self, height: CoreHeight) -> Result<Option<SimplifiedMNList>, SmlError> {
        let below_window = match self.store().as_ref() {
            None => return Ok(None),
            Some(store) => match store.list_at(height) {
                Some(list) => return Ok(Some(list)),
                None => height < store.base_height(),
            },
        };
        if !below_window {
            return Ok(None);
        }

        log::debug!(
            target: LOG_TARGET,
            "core height {} is below the sml retention window, rebuilding its list",
            height
        );
        let diff = self.core_rpc.protx_diff(CoreHeight::new(1), height)?;
        Ok(Some(SimplifiedMNList::from_base_diff(&diff)?))
    }

    pub fn tip_height(&self) -> Option<CoreHeight> {
        self.store().as_ref().map(|store| store.tip_height())
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing.load(Ordering::Acquire)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SmlError {
    /// The masternode list cannot be updated before a chain lock has been observed.
    MissingChainLock,
    CoreRpc(CoreRpcError),
    DiffMismatch(DiffMismatch),
    UnexpectedHeight { expected: CoreHeight, found: CoreHeight },
}

impl From<CoreRpcError> for SmlError {
    fn from(value: CoreRpcError) -> Self {
        SmlError::CoreRpc(value)
    }
}

impl From<DiffMismatch> for SmlError {
    fn from(value: DiffMismatch) -> Self {
        SmlError::DiffMismatch(value)
    }
}

impl Display for SmlError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SmlError::MissingChainLock => {
                write!(f, "cannot update masternode list without a core chain lock")
            }
            SmlError::CoreRpc(err) => Display::fmt(err, f),
            SmlError::DiffMismatch(err) => Display::fmt(err, f),
            SmlError::UnexpectedHeight { expected, found } => write!(
                f,
                "expected masternode list diff for core height {}, got {}",
                expected, found
            ),
        }
    }
}

impl std::error::Error for SmlError {}
