/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Synchronization of masternode identities and reward shares with the masternode list.
//!
//! Every block, [`MasternodeIdentitySynchronizer::synchronize`] compares the masternode list at the
//! previously synchronized Core height with the list at the block's chain-locked Core height and applies
//! the [changes](MasternodeListChanges) to platform state:
//!
//! | Change                       | Effect                                                              |
//! |------------------------------|---------------------------------------------------------------------|
//! | New masternode               | Masternode identity, plus operator identity and reward share if the operator takes a reward, plus voting identity if the voting key is not the owner key. |
//! | Removed or invalid           | Every reward share the masternode owns is deleted.                  |
//! | Operator key changed         | Stale operator reward share deleted, new operator identity and reward share created. |
//! | Voting key changed           | Voting identity created.                                            |
//! | Payout script changed        | Old withdrawal key disabled, new one added, identity revision bumped. |

pub mod diff;

pub mod identities;

pub mod reward_shares;

pub mod synchronizer;

pub use diff::{classify_changes, MasternodeListChanges};
pub use synchronizer::{MasternodeIdentitySynchronizer, MasternodeSyncError, SynchronizationResult};
