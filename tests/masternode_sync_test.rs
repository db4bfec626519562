use std::sync::Arc;

use drive_abci::{
    block_execution::ExecutionScope,
    core_chain::{LatestCoreChainLock, SmlTracker},
    masternodes::{
        identities::{masternode_identifier, operator_identifier, voting_identifier},
        reward_shares::{pay_to_id, reward_share_document_id, REWARD_SHARE_DOCUMENT_TYPE},
        MasternodeIdentitySynchronizer, MasternodeSyncError, SynchronizationResult,
    },
    state_repository::DriveStateRepository,
    storage::{lock, shared_transaction, KVGet},
    types::{
        data_types::{CoreHeight, PubKeyHash, Timestamp},
        masternode::MasternodeEntry,
        platform_state::{DataContract, Purpose},
    },
};
use log::LevelFilter;

mod common;

use crate::common::{
    fixtures::{
        bls_public_key, chain_lock, identifier, masternode, p2pkh_script, pro_reg_tx_payload,
        pro_tx_hash, quorum,
    },
    logging::setup_logger,
    mem_db::MemDB,
    mock_core::{MasternodeListSnapshot, MockCore},
};

const REWARD_SHARES_CONTRACT: u8 = 0xF3;

fn voting_masternode(n: u8) -> MasternodeEntry {
    MasternodeEntry {
        voting_address: PubKeyHash::new([0x30 + n; 20]),
        ..masternode(n, n)
    }
}

fn invalid(entry: MasternodeEntry) -> MasternodeEntry {
    MasternodeEntry {
        is_valid: false,
        ..entry
    }
}

/// Masternodes 1 to 4 are valid at Core height 1 and masternode 5 is not. At height 8, masternode 1
/// changes its payout script, masternode 2 changes its operator, masternode 3 is gone, masternode 4 is
/// invalid, and masternode 5 is valid.
fn changing_core() -> MockCore {
    let core = MockCore::new(CoreHeight::new(12));
    core.set_list(
        CoreHeight::new(1),
        MasternodeListSnapshot {
            masternodes: vec![
                masternode(1, 1),
                masternode(2, 2),
                voting_masternode(3),
                masternode(4, 4),
                invalid(masternode(5, 5)),
            ],
            quorums: vec![quorum(1)],
        },
    );
    core.set_list(
        CoreHeight::new(8),
        MasternodeListSnapshot {
            masternodes: vec![
                MasternodeEntry {
                    payout_script: Some(p2pkh_script(0x11)),
                    ..masternode(1, 1)
                },
                masternode(2, 9),
                invalid(masternode(4, 4)),
                masternode(5, 5),
            ],
            quorums: vec![quorum(1)],
        },
    );
    for (n, operator_reward) in [(1, 0), (2, 1500), (3, 500), (4, 100), (5, 0)] {
        core.set_pro_reg_tx_payload(pro_tx_hash(n), pro_reg_tx_payload(n, operator_reward));
    }
    core.set_best_chain_lock(chain_lock(CoreHeight::new(12)));
    core
}

fn reward_shares_contract() -> DataContract {
    DataContract {
        id: identifier(REWARD_SHARES_CONTRACT),
        owner_id: identifier(0xE3),
        version: 1,
        document_schemas: [(REWARD_SHARE_DOCUMENT_TYPE.to_string(), "{}".to_string())]
            .into_iter()
            .collect(),
    }
}

#[test]
fn masternode_identities_follow_masternode_list_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Initialize test components.
    let db = MemDB::new();
    let core = Arc::new(changing_core());
    let latest_chain_lock = LatestCoreChainLock::new();
    latest_chain_lock.update(chain_lock(CoreHeight::new(12)));
    let sml_tracker = Arc::new(SmlTracker::new(core.clone(), latest_chain_lock, 16));
    sml_tracker.update(CoreHeight::new(12)).unwrap();

    let transaction = shared_transaction(db.clone());
    lock(&transaction)
        .set_data_contract(&reward_shares_contract())
        .unwrap();
    let repository =
        DriveStateRepository::new(transaction.clone(), core.clone(), ExecutionScope::new());
    let synchronizer = MasternodeIdentitySynchronizer::new(
        core.clone(),
        sml_tracker.clone(),
        identifier(REWARD_SHARES_CONTRACT),
    );
    let contract_id = identifier(REWARD_SHARES_CONTRACT);

    // 2. On the first synchronization every valid masternode is new.
    let result = synchronizer
        .synchronize(&repository, None, CoreHeight::new(5), Timestamp::from_millis(5_000))
        .unwrap();
    assert_eq!(
        result,
        SynchronizationResult {
            created_identities: 8,
            updated_identities: 0,
            created_reward_shares: 3,
            removed_reward_shares: 0,
        }
    );

    // 2.1. Masternodes without an operator reward get no operator identity and no reward share.
    let masternode_1 = masternode_identifier(&pro_tx_hash(1));
    assert!(lock(&transaction).identity(&masternode_1).unwrap().is_some());
    assert!(lock(&transaction)
        .identity(&operator_identifier(&pro_tx_hash(1), &bls_public_key(1)))
        .unwrap()
        .is_none());
    assert!(lock(&transaction)
        .documents_by_owner(&contract_id, &masternode_1)
        .unwrap()
        .is_empty());

    // 2.2. The reward share of masternode 2 pays its operator.
    let masternode_2 = masternode_identifier(&pro_tx_hash(2));
    let operator_2 = operator_identifier(&pro_tx_hash(2), &bls_public_key(2));
    let shares = lock(&transaction)
        .documents_by_owner(&contract_id, &masternode_2)
        .unwrap();
    assert_eq!(shares.len(), 1);
    assert_eq!(pay_to_id(&shares[0]), Some(&operator_2));

    // 2.3. Masternode 3 votes with a key of its own, so it gets a voting identity.
    assert!(lock(&transaction)
        .identity(&voting_identifier(
            &pro_tx_hash(3),
            &PubKeyHash::new([0x33; 20])
        ))
        .unwrap()
        .is_some());

    // 2.4. Masternode 5 is invalid, so it has no identity yet.
    assert!(lock(&transaction)
        .identity(&masternode_identifier(&pro_tx_hash(5)))
        .unwrap()
        .is_none());

    // 3. The second synchronization applies every change between the two lists.
    let result = synchronizer
        .synchronize(
            &repository,
            Some(CoreHeight::new(5)),
            CoreHeight::new(8),
            Timestamp::from_millis(8_000),
        )
        .unwrap();
    assert_eq!(
        result,
        SynchronizationResult {
            created_identities: 2,
            updated_identities: 1,
            created_reward_shares: 1,
            removed_reward_shares: 3,
        }
    );

    // 3.1. Removed and invalid masternodes lose their reward shares.
    for n in [3, 4] {
        assert!(lock(&transaction)
            .documents_by_owner(&contract_id, &masternode_identifier(&pro_tx_hash(n)))
            .unwrap()
            .is_empty());
    }

    // 3.2. The reward share of masternode 2 moves to the identity of its new operator.
    let new_operator_2 = operator_identifier(&pro_tx_hash(2), &bls_public_key(9));
    assert!(lock(&transaction).identity(&new_operator_2).unwrap().is_some());
    let shares = lock(&transaction)
        .documents_by_owner(&contract_id, &masternode_2)
        .unwrap();
    assert_eq!(shares.len(), 1);
    assert_eq!(shares[0].id, reward_share_document_id(&masternode_2, &new_operator_2));
    assert!(lock(&transaction)
        .document(&contract_id, &reward_share_document_id(&masternode_2, &operator_2))
        .unwrap()
        .is_none());

    // 3.3. The withdrawal key of masternode 1 is replaced, not removed.
    let identity = lock(&transaction).identity(&masternode_1).unwrap().unwrap();
    assert_eq!(identity.revision, 1);
    let withdrawal_keys: Vec<_> = identity
        .public_keys
        .values()
        .filter(|key| key.purpose == Purpose::Withdraw)
        .collect();
    assert_eq!(withdrawal_keys.len(), 2);
    assert_eq!(withdrawal_keys[0].data, vec![1u8; 20]);
    assert_eq!(
        withdrawal_keys[0].disabled_at,
        Some(Timestamp::from_millis(8_000))
    );
    assert_eq!(withdrawal_keys[1].data, vec![0x11u8; 20]);
    assert!(!withdrawal_keys[1].is_disabled());

    // 3.4. A masternode that became valid is treated as new.
    assert!(lock(&transaction)
        .identity(&masternode_identifier(&pro_tx_hash(5)))
        .unwrap()
        .is_some());

    // 4. Synchronizing to a height that was already synchronized changes nothing.
    let result = synchronizer
        .synchronize(
            &repository,
            Some(CoreHeight::new(8)),
            CoreHeight::new(8),
            Timestamp::from_millis(9_000),
        )
        .unwrap();
    assert_eq!(result, SynchronizationResult::default());
}

#[test]
fn synchronization_below_retention_window_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Masternode 1 exists from Core height 1, masternode 2 joins at height 30. The list store keeps
    //    4 diffs and is updated to height 40, so heights below 36 have left its window.
    let core = MockCore::new(CoreHeight::new(40));
    core.set_list(
        CoreHeight::new(1),
        MasternodeListSnapshot {
            masternodes: vec![masternode(1, 1)],
            quorums: vec![quorum(1)],
        },
    );
    core.set_list(
        CoreHeight::new(30),
        MasternodeListSnapshot {
            masternodes: vec![masternode(1, 1), masternode(2, 2)],
            quorums: vec![quorum(1)],
        },
    );
    for n in [1, 2] {
        core.set_pro_reg_tx_payload(pro_tx_hash(n), pro_reg_tx_payload(n, 0));
    }
    let core = Arc::new(core);
    let latest_chain_lock = LatestCoreChainLock::new();
    latest_chain_lock.update(chain_lock(CoreHeight::new(40)));
    let sml_tracker = Arc::new(SmlTracker::new(core.clone(), latest_chain_lock, 4));
    sml_tracker.update(CoreHeight::new(40)).unwrap();
    assert!(sml_tracker.list_at(CoreHeight::new(10)).is_none());

    let db = MemDB::new();
    let transaction = shared_transaction(db.clone());
    lock(&transaction)
        .set_data_contract(&reward_shares_contract())
        .unwrap();
    let repository =
        DriveStateRepository::new(transaction.clone(), core.clone(), ExecutionScope::new());
    let synchronizer = MasternodeIdentitySynchronizer::new(
        core.clone(),
        sml_tracker.clone(),
        identifier(REWARD_SHARES_CONTRACT),
    );
    let sync = |last_synced: Option<u32>, core_height: u32| {
        synchronizer
            .synchronize(
                &repository,
                last_synced.map(CoreHeight::new),
                CoreHeight::new(core_height),
                Timestamp::from_millis(core_height as u64 * 1000),
            )
            .unwrap()
    };

    // 2. Lists below the window are rebuilt from Core for the height asked for, never taken from the
    //    newest list.
    assert_eq!(sync(None, 5).created_identities, 1);
    assert_eq!(sync(Some(5), 10), SynchronizationResult::default());
    assert!(lock(&transaction)
        .identity(&masternode_identifier(&pro_tx_hash(2)))
        .unwrap()
        .is_none());

    // 3. The masternode that joined later is created once its height is reached.
    assert_eq!(sync(Some(10), 40).created_identities, 1);
    assert!(lock(&transaction)
        .identity(&masternode_identifier(&pro_tx_hash(2)))
        .unwrap()
        .is_some());

    // 4. Heights above the list store's tip have no list yet.
    assert!(matches!(
        synchronizer.synchronize(
            &repository,
            Some(CoreHeight::new(40)),
            CoreHeight::new(41),
            Timestamp::from_millis(41_000),
        ),
        Err(MasternodeSyncError::MissingMasternodeList { .. })
    ));
}
