use std::sync::{
    mpsc::{self, Receiver},
    Arc,
};

use borsh::{BorshDeserialize, BorshSerialize};
use drive_abci::{
    abci::{
        error::HandlerError,
        messages::{
            ProposalStatus, RequestExtendVote, RequestInfo, RequestQuery,
            RequestVerifyVoteExtension, TxAction, VerifyStatus, VoteExtension, VoteExtensionType,
        },
        query::{IdentitiesQuery, IDENTITIES_PATH},
    },
    block_execution::{LastCommitInfo, ThresholdVoteExtension},
    config::Configuration,
    core_chain::{LatestCoreChainLock, SmlTracker},
    events::Event,
    masternodes::identities::{masternode_identifier, operator_identifier},
    storage::KVGet,
    types::{
        crypto_primitives::{double_sha256, sha256, BLS_SIGNATURE_LENGTH},
        data_types::{BlockHeight, CoreHeight, CryptoHash, Identifier, Round},
        masternode::LlmqType,
        platform_state::Identity,
    },
    validator_set::choose_quorum,
};
use log::LevelFilter;

mod common;

use crate::common::{
    executor::{
        withdrawal_transaction, TestTransition, DECODE_ERROR_CODE, IDENTITY_ALREADY_EXISTS_CODE,
    },
    fixtures::{
        application, bls_public_key, bls_signature, chain_lock, configuration, finalize_request,
        identifier, init_chain_request, populated_core, prepare_request, pro_tx_hash,
        process_request, quorum_hash, TestApplication, CORE_TIP, INITIAL_CORE_HEIGHT,
    },
    logging::setup_logger,
    mem_db::MemDB,
};

fn query_identity(app: &TestApplication, id: Identifier) -> Option<Identity> {
    let response = app.query(RequestQuery {
        path: IDENTITIES_PATH.to_string(),
        data: IdentitiesQuery { ids: vec![id] }.try_to_vec().unwrap(),
        prove: false,
    });
    assert_eq!(response.code, 0, "{}", response.log);
    let mut identities = Vec::<Option<Identity>>::try_from_slice(&response.value).unwrap();
    assert_eq!(identities.len(), 1);
    identities.remove(0)
}

fn configuration_with_interval(interval: u64) -> Configuration {
    let mut configuration = configuration();
    configuration.validator_set_rotation_block_interval = interval;
    configuration
}

fn drain(events: &Receiver<Event>) -> Vec<Event> {
    events.try_iter().collect()
}

#[test]
fn block_lifecycle_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Initialize test components.
    let db = MemDB::new();
    let core = populated_core();
    let (events_sender, events) = mpsc::channel();
    let (mut app, _) = application(configuration(), &db, &core, Some(events_sender));

    // 2. Before InitChain the chain is empty, and proposals are refused.
    let info = app.info(RequestInfo::default()).unwrap();
    assert_eq!(info.last_block_height, BlockHeight::new(0));
    assert_eq!(info.last_block_app_hash, None);
    assert!(matches!(
        app.prepare_proposal(prepare_request(1, 0, Vec::new(), INITIAL_CORE_HEIGHT)),
        Err(HandlerError::ChainState(_))
    ));

    // 3. InitChain registers masternode identities and picks the first validator set at the configured
    //    core height.
    let response = app.init_chain(init_chain_request()).unwrap();
    assert_eq!(response.initial_core_height, INITIAL_CORE_HEIGHT);
    assert_eq!(response.validator_set_update.validator_updates.len(), 2);
    assert_eq!(db.write_count(), 1);

    // 3.1. Masternode 1 takes no operator reward, masternode 2 does.
    assert!(query_identity(&app, masternode_identifier(&pro_tx_hash(1))).is_some());
    assert!(query_identity(&app, masternode_identifier(&pro_tx_hash(2))).is_some());
    assert!(query_identity(&app, operator_identifier(&pro_tx_hash(1), &bls_public_key(1))).is_none());
    assert!(query_identity(&app, operator_identifier(&pro_tx_hash(2), &bls_public_key(2))).is_some());
    assert!(drain(&events).iter().any(|event| matches!(
        event,
        Event::SynchronizeMasternodeIdentities(sync) if sync.created_identities == 3
    )));

    // 3.2. Info reports the genesis core height until the first block is committed.
    let info = app.info(RequestInfo::default()).unwrap();
    assert_eq!(info.last_block_height, BlockHeight::new(0));
    assert_eq!(info.last_core_chain_locked_height, INITIAL_CORE_HEIGHT);

    // 3.3. The chain cannot be initialized twice.
    assert!(matches!(
        app.init_chain(init_chain_request()),
        Err(HandlerError::ChainState(_))
    ));

    // 4. The proposer executes its proposal, and proposes Core's newest chain lock.
    let txs = vec![
        TestTransition::RegisterIdentity { id: identifier(1) }.to_tx(),
        vec![0xFF, 0x00, 0x01],
        TestTransition::Withdraw {
            identity_id: identifier(1),
            amount: 5,
        }
        .to_tx(),
    ];
    let prepared = app
        .prepare_proposal(prepare_request(1, 0, txs.clone(), INITIAL_CORE_HEIGHT))
        .unwrap();
    let codes: Vec<u32> = prepared.tx_results.iter().map(|result| result.code).collect();
    assert_eq!(codes, vec![0, DECODE_ERROR_CODE, 0]);
    assert!(prepared
        .tx_records
        .iter()
        .all(|record| record.action == TxAction::Unmodified));
    assert_eq!(prepared.core_chain_lock_update, Some(chain_lock(CORE_TIP)));
    assert!(prepared.validator_set_update.is_none());

    // 4.1. Nothing is committed while proposals execute.
    assert_eq!(db.write_count(), 1);
    assert!(query_identity(&app, identifier(1)).is_none());

    // 5. Chain lock updates that do not advance Core, or that Core cannot verify, are rejected.
    let rejected = app
        .process_proposal(process_request(
            1,
            1,
            txs.clone(),
            INITIAL_CORE_HEIGHT,
            Some(chain_lock(INITIAL_CORE_HEIGHT)),
        ))
        .unwrap();
    assert_eq!(rejected.status, ProposalStatus::Reject);

    core.state().chain_locks_valid = false;
    let rejected = app
        .process_proposal(process_request(
            1,
            1,
            txs.clone(),
            INITIAL_CORE_HEIGHT,
            Some(chain_lock(CORE_TIP)),
        ))
        .unwrap();
    assert_eq!(rejected.status, ProposalStatus::Reject);
    core.state().chain_locks_valid = true;

    // 6. Processing the same proposal yields the same app hash.
    let processed = app
        .process_proposal(process_request(
            1,
            0,
            txs.clone(),
            INITIAL_CORE_HEIGHT,
            Some(chain_lock(CORE_TIP)),
        ))
        .unwrap();
    assert_eq!(processed.status, ProposalStatus::Accept);
    assert_eq!(processed.app_hash, Some(prepared.app_hash));
    assert_eq!(processed.tx_results, prepared.tx_results);

    // 7. The vote is extended with the hash of the queued withdrawal transaction.
    let withdrawal = withdrawal_transaction(&identifier(1), 5);
    let withdrawal_hash = double_sha256(&[&withdrawal]);
    let extended = app.extend_vote(RequestExtendVote {
        hash: CryptoHash::default(),
        height: BlockHeight::new(1),
        round: Round::new(0),
    });
    assert_eq!(
        extended.vote_extensions,
        vec![VoteExtension {
            extension_type: VoteExtensionType::ThresholdRecover,
            extension: withdrawal_hash.bytes().to_vec(),
        }]
    );

    // 7.1. Other validators' extensions are accepted only if they name exactly the same transactions.
    let verify_at = |height: u64, round: u32, vote_extensions: Vec<VoteExtension>| {
        app.verify_vote_extension(RequestVerifyVoteExtension {
            hash: CryptoHash::default(),
            validator_pro_tx_hash: pro_tx_hash(2),
            height: BlockHeight::new(height),
            round: Round::new(round),
            vote_extensions,
        })
        .status
    };
    let verify = |round: u32, vote_extensions: Vec<VoteExtension>| verify_at(1, round, vote_extensions);
    assert_eq!(verify(0, extended.vote_extensions.clone()), VerifyStatus::Accept);
    assert_eq!(verify(0, Vec::new()), VerifyStatus::Reject);
    assert_eq!(
        verify(
            0,
            vec![VoteExtension {
                extension_type: VoteExtensionType::ThresholdRecover,
                extension: vec![1, 2, 3],
            }]
        ),
        VerifyStatus::Reject
    );
    assert_eq!(
        verify(
            0,
            vec![VoteExtension {
                extension_type: VoteExtensionType::ThresholdRecover,
                extension: sha256(&[b"other"]).bytes().to_vec(),
            }]
        ),
        VerifyStatus::Reject
    );

    // 7.2. Peers at another round of the height carry the same withdrawal transactions, and are
    //      verified against the round this node executed. Heights without an executed round reject.
    assert_eq!(verify(5, extended.vote_extensions.clone()), VerifyStatus::Accept);
    assert_eq!(verify(5, Vec::new()), VerifyStatus::Reject);
    assert_eq!(
        verify_at(2, 0, extended.vote_extensions.clone()),
        VerifyStatus::Reject
    );

    // 8. FinalizeBlock commits the round and forwards the signed withdrawal transaction to Core.
    drain(&events);
    app.finalize_block(finalize_request(
        1,
        0,
        vec![ThresholdVoteExtension {
            extension: withdrawal_hash.bytes().to_vec(),
            signature: bls_signature(0xAA),
        }],
    ))
    .unwrap();
    assert_eq!(db.write_count(), 2);

    let sent = core.sent_transactions();
    assert_eq!(sent.len(), 1);
    let unsigned_len = withdrawal.len() - BLS_SIGNATURE_LENGTH;
    assert_eq!(sent[0][..unsigned_len], withdrawal[..unsigned_len]);
    assert_eq!(sent[0][unsigned_len..], bls_signature(0xAA).bytes()[..]);

    let committed: Vec<Event> = drain(&events);
    assert!(committed.iter().any(|event| matches!(
        event,
        Event::CommitBlock(commit) if commit.height == BlockHeight::new(1) && commit.tx_count == 3
    )));

    // 8.1. The block is now visible to Info and Query.
    let info = app.info(RequestInfo::default()).unwrap();
    assert_eq!(info.last_block_height, BlockHeight::new(1));
    assert_eq!(info.last_block_app_hash, Some(prepared.app_hash));
    assert_eq!(info.last_core_chain_locked_height, CORE_TIP);
    assert!(query_identity(&app, identifier(1)).is_some());
    assert_eq!(db.app_hash().unwrap(), Some(prepared.app_hash));

    // 9. A failing transaction leaves no trace, and committed state is seen by later blocks.
    let prepared = app
        .prepare_proposal(prepare_request(
            2,
            0,
            vec![
                TestTransition::RegisterThenFail {
                    id: identifier(2),
                    code: 4100,
                }
                .to_tx(),
                TestTransition::RegisterIdentity { id: identifier(1) }.to_tx(),
            ],
            CORE_TIP,
        ))
        .unwrap();
    let codes: Vec<u32> = prepared.tx_results.iter().map(|result| result.code).collect();
    assert_eq!(codes, vec![4100, IDENTITY_ALREADY_EXISTS_CODE]);
    assert_eq!(prepared.core_chain_lock_update, None);
    app.finalize_block(finalize_request(2, 0, Vec::new())).unwrap();
    assert!(query_identity(&app, identifier(2)).is_none());
    assert_eq!(core.sent_transactions().len(), 1);

    // 10. Requests for rounds or heights that were not executed fail.
    assert!(matches!(
        app.finalize_block(finalize_request(3, 0, Vec::new())),
        Err(HandlerError::UnknownRound { .. })
    ));
    assert!(matches!(
        app.prepare_proposal(prepare_request(5, 0, Vec::new(), CORE_TIP)),
        Err(HandlerError::UnexpectedHeight { .. })
    ));
}

#[test]
fn restart_restores_latest_block_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Commit a block.
    let db = MemDB::new();
    let core = populated_core();
    let (mut app, _) = application(configuration(), &db, &core, None);
    app.init_chain(init_chain_request()).unwrap();
    let prepared = app
        .prepare_proposal(prepare_request(
            1,
            0,
            vec![TestTransition::RegisterIdentity { id: identifier(7) }.to_tx()],
            INITIAL_CORE_HEIGHT,
        ))
        .unwrap();
    app.finalize_block(finalize_request(1, 0, Vec::new())).unwrap();
    let validator_set = app.current_validator_set().cloned();
    drop(app);

    // 2. A new application on the same store picks up where the old one stopped.
    let (mut restarted, _) = application(configuration(), &db, &core, None);
    let info = restarted.info(RequestInfo::default()).unwrap();
    assert_eq!(info.last_block_height, BlockHeight::new(1));
    assert_eq!(info.last_block_app_hash, Some(prepared.app_hash));
    assert_eq!(restarted.current_validator_set().cloned(), validator_set);
    assert!(query_identity(&restarted, identifier(7)).is_some());
    restarted
        .prepare_proposal(prepare_request(2, 0, Vec::new(), CORE_TIP))
        .unwrap();
}

#[test]
fn validator_set_rotation_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Initialize test components, rotating on every height.
    let db = MemDB::new();
    let core = populated_core();
    let (events_sender, events) = mpsc::channel();
    let (mut app, _) = application(
        configuration_with_interval(1),
        &db,
        &core,
        Some(events_sender),
    );
    app.init_chain(init_chain_request()).unwrap();
    let initial = app.current_validator_set().unwrap().clone();

    // 2. Without a previous commit signature the entropy is zero, which selects the initial quorum.
    let prepared = app
        .prepare_proposal(prepare_request(1, 0, Vec::new(), INITIAL_CORE_HEIGHT))
        .unwrap();
    assert!(prepared.validator_set_update.is_none());
    app.finalize_block(finalize_request(1, 0, Vec::new())).unwrap();

    // 3. Find a commit signature whose entropy selects the other quorum.
    let list = {
        let latest_chain_lock = LatestCoreChainLock::new();
        latest_chain_lock.update(chain_lock(CORE_TIP));
        let tracker = SmlTracker::new(Arc::new(core.clone()), latest_chain_lock, 16);
        tracker.update(CORE_TIP).unwrap();
        tracker.current_list().unwrap()
    };
    let signature = (0u8..=255)
        .map(bls_signature)
        .find(|signature| {
            let entropy = sha256(&[signature.bytes()]);
            choose_quorum(&list, LlmqType::LLMQ_TEST, &entropy)
                .unwrap()
                .quorum_hash
                != initial.quorum_hash()
        })
        .unwrap();

    // 4. The round rotates, but the committed validator set only changes once it is finalized.
    let mut request = prepare_request(2, 0, Vec::new(), CORE_TIP);
    request.local_last_commit = Some(LastCommitInfo {
        quorum_hash: quorum_hash(1),
        round: Round::new(0),
        block_signature: Some(signature),
        threshold_vote_extensions: Vec::new(),
    });
    let prepared = app.prepare_proposal(request).unwrap();
    let update = prepared.validator_set_update.unwrap();
    assert_ne!(update.quorum_hash, initial.quorum_hash());
    assert_eq!(app.current_validator_set(), Some(&initial));

    drain(&events);
    app.finalize_block(finalize_request(2, 0, Vec::new())).unwrap();
    assert_eq!(
        app.current_validator_set().map(|set| set.quorum_hash()),
        Some(update.quorum_hash)
    );
    assert!(drain(&events).iter().any(|event| matches!(
        event,
        Event::RotateValidatorSet(rotation)
            if rotation.height == BlockHeight::new(2) && rotation.quorum_hash == update.quorum_hash
    )));

    // 5. The rotated validator set survives a restart.
    drop(app);
    let (restarted, _) = application(configuration_with_interval(1), &db, &core, None);
    assert_eq!(
        restarted.current_validator_set().map(|set| set.quorum_hash()),
        Some(update.quorum_hash)
    );
}

#[test]
fn proposal_waits_for_chain_locked_height_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Initialize test components.
    let db = MemDB::new();
    let core = populated_core();
    let (mut app, latest_chain_lock) = application(configuration(), &db, &core, None);
    app.init_chain(init_chain_request()).unwrap();

    // 2. A proposal for a core height above the latest chain lock blocks until one arrives.
    let handle = std::thread::spawn({
        let latest_chain_lock = latest_chain_lock.clone();
        move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            latest_chain_lock.update(chain_lock(CoreHeight::new(13)));
        }
    });
    core.set_tip(CoreHeight::new(13));
    let processed = app
        .process_proposal(process_request(1, 0, Vec::new(), CoreHeight::new(13), None))
        .unwrap();
    assert_eq!(processed.status, ProposalStatus::Accept);
    handle.join().unwrap();
}

#[test]
fn proposal_truncated_at_byte_budget_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Initialize test components.
    let db = MemDB::new();
    let core = populated_core();
    let (mut app, _) = application(configuration(), &db, &core, None);
    app.init_chain(init_chain_request()).unwrap();

    // 2. Propose a transaction that fits, one that does not, and a small one that would fit on its own.
    let first = TestTransition::RegisterIdentity { id: identifier(1) }.to_tx();
    let oversized = TestTransition::RegisterContract {
        id: identifier(0x40),
        owner_id: identifier(1),
        document_type: "x".repeat(200),
    }
    .to_tx();
    let last = TestTransition::RegisterIdentity { id: identifier(2) }.to_tx();
    let mut request = prepare_request(
        1,
        0,
        vec![first.clone(), oversized.clone(), last.clone()],
        INITIAL_CORE_HEIGHT,
    );
    request.max_tx_bytes = (first.len() + last.len() + 1) as u64;
    let prepared = app.prepare_proposal(request).unwrap();

    // 3. The proposal stops at the first transaction over the budget.
    let actions: Vec<TxAction> = prepared
        .tx_records
        .iter()
        .map(|record| record.action)
        .collect();
    assert_eq!(
        actions,
        vec![TxAction::Unmodified, TxAction::Removed, TxAction::Removed]
    );
    assert_eq!(prepared.tx_records[2].tx, last);
    assert_eq!(prepared.tx_results.len(), 1);
}
