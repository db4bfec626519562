//! Shared fixtures: a small masternode network on a mock Core chain, a configuration that matches it,
//! and builders for the ABCI requests a height goes through.

use std::sync::{mpsc::Sender, Arc};

use drive_abci::{
    abci::{
        messages::{
            CommitInfo, RequestFinalizeBlock, RequestInitChain, RequestPrepareProposal,
            RequestProcessProposal,
        },
        AbciApplication,
    },
    block_execution::ThresholdVoteExtension,
    config::{
        Configuration, CoreRpcConfiguration, SystemContractConfiguration,
        SystemContractsConfiguration,
    },
    core_chain::LatestCoreChainLock,
    events::Event,
    types::{
        chain_lock::ChainLock,
        crypto_primitives::{sha256, BlsPublicKey, BlsSignature},
        data_types::{
            BlockHeight, CoreHeight, CryptoHash, Identifier, ProtocolVersion, PubKeyHash, Round,
            Timestamp,
        },
        masternode::{LlmqType, MasternodeEntry, MasternodeType, ProRegTxPayload, QuorumEntry},
        validator_set::{QuorumInfo, QuorumMember},
    },
};

use super::{
    executor::TestExecutor,
    mem_db::MemDB,
    mock_core::{block_hash, MasternodeListSnapshot, MockCore},
};

pub(crate) type TestApplication = AbciApplication<MemDB, MockCore, TestExecutor>;

pub(crate) const INITIAL_CORE_HEIGHT: CoreHeight = CoreHeight::new(10);

pub(crate) const CORE_TIP: CoreHeight = CoreHeight::new(12);

pub(crate) const GENESIS_TIME: Timestamp = Timestamp::from_millis(1_700_000_000_000);

pub(crate) const CHAIN_ID: &str = "drive-test";

/// Operator reward of masternode 2, in basis points.
pub(crate) const OPERATOR_REWARD: u16 = 1500;

pub(crate) fn identifier(n: u8) -> Identifier {
    Identifier::new([n; 32])
}

pub(crate) fn pro_tx_hash(n: u8) -> CryptoHash {
    sha256(&[b"protx", &[n]])
}

pub(crate) fn quorum_hash(n: u8) -> CryptoHash {
    sha256(&[b"quorum", &[n]])
}

pub(crate) fn bls_public_key(n: u8) -> BlsPublicKey {
    BlsPublicKey::new(vec![n; 48]).unwrap()
}

pub(crate) fn bls_signature(n: u8) -> BlsSignature {
    BlsSignature::new(vec![n; 96]).unwrap()
}

/// A pay-to-public-key-hash script paying to `[n; 20]`.
pub(crate) fn p2pkh_script(n: u8) -> Vec<u8> {
    let mut script = vec![0x76, 0xa9, 0x14];
    script.extend_from_slice(&[n; 20]);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

/// A valid masternode whose voting key is its owner key.
pub(crate) fn masternode(n: u8, operator_key: u8) -> MasternodeEntry {
    MasternodeEntry {
        pro_reg_tx_hash: pro_tx_hash(n),
        confirmed_hash: sha256(&[b"confirmed", &[n]]),
        service: format!("127.0.0.{}:19999", n),
        pub_key_operator: bls_public_key(operator_key),
        voting_address: PubKeyHash::new([n; 20]),
        is_valid: true,
        payout_script: Some(p2pkh_script(n)),
        masternode_type: MasternodeType::Regular,
    }
}

pub(crate) fn pro_reg_tx_payload(n: u8, operator_reward: u16) -> ProRegTxPayload {
    ProRegTxPayload {
        owner_key_hash: PubKeyHash::new([n; 20]),
        voting_key_hash: PubKeyHash::new([n; 20]),
        operator_reward,
        payout_script: p2pkh_script(n),
    }
}

pub(crate) fn quorum(n: u8) -> QuorumEntry {
    QuorumEntry {
        llmq_type: LlmqType::LLMQ_TEST,
        quorum_hash: quorum_hash(n),
        quorum_public_key: bls_public_key(0x80 + n),
    }
}

pub(crate) fn quorum_info(quorum: &QuorumEntry, members: &[CryptoHash]) -> QuorumInfo {
    QuorumInfo {
        quorum_hash: quorum.quorum_hash,
        quorum_public_key: quorum.quorum_public_key.clone(),
        members: members
            .iter()
            .enumerate()
            .map(|(i, pro_tx_hash)| QuorumMember {
                pro_tx_hash: *pro_tx_hash,
                valid: true,
                pub_key_share: Some(bls_public_key(0x40 + i as u8)),
            })
            .collect(),
    }
}

pub(crate) fn chain_lock(height: CoreHeight) -> ChainLock {
    ChainLock::new(height, block_hash(height), bls_signature(0xC1))
}

fn system_contract(n: u8) -> SystemContractConfiguration {
    SystemContractConfiguration {
        contract_id: identifier(0xF0 + n),
        owner_id: identifier(0xE0 + n),
        owner_public_key: vec![0x02; 33],
    }
}

pub(crate) fn configuration() -> Configuration {
    Configuration::builder()
        .core_rpc(CoreRpcConfiguration {
            host: "127.0.0.1".to_string(),
            port: 19998,
            username: "dashrpc".to_string(),
            password: "password".to_string(),
        })
        .zmq_endpoint("tcp://127.0.0.1:29998")
        .initial_core_chain_locked_height(INITIAL_CORE_HEIGHT)
        .validator_set_llmq_type(LlmqType::LLMQ_TEST)
        .system_contracts(SystemContractsConfiguration {
            feature_flags: system_contract(1),
            dpns: system_contract(2),
            masternode_reward_shares: system_contract(3),
            dashpay: system_contract(4),
        })
        .protocol_version(ProtocolVersion::new(1))
        .build()
}

/// A Core chain at [`CORE_TIP`], chain-locked at its tip, with two masternodes and two test quorums
/// made up of both. Masternode 1 takes no operator reward, masternode 2 gives [`OPERATOR_REWARD`].
pub(crate) fn populated_core() -> MockCore {
    let core = MockCore::new(CORE_TIP);
    core.set_list(
        CoreHeight::new(1),
        MasternodeListSnapshot {
            masternodes: vec![masternode(1, 1), masternode(2, 2)],
            quorums: vec![quorum(1), quorum(2)],
        },
    );
    core.set_pro_reg_tx_payload(pro_tx_hash(1), pro_reg_tx_payload(1, 0));
    core.set_pro_reg_tx_payload(pro_tx_hash(2), pro_reg_tx_payload(2, OPERATOR_REWARD));
    for n in [1, 2] {
        core.set_quorum_info(quorum_info(&quorum(n), &[pro_tx_hash(1), pro_tx_hash(2)]));
    }
    core.set_best_chain_lock(chain_lock(CORE_TIP));
    core
}

/// Assemble the ABCI handlers on `db` and `core`, with the latest chain lock at Core's best one.
pub(crate) fn application(
    configuration: Configuration,
    db: &MemDB,
    core: &MockCore,
    event_publisher: Option<Sender<Event>>,
) -> (TestApplication, LatestCoreChainLock) {
    let latest_chain_lock = LatestCoreChainLock::new();
    if let Some(best) = core.state().best_chain_lock.clone() {
        latest_chain_lock.update(best);
    }
    let application = AbciApplication::new(
        configuration,
        db.clone(),
        Arc::new(core.clone()),
        latest_chain_lock.clone(),
        TestExecutor,
        event_publisher,
    )
    .unwrap();
    (application, latest_chain_lock)
}

pub(crate) fn init_chain_request() -> RequestInitChain {
    RequestInitChain {
        time: GENESIS_TIME,
        chain_id: CHAIN_ID.to_string(),
        initial_height: BlockHeight::new(1),
        initial_core_height: None,
    }
}

pub(crate) fn block_time(height: u64) -> Timestamp {
    Timestamp::from_millis(GENESIS_TIME.millis() + height * 1000)
}

pub(crate) fn prepare_request(
    height: u64,
    round: u32,
    txs: Vec<Vec<u8>>,
    core_chain_locked_height: CoreHeight,
) -> RequestPrepareProposal {
    RequestPrepareProposal {
        max_tx_bytes: 1024 * 1024,
        txs,
        local_last_commit: None,
        height: BlockHeight::new(height),
        round: Round::new(round),
        time: block_time(height),
        core_chain_locked_height,
        proposer_pro_tx_hash: pro_tx_hash(1),
        proposed_app_version: ProtocolVersion::new(1),
    }
}

pub(crate) fn process_request(
    height: u64,
    round: u32,
    txs: Vec<Vec<u8>>,
    core_chain_locked_height: CoreHeight,
    core_chain_lock_update: Option<ChainLock>,
) -> RequestProcessProposal {
    RequestProcessProposal {
        txs,
        proposed_last_commit: None,
        height: BlockHeight::new(height),
        round: Round::new(round),
        time: block_time(height),
        core_chain_locked_height,
        core_chain_lock_update,
        proposer_pro_tx_hash: pro_tx_hash(1),
        proposed_app_version: ProtocolVersion::new(1),
    }
}

pub(crate) fn finalize_request(
    height: u64,
    round: u32,
    threshold_vote_extensions: Vec<ThresholdVoteExtension>,
) -> RequestFinalizeBlock {
    RequestFinalizeBlock {
        commit: CommitInfo {
            round: Round::new(round),
            quorum_hash: quorum_hash(1),
            block_signature: Some(bls_signature(0xB0 + height as u8)),
            threshold_vote_extensions,
        },
        hash: sha256(&[b"platform block", &height.to_le_bytes()]),
        height: BlockHeight::new(height),
        round: Round::new(round),
    }
}
