//! [`MockCore`], an in-memory stand-in for Core's JSON-RPC interface.
//!
//! The mock chain has one block per height up to its tip, with deterministic [block hashes](block_hash).
//! The masternode list is configured as a series of snapshots, each valid from a given height on.
//! `protx diff` answers are computed by comparing two snapshots, so that diffs chain the way Core's do.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use drive_abci::{
    core_chain::{
        BlockchainInfo, CoreBlock, CoreRpc, CoreRpcError, MnSyncStatus, RPC_INVALID_ADDRESS_OR_KEY,
    },
    types::{
        chain_lock::ChainLock,
        crypto_primitives::sha256,
        data_types::{CoreHeight, CryptoHash},
        masternode::{
            DeletedQuorum, LlmqType, MasternodeEntry, ProRegTxPayload, QuorumEntry,
            SimplifiedMNListDiff,
        },
        validator_set::QuorumInfo,
    },
};

/// The hash of the mock block at `height`.
pub(crate) fn block_hash(height: CoreHeight) -> CryptoHash {
    sha256(&[b"core block", &height.int().to_le_bytes()])
}

/// The masternodes and quorums of the masternode list from some height on.
#[derive(Clone, Debug, Default)]
pub(crate) struct MasternodeListSnapshot {
    pub(crate) masternodes: Vec<MasternodeEntry>,
    pub(crate) quorums: Vec<QuorumEntry>,
}

pub(crate) struct MockCoreState {
    pub(crate) tip: CoreHeight,
    pub(crate) best_chain_lock: Option<ChainLock>,
    pub(crate) lists: BTreeMap<CoreHeight, MasternodeListSnapshot>,
    pub(crate) pro_reg_tx_payloads: HashMap<CryptoHash, ProRegTxPayload>,
    pub(crate) quorum_infos: HashMap<CryptoHash, QuorumInfo>,
    pub(crate) transactions: HashMap<CryptoHash, Vec<u8>>,
    pub(crate) sent_transactions: Vec<Vec<u8>>,
    /// What `verifychainlock` answers.
    pub(crate) chain_locks_valid: bool,
    /// `mnsync status` reports synced from this poll on, counting from 1.
    pub(crate) synced_from_poll: usize,
    pub(crate) fail_sends: bool,
    calls: HashMap<&'static str, usize>,
}

/// An in-memory implementation of [`CoreRpc`]. Clones share the same state, so a test can keep a handle
/// to reconfigure the mock after handing it to Drive.
#[derive(Clone)]
pub(crate) struct MockCore(Arc<Mutex<MockCoreState>>);

impl MockCore {
    /// Create a mock chain with blocks up to `tip` and an empty masternode list.
    pub(crate) fn new(tip: CoreHeight) -> MockCore {
        MockCore(Arc::new(Mutex::new(MockCoreState {
            tip,
            best_chain_lock: None,
            lists: BTreeMap::new(),
            pro_reg_tx_payloads: HashMap::new(),
            quorum_infos: HashMap::new(),
            transactions: HashMap::new(),
            sent_transactions: Vec::new(),
            chain_locks_valid: true,
            synced_from_poll: 1,
            fail_sends: false,
            calls: HashMap::new(),
        })))
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, MockCoreState> {
        self.0.lock().unwrap()
    }

    pub(crate) fn set_tip(&self, tip: CoreHeight) {
        self.state().tip = tip;
    }

    pub(crate) fn set_best_chain_lock(&self, chain_lock: ChainLock) {
        self.state().best_chain_lock = Some(chain_lock);
    }

    /// Make `snapshot` the masternode list from `height` on, until the next snapshot.
    pub(crate) fn set_list(&self, height: CoreHeight, snapshot: MasternodeListSnapshot) {
        self.state().lists.insert(height, snapshot);
    }

    pub(crate) fn set_pro_reg_tx_payload(&self, pro_reg_tx_hash: CryptoHash, payload: ProRegTxPayload) {
        self.state()
            .pro_reg_tx_payloads
            .insert(pro_reg_tx_hash, payload);
    }

    pub(crate) fn set_quorum_info(&self, quorum_info: QuorumInfo) {
        self.state()
            .quorum_infos
            .insert(quorum_info.quorum_hash, quorum_info);
    }

    pub(crate) fn set_transaction(&self, id: CryptoHash, transaction: Vec<u8>) {
        self.state().transactions.insert(id, transaction);
    }

    pub(crate) fn sent_transactions(&self) -> Vec<Vec<u8>> {
        self.state().sent_transactions.clone()
    }

    /// How many times `method` was called, named by its Core RPC name.
    pub(crate) fn call_count(&self, method: &str) -> usize {
        self.state().calls.get(method).copied().unwrap_or(0)
    }

    fn record(&self, method: &'static str) -> MutexGuard<'_, MockCoreState> {
        let mut state = self.state();
        *state.calls.entry(method).or_insert(0) += 1;
        state
    }
}

impl MockCoreState {
    fn snapshot_at(&self, height: CoreHeight) -> MasternodeListSnapshot {
        self.lists
            .range(..=height)
            .next_back()
            .map(|(_, snapshot)| snapshot.clone())
            .unwrap_or_default()
    }

    fn height_of(&self, hash: &CryptoHash) -> Option<CoreHeight> {
        (1..=self.tip.int())
            .map(CoreHeight::new)
            .find(|height| block_hash(*height) == *hash)
    }
}

fn not_found(what: String) -> CoreRpcError {
    CoreRpcError::Rpc {
        code: RPC_INVALID_ADDRESS_OR_KEY,
        message: format!("{} not found", what),
    }
}

impl CoreRpc for MockCore {
    fn get_best_chain_lock(&self) -> Result<ChainLock, CoreRpcError> {
        self.record("getbestchainlock")
            .best_chain_lock
            .clone()
            .ok_or(CoreRpcError::Rpc {
                code: -32603,
                message: "Unable to find any chainlock".to_string(),
            })
    }

    fn get_block(&self, hash: &CryptoHash) -> Result<CoreBlock, CoreRpcError> {
        let state = self.record("getblock");
        match state.height_of(hash) {
            Some(height) => Ok(CoreBlock {
                hash: *hash,
                height,
            }),
            None => Err(not_found(format!("block {}", hash))),
        }
    }

    fn get_block_hash(&self, height: CoreHeight) -> Result<CryptoHash, CoreRpcError> {
        let state = self.record("getblockhash");
        if height > state.tip {
            return Err(CoreRpcError::Rpc {
                code: -8,
                message: "Block height out of range".to_string(),
            });
        }
        Ok(block_hash(height))
    }

    fn get_block_count(&self) -> Result<CoreHeight, CoreRpcError> {
        Ok(self.record("getblockcount").tip)
    }

    fn get_blockchain_info(&self) -> Result<BlockchainInfo, CoreRpcError> {
        let state = self.record("getblockchaininfo");
        Ok(BlockchainInfo {
            chain: "regtest".to_string(),
            blocks: state.tip,
            best_block_hash: block_hash(state.tip),
            initial_block_download: false,
        })
    }

    fn get_raw_transaction(&self, id: &CryptoHash) -> Result<Vec<u8>, CoreRpcError> {
        self.record("getrawtransaction")
            .transactions
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(format!("transaction {}", id)))
    }

    fn get_pro_reg_tx_payload(
        &self,
        pro_reg_tx_hash: &CryptoHash,
    ) -> Result<ProRegTxPayload, CoreRpcError> {
        self.record("getrawtransaction")
            .pro_reg_tx_payloads
            .get(pro_reg_tx_hash)
            .cloned()
            .ok_or_else(|| not_found(format!("transaction {}", pro_reg_tx_hash)))
    }

    fn send_raw_transaction(&self, transaction: &[u8]) -> Result<CryptoHash, CoreRpcError> {
        let mut state = self.record("sendrawtransaction");
        if state.fail_sends {
            return Err(CoreRpcError::Rpc {
                code: -26,
                message: "bad-txns".to_string(),
            });
        }
        state.sent_transactions.push(transaction.to_vec());
        Ok(sha256(&[transaction]))
    }

    /// The changes between the lists at `base` and `block`. A diff based on height 1 or below carries the
    /// whole list at `block`.
    fn protx_diff(
        &self,
        base: CoreHeight,
        block: CoreHeight,
    ) -> Result<SimplifiedMNListDiff, CoreRpcError> {
        let state = self.record("protx diff");
        if block > state.tip {
            return Err(not_found(format!("block at height {}", block)));
        }

        let previous = if base.int() <= 1 {
            MasternodeListSnapshot::default()
        } else {
            state.snapshot_at(base)
        };
        let current = state.snapshot_at(block);

        let deleted_mns = previous
            .masternodes
            .iter()
            .filter(|entry| {
                !current
                    .masternodes
                    .iter()
                    .any(|other| other.pro_reg_tx_hash == entry.pro_reg_tx_hash)
            })
            .map(|entry| entry.pro_reg_tx_hash)
            .collect();
        let mn_list = current
            .masternodes
            .iter()
            .filter(|entry| !previous.masternodes.contains(entry))
            .cloned()
            .collect();
        let deleted_quorums = previous
            .quorums
            .iter()
            .filter(|quorum| !current.quorums.contains(quorum))
            .map(|quorum| DeletedQuorum {
                llmq_type: quorum.llmq_type,
                quorum_hash: quorum.quorum_hash,
            })
            .collect();
        let new_quorums = current
            .quorums
            .iter()
            .filter(|quorum| !previous.quorums.contains(quorum))
            .cloned()
            .collect();

        Ok(SimplifiedMNListDiff {
            base_block_hash: block_hash(base),
            block_hash: block_hash(block),
            deleted_mns,
            mn_list,
            deleted_quorums,
            new_quorums,
        })
    }

    fn quorum_info(
        &self,
        _llmq_type: LlmqType,
        quorum_hash: &CryptoHash,
    ) -> Result<QuorumInfo, CoreRpcError> {
        self.record("quorum info")
            .quorum_infos
            .get(quorum_hash)
            .cloned()
            .ok_or_else(|| not_found(format!("quorum {}", quorum_hash)))
    }

    fn mnsync_status(&self) -> Result<MnSyncStatus, CoreRpcError> {
        let mut state = self.record("mnsync status");
        let polls = *state.calls.entry("mnsync status").or_insert(0);
        let is_synced = polls >= state.synced_from_poll;
        Ok(MnSyncStatus {
            asset_name: if is_synced {
                "MASTERNODE_SYNC_FINISHED".to_string()
            } else {
                "MASTERNODE_SYNC_BLOCKCHAIN".to_string()
            },
            is_blockchain_synced: is_synced,
            is_synced,
        })
    }

    fn verify_chain_lock(&self, _chain_lock: &ChainLock) -> Result<bool, CoreRpcError> {
        Ok(self.record("verifychainlock").chain_locks_valid)
    }
}
