/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The ABCI handlers.
//!
//! [`AbciApplication`] implements one method per ABCI request the consensus engine sends. Requests that
//! drive consensus follow a fixed sequence per height:
//!
//! ```text
//! InitChain (once)
//!     → { PrepareProposal | ProcessProposal }* → ExtendVote → VerifyVoteExtension*
//!     → FinalizeBlock
//!     → next height
//! ```
//!
//! Each `PrepareProposal` and `ProcessProposal` executes a proposal round from scratch into a fresh
//! [`BlockExecutionContext`], buffering every storage write in the shared round
//! [`Transaction`](crate::storage::Transaction). When the round ends its buffered writes are taken out of
//! the transaction and kept in the context, so that rounds never see each other's writes.
//! `FinalizeBlock` puts the writes of the winning round back and commits them in one atomic write.
//!
//! `CheckTx`, `Query`, and `Info` read committed state only, and never fail: `CheckTx` and `Query` report
//! errors as response codes through [`wrap_in_error_handler`].

use std::collections::BTreeSet;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::SystemTime;

use crate::{
    block_execution::{
        BlockExecutionContext, BlockInfo, ExecutionScope, ExecutionTimer, LastCommitInfo,
        ProposalRoundCollection,
    },
    config::Configuration,
    core_chain::{CoreRpc, LatestCoreChainLock, SmlTracker},
    events::{CommitBlockEvent, Event, RotateValidatorSetEvent, SynchronizeMasternodeIdentitiesEvent},
    logging::ContextLogger,
    masternodes::{MasternodeIdentitySynchronizer, SynchronizationResult},
    state_repository::{
        CachedStateRepository, DataContractCache, DriveStateRepository, LoggedStateRepository,
        StateRepository,
    },
    state_transition::{ExecutionError, StateTransitionExecutionContext, StateTransitionExecutor},
    storage::{lock, shared_transaction, Genesis, KVGet, KVStore, SharedTransaction},
    types::{
        chain_lock::ChainLock,
        crypto_primitives::{BlsSignature, BLS_SIGNATURE_LENGTH},
        data_types::{BlockHeight, CoreHeight, CryptoHash, Round, Timestamp},
        validator_set::ValidatorSet,
    },
    validator_set::{create_validator_set_update, ValidatorSetManager},
};

use super::{
    error::{wrap_in_error_handler, AbciError, HandlerError},
    feature_flags::consensus_param_updates,
    messages::{
        CommitInfo, ExecTxResult, ProposalStatus, RequestCheckTx, RequestExtendVote,
        RequestFinalizeBlock, RequestInfo, RequestInitChain, RequestPrepareProposal,
        RequestProcessProposal, RequestQuery, RequestVerifyVoteExtension, ResponseCheckTx,
        ResponseExtendVote, ResponseFinalizeBlock, ResponseInfo, ResponseInitChain,
        ResponsePrepareProposal, ResponseProcessProposal, ResponseQuery,
        ResponseVerifyVoteExtension, TxAction, TxRecord, VerifyStatus, VoteExtension,
        VoteExtensionType,
    },
    query::{QueryMetadata, QueryRouter},
    system_contracts::{system_contracts, UPDATE_CONSENSUS_PARAMS_DOCUMENT_TYPE},
};

/// The state repository stack state transitions are executed against.
pub type DriveRepository<K, R> =
    CachedStateRepository<LoggedStateRepository<DriveStateRepository<K, R>>>;

const ROUND_TIMER: &str = "roundExecution";

pub struct AbciApplication<K: KVStore, R: CoreRpc, E: StateTransitionExecutor> {
    configuration: Configuration,
    transaction: SharedTransaction<K>,
    core_rpc: Arc<R>,
    scope: ExecutionScope,
    state_repository: DriveRepository<K, R>,
    latest_chain_lock: LatestCoreChainLock,
    sml_tracker: Arc<SmlTracker<R>>,
    validator_set_manager: ValidatorSetManager<R>,
    masternode_synchronizer: MasternodeIdentitySynchronizer<R>,
    executor: E,
    rounds: ProposalRoundCollection,
    timer: ExecutionTimer,
    latest_context: Option<BlockExecutionContext>,
    event_publisher: Option<Sender<Event>>,
}

impl<K: KVStore, R: CoreRpc, E: StateTransitionExecutor> AbciApplication<K, R, E> {
    /// Assemble the handlers on top of `kv_store`, restoring the latest committed block and validator set
    /// if the store has them.
    pub fn new(
        configuration: Configuration,
        kv_store: K,
        core_rpc: Arc<R>,
        latest_chain_lock: LatestCoreChainLock,
        executor: E,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<AbciApplication<K, R, E>, HandlerError> {
        let transaction = shared_transaction(kv_store);
        let scope = ExecutionScope::new();
        let state_repository = CachedStateRepository::new(
            LoggedStateRepository::new(
                DriveStateRepository::new(transaction.clone(), Arc::clone(&core_rpc), scope.clone()),
                scope.clone(),
            ),
            DataContractCache::new(configuration.data_contract_cache_size),
        );

        let sml_tracker = Arc::new(SmlTracker::new(
            Arc::clone(&core_rpc),
            latest_chain_lock.clone(),
            configuration.sml_max_lists_limit,
        ));
        let mut validator_set_manager = ValidatorSetManager::new(
            Arc::clone(&core_rpc),
            Arc::clone(&sml_tracker),
            configuration.validator_set_llmq_type,
            configuration.validator_set_rotation_block_interval,
        );
        let masternode_synchronizer = MasternodeIdentitySynchronizer::new(
            Arc::clone(&core_rpc),
            Arc::clone(&sml_tracker),
            configuration
                .system_contracts
                .masternode_reward_shares
                .contract_id,
        );

        let (latest_context, validator_set) = {
            let transaction = lock(&transaction);
            (
                transaction.store().latest_block_execution_context()?,
                transaction.store().validator_set()?,
            )
        };
        if let Some(validator_set) = validator_set {
            validator_set_manager.restore(validator_set);
        }

        Ok(AbciApplication {
            configuration,
            transaction,
            core_rpc,
            scope,
            state_repository,
            latest_chain_lock,
            sml_tracker,
            validator_set_manager,
            masternode_synchronizer,
            executor,
            rounds: ProposalRoundCollection::new(),
            timer: ExecutionTimer::new(),
            latest_context,
            event_publisher,
        })
    }

    /// The context of the last committed block.
    pub fn latest_context(&self) -> Option<&BlockExecutionContext> {
        self.latest_context.as_ref()
    }

    pub fn current_validator_set(&self) -> Option<&ValidatorSet> {
        self.validator_set_manager.current()
    }

    pub fn state_repository(&self) -> &DriveRepository<K, R> {
        &self.state_repository
    }

    pub(crate) fn transaction(&self) -> &SharedTransaction<K> {
        &self.transaction
    }

    /// The logger of the request being served, if it is `abci_method`.
    pub(crate) fn in_flight_logger(&self, abci_method: &str) -> ContextLogger {
        let logger = self.scope.logger();
        if logger.abci_method() == abci_method {
            logger
        } else {
            ContextLogger::new(abci_method)
        }
    }

    /* ↓↓↓ Info ↓↓↓ */

    pub fn info(&self, request: RequestInfo) -> Result<ResponseInfo, HandlerError> {
        let logger = ContextLogger::new("info");
        logger.debug(format_args!(
            "consensus engine version {}, block version {}, p2p version {}",
            request.version, request.block_version, request.p2p_version
        ));

        let response = match &self.latest_context {
            Some(context) => ResponseInfo {
                version: env!("CARGO_PKG_VERSION").to_string(),
                app_version: self.configuration.protocol_version,
                last_block_height: context.height,
                last_block_app_hash: context.app_hash,
                last_core_chain_locked_height: context.core_chain_locked_height,
            },
            None => ResponseInfo {
                version: env!("CARGO_PKG_VERSION").to_string(),
                app_version: self.configuration.protocol_version,
                last_block_height: BlockHeight::new(0),
                last_block_app_hash: None,
                last_core_chain_locked_height: lock(&self.transaction)
                    .store()
                    .last_synced_core_height()?
                    .unwrap_or_default(),
            },
        };
        logger.info(format_args!(
            "last block height {}, last core chain locked height {}",
            response.last_block_height, response.last_core_chain_locked_height
        ));
        Ok(response)
    }

    /* ↓↓↓ InitChain ↓↓↓ */

    /// Register the system data contracts, synchronize masternode identities, and pick the first
    /// validator set, all in one commit.
    pub fn init_chain(
        &mut self,
        request: RequestInitChain,
    ) -> Result<ResponseInitChain, HandlerError> {
        let logger = ContextLogger::new("initChain");
        if lock(&self.transaction).store().genesis()?.is_some() {
            return Err(HandlerError::ChainState(
                "InitChain received for a chain that is already initialized".to_string(),
            ));
        }

        let core_height = request
            .initial_core_height
            .unwrap_or(self.configuration.initial_core_chain_locked_height);
        logger.info(format_args!(
            "initializing chain {} at height {} and core height {}",
            request.chain_id, request.initial_height, core_height
        ));

        lock(&self.transaction).begin();
        self.scope.enter(
            BlockInfo {
                height: request.initial_height,
                time: request.time,
                core_chain_locked_height: core_height,
            },
            logger.clone(),
        );

        self.latest_chain_lock
            .wait_for_chain_locked_height(core_height)?;
        self.sml_tracker.update(core_height)?;

        let mut execution_context = StateTransitionExecutionContext::new();
        for contract in system_contracts(&self.configuration.system_contracts) {
            if self
                .state_repository
                .fetch_identity(&contract.owner.id, &mut execution_context)?
                .is_none()
            {
                self.state_repository
                    .create_identity(&contract.owner, &mut execution_context)?;
            }
            self.state_repository
                .create_data_contract(&contract.data_contract, &mut execution_context)?;
            logger.debug(format_args!(
                "registered system data contract {}",
                contract.data_contract.id
            ));
        }
        // Nothing else reads these, and the registered contracts are committed right away.
        self.state_repository
            .inner()
            .inner()
            .take_touched_data_contracts();

        // Reward shares are documents of a system contract, so masternodes are synchronized after.
        let synchronized = self.masternode_synchronizer.synchronize(
            &self.state_repository,
            None,
            core_height,
            request.time,
        )?;
        self.publish_synchronization(core_height, &synchronized);

        let validator_set = self.validator_set_manager.initialize(core_height)?.clone();

        let app_hash = {
            let mut transaction = lock(&self.transaction);
            transaction.set_genesis(&Genesis {
                chain_id: request.chain_id,
                initial_height: request.initial_height,
                initial_core_height: core_height,
                genesis_time_ms: request.time.millis(),
            })?;
            transaction.set_validator_set(&validator_set)?;
            transaction.set_last_synced_core_height(core_height)?;
            let app_hash = transaction.app_hash(&CryptoHash::default());
            transaction.set_app_hash(&app_hash)?;
            transaction.commit()?;
            app_hash
        };

        logger.info(format_args!(
            "chain initialized with app hash {} and quorum {}",
            app_hash,
            validator_set.quorum_hash()
        ));
        Ok(ResponseInitChain {
            app_hash,
            validator_set_update: create_validator_set_update(&validator_set),
            initial_core_height: core_height,
        })
    }

    /* ↓↓↓ CheckTx ↓↓↓ */

    pub fn check_tx(&self, request: RequestCheckTx) -> ResponseCheckTx {
        let logger = ContextLogger::new("checkTx");
        let result = wrap_in_error_handler(
            || {
                if request.tx.len() > self.configuration.max_state_transition_size {
                    return Err(AbciError::resource_exhausted(format!(
                        "state transition of {} bytes exceeds the limit of {} bytes",
                        request.tx.len(),
                        self.configuration.max_state_transition_size
                    ))
                    .into());
                }
                Ok(self.executor.validate_basic(&request.tx).map(|_| ()))
            },
            self.configuration.respond_with_internal_error_details,
            &logger,
        );

        match result {
            Ok(Ok(())) => ResponseCheckTx::default(),
            Ok(Err(err)) => {
                logger.debug(format_args!("rejected {:?} transaction: {}", request.check_type, err));
                ResponseCheckTx {
                    code: err.code,
                    info: err.message,
                }
            }
            Err(err) => ResponseCheckTx {
                code: err.code,
                info: err.message,
            },
        }
    }

    /* ↓↓↓ PrepareProposal ↓↓↓ */

    pub fn prepare_proposal(
        &mut self,
        request: RequestPrepareProposal,
    ) -> Result<ResponsePrepareProposal, HandlerError> {
        let logger = ContextLogger::for_round("prepareProposal", request.height, request.round);

        // Propose the newest chain lock if Core has moved past the previous block.
        let core_chain_lock_update = self
            .latest_chain_lock
            .get()
            .filter(|chain_lock| chain_lock.height > request.core_chain_locked_height);
        let core_height = core_chain_lock_update
            .as_ref()
            .map_or(request.core_chain_locked_height, |chain_lock| chain_lock.height);

        let mut context = self.begin_block(
            RoundParameters {
                height: request.height,
                round: request.round,
                time: request.time,
                core_chain_locked_height: core_height,
                proposer_pro_tx_hash: request.proposer_pro_tx_hash,
                last_commit_info: request.local_last_commit,
            },
            logger,
        )?;
        context.core_chain_lock_update = core_chain_lock_update;

        let mut tx_records = Vec::with_capacity(request.txs.len());
        let mut tx_results = Vec::with_capacity(request.txs.len());
        let mut total_bytes = 0u64;
        let mut txs = request.txs.into_iter();
        for tx in txs.by_ref() {
            let size = tx.len() as u64;
            if total_bytes + size > request.max_tx_bytes {
                // The proposal is truncated at the first transaction that does not fit.
                tx_records.push(TxRecord {
                    action: TxAction::Removed,
                    tx,
                });
                break;
            }
            total_bytes += size;
            tx_results.push(self.deliver_tx(&tx, &mut context)?);
            tx_records.push(TxRecord {
                action: TxAction::Unmodified,
                tx,
            });
        }
        tx_records.extend(txs.map(|tx| TxRecord {
            action: TxAction::Removed,
            tx,
        }));

        let context = self.end_block(context)?;
        let response = ResponsePrepareProposal {
            tx_records,
            app_hash: context.app_hash.unwrap_or_default(),
            tx_results,
            consensus_param_updates: context.consensus_param_updates.clone(),
            core_chain_lock_update: context.core_chain_lock_update.clone(),
            validator_set_update: context.validator_set_update.clone(),
        };
        self.rounds.insert(context);
        Ok(response)
    }

    /* ↓↓↓ ProcessProposal ↓↓↓ */

    pub fn process_proposal(
        &mut self,
        request: RequestProcessProposal,
    ) -> Result<ResponseProcessProposal, HandlerError> {
        let logger = ContextLogger::for_round("processProposal", request.height, request.round);

        if let Some(chain_lock) = &request.core_chain_lock_update {
            if !self.verify_chain_lock_update(chain_lock, request.core_chain_locked_height, &logger) {
                return Ok(ResponseProcessProposal::reject());
            }
        }
        let core_height = request
            .core_chain_lock_update
            .as_ref()
            .map_or(request.core_chain_locked_height, |chain_lock| chain_lock.height);

        let mut context = self.begin_block(
            RoundParameters {
                height: request.height,
                round: request.round,
                time: request.time,
                core_chain_locked_height: core_height,
                proposer_pro_tx_hash: request.proposer_pro_tx_hash,
                last_commit_info: request.proposed_last_commit,
            },
            logger,
        )?;
        context.core_chain_lock_update = request.core_chain_lock_update;

        let mut tx_results = Vec::with_capacity(request.txs.len());
        for tx in &request.txs {
            tx_results.push(self.deliver_tx(tx, &mut context)?);
        }

        let context = self.end_block(context)?;
        let response = ResponseProcessProposal {
            status: ProposalStatus::Accept,
            app_hash: context.app_hash,
            tx_results,
            consensus_param_updates: context.consensus_param_updates.clone(),
            validator_set_update: context.validator_set_update.clone(),
        };
        self.rounds.insert(context);
        Ok(response)
    }

    fn verify_chain_lock_update(
        &self,
        chain_lock: &ChainLock,
        previous_core_height: CoreHeight,
        logger: &ContextLogger,
    ) -> bool {
        if chain_lock.height <= previous_core_height {
            logger.warn(format_args!(
                "rejecting chain lock update to core height {}, not above {}",
                chain_lock.height, previous_core_height
            ));
            return false;
        }
        match self.core_rpc.verify_chain_lock(chain_lock) {
            Ok(true) => true,
            Ok(false) => {
                logger.warn(format_args!(
                    "rejecting invalid chain lock for core height {}",
                    chain_lock.height
                ));
                false
            }
            Err(err) => {
                logger.warn(format_args!(
                    "rejecting chain lock for core height {} that could not be verified: {}",
                    chain_lock.height, err
                ));
                false
            }
        }
    }

    /* ↓↓↓ ExtendVote and VerifyVoteExtension ↓↓↓ */

    /// One threshold-recovered extension per withdrawal transaction of the round, carrying the
    /// transaction's hash.
    pub fn extend_vote(&self, request: RequestExtendVote) -> ResponseExtendVote {
        let logger = ContextLogger::for_round("extendVote", request.height, request.round);
        let context = match self.rounds.get(request.round) {
            Some(context) if context.height == request.height => context,
            _ => {
                logger.warn("no proposal was executed for this round, not extending the vote");
                return ResponseExtendVote::default();
            }
        };

        let vote_extensions: Vec<_> = context
            .withdrawal_transactions
            .keys()
            .map(|hash| VoteExtension {
                extension_type: VoteExtensionType::ThresholdRecover,
                extension: hash.bytes().to_vec(),
            })
            .collect();
        logger.debug(format_args!(
            "extending vote with {} withdrawal transactions",
            vote_extensions.len()
        ));
        ResponseExtendVote { vote_extensions }
    }

    /// Accept exactly the extensions this node's own execution of the height produced.
    pub fn verify_vote_extension(
        &self,
        request: RequestVerifyVoteExtension,
    ) -> ResponseVerifyVoteExtension {
        let logger = ContextLogger::for_round("verifyVoteExtension", request.height, request.round);
        let reject = ResponseVerifyVoteExtension {
            status: VerifyStatus::Reject,
        };
        // Every round of a height queues the same withdrawal transactions, and peers may be at
        // another round, so any executed round of the height will do.
        let context = self
            .rounds
            .get(request.round)
            .filter(|context| context.height == request.height)
            .or_else(|| {
                self.rounds
                    .contexts()
                    .find(|context| context.height == request.height)
            });
        let context = match context {
            Some(context) => context,
            None => {
                logger.warn(format_args!(
                    "rejecting vote extensions of {}: no proposal was executed at this height",
                    request.validator_pro_tx_hash
                ));
                return reject;
            }
        };

        let mut hashes = BTreeSet::new();
        for vote_extension in &request.vote_extensions {
            let hash = match withdrawal_hash(&vote_extension.extension) {
                Some(hash) if vote_extension.extension_type == VoteExtensionType::ThresholdRecover => hash,
                _ => {
                    logger.warn(format_args!(
                        "rejecting malformed vote extension of {}",
                        request.validator_pro_tx_hash
                    ));
                    return reject;
                }
            };
            if context.withdrawal_transaction(&hash).is_none() || !hashes.insert(hash) {
                logger.warn(format_args!(
                    "rejecting vote extension of {} for unknown withdrawal transaction {}",
                    request.validator_pro_tx_hash, hash
                ));
                return reject;
            }
        }
        if hashes.len() != context.withdrawal_transactions.len() {
            logger.warn(format_args!(
                "rejecting {} vote extensions of {}, expected {}",
                hashes.len(),
                request.validator_pro_tx_hash,
                context.withdrawal_transactions.len()
            ));
            return reject;
        }

        ResponseVerifyVoteExtension {
            status: VerifyStatus::Accept,
        }
    }

    /* ↓↓↓ FinalizeBlock ↓↓↓ */

    /// Commit the winning round, promote its context to "latest", and forward the withdrawal
    /// transactions the quorum signed.
    pub fn finalize_block(
        &mut self,
        request: RequestFinalizeBlock,
    ) -> Result<ResponseFinalizeBlock, HandlerError> {
        let logger = ContextLogger::for_round("finalizeBlock", request.height, request.round);
        let mut context = self
            .rounds
            .take(request.round)
            .ok_or(HandlerError::UnknownRound {
                height: request.height,
                round: request.round,
            })?;
        if context.height != request.height {
            return Err(HandlerError::UnexpectedHeight {
                expected: context.height,
                found: request.height,
            });
        }
        context.logger = logger.clone();
        self.scope.set_logger(logger.clone());

        // Contracts the losing rounds wrote were never committed.
        let losing_rounds: Vec<Round> = self.rounds.rounds().copied().collect();
        for round in losing_rounds {
            if let Some(losing) = self.rounds.take(round) {
                for id in losing.data_contracts.keys() {
                    self.state_repository.cache().delete(id);
                }
            }
        }

        {
            let mut transaction = lock(&self.transaction);
            transaction.restore(std::mem::take(&mut context.state_changes));
            if let Some(validator_set) = &context.next_validator_set {
                transaction.set_validator_set(validator_set)?;
            }
            if let Some(app_hash) = &context.app_hash {
                transaction.set_app_hash(app_hash)?;
            }
            transaction.set_latest_block_execution_context(&context)?;
            transaction.commit()?;
        }

        for data_contract in context.data_contracts.values() {
            self.state_repository.cache().refresh(data_contract);
        }

        if let Some(validator_set) = context.next_validator_set.take() {
            Event::publish(
                &self.event_publisher,
                Event::RotateValidatorSet(RotateValidatorSetEvent {
                    timestamp: SystemTime::now(),
                    height: context.height,
                    quorum_hash: validator_set.quorum_hash(),
                    validator_count: validator_set.len(),
                }),
            );
            self.validator_set_manager.restore(validator_set);
        }

        self.forward_withdrawal_transactions(&context, &request.commit);

        logger.info(format_args!(
            "committed block with {} transactions and app hash {}",
            context.txs.len(),
            context.app_hash.unwrap_or_default()
        ));
        Event::publish(
            &self.event_publisher,
            Event::CommitBlock(CommitBlockEvent {
                timestamp: SystemTime::now(),
                height: context.height,
                round: context.round,
                app_hash: context.app_hash.unwrap_or_default(),
                tx_count: context.txs.len(),
            }),
        );

        self.rounds.clear();
        self.latest_context = Some(context);
        Ok(ResponseFinalizeBlock::default())
    }

    /// Write each recovered quorum signature into its withdrawal transaction and relay the transaction
    /// to Core. Failures are logged and do not fail the block, which is already committed.
    fn forward_withdrawal_transactions(&self, context: &BlockExecutionContext, commit: &CommitInfo) {
        for vote_extension in &commit.threshold_vote_extensions {
            let transaction = match withdrawal_hash(&vote_extension.extension)
                .and_then(|hash| context.withdrawal_transaction(&hash))
            {
                Some(transaction) => transaction,
                None => {
                    context.logger.warn(
                        "threshold vote extension does not name a withdrawal transaction of this block",
                    );
                    continue;
                }
            };

            let signed = with_signature(transaction, &vote_extension.signature);
            match self.core_rpc.send_raw_transaction(&signed) {
                Ok(id) => context
                    .logger
                    .debug(format_args!("sent withdrawal transaction {}", id)),
                Err(err) => context
                    .logger
                    .warn(format_args!("failed to send withdrawal transaction: {}", err)),
            }
        }
    }

    /* ↓↓↓ Query ↓↓↓ */

    pub fn query(&self, request: RequestQuery) -> ResponseQuery {
        let logger = ContextLogger::new("query");
        let metadata = self
            .latest_context
            .as_ref()
            .map(|context| QueryMetadata {
                height: context.height,
                core_chain_locked_height: context.core_chain_locked_height,
                app_hash: context.app_hash.unwrap_or_default(),
            })
            .unwrap_or_default();

        let result = wrap_in_error_handler(
            || {
                let transaction = lock(&self.transaction);
                let router = QueryRouter::new(
                    transaction.store(),
                    metadata,
                    self.configuration.max_identities_per_request,
                );
                router.route(&request)
            },
            self.configuration.respond_with_internal_error_details,
            &logger,
        );

        match result {
            Ok(value) => ResponseQuery {
                code: 0,
                log: String::new(),
                value,
                height: metadata.height,
                core_chain_locked_height: metadata.core_chain_locked_height,
            },
            Err(err) => ResponseQuery {
                code: err.code,
                log: err.message,
                value: Vec::new(),
                height: metadata.height,
                core_chain_locked_height: metadata.core_chain_locked_height,
            },
        }
    }

    /* ↓↓↓ Round execution ↓↓↓ */

    /// The height the next block must have.
    fn next_height(&self) -> Result<BlockHeight, HandlerError> {
        if let Some(context) = &self.latest_context {
            return Ok(context.height + 1);
        }
        match lock(&self.transaction).store().genesis()? {
            Some(genesis) => Ok(genesis.initial_height),
            None => Err(HandlerError::ChainState(
                "proposal received before InitChain".to_string(),
            )),
        }
    }

    /// Start a proposal round: open a fresh context, bring the masternode list and masternode identities
    /// up to the round's core height, and rotate the validator set if it is due.
    fn begin_block(
        &mut self,
        parameters: RoundParameters,
        logger: ContextLogger,
    ) -> Result<BlockExecutionContext, HandlerError> {
        let expected = self.next_height()?;
        if parameters.height != expected {
            return Err(HandlerError::UnexpectedHeight {
                expected,
                found: parameters.height,
            });
        }

        lock(&self.transaction).begin();
        self.state_repository
            .inner()
            .inner()
            .take_touched_data_contracts();
        // Contracts an earlier round of this height wrote may have been cached.
        if self.rounds.height() == Some(parameters.height) {
            for previous in self.rounds.contexts() {
                for id in previous.data_contracts.keys() {
                    self.state_repository.cache().delete(id);
                }
            }
        }

        let mut context = BlockExecutionContext::new(
            parameters.height,
            parameters.round,
            parameters.time,
            parameters.core_chain_locked_height,
            self.configuration.protocol_version,
            logger.clone(),
        );
        context.proposer_pro_tx_hash = Some(parameters.proposer_pro_tx_hash);
        context.last_commit_info = parameters.last_commit_info;
        self.scope.enter(context.block_info(), logger.clone());

        self.timer.clear_timer(ROUND_TIMER);
        self.timer.start_timer(ROUND_TIMER)?;

        let core_height = parameters.core_chain_locked_height;
        self.latest_chain_lock
            .wait_for_chain_locked_height(core_height)?;
        self.sml_tracker.update(core_height)?;

        let last_synced = lock(&self.transaction).last_synced_core_height()?;
        let synchronized = self.masternode_synchronizer.synchronize(
            &self.state_repository,
            last_synced,
            core_height,
            parameters.time,
        )?;
        if last_synced.map_or(true, |last_synced| last_synced < core_height) {
            lock(&self.transaction).set_last_synced_core_height(core_height)?;
        }
        self.publish_synchronization(core_height, &synchronized);
        self.state_repository
            .inner()
            .inner()
            .take_touched_data_contracts();

        // Rounds rotate a copy. The committed manager only changes if this round wins.
        let mut validator_set_manager = self.validator_set_manager.clone();
        if validator_set_manager.rotate(parameters.height, core_height, &context.rotation_entropy())? {
            if let Some(validator_set) = validator_set_manager.current() {
                logger.info(format_args!(
                    "rotating to quorum {} with {} validators",
                    validator_set.quorum_hash(),
                    validator_set.len()
                ));
                context.validator_set_update = Some(create_validator_set_update(validator_set));
                context.next_validator_set = Some(validator_set.clone());
            }
        }

        Ok(context)
    }

    /// Execute one transaction of the round. An invalid transaction gets a non-zero result code and
    /// leaves no trace in state.
    fn deliver_tx(
        &mut self,
        tx: &[u8],
        context: &mut BlockExecutionContext,
    ) -> Result<ExecTxResult, HandlerError> {
        context.txs.push(tx.to_vec());

        let transition = match self.executor.validate_basic(tx) {
            Ok(transition) => transition,
            Err(err) => {
                context
                    .logger
                    .debug(format_args!("invalid state transition: {}", err));
                return Ok(ExecTxResult {
                    code: err.code,
                    info: err.message,
                    gas_used: 0,
                });
            }
        };

        let snapshot = lock(&self.transaction).snapshot();
        let mut execution_context = StateTransitionExecutionContext::new();
        let result = self
            .executor
            .execute(&transition, &self.state_repository, &mut execution_context);
        let touched = self
            .state_repository
            .inner()
            .inner()
            .take_touched_data_contracts();

        match result {
            Ok(outcome) => {
                let fee = execution_context.fee();
                context.add_fees(fee);
                for withdrawal_transaction in outcome.withdrawal_transactions {
                    let hash = context.add_withdrawal_transaction(withdrawal_transaction);
                    context
                        .logger
                        .debug(format_args!("queued withdrawal transaction {}", hash));
                }
                for data_contract in touched {
                    context.add_data_contract(data_contract);
                }
                Ok(ExecTxResult {
                    code: 0,
                    info: String::new(),
                    gas_used: fee.total(),
                })
            }
            Err(ExecutionError::Consensus(err)) => {
                lock(&self.transaction).restore(snapshot);
                for data_contract in touched {
                    self.state_repository.cache().delete(&data_contract.id);
                }
                context
                    .logger
                    .debug(format_args!("state transition rejected: {}", err));
                Ok(ExecTxResult {
                    code: err.code,
                    info: err.message,
                    gas_used: 0,
                })
            }
            Err(ExecutionError::StateRepository(err)) => Err(err.into()),
        }
    }

    /// Finish the round: apply feature flags, compute the app hash, and take the round's writes out of
    /// the shared transaction.
    fn end_block(
        &mut self,
        mut context: BlockExecutionContext,
    ) -> Result<BlockExecutionContext, HandlerError> {
        let feature_flags = &self.configuration.system_contracts.feature_flags;
        let documents = self.state_repository.fetch_documents_by_owner(
            &feature_flags.contract_id,
            UPDATE_CONSENSUS_PARAMS_DOCUMENT_TYPE,
            &feature_flags.owner_id,
            &mut StateTransitionExecutionContext::new(),
        )?;
        context.consensus_param_updates = consensus_param_updates(&documents, context.height);

        let previous_app_hash = self.committed_app_hash()?;
        {
            let mut transaction = lock(&self.transaction);
            context.app_hash = Some(transaction.app_hash(&previous_app_hash));
            context.state_changes = transaction.take_pending();
        }

        let elapsed = self.timer.stop_timer(ROUND_TIMER)?;
        context.logger.info(format_args!(
            "executed {} transactions in {} ms, fees {}, app hash {}",
            context.txs.len(),
            elapsed.as_millis(),
            context.fees.total(),
            context.app_hash.unwrap_or_default()
        ));
        Ok(context)
    }

    fn committed_app_hash(&self) -> Result<CryptoHash, HandlerError> {
        Ok(lock(&self.transaction)
            .store()
            .app_hash()?
            .unwrap_or_default())
    }

    fn publish_synchronization(
        &self,
        core_height: CoreHeight,
        result: &SynchronizationResult,
    ) {
        if result.created_identities == 0
            && result.updated_identities == 0
            && result.removed_reward_shares == 0
        {
            return;
        }
        Event::publish(
            &self.event_publisher,
            Event::SynchronizeMasternodeIdentities(SynchronizeMasternodeIdentitiesEvent {
                timestamp: SystemTime::now(),
                core_height,
                created_identities: result.created_identities,
                updated_identities: result.updated_identities,
                removed_reward_shares: result.removed_reward_shares,
            }),
        );
    }
}

/// What `PrepareProposal` and `ProcessProposal` start a round with.
struct RoundParameters {
    height: BlockHeight,
    round: Round,
    time: Timestamp,
    core_chain_locked_height: CoreHeight,
    proposer_pro_tx_hash: CryptoHash,
    last_commit_info: Option<LastCommitInfo>,
}

/// The withdrawal transaction hash a vote extension carries.
fn withdrawal_hash(extension: &[u8]) -> Option<CryptoHash> {
    <[u8; 32]>::try_from(extension).ok().map(CryptoHash::new)
}

/// `transaction` with its trailing signature slot replaced by `signature`.
fn with_signature(transaction: &[u8], signature: &BlsSignature) -> Vec<u8> {
    let unsigned_len = transaction.len().saturating_sub(BLS_SIGNATURE_LENGTH);
    let mut signed = transaction[..unsigned_len].to_vec();
    signed.extend_from_slice(signature.bytes());
    signed
}
