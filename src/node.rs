/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions for starting and stopping a Drive node.
//!
//! ## Starting a node
//!
//! Build a [`DriveSpec`] with [`DriveSpec::builder`] and call [`start`](DriveSpec::start) on it:
//!
//! ```ignore
//! let drive = DriveSpec::builder()
//!     .configuration(configuration)
//!     .kv_store(kv_store)
//!     .core_rpc(JsonRpcCoreClient::new(&core_rpc_configuration)?)
//!     .zmq_subscriber(zmq_subscriber)
//!     .executor(executor)
//!     .on_commit_block(|event| println!("committed block {}", event.height))
//!     .build()
//!     .start()?;
//! ```
//!
//! `start` assembles the ABCI handlers on top of the store, optionally waits for Core to finish
//! syncing, and starts the background threads:
//! 1. The ZMQ listener, receiving Core's notifications.
//! 2. The chain lock synchronizer, keeping the latest core chain lock up to date.
//! 3. The event bus, firing the registered event handlers (only if there are any).
//! 4. The fatal error supervisor, halting the node when a background thread fails.
//!
//! It then waits for the first core chain lock. Both waits end early if the `startup_cancellation`
//! channel fires. The returned [`Drive`] handle serves ABCI requests one at a time. Plug it into an
//! ABCI server.
//!
//! ## Fatal errors
//!
//! Any error of a handler that drives consensus (`InitChain`, `PrepareProposal`, `ProcessProposal`,
//! `FinalizeBlock`), and the ZMQ listener running out of retries, is fatal. The node publishes a
//! [`FatalErrorEvent`], cancels every wait on Core, discards the uncommitted round, flushes and closes
//! the store, and answers every later request with [`FatalError::Halted`]. A ZMQ failure is acted on as
//! soon as it happens, even while a handler is blocked waiting for Core. The embedding process is
//! expected to exit.
//!
//! ## Stopping a node
//!
//! Dropping the [`Drive`] handle stops and joins every background thread.

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use typed_builder::TypedBuilder;

use crate::{
    abci::{messages::*, AbciApplication, HandlerError},
    config::Configuration,
    core_chain::{
        chain_lock_sync::ChainLockSynchronizer, wait_for_core_sync, wait_for_first_chain_lock,
        zmq::ZmqListener,
        ChainLockError, CoreRpc, LatestCoreChainLock, ZmqError, ZmqEvents,
        ZmqListenerConfiguration, ZmqSubscriber,
    },
    event_bus::*,
    events::*,
    logging::ContextLogger,
    state_transition::StateTransitionExecutor,
    storage::{lock, KVStore},
};

#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [DriveSpec]. On the builder call the following methods to construct a valid [DriveSpec].

    Required:
    - `.configuration(...)`
    - `.kv_store(...)`
    - `.core_rpc(...)`
    - `.zmq_subscriber(...)`
    - `.executor(...)`

    Optional:
    - `.wait_for_core_sync(...)`
    - `.startup_cancellation(...)`
    - `.on_commit_block(...)`
    - `.on_rotate_validator_set(...)`
    - `.on_synchronize_masternode_identities(...)`
    - `.on_update_chain_lock(...)`
    - `.on_reconnect_zmq(...)`
    - `.on_fatal_error(...)`
"))]
pub struct DriveSpec<K: KVStore, R: CoreRpc, Z: ZmqSubscriber, E: StateTransitionExecutor> {
    #[builder(setter(doc = "Set the [configuration](Configuration) of the node. Required."))]
    configuration: Configuration,
    #[builder(setter(doc = "Set the implementation of the storage engine. The argument must implement the [KVStore](crate::storage::KVStore) trait. Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the client of Core's JSON-RPC interface. The argument must implement the [CoreRpc](crate::core_chain::CoreRpc) trait. Required."))]
    core_rpc: R,
    #[builder(setter(doc = "Set the subscriber of Core's ZMQ notifications. The argument must implement the [ZmqSubscriber](crate::core_chain::ZmqSubscriber) trait. Required."))]
    zmq_subscriber: Z,
    #[builder(setter(doc = "Set the state-transition engine. The argument must implement the [StateTransitionExecutor](crate::state_transition::StateTransitionExecutor) trait. Required."))]
    executor: E,
    #[builder(default, setter(doc = "Wait for Core to report it is synced before starting? Defaults to false."))]
    wait_for_core_sync: bool,
    #[builder(default, setter(strip_option, doc = "Set a channel that cancels waiting for Core to sync and for the first chain lock. Optional."))]
    startup_cancellation: Option<Receiver<()>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is committed. Optional."))]
    on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RotateValidatorSetEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RotateValidatorSetEvent>),
    doc = "Register a handler closure to be invoked after a new validator quorum is committed. Optional."))]
    on_rotate_validator_set: Option<HandlerPtr<RotateValidatorSetEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SynchronizeMasternodeIdentitiesEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SynchronizeMasternodeIdentitiesEvent>),
    doc = "Register a handler closure to be invoked after masternode identities are synchronized with the masternode list. Optional."))]
    on_synchronize_masternode_identities: Option<HandlerPtr<SynchronizeMasternodeIdentitiesEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateChainLockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateChainLockEvent>),
    doc = "Register a handler closure to be invoked after a new chain lock is confirmed. Optional."))]
    on_update_chain_lock: Option<HandlerPtr<UpdateChainLockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReconnectZmqEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReconnectZmqEvent>),
    doc = "Register a handler closure to be invoked after the ZMQ connection to Core fails and is retried. Optional."))]
    on_reconnect_zmq: Option<HandlerPtr<ReconnectZmqEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&FatalErrorEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FatalErrorEvent>),
    doc = "Register a handler closure to be invoked when the node halts on a fatal error. Optional."))]
    on_fatal_error: Option<HandlerPtr<FatalErrorEvent>>,
}

impl<K: KVStore, R: CoreRpc, Z: ZmqSubscriber, E: StateTransitionExecutor> DriveSpec<K, R, Z, E> {
    pub fn start(self) -> Result<Drive<K, R, E>, FatalError> {
        let core_rpc = Arc::new(self.core_rpc);

        let event_handlers = EventHandlers::new(
            self.configuration.log_events,
            self.on_commit_block,
            self.on_rotate_validator_set,
            self.on_synchronize_masternode_identities,
            self.on_update_chain_lock,
            self.on_reconnect_zmq,
            self.on_fatal_error,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let latest_chain_lock = LatestCoreChainLock::new();
        let zmq_events = ZmqEvents::new();

        let application = AbciApplication::new(
            self.configuration.clone(),
            self.kv_store,
            Arc::clone(&core_rpc),
            latest_chain_lock.clone(),
            self.executor,
            event_publisher.clone(),
        )
        .map_err(FatalError::Startup)?;

        // Without a cancellation channel, the startup waits only end once they succeed.
        let (_never_cancel, never_cancelled) = mpsc::channel();
        let cancellation = self.startup_cancellation.unwrap_or(never_cancelled);

        if self.wait_for_core_sync {
            wait_for_core_sync(
                core_rpc.as_ref(),
                self.configuration.core_sync_poll_interval,
                &cancellation,
            )
            .map_err(FatalError::CoreSync)?;
        }

        let (fatal_error_sender, fatal_errors) = mpsc::channel();

        let (zmq_listener_shutdown, zmq_listener_shutdown_receiver) = mpsc::channel();
        let zmq_listener = ZmqListener::new(
            self.zmq_subscriber,
            ZmqListenerConfiguration {
                endpoint: self.configuration.zmq_endpoint.clone(),
                max_retry_count: self.configuration.zmq_max_retry_count,
                retry_interval: self.configuration.zmq_retry_interval,
            },
            zmq_events.clone(),
            event_publisher.clone(),
            fatal_error_sender,
            zmq_listener_shutdown_receiver,
        )
        .start();

        let (chain_lock_synchronizer_shutdown, chain_lock_synchronizer_shutdown_receiver) =
            mpsc::channel();
        let chain_lock_synchronizer = ChainLockSynchronizer::new(
            Arc::clone(&core_rpc),
            zmq_events.clone(),
            latest_chain_lock.clone(),
            self.configuration.chain_lock_mode,
            event_publisher.clone(),
            chain_lock_synchronizer_shutdown_receiver,
        )
        .start();

        let (event_bus_shutdown, event_bus_shutdown_receiver) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let event_bus = match (event_subscriber, event_bus_shutdown_receiver) {
            (Some(event_subscriber), Some(event_bus_shutdown_receiver)) => Some(start_event_bus(
                event_handlers,
                event_subscriber,
                event_bus_shutdown_receiver,
            )),
            _ => None,
        };

        let state = Arc::new(NodeState {
            application: Mutex::new(application),
            latest_chain_lock,
            zmq_events,
            halted: AtomicBool::new(false),
            store_closed: AtomicBool::new(false),
            event_publisher,
        });
        let fatal_error_supervisor = start_fatal_error_supervisor(Arc::clone(&state), fatal_errors);

        // From here on, dropping `drive` on an error joins every thread started above.
        let drive = Drive {
            state,
            fatal_error_supervisor: Some(fatal_error_supervisor),
            zmq_listener: Some(zmq_listener),
            zmq_listener_shutdown,
            chain_lock_synchronizer: Some(chain_lock_synchronizer),
            chain_lock_synchronizer_shutdown,
            event_bus,
            event_bus_shutdown,
        };

        // The node serves requests only once it holds a chain lock.
        wait_for_first_chain_lock(&drive.state.latest_chain_lock, &cancellation)
            .map_err(FatalError::CoreSync)?;

        Ok(drive)
    }
}

/// A handle to a running Drive node. Serves ABCI requests one at a time. When this value is dropped, all
/// background threads are gracefully shut down.
pub struct Drive<K: KVStore, R: CoreRpc, E: StateTransitionExecutor> {
    state: Arc<NodeState<K, R, E>>,
    fatal_error_supervisor: Option<JoinHandle<()>>,
    zmq_listener: Option<JoinHandle<()>>,
    zmq_listener_shutdown: Sender<()>,
    chain_lock_synchronizer: Option<JoinHandle<()>>,
    chain_lock_synchronizer_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<K: KVStore, R: CoreRpc, E: StateTransitionExecutor> Drive<K, R, E> {
    pub fn info(&self, request: RequestInfo) -> Result<ResponseInfo, FatalError> {
        self.handle("info", |application| application.info(request))
    }

    pub fn init_chain(&self, request: RequestInitChain) -> Result<ResponseInitChain, FatalError> {
        self.handle("initChain", |application| application.init_chain(request))
    }

    pub fn check_tx(&self, request: RequestCheckTx) -> Result<ResponseCheckTx, FatalError> {
        self.handle("checkTx", |application| Ok(application.check_tx(request)))
    }

    pub fn prepare_proposal(
        &self,
        request: RequestPrepareProposal,
    ) -> Result<ResponsePrepareProposal, FatalError> {
        self.handle("prepareProposal", |application| {
            application.prepare_proposal(request)
        })
    }

    pub fn process_proposal(
        &self,
        request: RequestProcessProposal,
    ) -> Result<ResponseProcessProposal, FatalError> {
        self.handle("processProposal", |application| {
            application.process_proposal(request)
        })
    }

    pub fn extend_vote(&self, request: RequestExtendVote) -> Result<ResponseExtendVote, FatalError> {
        self.handle("extendVote", |application| Ok(application.extend_vote(request)))
    }

    pub fn verify_vote_extension(
        &self,
        request: RequestVerifyVoteExtension,
    ) -> Result<ResponseVerifyVoteExtension, FatalError> {
        self.handle("verifyVoteExtension", |application| {
            Ok(application.verify_vote_extension(request))
        })
    }

    pub fn finalize_block(
        &self,
        request: RequestFinalizeBlock,
    ) -> Result<ResponseFinalizeBlock, FatalError> {
        self.handle("finalizeBlock", |application| {
            application.finalize_block(request)
        })
    }

    pub fn query(&self, request: RequestQuery) -> Result<ResponseQuery, FatalError> {
        self.handle("query", |application| Ok(application.query(request)))
    }

    /// The chain lock the node currently builds on.
    pub fn latest_chain_lock(&self) -> &LatestCoreChainLock {
        &self.state.latest_chain_lock
    }

    pub fn is_halted(&self) -> bool {
        self.state.halted.load(Ordering::SeqCst)
    }

    fn handle<T>(
        &self,
        abci_method: &str,
        handler: impl FnOnce(&mut AbciApplication<K, R, E>) -> Result<T, HandlerError>,
    ) -> Result<T, FatalError> {
        if self.is_halted() {
            return Err(FatalError::Halted);
        }

        let mut application = self.state.application();
        match handler(&mut application) {
            Ok(response) => Ok(response),
            Err(error) => {
                let logger = application.in_flight_logger(abci_method);
                let error = FatalError::Handler { logger, error };
                self.state.halt(&error);
                self.state.close_store(&mut application);
                Err(error)
            }
        }
    }
}

impl<K: KVStore, R: CoreRpc, E: StateTransitionExecutor> Drop for Drive<K, R, E> {
    fn drop(&mut self) {
        // Threads that already exited have dropped their receivers, so sends may fail.
        if let Some(shutdown) = &self.event_bus_shutdown {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }

        // Unblock the chain lock synchronizer if it is waiting for a block.
        let _ = self.chain_lock_synchronizer_shutdown.send(());
        self.state.zmq_events.close();
        if let Some(chain_lock_synchronizer) = self.chain_lock_synchronizer.take() {
            let _ = chain_lock_synchronizer.join();
        }

        let _ = self.zmq_listener_shutdown.send(());
        if let Some(zmq_listener) = self.zmq_listener.take() {
            let _ = zmq_listener.join();
        }

        // The supervisor returns once the zmq listener, the only sender of fatal errors, is gone.
        if let Some(fatal_error_supervisor) = self.fatal_error_supervisor.take() {
            let _ = fatal_error_supervisor.join();
        }

        self.state.latest_chain_lock.close();
    }
}

/// Everything the request path and the fatal error supervisor share.
struct NodeState<K: KVStore, R: CoreRpc, E: StateTransitionExecutor> {
    application: Mutex<AbciApplication<K, R, E>>,
    latest_chain_lock: LatestCoreChainLock,
    zmq_events: ZmqEvents,
    halted: AtomicBool,
    store_closed: AtomicBool,
    event_publisher: Option<Sender<Event>>,
}

impl<K: KVStore, R: CoreRpc, E: StateTransitionExecutor> NodeState<K, R, E> {
    fn application(&self) -> MutexGuard<'_, AbciApplication<K, R, E>> {
        self.application
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The first half of the single shutdown path: refuse new requests, report `error` and cancel every
    /// wait on Core. Needs no lock, so it also unblocks a handler that is waiting on Core.
    fn halt(&self, error: &FatalError) {
        if self.halted.swap(true, Ordering::SeqCst) {
            return;
        }

        match error {
            FatalError::Handler { logger, .. } => logger.error(format_args!("halting: {}", error)),
            _ => ContextLogger::new("halt").error(format_args!("halting: {}", error)),
        }
        Event::publish(
            &self.event_publisher,
            Event::FatalError(FatalErrorEvent {
                timestamp: SystemTime::now(),
                message: error.to_string(),
            }),
        );

        self.latest_chain_lock.close();
        self.zmq_events.close();
    }

    /// The second half: drop the uncommitted round, then flush and close the store. Runs once, by
    /// whichever of the request path and the supervisor gets to the application first.
    fn close_store(&self, application: &mut AbciApplication<K, R, E>) {
        if self.store_closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut transaction = lock(application.transaction());
        transaction.rollback();
        if let Err(err) = transaction.store_mut().flush() {
            ContextLogger::new("halt").error(format_args!("failed to flush storage: {}", err));
        }
        transaction.store_mut().close();
    }
}

/// Halt the node on the first fatal error a background thread reports. Returns once every sender of
/// fatal errors is gone.
fn start_fatal_error_supervisor<K: KVStore, R: CoreRpc, E: StateTransitionExecutor>(
    state: Arc<NodeState<K, R, E>>,
    fatal_errors: Receiver<FatalError>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(error) = fatal_errors.recv() {
            state.halt(&error);
            // A handler blocked on Core was unblocked above, so the application lock frees up.
            let mut application = state.application();
            state.close_store(&mut application);
        }
    })
}

/// An error after which the node can no longer take part in consensus.
#[derive(Debug)]
pub enum FatalError {
    /// The ABCI handlers could not be assembled on top of the store.
    Startup(HandlerError),
    /// Waiting for Core to sync or for the first chain lock was cancelled.
    CoreSync(ChainLockError),
    ZmqMaxRetriesReached { attempts: u32, last_error: ZmqError },
    /// A handler failed. `logger` is the logger of the request in flight.
    Handler { logger: ContextLogger, error: HandlerError },
    /// The node halted on an earlier fatal error.
    Halted,
}

impl Display for FatalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::Startup(err) => write!(f, "failed to start: {}", err),
            FatalError::CoreSync(err) => write!(f, "failed to wait for core to sync: {}", err),
            FatalError::ZmqMaxRetriesReached {
                attempts,
                last_error,
            } => write!(
                f,
                "gave up on zmq after {} failed attempts, last error: {}",
                attempts, last_error
            ),
            FatalError::Handler { logger, error } => {
                write!(f, "{} failed: {}", logger.abci_method(), error)
            }
            FatalError::Halted => f.write_str("the node has halted"),
        }
    }
}

impl std::error::Error for FatalError {}
