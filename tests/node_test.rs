use std::{
    sync::mpsc::{self, Receiver},
    thread,
    time::{Duration, Instant},
};

use drive_abci::{
    abci::{messages::RequestInfo, HandlerError},
    config::Configuration,
    core_chain::{zmq::TOPIC_RAW_CHAIN_LOCK_SIG, ChainLockError},
    node::{Drive, DriveSpec, FatalError},
    types::{
        chain_lock::ChainLock,
        data_types::{BlockHeight, CoreHeight},
    },
};
use log::LevelFilter;

mod common;

use crate::common::{
    executor::TestExecutor,
    fixtures::{
        chain_lock, configuration, finalize_request, init_chain_request, populated_core,
        prepare_request, process_request, CORE_TIP,
    },
    logging::setup_logger,
    mem_db::MemDB,
    mock_core::MockCore,
    mock_zmq::{mock_zmq, MockZmqPublisher},
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

type TestDrive = Drive<MemDB, MockCore, TestExecutor>;

/// A `rawchainlocksig` notification: a raw block, then the chain lock with its block hash in Core's
/// internal byte order.
fn raw_chain_lock_sig(chain_lock: &ChainLock) -> Vec<u8> {
    let mut payload = vec![0xAB; 80];
    payload.extend_from_slice(&chain_lock.height.int().to_le_bytes());
    let mut internal = chain_lock.block_hash.bytes();
    internal.reverse();
    payload.extend_from_slice(&internal);
    payload.extend_from_slice(chain_lock.signature.bytes());
    payload
}

/// Start a node whose fatal errors and commits are forwarded to the returned receivers.
fn start(
    configuration: Configuration,
    db: &MemDB,
    failing_connects: usize,
) -> (TestDrive, MockZmqPublisher, Receiver<String>, Receiver<BlockHeight>) {
    let (publisher, subscriber) = mock_zmq(failing_connects);
    let (fatal_error_sender, fatal_errors) = mpsc::channel();
    let (commit_sender, commits) = mpsc::channel();
    let drive = DriveSpec::builder()
        .configuration(configuration)
        .kv_store(db.clone())
        .core_rpc(populated_core())
        .zmq_subscriber(subscriber)
        .executor(TestExecutor)
        .on_fatal_error(move |event| {
            let _ = fatal_error_sender.send(event.message.clone());
        })
        .on_commit_block(move |event| {
            let _ = commit_sender.send(event.height);
        })
        .build()
        .start()
        .unwrap();
    (drive, publisher, fatal_errors, commits)
}

#[test]
fn drive_commits_blocks_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Start a node and initialize the chain.
    let db = MemDB::new();
    let (drive, _publisher, fatal_errors, commits) = start(configuration(), &db, 0);
    drive.init_chain(init_chain_request()).unwrap();

    // 2. The node only started once the chain lock synchronizer picked up Core's best chain lock.
    assert_eq!(
        drive.latest_chain_lock().get().map(|chain_lock| chain_lock.height),
        Some(CORE_TIP)
    );

    // 3. Run height 1 through every consensus handler.
    let prepared = drive
        .prepare_proposal(prepare_request(1, 0, Vec::new(), CORE_TIP))
        .unwrap();
    let processed = drive
        .process_proposal(process_request(
            1,
            0,
            Vec::new(),
            CORE_TIP,
            Some(chain_lock(CORE_TIP)),
        ))
        .unwrap();
    assert_eq!(processed.app_hash, Some(prepared.app_hash));
    drive.finalize_block(finalize_request(1, 0, Vec::new())).unwrap();

    // 4. The commit reaches the registered handler, and the block is reported by Info.
    assert_eq!(
        commits.recv_timeout(EVENT_TIMEOUT).unwrap(),
        BlockHeight::new(1)
    );
    let info = drive.info(RequestInfo::default()).unwrap();
    assert_eq!(info.last_block_height, BlockHeight::new(1));
    assert_eq!(info.last_block_app_hash, processed.app_hash);
    assert!(fatal_errors.try_recv().is_err());
    assert!(!drive.is_halted());
}

#[test]
fn handler_error_halts_drive_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Start a node and initialize the chain.
    let db = MemDB::new();
    let (drive, _publisher, fatal_errors, _commits) = start(configuration(), &db, 0);
    drive.init_chain(init_chain_request()).unwrap();

    // 2. Initializing it again fails the handler, which halts the node.
    match drive.init_chain(init_chain_request()) {
        Err(FatalError::Handler {
            error: HandlerError::ChainState(_),
            ..
        }) => (),
        other => panic!("expected a chain state error, got {:?}", other.err()),
    }
    assert!(drive.is_halted());
    assert!(!fatal_errors.recv_timeout(EVENT_TIMEOUT).unwrap().is_empty());

    // 3. The store is flushed and closed.
    assert!(db.flush_count() > 0);
    assert!(db.is_closed());

    // 4. Every later request is refused.
    assert!(matches!(
        drive.info(RequestInfo::default()),
        Err(FatalError::Halted)
    ));
}

#[test]
fn zmq_max_retries_halts_drive_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Start a node whose ZMQ connection never succeeds, retrying twice.
    let db = MemDB::new();
    let mut configuration = configuration();
    configuration.zmq_max_retry_count = 2;
    configuration.zmq_retry_interval = Duration::from_millis(10);
    let (drive, _publisher, fatal_errors, _commits) = start(configuration, &db, usize::MAX);

    // 2. The listener gives up after the third failed attempt, and the node halts without being asked.
    let message = fatal_errors.recv_timeout(EVENT_TIMEOUT).unwrap();
    assert!(message.contains("zmq after 3 failed attempts"));
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while !db.is_closed() {
        assert!(Instant::now() < deadline, "the store was never closed");
        thread::sleep(Duration::from_millis(10));
    }
    assert!(drive.is_halted());

    // 3. Every later request is refused.
    assert!(matches!(
        drive.info(RequestInfo::default()),
        Err(FatalError::Halted)
    ));
}

#[test]
fn zmq_max_retries_unblocks_waiting_handler_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Start a node whose ZMQ connection never succeeds, and initialize the chain before it gives up.
    let db = MemDB::new();
    let mut configuration = configuration();
    configuration.zmq_max_retry_count = 2;
    configuration.zmq_retry_interval = Duration::from_millis(200);
    let (drive, _publisher, fatal_errors, _commits) = start(configuration, &db, usize::MAX);
    drive.init_chain(init_chain_request()).unwrap();

    // 2. Propose on a core height that is never chain-locked, so the handler waits on Core.
    let (result_sender, results) = mpsc::channel();
    thread::scope(|scope| {
        scope.spawn(|| {
            let result = drive.prepare_proposal(prepare_request(
                1,
                0,
                Vec::new(),
                CoreHeight::new(CORE_TIP.int() + 5),
            ));
            let _ = result_sender.send(result.is_err());
        });

        // 3. Giving up on ZMQ cancels the wait, and the handler fails.
        assert!(results.recv_timeout(EVENT_TIMEOUT).unwrap());
    });

    // 4. The node halted on the ZMQ error, and closed the store before the handler returned.
    assert!(fatal_errors
        .recv_timeout(EVENT_TIMEOUT)
        .unwrap()
        .contains("zmq"));
    assert!(drive.is_halted());
    assert!(db.is_closed());
    assert!(db.flush_count() > 0);
}

#[test]
fn start_waits_for_first_chain_lock_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Start a node against a Core that has no chain lock yet.
    let core = populated_core();
    core.state().best_chain_lock = None;
    let (publisher, subscriber) = mock_zmq(0);
    let (started_sender, started) = mpsc::channel();
    let db = MemDB::new();
    let spec = DriveSpec::builder()
        .configuration(configuration())
        .kv_store(db.clone())
        .core_rpc(core)
        .zmq_subscriber(subscriber)
        .executor(TestExecutor)
        .build();
    let starting = thread::spawn(move || {
        let drive = spec.start();
        let _ = started_sender.send(());
        drive
    });

    // 2. Startup does not finish without a chain lock.
    assert!(started.recv_timeout(Duration::from_millis(300)).is_err());

    // 3. Once Core announces one, the node starts, already holding it.
    publisher.publish(TOPIC_RAW_CHAIN_LOCK_SIG, raw_chain_lock_sig(&chain_lock(CORE_TIP)));
    started.recv_timeout(EVENT_TIMEOUT).unwrap();
    let drive = match starting.join().unwrap() {
        Ok(drive) => drive,
        Err(error) => panic!("failed to start: {}", error),
    };
    assert_eq!(
        drive.latest_chain_lock().get().map(|chain_lock| chain_lock.height),
        Some(CORE_TIP)
    );
    drive.init_chain(init_chain_request()).unwrap();
}

#[test]
fn startup_cancelled_while_waiting_for_chain_lock_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Start a node against a Core that never produces a chain lock.
    let core = populated_core();
    core.state().best_chain_lock = None;
    let (_publisher, subscriber) = mock_zmq(0);
    let (cancel, cancellation) = mpsc::channel();
    let spec = DriveSpec::builder()
        .configuration(configuration())
        .kv_store(MemDB::new())
        .core_rpc(core)
        .zmq_subscriber(subscriber)
        .executor(TestExecutor)
        .startup_cancellation(cancellation)
        .build();
    let starting = thread::spawn(move || spec.start().err());

    // 2. Cancelling ends the wait with an error, after every started thread was joined.
    thread::sleep(Duration::from_millis(100));
    cancel.send(()).unwrap();
    assert!(matches!(
        starting.join().unwrap(),
        Some(FatalError::CoreSync(ChainLockError::Shutdown))
    ));
}
