/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](ZmqSubscriber) for pluggable ZMQ subscriptions to Core, and the listener thread
//! that turns Core's notifications into typed [`ZmqEvents`].
//!
//! ## Reconnection
//!
//! When connecting or receiving fails, the listener disconnects, waits for the configured retry
//! interval (plus a small random jitter so that a fleet of nodes does not reconnect in lockstep), and
//! connects again. Every failed attempt publishes a [`ReconnectZmqEvent`]. Once more than
//! `max_retry_count` consecutive attempts have failed, the listener reports a
//! [`FatalError::ZmqMaxRetriesReached`] and exits. A successful receive resets the count.

use std::fmt::{self, Display, Formatter};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use rand::Rng;

use crate::{
    events::{Event, ReconnectZmqEvent},
    logging::LOG_TARGET,
    node::FatalError,
    types::{chain_lock::ChainLock, data_types::CryptoHash},
};

use super::subject::Subject;

/// Topic carrying a raw block followed by the chain lock that locked it.
pub const TOPIC_RAW_CHAIN_LOCK_SIG: &str = "rawchainlocksig";

/// Topic carrying the 32-byte hash of every new block.
pub const TOPIC_HASH_BLOCK: &str = "hashblock";

/// How long a single receive blocks before the listener checks for shutdown.
const RECEIVE_TIMEOUT: Duration = Duration::from_millis(50);

pub trait ZmqSubscriber: Send + 'static {
    /// Connect to `endpoint` and subscribe to `topics`.
    fn connect(&mut self, endpoint: &str, topics: &[&str]) -> Result<(), ZmqError>;

    /// Receive one message, waiting at most `timeout`. Returns `Ok(None)` if none arrived in time.
    fn recv(&mut self, timeout: Duration) -> Result<Option<ZmqMessage>, ZmqError>;

    fn disconnect(&mut self);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZmqMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ZmqError {
    Connect(String),
    Receive(String),
}

impl Display for ZmqError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ZmqError::Connect(reason) => write!(f, "zmq connect failed: {}", reason),
            ZmqError::Receive(reason) => write!(f, "zmq receive failed: {}", reason),
        }
    }
}

impl std::error::Error for ZmqError {}

/// The typed notifications Core publishes over ZMQ.
#[derive(Clone, Default)]
pub struct ZmqEvents {
    pub hash_block: Subject<CryptoHash>,
    pub raw_chain_lock_sig: Subject<ChainLock>,
}

impl ZmqEvents {
    pub fn new() -> ZmqEvents {
        ZmqEvents::default()
    }

    /// Decode `message` and publish it on the matching subject. Messages that fail to decode, or
    /// arrive on other topics, are dropped.
    pub fn dispatch(&self, message: &ZmqMessage) {
        match message.topic.as_str() {
            TOPIC_HASH_BLOCK => match <[u8; 32]>::try_from(message.payload.as_slice()) {
                Ok(hash) => {
                    self.hash_block.publish(CryptoHash::new(hash));
                }
                Err(_) => log::warn!(
                    target: LOG_TARGET,
                    "dropping {} message of {} bytes",
                    TOPIC_HASH_BLOCK,
                    message.payload.len()
                ),
            },
            TOPIC_RAW_CHAIN_LOCK_SIG => match ChainLock::from_raw_message(&message.payload) {
                Some(chain_lock) => {
                    self.raw_chain_lock_sig.publish(chain_lock);
                }
                None => log::warn!(
                    target: LOG_TARGET,
                    "dropping {} message of {} bytes",
                    TOPIC_RAW_CHAIN_LOCK_SIG,
                    message.payload.len()
                ),
            },
            other => log::debug!(target: LOG_TARGET, "ignoring zmq topic {}", other),
        }
    }

    /// Disconnect every subscription, cancelling waits on Core notifications.
    pub fn close(&self) {
        self.hash_block.close();
        self.raw_chain_lock_sig.close();
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZmqListenerConfiguration {
    pub endpoint: String,
    pub max_retry_count: u32,
    pub retry_interval: Duration,
}

pub(crate) struct ZmqListener<Z: ZmqSubscriber> {
    subscriber: Z,
    configuration: ZmqListenerConfiguration,
    events: ZmqEvents,
    event_publisher: Option<Sender<Event>>,
    fatal_errors: Sender<FatalError>,
    shutdown_signal: Receiver<()>,
    failed_attempts: u32,
    connected: bool,
}

impl<Z: ZmqSubscriber> ZmqListener<Z> {
    pub(crate) fn new(
        subscriber: Z,
        configuration: ZmqListenerConfiguration,
        events: ZmqEvents,
        event_publisher: Option<Sender<Event>>,
        fatal_errors: Sender<FatalError>,
        shutdown_signal: Receiver<()>,
    ) -> ZmqListener<Z> {
        ZmqListener {
            subscriber,
            configuration,
            events,
            event_publisher,
            fatal_errors,
            shutdown_signal,
            failed_attempts: 0,
            connected: false,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || {
            loop {
                match self.shutdown_signal.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) => (),
                }

                if let Err(err) = self.poll() {
                    if !self.handle_failure(err) {
                        break;
                    }
                }
            }
            self.subscriber.disconnect();
        })
    }

    fn poll(&mut self) -> Result<(), ZmqError> {
        if !self.connected {
            self.subscriber.connect(
                &self.configuration.endpoint,
                &[TOPIC_RAW_CHAIN_LOCK_SIG, TOPIC_HASH_BLOCK],
            )?;
            self.connected = true;
            log::info!(
                target: LOG_TARGET,
                "connected to zmq endpoint {}",
                self.configuration.endpoint
            );
        }

        let message = self.subscriber.recv(RECEIVE_TIMEOUT)?;
        self.failed_attempts = 0;
        if let Some(message) = message {
            self.events.dispatch(&message);
        }
        Ok(())
    }

    /// Record a failed attempt and wait before the next one. Returns whether the listener should keep
    /// running.
    fn handle_failure(&mut self, err: ZmqError) -> bool {
        self.subscriber.disconnect();
        self.connected = false;
        self.failed_attempts += 1;

        Event::publish(
            &self.event_publisher,
            Event::ReconnectZmq(ReconnectZmqEvent {
                timestamp: SystemTime::now(),
                attempt: self.failed_attempts,
                reason: err.to_string(),
            }),
        );

        if self.failed_attempts > self.configuration.max_retry_count {
            let _ = self.fatal_errors.send(FatalError::ZmqMaxRetriesReached {
                attempts: self.failed_attempts,
                last_error: err,
            });
            return false;
        }

        match self.shutdown_signal.recv_timeout(self.retry_delay()) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
            Err(RecvTimeoutError::Timeout) => true,
        }
    }

    fn retry_delay(&self) -> Duration {
        let interval = self.configuration.retry_interval;
        let max_jitter = (interval.as_millis() / 10) as u64;
        let jitter = if max_jitter > 0 {
            rand::thread_rng().gen_range(0, max_jitter)
        } else {
            0
        };
        interval + Duration::from_millis(jitter)
    }
}
