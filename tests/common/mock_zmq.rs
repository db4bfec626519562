//! A channel-backed implementation of [`ZmqSubscriber`].

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    time::Duration,
};

use drive_abci::{
    core_chain::{zmq::TOPIC_HASH_BLOCK, ZmqError, ZmqMessage, ZmqSubscriber},
    types::data_types::CryptoHash,
};

/// The publishing end of a mock ZMQ connection.
#[derive(Clone)]
pub(crate) struct MockZmqPublisher(Sender<ZmqMessage>);

impl MockZmqPublisher {
    pub(crate) fn publish(&self, topic: &str, payload: Vec<u8>) {
        let _ = self.0.send(ZmqMessage {
            topic: topic.to_string(),
            payload,
        });
    }

    pub(crate) fn publish_hash_block(&self, hash: &CryptoHash) {
        self.publish(TOPIC_HASH_BLOCK, hash.bytes().to_vec())
    }
}

pub(crate) struct MockZmqSubscriber {
    messages: Receiver<ZmqMessage>,
    /// Number of connection attempts to fail before connecting succeeds.
    failing_connects: usize,
    connect_attempts: Arc<AtomicUsize>,
}

impl MockZmqSubscriber {
    pub(crate) fn connect_attempts(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.connect_attempts)
    }
}

/// Create a connected publisher and subscriber pair. The subscriber fails its first `failing_connects`
/// connection attempts.
pub(crate) fn mock_zmq(failing_connects: usize) -> (MockZmqPublisher, MockZmqSubscriber) {
    let (sender, receiver) = mpsc::channel();
    (
        MockZmqPublisher(sender),
        MockZmqSubscriber {
            messages: receiver,
            failing_connects,
            connect_attempts: Arc::new(AtomicUsize::new(0)),
        },
    )
}

impl ZmqSubscriber for MockZmqSubscriber {
    fn connect(&mut self, endpoint: &str, _topics: &[&str]) -> Result<(), ZmqError> {
        let attempt = self.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failing_connects {
            return Err(ZmqError::Connect(format!("{} refused the connection", endpoint)));
        }
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<ZmqMessage>, ZmqError> {
        match self.messages.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ZmqError::Receive("publisher went away".to_string()))
            }
        }
    }

    fn disconnect(&mut self) {}
}
