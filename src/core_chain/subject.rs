/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A typed publish/subscribe cell.
//!
//! Every [`Subscription`] owns the receiving end of a channel. Publishing a value sends a clone of it to
//! every live subscription. Dropping a subscription unsubscribes it. A *replaying* subject additionally
//! remembers the last value it published, and sends it to every new subscription straight away, so
//! that "read the current value or wait for the next one" never misses an update published in between.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

pub struct Subject<T> {
    state: Arc<Mutex<SubjectState<T>>>,
}

struct SubjectState<T> {
    next_id: u64,
    subscribers: BTreeMap<u64, Sender<T>>,
    latest: Option<T>,
    replay_latest: bool,
    closed: bool,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Subject {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Subject<T> {
    /// A subject that only delivers values published after a subscription was made.
    pub fn new() -> Subject<T> {
        Self::with_replay(false)
    }

    /// A subject that delivers its latest value to every new subscription.
    pub fn replaying() -> Subject<T> {
        Self::with_replay(true)
    }

    fn with_replay(replay_latest: bool) -> Subject<T> {
        Subject {
            state: Arc::new(Mutex::new(SubjectState {
                next_id: 0,
                subscribers: BTreeMap::new(),
                latest: None,
                replay_latest,
                closed: false,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SubjectState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (sender, receiver) = mpsc::channel();
        let mut state = self.state();
        let id = state.next_id;
        state.next_id += 1;

        if state.replay_latest {
            if let Some(latest) = &state.latest {
                let _ = sender.send(latest.clone());
            }
        }
        // A closed subject hands out subscriptions that are already disconnected.
        if !state.closed {
            state.subscribers.insert(id, sender);
        }

        Subscription {
            id,
            receiver,
            subject: Arc::downgrade(&self.state),
        }
    }

    /// Send `value` to every subscription. Returns the number of subscriptions it reached.
    pub fn publish(&self, value: T) -> usize {
        self.publish_if(value, |_| true).unwrap_or(0)
    }

    /// Publish `value` only if `predicate` holds for the latest published value. Returns `None` if
    /// `value` was not published, and the number of subscriptions it reached otherwise.
    ///
    /// The check and the publication happen under the same lock, so two concurrent calls cannot both
    /// pass the check against the same latest value.
    pub fn publish_if(&self, value: T, predicate: impl FnOnce(Option<&T>) -> bool) -> Option<usize> {
        let mut state = self.state();
        if state.closed || !predicate(state.latest.as_ref()) {
            return None;
        }

        state
            .subscribers
            .retain(|_, subscriber| subscriber.send(value.clone()).is_ok());
        let reached = state.subscribers.len();
        state.latest = Some(value);
        Some(reached)
    }

    pub fn latest(&self) -> Option<T> {
        self.state().latest.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state().subscribers.len()
    }

    /// Disconnect every subscription. Their pending and future `recv` calls fail once they have drained
    /// what was already published.
    pub fn close(&self) {
        let mut state = self.state();
        state.closed = true;
        state.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

/// The receiving end of a [`Subject`]. Unsubscribes when dropped.
pub struct Subscription<T> {
    id: u64,
    receiver: Receiver<T>,
    subject: Weak<Mutex<SubjectState<T>>>,
}

impl<T> Subscription<T> {
    pub fn recv(&self) -> Result<T, RecvError> {
        self.receiver.recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(state) = self.subject.upgrade() {
            state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .subscribers
                .remove(&self.id);
        }
    }
}
