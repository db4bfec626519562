/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which receives [events](crate::events) published by the other components of
//! the node and fires the handlers registered for them.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// How long the event bus waits for an event before checking for shutdown again.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) commit_block_handlers: Vec<HandlerPtr<CommitBlockEvent>>,
    pub(crate) rotate_validator_set_handlers: Vec<HandlerPtr<RotateValidatorSetEvent>>,
    pub(crate) synchronize_masternode_identities_handlers:
        Vec<HandlerPtr<SynchronizeMasternodeIdentitiesEvent>>,
    pub(crate) update_chain_lock_handlers: Vec<HandlerPtr<UpdateChainLockEvent>>,
    pub(crate) reconnect_zmq_handlers: Vec<HandlerPtr<ReconnectZmqEvent>>,
    pub(crate) fatal_error_handlers: Vec<HandlerPtr<FatalErrorEvent>>,
}

impl EventHandlers {
    /// Collect the user's handlers, adding the logging handler of every event type first if
    /// `log_events` is set.
    pub(crate) fn new(
        log_events: bool,
        on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
        on_rotate_validator_set: Option<HandlerPtr<RotateValidatorSetEvent>>,
        on_synchronize_masternode_identities: Option<HandlerPtr<SynchronizeMasternodeIdentitiesEvent>>,
        on_update_chain_lock: Option<HandlerPtr<UpdateChainLockEvent>>,
        on_reconnect_zmq: Option<HandlerPtr<ReconnectZmqEvent>>,
        on_fatal_error: Option<HandlerPtr<FatalErrorEvent>>,
    ) -> EventHandlers {
        let mut handlers = EventHandlers::default();

        if log_events {
            handlers.commit_block_handlers.push(CommitBlockEvent::get_logger());
            handlers
                .rotate_validator_set_handlers
                .push(RotateValidatorSetEvent::get_logger());
            handlers
                .synchronize_masternode_identities_handlers
                .push(SynchronizeMasternodeIdentitiesEvent::get_logger());
            handlers
                .update_chain_lock_handlers
                .push(UpdateChainLockEvent::get_logger());
            handlers.reconnect_zmq_handlers.push(ReconnectZmqEvent::get_logger());
            handlers.fatal_error_handlers.push(FatalErrorEvent::get_logger());
        }

        handlers.commit_block_handlers.extend(on_commit_block);
        handlers
            .rotate_validator_set_handlers
            .extend(on_rotate_validator_set);
        handlers
            .synchronize_masternode_identities_handlers
            .extend(on_synchronize_masternode_identities);
        handlers.update_chain_lock_handlers.extend(on_update_chain_lock);
        handlers.reconnect_zmq_handlers.extend(on_reconnect_zmq);
        handlers.fatal_error_handlers.extend(on_fatal_error);

        handlers
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.commit_block_handlers.is_empty()
            && self.rotate_validator_set_handlers.is_empty()
            && self.synchronize_masternode_identities_handlers.is_empty()
            && self.update_chain_lock_handlers.is_empty()
            && self.reconnect_zmq_handlers.is_empty()
            && self.fatal_error_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::CommitBlock(commit_block_event) => self
                .commit_block_handlers
                .iter()
                .for_each(|handler| handler(&commit_block_event)),

            Event::RotateValidatorSet(rotate_validator_set_event) => self
                .rotate_validator_set_handlers
                .iter()
                .for_each(|handler| handler(&rotate_validator_set_event)),

            Event::SynchronizeMasternodeIdentities(sync_event) => self
                .synchronize_masternode_identities_handlers
                .iter()
                .for_each(|handler| handler(&sync_event)),

            Event::UpdateChainLock(update_chain_lock_event) => self
                .update_chain_lock_handlers
                .iter()
                .for_each(|handler| handler(&update_chain_lock_event)),

            Event::ReconnectZmq(reconnect_zmq_event) => self
                .reconnect_zmq_handlers
                .iter()
                .for_each(|handler| handler(&reconnect_zmq_event)),

            Event::FatalError(fatal_error_event) => self
                .fatal_error_handlers
                .iter()
                .for_each(|handler| handler(&fatal_error_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // Every publisher is gone: nothing more will arrive.
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
