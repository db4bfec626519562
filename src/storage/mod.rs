/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Drive's view of the storage engine.
//!
//! The storage engine is an external collaborator: Drive persists identities, data contracts,
//! documents, and its own chain state through the [pluggable](pluggables) [`KVStore`] trait, at the keys
//! listed in [`variables`]. All writes of a proposal round go through a [`Transaction`], which is only
//! committed by `FinalizeBlock`.

pub mod pluggables;

pub mod transaction;

pub mod variables;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use pluggables::{Genesis, KVGet, KVGetError, KVStore, StorageError, WriteBatch};
pub use transaction::{PendingWrites, Transaction};

/// The round transaction, shared between the ABCI handlers and the state repository.
pub type SharedTransaction<K> = Arc<Mutex<Transaction<K>>>;

pub fn shared_transaction<K: KVStore>(store: K) -> SharedTransaction<K> {
    Arc::new(Mutex::new(Transaction::new(store)))
}

/// Lock the shared transaction, recovering it from a poisoned lock. Writes only reach the store in
/// [`Transaction::commit`].
pub fn lock<K: KVStore>(transaction: &SharedTransaction<K>) -> MutexGuard<'_, Transaction<K>> {
    transaction.lock().unwrap_or_else(PoisonError::into_inner)
}
