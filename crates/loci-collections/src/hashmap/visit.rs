// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Callbacks shipped to hashmap partitions.
use loci_core::{DispatchError, Runtime};
use serde::{de::DeserializeOwned, Serialize};

/// Called once per stored entry, on the locality owning it.
pub trait EntryVisitor<K, V>: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Visits `key → value`. Async calls made through `rt` are covered by
    /// the traversal's handle.
    fn visit(&self, rt: &Runtime, key: &K, value: &V) -> Result<(), DispatchError>;
}

/// An in-place update of one value, run under its stripe's write lock.
pub trait EntryUpdate<K, V>: Serialize + DeserializeOwned + Send + 'static {
    /// Updates the value stored under `key`.
    fn apply(&self, key: &K, value: &mut V);
}
