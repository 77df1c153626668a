// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! One locality's share of a hashmap.
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use loci_core::{DispatchError, Payload};
use rustc_hash::FxHashMap;

use crate::shard::{stable_hash, stripe_of, Key};

/// Expected entries per stripe when sizing a partition.
pub const ENTRIES_PER_STRIPE: usize = 128;

/// Upper bound on stripes per partition.
pub const MAX_STRIPES: usize = 256;

const _: () = assert!(MAX_STRIPES.is_power_of_two());

type Stripe<K, V> = RwLock<FxHashMap<K, V>>;

/// Key → value map, striped by key hash.
///
/// Inserting an existing key overwrites its value. Traversals run on a copy
/// of each stripe, so a callback may mutate the partition it walks.
pub struct LocalHashmap<K, V> {
    stripes: Box<[Stripe<K, V>]>,
}

impl<K: Key, V: Payload> LocalHashmap<K, V> {
    /// A partition sized for `expected_entries` keys:
    /// `clamp(expected_entries / 128, 1, 256)` stripes, rounded up to a
    /// power of two.
    pub fn with_expected_entries(expected_entries: usize) -> Self {
        let stripes = (expected_entries / ENTRIES_PER_STRIPE)
            .clamp(1, MAX_STRIPES)
            .next_power_of_two();
        Self {
            stripes: (0..stripes).map(|_| RwLock::default()).collect(),
        }
    }

    /// Number of lock stripes.
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    fn read(&self, stripe: usize) -> Option<RwLockReadGuard<'_, FxHashMap<K, V>>> {
        self.stripes
            .get(stripe)
            .map(|s| s.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn read_key(&self, key: &K) -> Option<RwLockReadGuard<'_, FxHashMap<K, V>>> {
        self.read(stripe_of(stable_hash(key), self.stripes.len()))
    }

    fn write_key(&self, key: &K) -> Option<RwLockWriteGuard<'_, FxHashMap<K, V>>> {
        self.stripes
            .get(stripe_of(stable_hash(key), self.stripes.len()))
            .map(|s| s.write().unwrap_or_else(PoisonError::into_inner))
    }

    /// Entries stored here.
    pub fn len(&self) -> usize {
        (0..self.stripes.len())
            .filter_map(|i| self.read(i))
            .map(|stripe| stripe.len())
            .sum()
    }

    /// True when nothing is stored here.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores `value` under `key`, returning the value it replaced.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.write_key(&key)
            .and_then(|mut stripe| stripe.insert(key, value))
    }

    /// Copy of the value under `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.read_key(key)
            .and_then(|stripe| stripe.get(key).cloned())
    }

    /// True when `key` is stored here.
    pub fn contains_key(&self, key: &K) -> bool {
        self.read_key(key).is_some_and(|stripe| stripe.contains_key(key))
    }

    /// Removes `key`; false when it was absent.
    pub fn erase(&self, key: &K) -> bool {
        self.write_key(key)
            .is_some_and(|mut stripe| stripe.remove(key).is_some())
    }

    /// Removes everything.
    pub fn clear(&self) {
        for stripe in self.stripes.iter() {
            stripe.write().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }

    /// Runs `f` on the value under `key` while holding its stripe's write
    /// lock. `None`, without calling `f`, when `key` is absent. `f` must not
    /// touch this partition.
    pub fn update<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let mut stripe = self.write_key(key)?;
        stripe.get_mut(key).map(f)
    }

    fn stripe_entries(&self, stripe: usize) -> Vec<(K, V)> {
        self.read(stripe)
            .map(|s| s.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Calls `f` for every entry in stripe `stripe`; stops at the first
    /// error.
    pub fn for_each_entry_in_stripe(
        &self,
        stripe: usize,
        mut f: impl FnMut(&K, &V) -> Result<(), DispatchError>,
    ) -> Result<(), DispatchError> {
        self.stripe_entries(stripe)
            .iter()
            .try_for_each(|(k, v)| f(k, v))
    }

    /// Calls `f` for every entry stored here.
    pub fn for_each_entry(
        &self,
        mut f: impl FnMut(&K, &V) -> Result<(), DispatchError>,
    ) -> Result<(), DispatchError> {
        (0..self.stripes.len()).try_for_each(|i| self.for_each_entry_in_stripe(i, &mut f))
    }
}

impl<K, V> fmt::Debug for LocalHashmap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalHashmap")
            .field("stripes", &self.stripes.len())
            .finish_non_exhaustive()
    }
}
