// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Key-to-locality routing.
//!
//! # Routing Formula (FROZEN)
//!
//! ```text
//! owner(key)  = stable_hash(key) % num_localities
//! stripe(key) = (stable_hash(key) >> 32) & (stripes - 1)
//! ```
//!
//! `stable_hash` is Jenkins one-at-a-time, seed 0, over the bytes `Hash`
//! feeds a [`StableHasher`], with every integer widened to a fixed size and
//! written little-endian. Every locality computes the same owner for the same
//! key on every platform; changing any of this moves keys between partitions
//! of live containers.
//!
//! Stripes use the high half of the hash so that a partition's lock striping
//! stays independent of which keys routed to it.
use std::hash::{Hash, Hasher};

use loci_core::{Locality, Payload};

/// Hash seed. Part of the routing formula.
pub const HASH_SEED: u64 = 0;

/// Keys usable for routing and as container entries.
pub trait Key: Payload + Eq + Hash {}

impl<T> Key for T where T: Payload + Eq + Hash {}

/// Platform-independent 64-bit Jenkins one-at-a-time hasher.
#[derive(Clone, Copy, Debug)]
pub struct StableHasher {
    state: u64,
}

impl StableHasher {
    /// A hasher at [`HASH_SEED`].
    pub const fn new() -> Self {
        Self { state: HASH_SEED }
    }
}

impl Default for StableHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for StableHasher {
    fn write(&mut self, bytes: &[u8]) {
        let mut h = self.state;
        for &b in bytes {
            h = h.wrapping_add(u64::from(b));
            h = h.wrapping_add(h << 10);
            h ^= h >> 6;
        }
        self.state = h;
    }

    fn finish(&self) -> u64 {
        let mut h = self.state;
        h = h.wrapping_add(h << 3);
        h ^= h >> 11;
        h.wrapping_add(h << 15)
    }

    fn write_u8(&mut self, i: u8) {
        self.write(&[i]);
    }

    fn write_u16(&mut self, i: u16) {
        self.write(&i.to_le_bytes());
    }

    fn write_u32(&mut self, i: u32) {
        self.write(&i.to_le_bytes());
    }

    fn write_u64(&mut self, i: u64) {
        self.write(&i.to_le_bytes());
    }

    fn write_u128(&mut self, i: u128) {
        self.write(&i.to_le_bytes());
    }

    // usize/isize are hashed as 64-bit so 32-bit targets route identically.
    fn write_usize(&mut self, i: usize) {
        self.write_u64(i as u64);
    }

    fn write_i8(&mut self, i: i8) {
        self.write(&i.to_le_bytes());
    }

    fn write_i16(&mut self, i: i16) {
        self.write(&i.to_le_bytes());
    }

    fn write_i32(&mut self, i: i32) {
        self.write(&i.to_le_bytes());
    }

    fn write_i64(&mut self, i: i64) {
        self.write(&i.to_le_bytes());
    }

    fn write_i128(&mut self, i: i128) {
        self.write(&i.to_le_bytes());
    }

    fn write_isize(&mut self, i: isize) {
        self.write_i64(i as i64);
    }
}

/// Stable hash of `key`.
pub fn stable_hash<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut hasher = StableHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// The locality owning `key` among `num_localities` (at least one).
///
/// # Example
///
/// ```
/// use loci_collections::shard::route;
/// use loci_core::Locality;
///
/// assert_eq!(route(&42_u64, 4), Locality::new(1));
/// assert_eq!(route(&42_u64, 1), Locality::new(0));
/// ```
pub fn route<K: Hash + ?Sized>(key: &K, num_localities: u32) -> Locality {
    let n = u64::from(num_localities.max(1));
    // `% n` is below `num_localities`, which fits in u32.
    Locality::new(u32::try_from(stable_hash(key) % n).unwrap_or_default())
}

/// Stripe index of a precomputed hash among `stripes` (a power of two).
#[allow(clippy::cast_possible_truncation)]
pub fn stripe_of(hash: u64, stripes: usize) -> usize {
    debug_assert!(stripes.is_power_of_two());
    ((hash >> 32) as usize) & (stripes - 1)
}
