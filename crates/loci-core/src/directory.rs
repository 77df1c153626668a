// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Global object directory.
//!
//! Each locality owns one [`Directory`] mapping an [`ObjectId`] to that
//! locality's partition of the logical object. Partitions are created on every
//! locality by a broadcast at create time and torn down the same way; ids are
//! never recycled, so a destroyed id stays unresolvable forever.
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::locality::Locality;
use crate::runtime::Runtime;
use crate::task::Payload;

const SEQUENCE_BITS: u32 = 48;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const LOCALITY_MASK: u64 = 0xFFFF;

/// Global identifier of one logical distributed object.
///
/// Packs the creating locality in the high 16 bits and a per-creator sequence
/// number in the low 48 bits. All ones is [`ObjectId::NULL`].
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    /// The id no object ever receives.
    pub const NULL: Self = Self(u64::MAX);

    /// Packs `creator` and `sequence`; out-of-range bits are discarded.
    pub const fn new(creator: Locality, sequence: u64) -> Self {
        Self(((creator.get() as u64 & LOCALITY_MASK) << SEQUENCE_BITS) | (sequence & SEQUENCE_MASK))
    }

    /// Locality that minted the id.
    pub const fn creator(self) -> Locality {
        Locality::new((self.0 >> SEQUENCE_BITS) as u32)
    }

    /// Creator-local sequence number.
    pub const fn sequence(self) -> u64 {
        self.0 & SEQUENCE_MASK
    }

    /// Raw 64-bit representation.
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    /// True for [`ObjectId::NULL`].
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("oid:null")
        } else {
            write!(f, "oid:{}:{}", self.creator().get(), self.sequence())
        }
    }
}

/// A type whose instances are the per-locality partitions of one distributed
/// object.
pub trait DistributedObject: Send + Sync + Sized + 'static {
    /// Construction arguments, copied to every locality.
    type Args: Payload;

    /// Builds this locality's partition. `rt` is scoped to the locality the
    /// partition will live on.
    fn construct(oid: ObjectId, rt: &Runtime, args: Self::Args) -> Result<Self, DispatchError>;

    /// The id the partition was registered under.
    fn global_id(&self) -> ObjectId;
}

type Entry = Arc<dyn Any + Send + Sync>;

/// One locality's registry of partitions.
pub struct Directory {
    here: Locality,
    next_sequence: AtomicU64,
    entries: RwLock<FxHashMap<ObjectId, Entry>>,
}

impl Directory {
    /// An empty directory for `here`.
    pub fn new(here: Locality) -> Self {
        Self {
            here,
            next_sequence: AtomicU64::new(0),
            entries: RwLock::new(FxHashMap::default()),
        }
    }

    /// Mints a fresh id owned by this locality.
    pub fn mint(&self) -> Result<ObjectId, DispatchError> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        // The top sequence value is reserved so `NULL` is never minted.
        if sequence >= SEQUENCE_MASK {
            return Err(DispatchError::ObjectIdsExhausted(self.here));
        }
        Ok(ObjectId::new(self.here, sequence))
    }

    /// Registers `partition` under `oid`.
    pub fn insert<T: Send + Sync + 'static>(
        &self,
        oid: ObjectId,
        partition: Arc<T>,
    ) -> Result<(), DispatchError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&oid) {
            return Err(DispatchError::DuplicateObjectId(oid));
        }
        entries.insert(oid, partition);
        Ok(())
    }

    /// Resolves `oid` to this locality's partition of type `T`.
    pub fn get<T: Send + Sync + 'static>(&self, oid: ObjectId) -> Result<Arc<T>, DispatchError> {
        let entry = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&oid)
            .cloned()
            .ok_or(DispatchError::StaleObjectId(oid))?;
        entry
            .downcast::<T>()
            .map_err(|_| DispatchError::ObjectTypeMismatch {
                oid,
                expected: std::any::type_name::<T>(),
            })
    }

    /// Deregisters `oid`; the partition is freed once the last outstanding
    /// reference drops.
    pub fn remove(&self, oid: ObjectId) -> Result<(), DispatchError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&oid)
            .map(drop)
            .ok_or(DispatchError::StaleObjectId(oid))
    }

    /// Number of live partitions.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when no partition is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directory")
            .field("here", &self.here)
            .field("live", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn object_id_round_trips_fields() {
        let oid = ObjectId::new(Locality::new(513), 0xABCD_EF01_2345);
        assert_eq!(oid.creator(), Locality::new(513));
        assert_eq!(oid.sequence(), 0xABCD_EF01_2345);
        assert_eq!(oid.to_raw() >> 48, 513);
        assert!(!oid.is_null());
        assert_eq!(oid.to_string(), format!("oid:513:{}", 0xABCD_EF01_2345_u64));
    }

    #[test]
    fn minted_ids_are_unique_and_owned() {
        let dir = Directory::new(Locality::new(3));
        let a = dir.mint().unwrap();
        let b = dir.mint().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.creator(), Locality::new(3));
        assert_eq!(b.sequence(), a.sequence() + 1);
    }

    #[test]
    fn destroyed_entries_never_resolve() {
        let dir = Directory::new(Locality::new(0));
        let oid = dir.mint().unwrap();
        dir.insert(oid, Arc::new(17_u32)).unwrap();
        assert_eq!(*dir.get::<u32>(oid).unwrap(), 17);
        dir.remove(oid).unwrap();
        assert_eq!(dir.get::<u32>(oid), Err(DispatchError::StaleObjectId(oid)));
        assert_eq!(dir.remove(oid), Err(DispatchError::StaleObjectId(oid)));
    }

    #[test]
    fn wrong_type_is_reported() {
        let dir = Directory::new(Locality::new(0));
        let oid = dir.mint().unwrap();
        dir.insert(oid, Arc::new(String::from("partition"))).unwrap();
        assert!(matches!(
            dir.get::<u64>(oid),
            Err(DispatchError::ObjectTypeMismatch { .. })
        ));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let dir = Directory::new(Locality::new(0));
        let oid = dir.mint().unwrap();
        dir.insert(oid, Arc::new(1_u8)).unwrap();
        assert_eq!(
            dir.insert(oid, Arc::new(2_u8)),
            Err(DispatchError::DuplicateObjectId(oid))
        );
    }
}
