// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Distributed key → value map.
//!
//! A key lives only in the partition of the locality [`route`] assigns it.
//! Inserting a key that is already present overwrites its value.
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use loci_core::{
    DispatchError, DistributedObject, Handle, Locality, ObjectId, Payload, Promise, Runtime,
};
use tracing::debug;

use crate::buffer::{self, BufferedContainer, Buffers};
use crate::shard::{route, Key};

mod local;
mod tasks;
mod visit;

pub use local::{LocalHashmap, ENTRIES_PER_STRIPE};
pub use visit::{EntryUpdate, EntryVisitor};

use tasks::{LocalSize, Lookup, Mutate, Mutation, Update, VisitEntries};

/// One locality's partition of a distributed map from `K` to `V`.
///
/// Created collectively with [`Hashmap::create`] (construction argument:
/// the expected number of entries overall).
pub struct Hashmap<K: Key, V: Payload> {
    oid: ObjectId,
    here: Locality,
    num_localities: u32,
    local: LocalHashmap<K, V>,
    buffers: Buffers<Self>,
}

impl<K: Key, V: Payload> DistributedObject for Hashmap<K, V> {
    type Args = usize;

    fn construct(
        oid: ObjectId,
        rt: &Runtime,
        expected_entries: usize,
    ) -> Result<Self, DispatchError> {
        let num_localities = rt.num_localities();
        let per_locality = expected_entries.div_ceil(num_localities.max(1) as usize);
        Ok(Self {
            oid,
            here: rt.this_locality(),
            num_localities,
            local: LocalHashmap::with_expected_entries(per_locality),
            buffers: Buffers::new(oid, rt),
        })
    }

    fn global_id(&self) -> ObjectId {
        self.oid
    }
}

impl<K: Key, V: Payload> BufferedContainer for Hashmap<K, V> {
    type Entry = (K, V);

    fn apply_entry(&self, _rt: &Runtime, (key, value): (K, V)) -> Result<(), DispatchError> {
        self.local.insert(key, value);
        Ok(())
    }

    fn buffers(&self) -> &Buffers<Self> {
        &self.buffers
    }
}

impl<K: Key, V: Payload> Hashmap<K, V> {
    /// Builds a partition on every locality and returns this locality's.
    pub fn create(rt: &Runtime, expected_entries: usize) -> Result<Arc<Self>, DispatchError> {
        rt.create::<Self>(expected_entries)
    }

    /// Deregisters every partition of `oid`.
    pub fn destroy(rt: &Runtime, oid: ObjectId) -> Result<(), DispatchError> {
        rt.destroy::<Self>(oid)
    }

    /// Global id shared by all partitions.
    pub fn global_id(&self) -> ObjectId {
        self.oid
    }

    /// This locality's partition.
    pub fn local(&self) -> &LocalHashmap<K, V> {
        &self.local
    }

    /// The locality owning `key`.
    pub fn owner_of(&self, key: &K) -> Locality {
        route(key, self.num_localities)
    }

    fn apply(
        &self,
        rt: &Runtime,
        target: Locality,
        op: Mutation<K, V>,
    ) -> Result<(), DispatchError> {
        if target == self.here {
            op.apply(&self.local);
            return Ok(());
        }
        rt.execute_at(target, Mutate { oid: self.oid, op })
    }

    fn async_apply(
        &self,
        rt: &Runtime,
        target: Locality,
        op: Mutation<K, V>,
    ) -> Result<Handle, DispatchError> {
        if target == self.here {
            op.apply(&self.local);
            return Ok(rt.completed());
        }
        rt.async_execute_at(target, Mutate { oid: self.oid, op })
    }

    /// Number of entries, summed over all localities.
    pub fn size(&self, rt: &Runtime) -> Result<usize, DispatchError> {
        rt.all_localities()
            .into_iter()
            .map(|loc| {
                if loc == self.here {
                    return Ok(self.local.len());
                }
                rt.execute_at_with_ret(loc, LocalSize::<K, V> {
                    oid: self.oid,
                    _map: PhantomData,
                })
            })
            .sum()
    }

    /// Stores `value` under `key` on the owner of `key`, replacing any
    /// previous value.
    pub fn insert(&self, rt: &Runtime, key: K, value: V) -> Result<(), DispatchError> {
        self.apply(rt, self.owner_of(&key), Mutation::Insert { key, value })
    }

    /// Schedules [`insert`](Self::insert).
    pub fn async_insert(&self, rt: &Runtime, key: K, value: V) -> Result<Handle, DispatchError> {
        self.async_apply(rt, self.owner_of(&key), Mutation::Insert { key, value })
    }

    /// The value under `key`; `None` when absent.
    pub fn lookup(&self, rt: &Runtime, key: K) -> Result<Option<V>, DispatchError> {
        let target = self.owner_of(&key);
        if target == self.here {
            return Ok(self.local.get(&key));
        }
        rt.execute_at_with_ret(target, self.lookup_task(key))
    }

    /// Fetches the value under `key` without waiting.
    pub fn async_lookup(
        &self,
        rt: &Runtime,
        key: K,
    ) -> Result<Promise<Option<V>>, DispatchError> {
        let target = self.owner_of(&key);
        rt.async_execute_at_with_ret(target, self.lookup_task(key))
    }

    fn lookup_task(&self, key: K) -> Lookup<K, V> {
        Lookup {
            oid: self.oid,
            key,
            _map: PhantomData,
        }
    }

    /// Removes `key`. Erasing an absent key does nothing.
    pub fn erase(&self, rt: &Runtime, key: K) -> Result<(), DispatchError> {
        self.apply(rt, self.owner_of(&key), Mutation::Erase { key })
    }

    /// Schedules [`erase`](Self::erase).
    pub fn async_erase(&self, rt: &Runtime, key: K) -> Result<Handle, DispatchError> {
        self.async_apply(rt, self.owner_of(&key), Mutation::Erase { key })
    }

    /// Empties every partition. Buffered entries not yet shipped still land
    /// at the next [`wait_for_buffered_insert`](Self::wait_for_buffered_insert).
    pub fn clear(&self, rt: &Runtime) -> Result<(), DispatchError> {
        rt.execute_on_all(Mutate::<K, V> {
            oid: self.oid,
            op: Mutation::Clear,
        })?;
        debug!(oid = %self.oid, "cleared hashmap");
        Ok(())
    }

    /// Applies `update` to the value under `key` on its owner. Returns
    /// false, without calling `update`, when `key` is absent.
    pub fn apply_update<U: EntryUpdate<K, V>>(
        &self,
        rt: &Runtime,
        key: K,
        update: U,
    ) -> Result<bool, DispatchError> {
        let target = self.owner_of(&key);
        if target == self.here {
            return Ok(self
                .local
                .update(&key, |value| update.apply(&key, value))
                .is_some());
        }
        rt.execute_at_with_ret(target, Update::<K, V, U> {
            oid: self.oid,
            key,
            update,
            _map: PhantomData,
        })
    }

    /// Stores `key → value` through this locality's insertion buffers.
    /// Entries owned here land at once; others after
    /// [`wait_for_buffered_insert`](Self::wait_for_buffered_insert).
    pub fn buffered_insert(&self, rt: &Runtime, key: K, value: V) -> Result<(), DispatchError> {
        let target = self.owner_of(&key);
        if target == self.here {
            self.local.insert(key, value);
            return Ok(());
        }
        self.buffers.push(rt, target, (key, value))
    }

    /// Async form of [`buffered_insert`](Self::buffered_insert); the handle
    /// covers the shipment of a full buffer, if one left.
    pub fn buffered_async_insert(
        &self,
        rt: &Runtime,
        key: K,
        value: V,
    ) -> Result<Handle, DispatchError> {
        let target = self.owner_of(&key);
        if target == self.here {
            self.local.insert(key, value);
            return Ok(rt.completed());
        }
        let shipped = self.buffers.async_push(rt, target, (key, value))?;
        if shipped.is_null() {
            return Ok(rt.completed());
        }
        Ok(shipped)
    }

    /// Flushes every locality's insertion buffers and waits until each
    /// buffered entry is stored. Must not overlap buffered insertions into
    /// this map.
    pub fn wait_for_buffered_insert(&self, rt: &Runtime) -> Result<(), DispatchError> {
        buffer::wait_for_buffered_insert::<Self>(rt, self.oid)
    }

    /// Calls `visitor` for every entry on the locality owning it, in
    /// parallel over each partition's stripes.
    pub fn for_each_entry<E: EntryVisitor<K, V>>(
        &self,
        rt: &Runtime,
        visitor: E,
    ) -> Result<(), DispatchError> {
        rt.execute_on_all(self.visit_entries(visitor, false))
    }

    /// Schedules `visitor` over every entry.
    pub fn async_for_each_entry<E: EntryVisitor<K, V>>(
        &self,
        rt: &Runtime,
        visitor: E,
    ) -> Result<Handle, DispatchError> {
        rt.async_execute_on_all(self.visit_entries(visitor, true))
    }

    fn visit_entries<E: EntryVisitor<K, V>>(
        &self,
        visitor: E,
        detach: bool,
    ) -> VisitEntries<K, V, E> {
        VisitEntries {
            oid: self.oid,
            visitor,
            detach,
            _map: PhantomData,
        }
    }
}

impl<K: Key, V: Payload> fmt::Debug for Hashmap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hashmap")
            .field("oid", &self.oid)
            .field("here", &self.here)
            .field("local_entries", &self.local.len())
            .field("buffers", &self.buffers)
            .finish()
    }
}
