// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-destination insertion buffers.
//!
//! Each partition of a buffered container keeps one bounded buffer per
//! destination locality. An entry is appended to the buffer of the locality
//! owning it; a full buffer is shipped as one batch. Entries sitting in a
//! buffer are invisible until [`wait_for_buffered_insert`] flushed every
//! buffer on every locality.
use std::fmt;
use std::marker::PhantomData;
use std::mem;

use loci_core::{
    DispatchError, DistributedObject, Handle, Lock, Locality, ObjectId, Payload, Runtime, Task,
};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// A distributed object that accepts batched entries.
pub trait BufferedContainer: DistributedObject {
    /// One buffered insertion.
    type Entry: Payload;

    /// Applies one entry to this locality's partition.
    fn apply_entry(&self, rt: &Runtime, entry: Self::Entry) -> Result<(), DispatchError>;

    /// This partition's outgoing buffers.
    fn buffers(&self) -> &Buffers<Self>;
}

/// Entries of type `E` fitting in `bytes`, at least one:
/// `max(bytes / size_of::<E>(), 1)`.
pub fn entries_within<E>(bytes: usize) -> usize {
    (bytes / mem::size_of::<E>().max(1)).max(1)
}

/// One partition's outgoing buffers, indexed by destination locality.
pub struct Buffers<C: BufferedContainer> {
    oid: ObjectId,
    capacity: usize,
    slots: Box<[Lock<Vec<C::Entry>>]>,
}

impl<C: BufferedContainer> Buffers<C> {
    /// Empty buffers for partition `oid`, sized from the runtime's
    /// `buffer_bytes`.
    pub fn new(oid: ObjectId, rt: &Runtime) -> Self {
        Self::with_capacity(
            oid,
            rt.num_localities(),
            entries_within::<C::Entry>(rt.config().buffer_bytes),
        )
    }

    /// Empty buffers holding `capacity` entries each.
    pub fn with_capacity(oid: ObjectId, num_localities: u32, capacity: usize) -> Self {
        Self {
            oid,
            capacity: capacity.max(1),
            slots: (0..num_localities)
                .map(|_| Lock::new(Vec::with_capacity(capacity)))
                .collect(),
        }
    }

    /// Entries a buffer holds before it is shipped.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries currently buffered for any destination.
    pub fn pending(&self) -> usize {
        self.slots.iter().map(|slot| slot.lock().len()).sum()
    }

    fn slot(&self, target: Locality) -> Result<&Lock<Vec<C::Entry>>, DispatchError> {
        self.slots
            .get(target.index())
            .ok_or(DispatchError::LocalityOutOfRange {
                locality: target,
                num_localities: u32::try_from(self.slots.len()).unwrap_or(u32::MAX),
            })
    }

    fn batch(&self, entries: Vec<C::Entry>) -> ApplyBatch<C> {
        ApplyBatch {
            oid: self.oid,
            entries,
            _container: PhantomData,
        }
    }

    /// Buffers `entry` for `target`; ships the buffer synchronously once
    /// full. The buffer stays locked while it is shipped, so batches to one
    /// destination leave in order.
    pub fn push(
        &self,
        rt: &Runtime,
        target: Locality,
        entry: C::Entry,
    ) -> Result<(), DispatchError> {
        let mut buffer = self.slot(target)?.lock();
        buffer.push(entry);
        if buffer.len() < self.capacity {
            return Ok(());
        }
        let entries = mem::replace(&mut *buffer, Vec::with_capacity(self.capacity));
        trace!(oid = %self.oid, to = %target, entries = entries.len(), "shipping full buffer");
        rt.execute_at(target, self.batch(entries))
    }

    /// Buffers `entry` for `target`; ships the buffer asynchronously once
    /// full. Returns the handle of that shipment, or a null handle when the
    /// entry was only buffered.
    pub fn async_push(
        &self,
        rt: &Runtime,
        target: Locality,
        entry: C::Entry,
    ) -> Result<Handle, DispatchError> {
        let mut buffer = self.slot(target)?.lock();
        buffer.push(entry);
        if buffer.len() < self.capacity {
            return Ok(Handle::null());
        }
        let entries = mem::replace(&mut *buffer, Vec::with_capacity(self.capacity));
        trace!(oid = %self.oid, to = %target, entries = entries.len(), "shipping full buffer");
        rt.async_execute_at(target, self.batch(entries))
    }

    /// Ships every non-empty buffer and waits for each batch.
    pub fn flush_all(&self, rt: &Runtime) -> Result<(), DispatchError> {
        for (target, slot) in rt.all_localities().into_iter().zip(self.slots.iter()) {
            let mut buffer = slot.lock();
            if buffer.is_empty() {
                continue;
            }
            let entries = mem::take(&mut *buffer);
            rt.execute_at(target, self.batch(entries))?;
        }
        Ok(())
    }

    /// Ships every non-empty buffer without waiting; the returned handle
    /// covers all shipments.
    pub fn async_flush_all(&self, rt: &Runtime) -> Result<Handle, DispatchError> {
        let mut handles = Vec::new();
        for (target, slot) in rt.all_localities().into_iter().zip(self.slots.iter()) {
            let mut buffer = slot.lock();
            if buffer.is_empty() {
                continue;
            }
            let entries = mem::take(&mut *buffer);
            handles.push(rt.async_execute_at(target, self.batch(entries))?);
        }
        Ok(Handle::join_all(handles))
    }
}

impl<C: BufferedContainer> fmt::Debug for Buffers<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffers")
            .field("oid", &self.oid)
            .field("capacity", &self.capacity)
            .field("destinations", &self.slots.len())
            .finish()
    }
}

/// Flushes the buffers of every partition of `oid` and waits until all
/// buffered entries are applied.
///
/// Must not race with buffered insertions into the same container.
pub fn wait_for_buffered_insert<C: BufferedContainer>(
    rt: &Runtime,
    oid: ObjectId,
) -> Result<(), DispatchError> {
    rt.execute_on_all(FlushBuffers::<C> {
        oid,
        _container: PhantomData,
    })
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) struct ApplyBatch<C: BufferedContainer> {
    oid: ObjectId,
    entries: Vec<C::Entry>,
    #[serde(skip)]
    _container: PhantomData<fn() -> C>,
}

impl<C: BufferedContainer> Task for ApplyBatch<C> {
    type Output = ();

    fn run(self, rt: &Runtime) -> Result<(), DispatchError> {
        let container = rt.get_ptr::<C>(self.oid)?;
        self.entries
            .into_iter()
            .try_for_each(|entry| container.apply_entry(rt, entry))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) struct FlushBuffers<C: BufferedContainer> {
    oid: ObjectId,
    #[serde(skip)]
    _container: PhantomData<fn() -> C>,
}

impl<C: BufferedContainer> Task for FlushBuffers<C> {
    type Output = ();

    fn run(self, rt: &Runtime) -> Result<(), DispatchError> {
        rt.get_ptr::<C>(self.oid)?.buffers().flush_all(rt)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use loci_core::{BackendKind, RuntimeConfig};
    use std::sync::Arc;

    /// Counts applied entries per locality.
    struct Counter {
        oid: ObjectId,
        applied: Lock<Vec<u32>>,
        buffers: Buffers<Counter>,
    }

    impl DistributedObject for Counter {
        type Args = usize;

        fn construct(oid: ObjectId, rt: &Runtime, capacity: usize) -> Result<Self, DispatchError> {
            Ok(Self {
                oid,
                applied: Lock::new(Vec::new()),
                buffers: Buffers::with_capacity(oid, rt.num_localities(), capacity),
            })
        }

        fn global_id(&self) -> ObjectId {
            self.oid
        }
    }

    impl BufferedContainer for Counter {
        type Entry = u32;

        fn apply_entry(&self, _rt: &Runtime, entry: u32) -> Result<(), DispatchError> {
            self.applied.lock().push(entry);
            Ok(())
        }

        fn buffers(&self) -> &Buffers<Self> {
            &self.buffers
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Applied {
        oid: ObjectId,
    }

    impl Task for Applied {
        type Output = Vec<u32>;

        fn run(self, rt: &Runtime) -> Result<Vec<u32>, DispatchError> {
            Ok(rt.get_ptr::<Counter>(self.oid)?.applied.lock().clone())
        }
    }

    fn runtime(backend: BackendKind) -> Runtime {
        Runtime::init(RuntimeConfig {
            num_localities: 2,
            backend,
            workers_per_locality: 2,
            ..RuntimeConfig::default()
        })
        .unwrap()
    }

    fn applied_at(rt: &Runtime, oid: ObjectId, loc: u32) -> Vec<u32> {
        rt.execute_at_with_ret(Locality::new(loc), Applied { oid })
            .unwrap()
    }

    #[test]
    fn capacity_follows_entry_size() {
        assert_eq!(entries_within::<(u64, i32)>(3072), 192);
        assert_eq!(entries_within::<u8>(0), 1);
        assert_eq!(entries_within::<()>(16), 16);
        assert_eq!(entries_within::<[u8; 64]>(32), 1);
    }

    #[test]
    fn full_buffers_ship_and_the_rest_waits_for_flush() {
        for backend in BackendKind::ALL {
            let rt = runtime(backend);
            let counter: Arc<Counter> = rt.create(3).unwrap();
            let oid = counter.global_id();
            for v in 0..7 {
                counter.buffers().push(&rt, Locality::new(1), v).unwrap();
            }
            assert_eq!(applied_at(&rt, oid, 1), vec![0, 1, 2, 3, 4, 5]);
            assert_eq!(counter.buffers().pending(), 1);

            wait_for_buffered_insert::<Counter>(&rt, oid).unwrap();
            assert_eq!(applied_at(&rt, oid, 1), (0..7).collect::<Vec<_>>());
            assert!(applied_at(&rt, oid, 0).is_empty());
            assert_eq!(counter.buffers().pending(), 0);
            rt.shutdown();
        }
    }

    #[test]
    fn async_push_returns_null_until_a_buffer_ships() {
        let rt = runtime(BackendKind::ThreadPool);
        let counter: Arc<Counter> = rt.create(2).unwrap();
        let first = counter.buffers().async_push(&rt, Locality::new(0), 10).unwrap();
        assert!(first.is_null());
        let second = counter.buffers().async_push(&rt, Locality::new(0), 11).unwrap();
        assert!(!second.is_null());
        rt.wait_for_completion(&second).unwrap();
        assert_eq!(applied_at(&rt, counter.global_id(), 0), vec![10, 11]);

        counter.buffers().async_push(&rt, Locality::new(1), 12).unwrap();
        let flushed = counter.buffers().async_flush_all(&rt).unwrap();
        rt.wait_for_completion(&flushed).unwrap();
        assert_eq!(applied_at(&rt, counter.global_id(), 1), vec![12]);
        rt.shutdown();
    }

    #[test]
    fn unknown_destination_is_rejected() {
        let rt = runtime(BackendKind::Sequential);
        let counter: Arc<Counter> = rt.create(4).unwrap();
        assert!(matches!(
            counter.buffers().push(&rt, Locality::new(5), 1),
            Err(DispatchError::LocalityOutOfRange { .. })
        ));
    }
}
