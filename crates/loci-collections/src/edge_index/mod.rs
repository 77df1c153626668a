// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Distributed source → neighbor-set index.
//!
//! Each source vertex is owned by the locality [`route`] assigns it; that
//! locality's partition holds the vertex's whole neighbor set and optional
//! attributes. Calls on an [`EdgeIndex`] may be made from any locality: work
//! on a source owned here is applied directly, anything else is shipped to the
//! owner as a task.
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use loci_core::{
    DispatchError, DistributedObject, Handle, Locality, ObjectId, Payload, Promise, Runtime,
};
use tracing::debug;

use crate::buffer::{self, entries_within, BufferedContainer, Buffers};
use crate::shard::{route, Key};

mod local;
mod tasks;
mod visit;

pub use local::{LocalEdgeIndex, MAX_STRIPES, VERTICES_PER_STRIPE};
pub use visit::{AttributeUpdate, NeighborVisitor, VertexVisitor};

use tasks::{
    Attributes, Count, Measure, Mutate, Mutation, Neighbors, UpdateAttributes, VisitEdges,
    VisitNeighbors, VisitVertices,
};

/// One locality's partition of a distributed edge index from sources `S` to
/// neighbors `D`, with optional per-source attributes `A`.
///
/// Created collectively with [`EdgeIndex::create`] (construction argument:
/// the expected number of source vertices overall) and resolved on any
/// locality with [`Runtime::get_ptr`].
pub struct EdgeIndex<S: Key, D: Key, A: Payload = ()> {
    oid: ObjectId,
    here: Locality,
    num_localities: u32,
    chunk_len: usize,
    local: LocalEdgeIndex<S, D, A>,
    buffers: Buffers<Self>,
}

impl<S: Key, D: Key, A: Payload> DistributedObject for EdgeIndex<S, D, A> {
    type Args = usize;

    fn construct(
        oid: ObjectId,
        rt: &Runtime,
        expected_vertices: usize,
    ) -> Result<Self, DispatchError> {
        let num_localities = rt.num_localities();
        let per_locality = expected_vertices.div_ceil(num_localities.max(1) as usize);
        Ok(Self {
            oid,
            here: rt.this_locality(),
            num_localities,
            chunk_len: entries_within::<D>(rt.config().chunk_bytes),
            local: LocalEdgeIndex::with_expected_vertices(per_locality),
            buffers: Buffers::new(oid, rt),
        })
    }

    fn global_id(&self) -> ObjectId {
        self.oid
    }
}

impl<S: Key, D: Key, A: Payload> BufferedContainer for EdgeIndex<S, D, A> {
    type Entry = (S, D);

    fn apply_entry(&self, _rt: &Runtime, (src, dest): (S, D)) -> Result<(), DispatchError> {
        self.local.insert(src, dest);
        Ok(())
    }

    fn buffers(&self) -> &Buffers<Self> {
        &self.buffers
    }
}

impl<S: Key, D: Key, A: Payload> EdgeIndex<S, D, A> {
    /// Builds a partition on every locality and returns this locality's.
    pub fn create(rt: &Runtime, expected_vertices: usize) -> Result<Arc<Self>, DispatchError> {
        rt.create::<Self>(expected_vertices)
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
    pub fn local(&self) -> &LocalEdgeIndex<S, D, A> {
        &self.local
    }

    /// The locality owning `src`.
    pub fn owner_of(&self, src: &S) -> Locality {
        route(src, self.num_localities)
    }

    /// Neighbors per shipped chunk of an edge list.
    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    fn apply(
        &self,
        rt: &Runtime,
        target: Locality,
        op: Mutation<S, D, A>,
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
        op: Mutation<S, D, A>,
    ) -> Result<Handle, DispatchError> {
        if target == self.here {
            op.apply(&self.local);
            return Ok(rt.completed());
        }
        rt.async_execute_at(target, Mutate { oid: self.oid, op })
    }

    fn measure(
        &self,
        rt: &Runtime,
        target: Locality,
        measure: Measure<S>,
    ) -> Result<usize, DispatchError> {
        if target == self.here {
            return Ok(measure.take(&self.local));
        }
        rt.execute_at_with_ret(target, Count::<S, D, A> {
            oid: self.oid,
            measure,
            _index: PhantomData,
        })
    }

    fn measure_all(&self, rt: &Runtime, measure: &Measure<S>) -> Result<usize, DispatchError> {
        rt.all_localities()
            .into_iter()
            .map(|loc| self.measure(rt, loc, measure.clone()))
            .sum()
    }

    /// Number of source vertices, summed over all localities.
    pub fn size(&self, rt: &Runtime) -> Result<usize, DispatchError> {
        self.measure_all(rt, &Measure::Vertices)
    }

    /// Number of edges, summed over all localities.
    pub fn num_edges(&self, rt: &Runtime) -> Result<usize, DispatchError> {
        self.measure_all(rt, &Measure::Edges)
    }

    /// Adds `src → dest` on the owner of `src`.
    pub fn insert(&self, rt: &Runtime, src: S, dest: D) -> Result<(), DispatchError> {
        self.apply(rt, self.owner_of(&src), Mutation::Insert { src, dest })
    }

    /// Schedules `src → dest` on the owner of `src`.
    pub fn async_insert(&self, rt: &Runtime, src: S, dest: D) -> Result<Handle, DispatchError> {
        self.async_apply(rt, self.owner_of(&src), Mutation::Insert { src, dest })
    }

    fn chunks(&self, src: &S, dests: &[D], overwrite: bool) -> Vec<Mutation<S, D, A>> {
        if dests.is_empty() {
            return vec![Mutation::InsertList {
                src: src.clone(),
                dests: Vec::new(),
                overwrite,
            }];
        }
        dests
            .chunks(self.chunk_len)
            .enumerate()
            .map(|(i, chunk)| Mutation::InsertList {
                src: src.clone(),
                dests: chunk.to_vec(),
                overwrite: overwrite && i == 0,
            })
            .collect()
    }

    /// Adds an edge from `src` to every element of `dests`, shipped in
    /// chunks of [`chunk_len`](Self::chunk_len). With `overwrite` the
    /// existing neighbors of `src` are replaced. `src` exists afterwards even
    /// when `dests` is empty.
    pub fn insert_edge_list(
        &self,
        rt: &Runtime,
        src: S,
        dests: &[D],
        overwrite: bool,
    ) -> Result<(), DispatchError> {
        let target = self.owner_of(&src);
        let chunks = self.chunks(&src, dests, overwrite);
        if chunks.len() > 1 {
            debug!(oid = %self.oid, to = %target, chunks = chunks.len(), "chunked edge list");
        }
        chunks
            .into_iter()
            .try_for_each(|op| self.apply(rt, target, op))
    }

    /// Async form of [`insert_edge_list`](Self::insert_edge_list). A single
    /// chunk is one async dispatch. With several, the first chunk is applied
    /// before returning so that an overwrite happens before any later chunk
    /// lands.
    pub fn async_insert_edge_list(
        &self,
        rt: &Runtime,
        src: S,
        dests: &[D],
        overwrite: bool,
    ) -> Result<Handle, DispatchError> {
        let target = self.owner_of(&src);
        let mut chunks = self.chunks(&src, dests, overwrite);
        if chunks.len() == 1 {
            if let Some(only) = chunks.pop() {
                return self.async_apply(rt, target, only);
            }
        }
        let mut chunks = chunks.into_iter();
        if let Some(first) = chunks.next() {
            self.apply(rt, target, first)?;
        }
        let rest = chunks
            .map(|op| self.async_apply(rt, target, op))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(or_completed(rt, Handle::join_all(rest)))
    }

    /// Removes `src → dest`. A source left without neighbors keeps existing
    /// with degree 0.
    pub fn erase(&self, rt: &Runtime, src: S, dest: D) -> Result<(), DispatchError> {
        self.apply(rt, self.owner_of(&src), Mutation::Erase { src, dest })
    }

    /// Schedules the removal of `src → dest`.
    pub fn async_erase(&self, rt: &Runtime, src: S, dest: D) -> Result<Handle, DispatchError> {
        self.async_apply(rt, self.owner_of(&src), Mutation::Erase { src, dest })
    }

    /// Removes `src` together with its edges and attributes.
    pub fn erase_vertex(&self, rt: &Runtime, src: S) -> Result<(), DispatchError> {
        self.apply(rt, self.owner_of(&src), Mutation::EraseVertex { src })
    }

    /// Empties every partition. Entries still sitting in insertion buffers
    /// are not affected.
    pub fn clear(&self, rt: &Runtime) -> Result<(), DispatchError> {
        rt.execute_on_all(Mutate::<S, D, A> {
            oid: self.oid,
            op: Mutation::Clear,
        })?;
        debug!(oid = %self.oid, "cleared edge index");
        Ok(())
    }

    /// Adds `src → dest` through this locality's insertion buffers. Edges
    /// owned here are applied at once; others become visible only after
    /// [`wait_for_buffered_insert`](Self::wait_for_buffered_insert).
    pub fn buffered_insert(&self, rt: &Runtime, src: S, dest: D) -> Result<(), DispatchError> {
        let target = self.owner_of(&src);
        if target == self.here {
            self.local.insert(src, dest);
            return Ok(());
        }
        self.buffers.push(rt, target, (src, dest))
    }

    /// Async form of [`buffered_insert`](Self::buffered_insert): a full
    /// buffer is shipped without waiting. The returned handle covers that
    /// shipment, if any.
    pub fn buffered_async_insert(
        &self,
        rt: &Runtime,
        src: S,
        dest: D,
    ) -> Result<Handle, DispatchError> {
        let target = self.owner_of(&src);
        if target == self.here {
            self.local.insert(src, dest);
            return Ok(rt.completed());
        }
        let shipped = self.buffers.async_push(rt, target, (src, dest))?;
        Ok(or_completed(rt, shipped))
    }

    /// Flushes the insertion buffers of every locality and waits until every
    /// buffered edge is applied. Must not run concurrently with buffered
    /// insertions into this index.
    pub fn wait_for_buffered_insert(&self, rt: &Runtime) -> Result<(), DispatchError> {
        buffer::wait_for_buffered_insert::<Self>(rt, self.oid)
    }

    /// Calls `visitor` for every neighbor of `src` on the owner of `src`.
    pub fn for_each_neighbor<V: NeighborVisitor<S, D>>(
        &self,
        rt: &Runtime,
        src: S,
        visitor: V,
    ) -> Result<(), DispatchError> {
        let target = self.owner_of(&src);
        if target == self.here {
            return self
                .local
                .for_each_neighbor(&src, |s, d| visitor.visit(rt, s, d));
        }
        rt.execute_at(target, self.visit_neighbors(src, visitor))
    }

    /// Schedules `visitor` over the neighbors of `src`.
    pub fn async_for_each_neighbor<V: NeighborVisitor<S, D>>(
        &self,
        rt: &Runtime,
        src: S,
        visitor: V,
    ) -> Result<Handle, DispatchError> {
        let target = self.owner_of(&src);
        rt.async_execute_at(target, self.visit_neighbors(src, visitor))
    }

    fn visit_neighbors<V: NeighborVisitor<S, D>>(
        &self,
        src: S,
        visitor: V,
    ) -> VisitNeighbors<S, D, A, V> {
        VisitNeighbors {
            oid: self.oid,
            src,
            visitor,
            _index: PhantomData,
        }
    }

    /// Calls `visitor` for every source vertex, on its owner, in parallel
    /// over each partition's stripes.
    pub fn for_each_vertex<V: VertexVisitor<S>>(
        &self,
        rt: &Runtime,
        visitor: V,
    ) -> Result<(), DispatchError> {
        rt.execute_on_all(self.visit_vertices(visitor, false))
    }

    /// Schedules `visitor` over every source vertex.
    pub fn async_for_each_vertex<V: VertexVisitor<S>>(
        &self,
        rt: &Runtime,
        visitor: V,
    ) -> Result<Handle, DispatchError> {
        rt.async_execute_on_all(self.visit_vertices(visitor, true))
    }

    fn visit_vertices<V: VertexVisitor<S>>(
        &self,
        visitor: V,
        detach: bool,
    ) -> VisitVertices<S, D, A, V> {
        VisitVertices {
            oid: self.oid,
            visitor,
            detach,
            _index: PhantomData,
        }
    }

    /// Calls `visitor` for every edge, on the owner of its source.
    pub fn for_each_edge<V: NeighborVisitor<S, D>>(
        &self,
        rt: &Runtime,
        visitor: V,
    ) -> Result<(), DispatchError> {
        rt.execute_on_all(self.visit_edges(visitor, false))
    }

    /// Schedules `visitor` over every edge.
    pub fn async_for_each_edge<V: NeighborVisitor<S, D>>(
        &self,
        rt: &Runtime,
        visitor: V,
    ) -> Result<Handle, DispatchError> {
        rt.async_execute_on_all(self.visit_edges(visitor, true))
    }

    fn visit_edges<V: NeighborVisitor<S, D>>(
        &self,
        visitor: V,
        detach: bool,
    ) -> VisitEdges<S, D, A, V> {
        VisitEdges {
            oid: self.oid,
            visitor,
            detach,
            _index: PhantomData,
        }
    }

    /// Number of neighbors of `src`; 0 when absent.
    pub fn get_degree(&self, rt: &Runtime, src: S) -> Result<usize, DispatchError> {
        self.measure(rt, self.owner_of(&src), Measure::Degree(src))
    }

    /// Neighbors of `src` in unspecified order; empty when absent.
    pub fn get_neighbors(&self, rt: &Runtime, src: S) -> Result<Vec<D>, DispatchError> {
        let target = self.owner_of(&src);
        if target == self.here {
            return Ok(self.local.neighbors(&src));
        }
        rt.execute_at_with_ret(target, self.neighbors_of(src))
    }

    /// Fetches the neighbors of `src` without waiting.
    pub fn async_get_neighbors(
        &self,
        rt: &Runtime,
        src: S,
    ) -> Result<Promise<Vec<D>>, DispatchError> {
        let target = self.owner_of(&src);
        rt.async_execute_at_with_ret(target, self.neighbors_of(src))
    }

    fn neighbors_of(&self, src: S) -> Neighbors<S, D, A> {
        Neighbors {
            oid: self.oid,
            src,
            _index: PhantomData,
        }
    }

    /// Attributes of `src`; `None` when absent or never set.
    pub fn get_vertex_attributes(
        &self,
        rt: &Runtime,
        src: S,
    ) -> Result<Option<A>, DispatchError> {
        let target = self.owner_of(&src);
        if target == self.here {
            return Ok(self.local.attributes(&src));
        }
        rt.execute_at_with_ret(target, Attributes::<S, D, A> {
            oid: self.oid,
            src,
            _index: PhantomData,
        })
    }

    /// Sets the attributes of `src`, creating the vertex when absent.
    pub fn set_vertex_attributes(
        &self,
        rt: &Runtime,
        src: S,
        attributes: A,
    ) -> Result<(), DispatchError> {
        self.apply(
            rt,
            self.owner_of(&src),
            Mutation::SetAttributes { src, attributes },
        )
    }

    /// Applies `update` to the attributes of `src` on its owner. Returns
    /// false, without calling `update`, when `src` does not exist.
    pub fn vertex_attributes_apply<U: AttributeUpdate<S, A>>(
        &self,
        rt: &Runtime,
        src: S,
        update: U,
    ) -> Result<bool, DispatchError> {
        let target = self.owner_of(&src);
        if target == self.here {
            return Ok(self
                .local
                .update_attributes(&src, |attributes| update.apply(&src, attributes))
                .is_some());
        }
        rt.execute_at_with_ret(target, UpdateAttributes::<S, D, A, U> {
            oid: self.oid,
            src,
            update,
            _index: PhantomData,
        })
    }
}

impl<S: Key, D: Key, A: Payload> fmt::Debug for EdgeIndex<S, D, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeIndex")
            .field("oid", &self.oid)
            .field("here", &self.here)
            .field("local_vertices", &self.local.len())
            .field("buffers", &self.buffers)
            .finish()
    }
}

fn or_completed(rt: &Runtime, handle: Handle) -> Handle {
    if handle.is_null() {
        rt.completed()
    } else {
        handle
    }
}
