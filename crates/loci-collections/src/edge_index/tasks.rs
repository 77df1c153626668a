// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Remote operations on edge index partitions.
use std::marker::PhantomData;

use loci_core::{DispatchError, IterTask, ObjectId, Payload, Runtime, Task};
use serde::{Deserialize, Serialize};

use super::local::LocalEdgeIndex;
use super::visit::{AttributeUpdate, NeighborVisitor, VertexVisitor};
use super::EdgeIndex;
use crate::shard::Key;

type Marker<T> = PhantomData<fn() -> T>;

/// A change to one partition. Applied identically on the local fast path and
/// on the receiving side of [`Mutate`].
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) enum Mutation<S: Key, D: Key, A: Payload> {
    Insert { src: S, dest: D },
    InsertList { src: S, dests: Vec<D>, overwrite: bool },
    Erase { src: S, dest: D },
    EraseVertex { src: S },
    SetAttributes { src: S, attributes: A },
    Clear,
}

impl<S: Key, D: Key, A: Payload> Mutation<S, D, A> {
    pub(crate) fn apply(self, local: &LocalEdgeIndex<S, D, A>) {
        match self {
            Self::Insert { src, dest } => {
                local.insert(src, dest);
            }
            Self::InsertList {
                src,
                dests,
                overwrite,
            } => local.insert_edge_list(src, dests, overwrite),
            Self::Erase { src, dest } => {
                local.erase(&src, &dest);
            }
            Self::EraseVertex { src } => {
                local.erase_vertex(&src);
            }
            Self::SetAttributes { src, attributes } => local.set_attributes(src, attributes),
            Self::Clear => local.clear(),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) struct Mutate<S: Key, D: Key, A: Payload> {
    pub(crate) oid: ObjectId,
    pub(crate) op: Mutation<S, D, A>,
}

impl<S: Key, D: Key, A: Payload> Task for Mutate<S, D, A> {
    type Output = ();

    fn run(self, rt: &Runtime) -> Result<(), DispatchError> {
        let index = rt.get_ptr::<EdgeIndex<S, D, A>>(self.oid)?;
        self.op.apply(index.local());
        Ok(())
    }
}

/// A count taken on one partition.
#[derive(Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) enum Measure<S: Key> {
    Vertices,
    Edges,
    Degree(S),
}

impl<S: Key> Measure<S> {
    pub(crate) fn take<D: Key, A: Payload>(&self, local: &LocalEdgeIndex<S, D, A>) -> usize {
        match self {
            Self::Vertices => local.len(),
            Self::Edges => local.num_edges(),
            Self::Degree(src) => local.degree(src),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) struct Count<S: Key, D: Key, A: Payload> {
    pub(crate) oid: ObjectId,
    pub(crate) measure: Measure<S>,
    #[serde(skip)]
    pub(crate) _index: Marker<(D, A)>,
}

impl<S: Key, D: Key, A: Payload> Task for Count<S, D, A> {
    type Output = usize;

    fn run(self, rt: &Runtime) -> Result<usize, DispatchError> {
        let index = rt.get_ptr::<EdgeIndex<S, D, A>>(self.oid)?;
        Ok(self.measure.take(index.local()))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) struct Neighbors<S: Key, D: Key, A: Payload> {
    pub(crate) oid: ObjectId,
    pub(crate) src: S,
    #[serde(skip)]
    pub(crate) _index: Marker<(D, A)>,
}

impl<S: Key, D: Key, A: Payload> Task for Neighbors<S, D, A> {
    type Output = Vec<D>;

    fn run(self, rt: &Runtime) -> Result<Vec<D>, DispatchError> {
        let index = rt.get_ptr::<EdgeIndex<S, D, A>>(self.oid)?;
        Ok(index.local().neighbors(&self.src))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) struct Attributes<S: Key, D: Key, A: Payload> {
    pub(crate) oid: ObjectId,
    pub(crate) src: S,
    #[serde(skip)]
    pub(crate) _index: Marker<(D, A)>,
}

impl<S: Key, D: Key, A: Payload> Task for Attributes<S, D, A> {
    type Output = Option<A>;

    fn run(self, rt: &Runtime) -> Result<Option<A>, DispatchError> {
        let index = rt.get_ptr::<EdgeIndex<S, D, A>>(self.oid)?;
        Ok(index.local().attributes(&self.src))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) struct UpdateAttributes<S: Key, D: Key, A: Payload, U: AttributeUpdate<S, A>> {
    pub(crate) oid: ObjectId,
    pub(crate) src: S,
    pub(crate) update: U,
    #[serde(skip)]
    pub(crate) _index: Marker<(D, A)>,
}

impl<S, D, A, U> Task for UpdateAttributes<S, D, A, U>
where
    S: Key,
    D: Key,
    A: Payload,
    U: AttributeUpdate<S, A>,
{
    type Output = bool;

    fn run(self, rt: &Runtime) -> Result<bool, DispatchError> {
        let index = rt.get_ptr::<EdgeIndex<S, D, A>>(self.oid)?;
        let Self { src, update, .. } = self;
        Ok(index
            .local()
            .update_attributes(&src, |attributes| update.apply(&src, attributes))
            .is_some())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) struct VisitNeighbors<S: Key, D: Key, A: Payload, V: NeighborVisitor<S, D>> {
    pub(crate) oid: ObjectId,
    pub(crate) src: S,
    pub(crate) visitor: V,
    #[serde(skip)]
    pub(crate) _index: Marker<(D, A)>,
}

impl<S, D, A, V> Task for VisitNeighbors<S, D, A, V>
where
    S: Key,
    D: Key,
    A: Payload,
    V: NeighborVisitor<S, D>,
{
    type Output = ();

    fn run(self, rt: &Runtime) -> Result<(), DispatchError> {
        let index = rt.get_ptr::<EdgeIndex<S, D, A>>(self.oid)?;
        let visitor = self.visitor;
        index
            .local()
            .for_each_neighbor(&self.src, |src, dest| visitor.visit(rt, src, dest))
    }
}

/// Runs a per-stripe loop over this locality's partition; `detach` leaves
/// the loop running under the caller's handle instead of waiting for it.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) struct VisitVertices<S: Key, D: Key, A: Payload, V: VertexVisitor<S>> {
    pub(crate) oid: ObjectId,
    pub(crate) visitor: V,
    pub(crate) detach: bool,
    #[serde(skip)]
    pub(crate) _index: Marker<(S, D, A)>,
}

impl<S, D, A, V> Task for VisitVertices<S, D, A, V>
where
    S: Key,
    D: Key,
    A: Payload,
    V: VertexVisitor<S>,
{
    type Output = ();

    fn run(self, rt: &Runtime) -> Result<(), DispatchError> {
        let index = rt.get_ptr::<EdgeIndex<S, D, A>>(self.oid)?;
        let stripes = index.local().stripe_count();
        let body = VertexStripe::<S, D, A, V> {
            oid: self.oid,
            visitor: self.visitor,
            _index: PhantomData,
        };
        if self.detach {
            rt.async_for_each_at(rt.this_locality(), body, stripes)?;
            return Ok(());
        }
        rt.for_each_at(rt.this_locality(), body, stripes)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
struct VertexStripe<S: Key, D: Key, A: Payload, V: VertexVisitor<S>> {
    oid: ObjectId,
    visitor: V,
    #[serde(skip)]
    _index: Marker<(S, D, A)>,
}

impl<S, D, A, V> IterTask for VertexStripe<S, D, A, V>
where
    S: Key,
    D: Key,
    A: Payload,
    V: VertexVisitor<S>,
{
    fn run(&self, rt: &Runtime, stripe: usize) -> Result<(), DispatchError> {
        let index = rt.get_ptr::<EdgeIndex<S, D, A>>(self.oid)?;
        index
            .local()
            .for_each_vertex_in_stripe(stripe, |src| self.visitor.visit(rt, src))
    }
}

/// Edge counterpart of [`VisitVertices`].
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) struct VisitEdges<S: Key, D: Key, A: Payload, V: NeighborVisitor<S, D>> {
    pub(crate) oid: ObjectId,
    pub(crate) visitor: V,
    pub(crate) detach: bool,
    #[serde(skip)]
    pub(crate) _index: Marker<(S, D, A)>,
}

impl<S, D, A, V> Task for VisitEdges<S, D, A, V>
where
    S: Key,
    D: Key,
    A: Payload,
    V: NeighborVisitor<S, D>,
{
    type Output = ();

    fn run(self, rt: &Runtime) -> Result<(), DispatchError> {
        let index = rt.get_ptr::<EdgeIndex<S, D, A>>(self.oid)?;
        let stripes = index.local().stripe_count();
        let body = EdgeStripe::<S, D, A, V> {
            oid: self.oid,
            visitor: self.visitor,
            _index: PhantomData,
        };
        if self.detach {
            rt.async_for_each_at(rt.this_locality(), body, stripes)?;
            return Ok(());
        }
        rt.for_each_at(rt.this_locality(), body, stripes)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
struct EdgeStripe<S: Key, D: Key, A: Payload, V: NeighborVisitor<S, D>> {
    oid: ObjectId,
    visitor: V,
    #[serde(skip)]
    _index: Marker<(S, D, A)>,
}

impl<S, D, A, V> IterTask for EdgeStripe<S, D, A, V>
where
    S: Key,
    D: Key,
    A: Payload,
    V: NeighborVisitor<S, D>,
{
    fn run(&self, rt: &Runtime, stripe: usize) -> Result<(), DispatchError> {
        let index = rt.get_ptr::<EdgeIndex<S, D, A>>(self.oid)?;
        index
            .local()
            .for_each_edge_in_stripe(stripe, |src, dest| self.visitor.visit(rt, src, dest))
    }
}
