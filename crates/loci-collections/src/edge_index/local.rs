// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! One locality's share of an edge index.
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use loci_core::{DispatchError, Payload};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::shard::{stable_hash, stripe_of, Key};

/// Expected vertices per stripe when sizing a partition.
pub const VERTICES_PER_STRIPE: usize = 128;

/// Upper bound on stripes per partition.
pub const MAX_STRIPES: usize = 256;

const _: () = assert!(MAX_STRIPES.is_power_of_two());

struct Adjacency<D, A> {
    neighbors: FxHashSet<D>,
    attributes: Option<A>,
}

impl<D, A> Default for Adjacency<D, A> {
    fn default() -> Self {
        Self {
            neighbors: FxHashSet::default(),
            attributes: None,
        }
    }
}

type Stripe<S, D, A> = RwLock<FxHashMap<S, Adjacency<D, A>>>;

/// Source-vertex → neighbor-set map, striped by source hash.
///
/// Every operation on one source takes only that source's stripe lock, so
/// concurrent workers mutating different stripes never contend. Traversals
/// copy a stripe under its read lock and run callbacks on the copy; a callback
/// may therefore mutate this partition, but does not observe its own changes
/// mid-traversal.
pub struct LocalEdgeIndex<S, D, A = ()> {
    stripes: Box<[Stripe<S, D, A>]>,
}

impl<S: Key, D: Key, A: Payload> LocalEdgeIndex<S, D, A> {
    /// A partition sized for `expected_vertices` sources:
    /// `clamp(expected_vertices / 128, 1, 256)` stripes, rounded up to a power
    /// of two.
    pub fn with_expected_vertices(expected_vertices: usize) -> Self {
        let stripes = (expected_vertices / VERTICES_PER_STRIPE)
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

    fn stripe_index(&self, src: &S) -> usize {
        stripe_of(stable_hash(src), self.stripes.len())
    }

    fn read(&self, stripe: usize) -> Option<RwLockReadGuard<'_, FxHashMap<S, Adjacency<D, A>>>> {
        self.stripes
            .get(stripe)
            .map(|s| s.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn read_src(&self, src: &S) -> Option<RwLockReadGuard<'_, FxHashMap<S, Adjacency<D, A>>>> {
        self.read(self.stripe_index(src))
    }

    fn write_src(&self, src: &S) -> Option<RwLockWriteGuard<'_, FxHashMap<S, Adjacency<D, A>>>> {
        self.stripes
            .get(self.stripe_index(src))
            .map(|s| s.write().unwrap_or_else(PoisonError::into_inner))
    }

    /// Source vertices stored here.
    pub fn len(&self) -> usize {
        (0..self.stripes.len())
            .filter_map(|i| self.read(i))
            .map(|stripe| stripe.len())
            .sum()
    }

    /// True when no source vertex is stored here.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Edges stored here.
    pub fn num_edges(&self) -> usize {
        (0..self.stripes.len())
            .filter_map(|i| self.read(i))
            .map(|stripe| stripe.values().map(|adj| adj.neighbors.len()).sum::<usize>())
            .sum()
    }

    /// Adds `src → dest`; returns false when the edge was already present.
    pub fn insert(&self, src: S, dest: D) -> bool {
        self.write_src(&src)
            .is_some_and(|mut stripe| stripe.entry(src).or_default().neighbors.insert(dest))
    }

    /// Adds every edge `src → d` for `d` in `dests`, creating `src` even
    /// when `dests` is empty. With `overwrite`, `src`'s existing neighbors
    /// are dropped first.
    pub fn insert_edge_list(&self, src: S, dests: impl IntoIterator<Item = D>, overwrite: bool) {
        if let Some(mut stripe) = self.write_src(&src) {
            let adjacency = stripe.entry(src).or_default();
            if overwrite {
                adjacency.neighbors.clear();
            }
            adjacency.neighbors.extend(dests);
        }
    }

    /// Removes `src → dest`. A source left without neighbors stays present
    /// with degree 0. Returns false when the edge was absent.
    pub fn erase(&self, src: &S, dest: &D) -> bool {
        self.write_src(src).is_some_and(|mut stripe| {
            stripe
                .get_mut(src)
                .is_some_and(|adjacency| adjacency.neighbors.remove(dest))
        })
    }

    /// Removes `src` with all its edges and attributes.
    pub fn erase_vertex(&self, src: &S) -> bool {
        self.write_src(src)
            .is_some_and(|mut stripe| stripe.remove(src).is_some())
    }

    /// Removes everything.
    pub fn clear(&self) {
        for stripe in self.stripes.iter() {
            stripe.write().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }

    /// True when `src` is stored here.
    pub fn contains_vertex(&self, src: &S) -> bool {
        self.read_src(src).is_some_and(|stripe| stripe.contains_key(src))
    }

    /// True when `src → dest` is stored here.
    pub fn contains_edge(&self, src: &S, dest: &D) -> bool {
        self.read_src(src).is_some_and(|stripe| {
            stripe
                .get(src)
                .is_some_and(|adjacency| adjacency.neighbors.contains(dest))
        })
    }

    /// Number of neighbors of `src`; 0 when absent.
    pub fn degree(&self, src: &S) -> usize {
        self.read_src(src)
            .and_then(|stripe| stripe.get(src).map(|adjacency| adjacency.neighbors.len()))
            .unwrap_or(0)
    }

    /// Neighbors of `src` in unspecified order; empty when absent.
    pub fn neighbors(&self, src: &S) -> Vec<D> {
        self.read_src(src)
            .and_then(|stripe| {
                stripe
                    .get(src)
                    .map(|adjacency| adjacency.neighbors.iter().cloned().collect())
            })
            .unwrap_or_default()
    }

    /// Attributes of `src`; `None` when absent or never set.
    pub fn attributes(&self, src: &S) -> Option<A> {
        self.read_src(src)
            .and_then(|stripe| stripe.get(src).and_then(|adj| adj.attributes.clone()))
    }

    /// Sets the attributes of `src`, creating it when absent.
    pub fn set_attributes(&self, src: S, attributes: A) {
        if let Some(mut stripe) = self.write_src(&src) {
            stripe.entry(src).or_default().attributes = Some(attributes);
        }
    }

    /// Runs `f` on the attributes of `src` under its stripe's write lock.
    /// Returns `None` (without calling `f`) when `src` is absent. `f` must not
    /// touch this partition.
    pub fn update_attributes<R>(&self, src: &S, f: impl FnOnce(&mut Option<A>) -> R) -> Option<R> {
        let mut stripe = self.write_src(src)?;
        stripe.get_mut(src).map(|adjacency| f(&mut adjacency.attributes))
    }

    /// Every source vertex stored here, in unspecified order.
    pub fn vertices(&self) -> Vec<S> {
        (0..self.stripes.len())
            .flat_map(|i| self.stripe_vertices(i))
            .collect()
    }

    fn stripe_vertices(&self, stripe: usize) -> Vec<S> {
        self.read(stripe)
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn stripe_edges(&self, stripe: usize) -> Vec<(S, Vec<D>)> {
        self.read(stripe)
            .map(|s| {
                s.iter()
                    .map(|(src, adj)| (src.clone(), adj.neighbors.iter().cloned().collect()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Calls `f(src, d)` for every neighbor `d` of `src`; stops at the first
    /// error.
    pub fn for_each_neighbor(
        &self,
        src: &S,
        mut f: impl FnMut(&S, &D) -> Result<(), DispatchError>,
    ) -> Result<(), DispatchError> {
        self.neighbors(src).iter().try_for_each(|d| f(src, d))
    }

    /// Calls `f` for every source vertex in stripe `stripe`.
    pub fn for_each_vertex_in_stripe(
        &self,
        stripe: usize,
        f: impl FnMut(&S) -> Result<(), DispatchError>,
    ) -> Result<(), DispatchError> {
        self.stripe_vertices(stripe).iter().try_for_each(f)
    }

    /// Calls `f(src, dest)` for every edge in stripe `stripe`.
    pub fn for_each_edge_in_stripe(
        &self,
        stripe: usize,
        mut f: impl FnMut(&S, &D) -> Result<(), DispatchError>,
    ) -> Result<(), DispatchError> {
        for (src, dests) in self.stripe_edges(stripe) {
            dests.iter().try_for_each(|d| f(&src, d))?;
        }
        Ok(())
    }

    /// Calls `f` for every source vertex stored here.
    pub fn for_each_vertex(
        &self,
        mut f: impl FnMut(&S) -> Result<(), DispatchError>,
    ) -> Result<(), DispatchError> {
        (0..self.stripes.len()).try_for_each(|i| self.for_each_vertex_in_stripe(i, &mut f))
    }

    /// Calls `f(src, dest)` for every edge stored here.
    pub fn for_each_edge(
        &self,
        mut f: impl FnMut(&S, &D) -> Result<(), DispatchError>,
    ) -> Result<(), DispatchError> {
        (0..self.stripes.len()).try_for_each(|i| self.for_each_edge_in_stripe(i, &mut f))
    }
}

impl<S, D, A> fmt::Debug for LocalEdgeIndex<S, D, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEdgeIndex")
            .field("stripes", &self.stripes.len())
            .finish_non_exhaustive()
    }
}
