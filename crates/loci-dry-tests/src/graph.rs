// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reference graph for edge index tests.
//!
//! Vertex `i` in `0..NUM_VERTICES` has `degree_of(i) = max(i mod 64, 1)`
//! neighbors `i, i + 1, …, i + degree_of(i) - 1`. Population, erasure and
//! audits run as loop bodies and visitors so they execute on whichever
//! locality the runtime hands them to.
use loci_collections::{
    route, AttributeUpdate, EdgeIndex, NeighborVisitor, OnePerLocality, VertexVisitor,
};
use loci_core::{DispatchError, IterTask, ObjectId, Runtime};
use serde::{Deserialize, Serialize};

/// Source vertices in the reference graph.
pub const NUM_VERTICES: u64 = 4096;

/// Degree period of the reference graph.
pub const MAX_NEIGHBORS: u64 = 64;

/// `Σ degree_of(i)` over the reference graph.
pub const EXPECTED_EDGES: usize = 129_088;

/// Edges left after [`EraseOddNeighbors`]: `Σ ceil(degree_of(i) / 2)`.
pub const EXPECTED_EDGES_AFTER_ERASE: usize = 65_600;

/// The edge index the fixtures operate on.
pub type TestGraph = EdgeIndex<u64, i32>;

/// The attributed variant: a running sum per vertex.
pub type WeightedGraph = EdgeIndex<u64, i32, u64>;

/// Number of neighbors of `src`.
pub fn degree_of(src: u64) -> u64 {
    (src % MAX_NEIGHBORS).max(1)
}

/// `j`-th neighbor of `src`.
pub fn neighbor(src: u64, j: u64) -> i32 {
    i32::try_from(src + j).unwrap_or(i32::MAX)
}

/// Every neighbor of `src`, ascending.
pub fn neighbors_of(src: u64) -> Vec<i32> {
    (0..degree_of(src)).map(|j| neighbor(src, j)).collect()
}

/// How [`Populate`] inserts a vertex's edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertMode {
    /// One `insert` per edge.
    Insert,
    /// One `async_insert` per edge.
    AsyncInsert,
    /// One `insert_edge_list` per vertex.
    EdgeList,
    /// One `async_insert_edge_list` per vertex.
    AsyncEdgeList,
    /// One `buffered_insert` per edge.
    Buffered,
    /// One `buffered_async_insert` per edge.
    BufferedAsync,
}

impl InsertMode {
    /// Every mode.
    pub const ALL: [InsertMode; 6] = [
        InsertMode::Insert,
        InsertMode::AsyncInsert,
        InsertMode::EdgeList,
        InsertMode::AsyncEdgeList,
        InsertMode::Buffered,
        InsertMode::BufferedAsync,
    ];

    /// True when edges become visible only after a buffer flush.
    pub fn is_buffered(self) -> bool {
        matches!(self, InsertMode::Buffered | InsertMode::BufferedAsync)
    }
}

/// Loop body inserting vertex `iteration` of the reference graph.
///
/// Handles from async modes are dropped: run it through a view attached to
/// the handle you wait on. Buffered modes still need a
/// `wait_for_buffered_insert` afterwards.
#[derive(Serialize, Deserialize)]
pub struct Populate {
    /// The graph to fill.
    pub graph: ObjectId,
    /// Insertion path.
    pub mode: InsertMode,
}

impl IterTask for Populate {
    fn run(&self, rt: &Runtime, iteration: usize) -> Result<(), DispatchError> {
        let graph = rt.get_ptr::<TestGraph>(self.graph)?;
        let src = iteration as u64;
        match self.mode {
            InsertMode::EdgeList => graph.insert_edge_list(rt, src, &neighbors_of(src), false),
            InsertMode::AsyncEdgeList => graph
                .async_insert_edge_list(rt, src, &neighbors_of(src), false)
                .map(drop),
            mode => neighbors_of(src).into_iter().try_for_each(|dest| match mode {
                InsertMode::AsyncInsert => graph.async_insert(rt, src, dest).map(drop),
                InsertMode::Buffered => graph.buffered_insert(rt, src, dest),
                InsertMode::BufferedAsync => graph.buffered_async_insert(rt, src, dest).map(drop),
                _ => graph.insert(rt, src, dest),
            }),
        }
    }
}

/// Loop body erasing every odd-positioned neighbor of vertex `iteration`.
#[derive(Serialize, Deserialize)]
pub struct EraseOddNeighbors {
    /// The graph to thin out.
    pub graph: ObjectId,
}

impl IterTask for EraseOddNeighbors {
    fn run(&self, rt: &Runtime, iteration: usize) -> Result<(), DispatchError> {
        let graph = rt.get_ptr::<TestGraph>(self.graph)?;
        let src = iteration as u64;
        (1..degree_of(src))
            .step_by(2)
            .try_for_each(|j| graph.erase(rt, src, neighbor(src, j)))
    }
}

/// Per-locality record of neighbor visits.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborAudit {
    /// Bit `j` of `masks[i]` is set once `i → i + j` was visited.
    pub masks: Vec<u64>,
    /// Visits of an edge already visited.
    pub duplicates: u64,
    /// Visits of an edge outside the reference graph.
    pub strays: u64,
    /// Visits delivered to a locality that does not own the source.
    pub misrouted: u64,
}

impl NeighborAudit {
    /// An audit of `vertices` sources with nothing visited.
    pub fn new(vertices: u64) -> Self {
        Self {
            masks: vec![0; usize::try_from(vertices).unwrap_or(0)],
            ..Self::default()
        }
    }

    fn record(&mut self, rt: &Runtime, src: u64, dest: i32) {
        if route(&src, rt.num_localities()) != rt.this_locality() {
            self.misrouted += 1;
        }
        let offset = i64::from(dest) - i64::try_from(src).unwrap_or(i64::MAX);
        let Some(mask) = usize::try_from(src).ok().and_then(|i| self.masks.get_mut(i)) else {
            self.strays += 1;
            return;
        };
        match u64::try_from(offset) {
            Ok(j) if j < degree_of(src) => {
                let bit = 1_u64 << j;
                if *mask & bit != 0 {
                    self.duplicates += 1;
                }
                *mask |= bit;
            }
            _ => self.strays += 1,
        }
    }

    /// Combines audits from different localities.
    pub fn merge(audits: impl IntoIterator<Item = NeighborAudit>) -> NeighborAudit {
        let mut merged = NeighborAudit::default();
        for audit in audits {
            if merged.masks.len() < audit.masks.len() {
                merged.masks.resize(audit.masks.len(), 0);
            }
            for (into, from) in merged.masks.iter_mut().zip(&audit.masks) {
                if *into & *from != 0 {
                    merged.duplicates += 1;
                }
                *into |= *from;
            }
            merged.duplicates += audit.duplicates;
            merged.strays += audit.strays;
            merged.misrouted += audit.misrouted;
        }
        merged
    }

    /// Sources whose visited set differs from the full reference graph.
    pub fn incomplete(&self) -> Vec<u64> {
        self.differing(|src| (1_u64 << degree_of(src)) - 1)
    }

    /// Sources whose visited offsets differ from the mask `expect(src)`.
    pub fn differing(&self, expect: impl Fn(u64) -> u64) -> Vec<u64> {
        self.masks
            .iter()
            .zip(0_u64..)
            .filter(|&(&mask, src)| mask != expect(src))
            .map(|(_, src)| src)
            .collect()
    }
}

/// Records every visited edge into an audit held in a
/// `OnePerLocality<NeighborAudit>`.
#[derive(Serialize, Deserialize)]
pub struct AuditNeighbors {
    /// Id of the audit object.
    pub audit: ObjectId,
}

impl NeighborVisitor<u64, i32> for AuditNeighbors {
    fn visit(&self, rt: &Runtime, src: &u64, dest: &i32) -> Result<(), DispatchError> {
        let audit = rt.get_ptr::<OnePerLocality<NeighborAudit>>(self.audit)?;
        audit.with(|a| a.record(rt, *src, *dest));
        Ok(())
    }
}

/// Counts visits into a `OnePerLocality<u64>`; usable for vertices and edges.
#[derive(Serialize, Deserialize)]
pub struct Tally {
    /// Id of the counter object.
    pub counter: ObjectId,
}

impl Tally {
    fn bump(&self, rt: &Runtime) -> Result<(), DispatchError> {
        rt.get_ptr::<OnePerLocality<u64>>(self.counter)?
            .with(|n| *n += 1);
        Ok(())
    }
}

impl VertexVisitor<u64> for Tally {
    fn visit(&self, rt: &Runtime, _src: &u64) -> Result<(), DispatchError> {
        self.bump(rt)
    }
}

impl NeighborVisitor<u64, i32> for Tally {
    fn visit(&self, rt: &Runtime, _src: &u64, _dest: &i32) -> Result<(), DispatchError> {
        self.bump(rt)
    }
}

/// Adds a constant to a vertex's weight, starting from zero.
#[derive(Serialize, Deserialize)]
pub struct AddWeight(pub u64);

impl AttributeUpdate<u64, u64> for AddWeight {
    fn apply(&self, _src: &u64, attributes: &mut Option<u64>) {
        *attributes.get_or_insert(0) += self.0;
    }
}
