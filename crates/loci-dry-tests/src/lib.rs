// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for loci crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`graph`] - Reference graph, population loops and audit visitors for
//!   edge index tests

pub mod config;
pub mod graph;

pub use config::InMemoryConfigStore;
pub use graph::{
    degree_of, neighbor, neighbors_of, AddWeight, AuditNeighbors, EraseOddNeighbors, InsertMode,
    NeighborAudit, Populate, Tally, TestGraph, WeightedGraph, EXPECTED_EDGES,
    EXPECTED_EDGES_AFTER_ERASE, MAX_NEIGHBORS, NUM_VERTICES,
};
