// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! loci-collections: sharded containers built on the loci runtime.
//!
//! Containers here ([`EdgeIndex`], [`Hashmap`]) are
//! [`DistributedObject`](loci_core::DistributedObject)s:
//! one partition per locality, keys routed to their owning partition by the
//! frozen [`shard::route`] formula.
//!
//! ```
//! use loci_collections::EdgeIndex;
//! use loci_core::{BackendKind, DispatchError, Runtime, RuntimeConfig};
//!
//! let rt = Runtime::init(RuntimeConfig::with_localities(2, BackendKind::ThreadPool))?;
//! let graph = EdgeIndex::<u64, u64>::create(&rt, 1024)?;
//! graph.insert_edge_list(&rt, 7, &[1, 2, 3], false)?;
//! graph.insert(&rt, 8, 7)?;
//! assert_eq!(graph.size(&rt)?, 2);
//! assert_eq!(graph.get_degree(&rt, 7)?, 3);
//! rt.shutdown();
//! # Ok::<(), DispatchError>(())
//! ```
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

/// Insertion buffers for batched remote writes.
pub mod buffer;
/// Distributed adjacency index.
pub mod edge_index;
/// Distributed key-value map.
pub mod hashmap;
mod one_per_locality;
pub mod shard;

pub use buffer::{wait_for_buffered_insert, BufferedContainer, Buffers};
pub use edge_index::{
    AttributeUpdate, EdgeIndex, LocalEdgeIndex, NeighborVisitor, VertexVisitor,
};
pub use hashmap::{EntryUpdate, EntryVisitor, Hashmap, LocalHashmap};
pub use one_per_locality::OnePerLocality;
pub use shard::{route, stable_hash, Key, StableHasher};
