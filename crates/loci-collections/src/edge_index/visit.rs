// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Callbacks shipped to the partitions of an edge index.
//!
//! Visitors are plain serializable values: the caller's visitor is encoded,
//! sent to the owning localities, and invoked there with that locality's
//! runtime view. State a visitor needs to accumulate belongs in another
//! distributed object (for example a
//! [`OnePerLocality`](crate::OnePerLocality)) resolved through that view.
use loci_core::{DispatchError, Runtime};
use serde::{de::DeserializeOwned, Serialize};

/// Called once per `(source, neighbor)` pair.
pub trait NeighborVisitor<S, D>: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Visits edge `src → dest`. `rt` is the view of the locality owning
    /// `src`; async calls made through it are covered by the traversal's
    /// handle.
    fn visit(&self, rt: &Runtime, src: &S, dest: &D) -> Result<(), DispatchError>;
}

/// Called once per source vertex.
pub trait VertexVisitor<S>: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Visits `src` on the locality owning it.
    fn visit(&self, rt: &Runtime, src: &S) -> Result<(), DispatchError>;
}

/// An in-place update of one vertex's attributes.
///
/// Runs under the owning stripe's write lock, so it gets no runtime view.
pub trait AttributeUpdate<S, A>: Serialize + DeserializeOwned + Send + 'static {
    /// Updates the attributes of `src`; `attributes` is `None` when they
    /// were never set.
    fn apply(&self, src: &S, attributes: &mut Option<A>);
}
