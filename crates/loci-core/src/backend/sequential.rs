// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Single-threaded reference backend.
use std::ops::Range;

use super::{run_contained, BackendExecutor, BackendKind, Job, LoopBody};
use crate::error::DispatchError;
use crate::locality::Locality;

/// Reference backend: every job runs inline on the calling thread.
///
/// Async calls have completed by the time they return, so waits never block.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialBackend;

impl SequentialBackend {
    /// Creates the backend.
    pub const fn new() -> Self {
        Self
    }
}

impl BackendExecutor for SequentialBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sequential
    }

    fn concurrency(&self) -> usize {
        1
    }

    fn execute(&self, _from: Locality, _target: Locality, job: Job) -> Result<(), DispatchError> {
        run_contained(job);
        Ok(())
    }

    fn submit(&self, _target: Locality, job: Job) -> Result<(), DispatchError> {
        run_contained(job);
        Ok(())
    }

    fn parallel_for(
        &self,
        iterations: Range<usize>,
        body: &LoopBody<'_>,
    ) -> Result<(), DispatchError> {
        iterations.into_iter().try_for_each(body)
    }

    fn shutdown(&self) {}
}
