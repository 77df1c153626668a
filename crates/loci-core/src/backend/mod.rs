// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Execution backends.
//!
//! The runtime packages every dispatched operation as a [`Job`] that already
//! knows how to resolve its envelope on the target locality. A backend only
//! decides *where and when* jobs run:
//!
//! - [`SequentialBackend`] runs everything inline on the caller.
//! - [`ThreadPoolBackend`] runs async jobs on persistent worker threads.
//! - [`ActorBackend`] delivers jobs to one tokio inbox actor per locality.
//!
//! Parallel loops share one implementation: scoped workers claiming blocks of
//! iterations through an atomic counter.
//!
//! A panicking job never unwinds into the runtime: every backend contains it
//! with [`run_contained`], and the job's result slot or completion reports
//! [`DispatchError::TaskPanicked`].
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::DispatchError;
use crate::locality::Locality;
use crate::lock::Lock;
use crate::RuntimeConfig;

mod actor;
mod pool;
mod sequential;

pub use actor::ActorBackend;
pub use pool::ThreadPoolBackend;
pub use sequential::SequentialBackend;

/// A unit of work bound for one locality.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Loop body handed to [`BackendExecutor::parallel_for`].
pub type LoopBody<'a> = dyn Fn(usize) -> Result<(), DispatchError> + Sync + 'a;

/// Which backend [`Runtime::init`](crate::Runtime::init) starts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Single-threaded reference backend.
    Sequential,
    /// Shared-memory worker pool.
    #[default]
    ThreadPool,
    /// One tokio actor per locality.
    Actor,
}

impl BackendKind {
    /// Every backend, in reference order.
    pub const ALL: [Self; 3] = [Self::Sequential, Self::ThreadPool, Self::Actor];
}

/// Runs jobs on behalf of a [`Runtime`](crate::Runtime).
pub trait BackendExecutor: Send + Sync + 'static {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Workers available to one locality.
    fn concurrency(&self) -> usize;

    /// Runs `job` on `target` and returns once it finished.
    fn execute(&self, from: Locality, target: Locality, job: Job) -> Result<(), DispatchError>;

    /// Schedules `job` on `target` and returns without waiting for it.
    fn submit(&self, target: Locality, job: Job) -> Result<(), DispatchError>;

    /// Runs every job on its locality and returns once all finished.
    fn broadcast(&self, from: Locality, jobs: Vec<(Locality, Job)>) -> Result<(), DispatchError> {
        for (target, job) in jobs {
            self.execute(from, target, job)?;
        }
        Ok(())
    }

    /// Runs `body` for every index in `iterations` on the calling locality,
    /// spread over [`concurrency`](Self::concurrency) workers. The first
    /// error stops further blocks from being claimed and is returned.
    fn parallel_for(
        &self,
        iterations: Range<usize>,
        body: &LoopBody<'_>,
    ) -> Result<(), DispatchError> {
        claim_blocks(self.concurrency(), iterations, body)
    }

    /// True when the calling thread is one of this backend's workers. A
    /// worker that waits must keep the backend's queue moving.
    fn is_worker(&self) -> bool {
        false
    }

    /// Runs one queued job on the calling thread if one is waiting. Returns
    /// false when nothing ran.
    fn help_one(&self) -> bool {
        false
    }

    /// Stops accepting work and releases backend threads.
    fn shutdown(&self);
}

/// Runs `job` on the calling thread, containing a panic. Returns false when
/// the job panicked.
pub(crate) fn run_contained(job: Job) -> bool {
    let finished = catch_unwind(AssertUnwindSafe(job)).is_ok();
    if !finished {
        warn!("job panicked");
    }
    finished
}

/// Builds the backend named by `config.backend`.
pub fn from_config(config: &RuntimeConfig) -> Result<Box<dyn BackendExecutor>, DispatchError> {
    Ok(match config.backend {
        BackendKind::Sequential => Box::new(SequentialBackend::new()),
        BackendKind::ThreadPool => Box::new(ThreadPoolBackend::new(
            config.workers_per_locality,
        )?),
        BackendKind::Actor => Box::new(ActorBackend::new(
            config.num_localities,
            config.workers_per_locality,
        )?),
    })
}

/// Blocks handed to one claim; several per worker keeps the tail short.
const BLOCKS_PER_WORKER: usize = 4;

/// Work-stealing loop over `iterations`.
///
/// The range is cut into equal blocks; `workers` scoped threads claim blocks
/// through an atomic counter until none remain. With one worker or one block
/// the loop runs on the caller.
pub(crate) fn claim_blocks(
    workers: usize,
    iterations: Range<usize>,
    body: &LoopBody<'_>,
) -> Result<(), DispatchError> {
    let len = iterations.len();
    if len == 0 {
        return Ok(());
    }
    let workers = workers.clamp(1, len);
    if workers == 1 {
        return iterations.into_iter().try_for_each(body);
    }

    let block = len.div_ceil(workers * BLOCKS_PER_WORKER).max(1);
    let num_blocks = len.div_ceil(block);
    let next_block = AtomicUsize::new(0);
    let failure: Lock<Option<DispatchError>> = Lock::new(None);

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..workers.min(num_blocks))
            .map(|_| {
                let next_block = &next_block;
                let failure = &failure;
                let start = iterations.start;
                s.spawn(move || loop {
                    let claimed = next_block.fetch_add(1, Ordering::Relaxed);
                    if claimed >= num_blocks {
                        break;
                    }
                    let lo = start + claimed * block;
                    let hi = (lo + block).min(start + len);
                    if let Err(err) = (lo..hi).try_for_each(body) {
                        failure.with(|slot| {
                            slot.get_or_insert(err);
                        });
                        // Park the counter past the end so peers stop claiming.
                        next_block.store(num_blocks, Ordering::Relaxed);
                        break;
                    }
                })
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.join() {
                std::panic::resume_unwind(e);
            }
        }
    });

    failure.into_inner().map_or(Ok(()), Err)
}
