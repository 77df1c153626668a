// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared-memory worker pool backend.
use std::cell::Cell;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, warn};

use super::{claim_blocks, run_contained, BackendExecutor, BackendKind, Job, LoopBody};
use crate::error::DispatchError;
use crate::locality::Locality;
use crate::lock::Lock;

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    // Id of the pool owning this thread; 0 off-pool.
    static POOL_ID: Cell<usize> = const { Cell::new(0) };
}

type Queue = Arc<Lock<Receiver<Job>>>;

/// Shared-memory backend.
///
/// Synchronous work runs on the caller (all localities share one address
/// space). Async jobs are queued to a fixed set of worker threads; a panic in
/// a job is contained to that job and reported through its handle.
///
/// A worker waiting on a handle runs queued jobs while it waits, so a task
/// may wait on async work it started even when every worker is busy.
pub struct ThreadPoolBackend {
    id: usize,
    workers: usize,
    sender: Lock<Option<Sender<Job>>>,
    queue: Queue,
    threads: Lock<Vec<JoinHandle<()>>>,
}

impl ThreadPoolBackend {
    /// Starts `workers` pool threads (at least one).
    pub fn new(workers: usize) -> Result<Self, DispatchError> {
        let workers = workers.max(1);
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel::<Job>();
        let queue: Queue = Arc::new(Lock::new(rx));
        let threads = (0..workers)
            .map(|i| {
                let queue = Arc::clone(&queue);
                std::thread::Builder::new()
                    .name(format!("loci-pool-{i}"))
                    .spawn(move || worker_loop(id, &queue))
                    .map_err(|e| {
                        DispatchError::BackendUnavailable(format!("spawning pool worker: {e}"))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(workers, "thread pool started");
        Ok(Self {
            id,
            workers,
            sender: Lock::new(Some(tx)),
            queue,
            threads: Lock::new(threads),
        })
    }
}

fn worker_loop(id: usize, queue: &Lock<Receiver<Job>>) {
    POOL_ID.with(|pool| pool.set(id));
    loop {
        let next = queue.lock().recv();
        let Ok(job) = next else {
            break;
        };
        run_contained(job);
    }
}

impl BackendExecutor for ThreadPoolBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ThreadPool
    }

    fn concurrency(&self) -> usize {
        self.workers
    }

    fn execute(&self, _from: Locality, _target: Locality, job: Job) -> Result<(), DispatchError> {
        run_contained(job);
        Ok(())
    }

    fn submit(&self, _target: Locality, job: Job) -> Result<(), DispatchError> {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return Err(DispatchError::ShutDown);
        };
        tx.send(job).map_err(|_| DispatchError::ShutDown)
    }

    fn parallel_for(
        &self,
        iterations: Range<usize>,
        body: &LoopBody<'_>,
    ) -> Result<(), DispatchError> {
        if !self.is_worker() {
            return claim_blocks(self.workers, iterations, body);
        }
        // Loop threads of a worker wait the way the worker would.
        let id = self.id;
        claim_blocks(self.workers, iterations, &|i| {
            POOL_ID.with(|pool| pool.set(id));
            body(i)
        })
    }

    fn is_worker(&self) -> bool {
        POOL_ID.with(Cell::get) == self.id
    }

    fn help_one(&self) -> bool {
        // An idle worker parked in `recv` holds the queue; it takes the next
        // job itself.
        let Some(queue) = self.queue.try_lock() else {
            return false;
        };
        let Ok(job) = queue.try_recv() else {
            return false;
        };
        drop(queue);
        run_contained(job);
        true
    }

    fn shutdown(&self) {
        // Closing the channel lets workers drain the queue and exit.
        drop(self.sender.lock().take());
        let threads = std::mem::take(&mut *self.threads.lock());
        let me = std::thread::current().id();
        for handle in threads {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                warn!("pool worker exited by panic");
            }
        }
    }
}

impl Drop for ThreadPoolBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn only_pool_threads_are_workers() {
        let pool = Arc::new(ThreadPoolBackend::new(1).unwrap());
        assert!(!pool.is_worker());
        let (tx, rx) = channel();
        let same = Arc::clone(&pool);
        pool.submit(
            Locality::new(0),
            Box::new(move || {
                let _ = tx.send(same.is_worker());
            }),
        )
        .unwrap();
        assert!(rx.recv().unwrap());

        let other = ThreadPoolBackend::new(1).unwrap();
        let (tx, rx) = channel();
        let mine = Arc::clone(&pool);
        other
            .submit(
                Locality::new(0),
                Box::new(move || {
                    let _ = tx.send(mine.is_worker());
                }),
            )
            .unwrap();
        assert!(!rx.recv().unwrap());
        pool.shutdown();
    }

    #[test]
    fn inline_panics_are_contained() {
        let pool = ThreadPoolBackend::new(1).unwrap();
        pool.execute(
            Locality::new(0),
            Locality::new(0),
            Box::new(|| std::panic::panic_any("inline job failed")),
        )
        .unwrap();
        pool.shutdown();
    }
}
