// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Actor backend over a tokio runtime.
use std::sync::mpsc as reply;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::debug;

use super::{run_contained, BackendExecutor, BackendKind, Job};
use crate::error::DispatchError;
use crate::locality::Locality;
use crate::lock::Lock;

const ASYNC_WORKERS: usize = 2;
const MAX_BLOCKING_THREADS: usize = 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Actor backend: one tokio inbox per locality.
///
/// Each locality's actor receives jobs in order and hands them to the
/// blocking pool, so a long-running job never stalls the inbox. A synchronous
/// call to another locality blocks the caller on a reply channel; a call to
/// the caller's own locality runs inline. Every job runs contained, so a
/// panic surfaces through the job's result slot rather than the reply.
pub struct ActorBackend {
    workers: usize,
    inboxes: Lock<Option<Vec<UnboundedSender<Job>>>>,
    runtime: Lock<Option<tokio::runtime::Runtime>>,
}

impl ActorBackend {
    /// Starts one actor per locality.
    pub fn new(num_localities: u32, workers: usize) -> Result<Self, DispatchError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(ASYNC_WORKERS)
            .max_blocking_threads(MAX_BLOCKING_THREADS)
            .thread_name("loci-actor")
            .build()
            .map_err(|e| DispatchError::BackendUnavailable(format!("starting tokio: {e}")))?;

        let inboxes = (0..num_localities)
            .map(|locality| {
                let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
                runtime.spawn(async move {
                    while let Some(job) = rx.recv().await {
                        drop(tokio::task::spawn_blocking(move || run_contained(job)));
                    }
                    debug!(locality, "actor inbox closed");
                });
                tx
            })
            .collect();

        Ok(Self {
            workers: workers.max(1),
            inboxes: Lock::new(Some(inboxes)),
            runtime: Lock::new(Some(runtime)),
        })
    }

    fn deliver(&self, target: Locality, job: Job) -> Result<(), DispatchError> {
        let inboxes = self.inboxes.lock();
        let inbox = inboxes
            .as_ref()
            .ok_or(DispatchError::ShutDown)?
            .get(target.index())
            .ok_or(DispatchError::LocalityOutOfRange {
                locality: target,
                num_localities: inboxes.as_ref().map_or(0, |v| v.len() as u32),
            })?;
        inbox.send(job).map_err(|_| DispatchError::ShutDown)
    }
}

impl BackendExecutor for ActorBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Actor
    }

    fn concurrency(&self) -> usize {
        self.workers
    }

    fn execute(&self, from: Locality, target: Locality, job: Job) -> Result<(), DispatchError> {
        if from == target {
            run_contained(job);
            return Ok(());
        }
        let (tx, rx) = reply::sync_channel::<()>(1);
        self.deliver(
            target,
            Box::new(move || {
                run_contained(job);
                let _ = tx.send(());
            }),
        )?;
        // The sender drops unsent when the inbox closes under the job.
        rx.recv().map_err(|_| DispatchError::TaskPanicked(target))
    }

    fn submit(&self, target: Locality, job: Job) -> Result<(), DispatchError> {
        self.deliver(target, job)
    }

    fn broadcast(&self, from: Locality, jobs: Vec<(Locality, Job)>) -> Result<(), DispatchError> {
        let (tx, rx) = reply::channel::<Locality>();
        let mut local = Vec::new();
        let mut remote = Vec::new();
        for (target, job) in jobs {
            if target == from {
                local.push(job);
                continue;
            }
            let tx = tx.clone();
            self.deliver(
                target,
                Box::new(move || {
                    run_contained(job);
                    let _ = tx.send(target);
                }),
            )?;
            remote.push(target);
        }
        drop(tx);

        for job in local {
            run_contained(job);
        }

        let mut finished = Vec::with_capacity(remote.len());
        while finished.len() < remote.len() {
            match rx.recv() {
                Ok(target) => finished.push(target),
                Err(_) => {
                    let missing = remote
                        .iter()
                        .copied()
                        .find(|t| !finished.contains(t))
                        .unwrap_or(Locality::NULL);
                    return Err(DispatchError::TaskPanicked(missing));
                }
            }
        }
        Ok(())
    }

    fn shutdown(&self) {
        drop(self.inboxes.lock().take());
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };
        if tokio::runtime::Handle::try_current().is_ok() {
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
        }
    }
}

impl Drop for ActorBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
