// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The runtime context and its dispatch surface.
use std::fmt;
use std::marker::PhantomData;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::backend::{self, BackendExecutor, BackendKind, Job};
use crate::codec::{decode, Envelope};
use crate::config::RuntimeConfig;
use crate::directory::{Directory, DistributedObject, ObjectId};
use crate::error::DispatchError;
use crate::handle::{Completion, Group, Handle, Help, Promise};
use crate::locality::{Locality, LocalityRange};
use crate::lock::Lock;
use crate::task::{task_name, IterTask, Task, TaskRegistry};

struct Shared {
    config: RuntimeConfig,
    backend: Box<dyn BackendExecutor>,
    registry: TaskRegistry,
    directories: Vec<Directory>,
    down: AtomicBool,
}

type Slot<T> = Arc<Lock<Option<Result<T, DispatchError>>>>;

/// A runtime as seen from one locality.
///
/// [`Runtime::init`] returns the view of locality 0. Tasks receive a view of
/// the locality they run on; async calls made through a task's view are
/// covered by the handle that task runs under. Views are cheap to clone and
/// share one backend, task registry and set of directories.
///
/// Never wait, from inside a task, on a handle that covers that task.
#[derive(Clone)]
pub struct Runtime {
    shared: Arc<Shared>,
    here: Locality,
    group: Option<Arc<Group>>,
}

impl Runtime {
    /// Validates `config` and starts the backend it names.
    pub fn init(config: RuntimeConfig) -> Result<Self, DispatchError> {
        config
            .validate()
            .map_err(|e| DispatchError::InvalidConfig(e.to_string()))?;
        let backend = backend::from_config(&config)?;
        Self::with_backend(config, backend)
    }

    /// Starts a runtime on an already constructed backend; `config.backend`
    /// is ignored. The backend must serve `config.num_localities` localities.
    pub fn with_backend(
        config: RuntimeConfig,
        backend: Box<dyn BackendExecutor>,
    ) -> Result<Self, DispatchError> {
        config
            .validate()
            .map_err(|e| DispatchError::InvalidConfig(e.to_string()))?;
        let directories = LocalityRange::all(config.num_localities)
            .iter()
            .map(Directory::new)
            .collect();
        info!(
            localities = config.num_localities,
            backend = ?backend.kind(),
            workers = backend.concurrency(),
            "runtime started"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                backend,
                registry: TaskRegistry::new(),
                directories,
                down: AtomicBool::new(false),
            }),
            here: Locality::new(0),
            group: None,
        })
    }

    /// Stops the backend. Later dispatch calls fail with
    /// [`DispatchError::ShutDown`]. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.backend.shutdown();
        info!(backend = ?self.shared.backend.kind(), "runtime shut down");
    }

    /// True once [`shutdown`](Self::shutdown) ran.
    pub fn is_shut_down(&self) -> bool {
        self.shared.down.load(Ordering::Acquire)
    }

    /// The locality this view belongs to.
    pub fn this_locality(&self) -> Locality {
        self.here
    }

    /// Number of localities.
    pub fn num_localities(&self) -> u32 {
        self.shared.config.num_localities
    }

    /// Every locality, ascending.
    pub fn all_localities(&self) -> LocalityRange {
        LocalityRange::all(self.num_localities())
    }

    /// Workers available to one locality.
    pub fn concurrency(&self) -> usize {
        self.shared.backend.concurrency()
    }

    /// Active backend.
    pub fn backend_kind(&self) -> BackendKind {
        self.shared.backend.kind()
    }

    /// Configuration the runtime was started with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// Receiving-side task registry.
    pub fn registry(&self) -> &TaskRegistry {
        &self.shared.registry
    }

    /// This locality's object directory.
    pub fn directory(&self) -> &Directory {
        // `here` is always a valid index; views are only built for checked localities.
        &self.shared.directories[self.here.index()]
    }

    /// Gives up the current worker's time slice.
    pub fn yield_now(&self) {
        std::thread::yield_now();
    }

    /// The handle async calls made through this view attach to, null when
    /// calls start fresh handles.
    pub fn enclosing(&self) -> Handle {
        self.group
            .as_ref()
            .map_or_else(Handle::null, |g| Handle::from_group(Arc::clone(g)))
    }

    /// A non-null handle with nothing attached, for operations that finished
    /// inline. Waiting on it returns at once.
    pub fn completed(&self) -> Handle {
        Handle::from_group(self.new_group())
    }

    /// A view whose async calls are all covered by `handle`.
    ///
    /// A null (or joined) `handle` is first extended with a fresh group, so a
    /// handle becomes non-null on first use.
    pub fn attach(&self, handle: &mut Handle) -> Runtime {
        let group = if let Some(group) = handle.as_group() {
            Arc::clone(group)
        } else {
            let group = self.new_group();
            *handle = std::mem::take(handle).join(Handle::from_group(Arc::clone(&group)));
            group
        };
        self.view(self.here, Some(group))
    }

    /// Registers `T` ahead of time; required when automatic registration is
    /// disabled.
    pub fn register_task<T: Task>(&self) {
        self.shared.registry.register::<T>();
    }

    /// Registers loop body `T` ahead of time.
    pub fn register_iter_task<T: IterTask>(&self) {
        self.shared.registry.register_iter::<T>();
    }

    // ── synchronous dispatch ────────────────────────────────────────────

    /// Runs `task` on `target` and blocks until it finished.
    pub fn execute_at<T: Task<Output = ()>>(
        &self,
        target: Locality,
        task: T,
    ) -> Result<(), DispatchError> {
        self.execute_at_with_ret(target, task)
    }

    /// Runs `task` on `target`, blocks, and returns its result.
    pub fn execute_at_with_ret<T: Task>(
        &self,
        target: Locality,
        task: T,
    ) -> Result<T::Output, DispatchError> {
        self.check_locality(target)?;
        let envelope = self.seal(&task)?;
        let bytes = self.call(target, envelope)?;
        decode(&bytes)
    }

    /// Runs `task` on every locality and blocks until all finished. The
    /// first failure, in locality order, is returned.
    pub fn execute_on_all<T: Task<Output = ()>>(&self, task: T) -> Result<(), DispatchError> {
        let envelope = self.seal(&task)?;
        let limit = self.payload_limit();
        let started = Instant::now();
        let mut slots = Vec::with_capacity(self.all_localities().len());
        let jobs = self
            .all_localities()
            .iter()
            .map(|target| {
                let slot: Slot<()> = Arc::new(Lock::new(None));
                slots.push((target, Arc::clone(&slot)));
                let view = self.view(target, self.group.clone());
                let envelope = envelope.clone();
                let job: Job = Box::new(move || {
                    let out = view.shared.registry.run(&envelope, &view, limit).map(drop);
                    *slot.lock() = Some(out);
                });
                (target, job)
            })
            .collect();
        self.shared.backend.broadcast(self.here, jobs)?;
        self.log_dispatch("execute_on_all", &envelope, Locality::NULL, started);
        collect_slots(slots)
    }

    /// Runs `iterations` iterations of `task` on `target` and blocks until
    /// all finished. Iteration order is unspecified.
    pub fn for_each_at<T: IterTask>(
        &self,
        target: Locality,
        task: T,
        iterations: usize,
    ) -> Result<(), DispatchError> {
        self.check_locality(target)?;
        let envelope = self.seal_iter(&task)?;
        let started = Instant::now();
        let slot: Slot<()> = Arc::new(Lock::new(None));
        let view = self.view(target, self.group.clone());
        let job: Job = {
            let slot = Arc::clone(&slot);
            let envelope = envelope.clone();
            Box::new(move || {
                let out = view.run_loop(&envelope, 0..iterations);
                *slot.lock() = Some(out);
            })
        };
        self.shared.backend.execute(self.here, target, job)?;
        self.log_dispatch("for_each_at", &envelope, target, started);
        take_slot(&slot, target)
    }

    /// Runs iterations `0..iterations` of `task` block-partitioned across
    /// all localities and blocks until all finished. Every index runs
    /// exactly once.
    pub fn for_each_on_all<T: IterTask>(
        &self,
        task: T,
        iterations: usize,
    ) -> Result<(), DispatchError> {
        let envelope = self.seal_iter(&task)?;
        let started = Instant::now();
        let mut slots = Vec::new();
        let jobs = partition_iterations(iterations, self.num_localities())
            .map(|(target, block)| {
                let slot: Slot<()> = Arc::new(Lock::new(None));
                slots.push((target, Arc::clone(&slot)));
                let view = self.view(target, self.group.clone());
                let envelope = envelope.clone();
                let job: Job = Box::new(move || {
                    let out = view.run_loop(&envelope, block);
                    *slot.lock() = Some(out);
                });
                (target, job)
            })
            .collect();
        self.shared.backend.broadcast(self.here, jobs)?;
        self.log_dispatch("for_each_on_all", &envelope, Locality::NULL, started);
        collect_slots(slots)
    }

    // ── asynchronous dispatch ───────────────────────────────────────────

    /// Schedules `task` on `target`.
    pub fn async_execute_at<T: Task<Output = ()>>(
        &self,
        target: Locality,
        task: T,
    ) -> Result<Handle, DispatchError> {
        self.check_locality(target)?;
        let envelope = self.seal(&task)?;
        let limit = self.payload_limit();
        let group = self.new_group();
        self.spawn(target, &group, &envelope, move |view, envelope| {
            view.shared.registry.run(envelope, view, limit).map(drop)
        })?;
        Ok(Handle::from_group(group))
    }

    /// Schedules `task` on `target`; the result is delivered through the
    /// returned promise.
    pub fn async_execute_at_with_ret<T: Task>(
        &self,
        target: Locality,
        task: T,
    ) -> Result<Promise<T::Output>, DispatchError> {
        self.check_locality(target)?;
        let envelope = self.seal(&task)?;
        let limit = self.payload_limit();
        let group = self.new_group();
        let slot: Arc<Lock<Option<T::Output>>> = Arc::new(Lock::new(None));
        let sink = Arc::clone(&slot);
        self.spawn(target, &group, &envelope, move |view, envelope| {
            let bytes = view.shared.registry.run(envelope, view, limit)?;
            let value: T::Output = decode(&bytes)?;
            *sink.lock() = Some(value);
            Ok(())
        })?;
        Ok(Promise::new(Handle::from_group(group), slot, self.clone()))
    }

    /// Schedules `task` on every locality.
    pub fn async_execute_on_all<T: Task<Output = ()>>(
        &self,
        task: T,
    ) -> Result<Handle, DispatchError> {
        let envelope = self.seal(&task)?;
        let limit = self.payload_limit();
        let group = self.new_group();
        for target in self.all_localities() {
            self.spawn(target, &group, &envelope, move |view, envelope| {
                view.shared.registry.run(envelope, view, limit).map(drop)
            })?;
        }
        Ok(Handle::from_group(group))
    }

    /// Schedules `iterations` iterations of `task` on `target`.
    pub fn async_for_each_at<T: IterTask>(
        &self,
        target: Locality,
        task: T,
        iterations: usize,
    ) -> Result<Handle, DispatchError> {
        self.check_locality(target)?;
        let envelope = self.seal_iter(&task)?;
        let group = self.new_group();
        self.spawn(target, &group, &envelope, move |view, envelope| {
            view.run_loop(envelope, 0..iterations)
        })?;
        Ok(Handle::from_group(group))
    }

    /// Schedules iterations `0..iterations` of `task` block-partitioned
    /// across all localities.
    pub fn async_for_each_on_all<T: IterTask>(
        &self,
        task: T,
        iterations: usize,
    ) -> Result<Handle, DispatchError> {
        let envelope = self.seal_iter(&task)?;
        let group = self.new_group();
        for (target, block) in partition_iterations(iterations, self.num_localities()) {
            self.spawn(target, &group, &envelope, move |view, envelope| {
                view.run_loop(envelope, block)
            })?;
        }
        Ok(Handle::from_group(group))
    }

    /// Blocks until every operation covered by `handle` finished and returns
    /// the first error any of them reported.
    ///
    /// Waiting on a null handle is a misuse: it logs a warning and returns
    /// `Ok`, or fails with [`DispatchError::NullHandleWait`] when
    /// `strict_handles` is set.
    pub fn wait_for_completion(&self, handle: &Handle) -> Result<(), DispatchError> {
        if handle.is_null() {
            if self.shared.config.strict_handles {
                return Err(DispatchError::NullHandleWait);
            }
            warn!(locality = %self.here, "waiting on a null handle");
            return Ok(());
        }
        self.await_handle(handle)
    }

    /// Waits on `handle`; a backend worker runs queued jobs meanwhile so work
    /// it is waiting for cannot starve behind it.
    pub(crate) fn await_handle(&self, handle: &Handle) -> Result<(), DispatchError> {
        let backend = &self.shared.backend;
        if !backend.is_worker() {
            return handle.wait(None);
        }
        let help: Help<'_> = &|| backend.help_one();
        handle.wait(Some(help))
    }

    // ── object directory ────────────────────────────────────────────────

    /// Mints an id on this locality and constructs a partition of `O` under
    /// it on every locality before returning this locality's partition.
    ///
    /// If any locality fails to construct, partitions already built are
    /// discarded and the failure is returned.
    pub fn create<O: DistributedObject>(&self, args: O::Args) -> Result<Arc<O>, DispatchError> {
        let oid = self.directory().mint()?;
        let created = self.execute_on_all(CreatePartition::<O> {
            oid,
            args,
            _object: PhantomData,
        });
        if let Err(err) = created {
            if let Err(undo) = self.execute_on_all(ForgetPartition { oid }) {
                warn!(%oid, error = %undo, "discarding partitions of a failed create failed");
            }
            return Err(err);
        }
        debug!(%oid, object = task_name::<O>(), "created distributed object");
        self.get_ptr(oid)
    }

    /// Resolves this locality's partition of `oid`. Fails with
    /// [`DispatchError::StaleObjectId`] for ids never created or destroyed.
    pub fn get_ptr<O: DistributedObject>(&self, oid: ObjectId) -> Result<Arc<O>, DispatchError> {
        self.directory().get::<O>(oid)
    }

    /// Deregisters `oid` on every locality.
    pub fn destroy<O: DistributedObject>(&self, oid: ObjectId) -> Result<(), DispatchError> {
        self.get_ptr::<O>(oid)?;
        self.execute_on_all(DestroyPartition { oid })?;
        debug!(%oid, object = task_name::<O>(), "destroyed distributed object");
        Ok(())
    }

    // ── internals ───────────────────────────────────────────────────────

    fn view(&self, here: Locality, group: Option<Arc<Group>>) -> Runtime {
        Runtime {
            shared: Arc::clone(&self.shared),
            here,
            group,
        }
    }

    fn new_group(&self) -> Arc<Group> {
        Group::new(self.group.clone())
    }

    fn payload_limit(&self) -> usize {
        self.shared.config.max_payload_bytes
    }

    fn check_live(&self) -> Result<(), DispatchError> {
        if self.is_shut_down() {
            return Err(DispatchError::ShutDown);
        }
        Ok(())
    }

    fn check_locality(&self, target: Locality) -> Result<(), DispatchError> {
        if !self.all_localities().contains(target) {
            return Err(DispatchError::LocalityOutOfRange {
                locality: target,
                num_localities: self.num_localities(),
            });
        }
        Ok(())
    }

    fn seal<T: Task>(&self, task: &T) -> Result<Envelope, DispatchError> {
        self.check_live()?;
        if self.shared.config.auto_register_tasks {
            self.shared.registry.register::<T>();
        }
        Envelope::seal(task_name::<T>(), task, self.payload_limit())
    }

    fn seal_iter<T: IterTask>(&self, task: &T) -> Result<Envelope, DispatchError> {
        self.check_live()?;
        if self.shared.config.auto_register_tasks {
            self.shared.registry.register_iter::<T>();
        }
        Envelope::seal(task_name::<T>(), task, self.payload_limit())
    }

    fn call(&self, target: Locality, envelope: Envelope) -> Result<Vec<u8>, DispatchError> {
        let started = Instant::now();
        let limit = self.payload_limit();
        let slot: Slot<Vec<u8>> = Arc::new(Lock::new(None));
        let view = self.view(target, self.group.clone());
        let job: Job = {
            let slot = Arc::clone(&slot);
            let envelope = envelope.clone();
            Box::new(move || {
                let out = view.shared.registry.run(&envelope, &view, limit);
                *slot.lock() = Some(out);
            })
        };
        self.shared.backend.execute(self.here, target, job)?;
        self.log_dispatch("execute_at", &envelope, target, started);
        take_slot(&slot, target)
    }

    fn spawn<F>(
        &self,
        target: Locality,
        group: &Arc<Group>,
        envelope: &Envelope,
        work: F,
    ) -> Result<(), DispatchError>
    where
        F: FnOnce(&Runtime, &Envelope) -> Result<(), DispatchError> + Send + 'static,
    {
        let mut completion = Completion::new(group, target);
        let view = self.view(target, Some(Arc::clone(group)));
        let envelope = envelope.clone();
        trace!(
            task = envelope.task(),
            from = %self.here,
            to = %target,
            bytes = envelope.len(),
            "async dispatch"
        );
        let job: Job = Box::new(move || {
            if let Err(err) = work(&view, &envelope) {
                completion.fail(err);
            }
            drop(completion);
        });
        self.shared.backend.submit(target, job)
    }

    fn run_loop(&self, envelope: &Envelope, block: Range<usize>) -> Result<(), DispatchError> {
        let body = self.shared.registry.body(envelope)?;
        self.shared
            .backend
            .parallel_for(block, &|i| body(self, i))
    }

    fn log_dispatch(&self, op: &'static str, envelope: &Envelope, to: Locality, started: Instant) {
        trace!(
            op,
            task = envelope.task(),
            from = %self.here,
            to = %to,
            bytes = envelope.len(),
            elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
            "dispatch"
        );
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("here", &self.here)
            .field("num_localities", &self.num_localities())
            .field("backend", &self.backend_kind())
            .field("attached", &self.group.is_some())
            .finish()
    }
}

fn take_slot<T>(slot: &Slot<T>, target: Locality) -> Result<T, DispatchError> {
    slot.lock()
        .take()
        .unwrap_or(Err(DispatchError::TaskPanicked(target)))
}

fn collect_slots(slots: Vec<(Locality, Slot<()>)>) -> Result<(), DispatchError> {
    slots
        .iter()
        .try_for_each(|(target, slot)| take_slot(slot, *target))
}

/// Block partition of `0..iterations` over `localities`: locality `l` gets
/// `[l * per, (l + 1) * per)` clipped to `iterations`, where
/// `per = ceil(iterations / localities)`. Empty blocks are skipped.
fn partition_iterations(
    iterations: usize,
    localities: u32,
) -> impl Iterator<Item = (Locality, Range<usize>)> {
    let per = iterations.div_ceil(localities.max(1) as usize);
    LocalityRange::all(localities)
        .into_iter()
        .filter_map(move |loc| {
            let lo = loc.index().saturating_mul(per).min(iterations);
            let hi = lo.saturating_add(per).min(iterations);
            (lo < hi).then_some((loc, lo..hi))
        })
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
struct CreatePartition<O: DistributedObject> {
    oid: ObjectId,
    args: O::Args,
    #[serde(skip)]
    _object: PhantomData<fn() -> O>,
}

impl<O: DistributedObject> Task for CreatePartition<O> {
    type Output = ();

    fn run(self, rt: &Runtime) -> Result<(), DispatchError> {
        let partition = O::construct(self.oid, rt, self.args)?;
        rt.directory().insert(self.oid, Arc::new(partition))
    }
}

#[derive(Serialize, Deserialize)]
struct DestroyPartition {
    oid: ObjectId,
}

impl Task for DestroyPartition {
    type Output = ();

    fn run(self, rt: &Runtime) -> Result<(), DispatchError> {
        rt.directory().remove(self.oid)
    }
}

#[derive(Serialize, Deserialize)]
struct ForgetPartition {
    oid: ObjectId,
}

impl Task for ForgetPartition {
    type Output = ();

    fn run(self, rt: &Runtime) -> Result<(), DispatchError> {
        let _ = rt.directory().remove(self.oid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_covers_every_iteration_once() {
        for (n, l) in [(0, 1), (1, 4), (10, 3), (4096, 4), (5, 8), (7, 7)] {
            let blocks: Vec<_> = partition_iterations(n, l).collect();
            let covered: Vec<usize> = blocks.iter().flat_map(|(_, r)| r.clone()).collect();
            assert_eq!(covered, (0..n).collect::<Vec<_>>(), "n={n} l={l}");
            assert!(blocks.iter().all(|(loc, r)| loc.get() < l && !r.is_empty()));
        }
    }

    #[test]
    fn last_locality_takes_the_remainder() {
        let blocks: Vec<_> = partition_iterations(10, 4).collect();
        assert_eq!(
            blocks,
            vec![
                (Locality::new(0), 0..3),
                (Locality::new(1), 3..6),
                (Locality::new(2), 6..9),
                (Locality::new(3), 9..10),
            ]
        );
    }
}
