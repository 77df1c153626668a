// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Completion handles for asynchronous dispatch.
//!
//! A handle is either null, a *group* counting the operations attached to it,
//! or a join of other handles. Groups nest: an async call issued from inside a
//! task that runs under group `G` gets a fresh child group of `G`, and every
//! enter/leave on the child is mirrored on `G`. Waiting on `G` therefore waits
//! for all work transitively spawned under it, while waiting on the child
//! never waits for the task that spawned it.
//!
//! A waiter may bring a *help* callback. Instead of parking for good it runs
//! the callback between short timed waits, which lets a backend worker drain
//! the queue its own children sit in.
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::DispatchError;
use crate::locality::Locality;
use crate::lock::Lock;
use crate::runtime::Runtime;

/// Runs one unit of someone else's work; false when there was none.
pub(crate) type Help<'a> = &'a dyn Fn() -> bool;

// How long a helping waiter parks before looking for work again.
const HELP_POLL: Duration = Duration::from_millis(1);

#[derive(Default)]
struct GroupState {
    pending: usize,
    error: Option<DispatchError>,
}

pub(crate) struct Group {
    state: Mutex<GroupState>,
    done: Condvar,
    parent: Option<Arc<Group>>,
}

impl Group {
    pub(crate) fn new(parent: Option<Arc<Group>>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GroupState::default()),
            done: Condvar::new(),
            parent,
        })
    }

    fn state(&self) -> MutexGuard<'_, GroupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self) {
        self.state().pending += 1;
        if let Some(parent) = &self.parent {
            parent.enter();
        }
    }

    fn leave(&self, error: Option<&DispatchError>) {
        {
            let mut state = self.state();
            state.pending = state.pending.saturating_sub(1);
            if state.error.is_none() {
                state.error = error.cloned();
            }
            if state.pending == 0 {
                self.done.notify_all();
            }
        }
        if let Some(parent) = &self.parent {
            parent.leave(error);
        }
    }

    fn pending(&self) -> usize {
        self.state().pending
    }

    fn wait(&self, help: Option<Help<'_>>) -> Result<(), DispatchError> {
        let mut state = self.state();
        while state.pending > 0 {
            let Some(help) = help else {
                state = self
                    .done
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            };
            drop(state);
            let helped = help();
            state = self.state();
            if helped || state.pending == 0 {
                continue;
            }
            state = self
                .done
                .wait_timeout(state, HELP_POLL)
                .map_or_else(|poisoned| poisoned.into_inner().0, |(guard, _)| guard);
        }
        state.error.take().map_or(Ok(()), Err)
    }
}

/// Tracks one scheduled operation on a group.
///
/// Created (and counted) before the operation is handed to a backend; dropping
/// it marks the operation finished. A drop during unwinding reports
/// [`DispatchError::TaskPanicked`].
pub(crate) struct Completion {
    group: Arc<Group>,
    error: Option<DispatchError>,
    locality: Locality,
}

impl Completion {
    pub(crate) fn new(group: &Arc<Group>, locality: Locality) -> Self {
        group.enter();
        Self {
            group: Arc::clone(group),
            error: None,
            locality,
        }
    }

    pub(crate) fn fail(&mut self, error: DispatchError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        let mut error = self.error.take();
        if error.is_none() && std::thread::panicking() {
            error = Some(DispatchError::TaskPanicked(self.locality));
        }
        self.group.leave(error.as_ref());
    }
}

#[derive(Clone, Default)]
enum Inner {
    #[default]
    Null,
    Group(Arc<Group>),
    Joined(Arc<[Handle]>),
}

/// Completion token for one or more asynchronous operations.
///
/// Returned by every async dispatch call and observed through
/// [`Runtime::wait_for_completion`](crate::Runtime::wait_for_completion).
/// Handles compose with [`Handle::join`] and [`Handle::join_all`].
#[derive(Clone, Default)]
pub struct Handle {
    inner: Inner,
}

impl Handle {
    /// A handle no operation is attached to.
    pub const fn null() -> Self {
        Self { inner: Inner::Null }
    }

    pub(crate) fn from_group(group: Arc<Group>) -> Self {
        Self {
            inner: Inner::Group(group),
        }
    }

    pub(crate) fn as_group(&self) -> Option<&Arc<Group>> {
        match &self.inner {
            Inner::Group(group) => Some(group),
            _ => None,
        }
    }

    /// True when no operation was ever attached.
    pub fn is_null(&self) -> bool {
        match &self.inner {
            Inner::Null => true,
            Inner::Group(_) => false,
            Inner::Joined(all) => all.iter().all(Handle::is_null),
        }
    }

    /// True when every attached operation has finished.
    pub fn is_complete(&self) -> bool {
        self.pending() == 0
    }

    /// Number of attached operations still running.
    pub fn pending(&self) -> usize {
        match &self.inner {
            Inner::Null => 0,
            Inner::Group(group) => group.pending(),
            Inner::Joined(all) => all.iter().map(Handle::pending).sum(),
        }
    }

    /// A handle that completes when both `self` and `other` complete.
    pub fn join(self, other: Handle) -> Handle {
        Handle::join_all([self, other])
    }

    /// A handle that completes when every handle in `handles` completes.
    ///
    /// Null handles are dropped; joining nothing yields a null handle.
    pub fn join_all(handles: impl IntoIterator<Item = Handle>) -> Handle {
        let mut live: Vec<Handle> = handles.into_iter().filter(|h| !h.is_null()).collect();
        match live.len() {
            0 => Handle::null(),
            1 => live.pop().unwrap_or_default(),
            _ => Self {
                inner: Inner::Joined(live.into()),
            },
        }
    }

    /// Blocks until every attached operation finished; returns the first
    /// error any of them reported and clears it. `help` runs while waiting.
    pub(crate) fn wait(&self, help: Option<Help<'_>>) -> Result<(), DispatchError> {
        match &self.inner {
            Inner::Null => Ok(()),
            Inner::Group(group) => group.wait(help),
            Inner::Joined(all) => {
                let mut first = Ok(());
                for handle in all.iter() {
                    let outcome = handle.wait(help);
                    if first.is_ok() {
                        first = outcome;
                    }
                }
                first
            }
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Null => f.write_str("Handle(null)"),
            _ => f
                .debug_struct("Handle")
                .field("pending", &self.pending())
                .finish(),
        }
    }
}

/// Result of an asynchronous call that produces a value.
pub struct Promise<R> {
    handle: Handle,
    slot: Arc<Lock<Option<R>>>,
    rt: Runtime,
}

impl<R> Promise<R> {
    pub(crate) fn new(handle: Handle, slot: Arc<Lock<Option<R>>>, rt: Runtime) -> Self {
        Self { handle, slot, rt }
    }

    /// The handle covering the call.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// True once the call finished.
    pub fn is_ready(&self) -> bool {
        self.handle.is_complete()
    }

    /// Blocks until the call finished and returns its result.
    pub fn wait(self) -> Result<R, DispatchError> {
        self.rt.await_handle(&self.handle)?;
        self.slot.lock().take().ok_or(DispatchError::ResultUnavailable)
    }
}

impl<R> fmt::Debug for Promise<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{BackendKind, RuntimeConfig};

    #[test]
    fn null_handles_vanish_from_joins() {
        assert!(Handle::null().is_null());
        assert!(Handle::join_all([Handle::null(), Handle::null()]).is_null());
        let group = Handle::from_group(Group::new(None));
        let joined = Handle::null().join(group);
        assert!(!joined.is_null());
        assert!(joined.as_group().is_some());
    }

    #[test]
    fn group_waits_for_every_completion() {
        let group = Group::new(None);
        let handle = Handle::from_group(Arc::clone(&group));
        let completions: Vec<_> = (0..4)
            .map(|i| Completion::new(&group, Locality::new(i)))
            .collect();
        assert_eq!(handle.pending(), 4);
        std::thread::scope(|s| {
            for completion in completions {
                s.spawn(move || drop(completion));
            }
        });
        handle.wait(None).unwrap();
        assert!(handle.is_complete());
    }

    #[test]
    fn child_work_is_visible_on_parent() {
        let parent = Group::new(None);
        let child = Group::new(Some(Arc::clone(&parent)));
        let mut done = Completion::new(&child, Locality::new(0));
        assert_eq!(Handle::from_group(Arc::clone(&parent)).pending(), 1);
        done.fail(DispatchError::ShutDown);
        drop(done);
        assert_eq!(
            Handle::from_group(Arc::clone(&child)).wait(None),
            Err(DispatchError::ShutDown)
        );
        assert_eq!(
            Handle::from_group(parent).wait(None),
            Err(DispatchError::ShutDown)
        );
    }

    #[test]
    fn wait_clears_the_error_for_reuse() {
        let group = Group::new(None);
        let handle = Handle::from_group(Arc::clone(&group));
        let mut first = Completion::new(&group, Locality::new(0));
        first.fail(DispatchError::NullHandleWait);
        drop(first);
        assert!(handle.wait(None).is_err());
        drop(Completion::new(&group, Locality::new(0)));
        assert!(handle.wait(None).is_ok());
    }

    #[test]
    fn promise_without_value_reports_unavailable() {
        let rt = Runtime::init(RuntimeConfig::with_localities(1, BackendKind::Sequential)).unwrap();
        let promise: Promise<u32> = Promise::new(
            Handle::from_group(Group::new(None)),
            Arc::new(Lock::new(None)),
            rt.clone(),
        );
        assert_eq!(promise.wait(), Err(DispatchError::ResultUnavailable));
        rt.shutdown();
    }

    #[test]
    fn helping_waiter_finishes_the_work_it_waits_on() {
        let group = Group::new(None);
        let handle = Handle::from_group(Arc::clone(&group));
        let queued = Lock::new(vec![
            Completion::new(&group, Locality::new(0)),
            Completion::new(&group, Locality::new(1)),
        ]);
        let calls = Lock::new(0_usize);
        let help: Help<'_> = &|| {
            *calls.lock() += 1;
            queued.lock().pop().is_some()
        };
        handle.wait(Some(help)).unwrap();
        assert!(handle.is_complete());
        assert_eq!(*calls.lock(), 2);
    }
}
