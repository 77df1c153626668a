// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Serializable tasks and the receiving-side registry.
//!
//! A task is a plain data value naming an operation. The sending side encodes
//! it into an [`Envelope`](crate::Envelope) tagged with [`task_name`]; the
//! receiving side looks the tag up in its [`TaskRegistry`] and runs the
//! decoded value against the target locality's [`Runtime`] view. Nothing but
//! bytes and a name crosses the boundary.
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use rustc_hash::FxHashMap;
use serde::{de::DeserializeOwned, Serialize};

use crate::codec::{self, check_size, Envelope};
use crate::error::DispatchError;
use crate::runtime::Runtime;

/// Values that may be copied across a locality boundary.
pub trait Payload: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Payload for T where
    T: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// An operation executed once on a target locality.
pub trait Task: Serialize + DeserializeOwned + Send + 'static {
    /// Value marshalled back to the caller.
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Runs the task. `rt` is scoped to the locality the task was sent to.
    fn run(self, rt: &Runtime) -> Result<Self::Output, DispatchError>;
}

/// The body of a parallel loop; decoded once per locality and invoked for
/// each iteration index assigned there.
pub trait IterTask: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Runs iteration `iteration`. `rt` is scoped to the executing locality.
    fn run(&self, rt: &Runtime, iteration: usize) -> Result<(), DispatchError>;
}

/// Registry name of a task type.
pub fn task_name<T: ?Sized>() -> &'static str {
    std::any::type_name::<T>()
}

pub(crate) type IterBody = Arc<dyn Fn(&Runtime, usize) -> Result<(), DispatchError> + Send + Sync>;

type OnceFn = fn(&[u8], &Runtime, usize) -> Result<Vec<u8>, DispatchError>;
type IterFn = fn(&[u8]) -> Result<IterBody, DispatchError>;

#[derive(Clone, Copy)]
enum Entry {
    Once(OnceFn),
    Iter(IterFn),
}

fn run_once<T: Task>(
    payload: &[u8],
    rt: &Runtime,
    limit: usize,
) -> Result<Vec<u8>, DispatchError> {
    let task: T = codec::decode(payload)?;
    let output = task.run(rt)?;
    let bytes = codec::encode(&output)?;
    check_size(bytes.len(), limit)?;
    Ok(bytes)
}

fn decode_iter<T: IterTask>(payload: &[u8]) -> Result<IterBody, DispatchError> {
    let task: Arc<T> = Arc::new(codec::decode(payload)?);
    Ok(Arc::new(move |rt: &Runtime, i: usize| task.run(rt, i)))
}

/// Maps task names to monomorphized decode-and-run entry points.
#[derive(Default)]
pub struct TaskRegistry {
    entries: RwLock<FxHashMap<&'static str, Entry>>,
}

impl TaskRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` as a one-shot task. Idempotent.
    pub fn register<T: Task>(&self) {
        self.insert(task_name::<T>(), Entry::Once(run_once::<T>));
    }

    /// Registers `T` as a loop body. Idempotent.
    pub fn register_iter<T: IterTask>(&self) {
        self.insert(task_name::<T>(), Entry::Iter(decode_iter::<T>));
    }

    /// True when `name` resolves.
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn insert(&self, name: &'static str, entry: Entry) {
        if self.contains(name) {
            return;
        }
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, entry);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, FxHashMap<&'static str, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, name: &str) -> Result<Entry, DispatchError> {
        self.read()
            .get(name)
            .copied()
            .ok_or_else(|| DispatchError::UnknownTask(name.to_owned()))
    }

    /// Runs a one-shot task envelope; the encoded result must fit in
    /// `result_limit` bytes.
    pub(crate) fn run(
        &self,
        envelope: &Envelope,
        rt: &Runtime,
        result_limit: usize,
    ) -> Result<Vec<u8>, DispatchError> {
        match self.lookup(envelope.task())? {
            Entry::Once(run) => run(envelope.payload(), rt, result_limit),
            Entry::Iter(_) => Err(DispatchError::UnknownTask(envelope.task().to_owned())),
        }
    }

    /// Decodes a loop-body envelope.
    pub(crate) fn body(&self, envelope: &Envelope) -> Result<IterBody, DispatchError> {
        match self.lookup(envelope.task())? {
            Entry::Iter(decode) => decode(envelope.payload()),
            Entry::Once(_) => Err(DispatchError::UnknownTask(envelope.task().to_owned())),
        }
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.len())
            .finish()
    }
}
