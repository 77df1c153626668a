// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
use std::fmt;
use std::marker::PhantomData;

use loci_core::{DispatchError, DistributedObject, Lock, ObjectId, Payload, Runtime, Task};
use serde::{Deserialize, Serialize};

/// One independent value per locality, all created from the same initial
/// value.
///
/// Useful as a per-locality accumulator: tasks update their locality's copy
/// through [`Runtime::get_ptr`], and [`OnePerLocality::collect`] gathers every
/// copy afterwards.
pub struct OnePerLocality<T> {
    oid: ObjectId,
    value: Lock<T>,
}

impl<T: Payload> OnePerLocality<T> {
    /// A copy of this locality's value.
    pub fn get(&self) -> T {
        self.value.lock().clone()
    }

    /// Replaces this locality's value.
    pub fn set(&self, value: T) {
        *self.value.lock() = value;
    }

    /// Runs `f` with exclusive access to this locality's value.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.value.with(f)
    }

    /// Every locality's value, in locality order.
    pub fn collect(&self, rt: &Runtime) -> Result<Vec<T>, DispatchError> {
        rt.all_localities()
            .into_iter()
            .map(|loc| {
                rt.execute_at_with_ret(loc, ReadLocal::<T> {
                    oid: self.oid,
                    _value: PhantomData,
                })
            })
            .collect()
    }
}

impl<T: Payload> DistributedObject for OnePerLocality<T> {
    type Args = T;

    fn construct(oid: ObjectId, _rt: &Runtime, initial: T) -> Result<Self, DispatchError> {
        Ok(Self {
            oid,
            value: Lock::new(initial),
        })
    }

    fn global_id(&self) -> ObjectId {
        self.oid
    }
}

impl<T: fmt::Debug> fmt::Debug for OnePerLocality<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnePerLocality")
            .field("oid", &self.oid)
            .field("value", &*self.value.lock())
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
struct ReadLocal<T: Payload> {
    oid: ObjectId,
    #[serde(skip)]
    _value: PhantomData<fn() -> T>,
}

impl<T: Payload> Task for ReadLocal<T> {
    type Output = T;

    fn run(self, rt: &Runtime) -> Result<T, DispatchError> {
        Ok(rt.get_ptr::<OnePerLocality<T>>(self.oid)?.get())
    }
}
