// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Remote operations on hashmap partitions.
use std::marker::PhantomData;

use loci_core::{DispatchError, IterTask, ObjectId, Payload, Runtime, Task};
use serde::{Deserialize, Serialize};

use super::local::LocalHashmap;
use super::visit::{EntryUpdate, EntryVisitor};
use super::Hashmap;
use crate::shard::Key;

type Marker<T> = PhantomData<fn() -> T>;

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) enum Mutation<K: Key, V: Payload> {
    Insert { key: K, value: V },
    Erase { key: K },
    Clear,
}

impl<K: Key, V: Payload> Mutation<K, V> {
    pub(crate) fn apply(self, local: &LocalHashmap<K, V>) {
        match self {
            Self::Insert { key, value } => {
                local.insert(key, value);
            }
            Self::Erase { key } => {
                local.erase(&key);
            }
            Self::Clear => local.clear(),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) struct Mutate<K: Key, V: Payload> {
    pub(crate) oid: ObjectId,
    pub(crate) op: Mutation<K, V>,
}

impl<K: Key, V: Payload> Task for Mutate<K, V> {
    type Output = ();

    fn run(self, rt: &Runtime) -> Result<(), DispatchError> {
        let map = rt.get_ptr::<Hashmap<K, V>>(self.oid)?;
        self.op.apply(map.local());
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) struct LocalSize<K: Key, V: Payload> {
    pub(crate) oid: ObjectId,
    #[serde(skip)]
    pub(crate) _map: Marker<(K, V)>,
}

impl<K: Key, V: Payload> Task for LocalSize<K, V> {
    type Output = usize;

    fn run(self, rt: &Runtime) -> Result<usize, DispatchError> {
        Ok(rt.get_ptr::<Hashmap<K, V>>(self.oid)?.local().len())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) struct Lookup<K: Key, V: Payload> {
    pub(crate) oid: ObjectId,
    pub(crate) key: K,
    #[serde(skip)]
    pub(crate) _map: Marker<V>,
}

impl<K: Key, V: Payload> Task for Lookup<K, V> {
    type Output = Option<V>;

    fn run(self, rt: &Runtime) -> Result<Option<V>, DispatchError> {
        Ok(rt.get_ptr::<Hashmap<K, V>>(self.oid)?.local().get(&self.key))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) struct Update<K: Key, V: Payload, U: EntryUpdate<K, V>> {
    pub(crate) oid: ObjectId,
    pub(crate) key: K,
    pub(crate) update: U,
    #[serde(skip)]
    pub(crate) _map: Marker<V>,
}

impl<K, V, U> Task for Update<K, V, U>
where
    K: Key,
    V: Payload,
    U: EntryUpdate<K, V>,
{
    type Output = bool;

    fn run(self, rt: &Runtime) -> Result<bool, DispatchError> {
        let map = rt.get_ptr::<Hashmap<K, V>>(self.oid)?;
        let Self { key, update, .. } = self;
        Ok(map
            .local()
            .update(&key, |value| update.apply(&key, value))
            .is_some())
    }
}

/// Walks this locality's partition one stripe per loop iteration; `detach`
/// leaves the loop running under the caller's handle.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub(crate) struct VisitEntries<K: Key, V: Payload, E: EntryVisitor<K, V>> {
    pub(crate) oid: ObjectId,
    pub(crate) visitor: E,
    pub(crate) detach: bool,
    #[serde(skip)]
    pub(crate) _map: Marker<(K, V)>,
}

impl<K, V, E> Task for VisitEntries<K, V, E>
where
    K: Key,
    V: Payload,
    E: EntryVisitor<K, V>,
{
    type Output = ();

    fn run(self, rt: &Runtime) -> Result<(), DispatchError> {
        let stripes = rt.get_ptr::<Hashmap<K, V>>(self.oid)?.local().stripe_count();
        let body = EntryStripe::<K, V, E> {
            oid: self.oid,
            visitor: self.visitor,
            _map: PhantomData,
        };
        if self.detach {
            rt.async_for_each_at(rt.this_locality(), body, stripes)?;
            return Ok(());
        }
        rt.for_each_at(rt.this_locality(), body, stripes)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
struct EntryStripe<K: Key, V: Payload, E: EntryVisitor<K, V>> {
    oid: ObjectId,
    visitor: E,
    #[serde(skip)]
    _map: Marker<(K, V)>,
}

impl<K, V, E> IterTask for EntryStripe<K, V, E>
where
    K: Key,
    V: Payload,
    E: EntryVisitor<K, V>,
{
    fn run(&self, rt: &Runtime, stripe: usize) -> Result<(), DispatchError> {
        rt.get_ptr::<Hashmap<K, V>>(self.oid)?
            .local()
            .for_each_entry_in_stripe(stripe, |key, value| self.visitor.visit(rt, key, value))
    }
}
