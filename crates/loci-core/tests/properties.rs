// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]
//! Property checks for loop partitioning and wire decoding.

use loci_core::{
    decode, BackendKind, DispatchError, DistributedObject, IterTask, Lock, Locality, ObjectId,
    Runtime, Task,
};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

mod common;
use common::start;

struct Seen {
    oid: ObjectId,
    indices: Lock<Vec<usize>>,
}

impl DistributedObject for Seen {
    type Args = ();

    fn construct(oid: ObjectId, _rt: &Runtime, (): ()) -> Result<Self, DispatchError> {
        Ok(Self {
            oid,
            indices: Lock::new(Vec::new()),
        })
    }

    fn global_id(&self) -> ObjectId {
        self.oid
    }
}

#[derive(Serialize, Deserialize)]
struct Note {
    oid: ObjectId,
}

impl IterTask for Note {
    fn run(&self, rt: &Runtime, iteration: usize) -> Result<(), DispatchError> {
        rt.get_ptr::<Seen>(self.oid)?.indices.lock().push(iteration);
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct Drain {
    oid: ObjectId,
}

impl Task for Drain {
    type Output = Vec<usize>;

    fn run(self, rt: &Runtime) -> Result<Vec<usize>, DispatchError> {
        Ok(std::mem::take(&mut *rt.get_ptr::<Seen>(self.oid)?.indices.lock()))
    }
}

fn backend() -> impl Strategy<Value = BackendKind> {
    prop::sample::select(BackendKind::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_iteration_runs_once_on_its_block(
        backend in backend(),
        localities in 1_u32..6,
        iterations in 0_usize..400,
    ) {
        let rt = start(backend, localities);
        let seen = rt.create::<Seen>(()).unwrap();
        rt.for_each_on_all(Note { oid: seen.global_id() }, iterations).unwrap();

        let per = iterations.div_ceil(localities as usize);
        let mut all = Vec::with_capacity(iterations);
        for loc in rt.all_localities() {
            let mut here = rt.execute_at_with_ret(loc, Drain { oid: seen.global_id() }).unwrap();
            here.sort_unstable();
            let lo = (loc.index() * per).min(iterations);
            let hi = (lo + per).min(iterations);
            prop_assert_eq!(&here, &(lo..hi).collect::<Vec<_>>());
            all.extend(here);
        }
        prop_assert_eq!(all, (0..iterations).collect::<Vec<_>>());
        rt.shutdown();
    }

    #[test]
    fn for_each_at_stays_on_its_target(
        backend in backend(),
        localities in 1_u32..5,
        iterations in 0_usize..200,
    ) {
        let rt = start(backend, localities);
        let seen = rt.create::<Seen>(()).unwrap();
        let target = Locality::new(localities - 1);
        rt.for_each_at(target, Note { oid: seen.global_id() }, iterations).unwrap();
        for loc in rt.all_localities() {
            let here = rt.execute_at_with_ret(loc, Drain { oid: seen.global_id() }).unwrap();
            let want = if loc == target { iterations } else { 0 };
            prop_assert_eq!(here.len(), want);
        }
        rt.shutdown();
    }

    #[test]
    fn decoding_garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        match decode::<Vec<(u64, String)>>(&bytes) {
            Ok(_) | Err(DispatchError::Codec(_)) => {}
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
    }
}
