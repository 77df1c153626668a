// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

use std::sync::Arc;

use loci_collections::{route, OnePerLocality};
use loci_core::{BackendKind, Handle, Locality, Runtime, RuntimeConfig};
use loci_dry_tests::{InsertMode, Populate, TestGraph, NUM_VERTICES};

/// Locality counts every container property is checked against.
pub const LOCALITY_COUNTS: &[u32] = &[1, 2, 4];

/// Worker threads per locality in tests.
pub const TEST_WORKERS: usize = 4;

/// Installs a fmt subscriber that writes through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

/// Test configuration for `localities` localities on `backend`.
pub fn test_config(backend: BackendKind, localities: u32) -> RuntimeConfig {
    RuntimeConfig {
        workers_per_locality: TEST_WORKERS,
        ..RuntimeConfig::with_localities(localities, backend)
    }
}

/// Starts a runtime from `config`.
pub fn start_with(config: RuntimeConfig) -> Runtime {
    init_tracing();
    Runtime::init(config).expect("runtime starts")
}

/// Starts a runtime for `localities` localities on `backend`.
pub fn start(backend: BackendKind, localities: u32) -> Runtime {
    start_with(test_config(backend, localities))
}

/// Runs `check` against every backend and locality count.
pub fn for_every_setup(mut check: impl FnMut(&Runtime)) {
    for &backend in &BackendKind::ALL {
        for &localities in LOCALITY_COUNTS {
            let rt = start(backend, localities);
            check(&rt);
            rt.shutdown();
        }
    }
}

/// A fresh reference-graph index sized for [`NUM_VERTICES`].
pub fn new_graph(rt: &Runtime) -> Arc<TestGraph> {
    TestGraph::create(rt, NUM_VERTICES as usize).expect("graph is created")
}

/// Inserts the whole reference graph through `mode` and waits until every
/// edge is visible.
pub fn populate(rt: &Runtime, graph: &TestGraph, mode: InsertMode) {
    let mut handle = Handle::null();
    let view = rt.attach(&mut handle);
    view.for_each_on_all(
        Populate {
            graph: graph.global_id(),
            mode,
        },
        NUM_VERTICES as usize,
    )
    .expect("population runs");
    rt.wait_for_completion(&handle).expect("async inserts land");
    if mode.is_buffered() {
        graph
            .wait_for_buffered_insert(rt)
            .expect("buffers are flushed");
    }
}

/// A zeroed per-locality counter.
pub fn new_counter(rt: &Runtime) -> Arc<OnePerLocality<u64>> {
    rt.create(0).expect("counter is created")
}

/// Reference-graph sources owned by each locality.
pub fn owned_per_locality(rt: &Runtime) -> Vec<u64> {
    let mut owned = vec![0; rt.num_localities() as usize];
    for src in 0..NUM_VERTICES {
        owned[route(&src, rt.num_localities()).index()] += 1;
    }
    owned
}

/// Locality `i` as a [`Locality`].
pub fn loc(i: u32) -> Locality {
    Locality::new(i)
}
