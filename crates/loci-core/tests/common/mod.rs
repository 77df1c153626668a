// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

use loci_core::{BackendKind, Runtime, RuntimeConfig};

/// Locality counts every dispatch property is checked against.
pub const LOCALITY_COUNTS: &[u32] = &[1, 2, 4];

/// Worker threads per locality in tests; small so scoped loops stay cheap.
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

/// Starts a runtime for `localities` localities on `backend`.
pub fn start(backend: BackendKind, localities: u32) -> Runtime {
    init_tracing();
    Runtime::init(test_config(backend, localities)).expect("runtime starts")
}

/// Runs `check` against every backend and locality count, shutting each
/// runtime down afterwards.
pub fn for_every_setup(mut check: impl FnMut(&Runtime)) {
    for &backend in &BackendKind::ALL {
        for &localities in LOCALITY_COUNTS {
            let rt = start(backend, localities);
            check(&rt);
            rt.shutdown();
        }
    }
}
