// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]
//! Buffered insertion must end in the same index as direct insertion,
//! whatever the buffer size and arrival order.

use loci_collections::BufferedContainer;
use loci_core::{BackendKind, Handle, RuntimeConfig};
use loci_dry_tests::TestGraph;
use proptest::prelude::*;

mod common;
use common::{start_with, test_config};

fn backend() -> impl Strategy<Value = BackendKind> {
    prop::sample::select(BackendKind::ALL.to_vec())
}

fn edges() -> impl Strategy<Value = Vec<(u64, i32)>> {
    prop::collection::vec((0_u64..200, -50_i32..50), 0..600)
}

fn sorted_neighbors(graph: &TestGraph, rt: &loci_core::Runtime, src: u64) -> Vec<i32> {
    let mut v = graph.get_neighbors(rt, src).unwrap();
    v.sort_unstable();
    v
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn buffered_inserts_match_direct_inserts(
        backend in backend(),
        localities in 1_u32..5,
        buffer_bytes in 1_usize..256,
        edges in edges(),
        use_async in any::<bool>(),
    ) {
        let rt = start_with(RuntimeConfig {
            buffer_bytes,
            ..test_config(backend, localities)
        });
        let direct = TestGraph::create(&rt, 256).unwrap();
        let buffered = TestGraph::create(&rt, 256).unwrap();

        let mut handles = Vec::new();
        for &(src, dest) in &edges {
            direct.insert(&rt, src, dest).unwrap();
            if use_async {
                handles.push(buffered.buffered_async_insert(&rt, src, dest).unwrap());
            } else {
                buffered.buffered_insert(&rt, src, dest).unwrap();
            }
        }
        rt.wait_for_completion(&Handle::join_all(handles)).unwrap();
        buffered.wait_for_buffered_insert(&rt).unwrap();

        prop_assert_eq!(buffered.buffers().pending(), 0);
        prop_assert_eq!(buffered.size(&rt).unwrap(), direct.size(&rt).unwrap());
        prop_assert_eq!(buffered.num_edges(&rt).unwrap(), direct.num_edges(&rt).unwrap());
        for src in 0..200_u64 {
            prop_assert_eq!(
                sorted_neighbors(&buffered, &rt, src),
                sorted_neighbors(&direct, &rt, src)
            );
        }
        rt.shutdown();
    }
}
