// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]
//! Edge index behavior against the reference graph on every backend.

use loci_collections::{BufferedContainer, EdgeIndex, OnePerLocality};
use loci_core::{
    BackendKind, DispatchError, DistributedObject, Handle, ObjectId, Runtime, RuntimeConfig, Task,
};
use loci_dry_tests::{
    degree_of, neighbors_of, AddWeight, AuditNeighbors, EraseOddNeighbors, InsertMode,
    NeighborAudit, Tally, TestGraph, WeightedGraph, EXPECTED_EDGES, EXPECTED_EDGES_AFTER_ERASE,
    NUM_VERTICES,
};
use serde::{Deserialize, Serialize};

mod common;
use common::{
    for_every_setup, loc, new_counter, new_graph, owned_per_locality, populate, start, start_with,
    test_config,
};

fn sorted(mut v: Vec<i32>) -> Vec<i32> {
    v.sort_unstable();
    v
}

fn even_offsets(src: u64) -> u64 {
    (0..degree_of(src)).step_by(2).fold(0, |mask, j| mask | (1 << j))
}

fn audit_edges(rt: &Runtime, graph: &TestGraph) -> NeighborAudit {
    let audit: std::sync::Arc<OnePerLocality<NeighborAudit>> =
        rt.create(NeighborAudit::new(NUM_VERTICES)).unwrap();
    graph
        .for_each_edge(
            rt,
            AuditNeighbors {
                audit: audit.global_id(),
            },
        )
        .unwrap();
    NeighborAudit::merge(audit.collect(rt).unwrap())
}

#[test]
fn scenario_a_sizes_match_the_reference_graph() {
    for_every_setup(|rt| {
        let graph = new_graph(rt);
        populate(rt, &graph, InsertMode::EdgeList);
        assert_eq!(graph.size(rt).unwrap(), NUM_VERTICES as usize);
        assert_eq!(graph.num_edges(rt).unwrap(), EXPECTED_EDGES);
        assert_eq!(sorted(graph.get_neighbors(rt, 77).unwrap()), neighbors_of(77));
        assert_eq!(graph.get_degree(rt, 63).unwrap(), 63);
        assert_eq!(graph.get_degree(rt, 64).unwrap(), 1);
    });
}

#[test]
fn scenario_b_erasing_every_second_edge() {
    for_every_setup(|rt| {
        let graph = new_graph(rt);
        populate(rt, &graph, InsertMode::Insert);
        rt.for_each_on_all(
            EraseOddNeighbors {
                graph: graph.global_id(),
            },
            NUM_VERTICES as usize,
        )
        .unwrap();
        assert_eq!(graph.num_edges(rt).unwrap(), EXPECTED_EDGES_AFTER_ERASE);
        assert_eq!(graph.size(rt).unwrap(), NUM_VERTICES as usize);

        let audit = audit_edges(rt, &graph);
        assert!(audit.differing(even_offsets).is_empty());
        assert_eq!((audit.duplicates, audit.strays, audit.misrouted), (0, 0, 0));
    });
}

#[test]
fn scenario_c_buffered_async_insert_matches_direct_insert() {
    for_every_setup(|rt| {
        let graph = new_graph(rt);
        populate(rt, &graph, InsertMode::BufferedAsync);
        assert_eq!(graph.size(rt).unwrap(), NUM_VERTICES as usize);
        assert_eq!(graph.num_edges(rt).unwrap(), EXPECTED_EDGES);
        assert_eq!(graph.buffers().pending(), 0);
    });
}

#[test]
fn scenario_d_async_neighbor_visits_are_exact() {
    for_every_setup(|rt| {
        let graph = new_graph(rt);
        populate(rt, &graph, InsertMode::EdgeList);
        let audit: std::sync::Arc<OnePerLocality<NeighborAudit>> =
            rt.create(NeighborAudit::new(NUM_VERTICES)).unwrap();

        let handles: Vec<Handle> = (0..NUM_VERTICES)
            .map(|src| {
                graph
                    .async_for_each_neighbor(
                        rt,
                        src,
                        AuditNeighbors {
                            audit: audit.global_id(),
                        },
                    )
                    .unwrap()
            })
            .collect();
        rt.wait_for_completion(&Handle::join_all(handles)).unwrap();

        let merged = NeighborAudit::merge(audit.collect(rt).unwrap());
        assert!(merged.incomplete().is_empty(), "{:?}", merged.incomplete());
        assert_eq!((merged.duplicates, merged.strays, merged.misrouted), (0, 0, 0));
    });
}

#[test]
fn every_insert_path_builds_the_same_graph() {
    for backend in BackendKind::ALL {
        for mode in InsertMode::ALL {
            let rt = start(backend, 4);
            let graph = new_graph(&rt);
            populate(&rt, &graph, mode);
            assert_eq!(
                (graph.size(&rt).unwrap(), graph.num_edges(&rt).unwrap()),
                (NUM_VERTICES as usize, EXPECTED_EDGES),
                "{backend:?} {mode:?}"
            );
            for src in [0, 1, 62, 63, 4095] {
                assert_eq!(sorted(graph.get_neighbors(&rt, src).unwrap()), neighbors_of(src));
            }
            rt.shutdown();
        }
    }
}

#[test]
fn vertices_are_stored_on_their_owner() {
    for_every_setup(|rt| {
        let graph = new_graph(rt);
        populate(rt, &graph, InsertMode::EdgeList);
        let owned = owned_per_locality(rt);

        let counter = new_counter(rt);
        graph
            .for_each_vertex(
                rt,
                Tally {
                    counter: counter.global_id(),
                },
            )
            .unwrap();
        assert_eq!(counter.collect(rt).unwrap(), owned);

        let audit = audit_edges(rt, &graph);
        assert_eq!(audit.misrouted, 0);
        assert!(audit.incomplete().is_empty());
    });
}

#[test]
fn sync_and_async_traversals_agree() {
    for_every_setup(|rt| {
        let graph = new_graph(rt);
        populate(rt, &graph, InsertMode::EdgeList);

        let sync_vertices = new_counter(rt);
        let async_vertices = new_counter(rt);
        graph
            .for_each_vertex(
                rt,
                Tally {
                    counter: sync_vertices.global_id(),
                },
            )
            .unwrap();
        let vertices = graph
            .async_for_each_vertex(
                rt,
                Tally {
                    counter: async_vertices.global_id(),
                },
            )
            .unwrap();

        let sync_edges = new_counter(rt);
        let async_edges = new_counter(rt);
        graph
            .for_each_edge(
                rt,
                Tally {
                    counter: sync_edges.global_id(),
                },
            )
            .unwrap();
        let edges = graph
            .async_for_each_edge(
                rt,
                Tally {
                    counter: async_edges.global_id(),
                },
            )
            .unwrap();

        rt.wait_for_completion(&vertices.join(edges)).unwrap();
        assert_eq!(
            sync_vertices.collect(rt).unwrap(),
            async_vertices.collect(rt).unwrap()
        );
        assert_eq!(sync_edges.collect(rt).unwrap(), async_edges.collect(rt).unwrap());
        let total: u64 = async_edges.collect(rt).unwrap().iter().sum();
        assert_eq!(total as usize, EXPECTED_EDGES);
    });
}

#[test]
fn sync_and_async_inserts_agree_edge_by_edge() {
    for_every_setup(|rt| {
        let direct = TestGraph::create(rt, 64).unwrap();
        let scheduled = TestGraph::create(rt, 64).unwrap();
        let mut handles = Vec::new();
        for src in 0..64_u64 {
            for dest in neighbors_of(src) {
                direct.insert(rt, src, dest).unwrap();
                handles.push(scheduled.async_insert(rt, src, dest).unwrap());
            }
        }
        rt.wait_for_completion(&Handle::join_all(handles)).unwrap();
        for src in 0..64_u64 {
            assert_eq!(
                sorted(direct.get_neighbors(rt, src).unwrap()),
                sorted(scheduled.get_neighbors(rt, src).unwrap())
            );
        }
        assert_eq!(direct.num_edges(rt).unwrap(), scheduled.num_edges(rt).unwrap());
    });
}

#[test]
fn erase_keeps_vertices_and_erase_vertex_drops_them() {
    for_every_setup(|rt| {
        let graph = new_graph(rt);
        graph.insert_edge_list(rt, 5, &[1, 2], false).unwrap();
        graph.erase(rt, 5, 1).unwrap();
        let erased = graph.async_erase(rt, 5, 2).unwrap();
        rt.wait_for_completion(&erased).unwrap();
        assert_eq!(graph.size(rt).unwrap(), 1);
        assert_eq!(graph.get_degree(rt, 5).unwrap(), 0);

        graph.erase_vertex(rt, 5).unwrap();
        assert_eq!(graph.size(rt).unwrap(), 0);
        assert!(graph.get_neighbors(rt, 5).unwrap().is_empty());
    });
}

#[test]
fn clear_empties_every_partition() {
    for_every_setup(|rt| {
        let graph = new_graph(rt);
        populate(rt, &graph, InsertMode::EdgeList);
        graph.clear(rt).unwrap();
        assert_eq!((graph.size(rt).unwrap(), graph.num_edges(rt).unwrap()), (0, 0));
        graph.insert(rt, 9, 9).unwrap();
        assert_eq!(graph.size(rt).unwrap(), 1);
    });
}

#[test]
fn edge_lists_are_chunked_and_overwrite_once() {
    for backend in BackendKind::ALL {
        let rt = start_with(RuntimeConfig {
            chunk_bytes: 16,
            ..test_config(backend, 3)
        });
        let graph = TestGraph::create(&rt, 16).unwrap();
        assert_eq!(graph.chunk_len(), 4);

        let first: Vec<i32> = (0..10).collect();
        graph.insert_edge_list(&rt, 1, &first, false).unwrap();
        assert_eq!(sorted(graph.get_neighbors(&rt, 1).unwrap()), first);

        let replacement: Vec<i32> = (100..111).collect();
        graph.insert_edge_list(&rt, 1, &replacement, true).unwrap();
        assert_eq!(sorted(graph.get_neighbors(&rt, 1).unwrap()), replacement);

        let handle = graph.async_insert_edge_list(&rt, 1, &first, true).unwrap();
        rt.wait_for_completion(&handle).unwrap();
        assert_eq!(sorted(graph.get_neighbors(&rt, 1).unwrap()), first);

        graph.insert_edge_list(&rt, 2, &[], true).unwrap();
        assert_eq!(graph.size(&rt).unwrap(), 2);
        rt.shutdown();
    }
}

#[derive(Serialize, Deserialize)]
struct DegreeFrom {
    graph: ObjectId,
    src: u64,
}

impl Task for DegreeFrom {
    type Output = usize;

    fn run(self, rt: &Runtime) -> Result<usize, DispatchError> {
        rt.get_ptr::<TestGraph>(self.graph)?.get_degree(rt, self.src)
    }
}

#[test]
fn every_locality_sees_the_same_graph() {
    for_every_setup(|rt| {
        let graph = new_graph(rt);
        populate(rt, &graph, InsertMode::Buffered);
        for at in rt.all_localities() {
            for src in [3_u64, 64, 127, 4000] {
                let degree = rt
                    .execute_at_with_ret(at, DegreeFrom {
                        graph: graph.global_id(),
                        src,
                    })
                    .unwrap();
                assert_eq!(degree as u64, degree_of(src), "from {at} for {src}");
            }
        }
    });
}

#[test]
fn async_neighbor_fetch_resolves_through_a_promise() {
    for_every_setup(|rt| {
        let graph = new_graph(rt);
        populate(rt, &graph, InsertMode::EdgeList);
        let promises: Vec<_> = [10_u64, 20, 30]
            .into_iter()
            .map(|src| (src, graph.async_get_neighbors(rt, src).unwrap()))
            .collect();
        for (src, promise) in promises {
            assert_eq!(sorted(promise.wait().unwrap()), neighbors_of(src));
        }
    });
}

#[test]
fn attributes_are_updated_on_the_owner() {
    for_every_setup(|rt| {
        let graph = WeightedGraph::create(rt, 64).unwrap();
        assert_eq!(graph.get_vertex_attributes(rt, 1).unwrap(), None);
        assert!(!graph.vertex_attributes_apply(rt, 1, AddWeight(3)).unwrap());

        graph.insert(rt, 1, 2).unwrap();
        assert!(graph.vertex_attributes_apply(rt, 1, AddWeight(3)).unwrap());
        assert_eq!(graph.get_vertex_attributes(rt, 1).unwrap(), Some(3));

        graph.set_vertex_attributes(rt, 1, 10).unwrap();
        assert!(graph.vertex_attributes_apply(rt, 1, AddWeight(5)).unwrap());
        assert_eq!(graph.get_vertex_attributes(rt, 1).unwrap(), Some(15));

        graph.set_vertex_attributes(rt, 7, 1).unwrap();
        assert_eq!(graph.size(rt).unwrap(), 2);
        assert_eq!(graph.get_degree(rt, 7).unwrap(), 0);
    });
}

#[test]
fn destroyed_index_is_stale_everywhere() {
    for_every_setup(|rt| {
        let graph = new_graph(rt);
        let oid = graph.global_id();
        TestGraph::destroy(rt, oid).unwrap();
        assert_eq!(
            rt.get_ptr::<TestGraph>(oid).unwrap_err(),
            DispatchError::StaleObjectId(oid)
        );
        for at in rt.all_localities() {
            assert_eq!(
                rt.execute_at_with_ret(at, DegreeFrom { graph: oid, src: 1 }),
                Err(DispatchError::StaleObjectId(oid))
            );
        }
    });
}

#[test]
fn partitions_are_typed_by_their_parameters() {
    let rt = start(BackendKind::Sequential, 2);
    let graph = new_graph(&rt);
    assert!(matches!(
        rt.get_ptr::<EdgeIndex<u64, u64>>(graph.global_id()),
        Err(DispatchError::ObjectTypeMismatch { .. })
    ));
    assert!(rt.get_ptr::<TestGraph>(graph.global_id()).is_ok());
    assert_eq!(graph.owner_of(&42), loc(1));
    assert_eq!(graph.owner_of(&0), loc(0));
}
