//! Scenario 5 (spec §8): build, refine, save, reload into a fresh space/graph pair,
//! and confirm the same queries return identical ids.

mod common;

use rabitq_engine::graph::Graph;
use rabitq_engine::space::{Metric, Space, SpaceConfig};
use rabitq_engine::{GraphRefiner, RefineConfig};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[test]
fn reloaded_snapshot_reproduces_search_results() {
    common::init_tracing();
    let n = 200;
    let dim = 16;
    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    let data: Vec<f32> = (0..n * dim).map(|_| rng.random_range(-1.0..1.0)).collect();

    let config = SpaceConfig::try_new(Metric::SquaredL2, dim, n, 9).unwrap();
    let mut space = Space::new(config).unwrap();
    space.fit(&data, n).unwrap();
    let graph = common::brute_force_knn_graph(&space, n, 16);
    let mut graph = graph;

    let refiner = GraphRefiner::new(RefineConfig::default());
    refiner.refine(&mut space, &mut graph).unwrap();

    let mut space_buf = Vec::new();
    space.save(&mut space_buf).unwrap();
    let mut graph_buf = Vec::new();
    graph.save(&mut graph_buf).unwrap();

    let reloaded_space = Space::load(&space_buf[..]).unwrap();
    let reloaded_graph = Graph::load(&graph_buf[..]).unwrap();

    let queries: Vec<Vec<f32>> = (0..20)
        .map(|_| (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect())
        .collect();

    for query in &queries {
        let mut ids_before = [0u32; 10];
        let mut ids_after = [0u32; 10];
        let written_before =
            rabitq_engine::search::search_optimized(&space, &graph, query, 10, 64, &mut ids_before);
        let written_after = rabitq_engine::search::search_optimized(
            &reloaded_space,
            &reloaded_graph,
            query,
            10,
            64,
            &mut ids_after,
        );
        assert_eq!(written_before, written_after);
        assert_eq!(ids_before, ids_after);
    }
}
