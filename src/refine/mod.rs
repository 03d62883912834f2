//! Graph refiner (spec §4.11): a one-shot transform from whatever degree-bounded
//! graph an external builder produced into a refined graph of the same fixed
//! out-degree, via five phases — `init`, `search_new_neighbors`,
//! `add_reverse_edges`, `angle_based_supplement`, `insert_refined_neighbors` — plus
//! the NSG-style heuristic prune shared by phases 2 and 3.
//!
//! Phases 1, 2, 4, 5 are embarrassingly parallel over nodes; phase 3 guards
//! per-destination state behind a `Mutex`. Parallelism throughout is `rayon`'s
//! data-parallel iterators, matching how [`crate::graph::Graph::par_rows_mut`]
//! exposes disjoint per-node writes.

use crate::error::{EngineError, Result};
use crate::graph::{DEGREE, Graph, NO_NEIGHBOR};
use crate::search::buffer::SearchBuffer;
use crate::search::visited::DenseVisited;
use crate::space::Space;
use hashbrown::{HashMap, HashSet};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::sync::Mutex;
use tracing::{debug, info, instrument};

/// Tunable knobs from spec §6's parameter table.
#[derive(Debug, Clone, Copy)]
pub struct RefineConfig {
    pub ef_build: usize,
    pub max_candidate_pool_size: usize,
    pub max_pruned_size: usize,
    pub max_bs_iter: usize,
    /// Seeds the refiner's random supplement steps (phases 1 and 4). Not part of the
    /// spec's parameter table, but needed for reproducible refinement in tests.
    pub seed: u64,
}

impl Default for RefineConfig {
    fn default() -> Self {
        RefineConfig {
            ef_build: 400,
            max_candidate_pool_size: 750,
            max_pruned_size: 300,
            max_bs_iter: 5,
            seed: 0x5eed_5eed,
        }
    }
}

pub struct GraphRefiner {
    config: RefineConfig,
}

impl GraphRefiner {
    pub fn new(config: RefineConfig) -> Self {
        GraphRefiner { config }
    }

    /// One-shot refinement entry point (spec §9: "model as two separate owners with a
    /// one-shot `refine(space, graph)` entry point; never store cross-references").
    #[instrument(skip(self, space, graph), fields(n = graph.len()))]
    pub fn refine(&self, space: &mut Space, graph: &mut Graph) -> Result<()> {
        let n = graph.len();
        if n == 0 {
            return Err(EngineError::Config("cannot refine an empty graph".into()));
        }
        if space.item_cnt() < n {
            return Err(EngineError::Config(format!(
                "space has only {} fitted points for a graph of {n} nodes",
                space.item_cnt()
            )));
        }

        let mut new_neighbors = self.phase_init(space, graph);
        info!(phase = "init", "done");

        let mut pruned: Vec<Vec<u32>> = vec![Vec::new(); n];
        self.phase_search_new_neighbors(space, graph, &mut new_neighbors, &mut pruned);
        info!(phase = "search_new_neighbors", "done");

        self.phase_add_reverse_edges(space, &mut new_neighbors, &mut pruned);
        info!(phase = "add_reverse_edges", "done");

        self.phase_angle_based_supplement(space, &mut new_neighbors, &pruned);
        info!(phase = "angle_based_supplement", "done");

        self.phase_insert_refined_neighbors(space, graph, &new_neighbors);
        info!(phase = "insert_refined_neighbors", "done");

        Ok(())
    }

    /// Supplements every node's current neighbor list with uniformly random distinct
    /// non-self ids up to `min(D, n-1)`, writes it back into the graph, quantizes it,
    /// and seeds `new_neighbors` with exact distances for phase 2 to build on.
    fn phase_init(&self, space: &Space, graph: &mut Graph) -> Vec<Vec<(u32, f32)>> {
        let n = graph.len();
        let target = DEGREE.min(n.saturating_sub(1));
        let seed = self.config.seed;

        graph
            .par_rows_mut()
            .enumerate()
            .map(|(id, row)| {
                let id = id as u32;
                let mut rng = ChaCha8Rng::seed_from_u64(seed ^ node_stream(id, 0));

                let mut kept: Vec<u32> = row
                    .iter()
                    .copied()
                    .filter(|&v| v != NO_NEIGHBOR && v != id)
                    .collect();
                kept.sort_unstable();
                kept.dedup();

                while kept.len() < target {
                    let candidate = rng.random_range(0..n as u32);
                    if candidate != id && !kept.contains(&candidate) {
                        kept.push(candidate);
                    }
                }
                kept.truncate(target);

                row.fill(NO_NEIGHBOR);
                row[..kept.len()].copy_from_slice(&kept);
                space.update_batch_data(id, row);

                kept.iter()
                    .map(|&nb| (nb, space.get_distance(id, nb)))
                    .collect()
            })
            .collect()
    }

    /// For every node, beam-search from the entry point, collect popped centroids as
    /// candidates, merge with the current neighbor list, and heuristically prune to
    /// the final `new_neighbors[node]` (spec §4.11 phase 2).
    fn phase_search_new_neighbors(
        &self,
        space: &Space,
        graph: &Graph,
        new_neighbors: &mut [Vec<(u32, f32)>],
        pruned: &mut [Vec<u32>],
    ) {
        let cfg = self.config;
        let results: Vec<(Vec<(u32, f32)>, Vec<u32>)> = (0..graph.len() as u32)
            .into_par_iter()
            .map(|node| {
                let beam = collect_candidates_via_beam(
                    space,
                    graph,
                    node,
                    cfg.ef_build,
                    cfg.max_candidate_pool_size,
                );
                let mut candidates = merge_unique(beam, &new_neighbors[node as usize]);
                candidates.truncate(cfg.max_candidate_pool_size);
                heuristic_prune(space, node, candidates, cfg.max_pruned_size)
            })
            .collect();

        for (node, (kept, prn)) in results.into_iter().enumerate() {
            new_neighbors[node] = kept;
            pruned[node] = prn;
        }
    }

    /// Propagates every kept edge `u -> v` as a candidate reverse edge `v -> u`,
    /// guarded by a lock per destination `v`; overflow beyond `D` is buffered (capped
    /// at `max_candidate_pool_size`) and folded back in during the re-prune (spec
    /// §4.11 phase 3).
    fn phase_add_reverse_edges(
        &self,
        space: &Space,
        new_neighbors: &mut [Vec<(u32, f32)>],
        pruned: &mut [Vec<u32>],
    ) {
        let n = new_neighbors.len();
        let cfg = self.config;
        let guarded: Vec<Mutex<(Vec<(u32, f32)>, Vec<u32>)>> = new_neighbors
            .iter()
            .cloned()
            .map(|list| Mutex::new((list, Vec::new())))
            .collect();

        (0..n as u32).into_par_iter().for_each(|u| {
            let edges_u: Vec<u32> = new_neighbors[u as usize]
                .iter()
                .map(|&(id, _)| id)
                .collect();
            for v in edges_u {
                let mut guard = guarded[v as usize].lock().unwrap();
                let (list, overflow) = &mut *guard;
                if list.iter().any(|&(id, _)| id == u) {
                    continue;
                }
                if list.len() < DEGREE {
                    let dist = space.get_distance(v, u);
                    list.push((u, dist));
                } else if overflow.len() < cfg.max_candidate_pool_size {
                    overflow.push(u);
                }
            }
        });

        let results: Vec<(Vec<(u32, f32)>, Vec<u32>)> = guarded
            .into_par_iter()
            .enumerate()
            .map(|(node, lock)| {
                let node = node as u32;
                let (list, overflow) = lock.into_inner().unwrap();
                let mut candidates = list;
                candidates.extend(
                    overflow
                        .into_iter()
                        .map(|id| (id, space.get_distance(node, id))),
                );
                heuristic_prune(space, node, candidates, cfg.max_pruned_size)
            })
            .collect();

        for (node, (kept, prn)) in results.into_iter().enumerate() {
            new_neighbors[node] = kept;
            let mut merged = std::mem::take(&mut pruned[node]);
            merged.extend(prn);
            merged.truncate(cfg.max_pruned_size);
            pruned[node] = merged;
        }
    }

    /// For nodes still short of `D` after pruning, binary-searches the cosine
    /// occlusion threshold `τ ∈ [0.5, 1.0]` over `max_bs_iter` rounds against the
    /// remembered pruned candidates, then pads with random ids if even `τ = 1.0`
    /// doesn't reach `D` (spec §4.11 phase 4).
    fn phase_angle_based_supplement(
        &self,
        space: &Space,
        new_neighbors: &mut Vec<Vec<(u32, f32)>>,
        pruned: &[Vec<u32>],
    ) {
        let n = new_neighbors.len();
        let cfg = self.config;
        let target = DEGREE.min(n.saturating_sub(1));

        let updates: Vec<Vec<(u32, f32)>> = (0..n as u32)
            .into_par_iter()
            .map(|node| {
                let base = &new_neighbors[node as usize];
                if base.len() >= target {
                    return base.clone();
                }

                let existing: HashSet<u32> = base.iter().map(|&(id, _)| id).collect();
                let mut candidates: Vec<(u32, f32)> = pruned[node as usize]
                    .iter()
                    .filter(|&&id| id != node && !existing.contains(&id))
                    .map(|&id| (id, space.get_distance(node, id)))
                    .collect();
                candidates.sort_by(cmp_dist_id);

                let retain_at = |tau: f32| -> Vec<(u32, f32)> {
                    let mut retained = base.clone();
                    for &(k, d_ik) in &candidates {
                        if retained.len() >= target {
                            break;
                        }
                        if !is_occluded(space, &retained, k, d_ik, tau) {
                            retained.push((k, d_ik));
                        }
                    }
                    retained
                };

                let mut best = retain_at(1.0);
                if best.len() >= target {
                    let mut lo = 0.5f32;
                    let mut hi = 1.0f32;
                    for _ in 0..cfg.max_bs_iter {
                        let mid = (lo + hi) * 0.5;
                        let candidate = retain_at(mid);
                        if candidate.len() >= target {
                            hi = mid;
                            best = candidate;
                        } else {
                            lo = mid;
                        }
                    }
                }

                if best.len() < target {
                    let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed ^ node_stream(node, 1));
                    let mut seen: HashSet<u32> = best.iter().map(|&(id, _)| id).collect();
                    while best.len() < target {
                        let candidate = rng.random_range(0..n as u32);
                        if candidate != node && seen.insert(candidate) {
                            let d = space.get_distance(node, candidate);
                            best.push((candidate, d));
                        }
                    }
                }
                best.truncate(target);
                best
            })
            .collect();

        *new_neighbors = updates;
    }

    /// Writes the final neighbor lists into the graph and re-quantizes every node's
    /// neighbor block (spec §4.11 phase 5).
    fn phase_insert_refined_neighbors(
        &self,
        space: &Space,
        graph: &mut Graph,
        new_neighbors: &[Vec<(u32, f32)>],
    ) {
        graph.par_rows_mut().enumerate().for_each(|(id, row)| {
            let id = id as u32;
            row.fill(NO_NEIGHBOR);
            let list = &new_neighbors[id as usize];
            for (slot, &(nb, _)) in list.iter().take(DEGREE).enumerate() {
                row[slot] = nb;
            }
            space.update_batch_data(id, row);
        });
    }
}

/// Mixes a node id and a stream tag into a distinct seed per (node, purpose) pair so
/// phases 1 and 4 don't draw from correlated random streams.
fn node_stream(id: u32, stream: u64) -> u64 {
    (id as u64)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(stream.wrapping_mul(0xD1B5_4A32_D192_ED03))
}

fn cmp_dist_id(a: &(u32, f32), b: &(u32, f32)) -> Ordering {
    a.1.partial_cmp(&b.1)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.0.cmp(&b.0))
}

/// Runs a beam search from the graph's entry point against `node`'s own raw vector,
/// returning every popped centroid (other than `node`) up to `cap` entries — the
/// "variant of §4.10's beam search" phase 2 needs to gather a broad candidate pool
/// rather than just the top-`k`.
fn collect_candidates_via_beam(
    space: &Space,
    graph: &Graph,
    node: u32,
    ef_build: usize,
    cap: usize,
) -> Vec<(u32, f32)> {
    let mut pool = SearchBuffer::new(ef_build);
    let mut visited = DenseVisited::new(graph.len());
    let ep = graph.get_ep();
    pool.insert(ep, space.get_distance(node, ep));

    let mut popped = Vec::new();
    while pool.has_next() && popped.len() < cap {
        let Some((u, dist)) = pool.pop() else {
            break;
        };
        if visited.get(u) {
            continue;
        }
        visited.set(u);
        if u != node {
            popped.push((u, dist));
        }

        for &v in graph.edges(u) {
            if v == NO_NEIGHBOR {
                break;
            }
            if visited.get(v) {
                continue;
            }
            let d = space.get_distance(node, v);
            if pool.is_full(d) {
                continue;
            }
            pool.insert(v, d);
        }
    }
    popped
}

fn merge_unique(beam: Vec<(u32, f32)>, existing: &[(u32, f32)]) -> Vec<(u32, f32)> {
    let mut map: HashMap<u32, f32> = HashMap::new();
    for (id, d) in beam.into_iter().chain(existing.iter().copied()) {
        map.entry(id).or_insert(d);
    }
    let mut merged: Vec<(u32, f32)> = map.into_iter().collect();
    merged.sort_by(cmp_dist_id);
    merged
}

/// NSG-style heuristic prune: candidate `j` is kept unless some already-kept `k`
/// satisfies `d(j,k) < d(i,j)` (spec §4.11's "heuristic prune"). Pruned candidates
/// are remembered (capped at `max_pruned_size`) for the angle-based supplement pass.
fn heuristic_prune(
    space: &Space,
    node: u32,
    mut candidates: Vec<(u32, f32)>,
    max_pruned_size: usize,
) -> (Vec<(u32, f32)>, Vec<u32>) {
    candidates.sort_by(cmp_dist_id);

    let mut kept: Vec<(u32, f32)> = Vec::with_capacity(DEGREE);
    let mut prune_list = Vec::new();
    for (cand_id, cand_dist) in candidates {
        if cand_id == node {
            continue;
        }
        if kept.len() >= DEGREE {
            break;
        }
        let occluded = kept
            .iter()
            .any(|&(kept_id, _)| space.get_distance(kept_id, cand_id) < cand_dist);
        if occluded {
            if prune_list.len() < max_pruned_size {
                prune_list.push(cand_id);
            }
        } else {
            kept.push((cand_id, cand_dist));
        }
    }
    (kept, prune_list)
}

/// Whether candidate `k` (at distance `d_ik` from `i`) is occluded from `i`'s
/// perspective by any already-retained neighbor `j` at `d(i,j) <= d_ik`, per the
/// cosine-angle rule in spec §4.11 phase 4.
fn is_occluded(space: &Space, retained: &[(u32, f32)], k: u32, d_ik: f32, tau: f32) -> bool {
    retained.iter().any(|&(j, d_ij)| {
        if d_ij > d_ik || d_ij == 0.0 || d_ik == 0.0 {
            return false;
        }
        let d_jk = space.get_distance(j, k);
        let denom = 2.0 * (d_ij * d_ik).sqrt();
        if denom == 0.0 {
            return false;
        }
        let cos = (d_ik + d_ij - d_jk) / denom;
        cos > tau
    })
}
