//! Shared test tooling (spec §4.0.3, §6): a minimal `fvecs`/`ivecs` reader and a toy
//! brute-force k-NN graph builder standing in for the external graph builder the
//! crate treats as an out-of-scope collaborator. Not part of the library surface.

#![allow(dead_code)]

use rabitq_engine::graph::Graph;
use rabitq_engine::space::Space;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Installs a `tracing` subscriber once per test binary, so refiner/search spans are
/// visible when a test is run with `--nocapture` and `RUST_LOG` set.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Reads the `fvecs` format: a sequence of `[dim: i32][dim f32s]` records, all
/// vectors sharing the same `dim`. Returns the flattened data, the vector count, and
/// `dim`.
pub fn read_fvecs(path: &Path) -> io::Result<(Vec<f32>, usize, usize)> {
    let mut file = std::fs::File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    parse_vecs::<f32>(&bytes, |chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
}

/// Reads the `ivecs` format: identical framing to `fvecs` but with `i32` entries.
pub fn read_ivecs(path: &Path) -> io::Result<(Vec<i32>, usize, usize)> {
    let mut file = std::fs::File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    parse_vecs::<i32>(&bytes, |chunk| i32::from_le_bytes(chunk.try_into().unwrap()))
}

fn parse_vecs<T: Copy>(bytes: &[u8], decode: impl Fn(&[u8]) -> T) -> io::Result<(Vec<T>, usize, usize)> {
    if bytes.len() < 4 {
        return Ok((Vec::new(), 0, 0));
    }
    let dim = i32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let record_bytes = 4 + dim * 4;
    if record_bytes == 0 || bytes.len() % record_bytes != 0 {
        return Err(io::Error::other("malformed vecs file: uneven record size"));
    }
    let n = bytes.len() / record_bytes;

    let mut out = Vec::with_capacity(n * dim);
    for i in 0..n {
        let base = i * record_bytes;
        let this_dim = i32::from_le_bytes(bytes[base..base + 4].try_into().unwrap()) as usize;
        if this_dim != dim {
            return Err(io::Error::other("malformed vecs file: inconsistent dim"));
        }
        for d in 0..dim {
            let off = base + 4 + d * 4;
            out.push(decode(&bytes[off..off + 4]));
        }
    }
    Ok((out, n, dim))
}

/// Builds an exact k-NN graph by brute force: every node's neighbor list is its
/// `degree` truly nearest other points. `O(n^2)`, fine for the small `n` these tests
/// use as "some external builder already ran" fixtures — not a contender for a real
/// graph builder.
pub fn brute_force_knn_graph(space: &Space, n: usize, degree: usize) -> Graph {
    let mut graph = Graph::new_empty(n, 0);
    for i in 0..n as u32 {
        let mut dists: Vec<(u32, f32)> = (0..n as u32)
            .filter(|&j| j != i)
            .map(|j| (j, space.get_distance(i, j)))
            .collect();
        dists.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        let neighbors: Vec<u32> = dists.into_iter().take(degree).map(|(id, _)| id).collect();
        graph.set_neighbors(i, &neighbors);
    }
    graph
}

/// Recall@k of `found` (ascending-distance candidate ids) against `truth` (the exact
/// nearest neighbors, same ordering convention): fraction of `truth`'s first `k` ids
/// that also appear anywhere in `found`'s first `k`.
pub fn recall_at_k(found: &[u32], truth: &[u32], k: usize) -> f64 {
    let found_set: std::collections::HashSet<u32> = found.iter().take(k).copied().collect();
    let hits = truth.iter().take(k).filter(|id| found_set.contains(id)).count();
    hits as f64 / k as f64
}
