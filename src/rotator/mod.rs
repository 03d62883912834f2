//! Orthogonal rotation from `dim` to `padded_dim`.
//!
//! The default (and only) implementation composes a random sign-flip, a per-64-block
//! Fast Hadamard Transform, and several rounds of random-pair ("Kac walk") rotations
//! that mix information across blocks. Every stage is itself orthogonal, so the
//! composition preserves Euclidean norm up to floating-point rounding — this is the
//! load-bearing contract the quantizer and LUT depend on (spec §4.2, invariant 2).

use crate::error::{EngineError, Result};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Rounds an input dimension up to the nearest multiple of 64.
pub fn round_up_to_64(dim: usize) -> usize {
    dim.div_ceil(64) * 64
}

/// Validated configuration for a [`Rotator`].
#[derive(Debug, Clone, Copy)]
pub struct RotatorConfig {
    pub dim: usize,
    pub padded_dim: usize,
    pub seed: u64,
}

impl RotatorConfig {
    /// Builds a config from a raw `dim`, computing `padded_dim` per the spec's
    /// "round up to a multiple of 64" rule.
    pub fn try_new(dim: usize, seed: u64) -> Result<Self> {
        if dim == 0 {
            return Err(EngineError::Config("dim must be non-zero".into()));
        }
        Ok(RotatorConfig {
            dim,
            padded_dim: round_up_to_64(dim),
            seed,
        })
    }
}

/// Contract every rotator implementation must satisfy (spec §4.2):
/// norm-preserving, deterministic given a seed, `O(padded_dim log padded_dim)`.
pub trait Rotator: Send + Sync {
    fn dim(&self) -> usize;
    fn padded_dim(&self) -> usize;

    /// Rotates `src` (length [`Rotator::dim`]) into `dst` (length
    /// [`Rotator::padded_dim`]), zero-padding the tail before rotating.
    ///
    /// # Panics
    /// Panics if `src.len() != dim()` or `dst.len() != padded_dim()`.
    fn rotate(&self, src: &[f32], dst: &mut [f32]);
}

#[derive(Clone, Copy)]
struct KacPair {
    i: usize,
    j: usize,
    cos: f32,
    sin: f32,
}

/// Default rotator: random sign flip, block Fast Hadamard Transform (block size 64),
/// then `rounds` Kac-walk mixing passes across the whole padded vector.
pub struct FhtKacRotator {
    dim: usize,
    padded_dim: usize,
    sign_mask: Vec<f32>,
    kac_rounds: Vec<Vec<KacPair>>,
}

impl FhtKacRotator {
    pub fn new(config: &RotatorConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

        let sign_mask: Vec<f32> = (0..config.padded_dim)
            .map(|_| if rng.random_bool(0.5) { 1.0 } else { -1.0 })
            .collect();

        let rounds = kac_round_count(config.padded_dim);
        let kac_rounds = (0..rounds)
            .map(|_| random_pairing_round(config.padded_dim, &mut rng))
            .collect();

        FhtKacRotator {
            dim: config.dim,
            padded_dim: config.padded_dim,
            sign_mask,
            kac_rounds,
        }
    }
}

/// Number of Kac-walk rounds: logarithmic in the padded dimension, floored at 4 so
/// small dims still get adequate mixing.
fn kac_round_count(padded_dim: usize) -> usize {
    let log2 = (padded_dim as f64).log2().ceil() as usize;
    log2.max(4)
}

fn random_pairing_round(padded_dim: usize, rng: &mut ChaCha8Rng) -> Vec<KacPair> {
    let mut perm: Vec<usize> = (0..padded_dim).collect();
    perm.shuffle(rng);
    perm.chunks_exact(2)
        .map(|pair| {
            let theta: f32 = rng.random_range(0.0..std::f32::consts::TAU);
            KacPair {
                i: pair[0],
                j: pair[1],
                cos: theta.cos(),
                sin: theta.sin(),
            }
        })
        .collect()
}

/// In-place, unnormalized Fast Hadamard Transform over a length-64 block, followed by
/// the `1/sqrt(64)` normalization that makes the transform orthogonal.
fn fht64_inplace(block: &mut [f32]) {
    debug_assert_eq!(block.len(), 64);
    let mut h = 1usize;
    while h < 64 {
        let mut i = 0;
        while i < 64 {
            for j in i..i + h {
                let x = block[j];
                let y = block[j + h];
                block[j] = x + y;
                block[j + h] = x - y;
            }
            i += h * 2;
        }
        h *= 2;
    }
    const NORM: f32 = 0.125; // 1 / sqrt(64)
    for v in block.iter_mut() {
        *v *= NORM;
    }
}

impl Rotator for FhtKacRotator {
    fn dim(&self) -> usize {
        self.dim
    }

    fn padded_dim(&self) -> usize {
        self.padded_dim
    }

    fn rotate(&self, src: &[f32], dst: &mut [f32]) {
        assert_eq!(src.len(), self.dim);
        assert_eq!(dst.len(), self.padded_dim);

        for i in 0..self.padded_dim {
            dst[i] = if i < self.dim {
                src[i] * self.sign_mask[i]
            } else {
                0.0
            };
        }

        for block in dst.chunks_mut(64) {
            fht64_inplace(block);
        }

        for round in &self.kac_rounds {
            for pair in round {
                let x = dst[pair.i];
                let y = dst[pair.j];
                dst[pair.i] = pair.cos * x - pair.sin * y;
                dst[pair.j] = pair.sin * x + pair.cos * y;
            }
        }
    }
}
