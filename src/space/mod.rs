//! `Space`: storage + quantizer bundle, and the per-query `QueryComputer` it hands out
//! (spec §4.7, §4.8).

pub mod storage;

use crate::error::{EngineError, Result};
use crate::graph::DEGREE;
use crate::numerics::distance::l2_squared;
use crate::quant::fastscan::{self, PackedCodes};
use crate::quant::lut::Lut;
use crate::quant::rabitq::batch_quantize;
use crate::rotator::{FhtKacRotator, Rotator, RotatorConfig};
use std::io::{Read, Write};
use storage::Storage;

/// Distance metric a space is configured for. Only squared Euclidean is supported
/// (spec §1 non-goal); the enum still exists so the persisted format has a forward
/// slot and configuration errors have somewhere to point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    SquaredL2,
}

impl Metric {
    fn to_u32(self) -> u32 {
        match self {
            Metric::SquaredL2 => 0,
        }
    }

    fn from_u32(v: u32) -> Result<Self> {
        match v {
            0 => Ok(Metric::SquaredL2),
            other => Err(EngineError::Format(format!("unknown metric tag {other}"))),
        }
    }
}

/// Validated construction parameters for a [`Space`].
#[derive(Debug, Clone, Copy)]
pub struct SpaceConfig {
    pub metric: Metric,
    pub dim: usize,
    pub capacity: usize,
    pub seed: u64,
}

impl SpaceConfig {
    pub fn try_new(metric: Metric, dim: usize, capacity: usize, seed: u64) -> Result<Self> {
        if dim == 0 {
            return Err(EngineError::Config("dim must be non-zero".into()));
        }
        if capacity == 0 {
            return Err(EngineError::Config("capacity must be non-zero".into()));
        }
        Ok(SpaceConfig {
            metric,
            dim,
            capacity,
            seed,
        })
    }
}

/// `c_1` from spec §4.5's estimator formula.
const C1: f32 = -0.5;

pub struct Space {
    metric: Metric,
    seed: u64,
    rotator: FhtKacRotator,
    storage: Storage,
}

impl Space {
    pub fn new(config: SpaceConfig) -> Result<Self> {
        let rotator_config = RotatorConfig::try_new(config.dim, config.seed)?;
        let rotator = FhtKacRotator::new(&rotator_config);
        let storage = Storage::new(config.dim, rotator.padded_dim(), config.capacity);
        Ok(Space {
            metric: config.metric,
            seed: config.seed,
            rotator,
            storage,
        })
    }

    pub fn dim(&self) -> usize {
        self.storage.dim()
    }

    pub fn padded_dim(&self) -> usize {
        self.storage.padded_dim()
    }

    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    pub fn item_cnt(&self) -> usize {
        self.storage.item_cnt()
    }

    pub fn raw_vector(&self, id: u32) -> &[f32] {
        self.storage.raw_vector(id)
    }

    /// Bulk-copies `n` `dim`-length vectors into slots `[0, n)`. Does not touch any
    /// neighbor code block — those come from [`Space::update_batch_data`].
    pub fn fit(&mut self, data: &[f32], n: usize) -> Result<()> {
        self.storage.fit(data, n)
    }

    /// (Re)quantizes node `c`'s neighbor block from its current raw vector as centroid
    /// and the raw vectors of `edges` (sentinel [`crate::graph::NO_NEIGHBOR`] slots
    /// quantize as coincident with the centroid). Safe to call concurrently for
    /// distinct `c` — see [`storage::Storage`]'s module docs.
    ///
    /// # Panics
    /// Panics if `edges.len() != 32`.
    pub fn update_batch_data(&self, c: u32, edges: &[u32]) {
        assert_eq!(edges.len(), DEGREE);
        let centroid = self.storage.raw_vector(c);
        let neighbors: Vec<Option<&[f32]>> = edges
            .iter()
            .map(|&id| {
                if id == crate::graph::NO_NEIGHBOR {
                    None
                } else {
                    Some(self.storage.raw_vector(id))
                }
            })
            .collect();
        let block = batch_quantize(&self.rotator, centroid, &neighbors);
        self.storage.set_quant_block(c, block);
    }

    pub fn get_distance(&self, i: u32, j: u32) -> f32 {
        l2_squared(self.storage.raw_vector(i), self.storage.raw_vector(j))
    }

    pub fn get_query_computer<'a>(&'a self, q: &[f32]) -> QueryComputer<'a> {
        QueryComputer::new(self, q)
    }

    /// Little-endian dump: `metric(u32) | dim(u32) | item_cnt(u32) | capacity(u32) |
    /// storage_blob | quantizer(dim(u32) | padded_dim(u32) | rotator_type(u32) |
    /// seed(u64))` (spec §6). The rotator itself isn't serialized field-by-field:
    /// since it's a pure function of `(dim, padded_dim, seed)`, persisting the seed and
    /// reconstructing on load satisfies the same "deterministic given a persisted
    /// seed" contract with a far smaller file.
    pub fn save<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_all(&self.metric.to_u32().to_le_bytes())?;
        w.write_all(&(self.dim() as u32).to_le_bytes())?;
        w.write_all(&(self.item_cnt() as u32).to_le_bytes())?;
        w.write_all(&(self.capacity() as u32).to_le_bytes())?;
        self.storage.save(&mut w)?;
        w.write_all(&(self.dim() as u32).to_le_bytes())?;
        w.write_all(&(self.padded_dim() as u32).to_le_bytes())?;
        w.write_all(&0u32.to_le_bytes())?; // rotator_type: 0 == FhtKacRotator
        w.write_all(&self.seed().to_le_bytes())?;
        Ok(())
    }

    pub fn load<R: Read>(mut r: R) -> Result<Self> {
        let mut buf4 = [0u8; 4];
        let mut read_u32 = |r: &mut R| -> Result<u32> {
            r.read_exact(&mut buf4)?;
            Ok(u32::from_le_bytes(buf4))
        };
        let metric = Metric::from_u32(read_u32(&mut r)?)?;
        let _dim = read_u32(&mut r)?;
        let _item_cnt = read_u32(&mut r)?;
        let _capacity = read_u32(&mut r)?;
        let storage = Storage::load(&mut r)?;

        let q_dim = read_u32(&mut r)? as usize;
        let q_padded_dim = read_u32(&mut r)? as usize;
        let rotator_type = read_u32(&mut r)?;
        if rotator_type != 0 {
            return Err(EngineError::Format(format!(
                "unknown rotator_type {rotator_type}"
            )));
        }
        let mut buf8 = [0u8; 8];
        r.read_exact(&mut buf8)?;
        let seed = u64::from_le_bytes(buf8);

        let rotator_config = RotatorConfig::try_new(q_dim, seed)?;
        let rotator = FhtKacRotator::new(&rotator_config);
        if rotator.padded_dim() != q_padded_dim {
            return Err(EngineError::Format(
                "reconstructed rotator padded_dim does not match snapshot".into(),
            ));
        }

        Ok(Space {
            metric,
            seed,
            rotator,
            storage,
        })
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

pub struct QueryComputer<'a> {
    space: &'a Space,
    query: Vec<f32>,
    lut: Lut,
    g_k1xsumq: f32,
    g_add: f32,
    est_dists: [f32; DEGREE],
}

impl<'a> QueryComputer<'a> {
    fn new(space: &'a Space, q: &[f32]) -> Self {
        assert_eq!(q.len(), space.dim());
        let mut q_tilde = vec![0f32; space.padded_dim()];
        space.rotator.rotate(q, &mut q_tilde);
        let lut = Lut::build(&q_tilde);
        let sum_q_tilde: f32 = q_tilde.iter().sum();
        QueryComputer {
            space,
            query: q.to_vec(),
            lut,
            g_k1xsumq: C1 * sum_q_tilde,
            g_add: 0.0,
            est_dists: [0.0; DEGREE],
        }
    }

    /// Loads centroid `c`'s neighbor block: exact query-to-centroid distance plus the
    /// batched estimated distance to each of its 32 neighbor slots (spec §4.5/§4.8).
    pub fn load_centroid(&mut self, c: u32) {
        let centroid = self.space.raw_vector(c);
        self.g_add = l2_squared(&self.query, centroid);

        let block = self.space.storage.quant_block(c);
        let packed = PackedCodes::from_bytes(self.space.padded_dim(), block.packed_codes.clone());
        let accum = fastscan::accumulate(&packed, &self.lut.table);

        for i in 0..DEGREE {
            self.est_dists[i] = block.f_add[i]
                + self.g_add
                + block.f_rescale[i]
                    * (self.lut.delta * accum[i] as f32 + self.lut.sum_vl + self.g_k1xsumq);
        }
    }

    /// Estimated squared distance from the query to the `i`-th neighbor of the
    /// currently loaded centroid. No bounds check, per spec §4.8.
    pub fn operator(&self, i: usize) -> f32 {
        self.est_dists[i]
    }

    /// Exact squared distance from the query to the currently loaded centroid.
    pub fn get_exact_qr_c_dist(&self) -> f32 {
        self.g_add
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NO_NEIGHBOR;

    fn tiny_space() -> Space {
        let config = SpaceConfig::try_new(Metric::SquaredL2, 4, 4, 7).unwrap();
        Space::new(config).unwrap()
    }

    #[test]
    fn fit_then_raw_vector_matches_input() {
        let mut space = tiny_space();
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        space.fit(&data, 2).unwrap();
        assert_eq!(space.raw_vector(0), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(space.raw_vector(1), &[5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn get_distance_matches_l2() {
        let mut space = tiny_space();
        space
            .fit(&[0.0, 0.0, 0.0, 0.0, 3.0, 4.0, 0.0, 0.0], 2)
            .unwrap();
        assert_eq!(space.get_distance(0, 1), 25.0);
    }

    #[test]
    fn update_batch_data_then_load_centroid_estimates_self_as_near_zero() {
        let mut space = tiny_space();
        space
            .fit(
                &[
                    0.0, 0.0, 0.0, 0.0, // id 0: centroid
                    1.0, 0.0, 0.0, 0.0, // id 1: a neighbor
                    0.0, 1.0, 0.0, 0.0, // id 2: another neighbor
                    0.0, 0.0, 0.0, 0.0, // id 3: unused
                ],
                4,
            )
            .unwrap();
        let mut edges = vec![NO_NEIGHBOR; 32];
        edges[0] = 1;
        edges[1] = 2;
        space.update_batch_data(0, &edges);

        let mut computer = space.get_query_computer(&[0.0, 0.0, 0.0, 0.0]);
        computer.load_centroid(0);
        assert_eq!(computer.get_exact_qr_c_dist(), 0.0);
        // neighbor 1 is truly at distance 1.0 from the query; the RaBitQ estimate
        // should land in the same ballpark rather than wildly off.
        assert!((computer.operator(0) - 1.0).abs() < 1.0);
    }

    #[test]
    fn save_load_roundtrip_preserves_distances() {
        let mut space = tiny_space();
        space
            .fit(&[0.0, 0.0, 0.0, 0.0, 3.0, 4.0, 0.0, 0.0], 2)
            .unwrap();
        let edges = vec![NO_NEIGHBOR; 32];
        space.update_batch_data(0, &edges);

        let mut buf = Vec::new();
        space.save(&mut buf).unwrap();
        let loaded = Space::load(&buf[..]).unwrap();

        assert_eq!(loaded.get_distance(0, 1), space.get_distance(0, 1));
        assert_eq!(loaded.dim(), space.dim());
        assert_eq!(loaded.padded_dim(), space.padded_dim());
    }
}
