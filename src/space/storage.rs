//! Sequential storage arena (spec §4.6).
//!
//! Raw vectors live in one 64-byte-aligned arena, written once by [`Storage::fit`] and
//! read-only afterward — exactly the "searches are read-only, fit is a bulk load"
//! non-goal from spec §1. Per-node quantized neighbor blocks (codes + correction
//! factors) sit behind one `RwLock` each instead of a second raw byte arena: spec §4.7
//! requires `update_batch_data` to be callable concurrently for distinct ids because
//! each slot's writable region is disjoint, and per-id locks give that property
//! directly without `unsafe` pointer splitting, at the cost of one lock per node
//! instead of truly lock-free disjoint writes (noted as a deliberate deviation from
//! the spec's single-arena description; see `DESIGN.md`).

use crate::error::{EngineError, Result};
use crate::quant::NeighborBlock;
use std::io::{Read, Write};
use std::mem::size_of;
use std::sync::{RwLock, RwLockReadGuard};

/// 64-byte aligned chunk used to back the raw-vector arena, at byte rather than `f32`
/// granularity, satisfying spec §4.6's alignment requirement directly.
#[repr(C, align(64))]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct AlignedBytes64([u8; 64]);

/// One node's quantized neighbor block: FastScan-packed codes plus the per-neighbor
/// correction factors (spec §4.5).
#[derive(Debug, Clone)]
pub struct QuantBlock {
    pub packed_codes: Vec<u8>,
    pub f_add: [f32; 32],
    pub f_rescale: [f32; 32],
}

impl QuantBlock {
    fn empty(padded_dim: usize) -> Self {
        QuantBlock {
            packed_codes: vec![0u8; padded_dim * 4],
            f_add: [0.0; 32],
            f_rescale: [0.0; 32],
        }
    }
}

pub struct Storage {
    dim: usize,
    padded_dim: usize,
    capacity: usize,
    item_cnt: usize,
    raw_slot_bytes: usize,
    raw: Box<[AlignedBytes64]>,
    quant: Vec<RwLock<QuantBlock>>,
}

impl Storage {
    pub fn new(dim: usize, padded_dim: usize, capacity: usize) -> Self {
        let raw_slot_bytes = (dim * size_of::<f32>()).div_ceil(64) * 64;
        let raw_len = capacity * (raw_slot_bytes / 64);
        Storage {
            dim,
            padded_dim,
            capacity,
            item_cnt: 0,
            raw_slot_bytes,
            raw: vec![AlignedBytes64([0u8; 64]); raw_len.max(1)].into_boxed_slice(),
            quant: (0..capacity)
                .map(|_| RwLock::new(QuantBlock::empty(padded_dim)))
                .collect(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn padded_dim(&self) -> usize {
        self.padded_dim
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn item_cnt(&self) -> usize {
        self.item_cnt
    }

    fn raw_slot_byte_range(&self, id: u32) -> std::ops::Range<usize> {
        let start = id as usize * self.raw_slot_bytes;
        start..start + self.dim * size_of::<f32>()
    }

    /// Bulk-copies `n` `dim`-length vectors from `data` into slots `[0, n)`.
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] if `n > capacity` or `data.len() != n * dim`.
    pub fn fit(&mut self, data: &[f32], n: usize) -> Result<()> {
        if n > self.capacity {
            return Err(EngineError::Config(format!(
                "fit: n={n} exceeds capacity={}",
                self.capacity
            )));
        }
        if data.len() != n * self.dim {
            return Err(EngineError::Config(format!(
                "fit: data length {} does not match n*dim ({})",
                data.len(),
                n * self.dim
            )));
        }

        let raw_slot_bytes = self.raw_slot_bytes;
        let dim = self.dim;
        let raw_bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.raw);
        for id in 0..n {
            let start = id * raw_slot_bytes;
            let range = start..start + dim * size_of::<f32>();
            let src = &data[id * dim..(id + 1) * dim];
            raw_bytes[range].copy_from_slice(bytemuck::cast_slice(src));
        }
        self.item_cnt = n;
        Ok(())
    }

    /// The raw `dim`-length vector for `id`.
    ///
    /// # Panics
    /// Panics if `id >= capacity`.
    pub fn raw_vector(&self, id: u32) -> &[f32] {
        let raw_bytes: &[u8] = bytemuck::cast_slice(&self.raw);
        bytemuck::cast_slice(&raw_bytes[self.raw_slot_byte_range(id)])
    }

    pub fn quant_block(&self, id: u32) -> RwLockReadGuard<'_, QuantBlock> {
        self.quant[id as usize].read().unwrap()
    }

    /// Replaces `id`'s quantized neighbor block. Safe to call concurrently for
    /// distinct `id`s — each has its own lock.
    pub fn set_quant_block(&self, id: u32, block: NeighborBlock) {
        let mut guard = self.quant[id as usize].write().unwrap();
        *guard = QuantBlock {
            packed_codes: block.packed_codes.as_bytes().to_vec(),
            f_add: block.f_add,
            f_rescale: block.f_rescale,
        };
    }

    /// Little-endian dump: `dim | padded_dim | capacity | item_cnt | raw arena |
    /// per-slot (packed_codes | f_add[32] | f_rescale[32])`.
    pub fn save<W: Write>(&self, mut w: W) -> Result<()> {
        for v in [
            self.dim as u32,
            self.padded_dim as u32,
            self.capacity as u32,
            self.item_cnt as u32,
        ] {
            w.write_all(&v.to_le_bytes())?;
        }
        let raw_bytes: &[u8] = bytemuck::cast_slice(&self.raw);
        w.write_all(raw_bytes)?;
        for lock in &self.quant {
            let block = lock.read().unwrap();
            w.write_all(&block.packed_codes)?;
            for &v in &block.f_add {
                w.write_all(&v.to_le_bytes())?;
            }
            for &v in &block.f_rescale {
                w.write_all(&v.to_le_bytes())?;
            }
        }
        Ok(())
    }

    pub fn load<R: Read>(mut r: R) -> Result<Self> {
        let mut buf4 = [0u8; 4];
        let mut read_u32 = |r: &mut R| -> Result<u32> {
            r.read_exact(&mut buf4)?;
            Ok(u32::from_le_bytes(buf4))
        };
        let dim = read_u32(&mut r)? as usize;
        let padded_dim = read_u32(&mut r)? as usize;
        let capacity = read_u32(&mut r)? as usize;
        let item_cnt = read_u32(&mut r)? as usize;

        let mut storage = Storage::new(dim, padded_dim, capacity);
        storage.item_cnt = item_cnt;

        {
            let raw_bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut storage.raw);
            r.read_exact(raw_bytes)?;
        }

        let codes_len = padded_dim * 4;
        for lock in &storage.quant {
            let mut packed_codes = vec![0u8; codes_len];
            r.read_exact(&mut packed_codes)?;
            let mut f_add = [0f32; 32];
            for slot in f_add.iter_mut() {
                let mut b = [0u8; 4];
                r.read_exact(&mut b)?;
                *slot = f32::from_le_bytes(b);
            }
            let mut f_rescale = [0f32; 32];
            for slot in f_rescale.iter_mut() {
                let mut b = [0u8; 4];
                r.read_exact(&mut b)?;
                *slot = f32::from_le_bytes(b);
            }
            *lock.write().unwrap() = QuantBlock {
                packed_codes,
                f_add,
                f_rescale,
            };
        }

        Ok(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quant::fastscan::pack_codes;

    #[test]
    fn fit_then_raw_vector_roundtrips() {
        let mut storage = Storage::new(4, 64, 8);
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        storage.fit(&data, 2).unwrap();
        assert_eq!(storage.raw_vector(0), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(storage.raw_vector(1), &[5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn fit_rejects_oversized_n() {
        let mut storage = Storage::new(4, 64, 1);
        let data = vec![0.0; 8];
        assert!(storage.fit(&data, 2).is_err());
    }

    #[test]
    fn set_and_read_quant_block() {
        let storage = Storage::new(4, 64, 4);
        let codes = vec![vec![0u8; 8]; 32];
        let packed = pack_codes(64, &codes);
        storage.set_quant_block(
            2,
            NeighborBlock {
                packed_codes: packed,
                f_add: [1.0; 32],
                f_rescale: [2.0; 32],
            },
        );
        let block = storage.quant_block(2);
        assert_eq!(block.f_add[0], 1.0);
        assert_eq!(block.f_rescale[31], 2.0);
    }

    #[test]
    fn save_load_roundtrip() {
        let mut storage = Storage::new(4, 64, 2);
        storage.fit(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], 2).unwrap();
        let codes = vec![vec![0u8; 8]; 32];
        storage.set_quant_block(
            0,
            NeighborBlock {
                packed_codes: pack_codes(64, &codes),
                f_add: [3.0; 32],
                f_rescale: [4.0; 32],
            },
        );

        let mut buf = Vec::new();
        storage.save(&mut buf).unwrap();
        let loaded = Storage::load(&buf[..]).unwrap();

        assert_eq!(loaded.raw_vector(0), storage.raw_vector(0));
        assert_eq!(loaded.raw_vector(1), storage.raw_vector(1));
        assert_eq!(loaded.quant_block(0).f_add[0], 3.0);
        assert_eq!(loaded.item_cnt(), 2);
    }
}
