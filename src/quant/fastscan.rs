//! FastScan packing and accumulation (spec §4.3).
//!
//! The real FastScan layout reshuffles 32 compact binary codes so a SIMD shuffle can
//! evaluate all of them in one pass with a 16-entry nibble lookup table. This crate
//! implements the *mathematical contract* with a portable, neighbor-major byte layout:
//! `accumulate` still returns, for every neighbor, the sum over 4-dimension blocks of
//! `lut[block][nibble_of_code]`, which is the only externally observable guarantee
//! (spec §4.3). A SIMD backend can lay the same 32 codes out transposed for shuffle
//! instructions without changing this module's public contract.

use super::get_bit;

/// Fixed neighbor batch size the FastScan kernel is specialized for.
pub const BATCH: usize = 32;

/// A packed code block for one node's 32 neighbors.
#[derive(Debug, Clone)]
pub struct PackedCodes {
    padded_dim: usize,
    /// `BATCH` neighbor codes back to back, each `padded_dim / 8` bytes.
    data: Vec<u8>,
}

impl PackedCodes {
    pub fn padded_dim(&self) -> usize {
        self.padded_dim
    }

    pub fn bytes_per_neighbor(&self) -> usize {
        self.padded_dim / 8
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn from_bytes(padded_dim: usize, data: Vec<u8>) -> Self {
        assert_eq!(data.len(), BATCH * (padded_dim / 8));
        PackedCodes { padded_dim, data }
    }

    fn neighbor_code(&self, neighbor: usize) -> &[u8] {
        let stride = self.bytes_per_neighbor();
        &self.data[neighbor * stride..(neighbor + 1) * stride]
    }

    fn nibble(&self, neighbor: usize, block: usize) -> u8 {
        let code = self.neighbor_code(neighbor);
        let base = block * 4;
        let mut nib = 0u8;
        for k in 0..4 {
            if get_bit(code, base + k) {
                nib |= 1 << k;
            }
        }
        nib
    }
}

/// Packs `BATCH` compact binary codes (each `padded_dim / 8` bytes, MSB-first bit
/// order) into a single neighbor-major [`PackedCodes`] block.
///
/// # Panics
/// Panics if `compact_codes.len() != BATCH` or any code has the wrong length.
pub fn pack_codes(padded_dim: usize, compact_codes: &[Vec<u8>]) -> PackedCodes {
    assert_eq!(compact_codes.len(), BATCH);
    let bytes_per = padded_dim / 8;
    let mut data = Vec::with_capacity(BATCH * bytes_per);
    for code in compact_codes {
        assert_eq!(code.len(), bytes_per);
        data.extend_from_slice(code);
    }
    PackedCodes { padded_dim, data }
}

/// For every one of the `BATCH` neighbors, sums `lut[block][nibble]` across all
/// `padded_dim / 4` 4-dimension blocks, producing the quantized inner product
/// `⟨code_j, lut⟩` (spec §4.3/§4.5).
///
/// `lut` must have length `4 * padded_dim` (i.e. `padded_dim / 4` groups of 16 bytes).
///
/// # Panics
/// Panics if `lut.len() != 4 * packed.padded_dim()`.
pub fn accumulate(packed: &PackedCodes, lut: &[u8]) -> [u16; BATCH] {
    let padded_dim = packed.padded_dim();
    assert_eq!(lut.len(), 4 * padded_dim);
    let groups = padded_dim / 4;

    let mut out = [0u16; BATCH];
    for (j, slot) in out.iter_mut().enumerate() {
        let mut acc: u32 = 0;
        for g in 0..groups {
            let nib = packed.nibble(j, g) as usize;
            acc += lut[g * 16 + nib] as u32;
        }
        *slot = acc as u16;
    }
    out
}
