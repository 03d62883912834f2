//! RBQ quantizer: `batch_quantize` (spec §4.5).

use super::fastscan::{self, BATCH, PackedCodes};
use super::set_bit;
use crate::rotator::Rotator;

/// The quantized result for one node's 32-neighbor block: packed codes plus the
/// per-neighbor correction factors used by [`crate::space::QueryComputer`].
#[derive(Debug, Clone)]
pub struct NeighborBlock {
    pub packed_codes: PackedCodes,
    pub f_add: [f32; BATCH],
    pub f_rescale: [f32; BATCH],
}

/// Quantizes a centroid's 32-neighbor batch.
///
/// `neighbors[i] == None` represents an empty slot (sentinel `-1` in the graph); it is
/// quantized as if the neighbor coincided with the centroid, which drives `ip_resi` to
/// zero and — via the same neutralization rule used for a genuine zero inner product —
/// makes its `f_rescale` zero, so it never perturbs a real estimate even if a caller
/// forgets to skip sentinel slots.
///
/// # Panics
/// Panics if `neighbors.len() != 32`, or any present neighbor vector's length doesn't
/// match `centroid.len()` (== `rotator.dim()`).
pub fn batch_quantize(
    rotator: &dyn Rotator,
    centroid: &[f32],
    neighbors: &[Option<&[f32]>],
) -> NeighborBlock {
    assert_eq!(neighbors.len(), BATCH);
    assert_eq!(centroid.len(), rotator.dim());
    let padded_dim = rotator.padded_dim();

    let mut c_tilde = vec![0f32; padded_dim];
    rotator.rotate(centroid, &mut c_tilde);

    let mut f_add = [0f32; BATCH];
    let mut f_rescale = [0f32; BATCH];
    let mut codes: Vec<Vec<u8>> = Vec::with_capacity(BATCH);

    let mut o_tilde = vec![0f32; padded_dim];
    for slot in 0..BATCH {
        let o = neighbors[slot].unwrap_or(centroid);
        assert_eq!(o.len(), centroid.len());
        rotator.rotate(o, &mut o_tilde);

        let mut code_bytes = vec![0u8; padded_dim / 8];
        let mut ip_resi = 0f32;
        let mut ip_cent = 0f32;
        let mut l2 = 0f32;
        for i in 0..padded_dim {
            let r_i = o_tilde[i] - c_tilde[i];
            l2 += r_i * r_i;
            let bit = r_i > 0.0;
            if bit {
                set_bit(&mut code_bytes, i);
            }
            let y_bar = if bit { 0.5 } else { -0.5 };
            ip_resi += y_bar * r_i;
            ip_cent += y_bar * c_tilde[i];
        }
        let ip_resi = if ip_resi == 0.0 { f32::INFINITY } else { ip_resi };

        f_add[slot] = l2 + 2.0 * l2 * ip_cent / ip_resi;
        f_rescale[slot] = -2.0 * l2 / ip_resi;
        codes.push(code_bytes);
    }

    let packed_codes = fastscan::pack_codes(padded_dim, &codes);
    NeighborBlock {
        packed_codes,
        f_add,
        f_rescale,
    }
}
