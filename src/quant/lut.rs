//! Query-side lookup table construction (spec §4.4).

/// A quantized lookup table for one query's rotated vector, plus the scalar
/// correction constants needed to recover a float estimate from the accumulated
/// `u16` FastScan sum (spec §4.5's `delta * accum[j] + sum_vl`).
#[derive(Debug, Clone)]
pub struct Lut {
    /// `4 * padded_dim` quantized bytes: `padded_dim / 4` groups of 16 entries, one
    /// per 4-bit binary pattern.
    pub table: Vec<u8>,
    pub delta: f32,
    pub sum_vl: f32,
}

impl Lut {
    /// Builds the LUT from a rotated query `q_tilde` of length `padded_dim`
    /// (`padded_dim` must be a multiple of 4).
    pub fn build(q_tilde: &[f32]) -> Self {
        let padded_dim = q_tilde.len();
        assert!(padded_dim % 4 == 0);
        let groups = padded_dim / 4;

        let mut float_table = vec![0f32; groups * 16];
        for g in 0..groups {
            let q = &q_tilde[4 * g..4 * g + 4];
            for idx in 0..16usize {
                let mut acc = 0f32;
                for (k, &qk) in q.iter().enumerate() {
                    let s = if (idx >> k) & 1 == 1 { 1.0 } else { -1.0 };
                    acc += s * qk;
                }
                float_table[g * 16 + idx] = acc * 0.5;
            }
        }

        let lo = float_table.iter().copied().fold(f32::INFINITY, f32::min);
        let hi = float_table
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        let delta = (hi - lo) / 255.0;

        let table: Vec<u8> = float_table
            .iter()
            .map(|&v| {
                if delta == 0.0 {
                    0u8
                } else {
                    (((v - lo) / delta).round().clamp(0.0, 255.0)) as u8
                }
            })
            .collect();

        let sum_vl = lo * groups as f32;

        Lut {
            table,
            delta,
            sum_vl,
        }
    }
}
