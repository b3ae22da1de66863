//! ThumbHash placeholder encoding.
//!
//! Encodes a tiny RGBA raster (≤100×100) into a compact byte string whose
//! decoded form is a blurred preview — the manifest inlines it base64'd so
//! galleries can paint placeholders before any network fetch.
//!
//! This is a DCT over normalized luminance/chroma channels plus a packed
//! nibble stream of AC coefficients. The encoding is deliberately
//! self-contained: identical input bytes must always produce the identical
//! hash, since manifest diffing treats the hash as stable for unchanged
//! files.

use base64::Engine;

/// Inputs larger than this are a caller bug; hashing full rasters would be
/// slow and no more accurate.
pub const MAX_HASH_DIM: u32 = 100;

/// Encode an RGBA raster into a ThumbHash byte string.
///
/// `None` when the raster is empty or exceeds [`MAX_HASH_DIM`].
pub fn encode(width: u32, height: u32, rgba: &[u8]) -> Option<Vec<u8>> {
    if width == 0 || height == 0 || width > MAX_HASH_DIM || height > MAX_HASH_DIM {
        return None;
    }
    let w = width as usize;
    let h = height as usize;
    if rgba.len() < w * h * 4 {
        return None;
    }

    // Average color, alpha-weighted.
    let mut avg_r = 0.0f32;
    let mut avg_g = 0.0f32;
    let mut avg_b = 0.0f32;
    let mut avg_a = 0.0f32;
    for px in 0..w * h {
        let a = rgba[px * 4 + 3] as f32 / 255.0;
        avg_r += a / 255.0 * rgba[px * 4] as f32;
        avg_g += a / 255.0 * rgba[px * 4 + 1] as f32;
        avg_b += a / 255.0 * rgba[px * 4 + 2] as f32;
        avg_a += a;
    }
    if avg_a > 0.0 {
        avg_r /= avg_a;
        avg_g /= avg_a;
        avg_b /= avg_a;
    }

    let has_alpha = avg_a < (w * h) as f32;
    let l_limit = if has_alpha { 5 } else { 7 }; // use fewer luminance bits with alpha
    let longer = w.max(h);
    let lx = (((l_limit * w) as f32 / longer as f32).round() as usize).max(1);
    let ly = (((l_limit * h) as f32 / longer as f32).round() as usize).max(1);

    // Channels: luminance, two chroma axes, alpha. Colors composite over
    // the average so transparent regions don't skew the DCT.
    let mut l = vec![0.0f32; w * h];
    let mut p = vec![0.0f32; w * h];
    let mut q = vec![0.0f32; w * h];
    let mut al = vec![0.0f32; w * h];
    for px in 0..w * h {
        let a = rgba[px * 4 + 3] as f32 / 255.0;
        let r = avg_r * (1.0 - a) + a / 255.0 * rgba[px * 4] as f32;
        let g = avg_g * (1.0 - a) + a / 255.0 * rgba[px * 4 + 1] as f32;
        let b = avg_b * (1.0 - a) + a / 255.0 * rgba[px * 4 + 2] as f32;
        l[px] = (r + g + b) / 3.0;
        p[px] = (r + g) / 2.0 - b;
        q[px] = r - g;
        al[px] = a;
    }

    let (l_dc, l_ac, l_scale) = encode_channel(&l, w, h, lx.max(3), ly.max(3));
    let (p_dc, p_ac, p_scale) = encode_channel(&p, w, h, 3, 3);
    let (q_dc, q_ac, q_scale) = encode_channel(&q, w, h, 3, 3);
    let (a_dc, a_ac, a_scale) = if has_alpha {
        encode_channel(&al, w, h, 5, 5)
    } else {
        (1.0, Vec::new(), 1.0)
    };

    let is_landscape = w > h;
    let header24: u32 = ((63.0 * l_dc).round() as u32 & 63)
        | (((31.5 + 31.5 * p_dc).round() as u32 & 63) << 6)
        | (((31.5 + 31.5 * q_dc).round() as u32 & 63) << 12)
        | (((31.0 * l_scale).round() as u32 & 31) << 18)
        | ((has_alpha as u32) << 23);
    let short_axis_terms = if is_landscape { ly } else { lx };
    let header16: u16 = (short_axis_terms as u16 & 7)
        | (((62.5 + 62.5 * p_scale).round() as u16 & 63) << 3)
        | (((62.5 + 62.5 * q_scale).round() as u16 & 63) << 9)
        | ((is_landscape as u16) << 15);

    let mut hash = vec![
        (header24 & 255) as u8,
        ((header24 >> 8) & 255) as u8,
        (header24 >> 16) as u8,
        (header16 & 255) as u8,
        (header16 >> 8) as u8,
    ];
    if has_alpha {
        hash.push(
            ((15.0 * a_dc).round() as u8 & 15) | ((15.0 * a_scale).round() as u8) << 4,
        );
    }

    // Pack AC coefficients, one nibble each.
    let mut is_odd = false;
    for ac in [&l_ac, &p_ac, &q_ac] {
        pack_nibbles(&mut hash, ac, &mut is_odd);
    }
    if has_alpha {
        pack_nibbles(&mut hash, &a_ac, &mut is_odd);
    }

    Some(hash)
}

/// Encode and base64 the result, the form inlined into the manifest.
pub fn encode_base64(width: u32, height: u32, rgba: &[u8]) -> Option<String> {
    encode(width, height, rgba).map(|h| base64::engine::general_purpose::STANDARD.encode(h))
}

/// DCT one channel down to `nx × ny` coefficients.
///
/// Returns (DC term, normalized AC terms in [0, 1], scale).
fn encode_channel(channel: &[f32], w: usize, h: usize, nx: usize, ny: usize) -> (f32, Vec<f32>, f32) {
    let mut dc = 0.0f32;
    let mut ac = Vec::new();
    let mut scale = 0.0f32;
    let mut fx = vec![0.0f32; w];

    for cy in 0..ny {
        let mut cx = 0usize;
        while cx * ny < nx * (ny - cy) {
            let mut f = 0.0f32;
            for (x, slot) in fx.iter_mut().enumerate() {
                *slot = (std::f32::consts::PI / w as f32 * cx as f32 * (x as f32 + 0.5)).cos();
            }
            for y in 0..h {
                let fy = (std::f32::consts::PI / h as f32 * cy as f32 * (y as f32 + 0.5)).cos();
                for x in 0..w {
                    f += channel[x + y * w] * fx[x] * fy;
                }
            }
            f /= (w * h) as f32;
            if cx > 0 || cy > 0 {
                ac.push(f);
                scale = scale.max(f.abs());
            } else {
                dc = f;
            }
            cx += 1;
        }
    }

    if scale > 0.0 {
        for coeff in &mut ac {
            *coeff = 0.5 + 0.5 / scale * *coeff;
        }
    }
    (dc, ac, scale)
}

/// Append values as 4-bit nibbles, low nibble first.
fn pack_nibbles(hash: &mut Vec<u8>, values: &[f32], is_odd: &mut bool) {
    for &v in values {
        let nibble = (15.0 * v).round().clamp(0.0, 15.0) as u8;
        if *is_odd {
            let last = hash.len() - 1;
            hash[last] |= nibble << 4;
        } else {
            hash.push(nibble);
        }
        *is_odd = !*is_odd;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_rgba(r: u8, g: u8, b: u8, a: u8, w: u32, h: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity((w * h * 4) as usize);
        for _ in 0..w * h {
            out.extend_from_slice(&[r, g, b, a]);
        }
        out
    }

    #[test]
    fn deterministic_for_identical_input() {
        let rgba = solid_rgba(120, 80, 40, 255, 32, 24);
        let a = encode(32, 24, &rgba).unwrap();
        let b = encode(32, 24, &rgba).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_colors_produce_distinct_hashes() {
        let red = encode(16, 16, &solid_rgba(220, 20, 20, 255, 16, 16)).unwrap();
        let blue = encode(16, 16, &solid_rgba(20, 20, 220, 255, 16, 16)).unwrap();
        assert_ne!(red, blue);
    }

    #[test]
    fn opaque_input_clears_alpha_bit() {
        let hash = encode(16, 16, &solid_rgba(100, 100, 100, 255, 16, 16)).unwrap();
        let header24 =
            hash[0] as u32 | ((hash[1] as u32) << 8) | ((hash[2] as u32) << 16);
        assert_eq!(header24 >> 23, 0);
    }

    #[test]
    fn transparent_input_sets_alpha_bit_and_extends_header() {
        let opaque = encode(16, 16, &solid_rgba(0, 0, 0, 255, 16, 16)).unwrap();
        let translucent = encode(16, 16, &solid_rgba(0, 0, 0, 128, 16, 16)).unwrap();
        let header24 = translucent[0] as u32
            | ((translucent[1] as u32) << 8)
            | ((translucent[2] as u32) << 16);
        assert_eq!(header24 >> 23, 1);
        assert!(translucent.len() > opaque.len());
    }

    #[test]
    fn landscape_flag_in_header() {
        let rgba = solid_rgba(50, 60, 70, 255, 40, 20);
        let hash = encode(40, 20, &rgba).unwrap();
        let header16 = hash[3] as u16 | ((hash[4] as u16) << 8);
        assert_eq!(header16 >> 15, 1);

        let rgba = solid_rgba(50, 60, 70, 255, 20, 40);
        let hash = encode(20, 40, &rgba).unwrap();
        let header16 = hash[3] as u16 | ((hash[4] as u16) << 8);
        assert_eq!(header16 >> 15, 0);
    }

    #[test]
    fn rejects_oversized_and_empty_input() {
        assert!(encode(101, 50, &[]).is_none());
        assert!(encode(0, 10, &[]).is_none());
        assert!(encode(10, 10, &[0u8; 8]).is_none()); // buffer too short
    }

    #[test]
    fn base64_form_is_padded_standard_alphabet() {
        let rgba = solid_rgba(10, 200, 90, 255, 24, 24);
        let b64 = encode_base64(24, 24, &rgba).unwrap();
        assert!(!b64.is_empty());
        assert!(b64
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=')));
    }

    #[test]
    fn gradient_hash_longer_than_header() {
        let w = 32u32;
        let h = 32u32;
        let mut rgba = Vec::new();
        for y in 0..h {
            for x in 0..w {
                rgba.extend_from_slice(&[(x * 8) as u8, (y * 8) as u8, 128, 255]);
            }
        }
        let hash = encode(w, h, &rgba).unwrap();
        // 5 header bytes + packed AC nibbles
        assert!(hash.len() > 5);
    }
}
