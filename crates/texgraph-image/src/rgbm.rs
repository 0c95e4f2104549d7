//! RGBM range compression.
//!
//! RGBM stores HDR color as 8-bit RGB scaled by a shared multiplier in the
//! alpha channel: `rgb = stored_rgb * stored_a * RANGE`. Used for compressed
//! cube-map storage and the cube prefilter path.

use crate::{Image, PixelFormat};

/// Maximum representable multiplier. 6.0 is the common convention for
/// environment maps.
pub const RGBM_RANGE: f32 = 6.0;

/// Packs one linear RGB triple into RGBM bytes.
pub fn pack(rgb: [f32; 3]) -> [u8; 4] {
    let max = rgb[0].max(rgb[1]).max(rgb[2]).max(1e-6);
    let m = (max / RGBM_RANGE).clamp(0.0, 1.0);
    // Quantize the multiplier up so the decoded value never undershoots.
    let m = (m * 255.0).ceil() / 255.0;
    let scale = 1.0 / (m * RGBM_RANGE);
    [
        ((rgb[0] * scale).clamp(0.0, 1.0) * 255.0).round() as u8,
        ((rgb[1] * scale).clamp(0.0, 1.0) * 255.0).round() as u8,
        ((rgb[2] * scale).clamp(0.0, 1.0) * 255.0).round() as u8,
        (m * 255.0).round() as u8,
    ]
}

/// Unpacks RGBM bytes back to linear RGB.
pub fn unpack(px: [u8; 4]) -> [f32; 3] {
    let m = px[3] as f32 / 255.0 * RGBM_RANGE;
    [
        px[0] as f32 / 255.0 * m,
        px[1] as f32 / 255.0 * m,
        px[2] as f32 / 255.0 * m,
    ]
}

/// Converts an RGB32F image to RGBM (mip 0, face 0 layouts only).
pub fn encode_image(src: &Image) -> Option<Image> {
    if src.format() != PixelFormat::Rgb32F && src.format() != PixelFormat::Rgba32F {
        return None;
    }
    let comps = src.format().component_count();
    let (w, h) = (src.width(), src.height());
    let mut out = Image::new(w, h, PixelFormat::Rgbm);
    let floats: Vec<f32> = src
        .bytes()
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    for i in 0..(w * h) as usize {
        let base = i * comps;
        let packed = pack([floats[base], floats[base + 1], floats[base + 2]]);
        out.bytes_mut()[i * 4..i * 4 + 4].copy_from_slice(&packed);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_within_tolerance() {
        for rgb in [[0.0, 0.0, 0.0], [1.0, 0.5, 0.25], [5.5, 2.0, 0.1]] {
            let back = unpack(pack(rgb));
            for c in 0..3 {
                assert!(
                    (back[c] - rgb[c]).abs() < 0.05,
                    "channel {c}: {} vs {}",
                    back[c],
                    rgb[c]
                );
            }
        }
    }

    #[test]
    fn values_above_range_clamp() {
        let back = unpack(pack([100.0, 0.0, 0.0]));
        assert!((back[0] - RGBM_RANGE).abs() < 0.05);
    }
}
