//! Pixel-format conversion and allocation-size guards.
//!
//! Every backend funnels its output through these primitives: BGRA to
//! RGBA conversion and the overflow-checked RGBA buffer size.

use crate::error::{Error, Result};
use crate::types::{CropArea, ImageData};

/// Convert a BGRA pixel buffer to RGBA in-place.
///
/// Swaps channels 0 and 2 of each pixel; channels 1 and 3 are untouched.
/// A zero `pixel_count` is a no-op.
pub fn bgra_to_rgba(buf: &mut [u8], pixel_count: usize) {
    for px in buf[..pixel_count * 4].chunks_exact_mut(4) {
        px.swap(0, 2);
    }
}

/// Convert a BGRA source buffer into an RGBA destination buffer.
pub fn bgra_to_rgba_into(src: &[u8], dst: &mut [u8], pixel_count: usize) {
    let n = pixel_count * 4;
    for (s, d) in src[..n].chunks_exact(4).zip(dst[..n].chunks_exact_mut(4)) {
        d[0] = s[2];
        d[1] = s[1];
        d[2] = s[0];
        d[3] = s[3];
    }
}

/// Compute `width * height * 4` with overflow checking.
///
/// Returns 0 when either dimension is zero; fails when the product would
/// overflow `usize`.
pub fn checked_rgba_size(width: usize, height: usize) -> Result<usize> {
    width
        .checked_mul(height)
        .and_then(|px| px.checked_mul(4))
        .ok_or_else(|| {
            Error::capture(format!(
                "pixel buffer allocation would overflow ({}x{} RGBA)",
                width, height
            ))
        })
}

/// Copy a clamped sub-rectangle out of a tightly packed RGBA image.
pub(crate) fn crop_rgba(image: &ImageData, area: CropArea) -> Result<ImageData> {
    let (rx, ry) = (area.x as usize, area.y as usize);
    let (rw, rh) = (area.width as usize, area.height as usize);

    let mut cropped = ImageData {
        data: vec![0u8; checked_rgba_size(rw, rh)?],
        width: rw,
        height: rh,
    };
    for row in 0..rh {
        let src_off = ((ry + row) * image.width + rx) * 4;
        let dst_off = row * rw * 4;
        cropped.data[dst_off..dst_off + rw * 4]
            .copy_from_slice(&image.data[src_off..src_off + rw * 4]);
    }
    Ok(cropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rect;

    #[test]
    fn single_pixel_swap() {
        let mut buf = [100u8, 150, 200, 255];
        bgra_to_rgba(&mut buf, 1);
        assert_eq!(buf, [200, 150, 100, 255]);
    }

    #[test]
    fn zero_count_is_noop() {
        let mut buf = [1u8, 2, 3, 4];
        bgra_to_rgba(&mut buf, 0);
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn double_swap_is_identity() {
        let original: Vec<u8> = (0..64).collect();
        let mut buf = original.clone();
        bgra_to_rgba(&mut buf, 16);
        bgra_to_rgba(&mut buf, 16);
        assert_eq!(buf, original);
    }

    #[test]
    fn src_to_dst_conversion() {
        // Known BGRA pixel {B, G, R, A} must come out as {R, G, B, A}.
        let src = [10u8, 20, 30, 40, 50, 60, 70, 80];
        let mut dst = [0u8; 8];
        bgra_to_rgba_into(&src, &mut dst, 2);
        assert_eq!(dst, [30, 20, 10, 40, 70, 60, 50, 80]);
    }

    #[test]
    fn multi_pixel_equals_repeated_single() {
        let src = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        let mut all = [0u8; 12];
        bgra_to_rgba_into(&src, &mut all, 3);

        let mut one_by_one = [0u8; 12];
        for i in 0..3 {
            bgra_to_rgba_into(&src[i * 4..], &mut one_by_one[i * 4..], 1);
        }
        assert_eq!(all, one_by_one);
    }

    #[test]
    fn checked_size_zero_dimensions() {
        assert_eq!(checked_rgba_size(0, 100).unwrap(), 0);
        assert_eq!(checked_rgba_size(100, 0).unwrap(), 0);
    }

    #[test]
    fn checked_size_normal() {
        assert_eq!(checked_rgba_size(100, 100).unwrap(), 40_000);
    }

    #[test]
    fn checked_size_overflow_fails() {
        let err = checked_rgba_size(usize::MAX / 4 + 1, 1).unwrap_err();
        assert!(err.to_string().contains("pixel buffer allocation"));
    }

    #[test]
    fn crop_extracts_subrect() {
        // 4x4 image where each pixel's R channel is its index.
        let mut img = ImageData { data: vec![0u8; 64], width: 4, height: 4 };
        for i in 0..16 {
            img.data[i * 4] = i as u8;
            img.data[i * 4 + 3] = 255;
        }
        let area = Rect::new(1.0, 1.0, 2.0, 2.0).clamp_to(4, 4).unwrap();
        let cropped = crop_rgba(&img, area).unwrap();
        assert_eq!(cropped.width, 2);
        assert_eq!(cropped.height, 2);
        let reds: Vec<u8> = cropped.data.chunks_exact(4).map(|p| p[0]).collect();
        assert_eq!(reds, vec![5, 6, 9, 10]);
    }
}
