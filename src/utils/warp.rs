//! Affine image warping.

use crate::core::errors::FlowResult;
use crate::geometry::{AffineTransform, Point};
use image::{Rgb, RgbImage};
use rayon::prelude::*;

/// Warps `src` through `transform` into a `dst_width × dst_height` image.
///
/// `transform` maps source pixels to destination pixels; every destination
/// pixel is pulled back through its inverse and sampled bilinearly. Pixels
/// that fall outside the source are set to `fill`. Rows are processed in
/// parallel.
///
/// # Errors
///
/// Fails with `SingularTransform` if `transform` cannot be inverted.
pub fn warp_affine(
    src: &RgbImage,
    transform: &AffineTransform,
    dst_width: u32,
    dst_height: u32,
    fill: Rgb<u8>,
) -> FlowResult<RgbImage> {
    let inverse = transform.invert()?;
    let mut dst = RgbImage::new(dst_width.max(1), dst_height.max(1));
    let row_len = (dst.width() * 3) as usize;
    let (src_width, src_height) = src.dimensions();
    if src_width == 0 || src_height == 0 {
        return Ok(RgbImage::from_pixel(dst.width(), dst.height(), fill));
    }
    let max_x = (src_width - 1) as f64;
    let max_y = (src_height - 1) as f64;

    let buffer: &mut [u8] = dst.as_mut();
    buffer
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(dst_y, row)| {
            for (dst_x, pixel) in row.chunks_exact_mut(3).enumerate() {
                let p = inverse.apply(Point::new(dst_x as f64, dst_y as f64));
                let value = if p.x >= 0.0 && p.y >= 0.0 && p.x <= max_x && p.y <= max_y {
                    bilinear_interpolate(src, p.x, p.y)
                } else {
                    fill
                };
                pixel.copy_from_slice(&value.0);
            }
        });

    Ok(dst)
}

/// Samples `image` at a fractional coordinate from its four neighbours.
fn bilinear_interpolate(image: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let x1 = x.floor() as u32;
    let y1 = y.floor() as u32;
    let x2 = (x1 + 1).min(image.width() - 1);
    let y2 = (y1 + 1).min(image.height() - 1);

    let dx = x - x1 as f64;
    let dy = y - y1 as f64;

    let p11 = image.get_pixel(x1, y1);
    let p12 = image.get_pixel(x1, y2);
    let p21 = image.get_pixel(x2, y1);
    let p22 = image.get_pixel(x2, y2);

    let mut result = [0u8; 3];
    for (i, channel) in result.iter_mut().enumerate() {
        let val = (1.0 - dx) * (1.0 - dy) * p11.0[i] as f64
            + dx * (1.0 - dy) * p21.0[i] as f64
            + (1.0 - dx) * dy * p12.0[i] as f64
            + dx * dy * p22.0[i] as f64;
        *channel = val.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(result)
}
