//! Image loading, saving and the lossless geometric operations nodes apply.
//!
//! Every operation that changes pixel geometry returns the current → new
//! affine map alongside the new image, so callers can derive the child
//! [`TransformState`](crate::geometry::TransformState).

use crate::core::errors::{FlowError, FlowResult};
use crate::geometry::AffineTransform;
use image::{ImageFormat, Rgb, RgbImage, imageops};
use std::path::Path;

/// Loads an image from a file path and converts it to RgbImage.
///
/// # Arguments
///
/// * `path` - A reference to the path of the image file to load
///
/// # Errors
///
/// Returns a `Processing` error of stage `ImageIo` if the file cannot be read
/// or decoded.
pub fn load_image(path: &Path) -> FlowResult<RgbImage> {
    let img = image::open(path)
        .map_err(|e| FlowError::image_io(format!("failed to load '{}'", path.display()), e))?;
    Ok(img.to_rgb8())
}

/// Encodes `image` to `path`, choosing the codec from `format` (`png`,
/// `jpg`/`jpeg` or `bmp`).
///
/// # Errors
///
/// Fails for an unsupported format or when encoding or writing fails.
pub fn save_image(image: &RgbImage, path: &Path, format: &str) -> FlowResult<()> {
    let format = match format.trim().to_ascii_lowercase().as_str() {
        "png" => ImageFormat::Png,
        "jpg" | "jpeg" => ImageFormat::Jpeg,
        "bmp" => ImageFormat::Bmp,
        other => {
            return Err(FlowError::invalid_input(format!(
                "unsupported image format '{}'",
                other
            )));
        }
    };
    image
        .save_with_format(path, format)
        .map_err(|e| FlowError::image_io(format!("failed to save '{}'", path.display()), e))
}

/// Creates a `width × height` image filled with `color`.
pub fn blank_image(width: u32, height: u32, color: Rgb<u8>) -> RgbImage {
    RgbImage::from_pixel(width.max(1), height.max(1), color)
}

/// Parses `"r,g,b"` (also `;` or space separated) into a color.
pub fn parse_color(text: &str) -> Option<Rgb<u8>> {
    let parts: Vec<u8> = text
        .split([',', ';', ' '])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<f64>().ok().map(|v| v.clamp(0.0, 255.0) as u8))
        .collect::<Option<Vec<_>>>()?;
    match parts[..] {
        [r, g, b, ..] => Some(Rgb([r, g, b])),
        _ => None,
    }
}

/// Copies the `width × height` window at `(x, y)` out of `image`.
pub fn crop_image(image: &RgbImage, x: u32, y: u32, width: u32, height: u32) -> RgbImage {
    imageops::crop_imm(image, x, y, width, height).to_image()
}

/// Rotates `image` counter-clockwise by a multiple of 90 degrees.
///
/// Returns `None` for any angle other than 90, 180 or 270.
pub fn rotate_ccw(image: &RgbImage, degrees: u32) -> Option<(RgbImage, AffineTransform)> {
    let (w, h) = (image.width() as f64, image.height() as f64);
    match degrees {
        90 => Some((
            imageops::rotate270(image),
            AffineTransform::new(0.0, 1.0, 0.0, -1.0, 0.0, w - 1.0),
        )),
        180 => Some((
            imageops::rotate180(image),
            AffineTransform::new(-1.0, 0.0, w - 1.0, 0.0, -1.0, h - 1.0),
        )),
        270 => Some((
            imageops::rotate90(image),
            AffineTransform::new(0.0, -1.0, h - 1.0, 1.0, 0.0, 0.0),
        )),
        _ => None,
    }
}

/// Mirrors `image` left-right, or top-bottom when `vertical` is set.
pub fn flip(image: &RgbImage, vertical: bool) -> (RgbImage, AffineTransform) {
    let (w, h) = (image.width() as f64, image.height() as f64);
    if vertical {
        (
            imageops::flip_vertical(image),
            AffineTransform::new(1.0, 0.0, 0.0, 0.0, -1.0, h - 1.0),
        )
    } else {
        (
            imageops::flip_horizontal(image),
            AffineTransform::new(-1.0, 0.0, w - 1.0, 0.0, 1.0, 0.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;

    fn marked(width: u32, height: u32) -> RgbImage {
        let mut img = RgbImage::new(width, height);
        img.put_pixel(1, 0, Rgb([255, 0, 0]));
        img
    }

    fn red_at(img: &RgbImage) -> (u32, u32) {
        img.enumerate_pixels()
            .find(|(_, _, p)| p.0 == [255, 0, 0])
            .map(|(x, y, _)| (x, y))
            .unwrap()
    }

    #[test]
    fn test_rotation_maps_match_pixels() {
        let img = marked(4, 3);
        for degrees in [90, 180, 270] {
            let (rotated, map) = rotate_ccw(&img, degrees).unwrap();
            let p = map.apply(Point::new(1.0, 0.0));
            assert_eq!(red_at(&rotated), (p.x.round() as u32, p.y.round() as u32));
        }
        assert!(rotate_ccw(&img, 45).is_none());
    }

    #[test]
    fn test_flip_maps_match_pixels() {
        let img = marked(4, 3);
        for vertical in [false, true] {
            let (flipped, map) = flip(&img, vertical);
            let p = map.apply(Point::new(1.0, 0.0));
            assert_eq!(red_at(&flipped), (p.x.round() as u32, p.y.round() as u32));
        }
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("0,255,0"), Some(Rgb([0, 255, 0])));
        assert_eq!(parse_color("10; 20; 300"), Some(Rgb([10, 20, 255])));
        assert_eq!(parse_color("1,2"), None);
        assert_eq!(parse_color("a,b,c"), None);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        let img = marked(5, 4);
        save_image(&img, &path, "png").unwrap();
        let loaded = load_image(&path).unwrap();
        assert_eq!(loaded.dimensions(), (5, 4));
        assert_eq!(red_at(&loaded), (1, 0));
        assert!(save_image(&img, &path, "tiff").is_err());
    }

    #[test]
    fn test_crop() {
        let img = marked(5, 4);
        let c = crop_image(&img, 1, 0, 2, 2);
        assert_eq!(c.dimensions(), (2, 2));
        assert_eq!(c.get_pixel(0, 0).0, [255, 0, 0]);
    }
}
