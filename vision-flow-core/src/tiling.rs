//! Tile generation and crop transforms.
//!
//! [`TileGenerator`] splits an image into overlapping, equally sized tiles and
//! stamps each one with a child [`TransformState`]. The crop helpers compute
//! the local transform for cutting a detected box (axis-aligned or rotated)
//! out of its image.

use crate::core::config::{ConfigError, ConfigValidator};
use crate::core::errors::{FlowError, FlowResult};
use crate::geometry::{AffineTransform, Rect, RotatedRect, TransformState};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Tile size and overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileConfig {
    /// Tile width in pixels.
    pub tile_width: i64,
    /// Tile height in pixels.
    pub tile_height: i64,
    /// Horizontal overlap between neighbouring tiles.
    pub overlap_x: i64,
    /// Vertical overlap between neighbouring tiles.
    pub overlap_y: i64,
    /// Lower bound applied to the tile size.
    pub min_size: i64,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            tile_width: 640,
            tile_height: 640,
            overlap_x: 0,
            overlap_y: 0,
            min_size: 1,
        }
    }
}

impl TileConfig {
    /// Creates a configuration with the given tile size and overlap.
    pub fn new(tile_width: i64, tile_height: i64, overlap_x: i64, overlap_y: i64) -> Self {
        Self {
            tile_width,
            tile_height,
            overlap_x,
            overlap_y,
            ..Self::default()
        }
    }

    /// Sets the minimum tile size.
    pub fn with_min_size(mut self, min_size: i64) -> Self {
        self.min_size = min_size;
        self
    }
}

impl ConfigValidator for TileConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.validate_positive("tile_width", self.tile_width as f64)?;
        self.validate_positive("tile_height", self.tile_height as f64)?;
        self.validate_non_negative("overlap_x", self.overlap_x as f64)?;
        self.validate_non_negative("overlap_y", self.overlap_y as f64)?;
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// One tile of an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileDescriptor {
    /// Index of the original input image.
    pub origin_index: usize,
    pub row: u32,
    pub col: u32,
    /// Left edge in the parent image.
    pub x: u32,
    /// Top edge in the parent image.
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Number of tile columns in the grid.
    pub grid_cols: u32,
    /// Number of tile rows in the grid.
    pub grid_rows: u32,
    /// Transform of the tile image.
    pub transform: TransformState,
}

impl TileDescriptor {
    /// `(row, col)` grid position, used as the slice index of detections.
    pub fn slice_index(&self) -> (u32, u32) {
        (self.row, self.col)
    }

    /// Tile rectangle in parent-image coordinates.
    pub fn rect(&self) -> Rect {
        Rect::new(
            self.x as f64,
            self.y as f64,
            self.width as f64,
            self.height as f64,
        )
    }
}

/// Splits images into a grid of overlapping tiles.
#[derive(Debug, Clone)]
pub struct TileGenerator {
    tile_width: i64,
    tile_height: i64,
    overlap_x: i64,
    overlap_y: i64,
    min_size: i64,
}

impl TileGenerator {
    /// Creates a generator.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::InvalidTileConfig`] when either tile dimension is
    /// not positive.
    pub fn new(config: TileConfig) -> FlowResult<Self> {
        if config.tile_width <= 0 || config.tile_height <= 0 {
            return Err(FlowError::InvalidTileConfig {
                width: config.tile_width,
                height: config.tile_height,
            });
        }
        let min_size = config.min_size.max(1);
        Ok(Self {
            tile_width: config.tile_width.max(min_size),
            tile_height: config.tile_height.max(min_size),
            overlap_x: config.overlap_x.max(0),
            overlap_y: config.overlap_y.max(0),
            min_size,
        })
    }

    /// Number of tiles along one axis.
    fn count(extent: i64, tile: i64, overlap: i64) -> i64 {
        if tile >= extent {
            return 1;
        }
        let step = (tile - overlap).max(1);
        (extent + step - 1) / step
    }

    /// Tile origin along one axis, shifted back inside the image.
    fn origin(index: i64, extent: i64, tile: i64, overlap: i64) -> i64 {
        let mut start = index * (tile - overlap);
        if start + tile > extent {
            start = extent - tile;
        }
        start.max(0)
    }

    /// Generates the tiles for an image of `width × height`.
    ///
    /// Tiles are emitted row-major. Every tile has the configured size unless
    /// the image is smaller than one tile along that axis.
    pub fn generate(
        &self,
        width: u32,
        height: u32,
        parent: &TransformState,
        origin_index: usize,
    ) -> Vec<TileDescriptor> {
        let (w, h) = (width as i64, height as i64);
        if w == 0 || h == 0 {
            return Vec::new();
        }
        let small_w = self.tile_width.min(w);
        let small_h = self.tile_height.min(h);
        if small_w < self.min_size || small_h < self.min_size {
            debug!("image {}x{} is below the minimum tile size", width, height);
            return Vec::new();
        }
        let rows = Self::count(h, small_h, self.overlap_y);
        let cols = Self::count(w, small_w, self.overlap_x);

        let parent = if parent.has_original_size() {
            parent.clone()
        } else {
            TransformState::new(width, height)
        };

        let mut tiles = Vec::with_capacity((rows * cols) as usize);
        for r in 0..rows {
            for c in 0..cols {
                let x = Self::origin(c, w, small_w, self.overlap_x);
                let y = Self::origin(r, h, small_h, self.overlap_y);
                let local = AffineTransform::translation(-(x as f64), -(y as f64));
                tiles.push(TileDescriptor {
                    origin_index,
                    row: r as u32,
                    col: c as u32,
                    x: x as u32,
                    y: y as u32,
                    width: small_w as u32,
                    height: small_h as u32,
                    grid_cols: cols as u32,
                    grid_rows: rows as u32,
                    transform: parent.derive_child(&local, small_w as u32, small_h as u32),
                });
            }
        }
        debug!(
            "tiled {}x{} image into {} tiles ({} rows x {} cols)",
            width,
            height,
            tiles.len(),
            rows,
            cols
        );
        tiles
    }
}

/// An integer crop window with its local transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Parent → crop map.
    pub local: AffineTransform,
}

/// Computes the axis-aligned crop of `rect` grown by `expand` on every side.
///
/// The top-left corner is floored and the bottom-right corner rounded, both
/// clamped to the image. The crop is at least `min_size` wide and high where
/// the image allows it. Returns `None` for an empty image.
pub fn axis_crop(
    rect: &Rect,
    expand: f64,
    min_size: u32,
    image_width: u32,
    image_height: u32,
) -> Option<CropWindow> {
    if image_width == 0 || image_height == 0 {
        return None;
    }
    let (w, h) = (image_width as i64, image_height as i64);
    let min_size = min_size.max(1) as i64;

    let x1 = (rect.x - expand).clamp(0.0, w as f64).floor() as i64;
    let y1 = (rect.y - expand).clamp(0.0, h as f64).floor() as i64;
    let x2 = ((rect.x2() + expand).round() as i64).clamp(0, w);
    let y2 = ((rect.y2() + expand).round() as i64).clamp(0, h);
    let x2 = x2.max(x1 + min_size);
    let y2 = y2.max(y1 + min_size);

    let x1 = x1.clamp(0, w);
    let y1 = y1.clamp(0, h);
    let x2 = x2.min(w).max(x1 + 1);
    let y2 = y2.min(h).max(y1 + 1);
    // A box touching the right or bottom edge may leave x1 == w.
    let x1 = x1.min(w - 1);
    let y1 = y1.min(h - 1);
    let x2 = x2.min(w);
    let y2 = y2.min(h);

    Some(CropWindow {
        x: x1 as u32,
        y: y1 as u32,
        width: (x2 - x1) as u32,
        height: (y2 - y1) as u32,
        local: AffineTransform::translation(-(x1 as f64), -(y1 as f64)),
    })
}

/// Computes the rotate-then-translate transform that cuts a rotated box out
/// of its image, returning the transform and the output size.
///
/// The box's x axis is mapped onto the output's x axis and its center onto
/// the output center. `crop_shape` overrides the output size when both of its
/// dimensions are positive.
pub fn rotated_crop_transform(
    rect: &RotatedRect,
    expand: f64,
    min_size: u32,
    crop_shape: Option<(u32, u32)>,
) -> (AffineTransform, u32, u32) {
    let min_size = min_size.max(1) as f64;
    let (w2, h2) = match crop_shape {
        Some((cw, ch)) if cw > 0 && ch > 0 => (cw as f64, ch as f64),
        _ => (
            (rect.width.abs() + 2.0 * expand).max(min_size),
            (rect.height.abs() + 2.0 * expand).max(min_size),
        ),
    };
    let out_w = (w2 as u32).max(min_size as u32);
    let out_h = (h2 as u32).max(min_size as u32);

    let (sin, cos) = rect.angle.sin_cos();
    let (cx, cy) = (rect.cx, rect.cy);
    let transform = AffineTransform::new(
        cos,
        sin,
        w2 / 2.0 - cos * cx - sin * cy,
        -sin,
        cos,
        h2 / 2.0 + sin * cx - cos * cy,
    );
    (transform, out_w, out_h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;

    fn covers(tiles: &[TileDescriptor], width: u32, height: u32) -> bool {
        let mut hit = vec![false; (width * height) as usize];
        for t in tiles {
            for y in t.y..t.y + t.height {
                for x in t.x..t.x + t.width {
                    hit[(y * width + x) as usize] = true;
                }
            }
        }
        hit.into_iter().all(|h| h)
    }

    #[test]
    fn test_invalid_tile_config() {
        let err = TileGenerator::new(TileConfig::new(0, 10, 0, 0)).unwrap_err();
        assert!(matches!(
            err,
            FlowError::InvalidTileConfig {
                width: 0,
                height: 10
            }
        ));
        assert!(TileConfig::new(-5, 10, 0, 0).validate().is_err());
    }

    #[test]
    fn test_exact_size_and_coverage() {
        let generator = TileGenerator::new(TileConfig::new(64, 48, 8, 4)).unwrap();
        for (w, h) in [(200, 100), (64, 48), (65, 49), (333, 47), (17, 300)] {
            let tiles = generator.generate(w, h, &TransformState::new(w, h), 0);
            assert!(covers(&tiles, w, h), "{w}x{h} not covered");
            for t in &tiles {
                assert_eq!(t.width, 64.min(w));
                assert_eq!(t.height, 48.min(h));
                assert!(t.x + t.width <= w);
                assert!(t.y + t.height <= h);
            }
        }
    }

    #[test]
    fn test_grid_counts() {
        let generator = TileGenerator::new(TileConfig::new(640, 640, 0, 0)).unwrap();
        let tiles = generator.generate(1000, 600, &TransformState::new(1000, 600), 3);
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].grid_cols, 2);
        assert_eq!(tiles[0].grid_rows, 1);
        assert_eq!(tiles[1].x, 360);
        assert_eq!(tiles[1].height, 600);
        assert_eq!(tiles[1].origin_index, 3);
        assert_eq!(tiles[1].slice_index(), (0, 1));
    }

    #[test]
    fn test_tile_transform_maps_back() {
        let generator = TileGenerator::new(TileConfig::new(50, 50, 10, 10)).unwrap();
        let tiles = generator.generate(120, 90, &TransformState::new(120, 90), 0);
        for t in &tiles {
            let p = t.transform.point_to_original(Point::new(0.0, 0.0)).unwrap();
            assert_eq!(p, Point::new(t.x as f64, t.y as f64));
        }
    }

    #[test]
    fn test_axis_crop_expand_and_clamp() {
        let crop = axis_crop(&Rect::new(10.4, 5.0, 20.0, 10.0), 2.0, 1, 100, 100).unwrap();
        assert_eq!((crop.x, crop.y), (8, 3));
        assert_eq!((crop.width, crop.height), (24, 14));

        let edge = axis_crop(&Rect::new(95.0, 95.0, 20.0, 20.0), 0.0, 1, 100, 100).unwrap();
        assert_eq!((edge.x, edge.y, edge.width, edge.height), (95, 95, 5, 5));

        let tiny = axis_crop(&Rect::new(10.0, 10.0, 0.0, 0.0), 0.0, 4, 100, 100).unwrap();
        assert_eq!((tiny.width, tiny.height), (4, 4));
    }

    #[test]
    fn test_rotated_crop_centers_box() {
        let rect = RotatedRect::new(50.0, 40.0, 20.0, 10.0, 0.5);
        let (t, w, h) = rotated_crop_transform(&rect, 0.0, 1, None);
        assert_eq!((w, h), (20, 10));
        let c = t.apply(rect.center());
        assert!((c.x - 10.0).abs() < 1e-9 && (c.y - 5.0).abs() < 1e-9);
        // The box's x axis lands on the crop's x axis.
        let axis = t.apply_vector(Point::new(0.5f64.cos(), 0.5f64.sin()));
        assert!((axis.x - 1.0).abs() < 1e-9 && axis.y.abs() < 1e-9);

        let (_, w, h) = rotated_crop_transform(&rect, 0.0, 1, Some((32, 16)));
        assert_eq!((w, h), (32, 16));
    }
}
