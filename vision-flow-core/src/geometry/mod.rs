//! Geometry primitives for moving between coordinate spaces.
//!
//! Every image in a pipeline carries a [`TransformState`]: the affine map from
//! the pixel space of the original input image into the image's own (cropped,
//! rotated, flipped) space. Detections are produced in that local space and
//! reprojected with the inverse map.
//!
//! * [`affine`] - 2×3 affine algebra (compose, invert, apply)
//! * [`state`] - the serialized per-image transform bookkeeping
//! * [`rect`] - axis-aligned and rotated rectangles with overlap measures
//! * [`projection`] - reprojection of boxes through an affine map
//! * [`hull`] - convex hull and minimum-area rectangles

pub mod affine;
pub mod hull;
pub mod projection;
pub mod rect;
pub mod state;

pub use affine::{AffineTransform, SINGULAR_EPSILON};
pub use hull::{canonical_long_side, convex_hull, min_area_rect, normalize_angle};
pub use projection::{project_rect, project_rotated};
pub use rect::{Rect, RotatedRect};
pub use state::TransformState;

use serde::{Deserialize, Serialize};

/// A 2D point with double precision coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
}

impl Point {
    /// Creates a new point.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}
