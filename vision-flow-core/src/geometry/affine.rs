//! 2×3 affine transforms.
//!
//! A transform is stored row-major as `[a, b, tx, c, d, ty]` and maps a point
//! `(x, y)` to `(a·x + b·y + tx, c·x + d·y + ty)`. Composition pads both
//! operands to homogeneous 3×3 matrices, multiplies them and truncates the
//! result back to 2×3.

use super::Point;
use crate::core::errors::{FlowError, FlowResult};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

/// Determinant magnitude below which a transform is treated as singular.
pub const SINGULAR_EPSILON: f64 = 1e-12;

/// A 2×3 affine transform, row-major `[a, b, tx, c, d, ty]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 6]", into = "[f64; 6]")]
pub struct AffineTransform {
    m: [f64; 6],
}

impl From<[f64; 6]> for AffineTransform {
    fn from(m: [f64; 6]) -> Self {
        Self { m }
    }
}

impl From<AffineTransform> for [f64; 6] {
    fn from(t: AffineTransform) -> Self {
        t.m
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineTransform {
    /// Creates a transform from its six coefficients.
    pub fn new(a: f64, b: f64, tx: f64, c: f64, d: f64, ty: f64) -> Self {
        Self {
            m: [a, b, tx, c, d, ty],
        }
    }

    /// The identity transform.
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    /// A pure translation by `(tx, ty)`.
    pub fn translation(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, tx, 0.0, 1.0, ty)
    }

    /// Builds a transform from a slice of at least six row-major coefficients.
    ///
    /// Returns `None` when the slice is too short.
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        let m: [f64; 6] = values.get(..6)?.try_into().ok()?;
        Some(Self { m })
    }

    /// The row-major coefficients.
    pub fn as_array(&self) -> [f64; 6] {
        self.m
    }

    /// The homogeneous 3×3 form `[a b tx; c d ty; 0 0 1]`.
    pub fn to_matrix3(&self) -> Matrix3<f64> {
        let [a, b, tx, c, d, ty] = self.m;
        Matrix3::new(a, b, tx, c, d, ty, 0.0, 0.0, 1.0)
    }

    /// Truncates a homogeneous 3×3 matrix to its affine 2×3 part.
    pub fn from_matrix3(m: &Matrix3<f64>) -> Self {
        Self::new(
            m[(0, 0)],
            m[(0, 1)],
            m[(0, 2)],
            m[(1, 0)],
            m[(1, 1)],
            m[(1, 2)],
        )
    }

    /// Composes a parent transform with a local one.
    ///
    /// The result maps a point through `parent` first and then through
    /// `local`, i.e. the homogeneous product `local · parent`. With `parent`
    /// mapping original space to the current image and `local` mapping the
    /// current image to a derived image, the result maps original space to the
    /// derived image.
    pub fn compose(parent: &AffineTransform, local: &AffineTransform) -> AffineTransform {
        Self::from_matrix3(&(local.to_matrix3() * parent.to_matrix3()))
    }

    /// Shorthand for `AffineTransform::compose(self, next)`.
    pub fn then(&self, next: &AffineTransform) -> AffineTransform {
        Self::compose(self, next)
    }

    /// Determinant of the linear part.
    pub fn determinant(&self) -> f64 {
        let [a, b, _, c, d, _] = self.m;
        a * d - b * c
    }

    /// Closed-form inverse.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::SingularTransform`] when `|det| < 1e-12`.
    pub fn invert(&self) -> FlowResult<AffineTransform> {
        let [a, b, tx, c, d, ty] = self.m;
        let det = self.determinant();
        if det.abs() < SINGULAR_EPSILON {
            return Err(FlowError::SingularTransform { determinant: det });
        }
        let inv_det = 1.0 / det;
        let ia = d * inv_det;
        let ib = -b * inv_det;
        let ic = -c * inv_det;
        let id = a * inv_det;
        Ok(Self::new(
            ia,
            ib,
            -(ia * tx + ib * ty),
            ic,
            id,
            -(ic * tx + id * ty),
        ))
    }

    /// Maps a point through the transform.
    pub fn apply(&self, p: Point) -> Point {
        let [a, b, tx, c, d, ty] = self.m;
        Point::new(a * p.x + b * p.y + tx, c * p.x + d * p.y + ty)
    }

    /// Maps a direction vector through the linear part only.
    pub fn apply_vector(&self, v: Point) -> Point {
        let [a, b, _, c, d, _] = self.m;
        Point::new(a * v.x + b * v.y, c * v.x + d * v.y)
    }

    /// Maps a point from the transform's target space back to its source space.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::SingularTransform`] when the transform has no inverse.
    pub fn apply_inverse(&self, p: Point) -> FlowResult<Point> {
        Ok(self.invert()?.apply(p))
    }

    /// Returns `true` if every coefficient is within `tol` of the identity.
    pub fn is_identity(&self, tol: f64) -> bool {
        self.approx_eq(&Self::identity(), tol)
    }

    /// Coefficient-wise comparison within `tol`.
    pub fn approx_eq(&self, other: &AffineTransform, tol: f64) -> bool {
        self.m
            .iter()
            .zip(other.m.iter())
            .all(|(x, y)| (x - y).abs() <= tol)
    }

    /// Rotation angle of the linear part's x axis, `atan2(c, a)`.
    pub fn rotation_angle(&self) -> f64 {
        self.m[3].atan2(self.m[0])
    }
}
