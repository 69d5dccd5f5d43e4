//! Reprojection of boxes through an affine map.
//!
//! Both functions take the map *into* the target space, usually the
//! current → original inverse from [`TransformState::to_original`].
//!
//! [`TransformState::to_original`]: super::TransformState::to_original

use super::affine::AffineTransform;
use super::rect::{Rect, RotatedRect};
use super::Point;

/// Maps the four corners of `rect` and returns their envelope.
///
/// Width and height of the result are at least 1 so a projected box never
/// degenerates into a line.
pub fn project_rect(map: &AffineTransform, rect: &Rect) -> Rect {
    let corners = rect.corners().map(|p| map.apply(p));
    let env = Rect::envelope(&corners).unwrap_or_default();
    Rect::new(env.x, env.y, env.width.max(1.0), env.height.max(1.0))
}

/// Maps a rotated box: the center is mapped as a point, the size is scaled by
/// how much the linear part stretches the box's own axes, and the angle
/// follows the mapped x axis.
pub fn project_rotated(map: &AffineTransform, rect: &RotatedRect) -> RotatedRect {
    let center = map.apply(rect.center());
    let (sin, cos) = rect.angle.sin_cos();
    let ux = map.apply_vector(Point::new(cos, sin));
    let uy = map.apply_vector(Point::new(-sin, cos));
    let sx = ux.x.hypot(ux.y);
    let sy = uy.x.hypot(uy.y);
    RotatedRect::new(
        center.x,
        center.y,
        rect.width * sx,
        rect.height * sy,
        ux.y.atan2(ux.x),
    )
}
