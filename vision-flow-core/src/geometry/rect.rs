//! Axis-aligned and rotated rectangles.

use super::Point;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle `[x, y, width, height]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Builds a rectangle from corner coordinates, normalizing their order.
    pub fn from_xyxy(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self::new(x1.min(x2), y1.min(y2), (x2 - x1).abs(), (y2 - y1).abs())
    }

    pub fn x2(&self) -> f64 {
        self.x + self.width
    }

    pub fn y2(&self) -> f64 {
        self.y + self.height
    }

    pub fn to_xyxy(&self) -> [f64; 4] {
        [self.x, self.y, self.x2(), self.y2()]
    }

    /// Area, zero for degenerate rectangles.
    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Corners in clockwise order starting at the top-left.
    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.x, self.y),
            Point::new(self.x2(), self.y),
            Point::new(self.x2(), self.y2()),
            Point::new(self.x, self.y2()),
        ]
    }

    /// Smallest rectangle containing all points. `None` for an empty input.
    pub fn envelope(points: &[Point]) -> Option<Rect> {
        let (min_x, max_x) = points.iter().map(|p| p.x).minmax().into_option()?;
        let (min_y, max_y) = points.iter().map(|p| p.y).minmax().into_option()?;
        Some(Rect::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }

    /// Area of the intersection with another rectangle.
    pub fn intersection_area(&self, other: &Rect) -> f64 {
        let w = self.x2().min(other.x2()) - self.x.max(other.x);
        let h = self.y2().min(other.y2()) - self.y.max(other.y);
        if w <= 0.0 || h <= 0.0 { 0.0 } else { w * h }
    }

    /// Intersection over the smaller of the two areas.
    ///
    /// Returns 0 when the smaller area is not positive.
    pub fn ios(&self, other: &Rect) -> f64 {
        let smaller = self.area().min(other.area());
        if smaller <= 0.0 {
            return 0.0;
        }
        self.intersection_area(other) / smaller
    }

    /// Intersection over union. Returns 0 when the union is not positive.
    pub fn iou(&self, other: &Rect) -> f64 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }

    /// Returns `true` if the rectangles share a positive-area region.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.intersection_area(other) > 0.0
    }
}

/// A rotated rectangle: center, size and angle in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RotatedRect {
    pub cx: f64,
    pub cy: f64,
    pub width: f64,
    pub height: f64,
    /// Rotation in radians.
    pub angle: f64,
}

impl RotatedRect {
    pub fn new(cx: f64, cy: f64, width: f64, height: f64, angle: f64) -> Self {
        Self {
            cx,
            cy,
            width,
            height,
            angle,
        }
    }

    pub fn center(&self) -> Point {
        Point::new(self.cx, self.cy)
    }

    pub fn area(&self) -> f64 {
        self.width.abs() * self.height.abs()
    }

    /// The four corners of the rotated box.
    pub fn corners(&self) -> [Point; 4] {
        let hw = self.width.abs() / 2.0;
        let hh = self.height.abs() / 2.0;
        let (sin, cos) = self.angle.sin_cos();
        [(-hw, -hh), (hw, -hh), (hw, hh), (-hw, hh)].map(|(dx, dy)| {
            Point::new(
                self.cx + cos * dx - sin * dy,
                self.cy + sin * dx + cos * dy,
            )
        })
    }

    /// Axis-aligned box of the same size centered on the same point,
    /// ignoring the angle.
    pub fn unrotated_envelope(&self) -> Rect {
        let w = self.width.abs();
        let h = self.height.abs();
        Rect::new(self.cx - w / 2.0, self.cy - h / 2.0, w, h)
    }

    /// Axis-aligned envelope of the rotated corners.
    pub fn envelope(&self) -> Rect {
        Rect::envelope(&self.corners()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_ios_is_one() {
        let outer = Rect::from_xyxy(0.0, 0.0, 10.0, 10.0);
        let inner = Rect::from_xyxy(2.0, 2.0, 8.0, 8.0);
        assert_eq!(outer.intersection_area(&inner), 36.0);
        assert_eq!(outer.ios(&inner), 1.0);
        assert!((outer.iou(&inner) - 0.36).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_ios_is_zero() {
        let a = Rect::new(0.0, 0.0, 0.0, 10.0);
        let b = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(a.ios(&b), 0.0);
    }

    #[test]
    fn test_disjoint() {
        let a = Rect::new(0.0, 0.0, 5.0, 5.0);
        let b = Rect::new(5.0, 0.0, 5.0, 5.0);
        assert_eq!(a.intersection_area(&b), 0.0);
        assert!(!a.intersects(&b));
    }

    #[test]
    fn test_rotated_corners_and_envelope() {
        let r = RotatedRect::new(10.0, 10.0, 4.0, 2.0, std::f64::consts::FRAC_PI_2);
        let env = r.envelope();
        assert!((env.width - 2.0).abs() < 1e-9);
        assert!((env.height - 4.0).abs() < 1e-9);
        assert_eq!(r.unrotated_envelope(), Rect::new(8.0, 9.0, 4.0, 2.0));
    }

    #[test]
    fn test_envelope_of_nothing() {
        assert!(Rect::envelope(&[]).is_none());
    }
}
