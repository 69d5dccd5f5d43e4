//! Convex hull and minimum-area enclosing rectangle.

use super::rect::{Rect, RotatedRect};
use super::Point;
use std::cmp::Ordering;
use std::f64::consts::{FRAC_PI_2, PI};

/// Cross product of `p1→p2` and `p1→p3`. Positive for a counter-clockwise turn.
fn cross(p1: &Point, p2: &Point, p3: &Point) -> f64 {
    (p2.x - p1.x) * (p3.y - p1.y) - (p2.y - p1.y) * (p3.x - p1.x)
}

/// Graham scan. Inputs with fewer than three points are returned unchanged.
pub fn convex_hull(points: &[Point]) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let mut points = points.to_vec();

    let mut start = 0;
    for i in 1..points.len() {
        if points[i].y < points[start].y
            || (points[i].y == points[start].y && points[i].x < points[start].x)
        {
            start = i;
        }
    }
    points.swap(0, start);
    let origin = points[0];

    points[1..].sort_by(|a, b| {
        let c = cross(&origin, a, b);
        if c == 0.0 {
            let da = (a.x - origin.x).powi(2) + (a.y - origin.y).powi(2);
            let db = (b.x - origin.x).powi(2) + (b.y - origin.y).powi(2);
            da.partial_cmp(&db).unwrap_or(Ordering::Equal)
        } else if c > 0.0 {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    });

    let mut hull: Vec<Point> = Vec::with_capacity(points.len());
    for p in points {
        while hull.len() > 1 && cross(&hull[hull.len() - 2], &hull[hull.len() - 1], &p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    hull
}

/// Smallest-area rectangle enclosing `points`, by rotating calipers over the
/// convex hull. The angle is in radians. Returns `None` for an empty input.
pub fn min_area_rect(points: &[Point]) -> Option<RotatedRect> {
    let hull = convex_hull(points);
    if hull.len() < 3 {
        let env = Rect::envelope(points)?;
        let c = env.center();
        return Some(RotatedRect::new(c.x, c.y, env.width, env.height, 0.0));
    }

    let n = hull.len();
    let mut best: Option<(f64, RotatedRect)> = None;
    for i in 0..n {
        let j = (i + 1) % n;
        let (ex, ey) = (hull[j].x - hull[i].x, hull[j].y - hull[i].y);
        let len = ex.hypot(ey);
        if len < f64::EPSILON {
            continue;
        }
        let (nx, ny) = (ex / len, ey / len);
        let (px, py) = (-ny, nx);

        let (mut min_n, mut max_n) = (f64::MAX, f64::MIN);
        let (mut min_p, mut max_p) = (f64::MAX, f64::MIN);
        for q in &hull {
            let (dx, dy) = (q.x - hull[i].x, q.y - hull[i].y);
            let along = nx * dx + ny * dy;
            let across = px * dx + py * dy;
            min_n = min_n.min(along);
            max_n = max_n.max(along);
            min_p = min_p.min(across);
            max_p = max_p.max(across);
        }

        let (width, height) = (max_n - min_n, max_p - min_p);
        let area = width * height;
        if best.as_ref().is_none_or(|(a, _)| area < *a) {
            let (cn, cp) = ((min_n + max_n) / 2.0, (min_p + max_p) / 2.0);
            let cx = hull[i].x + cn * nx + cp * px;
            let cy = hull[i].y + cn * ny + cp * py;
            best = Some((area, RotatedRect::new(cx, cy, width, height, ny.atan2(nx))));
        }
    }
    best.map(|(_, r)| r)
}

/// Makes the width the long side and folds the angle into `[-π/2, π/2)`.
pub fn canonical_long_side(rect: RotatedRect) -> RotatedRect {
    let (mut w, mut h, mut angle) = (rect.width, rect.height, rect.angle);
    if w < h {
        std::mem::swap(&mut w, &mut h);
        angle += FRAC_PI_2;
    }
    let mut folded = (angle + FRAC_PI_2) % PI;
    if folded < 0.0 {
        folded += PI;
    }
    RotatedRect::new(rect.cx, rect.cy, w, h, folded - FRAC_PI_2)
}

/// Folds an angle into `[-π, π)`.
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = (angle + PI) % (2.0 * PI);
    if a < 0.0 {
        a += 2.0 * PI;
    }
    a - PI
}
