//! Detection records and per-round result storage.
//!
//! A [`Detection`] is what the inference collaborator returns for one object:
//! category, score, a box (axis-aligned or rotated) and an optional mask. The
//! serialized form follows the inference boundary: axis boxes are `xyxy`,
//! rotated boxes are `[cx, cy, w, h, angle]` with the angle in radians, and an
//! `angle` of `-100` means "no angle".
//!
//! Detections produced across tiles and rounds are stored in a
//! [`ResultSet`], an arena addressed by [`DetectionId`] handles.

pub mod arena;

pub use arena::{DetectionArena, DetectionId, ResultSet, Slot, SlotId};

use crate::core::errors::FlowResult;
use crate::geometry::{project_rect, project_rotated, AffineTransform, Point, Rect, RotatedRect, TransformState};
use serde::{Deserialize, Serialize};

/// Sentinel used on the wire for "no angle".
pub const NO_ANGLE: f64 = -100.0;

/// Bounding geometry of a detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoxShape {
    Axis(Rect),
    Rotated(RotatedRect),
}

impl BoxShape {
    /// Parses a boundary bbox: four values are `xyxy`, five are
    /// `[cx, cy, w, h, angle]`. Anything else is `None`.
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        match *values {
            [x1, y1, x2, y2] => Some(BoxShape::Axis(Rect::from_xyxy(x1, y1, x2, y2))),
            [cx, cy, w, h, angle] => Some(BoxShape::Rotated(RotatedRect::new(cx, cy, w, h, angle))),
            _ => None,
        }
    }

    /// Boundary form of the box.
    pub fn to_vec(&self) -> Vec<f64> {
        match self {
            BoxShape::Axis(r) => r.to_xyxy().to_vec(),
            BoxShape::Rotated(r) => vec![r.cx, r.cy, r.width, r.height, r.angle],
        }
    }

    pub fn is_rotated(&self) -> bool {
        matches!(self, BoxShape::Rotated(_))
    }

    pub fn angle(&self) -> Option<f64> {
        match self {
            BoxShape::Axis(_) => None,
            BoxShape::Rotated(r) => Some(r.angle),
        }
    }

    /// Axis-aligned rectangle used for overlap tests. Rotated boxes use their
    /// unrotated envelope.
    pub fn aabb(&self) -> Rect {
        match self {
            BoxShape::Axis(r) => *r,
            BoxShape::Rotated(r) => r.unrotated_envelope(),
        }
    }

    pub fn width(&self) -> f64 {
        match self {
            BoxShape::Axis(r) => r.width,
            BoxShape::Rotated(r) => r.width.abs(),
        }
    }

    pub fn height(&self) -> f64 {
        match self {
            BoxShape::Axis(r) => r.height,
            BoxShape::Rotated(r) => r.height.abs(),
        }
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> Point {
        match self {
            BoxShape::Axis(r) => r.center(),
            BoxShape::Rotated(r) => r.center(),
        }
    }

    /// Maps the box through `map`.
    pub fn project(&self, map: &AffineTransform) -> BoxShape {
        match self {
            BoxShape::Axis(r) => BoxShape::Axis(project_rect(map, r)),
            BoxShape::Rotated(r) => BoxShape::Rotated(project_rotated(map, r)),
        }
    }
}

/// Binary mask in row-major run-length form.
///
/// Runs alternate between 0 and 1 and the first run is always a 0 run, so a
/// mask starting with a set pixel begins with a zero-length run. The raster
/// is anchored at the top-left corner of the detection's box.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MaskRle {
    pub width: u32,
    pub height: u32,
    pub runs: Vec<u32>,
}

impl MaskRle {
    /// Encodes a row-major bit buffer of `width × height` pixels.
    pub fn from_bits(width: u32, height: u32, bits: &[bool]) -> Self {
        let total = (width as usize) * (height as usize);
        let mut runs = Vec::new();
        let mut current = false;
        let mut count = 0u32;
        for &bit in bits.iter().take(total) {
            if bit == current {
                count += 1;
            } else {
                runs.push(count);
                current = bit;
                count = 1;
            }
        }
        runs.push(count);
        Self {
            width,
            height,
            runs,
        }
    }

    /// Decodes into a row-major bit buffer. Runs past the end are truncated.
    pub fn to_bits(&self) -> Vec<bool> {
        let total = (self.width as usize) * (self.height as usize);
        let mut bits = vec![false; total];
        let mut idx = 0usize;
        let mut value = false;
        for &count in &self.runs {
            if idx >= total {
                break;
            }
            let n = (count as usize).min(total - idx);
            if value {
                bits[idx..idx + n].fill(true);
            }
            idx += n;
            value = !value;
        }
        bits
    }

    /// Number of set pixels.
    pub fn area(&self) -> f64 {
        self.runs.iter().skip(1).step_by(2).map(|&r| r as f64).sum()
    }

    /// Coordinates of every set pixel, relative to the mask origin.
    pub fn points(&self) -> Vec<Point> {
        let w = self.width.max(1) as usize;
        self.to_bits()
            .iter()
            .enumerate()
            .filter(|(_, b)| **b)
            .map(|(i, _)| Point::new((i % w) as f64, (i / w) as f64))
            .collect()
    }
}

/// Mask of a detection.
#[derive(Debug, Clone, PartialEq)]
pub enum Mask {
    /// Outline in image coordinates.
    Polygon(Vec<Point>),
    /// Raster anchored at the box origin.
    Raster(MaskRle),
}

impl Mask {
    /// Pixel area of the mask. Polygons use the shoelace formula.
    pub fn area(&self) -> f64 {
        match self {
            Mask::Raster(rle) => rle.area(),
            Mask::Polygon(points) => {
                let n = points.len();
                if n < 3 {
                    return 0.0;
                }
                let twice: f64 = (0..n)
                    .map(|i| {
                        let (a, b) = (points[i], points[(i + 1) % n]);
                        a.x * b.y - b.x * a.y
                    })
                    .sum();
                twice.abs() / 2.0
            }
        }
    }
}

/// Bookkeeping attached to a detection while it moves through a pipeline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionMeta {
    /// `(row, col)` of the tile the detection was found in.
    pub slice_index: Option<(u32, u32)>,
    /// Box in original-image coordinates, filled in by reprojection.
    pub global_bbox: Option<BoxShape>,
    /// Set by the merger when the detection duplicates a better one.
    pub suppressed: bool,
}

/// A single detected object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "DetectionRecord", into = "DetectionRecord")]
pub struct Detection {
    pub category_id: i64,
    pub category_name: String,
    pub score: f64,
    pub area: f64,
    pub bbox: Option<BoxShape>,
    pub mask: Option<Mask>,
    pub meta: DetectionMeta,
}

impl Detection {
    /// Creates a detection with an axis-aligned box.
    pub fn axis(category_id: i64, category_name: impl Into<String>, score: f64, rect: Rect) -> Self {
        Self {
            category_id,
            category_name: category_name.into(),
            score,
            area: rect.area(),
            bbox: Some(BoxShape::Axis(rect)),
            ..Self::default()
        }
    }

    /// Creates a detection with a rotated box.
    pub fn rotated(
        category_id: i64,
        category_name: impl Into<String>,
        score: f64,
        rect: RotatedRect,
    ) -> Self {
        Self {
            category_id,
            category_name: category_name.into(),
            score,
            area: rect.area(),
            bbox: Some(BoxShape::Rotated(rect)),
            ..Self::default()
        }
    }

    /// Creates a label-only detection, as classifiers return.
    pub fn label(category_id: i64, category_name: impl Into<String>, score: f64) -> Self {
        Self {
            category_id,
            category_name: category_name.into(),
            score,
            ..Self::default()
        }
    }

    pub fn with_mask(mut self, mask: Mask) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn with_slice_index(mut self, row: u32, col: u32) -> Self {
        self.meta.slice_index = Some((row, col));
        self
    }

    pub fn is_rotated(&self) -> bool {
        self.bbox.as_ref().is_some_and(BoxShape::is_rotated)
    }

    pub fn is_suppressed(&self) -> bool {
        self.meta.suppressed
    }

    pub fn angle(&self) -> Option<f64> {
        self.bbox.as_ref().and_then(BoxShape::angle)
    }

    /// Returns `true` if the box is missing or has no extent.
    pub fn has_degenerate_box(&self) -> bool {
        self.bbox
            .as_ref()
            .is_none_or(|b| b.width() <= 0.0 || b.height() <= 0.0)
    }

    /// Box in original coordinates: the recorded global box if any, else the
    /// local box.
    pub fn original_bbox(&self) -> Option<BoxShape> {
        self.meta.global_bbox.or(self.bbox)
    }

    /// Maps this detection into another coordinate space.
    ///
    /// Polygon masks are mapped point by point. Raster masks survive only a
    /// pure translation, since they are anchored at the box origin.
    pub fn mapped(&self, map: &AffineTransform) -> Detection {
        let mut out = self.clone();
        out.bbox = self.bbox.map(|b| b.project(map));
        out.meta.global_bbox = None;
        out.mask = match &self.mask {
            Some(Mask::Polygon(points)) => {
                Some(Mask::Polygon(points.iter().map(|p| map.apply(*p)).collect()))
            }
            Some(Mask::Raster(rle)) => {
                let [a, b, _, c, d, _] = map.as_array();
                let pure_translation = a == 1.0 && b == 0.0 && c == 0.0 && d == 1.0;
                pure_translation.then(|| Mask::Raster(rle.clone()))
            }
            None => None,
        };
        out
    }

    /// Maps this detection from the image described by `state` back to
    /// original-image coordinates.
    ///
    /// # Errors
    ///
    /// Fails with `SingularTransform` if the state's map cannot be inverted.
    pub fn to_original(&self, state: &TransformState) -> FlowResult<Detection> {
        if state.is_original() {
            let mut out = self.clone();
            out.meta.global_bbox = None;
            return Ok(out);
        }
        Ok(self.mapped(&state.to_original()?))
    }

    /// Records the original-space box in the metadata without touching the
    /// local box.
    pub fn stamp_global(&mut self, state: &TransformState) -> FlowResult<()> {
        self.meta.global_bbox = match (&self.bbox, state.is_original()) {
            (None, _) => None,
            (Some(b), true) => Some(*b),
            (Some(b), false) => Some(b.project(&state.to_original()?)),
        };
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MetadataRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    slice_index: Option<[u32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    global_bbox: Option<Vec<f64>>,
    #[serde(default)]
    combine_flag: bool,
    #[serde(default)]
    is_rotated: bool,
}

fn no_angle() -> f64 {
    NO_ANGLE
}

/// Wire form of [`Detection`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DetectionRecord {
    #[serde(default)]
    category_id: i64,
    #[serde(default)]
    category_name: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    area: f64,
    #[serde(default)]
    bbox: Vec<f64>,
    #[serde(default)]
    with_bbox: bool,
    #[serde(default)]
    with_mask: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mask: Option<Vec<[f64; 2]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mask_rle: Option<MaskRle>,
    #[serde(default)]
    with_angle: bool,
    #[serde(default = "no_angle")]
    angle: f64,
    #[serde(default)]
    metadata: MetadataRecord,
}

impl TryFrom<DetectionRecord> for Detection {
    type Error = String;

    fn try_from(r: DetectionRecord) -> Result<Self, Self::Error> {
        let has_angle = r.with_angle && r.angle > -99.0;
        // A four-value box with a real angle is rotated.
        let bbox = match r.bbox[..] {
            [cx, cy, w, h] if has_angle => {
                Some(BoxShape::Rotated(RotatedRect::new(cx, cy, w, h, r.angle)))
            }
            _ => BoxShape::from_slice(&r.bbox),
        };
        let mask = match (r.mask_rle, r.mask) {
            (Some(rle), _) => Some(Mask::Raster(rle)),
            (None, Some(points)) if !points.is_empty() => Some(Mask::Polygon(
                points.into_iter().map(|[x, y]| Point::new(x, y)).collect(),
            )),
            _ => None,
        };
        let global_bbox = match r.metadata.global_bbox {
            Some(values) => Some(
                BoxShape::from_slice(&values)
                    .ok_or_else(|| format!("global_bbox has {} values", values.len()))?,
            ),
            None => None,
        };
        Ok(Detection {
            category_id: r.category_id,
            category_name: r.category_name,
            score: r.score,
            area: r.area,
            bbox,
            mask,
            meta: DetectionMeta {
                slice_index: r.metadata.slice_index.map(|[row, col]| (row, col)),
                global_bbox,
                suppressed: r.metadata.combine_flag,
            },
        })
    }
}

impl From<Detection> for DetectionRecord {
    fn from(d: Detection) -> Self {
        let angle = d.angle();
        let (mask, mask_rle) = match d.mask {
            Some(Mask::Polygon(points)) => (Some(points.iter().map(|p| [p.x, p.y]).collect()), None),
            Some(Mask::Raster(rle)) => (None, Some(rle)),
            None => (None, None),
        };
        DetectionRecord {
            category_id: d.category_id,
            category_name: d.category_name,
            score: d.score,
            area: d.area,
            bbox: d.bbox.map(|b| b.to_vec()).unwrap_or_default(),
            with_bbox: d.bbox.is_some(),
            with_mask: mask.is_some() || mask_rle.is_some(),
            mask,
            mask_rle,
            with_angle: angle.is_some(),
            angle: angle.unwrap_or(NO_ANGLE),
            metadata: MetadataRecord {
                slice_index: d.meta.slice_index.map(|(r, c)| [r, c]),
                global_bbox: d.meta.global_bbox.map(|b| b.to_vec()),
                combine_flag: d.meta.suppressed,
                is_rotated: d.bbox.is_some_and(|b| b.is_rotated()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_form_axis() {
        let det = Detection::axis(2, "scratch", 0.8, Rect::new(1.0, 2.0, 10.0, 20.0));
        let value = serde_json::to_value(&det).unwrap();
        assert_eq!(value["bbox"], json!([1.0, 2.0, 11.0, 22.0]));
        assert_eq!(value["with_angle"], false);
        assert_eq!(value["angle"], -100.0);
        assert_eq!(value["metadata"]["is_rotated"], false);
    }

    #[test]
    fn test_wire_form_rotated_from_angle_field() {
        let det: Detection = serde_json::from_value(json!({
            "category_id": 1,
            "category_name": "pin",
            "score": 0.5,
            "bbox": [10.0, 10.0, 4.0, 2.0],
            "with_angle": true,
            "angle": 0.25
        }))
        .unwrap();
        assert!(det.is_rotated());
        assert_eq!(det.angle(), Some(0.25));

        let plain: Detection = serde_json::from_value(json!({
            "bbox": [0, 0, 4, 2],
            "with_angle": false,
            "angle": 0.25
        }))
        .unwrap();
        assert!(!plain.is_rotated());
    }

    #[test]
    fn test_bad_global_bbox_rejected() {
        let res: Result<Detection, _> = serde_json::from_value(json!({
            "bbox": [0, 0, 4, 2],
            "metadata": {"global_bbox": [1, 2, 3]}
        }));
        assert!(res.is_err());
    }

    #[test]
    fn test_mask_rle_round_trip_and_area() {
        let bits = [true, true, false, false, true, false];
        let rle = MaskRle::from_bits(3, 2, &bits);
        assert_eq!(rle.runs, vec![0, 2, 2, 1, 1]);
        assert_eq!(rle.area(), 3.0);
        assert_eq!(rle.to_bits(), bits.to_vec());
        assert_eq!(rle.points()[2], Point::new(1.0, 1.0));
    }

    #[test]
    fn test_polygon_area() {
        let square = Mask::Polygon(vec![
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(4.0, 4.0),
            Point::new(0.0, 4.0),
        ]);
        assert_eq!(square.area(), 16.0);
    }

    #[test]
    fn test_to_original_through_tile() {
        let state = TransformState::new(100, 100)
            .derive_child(&AffineTransform::translation(-40.0, -30.0), 50, 50);
        let det = Detection::axis(0, "a", 0.9, Rect::new(5.0, 5.0, 10.0, 10.0))
            .with_mask(Mask::Raster(MaskRle::from_bits(1, 1, &[true])));
        let back = det.to_original(&state).unwrap();
        assert_eq!(back.bbox, Some(BoxShape::Axis(Rect::new(45.0, 35.0, 10.0, 10.0))));
        assert!(back.mask.is_some());

        let mut stamped = det.clone();
        stamped.stamp_global(&state).unwrap();
        assert_eq!(stamped.original_bbox(), back.bbox);
        assert_eq!(stamped.bbox, det.bbox);
    }

    #[test]
    fn test_degenerate_box() {
        assert!(Detection::label(0, "ok", 1.0).has_degenerate_box());
        assert!(Detection::axis(0, "a", 1.0, Rect::new(0.0, 0.0, 0.0, 3.0)).has_degenerate_box());
        assert!(!Detection::axis(0, "a", 1.0, Rect::new(0.0, 0.0, 1.0, 3.0)).has_degenerate_box());
    }
}
