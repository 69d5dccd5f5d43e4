//! Nodes that derive new images from existing ones.
//!
//! Every derived image records the map from its parent into its own pixel
//! space, composed onto the parent's transform, so detections found on it can
//! be brought back to the original image later.

use crate::core::config::{ConfigError, ConfigValidator, lenient};
use crate::core::errors::FlowResult;
use crate::detection::{BoxShape, Detection, Mask};
use crate::geometry::{
    AffineTransform, RotatedRect, TransformState, canonical_long_side, min_area_rect, project_rect,
};
use crate::graph::channel::{Channel, ImageHandle, NodeInputs, NodeOutput, ResultEntry};
use crate::graph::registry::{FlowNode, NodeContext};
use crate::tiling::{axis_crop, rotated_crop_transform};
use crate::utils::{crop_image, flip, rotate_ccw, warp_affine};
use image::Rgb;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;
use tracing::{debug, warn};

/// Maps a detection into a rotated or flipped image.
///
/// Axis boxes become the envelope of their mapped corners. Rotated boxes keep
/// their size; the center is mapped and `angle_shift`, when given, is added
/// to the angle and folded into `[-π, π)`.
fn remap_detection(d: &Detection, map: &AffineTransform, angle_shift: Option<f64>) -> Detection {
    let mut out = d.clone();
    out.meta.global_bbox = None;
    out.bbox = d.bbox.map(|b| match b {
        BoxShape::Axis(r) => BoxShape::Axis(project_rect(map, &r)),
        BoxShape::Rotated(r) => {
            let center = map.apply(r.center());
            let angle = match angle_shift {
                Some(shift) => (r.angle + shift + PI) % (2.0 * PI) - PI,
                None => r.angle,
            };
            BoxShape::Rotated(RotatedRect::new(center.x, center.y, r.width, r.height, angle))
        }
    });
    out
}

/// Configuration of `image_generation`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageGenerationConfig {
    /// Margin added around every box, in pixels.
    #[serde(deserialize_with = "lenient::de_f64")]
    pub crop_expand: f64,
    #[serde(deserialize_with = "lenient::de_i64")]
    pub min_size: i64,
    /// Fixed output size `[w, h]` for rotated crops.
    #[serde(deserialize_with = "lenient::de_opt_pair")]
    pub crop_shape: Option<(i32, i32)>,
}

impl Default for ImageGenerationConfig {
    fn default() -> Self {
        Self {
            crop_expand: 0.0,
            min_size: 1,
            crop_shape: None,
        }
    }
}

impl ConfigValidator for ImageGenerationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.validate_non_negative("crop_expand", self.crop_expand)
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Cuts every detection out of the image its entry belongs to.
///
/// Axis boxes are cropped; rotated boxes are warped upright. Each crop is
/// emitted with an empty result entry carrying the crop's transform.
#[derive(Debug)]
pub struct ImageGenerationNode {
    config: ImageGenerationConfig,
}

impl ImageGenerationNode {
    pub fn new(config: ImageGenerationConfig) -> Self {
        Self { config }
    }

    fn min_size(&self) -> u32 {
        self.config.min_size.clamp(1, u32::MAX as i64) as u32
    }

    fn crop_shape(&self) -> Option<(u32, u32)> {
        match self.config.crop_shape {
            Some((w, h)) if w > 0 && h > 0 => Some((w as u32, h as u32)),
            _ => None,
        }
    }

    fn crop(&self, parent: &ImageHandle, shape: &BoxShape) -> FlowResult<Option<ImageHandle>> {
        let expand = self.config.crop_expand;
        match shape {
            BoxShape::Rotated(r) => {
                let (local, w, h) = rotated_crop_transform(r, expand, self.min_size(), self.crop_shape());
                let pixels = warp_affine(&parent.image, &local, w, h, Rgb([0, 0, 0]))?;
                Ok(Some(parent.derive(pixels, &local)))
            }
            BoxShape::Axis(r) => {
                let Some(window) = axis_crop(r, expand, self.min_size(), parent.width(), parent.height())
                else {
                    return Ok(None);
                };
                let pixels = crop_image(&parent.image, window.x, window.y, window.width, window.height);
                Ok(Some(parent.derive(pixels, &window.local)))
            }
        }
    }
}

impl FlowNode for ImageGenerationNode {
    fn process(&self, inputs: NodeInputs, ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let main = &inputs.main;
        let mut channel = Channel::default();
        for entry in &main.results {
            let Some(i) = main.image_for_entry(entry) else {
                debug!("node {}: entry {} has no image", ctx.node_id, entry.index);
                continue;
            };
            let parent = &main.images[i];
            for detection in entry.detections.iter().filter(|d| !d.is_suppressed()) {
                let Some(shape) = &detection.bbox else {
                    continue;
                };
                if let Some(child) = self.crop(parent, shape)? {
                    let index = channel.images.len();
                    channel.results.push(ResultEntry::for_image(index, &child, Vec::new()));
                    channel.images.push(child);
                }
            }
        }
        Ok(NodeOutput::new(channel))
    }
}

/// Configuration of `coordinate_crop`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinateCropConfig {
    #[serde(deserialize_with = "lenient::de_i64")]
    pub x: i64,
    #[serde(deserialize_with = "lenient::de_i64")]
    pub y: i64,
    #[serde(deserialize_with = "lenient::de_i64")]
    pub w: i64,
    #[serde(deserialize_with = "lenient::de_i64")]
    pub h: i64,
}

impl Default for CoordinateCropConfig {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            w: 100,
            h: 100,
        }
    }
}

impl ConfigValidator for CoordinateCropConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Crops a fixed rectangle out of every image, clamped to the image bounds.
/// Results pass through untouched.
#[derive(Debug)]
pub struct CoordinateCropNode {
    config: CoordinateCropConfig,
}

impl CoordinateCropNode {
    pub fn new(config: CoordinateCropConfig) -> Self {
        Self { config }
    }

    /// The crop window `(x, y, w, h)` for an image of `width × height`.
    fn window(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let (w, h) = (width.max(1) as i64, height.max(1) as i64);
        let x0 = self.config.x.clamp(0, w - 1);
        let y0 = self.config.y.clamp(0, h - 1);
        let x1 = (x0 + self.config.w.max(1)).min(w).max(x0 + 1);
        let y1 = (y0 + self.config.h.max(1)).min(h).max(y0 + 1);
        (x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32)
    }
}

impl FlowNode for CoordinateCropNode {
    fn process(&self, inputs: NodeInputs, _ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let mut images = Vec::with_capacity(inputs.main.images.len());
        for handle in &inputs.main.images {
            if handle.width() == 0 || handle.height() == 0 {
                continue;
            }
            let (x, y, w, h) = self.window(handle.width(), handle.height());
            let pixels = crop_image(&handle.image, x, y, w, h);
            images.push(handle.derive(pixels, &AffineTransform::translation(-(x as f64), -(y as f64))));
        }
        Ok(NodeOutput::new(Channel::new(images, inputs.main.results)))
    }
}

/// Configuration of `image_flip`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageFlipConfig {
    /// `horizontal` or `vertical`.
    #[serde(deserialize_with = "lenient::de_string")]
    pub direction: String,
}

impl Default for ImageFlipConfig {
    fn default() -> Self {
        Self {
            direction: "horizontal".to_string(),
        }
    }
}

impl ImageFlipConfig {
    pub fn is_vertical(&self) -> bool {
        self.direction.contains("vertical") || self.direction.contains("竖直")
    }
}

impl ConfigValidator for ImageFlipConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Mirrors every image. Emits images only.
#[derive(Debug)]
pub struct ImageFlipNode {
    vertical: bool,
}

impl ImageFlipNode {
    pub fn new(config: ImageFlipConfig) -> Self {
        Self {
            vertical: config.is_vertical(),
        }
    }
}

impl FlowNode for ImageFlipNode {
    fn process(&self, inputs: NodeInputs, _ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let images = inputs
            .main
            .images
            .iter()
            .filter(|h| h.width() > 0 && h.height() > 0)
            .map(|h| {
                let (pixels, map) = flip(&h.image, self.vertical);
                h.derive(pixels, &map)
            })
            .collect();
        Ok(NodeOutput::new(Channel::new(images, Vec::new())))
    }
}

/// Configuration of `image_rotate_by_cls`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RotateByClsConfig {
    #[serde(deserialize_with = "lenient::de_string_list")]
    pub rotate90_labels: Vec<String>,
    #[serde(deserialize_with = "lenient::de_string_list")]
    pub rotate180_labels: Vec<String>,
    #[serde(deserialize_with = "lenient::de_string_list")]
    pub rotate270_labels: Vec<String>,
}

impl ConfigValidator for RotateByClsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Labels of classification entries, keyed the three ways an image can be
/// matched to them.
#[derive(Debug, Default)]
struct LabelIndex {
    by_signature: HashMap<String, String>,
    by_index: HashMap<usize, String>,
    by_origin: HashMap<usize, String>,
}

impl LabelIndex {
    fn consume(&mut self, entry: &ResultEntry) {
        let Some(label) = entry
            .detections
            .first()
            .map(|d| d.category_name.clone())
            .filter(|l| !l.is_empty())
        else {
            return;
        };
        let signature = entry.signature();
        if !signature.is_empty() {
            self.by_signature.insert(signature, label.clone());
        }
        self.by_index.insert(entry.index, label.clone());
        self.by_origin.insert(entry.origin_index, label);
    }

    fn lookup(&self, index: usize, image: &ImageHandle) -> Option<&str> {
        let signature = image.signature();
        (!signature.is_empty())
            .then(|| self.by_signature.get(&signature))
            .flatten()
            .or_else(|| self.by_index.get(&index))
            .or_else(|| self.by_origin.get(&image.origin_index))
            .map(String::as_str)
    }
}

/// Rotates every image counter-clockwise by the angle its class label asks
/// for, and maps the main results along.
///
/// Labels are read from the first detection of the matching entry in the
/// main results and in extra input 0, which wins where both have one. Images
/// whose label is not listed pass through unchanged.
#[derive(Debug)]
pub struct RotateByClsNode {
    rotate90: HashSet<String>,
    rotate180: HashSet<String>,
    rotate270: HashSet<String>,
}

impl RotateByClsNode {
    pub fn new(config: RotateByClsConfig) -> Self {
        Self {
            rotate90: config.rotate90_labels.into_iter().collect(),
            rotate180: config.rotate180_labels.into_iter().collect(),
            rotate270: config.rotate270_labels.into_iter().collect(),
        }
    }

    fn angle_for(&self, label: &str) -> u32 {
        if self.rotate90.contains(label) {
            90
        } else if self.rotate180.contains(label) {
            180
        } else if self.rotate270.contains(label) {
            270
        } else {
            0
        }
    }
}

/// Where an entry's image went, and the map that took it there.
struct Rotation {
    state: TransformState,
    map: AffineTransform,
    degrees: u32,
}

impl FlowNode for RotateByClsNode {
    fn process(&self, inputs: NodeInputs, ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let mut labels = LabelIndex::default();
        inputs.main.results.iter().for_each(|e| labels.consume(e));
        if let Some(cls) = inputs.extra(0) {
            cls.results.iter().for_each(|e| labels.consume(e));
        }

        let images = &inputs.main.images;
        let mut out_images = Vec::with_capacity(images.len());
        let mut rotations: HashMap<usize, Rotation> = HashMap::new();
        for (i, handle) in images.iter().enumerate() {
            let degrees = labels.lookup(i, handle).map_or(0, |l| self.angle_for(l));
            match rotate_ccw(&handle.image, degrees) {
                Some((pixels, map)) => {
                    let child = handle.derive(pixels, &map);
                    rotations.insert(
                        i,
                        Rotation {
                            state: child.transform.clone(),
                            map,
                            degrees,
                        },
                    );
                    out_images.push(child);
                }
                None => out_images.push(handle.clone()),
            }
        }
        debug!("node {}: {} of {} images rotated", ctx.node_id, rotations.len(), images.len());

        let mut results = inputs.main.results.clone();
        for entry in &mut results {
            let target = if entry.index < images.len() {
                Some(entry.index)
            } else {
                let signature = entry.signature();
                images
                    .iter()
                    .position(|h| h.origin_index == entry.origin_index)
                    .or_else(|| {
                        (!signature.is_empty())
                            .then(|| images.iter().position(|h| h.signature() == signature))
                            .flatten()
                    })
            };
            let Some(rotation) = target.and_then(|i| rotations.get(&i)) else {
                continue;
            };
            let shift = (rotation.degrees as f64).to_radians();
            entry.transform = Some(rotation.state.clone());
            entry.detections = entry
                .detections
                .iter()
                .map(|d| remap_detection(d, &rotation.map, Some(shift)))
                .collect();
        }
        Ok(NodeOutput::new(Channel::new(out_images, results)))
    }
}

/// Replaces every raster mask with its minimum-area rotated box.
///
/// Detections without a raster mask are dropped. The rotated box has its long
/// side as width and its angle folded into `[-π/2, π/2)`.
#[derive(Debug)]
pub struct MaskToRboxNode;

impl MaskToRboxNode {
    fn convert(detection: &Detection) -> Option<Detection> {
        let Some(Mask::Raster(rle)) = &detection.mask else {
            return None;
        };
        let anchor = detection.bbox?.aabb();
        let points = rle.points();
        if points.is_empty() {
            return None;
        }
        let mut rect = min_area_rect(&points)?;
        rect.cx += anchor.x;
        rect.cy += anchor.y;
        let mut out = detection.clone();
        out.bbox = Some(BoxShape::Rotated(canonical_long_side(rect)));
        out.mask = None;
        out.meta.global_bbox = None;
        Some(out)
    }
}

impl FlowNode for MaskToRboxNode {
    fn process(&self, inputs: NodeInputs, _ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let NodeInputs { mut main, .. } = inputs;
        for entry in &mut main.results {
            entry.detections = entry.detections.iter().filter_map(Self::convert).collect();
        }
        main.templates.clear();
        Ok(NodeOutput::new(main))
    }
}

/// Configuration of `rbox_correction`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RboxCorrectionConfig {
    /// Gray level of pixels uncovered by the rotation.
    #[serde(deserialize_with = "lenient::de_i64")]
    pub fill_value: i64,
}

impl ConfigValidator for RboxCorrectionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0..=255).contains(&self.fill_value) {
            return Err(ConfigError::OutOfRange {
                name: "fill_value".to_string(),
                value: self.fill_value as f64,
                min: 0.0,
                max: 255.0,
            });
        }
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Straightens images that were cut out at an angle.
///
/// The reference angle of image `i` is the rotation of the transform recorded
/// on the first entry with `index == i`. The image is rotated back by that
/// angle about its center, keeping its size, and the entry's boxes follow.
/// Masks are dropped since they no longer line up.
#[derive(Debug)]
pub struct RboxCorrectionNode {
    fill: Rgb<u8>,
}

impl RboxCorrectionNode {
    pub fn new(config: RboxCorrectionConfig) -> Self {
        let v = config.fill_value.clamp(0, 255) as u8;
        Self { fill: Rgb([v, v, v]) }
    }

    /// Rotation by `-reference` radians about the image center.
    fn correction(reference: f64, width: u32, height: u32) -> AffineTransform {
        let (cx, cy) = (width as f64 / 2.0, height as f64 / 2.0);
        let (alpha, beta) = (reference.cos(), reference.sin());
        AffineTransform::new(
            alpha,
            beta,
            (1.0 - alpha) * cx - beta * cy,
            -beta,
            alpha,
            beta * cx + (1.0 - alpha) * cy,
        )
    }
}

impl FlowNode for RboxCorrectionNode {
    fn process(&self, inputs: NodeInputs, ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let NodeInputs { main, .. } = inputs;
        let mut images = Vec::with_capacity(main.images.len());
        let mut corrections: HashMap<usize, (TransformState, AffineTransform)> = HashMap::new();
        for (i, handle) in main.images.iter().enumerate() {
            let reference = main
                .results
                .iter()
                .filter(|e| e.index == i)
                .find_map(|e| e.transform.as_ref().and_then(|t| t.affine_2x3))
                .map(|a| a.rotation_angle());
            let Some(reference) = reference else {
                images.push(handle.clone());
                continue;
            };
            let map = Self::correction(reference, handle.width(), handle.height());
            let pixels = match warp_affine(&handle.image, &map, handle.width(), handle.height(), self.fill) {
                Ok(pixels) => pixels,
                Err(e) => {
                    warn!("node {}: image {} not corrected: {}", ctx.node_id, i, e);
                    images.push(handle.clone());
                    continue;
                }
            };
            let child = handle.derive(pixels, &map);
            corrections.insert(i, (child.transform.clone(), map));
            images.push(child);
        }

        let mut results = main.results;
        for entry in &mut results {
            let Some((state, map)) = corrections.get(&entry.index) else {
                continue;
            };
            entry.transform = Some(state.clone());
            entry.detections = entry
                .detections
                .iter()
                .map(|d| {
                    let mut out = remap_detection(d, map, None);
                    out.mask = None;
                    out
                })
                .collect();
        }
        Ok(NodeOutput::new(Channel::new(images, results)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::MaskRle;
    use crate::geometry::{Point, Rect};
    use crate::graph::context::ExecutionContext;
    use crate::nodes::{testing, typed};
    use image::RgbImage;
    use serde_json::json;
    use std::f64::consts::FRAC_PI_2;

    fn run(node: &dyn FlowNode, inputs: NodeInputs) -> NodeOutput {
        let mut run = ExecutionContext::new();
        testing::with_ctx(&mut run, |ctx| node.process(inputs, ctx)).unwrap()
    }

    fn config<C: serde::de::DeserializeOwned + ConfigValidator>(props: serde_json::Value) -> C {
        typed(props.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_generation_axis_crop() {
        let channel = testing::single(
            100,
            80,
            vec![Detection::axis(1, "a", 0.9, Rect::new(10.2, 20.0, 30.0, 10.0))],
        );
        let node = ImageGenerationNode::new(config(json!({"crop_expand": 2})));
        let out = run(&node, NodeInputs::new(channel));

        assert_eq!(out.main.images.len(), 1);
        let crop = &out.main.images[0];
        assert_eq!(crop.image.dimensions(), (34, 14));
        let p = crop.transform.point_to_original(Point::new(0.0, 0.0)).unwrap();
        assert_eq!((p.x, p.y), (8.0, 18.0));
        assert!(out.main.results[0].detections.is_empty());
        assert_eq!(out.main.results[0].signature(), crop.signature());
    }

    #[test]
    fn test_generation_rotated_crop_is_upright() {
        let mut img = RgbImage::new(60, 60);
        img.put_pixel(30, 30, Rgb([200, 0, 0]));
        let handle = ImageHandle::from_original(img, 0);
        let rect = RotatedRect::new(30.0, 30.0, 20.0, 10.0, FRAC_PI_2);
        let entry = ResultEntry::for_image(0, &handle, vec![Detection::rotated(1, "r", 0.9, rect)]);
        let node = ImageGenerationNode::new(ImageGenerationConfig::default());
        let out = run(&node, NodeInputs::new(Channel::new(vec![handle], vec![entry])));

        let crop = &out.main.images[0];
        assert_eq!(crop.image.dimensions(), (20, 10));
        // The crop center maps back onto the box center.
        let c = crop.transform.point_to_original(Point::new(10.0, 5.0)).unwrap();
        assert!((c.x - 30.0).abs() < 1e-9 && (c.y - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_coordinate_crop_clamps() {
        let node = CoordinateCropNode::new(config(json!({"x": 90, "y": "5", "w": 50, "h": 20})));
        let out = run(&node, NodeInputs::new(testing::single(100, 80, Vec::new())));
        let crop = &out.main.images[0];
        assert_eq!(crop.image.dimensions(), (10, 20));
        assert_eq!(crop.signature(), "T:1.0000,0.0000,-90.00,0.0000,1.0000,-5.00");
        // Results are passed through as they came.
        assert!(out.main.results[0].signature().is_empty());
    }

    #[test]
    fn test_flip_directions() {
        let horizontal = ImageFlipNode::new(ImageFlipConfig::default());
        let out = run(&horizontal, NodeInputs::new(testing::single(4, 2, Vec::new())));
        assert_eq!(out.main.images[0].signature(), "T:-1.0000,0.0000,3.00,0.0000,1.0000,0.00");
        assert!(out.main.results.is_empty());

        let vertical = ImageFlipNode::new(config(json!({"direction": "竖直"})));
        let out = run(&vertical, NodeInputs::new(testing::single(4, 2, Vec::new())));
        assert_eq!(out.main.images[0].signature(), "T:1.0000,0.0000,0.00,0.0000,-1.0000,1.00");
    }

    #[test]
    fn test_rotate_by_cls_label_from_extra() {
        let det = Detection::axis(1, "part", 0.9, Rect::new(0.0, 0.0, 10.0, 5.0));
        let main = testing::single(40, 20, vec![det]);
        let cls = testing::single(40, 20, vec![Detection::label(0, "left", 0.99)]);
        let node = RotateByClsNode::new(config(json!({"rotate90_labels": ["left"]})));
        let out = run(&node, NodeInputs::new(main).with_extra(cls));

        let image = &out.main.images[0];
        assert_eq!(image.image.dimensions(), (20, 40));
        let entry = &out.main.results[0];
        assert_eq!(entry.signature(), image.signature());
        // x' = y, y' = 39 - x
        assert_eq!(
            entry.detections[0].bbox,
            Some(BoxShape::Axis(Rect::new(0.0, 29.0, 5.0, 10.0)))
        );
        // Back in original space the box is where it started.
        let back = entry.original_detections().unwrap();
        assert_eq!(
            back[0].bbox,
            Some(BoxShape::Axis(Rect::new(0.0, 0.0, 10.0, 5.0)))
        );
    }

    #[test]
    fn test_rotate_by_cls_shifts_rotated_angle() {
        let det = Detection::rotated(1, "r", 0.9, RotatedRect::new(10.0, 5.0, 8.0, 4.0, 3.0));
        let main = testing::single(40, 20, vec![det, Detection::label(0, "upside", 0.9)]);
        // The main entry's own first detection is the label source here.
        let mut main = main;
        main.results[0].detections.swap(0, 1);
        let node = RotateByClsNode::new(config(json!({"rotate180_labels": "upside"})));
        let out = run(&node, NodeInputs::new(main));
        let rotated = out.main.results[0].detections[1].bbox.unwrap();
        let BoxShape::Rotated(r) = rotated else {
            panic!("expected a rotated box");
        };
        assert_eq!((r.cx, r.cy), (29.0, 14.0));
        assert!((r.angle - (3.0 + PI + PI) % (2.0 * PI) + PI).abs() < 1e-12);
    }

    #[test]
    fn test_rotate_by_cls_unlisted_label_passes_through() {
        let main = testing::single(40, 20, vec![Detection::label(0, "ok", 0.9)]);
        let node = RotateByClsNode::new(config(json!({"rotate90_labels": ["left"]})));
        let out = run(&node, NodeInputs::new(main));
        assert!(out.main.images[0].is_original());
        assert!(out.main.results[0].signature().is_empty());
    }

    #[test]
    fn test_mask_to_rbox() {
        // A 6 x 2 block of set pixels inside an 8 x 4 raster.
        let mut bits = vec![false; 32];
        for y in 1..3 {
            for x in 1..7 {
                bits[y * 8 + x] = true;
            }
        }
        let masked = Detection::axis(1, "m", 0.9, Rect::new(100.0, 50.0, 8.0, 4.0))
            .with_mask(Mask::Raster(MaskRle::from_bits(8, 4, &bits)));
        let plain = Detection::axis(1, "p", 0.9, Rect::new(0.0, 0.0, 8.0, 4.0));
        let out = run(&MaskToRboxNode, NodeInputs::new(testing::single(200, 100, vec![masked, plain])));

        let dets = &out.main.results[0].detections;
        assert_eq!(dets.len(), 1);
        assert!(dets[0].mask.is_none());
        let Some(BoxShape::Rotated(r)) = dets[0].bbox else {
            panic!("expected a rotated box");
        };
        assert!((r.cx - 103.5).abs() < 1e-9 && (r.cy - 51.5).abs() < 1e-9);
        assert!((r.width - 5.0).abs() < 1e-9 && (r.height - 1.0).abs() < 1e-9);
        assert!(r.angle.abs() < 1e-9);
    }

    #[test]
    fn test_rbox_correction_undoes_reference_rotation() {
        let theta: f64 = 0.4;
        let parent = testing::image(50, 40, 0);
        let rotation = AffineTransform::new(theta.cos(), -theta.sin(), 0.0, theta.sin(), theta.cos(), 0.0);
        let crop = parent.derive(RgbImage::new(50, 40), &rotation);
        let det = Detection::axis(1, "a", 0.9, Rect::new(20.0, 15.0, 10.0, 10.0))
            .with_mask(Mask::Polygon(vec![Point::new(20.0, 15.0)]));
        let entry = ResultEntry::for_image(0, &crop, vec![det]);
        let node = RboxCorrectionNode::new(RboxCorrectionConfig::default());
        let out = run(&node, NodeInputs::new(Channel::new(vec![crop], vec![entry])));

        let image = &out.main.images[0];
        assert_eq!(image.image.dimensions(), (50, 40));
        let angle = image.transform.affine().rotation_angle();
        assert!(angle.abs() < 1e-9);
        let entry = &out.main.results[0];
        assert_eq!(entry.signature(), image.signature());
        assert!(entry.detections[0].mask.is_none());
        // The box center is a fixed point of the rotation about (25, 20).
        let center = entry.detections[0].bbox.unwrap().center();
        assert!((center.x - 25.0).abs() < 1e-9 && (center.y - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_rbox_correction_fill_range() {
        assert!(typed::<RboxCorrectionConfig>(json!({"fill_value": 300}).as_object().unwrap()).is_err());
    }
}
