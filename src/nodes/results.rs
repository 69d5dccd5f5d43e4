//! Nodes that reshape result lists: merging channels, splitting detections
//! by a predicate, and rewriting labels.

use crate::core::config::{ConfigError, ConfigValidator, lenient};
use crate::core::errors::{FlowError, FlowResult};
use crate::detection::{Detection, Mask};
use crate::geometry::Rect;
use crate::graph::channel::{Channel, ImageHandle, NodeInputs, NodeOutput, ResultEntry};
use crate::graph::registry::{FlowNode, NodeContext};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Splits every entry's detections in two with `keep`.
///
/// Entries whose image cannot be found are dropped. An entry appears in a
/// side only if it has detections there, and each side is numbered from 0 in
/// the order entries were seen, with the entry's image alongside.
fn partition<F>(channel: &Channel, mut keep: F) -> FlowResult<(Channel, Channel)>
where
    F: FnMut(&ImageHandle, &ResultEntry, &Detection) -> FlowResult<bool>,
{
    let mut kept = Channel::default();
    let mut rest = Channel::default();
    for entry in &channel.results {
        let Some(i) = channel.image_for_entry(entry) else {
            continue;
        };
        let image = &channel.images[i];
        let mut inside = Vec::new();
        let mut outside = Vec::new();
        for d in &entry.detections {
            if keep(image, entry, d)? {
                inside.push(d.clone());
            } else {
                outside.push(d.clone());
            }
        }
        for (side, detections) in [(&mut kept, inside), (&mut rest, outside)] {
            if detections.is_empty() {
                continue;
            }
            side.results.push(ResultEntry {
                index: side.results.len(),
                detections,
                ..entry.clone()
            });
            side.images.push(image.clone());
        }
    }
    Ok((kept, rest))
}

/// Output of a filter: kept detections on the main pair, the rest on pair 1,
/// and `has_positive` telling whether anything was kept.
fn filter_output(kept: Channel, rest: Channel) -> NodeOutput {
    let has_positive = kept.results.iter().any(|e| !e.detections.is_empty());
    NodeOutput::new(kept)
        .with_extra(rest)
        .with_scalar("has_positive", has_positive)
}

/// Concatenates the main channel and every extra channel.
///
/// Images are renumbered so that each one becomes its own origin, in
/// concatenation order; entry indices follow their images. When a channel
/// contributes exactly one image, all of its entries point at it.
#[derive(Debug)]
pub struct MergeResultsNode;

impl FlowNode for MergeResultsNode {
    fn process(&self, inputs: NodeInputs, _ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let NodeInputs { main, extra, .. } = inputs;
        let mut merged = Channel::default();
        for group in std::iter::once(main).chain(extra) {
            let base = merged.images.len();
            let added = group.images.len();
            let to_global = |local: usize| (local < added).then_some(base + local);

            for (local, mut image) in group.images.into_iter().enumerate() {
                image.origin_index = base + local;
                merged.images.push(image);
            }
            for mut entry in group.results {
                if added == 1 {
                    entry.index = base;
                    entry.origin_index = base;
                } else {
                    if let Some(g) = to_global(entry.index) {
                        entry.index = g;
                    }
                    if let Some(g) = to_global(entry.origin_index) {
                        entry.origin_index = g;
                    }
                }
                merged.results.push(entry);
            }
            merged.templates.extend(group.templates);
        }
        Ok(NodeOutput::new(merged))
    }
}

/// Configuration of `result_filter`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResultFilterConfig {
    /// Category names to keep; empty keeps everything.
    #[serde(deserialize_with = "lenient::de_string_list")]
    pub categories: Vec<String>,
}

impl ConfigValidator for ResultFilterConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Keeps detections of the listed categories.
#[derive(Debug)]
pub struct ResultFilterNode {
    categories: HashSet<String>,
}

impl ResultFilterNode {
    pub fn new(config: ResultFilterConfig) -> Self {
        Self {
            categories: config.categories.into_iter().collect(),
        }
    }
}

impl FlowNode for ResultFilterNode {
    fn process(&self, inputs: NodeInputs, _ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let (kept, rest) = partition(&inputs.main, |_, _, d| {
            Ok(self.categories.is_empty() || self.categories.contains(&d.category_name))
        })?;
        Ok(filter_output(kept, rest))
    }
}

/// Inclusive bounds on one measurement; a missing side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Bounds {
    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|m| value >= m) && self.max.is_none_or(|m| value <= m)
    }
}

/// Configuration of `result_filter_advanced`.
///
/// Each group of bounds only applies when its `enable_*` flag is set. Axis
/// and rotated boxes have separate size bounds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdvancedFilterConfig {
    #[serde(deserialize_with = "lenient::de_bool")]
    pub enable_bbox_wh: bool,
    #[serde(deserialize_with = "lenient::de_bool")]
    pub enable_rbox_wh: bool,
    #[serde(deserialize_with = "lenient::de_bool")]
    pub enable_bbox_area: bool,
    #[serde(deserialize_with = "lenient::de_bool")]
    pub enable_mask_area: bool,
    #[serde(deserialize_with = "lenient::de_opt_f64")]
    pub bbox_w_min: Option<f64>,
    #[serde(deserialize_with = "lenient::de_opt_f64")]
    pub bbox_w_max: Option<f64>,
    #[serde(deserialize_with = "lenient::de_opt_f64")]
    pub bbox_h_min: Option<f64>,
    #[serde(deserialize_with = "lenient::de_opt_f64")]
    pub bbox_h_max: Option<f64>,
    #[serde(deserialize_with = "lenient::de_opt_f64")]
    pub rbox_w_min: Option<f64>,
    #[serde(deserialize_with = "lenient::de_opt_f64")]
    pub rbox_w_max: Option<f64>,
    #[serde(deserialize_with = "lenient::de_opt_f64")]
    pub rbox_h_min: Option<f64>,
    #[serde(deserialize_with = "lenient::de_opt_f64")]
    pub rbox_h_max: Option<f64>,
    #[serde(deserialize_with = "lenient::de_opt_f64")]
    pub bbox_area_min: Option<f64>,
    #[serde(deserialize_with = "lenient::de_opt_f64")]
    pub bbox_area_max: Option<f64>,
    #[serde(deserialize_with = "lenient::de_opt_f64")]
    pub mask_area_min: Option<f64>,
    #[serde(deserialize_with = "lenient::de_opt_f64")]
    pub mask_area_max: Option<f64>,
}

impl ConfigValidator for AdvancedFilterConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let pairs = [
            ("bbox_w", self.bbox_w_min, self.bbox_w_max),
            ("bbox_h", self.bbox_h_min, self.bbox_h_max),
            ("rbox_w", self.rbox_w_min, self.rbox_w_max),
            ("rbox_h", self.rbox_h_min, self.rbox_h_max),
            ("bbox_area", self.bbox_area_min, self.bbox_area_max),
            ("mask_area", self.mask_area_min, self.mask_area_max),
        ];
        for (name, min, max) in pairs {
            if let (Some(lo), Some(hi)) = (min, max) {
                if lo > hi {
                    return Err(ConfigError::InvalidConfig {
                        message: format!("{}_min ({}) exceeds {}_max ({})", name, lo, name, hi),
                    });
                }
            }
        }
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Filters detections by box size, box area and mask area.
#[derive(Debug)]
pub struct AdvancedFilterNode {
    bbox_w: Option<Bounds>,
    bbox_h: Option<Bounds>,
    rbox_w: Option<Bounds>,
    rbox_h: Option<Bounds>,
    bbox_area: Option<Bounds>,
    mask_area: Option<Bounds>,
}

impl AdvancedFilterNode {
    pub fn new(config: AdvancedFilterConfig) -> Self {
        let bounds = |enabled: bool, min, max| enabled.then_some(Bounds { min, max });
        Self {
            bbox_w: bounds(config.enable_bbox_wh, config.bbox_w_min, config.bbox_w_max),
            bbox_h: bounds(config.enable_bbox_wh, config.bbox_h_min, config.bbox_h_max),
            rbox_w: bounds(config.enable_rbox_wh, config.rbox_w_min, config.rbox_w_max),
            rbox_h: bounds(config.enable_rbox_wh, config.rbox_h_min, config.rbox_h_max),
            bbox_area: bounds(config.enable_bbox_area, config.bbox_area_min, config.bbox_area_max),
            mask_area: bounds(config.enable_mask_area, config.mask_area_min, config.mask_area_max),
        }
    }

    /// Returns `true` if `d` passes every enabled check. Detections without a
    /// box never pass.
    pub fn passes(&self, d: &Detection) -> bool {
        let Some(shape) = &d.bbox else {
            return false;
        };
        let (w, h) = (shape.width().abs(), shape.height().abs());
        let within = |b: &Option<Bounds>, v: f64| b.as_ref().is_none_or(|b| b.contains(v));
        let size_ok = if shape.is_rotated() {
            within(&self.rbox_w, w) && within(&self.rbox_h, h)
        } else {
            within(&self.bbox_w, w) && within(&self.bbox_h, h)
        };
        let mask_area = match &d.mask {
            Some(Mask::Raster(rle)) => rle.area(),
            _ => 0.0,
        };
        size_ok && within(&self.bbox_area, w * h) && within(&self.mask_area, mask_area)
    }
}

impl FlowNode for AdvancedFilterNode {
    fn process(&self, inputs: NodeInputs, _ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let (kept, rest) = partition(&inputs.main, |_, _, d| Ok(self.passes(d)))?;
        Ok(filter_output(kept, rest))
    }
}

/// Configuration of `result_filter_region` and `result_filter_region_global`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegionFilterConfig {
    #[serde(deserialize_with = "lenient::de_i64")]
    pub x: i64,
    #[serde(deserialize_with = "lenient::de_i64")]
    pub y: i64,
    #[serde(deserialize_with = "lenient::de_i64")]
    pub w: i64,
    #[serde(deserialize_with = "lenient::de_i64")]
    pub h: i64,
}

impl Default for RegionFilterConfig {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            w: 100,
            h: 100,
        }
    }
}

impl ConfigValidator for RegionFilterConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// An integer rectangle `[x0, x1) × [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelRect {
    x0: i64,
    y0: i64,
    x1: i64,
    y1: i64,
}

impl PixelRect {
    /// Clamps `x, y, w, h` to a `width × height` image. Empty results are
    /// `None`.
    fn clamped(x: i64, y: i64, w: i64, h: i64, width: i64, height: i64) -> Option<Self> {
        if width <= 0 || height <= 0 {
            return None;
        }
        let x0 = x.clamp(0, width);
        let y0 = y.clamp(0, height);
        let x1 = (x + w).clamp(x0, width);
        let y1 = (y + h).clamp(y0, height);
        (x1 > x0 && y1 > y0).then_some(Self { x0, y0, x1, y1 })
    }

    fn intersection(&self, other: &PixelRect) -> Option<PixelRect> {
        let r = PixelRect {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        };
        (r.x1 > r.x0 && r.y1 > r.y0).then_some(r)
    }

    fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }
}

/// Keeps detections that reach into a fixed region of interest.
///
/// A detection is inside when its box, snapped outward to whole pixels and
/// clamped to the image, overlaps the region. With a raster mask, at least one
/// mask pixel must also fall in the region. The local variant reads boxes and
/// the region in each image's own pixels; the global variant in original
/// image coordinates.
#[derive(Debug)]
pub struct RegionFilterNode {
    config: RegionFilterConfig,
    global: bool,
}

impl RegionFilterNode {
    pub fn new(config: RegionFilterConfig, global: bool) -> Self {
        Self { config, global }
    }

    fn inside(&self, d: &Detection, width: i64, height: i64) -> bool {
        let c = &self.config;
        let Some(roi) = PixelRect::clamped(c.x, c.y, c.w.max(1), c.h.max(1), width, height) else {
            return false;
        };
        let Some(shape) = &d.bbox else {
            return false;
        };
        let aabb: Rect = shape.aabb();
        let Some(bbox) = PixelRect::clamped(
            aabb.x.floor() as i64,
            aabb.y.floor() as i64,
            aabb.width.ceil() as i64,
            aabb.height.ceil() as i64,
            width,
            height,
        ) else {
            return false;
        };
        let Some(overlap) = bbox.intersection(&roi) else {
            return false;
        };
        match &d.mask {
            Some(Mask::Raster(rle)) if rle.width > 0 && rle.height > 0 => {
                // The raster is stretched over the clamped box, nearest neighbour.
                let sx = (bbox.x1 - bbox.x0) as f64 / rle.width as f64;
                let sy = (bbox.y1 - bbox.y0) as f64 / rle.height as f64;
                rle.points().iter().any(|p| {
                    let x = bbox.x0 + (p.x * sx).floor() as i64;
                    let y = bbox.y0 + (p.y * sy).floor() as i64;
                    overlap.contains(x, y)
                })
            }
            _ => true,
        }
    }
}

impl FlowNode for RegionFilterNode {
    fn process(&self, inputs: NodeInputs, _ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let (kept, rest) = partition(&inputs.main, |image, entry, d| {
            if self.global {
                let original = d.to_original(&entry.state())?;
                Ok(self.inside(
                    &original,
                    image.original.width() as i64,
                    image.original.height() as i64,
                ))
            } else {
                Ok(self.inside(d, image.width() as i64, image.height() as i64))
            }
        })?;
        Ok(filter_output(kept, rest))
    }
}

/// Configuration of `text_replacement`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TextReplacementConfig {
    /// Substring → replacement, applied in key order.
    #[serde(deserialize_with = "lenient::de_string_map")]
    pub mapping: BTreeMap<String, String>,
}

impl ConfigValidator for TextReplacementConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Rewrites substrings of every category name.
#[derive(Debug)]
pub struct TextReplacementNode {
    mapping: Vec<(String, String)>,
}

impl TextReplacementNode {
    pub fn new(config: TextReplacementConfig) -> Self {
        Self {
            mapping: config
                .mapping
                .into_iter()
                .filter(|(from, _)| !from.is_empty())
                .collect(),
        }
    }

    pub fn apply(&self, name: &str) -> String {
        self.mapping
            .iter()
            .fold(name.to_string(), |acc, (from, to)| acc.replace(from.as_str(), to))
    }
}

impl FlowNode for TextReplacementNode {
    fn process(&self, inputs: NodeInputs, _ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let NodeInputs { mut main, .. } = inputs;
        if !self.mapping.is_empty() {
            for d in main.results.iter_mut().flat_map(|e| e.detections.iter_mut()) {
                d.category_name = self.apply(&d.category_name);
            }
        }
        Ok(NodeOutput::new(main))
    }
}

/// Configuration of `result_label_merge`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LabelMergeConfig {
    /// Inserted between the label and the original category name.
    #[serde(deserialize_with = "lenient::de_string")]
    pub fixed_text: String,
    /// Pick the highest-scoring label instead of the first one.
    #[serde(deserialize_with = "lenient::de_bool")]
    pub use_first_score_top1: bool,
}

impl Default for LabelMergeConfig {
    fn default() -> Self {
        Self {
            fixed_text: String::new(),
            use_first_score_top1: true,
        }
    }
}

impl ConfigValidator for LabelMergeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Prefixes the detections of extra input 0 with the label found on the
/// same-index entry of the main input.
///
/// Both inputs must carry the same images. The output is extra input 0 with
/// renamed detections.
#[derive(Debug)]
pub struct LabelMergeNode {
    config: LabelMergeConfig,
}

impl LabelMergeNode {
    pub fn new(config: LabelMergeConfig) -> Self {
        Self { config }
    }

    /// The label an entry contributes: its best-scoring named detection, or
    /// its first one. Ties keep the earlier detection.
    fn pick_label(&self, detections: &[Detection]) -> Option<String> {
        if !self.config.use_first_score_top1 {
            return detections
                .first()
                .map(|d| d.category_name.clone())
                .filter(|l| !l.is_empty());
        }
        detections
            .iter()
            .filter(|d| !d.category_name.is_empty())
            .fold(None::<&Detection>, |best, d| match best {
                Some(b) if b.score >= d.score => Some(b),
                _ => Some(d),
            })
            .map(|d| d.category_name.clone())
    }
}

impl FlowNode for LabelMergeNode {
    fn process(&self, inputs: NodeInputs, ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let NodeInputs { main, mut extra, .. } = inputs;
        if extra.is_empty() {
            return Err(FlowError::invalid_input(
                "result_label_merge needs a second image/result input",
            ));
        }
        let mut second = extra.swap_remove(0);
        if main.images.len() != second.images.len() {
            return Err(FlowError::invalid_input(format!(
                "inputs carry different image counts: {} vs {}",
                main.images.len(),
                second.images.len()
            )));
        }
        for (i, (a, b)) in main.images.iter().zip(&second.images).enumerate() {
            let same = a.origin_index == b.origin_index
                && a.image.dimensions() == b.image.dimensions()
                && a.signature() == b.signature();
            if !same {
                return Err(FlowError::invalid_input(format!(
                    "inputs are not the same images (index {})",
                    i
                )));
            }
        }

        let labels: HashMap<usize, String> = main
            .results
            .iter()
            .filter_map(|e| self.pick_label(&e.detections).map(|l| (e.index, l)))
            .collect();
        debug!("node {}: {} labels to merge", ctx.node_id, labels.len());

        for entry in &mut second.results {
            let Some(label) = labels.get(&entry.index) else {
                continue;
            };
            for d in &mut entry.detections {
                d.category_name = format!("{}{}{}", label, self.config.fixed_text, d.category_name);
            }
        }
        second.templates.clear();
        Ok(NodeOutput::new(second))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::MaskRle;
    use crate::geometry::{AffineTransform, RotatedRect};
    use crate::graph::channel::ScalarValue;
    use crate::graph::context::ExecutionContext;
    use crate::nodes::{testing, typed};
    use image::RgbImage;
    use serde_json::json;

    fn run(node: &dyn FlowNode, inputs: NodeInputs) -> FlowResult<NodeOutput> {
        let mut run = ExecutionContext::new();
        testing::with_ctx(&mut run, |ctx| node.process(inputs, ctx))
    }

    fn config<C: serde::de::DeserializeOwned + ConfigValidator>(props: serde_json::Value) -> C {
        typed(props.as_object().unwrap()).unwrap()
    }

    fn names(entry: &ResultEntry) -> Vec<&str> {
        entry.detections.iter().map(|d| d.category_name.as_str()).collect()
    }

    #[test]
    fn test_merge_results_renumbers_origins() {
        let a = testing::single(10, 10, vec![Detection::label(0, "a", 0.9)]);
        let mut b = Channel::new(
            vec![testing::image(20, 20, 0), testing::image(30, 30, 1)],
            Vec::new(),
        );
        b.results.push(ResultEntry::for_image(1, &b.images[1], vec![Detection::label(0, "b", 0.9)]));
        let out = run(&MergeResultsNode, NodeInputs::new(a).with_extra(b)).unwrap();

        let origins: Vec<usize> = out.main.images.iter().map(|h| h.origin_index).collect();
        assert_eq!(origins, vec![0, 1, 2]);
        assert_eq!((out.main.results[0].index, out.main.results[0].origin_index), (0, 0));
        assert_eq!((out.main.results[1].index, out.main.results[1].origin_index), (2, 2));
        assert_eq!(out.main.entries_for_image(2)[0].detections[0].category_name, "b");
    }

    #[test]
    fn test_result_filter_splits_categories() {
        let channel = testing::single(
            50,
            50,
            vec![
                Detection::label(1, "dent", 0.9),
                Detection::label(2, "scratch", 0.8),
                Detection::label(1, "dent", 0.7),
            ],
        );
        let node = ResultFilterNode::new(config(json!({"categories": ["dent"]})));
        let out = run(&node, NodeInputs::new(channel)).unwrap();

        assert_eq!(names(&out.main.results[0]), vec!["dent", "dent"]);
        assert_eq!(names(&out.extra[0].results[0]), vec!["scratch"]);
        assert_eq!(out.extra[0].images.len(), 1);
        assert_eq!(out.scalars["has_positive"], ScalarValue::Bool(true));
    }

    #[test]
    fn test_result_filter_without_matches() {
        let channel = testing::single(50, 50, vec![Detection::label(2, "scratch", 0.8)]);
        let node = ResultFilterNode::new(config(json!({"categories": "dent"})));
        let out = run(&node, NodeInputs::new(channel)).unwrap();
        assert!(out.main.results.is_empty());
        assert!(out.main.images.is_empty());
        assert_eq!(out.scalars["has_positive"], ScalarValue::Bool(false));
    }

    #[test]
    fn test_advanced_filter_bounds() {
        let node = AdvancedFilterNode::new(config(json!({
            "enable_bbox_wh": true,
            "bbox_w_min": "10",
            "enable_rbox_wh": true,
            "rbox_h_max": 5,
            "enable_mask_area": false,
            "mask_area_min": 1000,
        })));
        assert!(node.passes(&Detection::axis(0, "a", 0.9, Rect::new(0.0, 0.0, 10.0, 2.0))));
        assert!(!node.passes(&Detection::axis(0, "a", 0.9, Rect::new(0.0, 0.0, 9.0, 2.0))));
        assert!(node.passes(&Detection::rotated(0, "r", 0.9, RotatedRect::new(5.0, 5.0, 2.0, 5.0, 0.1))));
        assert!(!node.passes(&Detection::rotated(0, "r", 0.9, RotatedRect::new(5.0, 5.0, 2.0, 6.0, 0.1))));
        assert!(!node.passes(&Detection::label(0, "no box", 0.9)));
    }

    #[test]
    fn test_advanced_filter_mask_area() {
        let node = AdvancedFilterNode::new(config(json!({"enable_mask_area": true, "mask_area_min": 3})));
        let small = Detection::axis(0, "m", 0.9, Rect::new(0.0, 0.0, 2.0, 2.0))
            .with_mask(Mask::Raster(MaskRle::from_bits(2, 2, &[true, true, false, false])));
        let unmasked = Detection::axis(0, "m", 0.9, Rect::new(0.0, 0.0, 2.0, 2.0));
        assert!(!node.passes(&small));
        assert!(!node.passes(&unmasked));
    }

    #[test]
    fn test_advanced_filter_rejects_inverted_bounds() {
        let props = json!({"bbox_area_min": 10, "bbox_area_max": 5});
        assert!(typed::<AdvancedFilterConfig>(props.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_region_filter_local() {
        let channel = testing::single(
            200,
            200,
            vec![
                Detection::axis(0, "in", 0.9, Rect::new(40.0, 40.0, 20.0, 20.0)),
                Detection::axis(0, "edge", 0.9, Rect::new(99.5, 0.0, 10.0, 10.0)),
                Detection::axis(0, "out", 0.9, Rect::new(150.0, 150.0, 20.0, 20.0)),
            ],
        );
        let node = RegionFilterNode::new(config(json!({"x": 0, "y": 0, "w": 100, "h": 100})), false);
        let out = run(&node, NodeInputs::new(channel)).unwrap();
        assert_eq!(names(&out.main.results[0]), vec!["in", "edge"]);
        assert_eq!(names(&out.extra[0].results[0]), vec!["out"]);
    }

    #[test]
    fn test_region_filter_mask_must_reach_region() {
        // Only the bottom-right quarter of the mask is set.
        let bits = [false, false, false, true];
        let det = Detection::axis(0, "m", 0.9, Rect::new(90.0, 90.0, 20.0, 20.0))
            .with_mask(Mask::Raster(MaskRle::from_bits(2, 2, &bits)));
        let node = RegionFilterNode::new(RegionFilterConfig::default(), false);
        let out = run(&node, NodeInputs::new(testing::single(200, 200, vec![det]))).unwrap();
        assert!(out.main.results.is_empty());
        assert_eq!(out.scalars["has_positive"], ScalarValue::Bool(false));
    }

    #[test]
    fn test_region_filter_global_uses_original_space() {
        let parent = testing::image(400, 400, 0);
        let tile = parent.derive(RgbImage::new(100, 100), &AffineTransform::translation(-300.0, -300.0));
        let det = Detection::axis(0, "far", 0.9, Rect::new(10.0, 10.0, 5.0, 5.0));
        let entry = ResultEntry::for_image(0, &tile, vec![det]);
        let channel = Channel::new(vec![tile], vec![entry]);

        let local = RegionFilterNode::new(RegionFilterConfig::default(), false);
        let out = run(&local, NodeInputs::new(channel.clone())).unwrap();
        assert_eq!(out.main.results.len(), 1);

        let global = RegionFilterNode::new(RegionFilterConfig::default(), true);
        let out = run(&global, NodeInputs::new(channel)).unwrap();
        assert!(out.main.results.is_empty());
        assert_eq!(out.extra[0].results.len(), 1);
    }

    #[test]
    fn test_text_replacement() {
        let node = TextReplacementNode::new(config(json!({"mapping": "{\"O\": \"0\", \"\": \"x\"}"})));
        let channel = testing::single(10, 10, vec![Detection::label(0, "LOT-O1", 0.9)]);
        let out = run(&node, NodeInputs::new(channel)).unwrap();
        assert_eq!(names(&out.main.results[0]), vec!["L0T-01"]);
    }

    #[test]
    fn test_label_merge_prefixes_top1() {
        let main = testing::single(
            10,
            10,
            vec![Detection::label(0, "A", 0.4), Detection::label(1, "B", 0.9)],
        );
        let second = testing::single(10, 10, vec![Detection::label(5, "hole", 0.7)]);
        let node = LabelMergeNode::new(config(json!({"fixed_text": "-"})));
        let out = run(&node, NodeInputs::new(main.clone()).with_extra(second.clone())).unwrap();
        assert_eq!(names(&out.main.results[0]), vec!["B-hole"]);

        let first = LabelMergeNode::new(config(json!({"use_first_score_top1": false})));
        let out = run(&first, NodeInputs::new(main).with_extra(second)).unwrap();
        assert_eq!(names(&out.main.results[0]), vec!["Ahole"]);
    }

    #[test]
    fn test_label_merge_requires_matching_inputs() {
        let node = LabelMergeNode::new(LabelMergeConfig::default());
        let main = testing::single(10, 10, Vec::new());
        let err = run(&node, NodeInputs::new(main.clone())).unwrap_err();
        assert!(matches!(err, FlowError::InvalidInput { .. }));

        let other = testing::single(12, 10, Vec::new());
        let err = run(&node, NodeInputs::new(main).with_extra(other)).unwrap_err();
        assert!(matches!(err, FlowError::InvalidInput { .. }));
    }
}
