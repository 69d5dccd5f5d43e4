//! Sliding-window tiling and the merge that undoes it.

use crate::core::config::{ConfigError, ConfigValidator, lenient};
use crate::core::errors::FlowResult;
use crate::detection::ResultSet;
use crate::geometry::TransformState;
use crate::graph::channel::{Channel, ImageHandle, NodeInputs, NodeOutput, ResultEntry};
use crate::graph::registry::{FlowNode, NodeContext};
use crate::merge::{DetectionMerger, MergeConfig, MergeStrategy};
use crate::tiling::{TileConfig, TileGenerator};
use crate::utils::image::crop_image;
use itertools::Itertools;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Configuration of `sliding_window`.
///
/// The pair keys `window_size` and `overlap` may also be given per axis as
/// `small_img_width`/`small_img_height` and
/// `horizontal_overlap`/`vertical_overlap`; a per-axis key wins over the
/// matching half of its pair.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlidingWindowConfig {
    /// Tile size `[w, h]`.
    #[serde(deserialize_with = "lenient::de_pair")]
    pub window_size: (i32, i32),
    /// Overlap `[x, y]` between neighbouring tiles.
    #[serde(deserialize_with = "lenient::de_pair")]
    pub overlap: (i32, i32),
    #[serde(deserialize_with = "lenient::de_i64")]
    pub min_size: i64,
    #[serde(deserialize_with = "lenient::de_opt_i64")]
    pub small_img_width: Option<i64>,
    #[serde(deserialize_with = "lenient::de_opt_i64")]
    pub small_img_height: Option<i64>,
    #[serde(deserialize_with = "lenient::de_opt_i64")]
    pub horizontal_overlap: Option<i64>,
    #[serde(deserialize_with = "lenient::de_opt_i64")]
    pub vertical_overlap: Option<i64>,
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self {
            window_size: (640, 640),
            overlap: (0, 0),
            min_size: 1,
            small_img_width: None,
            small_img_height: None,
            horizontal_overlap: None,
            vertical_overlap: None,
        }
    }
}

impl SlidingWindowConfig {
    /// Effective tile size `(w, h)`.
    pub fn window(&self) -> (i64, i64) {
        (
            self.small_img_width.unwrap_or(self.window_size.0 as i64),
            self.small_img_height.unwrap_or(self.window_size.1 as i64),
        )
    }

    /// Effective overlap `(x, y)`.
    pub fn overlaps(&self) -> (i64, i64) {
        (
            self.horizontal_overlap.unwrap_or(self.overlap.0 as i64),
            self.vertical_overlap.unwrap_or(self.overlap.1 as i64),
        )
    }

    pub fn tile_config(&self) -> TileConfig {
        let (w, h) = self.window();
        let (ox, oy) = self.overlaps();
        TileConfig::new(w, h, ox, oy).with_min_size(self.min_size)
    }
}

impl ConfigValidator for SlidingWindowConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let (ox, oy) = self.overlaps();
        self.validate_non_negative("overlap_x", ox as f64)?;
        self.validate_non_negative("overlap_y", oy as f64)?;
        self.validate_non_negative("min_size", self.min_size as f64)
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Cuts every input image into overlapping tiles.
///
/// Each tile becomes its own image with a translation-only child transform,
/// and its result entry records the tile so the merge can find neighbours.
#[derive(Debug)]
pub struct SlidingWindowNode {
    generator: TileGenerator,
}

impl SlidingWindowNode {
    /// # Errors
    ///
    /// Returns `InvalidTileConfig` for a non-positive window size.
    pub fn new(config: SlidingWindowConfig) -> FlowResult<Self> {
        Ok(Self {
            generator: TileGenerator::new(config.tile_config())?,
        })
    }
}

impl FlowNode for SlidingWindowNode {
    fn process(&self, inputs: NodeInputs, ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let mut channel = Channel::default();
        for handle in &inputs.main.images {
            let parent = handle.base_state();
            let tiles = self.generator.generate(
                handle.width(),
                handle.height(),
                &parent,
                handle.origin_index,
            );
            for tile in tiles {
                let pixels = crop_image(&handle.image, tile.x, tile.y, tile.width, tile.height);
                let tile_handle = ImageHandle {
                    image: Arc::new(pixels),
                    original: Arc::clone(&handle.original),
                    transform: tile.transform.clone(),
                    origin_index: handle.origin_index,
                };
                let index = channel.images.len();
                let mut entry = ResultEntry::for_image(index, &tile_handle, Vec::new());
                entry.tile = Some(tile);
                channel.images.push(tile_handle);
                channel.results.push(entry);
            }
        }
        debug!(
            "node {}: {} images tiled into {} windows",
            ctx.node_id,
            inputs.main.images.len(),
            channel.images.len()
        );
        Ok(NodeOutput::new(channel))
    }
}

/// Configuration of `sliding_merge`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlidingMergeConfig {
    #[serde(deserialize_with = "lenient::de_f64")]
    pub combine_ios_threshold: f64,
    /// Task of the upstream model; selects the merge strategy.
    #[serde(deserialize_with = "lenient::de_string")]
    pub task_type: String,
}

impl Default for SlidingMergeConfig {
    fn default() -> Self {
        Self {
            combine_ios_threshold: 0.2,
            task_type: "det".to_string(),
        }
    }
}

impl SlidingMergeConfig {
    pub fn merge_config(&self) -> MergeConfig {
        MergeConfig {
            ios_threshold: self.combine_ios_threshold,
        }
    }
}

impl ConfigValidator for SlidingMergeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.merge_config().validate()
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Brings tiled detections back to their original images and removes the
/// duplicates found in overlapping tiles.
///
/// Emits one image (the original) and one entry with `transform = None` per
/// origin. Duplicates stay in the entry, flagged as suppressed.
#[derive(Debug)]
pub struct SlidingMergeNode {
    merger: DetectionMerger,
    strategy: Option<MergeStrategy>,
}

impl SlidingMergeNode {
    pub fn new(config: SlidingMergeConfig) -> FlowResult<Self> {
        Ok(Self {
            merger: DetectionMerger::new(config.merge_config())?,
            strategy: MergeStrategy::for_task(&config.task_type),
        })
    }

    /// The untransformed image of every origin: an original input image when
    /// one is present, else a handle rebuilt from a derived image's original.
    fn originals(images: &[ImageHandle]) -> BTreeMap<usize, ImageHandle> {
        let mut originals: BTreeMap<usize, ImageHandle> = BTreeMap::new();
        for handle in images.iter().filter(|h| h.is_original()) {
            originals.entry(handle.origin_index).or_insert_with(|| handle.clone());
        }
        for handle in images {
            originals
                .entry(handle.origin_index)
                .or_insert_with(|| ImageHandle::from_shared(Arc::clone(&handle.original), handle.origin_index));
        }
        originals
    }
}

impl FlowNode for SlidingMergeNode {
    fn process(&self, inputs: NodeInputs, ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let originals = Self::originals(&inputs.main.images);
        let mut groups: BTreeMap<usize, Vec<&ResultEntry>> = BTreeMap::new();
        for entry in &inputs.main.results {
            groups.entry(entry.origin_index).or_default().push(entry);
        }
        let origins: Vec<usize> = originals
            .keys()
            .chain(groups.keys())
            .copied()
            .sorted_unstable()
            .dedup()
            .collect();

        let identity = TransformState::default();
        let mut channel = Channel::default();
        for origin in origins {
            let mut set = ResultSet::new();
            for (local, entry) in groups.get(&origin).into_iter().flatten().enumerate() {
                let slot = set.add_slot(0, local as u32, entry.tile.as_ref().map(|t| t.slice_index()));
                let state = entry.state();
                for detection in &entry.detections {
                    let mut global = detection.to_original(&state)?;
                    global.stamp_global(&identity)?;
                    set.insert(slot, global);
                }
            }
            if let Some(strategy) = self.strategy {
                let stats = self.merger.merge_round(&mut set, 0, strategy);
                debug!(
                    "node {}: origin {} merged, {} of {} detections suppressed",
                    ctx.node_id, origin, stats.suppressed, stats.considered
                );
            }

            let index = channel.results.len();
            channel.results.push(ResultEntry {
                index,
                origin_index: origin,
                transform: None,
                detections: set.into_round(0),
                tile: None,
                filename: None,
            });
            if let Some(original) = originals.get(&origin) {
                channel.images.push(original.clone());
            }
        }
        Ok(NodeOutput::new(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BoxShape, Detection};
    use crate::geometry::{Rect, RotatedRect};
    use crate::graph::context::ExecutionContext;
    use crate::nodes::{testing, typed};
    use serde_json::json;

    fn tile_input(width: u32, height: u32, props: serde_json::Value) -> NodeOutput {
        let config: SlidingWindowConfig = typed(props.as_object().unwrap()).unwrap();
        let node = SlidingWindowNode::new(config).unwrap();
        let mut run = ExecutionContext::new();
        let inputs = NodeInputs::new(testing::single(width, height, Vec::new()));
        testing::with_ctx(&mut run, |ctx| node.process(inputs, ctx)).unwrap()
    }

    #[test]
    fn test_window_tiles_carry_transforms() {
        let out = tile_input(100, 60, json!({"window_size": [64, 64], "overlap": "16,16"}));
        // 100 wide with a 48 step gives 3 columns; the origins 48 and 96 both
        // clamp to x=36. 60 high fits one 60-px row.
        assert_eq!(out.main.images.len(), 3);
        let last = &out.main.results[2];
        let tile = last.tile.as_ref().unwrap();
        assert_eq!((tile.x, tile.width, tile.height), (36, 64, 60));
        assert_eq!(out.main.images[2].image.dimensions(), (64, 60));
        let p = last.state().point_to_original(crate::geometry::Point::new(0.0, 0.0)).unwrap();
        assert_eq!((p.x, p.y), (36.0, 0.0));
        assert_eq!(last.index, 2);
    }

    #[test]
    fn test_per_axis_window_keys() {
        let out = tile_input(
            100,
            60,
            json!({
                "small_img_width": 64,
                "small_img_height": "64",
                "horizontal_overlap": 16,
                "vertical_overlap": 16,
            }),
        );
        assert_eq!(out.main.images.len(), 3);
        assert_eq!(out.main.results[1].tile.as_ref().unwrap().x, 36);

        let config: SlidingWindowConfig = typed(
            json!({"window_size": [64, 64], "small_img_width": 32})
                .as_object()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(config.window(), (32, 64));
        assert_eq!(config.overlaps(), (0, 0));

        let negative = json!({"vertical_overlap": -1});
        assert!(typed::<SlidingWindowConfig>(negative.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_non_positive_window_fails() {
        let config: SlidingWindowConfig =
            typed(json!({"window_size": [0, 10]}).as_object().unwrap()).unwrap();
        let err = SlidingWindowNode::new(config).unwrap_err();
        assert!(matches!(err, crate::core::FlowError::InvalidTileConfig { .. }));
    }

    fn merge(tiles: &NodeOutput, per_tile: Vec<Vec<Detection>>, task: &str) -> NodeOutput {
        let mut channel = tiles.main.clone();
        for (entry, dets) in channel.results.iter_mut().zip(per_tile) {
            entry.detections = dets;
        }
        let config: SlidingMergeConfig =
            typed(json!({"task_type": task}).as_object().unwrap()).unwrap();
        let node = SlidingMergeNode::new(config).unwrap();
        let mut run = ExecutionContext::new();
        testing::with_ctx(&mut run, |ctx| node.process(NodeInputs::new(channel), ctx)).unwrap()
    }

    #[test]
    fn test_merge_reprojects_and_suppresses() {
        let tiles = tile_input(100, 60, json!({"window_size": [64, 64], "overlap": [16, 16]}));
        // The same object at x=40..60 in tile 0 and at x=5..25 in tile 1, whose
        // origin clamps to x=36.
        let out = merge(
            &tiles,
            vec![
                vec![Detection::axis(1, "dent", 0.6, Rect::new(40.0, 10.0, 20.0, 20.0))],
                vec![Detection::axis(1, "dent", 0.9, Rect::new(5.0, 10.0, 20.0, 20.0))],
                vec![],
            ],
            "det",
        );
        assert_eq!(out.main.images.len(), 1);
        assert!(out.main.images[0].is_original());
        let entry = &out.main.results[0];
        assert!(entry.transform.is_none());
        assert_eq!(entry.detections.len(), 2);
        let kept: Vec<&Detection> = entry.detections.iter().filter(|d| !d.is_suppressed()).collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[0].bbox, Some(BoxShape::Axis(Rect::new(41.0, 10.0, 20.0, 20.0))));
        assert_eq!(kept[0].meta.slice_index, Some((0, 1)));
    }

    #[test]
    fn test_cls_results_are_not_merged() {
        let tiles = tile_input(100, 60, json!({"window_size": [64, 64], "overlap": [16, 16]}));
        let same = Detection::axis(1, "dent", 0.6, Rect::new(40.0, 10.0, 20.0, 20.0));
        let out = merge(&tiles, vec![vec![same.clone()], vec![same], vec![]], "cls");
        assert!(out.main.results[0].detections.iter().all(|d| !d.is_suppressed()));
    }

    #[test]
    fn test_rotated_merge_uses_neighbours() {
        let tiles = tile_input(100, 60, json!({"window_size": [64, 64], "overlap": [16, 16]}));
        let out = merge(
            &tiles,
            vec![
                vec![Detection::rotated(1, "bolt", 0.8, RotatedRect::new(50.0, 20.0, 20.0, 10.0, 0.3))],
                vec![Detection::rotated(1, "bolt", 0.7, RotatedRect::new(2.0, 20.0, 20.0, 10.0, 0.3))],
                vec![],
            ],
            "rotated_bbox",
        );
        let entry = &out.main.results[0];
        let suppressed: Vec<f64> = entry
            .detections
            .iter()
            .filter(|d| d.is_suppressed())
            .map(|d| d.score)
            .collect();
        assert_eq!(suppressed, vec![0.7]);
    }
}
