//! Output nodes: JSON payloads, previews, file export and overlays.

use crate::core::config::{ConfigError, ConfigValidator, lenient};
use crate::core::errors::FlowResult;
use crate::detection::{BoxShape, Detection, Mask};
use crate::geometry::{AffineTransform, Point, Rect, project_rotated};
use crate::graph::channel::{Channel, ImageHandle, NodeInputs, NodeOutput, ResultEntry};
use crate::graph::registry::{FlowNode, NodeContext};
use crate::utils::visualization::{AXIS_BOX_COLOR, ROTATED_BOX_COLOR};
use crate::utils::{blank_image, draw_box, parse_color, save_image};
use image::Rgb;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Integer `[x1, y1, x2, y2]` envelope of `points`.
fn int_envelope(points: &[Point]) -> Option<[i64; 4]> {
    let env = Rect::envelope(points)?;
    Some([
        env.x.floor() as i64,
        env.y.floor() as i64,
        env.x2().ceil() as i64,
        env.y2().ceil() as i64,
    ])
}

/// One detection of the `return_json` payload, in original coordinates.
fn payload_item(d: &Detection, to_original: &AffineTransform) -> Value {
    let mut item = json!({
        "category_id": d.category_id,
        "category_name": d.category_name,
        "score": d.score,
    });
    match &d.bbox {
        Some(BoxShape::Rotated(r)) => {
            let g = project_rotated(to_original, r);
            item["bbox"] = json!([g.cx, g.cy, g.width, g.height, g.angle]);
            item["metadata"] = json!({"is_rotated": true});
        }
        Some(BoxShape::Axis(r)) => {
            let corners = r.corners().map(|p| to_original.apply(p));
            if let Some(xyxy) = int_envelope(&corners) {
                item["bbox"] = json!(xyxy);
                item["metadata"] = json!({"is_rotated": false});
            }
        }
        None => {}
    }

    let poly: Option<Vec<[f64; 2]>> = match &d.mask {
        Some(Mask::Raster(rle)) => {
            item["mask_rle"] = serde_json::to_value(rle).unwrap_or(Value::Null);
            let origin = d.bbox.map(|b| b.aabb()).map_or(Point::new(0.0, 0.0), |r| Point::new(r.x, r.y));
            let points: Vec<[f64; 2]> = rle
                .points()
                .into_iter()
                .map(|p| to_original.apply(Point::new(origin.x + p.x, origin.y + p.y)))
                .map(|p| [p.x, p.y])
                .collect();
            (!points.is_empty()).then_some(points)
        }
        Some(Mask::Polygon(points)) => Some(
            points
                .iter()
                .map(|p| to_original.apply(*p))
                .map(|p| [p.x, p.y])
                .collect(),
        ),
        None => None,
    };
    if let Some(points) = poly {
        item["poly"] = json!([points]);
    }
    item
}

/// Publishes the surviving detections of every image, mapped to original
/// coordinates, into the run context.
///
/// The payload is `{"by_image": [{origin_index, original_size, results}]}`
/// with one element per input image. Images and results pass through.
#[derive(Debug)]
pub struct ReturnJsonNode;

impl ReturnJsonNode {
    fn image_payload(channel: &Channel, i: usize, handle: &ImageHandle) -> FlowResult<Value> {
        let mut results = Vec::new();
        for entry in channel.entries_for_image(i) {
            let state = entry.state();
            let to_original = if state.is_original() {
                AffineTransform::identity()
            } else {
                state.to_original()?
            };
            results.extend(
                entry
                    .detections
                    .iter()
                    .filter(|d| !d.is_suppressed())
                    .map(|d| payload_item(d, &to_original)),
            );
        }
        Ok(json!({
            "origin_index": handle.origin_index,
            "original_size": [handle.original.width(), handle.original.height()],
            "results": results,
        }))
    }
}

impl FlowNode for ReturnJsonNode {
    fn process(&self, inputs: NodeInputs, ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let main = inputs.main;
        let by_image = main
            .images
            .iter()
            .enumerate()
            .map(|(i, handle)| Self::image_payload(&main, i, handle))
            .collect::<FlowResult<Vec<Value>>>()?;
        debug!("node {}: return_json for {} images", ctx.node_id, by_image.len());
        ctx.run
            .record_return_json(ctx.node_id, json!({ "by_image": by_image }));
        Ok(NodeOutput::new(Channel::new(main.images, main.results)))
    }
}

/// Passes images and results through for display by the host.
#[derive(Debug)]
pub struct PreviewNode;

impl FlowNode for PreviewNode {
    fn process(&self, inputs: NodeInputs, _ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        Ok(NodeOutput::new(Channel::new(inputs.main.images, inputs.main.results)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SaveImageConfig {
    /// Nothing is written when empty.
    #[serde(deserialize_with = "lenient::de_string")]
    pub save_path: String,
    #[serde(deserialize_with = "lenient::de_string")]
    pub suffix: String,
    #[serde(deserialize_with = "lenient::de_string")]
    pub format: String,
}

impl Default for SaveImageConfig {
    fn default() -> Self {
        Self {
            save_path: String::new(),
            suffix: "_out".to_string(),
            format: "png".to_string(),
        }
    }
}

impl ConfigValidator for SaveImageConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.extension().as_str() {
            "png" | "jpg" | "jpeg" | "bmp" => Ok(()),
            other => Err(ConfigError::InvalidConfig {
                message: format!("unsupported image format '{}'", other),
            }),
        }
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

impl SaveImageConfig {
    fn extension(&self) -> String {
        let format = self.format.trim().to_ascii_lowercase();
        if format.is_empty() { "png".to_string() } else { format }
    }
}

/// Writes every image to `save_path` as `<name><suffix>.<format>`.
///
/// The name is the source file stem of the image's entry, or a local
/// timestamp. Write failures are logged and do not stop the run.
#[derive(Debug)]
pub struct SaveImageNode {
    config: SaveImageConfig,
}

impl SaveImageNode {
    pub fn new(config: SaveImageConfig) -> Self {
        Self { config }
    }

    fn base_name(channel: &Channel, i: usize, stamp: &str) -> String {
        let stem = channel
            .entries_for_image(i)
            .into_iter()
            .find_map(|e| e.filename.as_deref())
            .and_then(|f| Path::new(f).file_stem())
            .map(|s| s.to_string_lossy().into_owned());
        match stem {
            Some(stem) if !stem.is_empty() => stem,
            _ if channel.images.len() > 1 => format!("{}_{}", stamp, i),
            _ => stamp.to_string(),
        }
    }
}

impl FlowNode for SaveImageNode {
    fn process(&self, inputs: NodeInputs, ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let main = inputs.main;
        let dir = self.config.save_path.trim();
        if dir.is_empty() {
            debug!("node {}: save_image without save_path", ctx.node_id);
            return Ok(NodeOutput::new(Channel::new(main.images, main.results)));
        }
        let dir = PathBuf::from(dir);
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!("node {}: cannot create {}: {}", ctx.node_id, dir.display(), e);
            return Ok(NodeOutput::new(Channel::new(main.images, main.results)));
        }

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let extension = self.config.extension();
        for (i, handle) in main.images.iter().enumerate() {
            let name = format!(
                "{}{}.{}",
                Self::base_name(&main, i, &stamp),
                self.config.suffix,
                extension
            );
            let path = dir.join(name);
            match save_image(&handle.image, &path, &extension) {
                Ok(()) => info!("node {}: wrote {}", ctx.node_id, path.display()),
                Err(e) => warn!("node {}: {}", ctx.node_id, e),
            }
        }
        Ok(NodeOutput::new(Channel::new(main.images, main.results)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisualizeConfig {
    /// Draw on a black canvas instead of the original image.
    #[serde(deserialize_with = "lenient::de_bool")]
    pub black_background: bool,
    #[serde(deserialize_with = "lenient::de_bool")]
    pub display_bbox: bool,
    /// `"r,g,b"` outline color of axis-aligned boxes.
    #[serde(deserialize_with = "lenient::de_string")]
    pub bbox_color: String,
    /// `"r,g,b"` outline color of rotated boxes.
    #[serde(deserialize_with = "lenient::de_string")]
    pub bbox_color_rot: String,
    #[serde(deserialize_with = "lenient::de_i64")]
    pub thickness: i64,
}

impl Default for VisualizeConfig {
    fn default() -> Self {
        Self {
            black_background: false,
            display_bbox: true,
            bbox_color: String::new(),
            bbox_color_rot: String::new(),
            thickness: 2,
        }
    }
}

impl ConfigValidator for VisualizeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, text) in [("bbox_color", &self.bbox_color), ("bbox_color_rot", &self.bbox_color_rot)] {
            if !text.trim().is_empty() && parse_color(text).is_none() {
                return Err(ConfigError::InvalidConfig {
                    message: format!("{} '{}' is not an r,g,b color", name, text),
                });
            }
        }
        self.validate_positive("thickness", self.thickness as f64)
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Draws detection boxes.
///
/// The global variant draws every surviving detection, mapped to original
/// coordinates, on one canvas per original image and outputs the canvases as
/// fresh originals. The local variant draws each image's own entries on a
/// copy of that image, keeping its transform.
#[derive(Debug)]
pub struct VisualizeNode {
    local: bool,
    display_bbox: bool,
    black_background: bool,
    axis_color: Rgb<u8>,
    rotated_color: Rgb<u8>,
    thickness: u32,
}

impl VisualizeNode {
    pub fn new(config: VisualizeConfig, local: bool) -> Self {
        Self {
            local,
            display_bbox: config.display_bbox,
            black_background: config.black_background,
            axis_color: parse_color(&config.bbox_color).unwrap_or(AXIS_BOX_COLOR),
            rotated_color: parse_color(&config.bbox_color_rot).unwrap_or(ROTATED_BOX_COLOR),
            thickness: config.thickness.max(1) as u32,
        }
    }

    fn draw(&self, canvas: &mut image::RgbImage, detections: &[Detection]) {
        if !self.display_bbox {
            return;
        }
        for d in detections.iter().filter(|d| !d.is_suppressed()) {
            let Some(shape) = d.bbox else {
                continue;
            };
            let color = if shape.is_rotated() {
                self.rotated_color
            } else {
                self.axis_color
            };
            draw_box(canvas, &shape, color, self.thickness);
        }
    }

    fn on_originals(&self, main: &Channel) -> FlowResult<Vec<ImageHandle>> {
        let mut canvases = BTreeMap::new();
        for handle in &main.images {
            canvases.entry(handle.origin_index).or_insert_with(|| {
                let original = &handle.original;
                if self.black_background {
                    blank_image(original.width(), original.height(), Rgb([0, 0, 0]))
                } else {
                    (**original).clone()
                }
            });
        }
        for entry in &main.results {
            let Some(canvas) = canvases.get_mut(&entry.origin_index) else {
                continue;
            };
            let detections = entry.original_detections()?;
            self.draw(canvas, &detections);
        }
        Ok(canvases
            .into_iter()
            .map(|(origin, canvas)| ImageHandle::from_original(canvas, origin))
            .collect())
    }

    fn on_locals(&self, main: &Channel) -> Vec<ImageHandle> {
        main.images
            .iter()
            .enumerate()
            .map(|(i, handle)| {
                let mut canvas = (*handle.image).clone();
                for entry in main.results.iter().filter(|e: &&ResultEntry| e.index == i) {
                    self.draw(&mut canvas, &entry.detections);
                }
                ImageHandle {
                    image: Arc::new(canvas),
                    ..handle.clone()
                }
            })
            .collect()
    }
}

impl FlowNode for VisualizeNode {
    fn process(&self, inputs: NodeInputs, ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let main = inputs.main;
        let images = if self.local {
            self.on_locals(&main)
        } else {
            self.on_originals(&main)?
        };
        debug!("node {}: drew {} canvases", ctx.node_id, images.len());
        Ok(NodeOutput::new(Channel::new(images, main.results)))
    }
}
