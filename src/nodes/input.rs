//! Input nodes: where images enter a graph.

use crate::core::config::{ConfigError, ConfigValidator, lenient};
use crate::core::errors::FlowResult;
use crate::detection::Detection;
use crate::geometry::Rect;
use crate::graph::channel::{Channel, ImageHandle, NodeInputs, NodeOutput, ResultEntry};
use crate::graph::registry::{FlowNode, NodeContext};
use crate::utils::image::{blank_image, load_image, parse_color};
use image::Rgb;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, warn};

/// File name reported for an image pushed through the context.
pub const FRONTEND_FILENAME: &str = "frontend_mat";

fn frontend_output(image: std::sync::Arc<image::RgbImage>) -> NodeOutput {
    let handle = ImageHandle::from_shared(image, 0);
    let mut entry = ResultEntry::for_image(0, &handle, Vec::new());
    entry.filename = Some(FRONTEND_FILENAME.to_string());
    NodeOutput::new(Channel::new(vec![handle], vec![entry])).with_scalar("filename", FRONTEND_FILENAME)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Configuration of `input/image`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InputImageConfig {
    #[serde(deserialize_with = "lenient::de_string")]
    pub path: String,
    #[serde(deserialize_with = "lenient::de_string_list")]
    pub paths: Vec<String>,
}

impl InputImageConfig {
    /// `path` followed by `paths`, blanks dropped.
    pub fn files(&self) -> Vec<&str> {
        std::iter::once(self.path.as_str())
            .chain(self.paths.iter().map(String::as_str))
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect()
    }
}

impl ConfigValidator for InputImageConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Reads images from disk, or takes the context image when one is set.
#[derive(Debug)]
pub struct InputImageNode {
    config: InputImageConfig,
}

impl InputImageNode {
    pub fn new(config: InputImageConfig) -> Self {
        Self { config }
    }
}

impl FlowNode for InputImageNode {
    fn process(&self, _inputs: NodeInputs, ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        if let Some(image) = ctx.run.frontend_image.clone() {
            return Ok(frontend_output(image));
        }

        let mut channel = Channel::default();
        for file in self.config.files() {
            let path = Path::new(file);
            let image = match load_image(path) {
                Ok(image) => image,
                Err(e) => {
                    warn!("skipping unreadable input '{}': {}", file, e);
                    continue;
                }
            };
            let index = channel.images.len();
            let handle = ImageHandle::from_original(image, index);
            let mut entry = ResultEntry::for_image(index, &handle, Vec::new());
            entry.filename = Some(file_stem(path));
            channel.images.push(handle);
            channel.results.push(entry);
        }
        debug!("node {} loaded {} input images", ctx.node_id, channel.images.len());

        let filename = match channel.results.as_slice() {
            [only] => only.filename.clone(),
            _ => None,
        };
        let mut output = NodeOutput::new(channel);
        if let Some(name) = filename {
            output = output.with_scalar("filename", name);
        }
        Ok(output)
    }
}

/// Configuration of `input/frontend_image`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FrontendImageConfig {
    #[serde(deserialize_with = "lenient::de_string")]
    pub path: String,
}

impl ConfigValidator for FrontendImageConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// The image supplied by the host application.
///
/// Falls back to the `path` property and then to the context's
/// `frontend_image_path`. Emits nothing when none of them yields an image.
#[derive(Debug)]
pub struct FrontendImageNode {
    config: FrontendImageConfig,
}

impl FrontendImageNode {
    pub fn new(config: FrontendImageConfig) -> Self {
        Self { config }
    }
}

impl FlowNode for FrontendImageNode {
    fn process(&self, _inputs: NodeInputs, ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        if let Some(image) = ctx.run.frontend_image.clone() {
            return Ok(frontend_output(image));
        }
        let path = if self.config.path.trim().is_empty() {
            ctx.run.frontend_image_path.clone()
        } else {
            Some(self.config.path.trim().into())
        };
        let Some(path) = path else {
            debug!("node {}: no frontend image available", ctx.node_id);
            return Ok(NodeOutput::empty());
        };
        match load_image(&path) {
            Ok(image) => {
                let handle = ImageHandle::from_original(image, 0);
                let mut entry = ResultEntry::for_image(0, &handle, Vec::new());
                let stem = file_stem(&path);
                entry.filename = Some(stem.clone());
                Ok(NodeOutput::new(Channel::new(vec![handle], vec![entry]))
                    .with_scalar("filename", stem))
            }
            Err(e) => {
                warn!("frontend image '{}' is unreadable: {}", path.display(), e);
                Ok(NodeOutput::empty())
            }
        }
    }
}

/// Configuration of `input/build_results`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildResultsConfig {
    #[serde(deserialize_with = "lenient::de_string")]
    pub image_path: String,
    #[serde(deserialize_with = "lenient::de_i64")]
    pub default_width: i64,
    #[serde(deserialize_with = "lenient::de_i64")]
    pub default_height: i64,
    #[serde(deserialize_with = "lenient::de_string")]
    pub default_color: String,
    #[serde(deserialize_with = "lenient::de_i64")]
    pub category_id: i64,
    #[serde(deserialize_with = "lenient::de_string")]
    pub category_name: String,
    #[serde(deserialize_with = "lenient::de_f64")]
    pub score: f64,
    #[serde(deserialize_with = "lenient::de_f64")]
    pub bbox_x1: f64,
    #[serde(deserialize_with = "lenient::de_f64")]
    pub bbox_y1: f64,
    #[serde(deserialize_with = "lenient::de_f64")]
    pub bbox_x2: f64,
    #[serde(deserialize_with = "lenient::de_f64")]
    pub bbox_y2: f64,
    #[serde(deserialize_with = "lenient::de_opt_f64")]
    pub bbox_x: Option<f64>,
    #[serde(deserialize_with = "lenient::de_opt_f64")]
    pub bbox_y: Option<f64>,
    #[serde(deserialize_with = "lenient::de_opt_f64")]
    pub bbox_w: Option<f64>,
    #[serde(deserialize_with = "lenient::de_opt_f64")]
    pub bbox_h: Option<f64>,
}

impl Default for BuildResultsConfig {
    fn default() -> Self {
        Self {
            image_path: String::new(),
            default_width: 640,
            default_height: 640,
            default_color: "0,255,0".to_string(),
            category_id: 0,
            category_name: "object".to_string(),
            score: 0.95,
            bbox_x1: 100.0,
            bbox_y1: 100.0,
            bbox_x2: 300.0,
            bbox_y2: 300.0,
            bbox_x: None,
            bbox_y: None,
            bbox_w: None,
            bbox_h: None,
        }
    }
}

impl ConfigValidator for BuildResultsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.validate_positive("default_width", self.default_width as f64)?;
        self.validate_positive("default_height", self.default_height as f64)?;
        if parse_color(&self.default_color).is_none() {
            return Err(ConfigError::InvalidConfig {
                message: format!("default_color '{}' is not r,g,b", self.default_color),
            });
        }
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

impl BuildResultsConfig {
    /// The configured box as `(x1, y1, x2, y2)`, before clamping.
    ///
    /// `bbox_x/y/w/h` win when all four are set; otherwise the corners are
    /// used, reordered if needed.
    pub fn corners(&self) -> (f64, f64, f64, f64) {
        if let (Some(x), Some(y), Some(w), Some(h)) = (self.bbox_x, self.bbox_y, self.bbox_w, self.bbox_h) {
            return (x, y, x + w.abs(), y + h.abs());
        }
        let (x1, x2) = if self.bbox_x2 < self.bbox_x1 {
            (self.bbox_x2, self.bbox_x1)
        } else {
            (self.bbox_x1, self.bbox_x2)
        };
        let (y1, y2) = if self.bbox_y2 < self.bbox_y1 {
            (self.bbox_y2, self.bbox_y1)
        } else {
            (self.bbox_y1, self.bbox_y2)
        };
        (x1, y1, x2, y2)
    }
}

/// Emits a single hand-specified detection on an image, for wiring and
/// testing downstream nodes without a model.
///
/// The image is the first input image, else `image_path`, else the context's
/// frontend path, else a blank `default_width × default_height` canvas.
/// Detections injected through the context replace the configured one.
#[derive(Debug)]
pub struct BuildResultsNode {
    config: BuildResultsConfig,
}

impl BuildResultsNode {
    pub fn new(config: BuildResultsConfig) -> Self {
        Self { config }
    }

    fn source_image(&self, inputs: &NodeInputs, ctx: &NodeContext<'_>) -> ImageHandle {
        if let Some(first) = inputs.main.images.first() {
            return first.clone();
        }
        let path = Some(self.config.image_path.trim())
            .filter(|p| !p.is_empty())
            .map(std::path::PathBuf::from)
            .or_else(|| ctx.run.frontend_image_path.clone());
        if let Some(path) = path.filter(|p| p.exists()) {
            match load_image(&path) {
                Ok(image) => return ImageHandle::from_original(image, 0),
                Err(e) => warn!("build_results image '{}' is unreadable: {}", path.display(), e),
            }
        }
        let color = parse_color(&self.config.default_color).unwrap_or(Rgb([0, 255, 0]));
        ImageHandle::from_original(
            blank_image(
                self.config.default_width as u32,
                self.config.default_height as u32,
                color,
            ),
            0,
        )
    }
}

impl FlowNode for BuildResultsNode {
    fn process(&self, inputs: NodeInputs, ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let handle = self.source_image(&inputs, ctx);
        let (w, h) = (handle.width() as f64, handle.height() as f64);

        let detections = match &ctx.run.injected_results {
            Some(injected) => injected.clone(),
            None => {
                let (x1, y1, x2, y2) = self.config.corners();
                let x1 = x1.clamp(0.0, w);
                let y1 = y1.clamp(0.0, h);
                let x2 = x2.clamp(0.0, w);
                let y2 = y2.clamp(0.0, h);
                let rect = Rect::new(x1, y1, (x2 - x1).max(1.0), (y2 - y1).max(1.0));
                vec![Detection::axis(
                    self.config.category_id,
                    self.config.category_name.clone(),
                    self.config.score,
                    rect,
                )]
            }
        };

        let entry = ResultEntry::for_image(0, &handle, detections);
        Ok(NodeOutput::new(Channel::new(vec![handle], vec![entry])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoxShape;
    use crate::graph::context::ExecutionContext;
    use crate::nodes::{testing, typed};
    use crate::utils::image::save_image;
    use image::RgbImage;
    use serde_json::json;

    #[test]
    fn test_input_image_skips_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("part_01.png");
        save_image(&RgbImage::new(8, 6), &good, "png").unwrap();
        let missing = dir.path().join("missing.png");

        let config: InputImageConfig = typed(
            json!({"path": missing.to_string_lossy(), "paths": [good.to_string_lossy()]})
                .as_object()
                .unwrap(),
        )
        .unwrap();
        let node = InputImageNode::new(config);
        let mut run = ExecutionContext::new();
        let out = testing::with_ctx(&mut run, |ctx| node.process(NodeInputs::default(), ctx)).unwrap();

        assert_eq!(out.main.images.len(), 1);
        assert_eq!(out.main.images[0].origin_index, 0);
        assert!(out.main.images[0].is_original());
        assert_eq!(out.main.results[0].filename.as_deref(), Some("part_01"));
        assert_eq!(out.scalars.get("filename").map(|v| v.as_text()), Some("part_01".to_string()));
    }

    #[test]
    fn test_context_image_wins() {
        let node = InputImageNode::new(InputImageConfig {
            path: "/nonexistent.png".into(),
            paths: Vec::new(),
        });
        let mut run = ExecutionContext::new().with_image(RgbImage::new(3, 2));
        let out = testing::with_ctx(&mut run, |ctx| node.process(NodeInputs::default(), ctx)).unwrap();
        assert_eq!(out.main.images[0].width(), 3);
        assert_eq!(out.main.results[0].filename.as_deref(), Some(FRONTEND_FILENAME));
    }

    #[test]
    fn test_frontend_image_without_source_is_empty() {
        let node = FrontendImageNode::new(FrontendImageConfig::default());
        let mut run = ExecutionContext::new();
        let out = testing::with_ctx(&mut run, |ctx| node.process(NodeInputs::default(), ctx)).unwrap();
        assert!(out.main.is_empty());
    }

    #[test]
    fn test_build_results_blank_canvas_and_clamp() {
        let config: BuildResultsConfig = typed(
            json!({"default_width": 200, "default_height": "150", "default_color": "1,2,3",
                   "bbox_x": 150, "bbox_y": 100, "bbox_w": 100, "bbox_h": -20,
                   "category_name": "probe"})
            .as_object()
            .unwrap(),
        )
        .unwrap();
        let node = BuildResultsNode::new(config);
        let mut run = ExecutionContext::new();
        let out = testing::with_ctx(&mut run, |ctx| node.process(NodeInputs::default(), ctx)).unwrap();

        let image = &out.main.images[0];
        assert_eq!(image.image.dimensions(), (200, 150));
        assert_eq!(image.image.get_pixel(0, 0).0, [1, 2, 3]);
        let det = &out.main.results[0].detections[0];
        assert_eq!(det.category_name, "probe");
        assert_eq!(det.bbox, Some(BoxShape::Axis(Rect::new(150.0, 100.0, 50.0, 20.0))));
    }

    #[test]
    fn test_build_results_default_corners_and_injection() {
        let node = BuildResultsNode::new(BuildResultsConfig::default());
        let mut run = ExecutionContext::new();
        let inputs = NodeInputs::new(testing::single(400, 400, Vec::new()));
        let out = testing::with_ctx(&mut run, |ctx| node.process(inputs.clone(), ctx)).unwrap();
        let det = &out.main.results[0].detections[0];
        assert_eq!(det.bbox, Some(BoxShape::Axis(Rect::new(100.0, 100.0, 200.0, 200.0))));

        let mut run = ExecutionContext::new()
            .with_injected_results(vec![Detection::label(3, "ok", 0.5)]);
        let out = testing::with_ctx(&mut run, |ctx| node.process(inputs, ctx)).unwrap();
        assert_eq!(out.main.results[0].detections[0].category_id, 3);
    }

    #[test]
    fn test_build_results_rejects_bad_color() {
        let props = json!({"default_color": "green"});
        assert!(typed::<BuildResultsConfig>(props.as_object().unwrap()).is_err());
    }
}
