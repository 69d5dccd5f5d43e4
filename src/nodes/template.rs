//! Template nodes: build, persist, load and match golden layouts.

use crate::core::config::{ConfigError, ConfigValidator, lenient};
use crate::core::errors::{FlowError, FlowResult};
use crate::detection::BoxShape;
use crate::graph::channel::{Channel, NodeInputs, NodeOutput};
use crate::graph::registry::{FlowNode, NodeContext};
use crate::template::{
    MatchOptions, Template, TemplateMatcher, TemplateRegion, TemplateStore, normalize_text,
};
use crate::utils::save_image;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory used when neither the node nor the run names one.
const DEFAULT_TEMPLATES_DIR: &str = "templates";

/// Rounds values within float noise of an integer, so rotated corners do not
/// grow a region by a pixel.
fn snap(v: f64) -> f64 {
    let r = v.round();
    if (v - r).abs() < 1e-6 { r } else { v }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TemplateFromResultsConfig {
    /// Falls back to `product_name` when empty.
    #[serde(deserialize_with = "lenient::de_string")]
    pub template_name: String,
    #[serde(deserialize_with = "lenient::de_string")]
    pub product_id: String,
    #[serde(deserialize_with = "lenient::de_string")]
    pub product_name: String,
}

impl ConfigValidator for TemplateFromResultsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Turns labelled detections into a template.
///
/// Every surviving detection with a non-empty name becomes a region at the
/// integer envelope of its original-space box. Regions with the same
/// normalized text and box are kept once. A scanned barcode in the run
/// context replaces the configured product id, and the camera face sets the
/// camera position.
#[derive(Debug)]
pub struct TemplateFromResultsNode {
    config: TemplateFromResultsConfig,
}

impl TemplateFromResultsNode {
    pub fn new(config: TemplateFromResultsConfig) -> Self {
        Self { config }
    }

    fn region(text: &str, score: f64, shape: &BoxShape) -> TemplateRegion {
        let env = match shape {
            BoxShape::Axis(r) => *r,
            BoxShape::Rotated(r) => r.envelope(),
        };
        let x = snap(env.x).floor();
        let y = snap(env.y).floor();
        let width = (snap(env.x2()).ceil() - x).max(1.0);
        let height = (snap(env.y2()).ceil() - y).max(1.0);
        TemplateRegion::new(text, score, x as i64, y as i64, width as i64, height as i64)
    }
}

impl FlowNode for TemplateFromResultsNode {
    fn process(&self, inputs: NodeInputs, ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let main = inputs.main;

        let mut seen = HashSet::new();
        let mut regions = Vec::new();
        for entry in &main.results {
            for d in entry.original_detections()? {
                if d.category_name.trim().is_empty() {
                    continue;
                }
                let Some(shape) = d.bbox else {
                    continue;
                };
                let region = Self::region(&d.category_name, d.score, &shape);
                let key = format!(
                    "{}|{},{},{},{}",
                    normalize_text(&region.text),
                    region.x,
                    region.y,
                    region.width,
                    region.height
                );
                if seen.insert(key) {
                    regions.push(region);
                }
            }
        }

        let product_id = ctx
            .run
            .barcode_text
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.config.product_id)
            .to_string();
        let name = if self.config.template_name.trim().is_empty() {
            self.config.product_name.clone()
        } else {
            self.config.template_name.clone()
        };

        let mut template = Template::new(name)
            .with_product(product_id, self.config.product_name.clone())
            .with_regions(regions);
        if let Some(position) = ctx.run.face.as_deref().and_then(Template::camera_position_for_face) {
            template.camera_position = position;
        }
        template.assign_default_id();
        debug!(
            "node {}: template '{}' with {} regions",
            ctx.node_id,
            template.template_id,
            template.ocr_results.len()
        );

        Ok(NodeOutput::new(
            Channel::new(main.images, main.results).with_templates(vec![template]),
        ))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TemplateSaveConfig {
    /// File stem; the template id when empty.
    #[serde(deserialize_with = "lenient::de_string")]
    pub file_name: String,
    #[serde(deserialize_with = "lenient::de_string")]
    pub save_dir: String,
}

impl ConfigValidator for TemplateSaveConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Writes the first incoming template, plus the first image as its reference
/// picture.
#[derive(Debug)]
pub struct TemplateSaveNode {
    config: TemplateSaveConfig,
}

impl TemplateSaveNode {
    pub fn new(config: TemplateSaveConfig) -> Self {
        Self { config }
    }

    fn directory(&self, ctx: &NodeContext<'_>) -> PathBuf {
        if !self.config.save_dir.trim().is_empty() {
            return PathBuf::from(self.config.save_dir.trim());
        }
        ctx.run
            .templates_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATES_DIR))
    }
}

impl FlowNode for TemplateSaveNode {
    fn process(&self, inputs: NodeInputs, ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let Some(template) = inputs.main.templates.first() else {
            warn!("node {}: no template to save", ctx.node_id);
            return Ok(NodeOutput::empty());
        };
        let store = TemplateStore::new(self.directory(ctx));
        let file_name = Some(self.config.file_name.as_str()).filter(|s| !s.trim().is_empty());

        let saved = match inputs.main.images.first() {
            Some(handle) => {
                let image = handle.image.clone();
                store.save(
                    template,
                    file_name,
                    Some(move |path: &Path| save_image(&image, path, "png")),
                )?
            }
            None => store.save(template, file_name, None::<fn(&Path) -> FlowResult<()>>)?,
        };
        info!(
            "node {}: template '{}' written to {}",
            ctx.node_id,
            saved.template.template_id,
            saved.json_path.display()
        );
        Ok(NodeOutput::empty().with_scalar("path", saved.json_path.display().to_string()))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TemplateLoadConfig {
    #[serde(deserialize_with = "lenient::de_string")]
    pub path: String,
}

impl ConfigValidator for TemplateLoadConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Loads a template file and attaches it to the passing images and results.
///
/// Relative paths that do not exist as given resolve against the run's
/// templates directory.
#[derive(Debug)]
pub struct TemplateLoadNode {
    config: TemplateLoadConfig,
}

impl TemplateLoadNode {
    pub fn new(config: TemplateLoadConfig) -> Self {
        Self { config }
    }
}

impl FlowNode for TemplateLoadNode {
    fn process(&self, inputs: NodeInputs, ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let main = inputs.main;
        let path = self.config.path.trim();
        if path.is_empty() {
            warn!("node {}: template_load without a path", ctx.node_id);
            return Ok(NodeOutput::new(Channel::new(main.images, main.results)));
        }
        let dir = ctx
            .run
            .templates_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATES_DIR));
        let template = TemplateStore::new(dir).load(path)?;
        debug!(
            "node {}: loaded template '{}' ({} regions)",
            ctx.node_id,
            template.template_id,
            template.ocr_results.len()
        );
        Ok(NodeOutput::new(
            Channel::new(main.images, main.results).with_templates(vec![template]),
        ))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TemplateMatchConfig {
    #[serde(deserialize_with = "lenient::de_f64")]
    pub position_tolerance_x: f64,
    #[serde(deserialize_with = "lenient::de_f64")]
    pub position_tolerance_y: f64,
    #[serde(deserialize_with = "lenient::de_f64")]
    pub min_confidence_threshold: f64,
    #[serde(deserialize_with = "lenient::de_bool")]
    pub check_position: bool,
}

impl Default for TemplateMatchConfig {
    fn default() -> Self {
        let options = MatchOptions::default();
        Self {
            position_tolerance_x: options.position_tolerance_x,
            position_tolerance_y: options.position_tolerance_y,
            min_confidence_threshold: options.min_confidence,
            check_position: options.check_position,
        }
    }
}

impl TemplateMatchConfig {
    pub fn options(&self) -> MatchOptions {
        MatchOptions {
            position_tolerance_x: self.position_tolerance_x,
            position_tolerance_y: self.position_tolerance_y,
            min_confidence: self.min_confidence_threshold,
            check_position: self.check_position,
        }
    }
}

impl ConfigValidator for TemplateMatchConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.options().validate()
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Compares the regions of the main template against the golden template on
/// the first extra input.
///
/// Produces only scalars: `ok` with the verdict and `detail` with the full
/// report as JSON. Nothing is produced when either template is missing.
#[derive(Debug)]
pub struct TemplateMatchNode {
    matcher: TemplateMatcher,
}

impl TemplateMatchNode {
    pub fn new(config: TemplateMatchConfig) -> Self {
        Self {
            matcher: TemplateMatcher::new(config.options()),
        }
    }
}

impl FlowNode for TemplateMatchNode {
    fn process(&self, inputs: NodeInputs, ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let candidate = inputs.main.templates.first();
        let golden = inputs.extra(0).and_then(|c| c.templates.first());
        let (Some(candidate), Some(golden)) = (candidate, golden) else {
            debug!("node {}: template_match is missing an input template", ctx.node_id);
            return Ok(NodeOutput::empty());
        };

        let report = self.matcher.match_template(golden, &candidate.ocr_results);
        let detail = serde_json::to_string(&report).map_err(FlowError::Serialization)?;
        Ok(NodeOutput::empty()
            .with_scalar("ok", report.is_match())
            .with_scalar("detail", detail))
    }
}
