//! Per-run state shared between the caller and the nodes.

use crate::detection::Detection;
use image::RgbImage;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Payloads recorded by `output/return_json` nodes.
#[derive(Debug, Clone, Default)]
pub struct ReturnJson {
    /// The payload of the most recent `return_json` node.
    pub last: Option<Value>,
    /// Payloads by node id.
    pub by_node: BTreeMap<i64, Value>,
}

/// Caller-supplied inputs and node-produced outputs of one run.
///
/// A context is created per run and is never shared between threads.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Image pushed by the host application; takes priority over file inputs.
    pub frontend_image: Option<Arc<RgbImage>>,
    /// Fallback path for `input/frontend_image`.
    pub frontend_image_path: Option<PathBuf>,
    /// Detections for `input/build_results` to emit instead of its own.
    pub injected_results: Option<Vec<Detection>>,
    /// Default directory for template persistence.
    pub templates_dir: Option<PathBuf>,
    /// Scanned barcode, used as product id by `template_from_results`.
    pub barcode_text: Option<String>,
    /// Camera face label `A`-`D`.
    pub face: Option<String>,
    /// Free-form values for embedders.
    pub values: BTreeMap<String, Value>,
    pub return_json: ReturnJson,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, image: RgbImage) -> Self {
        self.frontend_image = Some(Arc::new(image));
        self
    }

    pub fn with_frontend_image_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.frontend_image_path = Some(path.into());
        self
    }

    pub fn with_injected_results(mut self, detections: Vec<Detection>) -> Self {
        self.injected_results = Some(detections);
        self
    }

    pub fn with_templates_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.templates_dir = Some(dir.into());
        self
    }

    pub fn with_barcode(mut self, text: impl Into<String>) -> Self {
        self.barcode_text = Some(text.into());
        self
    }

    pub fn with_face(mut self, face: impl Into<String>) -> Self {
        self.face = Some(face.into());
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Records a `return_json` payload as both the latest and the node's own.
    pub fn record_return_json(&mut self, node_id: i64, payload: Value) {
        self.return_json.by_node.insert(node_id, payload.clone());
        self.return_json.last = Some(payload);
    }
}
