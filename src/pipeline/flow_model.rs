//! Whole-graph facade.

use crate::core::errors::FlowResult;
use crate::graph::{
    ExecutionContext, GraphDescription, GraphExecutor, ModelLoadReport, NodeRecord,
};
use crate::inference::InferenceBackend;
use image::RgbImage;
use rayon::prelude::*;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// A loaded graph bound to an inference backend.
///
/// The graph is compiled once; every call to [`infer`](Self::infer) runs it
/// with a fresh [`ExecutionContext`], so a model can serve concurrent runs.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use vision_flow::inference::NullBackend;
/// use vision_flow::pipeline::FlowModel;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let model = FlowModel::load("graphs/inspect.json", Arc::new(NullBackend))?
///     .with_templates_dir("templates");
/// let image = vision_flow::utils::load_image(std::path::Path::new("part.png"))?;
/// let payload = model.infer(image)?;
/// println!("{}", payload);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FlowModel {
    executor: GraphExecutor,
    templates_dir: Option<PathBuf>,
}

impl FlowModel {
    /// Compiles `description` against `backend`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a known node has invalid properties.
    pub fn new(description: GraphDescription, backend: Arc<dyn InferenceBackend>) -> FlowResult<Self> {
        let executor = GraphExecutor::new(description, backend)?;
        Ok(Self {
            executor,
            templates_dir: None,
        })
    }

    /// Reads a graph description file and compiles it.
    pub fn load(path: impl AsRef<Path>, backend: Arc<dyn InferenceBackend>) -> FlowResult<Self> {
        let path = path.as_ref();
        info!("loading graph from {}", path.display());
        Self::new(GraphDescription::from_path(path)?, backend)
    }

    /// Compiles a graph given as JSON text.
    pub fn from_json(text: &str, backend: Arc<dyn InferenceBackend>) -> FlowResult<Self> {
        Self::new(GraphDescription::from_json_str(text)?, backend)
    }

    /// Sets the templates directory placed in every run's context.
    pub fn with_templates_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.templates_dir = Some(dir.into());
        self
    }

    pub fn executor(&self) -> &GraphExecutor {
        &self.executor
    }

    /// A fresh context preloaded with the model's defaults.
    pub fn context(&self) -> ExecutionContext {
        let mut ctx = ExecutionContext::new();
        ctx.templates_dir = self.templates_dir.clone();
        ctx
    }

    /// Runs the graph once with a caller-prepared context and returns the
    /// node output table.
    pub fn run(&self, ctx: &mut ExecutionContext) -> FlowResult<BTreeMap<i64, NodeRecord>> {
        self.executor.run(ctx)
    }

    /// Runs the graph on one image.
    ///
    /// # Returns
    ///
    /// The payload of the last `output/return_json` node if the graph has
    /// one; otherwise the original-space detections of the last executed node
    /// as `{"node_id", "results": [{index, origin_index, detections}]}`.
    pub fn infer(&self, image: RgbImage) -> FlowResult<Value> {
        let mut ctx = self.context();
        ctx.frontend_image = Some(Arc::new(image));
        self.infer_with(ctx)
    }

    /// Like [`infer`](Self::infer), with a caller-built context.
    pub fn infer_with(&self, mut ctx: ExecutionContext) -> FlowResult<Value> {
        let records = self.executor.run(&mut ctx)?;
        if let Some(payload) = ctx.return_json.last.take() {
            return Ok(payload);
        }
        self.last_node_payload(&records)
    }

    /// Runs the graph on several images in parallel, one independent run per
    /// image. Results keep the input order.
    pub fn infer_batch(&self, images: Vec<RgbImage>) -> Vec<FlowResult<Value>> {
        debug!("running graph on {} images", images.len());
        images
            .into_par_iter()
            .map(|image| self.infer(image))
            .collect()
    }

    /// Asks the backend to load every model the graph references.
    pub fn load_models(&self) -> ModelLoadReport {
        self.executor.load_models()
    }

    fn last_node_payload(&self, records: &BTreeMap<i64, NodeRecord>) -> FlowResult<Value> {
        let last = self
            .executor
            .description()
            .sorted()
            .into_iter()
            .rev()
            .find_map(|spec| records.get(&spec.id).map(|record| (spec.id, record)));
        let Some((node_id, record)) = last else {
            return Ok(json!({ "results": [] }));
        };

        let mut results = Vec::with_capacity(record.results.len());
        for entry in &record.results {
            let detections = entry.original_detections()?;
            results.push(json!({
                "index": entry.index,
                "origin_index": entry.origin_index,
                "detections": serde_json::to_value(&detections)?,
            }));
        }
        Ok(json!({ "node_id": node_id, "results": results }))
    }
}
