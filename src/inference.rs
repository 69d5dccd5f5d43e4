//! The boundary with the neural-network runtime.
//!
//! Model nodes never run a network themselves. They hand each image to an
//! [`InferenceBackend`] together with the model path and the task the node
//! was declared for, and receive plain [`Detection`] records back. Embedders
//! plug their runtime in by implementing the trait; [`NullBackend`] is the
//! do-nothing implementation used by the CLI.

use crate::detection::Detection;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error type returned by backends.
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// The kind of model a `model/*` node drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTask {
    /// Axis-aligned object detection.
    Det,
    /// Oriented-box detection.
    RotatedBbox,
    /// Instance segmentation.
    InstanceSeg,
    /// Semantic segmentation.
    SemanticSeg,
    /// Whole-image classification.
    Cls,
    /// Text recognition.
    Ocr,
}

impl ModelTask {
    /// Returns `true` for tasks whose results are labels of the whole input
    /// image rather than localized objects.
    pub fn is_whole_image(&self) -> bool {
        matches!(self, ModelTask::Cls | ModelTask::Ocr)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTask::Det => "det",
            ModelTask::RotatedBbox => "rotated_bbox",
            ModelTask::InstanceSeg => "instance_seg",
            ModelTask::SemanticSeg => "semantic_seg",
            ModelTask::Cls => "cls",
            ModelTask::Ocr => "ocr",
        }
    }
}

impl fmt::Display for ModelTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call inference parameters forwarded from the node properties.
///
/// Every field is optional; a backend applies its own default for anything
/// left unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iou_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_polygon: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epsilon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<i64>,
}

/// A synchronous inference collaborator.
///
/// Implementations must be `Send + Sync`: one backend instance is shared by
/// every node of a graph and, with [`FlowModel::infer_batch`], by several
/// concurrent runs. Model caching is the backend's own concern.
///
/// [`FlowModel::infer_batch`]: crate::pipeline::FlowModel::infer_batch
pub trait InferenceBackend: Send + Sync {
    /// Runs `model_path` on one image.
    ///
    /// # Arguments
    ///
    /// * `model_path` - The model the node is bound to.
    /// * `task` - The task the node was declared for.
    /// * `image` - The image, in its current coordinate space.
    /// * `params` - Thresholds and limits from the node properties.
    ///
    /// # Returns
    ///
    /// Detections in the pixel space of `image`.
    fn infer(
        &self,
        model_path: &str,
        task: ModelTask,
        image: &RgbImage,
        params: &InferParams,
    ) -> Result<Vec<Detection>, BackendError>;

    /// Loads (or validates) a model ahead of the first run.
    fn load(&self, model_path: &str) -> Result<(), BackendError> {
        let _ = model_path;
        Ok(())
    }
}

/// A backend that accepts every model and never detects anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBackend;

impl InferenceBackend for NullBackend {
    fn infer(
        &self,
        _model_path: &str,
        _task: ModelTask,
        _image: &RgbImage,
        _params: &InferParams,
    ) -> Result<Vec<Detection>, BackendError> {
        Ok(Vec::new())
    }
}
