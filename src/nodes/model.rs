//! Model nodes: one backend call per image.

use crate::core::config::{ConfigError, ConfigValidator, lenient};
use crate::core::errors::{FlowError, FlowResult};
use crate::detection::BoxShape;
use crate::geometry::Rect;
use crate::graph::channel::{Channel, NodeInputs, NodeOutput, ResultEntry};
use crate::graph::registry::{FlowNode, NodeContext};
use crate::inference::{InferParams, ModelTask};
use serde::Deserialize;
use tracing::debug;

/// Configuration shared by every `model/*` node.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    #[serde(deserialize_with = "lenient::de_string")]
    pub model_path: String,
    #[serde(deserialize_with = "lenient::de_opt_f64")]
    pub threshold: Option<f64>,
    #[serde(deserialize_with = "lenient::de_opt_f64")]
    pub iou_threshold: Option<f64>,
    #[serde(deserialize_with = "lenient::de_opt_i64")]
    pub top_k: Option<i64>,
    #[serde(deserialize_with = "lenient::de_opt_bool")]
    pub return_polygon: Option<bool>,
    #[serde(deserialize_with = "lenient::de_opt_f64")]
    pub epsilon: Option<f64>,
    #[serde(deserialize_with = "lenient::de_opt_i64")]
    pub batch_size: Option<i64>,
}

impl ModelConfig {
    pub fn params(&self) -> InferParams {
        InferParams {
            threshold: self.threshold,
            iou_threshold: self.iou_threshold,
            top_k: self.top_k,
            return_polygon: self.return_polygon,
            epsilon: self.epsilon,
            batch_size: self.batch_size,
        }
    }
}

impl ConfigValidator for ModelConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.threshold {
            self.validate_unit_interval("threshold", t)?;
        }
        if let Some(t) = self.iou_threshold {
            self.validate_unit_interval("iou_threshold", t)?;
        }
        if let Some(k) = self.top_k {
            self.validate_non_negative("top_k", k as f64)?;
        }
        if let Some(b) = self.batch_size {
            self.validate_positive("batch_size", b as f64)?;
        }
        Ok(())
    }

    fn get_defaults() -> Self {
        Self::default()
    }
}

/// Runs the bound model on every input image.
///
/// Emits the input images unchanged and one result entry per image, carrying
/// that image's transform. Classification and OCR results describe the whole
/// image, so their missing or empty boxes are replaced with the image bounds.
#[derive(Debug)]
pub struct ModelNode {
    task: ModelTask,
    config: ModelConfig,
    params: InferParams,
}

impl ModelNode {
    pub fn new(task: ModelTask, config: ModelConfig) -> Self {
        let params = config.params();
        Self {
            task,
            config,
            params,
        }
    }

    pub fn task(&self) -> ModelTask {
        self.task
    }
}

impl FlowNode for ModelNode {
    fn process(&self, inputs: NodeInputs, ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput> {
        let images = inputs.main.images;
        let mut results = Vec::with_capacity(images.len());
        for (index, handle) in images.iter().enumerate() {
            let mut detections = ctx
                .backend
                .infer(&self.config.model_path, self.task, &handle.image, &self.params)
                .map_err(|e| FlowError::inference(ctx.node_id, e))?;

            if self.task.is_whole_image() {
                let full = Rect::new(0.0, 0.0, handle.width() as f64, handle.height() as f64);
                for d in detections.iter_mut().filter(|d| d.has_degenerate_box()) {
                    d.bbox = Some(BoxShape::Axis(full));
                }
            }
            debug!(
                "node {} ({}): {} detections on image {}",
                ctx.node_id,
                self.task,
                detections.len(),
                index
            );
            results.push(ResultEntry::for_image(index, handle, detections));
        }
        Ok(NodeOutput::new(Channel::new(images, results)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Detection;
    use crate::graph::context::ExecutionContext;
    use crate::graph::registry::NodeContext;
    use crate::inference::{BackendError, InferenceBackend};
    use crate::nodes::{testing, typed};
    use image::RgbImage;
    use serde_json::json;
    use std::sync::Mutex;

    struct Scripted {
        seen: Mutex<Vec<InferParams>>,
        fail: bool,
    }

    impl InferenceBackend for Scripted {
        fn infer(
            &self,
            _model_path: &str,
            _task: ModelTask,
            _image: &RgbImage,
            params: &InferParams,
        ) -> Result<Vec<Detection>, BackendError> {
            if self.fail {
                return Err("device lost".into());
            }
            self.seen.lock().unwrap().push(params.clone());
            Ok(vec![
                Detection::label(2, "NG", 0.8),
                Detection::axis(1, "OK", 0.7, Rect::new(1.0, 1.0, 2.0, 2.0)),
            ])
        }
    }

    fn run(node: &ModelNode, backend: &Scripted, inputs: NodeInputs) -> FlowResult<NodeOutput> {
        let mut run = ExecutionContext::new();
        let mut ctx = NodeContext {
            node_id: 5,
            backend,
            run: &mut run,
        };
        node.process(inputs, &mut ctx)
    }

    #[test]
    fn test_cls_gets_full_image_boxes() {
        let config: ModelConfig = typed(
            json!({"model_path": "cls.onnx", "threshold": "0.4", "top_k": 1})
                .as_object()
                .unwrap(),
        )
        .unwrap();
        let node = ModelNode::new(ModelTask::Cls, config);
        let backend = Scripted {
            seen: Mutex::new(Vec::new()),
            fail: false,
        };
        let out = run(&node, &backend, NodeInputs::new(testing::single(30, 20, Vec::new()))).unwrap();

        let entry = &out.main.results[0];
        assert_eq!(entry.index, 0);
        assert!(entry.transform.is_some());
        assert_eq!(
            entry.detections[0].bbox,
            Some(BoxShape::Axis(Rect::new(0.0, 0.0, 30.0, 20.0)))
        );
        assert_eq!(
            entry.detections[1].bbox,
            Some(BoxShape::Axis(Rect::new(1.0, 1.0, 2.0, 2.0)))
        );
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].threshold, Some(0.4));
        assert_eq!(seen[0].top_k, Some(1));
    }

    #[test]
    fn test_det_keeps_label_only_results() {
        let node = ModelNode::new(ModelTask::Det, ModelConfig::default());
        let backend = Scripted {
            seen: Mutex::new(Vec::new()),
            fail: false,
        };
        let out = run(&node, &backend, NodeInputs::new(testing::single(30, 20, Vec::new()))).unwrap();
        assert!(out.main.results[0].detections[0].bbox.is_none());
    }

    #[test]
    fn test_backend_error_names_node() {
        let node = ModelNode::new(ModelTask::Det, ModelConfig::default());
        let backend = Scripted {
            seen: Mutex::new(Vec::new()),
            fail: true,
        };
        let err = run(&node, &backend, NodeInputs::new(testing::single(4, 4, Vec::new()))).unwrap_err();
        assert!(matches!(err, FlowError::Inference { node_id: 5, .. }));
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let props = json!({"threshold": 1.5});
        assert!(typed::<ModelConfig>(props.as_object().unwrap()).is_err());
    }
}
