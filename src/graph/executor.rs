//! Ordered execution of a node graph.
//!
//! Nodes run strictly one after another in `(order, id)` order. Before a node
//! runs, each of its connected input ports pulls a list (or a scalar) from the
//! output of the node that feeds it; afterwards the node's outputs are kept
//! for downstream consumers and a [`NodeRecord`] is added to the run's output
//! table.

use crate::core::config::lenient;
use crate::core::errors::{FlowError, FlowResult};
use crate::graph::channel::{NodeInputs, NodeOutput, NodeRecord, ScalarValue};
use crate::graph::context::ExecutionContext;
use crate::graph::description::{GraphDescription, NodeSpec, PortKind};
use crate::graph::registry::{FlowNode, NodeContext, NodeKind};
use crate::inference::InferenceBackend;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct CompiledNode {
    spec: NodeSpec,
    kind: Option<NodeKind>,
    handler: Option<Box<dyn FlowNode>>,
}

struct Executed {
    output: NodeOutput,
    scalars: BTreeMap<usize, ScalarValue>,
}

/// Per-model line of a [`ModelLoadReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelLoadItem {
    pub node_id: i64,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub title: String,
    pub model_path: String,
    /// 0 on success, 1 on failure.
    pub status_code: i32,
    pub status_message: String,
}

/// Outcome of [`GraphExecutor::load_models`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelLoadReport {
    pub code: i32,
    pub message: String,
    pub models: Vec<ModelLoadItem>,
}

impl ModelLoadReport {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Runs a validated graph against an inference backend.
pub struct GraphExecutor {
    description: GraphDescription,
    nodes: Vec<CompiledNode>,
    /// link id → (source node id, source output index)
    links: HashMap<i64, (i64, usize)>,
    backend: Arc<dyn InferenceBackend>,
}

impl std::fmt::Debug for GraphExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphExecutor")
            .field("nodes", &self.nodes.len())
            .field("links", &self.links.len())
            .finish_non_exhaustive()
    }
}

impl GraphExecutor {
    /// Compiles a graph: resolves every type tag, builds and validates the
    /// handler of every known node and indexes the links.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` naming the node whose properties are invalid.
    /// Unknown type tags are not errors.
    pub fn new(description: GraphDescription, backend: Arc<dyn InferenceBackend>) -> FlowResult<Self> {
        let mut nodes = Vec::with_capacity(description.nodes.len());
        for spec in description.sorted() {
            let kind = NodeKind::from_tag(&spec.type_tag);
            let handler = match kind {
                Some(kind) => Some(kind.build(&spec.properties).map_err(|e| {
                    FlowError::config_error(format!(
                        "node {} ('{}'): {}",
                        spec.id, spec.type_tag, e
                    ))
                })?),
                None => {
                    warn!(
                        "node {} has unknown type '{}' and will be skipped",
                        spec.id, spec.type_tag
                    );
                    None
                }
            };
            nodes.push(CompiledNode {
                spec: spec.clone(),
                kind,
                handler,
            });
        }

        let mut links = HashMap::new();
        for node in &nodes {
            for (index, port) in node.spec.outputs.iter().enumerate() {
                for &link in &port.links {
                    links.entry(link).or_insert((node.spec.id, index));
                }
            }
        }

        debug!(
            "compiled graph with {} nodes and {} links",
            nodes.len(),
            links.len()
        );
        Ok(Self {
            description,
            nodes,
            links,
            backend,
        })
    }

    pub fn description(&self) -> &GraphDescription {
        &self.description
    }

    pub fn backend(&self) -> &Arc<dyn InferenceBackend> {
        &self.backend
    }

    /// Runs every node once.
    ///
    /// # Returns
    ///
    /// The output table: node id → main outputs and coerced scalars. Skipped
    /// nodes have no entry.
    ///
    /// # Errors
    ///
    /// The first handler error aborts the run and is returned unchanged.
    pub fn run(&self, ctx: &mut ExecutionContext) -> FlowResult<BTreeMap<i64, NodeRecord>> {
        let mut executed: HashMap<i64, Executed> = HashMap::new();
        let mut records = BTreeMap::new();
        let mut skipped = 0usize;

        for node in &self.nodes {
            let Some(handler) = &node.handler else {
                debug!("skipping node {} ('{}')", node.spec.id, node.spec.type_tag);
                skipped += 1;
                continue;
            };
            let inputs = self.gather_inputs(&node.spec, &executed);
            debug!(
                "running node {} ('{}'): {} images, {} result entries, {} extra channels",
                node.spec.id,
                node.spec.type_tag,
                inputs.main.images.len(),
                inputs.main.results.len(),
                inputs.extra.len()
            );

            let mut node_ctx = NodeContext {
                node_id: node.spec.id,
                backend: self.backend.as_ref(),
                run: &mut *ctx,
            };
            let output = handler.process(inputs, &mut node_ctx)?;
            let scalars = Self::scalar_outputs(&node.spec, &output);

            records.insert(
                node.spec.id,
                NodeRecord {
                    images: output.main.images.clone(),
                    results: output.main.results.clone(),
                    templates: output.main.templates.clone(),
                    scalars_by_index: scalars.clone(),
                },
            );
            executed.insert(node.spec.id, Executed { output, scalars });
        }

        info!(
            "graph run finished: {} nodes executed, {} skipped",
            records.len(),
            skipped
        );
        Ok(records)
    }

    fn gather_inputs(&self, spec: &NodeSpec, executed: &HashMap<i64, Executed>) -> NodeInputs {
        let mut inputs = NodeInputs::default();
        for (index, port) in spec.inputs.iter().enumerate() {
            let Some(link) = port.link else {
                continue;
            };
            let Some(&(source, source_index)) = self.links.get(&link) else {
                debug!("node {} input {}: link {} has no source", spec.id, index, link);
                continue;
            };
            let Some(upstream) = executed.get(&source) else {
                debug!(
                    "node {} input {}: source node {} produced nothing",
                    spec.id, index, source
                );
                continue;
            };

            let kind = port.kind();
            if kind.is_scalar() {
                if let Some(value) = upstream.scalars.get(&source_index) {
                    inputs.scalars_by_index.insert(index, value.clone());
                    if !port.name.is_empty() {
                        inputs.scalars_by_name.insert(port.name.clone(), value.clone());
                    }
                }
                continue;
            }

            let Some(channel) = upstream.output.pair(source_index / 2) else {
                continue;
            };
            let target = inputs.pair_mut(index / 2);
            match kind {
                PortKind::Images => target.images = channel.images.clone(),
                PortKind::Results => target.results = channel.results.clone(),
                PortKind::Templates => target.templates = channel.templates.clone(),
                PortKind::Scalar(_) | PortKind::Other => {}
            }
        }
        inputs
    }

    /// Matches scalar output ports against the handler's named scalars (by
    /// port name, then by port index) and coerces to the declared type.
    fn scalar_outputs(spec: &NodeSpec, output: &NodeOutput) -> BTreeMap<usize, ScalarValue> {
        spec.outputs
            .iter()
            .enumerate()
            .filter_map(|(index, port)| match port.kind() {
                PortKind::Scalar(kind) => {
                    let value = (!port.name.is_empty())
                        .then(|| output.scalars.get(&port.name))
                        .flatten()
                        .or_else(|| output.scalars.get(&index.to_string()))
                        .map_or_else(|| ScalarValue::zero(kind), |v| v.coerce(kind));
                    Some((index, value))
                }
                _ => None,
            })
            .collect()
    }

    /// Asks the backend to load the model of every `model/*` node.
    pub fn load_models(&self) -> ModelLoadReport {
        let mut models = Vec::new();
        for node in &self.nodes {
            if !node.kind.is_some_and(|k| k.is_model()) {
                continue;
            }
            let model_path = node
                .spec
                .properties
                .get("model_path")
                .and_then(lenient::as_string)
                .unwrap_or_default();
            let (status_code, status_message) = if model_path.trim().is_empty() {
                (1, "model_path is empty".to_string())
            } else {
                match self.backend.load(&model_path) {
                    Ok(()) => (0, "ok".to_string()),
                    Err(e) => (1, e.to_string()),
                }
            };
            models.push(ModelLoadItem {
                node_id: node.spec.id,
                type_tag: node.spec.type_tag.clone(),
                title: node.spec.title.clone(),
                model_path,
                status_code,
                status_message,
            });
        }

        let failures = models.iter().filter(|m| m.status_code != 0).count();
        let (code, message) = if failures == 0 {
            (0, "all models loaded".to_string())
        } else {
            (1, format!("models loaded with {} error(s)", failures))
        };
        info!("{} ({} model nodes)", message, models.len());
        ModelLoadReport {
            code,
            message,
            models,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Detection;
    use crate::geometry::Rect;
    use crate::inference::{BackendError, InferParams, ModelTask};
    use image::RgbImage;
    use serde_json::json;
    use std::sync::Mutex;

    /// Returns one box per call and records every model path it sees.
    #[derive(Default)]
    struct FakeBackend {
        calls: Mutex<Vec<String>>,
    }

    impl InferenceBackend for FakeBackend {
        fn infer(
            &self,
            model_path: &str,
            _task: ModelTask,
            _image: &RgbImage,
            _params: &InferParams,
        ) -> Result<Vec<Detection>, BackendError> {
            self.calls.lock().unwrap().push(model_path.to_string());
            Ok(vec![Detection::axis(
                1,
                "scratch",
                0.9,
                Rect::new(10.0, 10.0, 20.0, 20.0),
            )])
        }

        fn load(&self, model_path: &str) -> Result<(), BackendError> {
            if model_path.ends_with(".onnx") {
                Ok(())
            } else {
                Err(format!("cannot open {}", model_path).into())
            }
        }
    }

    fn graph(nodes: Vec<NodeSpec>) -> GraphDescription {
        GraphDescription::new(nodes)
    }

    fn detect_graph(middle: NodeSpec) -> GraphDescription {
        graph(vec![
            NodeSpec::new(1, 0, "input/frontend_image")
                .with_output("image_chan", &[10])
                .with_output("result_chan", &[11]),
            middle,
            NodeSpec::new(3, 2, "model/det")
                .with_property("model_path", json!("det.onnx"))
                .with_input("image_chan", Some(10))
                .with_input("result_chan", Some(11))
                .with_output("image_chan", &[])
                .with_output("result_chan", &[12]),
            NodeSpec::new(4, 3, "output/return_json")
                .with_input("image_chan", Some(10))
                .with_input("result_chan", Some(12)),
        ])
    }

    #[test]
    fn test_unknown_node_is_skipped() {
        let backend = Arc::new(FakeBackend::default());
        let desc = detect_graph(NodeSpec::new(2, 1, "features/not_a_node"));
        let executor = GraphExecutor::new(desc, backend.clone()).unwrap();
        let mut ctx = ExecutionContext::new().with_image(RgbImage::new(64, 48));

        let records = executor.run(&mut ctx).unwrap();
        assert!(!records.contains_key(&2));
        assert!(records.contains_key(&3));
        assert!(records.contains_key(&4));
        assert_eq!(records[&3].results[0].detections.len(), 1);
        assert_eq!(backend.calls.lock().unwrap().as_slice(), ["det.onnx"]);

        let payload = ctx.return_json.last.unwrap();
        assert_eq!(payload["by_image"][0]["results"][0]["bbox"], json!([10, 10, 30, 30]));
    }

    #[test]
    fn test_dangling_link_is_ignored() {
        let desc = graph(vec![
            NodeSpec::new(1, 0, "output/preview")
                .with_input("image_chan", Some(99))
                .with_output("image_chan", &[1]),
        ]);
        let executor = GraphExecutor::new(desc, Arc::new(FakeBackend::default())).unwrap();
        let records = executor.run(&mut ExecutionContext::new()).unwrap();
        assert!(records[&1].images.is_empty());
    }

    #[test]
    fn test_scalar_and_extra_routing() {
        let desc = graph(vec![
            NodeSpec::new(1, 0, "input/frontend_image")
                .with_output("image_chan", &[10])
                .with_output("result_chan", &[11]),
            NodeSpec::new(2, 1, "model/det")
                .with_property("model_path", json!("det.onnx"))
                .with_input("image_chan", Some(10))
                .with_input("result_chan", Some(11))
                .with_output("image_chan", &[20])
                .with_output("result_chan", &[21]),
            NodeSpec::new(3, 2, "features/result_filter")
                .with_property("categories", json!(["dent"]))
                .with_input("image_chan", Some(20))
                .with_input("result_chan", Some(21))
                .with_output("image_chan", &[])
                .with_output("result_chan", &[])
                .with_output("image_chan", &[30])
                .with_output("result_chan", &[31])
                .with_output("bool", &[32])
                .named("has_positive"),
            NodeSpec::new(4, 3, "output/preview")
                .with_input("image_chan", Some(30))
                .with_input("result_chan", Some(31))
                .with_input("int", Some(32)),
        ]);
        let executor = GraphExecutor::new(desc, Arc::new(FakeBackend::default())).unwrap();
        let mut ctx = ExecutionContext::new().with_image(RgbImage::new(64, 48));
        let records = executor.run(&mut ctx).unwrap();

        assert_eq!(records[&3].scalars_by_index.get(&4), Some(&ScalarValue::Bool(false)));
        assert!(records[&3].results.is_empty());
        // The rejected "scratch" box travels on the extra pair.
        let preview = &records[&4];
        assert_eq!(preview.results.len(), 1);
        assert_eq!(preview.results[0].detections[0].category_name, "scratch");
    }

    #[test]
    fn test_invalid_config_names_node() {
        let desc = graph(vec![
            NodeSpec::new(7, 0, "features/sliding_window").with_property("window_size", json!([0, 0])),
        ]);
        let err = GraphExecutor::new(desc, Arc::new(FakeBackend::default())).unwrap_err();
        assert!(matches!(err, FlowError::ConfigError { .. }));
        assert!(err.to_string().contains("node 7"));
    }

    #[test]
    fn test_load_models_report() {
        let desc = graph(vec![
            NodeSpec::new(1, 0, "model/det").with_property("model_path", json!("a.onnx")),
            NodeSpec::new(2, 1, "model/cls").with_property("model_path", json!("b.bin")),
            NodeSpec::new(3, 2, "model/ocr"),
            NodeSpec::new(4, 3, "output/preview"),
        ]);
        let executor = GraphExecutor::new(desc, Arc::new(FakeBackend::default())).unwrap();
        let report = executor.load_models();
        assert!(!report.is_ok());
        assert_eq!(report.models.len(), 3);
        assert_eq!(report.message, "models loaded with 2 error(s)");
        assert_eq!(report.models[0].status_code, 0);
        assert!(report.models[1].status_message.contains("b.bin"));
        assert_eq!(report.models[2].status_message, "model_path is empty");
    }
}
