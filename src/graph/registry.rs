//! The closed set of node kinds and their construction.
//!
//! Type tags are resolved through a static table built on first use. Tags of
//! processing nodes are accepted under each of the `features/`,
//! `pre_process/` and `post_process/` prefixes. Building a node turns its
//! property bag into the kind's typed configuration and validates it, so a
//! bad configuration fails when the graph is loaded, not when it runs.

use crate::core::errors::FlowResult;
use crate::graph::channel::{NodeInputs, NodeOutput};
use crate::graph::context::ExecutionContext;
use crate::inference::{InferenceBackend, ModelTask};
use crate::nodes::{self, geometry, input, model, output, results, sliding, template};
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Prefixes under which processing-node tags are registered.
pub const PROCESSING_PREFIXES: [&str; 3] = ["features/", "pre_process/", "post_process/"];

/// What a handler sees besides its inputs.
pub struct NodeContext<'a> {
    /// Id of the node being run.
    pub node_id: i64,
    pub backend: &'a dyn InferenceBackend,
    pub run: &'a mut ExecutionContext,
}

impl fmt::Debug for NodeContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

/// A node handler.
///
/// Handlers are built once per graph and shared by every run, so they hold
/// only their validated configuration.
pub trait FlowNode: Send + Sync + fmt::Debug {
    /// Runs the node on its aggregated inputs.
    fn process(&self, inputs: NodeInputs, ctx: &mut NodeContext<'_>) -> FlowResult<NodeOutput>;
}

/// Every node kind the executor knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    InputImage,
    InputFrontendImage,
    InputBuildResults,
    Model(ModelTask),
    SlidingWindow,
    SlidingMerge,
    ImageGeneration,
    CoordinateCrop,
    ImageFlip,
    ImageRotateByCls,
    MaskToRbox,
    RboxCorrection,
    MergeResults,
    ResultFilter,
    ResultFilterAdvanced,
    ResultFilterRegion,
    ResultFilterRegionGlobal,
    TextReplacement,
    ResultLabelMerge,
    TemplateFromResults,
    TemplateSave,
    TemplateLoad,
    TemplateMatch,
    ReturnJson,
    Preview,
    SaveImage,
    Visualize,
    VisualizeLocal,
}

static FIXED_TAGS: &[(&str, NodeKind)] = &[
    ("input/image", NodeKind::InputImage),
    ("input/frontend_image", NodeKind::InputFrontendImage),
    ("input/build_results", NodeKind::InputBuildResults),
    ("model/det", NodeKind::Model(ModelTask::Det)),
    ("model/rotated_bbox", NodeKind::Model(ModelTask::RotatedBbox)),
    ("model/instance_seg", NodeKind::Model(ModelTask::InstanceSeg)),
    ("model/semantic_seg", NodeKind::Model(ModelTask::SemanticSeg)),
    ("model/cls", NodeKind::Model(ModelTask::Cls)),
    ("model/ocr", NodeKind::Model(ModelTask::Ocr)),
    ("output/return_json", NodeKind::ReturnJson),
    ("output/preview", NodeKind::Preview),
    ("output/save_image", NodeKind::SaveImage),
    ("output/visualize", NodeKind::Visualize),
    ("output/visualize_local", NodeKind::VisualizeLocal),
];

static PROCESSING_TAGS: &[(&str, NodeKind)] = &[
    ("sliding_window", NodeKind::SlidingWindow),
    ("sliding_merge", NodeKind::SlidingMerge),
    ("image_generation", NodeKind::ImageGeneration),
    ("coordinate_crop", NodeKind::CoordinateCrop),
    ("image_flip", NodeKind::ImageFlip),
    ("image_rotate_by_cls", NodeKind::ImageRotateByCls),
    ("mask_to_rbox", NodeKind::MaskToRbox),
    ("rbox_correction", NodeKind::RboxCorrection),
    ("merge_results", NodeKind::MergeResults),
    ("result_filter", NodeKind::ResultFilter),
    ("result_filter_advanced", NodeKind::ResultFilterAdvanced),
    ("result_filter_region", NodeKind::ResultFilterRegion),
    ("result_filter_region_global", NodeKind::ResultFilterRegionGlobal),
    ("text_replacement", NodeKind::TextReplacement),
    ("result_label_merge", NodeKind::ResultLabelMerge),
    ("template_from_results", NodeKind::TemplateFromResults),
    ("template_save", NodeKind::TemplateSave),
    ("template_load", NodeKind::TemplateLoad),
    ("template_match", NodeKind::TemplateMatch),
    ("printed_template_match", NodeKind::TemplateMatch),
];

static REGISTRY: Lazy<HashMap<String, NodeKind>> = Lazy::new(|| {
    let mut table: HashMap<String, NodeKind> = FIXED_TAGS
        .iter()
        .map(|(tag, kind)| (tag.to_string(), *kind))
        .collect();
    for prefix in PROCESSING_PREFIXES {
        for (tag, kind) in PROCESSING_TAGS {
            table.insert(format!("{}{}", prefix, tag), *kind);
        }
    }
    table
});

impl NodeKind {
    /// Resolves a type tag; `None` for tags with no handler.
    pub fn from_tag(tag: &str) -> Option<Self> {
        REGISTRY.get(tag.trim()).copied()
    }

    /// Every registered tag, sorted.
    pub fn registered_tags() -> Vec<&'static str> {
        let mut tags: Vec<&'static str> = REGISTRY.keys().map(|k| k.as_str()).collect();
        tags.sort_unstable();
        tags
    }

    pub fn is_model(&self) -> bool {
        matches!(self, NodeKind::Model(_))
    }

    /// Builds the handler from a node's property bag.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the properties do not decode into the kind's
    /// configuration or the configuration fails validation.
    pub fn build(self, properties: &Map<String, Value>) -> FlowResult<Box<dyn FlowNode>> {
        let props = properties;
        Ok(match self {
            NodeKind::InputImage => Box::new(input::InputImageNode::new(nodes::typed(props)?)),
            NodeKind::InputFrontendImage => {
                Box::new(input::FrontendImageNode::new(nodes::typed(props)?))
            }
            NodeKind::InputBuildResults => {
                Box::new(input::BuildResultsNode::new(nodes::typed(props)?))
            }
            NodeKind::Model(task) => Box::new(model::ModelNode::new(task, nodes::typed(props)?)),
            NodeKind::SlidingWindow => {
                Box::new(sliding::SlidingWindowNode::new(nodes::typed(props)?)?)
            }
            NodeKind::SlidingMerge => {
                Box::new(sliding::SlidingMergeNode::new(nodes::typed(props)?)?)
            }
            NodeKind::ImageGeneration => {
                Box::new(geometry::ImageGenerationNode::new(nodes::typed(props)?))
            }
            NodeKind::CoordinateCrop => {
                Box::new(geometry::CoordinateCropNode::new(nodes::typed(props)?))
            }
            NodeKind::ImageFlip => Box::new(geometry::ImageFlipNode::new(nodes::typed(props)?)),
            NodeKind::ImageRotateByCls => {
                Box::new(geometry::RotateByClsNode::new(nodes::typed(props)?))
            }
            NodeKind::MaskToRbox => Box::new(geometry::MaskToRboxNode),
            NodeKind::RboxCorrection => {
                Box::new(geometry::RboxCorrectionNode::new(nodes::typed(props)?))
            }
            NodeKind::MergeResults => Box::new(results::MergeResultsNode),
            NodeKind::ResultFilter => {
                Box::new(results::ResultFilterNode::new(nodes::typed(props)?))
            }
            NodeKind::ResultFilterAdvanced => {
                Box::new(results::AdvancedFilterNode::new(nodes::typed(props)?))
            }
            NodeKind::ResultFilterRegion => {
                Box::new(results::RegionFilterNode::new(nodes::typed(props)?, false))
            }
            NodeKind::ResultFilterRegionGlobal => {
                Box::new(results::RegionFilterNode::new(nodes::typed(props)?, true))
            }
            NodeKind::TextReplacement => {
                Box::new(results::TextReplacementNode::new(nodes::typed(props)?))
            }
            NodeKind::ResultLabelMerge => {
                Box::new(results::LabelMergeNode::new(nodes::typed(props)?))
            }
            NodeKind::TemplateFromResults => {
                Box::new(template::TemplateFromResultsNode::new(nodes::typed(props)?))
            }
            NodeKind::TemplateSave => {
                Box::new(template::TemplateSaveNode::new(nodes::typed(props)?))
            }
            NodeKind::TemplateLoad => {
                Box::new(template::TemplateLoadNode::new(nodes::typed(props)?))
            }
            NodeKind::TemplateMatch => {
                Box::new(template::TemplateMatchNode::new(nodes::typed(props)?))
            }
            NodeKind::ReturnJson => Box::new(output::ReturnJsonNode),
            NodeKind::Preview => Box::new(output::PreviewNode),
            NodeKind::SaveImage => Box::new(output::SaveImageNode::new(nodes::typed(props)?)),
            NodeKind::Visualize => {
                Box::new(output::VisualizeNode::new(nodes::typed(props)?, false))
            }
            NodeKind::VisualizeLocal => {
                Box::new(output::VisualizeNode::new(nodes::typed(props)?, true))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_tags() {
        assert_eq!(NodeKind::from_tag("input/image"), Some(NodeKind::InputImage));
        assert_eq!(
            NodeKind::from_tag("model/rotated_bbox"),
            Some(NodeKind::Model(ModelTask::RotatedBbox))
        );
        for prefix in PROCESSING_PREFIXES {
            assert_eq!(
                NodeKind::from_tag(&format!("{}sliding_merge", prefix)),
                Some(NodeKind::SlidingMerge)
            );
        }
        assert_eq!(
            NodeKind::from_tag("features/printed_template_match"),
            Some(NodeKind::TemplateMatch)
        );
        assert_eq!(NodeKind::from_tag("sliding_merge"), None);
        assert_eq!(NodeKind::from_tag("features/stroke_to_points"), None);
        assert!(NodeKind::registered_tags().contains(&"output/visualize_local"));
    }

    #[test]
    fn test_build_validates_config() {
        let ok = json!({"window_size": "320,320", "overlap": [32, 32]});
        assert!(NodeKind::SlidingWindow.build(ok.as_object().unwrap()).is_ok());

        let bad = json!({"window_size": [0, 320]});
        assert!(NodeKind::SlidingWindow.build(bad.as_object().unwrap()).is_err());

        let bad_threshold = json!({"combine_ios_threshold": 3.0});
        assert!(NodeKind::SlidingMerge.build(bad_threshold.as_object().unwrap()).is_err());

        let empty = Map::new();
        for tag in NodeKind::registered_tags() {
            let kind = NodeKind::from_tag(tag).unwrap();
            assert!(kind.build(&empty).is_ok(), "{} should build from defaults", tag);
        }
    }
}
