//! The declarative graph description.
//!
//! A description is a list of nodes, each with an id, an execution `order`, a
//! type tag, a property bag and ordered input/output ports. Links are implied
//! by the ids stored on the ports: an input port names the one link feeding
//! it, an output port lists the links it feeds.

use crate::core::config::lenient;
use crate::core::errors::{FlowError, FlowResult};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Order assigned to nodes that do not declare one.
pub const DEFAULT_ORDER: i32 = i32::MAX - 1;

fn default_order() -> i32 {
    DEFAULT_ORDER
}

fn de_order<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(lenient::as_i64(&value)
        .and_then(|v| i32::try_from(v).ok())
        .unwrap_or(DEFAULT_ORDER))
}

fn de_link<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(lenient::as_i64(&value))
}

fn de_links<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<i64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items.iter().filter_map(lenient::as_i64).collect(),
        other => lenient::as_i64(&other).into_iter().collect(),
    })
}

/// Primitive type of a scalar port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Bool,
    Int,
    Str,
}

/// What a port carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    /// The image list of a channel.
    Images,
    /// The result list of a channel.
    Results,
    /// The template list of a channel.
    Templates,
    /// A single coerced value.
    Scalar(ScalarKind),
    /// Any other channel-like type; carries nothing the executor routes.
    Other,
}

impl PortKind {
    /// Classifies a port `type` string, case-insensitively.
    pub fn classify(port_type: &str) -> Self {
        match port_type.trim().to_ascii_lowercase().as_str() {
            "bool" | "boolean" => PortKind::Scalar(ScalarKind::Bool),
            "int" | "integer" => PortKind::Scalar(ScalarKind::Int),
            "str" | "string" | "scalar" => PortKind::Scalar(ScalarKind::Str),
            "image_chan" | "image" | "image_list" => PortKind::Images,
            "result_chan" | "result" | "result_list" => PortKind::Results,
            "template_chan" | "template" | "template_list" => PortKind::Templates,
            _ => PortKind::Other,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, PortKind::Scalar(_))
    }
}

/// An input port: at most one incoming link.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputPort {
    #[serde(rename = "type", default, deserialize_with = "lenient::de_string")]
    pub port_type: String,
    #[serde(default, deserialize_with = "de_link")]
    pub link: Option<i64>,
    #[serde(default, deserialize_with = "lenient::de_string")]
    pub name: String,
}

impl InputPort {
    pub fn kind(&self) -> PortKind {
        PortKind::classify(&self.port_type)
    }
}

/// An output port: any number of outgoing links.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputPort {
    #[serde(rename = "type", default, deserialize_with = "lenient::de_string")]
    pub port_type: String,
    #[serde(default, deserialize_with = "de_links")]
    pub links: Vec<i64>,
    #[serde(default, deserialize_with = "lenient::de_string")]
    pub name: String,
}

impl OutputPort {
    pub fn kind(&self) -> PortKind {
        PortKind::classify(&self.port_type)
    }
}

/// One node of the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(deserialize_with = "lenient::de_i64")]
    pub id: i64,
    #[serde(default = "default_order", deserialize_with = "de_order")]
    pub order: i32,
    #[serde(rename = "type", default, deserialize_with = "lenient::de_string")]
    pub type_tag: String,
    #[serde(default, deserialize_with = "lenient::de_string")]
    pub title: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub inputs: Vec<InputPort>,
    #[serde(default)]
    pub outputs: Vec<OutputPort>,
}

impl NodeSpec {
    /// Creates a node with no ports and no properties.
    pub fn new(id: i64, order: i32, type_tag: impl Into<String>) -> Self {
        Self {
            id,
            order,
            type_tag: type_tag.into(),
            title: String::new(),
            properties: Map::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_input(mut self, port_type: &str, link: Option<i64>) -> Self {
        self.inputs.push(InputPort {
            port_type: port_type.to_string(),
            link,
            name: String::new(),
        });
        self
    }

    pub fn with_output(mut self, port_type: &str, links: &[i64]) -> Self {
        self.outputs.push(OutputPort {
            port_type: port_type.to_string(),
            links: links.to_vec(),
            name: String::new(),
        });
        self
    }

    /// Names the most recently added output port.
    pub fn named(mut self, name: &str) -> Self {
        if let Some(port) = self.outputs.last_mut() {
            port.name = name.to_string();
        }
        self
    }

    /// Sort key of the declared execution order.
    pub fn sort_key(&self) -> (i32, i64) {
        (self.order, self.id)
    }

    /// Drops `null` properties and derives `bbox_x/y/w/h` from
    /// `bbox_x1/y1/x2/y2` when all four corners are present.
    pub fn normalize_properties(&mut self) {
        self.properties.retain(|_, v| !v.is_null());

        let corner = |key: &str| self.properties.get(key).and_then(lenient::as_f64);
        let (Some(x1), Some(y1), Some(x2), Some(y2)) = (
            corner("bbox_x1"),
            corner("bbox_y1"),
            corner("bbox_x2"),
            corner("bbox_y2"),
        ) else {
            return;
        };
        let derived = [
            ("bbox_x", x1.min(x2)),
            ("bbox_y", y1.min(y2)),
            ("bbox_w", (x2 - x1).abs()),
            ("bbox_h", (y2 - y1).abs()),
        ];
        for (key, value) in derived {
            if !self.properties.contains_key(key) {
                self.properties.insert(key.to_string(), Value::from(value));
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDescription {
    Wrapped { nodes: Vec<NodeSpec> },
    Bare(Vec<NodeSpec>),
}

/// A whole graph.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphDescription {
    pub nodes: Vec<NodeSpec>,
}

impl GraphDescription {
    pub fn new(nodes: Vec<NodeSpec>) -> Self {
        let mut description = Self { nodes };
        for node in &mut description.nodes {
            node.normalize_properties();
        }
        description
    }

    /// Parses `{"nodes": [...]}` or a bare node array.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when the document is not valid JSON or does not
    /// have either shape.
    pub fn from_json_str(text: &str) -> FlowResult<Self> {
        let raw: RawDescription = serde_json::from_str(text)?;
        Ok(Self::from_raw(raw))
    }

    /// Same as [`from_json_str`](Self::from_json_str) for an already parsed value.
    pub fn from_value(value: Value) -> FlowResult<Self> {
        let raw: RawDescription = serde_json::from_value(value)?;
        Ok(Self::from_raw(raw))
    }

    /// Reads and parses a description file.
    pub fn from_path(path: &Path) -> FlowResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FlowError::config_error(format!(
                "failed to read graph '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&text)
    }

    fn from_raw(raw: RawDescription) -> Self {
        match raw {
            RawDescription::Wrapped { nodes } | RawDescription::Bare(nodes) => Self::new(nodes),
        }
    }

    /// Nodes in execution order: by `order`, then by id.
    pub fn sorted(&self) -> Vec<&NodeSpec> {
        let mut nodes: Vec<&NodeSpec> = self.nodes.iter().collect();
        nodes.sort_by_key(|n| n.sort_key());
        nodes
    }

    /// The node that runs last.
    pub fn last_node(&self) -> Option<&NodeSpec> {
        self.nodes.iter().max_by_key(|n| n.sort_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_wrapped_and_bare() {
        let doc = json!({"nodes": [{"id": 1, "type": "input/image"}]});
        let wrapped = GraphDescription::from_value(doc).unwrap();
        assert_eq!(wrapped.nodes.len(), 1);
        assert_eq!(wrapped.nodes[0].order, DEFAULT_ORDER);

        let bare = GraphDescription::from_json_str(
            r#"[{"id": "2", "order": "3", "type": "model/det",
                 "inputs": [{"type": "image_chan", "link": null}],
                 "outputs": [{"type": "result_chan", "links": [4, 5]}]}]"#,
        )
        .unwrap();
        let node = &bare.nodes[0];
        assert_eq!((node.id, node.order), (2, 3));
        assert_eq!(node.inputs[0].link, None);
        assert_eq!(node.outputs[0].links, vec![4, 5]);
        assert_eq!(node.outputs[0].kind(), PortKind::Results);
    }

    #[test]
    fn test_sorted_by_order_then_id() {
        let desc = GraphDescription::new(vec![
            NodeSpec::new(5, 1, "a"),
            NodeSpec::new(2, 2, "b"),
            NodeSpec::new(3, 1, "c"),
        ]);
        let ids: Vec<i64> = desc.sorted().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![3, 5, 2]);
        assert_eq!(desc.last_node().map(|n| n.id), Some(2));
    }

    #[test]
    fn test_port_classification() {
        assert_eq!(PortKind::classify("Boolean"), PortKind::Scalar(ScalarKind::Bool));
        assert_eq!(PortKind::classify("INT"), PortKind::Scalar(ScalarKind::Int));
        assert_eq!(PortKind::classify("scalar"), PortKind::Scalar(ScalarKind::Str));
        assert_eq!(PortKind::classify("template"), PortKind::Templates);
        assert_eq!(PortKind::classify("image_chan"), PortKind::Images);
        assert_eq!(PortKind::classify("mystery"), PortKind::Other);
    }

    #[test]
    fn test_bbox_corner_normalization() {
        let node = NodeSpec::new(1, 0, "input/build_results")
            .with_property("bbox_x1", json!(50))
            .with_property("bbox_y1", json!("40"))
            .with_property("bbox_x2", json!(10))
            .with_property("bbox_y2", json!(100))
            .with_property("bbox_w", json!(7))
            .with_property("unset", Value::Null);
        let desc = GraphDescription::new(vec![node]);
        let props = &desc.nodes[0].properties;
        assert_eq!(props["bbox_x"], json!(10.0));
        assert_eq!(props["bbox_y"], json!(40.0));
        assert_eq!(props["bbox_w"], json!(7));
        assert_eq!(props["bbox_h"], json!(60.0));
        assert!(!props.contains_key("unset"));
    }
}
