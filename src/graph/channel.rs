//! Data carried between nodes.
//!
//! A [`Channel`] bundles three parallel lists: images, result entries and
//! templates. Every node receives a main channel plus zero or more extra
//! channels and returns the same shape in a [`NodeOutput`].

use crate::detection::Detection;
use crate::geometry::{AffineTransform, TransformState};
use crate::graph::description::ScalarKind;
use crate::template::Template;
use crate::tiling::TileDescriptor;
use image::RgbImage;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// An image together with its place in the transform graph.
#[derive(Debug, Clone)]
pub struct ImageHandle {
    /// Pixels in the current coordinate space.
    pub image: Arc<RgbImage>,
    /// The input image this one ultimately derives from.
    pub original: Arc<RgbImage>,
    /// Original → current mapping.
    pub transform: TransformState,
    /// Index of the original input image.
    pub origin_index: usize,
}

impl ImageHandle {
    /// Wraps an input image with an identity transform.
    pub fn from_original(image: RgbImage, origin_index: usize) -> Self {
        Self::from_shared(Arc::new(image), origin_index)
    }

    pub fn from_shared(image: Arc<RgbImage>, origin_index: usize) -> Self {
        let transform = TransformState::new(image.width(), image.height());
        Self {
            original: Arc::clone(&image),
            image,
            transform,
            origin_index,
        }
    }

    /// Derives a handle for `image`, produced from this one through
    /// `current_to_new`.
    pub fn derive(&self, image: RgbImage, current_to_new: &AffineTransform) -> Self {
        let transform = self
            .base_state()
            .derive_child(current_to_new, image.width(), image.height());
        Self {
            image: Arc::new(image),
            original: Arc::clone(&self.original),
            transform,
            origin_index: self.origin_index,
        }
    }

    /// The transform state, with the original size filled in when a producer
    /// left it blank.
    pub fn base_state(&self) -> TransformState {
        if self.transform.has_original_size() {
            self.transform.clone()
        } else {
            TransformState {
                original_width: self.original.width(),
                original_height: self.original.height(),
                ..self.transform.clone()
            }
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Returns `true` if this handle is an untransformed input image.
    pub fn is_original(&self) -> bool {
        self.transform.is_original()
    }

    pub fn signature(&self) -> String {
        self.transform.signature().unwrap_or_default()
    }
}

/// The detections produced for one image.
#[derive(Debug, Clone, Default)]
pub struct ResultEntry {
    /// Position of the image this entry belongs to.
    pub index: usize,
    /// Index of the original input image.
    pub origin_index: usize,
    /// Transform of the image the boxes are expressed in; `None` means
    /// original coordinates.
    pub transform: Option<TransformState>,
    pub detections: Vec<Detection>,
    /// Tile the image was cut as, for sliding-window results.
    pub tile: Option<TileDescriptor>,
    /// Source file stem, for input entries.
    pub filename: Option<String>,
}

impl ResultEntry {
    /// An entry for `image` at position `index`.
    pub fn for_image(index: usize, image: &ImageHandle, detections: Vec<Detection>) -> Self {
        Self {
            index,
            origin_index: image.origin_index,
            transform: Some(image.transform.clone()),
            detections,
            tile: None,
            filename: None,
        }
    }

    /// The transform, identity when absent.
    pub fn state(&self) -> TransformState {
        self.transform.clone().unwrap_or_default()
    }

    pub fn signature(&self) -> String {
        self.transform
            .as_ref()
            .and_then(TransformState::signature)
            .unwrap_or_default()
    }

    /// Detections in original coordinates, with suppressed ones left out.
    pub fn original_detections(&self) -> crate::core::FlowResult<Vec<Detection>> {
        let state = self.state();
        self.detections
            .iter()
            .filter(|d| !d.is_suppressed())
            .map(|d| d.to_original(&state))
            .collect()
    }
}

/// Images, results and templates flowing along one set of ports.
#[derive(Debug, Clone, Default)]
pub struct Channel {
    pub images: Vec<ImageHandle>,
    pub results: Vec<ResultEntry>,
    pub templates: Vec<Template>,
}

impl Channel {
    pub fn new(images: Vec<ImageHandle>, results: Vec<ResultEntry>) -> Self {
        Self {
            images,
            results,
            templates: Vec::new(),
        }
    }

    pub fn with_templates(mut self, templates: Vec<Template>) -> Self {
        self.templates = templates;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.results.is_empty() && self.templates.is_empty()
    }

    /// Finds the image a result entry belongs to.
    ///
    /// Tries, in order: same index, origin and transform; same index; same
    /// origin; same transform signature.
    pub fn image_for_entry(&self, entry: &ResultEntry) -> Option<usize> {
        let signature = entry.signature();
        let images = &self.images;
        let exact = images.get(entry.index).is_some_and(|img| {
            img.origin_index == entry.origin_index && img.signature() == signature
        });
        if exact {
            return Some(entry.index);
        }
        if entry.index < images.len() {
            return Some(entry.index);
        }
        images
            .iter()
            .position(|img| img.origin_index == entry.origin_index)
            .or_else(|| images.iter().position(|img| img.signature() == signature))
    }

    /// The result entries that belong to image `i`.
    ///
    /// Entries indexed to `i` win; failing that, entries of the same origin;
    /// failing that, entries with the same transform signature.
    pub fn entries_for_image(&self, i: usize) -> Vec<&ResultEntry> {
        let Some(image) = self.images.get(i) else {
            return Vec::new();
        };
        let by_index: Vec<&ResultEntry> = self.results.iter().filter(|e| e.index == i).collect();
        if !by_index.is_empty() {
            return by_index;
        }
        let by_origin: Vec<&ResultEntry> = self
            .results
            .iter()
            .filter(|e| e.origin_index == image.origin_index)
            .collect();
        if !by_origin.is_empty() {
            return by_origin;
        }
        let signature = image.signature();
        self.results
            .iter()
            .filter(|e| e.signature() == signature)
            .collect()
    }
}

/// A scalar value passed along scalar ports.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ScalarValue {
    /// Truthiness: non-zero numbers and the strings `"true"`/`"1"`.
    pub fn as_bool(&self) -> bool {
        match self {
            ScalarValue::Bool(b) => *b,
            ScalarValue::Int(i) => *i != 0,
            ScalarValue::Float(f) => *f != 0.0,
            ScalarValue::Str(s) => matches!(s.trim(), "true" | "True" | "TRUE" | "1"),
        }
    }

    /// Integer value; floats are rounded, strings parsed, anything else is 0.
    pub fn as_int(&self) -> i64 {
        match self {
            ScalarValue::Bool(b) => i64::from(*b),
            ScalarValue::Int(i) => *i,
            ScalarValue::Float(f) => f.round() as i64,
            ScalarValue::Str(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f.round() as i64))
                    .unwrap_or(0)
            }
        }
    }

    /// Text value; non-strings are rendered as JSON.
    pub fn as_text(&self) -> String {
        match self {
            ScalarValue::Str(s) => s.clone(),
            other => other.to_json().to_string(),
        }
    }

    /// Coerces to a port's declared type.
    pub fn coerce(&self, kind: ScalarKind) -> ScalarValue {
        match kind {
            ScalarKind::Bool => ScalarValue::Bool(self.as_bool()),
            ScalarKind::Int => ScalarValue::Int(self.as_int()),
            ScalarKind::Str => ScalarValue::Str(self.as_text()),
        }
    }

    /// The zero value of a port type, used when nothing was produced.
    pub fn zero(kind: ScalarKind) -> ScalarValue {
        match kind {
            ScalarKind::Bool => ScalarValue::Bool(false),
            ScalarKind::Int => ScalarValue::Int(0),
            ScalarKind::Str => ScalarValue::Str(String::new()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ScalarValue::Bool(b) => Value::from(*b),
            ScalarValue::Int(i) => Value::from(*i),
            ScalarValue::Float(f) => Value::from(*f),
            ScalarValue::Str(s) => Value::from(s.as_str()),
        }
    }
}

impl Serialize for ScalarValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Bool(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int(value)
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::Str(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Str(value.to_string())
    }
}

/// What a handler receives.
#[derive(Debug, Clone, Default)]
pub struct NodeInputs {
    pub main: Channel,
    pub extra: Vec<Channel>,
    /// Scalar inputs by input port index.
    pub scalars_by_index: BTreeMap<usize, ScalarValue>,
    /// Scalar inputs by input port name.
    pub scalars_by_name: BTreeMap<String, ScalarValue>,
}

impl NodeInputs {
    pub fn new(main: Channel) -> Self {
        Self {
            main,
            ..Self::default()
        }
    }

    pub fn with_extra(mut self, channel: Channel) -> Self {
        self.extra.push(channel);
        self
    }

    /// Extra channel `i`, if it was connected.
    pub fn extra(&self, i: usize) -> Option<&Channel> {
        self.extra.get(i)
    }

    /// Mutable access to the channel of input pair `pair`, growing the extra
    /// list as needed.
    pub fn pair_mut(&mut self, pair: usize) -> &mut Channel {
        if pair == 0 {
            return &mut self.main;
        }
        if self.extra.len() < pair {
            self.extra.resize_with(pair, Channel::default);
        }
        &mut self.extra[pair - 1]
    }
}

/// What a handler returns.
#[derive(Debug, Clone, Default)]
pub struct NodeOutput {
    pub main: Channel,
    pub extra: Vec<Channel>,
    /// Named scalar outputs, matched against scalar output ports by name.
    pub scalars: BTreeMap<String, ScalarValue>,
}

impl NodeOutput {
    pub fn new(main: Channel) -> Self {
        Self {
            main,
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_extra(mut self, channel: Channel) -> Self {
        self.extra.push(channel);
        self
    }

    pub fn with_scalar(mut self, name: &str, value: impl Into<ScalarValue>) -> Self {
        self.scalars.insert(name.to_string(), value.into());
        self
    }

    /// The channel of output pair `pair`: 0 is main, `p ≥ 1` is `extra[p-1]`.
    pub fn pair(&self, pair: usize) -> Option<&Channel> {
        match pair {
            0 => Some(&self.main),
            p => self.extra.get(p - 1),
        }
    }
}

/// The public record of one executed node.
#[derive(Debug, Clone, Default)]
pub struct NodeRecord {
    pub images: Vec<ImageHandle>,
    pub results: Vec<ResultEntry>,
    pub templates: Vec<Template>,
    /// Coerced scalar outputs by output port index.
    pub scalars_by_index: BTreeMap<usize, ScalarValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(origin: usize) -> ImageHandle {
        ImageHandle::from_original(RgbImage::new(100, 80), origin)
    }

    #[test]
    fn test_derive_keeps_origin() {
        let base = handle(3);
        let child = base.derive(RgbImage::new(10, 10), &AffineTransform::translation(-5.0, -6.0));
        assert_eq!(child.origin_index, 3);
        assert!(Arc::ptr_eq(&child.original, &base.original));
        assert!(!child.is_original());
        assert_eq!(child.transform.original_width, 100);
        assert_eq!(child.transform.output_size, Some([10, 10]));
    }

    #[test]
    fn test_image_for_entry_fallbacks() {
        let a = handle(0);
        let b = a.derive(RgbImage::new(10, 10), &AffineTransform::translation(-5.0, -6.0));
        let channel = Channel::new(vec![a.clone(), b.clone()], Vec::new());

        let exact = ResultEntry::for_image(1, &b, Vec::new());
        assert_eq!(channel.image_for_entry(&exact), Some(1));

        let mut by_signature = ResultEntry::for_image(7, &b, Vec::new());
        by_signature.origin_index = 9;
        assert_eq!(channel.image_for_entry(&by_signature), Some(1));

        let mut by_origin = ResultEntry::for_image(7, &b, Vec::new());
        by_origin.origin_index = 0;
        assert_eq!(channel.image_for_entry(&by_origin), Some(0));

        let mut orphan = ResultEntry::for_image(7, &b, Vec::new());
        orphan.origin_index = 9;
        orphan.transform = Some(TransformState {
            affine_2x3: Some(AffineTransform::translation(1.0, 1.0)),
            ..TransformState::new(100, 80)
        });
        assert_eq!(channel.image_for_entry(&orphan), None);
    }

    #[test]
    fn test_entries_for_image() {
        let a = handle(0);
        let mut channel = Channel::new(vec![a.clone()], Vec::new());
        channel.results.push(ResultEntry {
            index: 4,
            origin_index: 0,
            ..ResultEntry::default()
        });
        assert_eq!(channel.entries_for_image(0).len(), 1);
        channel.results.push(ResultEntry::for_image(0, &a, Vec::new()));
        let found = channel.entries_for_image(0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].index, 0);
        assert!(channel.entries_for_image(3).is_empty());
    }

    #[test]
    fn test_scalar_coercion() {
        assert_eq!(ScalarValue::from("1").coerce(ScalarKind::Bool), ScalarValue::Bool(true));
        assert_eq!(ScalarValue::from("yes").coerce(ScalarKind::Bool), ScalarValue::Bool(false));
        assert_eq!(ScalarValue::Float(2.6).coerce(ScalarKind::Int), ScalarValue::Int(3));
        assert_eq!(ScalarValue::from(" 12 ").coerce(ScalarKind::Int), ScalarValue::Int(12));
        assert_eq!(ScalarValue::from("x").coerce(ScalarKind::Int), ScalarValue::Int(0));
        assert_eq!(ScalarValue::Bool(true).coerce(ScalarKind::Str), ScalarValue::from("true"));
        assert_eq!(ScalarValue::Int(5).coerce(ScalarKind::Str), ScalarValue::from("5"));
        assert_eq!(ScalarValue::zero(ScalarKind::Str), ScalarValue::from(""));
    }

    #[test]
    fn test_pairs() {
        let out = NodeOutput::new(Channel::default()).with_extra(Channel::default());
        assert!(out.pair(0).is_some());
        assert!(out.pair(1).is_some());
        assert!(out.pair(2).is_none());

        let mut inputs = NodeInputs::default();
        inputs.pair_mut(2).templates.push(Template::new("t"));
        assert_eq!(inputs.extra.len(), 2);
        assert_eq!(inputs.extra(1).map(|c| c.templates.len()), Some(1));
    }
}
