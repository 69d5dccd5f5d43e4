//! Node handlers.
//!
//! Each submodule holds the typed configurations and handlers of one family
//! of nodes. Configurations decode leniently from the node's property bag
//! (see [`crate::core::config::lenient`]) and are validated once, when the
//! graph is compiled.

pub mod geometry;
pub mod input;
pub mod model;
pub mod output;
pub mod results;
pub mod sliding;
pub mod template;

use crate::core::config::ConfigValidator;
use crate::core::errors::{FlowError, FlowResult};
use crate::graph::channel::ResultEntry;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Decodes and validates a node configuration.
///
/// # Errors
///
/// Returns `ConfigError` when decoding or validation fails.
pub fn typed<C>(properties: &Map<String, Value>) -> FlowResult<C>
where
    C: DeserializeOwned + ConfigValidator,
{
    let config: C = serde_json::from_value(Value::Object(properties.clone()))
        .map_err(|e| FlowError::config_error(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Renumbers entries `0..n` in order.
pub(crate) fn reindex(entries: &mut [ResultEntry]) {
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.index = i;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Builders shared by the handler tests.

    use crate::detection::Detection;
    use crate::graph::channel::{Channel, ImageHandle, ResultEntry};
    use crate::graph::context::ExecutionContext;
    use crate::graph::registry::NodeContext;
    use crate::inference::NullBackend;
    use image::RgbImage;

    pub fn image(width: u32, height: u32, origin: usize) -> ImageHandle {
        ImageHandle::from_original(RgbImage::new(width, height), origin)
    }

    /// A channel with one original image and one entry holding `detections`.
    pub fn single(width: u32, height: u32, detections: Vec<Detection>) -> Channel {
        let handle = image(width, height, 0);
        let entry = ResultEntry::for_image(0, &handle, detections);
        Channel::new(vec![handle], vec![entry])
    }

    pub fn with_ctx<R>(run: &mut ExecutionContext, f: impl FnOnce(&mut NodeContext<'_>) -> R) -> R {
        let mut ctx = NodeContext {
            node_id: 1,
            backend: &NullBackend,
            run,
        };
        f(&mut ctx)
    }
}
