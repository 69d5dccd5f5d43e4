//! # Vision Flow
//!
//! A node-graph executor for machine-vision inspection pipelines. A graph is
//! a JSON list of nodes (inputs, model calls, crops, tiling, filters,
//! template operations, outputs) wired by numbered links; the executor runs
//! the nodes in order and routes images, results and scalars between them.
//!
//! ## Features
//!
//! - Every derived image carries an affine map back to its original, so
//!   detections found on crops, tiles or rotated views are reported in
//!   original-image coordinates
//! - Sliding-window tiling with cross-tile duplicate suppression
//! - Golden-template building, persistence and layout matching for printed
//!   text inspection
//! - Pluggable inference through the [`inference::InferenceBackend`] trait
//!
//! ## Modules
//!
//! * [`core`] - Errors and configuration validation
//! * [`geometry`] - Affine transforms, transform state and projections
//! * [`tiling`] - Tile generation and crop transforms
//! * [`detection`] - Detection records and per-round result storage
//! * [`merge`] - Cross-tile detection merge
//! * [`template`] - Templates, text normalization, matching and storage
//! * [`graph`] - Graph description, channels, node registry and executor
//! * [`nodes`] - The node handlers
//! * [`pipeline`] - The [`FlowModel`](pipeline::FlowModel) facade
//! * [`utils`] - Image helpers and logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vision_flow::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let model = FlowModel::load("graphs/inspect.json", Arc::new(NullBackend))?;
//! let image = load_image(std::path::Path::new("part.png"))?;
//! let payload = model.infer(image)?;
//! for image in payload["by_image"].as_array().into_iter().flatten() {
//!     println!("{} detections", image["results"].as_array().map_or(0, |r| r.len()));
//! }
//! # Ok(())
//! # }
//! ```

pub use vision_flow_core::{core, detection, geometry, merge, template, tiling};

pub mod graph;
pub mod inference;
pub mod nodes;
pub mod pipeline;
pub mod utils;

/// Prelude module for convenient imports.
///
/// ```rust
/// use vision_flow::prelude::*;
/// ```
///
/// Brings in the facade, the backend trait, the core data types and the
/// error types. Node configurations live in [`crate::nodes`].
pub mod prelude {
    pub use vision_flow_core::prelude::*;

    pub use crate::graph::{
        Channel, ExecutionContext, GraphDescription, GraphExecutor, ImageHandle, NodeRecord,
        ResultEntry, ScalarValue,
    };
    pub use crate::inference::{InferParams, InferenceBackend, ModelTask, NullBackend};
    pub use crate::pipeline::FlowModel;
    pub use crate::utils::{init_tracing, load_image};
}
