//! The whole-graph facade.
//!
//! [`FlowModel`] bundles a compiled graph with its inference backend and
//! turns one image (or a batch) into the graph's JSON payload.

mod flow_model;

pub use flow_model::FlowModel;
