//! Error types for the vision-flow pipeline.
//!
//! This module provides the error taxonomy shared by every stage of the graph:
//! tiling, transform algebra, node configuration, inference and template
//! persistence. Helper constructors attach context and chain the underlying error.
//!
//! # Usage
//!
//! ```rust
//! use vision_flow_core::core::errors::{FlowError, ProcessingStage};
//!
//! // A configuration problem found while typing a node's properties
//! let config_error = FlowError::config_error("window_size must be positive");
//!
//! // A processing failure with its underlying cause
//! let error = FlowError::processing(
//!     ProcessingStage::Merge,
//!     "failed to reproject tile detections",
//!     std::io::Error::new(std::io::ErrorKind::InvalidData, "bad transform"),
//! );
//! assert!(error.to_string().contains("merge"));
//! ```

pub mod constructors;
pub mod types;

pub use types::{FlowError, ProcessingStage};

/// Convenient result alias for pipeline operations.
pub type FlowResult<T> = Result<T, FlowError>;
