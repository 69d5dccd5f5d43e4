//! Error type definitions.

use thiserror::Error;

/// The stage of the pipeline in which a processing error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Tile generation.
    Tiling,
    /// Affine reprojection between coordinate spaces.
    Reprojection,
    /// Detection merge.
    Merge,
    /// Template construction or matching.
    Template,
    /// Image decoding, encoding or warping.
    ImageIo,
    /// Generic processing error.
    Generic,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStage::Tiling => write!(f, "tiling"),
            ProcessingStage::Reprojection => write!(f, "reprojection"),
            ProcessingStage::Merge => write!(f, "merge"),
            ProcessingStage::Template => write!(f, "template"),
            ProcessingStage::ImageIo => write!(f, "image io"),
            ProcessingStage::Generic => write!(f, "processing"),
        }
    }
}

/// Errors that can occur while building or running a pipeline graph.
///
/// Unknown node types and unresolvable links are deliberately absent: the
/// executor skips them instead of failing.
#[derive(Error, Debug)]
pub enum FlowError {
    /// Tile dimensions were not strictly positive.
    #[error("invalid tile configuration: tile size {width}x{height} must be positive")]
    InvalidTileConfig {
        /// Configured tile width.
        width: i64,
        /// Configured tile height.
        height: i64,
    },

    /// An affine transform could not be inverted.
    #[error("singular transform: |det| = {determinant:e} is below tolerance")]
    SingularTransform {
        /// Determinant of the linear part.
        determinant: f64,
    },

    /// Error indicating invalid input.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// A message describing the invalid input.
        message: String,
    },

    /// Error indicating a configuration problem.
    #[error("configuration: {message}")]
    ConfigError {
        /// A message describing the configuration error.
        message: String,
    },

    /// Error occurred during processing.
    #[error("{kind} failed: {context}")]
    Processing {
        /// The stage of processing where the error occurred.
        kind: ProcessingStage,
        /// Additional context about the error.
        context: String,
        /// The underlying error that caused this error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The inference collaborator failed for a model node.
    #[error("inference failed in node {node_id}")]
    Inference {
        /// Id of the model node whose call failed.
        node_id: i64,
        /// The error reported by the backend.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// IO error.
    #[error("io")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization")]
    Serialization(#[from] serde_json::Error),
}

impl From<crate::core::config::ConfigError> for FlowError {
    fn from(error: crate::core::config::ConfigError) -> Self {
        FlowError::ConfigError {
            message: error.to_string(),
        }
    }
}
