//! Error constructor utilities.
//!
//! Ergonomic helpers for creating [`FlowError`] values with context and
//! error chaining, so call sites stay on a single line.

use super::types::{FlowError, ProcessingStage};
use std::path::Path;

impl FlowError {
    /// Creates an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Creates a processing error for the given stage.
    ///
    /// # Arguments
    ///
    /// * `kind` - The stage in which the failure happened.
    /// * `context` - Additional context about the error.
    /// * `error` - The underlying error that caused this error.
    pub fn processing(
        kind: ProcessingStage,
        context: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Processing {
            kind,
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates an image codec error.
    pub fn image_io(
        context: impl Into<String>,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::processing(ProcessingStage::ImageIo, context, error)
    }

    /// Wraps an error raised by the inference collaborator.
    pub fn inference(
        node_id: i64,
        error: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Inference {
            node_id,
            source: error.into(),
        }
    }

    /// Creates a template persistence error that names the file involved.
    ///
    /// # Arguments
    ///
    /// * `operation` - `"save"` or `"load"`.
    /// * `path` - The template file.
    /// * `error` - The underlying IO or serialization error.
    pub fn template_io(
        operation: &str,
        path: &Path,
        error: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::processing(
            ProcessingStage::Template,
            format!("template {} failed for '{}'", operation, path.display()),
            error,
        )
    }

    /// Returns `true` for the errors that mark a geometric precondition
    /// violation rather than an environmental failure.
    pub fn is_geometry_error(&self) -> bool {
        matches!(
            self,
            FlowError::InvalidTileConfig { .. } | FlowError::SingularTransform { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_io_names_path() {
        let err = FlowError::template_io(
            "load",
            Path::new("/tmp/missing.json"),
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let text = err.to_string();
        assert!(text.contains("template"));
        assert!(text.contains("/tmp/missing.json"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_geometry_errors() {
        assert!(FlowError::SingularTransform { determinant: 0.0 }.is_geometry_error());
        assert!(
            FlowError::InvalidTileConfig {
                width: 0,
                height: 10
            }
            .is_geometry_error()
        );
        assert!(!FlowError::invalid_input("x").is_geometry_error());
    }

    #[test]
    fn test_config_error_conversion() {
        let err: FlowError = crate::core::config::ConfigError::InvalidConfig {
            message: "bad".to_string(),
        }
        .into();
        assert!(matches!(err, FlowError::ConfigError { .. }));
    }
}
