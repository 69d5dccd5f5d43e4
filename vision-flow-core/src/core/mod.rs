//! The core module: error handling and configuration plumbing shared by every
//! other module of the crate.

pub mod config;
pub mod errors;

pub use config::{ConfigError, ConfigValidator};
pub use errors::{FlowError, FlowResult, ProcessingStage};
