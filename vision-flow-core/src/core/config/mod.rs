//! Configuration validation and lenient property decoding.

pub mod errors;
pub mod lenient;

pub use errors::{ConfigDefaults, ConfigError, ConfigValidator};
