//! # Vision Flow Core
//!
//! Core algorithms for the vision-flow pipeline executor.
//!
//! This crate provides:
//! - Error handling and configuration validation
//! - Affine transform bookkeeping between original and derived images
//! - Tile generation and crop transforms
//! - The detection record, its arena and per-round result sets
//! - Merging of tile detections back into one result set
//! - Template persistence and matching of text layouts
//!
//! ## Modules
//!
//! * [`core`] - Error handling and configuration traits
//! * [`geometry`] - Affine algebra, rectangles and transform state
//! * [`tiling`] - Sliding-window tiling and crop transforms
//! * [`detection`] - Detection records and result sets
//! * [`merge`] - Cross-tile duplicate suppression
//! * [`template`] - Text-layout templates and the template matcher

pub mod core;
pub mod detection;
pub mod geometry;
pub mod merge;
pub mod template;
pub mod tiling;

/// Prelude module for convenient imports.
pub mod prelude {
    // Error Handling
    pub use crate::core::{ConfigError, ConfigValidator, FlowError, FlowResult, ProcessingStage};

    // Geometry
    pub use crate::geometry::{AffineTransform, Point, Rect, RotatedRect, TransformState};

    // Tiling
    pub use crate::tiling::{TileConfig, TileDescriptor, TileGenerator};

    // Detections
    pub use crate::detection::{BoxShape, Detection, Mask, MaskRle, ResultSet};
    pub use crate::merge::{DetectionMerger, MergeConfig, MergeStrategy};

    // Templates
    pub use crate::template::{
        MatchOptions, MatchReport, Template, TemplateMatcher, TemplateRegion, TemplateStore,
        normalize_text,
    };
}
