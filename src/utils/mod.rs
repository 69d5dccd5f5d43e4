//! Utility functions for the pipeline.
//!
//! This module provides image loading and the pixel-level operations node
//! handlers rely on (cropping, rotation, flipping, affine warping, box
//! overlays), plus logging setup.

pub mod image;
pub mod visualization;
pub mod warp;

pub use self::image::{
    blank_image, crop_image, flip, load_image, parse_color, rotate_ccw, save_image,
};
pub use visualization::draw_box;
pub use warp::warp_affine;

/// Initializes the tracing subscriber for logging.
///
/// This function sets up the tracing subscriber with environment filter and formatting layer.
/// It's typically called at the start of an application to enable logging.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();
}
