//! Per-image transform bookkeeping.

use super::affine::AffineTransform;
use super::Point;
use crate::core::errors::FlowResult;
use serde::{Deserialize, Serialize};

/// Geometric context handed from node to node with every image.
///
/// `affine_2x3` maps original-image pixels to the current image. `None` means
/// the current image *is* the original (identity), which is also how merged
/// results mark that they have been brought back to original coordinates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransformState {
    /// Width of the original input image.
    #[serde(default)]
    pub original_width: u32,
    /// Height of the original input image.
    #[serde(default)]
    pub original_height: u32,
    /// Optional crop rectangle `[x, y, w, h]` in original coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_box: Option<[i64; 4]>,
    /// Original → current affine map; `None` is identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affine_2x3: Option<AffineTransform>,
    /// Size `[w, h]` of the current image, when it differs from the original.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_size: Option<[u32; 2]>,
}

impl TransformState {
    /// State of an original image of the given size.
    pub fn new(original_width: u32, original_height: u32) -> Self {
        Self {
            original_width,
            original_height,
            ..Self::default()
        }
    }

    /// Returns `true` if this state carries usable original dimensions.
    pub fn has_original_size(&self) -> bool {
        self.original_width > 0 && self.original_height > 0
    }

    /// Returns `true` when no affine map has been recorded.
    pub fn is_original(&self) -> bool {
        self.affine_2x3.is_none()
    }

    /// The original → current map, identity when absent.
    pub fn affine(&self) -> AffineTransform {
        self.affine_2x3.unwrap_or_default()
    }

    /// The current → original map.
    ///
    /// # Errors
    ///
    /// Fails with `SingularTransform` if the recorded map cannot be inverted.
    pub fn to_original(&self) -> FlowResult<AffineTransform> {
        self.affine().invert()
    }

    /// Derives the state of an image produced from this one.
    ///
    /// # Arguments
    ///
    /// * `current_to_new` - Map from this image's pixels to the new image's pixels.
    /// * `new_width`, `new_height` - Size of the new image.
    pub fn derive_child(
        &self,
        current_to_new: &AffineTransform,
        new_width: u32,
        new_height: u32,
    ) -> TransformState {
        TransformState {
            original_width: self.original_width,
            original_height: self.original_height,
            crop_box: self.crop_box,
            affine_2x3: Some(AffineTransform::compose(&self.affine(), current_to_new)),
            output_size: Some([new_width, new_height]),
        }
    }

    /// Maps a point from the current image back to original coordinates.
    pub fn point_to_original(&self, p: Point) -> FlowResult<Point> {
        match &self.affine_2x3 {
            None => Ok(p),
            Some(t) => t.apply_inverse(p),
        }
    }

    /// Compact signature used to pair result entries with images.
    ///
    /// Translation is rounded to two decimals and the linear part to four,
    /// so the same crop computed along different paths compares equal.
    pub fn signature(&self) -> Option<String> {
        self.affine_2x3.map(|t| {
            let [a, b, tx, c, d, ty] = t.as_array();
            format!(
                "T:{:.4},{:.4},{:.2},{:.4},{:.4},{:.2}",
                a, b, tx, c, d, ty
            )
        })
    }
}
