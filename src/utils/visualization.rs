//! Box overlays for previews and exported visualizations.

use crate::detection::BoxShape;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

/// Default outline color of axis-aligned boxes.
pub const AXIS_BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Default outline color of rotated boxes.
pub const ROTATED_BOX_COLOR: Rgb<u8> = Rgb([255, 128, 0]);

/// Draws the outline of `shape` on `img`.
///
/// Axis-aligned boxes are drawn as `thickness` nested rectangles; rotated
/// boxes as their four edges. Boxes entirely outside the image are skipped.
///
/// # Arguments
///
/// * `img` - The image to draw on
/// * `shape` - The box, in the pixel space of `img`
/// * `color` - Outline color
/// * `thickness` - Line thickness in pixels
pub fn draw_box(img: &mut RgbImage, shape: &BoxShape, color: Rgb<u8>, thickness: u32) {
    let (img_width, img_height) = (img.width() as f32, img.height() as f32);
    let env = shape.aabb();
    if env.x2() < 0.0 || env.y2() < 0.0 || env.x as f32 > img_width || env.y as f32 > img_height {
        return;
    }

    match shape {
        BoxShape::Axis(rect) => {
            let left = rect.x.floor() as i32;
            let top = rect.y.floor() as i32;
            let width = rect.width.ceil().max(1.0) as u32;
            let height = rect.height.ceil().max(1.0) as u32;
            for t in 0..thickness.max(1) {
                let ti = t as i32;
                let outline = Rect::at(left - ti, top - ti).of_size(width + 2 * t, height + 2 * t);
                draw_hollow_rect_mut(img, outline, color);
            }
        }
        BoxShape::Rotated(rect) => {
            let corners = rect.corners();
            for t in 0..thickness.max(1) {
                let offset = t as f32 * 0.5;
                for i in 0..4 {
                    let (a, b) = (corners[i], corners[(i + 1) % 4]);
                    draw_line_segment_mut(
                        img,
                        (a.x as f32 + offset, a.y as f32 + offset),
                        (b.x as f32 + offset, b.y as f32 + offset),
                        color,
                    );
                }
            }
        }
    }
}
