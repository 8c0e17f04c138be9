//! Screen-space rectangle selection
//!
//! Projects every point through the camera's view-projection matrix and
//! keeps the indices landing inside the rectangle's NDC box. Rectangles
//! smaller than a click threshold select nothing.

use pointstudio_core::{Matrix4, Vector4};

/// Both rectangle dimensions under this many pixels count as a click
const CLICK_THRESHOLD_PX: f32 = 4.0;

/// A pixel-space selection rectangle over a viewport
#[derive(Debug, Clone, Copy)]
pub struct SelectionRect {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub viewport_width: f32,
    pub viewport_height: f32,
}

impl SelectionRect {
    pub fn is_click(&self) -> bool {
        (self.x2 - self.x1).abs() < CLICK_THRESHOLD_PX
            && (self.y2 - self.y1).abs() < CLICK_THRESHOLD_PX
    }

    /// NDC bounds as (min_x, min_y, max_x, max_y); pixel y points down
    fn ndc_bounds(&self) -> (f32, f32, f32, f32) {
        let to_ndc_x = |px: f32| 2.0 * px / self.viewport_width - 1.0;
        let to_ndc_y = |py: f32| 1.0 - 2.0 * py / self.viewport_height;
        let (ax, bx) = (to_ndc_x(self.x1), to_ndc_x(self.x2));
        let (ay, by) = (to_ndc_y(self.y1), to_ndc_y(self.y2));
        (ax.min(bx), ay.min(by), ax.max(bx), ay.max(by))
    }
}

/// Indices of the points whose clip-space projection lands in the rectangle.
///
/// Points behind the camera (non-positive w) are skipped.
pub fn select_in_rect(
    positions: &[f32],
    view_projection: &Matrix4<f32>,
    rect: &SelectionRect,
) -> Vec<u32> {
    if rect.is_click() {
        return Vec::new();
    }
    let (min_x, min_y, max_x, max_y) = rect.ndc_bounds();

    let mut selected = Vec::new();
    for (i, p) in positions.chunks_exact(3).enumerate() {
        let clip = view_projection * Vector4::new(p[0], p[1], p[2], 1.0);
        if clip.w <= 0.0 {
            continue;
        }
        let ndc_x = clip.x / clip.w;
        let ndc_y = clip.y / clip.w;
        if ndc_x >= min_x && ndc_x <= max_x && ndc_y >= min_y && ndc_y <= max_y {
            selected.push(i as u32);
        }
    }
    selected
}
