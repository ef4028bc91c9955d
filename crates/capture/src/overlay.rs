//! Skeleton overlay drawn over the camera preview.
//!
//! The preview is shown with "contain" scaling: the whole frame is visible and
//! letterboxed on the axis with spare room. Landmarks are normalized to the
//! frame, so they must be mapped through the same fit to line up.

use handsign_landmarks::skeleton::HAND_CONNECTIONS;
use handsign_landmarks::{LandmarkPoint, RawHand, RawPoint};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

/// Maps normalized frame coordinates onto a display surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainTransform {
    pub visible_width: f32,
    pub visible_height: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl ContainTransform {
    /// Fit `video` inside `display`. Returns `None` if either is degenerate.
    pub fn fit(video: Size, display: Size) -> Option<Self> {
        if video.is_empty() || display.is_empty() {
            return None;
        }

        let video_ratio = video.width / video.height;
        let display_ratio = display.width / display.height;

        let transform = if display_ratio > video_ratio {
            // Display is wider: bars left and right
            let visible_width = display.height * video_ratio;
            Self {
                visible_width,
                visible_height: display.height,
                offset_x: (display.width - visible_width) / 2.0,
                offset_y: 0.0,
            }
        } else {
            let visible_height = display.width / video_ratio;
            Self {
                visible_width: display.width,
                visible_height,
                offset_x: 0.0,
                offset_y: (display.height - visible_height) / 2.0,
            }
        };
        Some(transform)
    }

    pub fn map(&self, point: &LandmarkPoint) -> (f32, f32) {
        (
            point.x * self.visible_width + self.offset_x,
            point.y * self.visible_height + self.offset_y,
        )
    }
}

/// Something the overlay can be drawn on.
pub trait OverlaySurface: Send {
    fn size(&self) -> Size;
    fn clear(&mut self);
    fn line(&mut self, from: (f32, f32), to: (f32, f32));
    fn point(&mut self, at: (f32, f32));
}

/// Redraw the overlay for one frame: clear, then bones and joints of every
/// detected hand.
pub fn render_hands(surface: &mut dyn OverlaySurface, video: Size, hands: &[RawHand]) {
    surface.clear();
    let Some(transform) = ContainTransform::fit(video, surface.size()) else {
        return;
    };

    for hand in hands {
        let mapped: Vec<(f32, f32)> = hand
            .iter()
            .map(RawPoint::coerce)
            .map(|p| transform.map(&p))
            .collect();

        for &(from, to) in HAND_CONNECTIONS.iter() {
            if let (Some(&a), Some(&b)) = (mapped.get(from), mapped.get(to)) {
                surface.line(a, b);
            }
        }
        for &at in &mapped {
            surface.point(at);
        }
    }
}
