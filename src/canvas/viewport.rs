use egui::{Pos2, Vec2};
use serde::{Deserialize, Serialize};

pub const MIN_ZOOM: f32 = 0.25;
pub const MAX_ZOOM: f32 = 2.0;

/// Pan/zoom transform between screen space and canvas space.
/// Zoom scales around `center`, pan is applied in screen space afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub center: Pos2,
    pub pan: Vec2,
    pub zoom: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { center: Pos2::ZERO, pan: Vec2::ZERO, zoom: 1.0 }
    }
}

impl Viewport {
    pub fn new(center: Pos2) -> Self {
        Self { center, ..Self::default() }
    }

    pub fn to_screen(&self, p: Pos2) -> Pos2 {
        Pos2::new(
            (p.x - self.center.x) * self.zoom + self.center.x + self.pan.x,
            (p.y - self.center.y) * self.zoom + self.center.y + self.pan.y,
        )
    }

    pub fn to_canvas(&self, p: Pos2) -> Pos2 {
        Pos2::new(
            ((p.x - self.pan.x) - self.center.x) / self.zoom + self.center.x,
            ((p.y - self.pan.y) - self.center.y) / self.zoom + self.center.y,
        )
    }

    pub fn zoom_by(&mut self, factor: f32) {
        self.zoom = (self.zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);
    }

    pub fn pan_by(&mut self, delta: Vec2) {
        self.pan += delta;
    }

    /// Keep screen positions stable when the canvas widget moves by `dc`.
    pub fn recenter(&mut self, center: Pos2) {
        let dc = center - self.center;
        self.pan += dc * (self.zoom - 1.0);
        self.center = center;
    }
}
