use crate::capture::negotiate::{MAX_ZOOM, MIN_ZOOM};

pub const DEFAULT_ZOOM_STEP: f64 = 0.5;

/// Digital zoom factor, always within `MIN_ZOOM..=MAX_ZOOM`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomState {
    factor: f64,
    step: f64,
}

impl ZoomState {
    pub fn new(factor: f64) -> Self {
        Self {
            factor: clamp_zoom(factor),
            step: DEFAULT_ZOOM_STEP,
        }
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn set(&mut self, factor: f64) -> bool {
        let next = clamp_zoom(factor);
        let changed = next != self.factor;
        self.factor = next;
        changed
    }

    pub fn zoom_in(&mut self) -> bool {
        self.set(self.factor + self.step)
    }

    pub fn zoom_out(&mut self) -> bool {
        self.set(self.factor - self.step)
    }

    pub fn label(&self) -> String {
        format!("Zoom: {:.1}x", self.factor)
    }
}

impl Default for ZoomState {
    fn default() -> Self {
        Self::new(MIN_ZOOM)
    }
}

fn clamp_zoom(factor: f64) -> f64 {
    if factor.is_finite() {
        factor.clamp(MIN_ZOOM, MAX_ZOOM)
    } else {
        MIN_ZOOM
    }
}
