//! Per-tick frame composition: digital zoom crop and status overlay.

pub mod crop;
pub mod overlay;

pub use crop::compute_crop_rect;
pub use overlay::render;

/// Shown in place of a missing or blank label.
pub const PLACEHOLDER: &str = "n/a";

/// Immutable snapshot of everything the overlay band shows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OverlayState {
    pub datetime: String,
    pub endpoint: String,
    pub app_version: String,
    pub resolution: String,
    pub zoom: String,
    pub battery: String,
    pub device: String,
}

impl OverlayState {
    pub(crate) fn left_lines(&self) -> Vec<String> {
        vec![
            or_placeholder(&self.datetime).to_string(),
            or_placeholder(&self.resolution).to_string(),
            or_placeholder(&self.zoom).to_string(),
        ]
    }

    pub(crate) fn right_lines(&self) -> Vec<String> {
        vec![
            or_placeholder(&self.endpoint).to_string(),
            or_placeholder(&self.battery).to_string(),
            format!(
                "{} | v{}",
                or_placeholder(&self.device),
                or_placeholder(&self.app_version)
            ),
        ]
    }
}

fn or_placeholder(label: &str) -> &str {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        PLACEHOLDER
    } else {
        trimmed
    }
}
