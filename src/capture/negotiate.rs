//! Constraint negotiation.
//!
//! Digital zoom crops the center of the camera frame, so the camera must
//! deliver `output × zoom` pixels per axis for the crop to keep the output
//! resolution. The request is capped by a fixed ceiling that no supported
//! device exceeds.

use tracing::debug;

use super::{CaptureConstraints, DeviceSelector, Facing, Resolution, ResolutionPolicy};
use crate::error::NegotiationError;

pub const ABSOLUTE_CEILING: Resolution = Resolution::new(4096, 2160);
pub const MIN_ZOOM: f64 = 1.0;
pub const MAX_ZOOM: f64 = 8.0;

const FRONT_HINTS: [&str; 3] = ["front", "user", "facetime"];
const BACK_HINTS: [&str; 4] = ["back", "rear", "environment", "world"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraint<T> {
    /// Best effort; the device may grant something else.
    Ideal(T),
    /// Must be met exactly or the open fails.
    Exact(T),
}

impl<T: Copy> Constraint<T> {
    pub fn value(&self) -> T {
        match self {
            Constraint::Ideal(v) | Constraint::Exact(v) => *v,
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Constraint::Exact(_))
    }
}

/// Device part of a request. Facing and id exclude each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceConstraint {
    Any,
    Id(String),
    Facing(Facing),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub width: Constraint<u32>,
    pub height: Constraint<u32>,
    pub frame_rate: Constraint<f64>,
    pub device: DeviceConstraint,
}

impl CaptureRequest {
    pub fn input(&self) -> Resolution {
        Resolution::new(self.width.value(), self.height.value())
    }
}

/// Derive the capture request for the given constraints.
pub fn negotiate(constraints: &CaptureConstraints) -> Result<CaptureRequest, NegotiationError> {
    let CaptureConstraints {
        output,
        zoom,
        frame_rate,
        ..
    } = *constraints;

    if !zoom.is_finite() || !(MIN_ZOOM..=MAX_ZOOM).contains(&zoom) {
        return Err(NegotiationError::new(
            "zoom",
            format!("{} is outside {:.1}..={:.1}", zoom, MIN_ZOOM, MAX_ZOOM),
        ));
    }
    if output.width == 0 || output.height == 0 {
        return Err(NegotiationError::new("resolution", format!("{} is empty", output)));
    }
    if output.width > ABSOLUTE_CEILING.width {
        return Err(NegotiationError::new(
            "width",
            format!("{} exceeds the {} ceiling", output.width, ABSOLUTE_CEILING.width),
        ));
    }
    if output.height > ABSOLUTE_CEILING.height {
        return Err(NegotiationError::new(
            "height",
            format!("{} exceeds the {} ceiling", output.height, ABSOLUTE_CEILING.height),
        ));
    }
    if !frame_rate.is_finite() || frame_rate <= 0.0 {
        return Err(NegotiationError::new(
            "frameRate",
            format!("{} is not a positive rate", frame_rate),
        ));
    }

    let required = required_input(output, zoom);
    let input = Resolution::new(
        required.width.min(ABSOLUTE_CEILING.width),
        required.height.min(ABSOLUTE_CEILING.height),
    );

    let (width, height) = match constraints.policy {
        ResolutionPolicy::Ideal => (Constraint::Ideal(input.width), Constraint::Ideal(input.height)),
        ResolutionPolicy::Exact => (Constraint::Exact(input.width), Constraint::Exact(input.height)),
    };

    let request = CaptureRequest {
        width,
        height,
        frame_rate: Constraint::Ideal(frame_rate),
        device: device_constraint(&constraints.device),
    };

    debug!(
        output = %output,
        zoom,
        required = %required,
        input = %input,
        device = ?request.device,
        "negotiated capture request"
    );

    Ok(request)
}

/// Input resolution the crop needs, before the ceiling is applied.
pub fn required_input(output: Resolution, zoom: f64) -> Resolution {
    let scale = |v: u32| (f64::from(v) * zoom).ceil() as u32;
    Resolution::new(scale(output.width), scale(output.height))
}

fn device_constraint(selector: &DeviceSelector) -> DeviceConstraint {
    match selector {
        DeviceSelector::SystemDefault => DeviceConstraint::Any,
        DeviceSelector::Facing(facing) => DeviceConstraint::Facing(*facing),
        DeviceSelector::Device { id, label } => {
            match label.as_deref().and_then(facing_hint) {
                Some(facing) => DeviceConstraint::Facing(facing),
                None => DeviceConstraint::Id(id.clone()),
            }
        }
    }
}

/// Guess the facing side from a device label.
pub fn facing_hint(label: &str) -> Option<Facing> {
    let label = label.to_lowercase();
    if FRONT_HINTS.iter().any(|h| label.contains(h)) {
        Some(Facing::User)
    } else if BACK_HINTS.iter().any(|h| label.contains(h)) {
        Some(Facing::Environment)
    } else {
        None
    }
}
