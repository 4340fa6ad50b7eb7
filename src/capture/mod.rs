//! Camera side of the pipeline.
//!
//! The negotiator turns user intent into a `CaptureRequest`, a
//! `CameraBackend` grants it (possibly with different geometry), and the
//! `CaptureSession` owns the one live stream that results.

pub mod negotiate;
pub mod session;
pub mod synthetic;
#[cfg(target_os = "linux")]
pub mod v4l2;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CaptureError;

pub use negotiate::{negotiate, CaptureRequest, Constraint, DeviceConstraint};
pub use session::CaptureSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// The small set of output sizes offered to the user.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionClass {
    Low,
    #[default]
    Medium,
    High,
}

impl ResolutionClass {
    pub fn resolution(self) -> Resolution {
        match self {
            Self::Low => Resolution::new(320, 240),
            Self::Medium => Resolution::new(640, 480),
            Self::High => Resolution::new(1280, 720),
        }
    }

    pub fn label(self) -> String {
        let name = match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        };
        format!("{} ({})", name, self.resolution())
    }

    pub fn next(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High => Self::Low,
        }
    }
}

/// Which side of the device a camera faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    User,
    Environment,
}

/// How the user picked a camera.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceSelector {
    #[default]
    SystemDefault,
    Device { id: String, label: Option<String> },
    Facing(Facing),
}

/// Whether resolution constraints are soft targets or hard requirements.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionPolicy {
    #[default]
    Ideal,
    /// Compatibility fallback for devices that ignore soft targets.
    Exact,
}

/// Everything the negotiator needs to know about the user's request.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    pub output: Resolution,
    pub zoom: f64,
    pub frame_rate: f64,
    pub device: DeviceSelector,
    pub policy: ResolutionPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
    pub facing: Option<Facing>,
}

/// Geometry actually granted by the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NegotiatedGeometry {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

impl NegotiatedGeometry {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// A source of cameras.
pub trait CameraBackend {
    fn devices(&self) -> Result<Vec<DeviceInfo>, CaptureError>;

    /// Acquire a stream satisfying `request`. Exact constraints must fail
    /// with `CaptureError::Overconstrained` rather than be relaxed.
    fn open(&mut self, request: &CaptureRequest) -> Result<Box<dyn CameraStream>, CaptureError>;
}

/// A live camera feed.
pub trait CameraStream {
    fn negotiated(&self) -> NegotiatedGeometry;
    fn label(&self) -> &str;
    fn grab(&mut self) -> Result<RgbImage, CaptureError>;
    /// Release the device. Safe to call more than once.
    fn stop(&mut self);
}

/// The platform camera backend, or the test pattern when `synthetic` is set.
pub fn backend(synthetic: bool) -> Result<Box<dyn CameraBackend>, CaptureError> {
    if synthetic {
        return Ok(Box::new(synthetic::SyntheticCamera::new()));
    }
    native_backend()
}

#[cfg(target_os = "linux")]
fn native_backend() -> Result<Box<dyn CameraBackend>, CaptureError> {
    Ok(Box::new(v4l2::V4l2Camera::new()))
}

#[cfg(not(target_os = "linux"))]
fn native_backend() -> Result<Box<dyn CameraBackend>, CaptureError> {
    Err(CaptureError::DeviceUnavailable(
        "no native camera backend on this platform, use --synthetic".to_string(),
    ))
}

/// Pick the device a request refers to from a backend's list.
///
/// Facing is a soft preference: with no camera on the requested side the
/// first device is used, like the system default.
pub(crate) fn resolve_device<'a>(
    devices: &'a [DeviceInfo],
    constraint: &DeviceConstraint,
) -> Result<&'a DeviceInfo, CaptureError> {
    let first = devices
        .first()
        .ok_or_else(|| CaptureError::DeviceUnavailable("no camera found".to_string()))?;

    match constraint {
        DeviceConstraint::Any => Ok(first),
        DeviceConstraint::Facing(facing) => Ok(devices
            .iter()
            .find(|d| d.facing == Some(*facing))
            .unwrap_or(first)),
        DeviceConstraint::Id(id) => devices
            .iter()
            .find(|d| &d.id == id)
            .ok_or_else(|| CaptureError::DeviceUnavailable(format!("no camera with id {}", id))),
    }
}
