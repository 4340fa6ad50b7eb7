//! Test-pattern camera.
//!
//! Selected with `--synthetic` (no camera needed) and used by the tests. Frames are
//! a color gradient with a bar sweeping across it so motion is visible in
//! the receiver.

use image::{Rgb, RgbImage};
use std::sync::{Arc, Mutex};

use super::{
    resolve_device, CameraBackend, CameraStream, CaptureRequest, Constraint, DeviceInfo, Facing,
    NegotiatedGeometry, Resolution,
};
use crate::error::CaptureError;

pub type EventLog = Arc<Mutex<Vec<String>>>;

pub struct SyntheticCamera {
    devices: Vec<DeviceInfo>,
    max_resolution: Resolution,
    max_frame_rate: f64,
    fault: Option<CaptureError>,
    events: EventLog,
}

impl SyntheticCamera {
    pub fn new() -> Self {
        Self {
            devices: vec![
                DeviceInfo {
                    id: "synthetic-0".to_string(),
                    label: "Integrated Front Camera".to_string(),
                    facing: Some(Facing::User),
                },
                DeviceInfo {
                    id: "synthetic-1".to_string(),
                    label: "Rear Camera".to_string(),
                    facing: Some(Facing::Environment),
                },
            ],
            max_resolution: Resolution::new(1920, 1080),
            max_frame_rate: 30.0,
            fault: None,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[cfg(test)]
    pub fn with_max_resolution(mut self, max: Resolution) -> Self {
        self.max_resolution = max;
        self
    }

    /// Make every `open` fail with `fault`.
    #[cfg(test)]
    pub fn with_fault(mut self, fault: CaptureError) -> Self {
        self.fault = Some(fault);
        self
    }

    #[cfg(test)]
    pub fn without_devices(mut self) -> Self {
        self.devices.clear();
        self
    }

    /// Shared record of opens and stops, for observing lifecycle order.
    #[cfg(test)]
    pub fn events(&self) -> EventLog {
        self.events.clone()
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraBackend for SyntheticCamera {
    fn devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        Ok(self.devices.clone())
    }

    fn open(&mut self, request: &CaptureRequest) -> Result<Box<dyn CameraStream>, CaptureError> {
        if let Some(fault) = &self.fault {
            return Err(fault.clone());
        }

        let device = resolve_device(&self.devices, &request.device)?;
        let width = grant("width", request.width, self.max_resolution.width)?;
        let height = grant("height", request.height, self.max_resolution.height)?;
        let frame_rate = request.frame_rate.value().min(self.max_frame_rate);

        push_event(&self.events, format!("open {}x{}", width, height));

        Ok(Box::new(SyntheticStream {
            label: device.label.clone(),
            negotiated: NegotiatedGeometry {
                width,
                height,
                frame_rate,
            },
            frame: 0,
            stopped: false,
            events: self.events.clone(),
        }))
    }
}

fn grant(name: &'static str, constraint: Constraint<u32>, max: u32) -> Result<u32, CaptureError> {
    match constraint {
        Constraint::Ideal(v) => Ok(v.clamp(1, max)),
        Constraint::Exact(v) if v <= max => Ok(v),
        Constraint::Exact(v) => Err(CaptureError::Overconstrained {
            constraint: name,
            requested: v.to_string(),
            supported: format!("up to {}", max),
        }),
    }
}

fn push_event(log: &EventLog, event: String) {
    if let Ok(mut events) = log.lock() {
        events.push(event);
    }
}

struct SyntheticStream {
    label: String,
    negotiated: NegotiatedGeometry,
    frame: u64,
    stopped: bool,
    events: EventLog,
}

impl CameraStream for SyntheticStream {
    fn negotiated(&self) -> NegotiatedGeometry {
        self.negotiated
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn grab(&mut self) -> Result<RgbImage, CaptureError> {
        if self.stopped {
            return Err(CaptureError::Frame("stream stopped".to_string()));
        }

        let (w, h) = (self.negotiated.width, self.negotiated.height);
        let bar_width = (w / 16).max(1);
        let bar_x = ((self.frame * u64::from(bar_width)) % u64::from(w)) as u32;
        let shade = (self.frame % 256) as u8;
        self.frame += 1;

        Ok(RgbImage::from_fn(w, h, |x, y| {
            if x >= bar_x && x < bar_x + bar_width {
                Rgb([255, 255, 255])
            } else {
                Rgb([
                    (u64::from(x) * 255 / u64::from(w)) as u8,
                    (u64::from(y) * 255 / u64::from(h)) as u8,
                    shade,
                ])
            }
        }))
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            push_event(&self.events, "stop".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::DeviceConstraint;

    fn request(width: Constraint<u32>, height: Constraint<u32>) -> CaptureRequest {
        CaptureRequest {
            width,
            height,
            frame_rate: Constraint::Ideal(60.0),
            device: DeviceConstraint::Facing(Facing::Environment),
        }
    }

    #[test]
    fn test_ideal_request_is_clamped() {
        let mut cam = SyntheticCamera::new().with_max_resolution(Resolution::new(800, 600));
        let stream = cam
            .open(&request(Constraint::Ideal(1280), Constraint::Ideal(720)))
            .unwrap();
        assert_eq!(stream.negotiated().resolution(), Resolution::new(800, 600));
        assert_eq!(stream.negotiated().frame_rate, 30.0);
        assert_eq!(stream.label(), "Rear Camera");
    }

    #[test]
    fn test_exact_request_fails_fast() {
        let mut cam = SyntheticCamera::new().with_max_resolution(Resolution::new(800, 600));
        let err = cam
            .open(&request(Constraint::Exact(1280), Constraint::Exact(720)))
            .err()
            .unwrap();
        assert!(matches!(err, CaptureError::Overconstrained { constraint: "width", .. }));
    }

    #[test]
    fn test_frames_move_and_stop() {
        let mut cam = SyntheticCamera::new();
        let mut stream = cam
            .open(&request(Constraint::Ideal(64), Constraint::Ideal(48)))
            .unwrap();
        let a = stream.grab().unwrap();
        let b = stream.grab().unwrap();
        assert_eq!(a.dimensions(), (64, 48));
        assert_ne!(a, b);

        stream.stop();
        stream.stop();
        assert!(stream.grab().is_err());
        assert_eq!(cam.events().lock().unwrap().as_slice(), ["open 64x48", "stop"]);
    }

    #[test]
    fn test_no_devices() {
        let mut cam = SyntheticCamera::new().without_devices();
        let err = cam
            .open(&request(Constraint::Ideal(64), Constraint::Ideal(48)))
            .err()
            .unwrap();
        assert!(matches!(err, CaptureError::DeviceUnavailable(_)));
    }
}
