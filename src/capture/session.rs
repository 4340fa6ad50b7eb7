use image::RgbImage;
use tracing::info;

use super::{CameraBackend, CameraStream, CaptureRequest, NegotiatedGeometry};
use crate::error::CaptureError;

/// The one camera stream the pipeline currently owns.
///
/// Dropping it stops the underlying device.
pub struct ActiveCapture {
    stream: Box<dyn CameraStream>,
    negotiated: NegotiatedGeometry,
}

impl ActiveCapture {
    pub fn negotiated(&self) -> NegotiatedGeometry {
        self.negotiated
    }

    pub fn device_label(&self) -> &str {
        self.stream.label()
    }

    pub fn grab(&mut self) -> Result<RgbImage, CaptureError> {
        self.stream.grab()
    }
}

impl Drop for ActiveCapture {
    fn drop(&mut self) {
        self.stream.stop();
    }
}

/// Holds at most one `ActiveCapture`.
#[derive(Default)]
pub struct CaptureSession {
    active: Option<ActiveCapture>,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a stream for `request`, closing any stream already open.
    pub fn open(
        &mut self,
        backend: &mut dyn CameraBackend,
        request: &CaptureRequest,
    ) -> Result<&mut ActiveCapture, CaptureError> {
        self.close();

        let stream = backend.open(request)?;
        let negotiated = stream.negotiated();
        info!(
            device = stream.label(),
            requested = %request.input(),
            granted = %negotiated.resolution(),
            fps = negotiated.frame_rate,
            "camera opened"
        );

        Ok(self.active.insert(ActiveCapture { stream, negotiated }))
    }

    /// Stop and forget the active stream. No-op when nothing is open.
    pub fn close(&mut self) {
        if let Some(active) = self.active.take() {
            info!(device = active.device_label(), "camera closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&ActiveCapture> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut ActiveCapture> {
        self.active.as_mut()
    }
}
