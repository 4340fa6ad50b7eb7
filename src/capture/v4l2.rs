//! Linux V4L2 camera backend.
//!
//! Cameras are driven in MJPEG mode. Each stream runs on a dedicated thread
//! that dequeues and decodes frames into a small bounded channel; `grab`
//! takes the newest one without blocking, and frames the pipeline is too
//! slow for are dropped.

use image::{ImageFormat, RgbImage};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tracing::{debug, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::negotiate::facing_hint;
use super::{
    resolve_device, CameraBackend, CameraStream, CaptureRequest, DeviceInfo, NegotiatedGeometry,
};
use crate::error::CaptureError;

const MJPEG: &[u8; 4] = b"MJPG";
const BUFFER_COUNT: u32 = 4;
const FRAME_QUEUE: usize = 2;
/// Upper bound on one dequeue, so `stop` never waits on a stalled camera.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

type FrameResult = Result<RgbImage, CaptureError>;

#[derive(Default)]
pub struct V4l2Camera;

impl V4l2Camera {
    pub fn new() -> Self {
        Self
    }
}

impl CameraBackend for V4l2Camera {
    fn devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        Ok(v4l::context::enum_devices()
            .into_iter()
            .map(|node| {
                let label = node
                    .name()
                    .unwrap_or_else(|| format!("Camera {}", node.index()));
                DeviceInfo {
                    id: node.path().display().to_string(),
                    facing: facing_hint(&label),
                    label,
                }
            })
            .collect())
    }

    fn open(&mut self, request: &CaptureRequest) -> Result<Box<dyn CameraStream>, CaptureError> {
        let devices = self.devices()?;
        let info = resolve_device(&devices, &request.device)?;

        let device = Device::with_path(&info.id).map_err(|e| map_io(&info.label, e))?;

        let mut format = device.format().map_err(|e| map_io(&info.label, e))?;
        format.width = request.width.value();
        format.height = request.height.value();
        format.fourcc = FourCC::new(MJPEG);
        let format = device.set_format(&format).map_err(|e| map_io(&info.label, e))?;

        if format.fourcc != FourCC::new(MJPEG) {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} does not offer MJPEG capture",
                info.label
            )));
        }
        if request.width.is_exact() && format.width != request.width.value() {
            return Err(CaptureError::Overconstrained {
                constraint: "width",
                requested: request.width.value().to_string(),
                supported: format.width.to_string(),
            });
        }
        if request.height.is_exact() && format.height != request.height.value() {
            return Err(CaptureError::Overconstrained {
                constraint: "height",
                requested: request.height.value().to_string(),
                supported: format.height.to_string(),
            });
        }

        let fps = request.frame_rate.value().round().max(1.0) as u32;
        let frame_rate = match device.set_params(&Parameters::with_fps(fps)) {
            Ok(params) if params.interval.numerator > 0 => {
                f64::from(params.interval.denominator) / f64::from(params.interval.numerator)
            }
            Ok(_) => f64::from(fps),
            Err(e) => {
                warn!(device = %info.label, error = %e, "could not set frame rate");
                f64::from(fps)
            }
        };

        debug!(device = %info.label, width = format.width, height = format.height, frame_rate, "v4l2 format set");

        let label = info.label.clone();
        let running = Arc::new(AtomicBool::new(true));
        let (frame_tx, frames) = mpsc::channel::<FrameResult>(FRAME_QUEUE);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), CaptureError>>();

        let thread_running = running.clone();
        let thread_label = label.clone();
        let worker = std::thread::Builder::new()
            .name("v4l2-capture".to_string())
            .spawn(move || {
                let mut stream =
                    match MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT) {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(map_io(&thread_label, e)));
                            return;
                        }
                    };
                stream.set_timeout(READ_TIMEOUT);
                let _ = ready_tx.send(Ok(()));
                capture_loop(&mut stream, &thread_label, frame_tx, thread_running);
            })
            .map_err(|e| CaptureError::DeviceUnavailable(format!("{}: {}", label, e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(CaptureError::DeviceUnavailable(format!(
                    "{}: capture thread exited",
                    label
                )));
            }
        }

        Ok(Box::new(V4l2Stream {
            label,
            negotiated: NegotiatedGeometry {
                width: format.width,
                height: format.height,
                frame_rate,
            },
            frames: Some(frames),
            running,
            worker: Some(worker),
        }))
    }
}

/// Runs on the capture thread until `running` clears, the pipeline drops its
/// receiver, or the device fails. Full queue means the pipeline is behind:
/// the frame is dropped.
fn capture_loop(
    stream: &mut MmapStream<'_>,
    label: &str,
    frames: mpsc::Sender<FrameResult>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        let frame = match stream.next() {
            Ok((buf, _meta)) => image::load_from_memory_with_format(buf, ImageFormat::Jpeg)
                .map(|frame| frame.to_rgb8())
                .map_err(|e| CaptureError::Frame(e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) => {
                // Dropping the sender tells `grab` the device is gone.
                warn!(device = %label, error = %e, "camera read failed");
                return;
            }
        };
        match frames.try_send(frame) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Closed(_)) => return,
        }
    }
}

/// Newest decoded frame without waiting, or `CaptureError::Frame` when none
/// arrived since the last call.
fn newest_frame(
    frames: &mut mpsc::Receiver<FrameResult>,
    label: &str,
) -> Result<RgbImage, CaptureError> {
    let mut latest = None;
    loop {
        match frames.try_recv() {
            Ok(frame) => latest = Some(frame),
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                if latest.is_none() {
                    return Err(CaptureError::DeviceUnavailable(format!(
                        "{} stopped delivering frames",
                        label
                    )));
                }
                break;
            }
        }
    }
    latest.unwrap_or_else(|| Err(CaptureError::Frame("no new frame yet".to_string())))
}

fn map_io(label: &str, err: io::Error) -> CaptureError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => CaptureError::PermissionDenied(format!("{}: {}", label, err)),
        _ => CaptureError::DeviceUnavailable(format!("{}: {}", label, err)),
    }
}

struct V4l2Stream {
    label: String,
    negotiated: NegotiatedGeometry,
    frames: Option<mpsc::Receiver<FrameResult>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CameraStream for V4l2Stream {
    fn negotiated(&self) -> NegotiatedGeometry {
        self.negotiated
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn grab(&mut self) -> Result<RgbImage, CaptureError> {
        let frames = self
            .frames
            .as_mut()
            .ok_or_else(|| CaptureError::Frame("stream stopped".to_string()))?;
        newest_frame(frames, &self.label)
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.frames.take();
        // The thread owns the device; joining it means STREAMOFF has run and
        // the node can be reopened.
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(device = %self.label, "capture thread panicked");
            }
        }
    }
}

impl Drop for V4l2Stream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(level: u8) -> FrameResult {
        Ok(RgbImage::from_pixel(4, 4, image::Rgb([level; 3])))
    }

    #[test]
    fn test_newest_frame_never_waits() {
        let (tx, mut rx) = mpsc::channel(FRAME_QUEUE);
        assert!(matches!(newest_frame(&mut rx, "cam"), Err(CaptureError::Frame(_))));

        tx.try_send(frame(1)).unwrap();
        tx.try_send(frame(2)).unwrap();
        // Queue is full: the capture thread drops instead of blocking.
        assert!(matches!(tx.try_send(frame(3)), Err(TrySendError::Full(_))));

        let newest = newest_frame(&mut rx, "cam").unwrap();
        assert_eq!(newest.get_pixel(0, 0)[0], 2);
        assert!(matches!(newest_frame(&mut rx, "cam"), Err(CaptureError::Frame(_))));
    }

    #[test]
    fn test_capture_thread_exit_is_reported() {
        let (tx, mut rx) = mpsc::channel(FRAME_QUEUE);
        tx.try_send(frame(7)).unwrap();
        drop(tx);

        assert_eq!(newest_frame(&mut rx, "cam").unwrap().get_pixel(0, 0)[0], 7);
        assert!(matches!(
            newest_frame(&mut rx, "cam"),
            Err(CaptureError::DeviceUnavailable(_))
        ));
    }
}
