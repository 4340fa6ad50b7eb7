//! Streaming pipeline controller.
//!
//! Owns one capture, one encoder and one transport per session and walks
//! them through `Idle -> Starting -> Streaming -> Stopping -> Idle`. All
//! mutation happens on the caller's task: `step` waits for the next wake-up
//! (transport event, render tick or flush tick) and applies it synchronously,
//! so dropping a pending `step` never leaves the controller half-updated.

pub mod wake_lock;
pub mod zoom;

use image::RgbImage;
use serde::Serialize;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::capture::{
    negotiate, CameraBackend, CaptureConstraints, CaptureSession, DeviceSelector,
    NegotiatedGeometry, ResolutionClass, ResolutionPolicy,
};
use crate::encoder::{CodecSupport, EncoderMode, FrameEncoder};
use crate::error::{CaptureError, PipelineError, TransportError};
use crate::render::{compute_crop_rect, render, OverlayState};
use crate::status::{Readings, ReadingsFeed};
use crate::transport::{Endpoint, TransportEvent, TransportSession};

pub use wake_lock::WakeLock;
pub use zoom::ZoomState;

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Starting,
    Streaming,
    Stopping,
}

impl PipelineState {
    pub fn is_active(self) -> bool {
        matches!(self, PipelineState::Starting | PipelineState::Streaming)
    }
}

/// User-facing knobs for the next session.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub endpoint: Endpoint,
    pub resolution: ResolutionClass,
    pub frame_rate: f64,
    pub zoom: ZoomState,
    pub device: DeviceSelector,
    pub mode: EncoderMode,
    pub policy: ResolutionPolicy,
    /// Send a `stream-info` text message before the first frame.
    pub announce: bool,
    pub inhibit_sleep: bool,
}

impl PipelineConfig {
    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            output: self.resolution.resolution(),
            zoom: self.zoom.factor(),
            frame_rate: self.frame_rate,
            device: self.device.clone(),
            policy: self.policy,
        }
    }
}

/// What a `step` did.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Transport opened and the render loop is running.
    Streaming { url: String, mime: String },
    /// One render tick. `sent` is the payload size when something went out.
    Frame { sequence: u64, sent: Option<usize> },
    /// Buffered continuous-mode bytes went out.
    Flushed { bytes: usize },
    /// The session ended on an error and the controller is back to `Idle`.
    Failed(PipelineError),
    /// Stale or redundant wake-up; nothing changed.
    Ignored,
}

/// First text message of a session, telling the receiver how to decode.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamInfo<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    mime_type: &'a str,
    width: u32,
    height: u32,
    fps: f64,
    zoom: f64,
}

/// Periodic timers of one streaming session.
///
/// Each session gets a fresh id; a tick is only ever delivered to the loop
/// that produced it, and dropping the handle cancels both timers.
pub struct RenderLoopHandle {
    id: u64,
    tick: Interval,
    flush: Option<Interval>,
}

enum Wake {
    Tick,
    Flush,
}

impl RenderLoopHandle {
    fn new(id: u64, frame_interval: Duration, flush_interval: Option<Duration>) -> Self {
        let mut tick = interval(frame_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let flush = flush_interval.map(|period| {
            let mut flush = interval(period);
            flush.set_missed_tick_behavior(MissedTickBehavior::Skip);
            flush
        });
        Self { id, tick, flush }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    async fn next(&mut self) -> Wake {
        match &mut self.flush {
            Some(flush) => tokio::select! {
                _ = self.tick.tick() => Wake::Tick,
                _ = flush.tick() => Wake::Flush,
            },
            None => {
                self.tick.tick().await;
                Wake::Tick
            }
        }
    }
}

pub fn frame_interval(frame_rate: f64) -> Duration {
    let fps = if frame_rate.is_finite() && frame_rate > 0.0 {
        frame_rate
    } else {
        1.0
    };
    Duration::from_secs_f64(1.0 / fps)
}

pub struct PipelineController {
    state: PipelineState,
    config: PipelineConfig,
    backend: Box<dyn CameraBackend>,
    codecs: Box<dyn CodecSupport>,
    capture: CaptureSession,
    encoder: Option<FrameEncoder>,
    transport: Option<TransportSession>,
    render_loop: Option<RenderLoopHandle>,
    wake_lock: Option<WakeLock>,
    readings: ReadingsFeed,
    negotiated: Option<NegotiatedGeometry>,
    surface: RgbImage,
    status: String,
    next_loop_id: u64,
    frames: u64,
    frames_sent: u64,
}

impl PipelineController {
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: PipelineConfig,
        backend: Box<dyn CameraBackend>,
        codecs: Box<dyn CodecSupport>,
    ) -> Self {
        Self {
            state: PipelineState::Idle,
            config,
            backend,
            codecs,
            capture: CaptureSession::new(),
            encoder: None,
            transport: None,
            render_loop: None,
            wake_lock: None,
            readings: ReadingsFeed::spawn(),
            negotiated: None,
            surface: RgbImage::new(0, 0),
            status: "Ready".to_string(),
            next_loop_id: 0,
            frames: 0,
            frames_sent: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn negotiated(&self) -> Option<NegotiatedGeometry> {
        self.negotiated
    }

    pub fn device_label(&self) -> Option<&str> {
        self.capture.active().map(|a| a.device_label())
    }

    /// Last composited frame. Blank until the first tick of a session.
    pub fn last_frame(&self) -> &RgbImage {
        &self.surface
    }

    pub fn readings(&self) -> Readings {
        self.readings.latest()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn backend(&self) -> &dyn CameraBackend {
        self.backend.as_ref()
    }

    /// Negotiate, pick an encoder, open the camera and start connecting.
    /// Any failure leaves the controller `Idle` with everything released.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.state != PipelineState::Idle {
            return Err(PipelineError::Busy(self.state));
        }
        if self.config.endpoint.host.trim().is_empty() || self.config.endpoint.port == 0 {
            let err = PipelineError::MissingEndpoint;
            self.status = err.to_string();
            return Err(err);
        }

        self.state = PipelineState::Starting;
        match self.open_session() {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(class = e.class(), error = %e, "failed to start streaming");
                self.stop();
                self.status = format!("Error: {}", e);
                Err(e)
            }
        }
    }

    fn open_session(&mut self) -> Result<(), PipelineError> {
        let constraints = self.config.constraints();
        let request = negotiate(&constraints)?;
        let encoder = FrameEncoder::select(
            self.config.mode,
            constraints.output,
            constraints.frame_rate,
            self.codecs.as_ref(),
        )?;

        let active = self.capture.open(self.backend.as_mut(), &request)?;
        let negotiated = active.negotiated();
        info!(
            device = active.device_label(),
            granted = %negotiated.resolution(),
            output = %constraints.output,
            "capture ready"
        );

        let url = self.config.endpoint.url();
        self.negotiated = Some(negotiated);
        self.encoder = Some(encoder);
        self.surface = RgbImage::new(constraints.output.width, constraints.output.height);
        self.transport = Some(TransportSession::connect(url.clone()));
        self.status = format!("Connecting to {}...", url);
        Ok(())
    }

    /// Tear down the session in reverse order. Safe in any state.
    pub fn stop(&mut self) {
        if self.state == PipelineState::Idle {
            return;
        }
        self.state = PipelineState::Stopping;

        if let Some(render_loop) = self.render_loop.take() {
            debug!(id = render_loop.id(), "render loop cancelled");
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.capture.close();
        if let Some(mut encoder) = self.encoder.take() {
            // Partial continuous-mode data has nowhere to go once the socket is closing.
            if let Some(rest) = encoder.flush() {
                debug!(bytes = rest.len(), "discarded unflushed encoder output");
            }
        }
        self.wake_lock = None;
        self.negotiated = None;

        self.state = PipelineState::Idle;
        self.status = "Streaming stopped".to_string();
        info!(frames_sent = self.frames_sent, "pipeline stopped");
    }

    /// Wait for the next wake-up and apply it. Pending forever while idle.
    pub async fn step(&mut self) -> PipelineEvent {
        enum Woke {
            Transport(TransportEvent),
            Render(Wake),
        }

        let woke = tokio::select! {
            biased;
            event = next_transport_event(self.transport.as_mut()) => Woke::Transport(event),
            wake = next_render_wake(self.render_loop.as_mut()) => Woke::Render(wake),
        };

        match woke {
            Woke::Transport(event) => self.on_transport_event(event),
            Woke::Render(Wake::Tick) => self.on_tick(),
            Woke::Render(Wake::Flush) => self.on_flush(),
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) -> PipelineEvent {
        let endpoint = match self.transport.as_ref() {
            Some(transport) => transport.url().to_string(),
            None => return PipelineEvent::Ignored,
        };

        match event {
            TransportEvent::Opened if self.state == PipelineState::Starting => {
                self.begin_streaming(endpoint)
            }
            TransportEvent::Opened => PipelineEvent::Ignored,
            TransportEvent::Failed(reason) if self.state == PipelineState::Starting => {
                self.fail(TransportError::Connect { endpoint, reason }.into())
            }
            TransportEvent::Failed(reason) if self.state == PipelineState::Streaming => {
                self.fail(TransportError::Lost { endpoint, reason }.into())
            }
            TransportEvent::Closed if self.state.is_active() => {
                self.fail(TransportError::ClosedUnexpectedly { endpoint }.into())
            }
            _ => PipelineEvent::Ignored,
        }
    }

    fn begin_streaming(&mut self, url: String) -> PipelineEvent {
        let Some(encoder) = self.encoder.as_ref() else {
            return PipelineEvent::Ignored;
        };
        let mime = encoder.mime();
        let flush_interval = encoder.flush_interval();

        if self.config.announce {
            self.announce(&mime);
        }

        self.next_loop_id += 1;
        self.render_loop = Some(RenderLoopHandle::new(
            self.next_loop_id,
            frame_interval(self.config.frame_rate),
            flush_interval,
        ));
        if self.config.inhibit_sleep {
            self.wake_lock = WakeLock::acquire("streaming camera");
        }

        self.state = PipelineState::Streaming;
        self.status = format!("Streaming to {}", url);
        info!(url = %url, mime = %mime, loop_id = self.next_loop_id, "streaming started");
        PipelineEvent::Streaming { url, mime }
    }

    fn announce(&self, mime: &str) {
        let info = StreamInfo {
            kind: "stream-info",
            mime_type: mime,
            width: self.surface.width(),
            height: self.surface.height(),
            fps: self.config.frame_rate,
            zoom: self.config.zoom.factor(),
        };
        match serde_json::to_string(&info) {
            Ok(text) => {
                if let Some(transport) = self.transport.as_ref() {
                    transport.send_text(text);
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize stream info"),
        }
    }

    fn on_tick(&mut self) -> PipelineEvent {
        if !self.is_live() {
            return PipelineEvent::Ignored;
        }

        let overlay = self.overlay_snapshot();
        let frame = match self.capture.active_mut().map(|a| a.grab()) {
            Some(Ok(frame)) => frame,
            Some(Err(CaptureError::Frame(reason))) => {
                debug!(reason = %reason, "frame skipped");
                return PipelineEvent::Ignored;
            }
            Some(Err(e)) => return self.fail(e.into()),
            None => return PipelineEvent::Ignored,
        };

        let crop = compute_crop_rect(frame.width(), frame.height(), self.config.zoom.factor());
        render(&mut self.surface, &overlay, &frame, crop);
        self.frames += 1;

        let encoded = match self.encoder.as_mut() {
            Some(encoder) => encoder.encode(&self.surface),
            None => return PipelineEvent::Ignored,
        };
        match encoded {
            Ok(Some(payload)) => {
                let sent = self.send(payload);
                PipelineEvent::Frame {
                    sequence: self.frames,
                    sent,
                }
            }
            Ok(None) => PipelineEvent::Frame {
                sequence: self.frames,
                sent: None,
            },
            Err(e) => self.fail(e.into()),
        }
    }

    fn on_flush(&mut self) -> PipelineEvent {
        if !self.is_live() {
            return PipelineEvent::Ignored;
        }
        match self.encoder.as_mut().and_then(|e| e.flush()) {
            Some(chunk) => match self.send(chunk) {
                Some(bytes) => PipelineEvent::Flushed { bytes },
                None => PipelineEvent::Ignored,
            },
            None => PipelineEvent::Ignored,
        }
    }

    fn send(&mut self, payload: Vec<u8>) -> Option<usize> {
        let bytes = payload.len();
        let sent = self
            .transport
            .as_ref()
            .is_some_and(|transport| transport.send(payload));
        if sent {
            self.frames_sent += 1;
            Some(bytes)
        } else {
            None
        }
    }

    /// Ticks only do work while streaming on an open socket with a live camera.
    fn is_live(&self) -> bool {
        self.state == PipelineState::Streaming
            && self.capture.is_open()
            && self.transport.as_ref().is_some_and(|t| t.is_open())
    }

    fn fail(&mut self, err: PipelineError) -> PipelineEvent {
        warn!(class = err.class(), error = %err, "streaming failed");
        self.stop();
        self.status = format!("Error: {}", err);
        PipelineEvent::Failed(err)
    }

    fn overlay_snapshot(&self) -> OverlayState {
        let readings = self.readings.latest();
        OverlayState {
            datetime: readings.datetime,
            endpoint: self.config.endpoint.url(),
            app_version: APP_VERSION.to_string(),
            resolution: self.config.resolution.label(),
            zoom: self.config.zoom.label(),
            battery: readings.battery,
            device: self.device_label().unwrap_or_default().to_string(),
        }
    }

    // Reconfiguration. While a session is active the change takes effect by
    // restarting it; otherwise it applies to the next `start`.

    pub fn set_zoom(&mut self, factor: f64) -> Result<(), PipelineError> {
        if self.config.zoom.set(factor) {
            self.restart_if_active()
        } else {
            Ok(())
        }
    }

    pub fn zoom_in(&mut self) -> Result<(), PipelineError> {
        if self.config.zoom.zoom_in() {
            self.restart_if_active()
        } else {
            Ok(())
        }
    }

    pub fn zoom_out(&mut self) -> Result<(), PipelineError> {
        if self.config.zoom.zoom_out() {
            self.restart_if_active()
        } else {
            Ok(())
        }
    }

    pub fn set_resolution(&mut self, class: ResolutionClass) -> Result<(), PipelineError> {
        if self.config.resolution == class {
            return Ok(());
        }
        self.config.resolution = class;
        self.restart_if_active()
    }

    pub fn set_frame_rate(&mut self, frame_rate: f64) -> Result<(), PipelineError> {
        if self.config.frame_rate == frame_rate {
            return Ok(());
        }
        self.config.frame_rate = frame_rate;
        self.restart_if_active()
    }

    pub fn select_device(&mut self, device: DeviceSelector) -> Result<(), PipelineError> {
        if self.config.device == device {
            return Ok(());
        }
        self.config.device = device;
        self.restart_if_active()
    }

    pub fn set_mode(&mut self, mode: EncoderMode) -> Result<(), PipelineError> {
        if self.config.mode == mode {
            return Ok(());
        }
        self.config.mode = mode;
        self.restart_if_active()
    }

    fn restart_if_active(&mut self) -> Result<(), PipelineError> {
        if !self.state.is_active() {
            return Ok(());
        }
        info!("renegotiating capture");
        self.stop();
        self.start()
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn next_transport_event(transport: Option<&mut TransportSession>) -> TransportEvent {
    match transport {
        Some(transport) => transport.next_event().await,
        None => std::future::pending().await,
    }
}

async fn next_render_wake(render_loop: Option<&mut RenderLoopHandle>) -> Wake {
    match render_loop {
        Some(render_loop) => render_loop.next().await,
        None => std::future::pending().await,
    }
}
