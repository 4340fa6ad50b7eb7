//! Frame encoders.
//!
//! Two strategies, fixed for the life of a session:
//! - still: every tick becomes one standalone JPEG payload;
//! - continuous: ticks feed a muxer whose bytes are flushed as chunks every
//!   `1000 / fps` ms.

pub mod mjpeg;
#[cfg(feature = "h264")]
pub mod h264;

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info};

use crate::capture::Resolution;
use crate::error::EncoderError;

/// 0.92 quality factor on the 1-100 JPEG scale.
pub const JPEG_QUALITY: u8 = 92;
pub const STILL_MIME: &str = "image/jpeg";
pub const H264_MIME: &str = "video/h264";
pub const MJPEG_MIME: &str = "multipart/x-mixed-replace";

/// Continuous-mode containers, most preferred first.
pub const CONTINUOUS_PREFERENCES: [&str; 2] = [H264_MIME, MJPEG_MIME];

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum EncoderMode {
    #[default]
    Still,
    Continuous,
}

/// Runtime capability query for continuous-mode containers.
pub trait CodecSupport {
    fn is_supported(&self, mime: &str) -> bool;
}

/// Whatever this build can encode.
pub struct BuiltinCodecs;

impl CodecSupport for BuiltinCodecs {
    fn is_supported(&self, mime: &str) -> bool {
        match mime {
            MJPEG_MIME => true,
            H264_MIME => cfg!(feature = "h264"),
            _ => false,
        }
    }
}

/// Fixed list of supported MIME types.
impl CodecSupport for Vec<&str> {
    fn is_supported(&self, mime: &str) -> bool {
        self.iter().any(|m| *m == mime)
    }
}

/// A container that accumulates frames between flushes.
pub trait Muxer {
    /// Full MIME type, including parameters the receiver needs.
    fn mime(&self) -> String;
    fn push(&mut self, frame: &RgbImage) -> Result<(), EncoderError>;
    /// Bytes muxed since the last flush, if any.
    fn flush(&mut self) -> Option<Vec<u8>>;
}

/// Return the first preference the runtime supports.
pub fn probe<'a>(
    preferences: &[&'a str],
    support: &dyn CodecSupport,
) -> Result<&'a str, EncoderError> {
    preferences
        .iter()
        .copied()
        .find(|mime| support.is_supported(mime))
        .ok_or_else(|| EncoderError::Unsupported {
            tried: preferences.iter().map(|m| m.to_string()).collect(),
        })
}

pub enum FrameEncoder {
    Still { quality: u8 },
    Continuous {
        muxer: Box<dyn Muxer>,
        flush_interval: Duration,
    },
}

impl FrameEncoder {
    /// Choose the encoder for a session. Fails before anything is opened.
    pub fn select(
        mode: EncoderMode,
        output: Resolution,
        frame_rate: f64,
        support: &dyn CodecSupport,
    ) -> Result<Self, EncoderError> {
        let encoder = match mode {
            EncoderMode::Still => FrameEncoder::Still {
                quality: JPEG_QUALITY,
            },
            EncoderMode::Continuous => {
                let mime = probe(&CONTINUOUS_PREFERENCES, support)?;
                FrameEncoder::Continuous {
                    muxer: new_muxer(mime, output, frame_rate)?,
                    flush_interval: flush_interval(frame_rate),
                }
            }
        };
        info!(mime = %encoder.mime(), "encoder selected");
        Ok(encoder)
    }

    pub fn mime(&self) -> String {
        match self {
            FrameEncoder::Still { .. } => STILL_MIME.to_string(),
            FrameEncoder::Continuous { muxer, .. } => muxer.mime(),
        }
    }

    pub fn flush_interval(&self) -> Option<Duration> {
        match self {
            FrameEncoder::Still { .. } => None,
            FrameEncoder::Continuous { flush_interval, .. } => Some(*flush_interval),
        }
    }

    /// Encode one composited frame. Still mode yields a payload per call;
    /// continuous mode buffers until `flush`.
    pub fn encode(&mut self, surface: &RgbImage) -> Result<Option<Vec<u8>>, EncoderError> {
        match self {
            FrameEncoder::Still { quality } => encode_jpeg(surface, *quality).map(Some),
            FrameEncoder::Continuous { muxer, .. } => muxer.push(surface).map(|_| None),
        }
    }

    pub fn flush(&mut self) -> Option<Vec<u8>> {
        match self {
            FrameEncoder::Still { .. } => None,
            FrameEncoder::Continuous { muxer, .. } => {
                let chunk = muxer.flush();
                if let Some(ref bytes) = chunk {
                    debug!(bytes = bytes.len(), "muxer flushed");
                }
                chunk
            }
        }
    }
}

fn new_muxer(
    mime: &str,
    output: Resolution,
    frame_rate: f64,
) -> Result<Box<dyn Muxer>, EncoderError> {
    match mime {
        MJPEG_MIME => Ok(Box::new(mjpeg::MjpegMuxer::new(JPEG_QUALITY))),
        #[cfg(feature = "h264")]
        H264_MIME => Ok(Box::new(h264::H264Muxer::new(output, frame_rate)?)),
        other => {
            let _ = (output, frame_rate);
            Err(EncoderError::Unsupported {
                tried: vec![other.to_string()],
            })
        }
    }
}

pub fn flush_interval(frame_rate: f64) -> Duration {
    let fps = if frame_rate.is_finite() && frame_rate > 0.0 {
        frame_rate
    } else {
        1.0
    };
    Duration::from_millis((1000.0 / fps).round().max(1.0) as u64)
}

/// JPEG-encode an RGB frame.
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, EncoderError> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    img.write_with_encoder(encoder)
        .map_err(|e| EncoderError::Encode(format!("JPEG encode failed: {}", e)))?;
    Ok(buf.into_inner())
}
