//! Motion-JPEG in a `multipart/x-mixed-replace` container.
//!
//! Each frame becomes one part:
//!
//! ```text
//! --camstreamframe\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <jpeg bytes>\r\n
//! ```

use image::RgbImage;

use super::{encode_jpeg, Muxer, MJPEG_MIME, STILL_MIME};
use crate::error::EncoderError;

pub const BOUNDARY: &str = "camstreamframe";

pub struct MjpegMuxer {
    quality: u8,
    pending: Vec<u8>,
}

impl MjpegMuxer {
    pub fn new(quality: u8) -> Self {
        Self {
            quality,
            pending: Vec::new(),
        }
    }
}

impl Muxer for MjpegMuxer {
    fn mime(&self) -> String {
        format!("{}; boundary={}", MJPEG_MIME, BOUNDARY)
    }

    fn push(&mut self, frame: &RgbImage) -> Result<(), EncoderError> {
        let jpeg = encode_jpeg(frame, self.quality)?;
        self.pending.extend_from_slice(
            format!(
                "--{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
                BOUNDARY,
                STILL_MIME,
                jpeg.len()
            )
            .as_bytes(),
        );
        self.pending.extend_from_slice(&jpeg);
        self.pending.extend_from_slice(b"\r\n");
        Ok(())
    }

    fn flush(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}
