//! H.264 Annex-B elementary stream via openh264 (cargo feature `h264`).

use image::RgbImage;
use openh264::encoder::Encoder;
use openh264::formats::YUVBuffer;

use super::{Muxer, H264_MIME};
use crate::capture::Resolution;
use crate::error::EncoderError;

pub struct H264Muxer {
    encoder: Encoder,
    output: Resolution,
    frame_rate: f64,
    pending: Vec<u8>,
}

impl H264Muxer {
    pub fn new(output: Resolution, frame_rate: f64) -> Result<Self, EncoderError> {
        if output.width % 2 != 0 || output.height % 2 != 0 {
            return Err(EncoderError::Encode(format!(
                "H.264 needs even dimensions, got {}",
                output
            )));
        }
        let encoder = Encoder::new()
            .map_err(|e| EncoderError::Encode(format!("failed to create H.264 encoder: {}", e)))?;
        Ok(Self {
            encoder,
            output,
            frame_rate,
            pending: Vec::new(),
        })
    }
}

impl Muxer for H264Muxer {
    fn mime(&self) -> String {
        format!(
            "{}; width={}; height={}; framerate={}",
            H264_MIME, self.output.width, self.output.height, self.frame_rate
        )
    }

    fn push(&mut self, frame: &RgbImage) -> Result<(), EncoderError> {
        if frame.dimensions() != (self.output.width, self.output.height) {
            return Err(EncoderError::Encode(format!(
                "frame is {}x{}, stream is {}",
                frame.width(),
                frame.height(),
                self.output
            )));
        }
        let yuv = rgb_to_i420(frame);
        let bitstream = self
            .encoder
            .encode(&yuv)
            .map_err(|e| EncoderError::Encode(format!("H.264 encoding failed: {}", e)))?;
        self.pending.extend_from_slice(&bitstream.to_vec());
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

/// BT.601 RGB to planar 4:2:0, chroma taken from the top-left pixel of each
/// 2×2 block.
fn rgb_to_i420(frame: &RgbImage) -> YUVBuffer {
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let mut data = vec![0u8; w * h * 3 / 2];
    let (y_plane, chroma) = data.split_at_mut(w * h);
    let (u_plane, v_plane) = chroma.split_at_mut(w * h / 4);

    for (x, y, px) in frame.enumerate_pixels() {
        let [r, g, b] = px.0.map(i32::from);
        let (x, y) = (x as usize, y as usize);
        y_plane[y * w + x] = (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(0, 255) as u8;
        if x % 2 == 0 && y % 2 == 0 {
            let i = (y / 2) * (w / 2) + x / 2;
            u_plane[i] = (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128).clamp(0, 255) as u8;
            v_plane[i] = (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128).clamp(0, 255) as u8;
        }
    }

    YUVBuffer::from_vec(data, w, h)
}
