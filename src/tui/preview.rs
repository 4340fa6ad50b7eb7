//! Live preview of the composited frame using ratatui-image.
//!
//! The terminal graphics protocol is detected once at startup:
//! - Sixel (Windows Terminal, xterm, foot, WezTerm, etc.)
//! - Kitty graphics protocol (Kitty, WezTerm, Ghostty)
//! - iTerm2 inline images (iTerm2, WezTerm)
//! - Halfblocks fallback (any terminal with 24-bit color)

use image::{DynamicImage, RgbImage};
use ratatui_image::picker::{Picker, ProtocolType};
use ratatui_image::protocol::StatefulProtocol;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Re-encoding for the terminal is costly; cap preview refreshes.
pub const PREVIEW_INTERVAL: Duration = Duration::from_millis(200);

/// Create a Picker by querying terminal capabilities.
///
/// `force_protocol` skips detection. Otherwise try the terminal query, then
/// environment heuristics, then fall back to halfblocks.
///
/// Should be called BEFORE entering raw mode / alternate screen.
pub fn create_picker(force_protocol: Option<&str>) -> Picker {
    if let Some(proto_name) = force_protocol {
        let proto_type = match proto_name.to_lowercase().as_str() {
            "sixel" => ProtocolType::Sixel,
            "kitty" => ProtocolType::Kitty,
            "iterm2" | "iterm" => ProtocolType::Iterm2,
            "halfblocks" | "half" | "text" => ProtocolType::Halfblocks,
            _ => {
                warn!(protocol = proto_name, "unknown graphics protocol, using auto-detect");
                return auto_detect_picker();
            }
        };
        let mut picker = Picker::halfblocks();
        picker.set_protocol_type(proto_type);
        info!(protocol = ?proto_type, "preview graphics forced");
        return picker;
    }

    auto_detect_picker()
}

fn auto_detect_picker() -> Picker {
    match Picker::from_query_stdio() {
        Ok(picker) => {
            info!(protocol = ?picker.protocol_type(), "preview graphics detected");
            picker
        }
        Err(_) => {
            let picker = env_heuristic_picker();
            info!(protocol = ?picker.protocol_type(), "preview graphics from environment");
            picker
        }
    }
}

/// Guess the protocol from environment variables.
fn env_heuristic_picker() -> Picker {
    let term_program = std::env::var("TERM_PROGRAM").unwrap_or_default();
    let term = std::env::var("TERM").unwrap_or_default();
    let wt_session = std::env::var("WT_SESSION").unwrap_or_default();

    let proto = if term_program.contains("WezTerm") || !wt_session.is_empty() {
        ProtocolType::Sixel
    } else if term_program.contains("iTerm") {
        ProtocolType::Iterm2
    } else if term.contains("xterm-kitty")
        || term_program.contains("kitty")
        || term_program.to_lowercase().contains("ghostty")
    {
        ProtocolType::Kitty
    } else {
        ProtocolType::Halfblocks
    };

    let mut picker = Picker::halfblocks();
    if proto != ProtocolType::Halfblocks {
        picker.set_protocol_type(proto);
    }
    picker
}

/// Most recent preview image, already encoded for the terminal.
#[derive(Default)]
pub struct Preview {
    protocol: Option<StatefulProtocol>,
    size: Option<(u32, u32)>,
    last_update: Option<Instant>,
}

impl Preview {
    pub fn is_due(&self, now: Instant) -> bool {
        self.last_update
            .map_or(true, |last| now.duration_since(last) >= PREVIEW_INTERVAL)
    }

    /// Replace the preview with `frame` unless one was shown very recently.
    pub fn update(&mut self, picker: &mut Picker, frame: &RgbImage) {
        let now = Instant::now();
        if frame.width() == 0 || frame.height() == 0 || !self.is_due(now) {
            return;
        }
        self.protocol = Some(picker.new_resize_protocol(DynamicImage::ImageRgb8(frame.clone())));
        self.size = Some(frame.dimensions());
        self.last_update = Some(now);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn protocol_mut(&mut self) -> Option<&mut StatefulProtocol> {
        self.protocol.as_mut()
    }

    #[cfg(test)]
    pub fn size(&self) -> Option<(u32, u32)> {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_throttles_updates() {
        let mut picker = Picker::halfblocks();
        let mut preview = Preview::default();
        assert!(preview.is_due(Instant::now()));

        preview.update(&mut picker, &RgbImage::new(32, 24));
        assert_eq!(preview.size(), Some((32, 24)));
        assert!(preview.protocol_mut().is_some());
        assert!(!preview.is_due(Instant::now()));

        // Too soon: the first frame stays.
        preview.update(&mut picker, &RgbImage::new(64, 48));
        assert_eq!(preview.size(), Some((32, 24)));

        preview.clear();
        assert!(preview.protocol_mut().is_none());
    }

    #[test]
    fn test_empty_frame_is_ignored() {
        let mut picker = Picker::halfblocks();
        let mut preview = Preview::default();
        preview.update(&mut picker, &RgbImage::new(0, 0));
        assert_eq!(preview.size(), None);
    }

    #[test]
    fn test_forced_protocol() {
        let picker = create_picker(Some("kitty"));
        assert_eq!(picker.protocol_type(), ProtocolType::Kitty);
    }
}
