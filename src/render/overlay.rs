//! Overlay compositor: zoomed camera frame plus a status band.

use font8x8::{UnicodeFonts, BASIC_FONTS, LATIN_FONTS};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use super::crop::CropRect;
use super::OverlayState;

pub const BAND_HEIGHT: u32 = 40;
const GLYPH_SIZE: u32 = 8;
const MARGIN: u32 = 10;
const COLUMN_GAP: u32 = 16;
const LINE_TOPS: [u32; 3] = [4, 16, 28];
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Placed text: drawn from `x`, clipped before `limit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub text: String,
    pub x: u32,
    pub y: u32,
    pub limit: u32,
}

impl TextSpan {
    /// Right edge of what is actually drawn.
    pub fn end(&self) -> u32 {
        (self.x + text_width(&self.text)).min(self.limit)
    }
}

/// Compose one output frame into `surface`.
pub fn render(surface: &mut RgbImage, overlay: &OverlayState, source: &RgbImage, crop: CropRect) {
    draw_source(surface, source, crop);
    shade_band(surface);
    for span in layout(surface.width(), surface.height(), overlay) {
        draw_text(surface, &span);
    }
}

fn draw_source(surface: &mut RgbImage, source: &RgbImage, crop: CropRect) {
    let (width, height) = surface.dimensions();
    let view = imageops::crop_imm(source, crop.x, crop.y, crop.width, crop.height).to_image();

    *surface = if view.dimensions() == (width, height) {
        view
    } else {
        imageops::resize(&view, width, height, FilterType::Triangle)
    };
}

fn shade_band(surface: &mut RgbImage) {
    let band = BAND_HEIGHT.min(surface.height());
    for y in 0..band {
        for x in 0..surface.width() {
            let px = surface.get_pixel_mut(x, y);
            px.0 = px.0.map(|c| c / 2);
        }
    }
}

/// Place the status lines: three left-aligned, three right-aligned.
pub fn layout(width: u32, height: u32, overlay: &OverlayState) -> Vec<TextSpan> {
    let left = overlay.left_lines();
    let right = overlay.right_lines();

    let widest = |lines: &[String]| lines.iter().map(|l| text_width(l)).max().unwrap_or(0);
    let (left_w, right_w) = (widest(&left), widest(&right));
    let right_edge = width.saturating_sub(MARGIN);

    // When both columns cannot fit, each gets half of the surface.
    let left_limit = if MARGIN + left_w + COLUMN_GAP + right_w + MARGIN <= width {
        right_edge
    } else {
        width / 2
    };
    let left_end = (MARGIN + left_w).min(left_limit);

    let mut spans = Vec::new();
    for (row, top) in LINE_TOPS.iter().enumerate() {
        if top + GLYPH_SIZE > height.min(BAND_HEIGHT) {
            break;
        }
        if let Some(text) = left.get(row) {
            spans.push(TextSpan {
                text: text.clone(),
                x: MARGIN,
                y: *top,
                limit: left_end,
            });
        }
        if let Some(text) = right.get(row) {
            let x = right_edge
                .saturating_sub(text_width(text))
                .max(left_end + COLUMN_GAP);
            if x < right_edge {
                spans.push(TextSpan {
                    text: text.clone(),
                    x,
                    y: *top,
                    limit: right_edge,
                });
            }
        }
    }
    spans
}

pub fn text_width(text: &str) -> u32 {
    (text.chars().count() as u32).saturating_mul(GLYPH_SIZE)
}

fn glyph(c: char) -> [u8; 8] {
    BASIC_FONTS
        .get(c)
        .or_else(|| LATIN_FONTS.get(c))
        .or_else(|| BASIC_FONTS.get('?'))
        .unwrap_or([0; 8])
}

fn draw_text(surface: &mut RgbImage, span: &TextSpan) {
    let limit = span.end().min(surface.width());
    let mut x = span.x;
    for c in span.text.chars() {
        if x + GLYPH_SIZE > limit {
            break;
        }
        for (dy, row) in glyph(c).iter().enumerate() {
            let py = span.y + dy as u32;
            if py >= surface.height() {
                break;
            }
            for dx in 0..GLYPH_SIZE {
                if row & (1 << dx) != 0 {
                    surface.put_pixel(x + dx, py, TEXT_COLOR);
                }
            }
        }
        x += GLYPH_SIZE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::compute_crop_rect;

    fn overlay() -> OverlayState {
        OverlayState {
            datetime: "2026-10-19 12:00:00".into(),
            endpoint: "ws://192.168.1.20:8181".into(),
            app_version: "0.1.0".into(),
            resolution: "Medium (640x480)".into(),
            zoom: "Zoom: 2.0x".into(),
            battery: "Battery: 80%".into(),
            device: "Front Camera".into(),
        }
    }

    fn gray(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([200, 200, 200]))
    }

    #[test]
    fn test_render_fills_surface_and_shades_band() {
        let source = gray(1280, 960);
        let mut surface = RgbImage::new(640, 480);
        render(
            &mut surface,
            &overlay(),
            &source,
            compute_crop_rect(1280, 960, 2.0),
        );

        assert_eq!(surface.dimensions(), (640, 480));
        // Band corner is shaded, text area has white glyph pixels, body is untouched.
        assert_eq!(surface.get_pixel(0, 0), &Rgb([100, 100, 100]));
        assert!(surface
            .enumerate_pixels()
            .any(|(_, y, p)| y < BAND_HEIGHT && *p == TEXT_COLOR));
        assert_eq!(surface.get_pixel(320, 300), &Rgb([200, 200, 200]));
    }

    #[test]
    fn test_columns_never_overlap() {
        let mut state = overlay();
        state.endpoint = "wss://a-really-long-host-name.example.internal:8181/ingest".into();
        state.device = "USB 2.0 HD UVC WebCam with an unusually long name".into();

        for width in [160, 320, 640, 1280] {
            let spans = layout(width, 240, &state);
            for row in LINE_TOPS {
                let on_row: Vec<_> = spans.iter().filter(|s| s.y == row).collect();
                if let [left, right] = on_row.as_slice() {
                    assert!(left.end() <= right.x, "width {}: {:?} vs {:?}", width, left, right);
                }
                for span in on_row {
                    assert!(span.end() <= width);
                }
            }
        }
    }

    #[test]
    fn test_right_column_is_right_aligned() {
        let spans = layout(640, 480, &overlay());
        let endpoint = spans
            .iter()
            .find(|s| s.text.starts_with("ws://"))
            .unwrap();
        assert_eq!(endpoint.x + text_width(&endpoint.text), 640 - MARGIN);
    }

    #[test]
    fn test_empty_and_unicode_labels() {
        let mut state = overlay();
        state.device = String::new();
        state.battery = "   ".into();
        state.resolution = "Kamera – højopløsning 📷".into();

        let right = state.right_lines();
        assert_eq!(right[1], "n/a");
        assert!(right[2].starts_with("n/a"));

        let mut surface = RgbImage::new(320, 240);
        render(&mut surface, &state, &gray(320, 240), compute_crop_rect(320, 240, 1.0));
    }

    #[test]
    fn test_tiny_surface() {
        let mut surface = RgbImage::new(4, 4);
        render(&mut surface, &overlay(), &gray(8, 8), compute_crop_rect(8, 8, 8.0));
        assert_eq!(surface.dimensions(), (4, 4));
    }
}
