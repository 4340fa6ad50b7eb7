/// Sub-rectangle of a source frame, in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Centered digital-zoom crop: each side is `source / zoom`.
///
/// Zoom factors below 1.0 (or non-finite ones) give the full frame.
pub fn compute_crop_rect(source_width: u32, source_height: u32, zoom: f64) -> CropRect {
    let zoom = if zoom.is_finite() && zoom > 1.0 { zoom } else { 1.0 };

    let side = |source: u32| -> u32 {
        let scaled = (f64::from(source) / zoom).round() as u32;
        scaled.clamp(1u32.min(source), source)
    };

    let width = side(source_width);
    let height = side(source_height);

    CropRect {
        x: (source_width - width) / 2,
        y: (source_height - height) / 2,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_at_zoom_one() {
        assert_eq!(
            compute_crop_rect(1920, 1080, 1.0),
            CropRect {
                x: 0,
                y: 0,
                width: 1920,
                height: 1080
            }
        );
        assert_eq!(compute_crop_rect(641, 479, 0.5), compute_crop_rect(641, 479, 1.0));
    }

    #[test]
    fn test_zoom_two_is_centered_quarter() {
        assert_eq!(
            compute_crop_rect(2560, 1440, 2.0),
            CropRect {
                x: 640,
                y: 360,
                width: 1280,
                height: 720
            }
        );
    }

    #[test]
    fn test_crop_contained_and_centered() {
        let sources = [(1u32, 1u32), (3, 7), (320, 240), (641, 479), (1920, 1080), (4096, 2160)];
        for (sw, sh) in sources {
            let mut zoom = 1.0;
            while zoom <= 8.0 {
                let r = compute_crop_rect(sw, sh, zoom);
                assert!(r.width >= 1 && r.height >= 1);
                assert!(r.x + r.width <= sw, "{}x{} zoom {}", sw, sh, zoom);
                assert!(r.y + r.height <= sh, "{}x{} zoom {}", sw, sh, zoom);

                let expected_w = f64::from(sw) / zoom;
                assert!((f64::from(r.width) - expected_w).abs() <= 1.0 || r.width == 1);

                // Margins differ by at most the odd leftover pixel.
                let right = sw - r.x - r.width;
                let bottom = sh - r.y - r.height;
                assert!(right.abs_diff(r.x) <= 1);
                assert!(bottom.abs_diff(r.y) <= 1);
                zoom += 0.1;
            }
        }
    }
}
