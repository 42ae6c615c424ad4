//! Watermark sizing relative to the output frame.

use inkmark_common::config::WatermarkDefaults;
use inkmark_job_model::{FontWeight, LayerMotion, Size, WatermarkSpec, MIN_FONT_PX, MIN_PADDING};

/// Share of the mark height taken by the font size.
const FONT_SHARE: f64 = 0.6;

/// Share of the mark height used as padding on each side.
const PADDING_SHARE: f64 = 0.2;

/// Largest share of the frame width a mark may cover.
pub const MAX_WIDTH_SHARE: f64 = 0.9;

/// Build the watermark spec for one layer.
///
/// The intended mark height is `short_side / divisor * scale`, with the
/// prominent divisor for static marks and the smaller one for moving marks.
pub fn layer_spec(
    text: &str,
    motion: LayerMotion,
    frame: Size,
    scale: f64,
    defaults: &WatermarkDefaults,
) -> WatermarkSpec {
    let divisor = if motion.is_moving() {
        defaults.moving_divisor
    } else {
        defaults.static_divisor
    };
    let target_h = frame.short_side() as f64 / divisor * scale;
    let padding = ((target_h * PADDING_SHARE).round() as u32).max(MIN_PADDING);
    let font_px = ((target_h * FONT_SHARE) as f32).max(MIN_FONT_PX);
    let radius_ratio = if defaults.box_padding == 0 {
        0.0
    } else {
        defaults.corner_radius as f64 / defaults.box_padding as f64
    };

    WatermarkSpec {
        text: text.to_string(),
        font_px,
        weight: FontWeight::Bold,
        fill: defaults.fill,
        box_color: (defaults.box_color[3] > 0).then_some(defaults.box_color),
        corner_radius: (padding as f64 * radius_ratio).round() as u32,
        padding,
    }
}

/// Shrink factor needed for `mark` to fit `frame`, or `None` if it already fits.
pub fn fit_factor(frame: Size, mark: Size) -> Option<f32> {
    let max_w = frame.width as f64 * MAX_WIDTH_SHARE;
    let max_h = frame.height as f64;
    if (mark.width as f64) <= max_w && (mark.height as f64) <= max_h {
        return None;
    }
    let factor = (max_w / mark.width.max(1) as f64).min(max_h / mark.height.max(1) as f64);
    Some(factor.clamp(0.05, 1.0) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_mark_is_larger_than_moving() {
        let defaults = WatermarkDefaults::default();
        let frame = Size::new(1280, 720);
        let fixed = layer_spec("x", LayerMotion::Static, frame, 1.0, &defaults);
        let moving = layer_spec("x", LayerMotion::Lissajous, frame, 1.0, &defaults);
        assert!(fixed.font_px > moving.font_px);
        assert_eq!(fixed.padding, 8);
        assert!((fixed.font_px - 24.0).abs() < 1e-3);
    }

    #[test]
    fn test_proportion_is_resolution_independent() {
        let defaults = WatermarkDefaults::default();
        let small = layer_spec("x", LayerMotion::Static, Size::new(1280, 720), 1.0, &defaults);
        let large = layer_spec("x", LayerMotion::Static, Size::new(1920, 1080), 1.0, &defaults);
        assert!((large.font_px / small.font_px - 1.5).abs() < 1e-3);
    }

    #[test]
    fn test_tiny_frame_keeps_minimums() {
        let defaults = WatermarkDefaults::default();
        let spec = layer_spec("", LayerMotion::Hop, Size::new(16, 16), 0.5, &defaults);
        assert_eq!(spec.padding, MIN_PADDING);
        assert_eq!(spec.font_px, MIN_FONT_PX);
    }

    #[test]
    fn test_fit_factor() {
        let frame = Size::new(1000, 500);
        assert_eq!(fit_factor(frame, Size::new(900, 100)), None);
        let factor = fit_factor(frame, Size::new(1800, 100)).unwrap();
        assert!((factor - 0.5).abs() < 1e-6);
    }
}
