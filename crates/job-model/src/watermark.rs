//! Raster watermark description.

use serde::{Deserialize, Serialize};

/// Straight (non-premultiplied) RGBA color.
pub type Rgba = [u8; 4];

/// Stroke weight of the rendered text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FontWeight {
    Regular,
    #[default]
    Bold,
}

/// Everything needed to rasterize one watermark layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkSpec {
    pub text: String,
    /// Font size in pixels.
    pub font_px: f32,
    pub weight: FontWeight,
    pub fill: Rgba,
    /// Background box; `None` draws text only.
    pub box_color: Option<Rgba>,
    pub corner_radius: u32,
    pub padding: u32,
}

impl WatermarkSpec {
    /// Same spec at a different font size, with padding and radius scaled along.
    pub fn rescaled(&self, factor: f32) -> Self {
        let scale_u32 = |v: u32| ((v as f32 * factor).round() as u32).max(MIN_PADDING);
        Self {
            text: self.text.clone(),
            font_px: (self.font_px * factor).max(MIN_FONT_PX),
            weight: self.weight,
            fill: self.fill,
            box_color: self.box_color,
            corner_radius: (self.corner_radius as f32 * factor).round() as u32,
            padding: scale_u32(self.padding),
        }
    }
}

/// Canvas padding never drops below this, so empty text still yields
/// a drawable canvas.
pub const MIN_PADDING: u32 = 2;

/// Smallest font size worth rendering.
pub const MIN_FONT_PX: f32 = 6.0;
