//! Per-user style settings.
//!
//! Settings arrive as loosely-typed `(field, value)` strings from the chat
//! layer and are parsed into closed enums here. Unknown names are errors,
//! never silent fallbacks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use inkmark_common::error::{InkmarkError, InkmarkResult};

use crate::geometry::{even_floor, Size};

/// How the watermark is placed on the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementMode {
    /// One mark anchored to a corner.
    #[default]
    Static,
    /// One mark sweeping horizontally along the bottom.
    Slide,
    /// One mark jumping to a random spot every window.
    Hop,
    /// One mark drifting on a Lissajous curve.
    Lissajous,
    /// A static corner mark plus a Lissajous moving mark.
    Dual,
}

/// Motion of a single watermark layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerMotion {
    Static,
    Slide,
    Hop,
    Lissajous,
}

impl LayerMotion {
    pub fn is_moving(self) -> bool {
        !matches!(self, LayerMotion::Static)
    }
}

impl PlacementMode {
    pub const ALL: [PlacementMode; 5] = [
        PlacementMode::Static,
        PlacementMode::Slide,
        PlacementMode::Hop,
        PlacementMode::Lissajous,
        PlacementMode::Dual,
    ];

    /// Layers this mode composes, bottom first.
    pub fn layers(self) -> &'static [LayerMotion] {
        match self {
            PlacementMode::Static => &[LayerMotion::Static],
            PlacementMode::Slide => &[LayerMotion::Slide],
            PlacementMode::Hop => &[LayerMotion::Hop],
            PlacementMode::Lissajous => &[LayerMotion::Lissajous],
            PlacementMode::Dual => &[LayerMotion::Static, LayerMotion::Lissajous],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlacementMode::Static => "static",
            PlacementMode::Slide => "slide",
            PlacementMode::Hop => "hop",
            PlacementMode::Lissajous => "lissajous",
            PlacementMode::Dual => "dual",
        }
    }
}

impl FromStr for PlacementMode {
    type Err = InkmarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(PlacementMode::Static),
            "slide" => Ok(PlacementMode::Slide),
            "hop" => Ok(PlacementMode::Hop),
            "lissajous" => Ok(PlacementMode::Lissajous),
            "dual" => Ok(PlacementMode::Dual),
            other => Err(InkmarkError::invalid_input(format!(
                "Unknown mode '{other}' (expected static, slide, hop, lissajous or dual)"
            ))),
        }
    }
}

impl fmt::Display for PlacementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame corner for static marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
}

impl FromStr for Corner {
    type Err = InkmarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "top-left" | "tl" => Ok(Corner::TopLeft),
            "top-right" | "tr" => Ok(Corner::TopRight),
            "bottom-left" | "bl" => Ok(Corner::BottomLeft),
            "bottom-right" | "br" => Ok(Corner::BottomRight),
            other => Err(InkmarkError::invalid_input(format!(
                "Unknown corner '{other}'"
            ))),
        }
    }
}

/// Output resolution, expressed as the short side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the source size.
    #[default]
    Source,
    P480,
    P720,
    P1080,
}

impl Resolution {
    fn short_side(self) -> Option<u32> {
        match self {
            Resolution::Source => None,
            Resolution::P480 => Some(480),
            Resolution::P720 => Some(720),
            Resolution::P1080 => Some(1080),
        }
    }

    /// Fit `source` to this resolution, preserving aspect ratio.
    ///
    /// Never upscales; both sides are rounded down to even values.
    pub fn target_size(self, source: Size) -> Size {
        let short = source.short_side();
        match self.short_side() {
            Some(target) if short > target => {
                let scale = target as f64 / short as f64;
                let w = (source.width as f64 * scale).round() as u32;
                let h = (source.height as f64 * scale).round() as u32;
                Size::new(even_floor(w), even_floor(h))
            }
            _ => Size::new(even_floor(source.width), even_floor(source.height)),
        }
    }
}

impl FromStr for Resolution {
    type Err = InkmarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "source" | "original" => Ok(Resolution::Source),
            "480" | "480p" => Ok(Resolution::P480),
            "720" | "720p" => Ok(Resolution::P720),
            "1080" | "1080p" => Ok(Resolution::P1080),
            other => Err(InkmarkError::invalid_input(format!(
                "Unsupported resolution '{other}' (expected source, 480p, 720p or 1080p)"
            ))),
        }
    }
}

/// Video codec for the encoded output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
}

impl VideoCodec {
    /// ffmpeg encoder name.
    pub fn encoder(self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
        }
    }
}

impl FromStr for VideoCodec {
    type Err = InkmarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "h264" | "avc" | "x264" => Ok(VideoCodec::H264),
            "h265" | "hevc" | "x265" => Ok(VideoCodec::H265),
            other => Err(InkmarkError::invalid_input(format!(
                "Unsupported codec '{other}' (expected h264 or h265)"
            ))),
        }
    }
}

pub const SPEED_RANGE: (f64, f64) = (0.25, 4.0);
pub const SCALE_RANGE: (f64, f64) = (0.5, 2.0);
pub const CRF_MAX: u8 = 51;
pub const HOP_WINDOW_RANGE: (f64, f64) = (1.0, 60.0);
pub const MARGIN_MAX: u32 = 200;

/// Style and encode settings for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleSettings {
    pub mode: PlacementMode,
    pub corner: Corner,
    /// Motion speed multiplier.
    pub speed: f64,
    /// Watermark size multiplier.
    pub scale: f64,
    pub crf: u8,
    pub resolution: Resolution,
    pub codec: VideoCodec,
    /// Length of each Hop window in seconds.
    pub hop_window_secs: f64,
    /// Distance from the frame edge for static and slide marks.
    pub margin: u32,
}

impl Default for StyleSettings {
    fn default() -> Self {
        Self {
            mode: PlacementMode::Static,
            corner: Corner::BottomRight,
            speed: 1.0,
            scale: 1.0,
            crf: 23,
            resolution: Resolution::Source,
            codec: VideoCodec::H264,
            hop_window_secs: 5.0,
            margin: 20,
        }
    }
}

/// A settable style field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleField {
    Mode,
    Corner,
    Speed,
    Scale,
    Crf,
    Resolution,
    Codec,
    HopWindow,
    Margin,
}

impl FromStr for StyleField {
    type Err = InkmarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "mode" => Ok(StyleField::Mode),
            "corner" => Ok(StyleField::Corner),
            "speed" => Ok(StyleField::Speed),
            "scale" | "size" => Ok(StyleField::Scale),
            "crf" | "quality" => Ok(StyleField::Crf),
            "resolution" | "res" => Ok(StyleField::Resolution),
            "codec" => Ok(StyleField::Codec),
            "hop_window" | "window" => Ok(StyleField::HopWindow),
            "margin" => Ok(StyleField::Margin),
            other => Err(InkmarkError::invalid_input(format!(
                "Unknown setting '{other}'"
            ))),
        }
    }
}

impl StyleSettings {
    /// Parse and apply one field. On error the settings are unchanged.
    pub fn apply(&mut self, field: StyleField, value: &str) -> InkmarkResult<()> {
        match field {
            StyleField::Mode => self.mode = value.parse()?,
            StyleField::Corner => self.corner = value.parse()?,
            StyleField::Speed => self.speed = parse_ranged("speed", value, SPEED_RANGE)?,
            StyleField::Scale => self.scale = parse_ranged("scale", value, SCALE_RANGE)?,
            StyleField::Crf => {
                let crf: u8 = value.trim().parse().map_err(|_| {
                    InkmarkError::invalid_input(format!("crf must be an integer, got '{value}'"))
                })?;
                if crf > CRF_MAX {
                    return Err(InkmarkError::invalid_input(format!(
                        "crf must be between 0 and {CRF_MAX}"
                    )));
                }
                self.crf = crf;
            }
            StyleField::Resolution => self.resolution = value.parse()?,
            StyleField::Codec => self.codec = value.parse()?,
            StyleField::HopWindow => {
                self.hop_window_secs = parse_ranged("hop_window", value, HOP_WINDOW_RANGE)?
            }
            StyleField::Margin => {
                let margin: u32 = value.trim().parse().map_err(|_| {
                    InkmarkError::invalid_input(format!("margin must be an integer, got '{value}'"))
                })?;
                if margin > MARGIN_MAX {
                    return Err(InkmarkError::invalid_input(format!(
                        "margin must be at most {MARGIN_MAX}"
                    )));
                }
                self.margin = margin;
            }
        }
        Ok(())
    }
}

fn parse_ranged(name: &str, value: &str, (min, max): (f64, f64)) -> InkmarkResult<f64> {
    let parsed: f64 = value
        .trim()
        .parse()
        .map_err(|_| InkmarkError::invalid_input(format!("{name} must be a number, got '{value}'")))?;
    if !parsed.is_finite() || parsed < min || parsed > max {
        return Err(InkmarkError::invalid_input(format!(
            "{name} must be between {min} and {max}"
        )));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse_rejects_typos() {
        assert_eq!("Lissajous".parse::<PlacementMode>().unwrap(), PlacementMode::Lissajous);
        assert!("lisajous".parse::<PlacementMode>().is_err());
        assert!("".parse::<PlacementMode>().is_err());
    }

    #[test]
    fn test_dual_mode_has_two_layers() {
        assert_eq!(
            PlacementMode::Dual.layers(),
            &[LayerMotion::Static, LayerMotion::Lissajous]
        );
        for mode in PlacementMode::ALL {
            assert!(!mode.layers().is_empty() && mode.layers().len() <= 2);
        }
    }

    #[test]
    fn test_apply_validates_ranges() {
        let mut style = StyleSettings::default();
        style.apply(StyleField::Crf, "28").unwrap();
        assert_eq!(style.crf, 28);
        assert!(style.apply(StyleField::Crf, "52").is_err());
        assert!(style.apply(StyleField::Speed, "NaN").is_err());
        assert!(style.apply(StyleField::Speed, "9").is_err());
        assert!(style.apply(StyleField::Scale, "abc").is_err());
        assert_eq!(style.crf, 28);
        assert_eq!(style.speed, 1.0);

        style.apply(StyleField::Resolution, "720p").unwrap();
        style.apply(StyleField::Codec, "hevc").unwrap();
        style.apply(StyleField::Corner, "top_left").unwrap();
        assert_eq!(style.resolution, Resolution::P720);
        assert_eq!(style.codec, VideoCodec::H265);
        assert_eq!(style.corner, Corner::TopLeft);
        assert!(style.apply(StyleField::Resolution, "4k").is_err());
    }

    #[test]
    fn test_field_names() {
        assert_eq!("hop-window".parse::<StyleField>().unwrap(), StyleField::HopWindow);
        assert_eq!("quality".parse::<StyleField>().unwrap(), StyleField::Crf);
        assert!("colour".parse::<StyleField>().is_err());
    }

    #[test]
    fn test_target_size_downscales_preserving_aspect() {
        let src = Size::new(1920, 1080);
        assert_eq!(Resolution::P720.target_size(src), Size::new(1280, 720));
        assert_eq!(Resolution::P480.target_size(src), Size::new(852, 480));
        assert_eq!(Resolution::Source.target_size(src), src);
    }

    #[test]
    fn test_target_size_portrait_and_no_upscale() {
        let portrait = Size::new(1080, 1920);
        assert_eq!(Resolution::P720.target_size(portrait), Size::new(720, 1280));

        let small = Size::new(641, 359);
        assert_eq!(Resolution::P1080.target_size(small), Size::new(640, 358));
    }

    proptest::proptest! {
        #[test]
        fn prop_target_size_never_upscales(
            w in 2u32..8000,
            h in 2u32..8000,
            res in proptest::sample::select(vec![
                Resolution::Source,
                Resolution::P480,
                Resolution::P720,
                Resolution::P1080,
            ]),
        ) {
            let out = res.target_size(Size::new(w, h));
            proptest::prop_assert!(out.width <= w && out.height <= h);
            proptest::prop_assert_eq!(out.width % 2, 0);
            proptest::prop_assert_eq!(out.height % 2, 0);
            if let Some(target) = res.short_side() {
                proptest::prop_assert!(out.short_side() <= target.max(even_floor(w.min(h))));
            }
        }
    }
}
