//! Watermark rasterization.
//!
//! Renders a [`WatermarkSpec`] into a transparent RGBA bitmap: measure the
//! inked text bounds, allocate `bounds + 2×padding`, fill a rounded box,
//! then alpha-blend the text on top. Characters the TrueType font lacks
//! fall back to the built-in bitmap glyphs.

use std::path::{Path, PathBuf};

use fontdue::layout::{CoordinateSystem, Layout, LayoutSettings, TextStyle};
use fontdue::{Font, FontSettings};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::rect::Rect;

use inkmark_common::error::{InkmarkError, InkmarkResult};
use inkmark_job_model::{FontWeight, Size, WatermarkSpec, MIN_PADDING};
use inkmark_placement::fit_factor;

use crate::glyphs::{self, GLYPH_ADVANCE, GLYPH_COLS, GLYPH_ROWS};

/// Coverage bitmap of one positioned glyph, relative to the baseline.
struct PlacedGlyph {
    x: i32,
    top: i32,
    width: usize,
    height: usize,
    coverage: Vec<u8>,
}

/// Text-to-bitmap renderer.
pub struct WatermarkSynthesizer {
    font: Option<Font>,
    font_path: Option<PathBuf>,
}

impl WatermarkSynthesizer {
    /// Synthesizer using only the built-in glyphs.
    pub fn builtin() -> Self {
        Self {
            font: None,
            font_path: None,
        }
    }

    pub fn from_font_bytes(bytes: Vec<u8>) -> InkmarkResult<Self> {
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| InkmarkError::render(format!("failed to parse font: {e}")))?;
        Ok(Self {
            font: Some(font),
            font_path: None,
        })
    }

    /// Load the first readable font from `paths`, or fall back to built-in glyphs.
    pub fn load(paths: &[PathBuf]) -> Self {
        for path in paths {
            match std::fs::read(path) {
                Ok(bytes) => match Self::from_font_bytes(bytes) {
                    Ok(mut synth) => {
                        tracing::debug!(font = %path.display(), "Loaded watermark font");
                        synth.font_path = Some(path.clone());
                        return synth;
                    }
                    Err(e) => tracing::warn!(font = %path.display(), error = %e, "Skipping font"),
                },
                Err(_) => continue,
            }
        }
        tracing::warn!("No TrueType font found, using built-in glyphs");
        Self::builtin()
    }

    pub fn font_path(&self) -> Option<&Path> {
        self.font_path.as_deref()
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Render `spec` into a new RGBA image.
    pub fn synthesize(&self, spec: &WatermarkSpec) -> RgbaImage {
        let glyphs = self.layout(&spec.text, spec.font_px, spec.weight);

        let (min_x, min_y, max_x, max_y) = ink_bounds(&glyphs);
        let padding = spec.padding.max(MIN_PADDING);
        let text_w = (max_x - min_x).max(0) as u32;
        let text_h = (max_y - min_y).max(0) as u32;
        let width = text_w + 2 * padding;
        let height = text_h + 2 * padding;

        let mut canvas = RgbaImage::new(width, height);
        if let Some(color) = spec.box_color {
            draw_rounded_box(&mut canvas, spec.corner_radius, Rgba(color));
        }

        let origin_x = padding as i32 - min_x;
        let origin_y = padding as i32 - min_y;
        for glyph in &glyphs {
            blend_coverage(
                &mut canvas,
                origin_x + glyph.x,
                origin_y + glyph.top,
                glyph,
                spec.fill,
            );
        }
        canvas
    }

    /// Render `spec`, shrinking it until it fits inside `frame`.
    ///
    /// Returns the image together with the spec actually used.
    pub fn synthesize_fitting(
        &self,
        spec: &WatermarkSpec,
        frame: Size,
    ) -> (RgbaImage, WatermarkSpec) {
        let mut spec = spec.clone();
        let mut image = self.synthesize(&spec);
        for _ in 0..4 {
            let Some(factor) = fit_factor(frame, image_size(&image)) else {
                break;
            };
            spec = spec.rescaled(factor * 0.98);
            image = self.synthesize(&spec);
        }
        // Font size bottoms out at MIN_FONT_PX; resample whatever is left.
        if let Some(factor) = fit_factor(frame, image_size(&image)) {
            let w = ((image.width() as f32 * factor).floor() as u32).max(1);
            let h = ((image.height() as f32 * factor).floor() as u32).max(1);
            image = image::imageops::resize(&image, w, h, image::imageops::FilterType::Triangle);
        }
        (image, spec)
    }

    fn layout(&self, text: &str, px: f32, weight: FontWeight) -> Vec<PlacedGlyph> {
        let builtin_scale = ((px / 10.0).round() as u32).max(1);
        match self.font.as_ref() {
            Some(font) => layout_with_font(font, text, px, builtin_scale, weight),
            None => layout_builtin(text, builtin_scale, weight),
        }
    }
}

impl Default for WatermarkSynthesizer {
    fn default() -> Self {
        Self::builtin()
    }
}

pub fn image_size(image: &RgbaImage) -> Size {
    Size::new(image.width(), image.height())
}

/// Write `image` as PNG.
pub fn write_png(image: &RgbaImage, path: &Path) -> InkmarkResult<()> {
    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| InkmarkError::render(format!("failed to write {}: {e}", path.display())))
}

/// Lay out `text` with fontdue. Characters the font lacks use the built-in
/// bitmap at the same pen position when one exists, else the font's
/// missing-glyph box.
fn layout_with_font(
    font: &Font,
    text: &str,
    px: f32,
    builtin_scale: u32,
    weight: FontWeight,
) -> Vec<PlacedGlyph> {
    let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
    layout.reset(&LayoutSettings {
        x: 0.0,
        y: 0.0,
        ..LayoutSettings::default()
    });
    layout.append(&[font], &TextStyle::new(text, px, 0));
    let baseline = layout
        .lines()
        .and_then(|lines| lines.first())
        .map_or(0.0, |line| line.baseline_y);

    let mut placed = Vec::with_capacity(layout.glyphs().len());
    for glyph in layout.glyphs() {
        let x = glyph.x.round() as i32;
        let c = glyph.parent;
        if !c.is_whitespace() && font.lookup_glyph_index(c) == 0 && glyphs::has_glyph(c) {
            if let Some(fallback) = builtin_glyph(c, builtin_scale, weight) {
                placed.push(PlacedGlyph { x, ..fallback });
            }
            continue;
        }
        if glyph.width == 0 || glyph.height == 0 {
            continue;
        }
        let (_, coverage) = font.rasterize_config(glyph.key);
        placed.push(PlacedGlyph {
            x,
            top: (glyph.y - baseline).round() as i32,
            width: glyph.width,
            height: glyph.height,
            coverage,
        });
    }
    placed
}

fn layout_builtin(text: &str, scale: u32, weight: FontWeight) -> Vec<PlacedGlyph> {
    let mut placed = Vec::with_capacity(text.len());
    for (i, c) in text.chars().enumerate() {
        if let Some(glyph) = builtin_glyph(c, scale, weight) {
            placed.push(PlacedGlyph {
                x: (i as u32 * GLYPH_ADVANCE * scale) as i32,
                ..glyph
            });
        }
    }
    placed
}

fn builtin_glyph(c: char, scale: u32, weight: FontWeight) -> Option<PlacedGlyph> {
    let rows = glyphs::glyph(c);
    if rows.iter().all(|r| *r == 0) {
        return None;
    }
    let embolden = match weight {
        FontWeight::Bold => scale.div_ceil(3),
        FontWeight::Regular => 0,
    };
    let width = (GLYPH_COLS * scale + embolden) as usize;
    let height = (GLYPH_ROWS * scale) as usize;
    let mut coverage = vec![0u8; width * height];
    for (row, bits) in rows.iter().enumerate() {
        for col in 0..GLYPH_COLS {
            if bits & (0x10 >> col) == 0 {
                continue;
            }
            let x0 = (col * scale) as usize;
            let y0 = row * scale as usize;
            for dy in 0..scale as usize {
                for dx in 0..(scale + embolden) as usize {
                    coverage[(y0 + dy) * width + x0 + dx] = 255;
                }
            }
        }
    }
    Some(PlacedGlyph {
        x: 0,
        top: -(height as i32),
        width,
        height,
        coverage,
    })
}

/// `(min_x, min_y, max_x, max_y)` over inked pixels; all zero without ink.
fn ink_bounds(glyphs: &[PlacedGlyph]) -> (i32, i32, i32, i32) {
    let mut bounds: Option<(i32, i32, i32, i32)> = None;
    for g in glyphs {
        let (x0, y0) = (g.x, g.top);
        let (x1, y1) = (g.x + g.width as i32, g.top + g.height as i32);
        bounds = Some(match bounds {
            None => (x0, y0, x1, y1),
            Some((a, b, c, d)) => (a.min(x0), b.min(y0), c.max(x1), d.max(y1)),
        });
    }
    bounds.unwrap_or((0, 0, 0, 0))
}

fn draw_rounded_box(canvas: &mut RgbaImage, radius: u32, color: Rgba<u8>) {
    let (w, h) = canvas.dimensions();
    let r = radius.min(w / 2).min(h / 2);
    if r == 0 {
        draw_filled_rect_mut(canvas, Rect::at(0, 0).of_size(w, h), color);
        return;
    }
    if w > 2 * r {
        draw_filled_rect_mut(canvas, Rect::at(r as i32, 0).of_size(w - 2 * r, h), color);
    }
    if h > 2 * r {
        draw_filled_rect_mut(canvas, Rect::at(0, r as i32).of_size(w, h - 2 * r), color);
    }
    let (ri, wi, hi) = (r as i32, w as i32, h as i32);
    for (cx, cy) in [
        (ri, ri),
        (wi - 1 - ri, ri),
        (ri, hi - 1 - ri),
        (wi - 1 - ri, hi - 1 - ri),
    ] {
        draw_filled_circle_mut(canvas, (cx, cy), ri, color);
    }
}

fn blend_coverage(canvas: &mut RgbaImage, x: i32, y: i32, glyph: &PlacedGlyph, fill: [u8; 4]) {
    let (cw, ch) = (canvas.width() as i32, canvas.height() as i32);
    for gy in 0..glyph.height {
        let py = y + gy as i32;
        if py < 0 || py >= ch {
            continue;
        }
        for gx in 0..glyph.width {
            let px = x + gx as i32;
            if px < 0 || px >= cw {
                continue;
            }
            let cov = glyph.coverage[gy * glyph.width + gx];
            if cov == 0 {
                continue;
            }
            let dst = canvas.get_pixel_mut(px as u32, py as u32);
            *dst = Rgba(over(fill, cov, dst.0));
        }
    }
}

/// Straight-alpha "source over" with the source alpha scaled by coverage.
fn over(src: [u8; 4], coverage: u8, dst: [u8; 4]) -> [u8; 4] {
    let sa = src[3] as f32 / 255.0 * coverage as f32 / 255.0;
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= f32::EPSILON {
        return [0, 0, 0, 0];
    }
    let mut out = [0u8; 4];
    for i in 0..3 {
        let c = (src[i] as f32 * sa + dst[i] as f32 * da * (1.0 - sa)) / out_a;
        out[i] = c.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkmark_common::config::AppConfig;

    fn spec(text: &str) -> WatermarkSpec {
        WatermarkSpec {
            text: text.to_string(),
            font_px: 20.0,
            weight: FontWeight::Regular,
            fill: [255, 255, 255, 255],
            box_color: Some([0, 0, 0, 160]),
            corner_radius: 6,
            padding: 8,
        }
    }

    #[test]
    fn test_canvas_is_text_plus_padding() {
        let synth = WatermarkSynthesizer::builtin();
        let image = synth.synthesize(&spec("AB"));
        // scale 2: "A" at 0..10, "B" at 12..22; rows 7*2
        assert_eq!(image.dimensions(), (22 + 16, 14 + 16));
    }

    #[test]
    fn test_empty_text_still_has_canvas() {
        let synth = WatermarkSynthesizer::builtin();
        let image = synth.synthesize(&spec(""));
        assert_eq!(image.dimensions(), (16, 16));

        let mut tiny = spec("");
        tiny.padding = 0;
        let image = synth.synthesize(&tiny);
        assert_eq!(image.dimensions(), (2 * MIN_PADDING, 2 * MIN_PADDING));
    }

    #[test]
    fn test_box_is_rounded_and_text_on_top() {
        let synth = WatermarkSynthesizer::builtin();
        let image = synth.synthesize(&spec("© 2024 Brand"));
        let (w, h) = image.dimensions();

        assert_eq!(image.get_pixel(0, 0).0[3], 0, "corner should be cut");
        assert_eq!(image.get_pixel(w / 2, 1).0, [0, 0, 0, 160]);
        assert_eq!(image.get_pixel(1, h / 2).0, [0, 0, 0, 160]);

        let white = image.pixels().filter(|p| p.0 == [255, 255, 255, 255]).count();
        assert!(white > 0, "text should be drawn over the box");
    }

    #[test]
    fn test_no_box_leaves_background_transparent() {
        let synth = WatermarkSynthesizer::builtin();
        let mut s = spec("HI");
        s.box_color = None;
        let image = synth.synthesize(&s);
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert!(image.pixels().any(|p| p.0[3] == 255));
    }

    #[test]
    fn test_unknown_glyph_does_not_fail() {
        let synth = WatermarkSynthesizer::builtin();
        let image = synth.synthesize(&spec("日本"));
        assert!(image.width() > 16);
    }

    #[test]
    fn test_bold_is_wider() {
        let synth = WatermarkSynthesizer::builtin();
        let regular = synth.synthesize(&spec("III"));
        let mut bold_spec = spec("III");
        bold_spec.weight = FontWeight::Bold;
        let bold = synth.synthesize(&bold_spec);
        assert!(bold.width() > regular.width());
    }

    #[test]
    fn test_synthesize_fitting_shrinks_long_text() {
        let synth = WatermarkSynthesizer::builtin();
        let frame = Size::new(320, 240);
        let long = spec(&"W".repeat(100));
        let (image, used) = synth.synthesize_fitting(&long, frame);
        assert!(image.width() <= frame.width);
        assert!(image.height() <= frame.height);
        assert!(used.font_px < long.font_px);
    }

    #[test]
    fn test_builtin_layout_advances_per_character() {
        let synth = WatermarkSynthesizer::builtin();
        let glyphs = synth.layout("A B", 20.0, FontWeight::Regular);
        let xs: Vec<i32> = glyphs.iter().map(|g| g.x).collect();
        // Space has no ink but still takes a cell.
        assert_eq!(xs, vec![0, 24]);
        assert!(glyphs.iter().all(|g| g.top == -14));
    }

    #[test]
    fn test_font_layout_sits_on_one_baseline() {
        let synth = WatermarkSynthesizer::load(&AppConfig::default().watermark.font_paths);
        if !synth.has_font() {
            return;
        }
        let glyphs = synth.layout("HI x", 40.0, FontWeight::Bold);
        assert_eq!(glyphs.len(), 3);
        assert!(glyphs.windows(2).all(|w| w[0].x < w[1].x));
        // Caps and lowercase end on the baseline.
        for g in &glyphs {
            let bottom = g.top + g.height as i32;
            assert!(bottom.abs() <= 1, "bottom {bottom}");
        }
        assert!(glyphs[2].top > glyphs[0].top, "x-height is below cap height");
    }

    #[test]
    fn test_load_without_fonts_falls_back() {
        let synth = WatermarkSynthesizer::load(&[PathBuf::from("/nonexistent/font.ttf")]);
        assert!(!synth.has_font());
        assert!(synth.font_path().is_none());
    }

    #[test]
    fn test_write_png_roundtrip_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mark.png");
        let image = WatermarkSynthesizer::builtin().synthesize(&spec("OK"));
        write_png(&image, &path).unwrap();
        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), image.dimensions());
    }
}
