//! Write the synthesized watermark bitmap.

use std::path::PathBuf;

use inkmark_common::config::AppConfig;
use inkmark_job_model::{LayerMotion, Size, SCALE_RANGE};
use inkmark_placement::layer_spec;
use inkmark_render_engine::{image_size, write_png, WatermarkSynthesizer};

pub fn run(
    config: &AppConfig,
    output: PathBuf,
    text: String,
    width: u32,
    height: u32,
    moving: bool,
    scale: f64,
) -> anyhow::Result<()> {
    if !(SCALE_RANGE.0..=SCALE_RANGE.1).contains(&scale) {
        anyhow::bail!("scale must be between {} and {}", SCALE_RANGE.0, SCALE_RANGE.1);
    }
    let frame = Size::new(width, height);
    if frame.is_empty() {
        anyhow::bail!("frame size must be non-zero");
    }
    let motion = if moving {
        LayerMotion::Lissajous
    } else {
        LayerMotion::Static
    };

    let synthesizer = WatermarkSynthesizer::load(&config.watermark.font_paths);
    let spec = layer_spec(text.trim(), motion, frame, scale, &config.watermark);
    let (image, used) = synthesizer.synthesize_fitting(&spec, frame);
    write_png(&image, &output)?;

    println!("Wrote {} ({})", output.display(), image_size(&image));
    let font = synthesizer
        .font_path()
        .map_or_else(|| "built-in".to_string(), |p| p.display().to_string());
    println!("  Font: {font}");
    println!("  Size: {:.1}px, padding {}px", used.font_px, used.padding);
    Ok(())
}
