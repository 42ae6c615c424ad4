//! Dry run: placement, filter graph and encoder argv for a hypothetical source.

use std::path::PathBuf;

use serde_json::json;

use inkmark_common::config::AppConfig;
use inkmark_job_model::{MediaKind, Size, StyleField, StyleSettings};
use inkmark_placement::{layer_spec, PlacementPlanner, PlannerConfig};
use inkmark_render_engine::{
    build_filter_graph, image_size, CodecSettings, ScaleSpec, TranscodePlan, WatermarkSynthesizer,
};

#[allow(clippy::too_many_arguments)]
pub fn run(
    config: &AppConfig,
    text: String,
    width: u32,
    height: u32,
    duration: f64,
    kind: MediaKind,
    seed: u64,
    settings: Vec<(StyleField, String)>,
) -> anyhow::Result<()> {
    let mut style = StyleSettings::default();
    for (field, value) in &settings {
        style.apply(*field, value)?;
    }

    let source = Size::new(width, height);
    let frame = style.resolution.target_size(source);
    let duration = match kind {
        MediaKind::Image => 0.0,
        MediaKind::Video => duration,
    };

    let synthesizer = WatermarkSynthesizer::load(&config.watermark.font_paths);
    let mode = PlacementPlanner::effective_mode(style.mode, kind);
    let sizes: Vec<Size> = mode
        .layers()
        .iter()
        .map(|&motion| {
            let spec = layer_spec(text.trim(), motion, frame, style.scale, &config.watermark);
            image_size(&synthesizer.synthesize_fitting(&spec, frame).0)
        })
        .collect();

    let placement = PlacementPlanner::new(PlannerConfig::default())
        .plan(&style, kind, frame, &sizes, duration, seed)?;
    let graph = build_filter_graph(&placement, ScaleSpec { source, target: frame })?;

    let ext = kind.default_extension();
    let marks: Vec<PathBuf> = (0..sizes.len())
        .map(|idx| PathBuf::from(format!("mark{idx}.png")))
        .collect();
    let transcode = TranscodePlan::new(
        &config.encode.ffmpeg_bin,
        kind,
        format!("input.{ext}"),
        marks,
        graph.render(),
        CodecSettings {
            codec: style.codec,
            crf: style.crf,
            preset: config.encode.preset.clone(),
        },
        format!("output.{ext}"),
        duration,
    );

    let report = json!({
        "mode": mode.as_str(),
        "source": source,
        "frame": frame,
        "duration_secs": duration,
        "placement": placement,
        "filter_graph": graph.render(),
        "args": transcode.args(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
