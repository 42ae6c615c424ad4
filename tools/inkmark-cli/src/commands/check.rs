//! Check encoder, fonts and scratch space.

use inkmark_common::config::{config_file_path, AppConfig};
use inkmark_common::units::format_bytes;
use inkmark_pipeline::{required_space, ScratchDir, SpaceProbe, StatvfsProbe};
use inkmark_render_engine::{command_exists, WatermarkSynthesizer};

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Inkmark System Check");
    println!("{}", "=".repeat(50));

    let mut ready = true;

    for binary in [&config.encode.ffmpeg_bin, &config.encode.ffprobe_bin] {
        if command_exists(binary) {
            println!("[OK] Found {}", binary.display());
        } else {
            println!("[FAIL] {} not found on PATH", binary.display());
            ready = false;
        }
    }

    let synthesizer = WatermarkSynthesizer::load(&config.watermark.font_paths);
    match synthesizer.font_path() {
        Some(path) => println!("[OK] Font: {}", path.display()),
        None => println!("[WARN] No font found; using the built-in bitmap glyphs"),
    }

    match ScratchDir::open(&config.scratch_dir) {
        Ok(scratch) => {
            println!("[OK] Scratch directory: {}", scratch.path().display());
            match StatvfsProbe.available_bytes(scratch.path()) {
                Ok(free) => {
                    let floor = required_space(
                        0,
                        config.limits.storage_headroom_factor,
                        config.limits.storage_floor_bytes,
                    );
                    let tag = if free >= floor { "OK" } else { "WARN" };
                    println!("[{tag}] Free space: {}", format_bytes(free));
                }
                Err(e) => println!("[WARN] Free space unknown: {e}"),
            }
        }
        Err(e) => {
            println!("[FAIL] {e}");
            ready = false;
        }
    }

    let config_path = config_file_path();
    if config_path.exists() {
        println!("[OK] Config: {}", config_path.display());
    } else {
        println!("[WARN] Config: {} (not found, using defaults)", config_path.display());
    }

    println!();
    if ready {
        println!("All required components are available. Inkmark is ready.");
    } else {
        println!("Some required components are missing. See above for fixes.");
    }
    Ok(())
}
