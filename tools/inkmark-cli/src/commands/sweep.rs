//! Remove orphaned scratch files.

use inkmark_common::config::AppConfig;
use inkmark_common::units::format_bytes;
use inkmark_pipeline::ScratchDir;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    let scratch = ScratchDir::open(&config.scratch_dir)?;
    let report = scratch.sweep_orphans()?;
    println!(
        "Removed {} file(s), {} from {}",
        report.removed,
        format_bytes(report.bytes),
        scratch.path().display()
    );
    Ok(())
}
