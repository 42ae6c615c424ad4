//! Watermark one local file through the full job pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use inkmark_common::config::AppConfig;
use inkmark_job_model::{MediaRef, StyleField, UserId};
use inkmark_pipeline::StatusUpdate;

use super::{build_registry, ConsoleOutbox};

const LOCAL_USER: UserId = UserId(0);

pub async fn run(
    config: AppConfig,
    input: PathBuf,
    text: String,
    output: Option<PathBuf>,
    settings: Vec<(StyleField, String)>,
) -> anyhow::Result<()> {
    let media = MediaRef::local(&input)?;
    let outbox = Arc::new(ConsoleOutbox::new(config.outbox_dir.clone(), output)?);
    let registry = build_registry(config, outbox.clone())?;

    registry.begin(LOCAL_USER)?;
    registry.set_text(LOCAL_USER, &text)?;
    for (field, value) in &settings {
        registry.update_style(LOCAL_USER, *field, value)?;
    }

    println!("Watermarking {}", input.display());
    let job = registry.submit_media(LOCAL_USER, media).await?;

    tokio::select! {
        _ = registry.wait_idle(LOCAL_USER) => {}
        _ = tokio::signal::ctrl_c() => {
            println!("Interrupted, cancelling...");
            registry.cancel(LOCAL_USER).await;
            registry.wait_idle(LOCAL_USER).await;
        }
    }

    match outbox.last_status(job) {
        Some(StatusUpdate::Done) => Ok(()),
        Some(StatusUpdate::Failed { reason, .. }) => Err(anyhow::anyhow!(reason)),
        Some(StatusUpdate::Cancelled) => Err(anyhow::anyhow!("Cancelled")),
        other => Err(anyhow::anyhow!("Job ended in unexpected state: {other:?}")),
    }
}
