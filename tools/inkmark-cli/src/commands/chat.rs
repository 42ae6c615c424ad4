//! Line-oriented console session speaking the chat command set.

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use inkmark_common::config::AppConfig;
use inkmark_common::error::InkmarkResult;
use inkmark_job_model::{MediaRef, StyleField, UserId};
use inkmark_pipeline::{SessionRegistry, SessionStep};

use super::{build_registry, ConsoleOutbox};

const HELP: &str = "\
Commands:
  /w                     start a new watermark
  <text>                 set the watermark text
  /send <path>           submit an image or video
  /set <field> <value>   change a style setting (mode, corner, speed, scale, crf, ...)
  /thumb [path]          set or clear the video thumbnail
  /cancel                drop queued jobs and stop the running one
  /status                print the session as JSON
  /quit                  cancel everything and exit";

pub async fn run(config: AppConfig, user: i64) -> anyhow::Result<()> {
    let user = UserId(user);
    let outbox = Arc::new(ConsoleOutbox::new(config.outbox_dir.clone(), None)?);
    let registry = build_registry(config, outbox)?;

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Err(e) = handle(&registry, user, line).await {
            println!("{}", e.user_message());
        }
    }

    registry.shutdown().await;
    Ok(())
}

async fn handle(registry: &SessionRegistry, user: UserId, line: &str) -> InkmarkResult<()> {
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "/w" => {
            registry.begin(user)?;
            println!("Send the watermark text.");
        }
        "/send" => {
            let job = registry
                .submit_media(user, MediaRef::local(Path::new(rest))?)
                .await?;
            tracing::debug!(%user, %job, "Submitted from console");
        }
        "/set" => {
            let (field, value) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            let field: StyleField = field.parse()?;
            registry.update_style(user, field, value.trim())?;
            println!("Updated {field:?}.");
        }
        "/thumb" => {
            let thumbnail = (!rest.is_empty()).then(|| rest.to_string());
            let cleared = thumbnail.is_none();
            registry.set_thumbnail(user, thumbnail);
            println!("{}", if cleared { "Thumbnail cleared." } else { "Thumbnail set." });
        }
        "/cancel" => {
            let outcome = registry.cancel(user).await;
            if outcome.dropped.is_empty() && outcome.interrupted.is_none() {
                println!("Nothing to cancel.");
            }
        }
        "/status" => {
            let status = registry.status(user);
            match serde_json::to_string_pretty(&status) {
                Ok(json) => println!("{json}"),
                Err(e) => println!("{e}"),
            }
        }
        "/help" => println!("{HELP}"),
        _ if command.starts_with('/') => println!("Unknown command {command}. Try /help."),
        _ => {
            registry.set_text(user, line)?;
            if registry.status(user).step == SessionStep::AwaitingMedia {
                println!("Text set. Send an image or video with /send <path>.");
            }
        }
    }
    Ok(())
}
