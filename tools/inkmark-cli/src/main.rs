//! Inkmark CLI: watermark local media and drive the job pipeline from a terminal.
//!
//! Usage:
//!   inkmark stamp <INPUT> --text <TEXT>     Watermark one file through the full pipeline
//!   inkmark preview --text <TEXT> <OUTPUT>  Write the synthesized watermark PNG
//!   inkmark plan --text <TEXT>              Print trajectory, filter graph and ffmpeg argv
//!   inkmark chat                            Console chat session (/w, /send, /set, ...)
//!   inkmark check                           Check encoder, fonts and scratch space
//!   inkmark sweep                           Remove orphaned scratch files

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use inkmark_common::config::AppConfig;
use inkmark_job_model::{MediaKind, StyleField};

mod commands;

#[derive(Parser)]
#[command(
    name = "inkmark",
    about = "Per-user text watermarking for images and videos",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/inkmark/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Image,
    Video,
}

impl From<KindArg> for MediaKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Image => MediaKind::Image,
            KindArg::Video => MediaKind::Video,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Watermark a local image or video
    Stamp {
        /// Input file
        input: PathBuf,

        /// Watermark text
        #[arg(short, long)]
        text: String,

        /// Output file (defaults to the configured outbox directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Style setting, e.g. `--set mode=hop --set crf=28`
        #[arg(long = "set", value_name = "FIELD=VALUE", value_parser = parse_setting)]
        settings: Vec<(StyleField, String)>,
    },

    /// Render the watermark bitmap only
    Preview {
        /// Output PNG path
        output: PathBuf,

        /// Watermark text
        #[arg(short, long)]
        text: String,

        /// Frame width the mark is sized for
        #[arg(long, default_value = "1280")]
        width: u32,

        /// Frame height the mark is sized for
        #[arg(long, default_value = "720")]
        height: u32,

        /// Size for a moving layer instead of a static corner mark
        #[arg(long)]
        moving: bool,

        /// Size multiplier [0.5, 2.0]
        #[arg(long, default_value = "1.0")]
        scale: f64,
    },

    /// Print the placement plan and encoder invocation as JSON
    Plan {
        /// Watermark text
        #[arg(short, long)]
        text: String,

        /// Source width
        #[arg(long, default_value = "1920")]
        width: u32,

        /// Source height
        #[arg(long, default_value = "1080")]
        height: u32,

        /// Source duration in seconds
        #[arg(long, default_value = "30")]
        duration: f64,

        /// Media kind
        #[arg(long, value_enum, default_value = "video")]
        kind: KindArg,

        /// Placement seed (Hop waypoints)
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Style setting, e.g. `--set mode=dual`
        #[arg(long = "set", value_name = "FIELD=VALUE", value_parser = parse_setting)]
        settings: Vec<(StyleField, String)>,
    },

    /// Interactive console session using the chat command set
    Chat {
        /// User id to act as
        #[arg(long, default_value = "1")]
        user: i64,
    },

    /// Check encoder, fonts and scratch directory
    Check,

    /// Remove orphaned scratch files left by a previous run
    Sweep,
}

fn parse_setting(raw: &str) -> Result<(StyleField, String), String> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=VALUE, got '{raw}'"))?;
    let field: StyleField = field.parse().map_err(|e| format!("{e}"))?;
    Ok((field, value.to_string()))
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {}: {e}", path.display())),
        None => Ok(AppConfig::load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    inkmark_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Stamp {
            input,
            text,
            output,
            settings,
        } => commands::stamp::run(config, input, text, output, settings).await,
        Commands::Preview {
            output,
            text,
            width,
            height,
            moving,
            scale,
        } => commands::preview::run(&config, output, text, width, height, moving, scale),
        Commands::Plan {
            text,
            width,
            height,
            duration,
            kind,
            seed,
            settings,
        } => commands::plan::run(
            &config,
            text,
            width,
            height,
            duration,
            kind.into(),
            seed,
            settings,
        ),
        Commands::Chat { user } => commands::chat::run(config, user).await,
        Commands::Check => commands::check::run(&config),
        Commands::Sweep => commands::sweep::run(&config),
    }
}
