//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{InkmarkError, InkmarkResult};
use crate::units::{GIB, MIB};

/// Longest encode the supervisor may be configured to wait for (30 days).
pub const MAX_TIMEOUT_HOURS: f64 = 720.0;

/// Upper bound for the progress notification interval.
pub const MAX_PROGRESS_INTERVAL_SECS: f64 = 3600.0;

const DEFAULT_TIMEOUT_HOURS: f64 = 6.0;
const DEFAULT_PROGRESS_INTERVAL_SECS: f64 = 5.0;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding per-job temporary files.
    pub scratch_dir: PathBuf,

    /// Directory the local outbox copies finished media into.
    pub outbox_dir: PathBuf,

    /// Size and length limits.
    pub limits: LimitsConfig,

    /// External encoder settings.
    pub encode: EncodeConfig,

    /// Watermark styling defaults.
    pub watermark: WatermarkDefaults,

    /// Delivery retry policy.
    pub delivery: DeliveryConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum watermark text length in characters.
    pub max_text_chars: usize,

    /// Largest accepted input, checked before download.
    pub max_input_bytes: u64,

    /// Largest deliverable output, checked after encode.
    pub max_output_bytes: u64,

    /// Smallest plausible encoder output.
    pub min_output_bytes: u64,

    /// Free space required per input byte before a job may start.
    pub storage_headroom_factor: f64,

    /// Free space floor regardless of input size.
    pub storage_floor_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeConfig {
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,

    /// x264/x265 preset.
    pub preset: String,

    /// Hard ceiling on a single encode.
    pub timeout_hours: f64,

    /// Time between SIGTERM and SIGKILL when stopping the encoder.
    pub kill_grace_secs: u64,

    /// Minimum spacing between progress notifications.
    pub progress_interval_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkDefaults {
    /// Candidate TrueType fonts, first readable one wins.
    pub font_paths: Vec<PathBuf>,

    /// Font size used by `preview` when no frame height is known.
    pub font_px: f32,

    pub fill: [u8; 4],
    pub box_color: [u8; 4],
    pub box_padding: u32,
    pub corner_radius: u32,

    /// Default distance from the frame edge for static marks.
    pub margin: u32,

    /// Static mark height = frame short side / this.
    pub static_divisor: f64,

    /// Moving mark height = frame short side / this.
    pub moving_divisor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub upload_attempts: u32,
    pub retry_backoff_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "inkmark_pipeline=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scratch_dir: default_cache_dir().join("scratch"),
            outbox_dir: default_cache_dir().join("outbox"),
            limits: LimitsConfig::default(),
            encode: EncodeConfig::default(),
            watermark: WatermarkDefaults::default(),
            delivery: DeliveryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_text_chars: 100,
            max_input_bytes: 2 * GIB,
            max_output_bytes: 2 * GIB,
            min_output_bytes: 1024,
            storage_headroom_factor: 3.0,
            storage_floor_bytes: 64 * MIB,
        }
    }
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            preset: "medium".to_string(),
            timeout_hours: DEFAULT_TIMEOUT_HOURS,
            kill_grace_secs: 5,
            progress_interval_secs: DEFAULT_PROGRESS_INTERVAL_SECS,
        }
    }
}

impl Default for WatermarkDefaults {
    fn default() -> Self {
        Self {
            font_paths: vec![
                PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf"),
                PathBuf::from("/usr/share/fonts/TTF/DejaVuSans-Bold.ttf"),
                PathBuf::from("/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf"),
                PathBuf::from("/usr/share/fonts/truetype/freefont/FreeSansBold.ttf"),
                PathBuf::from("/System/Library/Fonts/Supplemental/Arial Bold.ttf"),
            ],
            font_px: 32.0,
            fill: [255, 255, 255, 255],
            box_color: [0, 0, 0, 160],
            box_padding: 20,
            corner_radius: 15,
            margin: 20,
            static_divisor: 18.0,
            moving_divisor: 25.0,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            upload_attempts: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load and validate config from an explicit path.
    pub fn load_from(path: &Path) -> InkmarkResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot operate with.
    pub fn validate(&self) -> InkmarkResult<()> {
        if self.limits.max_text_chars == 0 {
            return Err(InkmarkError::config("limits.max_text_chars must be > 0"));
        }
        if self.limits.min_output_bytes > self.limits.max_output_bytes {
            return Err(InkmarkError::config(
                "limits.min_output_bytes exceeds limits.max_output_bytes",
            ));
        }
        let hours = self.encode.timeout_hours;
        if !(hours.is_finite() && hours > 0.0 && hours <= MAX_TIMEOUT_HOURS) {
            return Err(InkmarkError::config(format!(
                "encode.timeout_hours must be in (0, {MAX_TIMEOUT_HOURS}]"
            )));
        }
        let interval = self.encode.progress_interval_secs;
        if !(interval.is_finite() && (0.0..=MAX_PROGRESS_INTERVAL_SECS).contains(&interval)) {
            return Err(InkmarkError::config(format!(
                "encode.progress_interval_secs must be in [0, {MAX_PROGRESS_INTERVAL_SECS}]"
            )));
        }
        if self.watermark.static_divisor <= 0.0 || self.watermark.moving_divisor <= 0.0 {
            return Err(InkmarkError::config("watermark divisors must be positive"));
        }
        if self.delivery.upload_attempts == 0 {
            return Err(InkmarkError::config("delivery.upload_attempts must be >= 1"));
        }
        Ok(())
    }

    /// Encode timeout as a duration. Out-of-range values use the default.
    pub fn encode_timeout(&self) -> Duration {
        let hours = self.encode.timeout_hours;
        let hours = if hours > 0.0 && hours <= MAX_TIMEOUT_HOURS {
            hours
        } else {
            DEFAULT_TIMEOUT_HOURS
        };
        Duration::try_from_secs_f64(hours * 3600.0)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_TIMEOUT_HOURS * 3600.0))
    }

    /// Minimum spacing between progress notifications.
    pub fn progress_interval(&self) -> Duration {
        let secs = self.encode.progress_interval_secs;
        if (0.0..=MAX_PROGRESS_INTERVAL_SECS).contains(&secs) {
            Duration::try_from_secs_f64(secs)
                .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_PROGRESS_INTERVAL_SECS))
        } else {
            Duration::from_secs_f64(DEFAULT_PROGRESS_INTERVAL_SECS)
        }
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("inkmark").join("config.json")
}

fn default_cache_dir() -> PathBuf {
    let base = std::env::var("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".cache")
        });
    base.join("inkmark")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.limits.max_text_chars, 100);
        assert_eq!(config.limits.max_input_bytes, 2 * GIB);
        assert_eq!(config.encode.preset, "medium");
        assert_eq!(config.watermark.box_color, [0, 0, 0, 160]);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"limits":{"max_text_chars":40},"encode":{"preset":"fast"}}"#)
            .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.limits.max_text_chars, 40);
        assert_eq!(config.limits.min_output_bytes, 1024);
        assert_eq!(config.encode.preset, "fast");
        assert_eq!(config.encode.kill_grace_secs, 5);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"encode":{"timeout_hours":0}}"#).unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(InkmarkError::Config { .. })
        ));
    }

    #[test]
    fn test_encode_timeout_duration() {
        let mut config = AppConfig::default();
        config.encode.timeout_hours = 0.5;
        assert_eq!(config.encode_timeout().as_secs(), 1800);
    }

    #[test]
    fn test_unbounded_durations_fall_back_instead_of_panicking() {
        let mut config = AppConfig::default();
        config.encode.timeout_hours = f64::INFINITY;
        config.encode.progress_interval_secs = f64::NAN;
        assert!(config.validate().is_err());
        assert_eq!(config.encode_timeout(), Duration::from_secs(6 * 3600));
        assert_eq!(config.progress_interval(), Duration::from_secs(5));

        config.encode.timeout_hours = 1e300;
        config.encode.progress_interval_secs = 1e300;
        assert!(config.validate().is_err());
        assert_eq!(config.encode_timeout(), Duration::from_secs(6 * 3600));
        assert_eq!(config.progress_interval(), Duration::from_secs(5));

        config.encode.timeout_hours = MAX_TIMEOUT_HOURS;
        config.encode.progress_interval_secs = 0.0;
        config.validate().unwrap();
        assert_eq!(config.progress_interval(), Duration::ZERO);
    }
}
