//! Media probing via ffprobe.

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;

use inkmark_common::error::{InkmarkError, InkmarkResult};
use inkmark_job_model::Size;

/// What the pipeline needs to know about a source file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInfo {
    pub size: Size,
    /// Container duration; `None` for still images.
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
    tags: Option<ProbeTags>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

impl ProbeStream {
    /// Display rotation in degrees, normalized to [0, 360).
    ///
    /// The display matrix side data wins over the legacy `rotate` tag.
    fn rotation(&self) -> i64 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|side| side.rotation)
            .or_else(|| {
                self.tags
                    .as_ref()
                    .and_then(|tags| tags.rotate.as_deref())
                    .and_then(|r| r.trim().parse::<f64>().ok())
            })
            .filter(|r| r.is_finite())
            .unwrap_or(0.0);
        (degrees.round() as i64).rem_euclid(360)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Probe dimensions and duration of `path`.
pub async fn probe_media(ffprobe: &Path, path: &Path) -> InkmarkResult<MediaInfo> {
    let output = tokio::process::Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height:stream_side_data=rotation:stream_tags=rotate:format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| InkmarkError::encode(format!("failed to start ffprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(InkmarkError::encode_with_stderr(
            format!("ffprobe failed with status {}", output.status),
            stderr.trim(),
        ));
    }

    parse_probe_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parse ffprobe's JSON output.
pub fn parse_probe_output(raw: &str) -> InkmarkResult<MediaInfo> {
    let parsed: ProbeOutput = serde_json::from_str(raw)
        .map_err(|e| InkmarkError::encode(format!("unreadable ffprobe output: {e}")))?;
    let stream = parsed
        .streams
        .first()
        .ok_or_else(|| InkmarkError::encode("no video stream found"))?;
    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(InkmarkError::encode("video stream has no dimensions")),
    };
    // Decoders auto-rotate, so the filter graph sees the displayed orientation.
    let (width, height) = match stream.rotation() {
        90 | 270 => (height, width),
        _ => (width, height),
    };
    let duration_secs = parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);

    Ok(MediaInfo {
        size: Size::new(width, height),
        duration_secs,
    })
}

/// Whether `binary` resolves on `PATH` (or is an existing path).
pub fn command_exists(binary: &Path) -> bool {
    if binary.components().count() > 1 {
        return binary.is_file();
    }
    std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("command -v '{}' >/dev/null 2>&1", binary.display()))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_video_probe() {
        let raw = r#"{
            "programs": [],
            "streams": [{"width": 1920, "height": 1080}],
            "format": {"duration": "30.033333"}
        }"#;
        let info = parse_probe_output(raw).unwrap();
        assert_eq!(info.size, Size::new(1920, 1080));
        assert!((info.duration_secs.unwrap() - 30.033333).abs() < 1e-9);
    }

    #[test]
    fn test_parse_image_probe_has_no_duration() {
        let raw = r#"{"streams": [{"width": 640, "height": 480}], "format": {"duration": "N/A"}}"#;
        let info = parse_probe_output(raw).unwrap();
        assert_eq!(info.duration_secs, None);
    }

    #[test]
    fn test_parse_rotated_phone_video_is_portrait() {
        let raw = r#"{
            "streams": [{
                "width": 1920,
                "height": 1080,
                "side_data_list": [{"side_data_type": "Display Matrix", "rotation": -90}]
            }],
            "format": {"duration": "12.0"}
        }"#;
        let info = parse_probe_output(raw).unwrap();
        assert_eq!(info.size, Size::new(1080, 1920));
        assert_eq!(
            inkmark_job_model::Resolution::P720.target_size(info.size),
            Size::new(720, 1280)
        );

        let legacy = r#"{"streams": [{"width": 1280, "height": 720, "tags": {"rotate": "270"}}]}"#;
        assert_eq!(parse_probe_output(legacy).unwrap().size, Size::new(720, 1280));

        let flipped = r#"{"streams": [{"width": 1280, "height": 720, "tags": {"rotate": "180"}}]}"#;
        assert_eq!(parse_probe_output(flipped).unwrap().size, Size::new(1280, 720));
    }

    #[test]
    fn test_parse_rejects_missing_stream() {
        assert!(parse_probe_output(r#"{"streams": []}"#).is_err());
        assert!(parse_probe_output(r#"{"streams": [{"width": 0, "height": 10}]}"#).is_err());
        assert!(parse_probe_output("not json").is_err());
    }

    #[test]
    fn test_command_exists() {
        assert!(command_exists(Path::new("sh")));
        assert!(!command_exists(Path::new("definitely-not-a-binary-inkmark")));
    }
}
