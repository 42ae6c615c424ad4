//! Transcode plans: the resolved encoder invocation for one job.

use std::path::{Path, PathBuf};

use inkmark_job_model::{MediaKind, VideoCodec};

/// Encoder settings carried by a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecSettings {
    pub codec: VideoCodec,
    pub crf: u8,
    pub preset: String,
}

/// Fully-resolved encoder invocation. Immutable once built.
#[derive(Debug, Clone)]
pub struct TranscodePlan {
    program: PathBuf,
    kind: MediaKind,
    input: PathBuf,
    marks: Vec<PathBuf>,
    filter_graph: String,
    codec: CodecSettings,
    output: PathBuf,
    duration_secs: f64,
}

impl TranscodePlan {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        program: impl Into<PathBuf>,
        kind: MediaKind,
        input: impl Into<PathBuf>,
        marks: Vec<PathBuf>,
        filter_graph: String,
        codec: CodecSettings,
        output: impl Into<PathBuf>,
        duration_secs: f64,
    ) -> Self {
        Self {
            program: program.into(),
            kind,
            input: input.into(),
            marks,
            filter_graph,
            codec,
            output: output.into(),
            duration_secs,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn marks(&self) -> &[PathBuf] {
        &self.marks
    }

    pub fn filter_graph(&self) -> &str {
        &self.filter_graph
    }

    pub fn codec(&self) -> &CodecSettings {
        &self.codec
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Expected output duration, used to turn encoder position into progress.
    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    /// Argument vector for the encoder process.
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-y",
            "-hide_banner",
            "-loglevel",
            "error",
            "-nostats",
            "-progress",
            "pipe:1",
            "-i",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(path_arg(&self.input));

        for mark in &self.marks {
            if self.kind == MediaKind::Video {
                args.push("-loop".to_string());
                args.push("1".to_string());
            }
            args.push("-i".to_string());
            args.push(path_arg(mark));
        }

        args.push("-filter_complex".to_string());
        args.push(self.filter_graph.clone());
        args.push("-map".to_string());
        args.push(format!("[{}]", crate::filter_graph::OUTPUT_LABEL));

        args.extend(codec_args(self.kind, &self.codec));
        args.push(path_arg(&self.output));
        args
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn codec_args(kind: MediaKind, codec: &CodecSettings) -> Vec<String> {
    match kind {
        MediaKind::Image => vec![
            "-frames:v".into(),
            "1".into(),
            "-update".into(),
            "1".into(),
            "-q:v".into(),
            "2".into(),
        ],
        MediaKind::Video => {
            let mut args = vec![
                "-map".to_string(),
                "0:a?".to_string(),
                "-c:v".to_string(),
                codec.codec.encoder().to_string(),
                "-preset".to_string(),
                codec.preset.clone(),
                "-crf".to_string(),
                codec.crf.to_string(),
                "-pix_fmt".to_string(),
                "yuv420p".to_string(),
            ];
            if codec.codec == VideoCodec::H265 {
                args.push("-tag:v".to_string());
                args.push("hvc1".to_string());
            }
            args.extend([
                "-c:a".to_string(),
                "copy".to_string(),
                "-movflags".to_string(),
                "+faststart".to_string(),
            ]);
            args
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(codec: VideoCodec) -> CodecSettings {
        CodecSettings {
            codec,
            crf: 23,
            preset: "medium".to_string(),
        }
    }

    #[test]
    fn test_video_args() {
        let plan = TranscodePlan::new(
            "ffmpeg",
            MediaKind::Video,
            "/s/in.mov",
            vec![PathBuf::from("/s/mark0.png")],
            "[0:v]null[vout]".to_string(),
            codec(VideoCodec::H264),
            "/s/out.mp4",
            30.0,
        );
        let args = plan.args();
        let joined = args.join(" ");
        assert!(joined.starts_with("-y -hide_banner -loglevel error -nostats -progress pipe:1 -i /s/in.mov"));
        assert!(joined.contains("-loop 1 -i /s/mark0.png"));
        assert!(joined.contains("-filter_complex [0:v]null[vout] -map [vout] -map 0:a?"));
        assert!(joined.contains("-c:v libx264 -preset medium -crf 23 -pix_fmt yuv420p"));
        assert!(joined.contains("-c:a copy -movflags +faststart"));
        assert_eq!(args.last().map(String::as_str), Some("/s/out.mp4"));
    }

    #[test]
    fn test_image_args_single_frame_without_loop() {
        let plan = TranscodePlan::new(
            "ffmpeg",
            MediaKind::Image,
            "/s/in.png",
            vec![PathBuf::from("/s/mark0.png")],
            "g".to_string(),
            codec(VideoCodec::H264),
            "/s/out.png",
            0.0,
        );
        let args = plan.args();
        assert!(!args.iter().any(|a| a == "-loop"));
        assert!(args.windows(2).any(|w| w == ["-frames:v", "1"]));
        assert!(!args.iter().any(|a| a == "libx264"));
    }

    #[test]
    fn test_h265_tag() {
        let plan = TranscodePlan::new(
            "ffmpeg",
            MediaKind::Video,
            "in",
            vec![],
            "g".to_string(),
            codec(VideoCodec::H265),
            "out.mp4",
            1.0,
        );
        let args = plan.args();
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx265"]));
        assert!(args.windows(2).any(|w| w == ["-tag:v", "hvc1"]));
    }
}
