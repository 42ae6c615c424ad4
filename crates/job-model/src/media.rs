//! Submitted media references.

use std::path::Path;

use serde::{Deserialize, Serialize};

use inkmark_common::error::{InkmarkError, InkmarkResult};

/// Image or video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classify a declared MIME type.
    pub fn from_mime(mime: &str) -> InkmarkResult<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        if mime.starts_with("image/") {
            Ok(MediaKind::Image)
        } else if mime.starts_with("video/") {
            Ok(MediaKind::Video)
        } else {
            Err(InkmarkError::invalid_input("Unsupported file type"))
        }
    }

    /// Extension used for the encoded output when the input has none.
    pub fn default_extension(self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Video => "mp4",
        }
    }
}

/// A media item as announced by the chat transport, before download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Transport-specific locator (remote file id or local path).
    pub source: String,

    /// Original file name, if the transport reported one.
    pub file_name: Option<String>,

    /// Declared MIME type.
    pub mime: String,

    /// Declared size in bytes, if known before download.
    pub declared_size: Option<u64>,
}

impl MediaRef {
    /// Reference a local file, guessing its MIME type and size.
    pub fn local(path: &Path) -> InkmarkResult<Self> {
        let mime = mime_guess::from_path(path).first_raw().ok_or_else(|| {
            InkmarkError::invalid_input(format!("Unsupported file type: {}", path.display()))
        })?;
        let declared_size = std::fs::metadata(path).ok().map(|m| m.len());
        Ok(Self {
            source: path.to_string_lossy().into_owned(),
            file_name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
            mime: mime.to_string(),
            declared_size,
        })
    }

    pub fn kind(&self) -> InkmarkResult<MediaKind> {
        MediaKind::from_mime(&self.mime)
    }

    /// Lowercase extension from the file name, including the dot.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name.as_deref().unwrap_or(&self.source);
        let ext = Path::new(name).extension()?.to_str()?;
        if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(format!(".{}", ext.to_ascii_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_classification() {
        assert_eq!(MediaKind::from_mime("image/png").unwrap(), MediaKind::Image);
        assert_eq!(MediaKind::from_mime("Video/MP4").unwrap(), MediaKind::Video);
        let err = MediaKind::from_mime("application/pdf").unwrap_err();
        assert!(err.to_string().contains("Unsupported file type"));
    }

    #[test]
    fn test_extension_sanitized() {
        let mut media = MediaRef {
            source: "abc".into(),
            file_name: Some("Holiday.MOV".into()),
            mime: "video/quicktime".into(),
            declared_size: None,
        };
        assert_eq!(media.extension().as_deref(), Some(".mov"));
        media.file_name = Some("weird.../../x".into());
        assert_eq!(media.extension(), None);
        media.file_name = None;
        assert_eq!(media.extension(), None);
    }

    #[test]
    fn test_local_media_guesses_type_from_extension() {
        let dir = std::env::temp_dir().join(format!("inkmark_media_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let clip = dir.join("Clip.MOV");
        std::fs::write(&clip, b"1234").unwrap();

        let media = MediaRef::local(&clip).unwrap();
        assert_eq!(media.mime, "video/quicktime");
        assert_eq!(media.kind().unwrap(), MediaKind::Video);
        assert_eq!(media.declared_size, Some(4));

        let photo = MediaRef::local(&dir.join("photo.jpeg")).unwrap();
        assert_eq!(photo.kind().unwrap(), MediaKind::Image);
        assert_eq!(photo.declared_size, None);

        let err = MediaRef::local(&dir.join("notes.unknownext")).unwrap_err();
        assert!(err.to_string().contains("Unsupported file type"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
