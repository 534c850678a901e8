//! Stream landing: copy an inbound body into a local temporary file.
//!
//! The size cap is enforced chunk by chunk while reading and the content type
//! is checked before any file is created. The landed file lives exactly as
//! long as its [`LocalAsset`]; dropping the asset (on success, on error, or
//! when the request future is cancelled) removes it.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::config::UploadConfig;

#[derive(Debug, Error)]
pub enum LandingError {
    #[error("unsupported media type {found:?}, expected one of {allowed:?}")]
    UnsupportedMediaType {
        found: Option<String>,
        allowed: &'static [&'static str],
    },

    #[error("upload exceeds the {limit} byte limit")]
    OversizedUpload { limit: u64 },

    #[error("failed to stage upload: {0}")]
    Io(#[from] std::io::Error),

    #[error("inbound stream ended with an error: {0}")]
    StreamAborted(String),
}

/// Which kind of body is being landed; decides allowed types and the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Thumbnail,
}

impl MediaKind {
    pub fn allowed_types(self) -> &'static [&'static str] {
        match self {
            MediaKind::Video => &["video/mp4"],
            MediaKind::Thumbnail => &["image/jpeg", "image/png"],
        }
    }

    /// Multipart form field carrying the body.
    pub fn form_field(self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Thumbnail => "thumbnail",
        }
    }

    fn temp_prefix(self) -> &'static str {
        match self {
            MediaKind::Video => "upload-video-",
            MediaKind::Thumbnail => "upload-thumbnail-",
        }
    }

    /// Validate a declared `Content-Type` and return its canonical essence.
    ///
    /// Parameters such as `; codecs=...` are ignored.
    pub fn accept(self, declared: Option<&str>) -> Result<&'static str, LandingError> {
        let allowed = self.allowed_types();
        let rejected = || LandingError::UnsupportedMediaType {
            found: declared.map(str::to_owned),
            allowed,
        };

        let mime: mime::Mime = declared.ok_or_else(rejected)?.parse().map_err(|_| rejected())?;
        let essence = mime.essence_str();

        allowed
            .iter()
            .copied()
            .find(|a| a.eq_ignore_ascii_case(essence))
            .ok_or_else(rejected)
    }
}

/// File extension used in storage keys for an accepted content type.
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "video/mp4" => Some("mp4"),
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        _ => None,
    }
}

/// A local temporary file owned by one pipeline stage.
pub struct LocalAsset {
    path: TempPath,
    len: u64,
    content_type: String,
}

impl LocalAsset {
    pub fn new(path: TempPath, len: u64, content_type: impl Into<String>) -> Self {
        Self {
            path,
            len,
            content_type: content_type.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Remove the file now, reporting failures that a plain drop would swallow.
    pub fn close(self) -> std::io::Result<()> {
        self.path.close()
    }
}

impl fmt::Debug for LocalAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalAsset")
            .field("path", &self.path())
            .field("len", &self.len)
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// Lands inbound bodies in a temp directory under per-kind size caps.
#[derive(Debug, Clone)]
pub struct StreamLander {
    temp_dir: PathBuf,
    max_video_bytes: u64,
    max_thumbnail_bytes: u64,
}

impl StreamLander {
    pub fn new(config: &UploadConfig, temp_dir: PathBuf) -> Self {
        Self {
            temp_dir,
            max_video_bytes: config.max_video_bytes,
            max_thumbnail_bytes: config.max_thumbnail_bytes,
        }
    }

    pub fn limit_for(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Video => self.max_video_bytes,
            MediaKind::Thumbnail => self.max_thumbnail_bytes,
        }
    }

    /// Copy `body` into a fresh temp file.
    ///
    /// Fails before creating anything when the content type is not allowed
    /// for `kind`, and stops reading as soon as the cap would be exceeded.
    #[instrument(skip(self, body))]
    pub async fn land<S, E>(
        &self,
        kind: MediaKind,
        content_type: Option<&str>,
        body: S,
    ) -> Result<LocalAsset, LandingError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: fmt::Display,
    {
        let content_type = kind.accept(content_type)?;
        let limit = self.limit_for(kind);

        let (file, path) = tempfile::Builder::new()
            .prefix(kind.temp_prefix())
            .tempfile_in(&self.temp_dir)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut written: u64 = 0;
        let mut body = std::pin::pin!(body);

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| LandingError::StreamAborted(e.to_string()))?;

            written += chunk.len() as u64;
            if written > limit {
                return Err(LandingError::OversizedUpload { limit });
            }

            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        debug!(size_bytes = written, content_type, "Upload landed");
        metrics::histogram!("upload.bytes.landed").record(written as f64);

        Ok(LocalAsset::new(path, written, content_type))
    }
}
