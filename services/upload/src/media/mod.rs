//! External media tooling: geometry probing, fast-start remux and aspect
//! classification.
//!
//! The process boundary sits behind [`MediaToolRunner`] so the upload
//! pipeline can run against scripted doubles in tests.

pub mod aspect;
pub mod probe;
pub mod remux;

pub use aspect::{classify, AspectClass, ClassifyError, GeometryInfo};
pub use probe::ProbeError;
pub use remux::RemuxError;

use crate::config::MediaToolsConfig;
use crate::landing::LocalAsset;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

/// The two external tool operations the pipeline needs.
#[async_trait]
pub trait MediaToolRunner: Send + Sync {
    /// Width and height of the primary video stream at `path`.
    async fn probe(&self, path: &Path) -> Result<GeometryInfo, ProbeError>;

    /// Fast-start copy of `input` as a new temporary file.
    async fn remux(&self, input: &Path) -> Result<LocalAsset, RemuxError>;
}

/// [`MediaToolRunner`] backed by the `ffprobe` and `ffmpeg` binaries.
pub struct FfmpegTools {
    ffprobe: String,
    ffmpeg: String,
    temp_dir: PathBuf,
}

impl FfmpegTools {
    pub fn new(config: &MediaToolsConfig, temp_dir: PathBuf) -> Self {
        Self {
            ffprobe: config.ffprobe_path.clone(),
            ffmpeg: config.ffmpeg_path.clone(),
            temp_dir,
        }
    }

    /// Log whether both binaries can be executed. Returns false if either is missing.
    pub async fn check_available(&self) -> bool {
        let mut available = true;

        for tool in [&self.ffprobe, &self.ffmpeg] {
            let status = Command::new(tool)
                .arg("-version")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status()
                .await;

            match status {
                Ok(s) if s.success() => info!(tool = %tool, "Media tool available"),
                Ok(s) => {
                    warn!(tool = %tool, status = %s, "Media tool returned an error");
                    available = false;
                }
                Err(e) => {
                    warn!(tool = %tool, error = %e, "Media tool could not be started");
                    available = false;
                }
            }
        }

        available
    }
}

#[async_trait]
impl MediaToolRunner for FfmpegTools {
    async fn probe(&self, path: &Path) -> Result<GeometryInfo, ProbeError> {
        probe::probe_geometry(&self.ffprobe, path).await
    }

    async fn remux(&self, input: &Path) -> Result<LocalAsset, RemuxError> {
        remux::remux_faststart(&self.ffmpeg, input, &self.temp_dir).await
    }
}
