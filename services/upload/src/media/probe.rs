//! Geometry probing through `ffprobe`'s JSON stream listing.

use super::aspect::{ClassifyError, GeometryInfo};
use serde::Deserialize;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run ffprobe: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("ffprobe exited with {status}")]
    ToolFailure { status: ExitStatus },

    #[error("ffprobe produced unparseable output: {0}")]
    MalformedOutput(#[from] serde_json::Error),

    #[error("no video stream found")]
    NoVideoStream,

    #[error("video stream has unusable geometry: {0}")]
    InvalidDimensions(#[from] ClassifyError),
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
}

/// Extract the first video stream's geometry from `ffprobe -show_streams` JSON.
pub fn parse_geometry(stdout: &[u8]) -> Result<GeometryInfo, ProbeError> {
    let output: ProbeOutput = serde_json::from_slice(stdout)?;

    let stream = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or(ProbeError::NoVideoStream)?;

    let geometry = GeometryInfo::new(stream.width.unwrap_or(0), stream.height.unwrap_or(0))?;
    Ok(geometry)
}

/// Run ffprobe against a local file. Only stdout is consumed.
#[instrument(skip(ffprobe))]
pub async fn probe_geometry(ffprobe: &str, path: &Path) -> Result<GeometryInfo, ProbeError> {
    let output = Command::new(ffprobe)
        .args(["-v", "error", "-print_format", "json", "-show_streams"])
        .arg(path)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(ProbeError::Spawn)?;

    if !output.status.success() {
        return Err(ProbeError::ToolFailure {
            status: output.status,
        });
    }

    let geometry = parse_geometry(&output.stdout)?;

    debug!(
        width = geometry.width(),
        height = geometry.height(),
        "Probed video geometry"
    );

    Ok(geometry)
}
