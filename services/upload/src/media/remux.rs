//! Fast-start remux: move the MP4 index to the front without re-encoding.

use crate::landing::LocalAsset;
use std::ffi::OsString;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Content type of every remuxed output.
pub const REMUX_CONTENT_TYPE: &str = "video/mp4";

/// ffmpeg prints the actual failure last; keep the tail.
const MAX_DIAGNOSTIC_BYTES: usize = 4096;

#[derive(Debug, Error)]
pub enum RemuxError {
    #[error("failed to create remux output: {0}")]
    Io(#[source] std::io::Error),

    #[error("failed to run ffmpeg: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("ffmpeg exited with {status}: {stderr}")]
    ToolFailure { status: ExitStatus, stderr: String },

    #[error("ffmpeg produced an empty output file")]
    EmptyOutput,
}

/// Arguments for a stream-copy remux with the `faststart` flag.
///
/// `-y` is required because the output is a pre-created temp file.
pub fn faststart_args(input: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-y", "-v", "error", "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(input.as_os_str().to_owned());
    args.extend(
        ["-c", "copy", "-movflags", "faststart", "-f", "mp4"]
            .iter()
            .map(OsString::from),
    );
    args.push(output.as_os_str().to_owned());
    args
}

/// Remux `input` into a new temp file under `temp_dir`.
///
/// The input is left untouched. The output is deleted again unless it is
/// returned.
#[instrument(skip(ffmpeg, temp_dir))]
pub async fn remux_faststart(
    ffmpeg: &str,
    input: &Path,
    temp_dir: &Path,
) -> Result<LocalAsset, RemuxError> {
    let output_path = tempfile::Builder::new()
        .prefix("remux-")
        .suffix(".mp4")
        .tempfile_in(temp_dir)
        .map_err(RemuxError::Io)?
        .into_temp_path();

    let output = Command::new(ffmpeg)
        .args(faststart_args(input, &output_path))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(RemuxError::Spawn)?;

    if !output.status.success() {
        return Err(RemuxError::ToolFailure {
            status: output.status,
            stderr: diagnostic_tail(&output.stderr),
        });
    }

    let len = match tokio::fs::metadata(&output_path).await {
        Ok(meta) => meta.len(),
        Err(_) => return Err(RemuxError::EmptyOutput),
    };
    if len == 0 {
        return Err(RemuxError::EmptyOutput);
    }

    debug!(size_bytes = len, "Remuxed for fast start");

    Ok(LocalAsset::new(output_path, len, REMUX_CONTENT_TYPE))
}

fn diagnostic_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let mut start = text.len().saturating_sub(MAX_DIAGNOSTIC_BYTES);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
