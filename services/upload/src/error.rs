use crate::auth::AuthError;
use crate::keys::KeyError;
use crate::landing::LandingError;
use crate::media::{ClassifyError, ProbeError, RemuxError};
use crate::publisher::PublishError;
use crate::signer::SigningError;
use crate::video_store::RecordStoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::error::Error as StdError;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// Coarse error classes; decide status codes and retry guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad request data. No retry, no partial state.
    InputValidation,
    /// Missing or invalid credentials.
    Unauthorized,
    /// ffprobe/ffmpeg failed. Deterministic, so not retried.
    ToolExecution,
    /// Object store or record store failure. Safe to retry.
    Storage,
    /// Local temp files, randomness, tool slots.
    Resource,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::InputValidation => "input_validation",
            ErrorCategory::Unauthorized => "unauthorized",
            ErrorCategory::ToolExecution => "tool_execution",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Resource => "resource",
        }
    }
}

/// Everything an upload or read request can fail with.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid video id {0:?}")]
    InvalidId(String),

    #[error("video {0} not found")]
    VideoNotFound(Uuid),

    #[error("user {user_id} does not own video {video_id}")]
    NotOwner { user_id: Uuid, video_id: Uuid },

    #[error("missing form field {0:?}")]
    MissingField(&'static str),

    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("landing stage failed: {0}")]
    Landing(#[from] LandingError),

    #[error("remux stage failed: {0}")]
    Remux(#[from] RemuxError),

    #[error("probe stage failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("classification stage failed: {0}")]
    Classify(#[from] ClassifyError),

    #[error("key derivation failed: {0}")]
    Key(#[from] KeyError),

    #[error("publish stage failed: {0}")]
    Publish(#[from] PublishError),

    #[error("signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("record store failed: {0}")]
    Records(#[from] RecordStoreError),

    #[error("media tool slots are closed")]
    ToolSlotsClosed,
}

/// Error response body. Carries a short label, never internal detail.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        use ErrorCategory::*;

        match self {
            PipelineError::InvalidId(_)
            | PipelineError::VideoNotFound(_)
            | PipelineError::NotOwner { .. }
            | PipelineError::MissingField(_)
            | PipelineError::MalformedBody(_) => InputValidation,
            PipelineError::Auth(AuthError::Lookup(_)) => Storage,
            PipelineError::Auth(_) => Unauthorized,
            PipelineError::Landing(LandingError::Io(_)) => Resource,
            PipelineError::Landing(_) => InputValidation,
            PipelineError::Remux(RemuxError::Io(_)) => Resource,
            PipelineError::Remux(_) | PipelineError::Probe(_) | PipelineError::Classify(_) => {
                ToolExecution
            }
            PipelineError::Key(_) | PipelineError::ToolSlotsClosed => Resource,
            PipelineError::Publish(_) | PipelineError::Signing(_) | PipelineError::Records(_) => {
                Storage
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::InvalidId(_)
            | PipelineError::MissingField(_)
            | PipelineError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            PipelineError::VideoNotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::NotOwner { .. } => StatusCode::FORBIDDEN,
            PipelineError::Auth(AuthError::Lookup(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::Auth(_) => StatusCode::UNAUTHORIZED,
            PipelineError::Landing(LandingError::UnsupportedMediaType { .. }) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            PipelineError::Landing(LandingError::OversizedUpload { .. }) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            PipelineError::Landing(LandingError::StreamAborted(_)) => StatusCode::BAD_REQUEST,
            PipelineError::Publish(_) | PipelineError::Signing(SigningError::Store(_)) => {
                StatusCode::BAD_GATEWAY
            }
            PipelineError::ToolSlotsClosed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short caller-facing label
    pub fn label(&self) -> &'static str {
        match self {
            PipelineError::InvalidId(_) => "Invalid ID",
            PipelineError::VideoNotFound(_) => "Video not found",
            PipelineError::NotOwner { .. } => "User does not have access to this video",
            PipelineError::MissingField(_) => "Missing upload field",
            PipelineError::MalformedBody(_) => "Malformed request body",
            PipelineError::Auth(AuthError::Lookup(_)) => "Could not validate credentials",
            PipelineError::Auth(_) => "Invalid or missing bearer token",
            PipelineError::Landing(LandingError::UnsupportedMediaType { .. }) => {
                "Unsupported media type"
            }
            PipelineError::Landing(LandingError::OversizedUpload { .. }) => "Upload too large",
            PipelineError::Landing(LandingError::StreamAborted(_)) => "Upload interrupted",
            PipelineError::Landing(LandingError::Io(_)) => "Could not store upload",
            PipelineError::Remux(RemuxError::Io(_)) => "Could not store upload",
            PipelineError::Remux(_) => "Failed to process video for fast start",
            PipelineError::Probe(_) | PipelineError::Classify(_) => {
                "Failed to determine video aspect ratio"
            }
            PipelineError::Key(_) => "Could not allocate storage key",
            PipelineError::Publish(_) => "Failed to store video",
            PipelineError::Signing(_) => "Failed to sign video URL",
            PipelineError::Records(_) => "Failed to update video record",
            PipelineError::ToolSlotsClosed => "Service shutting down",
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::InvalidId(_) => "INVALID_ID",
            PipelineError::VideoNotFound(_) => "NOT_FOUND",
            PipelineError::NotOwner { .. } => "NOT_OWNER",
            PipelineError::MissingField(_) => "MISSING_FIELD",
            PipelineError::MalformedBody(_) => "MALFORMED_BODY",
            PipelineError::Auth(_) => "UNAUTHORIZED",
            PipelineError::Landing(LandingError::UnsupportedMediaType { .. }) => {
                "UNSUPPORTED_MEDIA_TYPE"
            }
            PipelineError::Landing(LandingError::OversizedUpload { .. }) => "UPLOAD_TOO_LARGE",
            PipelineError::Landing(LandingError::StreamAborted(_)) => "UPLOAD_INTERRUPTED",
            PipelineError::Landing(LandingError::Io(_)) | PipelineError::Remux(RemuxError::Io(_)) => {
                "STAGING_ERROR"
            }
            PipelineError::Remux(_) => "REMUX_ERROR",
            PipelineError::Probe(_) | PipelineError::Classify(_) => "PROBE_ERROR",
            PipelineError::Key(_) => "KEY_ERROR",
            PipelineError::Publish(_) => "PUBLISH_ERROR",
            PipelineError::Signing(_) => "PRESIGN_ERROR",
            PipelineError::Records(_) => "RECORD_ERROR",
            PipelineError::ToolSlotsClosed => "UNAVAILABLE",
        }
    }

    /// Full cause chain for internal logs
    pub fn chain(&self) -> String {
        let mut message = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            let text = cause.to_string();
            if !message.contains(&text) {
                message.push_str(": ");
                message.push_str(&text);
            }
            source = cause.source();
        }
        message
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let category = self.category();
        let status = self.status();

        if status.is_server_error() {
            error!(
                category = category.as_str(),
                code = self.code(),
                error = %self.chain(),
                "Request failed"
            );
        } else {
            warn!(
                category = category.as_str(),
                code = self.code(),
                error = %self.chain(),
                "Request rejected"
            );
        }

        metrics::counter!("upload.failures", "category" => category.as_str()).increment(1);

        (
            status,
            Json(ErrorResponse {
                error: self.label().to_string(),
                code: self.code().to_string(),
            }),
        )
            .into_response()
    }
}
