use crate::object_store::{ObjectStore, StoreError};
use crate::publisher::REFERENCE_SEPARATOR;
use crate::video_store::VideoRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("stored object reference {0:?} is not of the form bucket,key")]
    MalformedReference(String),

    #[error("presigned URL validity {0:?} is out of range")]
    ExpiryOutOfRange(Duration),

    #[error("failed to presign: {0}")]
    Store(#[from] StoreError),
}

/// A time-limited retrieval URL. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedAccess {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// A video record with every stored location replaced by a fresh signed URL
#[derive(Debug, Clone, Serialize)]
pub struct SignedVideo {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub thumbnail_url_expires_at: Option<DateTime<Utc>>,
    pub video_url: Option<String>,
    pub video_url_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Split a persisted `bucket,key` reference.
pub fn parse_reference(reference: &str) -> Result<(&str, &str), SigningError> {
    match reference.split_once(REFERENCE_SEPARATOR) {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
        _ => Err(SigningError::MalformedReference(reference.to_string())),
    }
}

/// Stateless presigner; call on every read that hands out a location.
#[derive(Clone)]
pub struct AccessSigner {
    store: Arc<dyn ObjectStore>,
    expiry: Duration,
}

impl AccessSigner {
    pub fn new(store: Arc<dyn ObjectStore>, expiry: Duration) -> Self {
        Self { store, expiry }
    }

    /// Presign a GET for a persisted object reference.
    pub async fn sign(&self, reference: &str) -> Result<SignedAccess, SigningError> {
        let (bucket, key) = parse_reference(reference)?;
        let validity = chrono::Duration::from_std(self.expiry)
            .map_err(|_| SigningError::ExpiryOutOfRange(self.expiry))?;

        let issued_at = Utc::now();
        let url = self.store.presign_get(bucket, key, self.expiry).await?;

        debug!(bucket = %bucket, key = %key, "Presigned object URL");

        Ok(SignedAccess {
            url,
            expires_at: issued_at + validity,
        })
    }

    async fn sign_optional(
        &self,
        reference: Option<&str>,
    ) -> Result<Option<SignedAccess>, SigningError> {
        match reference {
            Some(r) => self.sign(r).await.map(Some),
            None => Ok(None),
        }
    }

    /// Replace both stored locations of `video` with signed URLs.
    pub async fn sign_video(&self, video: VideoRecord) -> Result<SignedVideo, SigningError> {
        let thumbnail = self.sign_optional(video.thumbnail_url.as_deref()).await?;
        let playback = self.sign_optional(video.video_url.as_deref()).await?;

        let (thumbnail_url, thumbnail_url_expires_at) = split(thumbnail);
        let (video_url, video_url_expires_at) = split(playback);

        Ok(SignedVideo {
            id: video.id,
            user_id: video.user_id,
            title: video.title,
            description: video.description,
            thumbnail_url,
            thumbnail_url_expires_at,
            video_url,
            video_url_expires_at,
            created_at: video.created_at,
            updated_at: video.updated_at,
        })
    }
}

fn split(access: Option<SignedAccess>) -> (Option<String>, Option<DateTime<Utc>>) {
    match access {
        Some(a) => (Some(a.url), Some(a.expires_at)),
        None => (None, None),
    }
}
