//! Upload orchestration.
//!
//! A video upload runs land → remux → probe → classify → key → publish and
//! then records the object reference on the video. Every temporary file is
//! owned by a [`LocalAsset`], so each exit path, early or not, removes it.

use crate::config::{Config, UploadConfig};
use crate::error::PipelineError;
use crate::keys::StorageKey;
use crate::landing::{extension_for, LocalAsset, MediaKind, StreamLander};
use crate::media::{classify, AspectClass, MediaToolRunner};
use crate::object_store::ObjectStore;
use crate::publisher::{PublishedObject, Publisher};
use crate::signer::{AccessSigner, SignedVideo};
use crate::video_store::{VideoRecord, VideoStore};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Everything the pipeline needs from configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub bucket: String,
    pub upload: UploadConfig,
    pub temp_dir: PathBuf,
    pub tool_concurrency: usize,
    pub presigned_url_expiry: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bucket: config.s3.bucket.clone(),
            upload: config.upload.clone(),
            temp_dir: config.temp_dir(),
            tool_concurrency: config.media.tool_concurrency,
            presigned_url_expiry: config.presigned_url_expiry(),
        }
    }
}

/// Runs uploads end to end. Cheap to share behind an `Arc`; every request
/// works on its own temp files and keys.
pub struct UploadPipeline {
    lander: StreamLander,
    tools: Arc<dyn MediaToolRunner>,
    tool_slots: Semaphore,
    publisher: Publisher,
    signer: AccessSigner,
    videos: Arc<dyn VideoStore>,
}

impl UploadPipeline {
    pub fn new(
        settings: PipelineSettings,
        tools: Arc<dyn MediaToolRunner>,
        store: Arc<dyn ObjectStore>,
        videos: Arc<dyn VideoStore>,
    ) -> Self {
        Self {
            lander: StreamLander::new(&settings.upload, settings.temp_dir),
            tools,
            tool_slots: Semaphore::new(settings.tool_concurrency.max(1)),
            publisher: Publisher::new(store.clone(), settings.bucket),
            signer: AccessSigner::new(store, settings.presigned_url_expiry),
            videos,
        }
    }

    /// Load `video_id` and check that `user_id` owns it.
    pub async fn authorize(
        &self,
        user_id: Uuid,
        video_id: Uuid,
    ) -> Result<VideoRecord, PipelineError> {
        let video = self
            .videos
            .get_video(video_id)
            .await?
            .ok_or(PipelineError::VideoNotFound(video_id))?;

        if video.user_id != user_id {
            return Err(PipelineError::NotOwner { user_id, video_id });
        }

        Ok(video)
    }

    /// Ingest a video body for `video_id` and return the record with fresh
    /// signed URLs.
    ///
    /// Ownership is checked before any byte of `body` is read.
    #[instrument(skip(self, content_type, body))]
    pub async fn upload_video<S, E>(
        &self,
        user_id: Uuid,
        video_id: Uuid,
        content_type: Option<&str>,
        body: S,
    ) -> Result<SignedVideo, PipelineError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: fmt::Display,
    {
        let started = Instant::now();
        let mut video = self.authorize(user_id, video_id).await?;

        let landed = self.lander.land(MediaKind::Video, content_type, body).await?;
        debug!(size_bytes = landed.len(), "Video landed");

        let processed = self.remux(&landed).await?;
        discard(landed);

        let class = self.classify(&processed).await?;

        let ext = extension_for(processed.content_type()).unwrap_or("mp4");
        let key = StorageKey::for_video(class, ext)?;
        let published = self
            .publisher
            .publish(&processed, key, processed.content_type())
            .await?;
        let size_bytes = processed.len();
        discard(processed);

        video.video_url = Some(published.reference());
        video.updated_at = Utc::now();
        self.record(&video, &published).await?;

        metrics::counter!("upload.videos.published", "aspect" => class.as_str()).increment(1);
        metrics::histogram!("upload.video.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        info!(
            key = %published.key,
            aspect = %class,
            size_bytes,
            "Video published"
        );

        Ok(self.signer.sign_video(video).await?)
    }

    /// Ingest a thumbnail image for `video_id`. No media tools are involved.
    #[instrument(skip(self, content_type, body))]
    pub async fn upload_thumbnail<S, E>(
        &self,
        user_id: Uuid,
        video_id: Uuid,
        content_type: Option<&str>,
        body: S,
    ) -> Result<SignedVideo, PipelineError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: fmt::Display,
    {
        let mut video = self.authorize(user_id, video_id).await?;

        let landed = self
            .lander
            .land(MediaKind::Thumbnail, content_type, body)
            .await?;

        let ext = extension_for(landed.content_type()).unwrap_or("bin");
        let key = StorageKey::for_thumbnail(ext)?;
        let published = self
            .publisher
            .publish(&landed, key, landed.content_type())
            .await?;
        discard(landed);

        video.thumbnail_url = Some(published.reference());
        video.updated_at = Utc::now();
        self.record(&video, &published).await?;

        metrics::counter!("upload.thumbnails.published").increment(1);
        info!(key = %published.key, "Thumbnail published");

        Ok(self.signer.sign_video(video).await?)
    }

    /// Owner-only read with freshly signed locations.
    #[instrument(skip(self))]
    pub async fn signed_video(
        &self,
        user_id: Uuid,
        video_id: Uuid,
    ) -> Result<SignedVideo, PipelineError> {
        let video = self.authorize(user_id, video_id).await?;
        Ok(self.signer.sign_video(video).await?)
    }

    /// Readiness: the record store answers and tool slots are open.
    pub async fn check_ready(&self) -> Result<(), PipelineError> {
        if self.tool_slots.is_closed() {
            return Err(PipelineError::ToolSlotsClosed);
        }
        self.videos.ping().await?;
        Ok(())
    }

    /// Stop handing out tool slots; in-flight tool runs finish normally.
    pub fn close(&self) {
        self.tool_slots.close();
    }

    async fn remux(&self, landed: &LocalAsset) -> Result<LocalAsset, PipelineError> {
        let _permit = self
            .tool_slots
            .acquire()
            .await
            .map_err(|_| PipelineError::ToolSlotsClosed)?;

        Ok(self.tools.remux(landed.path()).await?)
    }

    async fn classify(&self, processed: &LocalAsset) -> Result<AspectClass, PipelineError> {
        let geometry = {
            let _permit = self
                .tool_slots
                .acquire()
                .await
                .map_err(|_| PipelineError::ToolSlotsClosed)?;
            self.tools.probe(processed.path()).await?
        };

        let class = classify(geometry.width().into(), geometry.height().into())?;
        debug!(
            width = geometry.width(),
            height = geometry.height(),
            aspect = %class,
            "Video classified"
        );
        Ok(class)
    }

    async fn record(
        &self,
        video: &VideoRecord,
        published: &PublishedObject,
    ) -> Result<(), PipelineError> {
        if let Err(e) = self.videos.update_video(video).await {
            // The object stays in the bucket with nothing pointing at it.
            error!(
                bucket = %published.bucket,
                key = %published.key,
                error = %e,
                "Published object orphaned by failed record update"
            );
            return Err(e.into());
        }
        Ok(())
    }
}

fn discard(asset: LocalAsset) {
    if let Err(e) = asset.close() {
        warn!(error = %e, "Failed to remove temporary file");
    }
}
