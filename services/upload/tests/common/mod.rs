#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{stream, Stream};
use mockall::mock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use upload_service::config::UploadConfig;
use upload_service::media::{GeometryInfo, ProbeError, RemuxError};
use upload_service::object_store::StoreError;
use upload_service::video_store::RecordStoreError;
use upload_service::{
    LocalAsset, MediaToolRunner, ObjectStore, PipelineSettings, UploadPipeline, VideoRecord,
    VideoStore,
};
use uuid::Uuid;

pub const BUCKET: &str = "vidstash-media";

/// Prefix the fake remux writes in front of the input bytes.
pub const FASTSTART_MARKER: &[u8] = b"moov";

mock! {
    pub Tools {}

    #[async_trait]
    impl MediaToolRunner for Tools {
        async fn probe(&self, path: &Path) -> Result<GeometryInfo, ProbeError>;
        async fn remux(&self, input: &Path) -> Result<LocalAsset, RemuxError>;
    }
}

mock! {
    pub Store {}

    #[async_trait]
    impl ObjectStore for Store {
        async fn put_file(
            &self,
            bucket: &str,
            key: &str,
            content_type: &str,
            path: &Path,
            len: u64,
        ) -> Result<(), StoreError>;

        async fn presign_get(
            &self,
            bucket: &str,
            key: &str,
            expires_in: Duration,
        ) -> Result<String, StoreError>;
    }
}

/// Stand-in for `ffmpeg -movflags faststart`: writes a new temp file in
/// `dir` holding the marker followed by the input bytes.
pub fn fake_remux(input: &Path, dir: &Path) -> Result<LocalAsset, RemuxError> {
    let data = std::fs::read(input).map_err(RemuxError::Io)?;
    let mut output = tempfile::Builder::new()
        .prefix("remux-")
        .suffix(".mp4")
        .tempfile_in(dir)
        .map_err(RemuxError::Io)?;
    output.write_all(FASTSTART_MARKER).map_err(RemuxError::Io)?;
    output.write_all(&data).map_err(RemuxError::Io)?;

    let len = (FASTSTART_MARKER.len() + data.len()) as u64;
    Ok(LocalAsset::new(output.into_temp_path(), len, "video/mp4"))
}

/// Tools double that remuxes with [`fake_remux`] and reports fixed geometry.
pub fn tools_with_geometry(dir: &Path, width: i64, height: i64) -> MockTools {
    let dir = dir.to_path_buf();
    let mut tools = MockTools::new();
    tools
        .expect_remux()
        .returning(move |input| fake_remux(input, &dir));
    tools
        .expect_probe()
        .returning(move |_| GeometryInfo::new(width, height).map_err(ProbeError::from));
    tools
}

/// Tools double that fails the test if either operation is called.
pub fn untouchable_tools() -> MockTools {
    let mut tools = MockTools::new();
    tools.expect_remux().times(0);
    tools.expect_probe().times(0);
    tools
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Object store keeping objects in memory, keyed by `bucket/key`.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn get(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects.lock().get(&format!("{}/{}", bucket, key)).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        path: &Path,
        len: u64,
    ) -> Result<(), StoreError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::Read(e.to_string()))?;
        assert_eq!(data.len() as u64, len, "declared length must match file");

        self.objects.lock().insert(
            format!("{}/{}", bucket, key),
            StoredObject {
                content_type: content_type.to_string(),
                data,
            },
        );
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StoreError> {
        Ok(format!(
            "https://{}.s3.test/{}?X-Amz-Expires={}&X-Amz-Signature=fake",
            bucket,
            key,
            expires_in.as_secs()
        ))
    }
}

/// Video records held in memory.
#[derive(Default)]
pub struct InMemoryVideoStore {
    videos: Mutex<HashMap<Uuid, VideoRecord>>,
    fail_updates: Mutex<bool>,
}

impl InMemoryVideoStore {
    /// Insert a fresh video with no stored media, owned by `user_id`.
    pub fn create(&self, user_id: Uuid) -> Uuid {
        let now = Utc::now();
        let video = VideoRecord {
            id: Uuid::new_v4(),
            user_id,
            title: "Quarterly roadmap".to_string(),
            description: Some("Planning session recording".to_string()),
            thumbnail_url: None,
            video_url: None,
            created_at: now,
            updated_at: now,
        };
        let id = video.id;
        self.videos.lock().insert(id, video);
        id
    }

    pub fn get(&self, id: Uuid) -> Option<VideoRecord> {
        self.videos.lock().get(&id).cloned()
    }

    pub fn fail_updates(&self) {
        *self.fail_updates.lock() = true;
    }
}

#[async_trait]
impl VideoStore for InMemoryVideoStore {
    async fn get_video(&self, id: Uuid) -> Result<Option<VideoRecord>, RecordStoreError> {
        Ok(self.videos.lock().get(&id).cloned())
    }

    async fn update_video(&self, video: &VideoRecord) -> Result<(), RecordStoreError> {
        if *self.fail_updates.lock() {
            return Err(RecordStoreError::Database(sqlx::Error::PoolClosed));
        }

        let mut videos = self.videos.lock();
        let slot = videos
            .get_mut(&video.id)
            .ok_or(RecordStoreError::Missing(video.id))?;
        let mut updated = video.clone();
        updated.updated_at = Utc::now();
        *slot = updated;
        Ok(())
    }

    async fn ping(&self) -> Result<(), RecordStoreError> {
        Ok(())
    }
}

pub struct Harness {
    pub temp: TempDir,
    pub objects: Arc<MemoryObjectStore>,
    pub videos: Arc<InMemoryVideoStore>,
    pub pipeline: Arc<UploadPipeline>,
}

impl Harness {
    pub fn temp_path(&self) -> PathBuf {
        self.temp.path().to_path_buf()
    }

    /// Files currently left in the staging directory.
    pub fn leftover_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.temp.path())
            .expect("read temp dir")
            .map(|entry| entry.expect("dir entry").path())
            .collect()
    }
}

pub fn settings(temp_dir: &Path, max_video_bytes: u64) -> PipelineSettings {
    PipelineSettings {
        bucket: BUCKET.to_string(),
        upload: UploadConfig {
            max_video_bytes,
            max_thumbnail_bytes: 1024,
            temp_dir: Some(temp_dir.to_path_buf()),
        },
        temp_dir: temp_dir.to_path_buf(),
        tool_concurrency: 2,
        presigned_url_expiry: Duration::from_secs(300),
    }
}

/// Build a pipeline over in-memory stores. `make_tools` receives the
/// staging directory so doubles can write their outputs there.
pub fn harness<F>(max_video_bytes: u64, make_tools: F) -> Harness
where
    F: FnOnce(&Path) -> MockTools,
{
    let temp = TempDir::new().expect("temp dir");
    let objects = Arc::new(MemoryObjectStore::default());
    let videos = Arc::new(InMemoryVideoStore::default());
    let tools = make_tools(temp.path());

    let pipeline = Arc::new(UploadPipeline::new(
        settings(temp.path(), max_video_bytes),
        Arc::new(tools),
        objects.clone(),
        videos.clone(),
    ));

    Harness {
        temp,
        objects,
        videos,
        pipeline,
    }
}

/// A request body delivered in fixed-size chunks.
pub fn body(data: &[u8], chunk_size: usize) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
    let chunks: Vec<_> = data
        .chunks(chunk_size)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    stream::iter(chunks)
}

/// A body whose connection drops after the first chunk.
pub fn broken_body(first: &'static [u8]) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
    stream::iter(vec![
        Ok(Bytes::from_static(first)),
        Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "client went away",
        )),
    ])
}
