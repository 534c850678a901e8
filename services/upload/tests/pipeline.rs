mod common;

use chrono::Utc;
use common::*;
use regex::Regex;
use mockall::Sequence;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use upload_service::landing::LandingError;
use upload_service::media::{GeometryInfo, ProbeError, RemuxError};
use upload_service::object_store::StoreError;
use upload_service::{ErrorCategory, PipelineError, UploadPipeline};
use uuid::Uuid;

const MIB: u64 = 1024 * 1024;

fn stored_key(reference: &str) -> &str {
    let (bucket, key) = reference.split_once(',').expect("bucket,key reference");
    assert_eq!(bucket, BUCKET);
    key
}

#[tokio::test]
async fn test_landscape_upload_publishes_and_signs() {
    let h = harness(MIB, |dir| tools_with_geometry(dir, 1920, 1080));
    let owner = Uuid::new_v4();
    let video_id = h.videos.create(owner);
    let payload = b"ftyp....mdat....moov-at-the-end";

    let before = Utc::now();
    let signed = h
        .pipeline
        .upload_video(owner, video_id, Some("video/mp4"), body(payload, 7))
        .await
        .unwrap();

    let record = h.videos.get(video_id).unwrap();
    let reference = record.video_url.as_deref().unwrap();
    let key = stored_key(reference);
    assert!(Regex::new(r"^landscape/[A-Za-z0-9_-]{43}\.mp4$")
        .unwrap()
        .is_match(key));

    let object = h.objects.get(BUCKET, key).unwrap();
    assert_eq!(object.content_type, "video/mp4");
    assert!(object.data.starts_with(FASTSTART_MARKER));
    assert!(object.data.ends_with(payload));

    let url = signed.video_url.unwrap();
    assert!(url.starts_with(&format!("https://{}.s3.test/{}?", BUCKET, key)));
    assert!(signed.video_url_expires_at.unwrap() > before);
    assert!(signed.thumbnail_url.is_none());

    assert!(h.leftover_files().is_empty());
}

#[tokio::test]
async fn test_portrait_and_other_prefixes() {
    for (width, height, prefix) in [(1080, 1920, "portrait/"), (1000, 1000, "other/")] {
        let h = harness(MIB, |dir| tools_with_geometry(dir, width, height));
        let owner = Uuid::new_v4();
        let video_id = h.videos.create(owner);

        h.pipeline
            .upload_video(owner, video_id, Some("video/mp4"), body(b"clip", 2))
            .await
            .unwrap();

        let record = h.videos.get(video_id).unwrap();
        let key = stored_key(record.video_url.as_deref().unwrap()).to_string();
        assert!(key.starts_with(prefix), "{} should start with {}", key, prefix);
    }
}

#[tokio::test]
async fn test_non_owner_rejected_before_tools_run() {
    let h = harness(MIB, |_| untouchable_tools());
    let owner = Uuid::new_v4();
    let intruder = Uuid::new_v4();
    let video_id = h.videos.create(owner);

    let err = h
        .pipeline
        .upload_video(intruder, video_id, Some("video/mp4"), body(b"data", 4))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NotOwner { .. }));
    assert_eq!(err.category(), ErrorCategory::InputValidation);
    assert!(h.objects.keys().is_empty());
    assert!(h.videos.get(video_id).unwrap().video_url.is_none());
    assert!(h.leftover_files().is_empty());
}

#[tokio::test]
async fn test_unknown_video_not_found() {
    let h = harness(MIB, |_| untouchable_tools());
    let missing = Uuid::new_v4();

    let err = h
        .pipeline
        .upload_video(Uuid::new_v4(), missing, Some("video/mp4"), body(b"data", 4))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::VideoNotFound(id) if id == missing));
}

#[tokio::test]
async fn test_oversized_upload_leaves_nothing_behind() {
    let h = harness(8, |_| untouchable_tools());
    let owner = Uuid::new_v4();
    let video_id = h.videos.create(owner);

    let err = h
        .pipeline
        .upload_video(owner, video_id, Some("video/mp4"), body(&[0u8; 64], 5))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Landing(LandingError::OversizedUpload { limit: 8 })
    ));
    assert!(h.objects.keys().is_empty());
    assert!(h.leftover_files().is_empty());
}

#[tokio::test]
async fn test_unsupported_content_type_rejected() {
    let h = harness(MIB, |_| untouchable_tools());
    let owner = Uuid::new_v4();
    let video_id = h.videos.create(owner);

    for declared in [Some("video/quicktime"), Some("not a mime"), None] {
        let err = h
            .pipeline
            .upload_video(owner, video_id, declared, body(b"data", 4))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Landing(LandingError::UnsupportedMediaType { .. })
        ));
    }
    assert!(h.leftover_files().is_empty());
}

#[tokio::test]
async fn test_interrupted_body_cleaned_up() {
    let h = harness(MIB, |_| untouchable_tools());
    let owner = Uuid::new_v4();
    let video_id = h.videos.create(owner);

    let err = h
        .pipeline
        .upload_video(owner, video_id, Some("video/mp4"), broken_body(b"partial"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Landing(LandingError::StreamAborted(_))
    ));
    assert!(h.leftover_files().is_empty());
}

#[tokio::test]
async fn test_remux_failure_cleans_landed_file() {
    let h = harness(MIB, |_| {
        let mut tools = MockTools::new();
        tools
            .expect_remux()
            .times(1)
            .returning(|_| Err(RemuxError::EmptyOutput));
        tools.expect_probe().times(0);
        tools
    });
    let owner = Uuid::new_v4();
    let video_id = h.videos.create(owner);

    let err = h
        .pipeline
        .upload_video(owner, video_id, Some("video/mp4"), body(b"data", 4))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Remux(RemuxError::EmptyOutput)));
    assert_eq!(err.category(), ErrorCategory::ToolExecution);
    assert!(h.objects.keys().is_empty());
    assert!(h.leftover_files().is_empty());
}

#[tokio::test]
async fn test_probe_failure_cleans_remuxed_file() {
    let h = harness(MIB, |dir| {
        let dir = dir.to_path_buf();
        let mut tools = MockTools::new();
        tools
            .expect_remux()
            .returning(move |input| fake_remux(input, &dir));
        tools
            .expect_probe()
            .times(1)
            .returning(|_| Err(ProbeError::NoVideoStream));
        tools
    });
    let owner = Uuid::new_v4();
    let video_id = h.videos.create(owner);

    let err = h
        .pipeline
        .upload_video(owner, video_id, Some("video/mp4"), body(b"audio only", 4))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Probe(ProbeError::NoVideoStream)));
    assert!(h.objects.keys().is_empty());
    assert!(h.videos.get(video_id).unwrap().video_url.is_none());
    assert!(h.leftover_files().is_empty());
}

#[tokio::test]
async fn test_probe_reads_remuxed_copy() {
    let landed: Arc<Mutex<Option<PathBuf>>> = Arc::default();
    let remuxed: Arc<Mutex<Option<PathBuf>>> = Arc::default();

    let h = harness(MIB, |dir| {
        let dir = dir.to_path_buf();
        let landed = landed.clone();
        let remuxed_out = remuxed.clone();
        let remuxed_in = remuxed.clone();
        let mut seq = Sequence::new();
        let mut tools = MockTools::new();
        tools
            .expect_remux()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |input| {
                *landed.lock() = Some(input.to_path_buf());
                let asset = fake_remux(input, &dir)?;
                *remuxed_out.lock() = Some(asset.path().to_path_buf());
                Ok(asset)
            });
        tools
            .expect_probe()
            .times(1)
            .in_sequence(&mut seq)
            .withf(move |path| remuxed_in.lock().as_deref() == Some(path))
            .returning(|_| GeometryInfo::new(1920, 1080).map_err(ProbeError::from));
        tools
    });
    let owner = Uuid::new_v4();
    let video_id = h.videos.create(owner);

    h.pipeline
        .upload_video(owner, video_id, Some("video/mp4"), body(b"moov last", 4))
        .await
        .unwrap();

    let landed = landed.lock().clone().unwrap();
    let remuxed = remuxed.lock().clone().unwrap();
    assert_ne!(landed, remuxed);
    assert!(!remuxed.exists());
    assert!(h.leftover_files().is_empty());
}

#[tokio::test]
async fn test_upload_refreshes_updated_at() {
    let h = harness(MIB, |dir| tools_with_geometry(dir, 1920, 1080));
    let owner = Uuid::new_v4();
    let video_id = h.videos.create(owner);
    let created = h.videos.get(video_id).unwrap();

    let before = Utc::now();
    let signed = h
        .pipeline
        .upload_video(owner, video_id, Some("video/mp4"), body(b"data", 4))
        .await
        .unwrap();
    assert!(signed.updated_at >= before);
    assert_eq!(signed.created_at, created.created_at);

    let before = Utc::now();
    let signed = h
        .pipeline
        .upload_thumbnail(owner, video_id, Some("image/png"), body(b"png", 4))
        .await
        .unwrap();
    assert!(signed.updated_at >= before);
}

#[tokio::test]
async fn test_zero_width_geometry_is_tool_error() {
    let h = harness(MIB, |dir| tools_with_geometry(dir, 0, 1080));
    let owner = Uuid::new_v4();
    let video_id = h.videos.create(owner);

    let err = h
        .pipeline
        .upload_video(owner, video_id, Some("video/mp4"), body(b"data", 4))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Probe(ProbeError::InvalidDimensions(_))
    ));
    assert_eq!(err.category(), ErrorCategory::ToolExecution);
    assert!(h.leftover_files().is_empty());
}

#[tokio::test]
async fn test_publish_failure_keeps_record_unchanged() {
    let temp = tempfile::TempDir::new().unwrap();
    let tools = tools_with_geometry(temp.path(), 1920, 1080);

    let mut store = MockStore::new();
    store
        .expect_put_file()
        .times(1)
        .returning(|_, _, _, _, _| Err(StoreError::Request("connection reset".to_string())));
    store.expect_presign_get().times(0);

    let videos = Arc::new(InMemoryVideoStore::default());
    let owner = Uuid::new_v4();
    let video_id = videos.create(owner);

    let pipeline = UploadPipeline::new(
        settings(temp.path(), MIB),
        Arc::new(tools),
        Arc::new(store),
        videos.clone(),
    );

    let err = pipeline
        .upload_video(owner, video_id, Some("video/mp4"), body(b"data", 4))
        .await
        .unwrap_err();

    match &err {
        PipelineError::Publish(e) => assert!(e.key.as_str().starts_with("landscape/")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.category(), ErrorCategory::Storage);
    assert!(videos.get(video_id).unwrap().video_url.is_none());
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_record_failure_after_publish() {
    let h = harness(MIB, |dir| tools_with_geometry(dir, 1920, 1080));
    let owner = Uuid::new_v4();
    let video_id = h.videos.create(owner);
    h.videos.fail_updates();

    let err = h
        .pipeline
        .upload_video(owner, video_id, Some("video/mp4"), body(b"data", 4))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Records(_)));
    assert_eq!(err.category(), ErrorCategory::Storage);
    // The object was already published and stays orphaned.
    assert_eq!(h.objects.keys().len(), 1);
    assert!(h.leftover_files().is_empty());
}

#[tokio::test]
async fn test_concurrent_uploads_get_distinct_keys() {
    let h = harness(MIB, |dir| tools_with_geometry(dir, 1280, 720));
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let alice_video = h.videos.create(alice);
    let bob_video = h.videos.create(bob);

    let (a, b) = tokio::join!(
        h.pipeline
            .upload_video(alice, alice_video, Some("video/mp4"), body(b"alice clip", 3)),
        h.pipeline
            .upload_video(bob, bob_video, Some("video/mp4"), body(b"bob clip", 3)),
    );
    a.unwrap();
    b.unwrap();

    let alice_ref = h.videos.get(alice_video).unwrap().video_url.unwrap();
    let bob_ref = h.videos.get(bob_video).unwrap().video_url.unwrap();
    assert_ne!(alice_ref, bob_ref);

    let alice_obj = h.objects.get(BUCKET, stored_key(&alice_ref)).unwrap();
    let bob_obj = h.objects.get(BUCKET, stored_key(&bob_ref)).unwrap();
    assert!(alice_obj.data.ends_with(b"alice clip"));
    assert!(bob_obj.data.ends_with(b"bob clip"));

    assert!(h.leftover_files().is_empty());
}

#[tokio::test]
async fn test_reupload_replaces_reference() {
    let h = harness(MIB, |dir| tools_with_geometry(dir, 1920, 1080));
    let owner = Uuid::new_v4();
    let video_id = h.videos.create(owner);

    h.pipeline
        .upload_video(owner, video_id, Some("video/mp4"), body(b"first", 4))
        .await
        .unwrap();
    let first = h.videos.get(video_id).unwrap().video_url.unwrap();

    h.pipeline
        .upload_video(owner, video_id, Some("video/mp4"), body(b"second", 4))
        .await
        .unwrap();
    let second = h.videos.get(video_id).unwrap().video_url.unwrap();

    assert_ne!(first, second);
    assert_eq!(h.objects.keys().len(), 2);
}

#[tokio::test]
async fn test_thumbnail_upload_skips_media_tools() {
    let h = harness(MIB, |_| untouchable_tools());
    let owner = Uuid::new_v4();
    let video_id = h.videos.create(owner);
    let png = b"\x89PNG\r\n\x1a\nfake image";

    let signed = h
        .pipeline
        .upload_thumbnail(owner, video_id, Some("image/png"), body(png, 8))
        .await
        .unwrap();

    let record = h.videos.get(video_id).unwrap();
    let key = stored_key(record.thumbnail_url.as_deref().unwrap());
    assert!(Regex::new(r"^thumbnails/[A-Za-z0-9_-]{43}\.png$")
        .unwrap()
        .is_match(key));

    let object = h.objects.get(BUCKET, key).unwrap();
    assert_eq!(object.content_type, "image/png");
    assert_eq!(object.data, png);

    assert!(signed.thumbnail_url.unwrap().contains(key));
    assert!(signed.thumbnail_url_expires_at.is_some());
    assert!(h.leftover_files().is_empty());
}

#[tokio::test]
async fn test_thumbnail_cap_and_type() {
    let h = harness(MIB, |_| untouchable_tools());
    let owner = Uuid::new_v4();
    let video_id = h.videos.create(owner);

    let err = h
        .pipeline
        .upload_thumbnail(owner, video_id, Some("image/jpeg"), body(&[0u8; 2048], 256))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Landing(LandingError::OversizedUpload { limit: 1024 })
    ));

    let err = h
        .pipeline
        .upload_thumbnail(owner, video_id, Some("video/mp4"), body(b"data", 4))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Landing(LandingError::UnsupportedMediaType { .. })
    ));
    assert!(h.leftover_files().is_empty());
}

#[tokio::test]
async fn test_signed_read_is_owner_only_and_fresh() {
    let h = harness(MIB, |dir| tools_with_geometry(dir, 1080, 1920));
    let owner = Uuid::new_v4();
    let video_id = h.videos.create(owner);

    h.pipeline
        .upload_video(owner, video_id, Some("video/mp4"), body(b"vertical", 4))
        .await
        .unwrap();
    let reference = h.videos.get(video_id).unwrap().video_url.unwrap();
    let key = stored_key(&reference).to_string();

    let before = Utc::now();
    let signed = h.pipeline.signed_video(owner, video_id).await.unwrap();
    let url = signed.video_url.unwrap();
    assert!(url.contains(&key));
    assert!(url.contains("X-Amz-Expires=300"));
    assert!(signed.video_url_expires_at.unwrap() > before);

    // Stored value is still the reference, never the URL.
    assert_eq!(h.videos.get(video_id).unwrap().video_url.unwrap(), reference);

    let err = h
        .pipeline
        .signed_video(Uuid::new_v4(), video_id)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotOwner { .. }));
}

#[tokio::test]
async fn test_closed_pipeline_not_ready() {
    let h = harness(MIB, |_| untouchable_tools());
    let owner = Uuid::new_v4();
    let video_id = h.videos.create(owner);

    h.pipeline.check_ready().await.unwrap();
    h.pipeline.close();

    assert!(matches!(
        h.pipeline.check_ready().await,
        Err(PipelineError::ToolSlotsClosed)
    ));

    let err = h
        .pipeline
        .upload_video(owner, video_id, Some("video/mp4"), body(b"data", 4))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ToolSlotsClosed));
    assert!(h.leftover_files().is_empty());
}
