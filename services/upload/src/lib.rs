//! Vidstash Upload Service
//!
//! Accepts video and thumbnail uploads for existing video records, prepares
//! videos for progressive playback, files them in object storage by aspect
//! ratio and hands out short-lived signed URLs on read.
//!
//! ## Features
//!
//! - **Bounded Landing**: request bodies are streamed to temp files under
//!   per-kind size caps and content-type allow-lists
//! - **Fast-Start Remux**: `ffmpeg` moves the MP4 index to the front so
//!   playback can start before the download finishes
//! - **Aspect Bucketing**: `ffprobe` geometry decides the `landscape/`,
//!   `portrait/` or `other/` key prefix
//! - **Private Storage**: records keep `bucket,key` references, and every
//!   read presigns them again
//!
//! ## Architecture
//!
//! ```text
//!   HTTP multipart             temp dir                     S3 bucket
//! ┌──────────────┐  land   ┌──────────────┐  publish   ┌──────────────┐
//! │ Upload API   │────────▶│ upload-*     │───────────▶│ landscape/   │
//! └──────────────┘         │ remux-*.mp4  │            │ portrait/    │
//!        │                 └──────────────┘            │ other/       │
//!        │                   │         ▲               │ thumbnails/  │
//!        │             remux │         │ probe         └──────────────┘
//!        │                   ▼         │                      │
//!        │                 ┌──────────────┐                   │ presign
//!        │                 │ ffmpeg /     │                   ▼
//!        │                 │ ffprobe      │            ┌──────────────┐
//!        │                 └──────────────┘            │ Access       │
//!        ▼                                             │ Signer       │
//! ┌──────────────┐        bucket,key                   └──────────────┘
//! │ PostgreSQL   │◀───────────────────────────────────────────┘
//! │ videos       │
//! └──────────────┘
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod keys;
pub mod landing;
pub mod media;
pub mod object_store;
pub mod pipeline;
pub mod publisher;
pub mod signer;
pub mod video_store;

pub use api::AppState;
pub use config::Config;
pub use error::{ErrorCategory, PipelineError};
pub use keys::StorageKey;
pub use landing::{LocalAsset, MediaKind, StreamLander};
pub use media::{AspectClass, FfmpegTools, GeometryInfo, MediaToolRunner};
pub use object_store::{ObjectStore, S3ObjectStore};
pub use pipeline::{PipelineSettings, UploadPipeline};
pub use publisher::{PublishedObject, Publisher};
pub use signer::{AccessSigner, SignedVideo};
pub use video_store::{PgVideoStore, VideoRecord, VideoStore};
