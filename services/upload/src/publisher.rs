use crate::keys::StorageKey;
use crate::landing::LocalAsset;
use crate::object_store::{ObjectStore, StoreError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

/// Separator between bucket and key in a persisted object reference.
pub const REFERENCE_SEPARATOR: char = ',';

#[derive(Debug, Error)]
#[error("failed to publish {key}: {source}")]
pub struct PublishError {
    pub key: StorageKey,
    #[source]
    pub source: StoreError,
}

/// A stored object; persisted as `"<bucket>,<key>"`, never as a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedObject {
    pub bucket: String,
    pub key: StorageKey,
    pub content_type: String,
}

impl PublishedObject {
    /// The value written into a video record's location field.
    pub fn reference(&self) -> String {
        format!("{}{}{}", self.bucket, REFERENCE_SEPARATOR, self.key)
    }
}

/// Hands finished local files to the object store.
#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl Publisher {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Upload `asset` under `key`. The file is streamed, not buffered.
    #[instrument(skip(self, asset), fields(key = %key, size_bytes = asset.len()))]
    pub async fn publish(
        &self,
        asset: &LocalAsset,
        key: StorageKey,
        content_type: &str,
    ) -> Result<PublishedObject, PublishError> {
        if let Err(source) = self
            .store
            .put_file(
                &self.bucket,
                key.as_str(),
                content_type,
                asset.path(),
                asset.len(),
            )
            .await
        {
            return Err(PublishError { key, source });
        }

        info!(bucket = %self.bucket, "Object published");

        Ok(PublishedObject {
            bucket: self.bucket.clone(),
            key,
            content_type: content_type.to_string(),
        })
    }
}
