use crate::media::AspectClass;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::TryRngCore;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Random bytes per key (256 bits).
const KEY_ENTROPY_BYTES: usize = 32;

/// Key prefix for thumbnails, which are not aspect classified.
pub const THUMBNAIL_PREFIX: &str = "thumbnails";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OS randomness unavailable: {0}")]
    EntropyUnavailable(String),
}

/// Object store key of the form `<prefix>/<random>.<ext>`.
///
/// The random part is URL-safe base64 without padding, so keys never need
/// escaping. Uniqueness is probabilistic; collisions are not checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
    /// Generate a key under `prefix` with extension `ext` (no leading dot).
    pub fn generate(prefix: &str, ext: &str) -> Result<Self, KeyError> {
        let mut bytes = [0u8; KEY_ENTROPY_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| KeyError::EntropyUnavailable(e.to_string()))?;

        let ext = ext.trim_start_matches('.');
        Ok(Self(format!(
            "{}/{}.{}",
            prefix,
            URL_SAFE_NO_PAD.encode(bytes),
            ext
        )))
    }

    /// Key for a published video, prefixed by its aspect class.
    pub fn for_video(class: AspectClass, ext: &str) -> Result<Self, KeyError> {
        Self::generate(class.as_str(), ext)
    }

    /// Key for a published thumbnail.
    pub fn for_thumbnail(ext: &str) -> Result<Self, KeyError> {
        Self::generate(THUMBNAIL_PREFIX, ext)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Everything before the first `/`.
    pub fn prefix(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
