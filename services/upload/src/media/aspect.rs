//! Aspect ratio classification of probed video geometry.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum distance from a reference ratio that still counts as a match.
///
/// Wide enough for encoder padding (1920x1088 is still 16:9), narrow enough
/// that 4:3 or 1:1 never land in a band.
pub const ASPECT_TOLERANCE: f64 = 0.02;

const LANDSCAPE_RATIO: f64 = 16.0 / 9.0;
const PORTRAIT_RATIO: f64 = 9.0 / 16.0;

/// Coarse orientation bucket; also the first segment of a video's storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectClass {
    /// 16:9
    Landscape,
    /// 9:16
    Portrait,
    /// Everything else
    Other,
}

impl AspectClass {
    pub fn as_str(self) -> &'static str {
        match self {
            AspectClass::Landscape => "landscape",
            AspectClass::Portrait => "portrait",
            AspectClass::Other => "other",
        }
    }
}

impl fmt::Display for AspectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    #[error("invalid dimensions: width={width} height={height}")]
    InvalidDimensions { width: i64, height: i64 },
}

/// Map pixel dimensions to an [`AspectClass`].
///
/// 16:9 is checked before 9:16.
pub fn classify(width: i64, height: i64) -> Result<AspectClass, ClassifyError> {
    if width <= 0 || height <= 0 {
        return Err(ClassifyError::InvalidDimensions { width, height });
    }

    let ratio = width as f64 / height as f64;

    if (ratio - LANDSCAPE_RATIO).abs() < ASPECT_TOLERANCE {
        Ok(AspectClass::Landscape)
    } else if (ratio - PORTRAIT_RATIO).abs() < ASPECT_TOLERANCE {
        Ok(AspectClass::Portrait)
    } else {
        Ok(AspectClass::Other)
    }
}

/// Pixel size of the primary video stream. Both sides are strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GeometryInfo {
    width: u32,
    height: u32,
}

impl GeometryInfo {
    pub fn new(width: i64, height: i64) -> Result<Self, ClassifyError> {
        match (u32::try_from(width), u32::try_from(height)) {
            (Ok(w), Ok(h)) if w > 0 && h > 0 => Ok(Self {
                width: w,
                height: h,
            }),
            _ => Err(ClassifyError::InvalidDimensions { width, height }),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}
