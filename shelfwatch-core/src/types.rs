//! Camera, detection and frame types shared by the feed controller

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Stable camera identifier, as issued by the camera registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub String);

impl CameraId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CameraId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CameraId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coarse camera status reported by the camera registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Online,
    Offline,
}

impl CameraStatus {
    pub fn is_online(self) -> bool {
        matches!(self, CameraStatus::Online)
    }
}

/// Camera record as exposed by the camera registry.
///
/// The controller only reads `id`, `status` and `display_fps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub id: CameraId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    pub status: CameraStatus,
    /// Display frame rate of the feed
    #[serde(rename = "fps", alias = "displayFps", default)]
    pub display_fps: f64,
}

impl Camera {
    pub fn new(id: impl Into<CameraId>, status: CameraStatus, display_fps: f64) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            location: None,
            status,
            display_fps,
        }
    }

    /// Interval between frame refreshes while playing, if the camera
    /// advertises a usable frame rate.
    pub fn refresh_interval(&self) -> Option<Duration> {
        if self.display_fps.is_finite() && self.display_fps > 0.0 {
            Some(Duration::from_secs_f64(1.0 / self.display_fps))
        } else {
            None
        }
    }
}

/// Axis-aligned box in reference-frame units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }
}

/// One classified, localized object reported for a camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: String,
    #[serde(rename = "class")]
    pub label: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub bbox: BoundingBox,
}

/// Reply of the primary detection source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResponse {
    pub success: bool,
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DetectionResponse {
    pub fn ok(detections: Vec<Detection>) -> Self {
        Self {
            success: true,
            detections,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            detections: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Answer of the fallback connectivity check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityStatus {
    Connected,
    Disconnected,
}

/// Last successfully loaded frame of a feed
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub data: Bytes,
    pub content_type: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(data: impl Into<Bytes>, content_type: Option<String>) -> Self {
        Self {
            data: data.into(),
            content_type,
            captured_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
