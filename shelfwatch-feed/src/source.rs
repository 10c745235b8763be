//! External collaborators of a feed session
//!
//! The controller never talks to the network directly; it goes through
//! these traits so the detection service, connectivity check, image
//! endpoint and camera registry can be swapped out (see `crate::http`
//! for the HTTP implementations).

use crate::error::FeedError;
use async_trait::async_trait;
use shelfwatch_core::{Camera, CameraId, CameraStatus, ConnectivityStatus, DetectionResponse, Snapshot};
use std::sync::Arc;

/// Primary detection source
#[async_trait]
pub trait DetectionSource: Send + Sync {
    async fn fetch_detections(&self, camera_id: &CameraId) -> Result<DetectionResponse, FeedError>;
}

/// Coarse fallback consulted when the primary detection source fails
#[async_trait]
pub trait ConnectivitySource: Send + Sync {
    async fn connection_status(&self, camera_id: &CameraId) -> Result<ConnectivityStatus, FeedError>;
}

/// A single load of a camera's image resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRequest {
    pub camera_id: CameraId,
    /// Token appended to the request so a retry never hits a cached failure
    pub cache_bust: String,
}

/// Image resource endpoint of a camera
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn load_frame(&self, request: &FrameRequest) -> Result<Snapshot, FeedError>;
}

/// Camera registry
#[async_trait]
pub trait CameraDirectory: Send + Sync {
    async fn list_cameras(&self) -> Result<Vec<Camera>, FeedError>;

    async fn camera_status(&self, camera_id: &CameraId) -> Result<CameraStatus, FeedError>;
}

/// The collaborators every session of a registry shares
#[derive(Clone)]
pub struct SourceSet {
    pub detections: Arc<dyn DetectionSource>,
    pub connectivity: Arc<dyn ConnectivitySource>,
    pub images: Arc<dyn ImageSource>,
    /// When set, each session polls it for its camera's status
    pub directory: Option<Arc<dyn CameraDirectory>>,
}

impl SourceSet {
    pub fn new(
        detections: Arc<dyn DetectionSource>,
        connectivity: Arc<dyn ConnectivitySource>,
        images: Arc<dyn ImageSource>,
    ) -> Self {
        Self {
            detections,
            connectivity,
            images,
            directory: None,
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn CameraDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }
}
