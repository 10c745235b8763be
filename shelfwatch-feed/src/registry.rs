//! Session registry
//!
//! Keeps exactly one session per visible camera and is the surface the
//! grid UI talks to.

use crate::error::FeedError;
use crate::feed::FeedState;
use crate::poller::PollerStatsSnapshot;
use crate::session::{FeedCommand, SessionEvent, SessionHandle, SessionSettings, SessionSnapshot};
use crate::source::SourceSet;
use crate::store::{DetectionSet, DetectionStore};
use parking_lot::RwLock;
use shelfwatch_core::{
    to_overlay_percent, Camera, CameraId, CameraStatus, ControllerConfig, Detection, OverlayRect,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Sessions started and stopped by a [`SessionRegistry::sync_grid`] call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridSync {
    pub started: Vec<CameraId>,
    pub stopped: Vec<CameraId>,
}

pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<CameraId, SessionHandle>>>,
    store: Arc<DetectionStore>,
    sources: SourceSet,
    settings: SessionSettings,
    event_sender: broadcast::Sender<SessionEvent>,
}

impl SessionRegistry {
    pub fn new(config: &ControllerConfig, sources: SourceSet) -> Result<Self, FeedError> {
        let settings = SessionSettings::from_config(config)?;
        Ok(Self::with_settings(settings, sources))
    }

    pub fn with_settings(settings: SessionSettings, sources: SourceSet) -> Self {
        let (event_sender, _) = broadcast::channel(1000);
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            store: Arc::new(DetectionStore::new()),
            sources,
            settings,
            event_sender,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start a session for `camera` unless one is already running.
    /// Returns whether a session was created.
    pub fn ensure_session(&self, camera: &Camera) -> bool {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&camera.id) {
            return false;
        }

        let handle = SessionHandle::spawn(
            camera,
            &self.settings,
            &self.sources,
            self.store.clone(),
            self.event_sender.clone(),
        );
        let session_id = handle.session_id();
        sessions.insert(camera.id.clone(), handle);
        drop(sessions);

        let _ = self.event_sender.send(SessionEvent::SessionStarted {
            camera_id: camera.id.clone(),
            session_id,
        });
        info!(camera = %camera.id, status = ?camera.status, "Feed session started");
        true
    }

    /// Stop a camera's session and discard its detections. Once this
    /// returns, nothing will touch the camera's state again.
    pub async fn teardown_session(&self, camera_id: &CameraId) -> Result<(), FeedError> {
        let handle = self
            .sessions
            .write()
            .remove(camera_id)
            .ok_or_else(|| FeedError::SessionNotFound(camera_id.clone()))?;

        let session_id = handle.session_id();
        handle.abort();
        self.store.remove(camera_id);
        handle.stop().await;

        let _ = self.event_sender.send(SessionEvent::SessionStopped {
            camera_id: camera_id.clone(),
            session_id,
        });
        info!(camera = %camera_id, "Feed session stopped");
        Ok(())
    }

    /// Snapshot of every session, sorted by camera id
    pub fn list_sessions(&self) -> Vec<SessionSnapshot> {
        let sessions = self.sessions.read();
        let mut snapshots: Vec<SessionSnapshot> = sessions
            .values()
            .map(|handle| handle.snapshot(self.store.get(handle.camera_id())))
            .collect();
        snapshots.sort_by(|a, b| a.camera_id().cmp(b.camera_id()));
        snapshots
    }

    pub fn session(&self, camera_id: &CameraId) -> Option<SessionSnapshot> {
        let sessions = self.sessions.read();
        sessions
            .get(camera_id)
            .map(|handle| handle.snapshot(self.store.get(camera_id)))
    }

    /// Reconnect a feed that gave up. Only valid while the feed is in
    /// `Error`.
    pub fn retry_connection(&self, camera_id: &CameraId) -> Result<(), FeedError> {
        let sessions = self.sessions.read();
        let handle = sessions
            .get(camera_id)
            .ok_or_else(|| FeedError::SessionNotFound(camera_id.clone()))?;

        let state = handle.state();
        if state != FeedState::Error {
            return Err(FeedError::InvalidTransition(format!(
                "cannot retry feed '{}' in state {}",
                camera_id, state
            )));
        }
        debug!(camera = %camera_id, "Manual retry requested");
        handle.send(FeedCommand::RetryConnection)
    }

    /// Stop refreshing frames; the last frame stays visible
    pub fn pause(&self, camera_id: &CameraId) -> Result<(), FeedError> {
        self.send(camera_id, FeedCommand::Pause)
    }

    pub fn resume(&self, camera_id: &CameraId) -> Result<(), FeedError> {
        self.send(camera_id, FeedCommand::Resume)
    }

    /// Push a camera status observed outside the session
    pub fn update_camera_status(
        &self,
        camera_id: &CameraId,
        status: CameraStatus,
    ) -> Result<(), FeedError> {
        self.send(camera_id, FeedCommand::SetCameraStatus(status))
    }

    fn send(&self, camera_id: &CameraId, command: FeedCommand) -> Result<(), FeedError> {
        let sessions = self.sessions.read();
        let handle = sessions
            .get(camera_id)
            .ok_or_else(|| FeedError::SessionNotFound(camera_id.clone()))?;
        handle.send(command)
    }

    /// Reconcile sessions with the cameras currently shown in the grid.
    /// New cameras get a session, known ones get their status pushed, and
    /// sessions for cameras no longer shown are torn down.
    pub async fn sync_grid(&self, cameras: &[Camera]) -> Result<GridSync, FeedError> {
        let mut report = GridSync::default();
        let visible: HashSet<&CameraId> = cameras.iter().map(|camera| &camera.id).collect();

        for camera in cameras {
            if self.ensure_session(camera) {
                report.started.push(camera.id.clone());
            } else if let Err(e) = self.update_camera_status(&camera.id, camera.status) {
                warn!(camera = %camera.id, "Could not push camera status: {}", e);
            }
        }

        let mut stale: Vec<CameraId> = self
            .sessions
            .read()
            .keys()
            .filter(|id| !visible.contains(id))
            .cloned()
            .collect();
        stale.sort();

        for camera_id in stale {
            match self.teardown_session(&camera_id).await {
                Ok(()) => report.stopped.push(camera_id),
                // Torn down concurrently
                Err(FeedError::SessionNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    /// Current detections for a camera; empty for unknown cameras
    pub fn detections(&self, camera_id: &CameraId) -> Arc<DetectionSet> {
        self.store.get(camera_id)
    }

    /// Current detections paired with their overlay rectangles
    pub fn overlays(&self, camera_id: &CameraId) -> Vec<(Detection, OverlayRect)> {
        let frame = self.settings.reference_frame;
        self.store
            .get(camera_id)
            .detections
            .iter()
            .map(|detection| (detection.clone(), to_overlay_percent(&detection.bbox, &frame)))
            .collect()
    }

    pub fn poller_stats(&self, camera_id: &CameraId) -> Option<PollerStatsSnapshot> {
        let sessions = self.sessions.read();
        sessions
            .get(camera_id)
            .map(|handle| handle.poller_stats().snapshot())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_sender.subscribe()
    }

    pub fn contains(&self, camera_id: &CameraId) -> bool {
        self.sessions.read().contains_key(camera_id)
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Tear down every session
    pub async fn shutdown(&self) {
        let mut ids: Vec<CameraId> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        for camera_id in ids {
            // Already gone if a concurrent teardown won
            let _ = self.teardown_session(&camera_id).await;
        }
        info!("All feed sessions stopped");
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        for handle in self.sessions.read().values() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ConnectivitySource, DetectionSource, FrameRequest, ImageSource};
    use async_trait::async_trait;
    use shelfwatch_core::{BoundingBox, ConnectivityStatus, DetectionResponse, Snapshot};
    use std::time::Duration;

    struct StaticSources;

    #[async_trait]
    impl DetectionSource for StaticSources {
        async fn fetch_detections(&self, _camera_id: &CameraId) -> Result<DetectionResponse, FeedError> {
            Ok(DetectionResponse::ok(vec![Detection {
                id: "d1".to_string(),
                label: "person".to_string(),
                confidence: 0.8,
                bbox: BoundingBox::new(960.0, 540.0, 192.0, 108.0),
            }]))
        }
    }

    #[async_trait]
    impl ConnectivitySource for StaticSources {
        async fn connection_status(&self, _camera_id: &CameraId) -> Result<ConnectivityStatus, FeedError> {
            Ok(ConnectivityStatus::Connected)
        }
    }

    #[async_trait]
    impl ImageSource for StaticSources {
        async fn load_frame(&self, _request: &FrameRequest) -> Result<Snapshot, FeedError> {
            Ok(Snapshot::new(vec![1u8, 2, 3], None))
        }
    }

    fn registry() -> SessionRegistry {
        let sources = Arc::new(StaticSources);
        SessionRegistry::new(
            &ControllerConfig::default(),
            SourceSet::new(sources.clone(), sources.clone(), sources),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_session_is_idempotent() {
        let registry = registry();
        let camera = Camera::new("cam-1", CameraStatus::Online, 0.0);

        assert!(registry.ensure_session(&camera));
        assert!(!registry.ensure_session(&camera));
        assert_eq!(registry.count(), 1);

        registry.shutdown().await;
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_unknown_camera_fails() {
        let registry = registry();
        let err = registry
            .teardown_session(&CameraId::from("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::SessionNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlays_use_reference_frame() {
        let registry = registry();
        let camera = Camera::new("cam-1", CameraStatus::Online, 0.0);
        registry.ensure_session(&camera);

        tokio::time::sleep(Duration::from_millis(50)).await;

        let overlays = registry.overlays(&camera.id);
        assert_eq!(overlays.len(), 1);
        let rect = overlays[0].1;
        assert!((rect.left_pct - 50.0).abs() < 1e-9);
        assert!((rect.top_pct - 50.0).abs() < 1e-9);
        assert!((rect.width_pct - 10.0).abs() < 1e-9);
        assert!((rect.height_pct - 10.0).abs() < 1e-9);

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_rejected_outside_error_state() {
        let registry = registry();
        let camera = Camera::new("cam-1", CameraStatus::Online, 0.0);
        registry.ensure_session(&camera);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = registry.retry_connection(&camera.id).unwrap_err();
        assert!(matches!(err, FeedError::InvalidTransition(_)));

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_grid_starts_and_stops() {
        let registry = registry();
        let a = Camera::new("a", CameraStatus::Online, 0.0);
        let b = Camera::new("b", CameraStatus::Offline, 0.0);

        let first = registry.sync_grid(&[a.clone(), b.clone()]).await.unwrap();
        assert_eq!(first.started, vec![a.id.clone(), b.id.clone()]);
        assert!(first.stopped.is_empty());

        let second = registry.sync_grid(&[b.clone()]).await.unwrap();
        assert!(second.started.is_empty());
        assert_eq!(second.stopped, vec![a.id.clone()]);
        assert!(!registry.contains(&a.id));
        assert!(registry.detections(&a.id).is_empty());

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_grid_tolerates_concurrent_teardown() {
        let registry = registry();
        let a = Camera::new("a", CameraStatus::Online, 0.0);
        let b = Camera::new("b", CameraStatus::Online, 0.0);
        let c = Camera::new("c", CameraStatus::Online, 0.0);
        registry.sync_grid(&[a.clone(), b.clone(), c.clone()]).await.unwrap();

        // The grid drops `a` and `c` while `c` is also torn down directly
        let grid = [b.clone()];
        let (synced, direct) = tokio::join!(
            registry.sync_grid(&grid),
            registry.teardown_session(&c.id),
        );

        // Whichever side loses the race must not fail the reconcile
        let synced = synced.unwrap();
        assert!(matches!(direct, Ok(()) | Err(FeedError::SessionNotFound(_))));
        assert!(synced.stopped.contains(&a.id));
        assert_eq!(registry.count(), 1);
        assert!(registry.contains(&b.id));
        assert!(!registry.contains(&c.id));

        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_to_stopped_driver_are_rejected() {
        let registry = registry();
        let camera = Camera::new("cam-1", CameraStatus::Online, 0.0);
        registry.ensure_session(&camera);

        {
            let sessions = registry.sessions.read();
            sessions[&camera.id].abort();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = registry.pause(&camera.id).unwrap_err();
        assert!(matches!(err, FeedError::SessionUnavailable { .. }));

        registry.shutdown().await;
    }
}
