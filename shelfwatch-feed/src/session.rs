//! Feed sessions
//!
//! A session is the per-camera bundle of a feed driver task (state
//! machine, reload timer, frame refresh, optional status polling) and a
//! detection poller task. Both tasks are owned by the [`SessionHandle`];
//! stopping the handle aborts them and waits until they are gone.

use crate::error::FeedError;
use crate::feed::{FeedEffect, FeedEvent, FeedSession, FeedState, FeedStateMachine};
use crate::poller::{DetectionChain, DetectionPoller, PollerStats};
use crate::retry::RetryPolicy;
use crate::source::{CameraDirectory, FrameRequest, ImageSource, SourceSet};
use crate::store::{DetectionSet, DetectionStore};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use shelfwatch_core::{Camera, CameraId, CameraStatus, ControllerConfig, ReferenceFrame};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Session lifecycle and activity notifications
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SessionStarted {
        camera_id: CameraId,
        session_id: Uuid,
    },
    SessionStopped {
        camera_id: CameraId,
        session_id: Uuid,
    },
    FeedStateChanged {
        camera_id: CameraId,
        old_state: FeedState,
        new_state: FeedState,
        retry_count: u32,
    },
    DetectionsUpdated {
        camera_id: CameraId,
        count: usize,
    },
}

/// Timing and policy shared by every session of a registry
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub retry: RetryPolicy,
    pub reference_frame: ReferenceFrame,
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub fallback_timeout: Duration,
    pub load_timeout: Duration,
    pub status_poll_interval: Duration,
    pub default_refresh: Duration,
}

impl SessionSettings {
    /// Build settings from a validated configuration
    pub fn from_config(config: &ControllerConfig) -> Result<Self, FeedError> {
        config.validate()?;
        Ok(Self {
            retry: RetryPolicy::from_config(config),
            reference_frame: config.reference_frame()?,
            poll_interval: config.poll_interval(),
            fetch_timeout: config.fetch_timeout(),
            fallback_timeout: config.fallback_timeout(),
            load_timeout: config.load_timeout(),
            status_poll_interval: config.status_poll_interval(),
            default_refresh: config.default_refresh(),
        })
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        let config = ControllerConfig::default();
        Self {
            retry: RetryPolicy::from_config(&config),
            reference_frame: ReferenceFrame::HD,
            poll_interval: config.poll_interval(),
            fetch_timeout: config.fetch_timeout(),
            fallback_timeout: config.fallback_timeout(),
            load_timeout: config.load_timeout(),
            status_poll_interval: config.status_poll_interval(),
            default_refresh: config.default_refresh(),
        }
    }
}

/// Commands accepted by a running feed driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedCommand {
    RetryConnection,
    Pause,
    Resume,
    SetCameraStatus(CameraStatus),
}

impl FeedCommand {
    fn into_event(self) -> FeedEvent {
        match self {
            FeedCommand::RetryConnection => FeedEvent::ManualRetry,
            FeedCommand::Pause => FeedEvent::Pause,
            FeedCommand::Resume => FeedEvent::Resume,
            FeedCommand::SetCameraStatus(status) => FeedEvent::CameraStatusChanged(status),
        }
    }
}

type LoadFuture = Pin<Box<dyn Future<Output = FeedEvent> + Send>>;
type StatusFuture = Pin<Box<dyn Future<Output = Option<CameraStatus>> + Send>>;

/// Timer armed by the state machine
enum Pending {
    Idle,
    Wake { at: Instant, event: FeedEvent },
}

struct FeedDriver {
    camera_id: CameraId,
    machine: Arc<RwLock<FeedStateMachine>>,
    images: Arc<dyn ImageSource>,
    directory: Option<Arc<dyn CameraDirectory>>,
    commands: mpsc::Receiver<FeedCommand>,
    status_tx: watch::Sender<CameraStatus>,
    events: broadcast::Sender<SessionEvent>,
    load_timeout: Duration,
    status_poll_interval: Duration,
    pending: Pending,
    /// Frame load in flight; dropping it cancels the load
    loading: Option<LoadFuture>,
    status_check: Option<StatusFuture>,
}

/// Drive an optional in-flight future. Only polled while the slot is
/// filled.
async fn next_in<T>(slot: &mut Option<Pin<Box<dyn Future<Output = T> + Send>>>) -> T {
    match slot {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

impl FeedDriver {
    async fn run(mut self) {
        let effects = self.machine.write().start();
        self.apply(effects);

        let mut status_ticker = interval(self.status_poll_interval);
        status_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let polls_status = self.directory.is_some();

        loop {
            let wake_at = match &self.pending {
                Pending::Wake { at, .. } => Some(*at),
                Pending::Idle => None,
            };
            let load_active = self.loading.is_some();
            let status_active = self.status_check.is_some();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.dispatch(command.into_event()),
                    None => break,
                },
                event = next_in(&mut self.loading), if load_active => {
                    self.loading = None;
                    self.dispatch(event);
                }
                _ = status_ticker.tick(), if polls_status => {
                    if self.status_check.is_none() {
                        self.status_check = self.check_status();
                    }
                }
                status = next_in(&mut self.status_check), if status_active => {
                    self.status_check = None;
                    if let Some(status) = status {
                        self.dispatch(FeedEvent::CameraStatusChanged(status));
                    }
                }
                _ = sleep_until(wake_at.unwrap_or_else(Instant::now)), if wake_at.is_some() => {
                    if let Pending::Wake { event, .. } = std::mem::replace(&mut self.pending, Pending::Idle) {
                        self.dispatch(event);
                    }
                }
            }
        }

        debug!(camera = %self.camera_id, "Feed driver stopped");
    }

    fn start_load(&self, request: FrameRequest) -> LoadFuture {
        let images = self.images.clone();
        let limit = self.load_timeout;
        Box::pin(async move {
            match timeout(limit, images.load_frame(&request)).await {
                Ok(Ok(snapshot)) => FeedEvent::LoadSucceeded(snapshot),
                Ok(Err(e)) => FeedEvent::LoadFailed(e.to_string()),
                Err(_) => FeedEvent::LoadFailed(format!("frame load timed out after {:?}", limit)),
            }
        })
    }

    fn check_status(&self) -> Option<StatusFuture> {
        let directory = self.directory.clone()?;
        let camera_id = self.camera_id.clone();
        let limit = self.load_timeout;
        Some(Box::pin(async move {
            match timeout(limit, directory.camera_status(&camera_id)).await {
                Ok(Ok(status)) => Some(status),
                Ok(Err(e)) => {
                    warn!(camera = %camera_id, "Camera status check failed: {}", e);
                    None
                }
                Err(_) => {
                    warn!(camera = %camera_id, "Camera status check timed out");
                    None
                }
            }
        }))
    }

    fn dispatch(&mut self, event: FeedEvent) {
        if let FeedEvent::CameraStatusChanged(status) = event {
            self.status_tx.send_if_modified(|current| {
                let changed = *current != status;
                *current = status;
                changed
            });
        }

        let (old_state, new_state, retry_count, effects) = {
            let mut machine = self.machine.write();
            let old_state = machine.state();
            let effects = machine.handle(event);
            (old_state, machine.state(), machine.session().retry_count, effects)
        };

        if old_state != new_state {
            info!(
                camera = %self.camera_id,
                "Feed {} -> {} (retries: {})",
                old_state, new_state, retry_count
            );
            let _ = self.events.send(SessionEvent::FeedStateChanged {
                camera_id: self.camera_id.clone(),
                old_state,
                new_state,
                retry_count,
            });
        }

        self.apply(effects);
    }

    fn apply(&mut self, effects: Vec<FeedEffect>) {
        for effect in effects {
            match effect {
                FeedEffect::RequestFrame(request) => {
                    self.pending = Pending::Idle;
                    self.loading = Some(self.start_load(request));
                }
                FeedEffect::ScheduleReload { attempt, after } => {
                    warn!(camera = %self.camera_id, "Feed load failed, retry {} in {:?}", attempt, after);
                    self.pending = Pending::Wake {
                        at: Instant::now() + after,
                        event: FeedEvent::ReloadDue,
                    };
                }
                FeedEffect::ScheduleRefresh { after } => {
                    self.pending = Pending::Wake {
                        at: Instant::now() + after,
                        event: FeedEvent::RefreshDue,
                    };
                }
                FeedEffect::CancelPending => {
                    self.pending = Pending::Idle;
                    self.loading = None;
                }
                FeedEffect::ClearError => {
                    debug!(camera = %self.camera_id, "Feed error cleared");
                }
                FeedEffect::SurfaceError(message) => {
                    warn!(camera = %self.camera_id, "Feed gave up reconnecting: {}", message);
                }
            }
        }
    }
}

/// Read-only view of a session for the grid UI
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub feed: FeedSession,
    pub camera_status: CameraStatus,
    pub detections: Arc<DetectionSet>,
    pub started_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn camera_id(&self) -> &CameraId {
        &self.feed.camera_id
    }

    pub fn state(&self) -> FeedState {
        self.feed.state
    }

    pub fn retry_count(&self) -> u32 {
        self.feed.retry_count
    }
}

/// Running session owned by the registry
pub struct SessionHandle {
    session_id: Uuid,
    camera_id: CameraId,
    started_at: DateTime<Utc>,
    machine: Arc<RwLock<FeedStateMachine>>,
    commands: mpsc::Sender<FeedCommand>,
    poller_stats: Arc<PollerStats>,
    feed_task: JoinHandle<()>,
    poll_task: JoinHandle<()>,
}

impl SessionHandle {
    /// Spawn the driver and poller for a camera. Must be called from
    /// within a tokio runtime.
    pub fn spawn(
        camera: &Camera,
        settings: &SessionSettings,
        sources: &SourceSet,
        store: Arc<DetectionStore>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let camera_id = camera.id.clone();
        let refresh = camera.refresh_interval().unwrap_or(settings.default_refresh);
        let machine = Arc::new(RwLock::new(FeedStateMachine::new(
            camera_id.clone(),
            camera.status,
            settings.retry,
            refresh,
        )));

        let (command_tx, command_rx) = mpsc::channel(32);
        let (status_tx, status_rx) = watch::channel(camera.status);

        store.open(&camera_id);
        let chain = DetectionChain::new(
            camera_id.clone(),
            sources.detections.clone(),
            sources.connectivity.clone(),
            settings.fetch_timeout,
            settings.fallback_timeout,
        );
        let poller = DetectionPoller::new(chain, store, settings.poll_interval, events.clone());
        let poller_stats = poller.stats();

        let driver = FeedDriver {
            camera_id: camera_id.clone(),
            machine: machine.clone(),
            images: sources.images.clone(),
            directory: sources.directory.clone(),
            commands: command_rx,
            status_tx,
            events,
            load_timeout: settings.load_timeout,
            status_poll_interval: settings.status_poll_interval,
            pending: Pending::Idle,
            loading: None,
            status_check: None,
        };

        let feed_task = tokio::spawn(driver.run());
        let poll_task = tokio::spawn(poller.run(status_rx));

        Self {
            session_id: Uuid::new_v4(),
            camera_id,
            started_at: Utc::now(),
            machine,
            commands: command_tx,
            poller_stats,
            feed_task,
            poll_task,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    pub fn state(&self) -> FeedState {
        self.machine.read().state()
    }

    pub fn poller_stats(&self) -> Arc<PollerStats> {
        self.poller_stats.clone()
    }

    pub fn snapshot(&self, detections: Arc<DetectionSet>) -> SessionSnapshot {
        let machine = self.machine.read();
        SessionSnapshot {
            session_id: self.session_id,
            feed: machine.session().clone(),
            camera_status: machine.camera_status(),
            detections,
            started_at: self.started_at,
        }
    }

    /// Queue a command for the driver
    pub fn send(&self, command: FeedCommand) -> Result<(), FeedError> {
        self.commands
            .try_send(command)
            .map_err(|e| FeedError::SessionUnavailable {
                camera_id: self.camera_id.clone(),
                reason: e.to_string(),
            })
    }

    /// Abort both tasks and wait for them to finish
    pub async fn stop(self) {
        self.feed_task.abort();
        self.poll_task.abort();
        for task in [self.feed_task, self.poll_task] {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(camera = %self.camera_id, "Session task ended abnormally: {}", e);
                }
            }
        }
    }

    /// Abort both tasks without waiting
    pub fn abort(&self) {
        self.feed_task.abort();
        self.poll_task.abort();
    }
}
