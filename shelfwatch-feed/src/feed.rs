//! Feed state machine
//!
//! Owns the lifecycle of one camera's image feed. The machine is
//! synchronous: it consumes [`FeedEvent`]s and answers with the
//! [`FeedEffect`]s the session driver has to carry out (load a frame,
//! arm a timer, surface an error). Camera status always wins: while
//! the camera is offline every feed-level event is dropped.

use crate::retry::{RetryDecision, RetryPolicy};
use crate::source::FrameRequest;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shelfwatch_core::{CameraId, CameraStatus, Snapshot};
use std::fmt;
use std::time::Duration;

/// Lifecycle state of a feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedState {
    Loading,
    Playing,
    /// Retries exhausted; left only through a manual retry
    Error,
    Offline,
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FeedState::Loading => "loading",
            FeedState::Playing => "playing",
            FeedState::Error => "error",
            FeedState::Offline => "offline",
        };
        f.write_str(label)
    }
}

/// Per-camera feed state
#[derive(Debug, Clone)]
pub struct FeedSession {
    pub camera_id: CameraId,
    pub state: FeedState,
    /// Reloads attempted since the feed last played
    pub retry_count: u32,
    pub last_snapshot: Option<Snapshot>,
    pub last_error: Option<String>,
    pub paused: bool,
}

impl FeedSession {
    pub fn new(camera_id: CameraId) -> Self {
        Self {
            camera_id,
            state: FeedState::Loading,
            retry_count: 0,
            last_snapshot: None,
            last_error: None,
            paused: false,
        }
    }
}

/// Input to the state machine
#[derive(Debug, Clone)]
pub enum FeedEvent {
    CameraStatusChanged(CameraStatus),
    LoadSucceeded(Snapshot),
    LoadFailed(String),
    /// The reload timer armed by a retry fired
    ReloadDue,
    /// Time to fetch the next frame of a playing feed
    RefreshDue,
    /// User asked to reconnect a feed in `Error`
    ManualRetry,
    Pause,
    Resume,
}

/// Work the driver must perform after an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEffect {
    RequestFrame(FrameRequest),
    ScheduleReload { attempt: u32, after: Duration },
    ScheduleRefresh { after: Duration },
    /// Drop any armed timer
    CancelPending,
    ClearError,
    SurfaceError(String),
}

pub struct FeedStateMachine {
    session: FeedSession,
    policy: RetryPolicy,
    camera_status: CameraStatus,
    refresh_interval: Duration,
    requests: u64,
}

impl FeedStateMachine {
    pub fn new(
        camera_id: CameraId,
        camera_status: CameraStatus,
        policy: RetryPolicy,
        refresh_interval: Duration,
    ) -> Self {
        let mut session = FeedSession::new(camera_id);
        if !camera_status.is_online() {
            session.state = FeedState::Offline;
        }
        Self {
            session,
            policy,
            camera_status,
            refresh_interval,
            requests: 0,
        }
    }

    /// Effects for the initial load
    pub fn start(&mut self) -> Vec<FeedEffect> {
        match self.session.state {
            FeedState::Loading => vec![FeedEffect::RequestFrame(self.next_request())],
            _ => Vec::new(),
        }
    }

    pub fn session(&self) -> &FeedSession {
        &self.session
    }

    pub fn state(&self) -> FeedState {
        self.session.state
    }

    pub fn camera_status(&self) -> CameraStatus {
        self.camera_status
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn handle(&mut self, event: FeedEvent) -> Vec<FeedEffect> {
        if let FeedEvent::CameraStatusChanged(status) = event {
            return self.on_status(status);
        }
        if !self.camera_status.is_online() {
            // Pause intent survives the outage; nothing else applies
            match event {
                FeedEvent::Pause => self.session.paused = true,
                FeedEvent::Resume => self.session.paused = false,
                _ => {}
            }
            return Vec::new();
        }

        match event {
            FeedEvent::CameraStatusChanged(_) => Vec::new(),
            FeedEvent::LoadSucceeded(snapshot) => self.on_loaded(snapshot),
            FeedEvent::LoadFailed(reason) => self.on_failed(reason),
            FeedEvent::ReloadDue => match self.session.state {
                FeedState::Loading => vec![FeedEffect::RequestFrame(self.next_request())],
                _ => Vec::new(),
            },
            FeedEvent::RefreshDue => match self.session.state {
                FeedState::Playing if !self.session.paused => {
                    vec![FeedEffect::RequestFrame(self.next_request())]
                }
                _ => Vec::new(),
            },
            FeedEvent::ManualRetry => match self.session.state {
                FeedState::Error => {
                    self.session.retry_count = 0;
                    self.session.state = FeedState::Loading;
                    vec![FeedEffect::RequestFrame(self.next_request())]
                }
                _ => Vec::new(),
            },
            FeedEvent::Pause => {
                if self.session.paused {
                    return Vec::new();
                }
                self.session.paused = true;
                match self.session.state {
                    FeedState::Playing => vec![FeedEffect::CancelPending],
                    _ => Vec::new(),
                }
            }
            FeedEvent::Resume => {
                if !self.session.paused {
                    return Vec::new();
                }
                self.session.paused = false;
                match self.session.state {
                    FeedState::Playing => vec![FeedEffect::RequestFrame(self.next_request())],
                    _ => Vec::new(),
                }
            }
        }
    }

    fn on_status(&mut self, status: CameraStatus) -> Vec<FeedEffect> {
        self.camera_status = status;
        match status {
            CameraStatus::Offline => {
                if self.session.state == FeedState::Offline {
                    return Vec::new();
                }
                self.session.state = FeedState::Offline;
                vec![FeedEffect::CancelPending]
            }
            CameraStatus::Online => {
                if self.session.state != FeedState::Offline {
                    return Vec::new();
                }
                self.session.retry_count = 0;
                self.session.state = FeedState::Loading;
                vec![FeedEffect::RequestFrame(self.next_request())]
            }
        }
    }

    fn on_loaded(&mut self, snapshot: Snapshot) -> Vec<FeedEffect> {
        let was_playing = match self.session.state {
            FeedState::Loading => false,
            FeedState::Playing => true,
            // A late result for a feed that already gave up
            FeedState::Error | FeedState::Offline => return Vec::new(),
        };

        self.policy.on_success(&mut self.session);
        self.session.last_snapshot = Some(snapshot);

        let mut effects = Vec::new();
        if !was_playing {
            self.session.last_error = None;
            effects.push(FeedEffect::ClearError);
        }
        if !self.session.paused {
            effects.push(FeedEffect::ScheduleRefresh {
                after: self.refresh_interval,
            });
        }
        effects
    }

    fn on_failed(&mut self, reason: String) -> Vec<FeedEffect> {
        match self.session.state {
            FeedState::Loading | FeedState::Playing => {}
            FeedState::Error | FeedState::Offline => return Vec::new(),
        }

        self.session.last_error = Some(reason.clone());
        match self.policy.on_failure(&mut self.session) {
            RetryDecision::Retry { attempt, after } => {
                vec![FeedEffect::ScheduleReload { attempt, after }]
            }
            RetryDecision::GiveUp { .. } => vec![FeedEffect::SurfaceError(reason)],
        }
    }

    fn next_request(&mut self) -> FrameRequest {
        self.requests += 1;
        FrameRequest {
            camera_id: self.session.camera_id.clone(),
            cache_bust: format!("{}-{}", Utc::now().timestamp_millis(), self.requests),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFRESH: Duration = Duration::from_millis(100);

    fn machine(status: CameraStatus) -> FeedStateMachine {
        FeedStateMachine::new(
            CameraId::from("cam-1"),
            status,
            RetryPolicy::default(),
            REFRESH,
        )
    }

    fn frame() -> Snapshot {
        Snapshot::new(vec![0xff, 0xd8, 0xff], Some("image/jpeg".to_string()))
    }

    fn is_request(effects: &[FeedEffect]) -> bool {
        matches!(effects, [FeedEffect::RequestFrame(_)])
    }

    #[test]
    fn test_online_camera_starts_loading() {
        let mut m = machine(CameraStatus::Online);
        assert_eq!(m.state(), FeedState::Loading);
        assert!(is_request(&m.start()));
    }

    #[test]
    fn test_offline_camera_starts_offline() {
        let mut m = machine(CameraStatus::Offline);
        assert_eq!(m.state(), FeedState::Offline);
        assert!(m.start().is_empty());
    }

    #[test]
    fn test_success_enters_playing_and_schedules_refresh() {
        let mut m = machine(CameraStatus::Online);
        m.start();
        let effects = m.handle(FeedEvent::LoadSucceeded(frame()));
        assert_eq!(
            effects,
            vec![
                FeedEffect::ClearError,
                FeedEffect::ScheduleRefresh { after: REFRESH },
            ]
        );
        assert_eq!(m.state(), FeedState::Playing);
        assert!(m.session().last_snapshot.is_some());
    }

    #[test]
    fn test_retry_sequence_then_error() {
        let mut m = machine(CameraStatus::Online);
        m.start();

        for attempt in 1..=3 {
            let effects = m.handle(FeedEvent::LoadFailed("503".to_string()));
            assert_eq!(
                effects,
                vec![FeedEffect::ScheduleReload {
                    attempt,
                    after: Duration::from_millis(2000),
                }]
            );
            assert_eq!(m.state(), FeedState::Loading);
            assert!(is_request(&m.handle(FeedEvent::ReloadDue)));
        }

        let effects = m.handle(FeedEvent::LoadFailed("503".to_string()));
        assert_eq!(effects, vec![FeedEffect::SurfaceError("503".to_string())]);
        assert_eq!(m.state(), FeedState::Error);
        assert_eq!(m.session().retry_count, 3);

        // No automatic way out of Error
        assert!(m.handle(FeedEvent::ReloadDue).is_empty());
        assert!(m.handle(FeedEvent::RefreshDue).is_empty());
        assert!(m.handle(FeedEvent::LoadFailed("503".to_string())).is_empty());
    }

    #[test]
    fn test_manual_retry_leaves_error() {
        let mut m = machine(CameraStatus::Online);
        m.start();
        for _ in 0..4 {
            m.handle(FeedEvent::LoadFailed("timeout".to_string()));
        }
        assert_eq!(m.state(), FeedState::Error);

        assert!(is_request(&m.handle(FeedEvent::ManualRetry)));
        assert_eq!(m.state(), FeedState::Loading);
        assert_eq!(m.session().retry_count, 0);
    }

    #[test]
    fn test_manual_retry_ignored_outside_error() {
        let mut m = machine(CameraStatus::Online);
        m.start();
        assert!(m.handle(FeedEvent::ManualRetry).is_empty());
        assert_eq!(m.state(), FeedState::Loading);
    }

    #[test]
    fn test_mid_stream_failure_returns_to_loading() {
        let mut m = machine(CameraStatus::Online);
        m.start();
        m.handle(FeedEvent::LoadSucceeded(frame()));
        assert!(is_request(&m.handle(FeedEvent::RefreshDue)));

        let effects = m.handle(FeedEvent::LoadFailed("connection reset".to_string()));
        assert_eq!(m.state(), FeedState::Loading);
        assert_eq!(m.session().retry_count, 1);
        assert!(matches!(effects[..], [FeedEffect::ScheduleReload { attempt: 1, .. }]));
        assert!(m.session().last_snapshot.is_some());
    }

    #[test]
    fn test_offline_overrides_every_state() {
        let mut m = machine(CameraStatus::Online);
        m.start();
        for _ in 0..4 {
            m.handle(FeedEvent::LoadFailed("down".to_string()));
        }
        assert_eq!(m.state(), FeedState::Error);

        assert_eq!(
            m.handle(FeedEvent::CameraStatusChanged(CameraStatus::Offline)),
            vec![FeedEffect::CancelPending]
        );
        assert_eq!(m.state(), FeedState::Offline);

        // Feed events are dropped while offline
        assert!(m.handle(FeedEvent::LoadSucceeded(frame())).is_empty());
        assert!(m.handle(FeedEvent::ManualRetry).is_empty());
        assert_eq!(m.state(), FeedState::Offline);
    }

    #[test]
    fn test_back_online_restarts_loading() {
        let mut m = machine(CameraStatus::Offline);
        let effects = m.handle(FeedEvent::CameraStatusChanged(CameraStatus::Online));
        assert!(is_request(&effects));
        assert_eq!(m.state(), FeedState::Loading);
        assert_eq!(m.session().retry_count, 0);

        // Repeated online reports do not restart the load
        assert!(m
            .handle(FeedEvent::CameraStatusChanged(CameraStatus::Online))
            .is_empty());
    }

    #[test]
    fn test_cache_bust_token_changes_per_request() {
        let mut m = machine(CameraStatus::Online);
        let first = match m.start().pop() {
            Some(FeedEffect::RequestFrame(request)) => request,
            other => panic!("expected frame request, got {:?}", other),
        };
        m.handle(FeedEvent::LoadFailed("x".to_string()));
        let second = match m.handle(FeedEvent::ReloadDue).pop() {
            Some(FeedEffect::RequestFrame(request)) => request,
            other => panic!("expected frame request, got {:?}", other),
        };
        assert_eq!(first.camera_id, second.camera_id);
        assert_ne!(first.cache_bust, second.cache_bust);
    }

    #[test]
    fn test_pause_keeps_snapshot_and_stops_refresh() {
        let mut m = machine(CameraStatus::Online);
        m.start();
        m.handle(FeedEvent::LoadSucceeded(frame()));

        assert_eq!(m.handle(FeedEvent::Pause), vec![FeedEffect::CancelPending]);
        assert!(m.session().paused);
        assert!(m.session().last_snapshot.is_some());
        assert!(m.handle(FeedEvent::RefreshDue).is_empty());

        assert!(is_request(&m.handle(FeedEvent::Resume)));
        assert!(!m.session().paused);
    }

    #[test]
    fn test_pause_while_offline_holds_after_reconnect() {
        let mut m = machine(CameraStatus::Offline);
        assert!(m.handle(FeedEvent::Pause).is_empty());
        assert!(m.session().paused);

        assert!(is_request(
            &m.handle(FeedEvent::CameraStatusChanged(CameraStatus::Online))
        ));
        // One frame is shown, but no refresh is armed
        assert_eq!(
            m.handle(FeedEvent::LoadSucceeded(frame())),
            vec![FeedEffect::ClearError]
        );
        assert_eq!(m.state(), FeedState::Playing);
        assert!(m.handle(FeedEvent::RefreshDue).is_empty());

        assert!(is_request(&m.handle(FeedEvent::Resume)));
    }

    #[test]
    fn test_resume_while_offline_clears_pause() {
        let mut m = machine(CameraStatus::Online);
        m.start();
        m.handle(FeedEvent::LoadSucceeded(frame()));
        m.handle(FeedEvent::Pause);
        m.handle(FeedEvent::CameraStatusChanged(CameraStatus::Offline));

        assert!(m.handle(FeedEvent::Resume).is_empty());
        assert!(!m.session().paused);

        m.handle(FeedEvent::CameraStatusChanged(CameraStatus::Online));
        assert_eq!(
            m.handle(FeedEvent::LoadSucceeded(frame())),
            vec![
                FeedEffect::ClearError,
                FeedEffect::ScheduleRefresh { after: REFRESH },
            ]
        );
    }

    #[test]
    fn test_failure_records_last_error_and_success_clears_it() {
        let mut m = machine(CameraStatus::Online);
        m.start();
        m.handle(FeedEvent::LoadFailed("404".to_string()));
        assert_eq!(m.session().last_error.as_deref(), Some("404"));

        m.handle(FeedEvent::LoadSucceeded(frame()));
        assert!(m.session().last_error.is_none());
    }
}
