//! Detection poller
//!
//! One poller per camera. Every tick walks a fixed chain: ask the
//! primary detection source, and if that does not produce an answer it
//! can vouch for, ask the connectivity check. Anything short of a
//! successful primary reply empties the camera's detections. The poller
//! is suspended entirely while the camera is offline.

use crate::session::SessionEvent;
use crate::source::{ConnectivitySource, DetectionSource};
use crate::store::{ClearReason, DetectionOrigin, DetectionStore};
use shelfwatch_core::{CameraId, CameraStatus, ConnectivityStatus, Detection};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error};

/// Result of one tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Primary source answered successfully (possibly with no detections)
    Detections(Vec<Detection>),
    Cleared(ClearReason),
}

/// Counters for one camera's poller
#[derive(Debug, Default)]
pub struct PollerStats {
    ticks: AtomicU64,
    primary_hits: AtomicU64,
    fallback_checks: AtomicU64,
    cleared: AtomicU64,
    discarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollerStatsSnapshot {
    pub ticks: u64,
    pub primary_hits: u64,
    pub fallback_checks: u64,
    pub cleared: u64,
    /// Results dropped because a newer tick had started
    pub discarded: u64,
}

impl PollerStats {
    pub fn snapshot(&self) -> PollerStatsSnapshot {
        PollerStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            primary_hits: self.primary_hits.load(Ordering::Relaxed),
            fallback_checks: self.fallback_checks.load(Ordering::Relaxed),
            cleared: self.cleared.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// The ordered sources consulted by a tick
#[derive(Clone)]
pub struct DetectionChain {
    camera_id: CameraId,
    primary: Arc<dyn DetectionSource>,
    fallback: Arc<dyn ConnectivitySource>,
    fetch_timeout: Duration,
    fallback_timeout: Duration,
}

impl DetectionChain {
    pub fn new(
        camera_id: CameraId,
        primary: Arc<dyn DetectionSource>,
        fallback: Arc<dyn ConnectivitySource>,
        fetch_timeout: Duration,
        fallback_timeout: Duration,
    ) -> Self {
        Self {
            camera_id,
            primary,
            fallback,
            fetch_timeout,
            fallback_timeout,
        }
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    pub async fn resolve(&self, stats: &PollerStats) -> TickOutcome {
        let camera = &self.camera_id;

        match timeout(self.fetch_timeout, self.primary.fetch_detections(camera)).await {
            Ok(Ok(response)) if response.success => {
                stats.primary_hits.fetch_add(1, Ordering::Relaxed);
                return TickOutcome::Detections(response.detections);
            }
            Ok(Ok(response)) => {
                debug!(camera = %camera, error = ?response.error, "Detection source reported failure");
            }
            Ok(Err(e)) => {
                debug!(camera = %camera, "Detection source unreachable: {}", e);
            }
            Err(_) => {
                debug!(camera = %camera, "Detection source timed out after {:?}", self.fetch_timeout);
            }
        }

        stats.fallback_checks.fetch_add(1, Ordering::Relaxed);
        match timeout(self.fallback_timeout, self.fallback.connection_status(camera)).await {
            Ok(Ok(ConnectivityStatus::Disconnected)) => TickOutcome::Cleared(ClearReason::CameraDisconnected),
            Ok(Ok(ConnectivityStatus::Connected)) => TickOutcome::Cleared(ClearReason::PrimaryUnavailable),
            Ok(Err(e)) => {
                debug!(camera = %camera, "Connectivity check unreachable: {}", e);
                TickOutcome::Cleared(ClearReason::FallbackUnreachable)
            }
            Err(_) => {
                debug!(camera = %camera, "Connectivity check timed out after {:?}", self.fallback_timeout);
                TickOutcome::Cleared(ClearReason::FallbackUnreachable)
            }
        }
    }
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct DetectionPoller {
    chain: DetectionChain,
    store: Arc<DetectionStore>,
    interval: Duration,
    stats: Arc<PollerStats>,
    events: broadcast::Sender<SessionEvent>,
}

impl DetectionPoller {
    pub fn new(
        chain: DetectionChain,
        store: Arc<DetectionStore>,
        interval: Duration,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            chain,
            store,
            interval,
            stats: Arc::new(PollerStats::default()),
            events,
        }
    }

    pub fn stats(&self) -> Arc<PollerStats> {
        self.stats.clone()
    }

    /// Run one tick and commit its outcome. Returns `None` when the
    /// camera no longer has a slot in the store.
    pub async fn tick(&self) -> Option<TickOutcome> {
        let camera_id = self.chain.camera_id.clone();
        let ticket = self.store.begin_tick(&camera_id)?;
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);

        // A panicking source must not take the poll loop down with it
        let chain = self.chain.clone();
        let stats = self.stats.clone();
        let mut task = AbortOnDrop(tokio::spawn(async move { chain.resolve(&stats).await }));
        let outcome = match (&mut task.0).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(camera = %camera_id, "Detection tick failed: {}", e);
                TickOutcome::Cleared(ClearReason::TickFailed)
            }
        };

        let (detections, origin) = match &outcome {
            TickOutcome::Detections(detections) => (detections.clone(), DetectionOrigin::Primary),
            TickOutcome::Cleared(reason) => (Vec::new(), DetectionOrigin::Cleared(*reason)),
        };
        let count = detections.len();

        if self.store.commit(&camera_id, ticket, detections, origin) {
            if let DetectionOrigin::Cleared(_) = origin {
                self.stats.cleared.fetch_add(1, Ordering::Relaxed);
            }
            let _ = self.events.send(SessionEvent::DetectionsUpdated {
                camera_id: camera_id.clone(),
                count,
            });
        } else {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
            debug!(camera = %camera_id, "Discarded superseded detection result");
        }

        Some(outcome)
    }

    /// Poll until the status channel closes or the task is aborted
    pub async fn run(self, mut status: watch::Receiver<CameraStatus>) {
        let camera_id = self.chain.camera_id.clone();

        loop {
            if !status.borrow_and_update().is_online() {
                if self.store.clear(&camera_id, ClearReason::CameraOffline) {
                    let _ = self.events.send(SessionEvent::DetectionsUpdated {
                        camera_id: camera_id.clone(),
                        count: 0,
                    });
                }
                debug!(camera = %camera_id, "Detection polling suspended");
                loop {
                    if status.changed().await.is_err() {
                        return;
                    }
                    if status.borrow_and_update().is_online() {
                        break;
                    }
                }
                debug!(camera = %camera_id, "Detection polling resumed");
            }

            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !status.borrow().is_online() {
                            break;
                        }
                        if self.tick().await.is_none() {
                            return;
                        }
                    }
                    changed = status.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        if !status.borrow().is_online() {
                            break;
                        }
                    }
                }
            }
        }
    }
}
