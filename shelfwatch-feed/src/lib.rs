//! shelfwatch-feed: per-camera live feed sessions
//!
//! Provides:
//! - Feed state machine with bounded, fixed-delay reconnects
//! - Detection polling with a primary source and a connectivity fallback
//! - Last-write-wins detection store keyed by camera
//! - Session registry with deterministic teardown
//! - HTTP implementations of the external sources

pub mod error;
pub mod feed;
pub mod http;
pub mod poller;
pub mod registry;
pub mod retry;
pub mod session;
pub mod source;
pub mod store;

pub use error::FeedError;
pub use feed::{FeedEffect, FeedEvent, FeedSession, FeedState, FeedStateMachine};
pub use http::HttpSources;
pub use poller::{DetectionChain, DetectionPoller, PollerStats, PollerStatsSnapshot, TickOutcome};
pub use registry::{GridSync, SessionRegistry};
pub use retry::{RetryDecision, RetryPolicy};
pub use session::{FeedCommand, SessionEvent, SessionHandle, SessionSettings, SessionSnapshot};
pub use source::{
    CameraDirectory, ConnectivitySource, DetectionSource, FrameRequest, ImageSource, SourceSet,
};
pub use store::{ClearReason, DetectionOrigin, DetectionSet, DetectionStore, TickTicket};
