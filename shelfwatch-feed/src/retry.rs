//! Reconnect policy for the image feed
//!
//! Bounded attempts with a fixed delay. Feed endpoints either come back
//! within a few seconds or stay down, so there is no backoff curve.

use crate::feed::{FeedSession, FeedState};
use shelfwatch_core::ControllerConfig;
use std::time::Duration;

/// What the caller should do after a failed load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reload after `after`; `attempt` is the new retry count
    Retry { attempt: u32, after: Duration },
    /// Attempts exhausted, the session is now in `Error`
    GiveUp { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(2000);

    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::new(config.retry.max_attempts, config.retry_delay())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Record a failed load. Only the session's state and counter change;
    /// scheduling the reload is left to the caller.
    pub fn on_failure(&self, session: &mut FeedSession) -> RetryDecision {
        if session.retry_count < self.max_attempts {
            session.retry_count += 1;
            session.state = FeedState::Loading;
            RetryDecision::Retry {
                attempt: session.retry_count,
                after: self.delay,
            }
        } else {
            session.state = FeedState::Error;
            RetryDecision::GiveUp {
                attempts: session.retry_count,
            }
        }
    }

    /// Record a successful load
    pub fn on_success(&self, session: &mut FeedSession) {
        session.state = FeedState::Playing;
        session.retry_count = 0;
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS, Self::DEFAULT_DELAY)
    }
}
