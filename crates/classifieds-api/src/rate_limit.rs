//! Fixed-window rate limiting for auth and posting flows.
//!
//! Counters live inside the visitor's [`SessionData`], so they share the
//! session's lifetime and its last-write-wins persistence. A burst of up to
//! twice the limit is possible across a window boundary.

use std::sync::Arc;

use classifieds_types::session::{RateLimitEntry, SessionData};
use tracing::warn;

use crate::clock::Clock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitAction {
    Login,
    Register,
    PostListing,
}

impl RateLimitAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Register => "register",
            Self::PostListing => "post_ad",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_attempts: u32,
    pub window_secs: i64,
}

impl RateLimitPolicy {
    pub const fn new(max_attempts: u32, window_secs: i64) -> Self {
        Self {
            max_attempts,
            window_secs,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Counts one attempt of `action` by `identifier`.
    ///
    /// Expired windows are purged first. A fresh key starts a window with one
    /// attempt; a key already at `max_attempts` is denied without counting.
    pub fn check_and_consume(
        &self,
        session: &mut SessionData,
        action: RateLimitAction,
        identifier: &str,
        policy: RateLimitPolicy,
    ) -> RateLimitDecision {
        let now = self.clock.now();
        let key = format!("{}_{}", action.as_str(), identifier);

        // A window is over once its expiry instant has been reached.
        session.rate_limits.retain(|_, entry| entry.expires > now);

        match session.rate_limits.get_mut(&key) {
            None => {
                session.rate_limits.insert(
                    key,
                    RateLimitEntry {
                        attempts: 1,
                        expires: now + policy.window_secs,
                    },
                );
                RateLimitDecision::Allowed
            }
            Some(entry) if entry.attempts >= policy.max_attempts => {
                warn!(
                    target: "security",
                    action = action.as_str(),
                    identifier,
                    attempts = entry.attempts,
                    "Rate limit exceeded"
                );
                RateLimitDecision::Limited
            }
            Some(entry) => {
                entry.attempts += 1;
                RateLimitDecision::Allowed
            }
        }
    }
}
