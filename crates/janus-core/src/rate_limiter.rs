//! Per-agent, per-operation hourly rate limiting.
//!
//! Every agent owns one rolling window shared by all four operation kinds.
//! Windows are independent per agent: a stale window found during a check is
//! reset for that agent only, never globally. The sovereign is exempt.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::JanusConfig;
use crate::domain::{Operation, SOVEREIGN_ID};

/// Length of the shared per-agent window.
fn window_len() -> Duration {
    Duration::hours(1)
}

/// Counters for one agent's current window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitWindow {
    pub window_start: DateTime<Utc>,
    pub counts: HashMap<Operation, u32>,
}

impl RateLimitWindow {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            counts: HashMap::new(),
        }
    }

    fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.window_start >= window_len()
    }
}

/// Outcome of one quota check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Operations of this kind left in the current window. Zero when denied.
    pub remaining: u32,
    /// When the agent's window rolls over and counts reset.
    pub reset_at: DateTime<Utc>,
}

/// Fixed hourly per-operation quotas on one shared rolling window per agent.
pub struct RateLimiter {
    config: Arc<JanusConfig>,
    windows: DashMap<String, RateLimitWindow>,
}

impl RateLimiter {
    pub fn new(config: Arc<JanusConfig>) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Checks the agent's quota for `operation` and, when allowed, counts the
    /// call against the window. The sovereign is exempt and never counted.
    pub fn check_and_count(&self, agent_id: &str, operation: Operation) -> RateLimitDecision {
        let now = Utc::now();
        if agent_id == SOVEREIGN_ID {
            return RateLimitDecision {
                allowed: true,
                remaining: u32::MAX,
                reset_at: now + window_len(),
            };
        }

        let limit = self.config.quota(operation);
        let mut entry = self
            .windows
            .entry(agent_id.to_string())
            .or_insert_with(|| RateLimitWindow::fresh(now));
        if entry.is_stale(now) {
            *entry = RateLimitWindow::fresh(now);
        }
        let reset_at = entry.window_start + window_len();
        let count = entry.counts.entry(operation).or_insert(0);
        if *count >= limit {
            tracing::debug!(
                target: "janus::ratelimit",
                agent_id,
                operation = %operation,
                limit,
                "quota exhausted"
            );
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at,
            };
        }
        *count += 1;
        RateLimitDecision {
            allowed: true,
            remaining: limit - *count,
            reset_at,
        }
    }

    /// Current usage snapshot for one agent (window start + per-op counts).
    pub fn usage(&self, agent_id: &str) -> Option<RateLimitWindow> {
        self.windows.get(agent_id).map(|w| w.clone())
    }
}
