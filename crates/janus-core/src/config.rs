//! Core configuration loaded from the environment.
//!
//! Every tunable the isolation core consumes lives here: token lifetimes,
//! lockout policy, session timeout, per-operation hourly quotas, and the
//! clearance floor for the restricted intelligence KB. Construction is
//! fail-fast: [`JanusConfig::validate`] rejects a zeroed or contradictory
//! configuration at startup instead of failing on first use.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | JANUS_TOKEN_TTL_SECS | 3600 | Lifetime of an ordinary agent token. |
//! | JANUS_OVERRIDE_TOKEN_TTL_SECS | 2592000 | Lifetime of a sovereign-created agent token (30 days). |
//! | JANUS_MAX_AUTH_ATTEMPTS | 3 | Consecutive failures before lockout. |
//! | JANUS_LOCKOUT_SECS | 900 | Lockout duration once triggered. |
//! | JANUS_AUTH_WINDOW_SECS | 600 | Rolling window for counting recent failures. |
//! | JANUS_SESSION_TIMEOUT_SECS | 1800 | Inactivity before mode reverts to Personal. |
//! | JANUS_MODE_GRANT_TTL_SECS | 3600 | Validity of an ordinary mode-auth grant. |
//! | JANUS_OVERRIDE_GRANT_TTL_SECS | 86400 | Validity of the sovereign's mode-auth grant. |
//! | JANUS_VERIFIER_TIMEOUT_MS | 5000 | Budget per pluggable-verifier call. |
//! | JANUS_READ_PER_HOUR | 1000 | Hourly read quota per agent. |
//! | JANUS_WRITE_PER_HOUR | 200 | Hourly write quota per agent. |
//! | JANUS_DELETE_PER_HOUR | 20 | Hourly delete quota per agent. |
//! | JANUS_SEARCH_PER_HOUR | 300 | Hourly search quota per agent. |
//! | JANUS_FAILURE_SUSPEND_THRESHOLD | 5 | Failures in the activity window before auto-suspension. |
//! | JANUS_SUSPENSION_RELEASE_SECS | 3600 | Auto-release delay for non-manual suspensions. |
//! | JANUS_RECENT_ACCESS_CAPACITY | 500 | Bound of the recent-access ring. |

use serde::{Deserialize, Serialize};

use crate::error::{JanusError, JanusResult};
use crate::registry::agent::ClearanceTier;
use crate::Operation;

/// All tunables for the isolation core. See the module table for env names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JanusConfig {
    /// Lifetime of an ordinary agent token, seconds.
    pub token_ttl_secs: i64,
    /// Lifetime of a sovereign-created agent token, seconds.
    pub override_token_ttl_secs: i64,
    /// Consecutive authentication failures before a lockout.
    pub max_auth_attempts: u32,
    /// Lockout duration, seconds.
    pub lockout_secs: i64,
    /// Rolling window inside which failures count toward lockout, seconds.
    pub auth_window_secs: i64,
    /// Inactivity before the mode session reverts to Personal, seconds.
    pub session_timeout_secs: i64,
    /// Validity of an ordinary mode-authentication grant, seconds.
    pub mode_grant_ttl_secs: i64,
    /// Validity of the sovereign's mode-authentication grant, seconds.
    pub override_grant_ttl_secs: i64,
    /// Budget for a single pluggable-verifier call, milliseconds.
    /// A timed-out verifier counts as a failed attempt.
    pub verifier_timeout_ms: u64,
    /// Hourly per-agent quotas, one per operation.
    pub read_per_hour: u32,
    pub write_per_hour: u32,
    pub delete_per_hour: u32,
    pub search_per_hour: u32,
    /// Operation failures within the recent-activity window before auto-suspension.
    pub failure_suspend_threshold: u32,
    /// Auto-release delay for non-manual suspensions, seconds.
    pub suspension_release_secs: i64,
    /// Bound of the validator's recent-access ring.
    pub recent_access_capacity: usize,
    /// Minimum clearance for write/delete on the restricted intelligence KB.
    pub min_intel_clearance: ClearanceTier,
}

impl Default for JanusConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 3_600,
            override_token_ttl_secs: 2_592_000,
            max_auth_attempts: 3,
            lockout_secs: 900,
            auth_window_secs: 600,
            session_timeout_secs: 1_800,
            mode_grant_ttl_secs: 3_600,
            override_grant_ttl_secs: 86_400,
            verifier_timeout_ms: 5_000,
            read_per_hour: 1_000,
            write_per_hour: 200,
            delete_per_hour: 20,
            search_per_hour: 300,
            failure_suspend_threshold: 5,
            suspension_release_secs: 3_600,
            recent_access_capacity: 500,
            min_intel_clearance: ClearanceTier::Director,
        }
    }
}

impl JanusConfig {
    /// Load tunables from environment. Unset or invalid => defaults
    /// (see the module table).
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            token_ttl_secs: env_i64("JANUS_TOKEN_TTL_SECS", d.token_ttl_secs),
            override_token_ttl_secs: env_i64(
                "JANUS_OVERRIDE_TOKEN_TTL_SECS",
                d.override_token_ttl_secs,
            ),
            max_auth_attempts: env_u32("JANUS_MAX_AUTH_ATTEMPTS", d.max_auth_attempts),
            lockout_secs: env_i64("JANUS_LOCKOUT_SECS", d.lockout_secs),
            auth_window_secs: env_i64("JANUS_AUTH_WINDOW_SECS", d.auth_window_secs),
            session_timeout_secs: env_i64("JANUS_SESSION_TIMEOUT_SECS", d.session_timeout_secs),
            mode_grant_ttl_secs: env_i64("JANUS_MODE_GRANT_TTL_SECS", d.mode_grant_ttl_secs),
            override_grant_ttl_secs: env_i64(
                "JANUS_OVERRIDE_GRANT_TTL_SECS",
                d.override_grant_ttl_secs,
            ),
            verifier_timeout_ms: env_u64("JANUS_VERIFIER_TIMEOUT_MS", d.verifier_timeout_ms),
            read_per_hour: env_u32("JANUS_READ_PER_HOUR", d.read_per_hour),
            write_per_hour: env_u32("JANUS_WRITE_PER_HOUR", d.write_per_hour),
            delete_per_hour: env_u32("JANUS_DELETE_PER_HOUR", d.delete_per_hour),
            search_per_hour: env_u32("JANUS_SEARCH_PER_HOUR", d.search_per_hour),
            failure_suspend_threshold: env_u32(
                "JANUS_FAILURE_SUSPEND_THRESHOLD",
                d.failure_suspend_threshold,
            ),
            suspension_release_secs: env_i64(
                "JANUS_SUSPENSION_RELEASE_SECS",
                d.suspension_release_secs,
            ),
            recent_access_capacity: env_u64(
                "JANUS_RECENT_ACCESS_CAPACITY",
                d.recent_access_capacity as u64,
            ) as usize,
            min_intel_clearance: d.min_intel_clearance,
        }
    }

    /// Fail-fast startup validation. Called by the context builder before any
    /// subsystem is constructed.
    pub fn validate(&self) -> JanusResult<()> {
        if self.max_auth_attempts == 0 {
            return Err(JanusError::Configuration(
                "max_auth_attempts must be at least 1".to_string(),
            ));
        }
        if self.token_ttl_secs <= 0 || self.override_token_ttl_secs <= 0 {
            return Err(JanusError::Configuration(
                "token TTLs must be positive".to_string(),
            ));
        }
        if self.override_token_ttl_secs < self.token_ttl_secs {
            return Err(JanusError::Configuration(
                "override token TTL must not be shorter than the ordinary TTL".to_string(),
            ));
        }
        if self.lockout_secs <= 0 || self.auth_window_secs <= 0 {
            return Err(JanusError::Configuration(
                "lockout and auth-window durations must be positive".to_string(),
            ));
        }
        if self.session_timeout_secs <= 0 {
            return Err(JanusError::Configuration(
                "session_timeout_secs must be positive".to_string(),
            ));
        }
        if self.verifier_timeout_ms == 0 {
            return Err(JanusError::Configuration(
                "verifier_timeout_ms must be positive".to_string(),
            ));
        }
        if self.recent_access_capacity == 0 {
            return Err(JanusError::Configuration(
                "recent_access_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Hourly quota for one operation kind.
    #[inline]
    pub fn quota(&self, operation: Operation) -> u32 {
        match operation {
            Operation::Read => self.read_per_hour,
            Operation::Write => self.write_per_hour,
            Operation::Delete => self.delete_per_hour,
            Operation::Search => self.search_per_hour,
        }
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
