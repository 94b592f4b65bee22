//! Mode-transition authentication: pluggable verifier chain with lockout.
//!
//! Verifiers are named and tried in order (primary, then fallback), each call
//! bounded by the configured timeout; a timed-out verifier counts as a failed
//! attempt. Lockout is keyed by `(entity, from_mode, to_mode)`; locking one
//! key says nothing about any other. The sovereign always succeeds instantly,
//! is exempt from lockout, and receives a long-lived grant.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{info, warn};

use crate::config::JanusConfig;
use crate::domain::{Mode, SOVEREIGN_ID};
use crate::error::{JanusError, JanusResult};

/// A named authentication backend (modeled; real biometric or hardware
/// verifiers plug in here).
#[async_trait]
pub trait ModeVerifier: Send + Sync {
    /// Method name this verifier answers for (e.g. "passphrase").
    fn name(&self) -> &str;

    /// Verifies the opaque credential payload.
    async fn verify(&self, payload: &str) -> bool;
}

/// The sovereign's method: always succeeds.
pub struct OverrideVerifier;

#[async_trait]
impl ModeVerifier for OverrideVerifier {
    fn name(&self) -> &str {
        "override"
    }

    async fn verify(&self, _payload: &str) -> bool {
        true
    }
}

/// Example verifier checking a shared passphrase.
pub struct PassphraseVerifier {
    expected: String,
}

impl PassphraseVerifier {
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
        }
    }
}

#[async_trait]
impl ModeVerifier for PassphraseVerifier {
    fn name(&self) -> &str {
        "passphrase"
    }

    async fn verify(&self, payload: &str) -> bool {
        if payload.len() != self.expected.len() {
            return false;
        }
        payload
            .bytes()
            .zip(self.expected.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
    }
}

/// Lockout key: failures on one transition direction never affect another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LockoutKey {
    entity: String,
    from: Mode,
    to: Mode,
}

/// A successful mode-authentication grant.
#[derive(Debug, Clone)]
pub struct AuthGrant {
    pub entity: String,
    /// Verifier method that granted access.
    pub method: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Verifies mode-transition credentials via the pluggable chain, with
/// per-key lockout bookkeeping.
pub struct ModeAuthenticationManager {
    config: Arc<JanusConfig>,
    verifiers: Vec<Arc<dyn ModeVerifier>>,
    attempts: DashMap<LockoutKey, Vec<DateTime<Utc>>>,
    lockouts: DashMap<LockoutKey, DateTime<Utc>>,
}

impl ModeAuthenticationManager {
    /// Builds the manager with the verifier chain in trial order
    /// (primary first, then fallbacks).
    pub fn new(config: Arc<JanusConfig>, verifiers: Vec<Arc<dyn ModeVerifier>>) -> Self {
        Self {
            config,
            verifiers,
            attempts: DashMap::new(),
            lockouts: DashMap::new(),
        }
    }

    /// Authenticates `entity` for the `from` → `to` transition.
    pub async fn authenticate(
        &self,
        entity: &str,
        from: Mode,
        to: Mode,
        payload: &str,
    ) -> JanusResult<AuthGrant> {
        let now = Utc::now();
        if entity == SOVEREIGN_ID {
            // Instant success, exempt from lockout, long-lived grant. Logged.
            info!(target: "janus::mode_auth", entity, %from, %to, "sovereign authentication");
            return Ok(AuthGrant {
                entity: entity.to_string(),
                method: "override".to_string(),
                granted_at: now,
                expires_at: now + Duration::seconds(self.config.override_grant_ttl_secs),
            });
        }

        let key = LockoutKey {
            entity: entity.to_string(),
            from,
            to,
        };
        if let Some(until) = self.active_lockout(&key, now) {
            return Err(JanusError::Lockout { until });
        }

        let budget = StdDuration::from_millis(self.config.verifier_timeout_ms);
        for verifier in &self.verifiers {
            match tokio::time::timeout(budget, verifier.verify(payload)).await {
                Ok(true) => {
                    self.attempts.remove(&key);
                    info!(
                        target: "janus::mode_auth",
                        entity,
                        method = verifier.name(),
                        %from,
                        %to,
                        "mode authentication succeeded"
                    );
                    return Ok(AuthGrant {
                        entity: entity.to_string(),
                        method: verifier.name().to_string(),
                        granted_at: now,
                        expires_at: now + Duration::seconds(self.config.mode_grant_ttl_secs),
                    });
                }
                Ok(false) => {}
                Err(_) => {
                    warn!(
                        target: "janus::mode_auth",
                        entity,
                        method = verifier.name(),
                        "verifier timed out; counts as a failed attempt"
                    );
                }
            }
        }
        Err(self.record_failure(key, now))
    }

    /// The lockout expiry for a transition key, if one is active.
    pub fn lockout_until(&self, entity: &str, from: Mode, to: Mode) -> Option<DateTime<Utc>> {
        self.active_lockout(
            &LockoutKey {
                entity: entity.to_string(),
                from,
                to,
            },
            Utc::now(),
        )
    }

    fn active_lockout(&self, key: &LockoutKey, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let until = self.lockouts.get(key).map(|u| *u)?;
        if now >= until {
            self.lockouts.remove(key);
            self.attempts.remove(key);
            return None;
        }
        Some(until)
    }

    fn record_failure(&self, key: LockoutKey, now: DateTime<Utc>) -> JanusError {
        let window = Duration::seconds(self.config.auth_window_secs);
        let mut entry = self.attempts.entry(key.clone()).or_default();
        entry.push(now);
        entry.retain(|t| now - *t <= window);
        let failures = entry.len() as u32;
        drop(entry);

        if failures >= self.config.max_auth_attempts {
            let until = now + Duration::seconds(self.config.lockout_secs);
            self.lockouts.insert(key.clone(), until);
            warn!(
                target: "janus::mode_auth",
                entity = %key.entity,
                from = %key.from,
                to = %key.to,
                %until,
                "transition key locked out"
            );
            return JanusError::Lockout { until };
        }
        JanusError::AuthenticationFailure(format!(
            "all verifiers rejected the credential ({} of {} attempts)",
            failures, self.config.max_auth_attempts
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifier that never answers inside the test budget.
    struct StalledVerifier;

    #[async_trait]
    impl ModeVerifier for StalledVerifier {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn verify(&self, _payload: &str) -> bool {
            tokio::time::sleep(StdDuration::from_secs(3_600)).await;
            true
        }
    }

    fn manager(verifiers: Vec<Arc<dyn ModeVerifier>>) -> ModeAuthenticationManager {
        let config = JanusConfig {
            verifier_timeout_ms: 50,
            max_auth_attempts: 2,
            ..Default::default()
        };
        ModeAuthenticationManager::new(Arc::new(config), verifiers)
    }

    #[tokio::test]
    async fn passphrase_chain_grants_one_hour() {
        let m = manager(vec![Arc::new(PassphraseVerifier::new("open sesame"))]);
        let grant = m
            .authenticate("primary_identity", Mode::Personal, Mode::Professional, "open sesame")
            .await
            .unwrap();
        assert_eq!(grant.method, "passphrase");
        let ttl = grant.expires_at - grant.granted_at;
        assert_eq!(ttl, Duration::seconds(3_600));
    }

    #[tokio::test]
    async fn fallback_verifier_is_tried_after_primary() {
        let m = manager(vec![
            Arc::new(PassphraseVerifier::new("primary")),
            Arc::new(PassphraseVerifier::new("fallback")),
        ]);
        let grant = m
            .authenticate("primary_identity", Mode::Personal, Mode::Professional, "fallback")
            .await
            .unwrap();
        assert_eq!(grant.method, "passphrase");
    }

    #[tokio::test]
    async fn sovereign_always_succeeds_with_long_grant() {
        let m = manager(vec![Arc::new(PassphraseVerifier::new("nope"))]);
        let grant = m
            .authenticate(SOVEREIGN_ID, Mode::Personal, Mode::Professional, "")
            .await
            .unwrap();
        assert_eq!(grant.method, "override");
        assert!(grant.expires_at - grant.granted_at > Duration::seconds(3_600));
    }

    #[tokio::test]
    async fn consecutive_failures_lock_the_key_independently() {
        let m = manager(vec![Arc::new(PassphraseVerifier::new("open sesame"))]);
        let _ = m
            .authenticate("scout", Mode::Personal, Mode::Professional, "wrong")
            .await;
        let err = m
            .authenticate("scout", Mode::Personal, Mode::Professional, "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, JanusError::Lockout { .. }));
        assert!(m
            .lockout_until("scout", Mode::Personal, Mode::Professional)
            .is_some());
        // Other keys are untouched: a different entity, and the reverse
        // direction for the same entity, both stay unlocked.
        assert!(m
            .lockout_until("other", Mode::Personal, Mode::Professional)
            .is_none());
        assert!(m
            .lockout_until("scout", Mode::Professional, Mode::Personal)
            .is_none());
    }

    #[tokio::test]
    async fn success_before_limit_clears_the_counter() {
        let m = manager(vec![Arc::new(PassphraseVerifier::new("open sesame"))]);
        let _ = m
            .authenticate("scout", Mode::Personal, Mode::Professional, "wrong")
            .await;
        m.authenticate("scout", Mode::Personal, Mode::Professional, "open sesame")
            .await
            .unwrap();
        // Counter cleared; one more failure is just a failure, not a lockout.
        let err = m
            .authenticate("scout", Mode::Personal, Mode::Professional, "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, JanusError::AuthenticationFailure(_)));
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let m = manager(vec![Arc::new(StalledVerifier)]);
        let err = m
            .authenticate("scout", Mode::Personal, Mode::Professional, "anything")
            .await
            .unwrap_err();
        assert!(matches!(err, JanusError::AuthenticationFailure(_)));
    }
}
