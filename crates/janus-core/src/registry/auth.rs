//! Agent authentication: secret validation and lockout around token issuance.
//!
//! The attempt counter here is independent of the mode-transition lockout in
//! `mode::auth`; locking an agent out of token issuance says nothing about
//! any other key. Sovereign-created agents skip secret validation entirely;
//! the registry still gates them on liveness and suspension.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{info, warn};

use crate::config::JanusConfig;
use crate::error::{JanusError, JanusResult};
use crate::registry::agent::{ActivityRecord, AgentToken};
use crate::registry::AgentRegistry;

/// Secret validation plus an attempt/lockout counter layered over the
/// registry's token issuance.
pub struct AgentAuthenticationManager {
    config: Arc<JanusConfig>,
    registry: Arc<AgentRegistry>,
    /// agent id -> registered shared secret.
    secrets: DashMap<String, String>,
    /// agent id -> timestamps of recent failures.
    attempts: DashMap<String, Vec<DateTime<Utc>>>,
    /// agent id -> lockout expiry.
    lockouts: DashMap<String, DateTime<Utc>>,
}

impl AgentAuthenticationManager {
    pub fn new(config: Arc<JanusConfig>, registry: Arc<AgentRegistry>) -> Self {
        Self {
            config,
            registry,
            secrets: DashMap::new(),
            attempts: DashMap::new(),
            lockouts: DashMap::new(),
        }
    }

    /// Stores the shared secret captured at registration time.
    pub fn enroll_secret(&self, agent_id: &str, secret: impl Into<String>) {
        self.secrets.insert(agent_id.to_string(), secret.into());
    }

    /// Validates the secret and issues a token. Sovereign-created agents skip
    /// secret validation. Failures count toward a per-agent lockout.
    pub fn authenticate(&self, agent_id: &str, secret: Option<&str>) -> JanusResult<AgentToken> {
        let now = Utc::now();
        if let Some(until) = self.active_lockout(agent_id, now) {
            return Err(JanusError::Lockout { until });
        }

        let agent = self.registry.get(agent_id).ok_or_else(|| {
            JanusError::AuthenticationFailure(format!("unknown agent '{}'", agent_id))
        })?;

        if !agent.sovereign_created {
            let expected = self.secrets.get(agent_id).map(|s| s.clone());
            let presented_ok = match (expected, secret) {
                (Some(expected), Some(presented)) => constant_time_eq(&expected, presented),
                _ => false,
            };
            if !presented_ok {
                return Err(self.record_failure(agent_id, now));
            }
        }

        // Success clears the failure counter for this agent.
        self.attempts.remove(agent_id);
        let token = self.registry.issue_token(agent_id)?;
        self.registry.log_activity(
            agent_id,
            ActivityRecord::now("authenticate", true, "secret validated, token issued"),
        );
        info!(target: "janus::auth", agent_id, "agent authenticated");
        Ok(token)
    }

    fn active_lockout(&self, agent_id: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let until = self.lockouts.get(agent_id).map(|u| *u)?;
        if now >= until {
            self.lockouts.remove(agent_id);
            self.attempts.remove(agent_id);
            return None;
        }
        Some(until)
    }

    fn record_failure(&self, agent_id: &str, now: DateTime<Utc>) -> JanusError {
        let window = Duration::seconds(self.config.auth_window_secs);
        let mut entry = self.attempts.entry(agent_id.to_string()).or_default();
        entry.push(now);
        entry.retain(|t| now - *t <= window);
        let failures = entry.len() as u32;
        drop(entry);

        self.registry.log_activity(
            agent_id,
            ActivityRecord::now("authenticate", false, "secret validation failed"),
        );

        if failures >= self.config.max_auth_attempts {
            let until = now + Duration::seconds(self.config.lockout_secs);
            self.lockouts.insert(agent_id.to_string(), until);
            warn!(target: "janus::auth", agent_id, %until, "agent locked out");
            return JanusError::Lockout { until };
        }
        JanusError::AuthenticationFailure(format!(
            "invalid secret ({} of {} attempts)",
            failures, self.config.max_auth_attempts
        ))
    }
}

/// Length-guarded constant-time comparison for shared secrets.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Operation, PRIMARY_IDENTITY, SOVEREIGN_ID};
    use crate::registry::agent::{AgentClassification, RegistrationRequest, SuspensionReason};
    use std::collections::HashMap;

    fn setup() -> (Arc<AgentRegistry>, AgentAuthenticationManager) {
        let config = Arc::new(JanusConfig::default());
        let registry = Arc::new(AgentRegistry::new(config.clone()));
        let auth = AgentAuthenticationManager::new(config, registry.clone());
        (registry, auth)
    }

    fn register(registry: &AgentRegistry, auth: &AgentAuthenticationManager, id: &str, by: &str) {
        let request = RegistrationRequest {
            id: id.to_string(),
            classification: AgentClassification::Personal,
            created_by: by.to_string(),
            capabilities: vec![Operation::Read],
            clearance: None,
            specialization: None,
            secret: Some("correct horse".to_string()),
            extensions: HashMap::new(),
        };
        let secret = request.secret.clone();
        registry.register(request).unwrap();
        if let Some(secret) = secret {
            auth.enroll_secret(id, secret);
        }
    }

    #[test]
    fn valid_secret_issues_token() {
        let (registry, auth) = setup();
        register(&registry, &auth, "scout", PRIMARY_IDENTITY);
        let token = auth.authenticate("scout", Some("correct horse")).unwrap();
        assert_eq!(token.agent_id, "scout");
        assert!(registry.live_token("scout").is_some());
    }

    #[test]
    fn invalid_secret_fails_then_locks_out() {
        let (registry, auth) = setup();
        register(&registry, &auth, "scout", PRIMARY_IDENTITY);
        for _ in 0..2 {
            assert!(matches!(
                auth.authenticate("scout", Some("wrong")),
                Err(JanusError::AuthenticationFailure(_))
            ));
        }
        // Third consecutive failure trips the default limit of 3.
        assert!(matches!(
            auth.authenticate("scout", Some("wrong")),
            Err(JanusError::Lockout { .. })
        ));
        // Even the right secret is refused while locked.
        assert!(matches!(
            auth.authenticate("scout", Some("correct horse")),
            Err(JanusError::Lockout { .. })
        ));
    }

    #[test]
    fn success_resets_the_counter() {
        let (registry, auth) = setup();
        register(&registry, &auth, "scout", PRIMARY_IDENTITY);
        for _ in 0..2 {
            let _ = auth.authenticate("scout", Some("wrong"));
        }
        auth.authenticate("scout", Some("correct horse")).unwrap();
        // Counter was cleared; two more failures do not lock.
        for _ in 0..2 {
            assert!(matches!(
                auth.authenticate("scout", Some("wrong")),
                Err(JanusError::AuthenticationFailure(_))
            ));
        }
    }

    #[test]
    fn sovereign_created_agents_skip_secret_validation() {
        let (registry, auth) = setup();
        register(&registry, &auth, "envoy", SOVEREIGN_ID);
        let token = auth.authenticate("envoy", None).unwrap();
        assert!(token.override_access);
    }

    #[test]
    fn suspended_agent_cannot_authenticate() {
        let (registry, auth) = setup();
        register(&registry, &auth, "scout", PRIMARY_IDENTITY);
        registry
            .suspend("scout", SuspensionReason::Manual("review".to_string()))
            .unwrap();
        assert!(matches!(
            auth.authenticate("scout", Some("correct horse")),
            Err(JanusError::AuthenticationFailure(_))
        ));
    }
}
