//! Agent lifecycle: registration, token issuance, suspension, activity log.
//!
//! All mutable state lives behind one coarse `RwLock` so a counter increment
//! and the activity append it triggers are never observably separated. Token
//! issuance revokes the prior token and installs the new one inside the same
//! write guard, so no window exists where two tokens are live for one agent.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::JanusConfig;
use crate::domain::{PRIMARY_IDENTITY, SOVEREIGN_ID};
use crate::error::{JanusError, JanusResult};

use super::agent::{
    ActivityRecord, Agent, AgentClassification, AgentSuspension, AgentToken, RegistrationRequest,
    SuspensionReason,
};

/// Fixed creator→classification authorization table. The sovereign may create
/// anything; these named principals may create exactly one classification.
const CREATOR_TABLE: [(&str, AgentClassification); 2] = [
    (PRIMARY_IDENTITY, AgentClassification::Personal),
    ("operations_desk", AgentClassification::Professional),
];

/// Cap on per-agent activity history kept in memory.
const ACTIVITY_CAP: usize = 1_000;

/// Length of the sliding window for counting operation failures.
fn failure_window() -> Duration {
    Duration::minutes(15)
}

#[derive(Default)]
struct RegistryInner {
    agents: HashMap<String, Agent>,
    /// Exactly one live token per agent id.
    tokens: HashMap<String, AgentToken>,
    suspensions: HashMap<String, AgentSuspension>,
    activity: HashMap<String, Vec<ActivityRecord>>,
    cross_domain_counts: HashMap<String, u32>,
    recent_failures: HashMap<String, Vec<DateTime<Utc>>>,
}

/// Registry owning every agent, token, and suspension.
pub struct AgentRegistry {
    config: Arc<JanusConfig>,
    inner: RwLock<RegistryInner>,
}

impl AgentRegistry {
    pub fn new(config: Arc<JanusConfig>) -> Self {
        Self {
            config,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Registers a new agent. Validates classification-specific required
    /// fields and the creator authorization table, then freezes the agent's
    /// allowed-KB set.
    pub fn register(&self, request: RegistrationRequest) -> JanusResult<Agent> {
        if request.id.trim().is_empty() {
            return Err(JanusError::Configuration(
                "agent id must not be empty".to_string(),
            ));
        }
        if request.id == SOVEREIGN_ID {
            return Err(JanusError::Configuration(
                "the sovereign is not a registrable agent".to_string(),
            ));
        }
        match request.classification {
            AgentClassification::Personal => {
                if request.capabilities.is_empty() {
                    return Err(JanusError::Configuration(
                        "personal agents require at least one capability".to_string(),
                    ));
                }
            }
            AgentClassification::Professional => {
                if request.clearance.is_none() {
                    return Err(JanusError::Configuration(
                        "professional agents require a clearance tier".to_string(),
                    ));
                }
                let specialized = request
                    .specialization
                    .as_deref()
                    .is_some_and(|s| !s.trim().is_empty());
                if !specialized {
                    return Err(JanusError::Configuration(
                        "professional agents require a specialization".to_string(),
                    ));
                }
            }
        }
        let sovereign_created = request.created_by == SOVEREIGN_ID;
        if !sovereign_created {
            let authorized = CREATOR_TABLE
                .iter()
                .any(|(creator, cls)| *creator == request.created_by && *cls == request.classification);
            if !authorized {
                return Err(JanusError::Configuration(format!(
                    "'{}' is not authorized to create {} agents",
                    request.created_by, request.classification
                )));
            }
        }

        let agent = Agent {
            id: request.id.clone(),
            classification: request.classification,
            created_by: request.created_by,
            created_at: Utc::now(),
            capabilities: request.capabilities,
            clearance: request.clearance,
            specialization: request.specialization,
            active: true,
            allowed_kbs: request.classification.allowed_kbs(),
            sovereign_created,
            extensions: request.extensions,
        };

        let mut inner = self.write();
        if inner.agents.contains_key(&agent.id) {
            return Err(JanusError::Configuration(format!(
                "agent '{}' already exists",
                agent.id
            )));
        }
        inner.agents.insert(agent.id.clone(), agent.clone());
        push_activity(
            &mut inner,
            &agent.id,
            ActivityRecord::now("register", true, format!("{} agent", agent.classification)),
        );
        info!(
            target: "janus::registry",
            agent_id = %agent.id,
            classification = %agent.classification,
            sovereign_created,
            "agent registered"
        );
        Ok(agent)
    }

    pub fn get(&self, agent_id: &str) -> Option<Agent> {
        self.read().agents.get(agent_id).cloned()
    }

    /// Issues a fresh token, atomically revoking any prior one. Expiry is
    /// long-lived for sovereign-created agents, short-lived otherwise.
    pub fn issue_token(&self, agent_id: &str) -> JanusResult<AgentToken> {
        let mut inner = self.write();
        let agent = inner
            .agents
            .get(agent_id)
            .ok_or_else(|| {
                JanusError::AuthenticationFailure(format!("unknown agent '{}'", agent_id))
            })?
            .clone();
        if !agent.active {
            return Err(JanusError::AuthenticationFailure(format!(
                "agent '{}' is deactivated",
                agent_id
            )));
        }
        if live_suspension(&mut inner, agent_id).is_some() {
            return Err(JanusError::AuthenticationFailure(format!(
                "agent '{}' is suspended",
                agent_id
            )));
        }
        let ttl = if agent.sovereign_created {
            self.config.override_token_ttl_secs
        } else {
            self.config.token_ttl_secs
        };
        let now = Utc::now();
        let token = AgentToken {
            token: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            classification: agent.classification,
            issued_at: now,
            expires_at: now + Duration::seconds(ttl),
            override_access: agent.sovereign_created,
        };
        // Revoke-then-issue under the same guard.
        inner.tokens.insert(agent_id.to_string(), token.clone());
        push_activity(
            &mut inner,
            agent_id,
            ActivityRecord::now("issue_token", true, format!("expires {}", token.expires_at)),
        );
        Ok(token)
    }

    /// The live, unexpired token for an agent, if any.
    pub fn live_token(&self, agent_id: &str) -> Option<AgentToken> {
        self.read()
            .tokens
            .get(agent_id)
            .filter(|t| !t.is_expired())
            .cloned()
    }

    /// Resolves a presented token to its agent. Expired, revoked, or
    /// suspended-agent tokens resolve to nothing.
    pub fn resolve_token(&self, token: Uuid) -> Option<Agent> {
        let mut inner = self.write();
        let agent_id = inner
            .tokens
            .values()
            .find(|t| t.token == token && !t.is_expired())
            .map(|t| t.agent_id.clone())?;
        if live_suspension(&mut inner, &agent_id).is_some() {
            return None;
        }
        inner.agents.get(&agent_id).filter(|a| a.active).cloned()
    }

    pub fn revoke_token(&self, agent_id: &str) {
        let mut inner = self.write();
        if inner.tokens.remove(agent_id).is_some() {
            push_activity(
                &mut inner,
                agent_id,
                ActivityRecord::now("revoke_token", true, "token revoked"),
            );
        }
    }

    /// Suspends an agent and revokes its live token in the same write guard.
    pub fn suspend(&self, agent_id: &str, reason: SuspensionReason) -> JanusResult<()> {
        let mut inner = self.write();
        if !inner.agents.contains_key(agent_id) {
            return Err(JanusError::Configuration(format!(
                "unknown agent '{}'",
                agent_id
            )));
        }
        let release_at = match reason {
            SuspensionReason::Manual(_) => None,
            _ => Some(Utc::now() + Duration::seconds(self.config.suspension_release_secs)),
        };
        warn!(
            target: "janus::registry",
            agent_id,
            reason = ?reason,
            auto_release = release_at.is_some(),
            "agent suspended"
        );
        inner.suspensions.insert(
            agent_id.to_string(),
            AgentSuspension {
                reason,
                suspended_at: Utc::now(),
                release_at,
            },
        );
        inner.tokens.remove(agent_id);
        push_activity(
            &mut inner,
            agent_id,
            ActivityRecord::now("suspend", true, "token revoked, agent held"),
        );
        Ok(())
    }

    /// Lifts a suspension. Restricted to the sovereign.
    pub fn reactivate(&self, agent_id: &str, actor: &str) -> JanusResult<()> {
        if actor != SOVEREIGN_ID {
            return Err(JanusError::AuthenticationFailure(format!(
                "'{}' may not reactivate agents; restricted to the sovereign",
                actor
            )));
        }
        let mut inner = self.write();
        inner.suspensions.remove(agent_id);
        inner.recent_failures.remove(agent_id);
        push_activity(
            &mut inner,
            agent_id,
            ActivityRecord::now("reactivate", true, "suspension lifted by sovereign"),
        );
        info!(target: "janus::registry", agent_id, "agent reactivated");
        Ok(())
    }

    /// The current suspension, accounting for auto-release.
    pub fn suspension(&self, agent_id: &str) -> Option<AgentSuspension> {
        live_suspension(&mut self.write(), agent_id)
    }

    pub fn is_suspended(&self, agent_id: &str) -> bool {
        self.suspension(agent_id).is_some()
    }

    /// Marks an agent inactive and revokes its token. Agents are never deleted.
    pub fn deactivate(&self, agent_id: &str) -> JanusResult<()> {
        let mut inner = self.write();
        let agent = inner.agents.get_mut(agent_id).ok_or_else(|| {
            JanusError::Configuration(format!("unknown agent '{}'", agent_id))
        })?;
        agent.active = false;
        inner.tokens.remove(agent_id);
        push_activity(
            &mut inner,
            agent_id,
            ActivityRecord::now("deactivate", true, "agent marked inactive"),
        );
        Ok(())
    }

    /// Records one cross-domain attempt. Suspends the agent unless it is
    /// sovereign-created (still counted and logged). Returns whether the
    /// agent ended up suspended.
    pub fn record_cross_domain_attempt(&self, agent_id: &str) -> bool {
        let mut inner = self.write();
        *inner
            .cross_domain_counts
            .entry(agent_id.to_string())
            .or_insert(0) += 1;
        let exempt = inner
            .agents
            .get(agent_id)
            .map(|a| a.sovereign_created)
            .unwrap_or(false);
        push_activity(
            &mut inner,
            agent_id,
            ActivityRecord::now("cross_domain_attempt", false, "attempt counted"),
        );
        if exempt {
            warn!(
                target: "janus::registry",
                agent_id,
                "cross-domain attempt by sovereign-created agent (logged, not suspended)"
            );
            return false;
        }
        let release_at = Some(Utc::now() + Duration::seconds(self.config.suspension_release_secs));
        inner.suspensions.insert(
            agent_id.to_string(),
            AgentSuspension {
                reason: SuspensionReason::CrossDomainAttempt,
                suspended_at: Utc::now(),
                release_at,
            },
        );
        inner.tokens.remove(agent_id);
        warn!(target: "janus::registry", agent_id, "agent auto-suspended after cross-domain attempt");
        true
    }

    /// Records one failed operation. Exceeding the configured threshold inside
    /// the sliding window auto-suspends the agent. Returns whether it did.
    pub fn record_failure(&self, agent_id: &str) -> bool {
        let now = Utc::now();
        let mut inner = self.write();
        let failures = inner
            .recent_failures
            .entry(agent_id.to_string())
            .or_default();
        failures.push(now);
        failures.retain(|t| now - *t <= failure_window());
        let over = failures.len() as u32 > self.config.failure_suspend_threshold;
        push_activity(
            &mut inner,
            agent_id,
            ActivityRecord::now("operation_failure", false, "failure counted"),
        );
        if !over {
            return false;
        }
        let release_at = Some(now + Duration::seconds(self.config.suspension_release_secs));
        inner.suspensions.insert(
            agent_id.to_string(),
            AgentSuspension {
                reason: SuspensionReason::FailureThreshold,
                suspended_at: now,
                release_at,
            },
        );
        inner.tokens.remove(agent_id);
        warn!(target: "janus::registry", agent_id, "agent auto-suspended after repeated failures");
        true
    }

    /// Appends one record to the agent's activity log.
    pub fn log_activity(&self, agent_id: &str, record: ActivityRecord) {
        push_activity(&mut self.write(), agent_id, record);
    }

    /// Most recent activity, newest last.
    pub fn recent_activity(&self, agent_id: &str, limit: usize) -> Vec<ActivityRecord> {
        let inner = self.read();
        let Some(records) = inner.activity.get(agent_id) else {
            return Vec::new();
        };
        let start = records.len().saturating_sub(limit);
        records[start..].to_vec()
    }

    /// Lifetime cross-domain attempt count for one agent.
    pub fn cross_domain_count(&self, agent_id: &str) -> u32 {
        self.read()
            .cross_domain_counts
            .get(agent_id)
            .copied()
            .unwrap_or(0)
    }
}

/// Returns the still-standing suspension, lazily clearing one whose automatic
/// release time has passed.
fn live_suspension(inner: &mut RegistryInner, agent_id: &str) -> Option<AgentSuspension> {
    let released = inner
        .suspensions
        .get(agent_id)
        .map(|s| s.is_released(Utc::now()))?;
    if released {
        inner.suspensions.remove(agent_id);
        inner.recent_failures.remove(agent_id);
        info!(target: "janus::registry", agent_id, "suspension auto-released");
        return None;
    }
    inner.suspensions.get(agent_id).cloned()
}

fn push_activity(inner: &mut RegistryInner, agent_id: &str, record: ActivityRecord) {
    let log = inner.activity.entry(agent_id.to_string()).or_default();
    log.push(record);
    if log.len() > ACTIVITY_CAP {
        let excess = log.len() - ACTIVITY_CAP;
        log.drain(..excess);
    }
}
