//! Agent records: classification, capabilities, clearance, tokens, suspensions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Domain, KbType, Mode, Operation};

/// The two immutable agent classifications. Fixed at registration; an agent's
/// classification fixes its reachable KB set for life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentClassification {
    Personal,
    Professional,
}

impl AgentClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentClassification::Personal => "personal",
            AgentClassification::Professional => "professional",
        }
    }

    #[inline]
    pub fn domain(&self) -> Domain {
        match self {
            AgentClassification::Personal => Domain::Personal,
            AgentClassification::Professional => Domain::Professional,
        }
    }

    /// The operational mode this classification implies. An agent may only
    /// operate while the live mode equals this.
    #[inline]
    pub fn implied_mode(&self) -> Mode {
        self.domain().implied_mode()
    }

    /// The immutable allowed-KB set assigned at registration.
    pub fn allowed_kbs(&self) -> Vec<KbType> {
        match self {
            AgentClassification::Personal => {
                vec![KbType::PersonalCore, KbType::PersonalArchive]
            }
            AgentClassification::Professional => {
                vec![KbType::ProfessionalGeneral, KbType::ProfessionalIntel]
            }
        }
    }
}

impl std::fmt::Display for AgentClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clearance tier for professional agents, gating write/delete on the
/// restricted intelligence KB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearanceTier {
    Standard,
    Elevated,
    Director,
}

impl ClearanceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClearanceTier::Standard => "standard",
            ClearanceTier::Elevated => "elevated",
            ClearanceTier::Director => "director",
        }
    }
}

/// A principal acting on memory. Never deleted, only deactivated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    /// Immutable for the life of the agent.
    pub classification: AgentClassification,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// Per-operation capability grants. Required for Personal agents; ignored
    /// for Professional ones, whose access is clearance-gated.
    #[serde(default)]
    pub capabilities: Vec<Operation>,
    /// Required for Professional agents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clearance: Option<ClearanceTier>,
    /// Required for Professional agents (e.g. "market_research").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialization: Option<String>,
    pub active: bool,
    /// Frozen copy of the classification's KB set at registration time.
    pub allowed_kbs: Vec<KbType>,
    /// True when the sovereign registered this agent: long-lived tokens and
    /// exemption from automatic cross-domain suspension.
    pub sovereign_created: bool,
    /// Open string-to-string extension map for integration metadata.
    #[serde(default)]
    pub extensions: HashMap<String, String>,
}

impl Agent {
    pub fn has_capability(&self, operation: Operation) -> bool {
        self.capabilities.contains(&operation)
    }
}

/// A time-boxed credential. Exactly one live token per agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentToken {
    pub token: Uuid,
    pub agent_id: String,
    pub classification: AgentClassification,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// True for tokens issued to sovereign-created agents.
    pub override_access: bool,
}

impl AgentToken {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Why an agent was suspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspensionReason {
    /// Manual hold; never auto-released.
    Manual(String),
    /// One attempted cross-domain access.
    CrossDomainAttempt,
    /// Too many failures inside the sliding activity window.
    FailureThreshold,
}

/// A punitive hold on an agent. Auto-release applies to all but manual holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSuspension {
    pub reason: SuspensionReason,
    pub suspended_at: DateTime<Utc>,
    /// Absent for manual suspensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_at: Option<DateTime<Utc>>,
}

impl AgentSuspension {
    /// True when the hold has passed its automatic release time.
    pub fn is_released(&self, now: DateTime<Utc>) -> bool {
        matches!(self.release_at, Some(at) if now >= at)
    }
}

/// One entry in an agent's append-only activity log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kb: Option<KbType>,
    pub success: bool,
    pub detail: String,
}

impl ActivityRecord {
    pub fn now(action: impl Into<String>, success: bool, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            kb: None,
            success,
            detail: detail.into(),
        }
    }

    pub fn with_kb(mut self, kb: KbType) -> Self {
        self.kb = Some(kb);
        self
    }
}

/// Registration input, validated by the registry before an [`Agent`] exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub id: String,
    pub classification: AgentClassification,
    pub created_by: String,
    #[serde(default)]
    pub capabilities: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clearance: Option<ClearanceTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialization: Option<String>,
    /// Shared secret for ordinary authentication. Sovereign-created agents
    /// may omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default)]
    pub extensions: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_implies_mode_and_kbs() {
        assert_eq!(
            AgentClassification::Personal.implied_mode(),
            Mode::Personal
        );
        assert_eq!(
            AgentClassification::Professional.allowed_kbs(),
            vec![KbType::ProfessionalGeneral, KbType::ProfessionalIntel]
        );
    }

    #[test]
    fn clearance_tiers_are_ordered() {
        assert!(ClearanceTier::Director > ClearanceTier::Elevated);
        assert!(ClearanceTier::Elevated > ClearanceTier::Standard);
    }

    #[test]
    fn manual_suspension_never_releases() {
        let s = AgentSuspension {
            reason: SuspensionReason::Manual("policy review".to_string()),
            suspended_at: Utc::now(),
            release_at: None,
        };
        assert!(!s.is_released(Utc::now() + chrono::Duration::days(365)));
    }

    #[test]
    fn automatic_suspension_releases_after_deadline() {
        let now = Utc::now();
        let s = AgentSuspension {
            reason: SuspensionReason::CrossDomainAttempt,
            suspended_at: now,
            release_at: Some(now + chrono::Duration::hours(1)),
        };
        assert!(!s.is_released(now));
        assert!(s.is_released(now + chrono::Duration::hours(2)));
    }
}
