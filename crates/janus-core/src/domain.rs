//! Shared domain types: partitions, modes, operations, and audit records.
//!
//! ## Dual-Domain Memory Map
//!
//! | KB                  | Domain       | Embedding | Access rules                                  |
//! |---------------------|--------------|-----------|-----------------------------------------------|
//! | PersonalCore        | Personal     | 384       | Write-locked to the primary identity; never deletable |
//! | PersonalArchive     | Personal     | 384       | Per-capability; delete restricted to primary identity |
//! | ProfessionalGeneral | Professional | 768       | Unrestricted read for professional agents     |
//! | ProfessionalIntel   | Professional | 768       | Write/delete at top clearance only            |
//!
//! The two domains never share a KB, a mode, or an embedding dimensionality.
//! Cross-domain access is always a logged violation unless the actor is the
//! Sovereign (the override principal).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The override principal. Bypasses every restriction; never exempt from logging.
pub const SOVEREIGN_ID: &str = "sovereign";

/// The primary personal identity. The only entity allowed to write
/// `PersonalCore` or delete from any personal KB.
pub const PRIMARY_IDENTITY: &str = "primary_identity";

/// Embedding dimensionality for personal-domain KBs
/// (sentence-transformers/all-MiniLM-L6-v2).
pub const PERSONAL_EMBEDDING_DIM: usize = 384;

/// Embedding dimensionality for professional-domain KBs (all-mpnet-base-v2).
pub const PROFESSIONAL_EMBEDDING_DIM: usize = 768;

/// One of the two disjoint memory domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Personal,
    Professional,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Personal => "personal",
            Domain::Professional => "professional",
        }
    }

    /// Fixed vector dimensionality for this domain. A vector of the wrong
    /// length is silent cross-domain ingestion and must be rejected.
    #[inline]
    pub fn embedding_dim(&self) -> usize {
        match self {
            Domain::Personal => PERSONAL_EMBEDDING_DIM,
            Domain::Professional => PROFESSIONAL_EMBEDDING_DIM,
        }
    }

    /// The operating mode that grants access to this domain.
    #[inline]
    pub fn implied_mode(&self) -> Mode {
        match self {
            Domain::Personal => Mode::Personal,
            Domain::Professional => Mode::Professional,
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Knowledge Base type: a named, domain-tagged memory partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KbType {
    /// Identity, preferences, life anchors. Write-locked to the primary
    /// personal identity and never deletable.
    PersonalCore,
    /// Journal, history, personal notes.
    PersonalArchive,
    /// Work context, projects, contacts. Unrestricted professional read.
    ProfessionalGeneral,
    /// Restricted intelligence. Write/delete only at top clearance.
    ProfessionalIntel,
}

/// All KB partitions, in slot order.
pub const ALL_KBS: [KbType; 4] = [
    KbType::PersonalCore,
    KbType::PersonalArchive,
    KbType::ProfessionalGeneral,
    KbType::ProfessionalIntel,
];

impl KbType {
    /// The fixed domain this KB belongs to. Immutable for the life of the system.
    #[inline]
    pub fn domain(&self) -> Domain {
        match self {
            KbType::PersonalCore | KbType::PersonalArchive => Domain::Personal,
            KbType::ProfessionalGeneral | KbType::ProfessionalIntel => Domain::Professional,
        }
    }

    /// Human-readable label for logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            KbType::PersonalCore => "Personal Core (Identity)",
            KbType::PersonalArchive => "Personal Archive (Journal)",
            KbType::ProfessionalGeneral => "Professional General (Work)",
            KbType::ProfessionalIntel => "Professional Intel (Restricted)",
        }
    }

    /// Internal sled tree name for this KB.
    pub fn tree_name(&self) -> &'static str {
        match self {
            KbType::PersonalCore => "kb_personal_core",
            KbType::PersonalArchive => "kb_personal_archive",
            KbType::ProfessionalGeneral => "kb_professional_general",
            KbType::ProfessionalIntel => "kb_professional_intel",
        }
    }

    /// Expected vector length for content stored in this KB.
    #[inline]
    pub fn embedding_dim(&self) -> usize {
        self.domain().embedding_dim()
    }
}

impl std::fmt::Display for KbType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A single memory operation kind, used for capabilities and quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Read,
    Write,
    Delete,
    Search,
}

/// All operation kinds, for quota tables and capability grants.
pub const ALL_OPERATIONS: [Operation; 4] = [
    Operation::Read,
    Operation::Write,
    Operation::Delete,
    Operation::Search,
];

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Delete => "delete",
            Operation::Search => "search",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The system-wide operating context.
///
/// `Transitioning` is transient: it exists only while a mode switch is in
/// flight and is never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Initial and default mode on cold boot and after session expiry.
    #[default]
    Personal,
    Professional,
    /// A mode switch is in flight. No KB access is authoritative-mode-consistent.
    Transitioning,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Personal => "personal",
            Mode::Professional => "professional",
            Mode::Transitioning => "transitioning",
        }
    }

    /// The domain reachable in this mode, if any.
    #[inline]
    pub fn domain(&self) -> Option<Domain> {
        match self {
            Mode::Personal => Some(Domain::Personal),
            Mode::Professional => Some(Domain::Professional),
            Mode::Transitioning => None,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a logged isolation violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Caller's declared mode disagrees with the authoritative mode.
    UnauthorizedMode,
    /// Access to a KB outside the actor's or mode's domain.
    CrossDomainAccess,
    /// Access attempted while a mode switch was in flight.
    TransitionInFlight,
    /// Agent classification disagrees with the live operational mode.
    ClassificationMismatch,
    /// Vector dimensionality disagrees with the KB's domain.
    EmbeddingMismatch,
    /// Content whose domain markers disagree with the target KB.
    MisplacedContent,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::UnauthorizedMode => "unauthorized_mode",
            ViolationKind::CrossDomainAccess => "cross_domain_access",
            ViolationKind::TransitionInFlight => "transition_in_flight",
            ViolationKind::ClassificationMismatch => "classification_mismatch",
            ViolationKind::EmbeddingMismatch => "embedding_mismatch",
            ViolationKind::MisplacedContent => "misplaced_content",
        }
    }
}

/// Result of a single authorization check. Ephemeral, returned per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDecision {
    /// Whether the operation may proceed.
    pub allowed: bool,
    /// Human-readable reason, always populated.
    pub reason: String,
    /// True when the denial was recorded as an isolation violation.
    pub violation: bool,
    /// Post-hoc restrictions the caller must enforce (e.g. "no-export",
    /// "read-only"). Only meaningful on allowed decisions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restrictions: Vec<String>,
}

impl AccessDecision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            violation: false,
            restrictions: Vec::new(),
        }
    }

    pub fn allow_restricted(reason: impl Into<String>, restrictions: Vec<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            violation: false,
            restrictions,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            violation: false,
            restrictions: Vec::new(),
        }
    }

    pub fn deny_violation(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            violation: true,
            restrictions: Vec::new(),
        }
    }
}

/// Append-only record of one authorization outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub timestamp: DateTime<Utc>,
    pub entity: String,
    pub kb: KbType,
    pub operation: Operation,
    pub mode: Mode,
    pub allowed: bool,
    pub reason: String,
}

impl AccessLogEntry {
    pub fn now(
        entity: impl Into<String>,
        kb: KbType,
        operation: Operation,
        mode: Mode,
        allowed: bool,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            entity: entity.into(),
            kb,
            operation,
            mode,
            allowed,
            reason: reason.into(),
        }
    }
}

/// Append-only record of an attempted or realized cross-domain access.
/// Never purged by normal operation; the audit source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationViolation {
    pub timestamp: DateTime<Utc>,
    pub entity: String,
    pub kind: ViolationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kb: Option<KbType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    pub detail: String,
}

impl IsolationViolation {
    pub fn now(entity: impl Into<String>, kind: ViolationKind, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            entity: entity.into(),
            kind,
            kb: None,
            operation: None,
            detail: detail.into(),
        }
    }

    pub fn with_kb(mut self, kb: KbType) -> Self {
        self.kb = Some(kb);
        self
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }
}
