//! Mode-level isolation enforcement.
//!
//! The validator answers one question: given who is asking, which KB, which
//! operation, and which mode the caller believes is live, may the access
//! proceed? It keeps a bounded ring of recent decisions and an append-only
//! violation log, mirrors both into the audit sink, and publishes violations
//! on the event bus.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audit::AuditSink;
use crate::config::JanusConfig;
use crate::domain::{
    AccessDecision, AccessLogEntry, IsolationViolation, KbType, Mode, Operation, ViolationKind,
    SOVEREIGN_ID,
};
use crate::events::EventBus;
use crate::mode::ModeManager;

/// Content markers that strongly suggest a domain. Matched case-insensitively
/// as substrings; a draft heuristic, deliberately conservative.
static PERSONAL_MARKERS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "my family",
        "my health",
        "my therapist",
        "my diary",
        "personal journal",
        "my partner",
        "my medication",
        "childhood memory",
    ]
});

static PROFESSIONAL_MARKERS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "quarterly report",
        "client engagement",
        "invoice",
        "stakeholder",
        "deliverable",
        "contract terms",
        "competitor analysis",
        "meeting minutes",
    ]
});

/// Verdict of the content placement heuristic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementDecision {
    pub valid: bool,
    pub reason: String,
    /// Where the content appears to belong when `valid` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_kb: Option<KbType>,
    /// The markers that drove the verdict.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matched: Vec<String>,
}

/// Point-in-time health summary of the isolation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub generated_at: DateTime<Utc>,
    pub recent_access_entries: usize,
    pub recent_allowed: usize,
    pub recent_denied: usize,
    pub total_violations: usize,
    pub violations_by_kind: HashMap<String, usize>,
    pub last_violation_at: Option<DateTime<Utc>>,
}

pub struct IsolationValidator {
    config: Arc<JanusConfig>,
    mode_manager: Arc<ModeManager>,
    events: EventBus,
    audit: Arc<dyn AuditSink>,
    recent_access: Mutex<VecDeque<AccessLogEntry>>,
    violations: Mutex<Vec<IsolationViolation>>,
}

impl IsolationValidator {
    pub fn new(
        config: Arc<JanusConfig>,
        mode_manager: Arc<ModeManager>,
        events: EventBus,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            mode_manager,
            events,
            audit,
            recent_access: Mutex::new(VecDeque::new()),
            violations: Mutex::new(Vec::new()),
        }
    }

    /// Central mode-level access check. The decision ordering is load-bearing:
    /// sovereign override short-circuits everything, including the
    /// transition block; declared-mode mismatch is checked before the
    /// transition state so that callers holding a stale mode learn the
    /// real cause of their denial.
    ///
    /// Agent-level rules live in the permission matrix; the middleware runs
    /// both layers and feeds matrix violation denials back through
    /// [`IsolationValidator::record_violation`] so the violation log stays
    /// the single source of truth.
    pub fn validate_access(
        &self,
        entity: &str,
        kb: KbType,
        operation: Operation,
        declared_mode: Mode,
    ) -> AccessDecision {
        let live_mode = self.mode_manager.current_mode();

        if entity == SOVEREIGN_ID {
            let decision = AccessDecision::allow("sovereign override");
            self.log_decision(entity, kb, operation, live_mode, &decision);
            return decision;
        }

        if declared_mode != live_mode {
            let decision = AccessDecision::deny_violation(format!(
                "declared mode {} does not match live mode {}",
                declared_mode, live_mode
            ));
            self.record_violation(
                IsolationViolation::now(entity, ViolationKind::UnauthorizedMode, &decision.reason)
                    .with_kb(kb)
                    .with_operation(operation),
            );
            self.log_decision(entity, kb, operation, live_mode, &decision);
            return decision;
        }

        if live_mode == Mode::Transitioning {
            let decision =
                AccessDecision::deny_violation("all access is blocked while a mode switch is in flight");
            self.record_violation(
                IsolationViolation::now(entity, ViolationKind::TransitionInFlight, &decision.reason)
                    .with_kb(kb)
                    .with_operation(operation),
            );
            self.log_decision(entity, kb, operation, live_mode, &decision);
            return decision;
        }

        if !self.mode_manager.mode_allows(live_mode, kb) {
            let decision = AccessDecision::deny_violation(format!(
                "{} is not reachable from {} mode",
                kb, live_mode
            ));
            self.record_violation(
                IsolationViolation::now(entity, ViolationKind::CrossDomainAccess, &decision.reason)
                    .with_kb(kb)
                    .with_operation(operation),
            );
            self.log_decision(entity, kb, operation, live_mode, &decision);
            return decision;
        }

        // Redundant with the access table today; kept so a future table edit
        // cannot silently open a cross-domain hole.
        if live_mode.domain() != Some(kb.domain()) {
            let decision = AccessDecision::deny_violation(format!(
                "{} sits in the {} domain but the live mode is {}",
                kb,
                kb.domain(),
                live_mode
            ));
            self.record_violation(
                IsolationViolation::now(entity, ViolationKind::CrossDomainAccess, &decision.reason)
                    .with_kb(kb)
                    .with_operation(operation),
            );
            self.log_decision(entity, kb, operation, live_mode, &decision);
            return decision;
        }

        let decision = AccessDecision::allow(format!("{} access permitted in {} mode", kb, live_mode));
        self.log_decision(entity, kb, operation, live_mode, &decision);
        decision
    }

    /// Pre-flight check for a mode switch request. Advisory; the switcher
    /// owns the authoritative in-flight flag.
    pub fn validate_mode_switch(&self, entity: &str, target: Mode) -> AccessDecision {
        let current = self.mode_manager.current_mode();
        if target == Mode::Transitioning {
            return AccessDecision::deny("transitioning is not a requestable target");
        }
        if current == Mode::Transitioning {
            return AccessDecision::deny("a mode switch is already in flight");
        }
        if target == current {
            return AccessDecision::deny(format!("already in {} mode", current));
        }
        let needs_auth =
            current == Mode::Personal && target == Mode::Professional && entity != SOVEREIGN_ID;
        if needs_auth {
            AccessDecision::allow("switch permitted subject to authentication")
        } else {
            AccessDecision::allow("switch permitted")
        }
    }

    /// Heuristic check that `content` belongs in `target_kb`'s domain. A
    /// mismatch is recorded as a violation and yields a suggested KB in the
    /// other domain.
    pub fn validate_memory_placement(
        &self,
        entity: &str,
        content: &str,
        target_kb: KbType,
    ) -> PlacementDecision {
        let haystack = content.to_lowercase();
        let personal_hits: Vec<String> = PERSONAL_MARKERS
            .iter()
            .filter(|m| haystack.contains(*m))
            .map(|m| m.to_string())
            .collect();
        let professional_hits: Vec<String> = PROFESSIONAL_MARKERS
            .iter()
            .filter(|m| haystack.contains(*m))
            .map(|m| m.to_string())
            .collect();

        let target_domain = target_kb.domain();
        let (foreign_hits, native_hits, suggested) = match target_domain {
            crate::domain::Domain::Personal => (
                professional_hits,
                personal_hits,
                KbType::ProfessionalGeneral,
            ),
            crate::domain::Domain::Professional => {
                (personal_hits, professional_hits, KbType::PersonalArchive)
            }
        };

        if foreign_hits.len() > native_hits.len() {
            let reason = format!(
                "content reads as {} material but targets {}",
                suggested.domain(),
                target_kb
            );
            self.record_violation(
                IsolationViolation::now(entity, ViolationKind::MisplacedContent, &reason)
                    .with_kb(target_kb),
            );
            return PlacementDecision {
                valid: false,
                reason,
                suggested_kb: Some(suggested),
                matched: foreign_hits,
            };
        }
        debug!(
            target: "janus::isolation",
            entity,
            kb = %target_kb,
            markers = native_hits.len(),
            "placement accepted"
        );
        PlacementDecision {
            valid: true,
            reason: "content is consistent with the target KB".to_string(),
            suggested_kb: None,
            matched: native_hits,
        }
    }

    /// Each domain has a fixed embedding width; a vector of any other width
    /// came from the wrong embedding model and is rejected outright.
    pub fn validate_embedding_isolation(
        &self,
        entity: &str,
        kb: KbType,
        embedding: &[f32],
    ) -> AccessDecision {
        let expected = kb.embedding_dim();
        if embedding.len() == expected {
            return AccessDecision::allow(format!("{}-dim embedding matches {}", expected, kb));
        }
        let decision = AccessDecision::deny_violation(format!(
            "{} expects {}-dim embeddings, got {}",
            kb,
            expected,
            embedding.len()
        ));
        self.record_violation(
            IsolationViolation::now(entity, ViolationKind::EmbeddingMismatch, &decision.reason)
                .with_kb(kb),
        );
        decision
    }

    /// Summarizes the in-memory logs. Cheap enough to expose on demand.
    pub fn integrity_report(&self) -> IntegrityReport {
        let recent = self.recent_access.lock().unwrap_or_else(|p| p.into_inner());
        let violations = self.violations.lock().unwrap_or_else(|p| p.into_inner());
        let mut by_kind: HashMap<String, usize> = HashMap::new();
        for v in violations.iter() {
            *by_kind.entry(v.kind.as_str().to_string()).or_default() += 1;
        }
        IntegrityReport {
            generated_at: Utc::now(),
            recent_access_entries: recent.len(),
            recent_allowed: recent.iter().filter(|e| e.allowed).count(),
            recent_denied: recent.iter().filter(|e| !e.allowed).count(),
            total_violations: violations.len(),
            violations_by_kind: by_kind,
            last_violation_at: violations.last().map(|v| v.timestamp),
        }
    }

    /// Most recent decisions, newest last.
    pub fn recent_access(&self, limit: usize) -> Vec<AccessLogEntry> {
        let recent = self.recent_access.lock().unwrap_or_else(|p| p.into_inner());
        recent
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    pub fn violations(&self) -> Vec<IsolationViolation> {
        self.violations
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn log_decision(
        &self,
        entity: &str,
        kb: KbType,
        operation: Operation,
        mode: Mode,
        decision: &AccessDecision,
    ) {
        let entry = AccessLogEntry::now(
            entity,
            kb,
            operation,
            mode,
            decision.allowed,
            decision.reason.clone(),
        );
        self.audit.log_access(&entry);
        let mut recent = self.recent_access.lock().unwrap_or_else(|p| p.into_inner());
        if recent.len() >= self.config.recent_access_capacity {
            recent.pop_front();
        }
        recent.push_back(entry);
    }

    /// Appends to the violation log, mirrors into the audit sink, and
    /// publishes on the event bus. Also the ingress for violations raised by
    /// collaborating layers, such as the permission matrix's denials.
    pub(crate) fn record_violation(&self, violation: IsolationViolation) {
        warn!(
            target: "janus::isolation",
            entity = %violation.entity,
            kind = violation.kind.as_str(),
            detail = %violation.detail,
            "isolation violation"
        );
        self.audit.log_violation(&violation);
        self.events.emit_violation(violation.clone());
        self.violations
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(violation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::TracingAuditSink;
    use crate::mode::SledModeStore;
    use crate::vault::StateVault;

    struct Harness {
        mode_manager: Arc<ModeManager>,
        validator: IsolationValidator,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(JanusConfig::default());
        let store =
            SledModeStore::open(dir.path().join("mode"), StateVault::new(None)).unwrap();
        let events = EventBus::new();
        let mode_manager = Arc::new(
            ModeManager::new(config.clone(), Arc::new(store), events.clone()).unwrap(),
        );
        let validator = IsolationValidator::new(
            config,
            mode_manager.clone(),
            events,
            Arc::new(TracingAuditSink),
        );
        Harness {
            mode_manager,
            validator,
            _dir: dir,
        }
    }

    #[test]
    fn sovereign_bypasses_every_check() {
        let h = harness();
        assert!(h.mode_manager.begin_transition());
        // Mid-transition, cross-domain target: still allowed.
        let d = h.validator.validate_access(
            SOVEREIGN_ID,
            KbType::ProfessionalIntel,
            Operation::Delete,
            Mode::Personal,
        );
        assert!(d.allowed);
        assert!(h.validator.violations().is_empty());
        h.mode_manager.end_transition();
    }

    #[test]
    fn declared_mode_mismatch_is_unauthorized_mode() {
        let h = harness();
        let d = h.validator.validate_access(
            "someone",
            KbType::PersonalArchive,
            Operation::Read,
            Mode::Professional,
        );
        assert!(!d.allowed);
        assert!(d.violation);
        let violations = h.validator.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::UnauthorizedMode);
    }

    #[test]
    fn transition_blocks_non_sovereign_access() {
        let h = harness();
        assert!(h.mode_manager.begin_transition());
        let d = h.validator.validate_access(
            "someone",
            KbType::PersonalArchive,
            Operation::Read,
            Mode::Transitioning,
        );
        assert!(!d.allowed);
        assert_eq!(
            h.validator.violations()[0].kind,
            ViolationKind::TransitionInFlight
        );
        h.mode_manager.end_transition();
    }

    #[test]
    fn cross_domain_kb_denied_in_personal_mode() {
        let h = harness();
        let d = h.validator.validate_access(
            "someone",
            KbType::ProfessionalGeneral,
            Operation::Read,
            Mode::Personal,
        );
        assert!(!d.allowed);
        assert_eq!(
            h.validator.violations()[0].kind,
            ViolationKind::CrossDomainAccess
        );
    }

    #[test]
    fn in_domain_access_allowed_and_logged() {
        let h = harness();
        let d = h.validator.validate_access(
            "someone",
            KbType::PersonalCore,
            Operation::Read,
            Mode::Personal,
        );
        assert!(d.allowed);
        let recent = h.validator.recent_access(10);
        assert_eq!(recent.len(), 1);
        assert!(recent[0].allowed);
    }

    #[test]
    fn recent_access_ring_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(JanusConfig {
            recent_access_capacity: 3,
            ..JanusConfig::default()
        });
        let store =
            SledModeStore::open(dir.path().join("mode"), StateVault::new(None)).unwrap();
        let events = EventBus::new();
        let mode_manager = Arc::new(
            ModeManager::new(config.clone(), Arc::new(store), events.clone()).unwrap(),
        );
        let validator = IsolationValidator::new(
            config,
            mode_manager,
            events,
            Arc::new(TracingAuditSink),
        );
        for i in 0..10 {
            validator.validate_access(
                &format!("entity-{}", i),
                KbType::PersonalArchive,
                Operation::Read,
                Mode::Personal,
            );
        }
        let recent = validator.recent_access(100);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[2].entity, "entity-9");
    }

    #[test]
    fn misplaced_professional_content_flagged_with_suggestion() {
        let h = harness();
        let p = h.validator.validate_memory_placement(
            "someone",
            "Draft the quarterly report for the stakeholder review",
            KbType::PersonalArchive,
        );
        assert!(!p.valid);
        assert_eq!(p.suggested_kb, Some(KbType::ProfessionalGeneral));
        assert_eq!(
            h.validator.violations()[0].kind,
            ViolationKind::MisplacedContent
        );
    }

    #[test]
    fn neutral_content_placement_accepted() {
        let h = harness();
        let p = h.validator.validate_memory_placement(
            "someone",
            "Remember to water the plants on Tuesday",
            KbType::PersonalArchive,
        );
        assert!(p.valid);
        assert!(p.suggested_kb.is_none());
    }

    #[test]
    fn embedding_dimension_must_match_domain() {
        let h = harness();
        let ok = h
            .validator
            .validate_embedding_isolation("someone", KbType::PersonalCore, &vec![0.0; 384]);
        assert!(ok.allowed);
        let bad = h
            .validator
            .validate_embedding_isolation("someone", KbType::PersonalCore, &vec![0.0; 768]);
        assert!(!bad.allowed);
        assert_eq!(
            h.validator.violations()[0].kind,
            ViolationKind::EmbeddingMismatch
        );
    }

    #[test]
    fn integrity_report_counts_by_kind() {
        let h = harness();
        h.validator.validate_access(
            "a",
            KbType::PersonalCore,
            Operation::Read,
            Mode::Personal,
        );
        h.validator.validate_access(
            "b",
            KbType::ProfessionalGeneral,
            Operation::Read,
            Mode::Personal,
        );
        h.validator
            .validate_embedding_isolation("c", KbType::PersonalCore, &[0.0; 10]);
        let report = h.validator.integrity_report();
        assert_eq!(report.recent_access_entries, 2);
        assert_eq!(report.recent_allowed, 1);
        assert_eq!(report.recent_denied, 1);
        assert_eq!(report.total_violations, 2);
        assert_eq!(report.violations_by_kind["cross_domain_access"], 1);
        assert_eq!(report.violations_by_kind["embedding_mismatch"], 1);
        assert!(report.last_violation_at.is_some());
    }

    #[test]
    fn mode_switch_preflight_rejects_noop_and_transitioning_target() {
        let h = harness();
        assert!(
            !h.validator
                .validate_mode_switch("someone", Mode::Personal)
                .allowed
        );
        assert!(
            !h.validator
                .validate_mode_switch("someone", Mode::Transitioning)
                .allowed
        );
        assert!(
            h.validator
                .validate_mode_switch("someone", Mode::Professional)
                .allowed
        );
    }
}
