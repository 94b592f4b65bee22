//! Classification/capability/clearance permission matrix.
//!
//! Layered on top of the isolation validator's mode checks: given
//! (agent, KB, operation) this decides whether the agent itself is allowed,
//! independent of how the request reached us. Cross-domain attempts feed the
//! registry's counter and may auto-suspend the agent on the spot.

use std::sync::Arc;

use tracing::warn;

use crate::config::JanusConfig;
use crate::domain::{AccessDecision, KbType, Operation, PRIMARY_IDENTITY, SOVEREIGN_ID};
use crate::mode::ModeManager;
use crate::registry::{AgentClassification, AgentRegistry};

/// Matrix verdict plus the bookkeeping facts the middleware escalates on.
#[derive(Debug, Clone)]
pub struct MatrixOutcome {
    pub decision: AccessDecision,
    /// True when the denial was a cross-domain attempt.
    pub cross_domain: bool,
    /// True when the registry auto-suspended the agent as a consequence.
    pub auto_suspended: bool,
}

impl MatrixOutcome {
    fn plain(decision: AccessDecision) -> Self {
        Self {
            decision,
            cross_domain: false,
            auto_suspended: false,
        }
    }
}

pub struct AgentPermissionMatrix {
    config: Arc<JanusConfig>,
    registry: Arc<AgentRegistry>,
    mode_manager: Arc<ModeManager>,
}

impl AgentPermissionMatrix {
    pub fn new(
        config: Arc<JanusConfig>,
        registry: Arc<AgentRegistry>,
        mode_manager: Arc<ModeManager>,
    ) -> Self {
        Self {
            config,
            registry,
            mode_manager,
        }
    }

    /// Evaluates (agent, KB, operation) against the matrix.
    pub fn check(&self, agent_id: &str, kb: KbType, operation: Operation) -> MatrixOutcome {
        if agent_id == SOVEREIGN_ID {
            // Universal access; the caller is responsible for logging it.
            return MatrixOutcome::plain(AccessDecision::allow("sovereign override"));
        }

        let Some(agent) = self.registry.get(agent_id) else {
            return MatrixOutcome::plain(AccessDecision::deny(format!(
                "unknown agent '{}'",
                agent_id
            )));
        };
        if !agent.active {
            return MatrixOutcome::plain(AccessDecision::deny(format!(
                "agent '{}' is deactivated",
                agent_id
            )));
        }
        if self.registry.is_suspended(agent_id) {
            return MatrixOutcome::plain(AccessDecision::deny(format!(
                "agent '{}' is suspended",
                agent_id
            )));
        }

        // The agent's classification must match the live operational mode.
        let live_mode = self.mode_manager.current_mode();
        if agent.classification.implied_mode() != live_mode {
            return MatrixOutcome::plain(AccessDecision::deny_violation(format!(
                "{} agent '{}' cannot operate in {} mode",
                agent.classification, agent_id, live_mode
            )));
        }

        // The KB must sit inside the agent's frozen allowed set.
        if !agent.allowed_kbs.contains(&kb) {
            let auto_suspended = self.registry.record_cross_domain_attempt(agent_id);
            warn!(
                target: "janus::matrix",
                agent_id,
                kb = %kb,
                operation = %operation,
                auto_suspended,
                "cross-domain access attempt"
            );
            return MatrixOutcome {
                decision: AccessDecision::deny_violation(format!(
                    "{} is outside the {} classification domain",
                    kb, agent.classification
                )),
                cross_domain: true,
                auto_suspended,
            };
        }

        let decision = match agent.classification {
            AgentClassification::Personal => self.check_personal(&agent, kb, operation),
            AgentClassification::Professional => self.check_professional(&agent, kb, operation),
        };
        MatrixOutcome::plain(decision)
    }

    fn check_personal(
        &self,
        agent: &crate::registry::Agent,
        kb: KbType,
        operation: Operation,
    ) -> AccessDecision {
        if !agent.has_capability(operation) {
            return AccessDecision::deny(format!(
                "capability '{}' not granted to '{}'",
                operation, agent.id
            ));
        }
        // The personal core is never deletable, by anyone but the sovereign.
        if kb == KbType::PersonalCore && operation == Operation::Delete {
            return AccessDecision::deny("the personal core is never deletable");
        }
        if kb == KbType::PersonalCore
            && operation == Operation::Write
            && agent.id != PRIMARY_IDENTITY
        {
            return AccessDecision::deny(format!(
                "the personal core is write-locked to '{}'",
                PRIMARY_IDENTITY
            ));
        }
        if operation == Operation::Delete && agent.id != PRIMARY_IDENTITY {
            return AccessDecision::deny(format!(
                "delete on personal KBs is restricted to '{}'",
                PRIMARY_IDENTITY
            ));
        }
        AccessDecision::allow(format!("capability '{}' granted", operation))
    }

    fn check_professional(
        &self,
        agent: &crate::registry::Agent,
        kb: KbType,
        operation: Operation,
    ) -> AccessDecision {
        // Registration guarantees professional agents carry a clearance.
        let Some(clearance) = agent.clearance else {
            return AccessDecision::deny(format!(
                "professional agent '{}' has no clearance on record",
                agent.id
            ));
        };
        match kb {
            KbType::ProfessionalGeneral => {
                AccessDecision::allow("professional access to the general KB")
            }
            KbType::ProfessionalIntel => {
                if matches!(operation, Operation::Write | Operation::Delete) {
                    if clearance >= self.config.min_intel_clearance {
                        AccessDecision::allow(format!("{} clearance", clearance.as_str()))
                    } else {
                        AccessDecision::deny(format!(
                            "{} on the intel KB requires {} clearance ({} held)",
                            operation,
                            self.config.min_intel_clearance.as_str(),
                            clearance.as_str()
                        ))
                    }
                } else if clearance >= self.config.min_intel_clearance {
                    AccessDecision::allow(format!("{} clearance", clearance.as_str()))
                } else {
                    // Lower tiers may look, with restrictions the caller
                    // must enforce post-hoc.
                    AccessDecision::allow_restricted(
                        format!("{} clearance: restricted intel access", clearance.as_str()),
                        vec!["no-export".to_string(), "read-only".to_string()],
                    )
                }
            }
            KbType::PersonalCore | KbType::PersonalArchive => {
                // Unreachable after the allowed-KB check; kept as a hard stop.
                AccessDecision::deny_violation("professional agent touching a personal KB")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Mode;
    use crate::events::EventBus;
    use crate::mode::SledModeStore;
    use crate::registry::{ClearanceTier, RegistrationRequest};
    use crate::vault::StateVault;
    use std::collections::HashMap;

    struct Harness {
        registry: Arc<AgentRegistry>,
        mode_manager: Arc<ModeManager>,
        matrix: AgentPermissionMatrix,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(JanusConfig::default());
        let store =
            SledModeStore::open(dir.path().join("mode"), StateVault::new(None)).unwrap();
        let mode_manager = Arc::new(
            ModeManager::new(config.clone(), Arc::new(store), EventBus::new()).unwrap(),
        );
        let registry = Arc::new(AgentRegistry::new(config.clone()));
        let matrix =
            AgentPermissionMatrix::new(config, registry.clone(), mode_manager.clone());
        Harness {
            registry,
            mode_manager,
            matrix,
            _dir: dir,
        }
    }

    fn to_professional_mode(h: &Harness) {
        assert!(h.mode_manager.begin_transition());
        h.mode_manager
            .complete_switch("test", Mode::Professional, None)
            .unwrap();
        h.mode_manager.end_transition();
    }

    fn register_personal(h: &Harness, id: &str, capabilities: Vec<Operation>) {
        h.registry
            .register(RegistrationRequest {
                id: id.to_string(),
                classification: AgentClassification::Personal,
                created_by: PRIMARY_IDENTITY.to_string(),
                capabilities,
                clearance: None,
                specialization: None,
                secret: None,
                extensions: HashMap::new(),
            })
            .unwrap();
    }

    fn register_professional(h: &Harness, id: &str, clearance: ClearanceTier) {
        h.registry
            .register(RegistrationRequest {
                id: id.to_string(),
                classification: AgentClassification::Professional,
                created_by: "operations_desk".to_string(),
                capabilities: Vec::new(),
                clearance: Some(clearance),
                specialization: Some("analysis".to_string()),
                secret: None,
                extensions: HashMap::new(),
            })
            .unwrap();
    }

    #[test]
    fn sovereign_always_allowed() {
        let h = harness();
        let out = h
            .matrix
            .check(SOVEREIGN_ID, KbType::ProfessionalIntel, Operation::Delete);
        assert!(out.decision.allowed);
    }

    #[test]
    fn capability_gates_personal_operations() {
        let h = harness();
        register_personal(&h, "scout", vec![Operation::Read]);
        assert!(
            h.matrix
                .check("scout", KbType::PersonalArchive, Operation::Read)
                .decision
                .allowed
        );
        let out = h
            .matrix
            .check("scout", KbType::PersonalArchive, Operation::Write);
        assert!(!out.decision.allowed);
        assert!(!out.decision.violation);
    }

    #[test]
    fn personal_core_is_write_locked_and_never_deletable() {
        let h = harness();
        register_personal(
            &h,
            "scout",
            vec![Operation::Read, Operation::Write, Operation::Delete],
        );
        register_personal(
            &h,
            PRIMARY_IDENTITY,
            vec![Operation::Read, Operation::Write, Operation::Delete],
        );

        assert!(
            !h.matrix
                .check("scout", KbType::PersonalCore, Operation::Write)
                .decision
                .allowed
        );
        assert!(
            h.matrix
                .check(PRIMARY_IDENTITY, KbType::PersonalCore, Operation::Write)
                .decision
                .allowed
        );
        // Not even the primary identity deletes the core.
        assert!(
            !h.matrix
                .check(PRIMARY_IDENTITY, KbType::PersonalCore, Operation::Delete)
                .decision
                .allowed
        );
        // Archive deletes are primary-identity only.
        assert!(
            !h.matrix
                .check("scout", KbType::PersonalArchive, Operation::Delete)
                .decision
                .allowed
        );
        assert!(
            h.matrix
                .check(PRIMARY_IDENTITY, KbType::PersonalArchive, Operation::Delete)
                .decision
                .allowed
        );
    }

    #[test]
    fn cross_domain_attempt_is_violation_and_suspends() {
        let h = harness();
        register_personal(&h, "scout", vec![Operation::Read]);
        let out = h
            .matrix
            .check("scout", KbType::ProfessionalGeneral, Operation::Read);
        assert!(!out.decision.allowed);
        assert!(out.decision.violation);
        assert!(out.cross_domain);
        assert!(out.auto_suspended);
        assert!(h.registry.is_suspended("scout"));
    }

    #[test]
    fn classification_must_match_live_mode() {
        let h = harness();
        register_professional(&h, "analyst", ClearanceTier::Director);
        // Still in personal mode: professional agents cannot operate.
        let out = h
            .matrix
            .check("analyst", KbType::ProfessionalGeneral, Operation::Read);
        assert!(!out.decision.allowed);
        assert!(out.decision.violation);

        to_professional_mode(&h);
        assert!(
            h.matrix
                .check("analyst", KbType::ProfessionalGeneral, Operation::Read)
                .decision
                .allowed
        );
    }

    #[test]
    fn intel_writes_require_director_clearance() {
        let h = harness();
        register_professional(&h, "junior", ClearanceTier::Standard);
        register_professional(&h, "director", ClearanceTier::Director);
        to_professional_mode(&h);

        assert!(
            !h.matrix
                .check("junior", KbType::ProfessionalIntel, Operation::Write)
                .decision
                .allowed
        );
        assert!(
            h.matrix
                .check("director", KbType::ProfessionalIntel, Operation::Write)
                .decision
                .allowed
        );
    }

    #[test]
    fn lower_tiers_read_intel_with_surfaced_restrictions() {
        let h = harness();
        register_professional(&h, "junior", ClearanceTier::Elevated);
        to_professional_mode(&h);

        let out = h
            .matrix
            .check("junior", KbType::ProfessionalIntel, Operation::Read);
        assert!(out.decision.allowed);
        assert!(out.decision.restrictions.contains(&"no-export".to_string()));
        assert!(out.decision.restrictions.contains(&"read-only".to_string()));
    }
}
