//! Authorization middleware: the single choke point every memory operation
//! must pass through before touching a store.
//!
//! Pipeline: token liveness, rate limit, permission matrix, mode-level
//! isolation re-check, content/embedding validation for writes, then dual
//! audit (registry activity log plus the audit sink).

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::domain::{
    AccessDecision, AccessLogEntry, IsolationViolation, KbType, Mode, Operation, ViolationKind,
    SOVEREIGN_ID,
};
use crate::error::{JanusError, JanusResult};
use crate::events::{EventBus, SecurityAlertEvent};
use crate::isolation::IsolationValidator;
use crate::matrix::AgentPermissionMatrix;
use crate::mode::ModeManager;
use crate::rate_limiter::RateLimiter;
use crate::registry::{ActivityRecord, AgentRegistry};

/// Proof of a completed agent authentication, carried by callers.
#[derive(Debug, Clone)]
pub struct AuthorizedContext {
    /// The principal on whose behalf the agent acts.
    pub entity: String,
    pub agent_id: String,
    pub token: Uuid,
}

impl AuthorizedContext {
    pub fn new(entity: impl Into<String>, agent_id: impl Into<String>, token: Uuid) -> Self {
        Self {
            entity: entity.into(),
            agent_id: agent_id.into(),
            token,
        }
    }

    /// The sovereign context. Token is ignored on the bypass path.
    pub fn sovereign() -> Self {
        Self {
            entity: SOVEREIGN_ID.to_string(),
            agent_id: SOVEREIGN_ID.to_string(),
            token: Uuid::nil(),
        }
    }

    fn is_sovereign(&self) -> bool {
        self.agent_id == SOVEREIGN_ID && self.entity == SOVEREIGN_ID
    }
}

/// One memory operation awaiting authorization.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub kb: KbType,
    pub operation: Operation,
    /// The mode the caller believes is live. Stale values are denied.
    pub declared_mode: Mode,
    /// Content under write, for the placement heuristic.
    pub content: Option<String>,
    /// Embedding under write, checked against the KB's fixed width.
    pub embedding: Option<Vec<f32>>,
}

impl OperationRequest {
    pub fn new(kb: KbType, operation: Operation, declared_mode: Mode) -> Self {
        Self {
            kb,
            operation,
            declared_mode,
            content: None,
            embedding: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Authorization verdict plus the structured error to raise when denied.
pub struct Authorization {
    pub decision: AccessDecision,
    denial: Option<JanusError>,
}

impl Authorization {
    fn allowed(decision: AccessDecision) -> Self {
        Self {
            decision,
            denial: None,
        }
    }

    fn denied(decision: AccessDecision, denial: JanusError) -> Self {
        Self {
            decision,
            denial: Some(denial),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision.allowed
    }

    /// Consumes the verdict, yielding the restrictions on success.
    pub fn into_result(self) -> JanusResult<Vec<String>> {
        match self.denial {
            None => Ok(self.decision.restrictions),
            Some(err) => Err(err),
        }
    }
}

pub struct AgentPermissionMiddleware {
    registry: Arc<AgentRegistry>,
    rate_limiter: Arc<RateLimiter>,
    matrix: Arc<AgentPermissionMatrix>,
    validator: Arc<IsolationValidator>,
    mode_manager: Arc<ModeManager>,
    events: EventBus,
    audit: Arc<dyn AuditSink>,
}

impl AgentPermissionMiddleware {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<AgentRegistry>,
        rate_limiter: Arc<RateLimiter>,
        matrix: Arc<AgentPermissionMatrix>,
        validator: Arc<IsolationValidator>,
        mode_manager: Arc<ModeManager>,
        events: EventBus,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            registry,
            rate_limiter,
            matrix,
            validator,
            mode_manager,
            events,
            audit,
        }
    }

    /// Runs the full authorization pipeline without executing anything.
    pub fn authorize_operation(
        &self,
        ctx: &AuthorizedContext,
        req: &OperationRequest,
    ) -> Authorization {
        if ctx.is_sovereign() {
            let decision = AccessDecision::allow("sovereign override");
            self.audit.log_access(&AccessLogEntry::now(
                &ctx.entity,
                req.kb,
                req.operation,
                self.mode_manager.current_mode(),
                true,
                &decision.reason,
            ));
            return Authorization::allowed(decision);
        }

        // 1. Agent liveness and token binding.
        if let Some(denied) = self.check_liveness(ctx, req) {
            return denied;
        }

        // 2. Rate limit. Counted before the matrix so that hammering a
        // denied operation still burns quota.
        let rate = self.rate_limiter.check_and_count(&ctx.agent_id, req.operation);
        if !rate.allowed {
            let decision = AccessDecision::deny(format!(
                "{} quota exhausted; window resets at {}",
                req.operation,
                rate.reset_at.to_rfc3339()
            ));
            return self.deny(
                ctx,
                req,
                decision,
                JanusError::RateLimited {
                    operation: req.operation,
                    reset_at: rate.reset_at,
                },
            );
        }

        // 3. Permission matrix, with security-alert escalation on
        // cross-domain attempts.
        let outcome = self.matrix.check(&ctx.agent_id, req.kb, req.operation);
        if !outcome.decision.allowed {
            if outcome.cross_domain {
                self.events.emit_security_alert(SecurityAlertEvent::now(
                    &ctx.agent_id,
                    req.kb,
                    req.operation,
                    &outcome.decision.reason,
                    outcome.auto_suspended,
                ));
            }
            let err = if outcome.decision.violation {
                // Matrix denials do not pass through the validator, so the
                // violation log entry is appended here.
                let kind = if outcome.cross_domain {
                    ViolationKind::CrossDomainAccess
                } else {
                    ViolationKind::UnauthorizedMode
                };
                self.validator.record_violation(
                    IsolationViolation::now(&ctx.entity, kind, &outcome.decision.reason)
                        .with_kb(req.kb)
                        .with_operation(req.operation),
                );
                JanusError::IsolationViolation(outcome.decision.reason.clone())
            } else {
                JanusError::AccessDenied {
                    entity: ctx.entity.clone(),
                    operation: req.operation,
                    kb: req.kb,
                    reason: outcome.decision.reason.clone(),
                }
            };
            return self.deny(ctx, req, outcome.decision, err);
        }

        // 4. Mode-level isolation re-check. The matrix trusts the live mode;
        // this catches stale declared modes and in-flight transitions.
        let isolation =
            self.validator
                .validate_access(&ctx.entity, req.kb, req.operation, req.declared_mode);
        if !isolation.allowed {
            let err = JanusError::IsolationViolation(isolation.reason.clone());
            return self.deny(ctx, req, isolation, err);
        }

        // 5. Content and embedding validation for writes.
        if req.operation == Operation::Write {
            if let Some(content) = &req.content {
                let placement =
                    self.validator
                        .validate_memory_placement(&ctx.entity, content, req.kb);
                if !placement.valid {
                    let reason = match placement.suggested_kb {
                        Some(kb) => format!("{}; consider {}", placement.reason, kb),
                        None => placement.reason,
                    };
                    let decision = AccessDecision::deny_violation(reason.clone());
                    return self.deny(ctx, req, decision, JanusError::IsolationViolation(reason));
                }
            }
            if let Some(embedding) = &req.embedding {
                let check =
                    self.validator
                        .validate_embedding_isolation(&ctx.entity, req.kb, embedding);
                if !check.allowed {
                    let err = JanusError::IsolationViolation(check.reason.clone());
                    return self.deny(ctx, req, check, err);
                }
            }
        }

        let mut decision = outcome.decision;
        decision.reason = format!("{}; remaining quota {}", decision.reason, rate.remaining);
        self.log_outcome(ctx, req, &decision);
        debug!(
            target: "janus::middleware",
            agent_id = %ctx.agent_id,
            kb = %req.kb,
            operation = %req.operation,
            "operation authorized"
        );
        Authorization::allowed(decision)
    }

    /// Authorizes and, on success, runs `action`. Action failures are logged
    /// against the agent, counted toward its failure threshold, and
    /// surfaced as an opaque internal error.
    pub async fn execute_with_permissions<T, F, Fut>(
        &self,
        ctx: &AuthorizedContext,
        req: &OperationRequest,
        action: F,
    ) -> JanusResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = JanusResult<T>>,
    {
        let restrictions = self.authorize_operation(ctx, req).into_result()?;
        if !restrictions.is_empty() {
            debug!(
                target: "janus::middleware",
                agent_id = %ctx.agent_id,
                restrictions = ?restrictions,
                "executing with restrictions"
            );
        }
        match action().await {
            Ok(value) => {
                if !ctx.is_sovereign() {
                    self.registry.log_activity(
                        &ctx.agent_id,
                        ActivityRecord::now(req.operation.as_str(), true, "operation completed")
                            .with_kb(req.kb),
                    );
                }
                Ok(value)
            }
            Err(e) => {
                warn!(
                    target: "janus::middleware",
                    agent_id = %ctx.agent_id,
                    kb = %req.kb,
                    operation = %req.operation,
                    error = %e,
                    "operation failed after authorization"
                );
                if !ctx.is_sovereign() {
                    self.registry.log_activity(
                        &ctx.agent_id,
                        ActivityRecord::now(req.operation.as_str(), false, e.to_string())
                            .with_kb(req.kb),
                    );
                    let suspended = self.registry.record_failure(&ctx.agent_id);
                    if suspended {
                        self.events.emit_security_alert(SecurityAlertEvent::now(
                            &ctx.agent_id,
                            req.kb,
                            req.operation,
                            "suspended after repeated operation failures",
                            true,
                        ));
                    }
                }
                // Detail stays in the logs; callers get an opaque failure.
                Err(JanusError::Internal)
            }
        }
    }

    fn check_liveness(
        &self,
        ctx: &AuthorizedContext,
        req: &OperationRequest,
    ) -> Option<Authorization> {
        let reason = match self.registry.get(&ctx.agent_id) {
            None => Some(format!("unknown agent '{}'", ctx.agent_id)),
            Some(agent) if !agent.active => {
                Some(format!("agent '{}' is deactivated", ctx.agent_id))
            }
            Some(_) if self.registry.is_suspended(&ctx.agent_id) => {
                Some(format!("agent '{}' is suspended", ctx.agent_id))
            }
            Some(_) => match self.registry.live_token(&ctx.agent_id) {
                Some(token) if token.token == ctx.token => None,
                Some(_) => Some("presented token is not the agent's live token".to_string()),
                None => Some(format!("agent '{}' holds no live token", ctx.agent_id)),
            },
        };
        reason.map(|reason| {
            let decision = AccessDecision::deny(reason.clone());
            self.deny(
                ctx,
                req,
                decision,
                JanusError::AccessDenied {
                    entity: ctx.entity.clone(),
                    operation: req.operation,
                    kb: req.kb,
                    reason,
                },
            )
        })
    }

    fn deny(
        &self,
        ctx: &AuthorizedContext,
        req: &OperationRequest,
        decision: AccessDecision,
        err: JanusError,
    ) -> Authorization {
        self.log_outcome(ctx, req, &decision);
        Authorization::denied(decision, err)
    }

    /// Dual audit: the registry's per-agent activity log and the audit sink.
    fn log_outcome(&self, ctx: &AuthorizedContext, req: &OperationRequest, decision: &AccessDecision) {
        self.registry.log_activity(
            &ctx.agent_id,
            ActivityRecord::now(req.operation.as_str(), decision.allowed, decision.reason.clone())
                .with_kb(req.kb),
        );
        self.audit.log_access(&AccessLogEntry::now(
            &ctx.entity,
            req.kb,
            req.operation,
            self.mode_manager.current_mode(),
            decision.allowed,
            decision.reason.clone(),
        ));
    }
}
