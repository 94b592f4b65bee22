//! Assembled isolation core.
//!
//! [`JanusContext`] wires every subsystem together with a shared config and
//! event bus. Construction is fail-fast: a bad config or an unopenable state
//! store is an error at build time, never at first use.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::audit::{AuditSink, SledAuditSink, TracingAuditSink};
use crate::config::JanusConfig;
use crate::error::{JanusError, JanusResult};
use crate::events::EventBus;
use crate::isolation::IsolationValidator;
use crate::matrix::AgentPermissionMatrix;
use crate::middleware::AgentPermissionMiddleware;
use crate::mode::{
    ModeAuthenticationManager, ModeManager, ModeStatePersistence, ModeSwitcher, ModeVerifier,
    OverrideVerifier, SledModeStore,
};
use crate::rate_limiter::RateLimiter;
use crate::registry::{AgentAuthenticationManager, AgentRegistry, RegistrationRequest};
use crate::vault::StateVault;

/// Every subsystem of the isolation core, fully wired.
pub struct JanusContext {
    pub config: Arc<JanusConfig>,
    pub events: EventBus,
    pub registry: Arc<AgentRegistry>,
    pub agent_auth: Arc<AgentAuthenticationManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub mode_manager: Arc<ModeManager>,
    pub switcher: Arc<ModeSwitcher>,
    pub matrix: Arc<AgentPermissionMatrix>,
    pub validator: Arc<IsolationValidator>,
    pub middleware: Arc<AgentPermissionMiddleware>,
    pub audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for JanusContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JanusContext").finish_non_exhaustive()
    }
}

impl JanusContext {
    pub fn builder() -> JanusContextBuilder {
        JanusContextBuilder::default()
    }

    /// Registers an agent and, when the request carries a secret, enrolls it
    /// with the authentication manager in the same step.
    pub fn register_agent(&self, request: RegistrationRequest) -> JanusResult<crate::registry::Agent> {
        let secret = request.secret.clone();
        let agent = self.registry.register(request)?;
        if let Some(secret) = secret {
            self.agent_auth.enroll_secret(&agent.id, secret);
        }
        Ok(agent)
    }
}

/// Builder for [`JanusContext`]. Either a data directory or an explicit
/// persistence backend must be supplied.
#[derive(Default)]
pub struct JanusContextBuilder {
    config: Option<JanusConfig>,
    data_dir: Option<PathBuf>,
    persistence: Option<Arc<dyn ModeStatePersistence>>,
    verifiers: Vec<Arc<dyn ModeVerifier>>,
    audit: Option<Arc<dyn AuditSink>>,
    vault: Option<StateVault>,
}

impl JanusContextBuilder {
    /// Overrides the environment-derived config.
    pub fn config(mut self, config: JanusConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Root directory for durable state (mode record, audit trail).
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Substitutes the mode-state backend, e.g. for tests.
    pub fn persistence(mut self, persistence: Arc<dyn ModeStatePersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Appends a verifier to the mode-authentication chain. Order matters:
    /// the first verifier to accept wins.
    pub fn verifier(mut self, verifier: Arc<dyn ModeVerifier>) -> Self {
        self.verifiers.push(verifier);
        self
    }

    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Overrides the environment-derived state vault.
    pub fn vault(mut self, vault: StateVault) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn build(self) -> JanusResult<JanusContext> {
        let config = Arc::new(self.config.unwrap_or_else(JanusConfig::from_env));
        config.validate()?;

        let vault = self.vault.unwrap_or_else(StateVault::from_env);
        let events = EventBus::new();

        let persistence: Arc<dyn ModeStatePersistence> = match (self.persistence, &self.data_dir) {
            (Some(p), _) => p,
            (None, Some(dir)) => Arc::new(SledModeStore::open(dir.join("mode"), vault.clone())?),
            (None, None) => {
                return Err(JanusError::Configuration(
                    "either a data directory or a persistence backend is required".to_string(),
                ))
            }
        };

        let audit: Arc<dyn AuditSink> = match (self.audit, &self.data_dir) {
            (Some(a), _) => a,
            (None, Some(dir)) => {
                Arc::new(SledAuditSink::open(dir.join("audit"), Arc::new(vault.clone()))?)
            }
            (None, None) => Arc::new(TracingAuditSink),
        };

        let mut verifiers = self.verifiers;
        if verifiers.is_empty() {
            verifiers.push(Arc::new(OverrideVerifier) as Arc<dyn ModeVerifier>);
        }

        let registry = Arc::new(AgentRegistry::new(config.clone()));
        let agent_auth = Arc::new(AgentAuthenticationManager::new(
            config.clone(),
            registry.clone(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(config.clone()));
        let mode_manager = Arc::new(ModeManager::new(
            config.clone(),
            persistence,
            events.clone(),
        )?);
        let mode_auth = Arc::new(ModeAuthenticationManager::new(config.clone(), verifiers));
        let switcher = Arc::new(ModeSwitcher::new(
            mode_manager.clone(),
            mode_auth,
            events.clone(),
        ));
        let matrix = Arc::new(AgentPermissionMatrix::new(
            config.clone(),
            registry.clone(),
            mode_manager.clone(),
        ));
        let validator = Arc::new(IsolationValidator::new(
            config.clone(),
            mode_manager.clone(),
            events.clone(),
            audit.clone(),
        ));
        let middleware = Arc::new(AgentPermissionMiddleware::new(
            registry.clone(),
            rate_limiter.clone(),
            matrix.clone(),
            validator.clone(),
            mode_manager.clone(),
            events.clone(),
            audit.clone(),
        ));

        info!(
            target: "janus::context",
            mode = %mode_manager.current_mode(),
            "isolation core assembled"
        );
        Ok(JanusContext {
            config,
            events,
            registry,
            agent_auth,
            rate_limiter,
            mode_manager,
            switcher,
            matrix,
            validator,
            middleware,
            audit,
        })
    }
}
