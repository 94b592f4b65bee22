//! janus-core: dual-domain memory isolation (modes, agents, permissions, audit).
//!
//! Two disjoint memory domains (personal and professional) behind a single
//! operational mode. Agents are classified into exactly one domain, carry
//! capability and clearance grants, and reach memory only through the
//! permission middleware. Everything security-relevant is logged.

mod audit;
mod config;
mod context;
mod domain;
mod error;
mod events;
mod isolation;
mod matrix;
mod middleware;
pub mod mode;
mod rate_limiter;
pub mod registry;
mod store;
mod vault;

// Core vocabulary: domains, KBs, modes, decisions, violations.
pub use domain::{
    AccessDecision, AccessLogEntry, Domain, IsolationViolation, KbType, Mode, Operation,
    ViolationKind, ALL_KBS, ALL_OPERATIONS, PERSONAL_EMBEDDING_DIM, PRIMARY_IDENTITY,
    PROFESSIONAL_EMBEDDING_DIM, SOVEREIGN_ID,
};

pub use config::JanusConfig;
pub use error::{JanusError, JanusResult};
pub use events::{AuthenticationEvent, EventBus, ModeChangedEvent, SecurityAlertEvent};

// Enforcement surface.
pub use isolation::{IntegrityReport, IsolationValidator, PlacementDecision};
pub use matrix::{AgentPermissionMatrix, MatrixOutcome};
pub use middleware::{
    AgentPermissionMiddleware, Authorization, AuthorizedContext, OperationRequest,
};
pub use rate_limiter::{RateLimitDecision, RateLimiter};

// Assembly, persistence, audit.
pub use audit::{AuditSink, SledAuditSink, TracingAuditSink};
pub use context::{JanusContext, JanusContextBuilder};
pub use store::{InMemoryStore, MemoryStore};
pub use vault::{StateVault, VaultError};
