//! Agent registry: lifecycle, tokens, suspensions, authentication.

pub mod agent;
mod auth;
mod lifecycle;

pub use agent::{
    ActivityRecord, Agent, AgentClassification, AgentSuspension, AgentToken, ClearanceTier,
    RegistrationRequest, SuspensionReason,
};
pub use auth::AgentAuthenticationManager;
pub use lifecycle::AgentRegistry;
