//! Typed event bus with named topics.
//!
//! Mode changes, authentication successes, violations, and security alerts are
//! fanned out over per-topic `tokio::sync::broadcast` channels. Subscribers
//! that lag simply drop events; emitting never blocks and never fails the
//! operation that produced the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::{IsolationViolation, KbType, Mode, Operation};

const TOPIC_CAPACITY: usize = 256;

/// Published on the `mode_changed` topic after a successful switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeChangedEvent {
    pub timestamp: DateTime<Utc>,
    pub from: Mode,
    pub to: Mode,
    pub entity: String,
    pub session_id: uuid::Uuid,
}

/// Published on the `authentication_success` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationEvent {
    pub timestamp: DateTime<Utc>,
    pub entity: String,
    /// Verifier method that granted access (e.g. "override", "passphrase").
    pub method: String,
    pub from: Mode,
    pub to: Mode,
}

/// Published on the `security_alert` topic when the middleware escalates a
/// cross-domain attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityAlertEvent {
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub kb: KbType,
    pub operation: Operation,
    pub detail: String,
    /// Whether the registry auto-suspended the agent as a result.
    pub suspended: bool,
}

impl SecurityAlertEvent {
    pub fn now(
        agent_id: impl Into<String>,
        kb: KbType,
        operation: Operation,
        detail: impl Into<String>,
        suspended: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            agent_id: agent_id.into(),
            kb,
            operation,
            detail: detail.into(),
            suspended,
        }
    }
}

/// Per-topic broadcast senders. Cheap to clone; hand one to every subsystem
/// that emits events.
#[derive(Debug, Clone)]
pub struct EventBus {
    mode_changed: broadcast::Sender<ModeChangedEvent>,
    authentication_success: broadcast::Sender<AuthenticationEvent>,
    violation: broadcast::Sender<IsolationViolation>,
    security_alert: broadcast::Sender<SecurityAlertEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            mode_changed: broadcast::channel(TOPIC_CAPACITY).0,
            authentication_success: broadcast::channel(TOPIC_CAPACITY).0,
            violation: broadcast::channel(TOPIC_CAPACITY).0,
            security_alert: broadcast::channel(TOPIC_CAPACITY).0,
        }
    }

    pub fn subscribe_mode_changed(&self) -> broadcast::Receiver<ModeChangedEvent> {
        self.mode_changed.subscribe()
    }

    pub fn subscribe_authentication_success(&self) -> broadcast::Receiver<AuthenticationEvent> {
        self.authentication_success.subscribe()
    }

    pub fn subscribe_violation(&self) -> broadcast::Receiver<IsolationViolation> {
        self.violation.subscribe()
    }

    pub fn subscribe_security_alert(&self) -> broadcast::Receiver<SecurityAlertEvent> {
        self.security_alert.subscribe()
    }

    /// Emit helpers ignore the "no subscribers" send error; events are
    /// advisory and never gate the operation that produced them.
    pub fn emit_mode_changed(&self, event: ModeChangedEvent) {
        let _ = self.mode_changed.send(event);
    }

    pub fn emit_authentication_success(&self, event: AuthenticationEvent) {
        let _ = self.authentication_success.send(event);
    }

    pub fn emit_violation(&self, violation: IsolationViolation) {
        let _ = self.violation.send(violation);
    }

    pub fn emit_security_alert(&self, event: SecurityAlertEvent) {
        let _ = self.security_alert.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
