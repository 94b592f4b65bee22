//! External audit sink: best-effort, never fails the guarded operation.
//!
//! Two implementations ship: a tracing-backed sink for hosts that forward
//! structured logs, and a sled-backed sink that appends timestamped records
//! under `access/` and `violation/` key prefixes (sealed through the
//! [`StateVault`] when a key is provisioned). Sink failures are logged and
//! swallowed; the isolation validator's in-process violation log remains the
//! audit source of truth.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{AccessLogEntry, IsolationViolation};
use crate::vault::StateVault;

const ACCESS_PREFIX: &str = "access/";
const VIOLATION_PREFIX: &str = "violation/";

/// External audit destination. Implementations must be infallible from the
/// caller's point of view: handle and swallow their own errors.
pub trait AuditSink: Send + Sync {
    fn log_access(&self, entry: &AccessLogEntry);
    fn log_violation(&self, violation: &IsolationViolation);
}

/// Sink that forwards audit records as structured tracing events.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn log_access(&self, entry: &AccessLogEntry) {
        tracing::info!(
            target: "janus::audit",
            entity = %entry.entity,
            kb = %entry.kb,
            operation = %entry.operation,
            mode = %entry.mode,
            allowed = entry.allowed,
            reason = %entry.reason,
            "access"
        );
    }

    fn log_violation(&self, violation: &IsolationViolation) {
        tracing::warn!(
            target: "janus::audit",
            entity = %violation.entity,
            kind = violation.kind.as_str(),
            detail = %violation.detail,
            "isolation violation"
        );
    }
}

/// Sled-backed sink. Keys are `access/{rfc3339}/{uuid}` so a prefix scan
/// returns records in time order.
pub struct SledAuditSink {
    db: sled::Db,
    vault: Arc<StateVault>,
}

impl SledAuditSink {
    pub fn open<P: AsRef<std::path::Path>>(
        path: P,
        vault: Arc<StateVault>,
    ) -> Result<Self, sled::Error> {
        let db = sled::open(path)?;
        Ok(Self { db, vault })
    }

    fn append(&self, prefix: &str, payload: &[u8]) {
        let key = format!("{}{}/{}", prefix, Utc::now().to_rfc3339(), Uuid::new_v4());
        let sealed = match self.vault.seal(payload) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(target: "janus::audit", "audit seal failed, record dropped: {}", e);
                return;
            }
        };
        if let Err(e) = self.db.insert(key.as_bytes(), sealed) {
            warn!(target: "janus::audit", "audit append failed, record dropped: {}", e);
        }
    }

    fn read_prefix<T: serde::de::DeserializeOwned>(&self, prefix: &str, limit: usize) -> Vec<T> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let Ok((_, value)) = item else { continue };
            let Ok(bytes) = self.vault.open(&value) else { continue };
            if let Ok(record) = serde_json::from_slice(&bytes) {
                out.push(record);
            }
        }
        if out.len() > limit {
            let skip = out.len() - limit;
            out.drain(..skip);
        }
        out
    }

    /// Most recent access records, oldest first.
    pub fn recent_access(&self, limit: usize) -> Vec<AccessLogEntry> {
        self.read_prefix(ACCESS_PREFIX, limit)
    }

    /// Most recent violation records, oldest first.
    pub fn recent_violations(&self, limit: usize) -> Vec<IsolationViolation> {
        self.read_prefix(VIOLATION_PREFIX, limit)
    }
}

impl AuditSink for SledAuditSink {
    fn log_access(&self, entry: &AccessLogEntry) {
        match serde_json::to_vec(entry) {
            Ok(bytes) => self.append(ACCESS_PREFIX, &bytes),
            Err(e) => warn!(target: "janus::audit", "access entry serialization failed: {}", e),
        }
    }

    fn log_violation(&self, violation: &IsolationViolation) {
        match serde_json::to_vec(violation) {
            Ok(bytes) => self.append(VIOLATION_PREFIX, &bytes),
            Err(e) => warn!(target: "janus::audit", "violation serialization failed: {}", e),
        }
    }
}
