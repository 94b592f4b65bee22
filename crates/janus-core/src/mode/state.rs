//! Durable mode state and the persistence interface.
//!
//! `Transitioning` is never persisted: it exists only for the duration of a
//! switch call, so a crash mid-switch cold-boots into the last finalized mode
//! (or the Personal default with no prior record).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::domain::Mode;
use crate::error::{JanusError, JanusResult};
use crate::vault::StateVault;

const STATE_KEY: &str = "mode/state";
const EVENT_PREFIX: &str = "mode_event/";

/// The system-wide operating context record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeState {
    pub current_mode: Mode,
    pub previous_mode: Mode,
    /// Set by a successful mode authentication; discarded on session expiry.
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_expires_at: Option<DateTime<Utc>>,
    pub session_id: Uuid,
    pub last_activity: DateTime<Utc>,
}

impl ModeState {
    /// The state at cold boot with no prior record: Personal, unauthenticated.
    pub fn cold_boot() -> Self {
        Self {
            current_mode: Mode::Personal,
            previous_mode: Mode::Personal,
            authenticated: false,
            auth_expires_at: None,
            session_id: Uuid::new_v4(),
            last_activity: Utc::now(),
        }
    }

    /// Marks activity, deferring session expiry.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// True once the inactivity window has elapsed.
    pub fn is_session_expired(&self, timeout_secs: i64) -> bool {
        Utc::now() - self.last_activity >= Duration::seconds(timeout_secs)
    }

    /// Reverts to the Personal default, discarding any stale authenticated
    /// flag and starting a fresh session.
    pub fn expire_to_default(&mut self) {
        self.previous_mode = self.current_mode;
        self.current_mode = Mode::Personal;
        self.authenticated = false;
        self.auth_expires_at = None;
        self.session_id = Uuid::new_v4();
        self.last_activity = Utc::now();
    }
}

/// One mode-switch attempt, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchEvent {
    pub timestamp: DateTime<Utc>,
    pub entity: String,
    pub from: Mode,
    pub to: Mode,
    pub success: bool,
    pub detail: String,
}

impl SwitchEvent {
    pub fn now(
        entity: impl Into<String>,
        from: Mode,
        to: Mode,
        success: bool,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            entity: entity.into(),
            from,
            to,
            success,
            detail: detail.into(),
        }
    }
}

/// Durable record of the current mode plus the switch-event log.
pub trait ModeStatePersistence: Send + Sync {
    fn load(&self) -> JanusResult<Option<ModeState>>;
    fn save(&self, state: &ModeState) -> JanusResult<()>;
    fn append_event(&self, event: &SwitchEvent) -> JanusResult<()>;
    /// Most recent switch events, oldest first.
    fn recent_events(&self, limit: usize) -> JanusResult<Vec<SwitchEvent>>;
}

/// Sled-backed persistence, sealed through the [`StateVault`].
pub struct SledModeStore {
    db: sled::Db,
    vault: StateVault,
}

impl SledModeStore {
    pub fn open<P: AsRef<std::path::Path>>(path: P, vault: StateVault) -> JanusResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db, vault })
    }

    fn seal(&self, bytes: &[u8]) -> JanusResult<Vec<u8>> {
        self.vault.seal(bytes).map_err(|e| {
            warn!(target: "janus::mode", "state seal failed: {}", e);
            JanusError::Internal
        })
    }
}

impl ModeStatePersistence for SledModeStore {
    fn load(&self) -> JanusResult<Option<ModeState>> {
        let Some(blob) = self.db.get(STATE_KEY)? else {
            return Ok(None);
        };
        let bytes = self.vault.open(&blob).map_err(|e| {
            warn!(target: "janus::mode", "state open failed: {}", e);
            JanusError::Internal
        })?;
        let state = serde_json::from_slice(&bytes).map_err(|e| {
            warn!(target: "janus::mode", "state deserialization failed: {}", e);
            JanusError::Internal
        })?;
        Ok(Some(state))
    }

    fn save(&self, state: &ModeState) -> JanusResult<()> {
        // Transitioning is transient by contract.
        if state.current_mode == Mode::Transitioning {
            warn!(target: "janus::mode", "refusing to persist a transitioning state");
            return Err(JanusError::Internal);
        }
        let bytes = serde_json::to_vec(state).map_err(|_| JanusError::Internal)?;
        let sealed = self.seal(&bytes)?;
        self.db.insert(STATE_KEY, sealed)?;
        self.db.flush()?;
        Ok(())
    }

    fn append_event(&self, event: &SwitchEvent) -> JanusResult<()> {
        let key = format!(
            "{}{}/{}",
            EVENT_PREFIX,
            event.timestamp.to_rfc3339(),
            Uuid::new_v4()
        );
        let bytes = serde_json::to_vec(event).map_err(|_| JanusError::Internal)?;
        let sealed = self.seal(&bytes)?;
        self.db.insert(key.as_bytes(), sealed)?;
        Ok(())
    }

    fn recent_events(&self, limit: usize) -> JanusResult<Vec<SwitchEvent>> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(EVENT_PREFIX.as_bytes()) {
            let (_, value) = item?;
            let Ok(bytes) = self.vault.open(&value) else { continue };
            if let Ok(event) = serde_json::from_slice::<SwitchEvent>(&bytes) {
                out.push(event);
            }
        }
        if out.len() > limit {
            let skip = out.len() - limit;
            out.drain(..skip);
        }
        Ok(out)
    }
}
