//! Mode manager: authoritative current mode, per-mode access table, statistics.
//!
//! The in-flight transition flag lives here as an `AtomicBool` so the
//! isolation validator observes `Transitioning` the instant a switch begins.
//! Session expiry is applied lazily on every authoritative read: a stale
//! session reverts to Personal and discards the authenticated flag before
//! anything else sees the mode.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::JanusConfig;
use crate::domain::{KbType, Mode};
use crate::error::JanusResult;
use crate::events::{EventBus, ModeChangedEvent};

use super::auth::AuthGrant;
use super::state::{ModeState, ModeStatePersistence, SwitchEvent};

/// Counters and timers kept per process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeStats {
    pub switches: u64,
    pub failed_switches: u64,
    /// When the current mode was entered (process-local).
    pub entered_current_at: DateTime<Utc>,
    /// Accumulated seconds spent per mode since startup.
    pub seconds_in_mode: HashMap<Mode, i64>,
}

impl ModeStats {
    fn new() -> Self {
        Self {
            switches: 0,
            failed_switches: 0,
            entered_current_at: Utc::now(),
            seconds_in_mode: HashMap::new(),
        }
    }
}

/// Per-mode access-control table: which KBs a mode may reach.
fn default_access_table() -> HashMap<Mode, Vec<KbType>> {
    HashMap::from([
        (
            Mode::Personal,
            vec![KbType::PersonalCore, KbType::PersonalArchive],
        ),
        (
            Mode::Professional,
            vec![KbType::ProfessionalGeneral, KbType::ProfessionalIntel],
        ),
        (Mode::Transitioning, Vec::new()),
    ])
}

/// Owns the authoritative mode state.
pub struct ModeManager {
    config: Arc<JanusConfig>,
    persistence: Arc<dyn ModeStatePersistence>,
    events: EventBus,
    state: RwLock<ModeState>,
    transitioning: AtomicBool,
    access_table: HashMap<Mode, Vec<KbType>>,
    stats: RwLock<ModeStats>,
}

impl ModeManager {
    /// Loads the durable record (cold-booting to Personal without one) and
    /// applies session expiry to whatever was found.
    pub fn new(
        config: Arc<JanusConfig>,
        persistence: Arc<dyn ModeStatePersistence>,
        events: EventBus,
    ) -> JanusResult<Self> {
        let mut state = match persistence.load()? {
            Some(state) => state,
            None => {
                let state = ModeState::cold_boot();
                persistence.save(&state)?;
                info!(target: "janus::mode", "no prior record; cold boot into personal mode");
                state
            }
        };
        if state.is_session_expired(config.session_timeout_secs) {
            info!(
                target: "janus::mode",
                from = %state.current_mode,
                "stale session at startup; reverting to personal"
            );
            state.expire_to_default();
            persistence.save(&state)?;
        }
        Ok(Self {
            config,
            persistence,
            events,
            state: RwLock::new(state),
            transitioning: AtomicBool::new(false),
            access_table: default_access_table(),
            stats: RwLock::new(ModeStats::new()),
        })
    }

    /// The authoritative current mode. Reports `Transitioning` while a switch
    /// is in flight and applies lazy session expiry otherwise.
    pub fn current_mode(&self) -> Mode {
        if self.transitioning.load(Ordering::SeqCst) {
            return Mode::Transitioning;
        }
        self.settled_mode()
    }

    /// The underlying mode with lazy expiry applied, ignoring the in-flight
    /// flag. For the switcher, which holds the flag while it re-checks.
    pub(crate) fn settled_mode(&self) -> Mode {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        if state.is_session_expired(self.config.session_timeout_secs)
            && state.current_mode != Mode::Personal
        {
            let from = state.current_mode;
            state.expire_to_default();
            info!(target: "janus::mode", %from, "session expired; reverted to personal");
            if let Err(e) = self.persistence.save(&state) {
                warn!(target: "janus::mode", "failed to persist expired session: {}", e);
            }
            let _ = self.persistence.append_event(&SwitchEvent::now(
                "system",
                from,
                Mode::Personal,
                true,
                "session timeout",
            ));
        } else if state.is_session_expired(self.config.session_timeout_secs) {
            // Already personal; just discard any stale authenticated flag.
            if state.authenticated {
                state.authenticated = false;
                state.auth_expires_at = None;
            }
            state.touch();
        }
        state.current_mode
    }

    /// Whether `mode`'s access table reaches `kb`.
    pub fn mode_allows(&self, mode: Mode, kb: KbType) -> bool {
        self.access_table
            .get(&mode)
            .is_some_and(|kbs| kbs.contains(&kb))
    }

    /// Atomically claims the in-flight flag. Returns false when a transition
    /// is already in progress.
    pub(crate) fn begin_transition(&self) -> bool {
        self.transitioning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn end_transition(&self) {
        self.transitioning.store(false, Ordering::SeqCst);
    }

    pub fn is_transitioning(&self) -> bool {
        self.transitioning.load(Ordering::SeqCst)
    }

    /// Finalizes a switch: mutates state, persists, appends the switch event,
    /// updates statistics, and emits `mode_changed`. Called by the switcher
    /// while the in-flight flag is held.
    pub(crate) fn complete_switch(
        &self,
        entity: &str,
        target: Mode,
        grant: Option<&AuthGrant>,
    ) -> JanusResult<ModeState> {
        let snapshot = {
            let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
            let from = state.current_mode;
            state.previous_mode = from;
            state.current_mode = target;
            state.authenticated = grant.is_some();
            state.auth_expires_at = grant.map(|g| g.expires_at);
            state.touch();
            self.persistence.save(&state)?;
            self.persistence.append_event(&SwitchEvent::now(
                entity,
                from,
                target,
                true,
                grant
                    .map(|g| format!("authenticated via {}", g.method))
                    .unwrap_or_else(|| "no authentication required".to_string()),
            ))?;
            state.clone()
        };

        {
            let mut stats = self.stats.write().unwrap_or_else(|p| p.into_inner());
            let now = Utc::now();
            let elapsed = (now - stats.entered_current_at).num_seconds();
            *stats
                .seconds_in_mode
                .entry(snapshot.previous_mode)
                .or_insert(0) += elapsed.max(0);
            stats.entered_current_at = now;
            stats.switches += 1;
        }

        self.events.emit_mode_changed(ModeChangedEvent {
            timestamp: Utc::now(),
            from: snapshot.previous_mode,
            to: target,
            entity: entity.to_string(),
            session_id: snapshot.session_id,
        });
        info!(
            target: "janus::mode",
            entity,
            from = %snapshot.previous_mode,
            to = %target,
            "mode switch finalized"
        );
        Ok(snapshot)
    }

    /// Records a failed switch attempt. The mode is left unchanged.
    pub(crate) fn record_failed_switch(&self, entity: &str, from: Mode, to: Mode, detail: &str) {
        {
            let mut stats = self.stats.write().unwrap_or_else(|p| p.into_inner());
            stats.failed_switches += 1;
        }
        if let Err(e) = self
            .persistence
            .append_event(&SwitchEvent::now(entity, from, to, false, detail))
        {
            warn!(target: "janus::mode", "failed to persist switch failure: {}", e);
        }
    }

    /// Marks activity on the session, deferring expiry.
    pub fn touch_activity(&self) {
        self.state
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .touch();
    }

    /// A copy of the current state record (not expiry-adjusted).
    pub fn snapshot(&self) -> ModeState {
        self.state
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn stats(&self) -> ModeStats {
        self.stats
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Switch history from the durable log, oldest first.
    pub fn recent_switch_events(&self, limit: usize) -> JanusResult<Vec<SwitchEvent>> {
        self.persistence.recent_events(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::state::SledModeStore;
    use crate::vault::StateVault;

    fn manager(session_timeout_secs: i64) -> (Arc<ModeManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store =
            SledModeStore::open(dir.path().join("mode"), StateVault::new(None)).unwrap();
        let config = JanusConfig {
            session_timeout_secs,
            ..Default::default()
        };
        let manager =
            ModeManager::new(Arc::new(config), Arc::new(store), EventBus::new()).unwrap();
        (Arc::new(manager), dir)
    }

    #[test]
    fn cold_boot_defaults_to_personal() {
        let (m, _dir) = manager(1_800);
        assert_eq!(m.current_mode(), Mode::Personal);
        assert!(!m.snapshot().authenticated);
    }

    #[test]
    fn access_table_is_domain_disjoint() {
        let (m, _dir) = manager(1_800);
        assert!(m.mode_allows(Mode::Personal, KbType::PersonalCore));
        assert!(!m.mode_allows(Mode::Personal, KbType::ProfessionalGeneral));
        assert!(m.mode_allows(Mode::Professional, KbType::ProfessionalIntel));
        assert!(!m.mode_allows(Mode::Professional, KbType::PersonalArchive));
        assert!(!m.mode_allows(Mode::Transitioning, KbType::PersonalCore));
    }

    #[test]
    fn transition_flag_is_exclusive() {
        let (m, _dir) = manager(1_800);
        assert!(m.begin_transition());
        assert!(!m.begin_transition());
        assert_eq!(m.current_mode(), Mode::Transitioning);
        m.end_transition();
        assert!(m.begin_transition());
        m.end_transition();
    }

    #[test]
    fn complete_switch_persists_and_counts() {
        let (m, _dir) = manager(1_800);
        assert!(m.begin_transition());
        let state = m.complete_switch("tester", Mode::Professional, None).unwrap();
        m.end_transition();
        assert_eq!(state.current_mode, Mode::Professional);
        assert_eq!(state.previous_mode, Mode::Personal);
        assert_eq!(m.stats().switches, 1);

        let events = m.recent_switch_events(10).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].success);
    }

    #[test]
    fn expired_session_reverts_and_clears_auth_flag() {
        let (m, _dir) = manager(1_800);
        assert!(m.begin_transition());
        let grant = AuthGrant {
            entity: "tester".to_string(),
            method: "passphrase".to_string(),
            granted_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        };
        m.complete_switch("tester", Mode::Professional, Some(&grant))
            .unwrap();
        m.end_transition();
        assert!(m.snapshot().authenticated);

        // Age the session past the timeout.
        {
            let mut state = m.state.write().unwrap();
            state.last_activity = Utc::now() - chrono::Duration::hours(3);
        }
        assert_eq!(m.current_mode(), Mode::Personal);
        let snapshot = m.snapshot();
        assert!(!snapshot.authenticated);
        assert!(snapshot.auth_expires_at.is_none());
    }

    #[test]
    fn failed_switch_leaves_mode_unchanged() {
        let (m, _dir) = manager(1_800);
        m.record_failed_switch("tester", Mode::Personal, Mode::Professional, "denied");
        assert_eq!(m.current_mode(), Mode::Personal);
        assert_eq!(m.stats().failed_switches, 1);
        let events = m.recent_switch_events(10).unwrap();
        assert!(!events[0].success);
    }
}
