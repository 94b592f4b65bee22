//! Mode switcher: drives the transition protocol end to end.
//!
//! Exactly one transition may be in flight per process. A concurrent request
//! observes the claimed flag and fails fast instead of queuing. Failure at
//! any step leaves the mode unchanged and appends a failed-switch event.
//! There is no mid-flight cancellation; [`ModeSwitcher::shutdown`] waits for
//! an in-flight transition to finish.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tracing::{info, warn};

use crate::domain::{Mode, SOVEREIGN_ID};
use crate::error::{JanusError, JanusResult};
use crate::events::{AuthenticationEvent, EventBus};

use super::auth::ModeAuthenticationManager;
use super::manager::ModeManager;
use super::state::ModeState;

/// Clears the in-flight flag on every exit path.
struct TransitionGuard<'a> {
    manager: &'a ModeManager,
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        self.manager.end_transition();
    }
}

pub struct ModeSwitcher {
    manager: Arc<ModeManager>,
    auth: Arc<ModeAuthenticationManager>,
    events: EventBus,
}

impl ModeSwitcher {
    pub fn new(
        manager: Arc<ModeManager>,
        auth: Arc<ModeAuthenticationManager>,
        events: EventBus,
    ) -> Self {
        Self {
            manager,
            auth,
            events,
        }
    }

    /// Runs the full transition protocol for `entity` toward `target`.
    ///
    /// Authentication is required only for Personal→Professional, and never
    /// for the sovereign. `credential` is the opaque payload handed to the
    /// verifier chain; it may be `None` when no authentication is required.
    pub async fn switch_mode(
        &self,
        entity: &str,
        target: Mode,
        credential: Option<&str>,
    ) -> JanusResult<ModeState> {
        if target == Mode::Transitioning {
            return Err(JanusError::SwitchRejected(
                "transitioning is not a reachable target".to_string(),
            ));
        }
        if !self.manager.begin_transition() {
            self.manager.record_failed_switch(
                entity,
                Mode::Transitioning,
                target,
                "transition in progress",
            );
            return Err(JanusError::SwitchRejected(
                "transition in progress".to_string(),
            ));
        }
        let _guard = TransitionGuard {
            manager: &self.manager,
        };
        // Read the mode only with the flag held; a switch that finished just
        // before the claim would make any earlier read stale.
        let current = self.manager.settled_mode();
        if current == target {
            return Err(JanusError::SwitchRejected(format!(
                "already in {} mode",
                target
            )));
        }

        let auth_required =
            current == Mode::Personal && target == Mode::Professional && entity != SOVEREIGN_ID;
        let grant = if auth_required {
            match self
                .auth
                .authenticate(entity, current, target, credential.unwrap_or(""))
                .await
            {
                Ok(grant) => {
                    self.events
                        .emit_authentication_success(AuthenticationEvent {
                            timestamp: Utc::now(),
                            entity: entity.to_string(),
                            method: grant.method.clone(),
                            from: current,
                            to: target,
                        });
                    Some(grant)
                }
                Err(err) => {
                    warn!(
                        target: "janus::mode",
                        entity,
                        from = %current,
                        to = %target,
                        "switch authentication failed: {}",
                        err
                    );
                    self.manager.record_failed_switch(
                        entity,
                        current,
                        target,
                        "authentication failed",
                    );
                    return Err(err);
                }
            }
        } else {
            None
        };

        match self.manager.complete_switch(entity, target, grant.as_ref()) {
            Ok(state) => Ok(state),
            Err(err) => {
                self.manager
                    .record_failed_switch(entity, current, target, "persistence failure");
                warn!(target: "janus::mode", "switch finalization failed: {}", err);
                Err(err)
            }
        }
    }

    /// Waits for any in-flight transition to finish. Call before terminating.
    pub async fn shutdown(&self) {
        while self.manager.is_transitioning() {
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        info!(target: "janus::mode", "mode switcher drained");
    }
}

/// Background session-expiry sweep: polls the authoritative mode so a stale
/// session reverts to Personal even with no readers. Abort the handle on
/// shutdown.
pub fn spawn_session_expiry(
    manager: Arc<ModeManager>,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(StdDuration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            let _ = manager.current_mode();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JanusConfig;
    use crate::mode::auth::{ModeVerifier, PassphraseVerifier};
    use crate::mode::state::SledModeStore;
    use crate::vault::StateVault;
    use async_trait::async_trait;

    fn harness() -> (Arc<ModeManager>, ModeSwitcher, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store =
            SledModeStore::open(dir.path().join("mode"), StateVault::new(None)).unwrap();
        let config = Arc::new(JanusConfig {
            verifier_timeout_ms: 100,
            ..Default::default()
        });
        let events = EventBus::new();
        let manager = Arc::new(
            ModeManager::new(config.clone(), Arc::new(store), events.clone()).unwrap(),
        );
        let auth = Arc::new(ModeAuthenticationManager::new(
            config,
            vec![Arc::new(PassphraseVerifier::new("open sesame"))],
        ));
        let switcher = ModeSwitcher::new(manager.clone(), auth, events);
        (manager, switcher, dir)
    }

    #[tokio::test]
    async fn professional_requires_authentication() {
        let (manager, switcher, _dir) = harness();
        let err = switcher
            .switch_mode("primary_identity", Mode::Professional, Some("wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, JanusError::AuthenticationFailure(_)));
        assert_eq!(manager.current_mode(), Mode::Personal);

        let state = switcher
            .switch_mode("primary_identity", Mode::Professional, Some("open sesame"))
            .await
            .unwrap();
        assert_eq!(state.current_mode, Mode::Professional);
        assert!(state.authenticated);
    }

    #[tokio::test]
    async fn return_to_personal_needs_no_authentication() {
        let (manager, switcher, _dir) = harness();
        switcher
            .switch_mode("primary_identity", Mode::Professional, Some("open sesame"))
            .await
            .unwrap();
        let state = switcher
            .switch_mode("primary_identity", Mode::Personal, None)
            .await
            .unwrap();
        assert_eq!(state.current_mode, Mode::Personal);
        assert!(!state.authenticated);
        assert_eq!(manager.current_mode(), Mode::Personal);
    }

    #[tokio::test]
    async fn sovereign_skips_authentication() {
        let (_, switcher, _dir) = harness();
        let state = switcher
            .switch_mode(SOVEREIGN_ID, Mode::Professional, None)
            .await
            .unwrap();
        assert_eq!(state.current_mode, Mode::Professional);
    }

    #[tokio::test]
    async fn same_mode_request_is_rejected() {
        let (_, switcher, _dir) = harness();
        let err = switcher
            .switch_mode("primary_identity", Mode::Personal, None)
            .await
            .unwrap_err();
        assert!(matches!(err, JanusError::SwitchRejected(_)));
    }

    #[tokio::test]
    async fn duplicate_switch_is_rejected_not_finalized() {
        let (manager, switcher, _dir) = harness();
        switcher
            .switch_mode("primary_identity", Mode::Professional, Some("open sesame"))
            .await
            .unwrap();
        // Replaying the request must hit the post-claim same-mode check, not
        // finalize a second no-op switch.
        let err = switcher
            .switch_mode("primary_identity", Mode::Professional, Some("open sesame"))
            .await
            .unwrap_err();
        assert!(matches!(err, JanusError::SwitchRejected(_)));
        assert_eq!(manager.stats().switches, 1);
        assert_eq!(manager.current_mode(), Mode::Professional);
    }

    #[tokio::test]
    async fn same_mode_rejection_releases_the_flag() {
        let (manager, switcher, _dir) = harness();
        let err = switcher
            .switch_mode("primary_identity", Mode::Personal, None)
            .await
            .unwrap_err();
        assert!(matches!(err, JanusError::SwitchRejected(_)));
        assert!(!manager.is_transitioning());
        // The flag was released on the early return; a real switch proceeds.
        switcher
            .switch_mode("primary_identity", Mode::Professional, Some("open sesame"))
            .await
            .unwrap();
        assert_eq!(manager.current_mode(), Mode::Professional);
    }

    #[tokio::test]
    async fn concurrent_switch_fails_fast() {
        let (manager, switcher, _dir) = harness();
        assert!(manager.begin_transition());
        let err = switcher
            .switch_mode("primary_identity", Mode::Professional, Some("open sesame"))
            .await
            .unwrap_err();
        assert!(matches!(err, JanusError::SwitchRejected(_)));
        manager.end_transition();
        assert_eq!(manager.current_mode(), Mode::Personal);
    }

    #[tokio::test]
    async fn failed_switch_records_event_and_leaves_mode() {
        let (manager, switcher, _dir) = harness();
        let _ = switcher
            .switch_mode("primary_identity", Mode::Professional, Some("wrong"))
            .await;
        assert_eq!(manager.stats().failed_switches, 1);
        let events = manager.recent_switch_events(10).unwrap();
        assert!(events.iter().any(|e| !e.success));
        assert_eq!(manager.current_mode(), Mode::Personal);
    }

    /// Verifier that holds the transition open long enough to observe
    /// `Transitioning` from another task.
    struct SlowVerifier;

    #[async_trait]
    impl ModeVerifier for SlowVerifier {
        fn name(&self) -> &str {
            "slow"
        }

        async fn verify(&self, _payload: &str) -> bool {
            tokio::time::sleep(StdDuration::from_millis(50)).await;
            true
        }
    }

    #[tokio::test]
    async fn mode_reads_transitioning_while_switch_is_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            SledModeStore::open(dir.path().join("mode"), StateVault::new(None)).unwrap();
        let config = Arc::new(JanusConfig {
            verifier_timeout_ms: 5_000,
            ..Default::default()
        });
        let events = EventBus::new();
        let manager = Arc::new(
            ModeManager::new(config.clone(), Arc::new(store), events.clone()).unwrap(),
        );
        let auth = Arc::new(ModeAuthenticationManager::new(
            config,
            vec![Arc::new(SlowVerifier)],
        ));
        let switcher = Arc::new(ModeSwitcher::new(manager.clone(), auth, events));

        let task = {
            let switcher = switcher.clone();
            tokio::spawn(async move {
                switcher
                    .switch_mode("primary_identity", Mode::Professional, Some("x"))
                    .await
            })
        };
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        assert_eq!(manager.current_mode(), Mode::Transitioning);

        switcher.shutdown().await;
        let state = task.await.unwrap().unwrap();
        assert_eq!(state.current_mode, Mode::Professional);
        assert_eq!(manager.current_mode(), Mode::Professional);
    }
}
