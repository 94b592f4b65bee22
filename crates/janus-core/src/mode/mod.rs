//! Mode state machine: durable state, authentication, manager, switcher.

mod auth;
mod manager;
mod state;
mod switcher;

pub use auth::{AuthGrant, ModeAuthenticationManager, ModeVerifier, OverrideVerifier, PassphraseVerifier};
pub use manager::{ModeManager, ModeStats};
pub use state::{ModeState, ModeStatePersistence, SledModeStore, SwitchEvent};
pub use switcher::{spawn_session_expiry, ModeSwitcher};
