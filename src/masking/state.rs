//! Shared masking settings, written by the control surface and read by the relay

use parking_lot::RwLock;

use super::types::{MaskingConfig, Visibility};

pub struct MaskingState {
    config: RwLock<MaskingConfig>,
}

impl MaskingState {
    pub fn new(config: MaskingConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    pub fn snapshot(&self) -> MaskingConfig {
        *self.config.read()
    }

    /// Returns the snapshot after the change so callers resend with a
    /// consistent view.
    pub fn set_enabled(&self, enabled: bool) -> MaskingConfig {
        let mut config = self.config.write();
        config.enabled = enabled;
        *config
    }

    /// Selecting a status always switches masking back on.
    pub fn set_visibility(&self, visibility: Visibility) -> MaskingConfig {
        let mut config = self.config.write();
        config.visibility = visibility;
        config.enabled = true;
        *config
    }

    pub fn set_lobby_relay(&self, relay_lobby_chat: bool) -> MaskingConfig {
        let mut config = self.config.write();
        config.relay_lobby_chat = relay_lobby_chat;
        *config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> MaskingState {
        MaskingState::new(MaskingConfig {
            enabled: false,
            visibility: Visibility::Offline,
            relay_lobby_chat: true,
        })
    }

    #[test]
    fn test_set_visibility_enables() {
        let state = state();
        let config = state.set_visibility(Visibility::Mobile);
        assert!(config.enabled);
        assert_eq!(config.visibility, Visibility::Mobile);
        assert_eq!(state.snapshot(), config);
    }

    #[test]
    fn test_set_enabled_keeps_visibility() {
        let state = state();
        state.set_visibility(Visibility::Mobile);
        let config = state.set_enabled(false);
        assert_eq!(config.visibility, Visibility::Mobile);
        assert_eq!(config.effective_target(), Visibility::Chat);
    }

    #[test]
    fn test_set_lobby_relay() {
        let state = state();
        assert!(!state.set_lobby_relay(false).relay_lobby_chat);
        assert!(!state.snapshot().relay_lobby_chat);
    }
}
