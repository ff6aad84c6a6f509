use std::fmt;

use serde::{Deserialize, Serialize};

/// The status presented to the chat server on the client's behalf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Real presence passes through (apart from do-not-disturb handling)
    Chat,
    #[default]
    Offline,
    Mobile,
}

impl Visibility {
    /// The string form used both on the wire and in the status file
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Chat => "chat",
            Visibility::Offline => "offline",
            Visibility::Mobile => "mobile",
        }
    }

    /// Parse a persisted value. Only `mobile` survives a reload; everything
    /// else, including a previously saved `chat`, comes back as offline.
    pub fn from_persisted(value: &str) -> Self {
        if value == "mobile" {
            Visibility::Mobile
        } else {
            Visibility::Offline
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point-in-time copy of the masking settings, read once per relayed chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskingConfig {
    pub enabled: bool,
    pub visibility: Visibility,
    pub relay_lobby_chat: bool,
}

impl MaskingConfig {
    /// The target actually applied: disabled masking always means chat.
    pub fn effective_target(&self) -> Visibility {
        if self.enabled {
            self.visibility
        } else {
            Visibility::Chat
        }
    }
}
