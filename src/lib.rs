//! Relay between a game client and its chat server that rewrites the
//! client's outgoing presence, so it shows up offline or on mobile to
//! friends while everything else keeps working.
//!
//! The TLS streams are set up elsewhere and handed to [`PresenceRelay::start`].
//! The relay then runs two pumps, one per direction. Only the client to server
//! side is inspected.

pub mod config;
pub mod error;
pub mod logging;
pub mod masking;
pub mod relay;
pub mod stanza;
pub mod status;

pub use config::{load_config, save_config, RelayConfig};
pub use error::RelayError;
pub use masking::{MaskingConfig, Visibility};
pub use relay::{ConnectionHandle, ConnectionLost, Direction, LossCause, PresenceRelay};
pub use status::{FileStatusStore, MemoryStatusStore, StatusStore};
