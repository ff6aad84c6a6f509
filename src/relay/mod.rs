mod manager;
mod pump;

pub use manager::{ConnectionHandle, DuplexStream, PresenceRelay};
pub use pump::{ConnectionLost, Direction, LossCause};
