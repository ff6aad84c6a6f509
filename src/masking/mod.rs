mod state;
mod types;

pub use state::MaskingState;
pub use types::{MaskingConfig, Visibility};
