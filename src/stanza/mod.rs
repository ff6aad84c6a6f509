mod assembly;
mod rewrite;
mod tree;

pub use assembly::{opens_stanza, Assembly, StanzaAssembler};
pub use rewrite::{extract_version, rewrite_presence, RewriteOptions};
pub use tree::{Element, Fragment, Node, TopLevel};

/// Cheap check for whether a chunk might carry presence
pub const PRESENCE_MARKER: &str = "<presence";
