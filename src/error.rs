#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML syntax error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Malformed presence fragment: {0}")]
    MalformedFragment(String),

    #[error("Presence fragment contains no elements")]
    EmptyFragment,

    #[error("Stanza is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Failed to decode base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to persist status: {0}")]
    StatusStore(String),
}

impl RelayError {
    /// Faults in the relayed content itself. These drop the offending stanza
    /// but leave the connection up; anything else is fatal to the connection.
    pub fn is_content_fault(&self) -> bool {
        matches!(
            self,
            RelayError::Xml(_)
                | RelayError::MalformedFragment(_)
                | RelayError::EmptyFragment
                | RelayError::InvalidUtf8(_)
                | RelayError::Base64(_)
                | RelayError::Json(_)
        )
    }
}

impl From<RelayError> for String {
    fn from(e: RelayError) -> Self {
        e.to_string()
    }
}
