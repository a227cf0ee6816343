use thiserror::Error;

/// Failures surfaced by the signaling core.
///
/// None of these are fatal to the process: the router logs and drops the
/// offending envelope, the session aborts the current negotiation round
/// locally. Nothing is ever reported back to the remote side.
#[derive(Debug, Error)]
pub enum CallError {
    /// Malformed wire bytes: bad envelope JSON, an unknown message kind, or a
    /// data-channel record with the wrong shape.
    #[error("decode: {0}")]
    Decode(String),

    /// A command precondition was not met, e.g. an offer message carrying the
    /// wrong description kind or an empty body.
    #[error("validation: {0}")]
    Validation(String),

    /// The transport engine rejected an operation.
    #[error("transport: {0}")]
    Transport(String),
}

impl From<serde_json::Error> for CallError {
    fn from(e: serde_json::Error) -> Self {
        CallError::Decode(e.to_string())
    }
}
