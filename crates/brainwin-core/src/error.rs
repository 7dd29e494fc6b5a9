/// Error taxonomy shared by every BrainWin component.
///
/// Each variant maps to exactly one failure class; the gateway translates
/// them into HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum BrainwinError {
    /// Fatal at startup: missing or unusable secret material.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// A uniqueness constraint (email, national id) would be violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Bad signature, malformed structure or expired bearer token.
    #[error("invalid or expired token")]
    InvalidToken,

    /// Webhook payload failed signature verification.
    #[error("invalid webhook signature: {0}")]
    Signature(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// An external collaborator failed or timed out.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// The payment session was already settled.
    #[error("session already applied: {0}")]
    AlreadyApplied(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for BrainwinError {
    fn from(e: rusqlite::Error) -> Self {
        BrainwinError::Storage(e.to_string())
    }
}
