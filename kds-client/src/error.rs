//! Client error taxonomy
//!
//! The retry policy differs per variant, so the distinctions matter:
//! transport errors are recovered by the reconnect loop and surface only as
//! a connection-status indicator; timeouts may be retried immediately;
//! snapshot and command failures are surfaced to the caller to decide.

/// Client-side error enum
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connection lost, refused, or not yet established — recovered via
    /// the reconnect loop, never a blocking error
    #[error("Transport error: {0}")]
    Transport(String),

    /// A request or snapshot load exceeded its deadline. Distinct from
    /// [`ClientError::Transport`]: an immediate retry is acceptable here.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Snapshot endpoint failure (HTTP error or unsuccessful envelope)
    #[error("Snapshot load failed: {0}")]
    Api(String),

    /// Malformed payload from the server
    #[error("Malformed payload: {0}")]
    Decode(String),

    /// Authoritative mutation rejected; surfaced to the initiating caller
    /// only
    #[error("Command rejected: {message}")]
    Rejected {
        message: String,
        code: Option<String>,
    },
}

impl ClientError {
    /// Version-conflict rejection (optimistic concurrency check failed)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Rejected { code: Some(code), .. } if code == "E0004")
    }
}

impl From<shared::message::TransportError> for ClientError {
    fn from(err: shared::message::TransportError) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Api(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
