//! Error taxonomy shared by every layer of the client.

use thiserror::Error;

/// Errors surfaced by the client and its transport.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection or transport failure. Retried by the sync loop within its bound.
    #[error("network error: {0}")]
    Network(String),
    /// The server answered but explicitly rejected the request.
    #[error("operation failed: {0}")]
    OperationFailed(String),
    /// Authentication cannot proceed. Never retried internally.
    #[error("login failed: {0}")]
    Login(String),
    /// The caller supplied contradictory or incomplete arguments.
    #[error("malformed parameter: {0}")]
    MalformedParameter(String),
    /// A caller-supplied handler or callback failed.
    #[error("user callback failed: {0}")]
    UserCallback(String),
    #[error("file io error: {0}")]
    FileIo(#[from] std::io::Error),
    #[error("failed to serialize snapshot: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    /// Whether the receive loop may retry after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ClientError::Network(_) | ClientError::OperationFailed(_))
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        assert!(ClientError::Network("reset".into()).is_recoverable());
        assert!(ClientError::OperationFailed("ret 1101".into()).is_recoverable());
        assert!(!ClientError::Login("expired".into()).is_recoverable());
        assert!(!ClientError::MalformedParameter("x".into()).is_recoverable());
    }

    #[test]
    fn test_display_messages() {
        let err = ClientError::Login("QR code scan exceeded the limit".into());
        assert_eq!(err.to_string(), "login failed: QR code scan exceeded the limit");
    }
}
