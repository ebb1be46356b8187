use thiserror::Error;

use crate::channel::TransportError;

/// Fallback message when a failed response carries no error text.
pub const CALL_FAILED: &str = "call failed";

/// Errors surfaced by client futures.
///
/// These errors are `Clone` so a single channel failure can be delivered to
/// every outstanding call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The engine answered with `ok: false`.
    #[error("{0}")]
    Remote(String),

    /// The channel reported a fatal error while the call was outstanding.
    #[error("Channel error: {0}")]
    Channel(String),

    /// The client was terminated before (or while) the call was made.
    #[error("client terminated")]
    Terminated,

    /// Subscription to a stream other than stdout/stderr.
    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    /// Empty or otherwise unusable method name.
    #[error("Invalid method name: {0:?}")]
    InvalidMethod(String),

    /// The request could not be handed to the transport.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A result did not have the expected shape.
    #[error("Unexpected result: {0}")]
    Decode(String),
}

impl ClientError {
    /// Build the error for a failed response.
    pub fn remote(message: Option<String>) -> Self {
        match message {
            Some(message) if !message.is_empty() => ClientError::Remote(message),
            _ => ClientError::Remote(CALL_FAILED.to_string()),
        }
    }

    /// Whether the error came from the engine rather than the client or channel.
    pub fn is_remote(&self) -> bool {
        matches!(self, ClientError::Remote(_))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(ClientError::Terminated.to_string(), "client terminated");
        assert_eq!(
            ClientError::remote(Some("'foo' function not found".into())).to_string(),
            "'foo' function not found"
        );
        assert_eq!(
            ClientError::Channel("Connection lost: worker exited".into()).to_string(),
            "Channel error: Connection lost: worker exited"
        );
        assert_eq!(
            ClientError::from(TransportError::Closed).to_string(),
            "Channel closed"
        );
    }

    #[test]
    fn test_remote_fallback_message() {
        assert_eq!(ClientError::remote(None), ClientError::Remote("call failed".into()));
        assert_eq!(
            ClientError::remote(Some(String::new())),
            ClientError::Remote("call failed".into())
        );
        assert!(ClientError::remote(None).is_remote());
        assert!(!ClientError::Terminated.is_remote());
    }
}
