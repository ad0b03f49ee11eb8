use std::time::Duration;

use thiserror::Error;

/// Terminal failure of one generation session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("Please enter a prompt")]
    EmptyPrompt,

    #[error("A generation is already in progress")]
    SessionInFlight,

    #[error("Connection timeout after {}ms", .timeout.as_millis())]
    HandshakeTimeout { timeout: Duration },

    #[error("Max reconnection attempts reached ({max})")]
    ReconnectLimitExceeded { max: u32 },

    #[error("WebSocket error: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed before the image arrived")]
    ConnectionClosed,

    #[error("{0}")]
    SubmissionFailed(String),

    #[error("Backend reported failure: {0}")]
    BackendFailed(String),

    #[error("Image reception timeout after {}ms", .timeout.as_millis())]
    ImageTimeout { timeout: Duration },
}

impl GenerationError {
    /// Connection-layer failures; no further connection is attempted for the session.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout { .. }
                | Self::ReconnectLimitExceeded { .. }
                | Self::ConnectionFailed(_)
                | Self::ConnectionClosed
        )
    }
}
