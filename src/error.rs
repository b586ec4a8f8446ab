use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum DerivError {
    /// The socket is not open, the handshake failed, or the peer closed the
    /// connection while an operation was in flight.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Failed to execute '{task}' task before the maximum allowed time of '{duration:?}'")]
    Timeout { task: String, duration: Duration },

    /// An inbound frame could not be understood as an API response.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Another call with the same primary operation key is already pending.
    #[error("A '{0}' call is already pending on this client")]
    DuplicateCall(String),
}

impl DerivError {
    /// Transport-level failure after which the caller may `open()` and retry.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::WebSocket(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for DerivError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl From<config::ConfigError> for DerivError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub type DerivResult<T> = std::result::Result<T, DerivError>;
