use std::time::Duration;

use thiserror::Error;

/// Reasons a push channel connection ended. All of them are recoverable;
/// the channel manager logs them and reconnects.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Connection not established within {0:?}")]
    ConnectTimeout(Duration),

    #[error("Handshake not completed within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Server error frame: {0}")]
    Server(String),

    #[error("No heartbeat from server for {0:?}")]
    HeartbeatTimeout(Duration),

    #[error("Connection closed by server")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to send frame: {0}")]
    Send(String),
}

impl ChannelError {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelError::Connect(_) => "connect",
            ChannelError::ConnectTimeout(_) => "connect_timeout",
            ChannelError::HandshakeTimeout(_) => "handshake_timeout",
            ChannelError::Handshake(_) => "handshake",
            ChannelError::Server(_) => "server",
            ChannelError::HeartbeatTimeout(_) => "heartbeat_timeout",
            ChannelError::Closed => "closed",
            ChannelError::Transport(_) => "transport",
            ChannelError::Send(_) => "send",
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => ChannelError::Closed,
            other => ChannelError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_have_distinct_kinds() {
        let timeout = Duration::from_secs(1);

        assert_eq!(ChannelError::ConnectTimeout(timeout).kind(), "connect_timeout");
        assert_eq!(ChannelError::HandshakeTimeout(timeout).kind(), "handshake_timeout");
        assert_eq!(ChannelError::HeartbeatTimeout(timeout).kind(), "heartbeat_timeout");
    }

    #[test]
    fn test_closed_socket_maps_to_closed() {
        let error = ChannelError::from(tokio_tungstenite::tungstenite::Error::ConnectionClosed);

        assert!(matches!(error, ChannelError::Closed));
    }
}
