use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Session ended: {0}")]
    SessionEnded(String),
    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Terminal authentication failure; the session is over and the call
    /// must not be retried.
    pub fn is_session_ended(&self) -> bool {
        matches!(self, ApiError::SessionEnded(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}
