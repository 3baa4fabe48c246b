use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Webhook request failed: {0}")]
    Transport(String),

    #[error("Webhook returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Webhook timed out")]
    Timeout,
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            NotifyError::Timeout
        } else if e.is_builder() {
            NotifyError::Client(e.to_string())
        } else {
            NotifyError::Transport(e.to_string())
        }
    }
}
