use thiserror::Error;

/// Why a `send()` call was refused. Refusals never change session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidSend {
    #[error("message content is empty")]
    EmptyContent,
    #[error("live channel is not online")]
    NotOnline,
    #[error("conversation session is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("history unavailable: {cause}")]
    HistoryUnavailable { cause: String },
    #[error("live connection failed: {0}")]
    Connection(String),
    #[error("malformed live frame: {0}")]
    MalformedFrame(String),
    #[error("send rejected: {0}")]
    InvalidSend(#[from] InvalidSend),
}

impl SyncError {
    pub fn history(cause: impl Into<String>) -> Self {
        Self::HistoryUnavailable {
            cause: cause.into(),
        }
    }
}
