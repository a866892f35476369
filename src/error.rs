use thiserror::Error;

#[derive(Debug, Error)]
pub enum InboxError {
    #[error("{party} is not a participant of {scope}")]
    NotParticipant { party: String, scope: String },
    #[error("message text is empty")]
    EmptyMessage,
    #[error("engagement {0} not found")]
    EngagementNotFound(String),
    #[error("message {0} already exists in this log")]
    DuplicateMessage(String),
    #[error("invalid conversation key: {0}")]
    InvalidKey(String),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, InboxError>;
