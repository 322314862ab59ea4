use thiserror::Error;

/// Detailed error types for story generation operations.
#[derive(Debug, Error)]
pub enum StoryError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("model API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("content blocked by safety settings: {0}")]
    Blocked(String),

    #[error("malformed response chunk: {0}")]
    MalformedChunk(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 decode error: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse classification used to pick a backoff delay.
///
/// Every class is retried; classification only varies the wait. Rate limiting
/// is the one case that waits longer than the base delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    RateLimited,
    ServerUnavailable,
    QuotaExhausted,
    DeadlineExceeded,
    ContentBlocked,
    BadRequest,
    Malformed,
    Other,
}

impl ErrorClass {
    /// Multiplier applied to the retrier's base delay for this class.
    pub fn backoff_multiplier(self) -> u32 {
        match self {
            Self::RateLimited => 2,
            _ => 1,
        }
    }
}

impl StoryError {
    /// Classify this error for backoff selection.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Api { status, message } => match status {
                429 => ErrorClass::RateLimited,
                500 | 503 => ErrorClass::ServerUnavailable,
                400 => ErrorClass::BadRequest,
                _ => classify_message(message),
            },
            Self::Blocked(_) => ErrorClass::ContentBlocked,
            Self::Transport(_) => ErrorClass::DeadlineExceeded,
            Self::MalformedChunk(_) | Self::Json(_) | Self::Decode(_) => ErrorClass::Malformed,
            _ => ErrorClass::Other,
        }
    }
}

fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    if lower.contains("resource_exhausted") || lower.contains("resource exhausted") {
        ErrorClass::QuotaExhausted
    } else if lower.contains("deadline") {
        ErrorClass::DeadlineExceeded
    } else if lower.contains("blocked") || lower.contains("safety") {
        ErrorClass::ContentBlocked
    } else {
        ErrorClass::Other
    }
}

pub type Result<T> = std::result::Result<T, StoryError>;
