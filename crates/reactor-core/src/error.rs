use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures of the document store port.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("request failed: {0}")]
    Transport(#[source] BoxError),

    #[error("credentials unavailable: {0}")]
    Auth(#[source] BoxError),

    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("transaction aborted after {0} attempts")]
    Contention(u32),
}

/// Failures of the text generation port.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("request failed: {0}")]
    Transport(#[source] BoxError),

    #[error("credentials unavailable: {0}")]
    Auth(#[source] BoxError),

    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("prompt blocked: {0}")]
    Blocked(String),

    #[error("response contained no text (finish reason: {0})")]
    Empty(String),

    #[error("malformed response: {0}")]
    Decode(String),
}
