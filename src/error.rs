use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, KintoError>;

#[derive(Debug, Error)]
pub enum KintoError {
    #[error("Record is not an object")]
    NotAnObject,

    #[error("Missing required record id")]
    MissingId,

    #[error("Extraneous id: cannot create a record having one set")]
    ExtraneousId,

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Record with id={0} not found")]
    RecordNotFound(String),

    #[error("A record with id={0} already exists")]
    ConflictingCreate(String),

    #[error("Server is asking clients to back off; retry in {remaining}s")]
    Backoff { remaining: u64 },

    #[error("Server is temporarily unavailable; retry in {remaining}s")]
    RetryAfter { remaining: u64 },

    #[error("Server has been flushed; local sync status must be reset")]
    ServerFlushed,

    #[error("Server is read-only; cannot publish changes")]
    ReadonlyServer,

    #[error("Deprecation warning: {0}")]
    Deprecated(String),

    #[error("HTTP {status}: {message}")]
    Transport { status: u16, message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Transformer error: {message}")]
    Transformer { message: String },

    #[error("Hook error: {message}")]
    Hook { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl KintoError {
    pub fn storage(message: impl Into<String>) -> Self {
        KintoError::Storage {
            message: message.into(),
        }
    }

    pub fn transformer(message: impl Into<String>) -> Self {
        KintoError::Transformer {
            message: message.into(),
        }
    }

    pub fn hook(message: impl Into<String>) -> Self {
        KintoError::Hook {
            message: message.into(),
        }
    }

    pub fn transport(status: u16, message: impl Into<String>) -> Self {
        KintoError::Transport {
            status,
            message: message.into(),
        }
    }
}
