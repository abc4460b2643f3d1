use thiserror::Error;

/// Main error type for kgrag
#[derive(Error, Debug)]
pub enum KgragError {
    /// Caller-supplied parameters violate a documented constraint.
    /// Raised before any store call is made.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The embedding provider failed to embed the query text
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The backing store could not answer the initial similarity search
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Node identity does not exist in the store
    #[error("Node not found: {0}")]
    NotFound(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization of metadata or graph files
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenient Result type using KgragError
pub type Result<T> = std::result::Result<T, KgragError>;
