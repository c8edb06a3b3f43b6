use thiserror::Error;

/// Main error type for Wikigraph
#[derive(Error, Debug)]
pub enum WikigraphError {
    /// Bad offset/limit handed to a query builder (caller bug, never retried)
    #[error("Invalid pagination: {0}")]
    InvalidPagination(String),

    /// Malformed query or endpoint rejection
    #[error("Fact source query error: {0}")]
    FactSourceQuery(String),

    /// Network failure, timeout, throttling or 5xx from the endpoint
    #[error("Fact source transient error: {0}")]
    FactSourceTransient(String),

    /// A fetched row could not be mapped to an entity
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// Graph store unavailable or write rejected
    #[error("Sink write error: {0}")]
    SinkWrite(String),

    /// Database-related errors (SQLite sink infrastructure)
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lane driver reached a state it should never reach (e.g. a lost hand-off)
    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl WikigraphError {
    /// Whether a retry of the same step may succeed.
    ///
    /// Sink writes are idempotent merges, so replaying them is always safe.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WikigraphError::FactSourceTransient(_) | WikigraphError::SinkWrite(_)
        )
    }

    /// Stable code written next to the error in logs.
    pub fn log_code(&self) -> &'static str {
        match self {
            WikigraphError::InvalidPagination(_) => "WIKIGRAPH-F000",
            WikigraphError::FactSourceQuery(_) => "WIKIGRAPH-F001",
            WikigraphError::FactSourceTransient(_) => "WIKIGRAPH-T000",
            WikigraphError::MalformedRecord(_) => "WIKIGRAPH-E000",
            WikigraphError::SinkWrite(_) => "WIKIGRAPH-T001",
            WikigraphError::Database(_) => "WIKIGRAPH-F002",
            WikigraphError::Io(_) => "WIKIGRAPH-F003",
            WikigraphError::Config(_) => "WIKIGRAPH-F004",
            WikigraphError::Pipeline(_) => "WIKIGRAPH-F005",
        }
    }
}

/// Convenient Result type using WikigraphError
pub type Result<T> = std::result::Result<T, WikigraphError>;
