//! Outbox Error Types

use thiserror::Error;

/// Outbox storage and bookkeeping errors
#[derive(Error, Debug, Clone)]
pub enum OutboxError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt outbox row: {0}")]
    CorruptRow(String),
}

impl OutboxError {
    pub fn code(&self) -> &'static str {
        match self {
            OutboxError::Database(_) => "DATABASE_ERROR",
            OutboxError::Serialization(_) => "SERIALIZATION_ERROR",
            OutboxError::CorruptRow(_) => "CORRUPT_ROW",
        }
    }
}

impl From<sqlx::Error> for OutboxError {
    fn from(e: sqlx::Error) -> Self {
        OutboxError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for OutboxError {
    fn from(e: serde_json::Error) -> Self {
        OutboxError::Serialization(e.to_string())
    }
}

/// Publish failures. Owned by the poller, never surfaced to the business
/// transaction that produced the event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Broker rejected event: {0}")]
    Rejected(String),

    #[error("Publish timed out after {0}ms")]
    Timeout(u64),

    #[error("Publisher crashed: {0}")]
    Crashed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_display() {
        let err = OutboxError::CorruptRow("unknown status 99".into());
        assert_eq!(err.code(), "CORRUPT_ROW");
        assert_eq!(err.to_string(), "Corrupt outbox row: unknown status 99");
        assert_eq!(
            PublishError::Timeout(5000).to_string(),
            "Publish timed out after 5000ms"
        );
    }
}
