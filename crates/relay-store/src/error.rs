use std::time::Duration;

use relay_core::RelayError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store worker failed: {0}")]
    Worker(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for RelayError {
    fn from(e: StoreError) -> Self {
        RelayError::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_into_relay_store_error() {
        let err: RelayError = StoreError::Timeout(Duration::from_secs(10)).into();
        assert_eq!(err.error_kind(), "store");
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn corrupt_row_display() {
        let err = StoreError::CorruptRow {
            table: "messages",
            column: "edited",
            detail: "bad int".into(),
        };
        assert_eq!(err.to_string(), "corrupt row in messages.edited: bad int");
    }
}
