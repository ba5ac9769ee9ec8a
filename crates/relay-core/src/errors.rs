use crate::ids::MessageId;

/// Failure taxonomy for chat actions.
///
/// Every variant is caught at the action boundary and turned into a
/// connection-scoped `error` event (or an HTTP status), never a dropped
/// connection.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Input rejected before it reached the store.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("message not found: {0}")]
    NotFound(MessageId),

    /// The durable store failed or timed out.
    #[error("store error: {0}")]
    Store(String),

    /// An inbound frame that doesn't match any known event schema.
    #[error("malformed event: {0}")]
    Malformed(String),
}

impl RelayError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Store(_) => "store",
            Self::Malformed(_) => "malformed",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
