//! Message operations shared by the chat channel and the REST API.
//!
//! Validation happens here, before the store is touched, and every store
//! call is bounded by a timeout so a stuck backend surfaces as an error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use relay_core::errors::RelayError;
use relay_core::ids::MessageId;
use relay_core::messages::{validate_text, Message, NewMessage};
use relay_store::{MessageStore, StoreError};
use tracing::instrument;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MessageService {
    store: Arc<dyn MessageStore>,
    timeout: Duration,
}

impl MessageService {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self::with_timeout(store, DEFAULT_STORE_TIMEOUT)
    }

    pub fn with_timeout(store: Arc<dyn MessageStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    #[instrument(skip(self, message), fields(sender = %message.sender))]
    pub async fn send(&self, message: NewMessage) -> Result<Message, RelayError> {
        message.validate()?;
        self.bounded(self.store.insert(message)).await
    }

    #[instrument(skip(self, text), fields(message_id = %id))]
    pub async fn update(&self, id: &MessageId, text: &str) -> Result<Message, RelayError> {
        validate_text(text)?;
        self.bounded(self.store.update_by_id(id, text))
            .await?
            .ok_or_else(|| RelayError::NotFound(id.clone()))
    }

    /// Returns whether a message was removed. A missing id is not an error.
    #[instrument(skip(self), fields(message_id = %id))]
    pub async fn delete(&self, id: &MessageId) -> Result<bool, RelayError> {
        self.bounded(self.store.delete_by_id(id)).await
    }

    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<Message>, RelayError> {
        self.bounded(self.store.list_ordered_by_creation()).await
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, RelayError> {
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        };
        result.map_err(|e| {
            tracing::warn!(error = %e, "store call failed");
            RelayError::from(e)
        })
    }
}
