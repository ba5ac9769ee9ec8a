//! Async message store contract and its SQLite implementation.
//!
//! The chat coordinator only talks to [`MessageStore`]; every call suspends
//! the calling connection's handler without blocking other connections.

use std::sync::Arc;

use async_trait::async_trait;

use relay_core::ids::MessageId;
use relay_core::messages::{Message, NewMessage};

use crate::database::Database;
use crate::error::StoreError;
use crate::messages::MessageRepo;

/// Durable, creation-ordered collection of chat messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Replace a message's text and set `edited`. `None` when the id is unknown.
    async fn update_by_id(&self, id: &MessageId, text: &str) -> Result<Option<Message>, StoreError>;

    /// Returns whether a message was removed.
    async fn delete_by_id(&self, id: &MessageId) -> Result<bool, StoreError>;

    async fn list_ordered_by_creation(&self) -> Result<Vec<Message>, StoreError>;
}

/// [`MessageStore`] backed by [`MessageRepo`], run on the blocking pool.
#[derive(Clone)]
pub struct SqliteMessageStore {
    repo: Arc<MessageRepo>,
}

impl SqliteMessageStore {
    pub fn new(db: Database) -> Self {
        Self {
            repo: Arc::new(MessageRepo::new(db)),
        }
    }

    async fn run<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&MessageRepo) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let repo = Arc::clone(&self.repo);
        tokio::task::spawn_blocking(move || f(&repo))
            .await
            .map_err(|e| StoreError::Worker(e.to_string()))?
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn insert(&self, message: NewMessage) -> Result<Message, StoreError> {
        self.run(move |repo| repo.insert(&message)).await
    }

    async fn update_by_id(&self, id: &MessageId, text: &str) -> Result<Option<Message>, StoreError> {
        let id = id.clone();
        let text = text.to_string();
        self.run(move |repo| repo.update_text(&id, &text)).await
    }

    async fn delete_by_id(&self, id: &MessageId) -> Result<bool, StoreError> {
        let id = id.clone();
        self.run(move |repo| repo.delete(&id)).await
    }

    async fn list_ordered_by_creation(&self) -> Result<Vec<Message>, StoreError> {
        self.run(|repo| repo.list()).await
    }
}
