use chrono::{SecondsFormat, Utc};
use tracing::instrument;

use relay_core::ids::MessageId;
use relay_core::messages::{Message, NewMessage};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const COLUMNS: &str = "id, text, sender, sender_color, edited, created_at, updated_at";

/// Synchronous SQLite repository for chat messages.
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a message. Id and timestamps are assigned here; `edited` starts false.
    #[instrument(skip(self, new), fields(sender = %new.sender))]
    pub fn insert(&self, new: &NewMessage) -> Result<Message, StoreError> {
        let id = MessageId::new();
        let now = timestamp();
        let sender_color = new.sender_color_or_default().to_string();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, text, sender, sender_color, edited, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
                rusqlite::params![id.as_str(), new.text, new.sender, sender_color, now, now],
            )?;

            Ok(Message {
                id,
                text: new.text.clone(),
                sender: new.sender.clone(),
                sender_color,
                edited: false,
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    /// Replace the text and mark the message edited.
    /// Returns `None` when no message has this id.
    #[instrument(skip(self, text), fields(message_id = %id))]
    pub fn update_text(&self, id: &MessageId, text: &str) -> Result<Option<Message>, StoreError> {
        let now = timestamp();
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET text = ?1, edited = 1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![text, now, id.as_str()],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            fetch(conn, id)
        })
    }

    /// Delete by id. Returns whether a row existed.
    #[instrument(skip(self), fields(message_id = %id))]
    pub fn delete(&self, id: &MessageId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM messages WHERE id = ?1", [id.as_str()])?;
            Ok(changed > 0)
        })
    }

    /// All messages, oldest first.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM messages ORDER BY created_at ASC, rowid ASC"
            ))?;
            let mut rows = stmt.query([])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }
}

fn fetch(conn: &rusqlite::Connection, id: &MessageId) -> Result<Option<Message>, StoreError> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {COLUMNS} FROM messages WHERE id = ?1"))?;
    let mut rows = stmt.query([id.as_str()])?;
    match rows.next()? {
        Some(row) => row_to_message(row).map(Some),
        None => Ok(None),
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    Ok(Message {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
        text: row_helpers::get(row, 1, "messages", "text")?,
        sender: row_helpers::get(row, 2, "messages", "sender")?,
        sender_color: row_helpers::get(row, 3, "messages", "sender_color")?,
        edited: row_helpers::get_flag(row, 4, "messages", "edited")?,
        created_at: row_helpers::get(row, 5, "messages", "created_at")?,
        updated_at: row_helpers::get(row, 6, "messages", "updated_at")?,
    })
}
