//! Warn-and-above log persistence.
//!
//! Records are keyed by the chat ids that show up in relay spans and events
//! (`connection_id`, `message_id`) so a failing client or message can be
//! traced after the fact.

use std::path::Path;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{span, Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const LOG_SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
CREATE TABLE IF NOT EXISTS logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    level TEXT NOT NULL,
    target TEXT NOT NULL,
    message TEXT NOT NULL,
    fields TEXT,
    connection_id TEXT,
    message_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp);
CREATE INDEX IF NOT EXISTS idx_logs_connection ON logs(connection_id);
CREATE INDEX IF NOT EXISTS idx_logs_message ON logs(message_id);
";

const DEFAULT_QUERY_LIMIT: u32 = 100;

/// A persisted log line.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    /// Remaining structured fields as a JSON object.
    pub fields: Option<String>,
    pub connection_id: Option<String>,
    pub message_id: Option<String>,
}

impl LogRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            timestamp: row.get("timestamp")?,
            level: row.get("level")?,
            target: row.get("target")?,
            message: row.get("message")?,
            fields: row.get("fields")?,
            connection_id: row.get("connection_id")?,
            message_id: row.get("message_id")?,
        })
    }
}

/// Filters for [`SqliteLogSink::query`]. Unset filters match everything.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    /// Substring of the event target, e.g. `dispatcher`.
    pub target: Option<String>,
    pub connection_id: Option<String>,
    pub message_id: Option<String>,
    /// RFC 3339 lower bound, inclusive.
    pub since: Option<String>,
    pub limit: Option<u32>,
}

pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(LOG_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Logging must never fail the caller; write errors are dropped.
    fn append(&self, record: &LogRecord) {
        let _ = self.conn.lock().execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, connection_id, message_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.timestamp,
                record.level,
                record.target,
                record.message,
                record.fields,
                record.connection_id,
                record.message_id,
            ],
        );
    }

    /// Matching records, newest first.
    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM logs
             WHERE (?1 IS NULL OR level = ?1)
               AND (?2 IS NULL OR instr(target, ?2) > 0)
               AND (?3 IS NULL OR connection_id = ?3)
               AND (?4 IS NULL OR message_id = ?4)
               AND (?5 IS NULL OR timestamp >= ?5)
             ORDER BY id DESC
             LIMIT ?6",
        )?;
        let rows = stmt.query_map(
            params![
                q.level,
                q.target,
                q.connection_id,
                q.message_id,
                q.since,
                q.limit.unwrap_or(DEFAULT_QUERY_LIMIT),
            ],
            LogRecord::from_row,
        )?;
        rows.collect()
    }
}

/// Collects an event's fields, lifting out the message and the chat ids.
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    connection_id: Option<String>,
    message_id: Option<String>,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn put(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => self.message = Some(as_text(value)),
            "connection_id" => self.connection_id = Some(as_text(value)),
            "message_id" => self.message_id = Some(as_text(value)),
            name => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

fn as_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        self.put(field, Value::String(rendered.trim_matches('"').to_string()));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }
}

/// Connection id carried by a span, inherited by events inside it.
struct SpanConnection(String);

/// `tracing` layer that appends WARN and ERROR events to a [`SqliteLogSink`].
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        if let (Some(connection_id), Some(span)) = (visitor.connection_id, ctx.span(id)) {
            span.extensions_mut().insert(SpanConnection(connection_id));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let connection_id = visitor.connection_id.or_else(|| {
            ctx.event_scope(event)?.find_map(|span| {
                span.extensions()
                    .get::<SpanConnection>()
                    .map(|conn| conn.0.clone())
            })
        });
        let fields = (!visitor.fields.is_empty())
            .then(|| serde_json::to_string(&visitor.fields).ok())
            .flatten();

        self.sink.append(&LogRecord {
            id: 0,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level: meta.level().as_str().to_string(),
            target: meta.target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields,
            connection_id,
            message_id: visitor.message_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tracing_subscriber::layer::SubscriberExt;

    fn temp_db() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("chatrelay-test-logs-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("test-logs.db")
    }

    fn record(level: &str, target: &str, message: &str) -> LogRecord {
        LogRecord {
            timestamp: "2026-02-14T12:00:00.000Z".into(),
            level: level.into(),
            target: target.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    fn sink() -> SqliteLogSink {
        SqliteLogSink::new(&temp_db()).unwrap()
    }

    #[test]
    fn append_then_query_all() {
        let sink = sink();
        sink.append(&record("WARN", "relay_server::dispatcher", "action failed"));
        let all = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].message, "action failed");
    }

    #[test]
    fn query_by_level() {
        let sink = sink();
        sink.append(&record("WARN", "test", "warning msg"));
        sink.append(&record("ERROR", "test", "error msg"));

        let results = sink
            .query(&LogQuery {
                level: Some("ERROR".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].message, "error msg");
    }

    #[test]
    fn query_by_connection_and_message() {
        let sink = sink();
        sink.append(&LogRecord {
            connection_id: Some("conn_a".into()),
            message_id: Some("msg_1".into()),
            ..record("WARN", "test", "from a")
        });
        sink.append(&LogRecord {
            connection_id: Some("conn_b".into()),
            ..record("WARN", "test", "from b")
        });

        let by_conn = sink
            .query(&LogQuery {
                connection_id: Some("conn_a".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_conn.len(), 1);
        assert_eq!(by_conn[0].message, "from a");

        let by_msg = sink
            .query(&LogQuery {
                message_id: Some("msg_1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_msg.len(), 1);
        assert_eq!(by_msg[0].connection_id.as_deref(), Some("conn_a"));
    }

    #[test]
    fn query_by_target_substring() {
        let sink = sink();
        sink.append(&record("ERROR", "relay_store::messages", "db error"));
        sink.append(&record("WARN", "relay_server::fanout", "queue full"));

        let results = sink
            .query(&LogQuery {
                target: Some("fanout".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].message, "queue full");
    }

    #[test]
    fn limit_returns_newest_first() {
        let sink = sink();
        for i in 0..10 {
            sink.append(&record("WARN", "test", &format!("msg {i}")));
        }

        let results = sink
            .query(&LogQuery {
                limit: Some(3),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].message, "msg 9");
    }

    #[test]
    fn query_since() {
        let sink = sink();
        sink.append(&LogRecord {
            timestamp: "2026-02-14T11:00:00.000Z".into(),
            ..record("WARN", "test", "old")
        });
        sink.append(&LogRecord {
            timestamp: "2026-02-14T13:00:00.000Z".into(),
            ..record("WARN", "test", "new")
        });

        let results = sink
            .query(&LogQuery {
                since: Some("2026-02-14T12:00:00.000Z".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].message, "new");
    }

    #[test]
    fn layer_persists_warn_and_inherits_span_connection() {
        let sink = Arc::new(sink());
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(sink.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("connection", connection_id = "conn_7");
            let _enter = span.enter();
            tracing::info!("ignored below warn");
            tracing::warn!(message_id = "msg_3", kind = "store", "action failed");
        });

        let results = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(results.len(), 1);
        let rec = &results[0];
        assert_eq!(rec.level, "WARN");
        assert_eq!(rec.message, "action failed");
        assert_eq!(rec.connection_id.as_deref(), Some("conn_7"));
        assert_eq!(rec.message_id.as_deref(), Some("msg_3"));
        let fields: Value = serde_json::from_str(rec.fields.as_deref().unwrap()).unwrap();
        assert_eq!(fields["kind"], "store");
    }

    #[test]
    fn display_formatted_ids_are_unquoted() {
        let sink = Arc::new(sink());
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(sink.clone()));
        let conn = String::from("conn_9");

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(connection_id = %conn, "send failed");
        });

        let results = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(results[0].connection_id.as_deref(), Some("conn_9"));
        assert_eq!(results[0].level, "ERROR");
    }
}
