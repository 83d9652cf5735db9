//! Session journal: a SQLite table of the records an operator needs when a
//! session misbehaves.
//!
//! Two kinds of `tracing` events are kept: anything at warn or above, and
//! every session state transition (events carrying a `to` field), whatever
//! their level. Correlation fields (`attempt_id`, `observer_id`, the state
//! and the disconnect reason) get their own indexed columns so the journal
//! can be sliced per attempt or per observer; everything else lands in a
//! JSON `fields` blob.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{span, Level};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const DEFAULT_LIMIT: u32 = 100;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS session_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    ts          TEXT NOT NULL,
    severity    INTEGER NOT NULL,
    target      TEXT NOT NULL,
    message     TEXT NOT NULL,
    attempt_id  TEXT,
    observer_id TEXT,
    state       TEXT,
    reason      TEXT,
    fields      TEXT
);
CREATE INDEX IF NOT EXISTS idx_session_log_attempt ON session_log(attempt_id);
CREATE INDEX IF NOT EXISTS idx_session_log_observer ON session_log(observer_id);
CREATE INDEX IF NOT EXISTS idx_session_log_state ON session_log(state, reason);
";

/// Lower is more severe, so "warn and above" is `severity <= 2`.
fn severity(level: Level) -> i64 {
    match level {
        Level::ERROR => 1,
        Level::WARN => 2,
        Level::INFO => 3,
        Level::DEBUG => 4,
        Level::TRACE => 5,
    }
}

fn level_name(severity: i64) -> &'static str {
    match severity {
        1 => "ERROR",
        2 => "WARN",
        3 => "INFO",
        4 => "DEBUG",
        _ => "TRACE",
    }
}

/// One journal row.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observer_id: Option<String>,
    /// State entered, for transition records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,
}

/// Journal filter. Every set field narrows the result.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    /// Least severe level to include: `warn` means warn and error.
    pub min_level: Option<Level>,
    pub attempt_id: Option<String>,
    pub observer_id: Option<String>,
    pub state: Option<String>,
    pub reason: Option<String>,
    /// RFC 3339 lower bound.
    pub since: Option<String>,
    pub limit: Option<u32>,
}

impl LogQuery {
    fn to_sql(&self) -> (String, Vec<SqlValue>) {
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<SqlValue> = Vec::new();

        if let Some(level) = self.min_level {
            clauses.push("severity <= ?");
            args.push(SqlValue::Integer(severity(level)));
        }
        let exact = [
            ("attempt_id = ?", &self.attempt_id),
            ("observer_id = ?", &self.observer_id),
            ("state = ?", &self.state),
            ("reason = ?", &self.reason),
            ("ts >= ?", &self.since),
        ];
        for (clause, value) in exact {
            if let Some(v) = value {
                clauses.push(clause);
                args.push(SqlValue::Text(v.clone()));
            }
        }

        let mut sql = String::from(
            "SELECT id, ts, severity, target, message, attempt_id, observer_id, state, reason, fields
             FROM session_log",
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY id DESC LIMIT ?");
        args.push(SqlValue::Integer(i64::from(self.limit.unwrap_or(DEFAULT_LIMIT))));
        (sql, args)
    }
}

/// SQLite-backed session journal.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn append(&self, level: Level, target: &str, entry: Entry) {
        let fields = (!entry.fields.is_empty()).then(|| Value::Object(entry.fields).to_string());
        let conn = self.conn.lock();
        // A failed write must never surface as a log event of its own.
        let _ = conn.execute(
            "INSERT INTO session_log
                 (ts, severity, target, message, attempt_id, observer_id, state, reason, fields)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                Utc::now().to_rfc3339(),
                severity(level),
                target,
                entry.message.unwrap_or_default(),
                entry.ids.attempt_id,
                entry.ids.observer_id,
                entry.state,
                entry.reason,
                fields,
            ],
        );
    }

    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let (sql, args) = q.to_sql();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args), |row| {
            let fields: Option<String> = row.get(9)?;
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: level_name(row.get(2)?).to_string(),
                target: row.get(3)?,
                message: row.get(4)?,
                attempt_id: row.get(5)?,
                observer_id: row.get(6)?,
                state: row.get(7)?,
                reason: row.get(8)?,
                fields: fields.and_then(|f| serde_json::from_str(&f).ok()),
            })
        })?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM session_log", [], |row| row.get(0))
    }
}

/// Correlation ids, taken from the event itself or inherited from an
/// enclosing span.
#[derive(Clone, Default)]
struct Ids {
    attempt_id: Option<String>,
    observer_id: Option<String>,
}

impl Ids {
    fn is_empty(&self) -> bool {
        self.attempt_id.is_none() && self.observer_id.is_none()
    }

    fn inherit(&mut self, outer: &Ids) {
        if self.attempt_id.is_none() {
            self.attempt_id.clone_from(&outer.attempt_id);
        }
        if self.observer_id.is_none() {
            self.observer_id.clone_from(&outer.observer_id);
        }
    }
}

#[derive(Default)]
struct Entry {
    message: Option<String>,
    ids: Ids,
    state: Option<String>,
    reason: Option<String>,
    transition: bool,
    fields: Map<String, Value>,
}

impl Entry {
    fn put(&mut self, field: &Field, value: Value) {
        let slot = match field.name() {
            "message" => &mut self.message,
            "attempt_id" => &mut self.ids.attempt_id,
            "observer_id" => &mut self.ids.observer_id,
            "reason" => &mut self.reason,
            "state" => &mut self.state,
            "to" => {
                self.transition = true;
                &mut self.state
            }
            name => {
                let _ = self.fields.insert(name.to_string(), value);
                return;
            }
        };
        *slot = Some(match value {
            Value::String(s) => s,
            other => other.to_string(),
        });
    }
}

impl Visit for Entry {
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

/// `tracing` layer feeding the journal.
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
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut entry = Entry::default();
        attrs.record(&mut entry);
        if entry.ids.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(entry.ids);
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        let mut entry = Entry::default();
        event.record(&mut entry);
        if level > Level::WARN && !entry.transition {
            return;
        }

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(outer) = span.extensions().get::<Ids>() {
                    entry.ids.inherit(outer);
                }
            }
        }
        self.sink.append(level, event.metadata().target(), entry);
    }
}
