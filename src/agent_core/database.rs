//! SQLite conversation store: the message log and its summaries.
//!
//! Uses `rusqlite` in synchronous mode behind a mutex; every operation is a
//! single statement or a short transaction, so holding the lock across an
//! `.await` never happens. WAL mode is enabled for on-disk databases.
//!
//! After every change to the message log the full ordered list is published
//! on a `tokio::sync::watch` channel, so observers subscribe instead of
//! polling.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::watch;
use uuid::Uuid;

use super::errors::AgentError;
use super::types::{Message, NewSummary, PersistedMessage, ResponseMeta, StructuredReply, Summary};
use crate::inference::types::{Role, ToolCallRequest, Usage};

// ─── Constants ──────────────────────────────────────────────────────────────

const MESSAGE_COLUMNS: &str = "id, timestamp, needs_resend, kind, content, title, body, tags,
     tool_calls, tool_call_id, tool_name, model_id, model_name, temperature, latency_ms,
     prompt_tokens, completion_tokens, total_tokens, cost";

// ─── ConversationStore ──────────────────────────────────────────────────────

/// Durable, append-only log of one conversation plus its summaries.
pub struct ConversationStore {
    conn: Mutex<Connection>,
    updates: watch::Sender<Vec<PersistedMessage>>,
}

impl ConversationStore {
    /// Open (or create) the store at the given path.
    ///
    /// Pass `":memory:"` for an in-memory database (tests).
    pub fn open(path: &str) -> Result<Self, AgentError> {
        let conn = Connection::open(path)?;

        if path != ":memory:" {
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        }

        create_tables(&conn)?;
        let initial = select_messages(&conn, None)?;
        let (updates, _) = watch::channel(initial);

        Ok(Self {
            conn: Mutex::new(conn),
            updates,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AgentError> {
        self.conn.lock().map_err(|_| AgentError::DatabaseError {
            reason: "conversation store lock poisoned".into(),
        })
    }

    /// Re-read the log and push it to subscribers.
    fn publish(&self, conn: &Connection) -> Result<(), AgentError> {
        let all = select_messages(conn, None)?;
        self.updates.send_replace(all);
        Ok(())
    }

    // ─── Messages ───────────────────────────────────────────────────────

    /// Append one message. New messages always need resending.
    pub fn append_message(&self, message: &Message) -> Result<PersistedMessage, AgentError> {
        let conn = self.lock()?;
        let persisted = insert_message(&conn, message)?;
        self.publish(&conn)?;
        Ok(persisted)
    }

    /// Append several messages in one transaction, in order.
    pub fn append_messages(&self, messages: &[Message]) -> Result<Vec<PersistedMessage>, AgentError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut persisted = Vec::with_capacity(messages.len());
        for message in messages {
            persisted.push(insert_message(&tx, message)?);
        }
        tx.commit()?;
        self.publish(&conn)?;
        Ok(persisted)
    }

    /// Live view of the whole log. The receiver holds the current list and is
    /// notified after every append, flag flip or clear.
    pub fn subscribe(&self) -> watch::Receiver<Vec<PersistedMessage>> {
        self.updates.subscribe()
    }

    /// Every message in insertion order.
    pub fn all_messages(&self) -> Result<Vec<PersistedMessage>, AgentError> {
        let conn = self.lock()?;
        select_messages(&conn, None)
    }

    /// Messages not yet folded into a summary, in insertion order.
    pub fn messages_needing_resend(&self) -> Result<Vec<PersistedMessage>, AgentError> {
        let conn = self.lock()?;
        select_messages(&conn, Some("needs_resend = 1"))
    }

    /// Flip every message to `needs_resend = false`. Returns rows changed.
    pub fn mark_all_not_needing_resend(&self) -> Result<usize, AgentError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE conversation_messages SET needs_resend = 0 WHERE needs_resend = 1",
            [],
        )?;
        self.publish(&conn)?;
        Ok(changed)
    }

    pub fn count(&self) -> Result<u64, AgentError> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM conversation_messages", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Delete all messages and all summaries together.
    pub fn clear_all(&self) -> Result<(), AgentError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM conversation_messages", [])?;
        tx.execute("DELETE FROM summaries", [])?;
        tx.commit()?;
        self.publish(&conn)?;
        Ok(())
    }

    // ─── Summaries ──────────────────────────────────────────────────────

    /// The newest summary flagged current, if any.
    pub fn current_summary(&self) -> Result<Option<Summary>, AgentError> {
        let conn = self.lock()?;
        let summary = conn
            .query_row(
                "SELECT id, text, prompt_tokens, completion_tokens, total_tokens, cost,
                        is_current, created_at
                 FROM summaries
                 WHERE is_current = 1
                 ORDER BY id DESC
                 LIMIT 1",
                [],
                row_to_summary,
            )
            .optional()?;
        Ok(summary)
    }

    /// Insert a summary flagged current. Callers demote the others first.
    pub fn insert_summary(&self, summary: &NewSummary) -> Result<Summary, AgentError> {
        let conn = self.lock()?;
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO summaries
             (text, prompt_tokens, completion_tokens, total_tokens, cost, is_current, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            params![
                summary.text,
                summary.usage.prompt_tokens,
                summary.usage.completion_tokens,
                summary.usage.total_tokens,
                summary.cost,
                created_at.to_rfc3339(),
            ],
        )?;
        Ok(Summary {
            id: conn.last_insert_rowid(),
            text: summary.text.clone(),
            usage: summary.usage,
            cost: summary.cost,
            is_current: true,
            created_at,
        })
    }

    /// Demote every summary. Returns rows changed.
    pub fn mark_all_summaries_not_current(&self) -> Result<usize, AgentError> {
        let conn = self.lock()?;
        let changed = conn.execute("UPDATE summaries SET is_current = 0 WHERE is_current = 1", [])?;
        Ok(changed)
    }

    pub fn clear_summaries(&self) -> Result<(), AgentError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM summaries", [])?;
        Ok(())
    }

    /// Every summary ever generated (current and superseded), oldest first.
    pub fn all_summaries(&self) -> Result<Vec<Summary>, AgentError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, text, prompt_tokens, completion_tokens, total_tokens, cost,
                    is_current, created_at
             FROM summaries
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], row_to_summary)?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }
}

// ─── Schema ─────────────────────────────────────────────────────────────────

fn create_tables(conn: &Connection) -> Result<(), AgentError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS conversation_messages (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            timestamp TEXT NOT NULL,
            needs_resend INTEGER NOT NULL DEFAULT 1,
            kind TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            title TEXT,
            body TEXT,
            tags TEXT,
            tool_calls TEXT,
            tool_call_id TEXT,
            tool_name TEXT,
            model_id TEXT,
            model_name TEXT,
            temperature REAL,
            latency_ms INTEGER,
            prompt_tokens INTEGER,
            completion_tokens INTEGER,
            total_tokens INTEGER,
            cost REAL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_resend
            ON conversation_messages(needs_resend, seq);

        CREATE TABLE IF NOT EXISTS summaries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            text TEXT NOT NULL,
            prompt_tokens INTEGER NOT NULL DEFAULT 0,
            completion_tokens INTEGER NOT NULL DEFAULT 0,
            total_tokens INTEGER NOT NULL DEFAULT 0,
            cost REAL NOT NULL DEFAULT 0,
            is_current INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

// ─── Row Mapping ────────────────────────────────────────────────────────────

/// Flat column form of a [`Message`].
#[derive(Default)]
struct MessageColumns<'a> {
    kind: &'static str,
    content: &'a str,
    title: Option<&'a str>,
    body: Option<&'a str>,
    tags: Option<String>,
    tool_calls: Option<String>,
    tool_call_id: Option<&'a str>,
    tool_name: Option<&'a str>,
    meta: Option<&'a ResponseMeta>,
}

fn message_columns(message: &Message) -> Result<MessageColumns<'_>, AgentError> {
    let cols = match message {
        Message::System { content } => MessageColumns {
            kind: "system",
            content,
            ..Default::default()
        },
        Message::User { content } => MessageColumns {
            kind: "user",
            content,
            ..Default::default()
        },
        Message::AssistantStructured { reply, raw, meta } => MessageColumns {
            kind: "assistant_structured",
            content: raw,
            title: Some(reply.title.as_str()),
            body: Some(reply.body.as_str()),
            tags: Some(serde_json::to_string(&reply.tags)?),
            meta: Some(meta),
            ..Default::default()
        },
        Message::AssistantPlain { content, meta } => MessageColumns {
            kind: "assistant_plain",
            content,
            meta: meta.as_ref(),
            ..Default::default()
        },
        Message::AssistantToolCalls {
            content,
            tool_calls,
        } => MessageColumns {
            kind: "assistant_tool_calls",
            content,
            tool_calls: Some(serde_json::to_string(tool_calls)?),
            ..Default::default()
        },
        Message::ToolResult {
            tool_call_id,
            tool_name,
            content,
        } => MessageColumns {
            kind: "tool_result",
            content,
            tool_call_id: Some(tool_call_id.as_str()),
            tool_name: Some(tool_name.as_str()),
            ..Default::default()
        },
    };
    Ok(cols)
}

fn insert_message(conn: &Connection, message: &Message) -> Result<PersistedMessage, AgentError> {
    let id = Uuid::new_v4().to_string();
    let timestamp = Utc::now();
    let cols = message_columns(message)?;
    let meta = cols.meta;

    conn.execute(
        "INSERT INTO conversation_messages
         (id, timestamp, needs_resend, kind, role, content, title, body, tags, tool_calls,
          tool_call_id, tool_name, model_id, model_name, temperature, latency_ms,
          prompt_tokens, completion_tokens, total_tokens, cost)
         VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        params![
            id,
            timestamp.to_rfc3339(),
            cols.kind,
            role_to_str(message.role()),
            cols.content,
            cols.title,
            cols.body,
            cols.tags,
            cols.tool_calls,
            cols.tool_call_id,
            cols.tool_name,
            meta.map(|m| m.model_id.as_str()),
            meta.map(|m| m.model_name.as_str()),
            meta.map(|m| f64::from(m.temperature)),
            meta.map(|m| m.latency_ms as i64),
            meta.map(|m| m.usage.prompt_tokens),
            meta.map(|m| m.usage.completion_tokens),
            meta.map(|m| m.usage.total_tokens),
            meta.map(|m| m.cost),
        ],
    )?;

    Ok(PersistedMessage {
        id,
        timestamp,
        needs_resend: true,
        message: message.clone(),
    })
}

fn select_messages(
    conn: &Connection,
    filter: Option<&str>,
) -> Result<Vec<PersistedMessage>, AgentError> {
    let sql = match filter {
        Some(clause) => format!(
            "SELECT {MESSAGE_COLUMNS} FROM conversation_messages WHERE {clause} ORDER BY seq ASC"
        ),
        None => format!("SELECT {MESSAGE_COLUMNS} FROM conversation_messages ORDER BY seq ASC"),
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_message)?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

/// Convert a database row (in `MESSAGE_COLUMNS` order) to a `PersistedMessage`.
fn row_to_message(row: &Row<'_>) -> rusqlite::Result<PersistedMessage> {
    let kind: String = row.get(3)?;
    let content: String = row.get(4)?;

    let meta = match row.get::<_, Option<String>>(11)? {
        Some(model_id) => Some(ResponseMeta {
            model_id,
            model_name: row.get::<_, Option<String>>(12)?.unwrap_or_default(),
            temperature: row.get::<_, Option<f64>>(13)?.unwrap_or_default() as f32,
            latency_ms: row.get::<_, Option<i64>>(14)?.unwrap_or_default() as u64,
            usage: Usage {
                prompt_tokens: row.get::<_, Option<u32>>(15)?.unwrap_or_default(),
                completion_tokens: row.get::<_, Option<u32>>(16)?.unwrap_or_default(),
                total_tokens: row.get::<_, Option<u32>>(17)?.unwrap_or_default(),
            },
            cost: row.get::<_, Option<f64>>(18)?.unwrap_or_default(),
        }),
        None => None,
    };

    let message = match kind.as_str() {
        "system" => Message::System { content },
        "user" => Message::User { content },
        "assistant_structured" => {
            let tags: Vec<String> = match row.get::<_, Option<String>>(7)? {
                Some(raw) => parse_json_column(7, &raw)?,
                None => Vec::new(),
            };
            let reply = StructuredReply {
                title: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                body: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                tags,
            };
            match meta {
                Some(meta) => Message::AssistantStructured {
                    reply,
                    raw: content,
                    meta,
                },
                None => Message::AssistantPlain {
                    content,
                    meta: None,
                },
            }
        }
        "assistant_plain" => Message::AssistantPlain { content, meta },
        "assistant_tool_calls" => {
            let tool_calls: Vec<ToolCallRequest> = match row.get::<_, Option<String>>(8)? {
                Some(raw) => parse_json_column(8, &raw)?,
                None => Vec::new(),
            };
            Message::AssistantToolCalls {
                content,
                tool_calls,
            }
        }
        "tool_result" => Message::ToolResult {
            tool_call_id: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
            tool_name: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
            content,
        },
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                3,
                Type::Text,
                format!("unknown message kind '{other}'").into(),
            ))
        }
    };

    Ok(PersistedMessage {
        id: row.get(0)?,
        timestamp: parse_timestamp(1, &row.get::<_, String>(1)?)?,
        needs_resend: row.get::<_, i64>(2)? != 0,
        message,
    })
}

fn row_to_summary(row: &Row<'_>) -> rusqlite::Result<Summary> {
    Ok(Summary {
        id: row.get(0)?,
        text: row.get(1)?,
        usage: Usage {
            prompt_tokens: row.get(2)?,
            completion_tokens: row.get(3)?,
            total_tokens: row.get(4)?,
        },
        cost: row.get(5)?,
        is_current: row.get::<_, i64>(6)? != 0,
        created_at: parse_timestamp(7, &row.get::<_, String>(7)?)?,
    })
}

fn parse_json_column<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn role_to_str(role: Role) -> &'static str {
    role.as_str()
}

// ─── Tests ──────────────────────────────────────────────────────────────────
