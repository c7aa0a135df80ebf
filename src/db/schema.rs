//! Database schema and legacy content upgrade

use crate::conversation::new_id;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

/// Value stored in `PRAGMA user_version` once all migrations have run
pub const SCHEMA_VERSION: i32 = 2;

/// Current schema, applied to fresh databases
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    messages TEXT NOT NULL,
    model TEXT NOT NULL DEFAULT '',
    system_prompt TEXT NOT NULL DEFAULT '',
    enable_search BOOLEAN NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversations_updated ON conversations(updated_at DESC);
";

/// Version 1 predates the search toggle
pub const MIGRATION_ADD_ENABLE_SEARCH: &str =
    "ALTER TABLE conversations ADD COLUMN enable_search BOOLEAN NOT NULL DEFAULT 0";

pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

/// Rewrite version 1 message content into typed blocks.
///
/// Returns the number of content items that had no block equivalent and were
/// dropped.
pub fn upgrade_legacy_messages(messages: &mut Value, started_at: DateTime<Utc>) -> usize {
    let Some(messages) = messages.as_array_mut() else {
        return 0;
    };

    let mut dropped = 0;
    for message in messages.iter_mut().filter_map(Value::as_object_mut) {
        let items = match message.remove("content") {
            Some(Value::Array(items)) => items,
            Some(Value::String(text)) => vec![json!({"type": "text", "text": text})],
            _ => Vec::new(),
        };

        let mut blocks = Vec::with_capacity(items.len());
        for item in items {
            match upgrade_item(&item, started_at) {
                Some(block) => blocks.push(block),
                None => dropped += 1,
            }
        }
        message.insert("content".to_string(), Value::Array(blocks));
    }
    dropped
}

fn str_at(value: &Value, path: &[&str]) -> String {
    path.iter()
        .try_fold(value, |v, key| v.get(*key))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn upgrade_item(item: &Value, started_at: DateTime<Utc>) -> Option<Value> {
    let block = match item.get("type").and_then(Value::as_str)? {
        "text" => json!({
            "type": "text",
            "id": new_id(),
            "text": str_at(item, &["text"]),
        }),
        "image_url" => json!({
            "type": "image",
            "id": new_id(),
            "base64": str_at(item, &["image_url", "url"]),
        }),
        "file" => json!({
            "type": "file",
            "id": new_id(),
            "base64": str_at(item, &["file", "file_data"]),
        }),
        "thinking" => {
            let id = Some(str_at(item, &["id"]))
                .filter(|id| !id.is_empty())
                .unwrap_or_else(new_id);
            json!({
                "type": "thinking",
                "id": id,
                "text": str_at(item, &["text"]),
                "started_at": format_datetime(started_at),
                "finished": true,
                "elapsed_seconds": item.get("time").and_then(Value::as_u64).unwrap_or(0),
            })
        }
        other => {
            tracing::warn!(item_type = %other, "Dropping legacy content item");
            return None;
        }
    };
    Some(block)
}
