//! File-based chat history, one JSON document per `(conf_uid, history_uid)`.
//!
//! The store is a thin collaborator: the orchestrator writes finished turns
//! into it and the hub serves the history metadata messages from it. All
//! operations are synchronous filesystem work on small files.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use aria_domain::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub timestamp: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

pub struct HistoryStore {
    root: PathBuf,
}

impl HistoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn conf_dir(&self, conf_uid: &str) -> PathBuf {
        self.root.join(sanitize(conf_uid))
    }

    fn history_path(&self, conf_uid: &str, history_uid: &str) -> PathBuf {
        self.conf_dir(conf_uid)
            .join(format!("{}.json", sanitize(history_uid)))
    }

    /// Create an empty history and return its uid.
    pub fn create_new_history(&self, conf_uid: &str) -> Result<String> {
        let history_uid = format!(
            "{}_{}",
            Utc::now().format("%Y-%m-%d-%H-%M-%S"),
            Uuid::new_v4().simple()
        );
        let dir = self.conf_dir(conf_uid);
        std::fs::create_dir_all(&dir)?;
        write_messages(&self.history_path(conf_uid, &history_uid), &[])?;
        tracing::info!(conf_uid, history_uid = %history_uid, "created new history");
        Ok(history_uid)
    }

    /// Append one message. The history file is created if missing.
    pub fn store_message(
        &self,
        conf_uid: &str,
        history_uid: &str,
        role: &str,
        content: &str,
        name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<()> {
        let path = self.history_path(conf_uid, history_uid);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut messages = read_messages(&path).unwrap_or_default();
        messages.push(HistoryMessage {
            role: role.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            content: content.to_string(),
            name: name.map(str::to_string),
            avatar: avatar.map(str::to_string),
        });
        write_messages(&path, &messages)
    }

    pub fn get_history(&self, conf_uid: &str, history_uid: &str) -> Vec<HistoryMessage> {
        read_messages(&self.history_path(conf_uid, history_uid)).unwrap_or_else(|e| {
            tracing::warn!(conf_uid, history_uid, error = %e, "failed to read history");
            Vec::new()
        })
    }

    /// Metadata for every history of a character, newest first.
    pub fn get_history_list(&self, conf_uid: &str) -> Vec<Value> {
        let dir = self.conf_dir(conf_uid);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut list: Vec<Value> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                let uid = path.file_stem()?.to_str()?.to_string();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    return None;
                }
                let messages = read_messages(&path).ok()?;
                let latest = messages.last();
                Some(serde_json::json!({
                    "uid": uid,
                    "latest_message": latest.map(|m| serde_json::json!({
                        "role": m.role,
                        "content": m.content,
                        "timestamp": m.timestamp,
                    })),
                    "timestamp": latest.map(|m| m.timestamp.clone()),
                }))
            })
            .collect();

        list.sort_by(|a, b| {
            let ts = |v: &Value| v["timestamp"].as_str().unwrap_or("").to_string();
            ts(b).cmp(&ts(a))
        });
        list
    }

    /// Delete a history file. Returns true when it existed.
    pub fn delete_history(&self, conf_uid: &str, history_uid: &str) -> bool {
        let path = self.history_path(conf_uid, history_uid);
        match std::fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                tracing::warn!(conf_uid, history_uid, error = %e, "failed to delete history");
                false
            }
        }
    }
}

fn read_messages(path: &Path) -> Result<Vec<HistoryMessage>> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(Error::Json)
}

fn write_messages(path: &Path, messages: &[HistoryMessage]) -> Result<()> {
    let raw = serde_json::to_string_pretty(messages)?;
    std::fs::write(path, raw)?;
    Ok(())
}

/// History uids end up in filenames; keep them boring.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, HistoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn create_store_and_read_back() {
        let (_dir, store) = store();
        let uid = store.create_new_history("conf-1").unwrap();

        store
            .store_message("conf-1", &uid, "human", "hello", Some("Human"), None)
            .unwrap();
        store
            .store_message("conf-1", &uid, "ai", "hi there", Some("Aria"), Some("a.png"))
            .unwrap();

        let messages = store.get_history("conf-1", &uid);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "human");
        assert_eq!(messages[1].content, "hi there");
        assert_eq!(messages[1].avatar.as_deref(), Some("a.png"));
    }

    #[test]
    fn history_list_reports_latest_message() {
        let (_dir, store) = store();
        let uid = store.create_new_history("conf-1").unwrap();
        store
            .store_message("conf-1", &uid, "human", "first", None, None)
            .unwrap();
        store
            .store_message("conf-1", &uid, "ai", "latest", None, None)
            .unwrap();

        let list = store.get_history_list("conf-1");
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["uid"], uid.as_str());
        assert_eq!(list[0]["latest_message"]["content"], "latest");
    }

    #[test]
    fn delete_is_reported_and_idempotent() {
        let (_dir, store) = store();
        let uid = store.create_new_history("conf-1").unwrap();
        assert!(store.delete_history("conf-1", &uid));
        assert!(!store.delete_history("conf-1", &uid));
        assert!(store.get_history("conf-1", &uid).is_empty());
    }

    #[test]
    fn unknown_conf_yields_empty_list() {
        let (_dir, store) = store();
        assert!(store.get_history_list("nope").is_empty());
    }

    #[test]
    fn store_message_without_create_starts_a_file() {
        let (_dir, store) = store();
        store
            .store_message("conf-2", "adhoc", "human", "hey", None, None)
            .unwrap();
        assert_eq!(store.get_history("conf-2", "adhoc").len(), 1);
    }

    #[test]
    fn path_parts_are_sanitized() {
        let (_dir, store) = store();
        store
            .store_message("../evil", "../../escape", "human", "x", None, None)
            .unwrap();
        // The write landed inside the store root, not outside it.
        assert_eq!(store.get_history("../evil", "../../escape").len(), 1);
        assert!(store.get_history_list("../evil").len() == 1);
    }
}
