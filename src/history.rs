use crate::lock::TimedMutex;
use crate::persist::{load_json_or_default, save_json_best_effort};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strum_macros::{Display, EnumIter, EnumString};
use tracing::debug;

pub const MAX_HISTORY_ENTRIES: usize = 100;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum ActionHistoryKind {
    Update,
    Install,
    Remove,
    Clean,
    Service,
    AI,
    Diagnostic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: ActionHistoryKind,
    pub description: String,
    pub success: bool,
}

/// Newest-first log of user-visible actions, capped at `MAX_HISTORY_ENTRIES`.
///
/// Best-effort: nothing here ever fails the caller. Appends from the same
/// process are serialized; several processes sharing the file may lose entries.
#[derive(Debug, Clone)]
pub struct ActionHistory {
    path: PathBuf,
    write_lock: Arc<TimedMutex<()>>,
}

impl ActionHistory {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Arc::new(TimedMutex::new("history", ())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, kind: ActionHistoryKind, description: &str, success: bool) {
        let _guard = self.write_lock.lock().await;
        let mut entries: Vec<ActionHistoryEntry> = load_json_or_default(&self.path).await;
        entries.insert(
            0,
            ActionHistoryEntry {
                timestamp: Utc::now(),
                kind,
                description: description.to_string(),
                success,
            },
        );
        entries.truncate(MAX_HISTORY_ENTRIES);
        if save_json_best_effort(&self.path, &entries).await {
            debug!("History entry recorded: {} {}", kind, description);
        }
    }

    /// The `count` most recent entries, newest first.
    pub async fn recent(&self, count: usize) -> Vec<ActionHistoryEntry> {
        let mut entries: Vec<ActionHistoryEntry> = load_json_or_default(&self.path).await;
        entries.truncate(count);
        entries
    }
}
