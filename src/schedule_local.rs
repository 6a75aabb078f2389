use crate::persist::{load_json, save_json_best_effort};
use crate::schedule::{sort_tasks, ScheduledTask};
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// One element of the stored array. Entries this version cannot read are
/// written back untouched.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum StoredEntry {
    Task(ScheduledTask),
    Unreadable(Value),
}

impl StoredEntry {
    fn decode(raw: Value) -> Self {
        match serde_json::from_value::<ScheduledTask>(raw.clone()) {
            Ok(task) => match task.validate() {
                Ok(()) => StoredEntry::Task(task),
                Err(e) => {
                    warn!("Skipping scheduled task {}: {}", task.id, e);
                    StoredEntry::Unreadable(raw)
                }
            },
            Err(e) => {
                warn!("Skipping unreadable scheduled task: {}", e);
                StoredEntry::Unreadable(raw)
            }
        }
    }

    fn task(&self) -> Option<&ScheduledTask> {
        match self {
            StoredEntry::Task(task) => Some(task),
            StoredEntry::Unreadable(_) => None,
        }
    }

    fn task_mut(&mut self) -> Option<&mut ScheduledTask> {
        match self {
            StoredEntry::Task(task) => Some(task),
            StoredEntry::Unreadable(_) => None,
        }
    }

    fn has_id(&self, id: &str) -> bool {
        match self {
            StoredEntry::Task(task) => task.id == id,
            StoredEntry::Unreadable(raw) => raw.get("id").and_then(Value::as_str) == Some(id),
        }
    }
}

/// Task list kept as a JSON array in the user configuration directory.
///
/// Every operation reads and rewrites the whole file. Single-writer only.
/// A file that cannot be parsed is never overwritten.
#[derive(Debug, Clone)]
pub struct LocalTaskStore {
    path: PathBuf,
}

impl LocalTaskStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<StoredEntry>> {
        let raw: Vec<Value> = load_json(&self.path).await?.unwrap_or_default();
        Ok(raw.into_iter().map(StoredEntry::decode).collect())
    }

    // Mutations refuse to touch a file they could not parse
    async fn load_for_write(&self) -> Option<Vec<StoredEntry>> {
        match self.load().await {
            Ok(entries) => Some(entries),
            Err(e) => {
                error!("Scheduled tasks left untouched, file unreadable: {:#}", e);
                None
            }
        }
    }

    async fn save(&self, entries: &[StoredEntry]) -> bool {
        save_json_best_effort(&self.path, entries).await
    }

    pub async fn list(&self) -> Vec<ScheduledTask> {
        let mut tasks: Vec<ScheduledTask> = match self.load().await {
            Ok(entries) => entries
                .into_iter()
                .filter_map(|entry| match entry {
                    StoredEntry::Task(task) => Some(task),
                    StoredEntry::Unreadable(_) => None,
                })
                .collect(),
            Err(e) => {
                error!("Could not load scheduled tasks: {:#}", e);
                Vec::new()
            }
        };
        sort_tasks(&mut tasks);
        tasks
    }

    pub async fn add(&self, task: &ScheduledTask) -> bool {
        if let Err(e) = task.validate() {
            error!("Refusing to add task '{}': {}", task.name, e);
            return false;
        }
        let Some(mut entries) = self.load_for_write().await else {
            return false;
        };
        if entries.iter().any(|e| e.has_id(&task.id)) {
            error!("Task {} already exists", task.id);
            return false;
        }
        entries.push(StoredEntry::Task(task.clone()));
        let saved = self.save(&entries).await;
        if saved {
            info!("Scheduled task added: {}", task.name);
        }
        saved
    }

    pub async fn remove(&self, id: &str) -> bool {
        let Some(mut entries) = self.load_for_write().await else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.task().map_or(true, |t| t.id != id));
        if entries.len() == before {
            warn!("No scheduled task with id {}", id);
            return false;
        }
        let saved = self.save(&entries).await;
        if saved {
            info!("Scheduled task removed: {}", id);
        }
        saved
    }

    pub async fn toggle(&self, id: &str) -> bool {
        let Some(mut entries) = self.load_for_write().await else {
            return false;
        };
        let Some(task) = entries
            .iter_mut()
            .filter_map(StoredEntry::task_mut)
            .find(|t| t.id == id)
        else {
            warn!("No scheduled task with id {}", id);
            return false;
        };
        task.enabled = !task.enabled;
        info!(
            "Scheduled task {} {}",
            task.name,
            if task.enabled { "enabled" } else { "disabled" }
        );
        self.save(&entries).await
    }

    pub async fn get(&self, id: &str) -> Option<ScheduledTask> {
        self.list().await.into_iter().find(|t| t.id == id)
    }

    /// Replaces the stored task carrying the same id. The stored task is
    /// left untouched when the new one is invalid or unknown.
    pub async fn update(&self, task: &ScheduledTask) -> bool {
        if let Err(e) = task.validate() {
            error!("Refusing to update task '{}': {}", task.name, e);
            return false;
        }
        let Some(mut entries) = self.load_for_write().await else {
            return false;
        };
        let Some(stored) = entries
            .iter_mut()
            .filter_map(StoredEntry::task_mut)
            .find(|t| t.id == task.id)
        else {
            warn!("No scheduled task with id {}", task.id);
            return false;
        };
        *stored = task.clone();
        let saved = self.save(&entries).await;
        if saved {
            info!("Scheduled task updated: {}", task.name);
        }
        saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{DaySelector, TaskKind};
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, LocalTaskStore) {
        let dir = tempdir().unwrap();
        let store = LocalTaskStore::new(dir.path().join("taches.json"));
        (dir, store)
    }

    #[tokio::test]
    async fn test_add_then_list_round_trip() {
        let (_dir, store) = store();
        let task = ScheduledTask::new(
            TaskKind::Cleanup,
            "Nightly cleanup",
            "Remove caches",
            DaySelector::Day(3),
            2,
            15,
        )
        .unwrap();
        assert!(store.add(&task).await);

        let listed = store.list().await;
        assert_eq!(listed.len(), 1);
        let got = &listed[0];
        assert_eq!(got.id, task.id);
        assert_eq!(got.kind, TaskKind::Cleanup);
        assert_eq!(got.name, "Nightly cleanup");
        assert_eq!((got.day, got.hour, got.minute), (DaySelector::Day(3), 2, 15));
        assert_eq!(got, &task);
    }

    #[tokio::test]
    async fn test_every_day_is_stored_as_sentinel() {
        let (_dir, store) = store();
        let task = ScheduledTask::new(TaskKind::Update, "Daily", "", DaySelector::EveryDay, 6, 0).unwrap();
        assert!(store.add(&task).await);

        let raw: Vec<Value> = load_json(store.path()).await.unwrap().unwrap();
        assert_eq!(raw[0]["day"], -1);
        assert_eq!(store.get(&task.id).await.unwrap().day, DaySelector::EveryDay);
    }

    #[tokio::test]
    async fn test_toggle_remove_update() {
        let (_dir, store) = store();
        let task = ScheduledTask::new(TaskKind::Report, "Report", "", DaySelector::Day(5), 18, 0).unwrap();
        assert!(store.add(&task).await);
        assert!(!store.add(&task).await, "Duplicate ids are rejected");

        assert!(store.toggle(&task.id).await);
        assert!(!store.get(&task.id).await.unwrap().enabled);
        assert!(!store.toggle("missing").await);

        let mut edited = store.get(&task.id).await.unwrap();
        edited.hour = 20;
        assert!(store.update(&edited).await);
        let got = store.get(&task.id).await.unwrap();
        assert_eq!(got.hour, 20);
        assert_eq!(store.list().await.len(), 1);

        assert!(store.remove(&task.id).await);
        assert!(!store.remove(&task.id).await);
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_skips_bad_entries() {
        let (_dir, store) = store();
        let late = ScheduledTask::new(TaskKind::Update, "late", "", DaySelector::Day(4), 22, 0).unwrap();
        let early = ScheduledTask::new(TaskKind::Update, "early", "", DaySelector::Day(1), 8, 0).unwrap();
        let mut raw = vec![
            serde_json::to_value(&late).unwrap(),
            serde_json::json!({"id": "broken", "hour": "noon"}),
            serde_json::to_value(&early).unwrap(),
        ];
        let mut bad_hour = serde_json::to_value(&early).unwrap();
        bad_hour["id"] = "bad-hour".into();
        bad_hour["hour"] = 42.into();
        raw.push(bad_hour);
        tokio::fs::write(store.path(), serde_json::to_string(&raw).unwrap())
            .await
            .unwrap();

        let names: Vec<String> = store.list().await.into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn test_invalid_task_is_rejected() {
        let (_dir, store) = store();
        let mut task = ScheduledTask::new(TaskKind::Update, "x", "", DaySelector::Day(1), 1, 1).unwrap();
        task.hour = 30;
        assert!(!store.add(&task).await);
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_update_keeps_the_stored_task() {
        let (_dir, store) = store();
        let task = ScheduledTask::new(TaskKind::Update, "Weekly", "", DaySelector::Day(0), 9, 30).unwrap();
        assert!(store.add(&task).await);

        let mut edited = task.clone();
        edited.hour = 30;
        assert!(!store.update(&edited).await);
        assert_eq!(store.get(&task.id).await.unwrap(), task);

        let unknown = ScheduledTask::new(TaskKind::Update, "Other", "", DaySelector::Day(0), 9, 30).unwrap();
        assert!(!store.update(&unknown).await);
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_entries_survive_mutations() {
        let (_dir, store) = store();
        let task = ScheduledTask::new(TaskKind::Cleanup, "Kept", "", DaySelector::Day(2), 3, 0).unwrap();
        let mut foreign = serde_json::to_value(&task).unwrap();
        foreign["id"] = "from-a-newer-version".into();
        foreign["kind"] = "Backup".into();
        let raw = vec![serde_json::to_value(&task).unwrap(), foreign.clone()];
        tokio::fs::write(store.path(), serde_json::to_string(&raw).unwrap())
            .await
            .unwrap();

        assert!(store.toggle(&task.id).await);
        let other = ScheduledTask::new(TaskKind::Report, "New", "", DaySelector::Day(1), 1, 0).unwrap();
        assert!(store.add(&other).await);
        assert!(store.remove(&other.id).await);

        let on_disk: Vec<Value> = load_json(store.path()).await.unwrap().unwrap();
        assert_eq!(on_disk.len(), 2);
        assert_eq!(on_disk[1], foreign);

        let mut clash = other.clone();
        clash.id = "from-a-newer-version".to_string();
        assert!(!store.add(&clash).await, "Ids of unreadable entries stay reserved");
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_never_overwritten() {
        let (_dir, store) = store();
        tokio::fs::write(store.path(), r#"[{"id":"#).await.unwrap();

        assert!(store.list().await.is_empty());
        let task = ScheduledTask::new(TaskKind::Update, "x", "", DaySelector::Day(1), 1, 1).unwrap();
        assert!(!store.add(&task).await);
        assert!(!store.toggle(&task.id).await);
        assert_eq!(
            tokio::fs::read_to_string(store.path()).await.unwrap(),
            r#"[{"id":"#
        );
    }
}
