use crate::error::SchedulerError;
use crate::runner_cli::{binary_exists, CommandRunner};
use crate::schedule::ScheduledTask;
use crate::schedule_cron::{CronTaskStore, CrontabIo, SystemCrontab};
use crate::schedule_local::LocalTaskStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use strum_macros::{Display, EnumString};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum SchedulerKind {
    Systemd,
    Cron,
    None,
}

/// Finds which task scheduler the host offers.
#[async_trait]
pub trait SchedulerDetector: Send + Sync {
    async fn detect(&self) -> SchedulerKind;
}

/// A working user systemd instance wins, then a `crontab` binary.
#[derive(Debug, Clone, Default)]
pub struct HostSchedulerDetector {
    runner: CommandRunner,
}

impl HostSchedulerDetector {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl SchedulerDetector for HostSchedulerDetector {
    async fn detect(&self) -> SchedulerKind {
        let argv = vec![
            "systemctl".to_string(),
            "--user".to_string(),
            "status".to_string(),
        ];
        if self.runner.run_argv(&argv, false).await.is_ok() {
            return SchedulerKind::Systemd;
        }
        if binary_exists("crontab") {
            return SchedulerKind::Cron;
        }
        SchedulerKind::None
    }
}

/// The selected task backend.
#[derive(Clone)]
pub enum SchedulerBackend {
    LocalStore(LocalTaskStore),
    Cron(CronTaskStore),
}

impl SchedulerBackend {
    pub async fn list(&self) -> Vec<ScheduledTask> {
        match self {
            SchedulerBackend::LocalStore(store) => store.list().await,
            SchedulerBackend::Cron(store) => store.list().await,
        }
    }

    pub async fn add(&self, task: &ScheduledTask) -> bool {
        match self {
            SchedulerBackend::LocalStore(store) => store.add(task).await,
            SchedulerBackend::Cron(store) => store.add(task).await,
        }
    }

    pub async fn remove(&self, id: &str) -> bool {
        match self {
            SchedulerBackend::LocalStore(store) => store.remove(id).await,
            SchedulerBackend::Cron(store) => store.remove(id).await,
        }
    }

    pub async fn toggle(&self, id: &str) -> bool {
        match self {
            SchedulerBackend::LocalStore(store) => store.toggle(id).await,
            SchedulerBackend::Cron(store) => store.toggle(id).await,
        }
    }

    pub async fn get(&self, id: &str) -> Option<ScheduledTask> {
        match self {
            SchedulerBackend::LocalStore(store) => store.get(id).await,
            SchedulerBackend::Cron(store) => store.get(id).await,
        }
    }

    pub async fn update(&self, task: &ScheduledTask) -> bool {
        match self {
            SchedulerBackend::LocalStore(store) => store.update(task).await,
            SchedulerBackend::Cron(store) => store.update(task).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SchedulerBackend::LocalStore(_) => "local",
            SchedulerBackend::Cron(_) => "cron",
        }
    }
}

/// Detects the scheduler once and keeps the matching backend until
/// `reset_cache` is called.
pub struct SchedulerFactory {
    detector: Arc<dyn SchedulerDetector>,
    tasks_path: PathBuf,
    crontab: Arc<dyn CrontabIo>,
    cached: Mutex<Option<(SchedulerKind, SchedulerBackend)>>,
}

impl SchedulerFactory {
    pub fn new(
        detector: Arc<dyn SchedulerDetector>,
        tasks_path: PathBuf,
        crontab: Arc<dyn CrontabIo>,
    ) -> Self {
        Self {
            detector,
            tasks_path,
            crontab,
            cached: Mutex::new(None),
        }
    }

    /// Factory wired to the local host.
    pub fn for_host(runner: CommandRunner, tasks_path: PathBuf) -> Self {
        Self::new(
            Arc::new(HostSchedulerDetector::new(runner.clone())),
            tasks_path,
            Arc::new(SystemCrontab::new(runner)),
        )
    }

    pub async fn backend(&self) -> Result<SchedulerBackend, SchedulerError> {
        let cached = self.cached.lock().clone();
        if let Some((kind, backend)) = cached {
            debug!("Using cached {} scheduler", kind);
            return Ok(backend);
        }

        let kind = self.detector.detect().await;
        let backend = match kind {
            SchedulerKind::Systemd => {
                SchedulerBackend::LocalStore(LocalTaskStore::new(self.tasks_path.clone()))
            }
            SchedulerKind::Cron => SchedulerBackend::Cron(CronTaskStore::new(self.crontab.clone())),
            SchedulerKind::None => return Err(SchedulerError::NoSchedulerAvailable),
        };
        info!("Scheduler detected: {} ({} backend)", kind, backend.name());
        *self.cached.lock() = Some((kind, backend.clone()));
        Ok(backend)
    }

    /// Forgets the detection result, e.g. after cron was installed.
    pub fn reset_cache(&self) {
        *self.cached.lock() = None;
        info!("Scheduler cache reset");
    }

    /// Cached kind, or a fresh detection when nothing is cached.
    pub async fn scheduler_kind(&self) -> SchedulerKind {
        let cached = self.cached.lock().as_ref().map(|(kind, _)| *kind);
        match cached {
            Some(kind) => kind,
            None => self.detector.detect().await,
        }
    }
}
