use crate::assistant::ResourceUsage;
use crate::config::FoundationConfig;
use crate::error::ProbeError;
use crate::history::{ActionHistory, ActionHistoryKind};
use crate::runner_cli::CommandRunner;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none, DefaultOnNull};
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumIter, EnumString};
use tracing::{debug, info, warn};

pub const UPDATES_SCRIPT: &str = "check_updates.py";
pub const INSTALL_UPDATES_SCRIPT: &str = "install_updates.py";
pub const CLEANUP_SCRIPT: &str = "cleanup.py";
pub const SYSTEM_INFO_SCRIPT: &str = "system_info.py";
pub const SERVICES_SCRIPT: &str = "services.py";
pub const DIAGNOSTIC_SCRIPT: &str = "diagnostic.py";

const UNKNOWN_MANAGER: &str = "unknown";

// The probe scripts emit French keys, mapped here field by field

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageUpdate {
    #[serde(rename = "nom")]
    pub name: String,
    #[serde(rename = "versionActuelle")]
    pub current_version: String,
    #[serde(rename = "versionDisponible")]
    pub available_version: String,
    #[serde(rename = "depot")]
    pub repository: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateInfo {
    #[serde(rename = "gestionnaire")]
    pub manager: String,
    #[serde(rename = "nombre")]
    pub count: u32,
    #[serde(rename = "paquets")]
    pub packages: Vec<PackageUpdate>,
    #[serde(rename = "erreur")]
    pub error: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "nom")]
    pub name: String,
    #[serde(rename = "chemin")]
    pub path: String,
    #[serde(rename = "tailleMB")]
    pub size_mb: u64,
    #[serde(rename = "nombreFichiers")]
    pub file_count: Option<u32>,
    #[serde(rename = "nombrePaquets")]
    pub package_count: Option<u32>,
    pub description: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupInfo {
    #[serde(rename = "gestionnaire")]
    pub manager: String,
    #[serde(rename = "elements")]
    pub items: Vec<CleanupItem>,
    #[serde(rename = "tailleTotaleMB")]
    pub total_size_mb: u64,
    #[serde(rename = "nombreElements")]
    pub item_count: u32,
    #[serde(rename = "erreur")]
    pub error: Option<String>,
}

#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SystemInfo {
    pub distribution: String,
    pub distribution_id: String,
    pub kernel: String,
    pub cpu_model: String,
    /// 0 when the kernel does not expose the topology (psutil reports null).
    #[serde_as(as = "DefaultOnNull")]
    pub cpu_cores: u32,
    #[serde_as(as = "DefaultOnNull")]
    pub cpu_threads: u32,
    #[serde(rename = "ramTotaleMB")]
    pub ram_total_mb: u64,
    #[serde(rename = "ramUtiliseeMB")]
    pub ram_used_mb: u64,
    #[serde(rename = "ramLibreMB")]
    pub ram_free_mb: u64,
    #[serde(rename = "pourcentageRam")]
    pub ram_percent: f64,
    #[serde(rename = "pourcentageCpu")]
    pub cpu_percent: f64,
    #[serde(rename = "pourcentageDisque")]
    pub disk_percent: f64,
    #[serde(rename = "gestionnairePaquets")]
    pub package_manager: String,
    pub error: Option<String>,
}

impl SystemInfo {
    /// Load figures for the proactive analysis.
    pub fn usage(&self, pending_updates: u32) -> ResourceUsage {
        ResourceUsage {
            ram_percent: self.ram_percent,
            cpu_percent: self.cpu_percent,
            disk_percent: self.disk_percent,
            pending_updates,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceEntry {
    pub name: String,
    /// `systemctl is-active` output, e.g. "active" or "inactive".
    pub status: String,
    /// `systemctl is-enabled` output.
    pub enabled: String,
    pub unit: String,
}

impl ServiceEntry {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled == "enabled"
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceList {
    pub services: Vec<ServiceEntry>,
    pub count: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Enable,
    Disable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceControlResult {
    pub success: bool,
    pub service: String,
    pub action: String,
    pub message: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceLogs {
    pub service: String,
    pub logs: String,
    pub success: bool,
    pub error: Option<String>,
}

/// One progress line printed by the install script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallLog {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallResult {
    pub success: bool,
    pub message: String,
}

/// Overall verdict of a diagnostic, derived from the health score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
pub enum HealthState {
    #[serde(rename = "sain")]
    Healthy,
    #[serde(rename = "attention")]
    Attention,
    #[serde(rename = "probleme")]
    Problem,
    #[serde(rename = "erreur")]
    Error,
    #[default]
    #[serde(other)]
    Unknown,
}

impl HealthState {
    pub fn from_score(score: u32) -> Self {
        match score {
            80.. => HealthState::Healthy,
            60..=79 => HealthState::Attention,
            _ => HealthState::Problem,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailedUnit {
    #[serde(rename = "nom")]
    pub name: String,
    #[serde(rename = "etat")]
    pub state: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailedUnits {
    #[serde(rename = "nombreErreurs")]
    pub count: u32,
    #[serde(rename = "services")]
    pub units: Vec<FailedUnit>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalEntry {
    pub timestamp: String,
    pub service: String,
    pub message: String,
}

/// Error-priority journal lines of the last 24 hours.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalSummary {
    #[serde(rename = "nombreLogs")]
    pub count: u32,
    #[serde(rename = "logs")]
    pub entries: Vec<JournalEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskUsage {
    pub partition: String,
    #[serde(rename = "taille")]
    pub size: String,
    #[serde(rename = "utilise")]
    pub used: String,
    #[serde(rename = "disponible")]
    pub available: String,
    #[serde(rename = "pourcentage")]
    pub percent: u32,
}

/// One `ps aux` row, columns kept as printed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessUsage {
    #[serde(rename = "nom")]
    pub name: String,
    #[serde(rename = "utilisateur")]
    pub user: String,
    pub cpu: String,
    pub ram: String,
    pub pid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TopProcesses {
    pub top_cpu: Vec<ProcessUsage>,
    pub top_ram: Vec<ProcessUsage>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticInfo {
    pub timestamp: String,
    /// 0 to 100.
    #[serde(rename = "scoreSante")]
    pub health_score: u32,
    #[serde(rename = "etatGlobal")]
    pub state: HealthState,
    #[serde(rename = "messageGlobal")]
    pub message: String,
    #[serde(rename = "services")]
    pub failed_units: FailedUnits,
    #[serde(rename = "logs")]
    pub journal: JournalSummary,
    #[serde(rename = "disque")]
    pub disk: DiskUsage,
    #[serde(rename = "processus")]
    pub processes: TopProcesses,
    #[serde(rename = "erreur")]
    pub error: Option<String>,
}

/// Runs the external probe scripts and decodes the JSON document each one
/// prints. Failures come back inside the returned object, never as panics.
#[derive(Debug, Clone)]
pub struct ProbeRunner {
    runner: CommandRunner,
    interpreter: String,
    scripts_dir: PathBuf,
    history: Option<ActionHistory>,
}

impl ProbeRunner {
    pub fn new(runner: CommandRunner, interpreter: &str, scripts_dir: PathBuf) -> Self {
        Self {
            runner,
            interpreter: interpreter.to_string(),
            scripts_dir,
            history: None,
        }
    }

    pub fn from_config(config: &FoundationConfig) -> Self {
        Self::new(
            CommandRunner::from_config(config),
            &config.script_interpreter,
            config.scripts_dir.clone(),
        )
    }

    /// Records cleanup, service and update operations in `history`.
    pub fn with_history(mut self, history: ActionHistory) -> Self {
        self.history = Some(history);
        self
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    async fn script_argv(&self, script: &str, args: &[&str]) -> Result<Vec<String>, ProbeError> {
        let path = self.scripts_dir.join(script);
        if tokio::fs::metadata(&path).await.is_err() {
            return Err(ProbeError::Missing(path.display().to_string()));
        }
        let mut argv = Vec::with_capacity(args.len() + 2);
        argv.push(self.interpreter.clone());
        argv.push(path.display().to_string());
        argv.extend(args.iter().map(|a| a.to_string()));
        Ok(argv)
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    pub(crate) async fn run_json<T: DeserializeOwned>(
        &self,
        script: &str,
        args: &[&str],
    ) -> Result<T, ProbeError> {
        let argv = self.script_argv(script, args).await?;
        let stdout = self.runner.run_argv(&argv, false).await?;
        serde_json::from_str(stdout.trim())
            .map_err(|e| ProbeError::Malformed(format!("{}: {}", script, e)))
    }

    pub(crate) async fn record(&self, kind: ActionHistoryKind, description: &str, success: bool) {
        if let Some(history) = &self.history {
            history.append(kind, description, success).await;
        }
    }

    pub async fn check_updates(&self) -> UpdateInfo {
        match self.run_json::<UpdateInfo>(UPDATES_SCRIPT, &[]).await {
            Ok(info) => {
                debug!("{} pending update(s) via {}", info.count, info.manager);
                info
            }
            Err(e) => {
                warn!("Update check failed: {}", e);
                UpdateInfo {
                    manager: UNKNOWN_MANAGER.to_string(),
                    error: Some(format!("Update check failed: {}", e)),
                    ..Default::default()
                }
            }
        }
    }

    pub async fn analyze_cleanup(&self) -> CleanupInfo {
        match self.run_json::<CleanupInfo>(CLEANUP_SCRIPT, &[]).await {
            Ok(info) => {
                self.record(
                    ActionHistoryKind::Clean,
                    &format!(
                        "Cleanup analysis: {} item(s), {} MB",
                        info.item_count, info.total_size_mb
                    ),
                    info.error.is_none(),
                )
                .await;
                info
            }
            Err(e) => {
                warn!("Cleanup analysis failed: {}", e);
                let message = format!("Cleanup analysis failed: {}", e);
                self.record(ActionHistoryKind::Clean, &message, false).await;
                CleanupInfo {
                    manager: UNKNOWN_MANAGER.to_string(),
                    error: Some(message),
                    ..Default::default()
                }
            }
        }
    }

    pub async fn system_info(&self) -> SystemInfo {
        self.run_json::<SystemInfo>(SYSTEM_INFO_SCRIPT, &[])
            .await
            .unwrap_or_else(|e| {
                warn!("System information unavailable: {}", e);
                SystemInfo {
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            })
    }

    pub async fn list_services(&self) -> ServiceList {
        self.run_json::<ServiceList>(SERVICES_SCRIPT, &["list"])
            .await
            .unwrap_or_else(|e| {
                warn!("Service listing failed: {}", e);
                ServiceList {
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            })
    }

    /// Starts, stops, restarts, enables or disables a systemd service.
    /// The script asks for elevation itself.
    pub async fn control_service(&self, service: &str, action: ServiceAction) -> ServiceControlResult {
        let action_name = action.to_string();
        let result = self
            .run_json::<ServiceControlResult>(SERVICES_SCRIPT, &["control", service, action_name.as_str()])
            .await
            .unwrap_or_else(|e| ServiceControlResult {
                success: false,
                service: service.to_string(),
                action: action_name.clone(),
                message: e.to_string(),
            });
        info!(
            "Service {} {}: {}",
            service,
            action_name,
            if result.success { "ok" } else { "failed" }
        );
        self.record(
            ActionHistoryKind::Service,
            &format!("{} {}: {}", action_name, service, result.message),
            result.success,
        )
        .await;
        result
    }

    pub async fn service_logs(&self, service: &str, lines: u32) -> ServiceLogs {
        let lines = lines.to_string();
        self.run_json::<ServiceLogs>(SERVICES_SCRIPT, &["logs", service, lines.as_str()])
            .await
            .unwrap_or_else(|e| ServiceLogs {
                service: service.to_string(),
                success: false,
                error: Some(e.to_string()),
                ..Default::default()
            })
    }

    /// Health report: failed units, journal errors, root disk and the
    /// heaviest processes. Recorded in the history as a diagnostic.
    pub async fn diagnose(&self) -> DiagnosticInfo {
        let info = match self.run_json::<DiagnosticInfo>(DIAGNOSTIC_SCRIPT, &[]).await {
            Ok(mut info) => {
                if info.state == HealthState::Unknown && info.error.is_none() {
                    info.state = HealthState::from_score(info.health_score);
                }
                info
            }
            Err(e) => {
                warn!("Diagnostic failed: {}", e);
                DiagnosticInfo {
                    timestamp: chrono::Local::now().to_rfc3339(),
                    state: HealthState::Error,
                    message: "Diagnostic failed".to_string(),
                    error: Some(format!("Diagnostic failed: {}", e)),
                    ..Default::default()
                }
            }
        };
        info!(
            "Diagnostic done - health: {}/100 - failed units: {} - journal errors: {}",
            info.health_score, info.failed_units.count, info.journal.count
        );
        self.record(
            ActionHistoryKind::Diagnostic,
            &format!("Diagnostic: health {}/100 ({})", info.health_score, info.state),
            info.error.is_none(),
        )
        .await;
        info
    }

    /// Installs pending updates, handing every progress line to `on_log`.
    /// Lines that are not JSON are forwarded as `info` entries.
    pub async fn install_updates<F>(&self, mut on_log: F) -> InstallResult
    where
        F: FnMut(&InstallLog) + Send,
    {
        let argv = match self.script_argv(INSTALL_UPDATES_SCRIPT, &[]).await {
            Ok(argv) => argv,
            Err(e) => {
                let message = format!("Update installation failed: {}", e);
                self.record(ActionHistoryKind::Update, &message, false).await;
                return InstallResult {
                    success: false,
                    message,
                };
            }
        };

        let mut last_message = String::new();
        let outcome = self
            .runner
            .run_argv_streaming(&argv, false, |line: &str| {
                let line = line.trim();
                if line.is_empty() {
                    return;
                }
                let entry = serde_json::from_str::<InstallLog>(line).unwrap_or_else(|_| InstallLog {
                    kind: "info".to_string(),
                    message: line.to_string(),
                    timestamp: String::new(),
                });
                last_message = entry.message.clone();
                on_log(&entry);
            })
            .await;

        let result = match outcome {
            Ok(()) => InstallResult {
                success: true,
                message: if last_message.is_empty() {
                    "Updates installed".to_string()
                } else {
                    last_message
                },
            },
            Err(e) => InstallResult {
                success: false,
                message: format!("Update installation failed: {}", e),
            },
        };
        self.record(ActionHistoryKind::Update, &result.message, result.success)
            .await;
        result
    }
}
