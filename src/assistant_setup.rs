use crate::history::ActionHistoryKind;
use crate::lock::TimedMutex;
use crate::probes::ProbeRunner;
use crate::runner_cli::CommandOutput;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const ASSISTANT_SETUP_SCRIPT: &str = "assistant_ia_setup.py";
pub const STATUS_TTL: Duration = Duration::from_secs(30);

/// Local installation state of the Ollama runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OllamaInstall {
    pub installed: bool,
    pub version: String,
    /// `systemctl --user is-active ollama` output.
    pub service_active: String,
    pub service_enabled: String,
    #[serde(rename = "listening11434")]
    pub listening: bool,
    pub models: Vec<String>,
}

/// Step proposed by the setup script to get the assistant running.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SetupAction {
    pub id: String,
    pub label: String,
    pub needs_sudo: bool,
    pub safe: bool,
    pub command: String,
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SetupStatus {
    pub ok: bool,
    pub ready: bool,
    pub endpoint: String,
    pub model_requested: String,
    pub ollama: OllamaInstall,
    pub actions: Vec<SetupAction>,
    pub message: String,
}

struct CachedStatus {
    fetched: Instant,
    model: String,
    status: SetupStatus,
}

/// Reports whether the local assistant runtime and model are installed and
/// runs the setup steps the user confirms.
///
/// Status is cached for `STATUS_TTL` per requested model so that UI refreshes
/// do not re-run the script. Failed lookups are not cached.
pub struct AssistantSetup {
    scripts: ProbeRunner,
    ttl: Duration,
    cache: TimedMutex<Option<CachedStatus>>,
}

impl AssistantSetup {
    pub fn new(scripts: ProbeRunner) -> Self {
        Self::with_ttl(scripts, STATUS_TTL)
    }

    pub fn with_ttl(scripts: ProbeRunner, ttl: Duration) -> Self {
        Self {
            scripts,
            ttl,
            cache: TimedMutex::new("assistant_setup", None),
        }
    }

    pub async fn status(&self, model: &str, force_refresh: bool) -> SetupStatus {
        let mut cache = self.cache.lock().await;
        if !force_refresh {
            if let Some(cached) = cache.as_ref() {
                if cached.model == model && cached.fetched.elapsed() < self.ttl {
                    debug!("Using cached assistant setup status for {}", model);
                    return cached.status.clone();
                }
            }
        }

        let args: Vec<&str> = if model.trim().is_empty() {
            Vec::new()
        } else {
            vec![model.trim()]
        };
        match self
            .scripts
            .run_json::<SetupStatus>(ASSISTANT_SETUP_SCRIPT, &args)
            .await
        {
            Ok(status) => {
                info!(
                    "Assistant setup: ready={} - {} action(s) proposed",
                    status.ready,
                    status.actions.len()
                );
                *cache = Some(CachedStatus {
                    fetched: Instant::now(),
                    model: model.to_string(),
                    status: status.clone(),
                });
                status
            }
            Err(e) => {
                warn!("Assistant setup status unavailable: {}", e);
                SetupStatus {
                    model_requested: model.to_string(),
                    message: format!("Assistant setup status unavailable: {}", e),
                    ..Default::default()
                }
            }
        }
    }

    /// Runs a setup step through the executor, elevated when the step asks
    /// for it. The cached status is dropped since the step changes it.
    pub async fn run_action(&self, action: &SetupAction) -> CommandOutput {
        if action.command.trim().is_empty() {
            return CommandOutput {
                success: false,
                output: "empty command".to_string(),
            };
        }
        info!("Running assistant setup step {}: {}", action.id, action.command);
        let output = self
            .scripts
            .runner()
            .run(&action.command, action.needs_sudo)
            .await;
        *self.cache.lock().await = None;

        self.scripts
            .record(
                ActionHistoryKind::Install,
                &format!("Assistant setup: {}", action.label),
                output.success,
            )
            .await;
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ActionHistory;
    use crate::runner_cli::CommandRunner;
    use tempfile::{tempdir, TempDir};

    // Appends one line to `calls` per run and echoes the requested model
    const STATUS_SCRIPT: &str = r#"echo run >> "$(dirname "$0")/calls"
printf '{"ok":true,"ready":false,"endpoint":"http://127.0.0.1:11434","modelRequested":"%s","ollama":{"installed":true,"version":"0.3.12","serviceActive":"inactive","serviceEnabled":"disabled","listening11434":false,"models":[]},"actions":[{"id":"pull_model","label":"Pull %s","needsSudo":false,"safe":true,"command":"ollama pull %s","notes":""}],"message":"model missing"}\n' "$1" "$1" "$1"
"#;

    fn setup_with(script: &str, ttl: Duration) -> (TempDir, ActionHistory, AssistantSetup) {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(ASSISTANT_SETUP_SCRIPT), script).unwrap();
        let history = ActionHistory::new(dir.path().join("historique.json"));
        let scripts = ProbeRunner::new(CommandRunner::new("env"), "sh", dir.path().to_path_buf())
            .with_history(history.clone());
        (dir, history, AssistantSetup::with_ttl(scripts, ttl))
    }

    fn calls(dir: &TempDir) -> usize {
        std::fs::read_to_string(dir.path().join("calls"))
            .map(|c| c.lines().count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_status_decodes_script_output() {
        let (_dir, _history, setup) = setup_with(STATUS_SCRIPT, STATUS_TTL);
        let status = setup.status("mistral", false).await;
        assert!(status.ok);
        assert!(!status.ready);
        assert_eq!(status.model_requested, "mistral");
        assert!(status.ollama.installed);
        assert!(!status.ollama.listening);
        assert_eq!(status.actions[0].id, "pull_model");
        assert_eq!(status.actions[0].command, "ollama pull mistral");
        assert!(!status.actions[0].needs_sudo);
    }

    #[tokio::test]
    async fn test_status_is_cached_per_model() {
        let (dir, _history, setup) = setup_with(STATUS_SCRIPT, STATUS_TTL);
        setup.status("mistral", false).await;
        setup.status("mistral", false).await;
        assert_eq!(calls(&dir), 1);

        setup.status("mistral", true).await;
        assert_eq!(calls(&dir), 2);

        let other = setup.status("llama3.1:8b", false).await;
        assert_eq!(other.model_requested, "llama3.1:8b");
        assert_eq!(calls(&dir), 3);
    }

    #[tokio::test]
    async fn test_expired_status_is_refetched() {
        let (dir, _history, setup) = setup_with(STATUS_SCRIPT, Duration::ZERO);
        setup.status("mistral", false).await;
        setup.status("mistral", false).await;
        assert_eq!(calls(&dir), 2);
    }

    #[tokio::test]
    async fn test_failed_status_is_not_cached() {
        let (dir, _history, setup) = setup_with("echo run >> \"$(dirname \"$0\")/calls\"\nexit 1\n", STATUS_TTL);
        let status = setup.status("mistral", false).await;
        assert!(!status.ok);
        assert!(status.message.contains("unavailable"));
        setup.status("mistral", false).await;
        assert_eq!(calls(&dir), 2);
    }

    #[tokio::test]
    async fn test_run_action_records_and_drops_cache() {
        let (dir, history, setup) = setup_with(STATUS_SCRIPT, STATUS_TTL);
        setup.status("mistral", false).await;

        let step = SetupAction {
            id: "start".to_string(),
            label: "Start Ollama".to_string(),
            needs_sudo: true,
            command: "echo started".to_string(),
            ..Default::default()
        };
        let output = setup.run_action(&step).await;
        assert!(output.success);
        assert_eq!(output.output.trim(), "started");

        let recent = history.recent(1).await;
        assert_eq!(recent[0].kind, ActionHistoryKind::Install);
        assert_eq!(recent[0].description, "Assistant setup: Start Ollama");

        setup.status("mistral", false).await;
        assert_eq!(calls(&dir), 2);

        let empty = setup.run_action(&SetupAction::default()).await;
        assert!(!empty.success);
    }
}
