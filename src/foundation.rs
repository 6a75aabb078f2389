use crate::assistant::AssistantMediator;
use crate::assistant_client::OllamaClient;
use crate::assistant_setup::AssistantSetup;
use crate::audit::AuditEngine;
use crate::config::FoundationConfig;
use crate::context::SystemContextCache;
use crate::error::AssistantError;
use crate::history::ActionHistory;
use crate::host_probe::{HostProbe, LinuxHostProbe};
use crate::probes::ProbeRunner;
use crate::runner_cli::CommandRunner;
use crate::schedule_factory::SchedulerFactory;
use crate::theme::ThemeStore;
use std::sync::Arc;
use tracing::info;

/// Every core component, wired once from a configuration and handed to the
/// host. Components receive their collaborators here, none of them look
/// anything up globally.
pub struct Foundation {
    pub config: FoundationConfig,
    pub runner: CommandRunner,
    pub history: ActionHistory,
    pub theme: ThemeStore,
    pub audit: AuditEngine,
    pub context: Arc<SystemContextCache>,
    pub scheduler: SchedulerFactory,
    pub ollama: Arc<OllamaClient>,
    pub assistant: AssistantMediator,
    pub assistant_setup: AssistantSetup,
    pub probes: ProbeRunner,
}

impl Foundation {
    pub fn new(config: FoundationConfig) -> Result<Self, AssistantError> {
        let runner = CommandRunner::from_config(&config);
        let probe: Arc<dyn HostProbe> = Arc::new(LinuxHostProbe::new(runner.clone()));
        let history = ActionHistory::new(config.history_path());
        let audit = AuditEngine::new(probe.clone(), runner.clone());
        let context = Arc::new(SystemContextCache::new(
            probe,
            audit.clone(),
            config.context_ttl,
        ));
        let ollama = Arc::new(OllamaClient::from_config(&config)?);
        let assistant = AssistantMediator::new(ollama.clone(), runner.clone(), history.clone());
        let probes = ProbeRunner::from_config(&config).with_history(history.clone());

        info!(
            "Foundation ready, configuration in {}",
            config.config_dir.display()
        );
        Ok(Self {
            theme: ThemeStore::new(config.theme_path()),
            scheduler: SchedulerFactory::for_host(runner.clone(), config.tasks_path()),
            assistant_setup: AssistantSetup::new(probes.clone()),
            probes,
            config,
            runner,
            history,
            audit,
            context,
            ollama,
            assistant,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ActionHistoryKind;
    use crate::theme::Theme;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_components_share_the_config_dir() {
        let dir = tempdir().unwrap();
        let config = FoundationConfig {
            config_dir: dir.path().to_path_buf(),
            ..FoundationConfig::default()
        };
        let foundation = Foundation::new(config).unwrap();

        assert_eq!(foundation.history.path(), dir.path().join("historique.json"));
        foundation
            .history
            .append(ActionHistoryKind::Diagnostic, "self test", true)
            .await;
        assert!(dir.path().join("historique.json").exists());

        assert!(foundation.theme.save(Theme::Dark).await);
        assert!(dir.path().join("theme.json").exists());
        assert_eq!(foundation.ollama.model(), "mistral");
        assert_eq!(foundation.context.ttl(), foundation.config.context_ttl);
        assert_eq!(foundation.probes.scripts_dir(), foundation.config.scripts_dir.as_path());
    }
}
