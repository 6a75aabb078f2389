use crate::assistant_client::AssistantBackend;
use crate::context::{should_force_refresh, SystemContextCache};
use crate::error::AssistantError;
use crate::history::{ActionHistory, ActionHistoryKind};
use crate::runner_cli::CommandRunner;
use crate::shell_words;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use strum_macros::{Display, EnumString};
use tracing::{debug, error, info, warn};

pub const RAM_ALERT_PERCENT: f64 = 80.0;
pub const DISK_ALERT_PERCENT: f64 = 85.0;

const SYSTEM_PROMPT: &str = "You are an expert Linux assistant helping the user maintain their machine. \
Answer clearly and concisely in plain text.
When the user asks you to install or remove a package or to run a command, reply with a single JSON object and nothing else:
{\"type\":\"action\",\"action\":\"install|remove|execute\",\"command\":\"<shell command>\",\"package\":\"<package or null>\",\"explanation\":\"<one sentence for the user>\",\"needsSudo\":true|false}
Never wrap the JSON in prose or code fences. The command is only run after the user confirms it.";

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ActionKind {
    Install,
    Remove,
    #[default]
    Execute,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum ActionState {
    #[default]
    Pending,
    Executed,
    Failed,
    Refused,
}

// Wire form of an action proposal
#[derive(Debug, Deserialize)]
struct ActionPayload {
    #[serde(rename = "type", default)]
    payload_type: Option<String>,
    #[serde(default)]
    action: ActionKind,
    command: String,
    #[serde(default)]
    package: Option<String>,
    #[serde(default)]
    explanation: String,
    #[serde(rename = "needsSudo", default)]
    needs_sudo: bool,
}

/// A command proposed by the assistant, held until the user decides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantAction {
    pub kind: ActionKind,
    pub command: String,
    pub package: Option<String>,
    pub explanation: String,
    pub needs_sudo: bool,
    pub state: ActionState,
    /// Output gathered while executing, or the reason it did not run.
    pub result: String,
}

impl AssistantAction {
    pub fn is_valid(&self) -> bool {
        !self.command.trim().is_empty()
    }

    pub fn is_pending(&self) -> bool {
        self.state == ActionState::Pending
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    PlainText(String),
    ActionProposed(AssistantAction),
}

/// Classifies a backend reply. Only a lone, well-formed JSON object with a
/// non-empty command becomes an action, anything else is shown as text.
pub fn parse_response(text: &str) -> TurnOutcome {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return TurnOutcome::PlainText(text.to_string());
    }
    let payload: ActionPayload = match serde_json::from_str(trimmed) {
        Ok(payload) => payload,
        Err(e) => {
            debug!("JSON-shaped reply is not an action: {}", e);
            return TurnOutcome::PlainText(text.to_string());
        }
    };
    if let Some(kind) = &payload.payload_type {
        if kind != "action" {
            return TurnOutcome::PlainText(text.to_string());
        }
    }
    let action = AssistantAction {
        kind: payload.action,
        command: payload.command.trim().to_string(),
        package: payload.package.filter(|p| !p.trim().is_empty()),
        explanation: payload.explanation,
        needs_sudo: payload.needs_sudo,
        state: ActionState::Pending,
        result: String::new(),
    };
    if action.is_valid() {
        TurnOutcome::ActionProposed(action)
    } else {
        TurnOutcome::PlainText(text.to_string())
    }
}

/// Host load figures fed to the proactive analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub ram_percent: f64,
    pub cpu_percent: f64,
    pub disk_percent: f64,
    pub pending_updates: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advice {
    InspectHeavyProcesses,
    Cleanup,
    InstallUpdates,
    AllClear,
}

impl fmt::Display for Advice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advice::InspectHeavyProcesses => {
                write!(f, "Memory is nearly full, check which processes use the most RAM.")
            }
            Advice::Cleanup => write!(f, "The disk is almost full, run a cleanup."),
            Advice::InstallUpdates => write!(f, "Updates are waiting, install them."),
            Advice::AllClear => write!(f, "Your system is running fine."),
        }
    }
}

/// Fixed threshold policy, `AllClear` only when nothing else applies.
pub fn advice_for(usage: &ResourceUsage) -> Vec<Advice> {
    let mut advice = Vec::new();
    if usage.ram_percent > RAM_ALERT_PERCENT {
        advice.push(Advice::InspectHeavyProcesses);
    }
    if usage.disk_percent > DISK_ALERT_PERCENT {
        advice.push(Advice::Cleanup);
    }
    if usage.pending_updates > 0 {
        advice.push(Advice::InstallUpdates);
    }
    if advice.is_empty() {
        advice.push(Advice::AllClear);
    }
    advice
}

fn analysis_prompt(usage: &ResourceUsage) -> String {
    format!(
        "You are an expert Linux assistant. Look at this system state and give 1 or 2 SHORT, actionable suggestions.

Current state:
- RAM used: {:.1}%
- CPU used: {:.1}%
- Disk used: {:.1}%
- Pending updates: {}

Rules:
- If RAM > {:.0}%: suggest looking at the heaviest processes
- If Disk > {:.0}%: suggest a cleanup
- If pending updates > 0: suggest installing them
- Otherwise: say that everything is fine

Answer in 2-3 sentences at most.",
        usage.ram_percent,
        usage.cpu_percent,
        usage.disk_percent,
        usage.pending_updates,
        RAM_ALERT_PERCENT,
        DISK_ALERT_PERCENT,
    )
}

/// Turns questions into replies or confirmable actions, and runs the actions
/// the user accepts.
pub struct AssistantMediator {
    backend: Arc<dyn AssistantBackend>,
    runner: CommandRunner,
    history: ActionHistory,
}

impl AssistantMediator {
    pub fn new(
        backend: Arc<dyn AssistantBackend>,
        runner: CommandRunner,
        history: ActionHistory,
    ) -> Self {
        Self {
            backend,
            runner,
            history,
        }
    }

    pub fn build_prompt(question: &str, context_json: Option<&str>) -> String {
        match context_json {
            Some(context) => format!(
                "{}\n\nCurrent system context (JSON):\n{}\n\nQuestion: {}",
                SYSTEM_PROMPT, context, question
            ),
            None => format!("{}\n\nQuestion: {}", SYSTEM_PROMPT, question),
        }
    }

    pub async fn ask(
        &self,
        question: &str,
        context_json: Option<&str>,
    ) -> Result<TurnOutcome, AssistantError> {
        let prompt = Self::build_prompt(question, context_json);
        let reply = self.backend.generate(&prompt).await?;
        Ok(parse_response(&reply))
    }

    /// Streams the reply as it is generated, then classifies the whole text.
    pub async fn ask_streaming(
        &self,
        question: &str,
        context_json: Option<&str>,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<TurnOutcome, AssistantError> {
        let prompt = Self::build_prompt(question, context_json);
        let reply = self.backend.generate_streaming(&prompt, on_chunk).await?;
        Ok(parse_response(&reply))
    }

    /// Grounds the question in a context snapshot, refreshed first when the
    /// question is about the live state of the machine.
    pub async fn ask_grounded(
        &self,
        question: &str,
        context: &SystemContextCache,
    ) -> Result<TurnOutcome, AssistantError> {
        let snapshot = context.get_snapshot(should_force_refresh(question)).await;
        self.ask(question, Some(&snapshot.to_prompt_json())).await
    }

    /// Runs a pending action, handing each output line to `on_chunk` and
    /// recording the outcome in the history.
    ///
    /// Operator-free commands are tokenized and run without a shell. Commands
    /// with pipes or redirections go through `bash -c` as a single argument.
    pub async fn execute<F>(
        &self,
        action: &mut AssistantAction,
        mut on_chunk: F,
    ) -> Result<(), AssistantError>
    where
        F: FnMut(&str) + Send,
    {
        if !action.is_pending() {
            return Err(AssistantError::AlreadyResolved);
        }
        if !action.is_valid() {
            return Err(AssistantError::EmptyCommand);
        }
        info!("Executing assistant action: {}", action.command);

        let mut buffer = String::new();
        let outcome = {
            let on_line = |line: &str| {
                buffer.push_str(line);
                buffer.push('\n');
                on_chunk(line);
            };
            match shell_words::to_argv(&action.command) {
                Some(argv) => {
                    self.runner
                        .run_argv_streaming(&argv, action.needs_sudo, on_line)
                        .await
                }
                None => {
                    self.runner
                        .run_streaming(&action.command, action.needs_sudo, on_line)
                        .await
                }
            }
        };

        match outcome {
            Ok(()) => {
                action.state = ActionState::Executed;
                action.result = buffer;
                self.history
                    .append(
                        ActionHistoryKind::AI,
                        &format!("AI command executed: {}", action.command),
                        true,
                    )
                    .await;
                Ok(())
            }
            Err(e) => {
                error!("Assistant action failed: {}", e);
                action.state = ActionState::Failed;
                buffer.push_str(&format!("Error: {}", e));
                action.result = buffer;
                self.history
                    .append(
                        ActionHistoryKind::AI,
                        &format!("AI command failed: {}", action.command),
                        false,
                    )
                    .await;
                Err(e.into())
            }
        }
    }

    /// Declines a pending action. Nothing is run or recorded.
    pub fn refuse(&self, action: &mut AssistantAction) -> Result<(), AssistantError> {
        if !action.is_pending() {
            return Err(AssistantError::AlreadyResolved);
        }
        action.state = ActionState::Refused;
        action.result = "Action cancelled by the user".to_string();
        info!("Assistant action refused: {}", action.command);
        Ok(())
    }

    /// Short advisory text about the host load. Never executes anything.
    /// Falls back to the local policy wording when the backend fails.
    pub async fn proactive_analysis(&self, usage: &ResourceUsage) -> String {
        let advice = advice_for(usage);
        match self.backend.generate(&analysis_prompt(usage)).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => local_summary(&advice),
            Err(e) => {
                warn!("Proactive analysis unavailable: {}", e);
                local_summary(&advice)
            }
        }
    }
}

fn local_summary(advice: &[Advice]) -> String {
    advice
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
