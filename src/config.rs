use std::env::var;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const CONFIG_DIR_NAME: &str = ".tuxpilot";
pub const HISTORY_FILE: &str = "historique.json";
pub const TASKS_FILE: &str = "taches.json";
pub const THEME_FILE: &str = "theme.json";

const DEFAULT_ASSISTANT_URL: &str = "http://localhost:11434";
const DEFAULT_ASSISTANT_MODEL: &str = "mistral";
const DEFAULT_ASSISTANT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DEFAULT_CONTEXT_TTL: Duration = Duration::from_secs(20 * 60);
const DEFAULT_ELEVATION_HELPER: &str = "pkexec";
const DEFAULT_SCRIPT_INTERPRETER: &str = "python3";

/// Runtime configuration shared by every component.
///
/// Components take the pieces they need at construction time, nothing reads
/// the environment after `from_env` returns.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundationConfig {
    /// Per-user directory holding the history, task and theme files.
    pub config_dir: PathBuf,
    /// Directory of the external probe scripts.
    pub scripts_dir: PathBuf,
    pub script_interpreter: String,
    pub assistant_url: String,
    pub assistant_model: String,
    pub assistant_timeout: Duration,
    pub context_ttl: Duration,
    /// Graphical password agent used for elevated commands.
    pub elevation_helper: String,
}

impl Default for FoundationConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        Self {
            config_dir: home.join(CONFIG_DIR_NAME),
            scripts_dir: default_scripts_dir(),
            script_interpreter: DEFAULT_SCRIPT_INTERPRETER.to_string(),
            assistant_url: DEFAULT_ASSISTANT_URL.to_string(),
            assistant_model: DEFAULT_ASSISTANT_MODEL.to_string(),
            assistant_timeout: DEFAULT_ASSISTANT_TIMEOUT,
            context_ttl: DEFAULT_CONTEXT_TTL,
            elevation_helper: DEFAULT_ELEVATION_HELPER.to_string(),
        }
    }
}

// Scripts ship next to the executable
fn default_scripts_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Scripts")
}

impl FoundationConfig {
    /// Defaults overridden by the `TUXPILOT_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = var("TUXPILOT_CONFIG_DIR") {
            config.config_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = var("TUXPILOT_SCRIPTS_DIR") {
            config.scripts_dir = PathBuf::from(dir);
        }
        if let Ok(interpreter) = var("TUXPILOT_SCRIPT_INTERPRETER") {
            config.script_interpreter = interpreter;
        }
        if let Ok(url) = var("TUXPILOT_OLLAMA_URL") {
            config.assistant_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(model) = var("TUXPILOT_MODEL") {
            config.assistant_model = model;
        }
        if let Some(timeout) = duration_from_env("TUXPILOT_ASSISTANT_TIMEOUT") {
            config.assistant_timeout = timeout;
        }
        if let Some(ttl) = duration_from_env("TUXPILOT_CONTEXT_TTL") {
            config.context_ttl = ttl;
        }
        if let Ok(helper) = var("TUXPILOT_ELEVATION_HELPER") {
            config.elevation_helper = helper;
        }

        config
    }

    pub fn history_path(&self) -> PathBuf {
        self.config_dir.join(HISTORY_FILE)
    }

    pub fn tasks_path(&self) -> PathBuf {
        self.config_dir.join(TASKS_FILE)
    }

    pub fn theme_path(&self) -> PathBuf {
        self.config_dir.join(THEME_FILE)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.config_dir.join("logs")
    }
}

fn duration_from_env(name: &str) -> Option<Duration> {
    let raw = var(name).ok()?;
    match humantime::parse_duration(raw.trim()) {
        Ok(d) => Some(d),
        Err(e) => {
            warn!("Ignoring {}={:?}: {}", name, raw, e);
            None
        }
    }
}
