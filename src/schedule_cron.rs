use crate::error::{RunnerError, SchedulerError};
use crate::runner_cli::CommandRunner;
use crate::schedule::{sort_tasks, DaySelector, ScheduledTask, TaskKind};
use crate::shell_words::quote;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, trace, warn};

pub const MARKER_PREFIX: &str = "# TUXPILOT:";
pub const TASK_LOG: &str = "/tmp/tuxpilot_tasks.log";

/// Access to the user's crontab.
#[async_trait]
pub trait CrontabIo: Send + Sync {
    async fn read(&self) -> Result<String, SchedulerError>;
    async fn write(&self, content: &str) -> Result<(), SchedulerError>;
}

/// `crontab -l` / `crontab <file>` for the current user.
#[derive(Debug, Clone, Default)]
pub struct SystemCrontab {
    runner: CommandRunner,
}

impl SystemCrontab {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl CrontabIo for SystemCrontab {
    async fn read(&self) -> Result<String, SchedulerError> {
        match self.runner.run_argv(&["crontab".to_string(), "-l".to_string()], false).await {
            Ok(content) => Ok(content),
            // A user without a crontab gets "no crontab for <user>"
            Err(RunnerError::NonZeroExit { stderr, .. }) if stderr.contains("no crontab") => {
                Ok(String::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, content: &str) -> Result<(), SchedulerError> {
        let path = std::env::temp_dir().join(format!("tuxpilot_crontab_{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| SchedulerError::Io(format!("writing {}: {}", path.display(), e)))?;
        let argv = vec!["crontab".to_string(), path.to_string_lossy().to_string()];
        let result = self.runner.run_argv(&argv, false).await;
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!("Could not remove {}: {}", path.display(), e);
        }
        result.map(|_| ()).map_err(SchedulerError::from)
    }
}

fn encode_field(value: &str) -> String {
    value.trim().replace(char::is_whitespace, "_")
}

fn decode_field(value: &str) -> String {
    value.replace('_', " ")
}

/// Marker comment written above each managed cron line.
pub fn marker_line(task: &ScheduledTask) -> String {
    format!(
        "{} id={} type={} nom={} desc={} created={}",
        MARKER_PREFIX,
        task.id,
        task.kind,
        encode_field(&task.name),
        encode_field(&task.description),
        task.created_at.to_rfc3339()
    )
}

/// Cron line for a task, commented out when the task is disabled.
pub fn cron_line(task: &ScheduledTask) -> String {
    let line = format!(
        "{} echo {} >> {}",
        task.cron_expression(),
        quote(&format!("tuxpilot_{}", task.id)),
        TASK_LOG
    );
    if task.enabled {
        line
    } else {
        format!("# {}", line)
    }
}

fn marker_id(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix(MARKER_PREFIX)?
        .split_whitespace()
        .find_map(|part| part.strip_prefix("id="))
}

/// Rebuilds a task from its marker comment and the cron line below it.
pub fn parse_entry(marker: &str, line: &str) -> Result<ScheduledTask, SchedulerError> {
    let body = marker
        .trim()
        .strip_prefix(MARKER_PREFIX)
        .ok_or_else(|| SchedulerError::Parse(format!("not a task marker: {:?}", marker)))?;

    let mut id = None;
    let mut kind = None;
    let mut name = String::new();
    let mut description = String::new();
    let mut created_at = None;
    for part in body.split_whitespace() {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        match key {
            "id" => id = Some(value.to_string()),
            "type" => {
                kind = Some(TaskKind::from_str(value).map_err(|_| {
                    SchedulerError::Parse(format!("unknown task type {:?}", value))
                })?)
            }
            "nom" => name = decode_field(value),
            "desc" => description = decode_field(value),
            "created" => {
                created_at = DateTime::parse_from_rfc3339(value)
                    .ok()
                    .map(|d| d.with_timezone(&Utc))
            }
            _ => trace!("Ignoring marker field {}", key),
        }
    }
    let id = id.ok_or_else(|| SchedulerError::Parse("marker without id".to_string()))?;

    let trimmed = line.trim();
    let (enabled, schedule) = match trimmed.strip_prefix('#') {
        Some(rest) => (false, rest.trim_start()),
        None => (true, trimmed),
    };
    let fields: Vec<&str> = schedule.split_whitespace().take(5).collect();
    if fields.len() < 5 {
        return Err(SchedulerError::Parse(format!("short cron line {:?}", line)));
    }
    let minute = fields[0]
        .parse::<u8>()
        .map_err(|_| SchedulerError::Parse(format!("minute field {:?}", fields[0])))?;
    let hour = fields[1]
        .parse::<u8>()
        .map_err(|_| SchedulerError::Parse(format!("hour field {:?}", fields[1])))?;
    let day = DaySelector::from_cron_field(fields[4])?;

    let task = ScheduledTask {
        id,
        kind: kind.unwrap_or(TaskKind::Update),
        name,
        description,
        day,
        hour,
        minute,
        enabled,
        created_at: created_at.unwrap_or_else(Utc::now),
        last_run: None,
    };
    task.validate()?;
    Ok(task)
}

/// Tasks translated to and from entries of the user's crontab.
#[derive(Clone)]
pub struct CronTaskStore {
    crontab: Arc<dyn CrontabIo>,
}

impl CronTaskStore {
    pub fn new(crontab: Arc<dyn CrontabIo>) -> Self {
        Self { crontab }
    }

    async fn lines(&self) -> Result<Vec<String>, SchedulerError> {
        Ok(self.crontab.read().await?.lines().map(String::from).collect())
    }

    async fn save(&self, lines: &[String]) -> Result<(), SchedulerError> {
        let mut content = lines.join("\n");
        // crontab rejects a last line without newline
        content.push('\n');
        self.crontab.write(&content).await
    }

    fn parse_all(lines: &[String]) -> Vec<ScheduledTask> {
        let mut tasks = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            if !line.trim_start().starts_with(MARKER_PREFIX) {
                continue;
            }
            let next = lines.get(i + 1).map(String::as_str).unwrap_or("");
            match parse_entry(line, next) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!("Skipping crontab entry: {}", e),
            }
        }
        tasks
    }

    pub async fn list(&self) -> Vec<ScheduledTask> {
        match self.lines().await {
            Ok(lines) => {
                let mut tasks = Self::parse_all(&lines);
                sort_tasks(&mut tasks);
                tasks
            }
            Err(e) => {
                error!("Could not read crontab: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn add(&self, task: &ScheduledTask) -> bool {
        if let Err(e) = task.validate() {
            error!("Refusing to add task '{}': {}", task.name, e);
            return false;
        }
        let result = async {
            let mut lines = self.lines().await?;
            if lines.iter().any(|l| marker_id(l) == Some(task.id.as_str())) {
                return Err(SchedulerError::InvalidTask(format!("task {} already exists", task.id)));
            }
            lines.push(marker_line(task));
            lines.push(cron_line(task));
            self.save(&lines).await
        }
        .await;
        match result {
            Ok(()) => {
                info!("Cron task added: {}", task.name);
                true
            }
            Err(e) => {
                error!("Could not add cron task '{}': {}", task.name, e);
                false
            }
        }
    }

    pub async fn remove(&self, id: &str) -> bool {
        let result = async {
            let lines = self.lines().await?;
            let Some(pos) = lines.iter().position(|l| marker_id(l) == Some(id)) else {
                return Ok(false);
            };
            // The marker and the cron line below it
            let kept: Vec<String> = lines
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != pos && *i != pos + 1)
                .map(|(_, l)| l.clone())
                .collect();
            self.save(&kept).await.map(|_| true)
        }
        .await;
        match result {
            Ok(found) => {
                if found {
                    info!("Cron task removed: {}", id);
                } else {
                    warn!("No cron task with id {}", id);
                }
                found
            }
            Err(e) => {
                error!("Could not remove cron task {}: {}", id, e);
                false
            }
        }
    }

    pub async fn toggle(&self, id: &str) -> bool {
        let result = async {
            let mut lines = self.lines().await?;
            let Some(pos) = lines.iter().position(|l| marker_id(l) == Some(id)) else {
                return Ok(false);
            };
            let Some(line) = lines.get_mut(pos + 1) else {
                return Err(SchedulerError::Parse(format!("task {} has no cron line", id)));
            };
            let trimmed = line.trim_start();
            *line = match trimmed.strip_prefix('#') {
                Some(rest) => rest.trim_start().to_string(),
                None => format!("# {}", trimmed),
            };
            self.save(&lines).await.map(|_| true)
        }
        .await;
        match result {
            Ok(found) => found,
            Err(e) => {
                error!("Could not toggle cron task {}: {}", id, e);
                false
            }
        }
    }

    pub async fn get(&self, id: &str) -> Option<ScheduledTask> {
        self.list().await.into_iter().find(|t| t.id == id)
    }

    /// Rewrites the marker and cron line of the task in place. Nothing is
    /// written when the new task is invalid or unknown.
    pub async fn update(&self, task: &ScheduledTask) -> bool {
        if let Err(e) = task.validate() {
            error!("Refusing to update task '{}': {}", task.name, e);
            return false;
        }
        let result = async {
            let mut lines = self.lines().await?;
            let Some(pos) = lines.iter().position(|l| marker_id(l) == Some(task.id.as_str())) else {
                return Ok(false);
            };
            lines[pos] = marker_line(task);
            match lines.get_mut(pos + 1) {
                Some(line) => *line = cron_line(task),
                None => lines.push(cron_line(task)),
            }
            self.save(&lines).await.map(|_| true)
        }
        .await;
        match result {
            Ok(found) => {
                if found {
                    info!("Cron task updated: {}", task.name);
                } else {
                    warn!("No cron task with id {}", task.id);
                }
                found
            }
            Err(e) => {
                error!("Could not update cron task '{}': {}", task.name, e);
                false
            }
        }
    }
}
