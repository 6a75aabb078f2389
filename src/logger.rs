use crate::config::FoundationConfig;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::VecDeque;
use std::env::var;
use std::fmt::Write as _;
use std::fs::create_dir_all;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{info, Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Layer, Registry};

pub const MAX_LOG_LINES: usize = 20000;
pub const LOG_LEVEL_ENV: &str = "TUXPILOT_LOG_LEVEL";
const DEFAULT_LOG_SPEC: &str = "info";
const LOG_FILE_PREFIX: &str = "tuxpilot.log";

const SENSITIVE_KEYWORDS: [&str; 4] = ["password", "key", "token", "license"];

lazy_static! {
    static ref SENSITIVE_PATTERNS: Vec<Regex> = SENSITIVE_KEYWORDS
        .iter()
        .map(|keyword| {
            Regex::new(&format!(
                r#"(?P<key>"?(\b{})"?\s*[:=]?\s*)("(?P<val1>[^"]+)"|(?P<val2>\b[^\s",}}]+))"#,
                regex::escape(keyword)
            ))
            .unwrap()
        })
        .collect();
}

/// Masks the value following each sensitive keyword with `*`, keeping its length.
pub fn sanitize_keywords(input: &str) -> String {
    let mut output = input.to_string();
    for re in SENSITIVE_PATTERNS.iter() {
        output = re
            .replace_all(&output, |caps: &regex::Captures| {
                let key = &caps["key"];
                let val1 = caps.name("val1").map_or("", |m| m.as_str());
                let val2 = caps.name("val2").map_or("", |m| m.as_str());
                let val = if !val1.is_empty() { val1 } else { val2 };
                let quotes = if !val1.is_empty() { "\"" } else { "" };
                format!("{}{}{}{}", key, quotes, "*".repeat(val.chars().count()), quotes)
            })
            .to_string();
    }
    output
}

/// Newest-first ring of formatted log lines.
#[derive(Debug, Default)]
pub struct MemoryWriterData {
    logs: VecDeque<String>,
    to_take: usize,
}

impl MemoryWriterData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: String) {
        if self.logs.len() >= MAX_LOG_LINES {
            self.logs.pop_back();
        }
        self.logs.push_front(line);
        if self.to_take < MAX_LOG_LINES {
            self.to_take += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }
}

/// Layer keeping sanitized copies of every event in memory.
pub struct MemoryLayer {
    data: Arc<Mutex<MemoryWriterData>>,
}

impl MemoryLayer {
    pub fn new(data: Arc<Mutex<MemoryWriterData>>) -> Self {
        Self { data }
    }

    fn format_log_line(level: &tracing::Level, target: &str, message: &str) -> String {
        format!(
            "[{}] {} [{}] {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f %:z"),
            level,
            target,
            message
        )
    }
}

impl<S: Subscriber> Layer<S> for MemoryLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let metadata = event.metadata();
        let message = sanitize_keywords(&format!("{}{}", visitor.message, visitor.fields));
        let line = Self::format_log_line(metadata.level(), metadata.target(), &message);
        self.data.lock().push(line);
    }
}

pub struct FoundationLogger {
    memory_writer_data: Arc<Mutex<MemoryWriterData>>,
    filter_handle: Option<reload::Handle<EnvFilter, Registry>>,
    _file_guard: Option<WorkerGuard>,
}

impl FoundationLogger {
    /// Lines recorded since the previous call, newest first.
    pub fn get_new_logs(&self) -> String {
        let mut locked_data = self.memory_writer_data.lock();
        let new_logs = locked_data
            .logs
            .iter()
            .take(locked_data.to_take)
            .fold(String::new(), |acc, x| format!("{}\n{}", acc, x));
        locked_data.to_take = 0;
        new_logs
    }

    pub fn get_all_logs(&self) -> String {
        let locked_data = self.memory_writer_data.lock();
        locked_data
            .logs
            .iter()
            .fold(String::new(), |acc, x| format!("{}\n{}", acc, x))
    }

    /// Replaces the active filter, e.g. "debug" or "tuxpilot_foundation=trace".
    pub fn set_level(&self, spec: &str) -> bool {
        let Some(handle) = &self.filter_handle else {
            return false;
        };
        match EnvFilter::try_new(spec) {
            Ok(filter) => handle.reload(filter).is_ok(),
            Err(e) => {
                eprintln!("Invalid log specification '{}': {}", spec, e);
                false
            }
        }
    }
}

/// Installs the global subscriber: stdout, a daily file under the logs
/// directory and the in-memory ring. A second call keeps the first subscriber.
pub fn init_logger(config: &FoundationConfig) -> FoundationLogger {
    let memory_writer_data = Arc::new(Mutex::new(MemoryWriterData::new()));

    let spec = var(LOG_LEVEL_ENV).unwrap_or_else(|_| DEFAULT_LOG_SPEC.to_string());
    let env_filter = EnvFilter::try_new(&spec).unwrap_or_else(|e| {
        eprintln!("Invalid {} '{}': {}, using {}", LOG_LEVEL_ENV, spec, e, DEFAULT_LOG_SPEC);
        EnvFilter::new(DEFAULT_LOG_SPEC)
    });
    let (filter, filter_handle) = reload::Layer::new(env_filter);

    let logs_dir = config.logs_dir();
    let (file_layer, file_guard) = match create_dir_all(&logs_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(&logs_dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        Err(e) => {
            eprintln!("Log directory {} unavailable: {}", logs_dir.display(), e);
            (None, None)
        }
    };

    let initialized = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .with(MemoryLayer::new(memory_writer_data.clone()))
        .try_init()
        .is_ok();

    if initialized {
        info!("Logger initialized with '{}'", spec);
    } else {
        eprintln!("A global logger is already installed, keeping it");
    }

    FoundationLogger {
        memory_writer_data,
        filter_handle: initialized.then_some(filter_handle),
        _file_guard: if initialized { file_guard } else { None },
    }
}
