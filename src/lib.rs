pub mod assistant;
pub mod assistant_client;
pub mod assistant_setup;
pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod foundation;
pub mod history;
pub mod host_probe;
pub mod lock;
pub mod logger;
pub mod persist;
pub mod probes;
pub mod runner_cli;
pub mod runtime;
pub mod schedule;
pub mod schedule_cron;
pub mod schedule_factory;
pub mod schedule_local;
pub mod shell_words;
pub mod theme;

pub static FOUNDATION_VERSION: &str = env!("CARGO_PKG_VERSION");
