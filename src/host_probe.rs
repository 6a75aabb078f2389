use crate::error::RunnerError;
use crate::runner_cli::{binary_exists, CommandRunner};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use strum_macros::{Display, EnumString};
use tracing::{debug, trace, warn};

pub const OS_RELEASE_PATH: &str = "/etc/os-release";
pub const SSHD_CONFIG_PATH: &str = "/etc/ssh/sshd_config";
pub const REBOOT_REQUIRED_PATH: &str = "/var/run/reboot-required";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum PackageManager {
    Dnf,
    Apt,
}

impl PackageManager {
    /// Counts the pending updates (security advisories for dnf).
    pub fn pending_updates_command(&self) -> &'static str {
        match self {
            PackageManager::Dnf => "dnf -q updateinfo list security --available 2>/dev/null | wc -l",
            PackageManager::Apt => "apt list --upgradable 2>/dev/null | sed 1d | wc -l",
        }
    }

    pub fn upgrade_command(&self) -> &'static str {
        match self {
            PackageManager::Dnf => "pkexec dnf update -y",
            PackageManager::Apt => "pkexec apt update && pkexec apt upgrade -y",
        }
    }
}

/// One socket bound in listening state, as reported by `ss`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListeningSocket {
    pub protocol: String,
    pub address: String,
    pub port: String,
    /// Owning process column, empty when not visible to the caller.
    pub process: String,
}

impl ListeningSocket {
    pub fn is_loopback(&self) -> bool {
        let addr = self
            .address
            .trim_start_matches('[')
            .trim_end_matches(']');
        // Drop the interface scope (127.0.0.53%lo)
        let addr = addr.split('%').next().unwrap_or(addr);
        match addr.parse::<IpAddr>() {
            Ok(ip) => ip.is_loopback(),
            Err(_) => addr.contains("127.0.0.1") || addr.contains("::1"),
        }
    }
}

/// Parses `ss -H -tulnp` output. Lines that do not carry an `addr:port`
/// column are skipped.
pub fn parse_ss_output(output: &str) -> Vec<ListeningSocket> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 5 {
                return None;
            }
            let local = parts[4];
            let idx = local.rfind(':')?;
            Some(ListeningSocket {
                protocol: parts[0].to_string(),
                address: local[..idx].to_string(),
                port: local[idx + 1..].to_string(),
                process: parts.get(6..).map(|p| p.join(" ")).unwrap_or_default(),
            })
        })
        .collect()
}

/// Host facts consumed by the audit engine and the context cache.
///
/// Every method is an independent probe so a failing one never prevents the
/// others from answering.
#[async_trait]
pub trait HostProbe: Send + Sync {
    /// True when the systemd unit reports "active".
    async fn service_active(&self, unit: &str) -> bool;

    /// File contents, `None` when the file does not exist.
    async fn read_file(&self, path: &str) -> Result<Option<String>>;

    /// Permission bits, `None` when the file does not exist.
    async fn file_mode(&self, path: &str) -> Result<Option<u32>>;

    async fn package_manager(&self) -> Option<PackageManager>;

    async fn pending_security_updates(&self) -> Result<u32>;

    async fn listening_sockets(&self) -> Result<Vec<ListeningSocket>>;

    async fn kernel_release(&self) -> Result<String>;

    async fn hostname(&self) -> Result<String>;

    fn desktop(&self) -> Option<String>;

    /// `None` when the distribution offers no way to tell.
    async fn reboot_required(&self) -> Option<bool>;
}

/// `HostProbe` backed by the local machine.
#[derive(Debug, Clone, Default)]
pub struct LinuxHostProbe {
    runner: CommandRunner,
}

impl LinuxHostProbe {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    async fn run_trimmed(&self, program: &str, args: &[&str]) -> Result<String> {
        let mut argv = vec![program.to_string()];
        argv.extend(args.iter().map(|a| a.to_string()));
        let out = self
            .runner
            .run_argv(&argv, false)
            .await
            .with_context(|| format!("running {}", program))?;
        Ok(out.trim().to_string())
    }
}

#[async_trait]
impl HostProbe for LinuxHostProbe {
    async fn service_active(&self, unit: &str) -> bool {
        // `is-active` prints the state and exits non-zero unless active
        match self.run_trimmed("systemctl", &["is-active", unit]).await {
            Ok(state) => state == "active",
            Err(e) => {
                trace!("Unit {} is not active: {:#}", unit, e);
                false
            }
        }
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path)),
        }
    }

    async fn file_mode(&self, path: &str) -> Result<Option<u32>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(meta.permissions().mode() & 0o7777)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("stat {}", path)),
        }
    }

    async fn package_manager(&self) -> Option<PackageManager> {
        if binary_exists("dnf") {
            Some(PackageManager::Dnf)
        } else if binary_exists("apt") {
            Some(PackageManager::Apt)
        } else {
            None
        }
    }

    async fn pending_security_updates(&self) -> Result<u32> {
        let manager = self
            .package_manager()
            .await
            .ok_or_else(|| anyhow!("no supported package manager found"))?;
        let out = self
            .runner
            .run_checked(manager.pending_updates_command(), false)
            .await
            .with_context(|| format!("counting {} updates", manager))?;
        let count = out
            .trim()
            .parse::<u32>()
            .with_context(|| format!("unexpected update count {:?}", out.trim()))?;
        debug!("{} pending updates via {}", count, manager);
        Ok(count)
    }

    async fn listening_sockets(&self) -> Result<Vec<ListeningSocket>> {
        let out = self.run_trimmed("ss", &["-H", "-tulnp"]).await?;
        Ok(parse_ss_output(&out))
    }

    async fn kernel_release(&self) -> Result<String> {
        self.run_trimmed("uname", &["-r"]).await
    }

    async fn hostname(&self) -> Result<String> {
        self.run_trimmed("hostname", &[]).await
    }

    fn desktop(&self) -> Option<String> {
        std::env::var("XDG_CURRENT_DESKTOP")
            .ok()
            .filter(|d| !d.trim().is_empty())
    }

    async fn reboot_required(&self) -> Option<bool> {
        // Debian family drops a marker file
        if Path::new(REBOOT_REQUIRED_PATH).exists() {
            return Some(true);
        }
        // Fedora family: needs-restarting -r exits 1 when a reboot is needed
        if !binary_exists("needs-restarting") {
            return None;
        }
        let argv = vec!["needs-restarting".to_string(), "-r".to_string()];
        match self.runner.run_argv(&argv, false).await {
            Ok(_) => Some(false),
            Err(RunnerError::NonZeroExit { code: Some(1), .. }) => Some(true),
            Err(e) => {
                warn!("needs-restarting failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted host used by the audit and context tests.
    #[derive(Debug, Default)]
    pub struct FakeHostProbe {
        pub active_units: Vec<String>,
        pub files: HashMap<String, String>,
        pub unreadable: Vec<String>,
        pub modes: HashMap<String, u32>,
        pub package_manager: Option<PackageManager>,
        /// `None` makes the update probe fail.
        pub updates: Option<u32>,
        /// `None` makes the socket probe fail.
        pub sockets: Option<Vec<ListeningSocket>>,
        pub kernel: String,
        pub hostname: String,
        pub desktop: Option<String>,
        pub reboot: Option<bool>,
        pub socket_calls: AtomicUsize,
    }

    impl FakeHostProbe {
        /// A quiet host: no firewall, no sshd, no updates, no sockets.
        pub fn new() -> Self {
            Self {
                package_manager: Some(PackageManager::Dnf),
                updates: Some(0),
                sockets: Some(Vec::new()),
                kernel: "6.8.0-test".to_string(),
                hostname: "testhost".to_string(),
                ..Default::default()
            }
        }

        pub fn socket(address: &str, port: &str, process: &str) -> ListeningSocket {
            ListeningSocket {
                protocol: "tcp".to_string(),
                address: address.to_string(),
                port: port.to_string(),
                process: process.to_string(),
            }
        }

        pub fn socket_calls(&self) -> usize {
            self.socket_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HostProbe for FakeHostProbe {
        async fn service_active(&self, unit: &str) -> bool {
            self.active_units.iter().any(|u| u == unit)
        }

        async fn read_file(&self, path: &str) -> Result<Option<String>> {
            if self.unreadable.iter().any(|p| p == path) {
                return Err(anyhow!("permission denied: {}", path));
            }
            Ok(self.files.get(path).cloned())
        }

        async fn file_mode(&self, path: &str) -> Result<Option<u32>> {
            if self.unreadable.iter().any(|p| p == path) {
                return Err(anyhow!("permission denied: {}", path));
            }
            Ok(self.modes.get(path).copied())
        }

        async fn package_manager(&self) -> Option<PackageManager> {
            self.package_manager
        }

        async fn pending_security_updates(&self) -> Result<u32> {
            self.updates.ok_or_else(|| anyhow!("package manager unavailable"))
        }

        async fn listening_sockets(&self) -> Result<Vec<ListeningSocket>> {
            self.socket_calls.fetch_add(1, Ordering::SeqCst);
            self.sockets.clone().ok_or_else(|| anyhow!("ss failed"))
        }

        async fn kernel_release(&self) -> Result<String> {
            Ok(self.kernel.clone())
        }

        async fn hostname(&self) -> Result<String> {
            Ok(self.hostname.clone())
        }

        fn desktop(&self) -> Option<String> {
            self.desktop.clone()
        }

        async fn reboot_required(&self) -> Option<bool> {
            self.reboot
        }
    }
}
