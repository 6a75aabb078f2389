use crate::audit::{AuditEngine, RiskLevel, SecurityReport};
use crate::host_probe::{HostProbe, ListeningSocket, OS_RELEASE_PATH};
use crate::lock::TimedMutex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const MAX_TOP_ISSUES: usize = 8;
pub const MAX_EXPOSED_PORTS: usize = 12;

const FIREWALL_UNITS: [&str; 2] = ["ufw", "firewalld"];

// Wording that calls for fresh facts rather than the cached snapshot
const REFRESH_KEYWORDS: [&str; 8] = [
    "analyse",
    "analyze",
    "mon système",
    "my system",
    "sécur",
    "secur",
    "audit",
    "firewall",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityIssue {
    pub id: String,
    pub name: String,
    pub level: RiskLevel,
    pub details: String,
    pub proof: String,
    pub impact: String,
    pub recommendation: String,
}

/// Point-in-time view of the host used to ground the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemContextSnapshot {
    pub captured_at: DateTime<Utc>,
    pub os_name: String,
    pub kernel: String,
    pub hostname: String,
    pub desktop: String,
    pub security_score: u32,
    pub top_issues: Vec<SecurityIssue>,
    pub exposed_ports: Vec<String>,
    /// "ufw active", "firewalld active" or "none".
    pub firewall_status: String,
    /// `None` when the distribution gives no way to tell.
    pub reboot_required: Option<bool>,
    pub security_updates_count: u32,
    pub notes: Vec<String>,
}

impl SystemContextSnapshot {
    /// Compact single-line JSON embedded in assistant prompts.
    pub fn to_prompt_json(&self) -> String {
        json!({
            "captured_at": self.captured_at.to_rfc3339(),
            "os": self.os_name,
            "kernel": self.kernel,
            "hostname": self.hostname,
            "desktop": self.desktop,
            "security_score": self.security_score,
            "firewall": self.firewall_status,
            "exposed_ports": self.exposed_ports,
            "reboot_required": self.reboot_required,
            "security_updates": self.security_updates_count,
            "top_issues": self.top_issues.iter().map(|i| json!({
                "id": i.id,
                "name": i.name,
                "level": i.level.to_string(),
                "details": i.details,
                "recommendation": i.recommendation,
            })).collect::<Vec<_>>(),
            "notes": self.notes,
        })
        .to_string()
    }
}

/// True when the question asks about the live state of the machine.
pub fn should_force_refresh(question: &str) -> bool {
    let question = question.to_lowercase();
    // "ports" is matched as a word so that "supports" does not trigger a refresh
    REFRESH_KEYWORDS.iter().any(|k| question.contains(k))
        || question
            .split(|c: char| !c.is_alphanumeric())
            .any(|w| w == "ports" || w == "port")
}

/// Value of `PRETTY_NAME` in an os-release document.
pub fn pretty_name(os_release: &str) -> Option<String> {
    os_release.lines().find_map(|line| {
        line.strip_prefix("PRETTY_NAME=")
            .map(|v| v.trim().trim_matches('"').to_string())
    })
}

/// Non-loopback listening sockets as `"<port> <process>"`, deduplicated.
pub fn exposed_ports(sockets: &[ListeningSocket]) -> Vec<String> {
    let mut ports: Vec<String> = Vec::new();
    for socket in sockets.iter().filter(|s| !s.is_loopback()) {
        let entry = format!("{} {}", socket.port, socket.process).trim().to_string();
        if !ports.contains(&entry) {
            ports.push(entry);
        }
        if ports.len() == MAX_EXPOSED_PORTS {
            break;
        }
    }
    ports
}

/// Most severe failed or flagged checks, Critical first then by name.
pub fn top_issues(report: &SecurityReport) -> Vec<SecurityIssue> {
    let mut flagged: Vec<_> = report
        .checks
        .iter()
        .filter(|c| !c.passed || c.level != RiskLevel::None)
        .collect();
    flagged.sort_by(|a, b| b.level.cmp(&a.level).then_with(|| a.name.cmp(&b.name)));
    flagged
        .into_iter()
        .take(MAX_TOP_ISSUES)
        .map(|c| SecurityIssue {
            id: c.id.clone(),
            name: c.name.clone(),
            level: c.level,
            details: c.details.clone(),
            proof: c.proof.clone(),
            impact: c.impact.clone(),
            recommendation: c.recommendation.clone(),
        })
        .collect()
}

struct CachedSnapshot {
    refreshed: Instant,
    snapshot: SystemContextSnapshot,
}

/// Owns the current snapshot. At most one refresh runs at a time; callers
/// arriving during a refresh wait and receive its result.
pub struct SystemContextCache {
    probe: Arc<dyn HostProbe>,
    audit: AuditEngine,
    ttl: Duration,
    current: TimedMutex<Option<CachedSnapshot>>,
}

impl SystemContextCache {
    pub fn new(probe: Arc<dyn HostProbe>, audit: AuditEngine, ttl: Duration) -> Self {
        Self {
            probe,
            audit,
            ttl,
            current: TimedMutex::new("system_context", None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get_snapshot(&self, force_refresh: bool) -> SystemContextSnapshot {
        let mut current = self.current.lock().await;
        if !force_refresh {
            if let Some(cached) = current.as_ref() {
                if cached.refreshed.elapsed() < self.ttl {
                    debug!("Using cached system context from {}", cached.snapshot.captured_at);
                    return cached.snapshot.clone();
                }
            }
        }

        let snapshot = self.refresh().await;
        *current = Some(CachedSnapshot {
            refreshed: Instant::now(),
            snapshot: snapshot.clone(),
        });
        snapshot
    }

    /// Drops the cached snapshot so the next call refreshes.
    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
    }

    async fn refresh(&self) -> SystemContextSnapshot {
        info!("Refreshing system context");
        let captured_at = Utc::now();
        let probe = &self.probe;

        let (os_release, kernel, hostname, firewall_status, sockets, reboot_required, report) = tokio::join!(
            probe.read_file(OS_RELEASE_PATH),
            probe.kernel_release(),
            probe.hostname(),
            self.firewall_status(),
            probe.listening_sockets(),
            probe.reboot_required(),
            self.audit.run_audit(),
        );

        let mut notes = Vec::new();

        let os_name = match os_release {
            Ok(Some(content)) => pretty_name(&content).unwrap_or_default(),
            Ok(None) => String::new(),
            Err(e) => {
                warn!("Could not read {}: {:#}", OS_RELEASE_PATH, e);
                String::new()
            }
        };
        let kernel = kernel.unwrap_or_else(|e| {
            warn!("Could not read the kernel release: {:#}", e);
            String::new()
        });
        let hostname = hostname.unwrap_or_else(|e| {
            warn!("Could not read the hostname: {:#}", e);
            String::new()
        });
        let exposed = match sockets {
            Ok(sockets) => exposed_ports(&sockets),
            Err(e) => {
                warn!("Could not list listening sockets: {:#}", e);
                notes.push("Listening sockets could not be enumerated".to_string());
                Vec::new()
            }
        };
        if reboot_required.is_none() {
            notes.push("Reboot status unknown on this distribution".to_string());
        }

        let security_updates_count = report
            .check("updates")
            .and_then(|c| c.measured_count)
            .unwrap_or(0);
        for check in report.checks.iter().filter(|c| c.details.starts_with("Verification failed")) {
            notes.push(format!("{} could not be verified", check.name));
        }

        SystemContextSnapshot {
            captured_at,
            os_name,
            kernel,
            hostname,
            desktop: probe.desktop().unwrap_or_default(),
            security_score: report.total_score(),
            top_issues: top_issues(&report),
            exposed_ports: exposed,
            firewall_status,
            reboot_required,
            security_updates_count,
            notes,
        }
    }

    async fn firewall_status(&self) -> String {
        for unit in FIREWALL_UNITS {
            if self.probe.service_active(unit).await {
                return format!("{} active", unit);
            }
        }
        "none".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_probe::fake::FakeHostProbe;
    use crate::runner_cli::CommandRunner;

    fn cache_with(probe: FakeHostProbe, ttl: Duration) -> (Arc<FakeHostProbe>, SystemContextCache) {
        let probe = Arc::new(probe);
        let audit = AuditEngine::new(probe.clone(), CommandRunner::default());
        let cache = SystemContextCache::new(probe.clone(), audit, ttl);
        (probe, cache)
    }

    fn busy_host() -> FakeHostProbe {
        let mut probe = FakeHostProbe::new();
        probe.files.insert(
            OS_RELEASE_PATH.to_string(),
            "NAME=\"Fedora Linux\"\nPRETTY_NAME=\"Fedora Linux 40 (Workstation Edition)\"\n".to_string(),
        );
        probe.updates = Some(3);
        probe.reboot = Some(true);
        probe.desktop = Some("GNOME".to_string());
        probe.sockets = Some(vec![
            FakeHostProbe::socket("0.0.0.0", "22", "users:((\"sshd\",pid=1,fd=3))"),
            FakeHostProbe::socket("[::]", "22", "users:((\"sshd\",pid=1,fd=3))"),
            FakeHostProbe::socket("127.0.0.1", "631", ""),
            FakeHostProbe::socket("[::1]", "631", ""),
            FakeHostProbe::socket("0.0.0.0", "80", ""),
        ]);
        probe
    }

    #[test]
    fn test_pretty_name() {
        assert_eq!(
            pretty_name("ID=ubuntu\nPRETTY_NAME=\"Ubuntu 24.04 LTS\"\n").as_deref(),
            Some("Ubuntu 24.04 LTS")
        );
        assert_eq!(pretty_name("ID=arch\n"), None);
    }

    #[test]
    fn test_should_force_refresh() {
        assert!(should_force_refresh("Peux-tu analyser mon système ?"));
        assert!(should_force_refresh("Is my firewall on?"));
        assert!(should_force_refresh("Which ports are open"));
        assert!(should_force_refresh("Run a security AUDIT"));
        assert!(!should_force_refresh("Does VLC support subtitles?"));
        assert!(!should_force_refresh("What formats does it supports"));
    }

    #[test]
    fn test_exposed_ports_filters_and_caps() {
        let sockets: Vec<ListeningSocket> = (0..20)
            .map(|i| FakeHostProbe::socket("0.0.0.0", &(9000 + i).to_string(), ""))
            .chain(std::iter::once(FakeHostProbe::socket("127.0.0.1", "5432", "")))
            .collect();
        let ports = exposed_ports(&sockets);
        assert_eq!(ports.len(), MAX_EXPOSED_PORTS);
        assert!(!ports.iter().any(|p| p.starts_with("5432")));
    }

    #[tokio::test]
    async fn test_snapshot_content() {
        let (_, cache) = cache_with(busy_host(), Duration::from_secs(60));
        let snap = cache.get_snapshot(false).await;

        assert_eq!(snap.os_name, "Fedora Linux 40 (Workstation Edition)");
        assert_eq!(snap.kernel, "6.8.0-test");
        assert_eq!(snap.hostname, "testhost");
        assert_eq!(snap.desktop, "GNOME");
        assert_eq!(snap.firewall_status, "none");
        assert_eq!(snap.reboot_required, Some(true));
        assert_eq!(snap.security_updates_count, 3);
        assert_eq!(
            snap.exposed_ports,
            vec!["22 users:((\"sshd\",pid=1,fd=3))".to_string(), "80".to_string()]
        );

        // Firewall (High) first, then updates (Low)
        let ids: Vec<&str> = snap.top_issues.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["firewall", "updates"]);
        assert_eq!(snap.security_score, 5 + 20 + 15 + 20 + 20);

        let prompt: serde_json::Value = serde_json::from_str(&snap.to_prompt_json()).unwrap();
        assert_eq!(prompt["firewall"], "none");
        assert_eq!(prompt["top_issues"][0]["level"], "High");
    }

    #[tokio::test]
    async fn test_snapshot_is_cached_within_ttl() {
        let (probe, cache) = cache_with(busy_host(), Duration::from_secs(60));
        let first = cache.get_snapshot(false).await;
        let second = cache.get_snapshot(false).await;
        assert_eq!(first, second);
        assert_eq!(first.captured_at, second.captured_at);
        // One call from the context, one from the audit
        assert_eq!(probe.socket_calls(), 2);

        let forced = cache.get_snapshot(true).await;
        assert!(forced.captured_at >= first.captured_at);
        assert_eq!(probe.socket_calls(), 4);
    }

    #[tokio::test]
    async fn test_snapshot_expires_after_ttl() {
        let (probe, cache) = cache_with(busy_host(), Duration::from_millis(50));
        cache.get_snapshot(false).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        cache.get_snapshot(false).await;
        assert_eq!(probe.socket_calls(), 4);

        cache.invalidate().await;
        cache.get_snapshot(false).await;
        assert_eq!(probe.socket_calls(), 6);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let (probe, cache) = cache_with(busy_host(), Duration::from_secs(60));
        let cache = Arc::new(cache);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_snapshot(false).await })
            })
            .collect();
        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap().captured_at);
        }
        assert!(stamps.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(probe.socket_calls(), 2, "Only one refresh may run");
    }

    #[tokio::test]
    async fn test_failed_probes_leave_defaults() {
        let mut probe = FakeHostProbe::new();
        probe.sockets = None;
        probe.updates = None;
        let (_, cache) = cache_with(probe, Duration::from_secs(60));
        let snap = cache.get_snapshot(false).await;
        assert!(snap.exposed_ports.is_empty());
        assert_eq!(snap.os_name, "");
        assert_eq!(snap.reboot_required, None);
        assert_eq!(snap.security_updates_count, 0);
        assert!(snap.notes.iter().any(|n| n.contains("Reboot status unknown")));
        assert!(snap.notes.iter().any(|n| n.contains("Open ports could not be verified")));
    }
}
