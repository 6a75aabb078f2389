use crate::host_probe::{HostProbe, ListeningSocket, SSHD_CONFIG_PATH};
use crate::runner_cli::CommandRunner;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use tracing::{error, info, warn};

pub const CHECK_MAX_SCORE: u32 = 20;
/// Score granted to a check whose probe could not run.
pub const UNVERIFIED_SCORE: u32 = 15;

pub const PASSWD_PATH: &str = "/etc/passwd";
pub const SHADOW_PATH: &str = "/etc/shadow";
const PASSWD_MODE: u32 = 0o644;
const SHADOW_MODES: [u32; 3] = [0o000, 0o640, 0o400];

const FIREWALL_UNITS: [&str; 2] = ["ufw", "firewalld"];
const FIREWALL_FIX: &str = "pkexec ufw enable || pkexec systemctl enable --now firewalld";

lazy_static! {
    static ref SSH_ROOT_LOGIN: Regex = Regex::new(r"(?m)^\s*PermitRootLogin\s+yes\s*$").unwrap();
    static ref SSH_PASSWORD_AUTH: Regex =
        Regex::new(r"(?m)^\s*PasswordAuthentication\s+yes\s*$").unwrap();
    static ref SSH_DEFAULT_PORT: Regex = Regex::new(r"(?m)^\s*Port\s+22\s*$").unwrap();
    static ref SSH_ANY_PORT: Regex = Regex::new(r"(?m)^\s*Port\s+\d+\s*$").unwrap();
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

/// One completed probe. Never mutated once the audit returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityCheck {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub impact: String,
    pub level: RiskLevel,
    pub passed: bool,
    pub score: u32,
    pub max_score: u32,
    pub details: String,
    pub recommendation: String,
    pub remediation_command: Option<String>,
    pub proof: String,
    pub auto_fix_safe: bool,
    /// Quantity behind the verdict (pending updates, listening sockets).
    pub measured_count: Option<u32>,
}

impl SecurityCheck {
    fn new(id: &str, name: &str, description: &str, category: &str, impact: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            category: category.to_string(),
            impact: impact.to_string(),
            level: RiskLevel::None,
            passed: true,
            score: CHECK_MAX_SCORE,
            max_score: CHECK_MAX_SCORE,
            details: String::new(),
            recommendation: String::new(),
            remediation_command: None,
            proof: String::new(),
            auto_fix_safe: false,
            measured_count: None,
        }
    }

    fn pass(mut self, details: &str, recommendation: &str, proof: &str) -> Self {
        self.passed = true;
        self.level = RiskLevel::None;
        self.score = self.max_score;
        self.details = details.to_string();
        self.recommendation = recommendation.to_string();
        self.proof = proof.to_string();
        self
    }

    /// Passed, but worth mentioning.
    fn notice(mut self, level: RiskLevel, score: u32, details: &str, recommendation: &str, proof: &str) -> Self {
        self = self.pass(details, recommendation, proof);
        self.level = level;
        self.score = score.min(self.max_score);
        self
    }

    fn fail(mut self, level: RiskLevel, score: u32, details: &str, recommendation: &str, proof: &str) -> Self {
        self.passed = false;
        self.level = level;
        self.score = score.min(self.max_score);
        self.details = details.to_string();
        self.recommendation = recommendation.to_string();
        self.proof = proof.to_string();
        self
    }

    fn with_fix(mut self, command: &str, auto_fix_safe: bool) -> Self {
        self.remediation_command = Some(command.to_string());
        self.auto_fix_safe = auto_fix_safe;
        self
    }

    fn measured(mut self, count: u32) -> Self {
        self.measured_count = Some(count);
        self
    }

    fn unverified(self, reason: &str) -> Self {
        self.fail(
            RiskLevel::Low,
            UNVERIFIED_SCORE,
            &format!("Verification failed: {}", reason),
            "Check this point manually.",
            reason,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityReport {
    pub checks: Vec<SecurityCheck>,
    pub generated_at: DateTime<Utc>,
}

impl SecurityReport {
    /// Sum of the check scores, 0 to 100.
    pub fn total_score(&self) -> u32 {
        self.checks.iter().map(|c| c.score).sum()
    }

    pub fn max_score(&self) -> u32 {
        self.checks.iter().map(|c| c.max_score).sum()
    }

    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn count_by_level(&self, level: RiskLevel) -> usize {
        self.checks.iter().filter(|c| c.level == level).count()
    }

    /// Number of checks per risk level, in ascending severity.
    pub fn level_summary(&self) -> Vec<(RiskLevel, usize)> {
        RiskLevel::iter()
            .map(|level| (level, self.count_by_level(level)))
            .collect()
    }

    pub fn check(&self, id: &str) -> Option<&SecurityCheck> {
        self.checks.iter().find(|c| c.id == id)
    }
}

/// Runs the fixed battery of five host checks.
#[derive(Clone)]
pub struct AuditEngine {
    probe: Arc<dyn HostProbe>,
    runner: CommandRunner,
}

impl AuditEngine {
    pub fn new(probe: Arc<dyn HostProbe>, runner: CommandRunner) -> Self {
        Self { probe, runner }
    }

    /// Runs every check. A failing probe degrades its own check only.
    pub async fn run_audit(&self) -> SecurityReport {
        info!("Starting security audit");
        let (firewall, ssh, updates, ports, permissions) = tokio::join!(
            self.check_firewall(),
            self.check_ssh(),
            self.check_security_updates(),
            self.check_listening_ports(),
            self.check_file_permissions(),
        );
        let report = SecurityReport {
            checks: vec![firewall, ssh, updates, ports, permissions],
            generated_at: Utc::now(),
        };
        info!(
            "Security audit done - score: {}/{} - passed: {}/{}",
            report.total_score(),
            report.max_score(),
            report.passed_count(),
            report.checks.len()
        );
        report
    }

    pub async fn check_firewall(&self) -> SecurityCheck {
        let check = SecurityCheck::new(
            "firewall",
            "Firewall",
            "State of the system firewall",
            "Network",
            "Limits unwanted inbound connections.",
        );
        for unit in FIREWALL_UNITS {
            if self.probe.service_active(unit).await {
                return check.pass(
                    &format!("{} is active", unit),
                    "Firewall enabled.",
                    &format!("systemctl is-active {} = active", unit),
                );
            }
        }
        check
            .fail(
                RiskLevel::High,
                5,
                "No active firewall detected",
                "Enable a firewall (ufw or firewalld).",
                "systemctl is-active ufw/firewalld = inactive",
            )
            .with_fix(FIREWALL_FIX, true)
    }

    pub async fn check_ssh(&self) -> SecurityCheck {
        let check = SecurityCheck::new(
            "ssh",
            "SSH configuration",
            "Hardening of the SSH daemon configuration",
            "Access",
            "A weak SSH setup allows unauthorized access.",
        );
        let config = match self.probe.read_file(SSHD_CONFIG_PATH).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                return check.pass(
                    "SSH server not installed",
                    "No SSH exposure.",
                    &format!("{} absent", SSHD_CONFIG_PATH),
                )
            }
            Err(e) => {
                warn!("SSH check could not read its configuration: {:#}", e);
                return check.unverified(&format!("{:#}", e));
            }
        };
        ssh_check_from_config(check, &config)
    }

    pub async fn check_security_updates(&self) -> SecurityCheck {
        let check = SecurityCheck::new(
            "updates",
            "Security updates",
            "Pending updates reported by the package manager",
            "System",
            "Missing fixes increase the risk of exploitation.",
        );
        let count = match self.probe.pending_security_updates().await {
            Ok(count) => count,
            Err(e) => {
                warn!("Update check failed: {:#}", e);
                return check.unverified(&format!("{:#}", e));
            }
        };
        let fix = self
            .probe
            .package_manager()
            .await
            .map(|pm| pm.upgrade_command());
        let check = check.measured(count);
        let check = match count {
            0 => {
                return check.pass(
                    "System is up to date",
                    "No pending updates.",
                    "pending updates = 0",
                )
            }
            1..=5 => check.fail(
                RiskLevel::Low,
                15,
                &format!("{} update(s) available", count),
                "Install the pending updates.",
                &format!("pending updates = {}", count),
            ),
            _ => check.fail(
                RiskLevel::Medium,
                10,
                &format!("{} updates pending", count),
                "Install the pending updates quickly.",
                &format!("pending updates = {}", count),
            ),
        };
        match fix {
            Some(command) => check.with_fix(command, true),
            None => check,
        }
    }

    pub async fn check_listening_ports(&self) -> SecurityCheck {
        let check = SecurityCheck::new(
            "ports",
            "Open ports",
            "Sockets listening on the host",
            "Network",
            "Every listening service widens the attack surface.",
        );
        let sockets = match self.probe.listening_sockets().await {
            Ok(sockets) => sockets,
            Err(e) => {
                warn!("Port check failed: {:#}", e);
                return check.unverified(&format!("{:#}", e));
            }
        };
        let count = sockets.len();
        let proof = ports_proof(&sockets);
        let check = check.measured(count as u32);
        match count {
            0..=5 => check.pass(
                &format!("{} listening socket(s)", count),
                "Small attack surface.",
                &proof,
            ),
            6..=15 => check.notice(
                RiskLevel::Low,
                15,
                &format!("{} listening sockets", count),
                "Make sure each of these services is needed.",
                &proof,
            ),
            _ => check.fail(
                RiskLevel::Medium,
                10,
                &format!("{} listening sockets", count),
                "Disable the services you do not use.",
                &proof,
            ),
        }
    }

    pub async fn check_file_permissions(&self) -> SecurityCheck {
        let check = SecurityCheck::new(
            "perms",
            "File permissions",
            "Permission bits of the account databases",
            "System",
            "Loose permissions ease privilege escalation.",
        );
        let (passwd, shadow) = tokio::join!(
            self.probe.file_mode(PASSWD_PATH),
            self.probe.file_mode(SHADOW_PATH)
        );
        let (passwd, shadow) = match (passwd, shadow) {
            (Ok(p), Ok(s)) => (p, s),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Permission check failed: {:#}", e);
                return check.unverified(&format!("{:#}", e));
            }
        };

        let mut deviations = Vec::new();
        let mut fixes = Vec::new();
        if let Some(mode) = passwd {
            if mode != PASSWD_MODE {
                deviations.push(format!("{}={:03o}", PASSWD_PATH, mode));
                fixes.push(format!("pkexec chmod {:o} {}", PASSWD_MODE, PASSWD_PATH));
            }
        }
        if let Some(mode) = shadow {
            if !SHADOW_MODES.contains(&mode) {
                deviations.push(format!("{}={:03o}", SHADOW_PATH, mode));
                fixes.push(format!("pkexec chmod 640 {}", SHADOW_PATH));
            }
        }

        if deviations.is_empty() {
            return check.pass(
                "Permissions are correct",
                "Account databases are protected.",
                "passwd=644, shadow ok",
            );
        }
        check
            .fail(
                RiskLevel::Medium,
                12,
                &format!("Incorrect permissions: {}", deviations.join(", ")),
                "Restore the expected permissions of the system files.",
                &deviations.join(", "),
            )
            .with_fix(&fixes.join(" && "), false)
    }

    /// Runs a remediation command. Does not re-run the audit.
    pub async fn apply_fix(&self, command: &str) -> bool {
        info!("Applying remediation: {}", command);
        let result = self.runner.run(command, false).await;
        if !result.success {
            error!("Remediation failed: {}", result.output.trim());
        }
        result.success
    }
}

fn ssh_check_from_config(check: SecurityCheck, config: &str) -> SecurityCheck {
    let mut problems = Vec::new();
    let mut deduction = 0;

    if SSH_ROOT_LOGIN.is_match(config) {
        problems.push("PermitRootLogin yes");
        deduction += 8;
    }
    if SSH_PASSWORD_AUTH.is_match(config) {
        problems.push("PasswordAuthentication yes");
        deduction += 6;
    }
    // No Port directive means sshd listens on 22
    if SSH_DEFAULT_PORT.is_match(config) || !SSH_ANY_PORT.is_match(config) {
        problems.push("Port 22 (default)");
        deduction += 3;
    }

    if problems.is_empty() {
        return check.pass(
            "SSH configuration is hardened",
            "SSH hardened.",
            SSHD_CONFIG_PATH,
        );
    }
    let level = if deduction >= 10 {
        RiskLevel::High
    } else {
        RiskLevel::Medium
    };
    check.fail(
        level,
        CHECK_MAX_SCORE - deduction,
        &problems.join(" / "),
        "Disable root login, prefer SSH keys over passwords and move off port 22.",
        SSHD_CONFIG_PATH,
    )
}

fn ports_proof(sockets: &[ListeningSocket]) -> String {
    let describe = |s: &ListeningSocket| format!("{} ({})", s.port, s.process);
    let (local, exposed): (Vec<&ListeningSocket>, Vec<&ListeningSocket>) =
        sockets.iter().partition(|s| s.is_loopback());

    let mut proof = String::new();
    if !exposed.is_empty() {
        proof.push_str("Exposed:\n");
        proof.push_str(&exposed.iter().take(12).map(|s| describe(s)).collect::<Vec<_>>().join("\n"));
    }
    if !local.is_empty() {
        if !proof.is_empty() {
            proof.push_str("\n\n");
        }
        proof.push_str("Local:\n");
        proof.push_str(&local.iter().take(12).map(|s| describe(s)).collect::<Vec<_>>().join("\n"));
    }
    proof
}
