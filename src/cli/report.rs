//! `doctor` report: which networking tools are present and where state lives.

use std::path::PathBuf;

use crate::constants;
use crate::core::runner::{CommandRunner, CommandSpec};
use crate::state::VpnType;
use crate::utils;

// ── Data structures ─────────────────────────────────────────────────────────

/// Status of a runtime dependency (e.g. `openvpn`, `wg-quick`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStatus {
    pub name: &'static str,
    pub found: bool,
    pub version: Option<String>,
    /// Whether connecting is impossible without it.
    pub required: bool,
}

/// Everything printed by `vpnkeeper doctor`.
#[derive(Debug, Clone)]
pub struct DoctorReport {
    pub version: &'static str,
    pub is_root: bool,
    pub tools: Vec<ToolStatus>,
    pub vpn_dir: PathBuf,
    pub config_file: Option<PathBuf>,
    pub profile_counts: (usize, usize),
}

impl DoctorReport {
    /// Required tools that are missing.
    #[must_use]
    pub fn missing_required(&self) -> Vec<&'static str> {
        self.tools
            .iter()
            .filter(|t| t.required && !t.found)
            .map(|t| t.name)
            .collect()
    }
}

// ── Collection ──────────────────────────────────────────────────────────────

/// When a checked tool is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Need {
    Always,
    /// Needed once a profile of this type is imported.
    For(VpnType),
    Optional,
}

/// Tools checked by the report, with the arguments that print a version.
const TOOLS: [(&str, &[&str], Need); 10] = [
    ("openvpn", &["--version"], Need::For(VpnType::OpenVpn)),
    ("wg-quick", &["--version"], Need::For(VpnType::WireGuard)),
    ("wg", &["--version"], Need::For(VpnType::WireGuard)),
    ("ip", &["-V"], Need::Always),
    ("nmcli", &["--version"], Need::Optional),
    ("resolvectl", &["--version"], Need::Optional),
    ("conntrack", &["--version"], Need::Optional),
    ("nslookup", &["-version"], Need::Optional),
    ("curl", &["--version"], Need::Optional),
    ("notify-send", &["--version"], Need::Optional),
];

pub fn collect(
    runner: &dyn CommandRunner,
    vpn_dir: PathBuf,
    config_file: Option<PathBuf>,
    profile_types: impl IntoIterator<Item = VpnType>,
) -> DoctorReport {
    let mut wg = 0;
    let mut ovpn = 0;
    for vpn_type in profile_types {
        match vpn_type {
            VpnType::WireGuard => wg += 1,
            VpnType::OpenVpn => ovpn += 1,
        }
    }
    let required = |need: Need| match need {
        Need::Always => true,
        Need::For(VpnType::WireGuard) => wg > 0,
        Need::For(VpnType::OpenVpn) => ovpn > 0,
        Need::Optional => false,
    };

    DoctorReport {
        version: constants::APP_VERSION,
        is_root: utils::is_root(),
        tools: TOOLS
            .iter()
            .map(|&(name, args, need)| check_tool(runner, name, args, required(need)))
            .collect(),
        vpn_dir,
        config_file,
        profile_counts: (wg, ovpn),
    }
}

/// Check if a tool exists on `$PATH` and try to get its version.
fn check_tool(runner: &dyn CommandRunner, name: &'static str, version_args: &[&str], required: bool) -> ToolStatus {
    if !runner.has_program(name) {
        return ToolStatus {
            name,
            found: false,
            version: None,
            required,
        };
    }

    // wg-quick --version exits non-zero on some systems; take the version anyway
    let spec = CommandSpec::new(name, version_args.iter().copied()).timeout(constants::CHECK_TIMEOUT);
    let version = runner.run(&spec).ok().and_then(|out| {
        if out.stdout.trim().is_empty() {
            parse_version_line(&out.stderr)
        } else {
            parse_version_line(&out.stdout)
        }
    });

    ToolStatus {
        name,
        found: true,
        version,
        required,
    }
}

/// Dotted version from the first line of a `--version` style banner.
///
/// Versions may be glued to a package name (`iproute2-6.1.0`) or carry a
/// distro suffix (`9.18.18-0ubuntu0.22.04.2-Ubuntu`).
fn parse_version_line(raw: &str) -> Option<String> {
    let first_line = raw.lines().next()?.trim();
    first_line
        .split(|c: char| c.is_whitespace() || c == '-' || c == ',')
        .map(|piece| piece.strip_prefix('v').unwrap_or(piece))
        .find(|piece| piece.starts_with(|c: char| c.is_ascii_digit()) && piece.contains('.'))
        .map(|piece| {
            piece
                .chars()
                .take_while(|c| *c == '.' || c.is_ascii_alphanumeric())
                .collect::<String>()
        })
        .filter(|version| !version.is_empty())
}

// ── Output ──────────────────────────────────────────────────────────────────

pub fn print(report: &DoctorReport) {
    let (wg, ovpn) = report.profile_counts;

    println!("vpnkeeper {}", report.version);
    if report.is_root {
        println!("  Running as:   root");
    } else {
        println!("  Running as:   user (privileged commands use sudo -n)");
    }

    println!("\n  Dependencies:");
    for tool in &report.tools {
        let status = match (tool.found, &tool.version) {
            (true, Some(v)) => format!("found ({v})"),
            (true, None) => "found".to_string(),
            (false, _) if tool.required => "MISSING".to_string(),
            (false, _) => "not found (optional)".to_string(),
        };
        println!("    {:<12} {status}", tool.name);
    }

    println!("\n  Config:");
    println!("    VPN directory: {}", report.vpn_dir.display());
    match &report.config_file {
        Some(path) => println!("    config.toml:   {}", path.display()),
        None => println!("    config.toml:   not found (using defaults)"),
    }
    println!("    Profiles:      {} ({wg} WireGuard, {ovpn} OpenVPN)", wg + ovpn);
    println!();
}
