//! DNS snapshot, per-profile DNS modes and post-disconnect DNS repair.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::core::cleanup::CleanupOutcome;
use crate::core::runner::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::{Result, VpnError};
use crate::state::{DnsMode, VpnProfile};

/// Resolver state captured before a tunnel comes up.
///
/// It is also written to the managed directory while connected, so a later
/// process that adopts the tunnel can still restore it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsSnapshot {
    /// Verbatim resolver file content.
    pub resolv_conf: String,
    /// Resolvers NetworkManager reported per device.
    pub nm_dns: Vec<String>,
}

impl DnsSnapshot {
    /// Captures the current resolver file and NetworkManager DNS list.
    ///
    /// Each half is best effort; a failure leaves that half empty.
    pub fn capture(runner: &dyn CommandRunner, resolv_conf: &Path) -> Self {
        let mut snapshot = Self::default();

        match fs::read_to_string(resolv_conf) {
            Ok(content) => snapshot.resolv_conf = content,
            Err(e) => log::warn!("Failed to read {}: {e}", resolv_conf.display()),
        }

        let spec = CommandSpec::new("nmcli", ["-t", "-f", "IP4.DNS", "device", "show"]);
        match runner.run(&spec) {
            Ok(out) if out.success() => snapshot.nm_dns = parse_nmcli_dns(&out.stdout),
            Ok(out) => log::debug!("nmcli reported no DNS: {}", out.reason()),
            Err(e) => log::debug!("nmcli unavailable: {e}"),
        }

        log::info!(
            "Saved DNS state ({} bytes of resolver config, {} NetworkManager servers)",
            snapshot.resolv_conf.len(),
            snapshot.nm_dns.len()
        );
        snapshot
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolv_conf.trim().is_empty()
    }

    /// Writes the snapshot as JSON, readable only by its owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        crate::utils::set_private_permissions(path)?;
        Ok(())
    }

    /// Reads a snapshot saved by [`DnsSnapshot::save`]; `None` if absent or
    /// unreadable.
    pub fn load(path: &Path) -> Option<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("Cannot read DNS snapshot {}: {e}", path.display());
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                log::warn!("Ignoring corrupt DNS snapshot {}: {e}", path.display());
                None
            }
        }
    }
}

/// Extracts resolvers from `nmcli -t -f IP4.DNS device show` output.
///
/// Lines look like `IP4.DNS[1]:192.168.1.1`.
pub fn parse_nmcli_dns(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.starts_with("IP4.DNS"))
        .filter_map(|line| line.split_once(':'))
        .map(|(_, server)| server.trim().to_string())
        .filter(|server| !server.is_empty())
        .collect()
}

/// Resolver file content for a list of servers.
pub fn custom_resolv_conf(servers: &[String]) -> String {
    servers.iter().map(|dns| format!("nameserver {dns}\n")).collect()
}

/// Overwrites the resolver file through a privileged `tee`.
fn write_resolv_conf(runner: &dyn CommandRunner, path: &Path, content: &str) -> Result<CommandOutput> {
    let spec = CommandSpec::new("tee", [path.to_string_lossy().into_owned()])
        .privileged()
        .stdin(content);
    runner.run(&spec)
}

/// Applies the profile's DNS mode after the tunnel is up.
///
/// # Errors
///
/// Returns an error if the resolver file could not be written.
pub fn apply(
    runner: &dyn CommandRunner,
    resolv_conf: &Path,
    profile: &VpnProfile,
    snapshot: &DnsSnapshot,
) -> Result<()> {
    match profile.dns_mode {
        DnsMode::UseVpnDns => Ok(()),
        DnsMode::KeepSystemDns => match restore(runner, resolv_conf, snapshot) {
            CleanupOutcome::Failed(why) => Err(VpnError::launch("tee", why)),
            _ => Ok(()),
        },
        DnsMode::UseCustomDns if profile.custom_dns.is_empty() => {
            log::warn!("Custom DNS selected for '{}' but no servers configured", profile.name);
            Ok(())
        }
        DnsMode::UseCustomDns => {
            let out = write_resolv_conf(runner, resolv_conf, &custom_resolv_conf(&profile.custom_dns))?;
            if out.success() {
                log::info!("Applied custom DNS: {}", profile.custom_dns.join(", "));
                Ok(())
            } else {
                Err(VpnError::launch("tee", out.reason()))
            }
        }
    }
}

/// Writes the snapshotted resolver file back.
pub fn restore(runner: &dyn CommandRunner, resolv_conf: &Path, snapshot: &DnsSnapshot) -> CleanupOutcome {
    if snapshot.is_empty() {
        return CleanupOutcome::Skipped("no saved resolver configuration".to_string());
    }
    CleanupOutcome::from_command(write_resolv_conf(runner, resolv_conf, &snapshot.resolv_conf))
}

pub fn flush_cache(runner: &dyn CommandRunner) -> CleanupOutcome {
    CleanupOutcome::from_command(runner.run(&CommandSpec::new("resolvectl", ["flush-caches"]).privileged()))
}

pub fn restart_resolver(runner: &dyn CommandRunner) -> CleanupOutcome {
    let spec = CommandSpec::new("systemctl", ["restart", constants::RESOLVER_SERVICE])
        .privileged()
        .timeout(constants::KILL_TIMEOUT);
    CleanupOutcome::from_command(runner.run(&spec))
}

/// Resolves the test domains; if none resolves, flushes the cache once more.
pub fn verify(runner: &dyn CommandRunner, domains: &[String]) -> CleanupOutcome {
    if domains.is_empty() {
        return CleanupOutcome::Skipped("no test domains configured".to_string());
    }
    for domain in domains {
        let lookup = runner.run(&CommandSpec::new("nslookup", [domain.as_str()]));
        if lookup.is_ok_and(|out| out.success()) {
            log::info!("DNS verification OK: {domain}");
            return CleanupOutcome::Done;
        }
    }

    log::warn!("DNS verification failed, trying one more flush...");
    if let CleanupOutcome::Failed(why) = flush_cache(runner) {
        log::warn!("Second DNS flush failed: {why}");
    }
    CleanupOutcome::Failed(format!("none of {} resolved", domains.join(", ")))
}
