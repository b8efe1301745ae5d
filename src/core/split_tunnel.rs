//! Bypass routes that send selected destinations around the tunnel.

use crate::core::cleanup::CleanupOutcome;
use crate::core::runner::{CommandRunner, CommandSpec};
use crate::state::VpnProfile;

/// The physical uplink found in the main routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gateway {
    pub via: String,
    pub dev: String,
}

/// Picks the first `default via X dev Y` route that does not use `tunnel`.
pub fn parse_default_gateway(output: &str, tunnel: &str) -> Option<Gateway> {
    output.lines().find_map(|line| {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first() != Some(&"default") {
            return None;
        }
        let value = |key: &str| {
            tokens
                .iter()
                .position(|t| *t == key)
                .and_then(|i| tokens.get(i + 1))
                .map(ToString::to_string)
        };
        let gateway = Gateway {
            via: value("via")?,
            dev: value("dev")?,
        };
        (gateway.dev != tunnel).then_some(gateway)
    })
}

fn default_gateway(runner: &dyn CommandRunner, tunnel: &str) -> Option<Gateway> {
    let out = runner
        .run(&CommandSpec::new("ip", ["route", "show", "default"]))
        .ok()
        .filter(|out| out.success())?;
    parse_default_gateway(&out.stdout, tunnel)
}

/// Routes each of the profile's bypass IPs through the physical gateway.
///
/// Returns how many routes were added. App entries are stored only.
pub fn apply(runner: &dyn CommandRunner, profile: &VpnProfile, tunnel: &str) -> usize {
    if profile.split_tunnel_ips.is_empty() {
        return 0;
    }
    if !profile.split_tunnel_apps.is_empty() {
        log::debug!(
            "Split tunnel apps for '{}' are not enforced: {}",
            profile.name,
            profile.split_tunnel_apps.join(", ")
        );
    }
    let Some(gateway) = default_gateway(runner, tunnel) else {
        log::error!("Failed to apply split tunneling: no default gateway outside {tunnel}");
        return 0;
    };

    let mut added = 0;
    for ip in &profile.split_tunnel_ips {
        let spec = CommandSpec::new(
            "ip",
            ["route", "add", ip.as_str(), "via", gateway.via.as_str(), "dev", gateway.dev.as_str()],
        )
        .privileged();
        match CleanupOutcome::from_command(runner.run(&spec)) {
            CleanupOutcome::Failed(why) => log::warn!("Bypass route for {ip} failed: {why}"),
            _ => added += 1,
        }
    }
    log::info!("Split tunneling applied for {added} IPs via {}", gateway.via);
    added
}

/// Deletes the bypass routes; every route is attempted.
pub fn remove(runner: &dyn CommandRunner, profile: &VpnProfile) -> CleanupOutcome {
    if !profile.split_tunnel_enabled {
        return CleanupOutcome::Skipped("split tunnelling disabled".to_string());
    }
    if profile.split_tunnel_ips.is_empty() {
        return CleanupOutcome::Skipped("no bypass IPs".to_string());
    }

    let failed: Vec<&str> = profile
        .split_tunnel_ips
        .iter()
        .filter(|ip| {
            let spec = CommandSpec::new("ip", ["route", "del", ip.as_str()]).privileged();
            CleanupOutcome::from_command(runner.run(&spec)).is_failed()
        })
        .map(String::as_str)
        .collect();

    if failed.is_empty() {
        CleanupOutcome::Done
    } else {
        CleanupOutcome::Failed(format!("could not delete {}", failed.join(", ")))
    }
}
