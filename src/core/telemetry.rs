//! Public IP lookup for connection details.
//!
//! Queries a list of plain-text IP echo services through `curl`, falling
//! back to the next endpoint when one is unreachable or returns garbage.

use std::net::IpAddr;
use std::time::Duration;

use crate::constants;
use crate::core::runner::{CommandRunner, CommandSpec};

/// Fetches the public IP address, trying each endpoint in order.
pub fn fetch_public_ip(runner: &dyn CommandRunner) -> Option<String> {
    fetch_public_ip_from(runner, &constants::IP_APIS)
}

fn fetch_public_ip_from(runner: &dyn CommandRunner, endpoints: &[&str]) -> Option<String> {
    let timeout = constants::API_TIMEOUT_SECS.to_string();

    for &endpoint in endpoints {
        let spec = CommandSpec::new("curl", ["-s", "--max-time", timeout.as_str(), endpoint])
            .timeout(Duration::from_secs(u64::from(constants::API_TIMEOUT_SECS) + 1));
        match runner.run(&spec) {
            Ok(out) if out.success() => {
                if let Some(ip) = parse_ip(&out.stdout) {
                    return Some(ip);
                }
                log::debug!("{endpoint} returned no usable address");
            }
            Ok(out) => log::debug!("{endpoint} failed: {}", out.reason()),
            Err(e) => log::debug!("{endpoint} failed: {e}"),
        }
    }

    log::warn!("Failed to fetch public IP (check network/curl)");
    None
}

/// Accepts only a bare IPv4/IPv6 address, so HTML error pages are ignored.
fn parse_ip(body: &str) -> Option<String> {
    let candidate = body.trim();
    candidate.parse::<IpAddr>().ok().map(|_| candidate.to_string())
}
