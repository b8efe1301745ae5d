//! Config validation and per-protocol tunnel drivers.

pub mod openvpn;
pub mod wireguard;

use std::fs;
use std::path::Path;

use regex::Regex;

use crate::config::Settings;
use crate::core::cleanup::CleanupOutcome;
use crate::core::credentials::Credentials;
use crate::core::runner::CommandRunner;
use crate::error::{Result, VpnError};
use crate::state::{VpnProfile, VpnType};
use crate::utils::VpnPaths;

/// Everything a driver needs to talk to the host.
#[derive(Clone, Copy)]
pub struct TunnelContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub paths: &'a VpnPaths,
    pub settings: &'a Settings,
}

/// Checks a config file and detects its VPN type.
///
/// # Errors
///
/// Returns [`VpnError::Validation`] describing the first problem found.
pub fn validate_config_file(path: &Path) -> Result<VpnType> {
    if !path.exists() {
        return Err(VpnError::Validation("File does not exist".to_string()));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let vpn_type = match extension.as_str() {
        "ovpn" => VpnType::OpenVpn,
        "conf" | "wg" => VpnType::WireGuard,
        "" => return Err(VpnError::Validation("Unsupported file type: ".to_string())),
        _ => return Err(VpnError::Validation(format!("Unsupported file type: .{extension}"))),
    };

    let content = fs::read_to_string(path)
        .map_err(|e| VpnError::Validation(format!("Error reading file: {e}")))?;

    match vpn_type {
        VpnType::OpenVpn => validate_openvpn(&content)?,
        VpnType::WireGuard => validate_wireguard(&content)?,
    }
    Ok(vpn_type)
}

/// True if some line starts (after whitespace) with the given pattern.
fn has_line(content: &str, pattern: &str) -> bool {
    Regex::new(&format!(r"(?m)^\s*{pattern}")).is_ok_and(|re| re.is_match(content))
}

fn validate_openvpn(content: &str) -> Result<()> {
    let missing: Vec<&str> = ["remote", "dev"]
        .into_iter()
        .filter(|directive| !has_line(content, &format!(r"{directive}\s+")))
        .collect();
    if !missing.is_empty() {
        return Err(VpnError::Validation(format!(
            "Missing required directives: {}",
            missing.join(", ")
        )));
    }

    let has_certs = ["<ca>", "<cert>", "<key>", "ca ", "cert ", "key "]
        .iter()
        .any(|marker| content.contains(marker));
    if !has_certs {
        return Err(VpnError::Validation(
            "No certificates found (embedded or referenced)".to_string(),
        ));
    }
    Ok(())
}

fn validate_wireguard(content: &str) -> Result<()> {
    if !content.contains("[Interface]") {
        return Err(VpnError::Validation("Missing [Interface] section".to_string()));
    }
    if !content.contains("[Peer]") {
        return Err(VpnError::Validation("Missing [Peer] section".to_string()));
    }
    if !has_line(content, r"PrivateKey\s*=") {
        return Err(VpnError::Validation("Missing PrivateKey in [Interface]".to_string()));
    }
    if !has_line(content, r"PublicKey\s*=") {
        return Err(VpnError::Validation("Missing PublicKey in [Peer]".to_string()));
    }
    Ok(())
}

/// Tools a VPN type needs on `PATH`.
pub fn required_tools(vpn_type: VpnType) -> &'static [&'static str] {
    match vpn_type {
        VpnType::OpenVpn => &["openvpn"],
        VpnType::WireGuard => &["wg-quick", "wg"],
    }
}

/// Fails if any tool required by `vpn_type` is missing.
///
/// # Errors
///
/// Returns [`VpnError::ProcessLaunch`] naming the missing tools.
pub fn check_dependencies(runner: &dyn CommandRunner, vpn_type: VpnType) -> Result<()> {
    let missing: Vec<&str> = required_tools(vpn_type)
        .iter()
        .copied()
        .filter(|tool| !runner.has_program(tool))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(VpnError::launch(
            &missing.join(", "),
            format!("not installed (required for {vpn_type})"),
        ))
    }
}

/// Brings the tunnel for `profile` up and verifies it.
///
/// # Errors
///
/// Returns the launch or verification failure.
pub fn connect(ctx: &TunnelContext<'_>, profile: &VpnProfile, credentials: Option<&Credentials>) -> Result<()> {
    check_dependencies(ctx.runner, profile.vpn_type)?;
    match profile.vpn_type {
        VpnType::OpenVpn => openvpn::connect(ctx, profile, credentials),
        VpnType::WireGuard => wireguard::connect(ctx, profile),
    }
}

/// Whether the tunnel for `profile` is still up.
pub fn is_alive(ctx: &TunnelContext<'_>, profile: &VpnProfile) -> bool {
    match profile.vpn_type {
        VpnType::OpenVpn => openvpn::is_alive(ctx, profile),
        VpnType::WireGuard => wireguard::is_alive(ctx.runner, profile),
    }
}

/// Tears the tunnel down; the first step of disconnect cleanup.
pub fn stop(ctx: &TunnelContext<'_>, profile: &VpnProfile) -> CleanupOutcome {
    match profile.vpn_type {
        VpnType::OpenVpn => openvpn::stop(ctx, profile),
        VpnType::WireGuard => wireguard::stop(ctx.runner, profile),
    }
}
