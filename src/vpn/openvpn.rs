//! `OpenVPN` daemon control.
//!
//! The daemon is started with `--daemon --writepid --log`, then confirmed by
//! polling its log for [`constants::OVPN_LOG_SUCCESS`].

use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::Instant;

use regex::Regex;

use super::TunnelContext;
use crate::constants;
use crate::core::cleanup::CleanupOutcome;
use crate::core::credentials::{self, Credentials};
use crate::core::runner::{CommandRunner, CommandSpec};
use crate::error::{Result, VpnError};
use crate::state::VpnProfile;
use crate::utils;

/// `pkill -f` pattern matching only this profile's daemon.
///
/// The bracket keeps the pattern from matching the `sudo pkill` command line itself.
fn process_pattern(profile: &VpnProfile) -> String {
    format!(
        "[o]penvpn --config {}",
        regex::escape(&profile.config_path.to_string_lossy())
    )
}

fn kill_stale(ctx: &TunnelContext<'_>, profile: &VpnProfile) {
    let spec = CommandSpec::new("pkill", ["-f".to_string(), process_pattern(profile)])
        .privileged()
        .timeout(constants::KILL_TIMEOUT);
    match ctx.runner.run(&spec) {
        // pkill exits 1 when nothing matched
        Ok(out) if out.code == Some(0) || out.code == Some(1) => {}
        Ok(out) => log::warn!("pkill for '{}' failed: {}", profile.name, out.reason()),
        Err(e) => log::warn!("pkill for '{}' failed: {e}", profile.name),
    }
}

/// Removes a file that may be owned by root.
fn remove_root_file(runner: &dyn CommandRunner, path: &Path) {
    if let Err(e) = utils::remove_if_exists(path) {
        log::debug!("Removing {} needs privileges ({e})", path.display());
        let spec = CommandSpec::new("rm", ["-f".to_string(), path.to_string_lossy().into_owned()]).privileged();
        if let Err(e) = run_checked(runner, &spec) {
            log::warn!("Could not remove {}: {e}", path.display());
        }
    }
}

fn run_checked(runner: &dyn CommandRunner, spec: &CommandSpec) -> Result<()> {
    let out = runner.run(spec)?;
    if out.success() {
        Ok(())
    } else {
        Err(VpnError::launch(&spec.program, out.reason()))
    }
}

/// Reads a file written by the root-owned daemon.
///
/// Falls back to privileged `cat` when direct access is denied.
fn read_root_file(runner: &dyn CommandRunner, path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(_) => {
            let spec = CommandSpec::new("cat", [path.to_string_lossy().into_owned()]).privileged();
            runner.run(&spec).ok().filter(|out| out.success()).map(|out| out.stdout)
        }
    }
}

fn read_pid(runner: &dyn CommandRunner, path: &Path) -> Option<u32> {
    read_root_file(runner, path).as_deref().and_then(utils::parse_pid)
}

fn log_tail(runner: &dyn CommandRunner, path: &Path) -> Option<String> {
    read_root_file(runner, path)
        .map(|log| utils::tail_lines(&log, constants::OVPN_LOG_TAIL_LINES))
        .filter(|tail| !tail.trim().is_empty())
}

/// Launches the daemon for `profile` and waits for initialization.
///
/// # Errors
///
/// - [`VpnError::ProcessLaunch`] if `openvpn` exits non-zero, dies, or logs
///   a fatal error.
/// - [`VpnError::VerificationTimeout`] if initialization does not complete
///   in time.
pub fn connect(ctx: &TunnelContext<'_>, profile: &VpnProfile, creds: Option<&Credentials>) -> Result<()> {
    let name = profile.name.as_str();
    let pid_file = ctx.paths.pid_file(name);
    let log_file = ctx.paths.log_file(name);
    let auth_file = ctx.paths.auth_file(name);
    let mgmt_socket = ctx.paths.mgmt_socket(name);

    log::info!("Cleaning up any existing OpenVPN processes for {name}");
    kill_stale(ctx, profile);
    thread::sleep(ctx.settings.settle());
    remove_root_file(ctx.runner, &pid_file);
    remove_root_file(ctx.runner, &log_file);

    if let Some(creds) = creds {
        credentials::write_auth_file(&auth_file, creds)?;
    }
    remove_root_file(ctx.runner, &mgmt_socket);

    let path_arg = |p: &Path| p.to_string_lossy().into_owned();
    let mut args = vec![
        "--config".to_string(),
        path_arg(&profile.config_path),
        "--daemon".to_string(),
        "--log".to_string(),
        path_arg(&log_file),
        "--verb".to_string(),
        "3".to_string(),
        "--writepid".to_string(),
        path_arg(&pid_file),
    ];
    if auth_file.exists() {
        args.push("--auth-user-pass".to_string());
        args.push(path_arg(&auth_file));
    }
    args.extend(["--management".to_string(), path_arg(&mgmt_socket), "unix".to_string()]);

    let spec = CommandSpec::new("openvpn", args)
        .privileged()
        .timeout(ctx.settings.launch_timeout());
    log::info!("Starting OpenVPN with log file: {}", log_file.display());
    let out = ctx.runner.run(&spec)?;
    if !out.success() {
        let detail = log_tail(ctx.runner, &log_file).unwrap_or_else(|| out.reason());
        log::error!("OpenVPN exited with {:?}:\n{detail}", out.code);
        return Err(VpnError::launch("openvpn", format!("OpenVPN failed: {detail}")));
    }

    wait_for_init(ctx, &pid_file, &log_file).map_err(|e| {
        log::warn!("Stopping unverified OpenVPN daemon for {name}");
        if let CleanupOutcome::Failed(why) = stop(ctx, profile) {
            log::error!("Could not stop OpenVPN daemon for {name}: {why}");
        }
        e
    })
}

fn wait_for_init(ctx: &TunnelContext<'_>, pid_file: &Path, log_file: &Path) -> Result<()> {
    log::info!("Waiting for OpenVPN daemon to start...");
    let deadline = Instant::now() + ctx.settings.openvpn_init_timeout();

    loop {
        if let Some(log) = read_root_file(ctx.runner, log_file) {
            if log.contains(constants::OVPN_LOG_SUCCESS) {
                log::info!("OpenVPN initialization completed successfully");
                return Ok(());
            }
            if let Some(line) = constants::OVPN_LOG_ERRORS
                .iter()
                .find_map(|marker| log.lines().find(|l| l.contains(marker)))
            {
                log::error!("OpenVPN reported a fatal error: {line}");
                return Err(VpnError::launch("openvpn", format!("OpenVPN: {}", line.trim())));
            }
        }

        if let Some(pid) = read_pid(ctx.runner, pid_file) {
            if !utils::is_process_running(pid) {
                log::error!("OpenVPN process {pid} died during initialization");
                let detail = log_tail(ctx.runner, log_file).unwrap_or_default();
                return Err(VpnError::launch(
                    "openvpn",
                    format!("OpenVPN process {pid} died during initialization. {detail}")
                        .trim_end()
                        .to_string(),
                ));
            }
        }

        if Instant::now() >= deadline {
            if let Some(tail) = log_tail(ctx.runner, log_file) {
                log::error!("OpenVPN log (last {} lines):\n{tail}", constants::OVPN_LOG_TAIL_LINES);
            }
            return Err(VpnError::VerificationTimeout(format!(
                "OpenVPN initialization failed. Check log: {}",
                log_file.display()
            )));
        }
        thread::sleep(ctx.settings.openvpn_poll());
    }
}

/// True if `ip link show` output lists a `tunN` interface.
pub fn has_tun_interface(ip_link_output: &str) -> bool {
    Regex::new(r"(?m)^\d+:\s+tun\d+[:@]").is_ok_and(|re| re.is_match(ip_link_output))
}

/// Tunnel interface exists and, when a PID file is present, the daemon lives.
pub fn is_alive(ctx: &TunnelContext<'_>, profile: &VpnProfile) -> bool {
    let spec = CommandSpec::new("ip", ["link", "show"]).timeout(constants::CHECK_TIMEOUT);
    let has_tun = match ctx.runner.run(&spec) {
        Ok(out) => has_tun_interface(&out.stdout),
        Err(e) => {
            log::error!("Error checking VPN connection: {e}");
            return false;
        }
    };
    if !has_tun {
        log::debug!("No tun interface found, VPN not connected");
        return false;
    }

    match read_pid(ctx.runner, &ctx.paths.pid_file(&profile.name)) {
        Some(pid) => {
            let running = utils::is_process_running(pid);
            log::debug!("OpenVPN PID {pid} running: {running}");
            running
        }
        None => true,
    }
}

/// Stops the daemon: `kill` from the PID file (then `kill -9`), then `pkill`.
pub fn stop(ctx: &TunnelContext<'_>, profile: &VpnProfile) -> CleanupOutcome {
    let pid_file = ctx.paths.pid_file(&profile.name);
    let mut outcome = CleanupOutcome::Done;

    if let Some(pid) = read_pid(ctx.runner, &pid_file) {
        let pid = pid.to_string();
        let term = CommandSpec::new("kill", [pid.as_str()])
            .privileged()
            .timeout(constants::KILL_TIMEOUT);
        if let Err(e) = run_checked(ctx.runner, &term) {
            log::warn!("kill {pid} failed ({e}), sending SIGKILL");
            let force = CommandSpec::new("kill", ["-9", pid.as_str()]).privileged();
            if let Err(e) = run_checked(ctx.runner, &force) {
                outcome = CleanupOutcome::Failed(format!("could not kill {pid}: {e}"));
            }
        }
    }
    remove_root_file(ctx.runner, &pid_file);

    kill_stale(ctx, profile);
    thread::sleep(ctx.settings.settle());
    outcome
}
