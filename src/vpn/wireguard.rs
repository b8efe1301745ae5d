//! `WireGuard` control through `wg-quick` and `wg`.

use super::TunnelContext;
use crate::constants;
use crate::core::cleanup::CleanupOutcome;
use crate::core::runner::{CommandRunner, CommandSpec};
use crate::error::{Result, VpnError};
use crate::state::VpnProfile;

fn config_arg(profile: &VpnProfile) -> String {
    profile.config_path.to_string_lossy().into_owned()
}

/// `wg-quick up <config>`; the exit code decides.
///
/// # Errors
///
/// Returns [`VpnError::ProcessLaunch`] with `wg-quick`'s stderr.
pub fn connect(ctx: &TunnelContext<'_>, profile: &VpnProfile) -> Result<()> {
    let spec = CommandSpec::new("wg-quick", ["up".to_string(), config_arg(profile)])
        .privileged()
        .timeout(ctx.settings.launch_timeout());
    let out = ctx.runner.run(&spec)?;
    if out.success() {
        log::info!("WireGuard interface {} is up", profile.interface());
        Ok(())
    } else {
        Err(VpnError::launch("wg-quick", format!("WireGuard failed: {}", out.reason())))
    }
}

/// Names printed by `wg show interfaces`.
pub fn live_interfaces(runner: &dyn CommandRunner) -> Vec<String> {
    let spec = CommandSpec::new("wg", ["show", "interfaces"])
        .privileged()
        .timeout(constants::CHECK_TIMEOUT);
    match runner.run(&spec) {
        Ok(out) if out.success() => out.stdout.split_whitespace().map(ToString::to_string).collect(),
        Ok(out) => {
            log::debug!("wg show failed: {}", out.reason());
            Vec::new()
        }
        Err(e) => {
            log::debug!("wg show failed: {e}");
            Vec::new()
        }
    }
}

pub fn is_alive(runner: &dyn CommandRunner, profile: &VpnProfile) -> bool {
    let interface = profile.interface();
    live_interfaces(runner).iter().any(|name| *name == interface)
}

pub fn stop(runner: &dyn CommandRunner, profile: &VpnProfile) -> CleanupOutcome {
    let spec = CommandSpec::new("wg-quick", ["down".to_string(), config_arg(profile)])
        .privileged()
        .timeout(constants::KILL_TIMEOUT);
    CleanupOutcome::from_command(runner.run(&spec))
}
