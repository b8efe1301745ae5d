//! Desktop notifications through `notify-send`.

use crate::core::runner::{CommandRunner, CommandSpec};

/// Shows a desktop notification; failures are only logged.
pub fn send(runner: &dyn CommandRunner, summary: &str, body: &str) {
    let spec = CommandSpec::new("notify-send", ["-a", crate::constants::APP_NAME, summary, body]);
    match runner.run(&spec) {
        Ok(out) if out.success() => {}
        Ok(out) => log::debug!("notify-send failed: {}", out.reason()),
        Err(e) => log::debug!("notify-send unavailable: {e}"),
    }
}

/// Notification for a failed connection attempt.
pub fn connection_failed(runner: &dyn CommandRunner, profile: &str, message: &str) {
    send(runner, "Connection Failed", &format!("Failed to connect to {profile}: {message}"));
}
