//! Outcomes of best-effort teardown steps.
//!
//! Disconnect runs a fixed list of steps; each reports a [`CleanupOutcome`]
//! and a failure never prevents the following steps from running.

use crate::core::runner::{CommandOutput, CommandRunner, CommandSpec};

/// Result of one cleanup step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Done,
    /// Not applicable (e.g. split tunnelling disabled, interface already gone).
    Skipped(String),
    Failed(String),
}

impl CleanupOutcome {
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Maps a command result: non-zero exit or launch error is a failure.
    #[must_use]
    pub fn from_command(result: crate::error::Result<CommandOutput>) -> Self {
        match result {
            Ok(out) if out.success() => Self::Done,
            Ok(out) => Self::Failed(out.reason()),
            Err(e) => Self::Failed(e.to_string()),
        }
    }
}

/// Ordered record of a teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    steps: Vec<(&'static str, CleanupOutcome)>,
}

impl CleanupReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a step's outcome and logs it.
    pub fn record(&mut self, step: &'static str, outcome: CleanupOutcome) {
        match &outcome {
            CleanupOutcome::Done => log::info!("cleanup: {step}"),
            CleanupOutcome::Skipped(why) => log::debug!("cleanup: {step} skipped ({why})"),
            CleanupOutcome::Failed(why) => log::warn!("cleanup: {step} failed: {why}"),
        }
        self.steps.push((step, outcome));
    }

    /// Runs `spec` and records the mapped outcome.
    pub fn run(&mut self, runner: &dyn CommandRunner, step: &'static str, spec: &CommandSpec) {
        self.record(step, CleanupOutcome::from_command(runner.run(spec)));
    }

    pub fn steps(&self) -> &[(&'static str, CleanupOutcome)] {
        &self.steps
    }

    #[must_use]
    pub fn outcome(&self, step: &str) -> Option<&CleanupOutcome> {
        self.steps.iter().find(|(name, _)| *name == step).map(|(_, o)| o)
    }

    /// Names of failed steps, in execution order.
    #[must_use]
    pub fn failures(&self) -> Vec<&'static str> {
        self.steps
            .iter()
            .filter(|(_, outcome)| outcome.is_failed())
            .map(|(name, _)| *name)
            .collect()
    }

    /// One-line summary for status messages.
    #[must_use]
    pub fn summary(&self) -> String {
        let failures = self.failures();
        if failures.is_empty() {
            crate::constants::MSG_DISCONNECTED.to_string()
        } else {
            format!(
                "{} ({} cleanup step(s) failed: {})",
                crate::constants::MSG_DISCONNECTED,
                failures.len(),
                failures.join(", ")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VpnError;

    #[test]
    fn test_outcome_from_command() {
        assert_eq!(CleanupOutcome::from_command(Ok(CommandOutput::ok(""))), CleanupOutcome::Done);
        assert!(CleanupOutcome::from_command(Ok(CommandOutput::failed(1, "nope"))).is_failed());
        assert!(CleanupOutcome::from_command(Err(VpnError::launch("ip", "missing"))).is_failed());
    }

    #[test]
    fn test_summary_lists_failures_in_order() {
        let mut report = CleanupReport::new();
        report.record("stop tunnel", CleanupOutcome::Done);
        report.record("flush dns cache", CleanupOutcome::Failed("no resolvectl".to_string()));
        report.record("remove split tunnel", CleanupOutcome::Skipped("disabled".to_string()));
        report.record("restart resolver", CleanupOutcome::Failed("timeout".to_string()));

        assert_eq!(report.failures(), vec!["flush dns cache", "restart resolver"]);
        assert_eq!(
            report.summary(),
            "Disconnected (2 cleanup step(s) failed: flush dns cache, restart resolver)"
        );
    }

    #[test]
    fn test_clean_summary() {
        let mut report = CleanupReport::new();
        report.record("stop tunnel", CleanupOutcome::Done);
        assert_eq!(report.summary(), "Disconnected");
        assert_eq!(report.outcome("stop tunnel"), Some(&CleanupOutcome::Done));
    }
}
