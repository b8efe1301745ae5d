//! Connection monitor with bounded reconnection.
//!
//! One thread per established connection. It sleeps on a stop channel, so
//! dropping the [`MonitorHandle`] interrupts every wait immediately.

use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::Settings;
use crate::constants;
use crate::error::Result;
use crate::state::{VpnProfile, VpnStatus};

/// What the monitor needs from the service.
pub trait MonitorHost: Send + Sync {
    fn is_alive(&self, profile: &VpnProfile) -> bool;

    /// Re-runs the type-specific connect for `profile`.
    ///
    /// # Errors
    ///
    /// Returns the launch or verification error of the attempt.
    fn reconnect(&self, profile: &VpnProfile) -> Result<()>;

    fn publish(&self, status: VpnStatus, message: Option<&str>);
}

/// Timing and retry bounds for one monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorPolicy {
    pub grace: Duration,
    pub interval: Duration,
    pub reconnect_delay: Duration,
    pub max_attempts: u32,
}

impl From<&Settings> for MonitorPolicy {
    fn from(settings: &Settings) -> Self {
        Self {
            grace: settings.monitor_grace(),
            interval: settings.monitor_interval(),
            reconnect_delay: settings.reconnect_delay(),
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Owns a running monitor thread.
#[derive(Debug)]
pub struct MonitorHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Starts monitoring `profile`.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(host: Arc<dyn MonitorHost>, profile: VpnProfile, policy: MonitorPolicy) -> io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name(format!("vpn-monitor-{}", profile.name))
            .spawn(move || run(host.as_ref(), &profile, policy, &stop_rx))?;
        Ok(Self {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Signals the thread and waits for it; nothing is published afterwards.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                log::error!("Monitor thread panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Waits `duration`; true if the monitor was stopped meanwhile.
fn stopped_during(stop: &Receiver<()>, duration: Duration) -> bool {
    !matches!(stop.recv_timeout(duration), Err(RecvTimeoutError::Timeout))
}

fn stopped(stop: &Receiver<()>) -> bool {
    !matches!(stop.try_recv(), Err(mpsc::TryRecvError::Empty))
}

/// Monitor loop; returns when stopped or after retries are exhausted.
pub fn run(host: &dyn MonitorHost, profile: &VpnProfile, policy: MonitorPolicy, stop: &Receiver<()>) {
    log::info!("Monitoring '{}'", profile.name);
    if stopped_during(stop, policy.grace) {
        return;
    }

    let mut attempts = 0_u32;
    loop {
        if host.is_alive(profile) {
            log::debug!("'{}' is alive", profile.name);
        } else {
            if stopped(stop) {
                return;
            }
            if attempts >= policy.max_attempts {
                log::error!("{} for '{}'", constants::MSG_MAX_RECONNECT, profile.name);
                host.publish(VpnStatus::Error, Some(constants::MSG_MAX_RECONNECT));
                return;
            }
            attempts += 1;
            log::warn!("Connection to '{}' lost, reconnecting...", profile.name);
            host.publish(
                VpnStatus::Reconnecting,
                Some(&format!("Reconnecting (attempt {attempts}/{})...", policy.max_attempts)),
            );
            if stopped_during(stop, policy.reconnect_delay) {
                return;
            }

            let result = host.reconnect(profile);
            if stopped(stop) {
                return;
            }
            match result {
                Ok(()) => {
                    log::info!("Reconnected to '{}'", profile.name);
                    attempts = 0;
                    host.publish(VpnStatus::Connected, Some(constants::MSG_RECONNECTED));
                }
                Err(e) => log::warn!("Reconnect attempt {attempts} failed: {e}"),
            }
        }

        if stopped_during(stop, policy.interval) {
            return;
        }
    }
}
