//! User configuration loaded from `config.toml`.
//!
//! Every field is optional in the file; missing fields fall back to the
//! defaults in [`crate::constants`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;
use crate::error::{Result, VpnError};

/// Runtime settings for the VPN service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Managed directory for configs, auth files and PID files.
    /// Defaults to `<config_dir>/vpnkeeper/vpn`.
    pub vpn_dir: Option<PathBuf>,
    /// Resolver file snapshotted before connect and restored on disconnect.
    pub resolv_conf: PathBuf,
    /// Prefix networking commands with `sudo` when not running as root.
    pub use_sudo: bool,
    /// Secret store service name for saved credentials.
    pub keyring_service: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub monitor_interval_ms: u64,
    pub monitor_grace_ms: u64,
    pub openvpn_init_timeout_ms: u64,
    pub openvpn_poll_ms: u64,
    pub settle_ms: u64,
    pub launch_timeout_secs: u64,
    /// Domains resolved after disconnect to check DNS.
    pub dns_test_domains: Vec<String>,
    /// Send a desktop notification when a connection attempt fails.
    pub notify_on_failure: bool,
    /// Maximum number of queued operations before new ones are rejected.
    pub task_queue_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vpn_dir: None,
            resolv_conf: PathBuf::from(constants::DEFAULT_RESOLV_CONF),
            use_sudo: true,
            keyring_service: format!("{}-vpn", constants::APP_NAME),
            max_reconnect_attempts: constants::DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay_ms: constants::DEFAULT_RECONNECT_DELAY_MS,
            monitor_interval_ms: constants::DEFAULT_MONITOR_INTERVAL_MS,
            monitor_grace_ms: constants::DEFAULT_MONITOR_GRACE_MS,
            openvpn_init_timeout_ms: constants::DEFAULT_OPENVPN_INIT_TIMEOUT_MS,
            openvpn_poll_ms: constants::DEFAULT_OPENVPN_POLL_MS,
            settle_ms: constants::DEFAULT_SETTLE_MS,
            launch_timeout_secs: constants::DEFAULT_LAUNCH_TIMEOUT_SECS,
            dns_test_domains: constants::DEFAULT_DNS_TEST_DOMAINS
                .iter()
                .map(ToString::to_string)
                .collect(),
            notify_on_failure: true,
            task_queue_capacity: constants::DEFAULT_TASK_QUEUE_CAPACITY,
        }
    }
}

impl Settings {
    /// Loads settings from `path`, returning defaults if the file is absent.
    ///
    /// # Errors
    ///
    /// Returns [`VpnError::Config`] if the file exists but is not valid TOML
    /// for this schema.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|reason| VpnError::Config {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Loads `config.toml` from the application config directory.
    ///
    /// # Errors
    ///
    /// See [`Settings::load`].
    pub fn load_default() -> Result<Self> {
        match crate::utils::get_app_config_dir() {
            Ok(dir) => Self::load(&dir.join(constants::CONFIG_FILE_NAME)),
            Err(e) => {
                log::warn!("Cannot locate config directory ({e}), using defaults");
                Ok(Self::default())
            }
        }
    }

    fn from_toml(content: &str) -> std::result::Result<Self, String> {
        let settings: Self = toml::from_str(content).map_err(|e| e.to_string())?;
        if settings.task_queue_capacity == 0 {
            return Err("task_queue_capacity must be at least 1".to_string());
        }
        Ok(settings)
    }

    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    #[must_use]
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    #[must_use]
    pub fn monitor_grace(&self) -> Duration {
        Duration::from_millis(self.monitor_grace_ms)
    }

    #[must_use]
    pub fn openvpn_init_timeout(&self) -> Duration {
        Duration::from_millis(self.openvpn_init_timeout_ms)
    }

    #[must_use]
    pub fn openvpn_poll(&self) -> Duration {
        Duration::from_millis(self.openvpn_poll_ms)
    }

    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    #[must_use]
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }

    /// Settings with every wait shortened, for driving the service in tests.
    #[cfg(test)]
    pub(crate) fn for_tests(vpn_dir: &Path) -> Self {
        Self {
            vpn_dir: Some(vpn_dir.to_path_buf()),
            resolv_conf: vpn_dir.join("resolv.conf"),
            use_sudo: false,
            reconnect_delay_ms: 0,
            monitor_interval_ms: 10,
            monitor_grace_ms: 0,
            openvpn_init_timeout_ms: 200,
            openvpn_poll_ms: 10,
            settle_ms: 0,
            notify_on_failure: false,
            ..Self::default()
        }
    }
}
