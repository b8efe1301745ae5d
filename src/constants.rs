//! Application-wide constants and default configuration values.
//!
//! This module defines the static values used throughout vpnkeeper,
//! including timing defaults, file names inside the managed VPN directory,
//! external tool names, log markers and user-facing messages.

use std::time::Duration;

// === Application Metadata ===

/// Application name (from Cargo.toml).
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
/// Current application version (from Cargo.toml).
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// === Path Configuration ===

/// Name of the managed VPN subdirectory inside the app config directory.
pub const VPN_DIR_NAME: &str = "vpn";
/// Name of the PID subdirectory inside the VPN directory.
pub const PID_DIR_NAME: &str = "pids";
/// Name of the persisted profile document.
pub const PROFILES_FILE_NAME: &str = "profiles.json";
/// Pre-connect resolver state, kept while a tunnel is up.
pub const DNS_SNAPSHOT_FILE_NAME: &str = ".dns_snapshot.json";
/// Name of the TOML settings file.
pub const CONFIG_FILE_NAME: &str = "config.toml";
/// Default resolver configuration snapshotted before connecting.
pub const DEFAULT_RESOLV_CONF: &str = "/etc/resolv.conf";

// === Timing Defaults ===

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 5000;
/// Wait before the first liveness check so the tunnel can settle.
pub const DEFAULT_MONITOR_GRACE_MS: u64 = 3000;
/// How long to wait for the `OpenVPN` initialization marker.
pub const DEFAULT_OPENVPN_INIT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_OPENVPN_POLL_MS: u64 = 1000;
/// Pause after killing processes before touching the network again.
pub const DEFAULT_SETTLE_MS: u64 = 1000;
/// Timeout for launching `openvpn` / `wg-quick`.
pub const DEFAULT_LAUNCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TASK_QUEUE_CAPACITY: usize = 8;

/// Timeout for short networking commands (`ip`, `resolvectl`, ...).
pub const SHORT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3);
/// Timeout for killing processes and restarting services.
pub const KILL_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout for liveness checks.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(2);
/// Timeout for one public IP lookup.
pub const API_TIMEOUT_SECS: u8 = 5;

// === DNS ===

/// Domains resolved after disconnect to verify DNS works again.
pub const DEFAULT_DNS_TEST_DOMAINS: [&str; 3] = ["google.com", "api.github.com", "1.1.1.1"];
/// System resolver restarted after DNS restore.
pub const RESOLVER_SERVICE: &str = "systemd-resolved";

// === OpenVPN ===

/// Interface name `OpenVPN` brings up for routed tunnels.
pub const OPENVPN_INTERFACE: &str = "tun0";
/// Log line confirming the tunnel is fully up.
pub const OVPN_LOG_SUCCESS: &str = "Initialization Sequence Completed";
/// Log lines after which the daemon will never come up.
pub const OVPN_LOG_ERRORS: [&str; 4] = [
    "AUTH_FAILED",
    "Exiting due to fatal error",
    "Cannot resolve host address",
    "Options error",
];
/// Number of log lines attached to launch failures.
pub const OVPN_LOG_TAIL_LINES: usize = 20;

// === Telemetry API Endpoints ===

/// Public IP endpoints tried in order.
pub const IP_APIS: [&str; 3] = [
    "https://ifconfig.me/ip",
    "https://api.ipify.org",
    "https://icanhazip.com",
];

// === Status Messages ===

pub const MSG_NOT_FOUND: &str = "Profile not found";
pub const MSG_DISCONNECTING: &str = "Disconnecting...";
pub const MSG_DISCONNECTED: &str = "Disconnected";
pub const MSG_NOT_CONNECTED: &str = "Not connected";
pub const MSG_RECONNECTED: &str = "Reconnected";
pub const MSG_MAX_RECONNECT: &str = "Max reconnection attempts reached";
pub const MSG_CONNECTED: &str = "Connected successfully";
