//! VPN connection state types.

use crate::state::{DnsMode, VpnType};

/// VPN connection state machine.
///
/// Only [`crate::service::VpnService`] moves between states:
/// `Disconnected → Connecting → Connected → Disconnecting → Disconnected`,
/// with `Error` after a failed connect or exhausted reconnection and
/// `Reconnecting` while the monitor restores a lost tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VpnStatus {
    /// No active VPN connection.
    #[default]
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Tunnel confirmed up.
    Connected,
    /// Teardown in progress.
    Disconnecting,
    /// Last connect failed or reconnection gave up.
    Error,
    /// Tunnel lost, monitor is retrying.
    Reconnecting,
}

impl VpnStatus {
    /// Get a human-readable string representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Error => "error",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// True while a tunnel is (or is about to be) up.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connected | Self::Reconnecting)
    }
}

impl std::fmt::Display for VpnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the active connection for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub profile_name: String,
    pub vpn_type: VpnType,
    pub status: VpnStatus,
    pub dns_mode: DnsMode,
    /// Public address seen by the outside world, when it could be fetched.
    pub public_ip: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(VpnStatus::Reconnecting.to_string(), "reconnecting");
        assert_eq!(VpnStatus::default(), VpnStatus::Disconnected);
    }

    #[test]
    fn test_status_is_active() {
        assert!(VpnStatus::Connected.is_active());
        assert!(VpnStatus::Reconnecting.is_active());
        assert!(!VpnStatus::Connecting.is_active());
        assert!(!VpnStatus::Error.is_active());
    }
}
