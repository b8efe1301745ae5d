//! VPN profile and protocol types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Supported VPN protocol types.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum VpnType {
    /// `OpenVPN` protocol.
    #[serde(rename = "openvpn")]
    OpenVpn,
    /// `WireGuard` VPN protocol.
    #[serde(rename = "wireguard")]
    WireGuard,
}

impl VpnType {
    /// Extension used for the copy kept in the managed directory.
    ///
    /// `wg-quick` only accepts `.conf` files, so `.wg` imports are renamed.
    #[must_use]
    pub const fn managed_extension(self) -> &'static str {
        match self {
            Self::OpenVpn => "ovpn",
            Self::WireGuard => "conf",
        }
    }
}

impl std::fmt::Display for VpnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VpnType::OpenVpn => write!(f, "OpenVPN"),
            VpnType::WireGuard => write!(f, "WireGuard"),
        }
    }
}

/// How name resolution is handled while the tunnel is up.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum DnsMode {
    /// Let the VPN client push its resolvers.
    #[default]
    #[serde(rename = "vpn")]
    UseVpnDns,
    /// Put the pre-connect resolver configuration back.
    #[serde(rename = "system")]
    KeepSystemDns,
    /// Write [`VpnProfile::custom_dns`] as the resolver list.
    #[serde(rename = "custom")]
    UseCustomDns,
}

impl DnsMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UseVpnDns => "vpn",
            Self::KeepSystemDns => "system",
            Self::UseCustomDns => "custom",
        }
    }
}

impl std::str::FromStr for DnsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "vpn" => Ok(Self::UseVpnDns),
            "system" => Ok(Self::KeepSystemDns),
            "custom" => Ok(Self::UseCustomDns),
            other => Err(format!("Unknown DNS mode: {other} (expected vpn, system or custom)")),
        }
    }
}

/// VPN profile configuration.
///
/// Represents a saved VPN configuration file plus the per-profile settings
/// applied around the connection. This is also the persisted record in
/// `profiles.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnProfile {
    /// Unique profile name, also used in managed file names.
    pub name: String,
    /// Path to the configuration copy inside the managed directory.
    pub config_path: PathBuf,
    /// VPN protocol type, fixed at import.
    pub vpn_type: VpnType,
    /// Advisory flag, honoured by front ends only.
    #[serde(default)]
    pub auto_connect: bool,
    /// Whether the secret store currently holds credentials for this profile.
    #[serde(default)]
    pub remember_credentials: bool,
    #[serde(default)]
    pub dns_mode: DnsMode,
    /// Resolvers used when `dns_mode` is [`DnsMode::UseCustomDns`].
    #[serde(default)]
    pub custom_dns: Vec<String>,
    #[serde(default)]
    pub split_tunnel_enabled: bool,
    /// Applications that should bypass the tunnel (stored, not applied).
    #[serde(default)]
    pub split_tunnel_apps: Vec<String>,
    /// Destinations routed around the tunnel.
    #[serde(default)]
    pub split_tunnel_ips: Vec<String>,
}

impl VpnProfile {
    /// Creates a profile with default settings.
    pub fn new(name: impl Into<String>, config_path: impl Into<PathBuf>, vpn_type: VpnType) -> Self {
        Self {
            name: name.into(),
            config_path: config_path.into(),
            vpn_type,
            auto_connect: false,
            remember_credentials: false,
            dns_mode: DnsMode::default(),
            custom_dns: Vec::new(),
            split_tunnel_enabled: false,
            split_tunnel_apps: Vec::new(),
            split_tunnel_ips: Vec::new(),
        }
    }

    /// Network interface the tunnel for this profile runs on.
    ///
    /// `wg-quick` names the interface after the config file stem.
    #[must_use]
    pub fn interface(&self) -> String {
        match self.vpn_type {
            VpnType::OpenVpn => crate::constants::OPENVPN_INTERFACE.to_string(),
            VpnType::WireGuard => self
                .config_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&self.name)
                .to_string(),
        }
    }
}

/// Partial update applied by
/// [`VpnService::update_profile_settings`](crate::service::VpnService::update_profile_settings).
///
/// `None` fields leave the profile untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileSettings {
    pub dns_mode: Option<DnsMode>,
    pub custom_dns: Option<Vec<String>>,
    pub split_tunnel_enabled: Option<bool>,
    pub split_tunnel_ips: Option<Vec<String>>,
    pub split_tunnel_apps: Option<Vec<String>>,
    pub auto_connect: Option<bool>,
}

impl ProfileSettings {
    /// Applies the set fields to `profile`.
    pub fn apply_to(self, profile: &mut VpnProfile) {
        if let Some(mode) = self.dns_mode {
            profile.dns_mode = mode;
        }
        if let Some(dns) = self.custom_dns {
            profile.custom_dns = dns;
        }
        if let Some(enabled) = self.split_tunnel_enabled {
            profile.split_tunnel_enabled = enabled;
        }
        if let Some(ips) = self.split_tunnel_ips {
            profile.split_tunnel_ips = ips;
        }
        if let Some(apps) = self.split_tunnel_apps {
            profile.split_tunnel_apps = apps;
        }
        if let Some(auto) = self.auto_connect {
            profile.auto_connect = auto;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VpnProfile {
        let mut profile = VpnProfile::new("office", "/tmp/vpn/office.ovpn", VpnType::OpenVpn);
        profile.auto_connect = true;
        profile.remember_credentials = true;
        profile.dns_mode = DnsMode::UseCustomDns;
        profile.custom_dns = vec!["1.1.1.1".to_string(), "9.9.9.9".to_string()];
        profile.split_tunnel_enabled = true;
        profile.split_tunnel_apps = vec!["firefox".to_string()];
        profile.split_tunnel_ips = vec!["192.168.1.0/24".to_string()];
        profile
    }

    #[test]
    fn test_profile_json_round_trip() {
        let profile = sample();
        let value = serde_json::to_value(&profile).unwrap();
        let restored: VpnProfile = serde_json::from_value(value).unwrap();
        assert_eq!(restored, profile);
    }

    #[test]
    fn test_profile_json_field_values() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["vpn_type"], "openvpn");
        assert_eq!(value["dns_mode"], "custom");
        assert_eq!(value["config_path"], "/tmp/vpn/office.ovpn");
    }

    #[test]
    fn test_profile_missing_fields_use_defaults() {
        let json = r#"{"name": "wg", "config_path": "/tmp/wg.conf", "vpn_type": "wireguard"}"#;
        let profile: VpnProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.vpn_type, VpnType::WireGuard);
        assert_eq!(profile.dns_mode, DnsMode::UseVpnDns);
        assert!(!profile.auto_connect);
        assert!(profile.custom_dns.is_empty());
        assert!(profile.split_tunnel_ips.is_empty());
    }

    #[test]
    fn test_interface_names() {
        let wg = VpnProfile::new("home", "/tmp/vpn/home.conf", VpnType::WireGuard);
        assert_eq!(wg.interface(), "home");
        let ovpn = VpnProfile::new("office", "/tmp/vpn/office.ovpn", VpnType::OpenVpn);
        assert_eq!(ovpn.interface(), "tun0");
    }

    #[test]
    fn test_settings_only_touch_given_fields() {
        let mut profile = sample();
        ProfileSettings {
            dns_mode: Some(DnsMode::KeepSystemDns),
            ..ProfileSettings::default()
        }
        .apply_to(&mut profile);
        assert_eq!(profile.dns_mode, DnsMode::KeepSystemDns);
        assert!(profile.auto_connect);
        assert_eq!(profile.custom_dns.len(), 2);
    }

    #[test]
    fn test_dns_mode_parse() {
        assert_eq!("custom".parse::<DnsMode>(), Ok(DnsMode::UseCustomDns));
        assert_eq!("System".parse::<DnsMode>(), Ok(DnsMode::KeepSystemDns));
        assert!("dhcp".parse::<DnsMode>().is_err());
    }
}
