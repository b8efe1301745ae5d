//! `OpenVPN` and `WireGuard` connection manager.
//!
//! [`VpnService`] owns the profile registry and the single active
//! connection. It drives the system VPN clients, snapshots and restores DNS,
//! installs split-tunnel bypass routes and reconnects lost tunnels.

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod service;
pub mod state;
pub mod utils;
pub mod vpn;

pub use config::Settings;
pub use error::{Result, VpnError};
pub use service::{ObserverId, VpnService};
