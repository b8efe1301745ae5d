//! Building blocks used by the VPN service.

pub mod cleanup;
pub mod credentials;
pub mod dns;
pub mod importer;
pub mod monitor;
pub mod notify;
pub mod runner;
pub mod split_tunnel;
pub mod store;
pub mod telemetry;
