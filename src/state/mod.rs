//! Plain data types shared by the service and front ends.

mod connection;
mod profile;

pub use connection::{ConnectionInfo, VpnStatus};
pub use profile::{DnsMode, ProfileSettings, VpnProfile, VpnType};
