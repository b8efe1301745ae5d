//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::state::DnsMode;

/// vpnkeeper - `OpenVPN` and `WireGuard` profile manager
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Settings file (defaults to `<config dir>/vpnkeeper/config.toml`)
    #[arg(long, global = true, env = "VPNKEEPER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List imported profiles
    List,
    /// Import a profile from a config file, or every config in a directory
    Import {
        /// Path to a .ovpn/.conf/.wg file or a directory
        path: String,
        /// Profile name (single file only; defaults to the file stem)
        #[arg(long)]
        name: Option<String>,
    },
    /// Check a config file without importing it
    Validate {
        path: PathBuf,
    },
    /// Delete a profile and its managed files
    Delete {
        name: String,
    },
    /// Connect to a profile (defaults to the first auto-connect profile)
    Connect(ConnectArgs),
    /// Disconnect and restore network state
    Disconnect,
    /// Show connection status
    Status {
        /// Also look up the public IP address
        #[arg(long)]
        ip: bool,
    },
    /// Change per-profile settings
    Set(SetArgs),
    /// Manage stored credentials
    Credentials {
        #[command(subcommand)]
        action: CredentialsAction,
    },
    /// Check that the required networking tools are installed
    Doctor,
}

#[derive(ClapArgs, Debug)]
pub struct ConnectArgs {
    pub name: Option<String>,
    #[arg(long, short)]
    pub username: Option<String>,
    /// Read the password from the first line of stdin
    #[arg(long, requires = "username")]
    pub password_stdin: bool,
    /// Remember the given credentials in the keyring
    #[arg(long, requires = "username")]
    pub save_credentials: bool,
    /// Stay attached and print status changes until interrupted
    #[arg(long)]
    pub watch: bool,
}

#[derive(ClapArgs, Debug, Default)]
pub struct SetArgs {
    pub name: String,
    /// vpn, system or custom
    #[arg(long)]
    pub dns_mode: Option<DnsMode>,
    /// Comma-separated resolvers for the custom DNS mode
    #[arg(long, value_delimiter = ',')]
    pub custom_dns: Option<Vec<String>>,
    #[arg(long)]
    pub split_tunnel: Option<bool>,
    /// Comma-separated destinations routed around the tunnel
    #[arg(long, value_delimiter = ',')]
    pub split_ips: Option<Vec<String>>,
    /// Comma-separated applications to exclude (stored only)
    #[arg(long, value_delimiter = ',')]
    pub split_apps: Option<Vec<String>>,
    #[arg(long)]
    pub auto_connect: Option<bool>,
}

#[derive(Subcommand, Debug)]
pub enum CredentialsAction {
    /// Store a username and password (password read from stdin)
    Save {
        name: String,
        #[arg(long, short)]
        username: String,
    },
    /// Remove stored credentials
    Clear {
        name: String,
    },
}
