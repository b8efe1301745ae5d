use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};

use vpnkeeper::cli::args::Args;
use vpnkeeper::cli::commands;
use vpnkeeper::{constants, utils, Settings, VpnService};

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();

    let config_file = match args.config {
        Some(path) => Some(path),
        None => utils::get_app_config_dir()
            .ok()
            .map(|dir| dir.join(constants::CONFIG_FILE_NAME)),
    };
    let settings = match &config_file {
        Some(path) => Settings::load(path),
        None => Settings::load_default(),
    }
    .wrap_err("Failed to load settings")?;

    let service = VpnService::with_system(settings).wrap_err("Failed to start VPN service")?;
    commands::dispatch(&service, args.command, config_file.as_deref())
}
