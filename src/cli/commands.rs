//! CLI command handlers.
//!
//! Queued service operations are awaited through an mpsc channel; the
//! service runs their callbacks on its worker thread.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use color_eyre::eyre::{bail, eyre, Result};

use crate::cli::args::{Commands, ConnectArgs, CredentialsAction, SetArgs};
use crate::cli::report;
use crate::core::credentials::Credentials;
use crate::core::importer::{self, ImportTarget};
use crate::core::runner::SystemRunner;
use crate::service::VpnService;
use crate::state::{ProfileSettings, VpnStatus};

/// Runs one subcommand against `service`.
///
/// # Errors
///
/// Returns the failure message of the operation.
pub fn dispatch(service: &VpnService, command: Commands, config_file: Option<&Path>) -> Result<()> {
    match command {
        Commands::List => list(service),
        Commands::Import { path, name } => import(service, &path, name),
        Commands::Validate { path } => {
            let vpn_type = service.validate_config_file(&path)?;
            println!("{}: valid {vpn_type} config", path.display());
            Ok(())
        }
        Commands::Delete { name } => finish(await_reply(|done| service.delete_profile(&name, done))),
        Commands::Connect(args) => connect(service, args),
        Commands::Disconnect => finish(await_reply(|done| service.disconnect(done))),
        Commands::Status { ip } => status(service, ip),
        Commands::Set(args) => set(service, args),
        Commands::Credentials { action } => credentials(service, action),
        Commands::Doctor => doctor(service, config_file),
    }
}

type Reply = Box<dyn FnOnce(bool, String) + Send>;

/// Submits an operation and blocks until its callback fires.
fn await_reply(submit: impl FnOnce(Reply)) -> (bool, String) {
    let (tx, rx) = mpsc::channel();
    submit(Box::new(move |ok, message| {
        let _ = tx.send((ok, message));
    }));
    rx.recv()
        .unwrap_or_else(|_| (false, "VPN worker stopped before replying".to_string()))
}

fn finish((ok, message): (bool, String)) -> Result<()> {
    if ok {
        println!("{message}");
        Ok(())
    } else {
        Err(eyre!(message))
    }
}

fn list(service: &VpnService) -> Result<()> {
    let profiles = service.profiles();
    if profiles.is_empty() {
        println!("No profiles. Import one with `vpnkeeper import <file>`.");
        return Ok(());
    }
    let current = service.current_profile().map(|p| p.name);

    println!("  {:<20} {:<10} {:<7} {:<6} SPLIT", "NAME", "TYPE", "DNS", "AUTO");
    for profile in profiles.values() {
        let marker = if current.as_deref() == Some(profile.name.as_str()) {
            '*'
        } else {
            ' '
        };
        let split = if profile.split_tunnel_enabled {
            format!("{} ip(s)", profile.split_tunnel_ips.len())
        } else {
            "off".to_string()
        };
        println!(
            "{marker} {:<20} {:<10} {:<7} {:<6} {split}",
            profile.name,
            profile.vpn_type.to_string(),
            profile.dns_mode.as_str(),
            if profile.auto_connect { "yes" } else { "no" },
        );
    }
    Ok(())
}

fn import(service: &VpnService, input: &str, name: Option<String>) -> Result<()> {
    match importer::resolve_target(input).map_err(|e| eyre!(e))? {
        ImportTarget::File(path) => finish(await_reply(|done| service.import_profile(path, name, done))),
        ImportTarget::Directory(dir) => {
            if name.is_some() {
                bail!("--name only applies to single-file imports");
            }
            import_directory(service, &dir)
        }
    }
}

fn import_directory(service: &VpnService, dir: &Path) -> Result<()> {
    let files = importer::importable_files(dir)?;
    if files.is_empty() {
        bail!("No .ovpn, .conf or .wg files in {}", dir.display());
    }

    let mut imported = 0;
    for file in &files {
        let (ok, message) = await_reply(|done| service.import_profile(file.clone(), None, done));
        let label = file.file_name().map_or_else(|| file.display().to_string(), |n| n.to_string_lossy().into_owned());
        if ok {
            imported += 1;
            println!("  ✓ {label}: {message}");
        } else {
            log::warn!("Skipped {}: {message}", file.display());
            println!("  ✗ {label}: {message}");
        }
    }

    println!("\nImported {imported} of {} profile(s)", files.len());
    if imported == 0 {
        bail!("Nothing was imported");
    }
    Ok(())
}

fn read_password(prompt: bool) -> Result<String> {
    if prompt {
        eprint!("Password: ");
        io::stderr().flush()?;
    }
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("Empty password");
    }
    Ok(password)
}

fn connect(service: &VpnService, args: ConnectArgs) -> Result<()> {
    let name = match args.name {
        Some(name) => name,
        None => service
            .profiles()
            .into_values()
            .find(|p| p.auto_connect)
            .map(|p| p.name)
            .ok_or_else(|| eyre!("No profile given and none is marked auto-connect"))?,
    };

    let credentials = match args.username {
        Some(username) => {
            let password = read_password(!args.password_stdin)?;
            if args.save_credentials {
                service.save_credentials(&name, &username, &password)?;
            }
            Some(Credentials::new(username, password))
        }
        None => None,
    };

    let (events_tx, events_rx) = mpsc::channel();
    if args.watch {
        service.add_status_callback(move |status, message| {
            let _ = events_tx.send((status, message.map(ToString::to_string)));
        });
    }

    finish(await_reply(|done| service.connect(&name, credentials, done)))?;
    if !args.watch {
        return Ok(());
    }

    println!("Watching '{name}', press Ctrl-C to stop (the tunnel stays up)");
    for (status, message) in events_rx {
        match message {
            Some(message) => println!("[{status}] {message}"),
            None => println!("[{status}]"),
        }
        if matches!(status, VpnStatus::Error | VpnStatus::Disconnected) {
            bail!("Connection to '{name}' ended ({status})");
        }
    }
    Ok(())
}

fn status(service: &VpnService, with_ip: bool) -> Result<()> {
    let status = service.status();
    match service.current_profile() {
        Some(profile) => println!("Status:  {status} ({})", profile.name),
        None => println!("Status:  {status}"),
    }
    if !with_ip {
        return Ok(());
    }
    match service.connection_info() {
        Some(info) => {
            println!("Type:    {}", info.vpn_type);
            println!("DNS:     {}", info.dns_mode.as_str());
            println!("IP:      {}", info.public_ip.as_deref().unwrap_or("unknown"));
        }
        None => println!("IP:      not connected"),
    }
    Ok(())
}

fn set(service: &VpnService, args: SetArgs) -> Result<()> {
    let changes = ProfileSettings {
        dns_mode: args.dns_mode,
        custom_dns: args.custom_dns,
        split_tunnel_enabled: args.split_tunnel,
        split_tunnel_ips: args.split_ips,
        split_tunnel_apps: args.split_apps,
        auto_connect: args.auto_connect,
    };
    if changes.is_empty() {
        bail!("Nothing to change; pass at least one setting");
    }
    service.update_profile_settings(&args.name, changes)?;
    println!("Updated '{}' (applies on next connect)", args.name);
    Ok(())
}

fn credentials(service: &VpnService, action: CredentialsAction) -> Result<()> {
    match action {
        CredentialsAction::Save { name, username } => {
            let password = read_password(true)?;
            service.save_credentials(&name, &username, &password)?;
            println!("Saved credentials for '{name}'");
        }
        CredentialsAction::Clear { name } => {
            service.clear_credentials(&name)?;
            println!("Cleared credentials for '{name}'");
        }
    }
    Ok(())
}

fn doctor(service: &VpnService, config_file: Option<&Path>) -> Result<()> {
    let runner = SystemRunner::new(service.settings().use_sudo);
    let report = report::collect(
        &runner,
        service.paths().root().to_path_buf(),
        config_file.filter(|p| p.exists()).map(PathBuf::from),
        service.profiles().values().map(|p| p.vpn_type),
    );
    report::print(&report);

    let missing = report.missing_required();
    if !missing.is_empty() {
        bail!("Missing required tools: {}", missing.join(", "));
    }
    Ok(())
}
