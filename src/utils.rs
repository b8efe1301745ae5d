//! Filesystem layout and small system helpers.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::constants;

/// Returns the user's home directory.
pub fn home_dir() -> Option<PathBuf> {
    dirs::home_dir()
}

/// Returns `<config_dir>/vpnkeeper`, creating it if needed.
///
/// # Errors
///
/// Returns an error if the platform has no config directory or it cannot be
/// created.
pub fn get_app_config_dir() -> io::Result<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Cannot find config directory"))?
        .join(constants::APP_NAME);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Whether the current process already has root privileges.
#[allow(unsafe_code)]
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Whether a process with `pid` exists.
///
/// `kill(pid, 0)` answers for our own processes; root-owned daemons report
/// `EPERM`, so `/proc` is consulted as a fallback.
#[allow(unsafe_code)]
pub fn is_process_running(pid: u32) -> bool {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission check.
    let alive = unsafe { libc::kill(raw, 0) } == 0;
    alive || Path::new(&format!("/proc/{pid}")).exists()
}

/// Parses a PID file's contents.
pub fn parse_pid(content: &str) -> Option<u32> {
    content.trim().parse().ok().filter(|pid| *pid > 0)
}

/// Restricts a file to its owner (chmod 600).
///
/// # Errors
///
/// Returns an error if the metadata cannot be read or changed.
pub fn set_private_permissions(path: &Path) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    fs::set_permissions(path, perms)
}

/// Removes a file, treating "already gone" as success.
///
/// # Errors
///
/// Returns any other I/O error.
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Checks that a profile name is usable inside managed file names.
///
/// # Errors
///
/// Returns a message describing why the name is rejected.
pub fn validate_profile_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Profile name cannot be empty".to_string());
    }
    if name.starts_with('.') || name.contains(['/', '\\', '\0']) {
        return Err(format!("Invalid profile name: {name}"));
    }
    Ok(())
}

/// Longest interface name the kernel accepts (`IFNAMSIZ` minus the NUL).
const MAX_INTERFACE_NAME: usize = 15;

/// Checks a name against the rule `wg-quick` applies to interface names.
///
/// # Errors
///
/// Returns a message describing why the name is rejected.
pub fn validate_interface_name(name: &str) -> Result<(), String> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '+' | '.' | '-'));
    if name.is_empty() || name.len() > MAX_INTERFACE_NAME || !valid_chars {
        return Err(format!(
            "Invalid WireGuard interface name: {name} (use 1-{MAX_INTERFACE_NAME} characters from a-z, A-Z, 0-9, _=+.-)"
        ));
    }
    Ok(())
}

/// Returns `base`, or `base_1`, `base_2`, ... until `taken` reports a free name.
pub fn unique_profile_name(base: &str, mut taken: impl FnMut(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    let mut counter = 1_u32;
    loop {
        let candidate = format!("{base}_{counter}");
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Last `count` lines of `text`, oldest first.
pub fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

/// Layout of the managed VPN directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpnPaths {
    root: PathBuf,
}

impl VpnPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves the managed directory from settings or the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if no config directory can be found.
    pub fn from_settings(settings: &crate::config::Settings) -> io::Result<Self> {
        match &settings.vpn_dir {
            Some(dir) => Ok(Self::new(dir.clone())),
            None => Ok(Self::new(get_app_config_dir()?.join(constants::VPN_DIR_NAME))),
        }
    }

    /// Creates the managed directories.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.pid_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profiles_file(&self) -> PathBuf {
        self.root.join(constants::PROFILES_FILE_NAME)
    }

    pub fn dns_snapshot_file(&self) -> PathBuf {
        self.root.join(constants::DNS_SNAPSHOT_FILE_NAME)
    }

    pub fn pid_dir(&self) -> PathBuf {
        self.root.join(constants::PID_DIR_NAME)
    }

    pub fn config_file(&self, name: &str, extension: &str) -> PathBuf {
        self.root.join(format!("{name}.{extension}"))
    }

    pub fn pid_file(&self, name: &str) -> PathBuf {
        self.pid_dir().join(format!("{name}.pid"))
    }

    pub fn auth_file(&self, name: &str) -> PathBuf {
        self.root.join(format!(".auth_{name}"))
    }

    pub fn mgmt_socket(&self, name: &str) -> PathBuf {
        self.root.join(format!(".mgmt_{name}.sock"))
    }

    pub fn log_file(&self, name: &str) -> PathBuf {
        self.root.join(format!("openvpn_{name}.log"))
    }

    /// Deletes the `OpenVPN` runtime files of a profile (PID, socket, log).
    pub fn cleanup_openvpn_run_files(&self, name: &str) {
        for path in [self.pid_file(name), self.mgmt_socket(name), self.log_file(name)] {
            if let Err(e) = remove_if_exists(&path) {
                log::debug!("Could not remove {}: {e}", path.display());
            }
        }
    }
}
