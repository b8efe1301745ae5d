//! The VPN service: profile registry, connection lifecycle and observers.
//!
//! Long-running operations (`connect`, `disconnect`, `import_profile`,
//! `delete_profile`) are queued on a bounded channel and executed in order
//! by a single worker thread. Their callbacks run on that worker thread.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::config::Settings;
use crate::constants;
use crate::core::cleanup::{CleanupOutcome, CleanupReport};
use crate::core::credentials::{self, CredentialSource, Credentials, KeyringStore, SecretStore};
use crate::core::dns::{self, DnsSnapshot};
use crate::core::monitor::{MonitorHandle, MonitorHost, MonitorPolicy};
use crate::core::notify;
use crate::core::runner::{CommandRunner, CommandSpec, SystemRunner};
use crate::core::split_tunnel;
use crate::core::store::ProfileStore;
use crate::core::telemetry;
use crate::error::{Result, VpnError};
use crate::state::{ConnectionInfo, ProfileSettings, VpnProfile, VpnStatus, VpnType};
use crate::utils::{self, VpnPaths};
use crate::vpn::{self, TunnelContext};

/// Handle returned by [`VpnService::add_status_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Arc<dyn Fn(VpnStatus, Option<&str>) + Send + Sync>;
type Callback = Box<dyn FnOnce(bool, String) + Send>;
type Operation = Box<dyn FnOnce(&Arc<Inner>) -> Result<String> + Send>;

struct Job {
    operation: Operation,
    done: Callback,
}

#[derive(Debug, Default)]
struct ConnectionState {
    status: VpnStatus,
    /// Profile as it was when the tunnel came up.
    current: Option<VpnProfile>,
    dns: DnsSnapshot,
    monitor: Option<MonitorHandle>,
    last_cleanup: Option<CleanupReport>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    settings: Settings,
    paths: VpnPaths,
    store: ProfileStore,
    runner: Arc<dyn CommandRunner>,
    secrets: Arc<dyn SecretStore>,
    /// Guards the registry and its persistence together.
    profiles: Mutex<BTreeMap<String, VpnProfile>>,
    state: Mutex<ConnectionState>,
    observers: Mutex<Vec<(ObserverId, Observer)>>,
    next_observer: AtomicU64,
}

/// Manages VPN profiles and the single active connection.
pub struct VpnService {
    inner: Arc<Inner>,
    queue: Option<SyncSender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl VpnService {
    /// Creates a service that talks to the host through `sudo` and the
    /// session keyring.
    ///
    /// # Errors
    ///
    /// See [`VpnService::new`].
    pub fn with_system(settings: Settings) -> Result<Self> {
        let runner = Arc::new(SystemRunner::new(settings.use_sudo));
        let secrets = Arc::new(KeyringStore::new(settings.keyring_service.clone()));
        Self::new(settings, runner, secrets)
    }

    /// Creates the service: prepares the managed directory, loads profiles,
    /// adopts a tunnel that is already up, and starts the worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the managed directory cannot be created or the
    /// worker thread cannot be spawned.
    pub fn new(settings: Settings, runner: Arc<dyn CommandRunner>, secrets: Arc<dyn SecretStore>) -> Result<Self> {
        let paths = VpnPaths::from_settings(&settings)?;
        paths.ensure()?;
        let store = ProfileStore::new(paths.profiles_file());

        let profiles = match store.load() {
            Ok(list) => list.into_iter().map(|p| (p.name.clone(), p)).collect(),
            Err(e) => {
                log::error!("Failed to load VPN profiles: {e}");
                BTreeMap::new()
            }
        };
        log::info!("Loaded {} VPN profile(s) from {}", profiles.len(), paths.root().display());

        let capacity = settings.task_queue_capacity.max(1);
        let inner = Arc::new(Inner {
            settings,
            paths,
            store,
            runner,
            secrets,
            profiles: Mutex::new(profiles),
            state: Mutex::new(ConnectionState::default()),
            observers: Mutex::new(Vec::new()),
            next_observer: AtomicU64::new(0),
        });
        inner.detect_existing_connection();

        let (queue, jobs) = mpsc::sync_channel(capacity);
        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name("vpn-worker".to_string())
            .spawn(move || run_worker(&worker_inner, &jobs))?;

        Ok(Self {
            inner,
            queue: Some(queue),
            worker: Some(worker),
        })
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    #[must_use]
    pub fn paths(&self) -> &VpnPaths {
        &self.inner.paths
    }

    #[must_use]
    pub fn status(&self) -> VpnStatus {
        lock(&self.inner.state).status
    }

    #[must_use]
    pub fn current_profile(&self) -> Option<VpnProfile> {
        lock(&self.inner.state).current.clone()
    }

    /// Snapshot of all profiles, ordered by name.
    #[must_use]
    pub fn profiles(&self) -> BTreeMap<String, VpnProfile> {
        lock(&self.inner.profiles).clone()
    }

    #[must_use]
    pub fn profile(&self, name: &str) -> Option<VpnProfile> {
        lock(&self.inner.profiles).get(name).cloned()
    }

    /// Report of the most recent disconnect cleanup.
    #[must_use]
    pub fn last_cleanup_report(&self) -> Option<CleanupReport> {
        lock(&self.inner.state).last_cleanup.clone()
    }

    /// Registers `observer` for every status transition.
    pub fn add_status_callback(
        &self,
        observer: impl Fn(VpnStatus, Option<&str>) + Send + Sync + 'static,
    ) -> ObserverId {
        let id = ObserverId(self.inner.next_observer.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.observers).push((id, Arc::new(observer)));
        id
    }

    /// Unregisters an observer; returns whether it was registered.
    pub fn remove_status_callback(&self, id: ObserverId) -> bool {
        let mut observers = lock(&self.inner.observers);
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Checks a config file and detects its VPN type.
    ///
    /// # Errors
    ///
    /// Returns [`VpnError::Validation`] describing the problem.
    pub fn validate_config_file(&self, path: &Path) -> Result<VpnType> {
        vpn::validate_config_file(path)
    }

    /// Queues an import of `path`, optionally under `name`.
    pub fn import_profile(
        &self,
        path: impl Into<PathBuf>,
        name: Option<String>,
        callback: impl FnOnce(bool, String) + Send + 'static,
    ) {
        let path = path.into();
        self.submit(
            Box::new(move |inner: &Arc<Inner>| inner.import_now(&path, name.as_deref())),
            Box::new(callback),
        );
    }

    /// Queues deletion of a profile, disconnecting it first if active.
    pub fn delete_profile(&self, name: &str, callback: impl FnOnce(bool, String) + Send + 'static) {
        let name = name.to_string();
        self.submit(Box::new(move |inner: &Arc<Inner>| inner.delete_now(&name)), Box::new(callback));
    }

    /// Queues a connection to `name`, replacing any active connection.
    pub fn connect(
        &self,
        name: &str,
        credentials: Option<Credentials>,
        callback: impl FnOnce(bool, String) + Send + 'static,
    ) {
        let name = name.to_string();
        self.submit(
            Box::new(move |inner: &Arc<Inner>| inner.connect_now(&name, credentials)),
            Box::new(callback),
        );
    }

    /// Queues a disconnect. It always ends in [`VpnStatus::Disconnected`];
    /// the message names cleanup steps that failed.
    pub fn disconnect(&self, callback: impl FnOnce(bool, String) + Send + 'static) {
        self.submit(Box::new(|inner: &Arc<Inner>| Ok(inner.disconnect_now())), Box::new(callback));
    }

    /// Changes the given settings of a profile and persists them.
    ///
    /// Takes effect on the next connect.
    ///
    /// # Errors
    ///
    /// Returns [`VpnError::ProfileNotFound`] or a persistence error.
    pub fn update_profile_settings(&self, name: &str, changes: ProfileSettings) -> Result<()> {
        self.inner.mutate_profile(name, |profile| changes.apply_to(profile))
    }

    /// Stores credentials in the secret store and marks the profile.
    ///
    /// # Errors
    ///
    /// Returns [`VpnError::SecretStore`] if the store rejects the write.
    pub fn save_credentials(&self, name: &str, username: &str, password: &str) -> Result<()> {
        self.inner
            .secrets
            .set(name, &Credentials::new(username, password))?;
        self.inner.mark_remembered(name, true)
    }

    /// # Errors
    ///
    /// Returns [`VpnError::SecretStore`] if the store cannot be queried.
    pub fn get_credentials(&self, name: &str) -> Result<Option<Credentials>> {
        self.inner.secrets.get(name)
    }

    /// Removes stored credentials; a missing entry is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`VpnError::SecretStore`] if the store rejects the delete.
    pub fn clear_credentials(&self, name: &str) -> Result<()> {
        self.inner.secrets.delete(name)?;
        self.inner.mark_remembered(name, false)
    }

    /// Details of the active connection, including the public IP.
    ///
    /// Blocks on the IP lookup; `None` unless connected.
    #[must_use]
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        let (status, profile) = {
            let state = lock(&self.inner.state);
            (state.status, state.current.clone())
        };
        let profile = profile.filter(|_| status == VpnStatus::Connected)?;
        Some(ConnectionInfo {
            profile_name: profile.name,
            vpn_type: profile.vpn_type,
            status,
            dns_mode: profile.dns_mode,
            public_ip: telemetry::fetch_public_ip(self.inner.runner.as_ref()),
        })
    }

    fn submit(&self, operation: Operation, done: Callback) {
        let job = Job { operation, done };
        let Some(queue) = &self.queue else {
            (job.done)(false, "VPN service is shutting down".to_string());
            return;
        };
        match queue.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                log::warn!("VPN task queue is full, rejecting operation");
                (job.done)(false, VpnError::Busy.to_string());
            }
            Err(TrySendError::Disconnected(job)) => {
                (job.done)(false, "VPN service is shutting down".to_string());
            }
        }
    }
}

impl Drop for VpnService {
    fn drop(&mut self) {
        // Closing the queue lets the worker finish what is already queued.
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("VPN worker thread panicked");
            }
        }
        self.inner.stop_monitor();
    }
}

fn run_worker(inner: &Arc<Inner>, jobs: &Receiver<Job>) {
    for job in jobs {
        let (ok, message) = match (job.operation)(inner) {
            Ok(message) => (true, message),
            Err(e) => (false, e.to_string()),
        };
        (job.done)(ok, message);
    }
    log::debug!("VPN worker stopped");
}

impl Inner {
    fn ctx(&self) -> TunnelContext<'_> {
        TunnelContext {
            runner: self.runner.as_ref(),
            paths: &self.paths,
            settings: &self.settings,
        }
    }

    fn set_status(&self, status: VpnStatus, message: Option<&str>) {
        lock(&self.state).status = status;
        if let Some(message) = message {
            log::info!("VPN status: {status} ({message})");
        } else {
            log::info!("VPN status: {status}");
        }
        let observers: Vec<Observer> = lock(&self.observers).iter().map(|(_, o)| Arc::clone(o)).collect();
        for observer in observers {
            observer(status, message);
        }
    }

    fn stop_monitor(&self) {
        let monitor = lock(&self.state).monitor.take();
        if let Some(monitor) = monitor {
            monitor.stop();
        }
    }

    fn start_monitor(self: &Arc<Self>, profile: VpnProfile) {
        self.stop_monitor();
        let host: Arc<dyn MonitorHost> = Arc::clone(self) as Arc<dyn MonitorHost>;
        match MonitorHandle::spawn(host, profile, MonitorPolicy::from(&self.settings)) {
            Ok(handle) => lock(&self.state).monitor = Some(handle),
            Err(e) => log::error!("Failed to start connection monitor: {e}"),
        }
    }

    fn persist(&self, profiles: &BTreeMap<String, VpnProfile>) -> Result<()> {
        self.store.save(profiles.values()).map_err(|e| {
            log::error!("Failed to save VPN profiles: {e}");
            e
        })
    }

    fn mutate_profile(&self, name: &str, change: impl FnOnce(&mut VpnProfile)) -> Result<()> {
        let mut profiles = lock(&self.profiles);
        let profile = profiles
            .get_mut(name)
            .ok_or_else(|| VpnError::ProfileNotFound(name.to_string()))?;
        change(profile);
        self.persist(&profiles)
    }

    /// Updates `remember_credentials`; unknown profiles are ignored.
    fn mark_remembered(&self, name: &str, remembered: bool) -> Result<()> {
        match self.mutate_profile(name, |p| p.remember_credentials = remembered) {
            Err(VpnError::ProfileNotFound(_)) => Ok(()),
            other => other,
        }
    }

    /// Credentials for `profile`, explicit ones first.
    ///
    /// Auth-file credentials are not returned: the daemon reads that file
    /// directly, so there is nothing to rewrite.
    fn credentials_for(&self, profile: &VpnProfile, explicit: Option<Credentials>) -> Option<Credentials> {
        let auth_file = (profile.vpn_type == VpnType::OpenVpn).then(|| self.paths.auth_file(&profile.name));
        let (creds, source) =
            credentials::resolve_credentials(explicit, self.secrets.as_ref(), &profile.name, auth_file.as_deref())?;
        log::debug!("Using {source:?} credentials for '{}'", profile.name);
        (source != CredentialSource::AuthFile).then_some(creds)
    }

    fn import_now(&self, path: &Path, name: Option<&str>) -> Result<String> {
        let vpn_type = vpn::validate_config_file(path)?;
        let base = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(ToString::to_string)
                .ok_or_else(|| VpnError::Validation(format!("Cannot derive a profile name from {}", path.display())))?,
        };
        utils::validate_profile_name(&base).map_err(VpnError::Validation)?;

        let extension = vpn_type.managed_extension();
        let mut profiles = lock(&self.profiles);
        let name = utils::unique_profile_name(&base, |candidate| {
            profiles.contains_key(candidate) || self.paths.config_file(candidate, extension).exists()
        });
        if vpn_type == VpnType::WireGuard {
            // wg-quick names the interface after the copied file's stem
            utils::validate_interface_name(&name).map_err(VpnError::Validation)?;
        }
        let dest = self.paths.config_file(&name, extension);

        fs::copy(path, &dest)?;
        utils::set_private_permissions(&dest)?;

        profiles.insert(name.clone(), VpnProfile::new(name.as_str(), dest.as_path(), vpn_type));
        if let Err(e) = self.persist(&profiles) {
            profiles.remove(&name);
            let _ = utils::remove_if_exists(&dest);
            return Err(e);
        }

        log::info!("Imported {vpn_type} profile '{name}' from {}", path.display());
        Ok(format!("Profile '{name}' imported successfully"))
    }

    fn delete_now(&self, name: &str) -> Result<String> {
        let profile = lock(&self.profiles)
            .get(name)
            .cloned()
            .ok_or_else(|| VpnError::ProfileNotFound(name.to_string()))?;

        let is_current = lock(&self.state)
            .current
            .as_ref()
            .is_some_and(|current| current.name == name);
        if is_current {
            self.disconnect_now();
        }

        utils::remove_if_exists(&profile.config_path)?;
        self.paths.cleanup_openvpn_run_files(name);
        if let Err(e) = utils::remove_if_exists(&self.paths.auth_file(name)) {
            log::warn!("Could not remove auth file for '{name}': {e}");
        }
        if let Err(e) = self.secrets.delete(name) {
            log::error!("Failed to clear credentials for '{name}': {e}");
        }

        let mut profiles = lock(&self.profiles);
        profiles.remove(name);
        self.persist(&profiles)?;

        log::info!("Deleted profile '{name}'");
        Ok(format!("Profile '{name}' deleted"))
    }

    fn connect_now(self: &Arc<Self>, name: &str, explicit: Option<Credentials>) -> Result<String> {
        let profile = lock(&self.profiles)
            .get(name)
            .cloned()
            .ok_or_else(|| VpnError::ProfileNotFound(name.to_string()))?;

        if lock(&self.state).current.is_some() {
            self.disconnect_now();
        }

        self.set_status(VpnStatus::Connecting, Some(&format!("Connecting to {name}...")));
        let creds = self.credentials_for(&profile, explicit);

        let snapshot = DnsSnapshot::capture(self.runner.as_ref(), &self.settings.resolv_conf);
        if let Err(e) = snapshot.save(&self.paths.dns_snapshot_file()) {
            log::warn!("Failed to persist DNS snapshot: {e}");
        }
        lock(&self.state).dns = snapshot.clone();

        if let Err(e) = vpn::connect(&self.ctx(), &profile, creds.as_ref()) {
            self.forget_dns_snapshot();
            let message = e.to_string();
            log::error!("Connection to '{name}' failed: {message}");
            self.set_status(VpnStatus::Error, Some(&message));
            if self.settings.notify_on_failure {
                notify::connection_failed(self.runner.as_ref(), name, &message);
            }
            return Err(e);
        }

        lock(&self.state).current = Some(profile.clone());
        if let Err(e) = dns::apply(self.runner.as_ref(), &self.settings.resolv_conf, &profile, &snapshot) {
            log::error!("Failed to apply DNS settings: {e}");
        }
        if profile.split_tunnel_enabled {
            split_tunnel::apply(self.runner.as_ref(), &profile, &profile.interface());
        }

        self.set_status(VpnStatus::Connected, Some(&format!("Connected to {name}")));
        self.start_monitor(profile);
        Ok(constants::MSG_CONNECTED.to_string())
    }

    fn disconnect_now(&self) -> String {
        self.stop_monitor();

        let current = lock(&self.state).current.clone();
        let Some(profile) = current else {
            self.set_status(VpnStatus::Disconnected, Some(constants::MSG_NOT_CONNECTED));
            return constants::MSG_NOT_CONNECTED.to_string();
        };

        self.set_status(VpnStatus::Disconnecting, Some(constants::MSG_DISCONNECTING));
        log::info!("Disconnecting '{}', running cleanup", profile.name);
        let report = self.cleanup(&profile);
        let summary = report.summary();

        {
            let mut state = lock(&self.state);
            state.current = None;
            state.last_cleanup = Some(report);
        }
        self.set_status(VpnStatus::Disconnected, Some(&summary));
        summary
    }

    /// Runs every teardown step in order; failures never stop later steps.
    fn cleanup(&self, profile: &VpnProfile) -> CleanupReport {
        let runner = self.runner.as_ref();
        let iface = profile.interface();
        let mut report = CleanupReport::new();

        report.record("stop tunnel", vpn::stop(&self.ctx(), profile));
        report.record("remove split tunnel", split_tunnel::remove(runner, profile));
        report.run(
            runner,
            "flush routes",
            &CommandSpec::new("ip", ["route", "flush", "dev", iface.as_str()]).privileged(),
        );

        let link = runner.run(&CommandSpec::new("ip", ["link", "show", iface.as_str()]).timeout(constants::CHECK_TIMEOUT));
        if link.is_ok_and(|out| out.success()) {
            report.run(
                runner,
                "delete interface",
                &CommandSpec::new("ip", ["link", "delete", iface.as_str()]).privileged(),
            );
        } else {
            report.record("delete interface", CleanupOutcome::Skipped(format!("{iface} already gone")));
        }

        report.record("flush dns cache", dns::flush_cache(runner));
        report.run(runner, "clear conntrack", &CommandSpec::new("conntrack", ["-D"]).privileged());
        report.run(
            runner,
            "flush arp cache",
            &CommandSpec::new("ip", ["neigh", "flush", "all"]).privileged(),
        );

        let snapshot = lock(&self.state).dns.clone();
        let restored = dns::restore(runner, &self.settings.resolv_conf, &snapshot);
        if !restored.is_failed() {
            self.forget_dns_snapshot();
        }
        report.record("restore dns", restored);
        report.record("restart resolver", dns::restart_resolver(runner));
        report.record("verify dns", dns::verify(runner, &self.settings.dns_test_domains));

        report
    }

    fn forget_dns_snapshot(&self) {
        lock(&self.state).dns = DnsSnapshot::default();
        if let Err(e) = utils::remove_if_exists(&self.paths.dns_snapshot_file()) {
            log::warn!("Could not remove DNS snapshot: {e}");
        }
    }

    /// Adopts a tunnel left running by a previous session.
    fn detect_existing_connection(self: &Arc<Self>) {
        let adopted = self.adopt_openvpn().or_else(|| self.adopt_wireguard());
        if let Some(profile) = adopted {
            log::info!("Found active connection for '{}'", profile.name);
            let snapshot = DnsSnapshot::load(&self.paths.dns_snapshot_file()).unwrap_or_else(|| {
                log::warn!("No saved DNS state for '{}', it cannot be restored", profile.name);
                DnsSnapshot::default()
            });
            {
                let mut state = lock(&self.state);
                state.current = Some(profile.clone());
                state.status = VpnStatus::Connected;
                state.dns = snapshot;
            }
            self.start_monitor(profile);
        }
    }

    fn adopt_openvpn(&self) -> Option<VpnProfile> {
        let entries = match fs::read_dir(self.paths.pid_dir()) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("Cannot scan PID directory: {e}");
                return None;
            }
        };
        let mut pid_files: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "pid"))
            .collect();
        pid_files.sort();

        for pid_file in pid_files {
            let alive = fs::read_to_string(&pid_file)
                .ok()
                .as_deref()
                .and_then(utils::parse_pid)
                .is_some_and(utils::is_process_running);
            if !alive {
                log::debug!("Removing stale PID file {}", pid_file.display());
                let _ = utils::remove_if_exists(&pid_file);
                continue;
            }
            let Some(name) = pid_file.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(profile) = lock(&self.profiles).get(name) {
                return Some(profile.clone());
            }
        }
        None
    }

    fn adopt_wireguard(&self) -> Option<VpnProfile> {
        let interfaces = vpn::wireguard::live_interfaces(self.runner.as_ref());
        if interfaces.is_empty() {
            return None;
        }
        lock(&self.profiles)
            .values()
            .find(|p| p.vpn_type == VpnType::WireGuard && interfaces.contains(&p.interface()))
            .cloned()
    }
}

impl MonitorHost for Inner {
    fn is_alive(&self, profile: &VpnProfile) -> bool {
        vpn::is_alive(&self.ctx(), profile)
    }

    fn reconnect(&self, profile: &VpnProfile) -> Result<()> {
        let creds = self.credentials_for(profile, None);
        vpn::connect(&self.ctx(), profile, creds.as_ref())
    }

    fn publish(&self, status: VpnStatus, message: Option<&str>) {
        self.set_status(status, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::credentials::MemoryStore;
    use crate::core::runner::testing::ScriptedRunner;
    use crate::core::runner::CommandOutput;
    use crate::state::DnsMode;
    use std::sync::mpsc::Sender;
    use std::time::Duration;

    const OVPN: &str = "client\ndev tun\nproto udp\nremote vpn.example.com 1194\n<ca>\n-----BEGIN CERTIFICATE-----\n</ca>\n";
    const WG: &str = "[Interface]\nPrivateKey = abc=\nAddress = 10.0.0.2/32\n\n[Peer]\nPublicKey = def=\nEndpoint = 1.2.3.4:51820\n";

    struct Harness {
        dir: tempfile::TempDir,
        runner: Arc<ScriptedRunner>,
        secrets: Arc<MemoryStore>,
        service: VpnService,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_runner(ScriptedRunner::succeeding(), |_| {})
        }

        fn with_runner(runner: ScriptedRunner, tweak: impl FnOnce(&mut Settings)) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut settings = Settings::for_tests(dir.path());
            // Keep the monitor quiet; its behaviour is covered in its own module.
            settings.monitor_grace_ms = 60_000;
            tweak(&mut settings);
            fs::write(&settings.resolv_conf, "nameserver 192.168.1.1\n").unwrap();

            let runner = Arc::new(runner);
            let secrets = Arc::new(MemoryStore::new());
            let service = VpnService::new(settings, runner.clone(), secrets.clone()).unwrap();
            Self {
                dir,
                runner,
                secrets,
                service,
            }
        }

        fn source(&self, file: &str, content: &str) -> PathBuf {
            let src = self.dir.path().join("src");
            fs::create_dir_all(&src).unwrap();
            let path = src.join(file);
            fs::write(&path, content).unwrap();
            path
        }

        fn import(&self, file: &str, name: Option<&str>) -> (bool, String) {
            self.import_from(self.source(file, WG), name)
        }

        fn import_from(&self, path: PathBuf, name: Option<&str>) -> (bool, String) {
            let (tx, rx) = mpsc::channel();
            self.service
                .import_profile(path, name.map(ToString::to_string), reply(tx));
            rx.recv_timeout(Duration::from_secs(5)).unwrap()
        }

        fn connect(&self, name: &str) -> (bool, String) {
            self.connect_as(name, None)
        }

        fn connect_as(&self, name: &str, creds: Option<Credentials>) -> (bool, String) {
            let (tx, rx) = mpsc::channel();
            self.service.connect(name, creds, reply(tx));
            rx.recv_timeout(Duration::from_secs(5)).unwrap()
        }

        fn disconnect(&self) -> (bool, String) {
            let (tx, rx) = mpsc::channel();
            self.service.disconnect(reply(tx));
            rx.recv_timeout(Duration::from_secs(5)).unwrap()
        }

        fn delete(&self, name: &str) -> (bool, String) {
            let (tx, rx) = mpsc::channel();
            self.service.delete_profile(name, reply(tx));
            rx.recv_timeout(Duration::from_secs(5)).unwrap()
        }
    }

    fn reply(tx: Sender<(bool, String)>) -> impl FnOnce(bool, String) + Send + 'static {
        move |ok, message| {
            let _ = tx.send((ok, message));
        }
    }

    #[test]
    fn test_import_generates_unique_names() {
        let h = Harness::new();
        assert_eq!(h.import("home.conf", None), (true, "Profile 'home' imported successfully".to_string()));
        assert_eq!(h.import("home.conf", None).1, "Profile 'home_1' imported successfully");
        assert_eq!(h.import("home.wg", None).1, "Profile 'home_2' imported successfully");

        let profiles = h.service.profiles();
        let names: Vec<&str> = profiles.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["home", "home_1", "home_2"]);

        let copied = &profiles["home_2"].config_path;
        assert_eq!(copied.extension().unwrap(), "conf");
        assert!(copied.starts_with(h.service.paths().root()));
    }

    #[test]
    fn test_import_rejects_invalid_config() {
        let h = Harness::new();
        let path = h.source("broken.conf", "[Interface]\nPrivateKey = x\n");
        let (tx, rx) = mpsc::channel();
        h.service.import_profile(path, None, reply(tx));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            (false, "Missing [Peer] section".to_string())
        );
        assert!(h.service.profiles().is_empty());
    }

    #[test]
    fn test_imported_profiles_survive_restart() {
        let h = Harness::new();
        h.import("home.conf", Some("house"));
        let settings = h.service.settings().clone();
        drop(h.service);

        let reloaded = VpnService::new(settings, h.runner.clone(), h.secrets.clone()).unwrap();
        assert!(reloaded.profile("house").is_some());
    }

    #[test]
    fn test_connect_and_disconnect() {
        let h = Harness::new();
        h.import("home.conf", None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        h.service
            .add_status_callback(move |status, _| sink.lock().unwrap().push(status));

        assert_eq!(h.connect("home"), (true, constants::MSG_CONNECTED.to_string()));
        assert_eq!(h.service.status(), VpnStatus::Connected);
        assert_eq!(h.service.current_profile().unwrap().name, "home");
        assert_eq!(h.runner.count("wg-quick", &["up"]), 1);
        assert_eq!(h.runner.count("nmcli", &["-t"]), 1);

        let (ok, message) = h.disconnect();
        assert!(ok);
        assert_eq!(message, "Disconnected");
        assert_eq!(h.service.status(), VpnStatus::Disconnected);
        assert!(h.service.current_profile().is_none());
        assert_eq!(h.runner.count("wg-quick", &["down"]), 1);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                VpnStatus::Connecting,
                VpnStatus::Connected,
                VpnStatus::Disconnecting,
                VpnStatus::Disconnected
            ]
        );
    }

    #[test]
    fn test_connect_unknown_profile() {
        let h = Harness::new();
        let (ok, message) = h.connect("ghost");
        assert!(!ok);
        assert!(message.starts_with(constants::MSG_NOT_FOUND));
        assert_eq!(h.service.status(), VpnStatus::Disconnected);
    }

    #[test]
    fn test_connect_failure_sets_error() {
        let runner = ScriptedRunner::new(|spec| {
            if spec.is("wg-quick", &["up"]) {
                Ok(CommandOutput::failed(1, "Unable to access interface"))
            } else {
                Ok(CommandOutput::ok(""))
            }
        });
        let h = Harness::with_runner(runner, |_| {});
        h.import("home.conf", None);

        let (ok, message) = h.connect("home");
        assert!(!ok);
        assert!(message.contains("Unable to access interface"));
        assert_eq!(h.service.status(), VpnStatus::Error);
        assert!(h.service.current_profile().is_none());
    }

    #[test]
    fn test_switching_profiles_disconnects_first() {
        let h = Harness::new();
        h.import("home.conf", None);
        h.import("work.conf", None);
        h.connect("home");
        h.connect("work");

        let lines = h.runner.lines();
        let down = lines.iter().position(|l| l.starts_with("wg-quick down") && l.ends_with("home.conf")).unwrap();
        let up = lines.iter().position(|l| l.starts_with("wg-quick up") && l.ends_with("work.conf")).unwrap();
        assert!(down < up);
        assert_eq!(h.service.current_profile().unwrap().name, "work");
    }

    #[test]
    fn test_cleanup_continues_after_failures() {
        let runner = ScriptedRunner::new(|spec| {
            if spec.is("resolvectl", &[]) || spec.is("conntrack", &[]) {
                Ok(CommandOutput::failed(1, "not available"))
            } else {
                Ok(CommandOutput::ok(""))
            }
        });
        let h = Harness::with_runner(runner, |_| {});
        h.import("home.conf", None);
        h.connect("home");

        let (ok, message) = h.disconnect();
        assert!(ok);
        assert_eq!(h.service.status(), VpnStatus::Disconnected);
        assert!(message.contains("flush dns cache"));
        assert!(message.contains("clear conntrack"));

        let report = h.service.last_cleanup_report().unwrap();
        let steps: Vec<&str> = report.steps().iter().map(|(name, _)| *name).collect();
        assert_eq!(
            steps,
            vec![
                "stop tunnel",
                "remove split tunnel",
                "flush routes",
                "delete interface",
                "flush dns cache",
                "clear conntrack",
                "flush arp cache",
                "restore dns",
                "restart resolver",
                "verify dns"
            ]
        );
        assert_eq!(report.outcome("restore dns"), Some(&CleanupOutcome::Done));
        assert!(h.runner.count("systemctl", &["restart"]) >= 1);
    }

    #[test]
    fn test_disconnect_when_idle() {
        let h = Harness::new();
        assert_eq!(h.disconnect(), (true, constants::MSG_NOT_CONNECTED.to_string()));
        assert_eq!(h.service.status(), VpnStatus::Disconnected);
    }

    #[test]
    fn test_delete_active_profile_disconnects_first() {
        let h = Harness::new();
        h.import("home.conf", None);
        h.service.save_credentials("home", "u", "p").unwrap();
        h.connect("home");
        let config = h.service.profile("home").unwrap().config_path;

        assert_eq!(h.delete("home"), (true, "Profile 'home' deleted".to_string()));
        assert_eq!(h.runner.count("wg-quick", &["down"]), 1);
        assert_eq!(h.service.status(), VpnStatus::Disconnected);
        assert!(h.service.profiles().is_empty());
        assert!(!config.exists());
        assert!(h.service.get_credentials("home").unwrap().is_none());
    }

    #[test]
    fn test_delete_unknown_profile() {
        let h = Harness::new();
        let (ok, message) = h.delete("ghost");
        assert!(!ok);
        assert_eq!(message, "Profile not found: ghost");
    }

    #[test]
    fn test_update_settings_only_changes_given_fields() {
        let h = Harness::new();
        h.import("home.conf", None);
        h.service
            .update_profile_settings(
                "home",
                ProfileSettings {
                    auto_connect: Some(true),
                    ..ProfileSettings::default()
                },
            )
            .unwrap();
        h.service
            .update_profile_settings(
                "home",
                ProfileSettings {
                    dns_mode: Some(DnsMode::UseCustomDns),
                    custom_dns: Some(vec!["9.9.9.9".to_string()]),
                    ..ProfileSettings::default()
                },
            )
            .unwrap();

        let profile = h.service.profile("home").unwrap();
        assert!(profile.auto_connect);
        assert_eq!(profile.dns_mode, DnsMode::UseCustomDns);
        assert_eq!(profile.custom_dns, vec!["9.9.9.9"]);

        let settings = h.service.settings().clone();
        let reloaded = VpnService::new(settings, h.runner.clone(), h.secrets.clone()).unwrap();
        let stored = reloaded.profile("home").unwrap();
        assert!(stored.auto_connect);
        assert_eq!(stored.dns_mode, DnsMode::UseCustomDns);
        assert_eq!(stored.custom_dns, vec!["9.9.9.9"]);

        let err = h
            .service
            .update_profile_settings("ghost", ProfileSettings::default())
            .unwrap_err();
        assert!(matches!(err, VpnError::ProfileNotFound(_)));
    }

    #[test]
    fn test_credentials_flag_follows_store() {
        let h = Harness::new();
        h.import("home.conf", None);

        h.service.save_credentials("home", "alice", "pw").unwrap();
        assert!(h.service.profile("home").unwrap().remember_credentials);
        assert_eq!(
            h.service.get_credentials("home").unwrap(),
            Some(Credentials::new("alice", "pw"))
        );

        h.service.clear_credentials("home").unwrap();
        assert!(!h.service.profile("home").unwrap().remember_credentials);
        assert!(h.service.clear_credentials("home").is_ok());
    }

    #[test]
    fn test_custom_dns_and_split_tunnel_applied_on_connect() {
        let runner = ScriptedRunner::new(|spec| {
            if spec.is("ip", &["route", "show", "default"]) {
                Ok(CommandOutput::ok("default via 10.1.1.1 dev eth0\n"))
            } else {
                Ok(CommandOutput::ok(""))
            }
        });
        let h = Harness::with_runner(runner, |_| {});
        h.import("home.conf", None);
        h.service
            .update_profile_settings(
                "home",
                ProfileSettings {
                    dns_mode: Some(DnsMode::UseCustomDns),
                    custom_dns: Some(vec!["1.1.1.1".to_string()]),
                    split_tunnel_enabled: Some(true),
                    split_tunnel_ips: Some(vec!["192.0.2.10".to_string()]),
                    ..ProfileSettings::default()
                },
            )
            .unwrap();
        h.connect("home");

        let calls = h.runner.calls();
        assert!(calls
            .iter()
            .any(|c| c.program == "tee" && c.stdin.as_deref() == Some("nameserver 1.1.1.1\n")));
        assert!(h
            .runner
            .lines()
            .contains(&"ip route add 192.0.2.10 via 10.1.1.1 dev eth0".to_string()));

        h.disconnect();
        assert_eq!(h.runner.count("ip", &["route", "del", "192.0.2.10"]), 1);
        // The pre-connect resolver file is written back.
        assert!(h
            .runner
            .calls()
            .iter()
            .any(|c| c.program == "tee" && c.stdin.as_deref() == Some("nameserver 192.168.1.1\n")));
    }

    #[test]
    fn test_full_queue_reports_busy() {
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let started_tx = Mutex::new(started_tx);
        let release_rx = Mutex::new(release_rx);
        let runner = ScriptedRunner::new(move |spec| {
            if spec.is("wg-quick", &["up"]) {
                let _ = started_tx.lock().unwrap().send(());
                let _ = release_rx.lock().unwrap().recv_timeout(Duration::from_secs(5));
            }
            Ok(CommandOutput::ok(""))
        });
        let h = Harness::with_runner(runner, |s| s.task_queue_capacity = 1);
        h.import("home.conf", None);

        let (tx, rx) = mpsc::channel();
        h.service.connect("home", None, reply(tx.clone()));
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        h.service.disconnect(reply(tx.clone()));
        h.service.disconnect(reply(tx));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            (false, VpnError::Busy.to_string())
        );

        release_tx.send(()).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap().0);
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap().0);
    }

    #[test]
    fn test_remove_status_callback() {
        let h = Harness::new();
        let count = Arc::new(AtomicU64::new(0));
        let counter = count.clone();
        let id = h.service.add_status_callback(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(h.service.remove_status_callback(id));
        assert!(!h.service.remove_status_callback(id));

        h.disconnect();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_adopts_running_wireguard_tunnel() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::for_tests(dir.path());
        settings.monitor_grace_ms = 60_000;
        let paths = VpnPaths::new(dir.path());
        paths.ensure().unwrap();
        let config = paths.config_file("home", "conf");
        fs::write(&config, WG).unwrap();
        ProfileStore::new(paths.profiles_file())
            .save([&VpnProfile::new("home", &config, VpnType::WireGuard)])
            .unwrap();

        let runner = Arc::new(ScriptedRunner::new(|spec| {
            if spec.is("wg", &["show", "interfaces"]) {
                Ok(CommandOutput::ok("home\n"))
            } else {
                Ok(CommandOutput::ok(""))
            }
        }));
        let service = VpnService::new(settings, runner, Arc::new(MemoryStore::new())).unwrap();
        assert_eq!(service.status(), VpnStatus::Connected);
        assert_eq!(service.current_profile().unwrap().name, "home");
    }

    #[test]
    fn test_stale_pid_files_removed_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let paths = VpnPaths::new(dir.path());
        paths.ensure().unwrap();
        let stale = paths.pid_file("office");
        fs::write(&stale, "999999999\n").unwrap();

        let service = VpnService::new(
            Settings::for_tests(dir.path()),
            Arc::new(ScriptedRunner::succeeding()),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        assert_eq!(service.status(), VpnStatus::Disconnected);
        assert!(!stale.exists());
    }

    #[test]
    fn test_connection_info_only_when_connected() {
        let runner = ScriptedRunner::new(|spec| {
            if spec.program == "curl" {
                Ok(CommandOutput::ok("198.51.100.4\n"))
            } else {
                Ok(CommandOutput::ok(""))
            }
        });
        let h = Harness::with_runner(runner, |_| {});
        assert!(h.service.connection_info().is_none());

        h.import("home.conf", None);
        h.connect("home");
        let info = h.service.connection_info().unwrap();
        assert_eq!(info.profile_name, "home");
        assert_eq!(info.vpn_type, VpnType::WireGuard);
        assert_eq!(info.public_ip.as_deref(), Some("198.51.100.4"));
    }

    #[test]
    fn test_wireguard_import_rejects_unusable_interface_names() {
        let h = Harness::new();
        let (ok, message) = h.import("my-office-wireguard.conf", None);
        assert!(!ok);
        assert!(message.starts_with("Invalid WireGuard interface name: my-office-wireguard"));

        assert!(h.import("abcdefghijklmno.conf", None).0);
        // The unique suffix would push the interface name past the kernel limit.
        let (ok, message) = h.import("abcdefghijklmno.conf", None);
        assert!(!ok);
        assert!(message.contains("abcdefghijklmno_1"));

        let profiles = h.service.profiles();
        assert_eq!(profiles.keys().collect::<Vec<_>>(), vec!["abcdefghijklmno"]);
        assert!(!h.service.paths().config_file("abcdefghijklmno_1", "conf").exists());
    }

    #[test]
    fn test_dns_restored_by_later_instance() {
        let runner = ScriptedRunner::new(|spec| {
            if spec.is("wg", &["show", "interfaces"]) {
                Ok(CommandOutput::ok("home\n"))
            } else {
                Ok(CommandOutput::ok(""))
            }
        });
        let h = Harness::with_runner(runner, |_| {});
        h.import("home.conf", None);
        h.service
            .update_profile_settings(
                "home",
                ProfileSettings {
                    dns_mode: Some(DnsMode::UseCustomDns),
                    custom_dns: Some(vec!["1.1.1.1".to_string()]),
                    ..ProfileSettings::default()
                },
            )
            .unwrap();
        assert!(h.connect("home").0);
        let snapshot_file = h.service.paths().dns_snapshot_file();
        assert!(snapshot_file.exists());

        // A one-shot CLI run exits with the tunnel up; the next one tears it down.
        let settings = h.service.settings().clone();
        drop(h.service);
        let later = VpnService::new(settings, h.runner.clone(), h.secrets.clone()).unwrap();
        assert_eq!(later.status(), VpnStatus::Connected);

        let (tx, rx) = mpsc::channel();
        later.disconnect(reply(tx));
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap().0);

        let report = later.last_cleanup_report().unwrap();
        assert_eq!(report.outcome("restore dns"), Some(&CleanupOutcome::Done));
        assert!(h
            .runner
            .calls()
            .iter()
            .any(|c| c.program == "tee" && c.stdin.as_deref() == Some("nameserver 192.168.1.1\n")));
        assert!(!snapshot_file.exists());
    }

    fn openvpn_harness(log: &'static str) -> Harness {
        let h = Harness::with_runner(crate::vpn::openvpn::testing::daemon(log), |_| {});
        let (ok, message) = h.import_from(h.source("office.ovpn", OVPN), None);
        assert!(ok, "{message}");
        h
    }

    fn launch_args(h: &Harness) -> Vec<String> {
        h.runner
            .calls()
            .into_iter()
            .rev()
            .find(|c| c.program == "openvpn")
            .map(|c| c.args)
            .unwrap()
    }

    #[test]
    fn test_openvpn_stored_credentials_written_to_auth_file() {
        let h = openvpn_harness("Initialization Sequence Completed\n");
        h.service.save_credentials("office", "alice", "pw").unwrap();

        assert_eq!(h.connect("office"), (true, constants::MSG_CONNECTED.to_string()));
        let auth_file = h.service.paths().auth_file("office");
        assert_eq!(fs::read_to_string(&auth_file).unwrap(), "alice\npw");
        assert!(launch_args(&h).contains(&"--auth-user-pass".to_string()));
    }

    #[test]
    fn test_openvpn_reuses_existing_auth_file() {
        let h = openvpn_harness("Initialization Sequence Completed\n");
        let auth_file = h.service.paths().auth_file("office");
        fs::write(&auth_file, "bob\nold\n").unwrap();

        assert!(h.connect("office").0);
        assert_eq!(fs::read_to_string(&auth_file).unwrap(), "bob\nold\n");
        assert!(launch_args(&h).contains(&auth_file.to_string_lossy().into_owned()));

        h.disconnect();
        assert!(h.connect_as("office", Some(Credentials::new("carol", "new"))).0);
        assert_eq!(fs::read_to_string(&auth_file).unwrap(), "carol\nnew");
    }

    #[test]
    fn test_openvpn_failed_init_leaves_nothing_running() {
        let h = openvpn_harness("Attempting to establish TCP connection\n");

        let (ok, message) = h.connect("office");
        assert!(!ok);
        assert!(message.starts_with("OpenVPN initialization failed"));
        assert_eq!(h.service.status(), VpnStatus::Error);
        assert!(h.service.current_profile().is_none());

        let pid = std::process::id().to_string();
        assert_eq!(h.runner.count("kill", &[pid.as_str()]), 1);
        assert!(!h.service.paths().pid_file("office").exists());
        assert!(!h.service.paths().dns_snapshot_file().exists());
    }
}
