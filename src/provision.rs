// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Provisioning pipeline.
//!
//! A provisioning run is an ordered list of [`Step`]s. Steps execute strictly
//! in order, nothing is retried, and the first failure halts the run. Every
//! step leaves a [`StepOutcome`] behind so the caller can tell exactly how far
//! the run got.
//!
//! # Rollback
//!
//! Once the run has started writing files, i.e., from [`Step::WriteConfig`]
//! onward, a failure comes with a rollback offer. The offer is put to the
//! [`Operator`], which decides whether to take it. An accepted offer only
//! undoes what the run itself created. A server block or web root that was
//! already there when the run started is left alone, and the hosts file is
//! only touched if the run appended to it.
//!
//! [`VhostProvisioner::rollback`] is the standalone variant. It does not know
//! what any earlier run created, so it backs up the hosts file, strips the
//! hostname from it, and removes the server block, its symlink, and the web
//! root. Missing targets are skipped, so it can be run any number of times.
//!
//! # Concurrency
//!
//! None. The hosts file, the Nginx configuration directories, and the web root
//! tree are unguarded shared state. Two runs for the same hostname race on the
//! existence checks.

use crate::{
    config::ProvisionConfig,
    host::HostName,
    path::ProvisionPaths,
    probe::{probe_url, HttpProbe, UreqProbe},
    report::error_chain,
    site::{FsSiteRegistry, SiteError, SiteRegistry},
    store::{FsHostsFile, HostsFileStore, StoreError},
    system::{HostSystem, System, SystemError},
    template::render_server_block,
    webroot::{create_web_root, remove_web_root, secure_web_root, WebRootError},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
    time::Duration,
};
use tracing::{debug, error, info, instrument, warn};

/// Single stage of the provisioning pipeline.
///
/// Variants are declared in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    ValidatePreconditions,
    DetectDependencies,
    WriteConfig,
    EnableSite,
    ProvisionWebRoot,
    RegisterHostsEntry,
    ReloadWebServer,
    VerifyReachability,
}

impl Step {
    /// Every step in execution order.
    pub const ALL: [Step; 8] = [
        Step::ValidatePreconditions,
        Step::DetectDependencies,
        Step::WriteConfig,
        Step::EnableSite,
        Step::ProvisionWebRoot,
        Step::RegisterHostsEntry,
        Step::ReloadWebServer,
        Step::VerifyReachability,
    ];

    /// Check if failing at this step comes with a rollback offer.
    pub fn offers_rollback(self) -> bool {
        self >= Step::WriteConfig
    }
}

impl Display for Step {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Step::ValidatePreconditions => "validate preconditions",
            Step::DetectDependencies => "detect dependencies",
            Step::WriteConfig => "write config",
            Step::EnableSite => "enable site",
            Step::ProvisionWebRoot => "provision web root",
            Step::RegisterHostsEntry => "register hosts entry",
            Step::ReloadWebServer => "reload web server",
            Step::VerifyReachability => "verify reachability",
        };
        fmt.write_str(name)
    }
}

/// What happened at a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Step that ran.
    pub step: Step,

    /// Whether the step succeeded.
    pub succeeded: bool,

    /// Human readable summary.
    pub message: String,
}

impl StepOutcome {
    fn success(step: Step, message: impl Into<String>) -> Self {
        Self {
            step,
            succeeded: true,
            message: message.into(),
        }
    }

    fn failure(step: Step, message: impl Into<String>) -> Self {
        Self {
            step,
            succeeded: false,
            message: message.into(),
        }
    }
}

/// Result of a full provisioning run.
#[derive(Debug)]
pub struct ProvisionResult {
    /// Host that was provisioned.
    pub host: HostName,

    /// Paths the run worked with.
    pub paths: ProvisionPaths,

    /// Outcome of every step that ran, in order.
    pub outcomes: Vec<StepOutcome>,

    /// Error that halted the run, if any.
    pub failure: Option<ProvisionError>,

    /// Rollback performed after the failure, if the operator accepted it.
    pub rollback: Option<RollbackReport>,
}

impl ProvisionResult {
    /// Check if every step succeeded.
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// Step that halted the run, if any.
    pub fn failed_step(&self) -> Option<Step> {
        self.outcomes
            .iter()
            .find(|outcome| !outcome.succeeded)
            .map(|outcome| outcome.step)
    }
}

/// What a rollback managed to undo.
#[derive(Debug, Default)]
pub struct RollbackReport {
    /// Hosts file backup taken before stripping.
    pub hosts_backup: Option<PathBuf>,

    /// Number of hosts file lines dropped or rewritten.
    pub hosts_lines_removed: usize,

    /// Files and directories removed.
    pub removed: Vec<PathBuf>,

    /// Errors hit along the way. Rollback keeps going past them.
    pub errors: Vec<ProvisionError>,
}

impl RollbackReport {
    /// Check if rollback finished without errors.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Caller supplied capabilities of the pipeline.
///
/// Progress hooks default to doing nothing. Any closure taking a
/// [`ProvisionError`] and returning a `bool` is an operator that only answers
/// rollback offers.
pub trait Operator {
    /// Step is about to run.
    fn step_started(&mut self, _step: Step) {}

    /// Step has finished.
    fn step_finished(&mut self, _outcome: &StepOutcome) {}

    /// Decide whether to roll back after failure.
    fn confirm_rollback(&mut self, failure: &ProvisionError) -> bool;
}

impl<F> Operator for F
where
    F: FnMut(&ProvisionError) -> bool,
{
    fn confirm_rollback(&mut self, failure: &ProvisionError) -> bool {
        self(failure)
    }
}

/// Mutable state threaded between steps of a single run.
#[derive(Debug, Default)]
struct RunState {
    invoking_user: Option<String>,
    fastcgi_socket: Option<String>,
    created: Created,
}

/// Artifacts created for a host, and thus eligible for rollback.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Created {
    config: bool,
    link: bool,
    web_root: bool,
    hosts_entry: bool,
}

impl Created {
    const ALL: Self = Self {
        config: true,
        link: true,
        web_root: true,
        hosts_entry: true,
    };
}

/// Virtual host provisioner.
///
/// Drives the provisioning pipeline against injected collaborators. Default
/// type parameters are the production implementations.
#[derive(Debug)]
pub struct VhostProvisioner<H = FsHostsFile, R = FsSiteRegistry, S = HostSystem, P = UreqProbe>
where
    H: HostsFileStore,
    R: SiteRegistry,
    S: System,
    P: HttpProbe,
{
    config: ProvisionConfig,
    hosts: H,
    sites: R,
    system: S,
    probe: P,
    verify: bool,
}

impl VhostProvisioner {
    /// Construct provisioner acting on the local machine.
    pub fn from_config(config: ProvisionConfig) -> Self {
        let hosts = FsHostsFile::new(&config.hosts.path, &config.hosts.backup_dir);
        let sites = FsSiteRegistry::new(&config.nginx.sites_available, &config.nginx.sites_enabled);
        let probe = UreqProbe::new(Duration::from_secs(config.verify.timeout_secs));
        Self::new(config, hosts, sites, HostSystem::new(), probe)
    }
}

impl<H, R, S, P> VhostProvisioner<H, R, S, P>
where
    H: HostsFileStore,
    R: SiteRegistry,
    S: System,
    P: HttpProbe,
{
    /// Construct new provisioner.
    pub fn new(config: ProvisionConfig, hosts: H, sites: R, system: S, probe: P) -> Self {
        Self {
            config,
            hosts,
            sites,
            system,
            probe,
            verify: true,
        }
    }

    /// Toggle final reachability verification.
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Run full provisioning pipeline for target host.
    ///
    /// Never returns early with an error. Whatever happened is recorded in
    /// the returned [`ProvisionResult`].
    #[instrument(skip(self, operator), level = "debug")]
    pub fn run(&self, host: &HostName, operator: &mut impl Operator) -> ProvisionResult {
        let paths = ProvisionPaths::derive(&self.config, host);
        let mut state = RunState::default();
        let mut result = ProvisionResult {
            host: host.clone(),
            paths: paths.clone(),
            outcomes: Vec::with_capacity(Step::ALL.len()),
            failure: None,
            rollback: None,
        };

        for step in Step::ALL {
            if step == Step::VerifyReachability && !self.verify {
                let outcome = StepOutcome::success(step, "skipped");
                operator.step_finished(&outcome);
                result.outcomes.push(outcome);
                continue;
            }

            operator.step_started(step);
            match self.execute(step, host, &paths, &mut state) {
                Ok(message) => {
                    debug!("{step}: {message}");
                    let outcome = StepOutcome::success(step, message);
                    operator.step_finished(&outcome);
                    result.outcomes.push(outcome);
                }
                Err(failure) => {
                    error!("{step}: {}", error_chain(&failure));
                    let outcome = StepOutcome::failure(step, failure.to_string());
                    operator.step_finished(&outcome);
                    result.outcomes.push(outcome);

                    if step.offers_rollback() && operator.confirm_rollback(&failure) {
                        result.rollback = Some(self.undo(host, state.created));
                    }
                    result.failure = Some(failure);
                    return result;
                }
            }
        }

        result
    }

    /// Undo a previous run for target host.
    ///
    /// Checks preconditions first, then performs the same rollback a failed
    /// run would offer.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError::Permission`] if preconditions do not hold.
    pub fn remove(&self, host: &HostName) -> Result<RollbackReport> {
        self.validate_preconditions(&mut RunState::default())?;
        Ok(self.rollback(host))
    }

    /// Remove every artifact that may exist for target host.
    ///
    /// Best effort. Each part is attempted even if an earlier one failed,
    /// except that the hosts file is never edited without a fresh backup.
    #[instrument(skip(self), level = "debug")]
    pub fn rollback(&self, host: &HostName) -> RollbackReport {
        self.undo(host, Created::ALL)
    }

    fn undo(&self, host: &HostName, created: Created) -> RollbackReport {
        let paths = ProvisionPaths::derive(&self.config, host);
        let mut report = RollbackReport::default();
        info!("roll back {host}");

        if created.hosts_entry {
            match self.hosts.backup() {
                Ok(backup) => {
                    report.hosts_backup = Some(backup);
                    match self.hosts.remove_host(host) {
                        Ok(count) => report.hosts_lines_removed = count,
                        Err(err) => report.errors.push(err.into()),
                    }
                }
                Err(err) => {
                    warn!("leave {:?} untouched without backup", self.hosts.path().display());
                    report.errors.push(err.into());
                }
            }
        }

        if created.link {
            match self.sites.disable(host) {
                Ok(removed) => report.removed.extend(removed),
                Err(err) => report.errors.push(ProvisionError::Site(err)),
            }
        }

        if created.config {
            match self.sites.uninstall(host) {
                Ok(removed) => report.removed.extend(removed),
                Err(err) => report.errors.push(ProvisionError::Site(err)),
            }
        }

        if created.web_root {
            match remove_web_root(&paths.web_root) {
                Ok(true) => report.removed.push(paths.web_root),
                Ok(false) => {}
                Err(err) => report.errors.push(ProvisionError::WebRoot(err)),
            }
        }

        report
    }

    fn execute(
        &self,
        step: Step,
        host: &HostName,
        paths: &ProvisionPaths,
        state: &mut RunState,
    ) -> Result<String> {
        match step {
            Step::ValidatePreconditions => self.validate_preconditions(state),
            Step::DetectDependencies => self.detect_dependencies(state),
            Step::WriteConfig => self.write_config(host, paths, state),
            Step::EnableSite => self.enable_site(host, state),
            Step::ProvisionWebRoot => self.provision_web_root(host, paths, state),
            Step::RegisterHostsEntry => self.register_hosts_entry(host, state),
            Step::ReloadWebServer => self.reload_web_server(),
            Step::VerifyReachability => self.verify_reachability(host),
        }
    }

    fn validate_preconditions(&self, state: &mut RunState) -> Result<String> {
        if !self.system.is_elevated()? {
            return Err(ProvisionError::Permission {
                reason: "elevated privileges are required".into(),
            });
        }

        let user = self
            .system
            .invoking_user()
            .ok_or_else(|| ProvisionError::Permission {
                reason: "cannot determine invoking user".into(),
            })?;

        let group = &self.config.web.group;
        if !self.system.user_in_group(&user, group)? {
            return Err(ProvisionError::Permission {
                reason: format!("user {user:?} is not a member of group {group:?}"),
            });
        }

        let message = format!("elevated on behalf of {user} ({group})");
        state.invoking_user = Some(user);

        Ok(message)
    }

    fn detect_dependencies(&self, state: &mut RunState) -> Result<String> {
        let nginx = self
            .system
            .nginx_version()
            .ok_or_else(|| ProvisionError::Dependency {
                program: "nginx".into(),
            })?;

        let message = match self.system.php_version() {
            Some(php) => {
                let socket = self.config.fastcgi_socket(&php);
                let message = format!("nginx {nginx}, php {php} via {socket}");
                state.fastcgi_socket = Some(socket);
                message
            }
            None => format!("nginx {nginx}, php not found, skipping FastCGI"),
        };

        Ok(message)
    }

    fn write_config(
        &self,
        host: &HostName,
        paths: &ProvisionPaths,
        state: &mut RunState,
    ) -> Result<String> {
        let contents =
            render_server_block(host, &paths.web_root, state.fastcgi_socket.as_deref());
        let config_file = self.sites.install(host, &contents)?;
        state.created.config = true;

        Ok(format!("wrote {}", config_file.display()))
    }

    fn enable_site(&self, host: &HostName, state: &mut RunState) -> Result<String> {
        let link = self.sites.enable(host)?;
        state.created.link = true;

        Ok(format!("linked {}", link.display()))
    }

    fn provision_web_root(
        &self,
        host: &HostName,
        paths: &ProvisionPaths,
        state: &mut RunState,
    ) -> Result<String> {
        let created = create_web_root(host, &paths.web_root, &paths.index_file);

        // INVARIANT: Anything but a pre-existing web root may have left a
        //   partial tree behind that belongs to this run.
        state.created.web_root = !matches!(created, Err(WebRootError::Exists { .. }));
        created?;

        let user = state
            .invoking_user
            .as_deref()
            .ok_or_else(|| ProvisionError::Permission {
                reason: "cannot determine invoking user".into(),
            })?;
        let owner = self.system.resolve_owner(user, &self.config.web.group)?;
        secure_web_root(&paths.web_root, owner)?;

        Ok(format!(
            "created {} owned by {user}:{}",
            paths.web_root.display(),
            self.config.web.group
        ))
    }

    fn register_hosts_entry(&self, host: &HostName, state: &mut RunState) -> Result<String> {
        let backup = self.hosts.backup()?;
        let address = &self.config.hosts.address;
        self.hosts.append_entry(address, host)?;
        state.created.hosts_entry = true;

        Ok(format!(
            "mapped {host} to {address} (backup at {})",
            backup.display()
        ))
    }

    fn reload_web_server(&self) -> Result<String> {
        let service = self.config.nginx.service.as_str();
        let reload_error = |service: &str, reason: String| ProvisionError::ServiceReload {
            service: service.into(),
            reason,
        };

        if let Some(legacy) = self
            .config
            .nginx
            .legacy_service
            .as_deref()
            .filter(|legacy| !legacy.is_empty())
        {
            let legacy_active = self
                .system
                .service_active(legacy)
                .map_err(|err| reload_error(legacy, error_chain(&err)))?;
            if legacy_active {
                self.system
                    .stop_service(legacy)
                    .map_err(|err| reload_error(legacy, error_chain(&err)))?;
            }
        }

        self.system.test_web_server_config().map_err(|err| {
            reload_error(
                service,
                format!("configuration test failed: {}", error_chain(&err)),
            )
        })?;

        let was_active = self
            .system
            .service_active(service)
            .map_err(|err| reload_error(service, error_chain(&err)))?;
        let action = if was_active {
            self.system.reload_service(service).map(|()| "reloaded")
        } else {
            self.system.restart_service(service).map(|()| "restarted")
        };
        let action = action.map_err(|err| reload_error(service, error_chain(&err)))?;

        let active = self
            .system
            .service_active(service)
            .map_err(|err| reload_error(service, error_chain(&err)))?;
        if !active {
            return Err(reload_error(
                service,
                format!("service is not active after being {action}"),
            ));
        }

        Ok(format!("{action} {service}"))
    }

    fn verify_reachability(&self, host: &HostName) -> Result<String> {
        let url = probe_url(host);
        let reply = self
            .probe
            .get(&url)
            .map_err(|err| ProvisionError::Verification {
                url: url.clone(),
                reason: error_chain(&err),
            })?;

        if !reply.served_by(host) {
            return Err(ProvisionError::Verification {
                reason: format!(
                    "expected status 200 with first line {:?}, got status {} with first line {:?}",
                    host.as_str(),
                    reply.status,
                    reply.body.lines().next().unwrap_or_default()
                ),
                url,
            });
        }

        Ok(format!("{url} answered as {host}"))
    }
}

/// Provisioning error types.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Process lacks privileges, or invoking user lacks group membership.
    #[error("permission denied: {reason}")]
    Permission { reason: String },

    /// Required program is not installed.
    #[error("required program {program:?} is not installed")]
    Dependency { program: String },

    /// Server block already exists.
    #[error("server block already exists at {:?}", config_file.display())]
    ConfigExists { config_file: PathBuf },

    /// Server block cannot be enabled.
    #[error("failed to link {:?} to {:?}", link.display(), config_file.display())]
    Link {
        #[source]
        source: std::io::Error,
        link: PathBuf,
        config_file: PathBuf,
    },

    /// Web root already exists.
    #[error("web root already exists at {:?}", web_root.display())]
    DirectoryExists { web_root: PathBuf },

    /// Web server cannot be reloaded, or is not active afterwards.
    #[error("failed to reload {service:?}: {reason}")]
    ServiceReload { service: String, reason: String },

    /// New host does not answer as expected.
    #[error("verification of {url} failed: {reason}")]
    Verification { url: String, reason: String },

    /// Server block management fails unexpectedly.
    #[error(transparent)]
    Site(SiteError),

    /// Web root provisioning fails unexpectedly.
    #[error(transparent)]
    WebRoot(WebRootError),

    /// Hosts file management fails.
    #[error(transparent)]
    Hosts(#[from] StoreError),

    /// Host system interaction fails.
    #[error(transparent)]
    System(#[from] SystemError),
}

impl From<SiteError> for ProvisionError {
    fn from(err: SiteError) -> Self {
        match err {
            SiteError::ConfigExists { config_path } => Self::ConfigExists {
                config_file: config_path,
            },
            SiteError::Link {
                source,
                link_path,
                config_path,
            } => Self::Link {
                source,
                link: link_path,
                config_file: config_path,
            },
            err => Self::Site(err),
        }
    }
}

impl From<WebRootError> for ProvisionError {
    fn from(err: WebRootError) -> Self {
        match err {
            WebRootError::Exists { web_root } => Self::DirectoryExists { web_root },
            err => Self::WebRoot(err),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        probe::{HttpReply, ProbeError},
        store::strip_host,
        system::Owner,
    };

    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::{
        cell::{Cell, RefCell},
        collections::{BTreeMap, BTreeSet},
        fs::metadata,
        io::{Error as IoError, ErrorKind},
        os::unix::fs::MetadataExt,
        path::Path,
    };

    #[derive(Debug, Default)]
    struct MemoryHosts {
        content: RefCell<String>,
        backups: RefCell<Vec<String>>,
    }

    impl HostsFileStore for MemoryHosts {
        fn path(&self) -> &Path {
            Path::new("/etc/hosts")
        }

        fn backup(&self) -> crate::store::Result<PathBuf> {
            let mut backups = self.backups.borrow_mut();
            backups.push(self.content.borrow().clone());
            Ok(PathBuf::from(format!("/backup/hosts.{}", backups.len())))
        }

        fn append_entry(&self, address: &str, host: &HostName) -> crate::store::Result<()> {
            let mut content = self.content.borrow_mut();
            content.push_str(&crate::store::format_entry(address, host));
            content.push('\n');
            Ok(())
        }

        fn remove_host(&self, host: &HostName) -> crate::store::Result<usize> {
            let (stripped, touched) = strip_host(&self.content.borrow(), host);
            *self.content.borrow_mut() = stripped;
            Ok(touched)
        }
    }

    #[derive(Debug, Default)]
    struct MemorySites {
        configs: RefCell<BTreeMap<String, String>>,
        links: RefCell<BTreeSet<String>>,
    }

    impl SiteRegistry for MemorySites {
        fn config_path(&self, host: &HostName) -> PathBuf {
            PathBuf::from(format!("available/{host}.conf"))
        }

        fn link_path(&self, host: &HostName) -> PathBuf {
            PathBuf::from(format!("enabled/{host}.conf"))
        }

        fn install(&self, host: &HostName, contents: &str) -> crate::site::Result<PathBuf> {
            let mut configs = self.configs.borrow_mut();
            if configs.contains_key(host.as_str()) {
                return Err(SiteError::ConfigExists {
                    config_path: self.config_path(host),
                });
            }
            configs.insert(host.to_string(), contents.into());
            Ok(self.config_path(host))
        }

        fn enable(&self, host: &HostName) -> crate::site::Result<PathBuf> {
            if !self.links.borrow_mut().insert(host.to_string()) {
                return Err(SiteError::Link {
                    source: IoError::from(ErrorKind::AlreadyExists),
                    link_path: self.link_path(host),
                    config_path: self.config_path(host),
                });
            }
            Ok(self.link_path(host))
        }

        fn disable(&self, host: &HostName) -> crate::site::Result<Option<PathBuf>> {
            let removed = self.links.borrow_mut().remove(host.as_str());
            Ok(removed.then(|| self.link_path(host)))
        }

        fn uninstall(&self, host: &HostName) -> crate::site::Result<Option<PathBuf>> {
            let removed = self.configs.borrow_mut().remove(host.as_str());
            Ok(removed.map(|_| self.config_path(host)))
        }
    }

    #[derive(Debug)]
    struct FakeSystem {
        elevated: bool,
        in_group: bool,
        nginx: Option<String>,
        php: Option<String>,
        active: Cell<bool>,
        start_fails: bool,
        legacy_active: Cell<bool>,
        legacy_query_fails: bool,
        stop_fails: bool,
        calls: RefCell<Vec<String>>,
    }

    impl Default for FakeSystem {
        fn default() -> Self {
            Self {
                elevated: true,
                in_group: true,
                nginx: Some("1.24.0".into()),
                php: None,
                active: Cell::new(true),
                start_fails: false,
                legacy_active: Cell::new(false),
                legacy_query_fails: false,
                stop_fails: false,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl System for FakeSystem {
        fn is_elevated(&self) -> crate::system::Result<bool> {
            Ok(self.elevated)
        }

        fn invoking_user(&self) -> Option<String> {
            Some("alice".into())
        }

        fn user_in_group(&self, _user: &str, _group: &str) -> crate::system::Result<bool> {
            Ok(self.in_group)
        }

        fn nginx_version(&self) -> Option<String> {
            self.nginx.clone()
        }

        fn php_version(&self) -> Option<String> {
            self.php.clone()
        }

        fn resolve_owner(&self, _user: &str, _group: &str) -> crate::system::Result<Owner> {
            let meta = metadata(".").map_err(|err| SystemError::Syscall {
                source: err,
                program: "stat".into(),
            })?;
            Ok(Owner {
                uid: meta.uid(),
                gid: meta.gid(),
            })
        }

        fn service_active(&self, service: &str) -> crate::system::Result<bool> {
            match service {
                "nginx" => Ok(self.active.get()),
                "apache2" if self.legacy_query_fails => Err(SystemError::CommandFailed {
                    program: "systemctl".into(),
                    message: "Failed to connect to bus".into(),
                }),
                "apache2" => Ok(self.legacy_active.get()),
                _ => Ok(false),
            }
        }

        fn stop_service(&self, service: &str) -> crate::system::Result<()> {
            self.calls.borrow_mut().push(format!("stop {service}"));
            if self.stop_fails {
                return Err(SystemError::CommandFailed {
                    program: "systemctl".into(),
                    message: format!("Failed to stop {service}.service"),
                });
            }

            if service == "apache2" {
                self.legacy_active.set(false);
            }
            Ok(())
        }

        fn reload_service(&self, service: &str) -> crate::system::Result<()> {
            self.calls.borrow_mut().push(format!("reload {service}"));
            Ok(())
        }

        fn restart_service(&self, service: &str) -> crate::system::Result<()> {
            self.calls.borrow_mut().push(format!("restart {service}"));
            self.active.set(!self.start_fails);
            Ok(())
        }

        fn test_web_server_config(&self) -> crate::system::Result<()> {
            self.calls.borrow_mut().push("test config".into());
            Ok(())
        }
    }

    #[derive(Debug)]
    struct FakeProbe {
        reply: Option<HttpReply>,
    }

    impl FakeProbe {
        fn answering(body: &str) -> Self {
            Self {
                reply: Some(HttpReply {
                    status: 200,
                    body: body.into(),
                }),
            }
        }
    }

    impl HttpProbe for FakeProbe {
        fn get(&self, url: &str) -> crate::probe::Result<HttpReply> {
            self.reply.clone().ok_or_else(|| ProbeError::ReadBody {
                source: IoError::from(ErrorKind::ConnectionRefused),
                url: url.into(),
            })
        }
    }

    type TestProvisioner = VhostProvisioner<MemoryHosts, MemorySites, FakeSystem, FakeProbe>;

    fn provisioner(system: FakeSystem, probe: FakeProbe) -> TestProvisioner {
        let mut config = ProvisionConfig::default();
        config.web.root = PathBuf::from("www");
        VhostProvisioner::new(
            config,
            MemoryHosts::default(),
            MemorySites::default(),
            system,
            probe,
        )
    }

    fn host() -> HostName {
        HostName::new("test.local").unwrap()
    }

    fn refuse_rollback(_: &ProvisionError) -> bool {
        false
    }

    #[sealed_test]
    fn provision_fresh_host() {
        let provisioner = provisioner(FakeSystem::default(), FakeProbe::answering("test.local\n"));
        let result = provisioner.run(&host(), &mut refuse_rollback);

        assert!(result.succeeded(), "{:?}", result.failure);
        assert_eq!(
            result.outcomes.iter().map(|o| o.step).collect::<Vec<_>>(),
            Step::ALL.to_vec()
        );
        assert_eq!(*provisioner.hosts.content.borrow(), "127.0.0.1\t\ttest.local\n");
        assert_eq!(*provisioner.hosts.backups.borrow(), vec![String::new()]);
        assert!(provisioner.sites.links.borrow().contains("test.local"));
        assert!(!provisioner.sites.configs.borrow()["test.local"].contains("fastcgi"));
        assert!(Path::new("www/test.local/index.html").exists());
        assert_eq!(
            *provisioner.system.calls.borrow(),
            vec!["test config".to_string(), "reload nginx".to_string()]
        );
    }

    #[sealed_test]
    fn php_adds_fastcgi_block() {
        let system = FakeSystem {
            php: Some("8.2".into()),
            ..FakeSystem::default()
        };
        let provisioner = provisioner(system, FakeProbe::answering("test.local\n"));
        let result = provisioner.run(&host(), &mut refuse_rollback);

        assert!(result.succeeded(), "{:?}", result.failure);
        let config = provisioner.sites.configs.borrow()["test.local"].clone();
        assert!(config.contains("location ~ \\.php$ {"));
        assert!(config.contains("fastcgi_pass unix:/run/php/php8.2-fpm.sock;"));
    }

    #[sealed_test]
    fn missing_privileges_halt_without_rollback_offer() {
        let system = FakeSystem {
            elevated: false,
            ..FakeSystem::default()
        };
        let provisioner = provisioner(system, FakeProbe::answering("test.local\n"));
        let mut offered = false;
        let result = provisioner.run(&host(), &mut |_: &ProvisionError| {
            offered = true;
            true
        });

        assert!(matches!(result.failure, Some(ProvisionError::Permission { .. })));
        assert_eq!(result.outcomes.len(), 1);
        assert!(!offered);
        assert!(result.rollback.is_none());
    }

    #[sealed_test]
    fn missing_group_membership_is_permission_error() {
        let system = FakeSystem {
            in_group: false,
            ..FakeSystem::default()
        };
        let provisioner = provisioner(system, FakeProbe::answering("test.local\n"));
        let result = provisioner.run(&host(), &mut refuse_rollback);

        assert_eq!(result.failed_step(), Some(Step::ValidatePreconditions));
        assert!(matches!(result.failure, Some(ProvisionError::Permission { .. })));
    }

    #[sealed_test]
    fn missing_nginx_is_fatal() {
        let system = FakeSystem {
            nginx: None,
            ..FakeSystem::default()
        };
        let provisioner = provisioner(system, FakeProbe::answering("test.local\n"));
        let result = provisioner.run(&host(), &mut refuse_rollback);

        assert_eq!(result.failed_step(), Some(Step::DetectDependencies));
        assert!(matches!(result.failure, Some(ProvisionError::Dependency { .. })));
        assert!(provisioner.sites.configs.borrow().is_empty());
    }

    #[sealed_test]
    fn second_run_halts_at_config_exists() {
        let provisioner = provisioner(FakeSystem::default(), FakeProbe::answering("test.local\n"));
        assert!(provisioner.run(&host(), &mut refuse_rollback).succeeded());

        let result = provisioner.run(&host(), &mut refuse_rollback);
        assert_eq!(result.failed_step(), Some(Step::WriteConfig));
        assert!(matches!(result.failure, Some(ProvisionError::ConfigExists { .. })));
        assert_eq!(*provisioner.hosts.content.borrow(), "127.0.0.1\t\ttest.local\n");
    }

    #[sealed_test]
    fn inactive_service_after_restart_fails_reload() {
        let system = FakeSystem {
            active: Cell::new(false),
            start_fails: true,
            ..FakeSystem::default()
        };
        let provisioner = provisioner(system, FakeProbe::answering("test.local\n"));
        let result = provisioner.run(&host(), &mut refuse_rollback);

        assert_eq!(result.failed_step(), Some(Step::ReloadWebServer));
        assert!(matches!(result.failure, Some(ProvisionError::ServiceReload { .. })));
        assert_eq!(
            *provisioner.system.calls.borrow(),
            vec!["test config".to_string(), "restart nginx".to_string()]
        );
    }

    #[sealed_test]
    fn active_legacy_server_is_stopped_first() {
        let system = FakeSystem {
            legacy_active: Cell::new(true),
            ..FakeSystem::default()
        };
        let provisioner = provisioner(system, FakeProbe::answering("test.local\n"));
        let result = provisioner.run(&host(), &mut refuse_rollback);

        assert!(result.succeeded(), "{:?}", result.failure);
        assert_eq!(
            *provisioner.system.calls.borrow(),
            vec![
                "stop apache2".to_string(),
                "test config".to_string(),
                "reload nginx".to_string(),
            ]
        );
    }

    #[sealed_test]
    fn failing_legacy_stop_fails_reload() {
        let system = FakeSystem {
            legacy_active: Cell::new(true),
            stop_fails: true,
            ..FakeSystem::default()
        };
        let provisioner = provisioner(system, FakeProbe::answering("test.local\n"));
        let result = provisioner.run(&host(), &mut refuse_rollback);

        assert_eq!(result.failed_step(), Some(Step::ReloadWebServer));
        assert!(matches!(
            result.failure,
            Some(ProvisionError::ServiceReload { ref service, .. }) if service == "apache2"
        ));
        assert_eq!(*provisioner.system.calls.borrow(), vec!["stop apache2".to_string()]);
    }

    #[sealed_test]
    fn unknown_legacy_state_fails_reload() {
        let system = FakeSystem {
            legacy_query_fails: true,
            ..FakeSystem::default()
        };
        let provisioner = provisioner(system, FakeProbe::answering("test.local\n"));
        let result = provisioner.run(&host(), &mut refuse_rollback);

        assert_eq!(result.failed_step(), Some(Step::ReloadWebServer));
        assert!(matches!(
            result.failure,
            Some(ProvisionError::ServiceReload { ref reason, .. }) if reason.contains("bus")
        ));
        assert!(provisioner.system.calls.borrow().is_empty());
    }

    #[sealed_test]
    fn existing_link_fails_enable_site_with_rollback_offer() {
        let provisioner = provisioner(FakeSystem::default(), FakeProbe::answering("test.local\n"));
        provisioner.sites.links.borrow_mut().insert("test.local".into());

        let mut offered = false;
        let result = provisioner.run(&host(), &mut |_: &ProvisionError| {
            offered = true;
            true
        });

        assert_eq!(result.failed_step(), Some(Step::EnableSite));
        assert!(matches!(result.failure, Some(ProvisionError::Link { .. })));
        assert!(offered);

        let rollback = result.rollback.expect("rollback was accepted");
        assert_eq!(rollback.removed, vec![PathBuf::from("available/test.local.conf")]);
        assert!(provisioner.sites.configs.borrow().is_empty());
        assert!(provisioner.sites.links.borrow().contains("test.local"));
        assert!(provisioner.hosts.backups.borrow().is_empty());
    }

    #[sealed_test]
    fn rollback_keeps_existing_server_block() {
        let provisioner = provisioner(FakeSystem::default(), FakeProbe::answering("test.local\n"));
        provisioner
            .sites
            .configs
            .borrow_mut()
            .insert("test.local".into(), "hand written\n".into());
        *provisioner.hosts.content.borrow_mut() = "127.0.0.1\t\ttest.local\n".into();

        let result = provisioner.run(&host(), &mut |_: &ProvisionError| true);

        assert_eq!(result.failed_step(), Some(Step::WriteConfig));
        let rollback = result.rollback.expect("rollback was accepted");
        assert!(rollback.is_clean());
        assert!(rollback.removed.is_empty());
        assert_eq!(rollback.hosts_backup, None);
        assert_eq!(provisioner.sites.configs.borrow()["test.local"], "hand written\n");
        assert_eq!(*provisioner.hosts.content.borrow(), "127.0.0.1\t\ttest.local\n");
    }

    #[sealed_test]
    fn default_server_reply_fails_verification_and_rolls_back() {
        let provisioner = provisioner(
            FakeSystem::default(),
            FakeProbe::answering("Welcome to nginx!\n"),
        );
        *provisioner.hosts.content.borrow_mut() = "127.0.0.1\t\tother.local\n".into();
        let result = provisioner.run(&host(), &mut |failure: &ProvisionError| {
            matches!(failure, ProvisionError::Verification { .. })
        });

        assert_eq!(result.failed_step(), Some(Step::VerifyReachability));
        let rollback = result.rollback.expect("rollback was accepted");
        assert!(rollback.is_clean());
        assert_eq!(rollback.hosts_lines_removed, 1);
        assert_eq!(*provisioner.hosts.content.borrow(), "127.0.0.1\t\tother.local\n");
        assert!(provisioner.sites.configs.borrow().is_empty());
        assert!(provisioner.sites.links.borrow().is_empty());
        assert!(!Path::new("www/test.local").exists());
    }

    #[sealed_test]
    fn unreachable_host_fails_verification() {
        let provisioner = provisioner(FakeSystem::default(), FakeProbe { reply: None });
        let result = provisioner.run(&host(), &mut refuse_rollback);

        assert!(matches!(result.failure, Some(ProvisionError::Verification { .. })));
        assert!(result.rollback.is_none());
        assert!(Path::new("www/test.local").exists());
    }

    #[sealed_test]
    fn skipped_verification_is_recorded() {
        let provisioner = provisioner(FakeSystem::default(), FakeProbe { reply: None })
            .with_verification(false);
        let result = provisioner.run(&host(), &mut refuse_rollback);

        assert!(result.succeeded());
        let last = result.outcomes.last().expect("outcomes are recorded");
        assert_eq!(last.step, Step::VerifyReachability);
        assert_eq!(last.message, "skipped");
    }

    #[sealed_test]
    fn remove_requires_preconditions() {
        let system = FakeSystem {
            elevated: false,
            ..FakeSystem::default()
        };
        let provisioner = provisioner(system, FakeProbe { reply: None });

        assert!(matches!(
            provisioner.remove(&host()),
            Err(ProvisionError::Permission { .. })
        ));
    }

    #[test]
    fn rollback_is_offered_from_write_config_onward() {
        let offered = Step::ALL
            .into_iter()
            .filter(|step| step.offers_rollback())
            .collect::<Vec<_>>();
        assert_eq!(offered.first(), Some(&Step::WriteConfig));
        assert_eq!(offered.len(), 6);
    }
}
