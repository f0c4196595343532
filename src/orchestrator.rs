//! Lifecycle state machine: install, update with rollback, uninstall, renew.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::cert::{CertOwner, CertificateAuthority, CertificateLease, CertificateManager, ValidationMode};
use crate::error::{ManagerError, Result};
use crate::fetcher::ArtifactSource;
use crate::fsutil;
use crate::lock::ProtocolLock;
use crate::protocol::{version_at_least, Artifact, Installable, ProtocolKind, ProtocolStatus};
use crate::settings::{Layout, Timings};
use crate::state::{InstallationRecord, StateStore};
use crate::synth::{ClientProfile, InstallParams, ProtocolSettings, VariantPaths};
use crate::system::{ensure_commands, ConfigValidator, PackageInstaller, SystemAccounts};
use crate::unit::{ServiceController, UnitManager};

const LOCK_TIMEOUT: Duration = Duration::from_secs(30);
/// Needed by acme.sh standalone validation.
const ACME_COMMANDS: [&str; 2] = ["curl", "socat"];

/// Interactive yes/no questions for destructive steps.
pub trait Prompter: Send + Sync {
    fn confirm(&self, question: &str, default: bool) -> bool;
}

/// Every external capability the orchestrator drives.
#[derive(Clone)]
pub struct Host {
    pub services: Arc<dyn ServiceController>,
    pub authority: Arc<dyn CertificateAuthority>,
    pub accounts: Arc<dyn SystemAccounts>,
    pub packages: Arc<dyn PackageInstaller>,
    pub source: Arc<dyn ArtifactSource>,
    pub validator: Arc<dyn ConfigValidator>,
    pub prompter: Arc<dyn Prompter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Active,
    /// Installed and enabled but not yet active; TLS daemons may need longer on first start
    StartPending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstallReport {
    pub kind: ProtocolKind,
    pub versions: BTreeMap<Artifact, String>,
    pub activation: Activation,
    pub profile: ClientProfile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactChange {
    pub artifact: Artifact,
    pub from: String,
    pub to: String,
    /// Every installed kind whose record now carries `to`
    pub kinds: Vec<ProtocolKind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub kind: ProtocolKind,
    pub changes: Vec<ArtifactChange>,
}

impl UpdateOutcome {
    pub fn is_up_to_date(&self) -> bool {
        self.changes.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UninstallReport {
    pub removed: bool,
    /// Sub-steps that failed; cleanup continued past each of them
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CertRemoval {
    Ask,
    Keep,
}

/// Side effects of a partial install, undone if a later step fails.
#[derive(Default)]
struct Provisioned {
    fetched: Vec<PathBuf>,
    created_user: Option<String>,
    config_dir: Option<PathBuf>,
    units: Vec<String>,
}

pub struct Orchestrator {
    host: Host,
    layout: Layout,
    timings: Timings,
    store: StateStore,
    units: UnitManager,
    certs: CertificateManager,
}

impl Orchestrator {
    pub fn new(host: Host, layout: Layout, timings: Timings) -> Self {
        let store = StateStore::new(&layout.state_dir, &layout.config_root);
        let units = UnitManager::new(host.services.clone());
        let certs = CertificateManager::new(
            host.authority.clone(),
            host.accounts.clone(),
            &layout.webroot,
        );
        Self {
            host,
            layout,
            timings,
            store,
            units,
            certs,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn units(&self) -> &UnitManager {
        &self.units
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    fn paths(&self, kind: ProtocolKind) -> VariantPaths {
        VariantPaths::new(&self.layout.bin_dir, &self.layout.config_root, kind)
    }

    fn binary(&self, artifact: Artifact) -> PathBuf {
        self.layout.bin_dir.join(artifact.file_name())
    }

    fn backup(&self, artifact: Artifact) -> PathBuf {
        self.layout
            .bin_dir
            .join(format!("{}.bak", artifact.file_name()))
    }

    fn verify_timeout(&self, kind: ProtocolKind) -> Duration {
        if kind.requires_acme() {
            self.timings.tls_verify_timeout
        } else {
            self.timings.verify_timeout
        }
    }

    async fn lock(&self, kind: ProtocolKind) -> Result<ProtocolLock> {
        ProtocolLock::acquire(&self.layout.lock_dir, kind, LOCK_TIMEOUT).await
    }

    async fn cert_owner(&self, kind: ProtocolKind) -> CertOwner {
        CertOwner {
            user: kind.service_user().unwrap_or("root").to_string(),
            group: self.host.accounts.default_group().await,
            unit: kind.units()[0].to_string(),
        }
    }

    fn lease_for(&self, kind: ProtocolKind, domain: &str) -> CertificateLease {
        let paths = self.paths(kind);
        CertificateLease::new(
            domain,
            ValidationMode::Standalone,
            &paths.key_path(),
            &paths.cert_path(),
        )
    }

    pub fn record(&self, kind: ProtocolKind) -> Result<InstallationRecord> {
        self.store.load(kind)?.ok_or(ManagerError::NotInstalled(kind))
    }

    pub fn profile(&self, kind: ProtocolKind) -> Result<ClientProfile> {
        let record = self.record(kind)?;
        Ok(record.settings.client_profile(&record.server_ip))
    }

    pub async fn status(&self, kind: ProtocolKind) -> Result<ProtocolStatus> {
        let installed = self.store.is_installed(kind);
        let versions = match self.store.load(kind) {
            Ok(Some(record)) => record.versions,
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!(%kind, "Installation record unreadable: {}", e);
                BTreeMap::new()
            }
        };
        let mut units = Vec::new();
        if installed {
            for name in kind.units() {
                units.push((name.to_string(), self.units.status(name).await));
            }
        }
        Ok(ProtocolStatus {
            kind,
            installed,
            versions,
            units,
        })
    }

    pub async fn logs(&self, kind: ProtocolKind, lines: usize) -> Result<Vec<(String, String)>> {
        let mut out = Vec::new();
        for name in kind.units() {
            out.push((name.to_string(), self.units.journal(name, lines).await?));
        }
        Ok(out)
    }

    // ---------------------------------------------------------------------
    // Install
    // ---------------------------------------------------------------------

    pub async fn install(&self, params: &InstallParams) -> Result<InstallReport> {
        let kind = params.variant.kind();
        let settings = ProtocolSettings::generate(&params.variant)?;

        if self.store.is_installed(kind) {
            let question = format!(
                "{} is already installed. Reinstall? The current configuration will be destroyed.",
                kind.display_name()
            );
            if !self.host.prompter.confirm(&question, false) {
                return Err(ManagerError::Cancelled(format!("{} reinstall declined", kind)));
            }
            let report = self.remove_installation(kind, CertRemoval::Keep).await?;
            for warning in report.warnings {
                warn!(%kind, "{}", warning);
            }
        }

        let _lock = self.lock(kind).await?;
        info!(%kind, "Installing {}", kind.display_name());

        if kind.requires_acme() {
            ensure_commands(self.host.packages.as_ref(), &ACME_COMMANDS).await?;
        }

        let versions = self.resolve_versions(kind).await?;
        let mut done = Provisioned::default();

        let result = self.provision(kind, &settings, &versions, &mut done).await;
        let activation = match result {
            Ok(activation) => activation,
            Err(e) => {
                error!(%kind, "Install failed, cleaning up: {}", e);
                self.teardown(kind, done).await;
                return Err(e);
            }
        };

        let record = InstallationRecord::new(
            settings.clone(),
            params.server_ip.clone(),
            params.ip_version,
            versions.clone(),
        );
        if let Err(e) = self.store.save(&record) {
            error!(%kind, "Could not persist installation record: {}", e);
            self.teardown(kind, done).await;
            return Err(e);
        }

        info!(%kind, ?activation, "Install complete");
        Ok(InstallReport {
            kind,
            versions,
            activation,
            profile: settings.client_profile(&params.server_ip),
        })
    }

    /// Picks a version per artifact. A binary already on disk keeps the version
    /// another installation recorded for it; lookup failures fall back to defaults.
    async fn resolve_versions(&self, kind: ProtocolKind) -> Result<BTreeMap<Artifact, String>> {
        let mut versions = BTreeMap::new();
        for &artifact in kind.artifacts() {
            let present = self.binary(artifact).exists();
            let recorded = if present {
                self.recorded_version(artifact, kind)
            } else {
                None
            };

            let version = match recorded {
                Some(v) => v,
                None => match self.host.source.latest_version(artifact).await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(%artifact, "Version lookup failed, using {}: {}", artifact.default_version(), e);
                        artifact.default_version().to_string()
                    }
                },
            };

            let version = if kind == ProtocolKind::AnyTls && !version_at_least(&version, 1, 12) {
                if present {
                    return Err(ManagerError::Validation(format!(
                        "AnyTLS needs sing-box 1.12 or newer but {} is installed; update sing-box first",
                        version
                    )));
                }
                warn!(%artifact, "{} predates AnyTLS support, using {}", version, artifact.default_version());
                artifact.default_version().to_string()
            } else {
                version
            };
            versions.insert(artifact, version);
        }
        Ok(versions)
    }

    fn recorded_version(&self, artifact: Artifact, except: ProtocolKind) -> Option<String> {
        self.store
            .installed_kinds()
            .into_iter()
            .filter(|k| *k != except && k.uses(artifact))
            .filter_map(|k| self.store.load(k).ok().flatten())
            .find_map(|r| r.version(artifact).map(String::from))
    }

    async fn provision(
        &self,
        kind: ProtocolKind,
        settings: &ProtocolSettings,
        versions: &BTreeMap<Artifact, String>,
        done: &mut Provisioned,
    ) -> Result<Activation> {
        let paths = self.paths(kind);

        for (&artifact, version) in versions {
            let path = self.binary(artifact);
            if path.exists() {
                info!(%artifact, path = %path.display(), "Binary already present, skipping download");
                continue;
            }
            self.host.source.fetch(artifact, version, &path).await?;
            done.fetched.push(path);
        }

        // Issue before any service-dependent file exists.
        let lease = match settings.acme_domain() {
            Some(domain) => Some(
                self.certs
                    .issue(domain, &paths.key_path(), &paths.cert_path())
                    .await?,
            ),
            None => None,
        };

        let group = self.host.accounts.default_group().await;
        if let Some(user) = kind.service_user() {
            if !self.host.accounts.user_exists(user).await {
                self.host.accounts.ensure_user(user).await?;
                done.created_user = Some(user.to_string());
            }
        }

        fs::create_dir_all(&paths.config_dir)?;
        done.config_dir = Some(paths.config_dir.clone());

        if let Some(lease) = &lease {
            let owner = self.cert_owner(kind).await;
            self.certs.install_for(&owner, lease).await?;
        }

        let file = settings.synthesize(&paths)?;
        fsutil::write_atomic(&file.path, &file.contents, file.mode)?;
        if let Some(user) = kind.service_user() {
            self.host.accounts.chown(&paths.config_dir, user, &group).await?;
            self.host.accounts.chown(&file.path, user, &group).await?;
        }
        if let Some(artifact) = file.validator {
            self.host
                .validator
                .validate(&self.binary(artifact), &file.path)
                .await?;
        }

        for spec in settings.unit_specs(&paths, &group) {
            self.units.create(&spec).await?;
            done.units.push(spec.name.clone());
            self.units.enable(&spec.name).await?;
            self.units.start(&spec.name).await?;
        }

        let timeout = self.verify_timeout(kind);
        let mut inactive = Vec::new();
        for name in kind.units() {
            if !self
                .units
                .wait_active(name, timeout, self.timings.poll_interval)
                .await
            {
                inactive.push(*name);
            }
        }

        if inactive.is_empty() {
            return Ok(Activation::Active);
        }
        if kind.requires_acme() {
            warn!(%kind, units = ?inactive, "Not active yet; left installed, check `proxy-manager logs {}`", kind);
            return Ok(Activation::StartPending);
        }
        Err(ManagerError::unit(
            inactive[0],
            format!("did not become active within {}s", timeout.as_secs()),
        ))
    }

    /// Undoes a failed install. Nothing here may fail the caller.
    async fn teardown(&self, kind: ProtocolKind, done: Provisioned) {
        for name in done.units.iter().rev() {
            if let Err(e) = self.units.remove(name).await {
                warn!(%kind, unit = %name, "Cleanup: {}", e);
            }
        }
        if let Some(dir) = &done.config_dir {
            if let Err(e) = fsutil::remove_dir_if_exists(dir) {
                warn!(%kind, "Cleanup: remove {}: {}", dir.display(), e);
            }
        }
        for path in &done.fetched {
            if let Err(e) = fsutil::remove_file_if_exists(path) {
                warn!(%kind, "Cleanup: remove {}: {}", path.display(), e);
            }
        }
        if let Some(user) = &done.created_user {
            if let Err(e) = self.host.accounts.delete_user(user).await {
                warn!(%kind, "Cleanup: {}", e);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Update
    // ---------------------------------------------------------------------

    pub async fn update(&self, kind: ProtocolKind) -> Result<UpdateOutcome> {
        let record = self.record(kind)?;
        let mut changes = Vec::new();

        for &artifact in kind.artifacts() {
            let current = record
                .version(artifact)
                .unwrap_or(artifact.default_version())
                .to_string();
            let latest = self.host.source.latest_version(artifact).await?;
            if latest == current {
                info!(%kind, %artifact, version = %current, "Already up to date");
                continue;
            }
            changes.push(self.replace_artifact(artifact, &current, &latest).await?);
        }

        Ok(UpdateOutcome { kind, changes })
    }

    /// Backing-Up -> Replacing -> Verifying, or RollingBack on failure.
    async fn replace_artifact(&self, artifact: Artifact, from: &str, to: &str) -> Result<ArtifactChange> {
        let sharing: Vec<ProtocolKind> = self
            .store
            .installed_kinds()
            .into_iter()
            .filter(|k| k.uses(artifact))
            .collect();
        let _locks = ProtocolLock::acquire_all(&self.layout.lock_dir, &sharing, LOCK_TIMEOUT).await?;
        let owner = sharing.first().copied().unwrap_or(ProtocolKind::Singbox);

        let mut records = Vec::new();
        for &kind in &sharing {
            records.push(self.record(kind)?);
        }
        let units: Vec<&'static str> = sharing.iter().flat_map(|k| k.units().iter().copied()).collect();

        let mut was_active = Vec::new();
        for name in &units {
            if self.units.status(name).await.is_active() {
                was_active.push(*name);
            }
        }

        info!(%artifact, from, to, kinds = ?sharing, "Updating");
        for name in units.iter().rev() {
            if let Err(e) = self.units.stop(name).await {
                warn!(unit = name, "Stop before update failed: {}", e);
            }
        }

        let binary = self.binary(artifact);
        let backup = self.backup(artifact);
        if let Err(e) = stash_binary(&binary, &backup) {
            // Nothing was moved; only the stopped units need to come back.
            error!(%artifact, "Backing up {} failed: {}", binary.display(), e);
            self.resume(owner, &was_active).await?;
            return Err(e.into());
        }

        if let Err(e) = self.host.source.fetch(artifact, to, &binary).await {
            error!(%artifact, "Fetch failed, rolling back: {}", e);
            self.roll_back(owner, artifact, &was_active, None).await?;
            return Err(e);
        }

        let mut updated = Vec::new();
        for record in &records {
            let mut next = record.clone();
            next.versions.insert(artifact, to.to_string());
            next.touch();
            if let Err(e) = self.store.save(&next) {
                error!(%artifact, "Persisting new version failed, rolling back: {}", e);
                self.roll_back(owner, artifact, &was_active, Some(records.as_slice())).await?;
                return Err(e);
            }
            updated.push(next.kind());
        }

        for name in &units {
            if let Err(e) = self.units.start(name).await {
                warn!(unit = name, "Start after update failed: {}", e);
            }
        }

        let mut dead = None;
        for name in &was_active {
            let kind = sharing
                .iter()
                .copied()
                .find(|k| k.units().contains(name))
                .unwrap_or(owner);
            if !self
                .units
                .wait_active(name, self.verify_timeout(kind), self.timings.poll_interval)
                .await
            {
                dead = Some(*name);
                break;
            }
        }

        if let Some(name) = dead {
            error!(unit = name, %artifact, "New version failed liveness, rolling back to {}", from);
            for n in units.iter().rev() {
                if let Err(e) = self.units.stop(n).await {
                    warn!(unit = n, "Stop before rollback failed: {}", e);
                }
            }
            self.roll_back(owner, artifact, &was_active, Some(records.as_slice())).await?;
            return Err(ManagerError::unit(
                name,
                format!("{} {} did not stay active; restored {}", artifact, to, from),
            ));
        }

        if let Err(e) = fsutil::remove_file_if_exists(&backup) {
            warn!(%artifact, "Could not remove {}: {}", backup.display(), e);
        }
        info!(%artifact, to, "Update complete");
        Ok(ArtifactChange {
            artifact,
            from: from.to_string(),
            to: to.to_string(),
            kinds: updated,
        })
    }

    /// Restores the backup binary, optional records, and the units that were running.
    ///
    /// Units that were stopped before the update stay stopped.
    async fn roll_back(
        &self,
        owner: ProtocolKind,
        artifact: Artifact,
        was_active: &[&str],
        records: Option<&[InstallationRecord]>,
    ) -> Result<()> {
        let fail = |reason: String| ManagerError::Rollback {
            kind: owner,
            reason,
        };
        let binary = self.binary(artifact);
        let backup = self.backup(artifact);

        if backup.exists() {
            fsutil::remove_file_if_exists(&binary)
                .map_err(|e| fail(format!("remove {}: {}", binary.display(), e)))?;
            fs::rename(&backup, &binary)
                .map_err(|e| fail(format!("restore {}: {}", backup.display(), e)))?;
        } else if !binary.exists() {
            return Err(fail(format!("no backup of {} to restore", artifact)));
        }

        if let Some(records) = records {
            for record in records {
                self.store
                    .save(record)
                    .map_err(|e| fail(format!("restore {} record: {}", record.kind(), e)))?;
            }
        }

        self.resume(owner, was_active).await?;
        info!(%artifact, "Rollback complete");
        Ok(())
    }

    /// Starts `was_active` again and waits for each to come up.
    async fn resume(&self, owner: ProtocolKind, was_active: &[&str]) -> Result<()> {
        for name in was_active {
            if let Err(e) = self.units.start(name).await {
                warn!(unit = name, "Start during rollback failed: {}", e);
            }
        }
        for name in was_active {
            if !self
                .units
                .wait_active(name, self.timings.verify_timeout, self.timings.poll_interval)
                .await
            {
                return Err(ManagerError::Rollback {
                    kind: owner,
                    reason: format!("{} is not running after restoring the previous state", name),
                });
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Uninstall
    // ---------------------------------------------------------------------

    /// Asks for confirmation, then removes everything best-effort.
    pub async fn uninstall(&self, kind: ProtocolKind) -> Result<UninstallReport> {
        if !self.store.is_installed(kind) {
            info!(%kind, "Not installed, nothing to remove");
            return Ok(UninstallReport::default());
        }
        let question = format!("Uninstall {}?", kind.display_name());
        if !self.host.prompter.confirm(&question, false) {
            return Err(ManagerError::Cancelled(format!("{} uninstall declined", kind)));
        }
        self.remove_installation(kind, CertRemoval::Ask).await
    }

    async fn remove_installation(&self, kind: ProtocolKind, certs: CertRemoval) -> Result<UninstallReport> {
        let _lock = self.lock(kind).await?;
        let mut report = UninstallReport {
            removed: true,
            warnings: Vec::new(),
        };
        let mut note = |step: String| {
            warn!(%kind, "{}", step);
            report.warnings.push(step);
        };

        let record = match self.store.load(kind) {
            Ok(r) => r,
            Err(e) => {
                note(format!("installation record unreadable: {}", e));
                None
            }
        };

        if let Some(domain) = record.as_ref().and_then(|r| r.acme_domain()) {
            if certs == CertRemoval::Ask
                && self
                    .host
                    .prompter
                    .confirm(&format!("Also remove the certificate for {}?", domain), false)
            {
                if let Err(e) = self.certs.remove(domain).await {
                    note(format!("certificate removal: {}", e));
                }
            }
        }

        for name in kind.units().iter().rev() {
            if let Err(e) = self.units.remove(name).await {
                note(format!("unit {}: {}", name, e));
            }
        }

        let others: Vec<ProtocolKind> = self
            .store
            .installed_kinds()
            .into_iter()
            .filter(|k| *k != kind)
            .collect();
        for &artifact in kind.artifacts() {
            if others.iter().any(|k| k.uses(artifact)) {
                info!(%artifact, "Binary still used by another installation, keeping it");
                continue;
            }
            for path in [self.binary(artifact), self.backup(artifact)] {
                if let Err(e) = fsutil::remove_file_if_exists(&path) {
                    note(format!("remove {}: {}", path.display(), e));
                }
            }
        }

        let config_dir = self.paths(kind).config_dir;
        if let Err(e) = fsutil::remove_dir_if_exists(&config_dir) {
            note(format!("remove {}: {}", config_dir.display(), e));
        }

        let record_error = self.store.delete(kind).err();
        if let Some(e) = &record_error {
            note(format!("remove installation record: {}", e));
        }

        if let Some(user) = kind.service_user() {
            let shared = others.iter().any(|k| k.service_user() == Some(user));
            if !shared {
                if let Err(e) = self.host.accounts.delete_user(user).await {
                    note(format!("delete user {}: {}", user, e));
                }
            }
        }

        if let Some(e) = record_error {
            return Err(e);
        }
        info!(%kind, warnings = report.warnings.len(), "Uninstall complete");
        Ok(report)
    }

    // ---------------------------------------------------------------------
    // Certificate renewal
    // ---------------------------------------------------------------------

    pub async fn renew_certificate(&self, kind: ProtocolKind) -> Result<()> {
        let record = self.record(kind)?;
        let domain = record.acme_domain().ok_or_else(|| {
            ManagerError::Validation(format!("{} has no certificate domain on record", kind))
        })?;

        let _lock = self.lock(kind).await?;
        info!(%kind, domain, "Renewing certificate");
        let owner = self.cert_owner(kind).await;
        self.certs.renew(&owner, &self.lease_for(kind, domain)).await?;

        for name in kind.units() {
            self.units.restart(name).await?;
        }
        info!(%kind, "Certificate renewed");
        Ok(())
    }

    pub fn config_path(&self, kind: ProtocolKind) -> Option<PathBuf> {
        let record = self.store.load(kind).ok().flatten()?;
        record
            .settings
            .synthesize(&self.paths(kind))
            .ok()
            .map(|file| file.path)
    }
}

/// Moves the live binary aside as `.bak`, replacing any stale backup.
fn stash_binary(binary: &Path, backup: &Path) -> std::io::Result<()> {
    fsutil::remove_file_if_exists(backup)?;
    if binary.exists() {
        fs::rename(binary, backup)?;
    }
    Ok(())
}

/// One protocol kind driven through [`Installable`].
pub struct ManagedProtocol {
    kind: ProtocolKind,
    orchestrator: Arc<Orchestrator>,
}

impl ManagedProtocol {
    pub fn new(kind: ProtocolKind, orchestrator: Arc<Orchestrator>) -> Self {
        Self { kind, orchestrator }
    }
}

#[async_trait]
impl Installable for ManagedProtocol {
    fn kind(&self) -> ProtocolKind {
        self.kind
    }

    async fn status(&self) -> Result<ProtocolStatus> {
        self.orchestrator.status(self.kind).await
    }

    async fn install(&self, params: &InstallParams) -> Result<InstallReport> {
        if params.variant.kind() != self.kind {
            return Err(ManagerError::Validation(format!(
                "{} parameters given to {}",
                params.variant.kind(),
                self.kind
            )));
        }
        self.orchestrator.install(params).await
    }

    async fn update(&self) -> Result<UpdateOutcome> {
        self.orchestrator.update(self.kind).await
    }

    async fn uninstall(&self) -> Result<UninstallReport> {
        self.orchestrator.uninstall(self.kind).await
    }

    async fn renew_certificate(&self) -> Result<()> {
        if !self.kind.requires_acme() {
            return Err(ManagerError::Validation(format!(
                "{} does not use an ACME certificate",
                self.kind
            )));
        }
        self.orchestrator.renew_certificate(self.kind).await
    }
}
