//! ACME certificates for TLS-terminating protocols.
//!
//! acme.sh installs into a staging directory beside the live files. Staged
//! files are promoted over the live ones only once both are complete and
//! owned by the service user, so a failed renewal never touches the
//! certificate the daemon is using.

use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{ManagerError, Result};
use crate::exec;
use crate::fsutil;
use crate::system::SystemAccounts;

const STAGING_DIR: &str = ".acme-staging";
const KEY_MODE: u32 = 0o600;
const CERT_MODE: u32 = 0o644;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationMode {
    /// acme.sh binds port 80 itself
    Standalone,
    /// http-01 files served from an existing web root
    Webroot(PathBuf),
}

/// ACME client control plane.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Makes sure the client is available, installing it if needed.
    async fn ensure_client(&self, domain: &str) -> Result<()>;

    async fn issue(&self, domain: &str, mode: &ValidationMode) -> Result<()>;

    /// Copies the current certificate to the given paths and registers `reload_cmd`
    /// to run after every future renewal.
    async fn install_cert(
        &self,
        domain: &str,
        key_file: &Path,
        fullchain_file: &Path,
        reload_cmd: &str,
    ) -> Result<()>;

    /// Renewing a certificate that is not yet due succeeds.
    async fn renew(&self, domain: &str) -> Result<()>;

    async fn remove(&self, domain: &str) -> Result<()>;
}

/// acme.sh driven as an external process.
pub struct AcmeSh {
    home: PathBuf,
    limit: Duration,
}

impl AcmeSh {
    /// Every acme.sh invocation is killed after `limit`.
    pub fn new(home: &Path, limit: Duration) -> Self {
        Self {
            home: home.to_path_buf(),
            limit,
        }
    }

    fn script(&self) -> PathBuf {
        self.home.join("acme.sh")
    }

    async fn call(&self, domain: &str, args: &[&str]) -> Result<exec::CommandOutput> {
        exec::run(self.script(), args, self.limit)
            .await
            .map_err(|e| ManagerError::certificate(domain, format!("failed to run acme.sh: {}", e)))
    }

    async fn call_checked(&self, domain: &str, args: &[&str]) -> Result<()> {
        let out = self.call(domain, args).await?;
        if !out.success() {
            return Err(ManagerError::certificate(domain, out.diagnostics()));
        }
        Ok(())
    }
}

#[async_trait]
impl CertificateAuthority for AcmeSh {
    async fn ensure_client(&self, domain: &str) -> Result<()> {
        if self.script().exists() {
            return Ok(());
        }
        info!("Installing acme.sh");
        let out = exec::run_shell(
            &format!("curl -sL https://get.acme.sh | sh -s email=admin@{}", domain),
            self.limit,
        )
        .await
        .map_err(|e| ManagerError::Dependency(format!("acme.sh bootstrap: {}", e)))?;
        if !out.success() || !self.script().exists() {
            return Err(ManagerError::Dependency(format!(
                "acme.sh could not be installed: {}",
                out.diagnostics()
            )));
        }
        Ok(())
    }

    async fn issue(&self, domain: &str, mode: &ValidationMode) -> Result<()> {
        let webroot;
        let mut args = vec!["--issue", "-d", domain];
        match mode {
            ValidationMode::Standalone => args.push("--standalone"),
            ValidationMode::Webroot(path) => {
                webroot = path.display().to_string();
                args.extend(["--webroot", webroot.as_str()]);
            }
        }
        args.extend(["--keylength", "ec-256", "--force"]);
        self.call_checked(domain, &args).await
    }

    async fn install_cert(
        &self,
        domain: &str,
        key_file: &Path,
        fullchain_file: &Path,
        reload_cmd: &str,
    ) -> Result<()> {
        let key = key_file.display().to_string();
        let chain = fullchain_file.display().to_string();
        self.call_checked(
            domain,
            &[
                "--install-cert",
                "-d",
                domain,
                "--ecc",
                "--key-file",
                &key,
                "--fullchain-file",
                &chain,
                "--reloadcmd",
                reload_cmd,
            ],
        )
        .await
    }

    async fn renew(&self, domain: &str) -> Result<()> {
        let out = self
            .call(domain, &["--renew", "-d", domain, "--ecc", "--force"])
            .await?;
        match out.code {
            Some(0) => Ok(()),
            // acme.sh: skipped, not due yet
            Some(2) => {
                info!(domain, "Certificate is not due for renewal");
                Ok(())
            }
            _ => Err(ManagerError::certificate(domain, out.diagnostics())),
        }
    }

    async fn remove(&self, domain: &str) -> Result<()> {
        self.call_checked(domain, &["--remove", "-d", domain, "--ecc"])
            .await
    }
}

/// Identity the certificate is handed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertOwner {
    pub user: String,
    pub group: String,
    /// Unit restarted by the unattended renewal hook
    pub unit: String,
}

/// An issued certificate bound to a service's file locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateLease {
    pub domain: String,
    pub mode: ValidationMode,
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
}

impl CertificateLease {
    pub fn new(domain: &str, mode: ValidationMode, key_path: &Path, cert_path: &Path) -> Self {
        Self {
            domain: domain.to_string(),
            mode,
            key_path: key_path.to_path_buf(),
            cert_path: cert_path.to_path_buf(),
        }
    }

    fn staging_dir(&self) -> PathBuf {
        self.cert_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(STAGING_DIR)
    }

    fn staged_key(&self) -> PathBuf {
        self.staging_dir().join("server.key")
    }

    fn staged_cert(&self) -> PathBuf {
        self.staging_dir().join("server.crt")
    }
}

pub struct CertificateManager {
    authority: Arc<dyn CertificateAuthority>,
    accounts: Arc<dyn SystemAccounts>,
    webroot: PathBuf,
}

impl CertificateManager {
    pub fn new(
        authority: Arc<dyn CertificateAuthority>,
        accounts: Arc<dyn SystemAccounts>,
        webroot: &Path,
    ) -> Self {
        Self {
            authority,
            accounts,
            webroot: webroot.to_path_buf(),
        }
    }

    /// Issues a certificate: standalone first, webroot as fallback.
    pub async fn issue(
        &self,
        domain: &str,
        key_path: &Path,
        cert_path: &Path,
    ) -> Result<CertificateLease> {
        self.authority.ensure_client(domain).await?;

        info!(domain, "Requesting certificate (standalone)");
        let standalone = match self.authority.issue(domain, &ValidationMode::Standalone).await {
            Ok(()) => {
                return Ok(CertificateLease::new(
                    domain,
                    ValidationMode::Standalone,
                    key_path,
                    cert_path,
                ))
            }
            Err(e) => e,
        };

        warn!(domain, "Standalone validation failed, trying webroot: {}", standalone);
        fs::create_dir_all(&self.webroot)?;
        let mode = ValidationMode::Webroot(self.webroot.clone());
        match self.authority.issue(domain, &mode).await {
            Ok(()) => Ok(CertificateLease::new(domain, mode, key_path, cert_path)),
            Err(webroot) => Err(ManagerError::certificate(
                domain,
                format!(
                    "standalone and webroot validation both failed; make sure the domain resolves here and port 80 is reachable ({}; {})",
                    standalone, webroot
                ),
            )),
        }
    }

    /// Installs the issued certificate into staging and promotes it to the live paths.
    pub async fn install_for(&self, owner: &CertOwner, lease: &CertificateLease) -> Result<()> {
        let staging = lease.staging_dir();
        fs::create_dir_all(&staging)?;
        fsutil::set_mode(&staging, 0o700)?;

        self.authority
            .install_cert(
                &lease.domain,
                &lease.staged_key(),
                &lease.staged_cert(),
                &reload_command(owner, lease),
            )
            .await?;
        self.promote(owner, lease).await?;
        info!(domain = %lease.domain, user = %owner.user, "Certificate installed");
        Ok(())
    }

    /// Renews and promotes. The live files change only after both staged files are ready.
    pub async fn renew(&self, owner: &CertOwner, lease: &CertificateLease) -> Result<()> {
        self.authority.renew(&lease.domain).await?;
        self.install_for(owner, lease).await
    }

    pub async fn remove(&self, domain: &str) -> Result<()> {
        self.authority.remove(domain).await
    }

    async fn promote(&self, owner: &CertOwner, lease: &CertificateLease) -> Result<()> {
        let key = read_pem(&lease.domain, &lease.staged_key())?;
        let cert = read_pem(&lease.domain, &lease.staged_cert())?;

        let key_tmp = self.prepare(owner, &lease.key_path, &key, KEY_MODE).await?;
        let cert_tmp = self.prepare(owner, &lease.cert_path, &cert, CERT_MODE).await?;

        key_tmp
            .persist(&lease.key_path)
            .map_err(|e| ManagerError::certificate(&lease.domain, e.error.to_string()))?;
        cert_tmp
            .persist(&lease.cert_path)
            .map_err(|e| ManagerError::certificate(&lease.domain, e.error.to_string()))?;
        Ok(())
    }

    /// Temp sibling of `live` with final contents, mode and owner.
    async fn prepare(
        &self,
        owner: &CertOwner,
        live: &Path,
        contents: &[u8],
        mode: u32,
    ) -> Result<tempfile::NamedTempFile> {
        let dir = live.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(contents)?;
        tmp.as_file().sync_all()?;
        fsutil::set_mode(tmp.path(), mode)?;
        self.accounts
            .chown(tmp.path(), &owner.user, &owner.group)
            .await?;
        Ok(tmp)
    }
}

fn read_pem(domain: &str, path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(path).map_err(|e| {
        ManagerError::certificate(domain, format!("staged file {}: {}", path.display(), e))
    })?;
    if !bytes.windows(10).any(|w| w == b"-----BEGIN") {
        return Err(ManagerError::certificate(
            domain,
            format!("staged file {} is not PEM", path.display()),
        ));
    }
    Ok(bytes)
}

/// Shell hook acme.sh runs after unattended renewals; mirrors `promote`.
fn reload_command(owner: &CertOwner, lease: &CertificateLease) -> String {
    let key = lease.key_path.display();
    let cert = lease.cert_path.display();
    let staged_key = lease.staged_key();
    let staged_cert = lease.staged_cert();
    format!(
        "cp {sk} {key}.new && cp {sc} {cert}.new && chown {user}:{group} {key}.new {cert}.new && chmod {km:o} {key}.new && chmod {cm:o} {cert}.new && mv -f {key}.new {key} && mv -f {cert}.new {cert} && (systemctl restart {unit} 2>/dev/null || true)",
        sk = staged_key.display(),
        sc = staged_cert.display(),
        key = key,
        cert = cert,
        user = owner.user,
        group = owner.group,
        km = KEY_MODE,
        cm = CERT_MODE,
        unit = owner.unit,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeAccounts, FakeAuthority};

    fn owner() -> CertOwner {
        CertOwner {
            user: "hysteria2".into(),
            group: "nogroup".into(),
            unit: "hysteria2".into(),
        }
    }

    fn manager(dir: &Path, authority: Arc<FakeAuthority>, accounts: Arc<FakeAccounts>) -> CertificateManager {
        CertificateManager::new(authority, accounts, &dir.join("www"))
    }

    #[tokio::test]
    async fn falls_back_to_webroot() {
        let dir = tempfile::tempdir().unwrap();
        let authority = Arc::new(FakeAuthority::default());
        authority.fail_standalone();
        let certs = manager(dir.path(), authority.clone(), Arc::new(FakeAccounts::default()));

        let lease = certs
            .issue("example.org", &dir.path().join("server.key"), &dir.path().join("server.crt"))
            .await
            .unwrap();
        assert_eq!(lease.mode, ValidationMode::Webroot(dir.path().join("www")));
        assert!(dir.path().join("www").is_dir());
    }

    #[tokio::test]
    async fn both_modes_failing_is_a_certificate_error() {
        let dir = tempfile::tempdir().unwrap();
        let authority = Arc::new(FakeAuthority::default());
        authority.fail_standalone();
        authority.fail_webroot();
        let certs = manager(dir.path(), authority, Arc::new(FakeAccounts::default()));

        let err = certs
            .issue("example.org", &dir.path().join("k"), &dir.path().join("c"))
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Certificate { .. }));
    }

    #[tokio::test]
    async fn install_promotes_with_modes_and_owner() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("hysteria2");
        let authority = Arc::new(FakeAuthority::default());
        let accounts = Arc::new(FakeAccounts::default());
        let certs = manager(dir.path(), authority.clone(), accounts.clone());

        let lease = certs
            .issue("example.org", &config_dir.join("server.key"), &config_dir.join("server.crt"))
            .await
            .unwrap();
        certs.install_for(&owner(), &lease).await.unwrap();

        let key = fs::read_to_string(config_dir.join("server.key")).unwrap();
        assert!(key.contains("PRIVATE KEY"));
        #[cfg(unix)]
        {
            assert_eq!(fsutil::mode_of(&config_dir.join("server.key")).unwrap(), 0o600);
            assert_eq!(fsutil::mode_of(&config_dir.join("server.crt")).unwrap(), 0o644);
        }
        assert_eq!(accounts.chowned().len(), 2);
        assert!(accounts
            .chowned()
            .iter()
            .all(|(_, user, group)| user == "hysteria2" && group == "nogroup"));
        assert!(authority.reload_cmd().unwrap().contains("systemctl restart hysteria2"));
    }

    #[tokio::test]
    async fn failed_renewal_keeps_live_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("anytls");
        let authority = Arc::new(FakeAuthority::default());
        let certs = manager(dir.path(), authority.clone(), Arc::new(FakeAccounts::default()));
        let lease = certs
            .issue("example.org", &config_dir.join("server.key"), &config_dir.join("server.crt"))
            .await
            .unwrap();
        certs.install_for(&owner(), &lease).await.unwrap();
        let before = fs::read(config_dir.join("server.crt")).unwrap();

        authority.fail_renew();
        assert!(certs.renew(&owner(), &lease).await.is_err());
        assert_eq!(fs::read(config_dir.join("server.crt")).unwrap(), before);
    }

    #[tokio::test]
    async fn corrupt_staged_file_leaves_live_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("anytls");
        let authority = Arc::new(FakeAuthority::default());
        let certs = manager(dir.path(), authority.clone(), Arc::new(FakeAccounts::default()));
        let lease = certs
            .issue("example.org", &config_dir.join("server.key"), &config_dir.join("server.crt"))
            .await
            .unwrap();
        certs.install_for(&owner(), &lease).await.unwrap();
        let before = fs::read(config_dir.join("server.key")).unwrap();

        authority.write_garbage_on_install();
        assert!(certs.install_for(&owner(), &lease).await.is_err());
        assert_eq!(fs::read(config_dir.join("server.key")).unwrap(), before);
        let leftovers = fs::read_dir(&config_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn reload_hook_swaps_then_restarts() {
        let lease = CertificateLease::new(
            "example.org",
            ValidationMode::Standalone,
            Path::new("/etc/anytls/server.key"),
            Path::new("/etc/anytls/server.crt"),
        );
        let cmd = reload_command(&owner(), &lease);
        assert!(cmd.starts_with("cp /etc/anytls/.acme-staging/server.key /etc/anytls/server.key.new"));
        assert!(cmd.contains("chmod 600 /etc/anytls/server.key.new"));
        assert!(cmd.contains("chmod 644 /etc/anytls/server.crt.new"));
        assert!(cmd.contains("mv -f /etc/anytls/server.key.new /etc/anytls/server.key"));
        assert!(cmd.ends_with("(systemctl restart hysteria2 2>/dev/null || true)"));
    }

    #[cfg(unix)]
    fn fake_acme(dir: &Path, body: &str) -> AcmeSh {
        let script = dir.join("acme.sh");
        fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fsutil::set_mode(&script, 0o755).unwrap();
        AcmeSh::new(dir, Duration::from_millis(300))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stalled_issuance_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let acme = fake_acme(dir.path(), "sleep 20");

        let started = std::time::Instant::now();
        let err = acme
            .issue("example.org", &ValidationMode::Standalone)
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            ManagerError::Certificate { domain, reason } => {
                assert_eq!(domain, "example.org");
                assert!(reason.contains("timed out"), "{reason}");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn renewal_not_due_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let acme = fake_acme(dir.path(), "exit 2");
        acme.renew("example.org").await.unwrap();

        let failing = fake_acme(dir.path(), "echo rate limited >&2; exit 1");
        let err = failing.renew("example.org").await.unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }
}
