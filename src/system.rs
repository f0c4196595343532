//! Host capabilities: OS accounts, packages, backend config checks.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ManagerError, Result};
use crate::exec;

#[async_trait]
pub trait SystemAccounts: Send + Sync {
    async fn user_exists(&self, name: &str) -> bool;

    /// Creates a system account without a login shell unless it exists.
    async fn ensure_user(&self, name: &str) -> Result<()>;

    async fn delete_user(&self, name: &str) -> Result<()>;

    /// `nogroup` where it exists, otherwise `nobody`.
    async fn default_group(&self) -> String;

    async fn chown(&self, path: &Path, user: &str, group: &str) -> Result<()>;
}

/// Shells out to `id`, `useradd`, `userdel`, `getent` and `chown`.
pub struct HostAccounts {
    limit: Duration,
}

impl HostAccounts {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<exec::CommandOutput> {
        exec::run(program, args, self.limit)
            .await
            .map_err(|e| ManagerError::Account(format!("{}: {}", program, e)))
    }
}

#[async_trait]
impl SystemAccounts for HostAccounts {
    async fn user_exists(&self, name: &str) -> bool {
        self.run("id", &[name])
            .await
            .map(|out| out.success())
            .unwrap_or(false)
    }

    async fn ensure_user(&self, name: &str) -> Result<()> {
        if self.user_exists(name).await {
            debug!(user = name, "User already exists");
            return Ok(());
        }
        let out = self.run("useradd", &["-r", "-s", "/usr/sbin/nologin", name]).await?;
        if !out.success() {
            return Err(ManagerError::Account(format!(
                "useradd {}: {}",
                name,
                out.diagnostics()
            )));
        }
        info!(user = name, "Created system user");
        Ok(())
    }

    async fn delete_user(&self, name: &str) -> Result<()> {
        if !self.user_exists(name).await {
            return Ok(());
        }
        let out = self.run("userdel", &[name]).await?;
        if !out.success() {
            return Err(ManagerError::Account(format!(
                "userdel {}: {}",
                name,
                out.diagnostics()
            )));
        }
        info!(user = name, "Deleted system user");
        Ok(())
    }

    async fn default_group(&self) -> String {
        match self.run("getent", &["group", "nogroup"]).await {
            Ok(out) if out.success() => "nogroup".to_string(),
            _ => "nobody".to_string(),
        }
    }

    async fn chown(&self, path: &Path, user: &str, group: &str) -> Result<()> {
        let owner = format!("{}:{}", user, group);
        let target = path.display().to_string();
        let out = self.run("chown", &[owner.as_str(), target.as_str()]).await?;
        if !out.success() {
            return Err(ManagerError::Account(format!(
                "chown {} {}: {}",
                owner,
                target,
                out.diagnostics()
            )));
        }
        Ok(())
    }
}

#[async_trait]
pub trait PackageInstaller: Send + Sync {
    fn has_command(&self, command: &str) -> bool;

    async fn install(&self, packages: &[String]) -> Result<()>;
}

/// Installs whatever of `commands` is missing; fails with `Dependency` if any stays missing.
pub async fn ensure_commands(installer: &dyn PackageInstaller, commands: &[&str]) -> Result<()> {
    let missing: Vec<String> = commands
        .iter()
        .filter(|cmd| !installer.has_command(cmd))
        .map(|cmd| cmd.to_string())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    info!("Installing dependencies: {}", missing.join(", "));
    installer.install(&missing).await?;

    let still_missing: Vec<&str> = missing
        .iter()
        .map(String::as_str)
        .filter(|cmd| !installer.has_command(cmd))
        .collect();
    if !still_missing.is_empty() {
        return Err(ManagerError::Dependency(format!(
            "still missing after install: {}",
            still_missing.join(", ")
        )));
    }
    Ok(())
}

/// apt-get, yum, dnf or pacman, whichever is present first.
pub struct SystemPackages {
    limit: Duration,
}

impl SystemPackages {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }

    fn manager(&self) -> Option<(&'static str, &'static [&'static str])> {
        const MANAGERS: [(&str, &[&str]); 4] = [
            ("apt-get", &["install", "-y", "-qq"]),
            ("yum", &["install", "-y", "-q"]),
            ("dnf", &["install", "-y", "-q"]),
            ("pacman", &["-Sy", "--noconfirm"]),
        ];
        MANAGERS
            .into_iter()
            .find(|(name, _)| which::which(name).is_ok())
    }
}

#[async_trait]
impl PackageInstaller for SystemPackages {
    fn has_command(&self, command: &str) -> bool {
        which::which(command).is_ok()
    }

    async fn install(&self, packages: &[String]) -> Result<()> {
        let (manager, base) = self.manager().ok_or_else(|| {
            ManagerError::Dependency(format!(
                "no supported package manager; install manually: {}",
                packages.join(", ")
            ))
        })?;

        let mut args: Vec<&str> = base.to_vec();
        args.extend(packages.iter().map(String::as_str));
        let out = exec::run(manager, &args, self.limit)
            .await
            .map_err(|e| ManagerError::Dependency(format!("{}: {}", manager, e)))?;
        if !out.success() {
            return Err(ManagerError::Dependency(format!(
                "{} could not install {}: {}",
                manager,
                packages.join(", "),
                out.diagnostics()
            )));
        }
        Ok(())
    }
}

/// Backend "check config" subcommand.
#[async_trait]
pub trait ConfigValidator: Send + Sync {
    async fn validate(&self, binary: &Path, config: &Path) -> Result<()>;
}

/// Runs `<binary> check -c <config>`; a nonzero exit carries the backend's output.
pub struct BackendCheck {
    limit: Duration,
}

impl BackendCheck {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl ConfigValidator for BackendCheck {
    async fn validate(&self, binary: &Path, config: &Path) -> Result<()> {
        let target = config.display().to_string();
        let out = exec::run(binary, &["check", "-c", target.as_str()], self.limit)
            .await
            .map_err(|e| {
                ManagerError::Validation(format!("could not run {}: {}", binary.display(), e))
            })?;
        if !out.success() {
            return Err(ManagerError::Validation(format!(
                "{} rejected {}:\n{}{}",
                binary.display(),
                target,
                out.stdout,
                out.stderr
            )));
        }
        debug!(config = %target, "Configuration accepted by backend");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePackages;

    #[tokio::test]
    async fn installs_only_missing_commands() {
        let packages = FakePackages::with_commands(&["curl"]);
        ensure_commands(&packages, &["curl", "socat"]).await.unwrap();
        assert_eq!(packages.installed(), vec![vec!["socat".to_string()]]);

        ensure_commands(&packages, &["curl", "socat"]).await.unwrap();
        assert_eq!(packages.installed().len(), 1);
    }

    #[tokio::test]
    async fn unresolvable_dependency_is_reported() {
        let packages = FakePackages::with_commands(&[]);
        packages.refuse_installs();
        let err = ensure_commands(&packages, &["socat"]).await.unwrap_err();
        assert!(matches!(err, ManagerError::Dependency(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn backend_rejection_is_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let fake_backend = dir.path().join("sing-box");
        std::fs::write(
            &fake_backend,
            "#!/bin/sh\necho \"FATAL[0000] decode config at inbounds[0]: unknown field\" >&2\nexit 1\n",
        )
        .unwrap();
        crate::fsutil::set_mode(&fake_backend, 0o755).unwrap();

        let err = BackendCheck::new(Duration::from_secs(5))
            .validate(&fake_backend, &dir.path().join("config.json"))
            .await
            .unwrap_err();
        match err {
            ManagerError::Validation(msg) => {
                assert!(msg.contains("FATAL[0000] decode config at inbounds[0]: unknown field"))
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
