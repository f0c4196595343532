use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Operator-tunable settings, loaded from `settings.toml`.
///
/// Every field has a default so an absent or partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub paths: PathSettings,
    pub download: DownloadSettings,
    pub health: HealthSettings,
    pub verify: VerifySettings,
    pub commands: CommandSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathSettings {
    /// Where backend binaries are placed
    pub bin_dir: PathBuf,
    /// Parent of every per-protocol configuration directory
    pub config_root: PathBuf,
    /// Installation records
    pub state_dir: PathBuf,
    /// Per-protocol advisory lock files
    pub lock_dir: PathBuf,
    /// Service manager unit directory
    pub unit_dir: PathBuf,
    pub health_log: PathBuf,
    /// Fallback ACME http-01 webroot
    pub webroot: PathBuf,
    /// acme.sh installation directory (defaults to $HOME/.acme.sh)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acme_home: Option<PathBuf>,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            bin_dir: PathBuf::from("/usr/local/bin"),
            config_root: PathBuf::from("/etc"),
            state_dir: PathBuf::from("/etc/proxy-manager/installations"),
            lock_dir: PathBuf::from("/run/proxy-manager"),
            unit_dir: PathBuf::from("/lib/systemd/system"),
            health_log: PathBuf::from("/var/log/proxy-manager-health.log"),
            webroot: PathBuf::from("/var/www/html"),
            acme_home: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownloadSettings {
    pub retries: u32,
    pub retry_delay_secs: u64,
    pub timeout_secs: u64,
    /// Timeout for "latest version" lookups; a miss falls back to the pinned default
    pub lookup_timeout_secs: u64,
    pub github_api: String,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay_secs: 3,
            timeout_secs: 60,
            lookup_timeout_secs: 5,
            github_api: "https://api.github.com".to_string(),
        }
    }
}

impl DownloadSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthSettings {
    pub interval_secs: u64,
    /// Wait after a restart before re-checking status
    pub settle_secs: u64,
    /// Upper bound of skipped ticks for a unit whose restart keeps failing
    pub max_backoff_ticks: u32,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            settle_secs: 2,
            max_backoff_ticks: 8,
        }
    }
}

impl HealthSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerifySettings {
    pub timeout_secs: u64,
    /// TLS-terminating protocols may need longer on first start
    pub tls_timeout_secs: u64,
    pub poll_millis: u64,
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            tls_timeout_secs: 15,
            poll_millis: 1000,
        }
    }
}

impl VerifySettings {
    pub fn timings(&self) -> Timings {
        Timings {
            verify_timeout: Duration::from_secs(self.timeout_secs),
            tls_verify_timeout: Duration::from_secs(self.tls_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_millis),
        }
    }
}

/// Upper bounds for external commands (systemctl, useradd, acme.sh, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandSettings {
    pub timeout_secs: u64,
    /// acme.sh issuance and its bootstrap talk to the CA and may be slow
    pub acme_timeout_secs: u64,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            acme_timeout_secs: 300,
        }
    }
}

impl CommandSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn acme_timeout(&self) -> Duration {
        Duration::from_secs(self.acme_timeout_secs)
    }
}

/// Liveness polling bounds used by the lifecycle orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub verify_timeout: Duration,
    pub tls_verify_timeout: Duration,
    pub poll_interval: Duration,
}

/// Resolved filesystem layout shared by the orchestrator and the supervisor.
#[derive(Debug, Clone)]
pub struct Layout {
    pub bin_dir: PathBuf,
    pub config_root: PathBuf,
    pub state_dir: PathBuf,
    pub lock_dir: PathBuf,
    pub health_log: PathBuf,
    pub webroot: PathBuf,
}

impl Layout {
    /// Layout with every directory below `root`.
    pub fn under(root: &Path) -> Self {
        Self {
            bin_dir: root.join("bin"),
            config_root: root.join("etc"),
            state_dir: root.join("state"),
            lock_dir: root.join("locks"),
            health_log: root.join("log").join("health.log"),
            webroot: root.join("www"),
        }
    }
}

impl Settings {
    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::trace!(path = %path.display(), "Loading settings");

        if !path.exists() {
            tracing::trace!("Settings file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;

        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings from {}", path.display()))?;

        tracing::trace!(?settings, "Settings loaded");
        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory: {}", parent.display())
            })?;
        }

        let content =
            toml::to_string_pretty(self).context("Failed to serialize settings to TOML")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;

        tracing::trace!(path = %path.display(), "Settings saved");
        Ok(())
    }

    pub fn layout(&self) -> Layout {
        Layout {
            bin_dir: self.paths.bin_dir.clone(),
            config_root: self.paths.config_root.clone(),
            state_dir: self.paths.state_dir.clone(),
            lock_dir: self.paths.lock_dir.clone(),
            health_log: self.paths.health_log.clone(),
            webroot: self.paths.webroot.clone(),
        }
    }

    pub fn acme_home(&self) -> PathBuf {
        self.paths
            .acme_home
            .clone()
            .unwrap_or_else(|| crate::clienv::home_dir().join(".acme.sh"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.download.retries, 3);
        assert_eq!(settings.paths.unit_dir, PathBuf::from("/lib/systemd/system"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[health]\ninterval_secs = 60\n").unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.health.interval_secs, 60);
        assert_eq!(settings.health.settle_secs, 2);
        assert_eq!(settings.download, DownloadSettings::default());
        assert_eq!(settings.commands.timeout(), Duration::from_secs(60));
        assert_eq!(settings.commands.acme_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let mut settings = Settings::default();
        settings.download.retries = 5;
        settings.paths.acme_home = Some(PathBuf::from("/opt/acme"));

        settings.save_to(&path).unwrap();
        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.acme_home(), PathBuf::from("/opt/acme"));
    }
}
