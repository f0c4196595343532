use std::path::PathBuf;

#[derive(Debug, Clone, Copy)]
pub enum EnvVar {
    PmConfig,
    PmLog,
    RustLog,
    PmAssumeYes,
    GithubToken,
    Home,
}

impl EnvVar {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PmConfig => "PM_CONFIG",
            Self::PmLog => "PM_LOG",
            Self::RustLog => "RUST_LOG",
            Self::PmAssumeYes => "PM_ASSUME_YES",
            Self::GithubToken => "GITHUB_TOKEN",
            Self::Home => "HOME",
        }
    }
}

const DEFAULT_SETTINGS_PATH: &str = "/etc/proxy-manager/settings.toml";
const DEFAULT_LOG_FILTER: &str = "info";

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Settings file path ($PM_CONFIG or /etc/proxy-manager/settings.toml)
pub fn settings_path() -> PathBuf {
    let path = env_opt(EnvVar::PmConfig.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH));
    tracing::trace!(path = %path.display(), "Resolved settings path");
    path
}

/// Tracing filter directive ($PM_LOG > $RUST_LOG > "info")
pub fn log_filter() -> String {
    env_opt(EnvVar::PmLog.as_str())
        .or_else(|| env_opt(EnvVar::RustLog.as_str()))
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
}

/// Non-interactive confirmation ($PM_ASSUME_YES=1|true|yes|on)
pub fn assume_yes() -> bool {
    let val = env_opt(EnvVar::PmAssumeYes.as_str());
    let result = val.as_deref().map(is_truthy).unwrap_or(false);
    tracing::trace!(value = result, "PM_ASSUME_YES env var");
    result
}

/// Optional GitHub token to lift API rate limits ($GITHUB_TOKEN)
pub fn github_token() -> Option<String> {
    env_opt(EnvVar::GithubToken.as_str())
}

/// Home directory of the invoking user ($HOME, then the platform default)
pub fn home_dir() -> PathBuf {
    let dir = env_opt(EnvVar::Home.as_str())
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("/root"));
    tracing::trace!(dir = %dir.display(), "Resolved home directory");
    dir
}
