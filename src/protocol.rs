use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{ManagerError, Result};
use crate::orchestrator::{InstallReport, UninstallReport, UpdateOutcome};
use crate::synth::InstallParams;
use crate::unit::UnitStatus;

/// The closed set of proxy backends this tool manages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Snell,
    Singbox,
    Reality,
    #[value(name = "hysteria2")]
    Hysteria2,
    #[value(name = "anytls")]
    AnyTls,
}

impl ProtocolKind {
    pub const ALL: [ProtocolKind; 5] = [
        ProtocolKind::Snell,
        ProtocolKind::Singbox,
        ProtocolKind::Reality,
        ProtocolKind::Hysteria2,
        ProtocolKind::AnyTls,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Snell => "snell",
            Self::Singbox => "singbox",
            Self::Reality => "reality",
            Self::Hysteria2 => "hysteria2",
            Self::AnyTls => "anytls",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Snell => "Snell + Shadow-TLS",
            Self::Singbox => "Sing-box (SS-2022 + Shadow-TLS)",
            Self::Reality => "VLESS Reality",
            Self::Hysteria2 => "Hysteria2",
            Self::AnyTls => "AnyTLS",
        }
    }

    /// Service units in start order. Stop order is the reverse.
    pub fn units(&self) -> &'static [&'static str] {
        match self {
            Self::Snell => &["snell", "shadow-tls"],
            Self::Singbox => &["sing-box"],
            Self::Reality => &["sing-box-reality"],
            Self::Hysteria2 => &["hysteria2"],
            Self::AnyTls => &["anytls"],
        }
    }

    pub fn artifacts(&self) -> &'static [Artifact] {
        match self {
            Self::Snell => &[Artifact::SnellServer, Artifact::ShadowTls],
            Self::Singbox | Self::Reality | Self::Hysteria2 | Self::AnyTls => &[Artifact::SingBox],
        }
    }

    /// Dedicated unprivileged account, if the primary daemon does not run as root.
    pub fn service_user(&self) -> Option<&'static str> {
        match self {
            Self::Snell => Some("snell"),
            Self::Singbox => Some("sing-box"),
            Self::Reality => None,
            Self::Hysteria2 => Some("hysteria2"),
            Self::AnyTls => Some("anytls"),
        }
    }

    pub fn config_dir_name(&self) -> &'static str {
        match self {
            Self::Snell => "snell",
            Self::Singbox => "sing-box",
            Self::Reality => "sing-box-reality",
            Self::Hysteria2 => "hysteria2",
            Self::AnyTls => "anytls",
        }
    }

    /// Terminates TLS itself and therefore needs an ACME certificate.
    pub fn requires_acme(&self) -> bool {
        matches!(self, Self::Hysteria2 | Self::AnyTls)
    }

    /// File name of the record written by the previous shell-based tool.
    pub fn legacy_record_name(&self) -> String {
        format!("{}-proxy-config.txt", self.name())
    }

    pub fn uses(&self, artifact: Artifact) -> bool {
        self.artifacts().contains(&artifact)
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProtocolKind {
    type Err = ManagerError;

    fn from_str(s: &str) -> Result<Self> {
        ProtocolKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ManagerError::Validation(format!("unknown protocol: {}", s)))
    }
}

/// A backend executable fetched from upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Artifact {
    SnellServer,
    ShadowTls,
    SingBox,
}

/// How an artifact is published upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packaging {
    /// Zip archive; the named member is the binary
    Zip { member: String },
    /// Gzipped tarball; the member path is relative to the archive root
    TarGz { member: String },
    /// The download is the binary itself
    Raw,
}

impl Artifact {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::SnellServer => "snell-server",
            Self::ShadowTls => "shadow-tls",
            Self::SingBox => "sing-box",
        }
    }

    /// Known-good version used when the remote lookup fails.
    pub fn default_version(&self) -> &'static str {
        match self {
            Self::SnellServer => "4.1.1",
            Self::ShadowTls => "v0.2.25",
            Self::SingBox => "v1.12.0",
        }
    }

    /// GitHub `owner/repo` publishing releases, or `None` when upstream has no version API.
    pub fn release_repo(&self) -> Option<&'static str> {
        match self {
            Self::SnellServer => None,
            Self::ShadowTls => Some("ihciah/shadow-tls"),
            Self::SingBox => Some("SagerNet/sing-box"),
        }
    }

    pub fn download_url(&self, version: &str, arch: HostArch) -> String {
        let number = version.trim_start_matches('v');
        match self {
            Self::SnellServer => {
                let arch = match arch {
                    HostArch::Amd64 => "amd64",
                    HostArch::Arm64 => "aarch64",
                };
                format!(
                    "https://dl.nssurge.com/snell/snell-server-v{}-linux-{}.zip",
                    number, arch
                )
            }
            Self::ShadowTls => {
                let arch = match arch {
                    HostArch::Amd64 => "x86_64",
                    HostArch::Arm64 => "aarch64",
                };
                format!(
                    "https://github.com/ihciah/shadow-tls/releases/download/{}/shadow-tls-{}-unknown-linux-musl",
                    version, arch
                )
            }
            Self::SingBox => format!(
                "https://github.com/SagerNet/sing-box/releases/download/{}/sing-box-{}-linux-{}.tar.gz",
                version,
                number,
                arch.as_str()
            ),
        }
    }

    pub fn packaging(&self, version: &str, arch: HostArch) -> Packaging {
        match self {
            Self::SnellServer => Packaging::Zip {
                member: "snell-server".to_string(),
            },
            Self::ShadowTls => Packaging::Raw,
            Self::SingBox => Packaging::TarGz {
                member: format!(
                    "sing-box-{}-linux-{}/sing-box",
                    version.trim_start_matches('v'),
                    arch.as_str()
                ),
            },
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostArch {
    Amd64,
    Arm64,
}

impl HostArch {
    pub fn detect() -> Result<Self> {
        match std::env::consts::ARCH {
            "x86_64" => Ok(Self::Amd64),
            "aarch64" => Ok(Self::Arm64),
            other => Err(ManagerError::UnsupportedPlatform(format!(
                "architecture {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
        }
    }
}

/// Returns true when `version` (optionally `v`-prefixed) is at least `major.minor`.
pub fn version_at_least(version: &str, major: u32, minor: u32) -> bool {
    let parts: Vec<u32> = version
        .trim_start_matches('v')
        .split(['.', '-'])
        .map_while(|s| s.parse().ok())
        .collect();

    match parts.as_slice() {
        [] => false,
        [maj] => *maj > major,
        [maj, min, ..] => *maj > major || (*maj == major && *min >= minor),
    }
}

/// Live view of one protocol kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolStatus {
    pub kind: ProtocolKind,
    pub installed: bool,
    pub versions: BTreeMap<Artifact, String>,
    pub units: Vec<(String, UnitStatus)>,
}

impl ProtocolStatus {
    pub fn is_healthy(&self) -> bool {
        self.installed && self.units.iter().all(|(_, s)| *s == UnitStatus::Active)
    }
}

/// Lifecycle surface of one protocol kind.
/// Every variant is driven through this trait; see `registry::ProtocolRegistry`.
#[async_trait]
pub trait Installable: Send + Sync {
    fn kind(&self) -> ProtocolKind;

    /// Installation presence plus live unit status
    async fn status(&self) -> Result<ProtocolStatus>;

    async fn install(&self, params: &InstallParams) -> Result<InstallReport>;

    async fn update(&self) -> Result<UpdateOutcome>;

    /// Best-effort removal; succeeds when nothing is installed
    async fn uninstall(&self) -> Result<UninstallReport>;

    async fn renew_certificate(&self) -> Result<()> {
        Err(ManagerError::Validation(format!(
            "{} does not use an ACME certificate",
            self.kind()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_by_name() {
        for kind in ProtocolKind::ALL {
            assert_eq!(kind.name().parse::<ProtocolKind>().unwrap(), kind);
        }
        assert_eq!("AnyTLS".parse::<ProtocolKind>().unwrap(), ProtocolKind::AnyTls);
        assert!("wireguard".parse::<ProtocolKind>().is_err());
    }

    #[test]
    fn sing_box_is_shared() {
        let users: Vec<_> = ProtocolKind::ALL
            .into_iter()
            .filter(|k| k.uses(Artifact::SingBox))
            .collect();
        assert_eq!(users.len(), 4);
        assert!(!ProtocolKind::Snell.uses(Artifact::SingBox));
    }

    #[test]
    fn only_tls_terminating_kinds_need_acme() {
        assert!(ProtocolKind::Hysteria2.requires_acme());
        assert!(ProtocolKind::AnyTls.requires_acme());
        assert!(!ProtocolKind::Reality.requires_acme());
        assert!(!ProtocolKind::Snell.requires_acme());
    }

    #[test]
    fn download_urls() {
        assert_eq!(
            Artifact::SingBox.download_url("v1.12.0", HostArch::Amd64),
            "https://github.com/SagerNet/sing-box/releases/download/v1.12.0/sing-box-1.12.0-linux-amd64.tar.gz"
        );
        assert_eq!(
            Artifact::SnellServer.download_url("4.1.1", HostArch::Arm64),
            "https://dl.nssurge.com/snell/snell-server-v4.1.1-linux-aarch64.zip"
        );
        assert_eq!(
            Artifact::SingBox.packaging("v1.12.3", HostArch::Arm64),
            Packaging::TarGz {
                member: "sing-box-1.12.3-linux-arm64/sing-box".into()
            }
        );
        assert_eq!(Artifact::ShadowTls.packaging("v0.2.25", HostArch::Amd64), Packaging::Raw);
    }

    #[test]
    fn version_threshold() {
        assert!(version_at_least("v1.12.0", 1, 12));
        assert!(version_at_least("1.13.0-beta.1", 1, 12));
        assert!(version_at_least("v2.0.0", 1, 12));
        assert!(!version_at_least("v1.11.9", 1, 12));
        assert!(!version_at_least("garbage", 1, 12));
    }
}
