//! Config synthesis: typed per-variant settings into the exact on-disk
//! formats each backend reads, plus the unit specs and client profiles
//! derived from the same settings.

mod anytls;
mod hysteria2;
mod reality;
mod singbox;
mod snell;

pub use anytls::{AnyTlsSettings, PaddingProfile};
pub use hysteria2::Hysteria2Settings;
pub use reality::{RealitySettings, REALITY_SERVERS};
pub use singbox::{SingboxSettings, Ss2022Method};
pub use snell::SnellSettings;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ManagerError, Result};
use crate::protocol::{Artifact, ProtocolKind};
use crate::unit::ServiceUnitSpec;

/// Camouflage domains offered for Shadow-TLS handshakes.
pub const TLS_DOMAINS: [&str; 6] = [
    "gateway.icloud.com",
    "www.microsoft.com",
    "www.apple.com",
    "cloudflare.com",
    "www.amazon.com",
    "www.google.com",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpVersion {
    #[serde(rename = "4")]
    V4,
    #[serde(rename = "6")]
    V6,
}

impl IpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V4 => "4",
            Self::V6 => "6",
        }
    }
}

/// Operator input for one installation. Secrets are generated from it.
#[derive(Debug, Clone)]
pub struct InstallParams {
    pub server_ip: String,
    pub ip_version: IpVersion,
    pub variant: VariantParams,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VariantParams {
    Snell {
        snell_port: u16,
        shadow_tls_port: u16,
        tls_domain: String,
    },
    Singbox {
        ss_port: u16,
        shadow_tls_port: u16,
        method: Ss2022Method,
        tls_domain: String,
    },
    Reality {
        port: u16,
        server_name: String,
    },
    Hysteria2 {
        port: u16,
        domain: String,
        obfs: bool,
    },
    AnyTls {
        port: u16,
        domain: String,
        padding: PaddingProfile,
    },
}

impl VariantParams {
    pub fn kind(&self) -> ProtocolKind {
        match self {
            Self::Snell { .. } => ProtocolKind::Snell,
            Self::Singbox { .. } => ProtocolKind::Singbox,
            Self::Reality { .. } => ProtocolKind::Reality,
            Self::Hysteria2 { .. } => ProtocolKind::Hysteria2,
            Self::AnyTls { .. } => ProtocolKind::AnyTls,
        }
    }

    /// Defaults used by non-interactive installs.
    pub fn defaults(kind: ProtocolKind, domain: Option<String>) -> Self {
        let domain = domain.unwrap_or_default();
        match kind {
            ProtocolKind::Snell => Self::Snell {
                snell_port: 10086,
                shadow_tls_port: 8443,
                tls_domain: TLS_DOMAINS[0].to_string(),
            },
            ProtocolKind::Singbox => Self::Singbox {
                ss_port: 8388,
                shadow_tls_port: 9443,
                method: Ss2022Method::default(),
                tls_domain: TLS_DOMAINS[0].to_string(),
            },
            ProtocolKind::Reality => Self::Reality {
                port: 443,
                server_name: REALITY_SERVERS[0].to_string(),
            },
            ProtocolKind::Hysteria2 => Self::Hysteria2 {
                port: 443,
                domain,
                obfs: false,
            },
            ProtocolKind::AnyTls => Self::AnyTls {
                port: 443,
                domain,
                padding: PaddingProfile::default(),
            },
        }
    }
}

/// Where a variant's files live on disk.
#[derive(Debug, Clone)]
pub struct VariantPaths {
    pub bin_dir: PathBuf,
    pub config_dir: PathBuf,
}

impl VariantPaths {
    pub fn new(bin_dir: &Path, config_root: &Path, kind: ProtocolKind) -> Self {
        Self {
            bin_dir: bin_dir.to_path_buf(),
            config_dir: config_root.join(kind.config_dir_name()),
        }
    }

    pub fn binary(&self, artifact: Artifact) -> PathBuf {
        self.bin_dir.join(artifact.file_name())
    }

    pub fn cert_path(&self) -> PathBuf {
        self.config_dir.join("server.crt")
    }

    pub fn key_path(&self) -> PathBuf {
        self.config_dir.join("server.key")
    }
}

/// A synthesized file ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub path: PathBuf,
    pub contents: Vec<u8>,
    pub mode: u32,
    /// Backend whose `check` subcommand accepts this file
    pub validator: Option<Artifact>,
}

/// What an operator pastes into a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProfile {
    pub surge: String,
    pub share_link: Option<String>,
}

/// One settings record per variant, dispatched through `ProtocolSettings`.
pub trait VariantConfig {
    fn kind(&self) -> ProtocolKind;

    /// Rejects records a backend would crash-loop on
    fn validate(&self) -> Result<()>;

    fn synthesize(&self, paths: &VariantPaths) -> Result<ConfigFile>;

    fn unit_specs(&self, paths: &VariantPaths, group: &str) -> Vec<ServiceUnitSpec>;

    fn client_profile(&self, server_ip: &str) -> ClientProfile;

    fn acme_domain(&self) -> Option<&str> {
        None
    }
}

/// Persisted settings of one installation, secrets included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum ProtocolSettings {
    Snell(SnellSettings),
    Singbox(SingboxSettings),
    Reality(RealitySettings),
    Hysteria2(Hysteria2Settings),
    #[serde(rename = "anytls")]
    AnyTls(AnyTlsSettings),
}

impl ProtocolSettings {
    /// Validates operator input and generates fresh secrets.
    pub fn generate(params: &VariantParams) -> Result<Self> {
        let settings = match params.clone() {
            VariantParams::Snell {
                snell_port,
                shadow_tls_port,
                tls_domain,
            } => Self::Snell(SnellSettings::generate(
                snell_port,
                shadow_tls_port,
                tls_domain,
            )),
            VariantParams::Singbox {
                ss_port,
                shadow_tls_port,
                method,
                tls_domain,
            } => Self::Singbox(SingboxSettings::generate(
                ss_port,
                shadow_tls_port,
                method,
                tls_domain,
            )),
            VariantParams::Reality { port, server_name } => {
                Self::Reality(RealitySettings::generate(port, server_name))
            }
            VariantParams::Hysteria2 { port, domain, obfs } => {
                Self::Hysteria2(Hysteria2Settings::generate(port, domain, obfs))
            }
            VariantParams::AnyTls {
                port,
                domain,
                padding,
            } => Self::AnyTls(AnyTlsSettings::generate(port, domain, padding)),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn variant(&self) -> &dyn VariantConfig {
        match self {
            Self::Snell(s) => s,
            Self::Singbox(s) => s,
            Self::Reality(s) => s,
            Self::Hysteria2(s) => s,
            Self::AnyTls(s) => s,
        }
    }

    pub fn kind(&self) -> ProtocolKind {
        self.variant().kind()
    }

    pub fn validate(&self) -> Result<()> {
        self.variant().validate()
    }

    pub fn synthesize(&self, paths: &VariantPaths) -> Result<ConfigFile> {
        self.variant().synthesize(paths)
    }

    pub fn unit_specs(&self, paths: &VariantPaths, group: &str) -> Vec<ServiceUnitSpec> {
        self.variant().unit_specs(paths, group)
    }

    pub fn client_profile(&self, server_ip: &str) -> ClientProfile {
        self.variant().client_profile(server_ip)
    }

    pub fn acme_domain(&self) -> Option<&str> {
        self.variant().acme_domain()
    }
}

pub(crate) fn check_port(field: &str, port: u16) -> Result<()> {
    if port == 0 {
        return Err(ManagerError::Validation(format!(
            "{} must be between 1 and 65535",
            field
        )));
    }
    Ok(())
}

pub(crate) fn check_distinct_ports(a: (&str, u16), b: (&str, u16)) -> Result<()> {
    if a.1 == b.1 {
        return Err(ManagerError::Validation(format!(
            "{} and {} must differ (both {})",
            a.0, b.0, a.1
        )));
    }
    Ok(())
}

pub(crate) fn check_domain(field: &str, domain: &str) -> Result<()> {
    let domain = domain.trim();
    if domain.is_empty() {
        return Err(ManagerError::Validation(format!("{} is required", field)));
    }
    let valid = domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if !valid {
        return Err(ManagerError::Validation(format!(
            "{} is not a valid domain name: {}",
            field, domain
        )));
    }
    Ok(())
}

pub(crate) fn check_secret(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ManagerError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// sing-box JSON: sorted keys, two-space indent, no trailing newline.
pub(crate) fn render_json(value: &serde_json::Value) -> Result<Vec<u8>> {
    Ok(serde_json::to_string_pretty(value)?.into_bytes())
}

pub(crate) fn sing_box_log_and_outbounds() -> (serde_json::Value, serde_json::Value) {
    (
        serde_json::json!({ "level": "info", "timestamp": true }),
        serde_json::json!([{ "type": "direct", "tag": "direct" }]),
    )
}

/// Returns true when something already listens on `port` (TCP, all interfaces).
pub fn port_in_use(port: u16) -> bool {
    std::net::TcpListener::bind(("0.0.0.0", port)).is_err()
}
