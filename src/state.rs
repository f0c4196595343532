//! Installation records: one versioned JSON document per protocol kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{ManagerError, Result};
use crate::fsutil;
use crate::protocol::{Artifact, ProtocolKind};
use crate::synth::{
    AnyTlsSettings, Hysteria2Settings, IpVersion, PaddingProfile, ProtocolSettings,
    RealitySettings, SingboxSettings, SnellSettings, Ss2022Method,
};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum CertificateMode {
    None,
    Acme { domain: String },
}

/// Persisted witness of one installation. Presence means "installed".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationRecord {
    pub schema_version: u32,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub server_ip: String,
    pub ip_version: IpVersion,
    pub versions: BTreeMap<Artifact, String>,
    pub certificate: CertificateMode,
    pub settings: ProtocolSettings,
    /// Fields this version does not interpret, carried across rewrites
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl InstallationRecord {
    pub fn new(
        settings: ProtocolSettings,
        server_ip: String,
        ip_version: IpVersion,
        versions: BTreeMap<Artifact, String>,
    ) -> Self {
        let now = Utc::now();
        let certificate = match settings.acme_domain() {
            Some(domain) => CertificateMode::Acme {
                domain: domain.to_string(),
            },
            None => CertificateMode::None,
        };
        Self {
            schema_version: SCHEMA_VERSION,
            installed_at: now,
            updated_at: now,
            server_ip,
            ip_version,
            versions,
            certificate,
            settings,
            extra: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> ProtocolKind {
        self.settings.kind()
    }

    pub fn version(&self, artifact: Artifact) -> Option<&str> {
        self.versions.get(&artifact).map(String::as_str)
    }

    pub fn acme_domain(&self) -> Option<&str> {
        match &self.certificate {
            CertificateMode::Acme { domain } => Some(domain),
            CertificateMode::None => None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Builds a record from the older tool's KEY=VALUE file. Unknown keys go to `extra`.
    pub fn from_legacy(kind: ProtocolKind, mut fields: BTreeMap<String, String>) -> Result<Self> {
        let mut take = |key: &str| fields.remove(key);
        let server_ip = take("SERVER_IP").unwrap_or_default();
        let ip_version = match take("IP_VERSION").as_deref() {
            Some("6") => IpVersion::V6,
            _ => IpVersion::V4,
        };
        let _ = take("TYPE");

        let mut versions = BTreeMap::new();
        let settings = match kind {
            ProtocolKind::Snell => {
                versions.insert(
                    Artifact::SnellServer,
                    take("SNELL_VERSION").unwrap_or_else(|| Artifact::SnellServer.default_version().into()),
                );
                versions.insert(
                    Artifact::ShadowTls,
                    take("SHADOW_TLS_VERSION").unwrap_or_else(|| Artifact::ShadowTls.default_version().into()),
                );
                ProtocolSettings::Snell(SnellSettings {
                    snell_port: legacy_port(&mut take, "SNELL_PORT")?,
                    psk: legacy_required(&mut take, "SNELL_PSK")?,
                    shadow_tls_port: legacy_port(&mut take, "SHADOW_TLS_PORT")?,
                    shadow_tls_password: legacy_required(&mut take, "SHADOW_TLS_PASSWORD")?,
                    tls_domain: legacy_required(&mut take, "TLS_DOMAIN")?,
                })
            }
            ProtocolKind::Singbox => ProtocolSettings::Singbox(SingboxSettings {
                ss_port: legacy_port(&mut take, "SS_PORT")?,
                method: take("SS_METHOD")
                    .map(|m| m.parse::<Ss2022Method>())
                    .transpose()?
                    .unwrap_or_default(),
                password: legacy_required(&mut take, "SS_PASSWORD")?,
                shadow_tls_port: legacy_port(&mut take, "SHADOW_TLS_PORT")?,
                shadow_tls_password: legacy_required(&mut take, "SHADOW_TLS_PASSWORD")?,
                tls_domain: legacy_required(&mut take, "TLS_DOMAIN")?,
            }),
            ProtocolKind::Reality => ProtocolSettings::Reality(RealitySettings {
                port: legacy_port(&mut take, "PORT")?,
                uuid: legacy_required(&mut take, "UUID")?,
                private_key: legacy_required(&mut take, "PRIVATE_KEY")?,
                public_key: legacy_required(&mut take, "PUBLIC_KEY")?,
                short_id: legacy_required(&mut take, "SHORT_ID")?,
                server_name: legacy_required(&mut take, "SERVER_NAME")?,
            }),
            ProtocolKind::Hysteria2 => {
                let _ = take("CERT_TYPE");
                let obfs = take("ENABLE_OBFS").map(|v| v == "true").unwrap_or(false);
                let obfs_password = take("OBFS_PASSWORD").filter(|p| obfs && !p.is_empty());
                ProtocolSettings::Hysteria2(Hysteria2Settings {
                    port: legacy_port(&mut take, "HYSTERIA2_PORT")?,
                    password: legacy_required(&mut take, "HYSTERIA2_PASSWORD")?,
                    domain: legacy_required(&mut take, "HYSTERIA2_DOMAIN")?,
                    obfs_password,
                })
            }
            ProtocolKind::AnyTls => {
                let _ = take("CERT_TYPE");
                ProtocolSettings::AnyTls(AnyTlsSettings {
                    port: legacy_port(&mut take, "ANYTLS_PORT")?,
                    password: legacy_required(&mut take, "ANYTLS_PASSWORD")?,
                    domain: legacy_required(&mut take, "ANYTLS_DOMAIN")?,
                    padding: take("PADDING_NAME")
                        .map(|p| p.parse::<PaddingProfile>())
                        .transpose()?
                        .unwrap_or_default(),
                })
            }
        };
        if kind != ProtocolKind::Snell {
            versions.insert(
                Artifact::SingBox,
                take("SINGBOX_VERSION").unwrap_or_else(|| Artifact::SingBox.default_version().into()),
            );
        }

        let mut record = Self::new(settings, server_ip, ip_version, versions);
        record.extra = fields;
        Ok(record)
    }
}

fn legacy_required(take: &mut impl FnMut(&str) -> Option<String>, key: &str) -> Result<String> {
    take(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ManagerError::Validation(format!("legacy record is missing {}", key)))
}

fn legacy_port(take: &mut impl FnMut(&str) -> Option<String>, key: &str) -> Result<u16> {
    let raw = legacy_required(take, key)?;
    raw.trim()
        .parse()
        .map_err(|_| ManagerError::Validation(format!("legacy record has invalid {}: {}", key, raw)))
}

/// Parses `KEY=VALUE` lines. Blank lines and `#` comments are skipped; the
/// first `=` splits key from value.
pub fn parse_key_values(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Owns `<state_dir>/<kind>.json`. Only the orchestrator writes through it.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
    legacy_dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: &Path, legacy_dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            legacy_dir: legacy_dir.to_path_buf(),
        }
    }

    pub fn path(&self, kind: ProtocolKind) -> PathBuf {
        self.dir.join(format!("{}.json", kind.name()))
    }

    fn legacy_path(&self, kind: ProtocolKind) -> PathBuf {
        self.legacy_dir.join(kind.legacy_record_name())
    }

    pub fn is_installed(&self, kind: ProtocolKind) -> bool {
        self.path(kind).exists() || self.legacy_path(kind).exists()
    }

    pub fn installed_kinds(&self) -> Vec<ProtocolKind> {
        ProtocolKind::ALL
            .into_iter()
            .filter(|kind| self.is_installed(*kind))
            .collect()
    }

    /// Loads the record, migrating a legacy file on first sight.
    pub fn load(&self, kind: ProtocolKind) -> Result<Option<InstallationRecord>> {
        let path = self.path(kind);
        if path.exists() {
            let text = fs::read_to_string(&path)?;
            let probe: serde_json::Value = serde_json::from_str(&text)?;
            let schema = probe
                .get("schema_version")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            if schema > u64::from(SCHEMA_VERSION) {
                return Err(ManagerError::Validation(format!(
                    "{} uses schema version {}; this build understands up to {}",
                    path.display(),
                    schema,
                    SCHEMA_VERSION
                )));
            }
            let record: InstallationRecord = serde_json::from_value(probe)?;
            if record.kind() != kind {
                return Err(ManagerError::Validation(format!(
                    "{} holds a {} record",
                    path.display(),
                    record.kind()
                )));
            }
            return Ok(Some(record));
        }

        let legacy = self.legacy_path(kind);
        if legacy.exists() {
            return self.migrate(kind, &legacy).map(Some);
        }
        Ok(None)
    }

    fn migrate(&self, kind: ProtocolKind, legacy: &Path) -> Result<InstallationRecord> {
        info!(%kind, path = %legacy.display(), "Migrating legacy installation record");
        let fields = parse_key_values(&fs::read_to_string(legacy)?);
        let record = InstallationRecord::from_legacy(kind, fields)?;
        self.save(&record)?;

        let mut done = legacy.as_os_str().to_owned();
        done.push(".migrated");
        if let Err(e) = fs::rename(legacy, &done) {
            warn!(path = %legacy.display(), "Could not retire legacy record: {}", e);
        }
        Ok(record)
    }

    /// Atomic replace, mode 0600.
    pub fn save(&self, record: &InstallationRecord) -> Result<()> {
        let path = self.path(record.kind());
        let mut text = serde_json::to_string_pretty(record)?;
        text.push('\n');
        fsutil::write_atomic(&path, text.as_bytes(), 0o600)?;
        debug!(kind = %record.kind(), path = %path.display(), "Saved installation record");
        Ok(())
    }

    /// Removes the record (and any legacy file). Absent is success.
    pub fn delete(&self, kind: ProtocolKind) -> Result<()> {
        fsutil::remove_file_if_exists(&self.path(kind))?;
        fsutil::remove_file_if_exists(&self.legacy_path(kind))?;
        Ok(())
    }
}
