use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{
    check_domain, check_port, check_secret, render_json, sing_box_log_and_outbounds,
    ClientProfile, ConfigFile, VariantConfig, VariantPaths,
};
use crate::error::{ManagerError, Result};
use crate::protocol::{Artifact, ProtocolKind};
use crate::secrets;
use crate::unit::ServiceUnitSpec;

/// Fixed AnyTLS padding schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddingProfile {
    #[default]
    Default,
    Aggressive,
    Minimal,
}

impl PaddingProfile {
    pub const ALL: [PaddingProfile; 3] = [Self::Default, Self::Aggressive, Self::Minimal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Aggressive => "aggressive",
            Self::Minimal => "minimal",
        }
    }

    pub fn scheme(&self) -> &'static [&'static str] {
        match self {
            Self::Default => &[
                "stop=8",
                "0=30-30",
                "1=100-400",
                "2=400-500,c,500-1000,c,500-1000,c,500-1000,c,500-1000",
                "3=9-9,500-1000",
                "4=500-1000",
                "5=500-1000",
                "6=500-1000",
                "7=500-1000",
            ],
            Self::Aggressive => &[
                "stop=12",
                "0=50-100",
                "1=200-600",
                "2=500-800,c,800-1200,c,800-1200,c,800-1200,c,800-1200,c,800-1200",
                "3=15-15,600-1200",
                "4=600-1200",
                "5=600-1200",
                "6=600-1200",
                "7=600-1200",
                "8=600-1200",
                "9=600-1200",
                "10=600-1200",
                "11=600-1200",
            ],
            Self::Minimal => &["stop=4", "0=10-20", "1=50-150", "2=100-300", "3=5-5,200-400"],
        }
    }
}

impl fmt::Display for PaddingProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaddingProfile {
    type Err = ManagerError;

    /// Accepts the English names and the labels stored by the older tool.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "default" | "默认" => Ok(Self::Default),
            "aggressive" | "激进" => Ok(Self::Aggressive),
            "minimal" | "最小" => Ok(Self::Minimal),
            other => Err(ManagerError::Validation(format!(
                "unknown padding profile: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnyTlsSettings {
    pub port: u16,
    pub password: String,
    pub domain: String,
    #[serde(default)]
    pub padding: PaddingProfile,
}

impl AnyTlsSettings {
    pub fn generate(port: u16, domain: String, padding: PaddingProfile) -> Self {
        Self {
            port,
            password: secrets::password(32),
            domain,
            padding,
        }
    }
}

impl VariantConfig for AnyTlsSettings {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::AnyTls
    }

    fn validate(&self) -> Result<()> {
        check_port("port", self.port)?;
        check_secret("password", &self.password)?;
        check_domain("domain", &self.domain)
    }

    fn synthesize(&self, paths: &VariantPaths) -> Result<ConfigFile> {
        self.validate()?;
        let (log, outbounds) = sing_box_log_and_outbounds();
        let config = serde_json::json!({
            "log": log,
            "inbounds": [{
                "type": "anytls",
                "tag": "anytls-in",
                "listen": "::",
                "listen_port": self.port,
                "users": [{ "password": self.password }],
                "padding_scheme": self.padding.scheme(),
                "tls": {
                    "enabled": true,
                    "server_name": self.domain,
                    "key_path": paths.key_path(),
                    "certificate_path": paths.cert_path(),
                },
            }],
            "outbounds": outbounds,
        });
        Ok(ConfigFile {
            path: paths.config_dir.join("config.json"),
            contents: render_json(&config)?,
            mode: 0o600,
            validator: Some(Artifact::SingBox),
        })
    }

    fn unit_specs(&self, paths: &VariantPaths, group: &str) -> Vec<ServiceUnitSpec> {
        vec![ServiceUnitSpec::new(
            "anytls",
            "AnyTLS Service (sing-box)",
            format!(
                "{} run -c {}",
                paths.binary(Artifact::SingBox).display(),
                paths.config_dir.join("config.json").display()
            ),
        )
        .run_as("anytls", group)
        .bind_privileged_ports()
        .writable(&paths.config_dir)]
    }

    fn client_profile(&self, _server_ip: &str) -> ClientProfile {
        ClientProfile {
            surge: format!(
                "AnyTLS = anytls, {}, {}, password={}, sni={}",
                self.domain, self.port, self.password, self.domain
            ),
            share_link: None,
        }
    }

    fn acme_domain(&self) -> Option<&str> {
        Some(&self.domain)
    }
}
