use serde::{Deserialize, Serialize};

use super::{
    check_domain, check_port, check_secret, render_json, sing_box_log_and_outbounds,
    ClientProfile, ConfigFile, VariantConfig, VariantPaths,
};
use crate::error::Result;
use crate::protocol::{Artifact, ProtocolKind};
use crate::secrets;
use crate::unit::ServiceUnitSpec;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hysteria2Settings {
    pub port: u16,
    pub password: String,
    pub domain: String,
    /// Salamander obfuscation password; `None` disables obfuscation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obfs_password: Option<String>,
}

impl Hysteria2Settings {
    pub fn generate(port: u16, domain: String, obfs: bool) -> Self {
        Self {
            port,
            password: secrets::password(16),
            domain,
            obfs_password: obfs.then(|| secrets::password(16)),
        }
    }
}

impl VariantConfig for Hysteria2Settings {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Hysteria2
    }

    fn validate(&self) -> Result<()> {
        check_port("port", self.port)?;
        check_secret("password", &self.password)?;
        check_domain("domain", &self.domain)?;
        if let Some(obfs) = &self.obfs_password {
            check_secret("obfs password", obfs)?;
        }
        Ok(())
    }

    fn synthesize(&self, paths: &VariantPaths) -> Result<ConfigFile> {
        self.validate()?;
        let mut inbound = serde_json::json!({
            "type": "hysteria2",
            "tag": "hy2-in",
            "listen": "::",
            "listen_port": self.port,
            "users": [{ "name": "user1", "password": self.password }],
            "tls": {
                "enabled": true,
                "server_name": self.domain,
                "key_path": paths.key_path(),
                "certificate_path": paths.cert_path(),
            },
        });
        if let Some(obfs) = &self.obfs_password {
            inbound["obfs"] = serde_json::json!({ "type": "salamander", "password": obfs });
        }

        let (log, outbounds) = sing_box_log_and_outbounds();
        let config = serde_json::json!({
            "log": log,
            "inbounds": [inbound],
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
            "hysteria2",
            "Hysteria2 Service (sing-box)",
            format!(
                "{} run -c {}",
                paths.binary(Artifact::SingBox).display(),
                paths.config_dir.join("config.json").display()
            ),
        )
        .run_as("hysteria2", group)
        .bind_privileged_ports()
        .writable(&paths.config_dir)]
    }

    fn client_profile(&self, _server_ip: &str) -> ClientProfile {
        let mut surge = format!(
            "Hysteria2 = hysteria2, {}, {}, password={}, sni={}",
            self.domain, self.port, self.password, self.domain
        );
        let mut link = format!(
            "hysteria2://{}@{}:{}?sni={}",
            self.password, self.domain, self.port, self.domain
        );
        if let Some(obfs) = &self.obfs_password {
            surge.push_str(&format!(", obfs=salamander, obfs-password={}", obfs));
            link.push_str(&format!("&obfs=salamander&obfs-password={}", obfs));
        }
        link.push_str(&format!("#Hysteria2-{}", self.domain));

        ClientProfile {
            surge,
            share_link: Some(link),
        }
    }

    fn acme_domain(&self) -> Option<&str> {
        Some(&self.domain)
    }
}
