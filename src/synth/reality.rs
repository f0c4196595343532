use serde::{Deserialize, Serialize};

use super::{
    check_domain, check_port, check_secret, render_json, sing_box_log_and_outbounds,
    ClientProfile, ConfigFile, VariantConfig, VariantPaths,
};
use crate::error::{ManagerError, Result};
use crate::protocol::{Artifact, ProtocolKind};
use crate::secrets::{self, RealityKeyPair};
use crate::unit::ServiceUnitSpec;

/// Handshake targets Reality can impersonate.
pub const REALITY_SERVERS: [&str; 5] = [
    "www.apple.com",
    "www.microsoft.com",
    "www.amazon.com",
    "www.cloudflare.com",
    "gateway.icloud.com",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealitySettings {
    pub port: u16,
    pub uuid: String,
    pub private_key: String,
    pub public_key: String,
    pub short_id: String,
    pub server_name: String,
}

impl RealitySettings {
    pub fn generate(port: u16, server_name: String) -> Self {
        let keys = RealityKeyPair::generate();
        Self {
            port,
            uuid: secrets::uuid_v4(),
            private_key: keys.private_key,
            public_key: keys.public_key,
            short_id: secrets::hex_id(8),
            server_name,
        }
    }
}

impl VariantConfig for RealitySettings {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Reality
    }

    fn validate(&self) -> Result<()> {
        check_port("port", self.port)?;
        check_secret("uuid", &self.uuid)?;
        check_secret("private key", &self.private_key)?;
        check_secret("public key", &self.public_key)?;
        check_domain("server name", &self.server_name)?;
        if self.short_id.len() > 16 || !self.short_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ManagerError::Validation(format!(
                "short id must be at most 16 hex characters: {}",
                self.short_id
            )));
        }
        Ok(())
    }

    fn synthesize(&self, paths: &VariantPaths) -> Result<ConfigFile> {
        self.validate()?;
        let (log, outbounds) = sing_box_log_and_outbounds();
        let config = serde_json::json!({
            "log": log,
            "inbounds": [{
                "type": "vless",
                "tag": "vless-in",
                "listen": "::",
                "listen_port": self.port,
                "users": [{ "uuid": self.uuid, "flow": "xtls-rprx-vision" }],
                "tls": {
                    "enabled": true,
                    "server_name": self.server_name,
                    "reality": {
                        "enabled": true,
                        "handshake": { "server": self.server_name, "server_port": 443 },
                        "private_key": self.private_key,
                        "short_id": [self.short_id],
                    },
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
            "sing-box-reality",
            "Sing-box Reality Service",
            format!(
                "{} run -c {}",
                paths.binary(Artifact::SingBox).display(),
                paths.config_dir.join("config.json").display()
            ),
        )
        .run_as("root", group)
        .bind_privileged_ports()
        .writable(&paths.config_dir)]
    }

    fn client_profile(&self, server_ip: &str) -> ClientProfile {
        ClientProfile {
            surge: format!(
                "Reality = vless, {}, {}, username={}, sni={}, public-key={}, short-id={}, tfo=true, udp-relay=true",
                server_ip, self.port, self.uuid, self.server_name, self.public_key, self.short_id
            ),
            share_link: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn paths() -> VariantPaths {
        VariantPaths::new(Path::new("/usr/local/bin"), Path::new("/etc"), ProtocolKind::Reality)
    }

    #[test]
    fn generated_settings_validate() {
        let settings = RealitySettings::generate(443, REALITY_SERVERS[0].into());
        settings.validate().unwrap();
        assert_eq!(settings.short_id.len(), 16);
    }

    #[test]
    fn handshake_targets_server_name() {
        let settings = RealitySettings::generate(443, "www.microsoft.com".into());
        let file = settings.synthesize(&paths()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&file.contents).unwrap();
        let tls = &json["inbounds"][0]["tls"];
        assert_eq!(tls["server_name"], "www.microsoft.com");
        assert_eq!(tls["reality"]["handshake"]["server"], "www.microsoft.com");
        assert_eq!(tls["reality"]["short_id"][0], settings.short_id.as_str());
        assert_eq!(json["inbounds"][0]["users"][0]["flow"], "xtls-rprx-vision");
        assert!(!file.contents.ends_with(b"\n"));
    }

    #[test]
    fn bad_short_id_is_rejected() {
        let mut settings = RealitySettings::generate(443, "www.apple.com".into());
        settings.short_id = "not-hex!".into();
        assert!(matches!(
            settings.synthesize(&paths()),
            Err(ManagerError::Validation(_))
        ));
    }

    #[test]
    fn surge_line() {
        let settings = RealitySettings {
            port: 443,
            uuid: "b0c3f7a2-0000-4000-8000-000000000001".into(),
            private_key: "priv".into(),
            public_key: "pub".into(),
            short_id: "0123456789abcdef".into(),
            server_name: "www.apple.com".into(),
        };
        assert_eq!(
            settings.client_profile("198.51.100.1").surge,
            "Reality = vless, 198.51.100.1, 443, username=b0c3f7a2-0000-4000-8000-000000000001, sni=www.apple.com, public-key=pub, short-id=0123456789abcdef, tfo=true, udp-relay=true"
        );
    }
}
