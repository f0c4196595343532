use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{
    check_distinct_ports, check_domain, check_port, check_secret, render_json,
    sing_box_log_and_outbounds, ClientProfile, ConfigFile, VariantConfig, VariantPaths,
};
use crate::error::{ManagerError, Result};
use crate::protocol::{Artifact, ProtocolKind};
use crate::secrets;
use crate::unit::ServiceUnitSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Ss2022Method {
    #[default]
    #[serde(rename = "2022-blake3-aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "2022-blake3-aes-128-gcm")]
    Aes128Gcm,
    #[serde(rename = "2022-blake3-chacha20-poly1305")]
    Chacha20Poly1305,
}

impl Ss2022Method {
    pub const ALL: [Ss2022Method; 3] = [Self::Aes256Gcm, Self::Aes128Gcm, Self::Chacha20Poly1305];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aes256Gcm => "2022-blake3-aes-256-gcm",
            Self::Aes128Gcm => "2022-blake3-aes-128-gcm",
            Self::Chacha20Poly1305 => "2022-blake3-chacha20-poly1305",
        }
    }

    /// PSK length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            Self::Aes128Gcm => 16,
            Self::Aes256Gcm | Self::Chacha20Poly1305 => 32,
        }
    }
}

impl fmt::Display for Ss2022Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Ss2022Method {
    type Err = ManagerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s.trim())
            .ok_or_else(|| ManagerError::Validation(format!("unsupported SS-2022 method: {}", s)))
    }
}

/// Shadowsocks-2022 on loopback behind a Shadow-TLS v3 inbound, both in one sing-box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingboxSettings {
    pub ss_port: u16,
    pub method: Ss2022Method,
    pub password: String,
    pub shadow_tls_port: u16,
    pub shadow_tls_password: String,
    pub tls_domain: String,
}

impl SingboxSettings {
    pub fn generate(
        ss_port: u16,
        shadow_tls_port: u16,
        method: Ss2022Method,
        tls_domain: String,
    ) -> Self {
        Self {
            ss_port,
            method,
            password: secrets::base64_key(method.key_len()),
            shadow_tls_port,
            shadow_tls_password: secrets::password(16),
            tls_domain,
        }
    }
}

impl VariantConfig for SingboxSettings {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Singbox
    }

    fn validate(&self) -> Result<()> {
        check_port("shadowsocks port", self.ss_port)?;
        check_port("shadow-tls port", self.shadow_tls_port)?;
        check_distinct_ports(
            ("shadowsocks port", self.ss_port),
            ("shadow-tls port", self.shadow_tls_port),
        )?;
        check_secret("shadowsocks password", &self.password)?;
        check_secret("shadow-tls password", &self.shadow_tls_password)?;
        check_domain("tls domain", &self.tls_domain)
    }

    fn synthesize(&self, paths: &VariantPaths) -> Result<ConfigFile> {
        self.validate()?;
        let (log, outbounds) = sing_box_log_and_outbounds();
        let config = serde_json::json!({
            "log": log,
            "inbounds": [
                {
                    "type": "shadowsocks",
                    "tag": "ss-in",
                    "listen": "127.0.0.1",
                    "listen_port": self.ss_port,
                    "method": self.method.as_str(),
                    "password": self.password,
                    "tcp_fast_open": true,
                    "udp_fragment": true,
                },
                {
                    "type": "shadowtls",
                    "tag": "st-in",
                    "listen": "::",
                    "listen_port": self.shadow_tls_port,
                    "version": 3,
                    "users": [{ "name": "user1", "password": self.shadow_tls_password }],
                    "handshake": { "server": self.tls_domain, "server_port": 443 },
                    "strict_mode": true,
                    "detour": "ss-in",
                },
            ],
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
            "sing-box",
            "Sing-box Service",
            format!(
                "{} run -c {}",
                paths.binary(Artifact::SingBox).display(),
                paths.config_dir.join("config.json").display()
            ),
        )
        .run_as("sing-box", group)
        .writable(&paths.config_dir)]
    }

    fn client_profile(&self, server_ip: &str) -> ClientProfile {
        ClientProfile {
            surge: format!(
                "Proxy = ss, {}, {}, encrypt-method={}, password={}, shadow-tls-password={}, shadow-tls-sni={}, shadow-tls-version=3",
                server_ip,
                self.shadow_tls_port,
                self.method,
                self.password,
                self.shadow_tls_password,
                self.tls_domain
            ),
            share_link: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use std::path::Path;

    fn fixture() -> SingboxSettings {
        SingboxSettings {
            ss_port: 8388,
            method: Ss2022Method::Aes128Gcm,
            password: "AAAAAAAAAAAAAAAAAAAAAA==".into(),
            shadow_tls_port: 9443,
            shadow_tls_password: "stlspass".into(),
            tls_domain: "gateway.icloud.com".into(),
        }
    }

    fn paths() -> VariantPaths {
        VariantPaths::new(Path::new("/usr/local/bin"), Path::new("/etc"), ProtocolKind::Singbox)
    }

    #[test]
    fn config_is_sorted_pretty_json() {
        let file = fixture().synthesize(&paths()).unwrap();
        let text = String::from_utf8(file.contents).unwrap();
        let expected = r#"{
  "inbounds": [
    {
      "listen": "127.0.0.1",
      "listen_port": 8388,
      "method": "2022-blake3-aes-128-gcm",
      "password": "AAAAAAAAAAAAAAAAAAAAAA==",
      "tag": "ss-in",
      "tcp_fast_open": true,
      "type": "shadowsocks",
      "udp_fragment": true
    },
    {
      "detour": "ss-in",
      "handshake": {
        "server": "gateway.icloud.com",
        "server_port": 443
      },
      "listen": "::",
      "listen_port": 9443,
      "strict_mode": true,
      "tag": "st-in",
      "type": "shadowtls",
      "users": [
        {
          "name": "user1",
          "password": "stlspass"
        }
      ],
      "version": 3
    }
  ],
  "log": {
    "level": "info",
    "timestamp": true
  },
  "outbounds": [
    {
      "tag": "direct",
      "type": "direct"
    }
  ]
}"#;
        assert_eq!(text, expected);
        assert_eq!(file.validator, Some(Artifact::SingBox));
        assert_eq!(file.path, Path::new("/etc/sing-box/config.json"));
    }

    #[test]
    fn key_length_follows_method() {
        for method in Ss2022Method::ALL {
            let settings = SingboxSettings::generate(8388, 9443, method, "www.apple.com".into());
            let key = base64::engine::general_purpose::STANDARD
                .decode(&settings.password)
                .unwrap();
            assert_eq!(key.len(), method.key_len());
        }
    }

    #[test]
    fn method_parses_from_wire_name() {
        assert_eq!(
            "2022-blake3-chacha20-poly1305".parse::<Ss2022Method>().unwrap(),
            Ss2022Method::Chacha20Poly1305
        );
        assert!("aes-256-gcm".parse::<Ss2022Method>().is_err());
    }

    #[test]
    fn unit_runs_unprivileged() {
        let units = fixture().unit_specs(&paths(), "nogroup");
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].user, "sing-box");
        assert_eq!(
            units[0].exec_start,
            "/usr/local/bin/sing-box run -c /etc/sing-box/config.json"
        );
    }
}
