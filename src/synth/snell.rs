use serde::{Deserialize, Serialize};

use super::{
    check_distinct_ports, check_port, check_secret, ClientProfile, ConfigFile, VariantConfig,
    VariantPaths,
};
use crate::error::Result;
use crate::protocol::{Artifact, ProtocolKind};
use crate::secrets;
use crate::unit::ServiceUnitSpec;

/// Snell bound to loopback, fronted by a Shadow-TLS v3 listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnellSettings {
    pub snell_port: u16,
    pub psk: String,
    pub shadow_tls_port: u16,
    pub shadow_tls_password: String,
    pub tls_domain: String,
}

impl SnellSettings {
    pub fn generate(snell_port: u16, shadow_tls_port: u16, tls_domain: String) -> Self {
        Self {
            snell_port,
            psk: secrets::password(16),
            shadow_tls_port,
            shadow_tls_password: secrets::password(16),
            tls_domain,
        }
    }

    fn config_path(paths: &VariantPaths) -> std::path::PathBuf {
        paths.config_dir.join("snell-server.conf")
    }
}

impl VariantConfig for SnellSettings {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Snell
    }

    fn validate(&self) -> Result<()> {
        check_port("snell port", self.snell_port)?;
        check_port("shadow-tls port", self.shadow_tls_port)?;
        check_distinct_ports(
            ("snell port", self.snell_port),
            ("shadow-tls port", self.shadow_tls_port),
        )?;
        check_secret("psk", &self.psk)?;
        check_secret("shadow-tls password", &self.shadow_tls_password)?;
        super::check_domain("tls domain", &self.tls_domain)
    }

    fn synthesize(&self, paths: &VariantPaths) -> Result<ConfigFile> {
        self.validate()?;
        let contents = format!(
            "[snell-server]\nlisten = 127.0.0.1:{}\npsk = {}\nipv6 = false\n",
            self.snell_port, self.psk
        );
        Ok(ConfigFile {
            path: Self::config_path(paths),
            contents: contents.into_bytes(),
            mode: 0o600,
            validator: None,
        })
    }

    fn unit_specs(&self, paths: &VariantPaths, group: &str) -> Vec<ServiceUnitSpec> {
        let snell = ServiceUnitSpec::new(
            "snell",
            "Snell Proxy Server",
            format!(
                "{} -c {}",
                paths.binary(Artifact::SnellServer).display(),
                Self::config_path(paths).display()
            ),
        )
        .run_as("snell", group)
        .writable(&paths.config_dir);

        let shadow_tls = ServiceUnitSpec::new(
            "shadow-tls",
            "Shadow-TLS Server",
            format!(
                "{} --fastopen --v3 server --listen [::]:{} --server 127.0.0.1:{} --tls {}:443 --password {}",
                paths.binary(Artifact::ShadowTls).display(),
                self.shadow_tls_port,
                self.snell_port,
                self.tls_domain,
                self.shadow_tls_password
            ),
        )
        .run_as("root", group)
        .bind_privileged_ports()
        .writable(&paths.config_dir);

        vec![snell, shadow_tls]
    }

    fn client_profile(&self, server_ip: &str) -> ClientProfile {
        ClientProfile {
            surge: format!(
                "Snell = snell, {}, {}, psk={}, version=4, shadow-tls-password={}, shadow-tls-sni={}, shadow-tls-version=3",
                server_ip, self.shadow_tls_port, self.psk, self.shadow_tls_password, self.tls_domain
            ),
            share_link: None,
        }
    }
}
