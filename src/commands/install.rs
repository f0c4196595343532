use anyhow::bail;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Select};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

use proxy_manager::orchestrator::{Activation, InstallReport};
use proxy_manager::synth::{
    port_in_use, InstallParams, IpVersion, PaddingProfile, Ss2022Method, VariantParams,
    REALITY_SERVERS, TLS_DOMAINS,
};
use proxy_manager::{ManagerError, ProtocolKind};

use super::Context;

const IP_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) struct InstallArgs {
    pub kind: Option<ProtocolKind>,
    pub domain: Option<String>,
    pub port: Option<u16>,
    pub ipv6: bool,
    pub server_ip: Option<String>,
}

pub(crate) async fn cmd_install(ctx: &Context, args: InstallArgs) -> anyhow::Result<()> {
    let kind = match args.kind {
        Some(kind) => kind,
        None if ctx.yes => bail!("Name the protocol to install when using --yes"),
        None => select_kind()?,
    };

    let (server_ip, ip_version) = match args.server_ip {
        Some(ip) => {
            let parsed: IpAddr = ip
                .parse()
                .map_err(|_| anyhow::anyhow!("--server-ip is not an IP address: {}", ip))?;
            let version = if parsed.is_ipv6() { IpVersion::V6 } else { IpVersion::V4 };
            (ip, version)
        }
        None => match detect_public_ip(args.ipv6).await {
            Some(found) => found,
            None if ctx.yes => bail!("Could not detect the public IP; pass --server-ip"),
            None => prompt_server_ip()?,
        },
    };
    println!("Server address: {}", server_ip);

    let variant = if ctx.yes {
        let mut variant = VariantParams::defaults(kind, args.domain);
        if let Some(port) = args.port {
            set_primary_port(&mut variant, port);
        }
        variant
    } else {
        collect_variant(kind, args.domain, args.port)?
    };

    let params = InstallParams {
        server_ip,
        ip_version,
        variant,
    };
    match ctx.installer().install(&params).await {
        Ok(report) => {
            print_report(&report);
            Ok(())
        }
        Err(ManagerError::Cancelled(_)) => {
            println!("Install cancelled.");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_report(report: &InstallReport) {
    println!();
    for (artifact, version) in &report.versions {
        println!("  {:<13} {}", format!("{}:", artifact), version);
    }
    if report.activation == Activation::StartPending {
        println!(
            "  The service is not active yet; check `proxy-manager logs {}` in a minute.",
            report.kind
        );
    }
    println!();
    println!("Surge:");
    println!("  {}", report.profile.surge);
    if let Some(link) = &report.profile.share_link {
        println!("Share link:");
        println!("  {}", link);
    }
}

/// Public-facing port: Shadow-TLS for the Snell and SS-2022 stacks.
fn set_primary_port(variant: &mut VariantParams, new: u16) {
    match variant {
        VariantParams::Snell { shadow_tls_port, .. } => *shadow_tls_port = new,
        VariantParams::Singbox { shadow_tls_port, .. } => *shadow_tls_port = new,
        VariantParams::Reality { port, .. }
        | VariantParams::Hysteria2 { port, .. }
        | VariantParams::AnyTls { port, .. } => *port = new,
    }
}

/// ipify over the preferred family first, then the other one.
async fn detect_public_ip(prefer_v6: bool) -> Option<(String, IpVersion)> {
    let v4 = ("https://api.ipify.org", IpVersion::V4);
    let v6 = ("https://api6.ipify.org", IpVersion::V6);
    let order = if prefer_v6 { [v6, v4] } else { [v4, v6] };

    let client = reqwest::Client::builder()
        .timeout(IP_LOOKUP_TIMEOUT)
        .build()
        .ok()?;
    for (url, version) in order {
        match lookup(&client, url).await {
            Ok(ip) => return Some((ip, version)),
            Err(e) => debug!(url, "Public IP lookup failed: {}", e),
        }
    }
    warn!("Could not detect the public IP address");
    None
}

async fn lookup(client: &reqwest::Client, url: &str) -> anyhow::Result<String> {
    let body = client.get(url).send().await?.error_for_status()?.text().await?;
    let ip = body.trim();
    ip.parse::<IpAddr>()?;
    Ok(ip.to_string())
}

fn theme() -> ColorfulTheme {
    ColorfulTheme::default()
}

fn select_kind() -> anyhow::Result<ProtocolKind> {
    let items: Vec<&str> = ProtocolKind::ALL.iter().map(|k| k.display_name()).collect();
    let idx = Select::with_theme(&theme())
        .with_prompt("Protocol to install")
        .items(&items)
        .default(0)
        .interact()?;
    Ok(ProtocolKind::ALL[idx])
}

fn prompt_server_ip() -> anyhow::Result<(String, IpVersion)> {
    let ip: String = Input::with_theme(&theme())
        .with_prompt("Public IP address of this server")
        .validate_with(|input: &String| -> Result<(), &'static str> {
            input
                .trim()
                .parse::<IpAddr>()
                .map(|_| ())
                .map_err(|_| "not an IP address")
        })
        .interact_text()?;
    let ip = ip.trim().to_string();
    let version = if ip.contains(':') { IpVersion::V6 } else { IpVersion::V4 };
    Ok((ip, version))
}

/// Asks for a port, warning about ports something already listens on.
fn prompt_port(label: &str, default: u16) -> anyhow::Result<u16> {
    loop {
        let port: u16 = Input::with_theme(&theme())
            .with_prompt(label)
            .default(default)
            .validate_with(|p: &u16| -> Result<(), &'static str> {
                if *p == 0 {
                    Err("port must be between 1 and 65535")
                } else {
                    Ok(())
                }
            })
            .interact_text()?;
        if !port_in_use(port) {
            return Ok(port);
        }
        let keep = Confirm::with_theme(&theme())
            .with_prompt(format!("Port {} is already in use. Use it anyway?", port))
            .default(false)
            .interact()?;
        if keep {
            return Ok(port);
        }
    }
}

fn select_from(label: &str, items: &[&str]) -> anyhow::Result<String> {
    let idx = Select::with_theme(&theme())
        .with_prompt(label)
        .items(items)
        .default(0)
        .interact()?;
    Ok(items[idx].to_string())
}

fn prompt_domain(given: Option<String>) -> anyhow::Result<String> {
    if let Some(domain) = given {
        return Ok(domain);
    }
    let domain: String = Input::with_theme(&theme())
        .with_prompt("Domain pointing at this server (for the certificate)")
        .interact_text()?;
    Ok(domain.trim().to_string())
}

fn collect_variant(
    kind: ProtocolKind,
    domain: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<VariantParams> {
    let defaults = VariantParams::defaults(kind, None);
    let variant = match defaults {
        VariantParams::Snell {
            snell_port,
            shadow_tls_port,
            ..
        } => VariantParams::Snell {
            snell_port: prompt_port("Snell port (local)", snell_port)?,
            shadow_tls_port: match port {
                Some(p) => p,
                None => prompt_port("Shadow-TLS port (public)", shadow_tls_port)?,
            },
            tls_domain: select_from("Shadow-TLS handshake domain", &TLS_DOMAINS)?,
        },
        VariantParams::Singbox {
            ss_port,
            shadow_tls_port,
            ..
        } => {
            let methods: Vec<&str> = Ss2022Method::ALL.iter().map(|m| m.as_str()).collect();
            VariantParams::Singbox {
                ss_port: prompt_port("Shadowsocks port (local)", ss_port)?,
                shadow_tls_port: match port {
                    Some(p) => p,
                    None => prompt_port("Shadow-TLS port (public)", shadow_tls_port)?,
                },
                method: select_from("SS-2022 method", &methods)?.parse()?,
                tls_domain: select_from("Shadow-TLS handshake domain", &TLS_DOMAINS)?,
            }
        }
        VariantParams::Reality { port: default, .. } => VariantParams::Reality {
            port: match port {
                Some(p) => p,
                None => prompt_port("Reality port", default)?,
            },
            server_name: select_from("Server to impersonate", &REALITY_SERVERS)?,
        },
        VariantParams::Hysteria2 { port: default, .. } => VariantParams::Hysteria2 {
            domain: prompt_domain(domain)?,
            port: match port {
                Some(p) => p,
                None => prompt_port("Hysteria2 port (UDP)", default)?,
            },
            obfs: Confirm::with_theme(&theme())
                .with_prompt("Enable salamander obfuscation?")
                .default(false)
                .interact()?,
        },
        VariantParams::AnyTls { port: default, .. } => {
            let profiles: Vec<&str> = PaddingProfile::ALL.iter().map(|p| p.as_str()).collect();
            VariantParams::AnyTls {
                domain: prompt_domain(domain)?,
                port: match port {
                    Some(p) => p,
                    None => prompt_port("AnyTLS port", default)?,
                },
                padding: select_from("Padding profile", &profiles)?.parse()?,
            }
        }
    };
    Ok(variant)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_port_is_the_public_one() {
        let mut snell = VariantParams::defaults(ProtocolKind::Snell, None);
        set_primary_port(&mut snell, 2443);
        assert!(matches!(
            snell,
            VariantParams::Snell {
                snell_port: 10086,
                shadow_tls_port: 2443,
                ..
            }
        ));

        let mut hy2 = VariantParams::defaults(ProtocolKind::Hysteria2, Some("example.org".into()));
        set_primary_port(&mut hy2, 8443);
        assert!(matches!(hy2, VariantParams::Hysteria2 { port: 8443, .. }));
    }
}
