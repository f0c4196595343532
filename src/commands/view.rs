use proxy_manager::ProtocolKind;

use super::Context;

pub(crate) async fn cmd_view(ctx: &Context, kind: ProtocolKind, server: bool) -> anyhow::Result<()> {
    let record = ctx.orchestrator.record(kind)?;
    let profile = ctx.orchestrator.profile(kind)?;

    println!("{}", kind.display_name());
    println!("  server:       {} (IPv{})", record.server_ip, record.ip_version.as_str());
    for (artifact, version) in &record.versions {
        println!("  {:<13} {}", format!("{}:", artifact), version);
    }
    if let Some(domain) = record.acme_domain() {
        println!("  certificate:  {}", domain);
    }
    println!(
        "  installed:    {}",
        record.installed_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "  updated:      {}",
        record.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    println!();
    println!("Surge:");
    println!("  {}", profile.surge);
    if let Some(link) = &profile.share_link {
        println!("Share link:");
        println!("  {}", link);
    }

    if server {
        if let Some(path) = ctx.orchestrator.config_path(kind) {
            println!();
            println!("==> {} <==", path.display());
            let text = tokio::fs::read_to_string(&path).await?;
            print!("{}", text);
            if !text.ends_with('\n') {
                println!();
            }
        }
    }
    Ok(())
}
