use proxy_manager::ProtocolKind;

use super::Context;

pub(crate) async fn cmd_status(ctx: &Context) -> anyhow::Result<()> {
    let installer = ctx.installer();

    println!("{:<34} {:<10} {:<12} {}", "Protocol", "Installed", "Version", "Services");
    for kind in ProtocolKind::ALL {
        let status = installer.status(kind).await?;
        let versions = status
            .versions
            .values()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        let units = status
            .units
            .iter()
            .map(|(name, state)| format!("{}={}", name, state))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "{:<34} {:<10} {:<12} {}",
            kind.display_name(),
            if status.installed { "yes" } else { "no" },
            if versions.is_empty() { "-".to_string() } else { versions },
            if units.is_empty() { "-".to_string() } else { units },
        );
    }
    Ok(())
}
