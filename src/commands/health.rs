use tracing::info;

use super::Context;

pub(crate) async fn cmd_health(ctx: &Context, daemon: bool) -> anyhow::Result<()> {
    let supervisor = ctx.supervisor();

    if daemon {
        tokio::select! {
            _ = supervisor.run() => {}
            _ = tokio::signal::ctrl_c() => info!("Health supervisor stopped"),
        }
        return Ok(());
    }

    let report = supervisor.check_once().await;
    if report.records.is_empty() {
        println!("No protocols installed.");
        return Ok(());
    }
    for record in &report.records {
        println!(
            "{:<18} {:<10} -> {:<10} {:?}",
            record.unit, record.previous.to_string(), record.current.to_string(), record.action
        );
    }
    if report.failed() {
        anyhow::bail!(
            "some services failed to recover; see {}",
            ctx.settings.paths.health_log.display()
        );
    }
    Ok(())
}
