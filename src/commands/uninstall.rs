use proxy_manager::{ManagerError, ProtocolKind};

use super::Context;

pub(crate) async fn cmd_uninstall(ctx: &Context, kind: ProtocolKind) -> anyhow::Result<()> {
    match ctx.installer().uninstall(kind).await {
        Ok(report) => {
            for warning in &report.warnings {
                eprintln!("warning: {}", warning);
            }
            Ok(())
        }
        Err(ManagerError::Cancelled(_)) => {
            println!("Uninstall cancelled.");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
