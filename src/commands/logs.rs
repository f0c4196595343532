use proxy_manager::ProtocolKind;

use super::Context;

pub(crate) async fn cmd_logs(ctx: &Context, kind: ProtocolKind, lines: usize) -> anyhow::Result<()> {
    for (unit, text) in ctx.orchestrator.logs(kind, lines).await? {
        println!("==> {} <==", unit);
        print!("{}", text);
        if !text.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}
