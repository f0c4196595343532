use proxy_manager::ProtocolKind;

use super::Context;

pub(crate) async fn cmd_renew(ctx: &Context, kind: ProtocolKind) -> anyhow::Result<()> {
    ctx.installer().renew_certificate(kind).await?;
    println!("{} restarted with the renewed certificate.", kind.display_name());
    Ok(())
}
