use proxy_manager::ProtocolKind;

use super::Context;

pub(crate) async fn cmd_update(ctx: &Context, kind: Option<ProtocolKind>) -> anyhow::Result<()> {
    let kinds = match kind {
        Some(kind) => vec![kind],
        None => ctx.orchestrator.store().installed_kinds(),
    };
    if kinds.is_empty() {
        println!("No protocols installed.");
        return Ok(());
    }

    let installer = ctx.installer();
    let mut failures = 0;
    for kind in kinds {
        match installer.update(kind).await {
            Ok(outcome) => {
                for change in &outcome.changes {
                    let kinds: Vec<&str> = change.kinds.iter().map(|k| k.name()).collect();
                    println!(
                        "{}: {} -> {} (used by {})",
                        change.artifact,
                        change.from,
                        change.to,
                        kinds.join(", ")
                    );
                }
            }
            Err(e) if e.is_rollback() => {
                eprintln!("!!! {}", e);
                return Err(e.into());
            }
            Err(e) => {
                eprintln!("{}: {}", kind, e);
                failures += 1;
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{} update(s) failed; previous versions were restored", failures);
    }
    Ok(())
}
