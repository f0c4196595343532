use proxy_manager::completions::{self, CompletionShell};

use crate::args::Cli;

pub(crate) fn cmd_completions(shell: Option<CompletionShell>, install: bool) -> anyhow::Result<()> {
    let shell = shell
        .or_else(completions::detect_shell)
        .ok_or_else(|| anyhow::anyhow!("Could not detect your shell; pass it explicitly"))?;

    if install {
        let path = completions::install_completions::<Cli>(shell, "proxy-manager")?;
        println!("Completions written to {}", path.display());
        println!("Restart your shell to pick them up.");
    } else {
        completions::generate_completions::<Cli>(shell, "proxy-manager", &mut std::io::stdout());
    }
    Ok(())
}
