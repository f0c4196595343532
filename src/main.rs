mod args;
mod commands;

use args::{Cli, Commands};
use clap::Parser;
use commands::install::InstallArgs;
use commands::Context;
use proxy_manager::clienv;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(clienv::log_filter()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, install } = cli.command {
        return commands::completions::cmd_completions(shell, install);
    }

    if cli.command.mutates_system() && !is_root() {
        anyhow::bail!("This command must be run as root");
    }

    let ctx = Context::load(cli.config, cli.yes || clienv::assume_yes())?;

    match cli.command {
        Commands::Install {
            kind,
            domain,
            port,
            ipv6,
            server_ip,
        } => {
            let args = InstallArgs {
                kind,
                domain,
                port,
                ipv6,
                server_ip,
            };
            commands::install::cmd_install(&ctx, args).await?
        }
        Commands::Update { kind } => commands::update::cmd_update(&ctx, kind).await?,
        Commands::Uninstall { kind } => commands::uninstall::cmd_uninstall(&ctx, kind).await?,
        Commands::RenewCert { kind } => commands::renew::cmd_renew(&ctx, kind).await?,
        Commands::View { kind, server } => commands::view::cmd_view(&ctx, kind, server).await?,
        Commands::Logs { kind, lines } => commands::logs::cmd_logs(&ctx, kind, lines).await?,
        Commands::Status => commands::status::cmd_status(&ctx).await?,
        Commands::Health { daemon } => commands::health::cmd_health(&ctx, daemon).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}

#[cfg(unix)]
fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}
