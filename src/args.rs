use clap::{Parser, Subcommand};
use proxy_manager::completions::CompletionShell;
use proxy_manager::ProtocolKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "proxy-manager")]
#[command(version)]
#[command(about = "Install, update and supervise proxy daemons on this host", long_about = None)]
pub(crate) struct Cli {
    /// Settings file. Can also be set via PM_CONFIG env var.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Answer yes to every confirmation and use defaults for unset parameters
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Install a protocol (prompts for anything not given as a flag)
    Install {
        /// Protocol to install (asks if omitted)
        kind: Option<ProtocolKind>,

        /// Domain for the ACME certificate (hysteria2, anytls)
        #[arg(long)]
        domain: Option<String>,

        /// Primary listening port
        #[arg(short, long)]
        port: Option<u16>,

        /// Advertise the server's IPv6 address in client profiles
        #[arg(long)]
        ipv6: bool,

        /// Public address to advertise instead of detecting it
        #[arg(long)]
        server_ip: Option<String>,
    },

    /// Update backend binaries to the latest release
    Update {
        /// Protocol to update (all installed if omitted)
        kind: Option<ProtocolKind>,
    },

    /// Remove a protocol and everything it installed
    Uninstall { kind: ProtocolKind },

    /// Renew the ACME certificate of a TLS protocol
    RenewCert { kind: ProtocolKind },

    /// Show the client configuration of an installed protocol
    View {
        kind: ProtocolKind,

        /// Also print the server-side configuration file
        #[arg(long)]
        server: bool,
    },

    /// Show recent service logs
    Logs {
        kind: ProtocolKind,

        /// Number of recent lines per unit
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },

    /// Show installation and service state of every protocol
    Status,

    /// Check every installed protocol and restart failed services
    Health {
        /// Keep running, checking on the configured interval
        #[arg(long)]
        daemon: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate for (detected from $SHELL if omitted)
        shell: Option<CompletionShell>,

        /// Install into the shell's completion directory instead of printing
        #[arg(long)]
        install: bool,
    },
}

impl Commands {
    /// Commands that change system state and therefore need root.
    pub fn mutates_system(&self) -> bool {
        matches!(
            self,
            Self::Install { .. }
                | Self::Update { .. }
                | Self::Uninstall { .. }
                | Self::RenewCert { .. }
                | Self::Health { .. }
        )
    }
}
