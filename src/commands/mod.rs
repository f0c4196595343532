pub(crate) mod completions;
pub(crate) mod health;
pub(crate) mod install;
pub(crate) mod logs;
pub(crate) mod renew;
pub(crate) mod status;
pub(crate) mod uninstall;
pub(crate) mod update;
pub(crate) mod view;

use anyhow::Context as _;
use std::path::PathBuf;
use std::sync::Arc;

use proxy_manager::cert::AcmeSh;
use proxy_manager::clienv;
use proxy_manager::console::{Console, DialoguerPrompter};
use proxy_manager::fetcher::ReleaseSource;
use proxy_manager::health::HealthSupervisor;
use proxy_manager::protocol::HostArch;
use proxy_manager::settings::Settings;
use proxy_manager::system::{BackendCheck, HostAccounts, SystemPackages};
use proxy_manager::unit::SystemdController;
use proxy_manager::{Host, Installer, Orchestrator, ProtocolRegistry};

/// Everything a command needs, wired to the real host.
pub(crate) struct Context {
    pub settings: Settings,
    pub orchestrator: Arc<Orchestrator>,
    pub console: Arc<Console>,
    pub yes: bool,
}

impl Context {
    pub fn load(config: Option<PathBuf>, yes: bool) -> anyhow::Result<Self> {
        let path = config.unwrap_or_else(clienv::settings_path);
        let settings = Settings::load_from(&path)?;
        let console = Console::new();

        let source = ReleaseSource::new(
            &settings.download,
            HostArch::detect()?,
            clienv::github_token(),
        )
        .context("Failed to set up release downloads")?;

        let limit = settings.commands.timeout();
        let host = Host {
            services: Arc::new(SystemdController::new(&settings.paths.unit_dir, limit)),
            authority: Arc::new(AcmeSh::new(
                &settings.acme_home(),
                settings.commands.acme_timeout(),
            )),
            accounts: Arc::new(HostAccounts::new(limit)),
            packages: Arc::new(SystemPackages::new(settings.commands.acme_timeout())),
            source: Arc::new(source),
            validator: Arc::new(BackendCheck::new(limit)),
            prompter: Arc::new(DialoguerPrompter::new(console.clone(), yes)),
        };
        let orchestrator = Arc::new(Orchestrator::new(
            host,
            settings.layout(),
            settings.verify.timings(),
        ));

        Ok(Self {
            settings,
            orchestrator,
            console,
            yes,
        })
    }

    pub fn installer(&self) -> Installer {
        Installer::new(
            ProtocolRegistry::with_orchestrator(self.orchestrator.clone()),
            self.console.clone(),
        )
    }

    pub fn supervisor(&self) -> HealthSupervisor {
        HealthSupervisor::new(
            self.orchestrator.store().clone(),
            self.orchestrator.units().clone(),
            self.orchestrator.layout(),
            self.settings.health.clone(),
        )
    }
}
