use std::sync::Arc;

use crate::console::Console;
use crate::error::{ManagerError, Result};
use crate::orchestrator::{InstallReport, UninstallReport, UpdateOutcome};
use crate::protocol::{Installable, ProtocolKind, ProtocolStatus};
use crate::registry::ProtocolRegistry;
use crate::synth::InstallParams;

/// Runs lifecycle operations with a spinner on the console.
pub struct Installer {
    registry: ProtocolRegistry,
    console: Arc<Console>,
}

impl Installer {
    pub fn new(registry: ProtocolRegistry, console: Arc<Console>) -> Self {
        Self { registry, console }
    }

    pub fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    fn protocol(&self, kind: ProtocolKind) -> Result<&dyn Installable> {
        self.registry
            .get(kind)
            .ok_or_else(|| ManagerError::Other(format!("{} is not registered", kind)))
    }

    pub async fn install(&self, params: &InstallParams) -> Result<InstallReport> {
        let kind = params.variant.kind();
        let protocol = self.protocol(kind)?;

        let pb = self
            .console
            .spinner(&format!("Installing {}", kind.display_name()));
        let result = protocol.install(params).await;
        self.console.finish(
            &pb,
            match &result {
                Ok(_) => format!("{} installed successfully", kind.display_name()),
                Err(e) => format!("Failed: {}", e),
            },
        );
        result
    }

    pub async fn update(&self, kind: ProtocolKind) -> Result<UpdateOutcome> {
        let protocol = self.protocol(kind)?;

        let pb = self
            .console
            .spinner(&format!("Updating {}", kind.display_name()));
        let result = protocol.update().await;
        self.console.finish(
            &pb,
            match &result {
                Ok(outcome) if outcome.is_up_to_date() => {
                    format!("{} is up to date", kind.display_name())
                }
                Ok(_) => format!("{} updated successfully", kind.display_name()),
                Err(e) => format!("Failed: {}", e),
            },
        );
        result
    }

    pub async fn uninstall(&self, kind: ProtocolKind) -> Result<UninstallReport> {
        let protocol = self.protocol(kind)?;

        let pb = self
            .console
            .spinner(&format!("Uninstalling {}", kind.display_name()));
        let result = protocol.uninstall().await;
        self.console.finish(
            &pb,
            match &result {
                Ok(report) if !report.removed => format!("{} is not installed", kind.display_name()),
                Ok(_) => format!("{} uninstalled", kind.display_name()),
                Err(e) => format!("Failed: {}", e),
            },
        );
        result
    }

    pub async fn renew_certificate(&self, kind: ProtocolKind) -> Result<()> {
        let protocol = self.protocol(kind)?;

        let pb = self
            .console
            .spinner(&format!("Renewing certificate for {}", kind.display_name()));
        let result = protocol.renew_certificate().await;
        self.console.finish(
            &pb,
            match &result {
                Ok(()) => "Certificate renewed".to_string(),
                Err(e) => format!("Failed: {}", e),
            },
        );
        result
    }

    pub async fn status(&self, kind: ProtocolKind) -> Result<ProtocolStatus> {
        self.protocol(kind)?.status().await
    }
}
