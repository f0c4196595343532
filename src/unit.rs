//! Service unit generation and control.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ManagerError, Result};
use crate::exec;
use crate::fsutil;

const BIND_CAPABILITY: &str = "CAP_NET_BIND_SERVICE";

/// Everything that varies between units. The rest of the template is fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnitSpec {
    pub name: String,
    pub description: String,
    pub user: String,
    pub group: String,
    pub exec_start: String,
    pub capabilities: Vec<String>,
    pub read_write_paths: Vec<PathBuf>,
}

impl ServiceUnitSpec {
    pub fn new(name: &str, description: &str, exec_start: String) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            user: "root".to_string(),
            group: "root".to_string(),
            exec_start,
            capabilities: Vec::new(),
            read_write_paths: Vec::new(),
        }
    }

    pub fn run_as(mut self, user: &str, group: &str) -> Self {
        self.user = user.to_string();
        self.group = group.to_string();
        self
    }

    pub fn bind_privileged_ports(mut self) -> Self {
        self.capabilities.push(BIND_CAPABILITY.to_string());
        self
    }

    pub fn writable(mut self, path: &Path) -> Self {
        self.read_write_paths.push(path.to_path_buf());
        self
    }

    pub fn file_name(&self) -> String {
        format!("{}.service", self.name)
    }

    /// Renders the hardened unit file. Equal inputs render equal bytes.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("[Unit]\n");
        out.push_str(&format!("Description={}\n", self.description));
        out.push_str("After=network-online.target\n");
        out.push_str("Wants=network-online.target\n\n");

        out.push_str("[Service]\n");
        out.push_str("Type=simple\n");
        out.push_str(&format!("User={}\n", self.user));
        out.push_str(&format!("Group={}\n", self.group));
        out.push_str("LimitNOFILE=65535\n");
        out.push_str(&format!("ExecStart={}\n", self.exec_start));
        if !self.capabilities.is_empty() {
            let caps = self.capabilities.join(" ");
            out.push_str(&format!("AmbientCapabilities={}\n", caps));
            out.push_str(&format!("CapabilityBoundingSet={}\n", caps));
        }
        out.push_str("Restart=always\n");
        out.push_str("RestartSec=10s\n\n");

        out.push_str("NoNewPrivileges=true\n");
        out.push_str("ProtectSystem=strict\n");
        out.push_str("ProtectHome=true\n");
        out.push_str("PrivateTmp=true\n");
        let mut writable: Vec<String> = self
            .read_write_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        writable.push("/var/log".to_string());
        out.push_str(&format!("ReadWritePaths={}\n\n", writable.join(" ")));

        out.push_str("[Install]\n");
        out.push_str("WantedBy=multi-user.target\n");
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    Active,
    Inactive,
    Failed,
    Activating,
    Unknown(String),
}

impl UnitStatus {
    /// Parses `systemctl is-active` output.
    pub fn parse(text: &str) -> Self {
        match text.trim() {
            "active" | "reloading" => Self::Active,
            "inactive" => Self::Inactive,
            "failed" => Self::Failed,
            "activating" | "deactivating" => Self::Activating,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn is_active(&self) -> bool {
        *self == Self::Active
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Inactive => f.write_str("inactive"),
            Self::Failed => f.write_str("failed"),
            Self::Activating => f.write_str("activating"),
            Self::Unknown(s) if s.is_empty() => f.write_str("unknown"),
            Self::Unknown(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitAction {
    Start,
    Stop,
    Restart,
    Enable,
    Disable,
}

impl UnitAction {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Enable => "enable",
            Self::Disable => "disable",
        }
    }
}

/// Service manager control plane.
#[async_trait]
pub trait ServiceController: Send + Sync {
    async fn write_unit(&self, name: &str, contents: &str) -> Result<()>;

    /// Deleting an absent unit definition succeeds.
    async fn delete_unit(&self, name: &str) -> Result<()>;

    async fn unit_exists(&self, name: &str) -> bool;

    async fn daemon_reload(&self) -> Result<()>;

    async fn control(&self, action: UnitAction, name: &str) -> Result<()>;

    async fn status(&self, name: &str) -> Result<UnitStatus>;

    async fn journal(&self, name: &str, lines: usize) -> Result<String>;
}

/// systemd via `systemctl` and `journalctl`.
pub struct SystemdController {
    unit_dir: PathBuf,
    limit: Duration,
}

impl SystemdController {
    pub fn new(unit_dir: &Path, limit: Duration) -> Self {
        Self {
            unit_dir: unit_dir.to_path_buf(),
            limit,
        }
    }

    fn unit_path(&self, name: &str) -> PathBuf {
        self.unit_dir.join(format!("{}.service", name))
    }

    async fn systemctl(&self, unit: &str, args: &[&str]) -> Result<exec::CommandOutput> {
        exec::run("systemctl", args, self.limit)
            .await
            .map_err(|e| ManagerError::unit(unit, format!("failed to run systemctl: {}", e)))
    }
}

#[async_trait]
impl ServiceController for SystemdController {
    async fn write_unit(&self, name: &str, contents: &str) -> Result<()> {
        let path = self.unit_path(name);
        fsutil::write_atomic(&path, contents.as_bytes(), 0o644)
            .map_err(|e| ManagerError::unit(name, format!("write {}: {}", path.display(), e)))
    }

    async fn delete_unit(&self, name: &str) -> Result<()> {
        let path = self.unit_path(name);
        fsutil::remove_file_if_exists(&path)
            .map_err(|e| ManagerError::unit(name, format!("delete {}: {}", path.display(), e)))
    }

    async fn unit_exists(&self, name: &str) -> bool {
        self.unit_path(name).exists()
    }

    async fn daemon_reload(&self) -> Result<()> {
        let out = self.systemctl("daemon-reload", &["daemon-reload"]).await?;
        if !out.success() {
            return Err(ManagerError::unit("daemon-reload", out.diagnostics()));
        }
        Ok(())
    }

    async fn control(&self, action: UnitAction, name: &str) -> Result<()> {
        let out = self.systemctl(name, &[action.verb(), name]).await?;
        if !out.success() {
            return Err(ManagerError::unit(
                name,
                format!("systemctl {} failed: {}", action.verb(), out.diagnostics()),
            ));
        }
        Ok(())
    }

    async fn status(&self, name: &str) -> Result<UnitStatus> {
        // is-active exits nonzero for every state but active; stdout carries the state.
        let out = self.systemctl(name, &["is-active", name]).await?;
        Ok(UnitStatus::parse(&out.stdout))
    }

    async fn journal(&self, name: &str, lines: usize) -> Result<String> {
        let count = lines.to_string();
        let out = exec::run("journalctl", &["-u", name, "-n", &count, "--no-pager"], self.limit)
            .await
            .map_err(|e| ManagerError::unit(name, format!("failed to run journalctl: {}", e)))?;
        Ok(out.stdout)
    }
}

/// Unit lifecycle on top of a [`ServiceController`].
#[derive(Clone)]
pub struct UnitManager {
    controller: Arc<dyn ServiceController>,
}

impl UnitManager {
    pub fn new(controller: Arc<dyn ServiceController>) -> Self {
        Self { controller }
    }

    /// Writes the rendered unit and reloads the service manager.
    pub async fn create(&self, spec: &ServiceUnitSpec) -> Result<()> {
        debug!(unit = %spec.name, "Creating service unit");
        self.controller.write_unit(&spec.name, &spec.render()).await?;
        self.controller.daemon_reload().await
    }

    /// Stop, disable, delete, reload. Removing an absent unit succeeds.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let existed = self.controller.unit_exists(name).await;
        for action in [UnitAction::Stop, UnitAction::Disable] {
            if let Err(e) = self.controller.control(action, name).await {
                if existed {
                    warn!(unit = name, "Could not {} unit: {}", action.verb(), e);
                } else {
                    debug!(unit = name, "Ignoring {} on absent unit", action.verb());
                }
            }
        }
        self.controller.delete_unit(name).await?;
        self.controller.daemon_reload().await?;
        if existed {
            info!(unit = name, "Removed service unit");
        }
        Ok(())
    }

    pub async fn start(&self, name: &str) -> Result<()> {
        self.controller.control(UnitAction::Start, name).await
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        self.controller.control(UnitAction::Stop, name).await
    }

    pub async fn restart(&self, name: &str) -> Result<()> {
        self.controller.control(UnitAction::Restart, name).await
    }

    pub async fn enable(&self, name: &str) -> Result<()> {
        self.controller.control(UnitAction::Enable, name).await
    }

    pub async fn disable(&self, name: &str) -> Result<()> {
        self.controller.control(UnitAction::Disable, name).await
    }

    pub async fn status(&self, name: &str) -> UnitStatus {
        match self.controller.status(name).await {
            Ok(status) => status,
            Err(e) => UnitStatus::Unknown(e.to_string()),
        }
    }

    pub async fn journal(&self, name: &str, lines: usize) -> Result<String> {
        self.controller.journal(name, lines).await
    }

    /// Polls until the unit reports active or `timeout` elapses.
    pub async fn wait_active(&self, name: &str, timeout: Duration, poll: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.status(name).await.is_active() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeServices;

    fn spec() -> ServiceUnitSpec {
        ServiceUnitSpec::new(
            "hysteria2",
            "Hysteria2 Service (sing-box)",
            "/usr/local/bin/sing-box run -c /etc/hysteria2/config.json".into(),
        )
        .run_as("hysteria2", "nogroup")
        .bind_privileged_ports()
        .writable(Path::new("/etc/hysteria2"))
    }

    #[test]
    fn render_is_hardened_and_deterministic() {
        let expected = "\
[Unit]
Description=Hysteria2 Service (sing-box)
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
User=hysteria2
Group=nogroup
LimitNOFILE=65535
ExecStart=/usr/local/bin/sing-box run -c /etc/hysteria2/config.json
AmbientCapabilities=CAP_NET_BIND_SERVICE
CapabilityBoundingSet=CAP_NET_BIND_SERVICE
Restart=always
RestartSec=10s

NoNewPrivileges=true
ProtectSystem=strict
ProtectHome=true
PrivateTmp=true
ReadWritePaths=/etc/hysteria2 /var/log

[Install]
WantedBy=multi-user.target
";
        assert_eq!(spec().render(), expected);
        assert_eq!(spec().render(), spec().render());
    }

    #[test]
    fn capabilities_only_when_granted() {
        let plain = ServiceUnitSpec::new("snell", "Snell Proxy Server", "/bin/snell".into());
        let text = plain.render();
        assert!(!text.contains("AmbientCapabilities"));
        assert!(!text.contains("CapabilityBoundingSet"));
        assert!(text.contains("ReadWritePaths=/var/log\n"));
    }

    #[test]
    fn status_parsing() {
        assert_eq!(UnitStatus::parse("active\n"), UnitStatus::Active);
        assert_eq!(UnitStatus::parse("failed"), UnitStatus::Failed);
        assert_eq!(UnitStatus::parse("inactive"), UnitStatus::Inactive);
        assert_eq!(
            UnitStatus::parse("bogus"),
            UnitStatus::Unknown("bogus".into())
        );
    }

    #[tokio::test]
    async fn remove_orders_stop_disable_delete_reload() {
        let services = Arc::new(FakeServices::default());
        let units = UnitManager::new(services.clone());
        units.create(&spec()).await.unwrap();
        units.start("hysteria2").await.unwrap();
        services.clear_log();

        units.remove("hysteria2").await.unwrap();
        assert_eq!(
            services.log(),
            vec![
                "stop hysteria2",
                "disable hysteria2",
                "delete hysteria2",
                "daemon-reload"
            ]
        );
        assert!(!services.unit_exists("hysteria2").await);
    }

    #[tokio::test]
    async fn remove_absent_unit_is_ok() {
        let services = Arc::new(FakeServices::default());
        let units = UnitManager::new(services.clone());
        units.remove("never-created").await.unwrap();
        units.remove("never-created").await.unwrap();
    }

    #[tokio::test]
    async fn wait_active_times_out() {
        let services = Arc::new(FakeServices::default());
        services.never_activates("anytls");
        let units = UnitManager::new(services.clone());
        units
            .create(&ServiceUnitSpec::new("anytls", "AnyTLS", "/bin/true".into()))
            .await
            .unwrap();
        units.start("anytls").await.unwrap();
        assert!(
            !units
                .wait_active("anytls", Duration::from_millis(50), Duration::from_millis(10))
                .await
        );
    }
}
