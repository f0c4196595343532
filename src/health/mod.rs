//! Periodic check-and-recover pass over every installed protocol.

mod log;

pub use log::{HealthLog, LogLevel};

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use crate::lock::ProtocolLock;
use crate::protocol::ProtocolKind;
use crate::settings::{HealthSettings, Layout};
use crate::state::StateStore;
use crate::unit::{UnitManager, UnitStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    None,
    Restarted,
    RestartFailed,
    /// A lifecycle operation held the lock, or the unit is backing off
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheckRecord {
    pub kind: ProtocolKind,
    pub unit: String,
    pub previous: UnitStatus,
    pub current: UnitStatus,
    pub action: HealthAction,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub records: Vec<HealthCheckRecord>,
}

impl TickReport {
    /// True when any unit could not be brought back this tick.
    pub fn failed(&self) -> bool {
        self.records
            .iter()
            .any(|r| r.action == HealthAction::RestartFailed)
    }

    pub fn restarted(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.action == HealthAction::Restarted)
            .count()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Backoff {
    failures: u32,
    wait_ticks: u32,
}

/// Failure streaks per unit, kept across ticks in daemon mode.
#[derive(Debug, Default)]
pub struct BackoffTable {
    units: BTreeMap<String, Backoff>,
}

impl BackoffTable {
    /// Consumes one waiting tick; true while the unit should be left alone.
    fn should_wait(&mut self, unit: &str) -> bool {
        match self.units.get_mut(unit) {
            Some(b) if b.wait_ticks > 0 => {
                b.wait_ticks -= 1;
                true
            }
            _ => false,
        }
    }

    fn record_failure(&mut self, unit: &str, cap: u32) -> u32 {
        let entry = self.units.entry(unit.to_string()).or_default();
        entry.failures += 1;
        let exp = (entry.failures - 1).min(16);
        entry.wait_ticks = (1u32 << exp).min(cap.max(1));
        entry.wait_ticks
    }

    fn reset(&mut self, unit: &str) {
        self.units.remove(unit);
    }
}

/// Never edits installation records; only restarts units.
pub struct HealthSupervisor {
    store: StateStore,
    units: UnitManager,
    lock_dir: PathBuf,
    log: HealthLog,
    settings: HealthSettings,
}

impl HealthSupervisor {
    pub fn new(store: StateStore, units: UnitManager, layout: &Layout, settings: HealthSettings) -> Self {
        Self {
            store,
            units,
            lock_dir: layout.lock_dir.clone(),
            log: HealthLog::new(&layout.health_log),
            settings,
        }
    }

    fn note(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => info!("{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }
        if let Err(e) = self.log.append(level, message) {
            warn!(path = %self.log.path().display(), "Could not write health log: {}", e);
        }
    }

    /// One tick that always attempts a restart.
    pub async fn check_once(&self) -> TickReport {
        self.tick(None).await
    }

    /// Ticks forever on the configured interval with per-unit back-off.
    pub async fn run(&self) {
        info!(
            "Health supervisor started (interval: {:?})",
            self.settings.interval()
        );
        let mut backoff = BackoffTable::default();
        let mut interval = tokio::time::interval(self.settings.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let report = self.tick(Some(&mut backoff)).await;
            debug!(
                checked = report.records.len(),
                restarted = report.restarted(),
                failed = report.failed(),
                "Health tick complete"
            );
        }
    }

    pub async fn tick(&self, mut backoff: Option<&mut BackoffTable>) -> TickReport {
        let mut report = TickReport::default();

        for kind in self.store.installed_kinds() {
            for unit in kind.units() {
                let record = self.check_unit(kind, unit, backoff.as_deref_mut()).await;
                report.records.push(record);
            }
        }
        report
    }

    async fn check_unit(
        &self,
        kind: ProtocolKind,
        unit: &str,
        backoff: Option<&mut BackoffTable>,
    ) -> HealthCheckRecord {
        let previous = self.units.status(unit).await;
        let mut record = HealthCheckRecord {
            kind,
            unit: unit.to_string(),
            previous: previous.clone(),
            current: previous.clone(),
            action: HealthAction::None,
            at: Utc::now(),
        };
        if previous.is_active() {
            debug!(%kind, unit, "Healthy");
            return record;
        }

        let mut backoff = backoff;
        if let Some(table) = backoff.as_deref_mut() {
            if table.should_wait(unit) {
                debug!(%kind, unit, "Backing off after repeated restart failures");
                record.action = HealthAction::Skipped;
                return record;
            }
        }

        let _lock = match ProtocolLock::try_acquire(&self.lock_dir, kind) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                self.note(
                    LogLevel::Info,
                    &format!("{} is {}; lifecycle operation in progress, skipping", unit, previous),
                );
                record.action = HealthAction::Skipped;
                return record;
            }
            Err(e) => {
                self.note(
                    LogLevel::Warning,
                    &format!("{} is {}; could not take lock, skipping: {}", unit, previous, e),
                );
                record.action = HealthAction::Skipped;
                return record;
            }
        };

        self.note(
            LogLevel::Warning,
            &format!("{} ({}) is {}, restarting", unit, kind.display_name(), previous),
        );
        let restart = self.units.restart(unit).await;
        tokio::time::sleep(self.settings.settle()).await;
        let current = self.units.status(unit).await;
        record.current = current.clone();
        record.at = Utc::now();

        match restart {
            Ok(()) if current.is_active() => {
                self.note(LogLevel::Info, &format!("{} recovered", unit));
                record.action = HealthAction::Restarted;
                if let Some(table) = backoff {
                    table.reset(unit);
                }
            }
            outcome => {
                let reason = match outcome {
                    Err(e) => e.to_string(),
                    Ok(()) => format!("still {} after restart", current),
                };
                record.action = HealthAction::RestartFailed;
                match backoff {
                    Some(table) => {
                        let wait = table.record_failure(unit, self.settings.max_backoff_ticks);
                        self.note(
                            LogLevel::Error,
                            &format!("{} failed to recover: {}; next attempt in {} tick(s)", unit, reason, wait + 1),
                        );
                    }
                    None => {
                        self.note(LogLevel::Error, &format!("{} failed to recover: {}", unit, reason));
                    }
                }
            }
        }
        record
    }
}
