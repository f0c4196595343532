//! Operator-facing append-only health log.

use chrono::{DateTime, Local};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        })
    }
}

pub fn format_line(at: DateTime<Local>, level: LogLevel, message: &str) -> String {
    format!("[{}] {}: {}\n", at.format("%Y-%m-%d %H:%M:%S"), level, message)
}

#[derive(Debug, Clone)]
pub struct HealthLog {
    path: PathBuf,
}

impl HealthLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, level: LogLevel, message: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(format_line(Local::now(), level, message).as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn line_format() {
        let at = Local.with_ymd_and_hms(2026, 3, 7, 4, 5, 6).unwrap();
        assert_eq!(
            format_line(at, LogLevel::Warning, "snell is failed, restarting"),
            "[2026-03-07 04:05:06] WARNING: snell is failed, restarting\n"
        );
    }

    #[test]
    fn appends_without_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let log = HealthLog::new(&dir.path().join("log").join("health.log"));
        log.append(LogLevel::Info, "first").unwrap();
        log.append(LogLevel::Error, "second").unwrap();

        let text = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] INFO: first"));
        assert!(lines[1].ends_with("] ERROR: second"));
    }
}
