//! The "System Logs" feed.
//!
//! Nothing is stored: [`collect`] rebuilds the entries from module status,
//! configuration and the session snapshot every time it is called.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub const ALL: [LogLevel; 4] = [LogLevel::Info, LogLevel::Success, LogLevel::Warning, LogLevel::Error];

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        LogLevel::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown log level: {s}"))
    }
}

/// Parses a comma separated level list. Empty input selects every level.
pub fn parse_levels(raw: Option<&str>) -> Result<Vec<LogLevel>, String> {
    match raw.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(LogLevel::ALL.to_vec()),
        Some(r) => r.split(',').filter(|p| !p.trim().is_empty()).map(LogLevel::from_str).collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub content: String,
    pub level: LogLevel,
}

impl LogEntry {
    fn new(level: LogLevel, content: impl Into<String>) -> Self {
        Self { content: content.into(), level }
    }
}

/// Process-level facts the feed reports on.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemStatus<'a> {
    pub module_error: Option<&'a str>,
    pub api_key_missing: bool,
}

pub fn collect(status: &SystemStatus<'_>, session: &Session, now: DateTime<FixedOffset>) -> Vec<LogEntry> {
    let mut out = vec![
        LogEntry::new(LogLevel::Info, "SYSTEM STARTUP: Initializing Application..."),
        LogEntry::new(LogLevel::Info, format!("TIME: {}", now.format("%Y-%m-%d %H:%M:%S%.6f %:z"))),
    ];

    match status.module_error {
        None => {
            out.push(LogEntry::new(LogLevel::Success, "MODULE LOAD: celebrity_detector [OK]"));
            out.push(LogEntry::new(LogLevel::Success, "MODULE LOAD: qa_engine [OK]"));
        }
        Some(err) => out.push(LogEntry::new(LogLevel::Error, format!("MODULE LOAD FAILED: {err}"))),
    }

    if status.api_key_missing {
        out.push(LogEntry::new(
            LogLevel::Warning,
            format!("CONFIG: {} not configured; detection and Q/A calls will fail", crate::settings::API_KEY_ENV),
        ));
    }

    if let Some(d) = &session.detection {
        out.push(LogEntry::new(
            LogLevel::Success,
            format!("ACTION: Detection performed. Result: {}", d.name),
        ));
    }

    if !session.chat_history.is_empty() {
        out.push(LogEntry::new(
            LogLevel::Info,
            format!("ACTION: Chat session active. Messages count: {}", session.chat_history.len()),
        ));
    }

    out
}

/// Entries whose level is in `levels`, in their original order.
pub fn filter_levels<'a>(entries: &'a [LogEntry], levels: &[LogLevel]) -> Vec<&'a LogEntry> {
    entries.iter().filter(|e| levels.contains(&e.level)).collect()
}

/// Display order: newest first, then filtered.
pub fn feed<'a>(entries: &'a [LogEntry], levels: &[LogLevel]) -> Vec<&'a LogEntry> {
    let mut shown = filter_levels(entries, levels);
    shown.reverse();
    shown
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelCounts {
    pub info: usize,
    pub success: usize,
    pub warning: usize,
    pub error: usize,
}

pub fn counts(entries: &[LogEntry]) -> LevelCounts {
    entries.iter().fold(LevelCounts::default(), |mut c, e| {
        match e.level {
            LogLevel::Info => c.info += 1,
            LogLevel::Success => c.success += 1,
            LogLevel::Warning => c.warning += 1,
            LogLevel::Error => c.error += 1,
        }
        c
    })
}

pub fn export_text(entries: &[LogEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("[{}] {}", e.level, e.content))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn export_file_name(now: DateTime<FixedOffset>) -> String {
    format!("system_logs_{}.txt", now.format("%Y%m%d_%H%M%S"))
}
