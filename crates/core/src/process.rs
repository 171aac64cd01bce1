//! Process catalog data model.
//!
//! A process is the persisted, user-visible description of one supervised
//! media pipeline: its inputs, outputs, engine options, and the declared
//! run order. The working state derived from it lives in [`crate::task`].

use crate::ffmpeg::{Progress, StateCounters};
use serde::{Deserialize, Serialize};

/// The declared intent for a process, independent of its live run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    /// The process should be running.
    Start,
    /// The process should be stopped.
    #[default]
    Stop,
}

impl Order {
    pub fn is_start(&self) -> bool {
        matches!(self, Order::Start)
    }
}

impl std::fmt::Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Order::Start => write!(f, "start"),
            Order::Stop => write!(f, "stop"),
        }
    }
}

/// Retention rule for files an output writes to a filesystem.
///
/// The pattern carries a `<fsname>:` prefix selecting the filesystem the
/// rule is installed on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CleanupRule {
    pub pattern: String,
    /// Keep at most this many matching files (0 = unlimited).
    #[serde(default)]
    pub max_files: u64,
    /// Delete matching files older than this many seconds (0 = unlimited).
    #[serde(default)]
    pub max_file_age_seconds: u64,
    /// Remove all matching files when the process is deleted.
    #[serde(default)]
    pub purge_on_delete: bool,
}

/// One input or output of a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProcessIo {
    /// Unique within the input set or output set it belongs to.
    pub id: String,
    pub address: String,
    /// Engine options placed before the address on the command line.
    #[serde(default)]
    pub options: Vec<String>,
    /// Retention rules, meaningful on outputs only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleanup: Vec<CleanupRule>,
}

/// User-supplied description of a supervised process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProcessConfig {
    pub id: String,
    #[serde(default)]
    pub reference: String,
    /// Semver constraint on the engine version this config was written for.
    #[serde(default)]
    pub ffversion: String,
    /// Global engine options preceding all inputs.
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub input: Vec<ProcessIo>,
    #[serde(default)]
    pub output: Vec<ProcessIo>,
    #[serde(default)]
    pub reconnect: bool,
    #[serde(default)]
    pub reconnect_delay_seconds: u64,
    #[serde(default)]
    pub autostart: bool,
    #[serde(default)]
    pub stale_timeout_seconds: u64,
    /// CPU usage limit in percent (0 = unlimited).
    #[serde(default)]
    pub limit_cpu_usage: f64,
    /// Memory limit in bytes (0 = unlimited).
    #[serde(default)]
    pub limit_memory_bytes: u64,
    /// Grace period in seconds before resource limits are enforced.
    #[serde(default)]
    pub limit_waitfor_seconds: u64,
}

impl ProcessConfig {
    /// Assemble the engine command line from the resolved config: global
    /// options, then each input's options and address, then each output's
    /// options and address.
    pub fn create_command(&self) -> Vec<String> {
        let mut command = self.options.clone();

        for input in &self.input {
            command.extend(input.options.iter().cloned());
            command.push("-i".to_string());
            command.push(input.address.clone());
        }

        for output in &self.output {
            command.extend(output.options.iter().cloned());
            command.push(output.address.clone());
        }

        command
    }
}

/// A catalog entry: the persisted process description plus bookkeeping.
///
/// The embedded config is the user's original, unmodified by placeholder
/// or reference resolution; those are re-applied whenever a task is built
/// from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Process {
    pub id: String,
    #[serde(default)]
    pub reference: String,
    pub config: ProcessConfig,
    #[serde(default)]
    pub order: Order,
    /// Unix seconds.
    #[serde(default)]
    pub created_at: i64,
    /// Unix seconds.
    #[serde(default)]
    pub updated_at: i64,
}

/// Merged live state of a process, combining engine status and parser
/// progress.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub order: Order,
    /// Engine state name, e.g. "running", "finished", "failed".
    pub state: String,
    pub states: StateCounters,
    /// Unix seconds of the last engine state change.
    pub time: i64,
    pub memory_bytes: u64,
    pub cpu_usage: f64,
    /// Runtime of the current engine incarnation in seconds.
    pub duration_seconds: f64,
    /// Seconds until the engine reconnects, -1 when no reconnect is due.
    pub reconnect_seconds: f64,
    pub command: Vec<String>,
    pub progress: Progress,
    pub last_log: String,
}

/// One line of engine output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LogEntry {
    /// Unix seconds.
    pub timestamp: i64,
    pub data: String,
}

/// A historical engine run report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LogHistoryEntry {
    pub created_at: i64,
    pub prelude: Vec<String>,
    pub entries: Vec<LogEntry>,
}

/// The current engine log plus the reports of previous runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Log {
    pub created_at: i64,
    pub prelude: Vec<String>,
    pub entries: Vec<LogEntry>,
    pub history: Vec<LogHistoryEntry>,
}
