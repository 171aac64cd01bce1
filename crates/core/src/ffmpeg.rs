//! Engine collaborator contract.
//!
//! The supervisor never talks to the media engine directly. It consumes an
//! [`Engine`] factory that materialises opaque [`ProcessHandle`]s from a
//! command line, hands out log [`Parser`]s, owns the playout port pool, and
//! answers address allow-list queries. Implementations live outside this
//! crate; tests use the doubles in `test_utils`.

use crate::process::{LogEntry, Order};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine has no port pool configured.
    #[error("no port ranger provided")]
    NoPortPool,

    /// The port pool is exhausted.
    #[error("no free ports available")]
    NoPortsAvailable,

    /// The engine could not materialise a process handle.
    #[error("failed to create process: {0}")]
    Process(String),

    /// The engine could not start a process.
    #[error("failed to start process: {0}")]
    Start(String),

    /// Skill probing failed.
    #[error("failed to reload skills: {0}")]
    Skills(String),
}

/// Version metadata of the engine binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FfmpegSkill {
    pub version: String,
}

/// Capabilities the engine reports about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Skills {
    pub ffmpeg: FfmpegSkill,
}

/// How often the engine incarnation has ended up in each state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StateCounters {
    pub finished: u64,
    pub starting: u64,
    pub running: u64,
    pub finishing: u64,
    pub failed: u64,
    pub killed: u64,
}

/// Live status of an engine process handle.
#[derive(Debug, Clone)]
pub struct ProcessStatus {
    /// The order the engine itself is following.
    pub order: Order,
    /// Current state name, e.g. "running", "finished", "failed".
    pub state: String,
    pub states: StateCounters,
    /// Time of the last state change.
    pub time: SystemTime,
    pub memory_bytes: u64,
    pub cpu_usage: f64,
    /// Runtime of the current incarnation.
    pub duration: Duration,
}

impl Default for ProcessStatus {
    fn default() -> Self {
        Self {
            order: Order::Stop,
            state: String::new(),
            states: StateCounters::default(),
            time: SystemTime::UNIX_EPOCH,
            memory_bytes: 0,
            cpu_usage: 0.0,
            duration: Duration::ZERO,
        }
    }
}

/// Per-stream progress as parsed from the engine output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProgressIo {
    /// IO id this entry belongs to, filled in by the supervisor.
    #[serde(default)]
    pub id: String,
    /// Stream index on the engine command line.
    pub index: u64,
    #[serde(default)]
    pub frame: u64,
    #[serde(default)]
    pub fps: f64,
    #[serde(default)]
    pub bitrate_kbit: f64,
}

/// Parsed progress of a running engine process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Progress {
    pub input: Vec<ProgressIo>,
    pub output: Vec<ProgressIo>,
    #[serde(default)]
    pub frame: u64,
    #[serde(default)]
    pub fps: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub bitrate_kbit: f64,
}

/// A log report of one engine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Report {
    /// Unix seconds the run started.
    pub created_at: i64,
    /// Engine banner lines preceding the first progress line.
    pub prelude: Vec<String>,
    pub log: Vec<LogEntry>,
}

/// Result of probing a process's inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Probe {
    /// Stream descriptions as reported by the probe parser.
    pub streams: Vec<serde_json::Value>,
    pub log: Vec<String>,
}

/// Parameters for materialising one engine process.
#[derive(Debug, Clone, Default)]
pub struct SpawnConfig {
    pub reconnect: bool,
    pub reconnect_delay: Duration,
    pub stale_timeout: Duration,
    /// CPU usage limit in percent (0 = unlimited).
    pub limit_cpu: f64,
    /// Memory limit in bytes (0 = unlimited).
    pub limit_memory: u64,
    /// Grace period before limits are enforced.
    pub limit_waitfor: Duration,
    pub command: Vec<String>,
}

/// Consumer of engine output for one process.
///
/// Parsers accumulate a current report and the history of reports from
/// previous runs; the history survives a config update by being carried
/// over to the replacement parser.
pub trait Parser: Send + Sync {
    fn progress(&self) -> Progress;
    fn report(&self) -> Report;
    fn report_history(&self) -> Vec<Report>;
    fn import_report_history(&self, history: Vec<Report>);
    /// Result of a probe run; meaningful on probe parsers only.
    fn probe(&self) -> Probe;

    /// Move this parser's report history onto `target`.
    fn transfer_report_history(&self, target: &dyn Parser) {
        target.import_report_history(self.report_history());
    }
}

/// Handle on one supervised engine process.
///
/// Handles are internally thread-safe; the supervisor may call them while
/// holding its registry lock.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    async fn start(&self) -> Result<(), EngineError>;
    /// Order the process to stop; with `wait`, block until it exited.
    async fn stop(&self, wait: bool);
    /// Forcefully terminate the process, bypassing reconnect handling.
    async fn kill(&self, wait: bool);
    /// Resolve once the process has exited.
    async fn wait(&self);
    fn status(&self) -> ProcessStatus;
    fn is_running(&self) -> bool;
}

/// Factory for engine processes, parsers, and ports.
pub trait Engine: Send + Sync {
    fn skills(&self) -> Skills;
    fn reload_skills(&self) -> Result<(), EngineError>;

    fn new_process(
        &self,
        config: SpawnConfig,
        parser: Arc<dyn Parser>,
    ) -> Result<Arc<dyn ProcessHandle>, EngineError>;

    fn new_process_parser(&self, id: &str, reference: &str) -> Arc<dyn Parser>;
    fn new_probe_parser(&self) -> Arc<dyn Parser>;

    /// Borrow a playout port from the pool.
    fn get_port(&self) -> Result<u16, EngineError>;
    /// Return a previously borrowed playout port.
    fn put_port(&self, port: u16);

    fn validate_input_address(&self, address: &str) -> bool;
    fn validate_output_address(&self, address: &str) -> bool;
}
