//! Test doubles shared across the crate's unit tests.

use crate::ffmpeg::{
    Engine, EngineError, FfmpegSkill, Parser, Probe, ProcessHandle, ProcessStatus, Progress,
    Report, Skills, SpawnConfig,
};
use crate::fs::{CleanupPattern, Filesystem, FilesystemKind, FilesystemUsage};
use crate::process::{Order, Process, ProcessConfig, ProcessIo};
use crate::task::Task;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Parser double with settable progress, report, and probe results.
pub(crate) struct MockParser {
    progress: Mutex<Progress>,
    report: Mutex<Report>,
    history: Mutex<Vec<Report>>,
    probe_result: Mutex<Probe>,
}

impl MockParser {
    pub(crate) fn new() -> Self {
        Self {
            progress: Mutex::new(Progress::default()),
            report: Mutex::new(Report::default()),
            history: Mutex::new(Vec::new()),
            probe_result: Mutex::new(Probe::default()),
        }
    }

    pub(crate) fn set_progress(&self, progress: Progress) {
        *self.progress.lock().unwrap() = progress;
    }

    pub(crate) fn set_report(&self, report: Report) {
        *self.report.lock().unwrap() = report;
    }

    pub(crate) fn push_history(&self, report: Report) {
        self.history.lock().unwrap().push(report);
    }

    pub(crate) fn set_probe(&self, probe: Probe) {
        *self.probe_result.lock().unwrap() = probe;
    }
}

impl Parser for MockParser {
    fn progress(&self) -> Progress {
        self.progress.lock().unwrap().clone()
    }

    fn report(&self) -> Report {
        self.report.lock().unwrap().clone()
    }

    fn report_history(&self) -> Vec<Report> {
        self.history.lock().unwrap().clone()
    }

    fn import_report_history(&self, history: Vec<Report>) {
        self.history.lock().unwrap().extend(history);
    }

    fn probe(&self) -> Probe {
        self.probe_result.lock().unwrap().clone()
    }
}

/// Process handle double. Transient runs (no reconnect, with a stale
/// timeout — the shape probes use) finish right after starting so waiters
/// resolve.
pub(crate) struct MockProcess {
    order: Mutex<Order>,
    running: AtomicBool,
    done: AtomicBool,
    exited: Notify,
    one_shot: bool,
}

impl MockProcess {
    fn new(config: &SpawnConfig) -> Self {
        Self {
            order: Mutex::new(Order::Stop),
            running: AtomicBool::new(false),
            done: AtomicBool::new(false),
            exited: Notify::new(),
            one_shot: !config.reconnect && !config.stale_timeout.is_zero(),
        }
    }
}

#[async_trait]
impl ProcessHandle for MockProcess {
    async fn start(&self) -> Result<(), EngineError> {
        *self.order.lock().unwrap() = Order::Start;
        self.done.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        if self.one_shot {
            self.running.store(false, Ordering::SeqCst);
            self.done.store(true, Ordering::SeqCst);
            self.exited.notify_waiters();
        }

        Ok(())
    }

    async fn stop(&self, _wait: bool) {
        *self.order.lock().unwrap() = Order::Stop;
        self.running.store(false, Ordering::SeqCst);
        self.done.store(true, Ordering::SeqCst);
        self.exited.notify_waiters();
    }

    async fn kill(&self, _wait: bool) {
        self.running.store(false, Ordering::SeqCst);
        self.done.store(true, Ordering::SeqCst);
        self.exited.notify_waiters();
    }

    async fn wait(&self) {
        loop {
            let notified = self.exited.notified();

            if self.done.load(Ordering::SeqCst) {
                return;
            }

            notified.await;
        }
    }

    fn status(&self) -> ProcessStatus {
        ProcessStatus {
            order: *self.order.lock().unwrap(),
            state: if self.is_running() { "running" } else { "finished" }.to_string(),
            ..Default::default()
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Engine double: allow-list by denied prefixes, optional port pool, and
/// bookkeeping of created parsers per process id.
pub(crate) struct MockEngine {
    version: String,
    ports: Option<Mutex<Vec<u16>>>,
    denied: Vec<String>,
    parsers: Mutex<HashMap<String, Vec<Arc<MockParser>>>>,
    probe_result: Mutex<Probe>,
}

impl MockEngine {
    pub(crate) fn new() -> Self {
        Self {
            version: "5.1.2".to_string(),
            ports: None,
            denied: Vec::new(),
            parsers: Mutex::new(HashMap::new()),
            probe_result: Mutex::new(Probe::default()),
        }
    }

    pub(crate) fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub(crate) fn with_ports(mut self, ports: &[u16]) -> Self {
        self.ports = Some(Mutex::new(ports.to_vec()));
        self
    }

    pub(crate) fn deny(mut self, prefix: &str) -> Self {
        self.denied.push(prefix.to_string());
        self
    }

    pub(crate) fn with_probe(self, probe: Probe) -> Self {
        *self.probe_result.lock().unwrap() = probe;
        self
    }

    pub(crate) fn free_ports(&self) -> Vec<u16> {
        match &self.ports {
            Some(pool) => pool.lock().unwrap().clone(),
            None => Vec::new(),
        }
    }

    pub(crate) fn parsers_for(&self, id: &str) -> Vec<Arc<MockParser>> {
        self.parsers
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Engine for MockEngine {
    fn skills(&self) -> Skills {
        Skills {
            ffmpeg: FfmpegSkill {
                version: self.version.clone(),
            },
        }
    }

    fn reload_skills(&self) -> Result<(), EngineError> {
        Ok(())
    }

    fn new_process(
        &self,
        config: SpawnConfig,
        _parser: Arc<dyn Parser>,
    ) -> Result<Arc<dyn ProcessHandle>, EngineError> {
        Ok(Arc::new(MockProcess::new(&config)))
    }

    fn new_process_parser(&self, id: &str, _reference: &str) -> Arc<dyn Parser> {
        let parser = Arc::new(MockParser::new());

        self.parsers
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push(parser.clone());

        parser
    }

    fn new_probe_parser(&self) -> Arc<dyn Parser> {
        let parser = Arc::new(MockParser::new());
        parser.set_probe(self.probe_result.lock().unwrap().clone());
        parser
    }

    fn get_port(&self) -> Result<u16, EngineError> {
        match &self.ports {
            None => Err(EngineError::NoPortPool),
            Some(pool) => pool
                .lock()
                .unwrap()
                .pop()
                .ok_or(EngineError::NoPortsAvailable),
        }
    }

    fn put_port(&self, port: u16) {
        if let Some(pool) = &self.ports {
            pool.lock().unwrap().push(port);
        }
    }

    fn validate_input_address(&self, address: &str) -> bool {
        !self.denied.iter().any(|prefix| address.starts_with(prefix))
    }

    fn validate_output_address(&self, address: &str) -> bool {
        !self.denied.iter().any(|prefix| address.starts_with(prefix))
    }
}

/// Filesystem double with settable usage and inspectable cleanup rules.
pub(crate) struct MockFilesystem {
    name: String,
    kind: FilesystemKind,
    base: String,
    used: AtomicU64,
    limit: AtomicU64,
    started: AtomicBool,
    cleanup: Mutex<HashMap<String, Vec<CleanupPattern>>>,
}

impl MockFilesystem {
    pub(crate) fn new(name: &str, kind: FilesystemKind, base: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            kind,
            base: base.to_string(),
            used: AtomicU64::new(0),
            limit: AtomicU64::new(0),
            started: AtomicBool::new(false),
            cleanup: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn set_usage(&self, used: u64, limit: u64) {
        self.used.store(used, Ordering::SeqCst);
        self.limit.store(limit, Ordering::SeqCst);
    }

    pub(crate) fn cleanup_for(&self, id: &str) -> Option<Vec<CleanupPattern>> {
        self.cleanup.lock().unwrap().get(id).cloned()
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

impl Filesystem for MockFilesystem {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> FilesystemKind {
        self.kind
    }

    fn usage(&self) -> FilesystemUsage {
        FilesystemUsage {
            used_bytes: self.used.load(Ordering::SeqCst),
            limit_bytes: self.limit.load(Ordering::SeqCst),
        }
    }

    fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    fn metadata(&self, key: &str) -> Option<String> {
        (key == "base").then(|| self.base.clone())
    }

    fn set_cleanup(&self, id: &str, patterns: Vec<CleanupPattern>) {
        self.cleanup.lock().unwrap().insert(id.to_string(), patterns);
    }

    fn unset_cleanup(&self, id: &str) {
        self.cleanup.lock().unwrap().remove(id);
    }
}

/// A disk filesystem double as a trait object.
pub(crate) fn disk_filesystem(name: &str, base: &str) -> Arc<dyn Filesystem> {
    MockFilesystem::new(name, FilesystemKind::Disk, base)
}

/// A task skeleton whose resolved config carries the given outputs.
pub(crate) fn task_with_outputs(id: &str, outputs: &[(&str, &str)]) -> Task {
    let config = ProcessConfig {
        id: id.to_string(),
        output: outputs
            .iter()
            .map(|(output_id, address)| ProcessIo {
                id: output_id.to_string(),
                address: address.to_string(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };

    Task::new(Process {
        id: id.to_string(),
        reference: String::new(),
        config,
        order: Order::Stop,
        created_at: 0,
        updated_at: 0,
    })
}
