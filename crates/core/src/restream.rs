//! The supervisor: task registry, lifecycle control, and disk observation.
//!
//! A [`Restream`] owns the catalog of supervised processes. All state is
//! guarded by one reader/writer lock; every successful mutation persists
//! the full catalog through the store. Disk filesystems are polled by a
//! background observer that stops disk-writing processes when a
//! filesystem runs full.

use crate::ffmpeg::{Engine, EngineError, Probe, Skills, SpawnConfig};
use crate::fs::{CleanupPattern, Filesystem, FilesystemKind};
use crate::placeholder::{resolve_placeholders, Replacer, TemplateReplacer};
use crate::process::{Log, LogHistoryEntry, Order, Process, ProcessConfig, State};
use crate::reference::{self, ReferenceError};
use crate::store::{MemoryStore, Metadata, Store, StoreData, StoreError};
use crate::task::{self, Task, TaskResources};
use crate::validate::{self, ValidationError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Error type for supervisor operations.
#[derive(Debug, Error)]
pub enum RestreamError {
    #[error("unknown process")]
    UnknownProcess,

    #[error("process already exists")]
    ProcessExists,

    #[error("unknown key")]
    UnknownKey,

    /// The task failed resolution or validation and cannot run.
    #[error("invalid process definition")]
    InvalidProcess,

    #[error("an empty ID is not allowed")]
    EmptyProcessId,

    #[error("a key for storing the data has to be provided")]
    EmptyMetadataKey,

    #[error("max. number of running processes ({0}) reached")]
    MaxProcessesReached(i64),

    #[error("the process with the ID '{0}' is still running")]
    ProcessStillRunning(String),

    #[error("no playout for input ID '{input}' and process '{id}'")]
    NoPlayout { id: String, input: String },

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("failed to load data from store: {0}")]
    Store(#[from] StoreError),
}

/// Collaborators and settings for a new supervisor instance.
pub struct Config {
    /// Stable identifier of this instance.
    pub id: String,
    /// Human-readable name of this instance.
    pub name: String,
    /// Catalog persistence; an in-memory store when absent.
    pub store: Option<Arc<dyn Store>>,
    /// Filesystems available to supervised processes.
    pub filesystems: Vec<Arc<dyn Filesystem>>,
    /// Placeholder expansion; a template replacer without templates when
    /// absent.
    pub replacer: Option<Arc<dyn Replacer>>,
    /// The media engine factory.
    pub ffmpeg: Arc<dyn Engine>,
    /// Maximum number of simultaneously running processes (0 = unlimited).
    pub max_processes: i64,
    /// Poll interval of the disk observer.
    pub observer_interval: Duration,
}

impl Config {
    pub fn new(ffmpeg: Arc<dyn Engine>) -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            store: None,
            filesystems: Vec::new(),
            replacer: None,
            ffmpeg,
            max_processes: 0,
            observer_interval: Duration::from_secs(10),
        }
    }

    /// Take instance identity and limits from loaded settings.
    pub fn with_settings(mut self, settings: &restreamd_config::Settings) -> Self {
        self.id = settings.instance.id.clone();
        self.name = settings.instance.name.clone();
        self.max_processes = settings.limits.max_processes;
        self.observer_interval = Duration::from_secs(settings.observer.interval_secs);
        self
    }
}

/// Registry state guarded by the supervisor lock.
struct Inner {
    tasks: HashMap<String, Task>,
    /// Number of processes successfully transitioned to running.
    nproc: i64,
    /// System-wide metadata; `None` when empty.
    metadata: Option<Metadata>,
    /// Supervisor epoch latch: toggles between start and stop.
    running: bool,
}

/// The process supervisor.
pub struct Restream {
    id: String,
    name: String,
    created_at: SystemTime,
    store: Arc<dyn Store>,
    ffmpeg: Arc<dyn Engine>,
    replacer: Arc<dyn Replacer>,
    max_proc: i64,
    observer_interval: Duration,
    fs_list: Vec<Arc<dyn Filesystem>>,
    diskfs: Vec<Arc<dyn Filesystem>>,
    observer: Mutex<Option<CancellationToken>>,
    inner: RwLock<Inner>,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Build the persistable snapshot of the registry.
fn snapshot(tasks: &HashMap<String, Task>, metadata: &Option<Metadata>) -> StoreData {
    let mut data = StoreData::default();

    for (id, task) in tasks {
        data.process.insert(id.clone(), task.process.clone());
        data.metadata
            .process
            .insert(id.clone(), task.metadata.clone().unwrap_or_default());
    }

    data.metadata.system = metadata.clone().unwrap_or_default();

    data
}

impl Restream {
    /// Create a supervisor, loading the catalog from the store.
    ///
    /// Loading is tolerant: a process that fails resolution or validation
    /// is kept in the catalog but marked invalid; starting it yields
    /// [`RestreamError::InvalidProcess`].
    pub fn new(config: Config) -> Result<Self, RestreamError> {
        let store: Arc<dyn Store> = config
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let replacer: Arc<dyn Replacer> = config
            .replacer
            .unwrap_or_else(|| Arc::new(TemplateReplacer::new()));

        let fs_list = config.filesystems;
        let diskfs: Vec<Arc<dyn Filesystem>> = fs_list
            .iter()
            .filter(|fs| fs.kind() == FilesystemKind::Disk)
            .cloned()
            .collect();

        let data = store.load()?;
        let (tasks, metadata) = load_tasks(data, config.ffmpeg.as_ref(), replacer.as_ref(), &diskfs)?;

        if let Err(err) = store.store(&snapshot(&tasks, &metadata)) {
            warn!(error = %err, "failed to persist catalog");
        }

        Ok(Self {
            id: config.id,
            name: config.name,
            created_at: SystemTime::now(),
            store,
            ffmpeg: config.ffmpeg,
            replacer,
            max_proc: config.max_processes,
            observer_interval: config.observer_interval,
            fs_list,
            diskfs,
            observer: Mutex::new(None),
            inner: RwLock::new(Inner {
                tasks,
                nproc: 0,
                metadata,
                running: false,
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn skills(&self) -> Skills {
        self.ffmpeg.skills()
    }

    pub fn reload_skills(&self) -> Result<(), RestreamError> {
        self.ffmpeg.reload_skills()?;
        Ok(())
    }

    fn resources(&self) -> TaskResources<'_> {
        TaskResources {
            engine: self.ffmpeg.as_ref(),
            replacer: self.replacer.as_ref(),
            diskfs: &self.diskfs,
        }
    }

    fn save(&self, inner: &Inner) {
        if let Err(err) = self.store.store(&snapshot(&inner.tasks, &inner.metadata)) {
            warn!(error = %err, "failed to persist catalog");
        }
    }

    /// Start the supervisor epoch: start every process ordered to run,
    /// install cleanup rules, and launch the filesystems and the disk
    /// observer. Idempotent until [`Restream::stop`] is called.
    pub async fn start(self: &Arc<Self>) {
        let mut inner = self.inner.write().await;

        if inner.running {
            return;
        }
        inner.running = true;

        let ids: Vec<String> = inner.tasks.keys().cloned().collect();

        for id in &ids {
            if inner.tasks[id].process.order.is_start() {
                if let Err(err) = self.start_process_locked(&mut inner, id).await {
                    warn!(id = %id, error = %err, "failed to start process");
                }
            }

            let config = inner.tasks[id].config.clone();
            self.set_cleanup(id, &config);
        }

        let token = CancellationToken::new();
        *self.observer.lock().unwrap() = Some(token.clone());

        for fs in &self.fs_list {
            fs.start();

            if fs.kind() == FilesystemKind::Disk {
                tokio::spawn(observe(
                    Arc::clone(self),
                    Arc::clone(fs),
                    self.observer_interval,
                    token.clone(),
                ));
            }
        }
    }

    /// Stop the supervisor epoch: stop every running engine without
    /// altering its order, so a subsequent [`Restream::start`] resumes it.
    /// Idempotent until [`Restream::start`] is called.
    pub async fn stop(&self) {
        let mut inner = self.inner.write().await;

        if !inner.running {
            return;
        }
        inner.running = false;

        for (id, task) in inner.tasks.iter() {
            if let Some(handle) = &task.handle {
                handle.stop(true).await;
            }

            self.unset_cleanup(id);
        }

        // Nothing is running anymore; the next epoch recounts from zero.
        inner.nproc = 0;

        if let Some(token) = self.observer.lock().unwrap().take() {
            token.cancel();
        }

        for fs in &self.fs_list {
            fs.stop();
        }
    }

    /// Add a new process to the catalog; autostart configs start at once.
    pub async fn add_process(&self, config: ProcessConfig) -> Result<(), RestreamError> {
        let task = {
            let inner = self.inner.read().await;
            self.create_task(config, &inner.tasks)?
        };

        let mut inner = self.inner.write().await;

        if inner.tasks.contains_key(&task.id) {
            // A concurrent add of the same id won the insert; give the
            // reserved ports back.
            let mut task = task;
            task::unset_playout_ports(&mut task, self.ffmpeg.as_ref());
            return Err(RestreamError::ProcessExists);
        }

        let id = task.id.clone();
        let order = task.process.order;
        let config = task.config.clone();

        inner.tasks.insert(id.clone(), task);

        self.set_cleanup(&id, &config);

        if order.is_start() {
            if let Err(err) = self.start_process_locked(&mut inner, &id).await {
                if let Some(mut task) = inner.tasks.remove(&id) {
                    task::unset_playout_ports(&mut task, self.ffmpeg.as_ref());
                }
                self.unset_cleanup(&id);
                return Err(err);
            }
        }

        self.save(&inner);

        Ok(())
    }

    /// Replace a process's description, preserving its order and carrying
    /// the report history over to the new task.
    pub async fn update_process(
        &self,
        id: &str,
        config: ProcessConfig,
    ) -> Result<(), RestreamError> {
        let mut inner = self.inner.write().await;

        let mut new_task = self.create_task(config, &inner.tasks)?;

        let Some(old_task) = inner.tasks.get(id) else {
            task::unset_playout_ports(&mut new_task, self.ffmpeg.as_ref());
            return Err(RestreamError::UnknownProcess);
        };

        new_task.process.updated_at = unix_now();
        new_task.process.order = old_task.process.order;

        if let (Some(old_parser), Some(new_parser)) = (&old_task.parser, &new_task.parser) {
            old_parser.transfer_report_history(new_parser.as_ref());
        }

        if id != new_task.id && inner.tasks.contains_key(&new_task.id) {
            task::unset_playout_ports(&mut new_task, self.ffmpeg.as_ref());
            return Err(RestreamError::ProcessExists);
        }

        self.stop_process_locked(&mut inner, id).await?;
        self.delete_process_locked(&mut inner, id)?;

        let new_id = new_task.id.clone();
        let order = new_task.process.order;
        let new_config = new_task.config.clone();

        inner.tasks.insert(new_id.clone(), new_task);

        self.set_cleanup(&new_id, &new_config);

        if order.is_start() {
            if let Err(err) = self.start_process_locked(&mut inner, &new_id).await {
                warn!(id = %new_id, error = %err, "failed to start updated process");
            }
        }

        self.save(&inner);

        Ok(())
    }

    /// Remove a process. Only permitted while its order is stop.
    pub async fn delete_process(&self, id: &str) -> Result<(), RestreamError> {
        let mut inner = self.inner.write().await;

        self.delete_process_locked(&mut inner, id)?;
        self.save(&inner);

        Ok(())
    }

    /// Order a process to run.
    pub async fn start_process(&self, id: &str) -> Result<(), RestreamError> {
        let mut inner = self.inner.write().await;

        self.start_process_locked(&mut inner, id).await?;
        self.save(&inner);

        Ok(())
    }

    /// Order a process to stop.
    pub async fn stop_process(&self, id: &str) -> Result<(), RestreamError> {
        let mut inner = self.inner.write().await;

        self.stop_process_locked(&mut inner, id).await?;
        self.save(&inner);

        Ok(())
    }

    /// Kill the engine of a running process; its own reconnect handling
    /// brings it back up. A no-op when the process is ordered to stop.
    pub async fn restart_process(&self, id: &str) -> Result<(), RestreamError> {
        let inner = self.inner.read().await;

        let task = inner.tasks.get(id).ok_or(RestreamError::UnknownProcess)?;

        if !task.valid {
            return Err(RestreamError::InvalidProcess);
        }

        if task.process.order == Order::Stop {
            return Ok(());
        }

        if let Some(handle) = task.handle.clone() {
            handle.kill(true).await;
        }

        Ok(())
    }

    /// Rebuild a process's task from its persisted config, restarting it
    /// when it was ordered to run.
    pub async fn reload_process(&self, id: &str) -> Result<(), RestreamError> {
        let mut inner = self.inner.write().await;

        self.reload_process_locked(&mut inner, id).await?;
        self.save(&inner);

        Ok(())
    }

    /// Deep clone of a process's catalog entry.
    pub async fn get_process(&self, id: &str) -> Result<Process, RestreamError> {
        let inner = self.inner.read().await;

        let task = inner.tasks.get(id).ok_or(RestreamError::UnknownProcess)?;

        Ok(task.process.clone())
    }

    /// Process ids matching the given glob patterns. Both patterns empty
    /// yields every id; otherwise the result is the intersection of the
    /// non-empty filters.
    pub async fn get_process_ids(&self, idpattern: &str, refpattern: &str) -> Vec<String> {
        let inner = self.inner.read().await;

        if idpattern.is_empty() && refpattern.is_empty() {
            return inner.tasks.keys().cloned().collect();
        }

        let mut matches: HashMap<String, usize> = HashMap::new();
        let mut filters = 0;

        if !idpattern.is_empty() {
            let Ok(pattern) = glob::Pattern::new(idpattern) else {
                return Vec::new();
            };

            for id in inner.tasks.keys() {
                if pattern.matches(id) {
                    *matches.entry(id.clone()).or_default() += 1;
                }
            }

            filters += 1;
        }

        if !refpattern.is_empty() {
            let Ok(pattern) = glob::Pattern::new(refpattern) else {
                return Vec::new();
            };

            for task in inner.tasks.values() {
                if pattern.matches(&task.reference) {
                    *matches.entry(task.id.clone()).or_default() += 1;
                }
            }

            filters += 1;
        }

        matches
            .into_iter()
            .filter(|(_, n)| *n == filters)
            .map(|(id, _)| id)
            .collect()
    }

    /// Merged engine status and parser progress of a process.
    pub async fn get_process_state(&self, id: &str) -> Result<State, RestreamError> {
        let inner = self.inner.read().await;

        let task = inner.tasks.get(id).ok_or(RestreamError::UnknownProcess)?;

        let mut state = State::default();

        if !task.valid {
            return Ok(state);
        }

        let (Some(handle), Some(parser)) = (&task.handle, &task.parser) else {
            return Ok(state);
        };

        let status = handle.status();

        state.order = task.process.order;
        state.state = status.state;
        state.states = status.states;
        state.time = status
            .time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        state.memory_bytes = status.memory_bytes;
        state.cpu_usage = status.cpu_usage;
        // Round to 10ms.
        state.duration_seconds = (status.duration.as_secs_f64() * 100.0).round() / 100.0;
        state.reconnect_seconds = -1.0;
        state.command = task.command.clone();

        if state.order.is_start() && !handle.is_running() && task.config.reconnect {
            state.reconnect_seconds =
                (task.config.reconnect_delay_seconds as f64 - state.duration_seconds).max(0.0);
        }

        state.progress = parser.progress();

        for p in state.progress.input.iter_mut() {
            if let Some(io) = task.process.config.input.get(p.index as usize) {
                p.id = io.id.clone();
            }
        }

        for p in state.progress.output.iter_mut() {
            if let Some(io) = task.process.config.output.get(p.index as usize) {
                p.id = io.id.clone();
            }
        }

        let report = parser.report();
        if let Some(last) = report.log.last() {
            state.last_log = last.data.clone();
        }

        Ok(state)
    }

    /// Current report and report history of a process.
    pub async fn get_process_log(&self, id: &str) -> Result<Log, RestreamError> {
        let inner = self.inner.read().await;

        let task = inner.tasks.get(id).ok_or(RestreamError::UnknownProcess)?;

        let mut log = Log::default();

        if !task.valid {
            return Ok(log);
        }

        let Some(parser) = &task.parser else {
            return Ok(log);
        };

        let current = parser.report();

        log.created_at = current.created_at;
        log.prelude = current.prelude;
        log.entries = current.log;

        for report in parser.report_history() {
            log.history.push(LogHistoryEntry {
                created_at: report.created_at,
                prelude: report.prelude,
                entries: report.log,
            });
        }

        Ok(log)
    }

    /// Probe a process's inputs with the default timeout.
    pub async fn probe(&self, id: &str) -> Probe {
        self.probe_with_timeout(id, Duration::from_secs(20)).await
    }

    /// Probe a process's inputs with a transient, reconnect-free engine
    /// run. The registry is not touched while the probe is in flight.
    pub async fn probe_with_timeout(&self, id: &str, timeout: Duration) -> Probe {
        let (valid, config) = {
            let inner = self.inner.read().await;

            match inner.tasks.get(id) {
                Some(task) => (task.valid, task.config.clone()),
                None => {
                    let mut probe = Probe::default();
                    probe.log.push(format!("Unknown process ID ({id})"));
                    return probe;
                }
            }
        };

        if !valid {
            return Probe::default();
        }

        let mut command = config.options.clone();

        for input in &config.input {
            command.extend(input.options.iter().cloned());
            command.push("-i".to_string());
            command.push(input.address.clone());
        }

        let prober = self.ffmpeg.new_probe_parser();

        let spawn = SpawnConfig {
            reconnect: false,
            reconnect_delay: Duration::ZERO,
            stale_timeout: timeout,
            limit_cpu: 0.0,
            limit_memory: 0,
            limit_waitfor: Duration::ZERO,
            command,
        };

        let handle = match self.ffmpeg.new_process(spawn, prober.clone()) {
            Ok(handle) => handle,
            Err(err) => {
                let mut probe = Probe::default();
                probe.log.push(err.to_string());
                return probe;
            }
        };

        if let Err(err) = handle.start().await {
            let mut probe = Probe::default();
            probe.log.push(err.to_string());
            return probe;
        }

        if tokio::time::timeout(timeout, handle.wait()).await.is_err() {
            handle.kill(true).await;
        }

        prober.probe()
    }

    /// Address of the playout endpoint for one input.
    pub async fn get_playout(&self, id: &str, input_id: &str) -> Result<String, RestreamError> {
        let inner = self.inner.read().await;

        let task = inner.tasks.get(id).ok_or(RestreamError::UnknownProcess)?;

        if !task.valid {
            return Err(RestreamError::InvalidProcess);
        }

        let port = task
            .playout
            .get(input_id)
            .ok_or_else(|| RestreamError::NoPlayout {
                id: id.to_string(),
                input: input_id.to_string(),
            })?;

        Ok(format!("127.0.0.1:{port}"))
    }

    /// Set or delete (`data == None`) one metadata value of a process.
    pub async fn set_process_metadata(
        &self,
        id: &str,
        key: &str,
        data: Option<serde_json::Value>,
    ) -> Result<(), RestreamError> {
        let mut inner = self.inner.write().await;

        if key.is_empty() {
            return Err(RestreamError::EmptyMetadataKey);
        }

        let task = inner
            .tasks
            .get_mut(id)
            .ok_or(RestreamError::UnknownProcess)?;

        let metadata = task.metadata.get_or_insert_with(Metadata::new);

        match data {
            Some(value) => {
                metadata.insert(key.to_string(), value);
            }
            None => {
                metadata.remove(key);
            }
        }

        if metadata.is_empty() {
            task.metadata = None;
        }

        self.save(&inner);

        Ok(())
    }

    /// One metadata value of a process, or the whole map for an empty key.
    pub async fn get_process_metadata(
        &self,
        id: &str,
        key: &str,
    ) -> Result<Option<serde_json::Value>, RestreamError> {
        let inner = self.inner.read().await;

        let task = inner.tasks.get(id).ok_or(RestreamError::UnknownProcess)?;

        if key.is_empty() {
            return Ok(task
                .metadata
                .clone()
                .map(|m| serde_json::Value::Object(m.into_iter().collect())));
        }

        match &task.metadata {
            Some(metadata) => metadata
                .get(key)
                .cloned()
                .map(Some)
                .ok_or(RestreamError::UnknownKey),
            None => Err(RestreamError::UnknownKey),
        }
    }

    /// Set or delete (`data == None`) one system-wide metadata value.
    pub async fn set_metadata(
        &self,
        key: &str,
        data: Option<serde_json::Value>,
    ) -> Result<(), RestreamError> {
        let mut inner = self.inner.write().await;

        if key.is_empty() {
            return Err(RestreamError::EmptyMetadataKey);
        }

        let metadata = inner.metadata.get_or_insert_with(Metadata::new);

        match data {
            Some(value) => {
                metadata.insert(key.to_string(), value);
            }
            None => {
                metadata.remove(key);
            }
        }

        if metadata.is_empty() {
            inner.metadata = None;
        }

        self.save(&inner);

        Ok(())
    }

    /// One system-wide metadata value, or the whole map for an empty key.
    pub async fn get_metadata(
        &self,
        key: &str,
    ) -> Result<Option<serde_json::Value>, RestreamError> {
        let inner = self.inner.read().await;

        if key.is_empty() {
            return Ok(inner
                .metadata
                .clone()
                .map(|m| serde_json::Value::Object(m.into_iter().collect())));
        }

        match &inner.metadata {
            Some(metadata) => metadata
                .get(key)
                .cloned()
                .map(Some)
                .ok_or(RestreamError::UnknownKey),
            None => Err(RestreamError::UnknownKey),
        }
    }

    /// Build a task from a user config, pinning the engine version
    /// constraint to the currently available engine.
    fn create_task(
        &self,
        mut config: ProcessConfig,
        tasks: &HashMap<String, Task>,
    ) -> Result<Task, RestreamError> {
        config.id = config.id.trim().to_string();

        if config.id.is_empty() {
            return Err(RestreamError::EmptyProcessId);
        }

        let version = self.ffmpeg.skills().ffmpeg.version;
        config.ffversion = match semver::Version::parse(&version) {
            // The constraint tracks major.minor; patch releases stay
            // compatible.
            Ok(v) => format!("^{}.{}.0", v.major, v.minor),
            Err(_) => format!("^{version}"),
        };

        let now = unix_now();
        let order = if config.autostart {
            Order::Start
        } else {
            Order::Stop
        };

        let process = Process {
            id: config.id.clone(),
            reference: config.reference.clone(),
            config,
            order,
            created_at: now,
            updated_at: now,
        };

        task::build_task(process, tasks, &self.resources())
    }

    async fn start_process_locked(
        &self,
        inner: &mut Inner,
        id: &str,
    ) -> Result<(), RestreamError> {
        let (valid, handle, order) = {
            let task = inner.tasks.get(id).ok_or(RestreamError::UnknownProcess)?;
            (task.valid, task.handle.clone(), task.process.order)
        };

        if !valid {
            return Err(RestreamError::InvalidProcess);
        }

        let Some(handle) = handle else {
            return Err(RestreamError::InvalidProcess);
        };

        if order.is_start() && handle.status().order.is_start() {
            return Ok(());
        }

        if self.max_proc > 0 && inner.nproc >= self.max_proc {
            return Err(RestreamError::MaxProcessesReached(self.max_proc));
        }

        if let Some(task) = inner.tasks.get_mut(id) {
            task.process.order = Order::Start;
        }

        if let Err(err) = handle.start().await {
            if let Some(task) = inner.tasks.get_mut(id) {
                task.process.order = order;
            }
            return Err(err.into());
        }

        inner.nproc += 1;

        Ok(())
    }

    async fn stop_process_locked(&self, inner: &mut Inner, id: &str) -> Result<(), RestreamError> {
        let (handle, order) = {
            let task = inner.tasks.get(id).ok_or(RestreamError::UnknownProcess)?;
            (task.handle.clone(), task.process.order)
        };

        let Some(handle) = handle else {
            return Ok(());
        };

        if order == Order::Stop && handle.status().order == Order::Stop {
            return Ok(());
        }

        if let Some(task) = inner.tasks.get_mut(id) {
            task.process.order = Order::Stop;
        }

        handle.stop(true).await;

        inner.nproc -= 1;

        Ok(())
    }

    fn delete_process_locked(&self, inner: &mut Inner, id: &str) -> Result<(), RestreamError> {
        let task = inner.tasks.get(id).ok_or(RestreamError::UnknownProcess)?;

        if task.process.order != Order::Stop {
            return Err(RestreamError::ProcessStillRunning(id.to_string()));
        }

        if let Some(mut task) = inner.tasks.remove(id) {
            task::unset_playout_ports(&mut task, self.ffmpeg.as_ref());
        }

        self.unset_cleanup(id);

        Ok(())
    }

    async fn reload_process_locked(
        &self,
        inner: &mut Inner,
        id: &str,
    ) -> Result<(), RestreamError> {
        {
            let task = inner
                .tasks
                .get_mut(id)
                .ok_or(RestreamError::UnknownProcess)?;
            task.valid = false;
        }

        let mut config = inner.tasks[id].process.config.clone();

        resolve_placeholders(&mut config, self.replacer.as_ref());

        reference::resolve_addresses(&inner.tasks, &mut config)?;

        let uses_disk = validate::validate_config(&mut config, self.ffmpeg.as_ref(), &self.diskfs)?;

        {
            let task = inner
                .tasks
                .get_mut(id)
                .ok_or(RestreamError::UnknownProcess)?;
            task.config = config;
            task.uses_disk = uses_disk;

            task::set_playout_ports(task, self.ffmpeg.as_ref())?;

            task.command = task.config.create_command();
        }

        let was_start = inner.tasks[id].process.order.is_start();

        if was_start {
            self.stop_process_locked(inner, id).await?;
        }

        {
            let task = inner
                .tasks
                .get_mut(id)
                .ok_or(RestreamError::UnknownProcess)?;

            let parser = self.ffmpeg.new_process_parser(&task.id, &task.reference);
            let handle = self.ffmpeg.new_process(task.spawn_config(), parser.clone())?;

            task.parser = Some(parser);
            task.handle = Some(handle);
            task.valid = true;
        }

        if was_start {
            self.start_process_locked(inner, id).await?;
        }

        Ok(())
    }

    /// Install the cleanup rules of a config on the named filesystems.
    fn set_cleanup(&self, id: &str, config: &ProcessConfig) {
        let mut patterns: HashMap<String, Vec<CleanupPattern>> = HashMap::new();

        for output in &config.output {
            for rule in &output.cleanup {
                let Some((name, pattern)) = rule.pattern.split_once(':') else {
                    continue;
                };

                if name.is_empty() || !name.chars().all(|c| c.is_ascii_lowercase()) {
                    continue;
                }

                // Legacy filesystem names.
                let name = match name {
                    "diskfs" => "disk",
                    "memfs" => "mem",
                    other => other,
                };

                patterns
                    .entry(name.to_string())
                    .or_default()
                    .push(CleanupPattern {
                        pattern: pattern.to_string(),
                        max_files: rule.max_files,
                        max_file_age: Duration::from_secs(rule.max_file_age_seconds),
                        purge_on_delete: rule.purge_on_delete,
                    });
            }
        }

        for fs in &self.fs_list {
            if let Some(patterns) = patterns.remove(&fs.name()) {
                fs.set_cleanup(id, patterns);
            }
        }
    }

    fn unset_cleanup(&self, id: &str) {
        for fs in &self.fs_list {
            fs.unset_cleanup(id);
        }
    }
}

/// Poll one disk filesystem; when it runs full, stop every valid,
/// disk-writing process that is ordered to run.
async fn observe(
    restream: Arc<Restream>,
    fs: Arc<dyn Filesystem>,
    interval: Duration,
    token: CancellationToken,
) {
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {
                if !fs.usage().is_full() {
                    continue;
                }

                let mut inner = restream.inner.write().await;

                if token.is_cancelled() {
                    return;
                }

                let ids: Vec<String> = inner
                    .tasks
                    .values()
                    .filter(|t| t.valid && t.uses_disk && t.process.order.is_start())
                    .map(|t| t.id.clone())
                    .collect();

                for id in &ids {
                    warn!(id = %id, fs = %fs.name(), "shutting down because filesystem is full");

                    if let Err(err) = restream.stop_process_locked(&mut inner, id).await {
                        warn!(id = %id, error = %err, "failed to stop process");
                    }
                }
            }
        }
    }
}

/// Materialise the tasks of a freshly loaded catalog.
///
/// Placeholders are expanded for every task first; references and
/// validation run in a second pass so they see the complete catalog.
fn load_tasks(
    data: StoreData,
    engine: &dyn Engine,
    replacer: &dyn Replacer,
    diskfs: &[Arc<dyn Filesystem>],
) -> Result<(HashMap<String, Task>, Option<Metadata>), RestreamError> {
    let mut tasks = HashMap::new();

    let skills = engine.skills();

    let mut constraint_version = skills.ffmpeg.version.clone();
    if let Ok(v) = semver::Version::parse(&constraint_version) {
        constraint_version = format!("{}.{}.0", v.major, v.minor);
    }

    for (id, mut process) in data.process {
        if process.config.ffversion.is_empty() {
            process.config.ffversion = format!("^{constraint_version}");
        }

        let mut task = Task::new(process);

        resolve_placeholders(&mut task.config, replacer);

        tasks.insert(id, task);
    }

    for (id, metadata) in data.metadata.process {
        if let Some(task) = tasks.get_mut(&id) {
            if !metadata.is_empty() {
                task.metadata = Some(metadata);
            }
        }
    }

    let ids: Vec<String> = tasks.keys().cloned().collect();

    for id in ids {
        match semver::VersionReq::parse(&tasks[&id].config.ffversion) {
            Ok(req) => match semver::Version::parse(&skills.ffmpeg.version) {
                Ok(version) => {
                    if !req.matches(&version) {
                        warn!(
                            id = %id,
                            constraint = %tasks[&id].config.ffversion,
                            version = %skills.ffmpeg.version,
                            "available engine version does not satisfy the constraint; update this process to adjust it"
                        );
                    }
                }
                Err(err) => warn!(id = %id, error = %err, "engine version is not a semver"),
            },
            Err(err) => warn!(id = %id, error = %err, "version constraint is not a semver range"),
        }

        let mut config = tasks[&id].config.clone();

        if let Err(err) = reference::resolve_addresses(&tasks, &mut config) {
            warn!(id = %id, error = %err, "ignoring process");
            continue;
        }

        let uses_disk = match validate::validate_config(&mut config, engine, diskfs) {
            Ok(uses_disk) => uses_disk,
            Err(err) => {
                warn!(id = %id, error = %err, "ignoring process");
                continue;
            }
        };

        let Some(task) = tasks.get_mut(&id) else {
            continue;
        };
        task.config = config;
        task.uses_disk = uses_disk;

        if let Err(err) = task::set_playout_ports(task, engine) {
            warn!(id = %id, error = %err, "ignoring process");
            continue;
        }

        task.command = task.config.create_command();

        let parser = engine.new_process_parser(&task.id, &task.reference);
        let handle = engine.new_process(task.spawn_config(), parser.clone())?;

        task.parser = Some(parser);
        task.handle = Some(handle);
        task.valid = true;

        debug!(id = %task.id, "restored process");
    }

    let metadata = if data.metadata.system.is_empty() {
        None
    } else {
        Some(data.metadata.system)
    };

    Ok((tasks, metadata))
}
