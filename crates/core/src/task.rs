//! In-memory working state of a supervised process.
//!
//! A task is built from a catalog entry by expanding placeholders,
//! resolving cross-process references, validating addresses, allocating
//! playout ports, and materialising the engine handle and parser. The
//! catalog entry itself stays untouched; the task carries the resolved
//! working copy.

use crate::ffmpeg::{Engine, EngineError, Parser, ProcessHandle, SpawnConfig};
use crate::fs::Filesystem;
use crate::placeholder::{resolve_placeholders, Replacer};
use crate::process::{Process, ProcessConfig};
use crate::reference;
use crate::restream::RestreamError;
use crate::store::Metadata;
use crate::validate;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Working state for one supervised process. Not persisted.
pub(crate) struct Task {
    /// Whether the task passed resolution and validation. Only valid tasks
    /// carry a command, a handle, and a parser.
    pub(crate) valid: bool,
    pub(crate) id: String,
    pub(crate) reference: String,
    /// The catalog entry this task was built from.
    pub(crate) process: Process,
    /// Working copy of the config with placeholders and references resolved.
    pub(crate) config: ProcessConfig,
    /// The command line handed to the engine.
    pub(crate) command: Vec<String>,
    pub(crate) handle: Option<Arc<dyn ProcessHandle>>,
    pub(crate) parser: Option<Arc<dyn Parser>>,
    /// Borrowed playout ports, keyed by input id.
    pub(crate) playout: HashMap<String, u16>,
    /// Whether any output writes files below a disk base directory.
    pub(crate) uses_disk: bool,
    pub(crate) metadata: Option<Metadata>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("valid", &self.valid)
            .field("id", &self.id)
            .field("reference", &self.reference)
            .field("process", &self.process)
            .field("config", &self.config)
            .field("command", &self.command)
            .field("handle", &self.handle.is_some())
            .field("parser", &self.parser.is_some())
            .field("playout", &self.playout)
            .field("uses_disk", &self.uses_disk)
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl Task {
    /// Skeleton task for a catalog entry, with the working config cloned
    /// but nothing resolved yet.
    pub(crate) fn new(process: Process) -> Self {
        Self {
            valid: false,
            id: process.id.clone(),
            reference: process.reference.clone(),
            config: process.config.clone(),
            process,
            command: Vec::new(),
            handle: None,
            parser: None,
            playout: HashMap::new(),
            uses_disk: false,
            metadata: None,
        }
    }

    /// Engine spawn parameters for the current command.
    pub(crate) fn spawn_config(&self) -> SpawnConfig {
        SpawnConfig {
            reconnect: self.config.reconnect,
            reconnect_delay: Duration::from_secs(self.config.reconnect_delay_seconds),
            stale_timeout: Duration::from_secs(self.config.stale_timeout_seconds),
            limit_cpu: self.config.limit_cpu_usage,
            limit_memory: self.config.limit_memory_bytes,
            limit_waitfor: Duration::from_secs(self.config.limit_waitfor_seconds),
            command: self.command.clone(),
        }
    }
}

/// Collaborators needed to materialise a task.
pub(crate) struct TaskResources<'a> {
    pub(crate) engine: &'a dyn Engine,
    pub(crate) replacer: &'a dyn Replacer,
    pub(crate) diskfs: &'a [Arc<dyn Filesystem>],
}

/// Build a fully prepared task from a catalog entry.
///
/// References are resolved against `tasks`, the current registry snapshot.
/// On failure nothing is registered anywhere; the only side effect are
/// playout ports reserved before the failing step, which the caller must
/// return via [`unset_playout_ports`].
pub(crate) fn build_task(
    process: Process,
    tasks: &HashMap<String, Task>,
    resources: &TaskResources<'_>,
) -> Result<Task, RestreamError> {
    let mut task = Task::new(process);

    resolve_placeholders(&mut task.config, resources.replacer);

    reference::resolve_addresses(tasks, &mut task.config)?;

    task.uses_disk = validate::validate_config(&mut task.config, resources.engine, resources.diskfs)?;

    set_playout_ports(&mut task, resources.engine)?;

    task.command = task.config.create_command();

    let parser = resources
        .engine
        .new_process_parser(&task.id, &task.reference);
    let handle = resources
        .engine
        .new_process(task.spawn_config(), parser.clone())?;

    task.parser = Some(parser);
    task.handle = Some(handle);
    task.valid = true;

    Ok(task)
}

/// Allocate playout ports for every `avstream:`/`playout:` input.
///
/// Any previously held ports are returned first. A missing port pool on
/// the engine leaves inputs without an assigned port; any other port
/// error aborts.
pub(crate) fn set_playout_ports(task: &mut Task, engine: &dyn Engine) -> Result<(), EngineError> {
    unset_playout_ports(task, engine);

    for input in task.config.input.iter_mut() {
        if !input.address.starts_with("avstream:") && !input.address.starts_with("playout:") {
            continue;
        }

        // Drop a stale "-playout_httpport <n>" pair before assigning.
        let mut options = Vec::with_capacity(input.options.len());
        let mut skip_value = false;

        for option in input.options.drain(..) {
            if skip_value {
                skip_value = false;
                continue;
            }

            if option == "-playout_httpport" {
                skip_value = true;
                continue;
            }

            options.push(option);
        }

        match engine.get_port() {
            Ok(port) => {
                options.push("-playout_httpport".to_string());
                options.push(port.to_string());

                debug!(id = %task.id, input = %input.id, port, "assigning playout port");

                task.playout.insert(input.id.clone(), port);
            }
            Err(EngineError::NoPortPool) => {}
            Err(err) => {
                input.options = options;
                return Err(err);
            }
        }

        input.options = options;
    }

    Ok(())
}

/// Return every held playout port to the engine's pool.
pub(crate) fn unset_playout_ports(task: &mut Task, engine: &dyn Engine) {
    for (_, port) in task.playout.drain() {
        engine.put_port(port);
    }
}
