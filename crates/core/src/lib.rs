//! restreamd core
//!
//! Scheduler-and-lifecycle layer around external media-engine processes.
//! A catalog of declarative process descriptions is validated and
//! materialised into supervised tasks, kept to each process's declared
//! run order, and paused when a disk filesystem runs full. The media
//! engine, the persistence backend, and the filesystems are consumed as
//! collaborator traits.

pub mod address;
pub mod ffmpeg;
pub mod fs;
pub mod placeholder;
pub mod process;
pub mod reference;
pub mod restream;
pub mod store;
pub mod validate;

mod task;

#[cfg(test)]
mod test_utils;

pub use restreamd_config as config;

pub use ffmpeg::{Engine, Parser, Probe, ProcessHandle, Skills};
pub use fs::{Filesystem, FilesystemKind};
pub use placeholder::{Replacer, TemplateReplacer};
pub use process::{Order, Process, ProcessConfig, ProcessIo, State};
pub use restream::{Config, Restream, RestreamError};
pub use store::{JsonStore, MemoryStore, Store, StoreData};
