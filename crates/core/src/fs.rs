//! Filesystem collaborator contract.
//!
//! Filesystems are provided to the supervisor as a capability set: a name,
//! a kind, usage figures, and a per-task cleanup rule store. The supervisor
//! installs retention rules keyed by task id and polls disk filesystems for
//! saturation; the actual file handling stays with the implementation.

use std::time::Duration;

/// Kind of a filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemKind {
    Disk,
    Mem,
    Other,
}

impl std::fmt::Display for FilesystemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilesystemKind::Disk => write!(f, "disk"),
            FilesystemKind::Mem => write!(f, "mem"),
            FilesystemKind::Other => write!(f, "other"),
        }
    }
}

/// Usage figures of a filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemUsage {
    pub used_bytes: u64,
    /// 0 means unlimited.
    pub limit_bytes: u64,
}

impl FilesystemUsage {
    /// Whether the filesystem has reached its limit.
    pub fn is_full(&self) -> bool {
        self.limit_bytes > 0 && self.used_bytes >= self.limit_bytes
    }
}

/// A retention rule as installed on a filesystem, with the filesystem name
/// prefix already stripped from the pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanupPattern {
    pub pattern: String,
    /// Keep at most this many matching files (0 = unlimited).
    pub max_files: u64,
    /// Delete matching files older than this (zero = unlimited).
    pub max_file_age: Duration,
    /// Remove all matching files when the owning task is deleted.
    pub purge_on_delete: bool,
}

/// Capability set of one filesystem.
pub trait Filesystem: Send + Sync {
    /// Name the filesystem is referenced by in cleanup patterns.
    fn name(&self) -> String;
    fn kind(&self) -> FilesystemKind;
    fn usage(&self) -> FilesystemUsage;

    /// Start the cleanup scheduler.
    fn start(&self);
    /// Stop the cleanup scheduler.
    fn stop(&self);

    /// Free-form metadata; `"base"` yields the base directory of disk
    /// filesystems.
    fn metadata(&self, key: &str) -> Option<String>;

    /// Install the retention rules for a task, replacing earlier ones.
    fn set_cleanup(&self, id: &str, patterns: Vec<CleanupPattern>);
    /// Remove all retention rules of a task.
    fn unset_cleanup(&self, id: &str);
}
