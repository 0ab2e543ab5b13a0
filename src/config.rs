//! Tunables threaded into the pipeline and worker pool.
//!
//! This module deliberately does not load configuration files or parse
//! environment variables for CLI wiring — that belongs to the binary
//! that embeds this crate. What it does own is the small, typed option
//! bags the pipeline and worker pool take as input, plus the one
//! environment-variable override the design calls for: the worker
//! pool's inter-job delay.

use crate::descriptor::RepositoryDescriptor;
use std::path::PathBuf;
use std::time::Duration;

/// How the change detector decides whether a repository needs a fresh
/// clone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteDiffMethod {
    /// Compare `ls-remote` refs against the latest local bundle's refs
    /// before cloning anything (the default, and the fast path).
    Refs,
    /// Always clone; let duplicate detection after the fact decide
    /// whether the result was already current.
    Clone,
}

impl Default for RemoteDiffMethod {
    fn default() -> Self {
        Self::Refs
    }
}

/// Everything [`crate::pipeline::process_backup`] needs to back up one
/// repository.
#[derive(Debug, Clone)]
pub struct ProcessBackupInput {
    /// The repository to back up. Must already carry an
    /// `authenticated_clone_url`.
    pub repository: RepositoryDescriptor,
    /// Root of the backup tree; `.working/` and the per-domain store
    /// directories live under here.
    pub backup_root: PathBuf,
    /// Bundles to keep per repository after pruning. `<= 0` disables
    /// pruning.
    pub retention: i64,
    /// How to decide whether this repository needs a fresh clone.
    pub remote_diff_method: RemoteDiffMethod,
    /// Whether to produce an LFS tar alongside the bundle when the
    /// mirror clone has a populated `lfs/` directory.
    pub backup_lfs: bool,
    /// Secret strings (tokens, passwords) to scrub from logs, errors,
    /// and captured subprocess output.
    pub secrets: Vec<String>,
    /// Encryption passphrase. `None` or empty produces a plain bundle.
    pub passphrase: Option<String>,
    /// Verbosity for this repository's tracing span. Independent of
    /// the process-wide filter a binary installs via
    /// [`crate::logging::init_tracing`]/`RUST_LOG`; only raises the
    /// floor for one job, never lowers it.
    pub log_level: tracing::Level,
}

impl ProcessBackupInput {
    /// The passphrase as `Some(&str)` only when non-empty, for call
    /// sites that treat "no encryption" and "empty passphrase" alike.
    #[must_use]
    pub fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_deref().filter(|p| !p.is_empty())
    }
}

/// Tuning for one provider's worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of OS threads pulling repositories off the queue.
    pub concurrency: usize,
    /// Delay a worker sleeps after finishing one repository before
    /// picking up the next, to smooth API/egress pressure. Also used
    /// as the initial stagger when launching workers.
    pub delay: Duration,
}

impl WorkerPoolConfig {
    /// The design's default: 5 workers, 500ms inter-job delay.
    const DEFAULT_CONCURRENCY: usize = 5;
    const DEFAULT_DELAY: Duration = Duration::from_millis(500);

    /// Builds a config from `concurrency`, with the delay taken from
    /// `delay_env_var` if it is set to a valid number of milliseconds,
    /// otherwise [`Self::DEFAULT_DELAY`].
    #[must_use]
    pub fn new(concurrency: usize, delay_env_var: &str) -> Self {
        let delay = std::env::var(delay_env_var)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Self::DEFAULT_DELAY);
        Self { concurrency, delay }
    }
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: Self::DEFAULT_CONCURRENCY,
            delay: Self::DEFAULT_DELAY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delay_is_500ms_without_env_override() {
        std::env::remove_var("REPOVAULT_TEST_DELAY_UNSET");
        let cfg = WorkerPoolConfig::new(10, "REPOVAULT_TEST_DELAY_UNSET");
        assert_eq!(cfg.delay, Duration::from_millis(500));
        assert_eq!(cfg.concurrency, 10);
    }

    #[test]
    fn env_var_overrides_delay() {
        std::env::set_var("REPOVAULT_TEST_DELAY_SET", "1234");
        let cfg = WorkerPoolConfig::new(5, "REPOVAULT_TEST_DELAY_SET");
        assert_eq!(cfg.delay, Duration::from_millis(1234));
        std::env::remove_var("REPOVAULT_TEST_DELAY_SET");
    }

    #[test]
    fn empty_passphrase_behaves_like_none() {
        let input = ProcessBackupInput {
            repository: RepositoryDescriptor {
                name: "r".into(),
                owner: "o".into(),
                path_with_namespace: "o/r".into(),
                domain: "example.com".into(),
                clone_url: "https://example.com/o/r".into(),
                authenticated_clone_url: None,
            },
            backup_root: PathBuf::from("/tmp"),
            retention: 5,
            remote_diff_method: RemoteDiffMethod::Refs,
            backup_lfs: false,
            secrets: vec![],
            passphrase: Some(String::new()),
            log_level: tracing::Level::INFO,
        };
        assert_eq!(input.passphrase(), None);
    }
}
