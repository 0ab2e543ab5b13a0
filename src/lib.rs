//! # RepoVault
//!
//! A backup engine for git repositories hosted on remote providers.
//!
//! RepoVault enumerates repositories a caller's credentials can see,
//! decides per-repository whether the existing backup already matches
//! the remote, and if not produces a fresh, self-contained `git bundle`
//! (plus an optional LFS tarball), optionally encrypts the result with
//! a passphrase, records a JSON manifest describing it, and prunes old
//! artifacts down to a configured retention count. A bounded worker
//! pool drives the whole thing across as many repositories as a
//! provider enumerates.
//!
//! ## What this crate does not do
//!
//! Discovering repositories from a specific host (GitHub, GitLab,
//! Gitea, Bitbucket, Azure DevOps, sourcehut) and authenticating to it
//! are modeled only as the [`descriptor::RepositorySource`] and
//! [`descriptor::SetupRepo`] traits. Implementing those against a real
//! provider's API is left to the binary that embeds this crate.
//!
//! ## Example
//!
//! ```rust,no_run
//! use repovault::descriptor::{RepositoryDescriptor, RepositorySource, SetupRepo};
//! use repovault::config::{RemoteDiffMethod, WorkerPoolConfig};
//! use repovault::pool::RunOptions;
//! use std::path::PathBuf;
//!
//! struct StaticSource(Vec<RepositoryDescriptor>);
//! impl RepositorySource for StaticSource {
//!     fn provider_name(&self) -> &str { "example" }
//!     fn list_repositories(&self) -> Result<Vec<RepositoryDescriptor>, String> {
//!         Ok(self.0.clone())
//!     }
//! }
//!
//! struct NoAuth;
//! impl SetupRepo for NoAuth {
//!     fn setup(&self, _descriptor: &mut RepositoryDescriptor) -> Result<(), String> {
//!         Ok(())
//!     }
//! }
//!
//! let source = StaticSource(vec![]);
//! let setup = NoAuth;
//! let options = RunOptions {
//!     backup_root: PathBuf::from("/tmp/backups"),
//!     retention: 10,
//!     remote_diff_method: RemoteDiffMethod::Refs,
//!     ..RunOptions::default()
//! };
//! let pool = WorkerPoolConfig::default();
//! let result = repovault::backup(&source, &setup, &options, &pool);
//! assert_eq!(result.ok_count() + result.skipped_count() + result.failed_count(), 0);
//! ```

#![warn(clippy::all, clippy::cargo, missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod config;
pub mod crypto;
pub mod descriptor;
pub mod detect;
pub mod error;
pub mod git;
pub mod logging;
pub mod manifest;
pub mod mask;
pub mod pipeline;
pub mod pool;
pub mod result;
pub mod store;

pub use descriptor::{RepositoryDescriptor, RepositorySource, SetupRepo};
pub use error::{RepoVaultError, Result};
pub use pool::RunOptions;
pub use result::{BackupStatus, ProviderBackupResult, RepoBackupResult};

use config::WorkerPoolConfig;

/// Backs up every repository `source` enumerates, using `setup` to
/// attach credentials and `pool` to size and pace the worker pool.
///
/// This is the crate's one external entry point: everything else
/// (provider HTTP clients, CLI wiring, config-file loading) lives
/// outside it.
#[must_use]
pub fn backup(
    source: &dyn RepositorySource,
    setup: &dyn SetupRepo,
    options: &RunOptions,
    pool: &WorkerPoolConfig,
) -> ProviderBackupResult {
    self::pool::backup_provider(source, setup, options, pool)
}
