//! Worker pool: drives a provider's repository list through
//! [`crate::pipeline::process_backup`] on a bounded number of OS
//! threads.
//!
//! Subprocess calls (`git clone`, `git bundle create`, `tar`) are not
//! cancellable once started, so this is a plain thread pool fed by a
//! bounded queue rather than an async executor — there is nothing to
//! gain from cooperative cancellation here, and a blocking `Command`
//! call is exactly as at-home on an OS thread as anywhere else.

use crate::config::{ProcessBackupInput, RemoteDiffMethod, WorkerPoolConfig};
use crate::descriptor::{RepositoryDescriptor, RepositorySource, SetupRepo};
use crate::mask::Masker;
use crate::pipeline;
use crate::result::{BackupStatus, ProviderBackupResult, RepoBackupResult};
use std::path::PathBuf;

/// The per-repository inputs that stay constant across one provider's
/// run, everything [`ProcessBackupInput`] needs besides the repository
/// itself.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Root of the backup tree.
    pub backup_root: PathBuf,
    /// Bundles to keep per repository after pruning.
    pub retention: i64,
    /// How to decide whether a repository needs a fresh clone.
    pub remote_diff_method: RemoteDiffMethod,
    /// Whether to produce an LFS tar alongside each bundle.
    pub backup_lfs: bool,
    /// Secret strings to scrub from logs and errors.
    pub secrets: Vec<String>,
    /// Encryption passphrase; `None` or empty produces plain bundles.
    pub passphrase: Option<String>,
    /// Verbosity for each repository's tracing span.
    pub log_level: tracing::Level,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            backup_root: PathBuf::new(),
            retention: 0,
            remote_diff_method: RemoteDiffMethod::default(),
            backup_lfs: false,
            secrets: Vec::new(),
            passphrase: None,
            log_level: tracing::Level::INFO,
        }
    }
}

fn repository_path(descriptor: &RepositoryDescriptor) -> String {
    format!("{}/{}", descriptor.domain, descriptor.path_with_namespace)
}

fn build_input(descriptor: RepositoryDescriptor, options: &RunOptions) -> ProcessBackupInput {
    ProcessBackupInput {
        repository: descriptor,
        backup_root: options.backup_root.clone(),
        retention: options.retention,
        remote_diff_method: options.remote_diff_method,
        backup_lfs: options.backup_lfs,
        secrets: options.secrets.clone(),
        passphrase: options.passphrase.clone(),
        log_level: options.log_level,
    }
}

fn run_one(
    mut descriptor: RepositoryDescriptor,
    setup: &dyn SetupRepo,
    options: &RunOptions,
    masker: &Masker,
) -> RepoBackupResult {
    let path = repository_path(&descriptor);
    if let Err(message) = setup.setup(&mut descriptor) {
        tracing::warn!(repository = %path, error = %message, "failed to set up repository credentials");
        return RepoBackupResult::failed(path, message);
    }
    let input = build_input(descriptor, options);
    match pipeline::process_backup(&input) {
        Ok(BackupStatus::Ok) => RepoBackupResult::ok(path),
        Ok(BackupStatus::Skipped) => RepoBackupResult::skipped(path),
        Ok(BackupStatus::Failed) => RepoBackupResult::failed(path, "backup reported failure"),
        Err(e) => RepoBackupResult::failed(path, masker.mask(&e.to_string())),
    }
}

/// Enumerates `source`'s repositories, then backs each up across
/// `pool.concurrency` worker threads. Each worker runs `setup` on a
/// descriptor itself, immediately before processing it, so a
/// network-bound setup round trip overlaps with every other worker's
/// own setup and processing rather than serializing ahead of dispatch.
/// Workers start staggered by a fraction of `pool.delay` to smooth
/// initial load, and each sleeps `pool.delay` after finishing one
/// repository before picking up the next.
///
/// Every per-repository outcome — success, skip, or fatal error — is
/// captured as a [`RepoBackupResult`] rather than propagated; the
/// returned [`ProviderBackupResult`] has exactly one entry per
/// enumerated repository, in completion order rather than input order.
#[must_use]
pub fn backup_provider(
    source: &dyn RepositorySource,
    setup: &dyn SetupRepo,
    options: &RunOptions,
    pool: &WorkerPoolConfig,
) -> ProviderBackupResult {
    let repositories = match source.list_repositories() {
        Ok(repos) => repos,
        Err(message) => {
            tracing::error!(
                provider = source.provider_name(),
                error = %message,
                "failed to enumerate repositories"
            );
            return ProviderBackupResult {
                per_repo: Vec::new(),
                aggregate_error: Some(message),
            };
        }
    };

    if repositories.is_empty() {
        return ProviderBackupResult::default();
    }

    let worker_count = pool.concurrency.max(1).min(repositories.len());
    let (job_tx, job_rx) = crossbeam_channel::bounded::<RepositoryDescriptor>(worker_count);
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<RepoBackupResult>();
    let masker = Masker::new(options.secrets.clone());

    std::thread::scope(|scope| {
        for worker_id in 0..worker_count {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let options = &*options;
            let masker = &masker;
            let delay = pool.delay;
            let stagger = (delay * worker_id as u32) / worker_count as u32;

            scope.spawn(move || {
                if !stagger.is_zero() {
                    std::thread::sleep(stagger);
                }
                for descriptor in job_rx.iter() {
                    let result = run_one(descriptor, setup, options, masker);
                    if result_tx.send(result).is_err() {
                        break;
                    }
                    std::thread::sleep(delay);
                }
            });
        }

        for descriptor in repositories {
            if job_tx.send(descriptor).is_err() {
                break;
            }
        }
        drop(job_tx);
        drop(result_tx);
    });

    ProviderBackupResult {
        per_repo: result_rx.try_iter().collect(),
        aggregate_error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::BackupStatus;

    mockall::mock! {
        Source {}
        impl RepositorySource for Source {
            fn provider_name(&self) -> &str;
            fn list_repositories(&self) -> Result<Vec<RepositoryDescriptor>, String>;
        }
    }

    mockall::mock! {
        Setup {}
        impl SetupRepo for Setup {
            fn setup(&self, descriptor: &mut RepositoryDescriptor) -> Result<(), String>;
        }
    }

    fn descriptor(name: &str) -> RepositoryDescriptor {
        RepositoryDescriptor {
            name: name.to_string(),
            owner: "owner".to_string(),
            path_with_namespace: format!("owner/{name}"),
            domain: "example.com".to_string(),
            clone_url: format!("https://example.com/owner/{name}"),
            authenticated_clone_url: None,
        }
    }

    #[test]
    fn enumeration_failure_short_circuits_with_aggregate_error() {
        let mut source = MockSource::new();
        source
            .expect_list_repositories()
            .returning(|| Err("provider unreachable".to_string()));
        source.expect_provider_name().return_const("mock".to_owned());
        let setup = MockSetup::new();
        let options = RunOptions::default();
        let pool = WorkerPoolConfig {
            concurrency: 2,
            delay: std::time::Duration::from_millis(0),
        };

        let result = backup_provider(&source, &setup, &options, &pool);

        assert!(result.per_repo.is_empty());
        assert_eq!(result.aggregate_error.as_deref(), Some("provider unreachable"));
    }

    #[test]
    fn empty_repository_list_produces_empty_result() {
        let mut source = MockSource::new();
        source.expect_list_repositories().returning(|| Ok(Vec::new()));
        let setup = MockSetup::new();
        let options = RunOptions::default();
        let pool = WorkerPoolConfig::default();

        let result = backup_provider(&source, &setup, &options, &pool);

        assert!(result.per_repo.is_empty());
        assert!(result.aggregate_error.is_none());
    }

    #[test]
    fn setup_failure_is_reported_as_failed_without_touching_the_pipeline() {
        let mut source = MockSource::new();
        source
            .expect_list_repositories()
            .returning(|| Ok(vec![descriptor("one"), descriptor("two")]));
        let mut setup = MockSetup::new();
        setup
            .expect_setup()
            .times(2)
            .returning(|_| Err("token exchange failed".to_string()));
        let options = RunOptions::default();
        let pool = WorkerPoolConfig {
            concurrency: 2,
            delay: std::time::Duration::from_millis(0),
        };

        let result = backup_provider(&source, &setup, &options, &pool);

        assert_eq!(result.per_repo.len(), 2);
        assert!(result
            .per_repo
            .iter()
            .all(|r| matches!(r.status, BackupStatus::Failed)));
    }
}
