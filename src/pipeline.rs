//! Backup pipeline: the per-repository orchestration described in the
//! design as steps 1 through 13 — prepare working dir, refs shortcut,
//! mirror clone, optional LFS tar, bundle, encrypt, duplicate-detect,
//! move into the store, prune.

use crate::config::{ProcessBackupInput, RemoteDiffMethod};
use crate::crypto;
use crate::detect;
use crate::error::{RepoVaultError, Result};
use crate::git;
use crate::manifest;
use crate::mask::Masker;
use crate::result::BackupStatus;
use crate::store;
use chrono::Utc;
use std::path::{Path, PathBuf};

/// The artifacts a single run produced in the working directory,
/// tracked through encryption and duplicate detection so later steps
/// know exactly what to move or discard.
struct WorkingArtifacts {
    bundle: PathBuf,
    bundle_encrypted: bool,
    manifest: Option<PathBuf>,
    lfs_archive: Option<PathBuf>,
    lfs_manifest: Option<PathBuf>,
}

fn now_stamp() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// `tracing::span!` needs its level known at the callsite, so a
/// runtime-selected [`tracing::Level`] has to be dispatched through the
/// per-level macros instead of passed straight through.
fn repo_span(level: tracing::Level, domain: &str, path: &str) -> tracing::Span {
    use tracing::Level;
    match level {
        Level::TRACE => tracing::trace_span!("process_backup", domain = %domain, path = %path),
        Level::DEBUG => tracing::debug_span!("process_backup", domain = %domain, path = %path),
        Level::INFO => tracing::info_span!("process_backup", domain = %domain, path = %path),
        Level::WARN => tracing::warn_span!("process_backup", domain = %domain, path = %path),
        Level::ERROR => tracing::error_span!("process_backup", domain = %domain, path = %path),
    }
}

fn remove_dir_ignore_missing(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RepoVaultError::filesystem(path, e)),
    }
}

fn move_into_store(src: &Path, store_dir: &Path) -> Result<PathBuf> {
    let filename = src
        .file_name()
        .ok_or_else(|| RepoVaultError::Manifest {
            message: format!("not a valid filename: {}", src.display()),
        })?;
    let dst = store_dir.join(filename);
    std::fs::rename(src, &dst).map_err(|e| RepoVaultError::filesystem(&dst, e))?;
    Ok(dst)
}

fn remove_file_ignore_missing(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RepoVaultError::filesystem(path, e)),
    }
}

/// Runs `tar -czf <working_dir>/<name>.<ts>.lfs.tar.gz lfs` with
/// `cwd = working_dir`.
fn produce_lfs_archive(working_dir: &Path, name: &str, timestamp: &str) -> Result<PathBuf> {
    let archive_name = format!("{name}.{timestamp}.lfs.tar.gz");
    let archive_path = working_dir.join(&archive_name);

    let output = std::process::Command::new("tar")
        .args(["-czf", &archive_name, "lfs"])
        .current_dir(working_dir)
        .output()
        .map_err(|e| RepoVaultError::Filesystem {
            path: working_dir.to_path_buf(),
            source: e,
        })?;

    if !output.status.success() {
        return Err(RepoVaultError::Filesystem {
            path: archive_path,
            source: std::io::Error::new(
                std::io::ErrorKind::Other,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ),
        });
    }
    Ok(archive_path)
}

fn lfs_manifest_path_for(archive_path: &Path) -> Option<PathBuf> {
    let filename = archive_path.file_name()?.to_str()?;
    let stem = filename.strip_suffix(".lfs.tar.gz")?;
    Some(archive_path.with_file_name(format!("{stem}.manifest")))
}

fn cleanup_working_artifacts(artifacts: &WorkingArtifacts) -> Result<()> {
    remove_file_ignore_missing(&artifacts.bundle)?;
    if let Some(p) = &artifacts.manifest {
        remove_file_ignore_missing(p)?;
    }
    if let Some(p) = &artifacts.lfs_archive {
        remove_file_ignore_missing(p)?;
    }
    if let Some(p) = &artifacts.lfs_manifest {
        remove_file_ignore_missing(p)?;
    }
    Ok(())
}

fn move_working_artifacts(artifacts: &WorkingArtifacts, store_dir: &Path) -> Result<()> {
    store::ensure_dir(store_dir)?;
    move_into_store(&artifacts.bundle, store_dir)?;
    if let Some(p) = &artifacts.manifest {
        move_into_store(p, store_dir)?;
    }
    if let Some(p) = &artifacts.lfs_archive {
        move_into_store(p, store_dir)?;
    }
    if let Some(p) = &artifacts.lfs_manifest {
        move_into_store(p, store_dir)?;
    }
    Ok(())
}

/// Backs up one repository: prepares a working directory, clones a
/// mirror (unless the refs shortcut says there's nothing new),
/// bundles it, optionally encrypts and archives LFS content, dedupes
/// against the store, and prunes. Always cleans up the working
/// directory before returning, success or failure.
///
/// # Errors
///
/// Returns the first fatal error encountered (clone, bundle creation,
/// encryption of the bundle itself, moving artifacts into the store,
/// or pruning). Warnings — a missing manifest, a failed LFS archive, a
/// failed manifest encryption — are logged and do not fail the run.
pub fn process_backup(input: &ProcessBackupInput) -> Result<BackupStatus> {
    let repo = &input.repository;
    let working_path = input
        .backup_root
        .join(".working")
        .join(&repo.domain)
        .join(&repo.path_with_namespace);
    let store_path = input.backup_root.join(&repo.domain).join(&repo.path_with_namespace);

    remove_dir_ignore_missing(&working_path)?;

    let masker = Masker::new(input.secrets.clone());
    let outcome = run(input, &working_path, &store_path, &masker);

    if let Err(e) = remove_dir_ignore_missing(&working_path) {
        tracing::warn!(error = %e, path = %working_path.display(), "failed to remove working directory after backup attempt");
    }

    outcome
}

fn run(
    input: &ProcessBackupInput,
    working_path: &Path,
    store_path: &Path,
    masker: &Masker,
) -> Result<BackupStatus> {
    let repo = &input.repository;
    let span = repo_span(input.log_level, &repo.domain, &repo.path_with_namespace);
    let _entered = span.enter();

    let passphrase = input.passphrase();
    let clone_url = repo.effective_clone_url();

    if input.remote_diff_method == RemoteDiffMethod::Refs
        && detect::should_skip_clone(clone_url, store_path, passphrase, input.backup_lfs, masker)
    {
        tracing::info!(
            domain = %repo.domain,
            path = %repo.path_with_namespace,
            "skipping clone of {} repo '{}'",
            repo.domain,
            repo.path_with_namespace
        );
        return Ok(BackupStatus::Skipped);
    }

    git::clone_mirror(clone_url, working_path, masker)?;

    let timestamp = now_stamp();

    let mut lfs_archive = None;
    let mut lfs_manifest = None;
    if input.backup_lfs && working_path.join("lfs").exists() {
        match produce_lfs_archive(working_path, &repo.name, &timestamp) {
            Ok(archive_path) => {
                if let Err(e) = manifest::create_lfs_manifest(&archive_path, &timestamp) {
                    tracing::warn!(error = %e, "failed to create LFS manifest");
                } else {
                    lfs_manifest = lfs_manifest_path_for(&archive_path);
                }
                lfs_archive = Some(archive_path);
            }
            Err(e) => tracing::warn!(error = %e, "failed to produce LFS archive"),
        }
    }

    if git::is_empty_clone(working_path)? {
        tracing::info!(
            domain = %repo.domain,
            path = %repo.path_with_namespace,
            "repository is empty, skipping bundle creation"
        );
        return Ok(BackupStatus::Skipped);
    }

    let bundle_path = working_path.join(format!("{}.{}.bundle", repo.name, timestamp));
    git::bundle_create(working_path, &bundle_path)?;

    let mut artifacts = WorkingArtifacts {
        bundle: bundle_path.clone(),
        bundle_encrypted: false,
        manifest: None,
        lfs_archive,
        lfs_manifest,
    };

    if let Some(pp) = passphrase {
        match manifest::create_bundle_manifest(&bundle_path, &timestamp) {
            Ok(path) => artifacts.manifest = Some(path),
            Err(e) => tracing::warn!(error = %e, "failed to create bundle manifest"),
        }

        let encrypted_bundle_path =
            working_path.join(format!("{}.{}.bundle.age", repo.name, timestamp));
        crypto::encrypt(&bundle_path, &encrypted_bundle_path, pp)?;
        remove_file_ignore_missing(&bundle_path)?;
        artifacts.bundle = encrypted_bundle_path;
        artifacts.bundle_encrypted = true;

        if let Some(manifest_path) = artifacts.manifest.clone() {
            let encrypted_manifest_path =
                working_path.join(format!("{}.{}.manifest.age", repo.name, timestamp));
            match crypto::encrypt(&manifest_path, &encrypted_manifest_path, pp) {
                Ok(()) => {
                    if let Err(e) = remove_file_ignore_missing(&manifest_path) {
                        tracing::warn!(error = %e, "failed to remove plain manifest after encryption");
                    }
                    artifacts.manifest = Some(encrypted_manifest_path);
                }
                Err(e) => tracing::warn!(error = %e, "failed to encrypt bundle manifest"),
            }
        }
    }

    let store_latest_before_move = store::latest_bundle(store_path)?;

    let decision = detect::detect_duplicate(
        &artifacts.bundle,
        artifacts.bundle_encrypted,
        store_path,
        passphrase,
    )?;

    if decision.duplicate && !decision.should_replace {
        cleanup_working_artifacts(&artifacts)?;
        store::prune(store_path, input.retention)?;
        return Ok(BackupStatus::Skipped);
    }

    move_working_artifacts(&artifacts, store_path)?;

    if decision.should_replace {
        if let Some(old) = store_latest_before_move {
            remove_file_ignore_missing(&old.path(store_path))?;
        }
    }

    store::prune(store_path, input.retention)?;

    Ok(BackupStatus::Ok)
}
