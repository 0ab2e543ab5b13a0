//! Artifact store: filesystem layout, naming, enumeration, and
//! retention for one repository's backup directory.
//!
//! A store directory is flat — one level, no subdirectories — and
//! holds bundles (plain or `.age`-encrypted), their sibling manifests,
//! LFS archives and their manifests, and any artifact that has been
//! quarantined with a trailing `.invalid`.

use crate::error::{RepoVaultError, Result};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const PLAIN_BUNDLE_SUFFIX: &str = ".bundle";
const ENCRYPTED_BUNDLE_SUFFIX: &str = ".bundle.age";
const ENCRYPTED_MANIFEST_SUFFIX: &str = ".manifest.age";
const PLAIN_MANIFEST_SUFFIX: &str = ".manifest";
const LFS_ARCHIVE_SUFFIX: &str = ".lfs.tar.gz";
const INVALID_SUFFIX: &str = ".invalid";

/// One bundle found in a store directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    /// Filename as it appears on disk.
    pub filename: String,
    /// `<name>.<timestamp>` with the kind suffix stripped.
    pub stem: String,
    /// The 14-digit UTC timestamp token.
    pub timestamp: String,
    /// Size in bytes.
    pub size: u64,
    /// Whether this is the `.bundle.age` (encrypted) variant.
    pub encrypted: bool,
}

impl BundleEntry {
    /// Full path of this entry within `dir`.
    #[must_use]
    pub fn path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.filename)
    }
}

/// Splits a bundle or manifest filename (with any `.age` suffix
/// already stripped) into `(stem, timestamp)`.
///
/// The timestamp token is the second-from-last `.`-separated token of
/// the logical name: for `<name>.<ts>.bundle` that's always `ts`,
/// regardless of how many dots `name` itself contains, because exactly
/// one token (the kind word) follows it.
fn split_stem_and_timestamp(logical_name: &str) -> Option<(String, String)> {
    let tokens: Vec<&str> = logical_name.split('.').collect();
    if tokens.len() < 3 {
        return None;
    }
    let ts = tokens[tokens.len() - 2];
    if ts.len() != 14 || !ts.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let stem = tokens[..tokens.len() - 1].join(".");
    Some((stem, ts.to_string()))
}

/// Classifies a filename found in a store directory as a plain or
/// encrypted bundle, returning its stem and timestamp if the name
/// parses. Files that are not bundles at all (manifests, LFS archives,
/// already-quarantined files) are not classified by this function.
fn classify_bundle(filename: &str) -> Option<BundleEntry> {
    if filename.ends_with(INVALID_SUFFIX) {
        return None;
    }
    let (logical, encrypted) = if let Some(base) = filename.strip_suffix(ENCRYPTED_BUNDLE_SUFFIX) {
        (format!("{base}.bundle"), true)
    } else if filename.ends_with(PLAIN_BUNDLE_SUFFIX) {
        (filename.to_string(), false)
    } else {
        return None;
    };
    let (stem, timestamp) = split_stem_and_timestamp(&logical)?;
    Some(BundleEntry {
        filename: filename.to_string(),
        stem,
        timestamp,
        size: 0,
        encrypted,
    })
}

/// Ensures `dir` exists, creating it (and parents) with owner-only
/// read/write/execute permission (`0755`) if absent.
///
/// # Errors
///
/// Returns a filesystem error if the directory cannot be created.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(|e| RepoVaultError::filesystem(dir, e))?;
    set_dir_permissions(dir)?;
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(dir: &Path) -> Result<()> {
    let perms = std::fs::Permissions::from_mode(0o755);
    std::fs::set_permissions(dir, perms).map_err(|e| RepoVaultError::filesystem(dir, e))
}

#[cfg(not(unix))]
fn set_dir_permissions(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Lists every bundle in `dir`, quarantining (renaming to `.invalid`)
/// any filename whose timestamp cannot be parsed. Quarantined files are
/// excluded from the returned list.
///
/// # Errors
///
/// Returns a filesystem error if `dir` cannot be read.
pub fn list_bundles(dir: &Path) -> Result<Vec<BundleEntry>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| RepoVaultError::filesystem(dir, e))? {
        let entry = entry.map_err(|e| RepoVaultError::filesystem(dir, e))?;
        let file_type = entry.file_type().map_err(|e| RepoVaultError::filesystem(dir, e))?;
        if !file_type.is_file() {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().into_owned();
        let is_bundle_shaped = filename.ends_with(PLAIN_BUNDLE_SUFFIX)
            || filename.ends_with(ENCRYPTED_BUNDLE_SUFFIX);
        if !is_bundle_shaped || filename.ends_with(INVALID_SUFFIX) {
            continue;
        }
        match classify_bundle(&filename) {
            Some(mut bundle) => {
                let metadata = entry.metadata().map_err(|e| RepoVaultError::filesystem(dir, e))?;
                bundle.size = metadata.len();
                out.push(bundle);
            }
            None => {
                tracing::warn!(filename = %filename, "quarantining bundle with unparseable timestamp");
                rename_invalid(dir, &filename)?;
            }
        }
    }
    Ok(out)
}

/// Returns `true` if `dir` contains at least one plain or encrypted
/// bundle (not counting quarantined files).
///
/// # Errors
///
/// Returns a filesystem error if `dir` cannot be read.
pub fn has_bundles(dir: &Path) -> Result<bool> {
    Ok(!list_bundles(dir)?.is_empty())
}

/// The bundle with the largest numeric timestamp, if any.
///
/// # Errors
///
/// Returns a filesystem error if `dir` cannot be read.
pub fn latest_bundle(dir: &Path) -> Result<Option<BundleEntry>> {
    Ok(list_bundles(dir)?
        .into_iter()
        .max_by(|a, b| a.timestamp.cmp(&b.timestamp)))
}

/// Atomically renames `filename` within `dir` to carry a trailing
/// `.invalid`, and renames its sibling encrypted manifest (same stem)
/// if one exists.
///
/// # Errors
///
/// Returns a filesystem error if the rename fails for a reason other
/// than the source file already being gone.
pub fn rename_invalid(dir: &Path, filename: &str) -> Result<()> {
    let src = dir.join(filename);
    let dst = dir.join(format!("{filename}{INVALID_SUFFIX}"));
    match std::fs::rename(&src, &dst) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(RepoVaultError::filesystem(&src, e)),
    }

    if let Some(base) = filename.strip_suffix(ENCRYPTED_BUNDLE_SUFFIX) {
        let manifest_name = format!("{base}{ENCRYPTED_MANIFEST_SUFFIX}");
        let manifest_src = dir.join(&manifest_name);
        if manifest_src.exists() {
            let manifest_dst = dir.join(format!("{manifest_name}{INVALID_SUFFIX}"));
            std::fs::rename(&manifest_src, &manifest_dst)
                .map_err(|e| RepoVaultError::filesystem(&manifest_src, e))?;
        }
    }
    Ok(())
}

/// Whether an LFS archive exists in `dir` for the bundle stem `stem`.
#[must_use]
pub fn lfs_archive_exists_for(dir: &Path, stem: &str) -> bool {
    dir.join(format!("{stem}{LFS_ARCHIVE_SUFFIX}")).exists()
}

/// Deletes every sibling of `stem` (manifest, encrypted manifest, LFS
/// archive, LFS manifest) that exists in `dir`. Missing siblings are
/// not an error.
fn remove_siblings(dir: &Path, stem: &str) -> Result<()> {
    for suffix in [ENCRYPTED_MANIFEST_SUFFIX, PLAIN_MANIFEST_SUFFIX, LFS_ARCHIVE_SUFFIX] {
        let path = dir.join(format!("{stem}{suffix}"));
        match std::fs::remove_file(&path) {
            Ok(()) | Err(_) if !path.exists() => {}
            Err(e) => return Err(RepoVaultError::filesystem(&path, e)),
        }
    }
    Ok(())
}

/// Deletes the oldest bundles in `dir` until at most `keep_count`
/// remain, along with each deleted bundle's sibling manifests and LFS
/// artifacts. `keep_count <= 0` disables pruning. Files already marked
/// `.invalid` are never touched.
///
/// # Errors
///
/// Returns a filesystem or retention error if a deletion fails.
pub fn prune(dir: &Path, keep_count: i64) -> Result<()> {
    if keep_count <= 0 {
        return Ok(());
    }
    let mut bundles = list_bundles(dir)?;
    bundles.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    let keep_count = keep_count as usize;
    if bundles.len() <= keep_count {
        return Ok(());
    }
    let to_delete = bundles.len() - keep_count;
    for bundle in &bundles[..to_delete] {
        let path = bundle.path(dir);
        std::fs::remove_file(&path).map_err(|e| RepoVaultError::Retention {
            message: format!("failed to delete '{}': {e}", path.display()),
        })?;
        remove_siblings(dir, &bundle.stem)?;
    }
    Ok(())
}

/// Writes `contents` to `path` with owner-only read/write (`0600`)
/// permission, as required for manifests.
///
/// # Errors
///
/// Returns a filesystem error if the file cannot be written.
pub fn write_owner_only(path: &Path, contents: &[u8]) -> Result<()> {
    std::fs::write(path, contents).map_err(|e| RepoVaultError::filesystem(path, e))?;
    set_file_permissions(path, 0o600)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path, mode: u32) -> Result<()> {
    let perms = std::fs::Permissions::from_mode(mode);
    std::fs::set_permissions(path, perms).map_err(|e| RepoVaultError::filesystem(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use test_case::test_case;

    #[test_case("test-repo.20231001120000.bundle", Some(("test-repo.20231001120000", "20231001120000")); "plain bundle name")]
    #[test_case("my.repo.name.20231001120000.bundle", Some(("my.repo.name.20231001120000", "20231001120000")); "name containing dots")]
    #[test_case("test-repo.notadate.bundle", None; "non numeric timestamp")]
    #[test_case("nodots", None; "too few tokens")]
    fn splits_stem_and_timestamp_as_expected(logical_name: &str, expected: Option<(&str, &str)>) {
        let got = split_stem_and_timestamp(logical_name);
        assert_eq!(got, expected.map(|(stem, ts)| (stem.to_string(), ts.to_string())));
    }

    #[test_case("test-repo.20231001120000.bundle", false; "plain bundle")]
    #[test_case("test-repo.20231001120000.bundle.age", true; "encrypted bundle")]
    fn classify_bundle_reports_encryption_and_stem(filename: &str, expected_encrypted: bool) {
        let entry = classify_bundle(filename).unwrap();
        assert_eq!(entry.encrypted, expected_encrypted);
        assert_eq!(entry.stem, "test-repo.20231001120000");
    }

    #[test]
    fn classify_bundle_ignores_quarantined_files() {
        assert!(classify_bundle("test-repo.20231001120000.bundle.invalid").is_none());
    }

    #[test]
    fn list_bundles_quarantines_malformed_names() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("test-repo.notadate.bundle"), b"x").unwrap();
        std::fs::write(dir.path().join("test-repo.20231001120000.bundle"), b"x").unwrap();

        let bundles = list_bundles(dir.path()).unwrap();
        assert_eq!(bundles.len(), 1);
        assert!(dir.path().join("test-repo.notadate.bundle.invalid").exists());
        assert!(!dir.path().join("test-repo.notadate.bundle").exists());
    }

    #[test]
    fn latest_bundle_picks_largest_timestamp() {
        let dir = tempdir().unwrap();
        for ts in ["20230101000000", "20231231235959", "20220601000000"] {
            std::fs::write(dir.path().join(format!("r.{ts}.bundle")), b"x").unwrap();
        }
        let latest = latest_bundle(dir.path()).unwrap().unwrap();
        assert_eq!(latest.timestamp, "20231231235959");
    }

    #[test]
    fn prune_keeps_only_newest_n_and_removes_siblings() {
        let dir = tempdir().unwrap();
        for ts in ["20220101000000", "20220102000000", "20220103000000"] {
            std::fs::write(dir.path().join(format!("r.{ts}.bundle")), b"x").unwrap();
            std::fs::write(dir.path().join(format!("r.{ts}.manifest")), b"{}").unwrap();
        }
        prune(dir.path(), 2).unwrap();

        let remaining = list_bundles(dir.path()).unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(!dir.path().join("r.20220101000000.bundle").exists());
        assert!(!dir.path().join("r.20220101000000.manifest").exists());
        assert!(dir.path().join("r.20220103000000.bundle").exists());
    }

    #[test]
    fn prune_disabled_when_keep_count_non_positive() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("r.20220101000000.bundle"), b"x").unwrap();
        prune(dir.path(), 0).unwrap();
        assert_eq!(list_bundles(dir.path()).unwrap().len(), 1);
    }
}
