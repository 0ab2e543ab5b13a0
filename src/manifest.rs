//! Manifest module: JSON metadata sidecars for bundles and LFS
//! archives.
//!
//! A bundle manifest records the bundle's SHA-256, its refs, the
//! bundle's own filename, and when it was created — enough to decide
//! duplicate vs. distinct without needing the bundle itself. An LFS
//! manifest is the same shape minus the refs, since `git bundle
//! list-heads` has nothing to say about an LFS tarball.

use crate::error::{RepoVaultError, Result};
use crate::git::{self, RefsMap};
use chrono::{NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const ENCRYPTED_BUNDLE_SUFFIX: &str = ".bundle.age";
const PLAIN_BUNDLE_SUFFIX: &str = ".bundle";
const ENCRYPTED_MANIFEST_SUFFIX: &str = ".manifest.age";
const PLAIN_MANIFEST_SUFFIX: &str = ".manifest";

/// A bundle's JSON sidecar: creation time, content hash, source
/// filename, and refs map. Serialized pretty-printed, UTF-8, no BOM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// RFC3339 creation timestamp.
    pub creation_time: String,
    /// Lowercase hex SHA-256 of the unencrypted bundle bytes.
    pub bundle_hash: String,
    /// Basename of the unencrypted bundle this manifest describes.
    pub bundle_file: String,
    /// Refs captured from `git bundle list-heads`, pseudo-refs excluded.
    pub git_refs: RefsMap,
}

/// An LFS archive's JSON sidecar: the same shape as [`Manifest`] minus
/// the refs field, since an LFS tarball has no git refs of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LfsManifest {
    /// RFC3339 creation timestamp.
    pub creation_time: String,
    /// Lowercase hex SHA-256 of the archive bytes.
    pub bundle_hash: String,
    /// Basename of the archive this manifest describes.
    pub bundle_file: String,
}

/// Computes the lowercase hex SHA-256 of a file's contents.
///
/// # Errors
///
/// Returns a filesystem error if the file cannot be read.
pub fn sha256_hex(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| RepoVaultError::filesystem(path, e))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn rfc3339_from_stamp(timestamp: &str) -> Result<String> {
    let naive = NaiveDateTime::parse_from_str(timestamp, "%Y%m%d%H%M%S").map_err(|e| {
        RepoVaultError::Manifest {
            message: format!("invalid timestamp '{timestamp}': {e}"),
        }
    })?;
    Ok(Utc.from_utc_datetime(&naive).to_rfc3339())
}

/// Computes the plain-manifest path adjacent to `bundle_path`, given
/// its kind suffix (`.bundle`, `.bundle.age`, or `.lfs.tar.gz`).
fn manifest_path_for(artifact_path: &Path, is_lfs: bool) -> Result<PathBuf> {
    let filename = artifact_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RepoVaultError::Manifest {
            message: format!("not a valid filename: {}", artifact_path.display()),
        })?;

    let stem = if is_lfs {
        filename
            .strip_suffix(".lfs.tar.gz")
            .ok_or_else(|| RepoVaultError::Manifest {
                message: format!("not an LFS archive: {filename}"),
            })?
    } else if let Some(base) = filename.strip_suffix(ENCRYPTED_BUNDLE_SUFFIX) {
        base
    } else if let Some(base) = filename.strip_suffix(PLAIN_BUNDLE_SUFFIX) {
        base
    } else {
        return Err(RepoVaultError::Manifest {
            message: format!("not a bundle: {filename}"),
        });
    };

    Ok(artifact_path.with_file_name(format!("{stem}{PLAIN_MANIFEST_SUFFIX}")))
}

/// Creates the manifest for a freshly created (unencrypted) bundle,
/// writing it adjacent to `bundle_path` under `.manifest` with
/// owner-only permission.
///
/// A failure here should be treated as a warning by the caller: a
/// bundle without a manifest is still a usable backup.
///
/// # Errors
///
/// Returns an error if the bundle's refs cannot be read, the timestamp
/// does not parse, or the manifest cannot be written.
pub fn create_bundle_manifest(bundle_path: &Path, timestamp: &str) -> Result<PathBuf> {
    let bundle_hash = sha256_hex(bundle_path)?;
    let git_refs = git::bundle_list_heads(bundle_path)?;
    let creation_time = rfc3339_from_stamp(timestamp)?;
    let bundle_file = bundle_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let manifest = Manifest {
        creation_time,
        bundle_hash,
        bundle_file,
        git_refs,
    };
    let json = serde_json::to_string_pretty(&manifest).map_err(|e| RepoVaultError::Manifest {
        message: format!("failed to serialize manifest: {e}"),
    })?;

    let manifest_path = manifest_path_for(bundle_path, false)?;
    crate::store::write_owner_only(&manifest_path, json.as_bytes())?;
    Ok(manifest_path)
}

/// Creates the manifest for a freshly created LFS archive.
///
/// # Errors
///
/// Returns an error if the archive cannot be hashed, the timestamp
/// does not parse, or the manifest cannot be written.
pub fn create_lfs_manifest(archive_path: &Path, timestamp: &str) -> Result<PathBuf> {
    let bundle_hash = sha256_hex(archive_path)?;
    let creation_time = rfc3339_from_stamp(timestamp)?;
    let bundle_file = archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let manifest = LfsManifest {
        creation_time,
        bundle_hash,
        bundle_file,
    };
    let json = serde_json::to_string_pretty(&manifest).map_err(|e| RepoVaultError::Manifest {
        message: format!("failed to serialize LFS manifest: {e}"),
    })?;

    let manifest_path = manifest_path_for(archive_path, true)?;
    crate::store::write_owner_only(&manifest_path, json.as_bytes())?;
    Ok(manifest_path)
}

/// Locates and reads the bundle manifest sibling to `bundle_path`.
///
/// Returns `Ok(None)` if no sibling manifest exists. If the bundle is
/// encrypted, the sibling manifest is assumed encrypted too and is
/// decrypted (via a temporary file) with `passphrase` before parsing.
///
/// # Errors
///
/// Returns an error only on malformed JSON, or on a decryption failure
/// when a passphrase was supplied for an encrypted manifest. If the
/// manifest is encrypted and no passphrase is given, this is also
/// reported as an error since there is no way to read it.
pub fn read_manifest(bundle_path: &Path, passphrase: Option<&str>) -> Result<Option<Manifest>> {
    let filename = bundle_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    let (manifest_path, encrypted) = if let Some(base) = filename.strip_suffix(ENCRYPTED_BUNDLE_SUFFIX) {
        (bundle_path.with_file_name(format!("{base}{ENCRYPTED_MANIFEST_SUFFIX}")), true)
    } else if let Some(base) = filename.strip_suffix(PLAIN_BUNDLE_SUFFIX) {
        (bundle_path.with_file_name(format!("{base}{PLAIN_MANIFEST_SUFFIX}")), false)
    } else {
        return Err(RepoVaultError::Manifest {
            message: format!("not a bundle: {filename}"),
        });
    };

    if !manifest_path.exists() {
        return Ok(None);
    }

    let json = if encrypted {
        let passphrase = passphrase.ok_or_else(|| RepoVaultError::Manifest {
            message: "manifest is encrypted but no passphrase was supplied".to_string(),
        })?;
        let tmp = tempfile::NamedTempFile::new().map_err(|e| RepoVaultError::Manifest {
            message: format!("failed to create temporary file: {e}"),
        })?;
        crate::crypto::decrypt(&manifest_path, tmp.path(), passphrase)?;
        std::fs::read_to_string(tmp.path()).map_err(|e| RepoVaultError::filesystem(tmp.path(), e))?
    } else {
        std::fs::read_to_string(&manifest_path).map_err(|e| RepoVaultError::filesystem(&manifest_path, e))?
    };

    let manifest: Manifest = serde_json::from_str(&json).map_err(|e| RepoVaultError::Manifest {
        message: format!("malformed manifest JSON at '{}': {e}", manifest_path.display()),
    })?;
    Ok(Some(manifest))
}
