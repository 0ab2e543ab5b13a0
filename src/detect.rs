//! Change detector: decides whether the remote is already faithfully
//! represented in the store.
//!
//! Two independent facilities live here: the pre-clone refs shortcut
//! (can we skip cloning entirely?) and the post-bundle duplicate
//! detector (is the bundle we just built identical to what's already
//! in the store?).

use crate::error::RepoVaultError;
use crate::git::{self, RefsMap};
use crate::mask::Masker;
use crate::manifest;
use crate::store::{self, BundleEntry};
use std::path::Path;

/// Finds the refs represented by the newest usable bundle in
/// `store_dir`, quarantining any invalid bundle encountered along the
/// way and retrying with the next-newest. Returns `None` if the store
/// has no bundle it can read refs from.
fn local_refs_from_store(store_dir: &Path, passphrase: Option<&str>) -> Option<RefsMap> {
    loop {
        let latest = match store::latest_bundle(store_dir) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(_) => return None,
        };
        let path = latest.path(store_dir);

        if !latest.encrypted {
            match git::bundle_list_heads(&path) {
                Ok(refs) => return Some(refs),
                Err(RepoVaultError::InvalidBundle { .. }) => {
                    let _ = store::rename_invalid(store_dir, &latest.filename);
                    continue;
                }
                Err(_) => return None,
            }
        }

        let Some(passphrase) = passphrase else {
            // Encrypted and no passphrase: the local side is unknown.
            return None;
        };

        if let Ok(Some(m)) = manifest::read_manifest(&path, Some(passphrase)) {
            if !m.git_refs.is_empty() {
                return Some(m.git_refs);
            }
        }

        let Ok(tmp) = tempfile::NamedTempFile::new() else {
            return None;
        };
        if crate::crypto::decrypt(&path, tmp.path(), passphrase).is_err() {
            return None;
        }
        match git::bundle_list_heads(tmp.path()) {
            Ok(refs) => return Some(refs),
            Err(RepoVaultError::InvalidBundle { .. }) => {
                let _ = store::rename_invalid(store_dir, &latest.filename);
                continue;
            }
            Err(_) => return None,
        }
    }
}

/// Decides whether the clone can be skipped entirely because the
/// store already faithfully represents the remote.
///
/// `require_lfs` is set when the caller wants an LFS archive alongside
/// every backup; a latest bundle with no matching LFS archive is then
/// treated as a reason to re-run rather than skip, since skipping would
/// otherwise leave LFS content perpetually stale.
///
/// Any error encountered along the way degrades silently to "not
/// skipped" — this is a shortcut, never a source of fatal failures.
#[must_use]
pub fn should_skip_clone(
    url: &str,
    store_dir: &Path,
    passphrase: Option<&str>,
    require_lfs: bool,
    masker: &Masker,
) -> bool {
    if !store_dir.exists() {
        return false;
    }
    let Ok(Some(latest)) = store::latest_bundle(store_dir) else {
        return false;
    };

    if require_lfs && !store::lfs_archive_exists_for(store_dir, &latest.stem) {
        return false;
    }

    let Some(local_refs) = local_refs_from_store(store_dir, passphrase) else {
        return false;
    };

    let Ok(remote_refs) = git::ls_remote_refs(url, masker) else {
        return false;
    };

    git::refs_equal(&local_refs, &remote_refs)
}

/// The outcome of comparing a freshly built working bundle against
/// the store's current latest bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateDecision {
    /// The working bundle represents the same repository state already
    /// in the store.
    pub duplicate: bool,
    /// When `duplicate` is true: whether the store's existing plain
    /// bundle should be replaced by the working encrypted one, rather
    /// than simply discarding the working bundle.
    pub should_replace: bool,
}

impl DuplicateDecision {
    fn not_duplicate() -> Self {
        Self {
            duplicate: false,
            should_replace: false,
        }
    }

    fn duplicate(should_replace: bool) -> Self {
        Self {
            duplicate: true,
            should_replace,
        }
    }
}

fn files_byte_identical(a: &Path, b: &Path) -> bool {
    let (Ok(meta_a), Ok(meta_b)) = (std::fs::metadata(a), std::fs::metadata(b)) else {
        return false;
    };
    if meta_a.len() != meta_b.len() {
        return false;
    }
    matches!(
        (manifest::sha256_hex(a), manifest::sha256_hex(b)),
        (Ok(ha), Ok(hb)) if ha == hb
    )
}

/// Compares a freshly built working bundle against the store's current
/// latest bundle and decides whether it is a duplicate, and if so
/// whether it should replace the existing artifact.
///
/// # Errors
///
/// Returns an error only if the store directory itself cannot be read;
/// comparison failures (missing manifests, failed decryption) resolve
/// to "not duplicate" rather than propagating, since the pipeline must
/// still be able to move the new bundle into place.
pub fn detect_duplicate(
    working_bundle: &Path,
    working_encrypted: bool,
    store_dir: &Path,
    passphrase: Option<&str>,
) -> crate::error::Result<DuplicateDecision> {
    let store_latest: Option<BundleEntry> = store::latest_bundle(store_dir)?;
    let Some(store_latest) = store_latest else {
        return Ok(DuplicateDecision::not_duplicate());
    };
    let store_path = store_latest.path(store_dir);

    match (working_encrypted, store_latest.encrypted) {
        (true, true) => {
            let working_manifest = manifest::read_manifest(working_bundle, passphrase).ok().flatten();
            let store_manifest = manifest::read_manifest(&store_path, passphrase).ok().flatten();
            match (working_manifest, store_manifest) {
                (Some(w), Some(s)) => Ok(DuplicateDecision::duplicate_if(w.bundle_hash == s.bundle_hash)),
                _ => {
                    tracing::warn!(
                        store = %store_path.display(),
                        "no manifest available to compare two encrypted bundles; treating as not duplicate"
                    );
                    Ok(DuplicateDecision::not_duplicate())
                }
            }
        }
        (true, false) => {
            let Some(passphrase) = passphrase else {
                return Ok(DuplicateDecision::not_duplicate());
            };
            let Ok(tmp) = tempfile::NamedTempFile::new() else {
                return Ok(DuplicateDecision::not_duplicate());
            };
            if crate::crypto::decrypt(working_bundle, tmp.path(), passphrase).is_err() {
                return Ok(DuplicateDecision::not_duplicate());
            }
            if files_byte_identical(tmp.path(), &store_path) {
                Ok(DuplicateDecision::duplicate(true))
            } else {
                Ok(DuplicateDecision::not_duplicate())
            }
        }
        (false, true) => Ok(DuplicateDecision::not_duplicate()),
        (false, false) => {
            Ok(DuplicateDecision::duplicate_if(files_byte_identical(working_bundle, &store_path)))
        }
    }
}

impl DuplicateDecision {
    fn duplicate_if(equal: bool) -> Self {
        if equal {
            Self::duplicate(false)
        } else {
            Self::not_duplicate()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn skip_is_false_when_store_missing() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nonexistent");
        let masker = Masker::new(vec![]);
        assert!(!should_skip_clone("file:///doesnt/matter", &missing, None, false, &masker));
    }

    #[test]
    fn skip_is_false_when_lfs_required_but_archive_missing() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("r.20240101000000.bundle"), b"ignored").unwrap();
        let masker = Masker::new(vec![]);
        assert!(!should_skip_clone("file:///doesnt/matter", dir.path(), None, true, &masker));
    }

    #[test]
    fn skip_is_false_when_store_empty() {
        let dir = tempdir().unwrap();
        let masker = Masker::new(vec![]);
        assert!(!should_skip_clone("file:///doesnt/matter", dir.path(), None, false, &masker));
    }

    #[test]
    fn plain_duplicate_detected_by_identical_bytes() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("r.20240101000000.bundle"), b"same bytes").unwrap();
        let working = dir.path().join("working.bundle");
        std::fs::write(&working, b"same bytes").unwrap();

        let decision = detect_duplicate(&working, false, dir.path(), None).unwrap();
        assert!(decision.duplicate);
        assert!(!decision.should_replace);
    }

    #[test]
    fn plain_vs_plain_different_bytes_is_not_duplicate() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("r.20240101000000.bundle"), b"old bytes").unwrap();
        let working = dir.path().join("working.bundle");
        std::fs::write(&working, b"new different bytes").unwrap();

        let decision = detect_duplicate(&working, false, dir.path(), None).unwrap();
        assert!(!decision.duplicate);
    }

    #[test]
    fn plain_working_vs_encrypted_store_is_never_duplicate() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("r.20240101000000.bundle.age"), b"ciphertext").unwrap();
        let working = dir.path().join("working.bundle");
        std::fs::write(&working, b"plaintext").unwrap();

        let decision = detect_duplicate(&working, false, dir.path(), Some("pw")).unwrap();
        assert!(!decision.duplicate);
    }

    #[test]
    fn encrypted_working_matching_plain_store_replaces() {
        let dir = tempdir().unwrap();
        let plain_store = dir.path().join("r.20240101000000.bundle");
        std::fs::write(&plain_store, b"shared content").unwrap();

        let tmp_plain = dir.path().join("tmp_plain.bundle");
        std::fs::write(&tmp_plain, b"shared content").unwrap();
        let working = dir.path().join("working.bundle.age");
        crate::crypto::encrypt(&tmp_plain, &working, "pw").unwrap();

        let decision = detect_duplicate(&working, true, dir.path(), Some("pw")).unwrap();
        assert!(decision.duplicate);
        assert!(decision.should_replace);
    }

    #[test]
    fn no_store_bundle_is_never_duplicate() {
        let dir = tempdir().unwrap();
        let working = dir.path().join("working.bundle");
        std::fs::write(&working, b"anything").unwrap();
        let decision = detect_duplicate(&working, false, dir.path(), None).unwrap();
        assert!(!decision.duplicate);
    }
}
