//! Passphrase-based symmetric encryption.
//!
//! Produces and consumes the [age](https://age-encryption.org) file
//! format with a single scrypt-derived passphrase recipient. There is
//! no key file and no recipient list — one passphrase, supplied
//! externally, is the entire key management story.

use crate::error::{RepoVaultError, Result};
use age::secrecy::Secret;
use std::io::{Read, Write};
use std::path::Path;

const ENCRYPTED_BUNDLE_SUFFIX: &str = ".bundle.age";

/// Encrypts the file at `in_path` into a fresh `age` envelope at
/// `out_path`, owner-readable-and-writable (`0644`, matching the
/// permission of a freshly produced plain bundle).
///
/// # Errors
///
/// Returns [`RepoVaultError::Encryption`] if the passphrase is empty or
/// the envelope cannot be written.
pub fn encrypt(in_path: &Path, out_path: &Path, passphrase: &str) -> Result<()> {
    if passphrase.is_empty() {
        return Err(RepoVaultError::Encryption {
            message: "refusing to encrypt with an empty passphrase".to_string(),
        });
    }

    let plaintext = std::fs::read(in_path).map_err(|e| RepoVaultError::filesystem(in_path, e))?;

    let encryptor = age::Encryptor::with_user_passphrase(Secret::new(passphrase.to_string()));
    let mut encrypted = Vec::new();
    let mut writer = encryptor
        .wrap_output(&mut encrypted)
        .map_err(|e| RepoVaultError::Encryption {
            message: format!("failed to initialize age envelope: {e}"),
        })?;
    writer
        .write_all(&plaintext)
        .map_err(|e| RepoVaultError::Encryption {
            message: format!("failed to write age envelope: {e}"),
        })?;
    writer.finish().map_err(|e| RepoVaultError::Encryption {
        message: format!("failed to finalize age envelope: {e}"),
    })?;

    std::fs::write(out_path, &encrypted).map_err(|e| RepoVaultError::filesystem(out_path, e))?;
    set_file_mode(out_path, 0o644)
}

/// Decrypts the `age` envelope at `in_path` with `passphrase`, writing
/// the plaintext to `out_path`.
///
/// # Errors
///
/// Returns [`RepoVaultError::Decryption`] when the passphrase is
/// wrong, the ciphertext is truncated or corrupt, or the file is
/// empty.
pub fn decrypt(in_path: &Path, out_path: &Path, passphrase: &str) -> Result<()> {
    let ciphertext = std::fs::read(in_path).map_err(|e| RepoVaultError::filesystem(in_path, e))?;
    if ciphertext.is_empty() {
        return Err(RepoVaultError::Decryption {
            message: format!("'{}' is empty", in_path.display()),
        });
    }

    let decryptor = match age::Decryptor::new(&ciphertext[..]) {
        Ok(age::Decryptor::Passphrase(d)) => d,
        Ok(_) => {
            return Err(RepoVaultError::Decryption {
                message: "envelope does not use a passphrase recipient".to_string(),
            })
        }
        Err(e) => {
            return Err(RepoVaultError::Decryption {
                message: format!("'{}' is not a valid age envelope: {e}", in_path.display()),
            })
        }
    };

    let mut reader = decryptor
        .decrypt(&Secret::new(passphrase.to_string()), None)
        .map_err(|e| RepoVaultError::Decryption {
            message: format!("failed to decrypt '{}': {e}", in_path.display()),
        })?;

    let mut plaintext = Vec::new();
    reader
        .read_to_end(&mut plaintext)
        .map_err(|e| RepoVaultError::Decryption {
            message: format!("failed to read decrypted '{}': {e}", in_path.display()),
        })?;

    std::fs::write(out_path, &plaintext).map_err(|e| RepoVaultError::filesystem(out_path, e))?;
    Ok(())
}

/// Exact suffix test for encrypted bundles. `foo.manifest.age` is not
/// a bundle and returns `false`.
#[must_use]
pub fn is_encrypted(filename: &str) -> bool {
    filename.ends_with(ENCRYPTED_BUNDLE_SUFFIX)
}

/// Strips the trailing `.age` suffix from an encrypted artifact name,
/// if present.
#[must_use]
pub fn strip_encryption_suffix(filename: &str) -> &str {
    filename.strip_suffix(".age").unwrap_or(filename)
}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(mode);
    std::fs::set_permissions(path, perms).map_err(|e| RepoVaultError::filesystem(path, e))
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_the_age_envelope() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("in.bundle");
        let enc = dir.path().join("out.bundle.age");
        let dec = dir.path().join("roundtrip.bundle");
        std::fs::write(&plain, b"a git bundle's worth of bytes").unwrap();

        encrypt(&plain, &enc, "correct horse battery staple").unwrap();
        assert_ne!(std::fs::read(&enc).unwrap(), std::fs::read(&plain).unwrap());

        decrypt(&enc, &dec, "correct horse battery staple").unwrap();
        assert_eq!(std::fs::read(&dec).unwrap(), b"a git bundle's worth of bytes");
    }

    #[test]
    fn wrong_passphrase_is_a_decryption_error() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("in.bundle");
        let enc = dir.path().join("out.bundle.age");
        std::fs::write(&plain, b"secret bytes").unwrap();
        encrypt(&plain, &enc, "right passphrase").unwrap();

        let dec = dir.path().join("out.bundle");
        let err = decrypt(&enc, &dec, "wrong passphrase").unwrap_err();
        assert!(matches!(err, RepoVaultError::Decryption { .. }));
    }

    #[test]
    fn empty_passphrase_is_refused() {
        let dir = tempdir().unwrap();
        let plain = dir.path().join("in.bundle");
        std::fs::write(&plain, b"x").unwrap();
        let err = encrypt(&plain, &dir.path().join("out.bundle.age"), "").unwrap_err();
        assert!(matches!(err, RepoVaultError::Encryption { .. }));
    }

    #[test]
    fn empty_file_is_a_decryption_error() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.bundle.age");
        std::fs::write(&empty, b"").unwrap();
        let err = decrypt(&empty, &dir.path().join("out.bundle"), "whatever").unwrap_err();
        assert!(matches!(err, RepoVaultError::Decryption { .. }));
    }

    #[test]
    fn is_encrypted_checks_exact_suffix() {
        assert!(is_encrypted("repo.20240101000000.bundle.age"));
        assert!(!is_encrypted("repo.20240101000000.manifest.age"));
        assert!(!is_encrypted("repo.20240101000000.bundle"));
    }

    #[test]
    fn strips_age_suffix_when_present() {
        assert_eq!(strip_encryption_suffix("repo.20240101000000.bundle.age"), "repo.20240101000000.bundle");
        assert_eq!(strip_encryption_suffix("repo.20240101000000.bundle"), "repo.20240101000000.bundle");
    }
}
