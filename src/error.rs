//! Error types for the backup engine.
//!
//! This module defines the error hierarchy used across the git driver,
//! artifact store, encryption, manifest, change detector, and pipeline
//! components, using `thiserror` so every error propagates cleanly with
//! `?`. All error payloads are plain strings or paths rather than
//! `Box<dyn Error>` so that every message can be passed through secret
//! masking before it crosses a component boundary (see [`crate::mask`]).

use std::path::PathBuf;
use thiserror::Error;

/// A specialized `Result` type for backup engine operations.
pub type Result<T> = std::result::Result<T, RepoVaultError>;

/// The error type raised by the backup engine.
///
/// Variants map onto the error kinds from the design: enumeration,
/// auth, clone, bundle, invalid bundle, encryption/decryption,
/// manifest, filesystem, and retention errors.
#[derive(Error, Debug)]
pub enum RepoVaultError {
    /// A repository source failed to enumerate repositories for a provider.
    #[error("failed to list repositories: {message}")]
    Enumeration {
        /// Description of the failure.
        message: String,
    },

    /// Credentials were absent or rejected before a clone could start.
    #[error("authentication failed: {message}")]
    Auth {
        /// Description of the failure.
        message: String,
    },

    /// `git clone --mirror` failed.
    #[error("clone failed: {command}: {stderr_tail}")]
    Clone {
        /// The (secret-masked) command line that was run.
        command: String,
        /// The last error/fatal lines of stderr.
        stderr_tail: String,
    },

    /// `git bundle create` failed.
    #[error("bundle creation failed: {message}")]
    Bundle {
        /// Description of the failure.
        message: String,
    },

    /// An existing artifact could not be read as a bundle.
    #[error("invalid bundle: {path}")]
    InvalidBundle {
        /// Path to the unreadable artifact.
        path: PathBuf,
    },

    /// A generic `git` subprocess invocation failed (e.g. `ls-remote`).
    #[error("git error: {message}")]
    Git {
        /// Description of the failure.
        message: String,
    },

    /// Encrypting a file failed.
    #[error("encryption failed: {message}")]
    Encryption {
        /// Description of the failure.
        message: String,
    },

    /// Decrypting a file failed (wrong passphrase, truncated ciphertext,
    /// or an empty file).
    #[error("decryption failed: {message}")]
    Decryption {
        /// Description of the failure.
        message: String,
    },

    /// A manifest could not be created, read, or parsed.
    #[error("manifest error: {message}")]
    Manifest {
        /// Description of the failure.
        message: String,
    },

    /// A filesystem operation (create, rename, remove, permission) failed.
    #[error("filesystem error at '{}': {source}", path.display())]
    Filesystem {
        /// The path the operation was performed on.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Pruning old artifacts failed.
    #[error("retention error: {message}")]
    Retention {
        /// Description of the failure.
        message: String,
    },
}

impl RepoVaultError {
    /// Build a [`RepoVaultError::Filesystem`] error with path context.
    #[must_use]
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Whether this error represents a fatal failure of the repository's
    /// backup attempt, as opposed to a condition the pipeline already
    /// handled (skips are represented outside of `Result` entirely).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidBundle { .. })
    }
}
