//! Git driver: a thin facade over the `git` command-line tool.
//!
//! This module never links against `git2` or any other libgit
//! binding; every operation is a child process. That keeps the engine
//! honest to exactly what a human operator could reproduce by hand,
//! and means the bundle/clone formats it produces are whatever the
//! installed `git` binary produces.
//!
//! Operations:
//! - [`clone_mirror`] — `git clone --mirror`
//! - [`bundle_create`] — `git bundle create <out> --all`
//! - [`bundle_list_heads`] — `git bundle list-heads`
//! - [`ls_remote_refs`] — `git ls-remote --refs`

use crate::error::{RepoVaultError, Result};
use crate::mask::Masker;
use std::collections::HashMap;
use std::path::Path;
use std::process::{Command, Output};

/// A mapping from ref name (e.g. `refs/heads/main`) to 40-hex object id.
pub type RefsMap = HashMap<String, String>;

/// Ref names that are transient and must never participate in refs
/// comparisons.
const PSEUDO_REFS: &[&str] = &[
    "HEAD",
    "FETCH_HEAD",
    "ORIG_HEAD",
    "MERGE_HEAD",
    "CHERRY_PICK_HEAD",
];

/// Two refs maps represent the same remote state iff their key sets
/// are equal and every value agrees.
#[must_use]
pub fn refs_equal(a: &RefsMap, b: &RefsMap) -> bool {
    a.len() == b.len() && a.iter().all(|(name, oid)| b.get(name) == Some(oid))
}

/// Parses the shared `<sha>[ \t]<refname>` line format produced by both
/// `git bundle list-heads` and `git ls-remote --refs`. Lines with other
/// arity are skipped; pseudo-refs are excluded.
fn parse_refs_output(stdout: &str) -> RefsMap {
    let mut refs = RefsMap::new();
    for line in stdout.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(oid), Some(name), None) = (fields.next(), fields.next(), fields.next()) else {
            tracing::warn!(line = %line, "skipping malformed refs line");
            continue;
        };
        if PSEUDO_REFS.contains(&name) {
            continue;
        }
        refs.insert(name.to_string(), oid.to_string());
    }
    refs
}

/// Runs `git` with the given arguments and returns the raw output,
/// translating a failure to spawn the process into a [`RepoVaultError::Git`].
fn run_git(args: &[&str], cwd: Option<&Path>) -> Result<Output> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.output().map_err(|e| RepoVaultError::Git {
        message: format!("failed to run git {}: {e}", args.join(" ")),
    })
}

fn stderr_tail(stderr: &str, lines: usize) -> String {
    let interesting: Vec<&str> = stderr
        .lines()
        .filter(|l| {
            let lower = l.to_lowercase();
            lower.contains("error") || lower.contains("fatal")
        })
        .collect();
    let source = if interesting.is_empty() {
        stderr.lines().collect::<Vec<_>>()
    } else {
        interesting
    };
    source
        .iter()
        .rev()
        .take(lines)
        .rev()
        .copied()
        .collect::<Vec<_>>()
        .join("\n")
}

/// Runs `git clone --mirror <url> <working_dir>`. `working_dir` must
/// not already exist.
///
/// # Errors
///
/// Returns [`RepoVaultError::Clone`] carrying a secret-masked command
/// string and the last error/fatal lines of stderr.
pub fn clone_mirror(url: &str, working_dir: &Path, masker: &Masker) -> Result<()> {
    let args = ["clone", "--mirror", url, &working_dir.to_string_lossy()];
    let masked_command = masker.mask(&format!("git {}", args.join(" ")));

    let output = Command::new("git")
        .args(args)
        .output()
        .map_err(|e| RepoVaultError::Clone {
            command: masked_command.clone(),
            stderr_tail: masker.mask(&e.to_string()),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RepoVaultError::Clone {
            command: masked_command,
            stderr_tail: masker.mask(&stderr_tail(&stderr, 10)),
        });
    }
    Ok(())
}

/// Runs `git bundle create <out_path> --all` with `cwd = working_dir`.
///
/// # Errors
///
/// Returns [`RepoVaultError::Bundle`] if the command fails, which
/// includes the case of an empty repository with no refs to bundle.
pub fn bundle_create(working_dir: &Path, out_path: &Path) -> Result<()> {
    let output = run_git(
        &["bundle", "create", &out_path.to_string_lossy(), "--all"],
        Some(working_dir),
    )?;
    if !output.status.success() {
        return Err(RepoVaultError::Bundle {
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Runs `git bundle list-heads <bundle_path>` and parses the refs it
/// reports.
///
/// # Errors
///
/// Returns [`RepoVaultError::InvalidBundle`] when stderr indicates the
/// file is not a bundle (`"does not look like"`), or
/// [`RepoVaultError::Git`] for any other failure.
pub fn bundle_list_heads(bundle_path: &Path) -> Result<RefsMap> {
    let output = run_git(
        &["bundle", "list-heads", &bundle_path.to_string_lossy()],
        None,
    )?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("does not look like") {
            return Err(RepoVaultError::InvalidBundle {
                path: bundle_path.to_path_buf(),
            });
        }
        return Err(RepoVaultError::Git {
            message: format!("git bundle list-heads failed: {}", stderr.trim()),
        });
    }
    Ok(parse_refs_output(&String::from_utf8_lossy(&output.stdout)))
}

/// Runs `git ls-remote --refs <url>` and parses the refs it reports.
///
/// # Errors
///
/// Returns [`RepoVaultError::Git`] if the remote is unreachable or the
/// command otherwise fails. The error message is secret-masked.
pub fn ls_remote_refs(url: &str, masker: &Masker) -> Result<RefsMap> {
    let output = run_git(&["ls-remote", "--refs", url], None)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RepoVaultError::Git {
            message: masker.mask(&format!("git ls-remote failed: {}", stderr.trim())),
        });
    }
    Ok(parse_refs_output(&String::from_utf8_lossy(&output.stdout)))
}

/// Detects an empty mirror clone: `objects/` has exactly two entries
/// (the bare `info` and `pack` directories) and `objects/pack/` is
/// itself empty.
///
/// # Errors
///
/// Returns a filesystem error if `working_dir/objects` cannot be read.
pub fn is_empty_clone(working_dir: &Path) -> Result<bool> {
    let objects_dir = working_dir.join("objects");
    let entries: Vec<_> = match std::fs::read_dir(&objects_dir) {
        Ok(rd) => rd.collect::<std::io::Result<Vec<_>>>().map_err(|e| {
            RepoVaultError::filesystem(&objects_dir, e)
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(RepoVaultError::filesystem(&objects_dir, e)),
    };
    if entries.len() != 2 {
        return Ok(false);
    }
    let pack_dir = objects_dir.join("pack");
    match std::fs::read_dir(&pack_dir) {
        Ok(rd) => {
            let pack_entries = rd.collect::<std::io::Result<Vec<_>>>().map_err(|e| {
                RepoVaultError::filesystem(&pack_dir, e)
            })?;
            Ok(pack_entries.is_empty())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(RepoVaultError::filesystem(&pack_dir, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("abc123def456 refs/heads/main\nfeedface\trefs/heads/dev\n", &[("refs/heads/main", "abc123def456"), ("refs/heads/dev", "feedface")]; "space and tab separated")]
    #[test_case("abc123 HEAD\nabc123 refs/heads/main\nabc123 FETCH_HEAD\n", &[("refs/heads/main", "abc123")]; "pseudo refs excluded")]
    #[test_case("abc123 refs/heads/main one two three\nabc123 refs/heads/dev\nonlyonefield\n", &[("refs/heads/dev", "abc123")]; "malformed lines skipped")]
    #[test_case("", &[]; "empty input")]
    fn parses_refs_output_into_expected_map(stdout: &str, expected: &[(&str, &str)]) {
        let refs = parse_refs_output(stdout);
        assert_eq!(refs.len(), expected.len());
        for (name, oid) in expected {
            assert_eq!(refs.get(*name), Some(&(*oid).to_string()));
        }
    }

    #[test]
    fn refs_equal_ignores_ordering() {
        let mut a = RefsMap::new();
        a.insert("refs/heads/main".to_string(), "abc".to_string());
        a.insert("refs/heads/dev".to_string(), "def".to_string());
        let mut b = RefsMap::new();
        b.insert("refs/heads/dev".to_string(), "def".to_string());
        b.insert("refs/heads/main".to_string(), "abc".to_string());
        assert!(refs_equal(&a, &b));
    }

    #[test]
    fn refs_not_equal_on_value_mismatch() {
        let mut a = RefsMap::new();
        a.insert("refs/heads/main".to_string(), "abc".to_string());
        let mut b = RefsMap::new();
        b.insert("refs/heads/main".to_string(), "def".to_string());
        assert!(!refs_equal(&a, &b));
    }
}
