//! Notebook change detection.
//!
//! Reads the manifest of test roots, asks version control which files under
//! those roots changed relative to a base branch (or lists every tracked file
//! when no base is given), and narrows the answer to notebooks that still
//! exist on disk.

mod git;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use nbci_shared::{NOTEBOOK_EXTENSION, NbciError, Result};

pub use git::{GitCli, Vcs};

/// Read the newline-delimited manifest of folders and files to check.
///
/// Lines are trimmed; blank lines and `#` comments are skipped. A manifest
/// that names nothing is a configuration error.
pub fn read_test_paths(manifest: &Path) -> Result<Vec<PathBuf>> {
    let content = std::fs::read_to_string(manifest).map_err(|e| NbciError::io(manifest, e))?;
    let paths = parse_test_paths(&content);

    if paths.is_empty() {
        return Err(NbciError::config(format!(
            "no test folders found in {}",
            manifest.display()
        )));
    }

    Ok(paths)
}

fn parse_test_paths(content: &str) -> Vec<PathBuf> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(PathBuf::from)
        .collect()
}

/// Ref passed to `git diff` for `base_branch`, qualified with `remote` unless it is empty.
pub fn base_ref(remote: &str, base_branch: &str) -> String {
    if remote.is_empty() {
        base_branch.to_string()
    } else {
        format!("{remote}/{base_branch}")
    }
}

/// Find the notebooks to run under `roots`.
///
/// With `base_branch`, only notebooks that differ from it are returned;
/// without, every tracked notebook is. Entries are de-duplicated in
/// first-seen order and dropped if they no longer exist.
#[instrument(skip_all, fields(roots = roots.len(), base = base_branch.unwrap_or("-")))]
pub async fn detect_notebooks(
    vcs: &dyn Vcs,
    roots: &[PathBuf],
    base_branch: Option<&str>,
    remote: &str,
) -> Result<Vec<PathBuf>> {
    if roots.is_empty() {
        return Err(NbciError::config("no test folders configured"));
    }

    let candidates = match base_branch {
        Some(branch) => {
            let base = base_ref(remote, branch);
            info!(%base, "looking for notebooks that changed from base");
            vcs.diff_names(&base, roots).await?
        }
        None => {
            info!("looking for all notebooks");
            vcs.list_files(roots).await?
        }
    };

    Ok(select_notebooks(vcs.root(), candidates))
}

fn select_notebooks(root: &Path, candidates: Vec<String>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .map(PathBuf::from)
        .filter(|p| p.extension().is_some_and(|ext| ext == NOTEBOOK_EXTENSION))
        .filter(|p| root.join(p).is_file())
        .filter(|p| seen.insert(p.clone()))
        .collect()
}
