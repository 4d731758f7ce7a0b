//! Notebook preprocessing plan and single-notebook local execution.
//!
//! [`execute_local`] is what runs inside the build container: fetch the
//! notebook, preprocess it into the staging folder, execute it with the
//! configured executor, and file the result under `success/` or `failure/`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, instrument, warn};

use nbci_notebook::{
    AssignVariables, Notebook, Preprocessor, RemoveNoExecuteCells, UpdateVariables, preprocess,
};
use nbci_shared::{LocalConfig, NbciError, ReplacementMap, Result, SubstitutionMode};
use nbci_storage::{ObjectStore, is_gcs_uri, join_uri};

use crate::remote::render_template;

/// Output sub-folder for notebooks that executed cleanly.
pub const SUCCESS_DIR: &str = "success";
/// Output sub-folder for notebooks whose execution failed.
pub const FAILURE_DIR: &str = "failure";

// ---------------------------------------------------------------------------
// Preprocess plan
// ---------------------------------------------------------------------------

/// The ordered preprocessing passes: cell filter, then variable substitution.
pub struct PreprocessPlan {
    filter: RemoveNoExecuteCells,
    update: Box<dyn Preprocessor>,
}

impl PreprocessPlan {
    pub fn new(
        skip_tags: &[String],
        replacements: ReplacementMap,
        mode: SubstitutionMode,
    ) -> Result<Self> {
        let update: Box<dyn Preprocessor> = match mode {
            SubstitutionMode::Literal => Box::new(UpdateVariables::new(replacements)?),
            SubstitutionMode::Assign => Box::new(AssignVariables::new(&replacements)?),
        };
        Ok(Self {
            filter: RemoveNoExecuteCells::new(skip_tags.iter().cloned()),
            update,
        })
    }

    pub fn apply(&self, nb: Notebook) -> Result<Notebook> {
        preprocess(nb, &[&self.filter as &dyn Preprocessor, self.update.as_ref()])
    }

    /// Read `source`, preprocess it and write the result to `dest`.
    pub fn apply_file(&self, source: &Path, dest: &Path) -> Result<()> {
        let nb = Notebook::read(source)?;
        let nb = self.apply(nb)?;
        nb.write(dest)
    }
}

// ---------------------------------------------------------------------------
// Local execution
// ---------------------------------------------------------------------------

/// Inputs for [`execute_local`].
#[derive(Debug, Clone)]
pub struct LocalExecution {
    /// Local path or `gs://` URI of the notebook.
    pub notebook_source: String,
    /// Local folder or `gs://` URI receiving `success/` and `failure/`.
    pub output_folder_or_uri: String,
    /// Scratch folder for downloads and the staged notebook.
    pub staging_dir: PathBuf,
    pub executor: LocalConfig,
}

/// Base name of a path or URI.
fn base_name(source: &str) -> Result<String> {
    source
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .map(String::from)
        .ok_or_else(|| NbciError::validation(format!("cannot derive a file name from '{source}'")))
}

/// Execute one notebook locally and return where the executed copy was written.
///
/// The executed notebook is filed even when execution fails, in which case
/// the error is returned after the copy.
#[instrument(skip_all, fields(source = %exec.notebook_source))]
pub async fn execute_local(
    exec: &LocalExecution,
    plan: &PreprocessPlan,
    store: &dyn ObjectStore,
) -> Result<String> {
    let file_name = base_name(&exec.notebook_source)?;

    let local_source = if is_gcs_uri(&exec.notebook_source) {
        let dest = exec.staging_dir.join("downloads").join(&file_name);
        store.download(&exec.notebook_source, &dest).await?;
        info!(path = %dest.display(), "downloaded notebook");
        dest
    } else {
        PathBuf::from(&exec.notebook_source)
    };

    let staged = exec.staging_dir.join(&file_name);
    plan.apply_file(&local_source, &staged)?;

    let run = run_executor(&exec.executor, &staged).await;

    let folder = if run.is_ok() { SUCCESS_DIR } else { FAILURE_DIR };
    let dest = join_uri(&join_uri(&exec.output_folder_or_uri, folder), &file_name);
    let uri = store.upload(&staged, &dest).await?;
    info!(%uri, "wrote executed notebook");

    match run {
        Ok(()) => Ok(uri),
        Err(e) => {
            warn!(error = %e, "notebook execution failed");
            Err(NbciError::Execution(format!("{e} (output written to {uri})")))
        }
    }
}

async fn run_executor(config: &LocalConfig, staged: &Path) -> Result<()> {
    let path = staged.to_string_lossy();
    let vars = [("input", path.as_ref()), ("output", path.as_ref())];
    let args: Vec<String> = config
        .executor_args
        .iter()
        .map(|a| render_template(a, &vars))
        .collect();

    info!(program = %config.executor_program, ?args, "executing notebook");

    let status = Command::new(&config.executor_program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|e| {
            NbciError::Execution(format!(
                "failed to spawn {}: {e}. Is it installed?",
                config.executor_program
            ))
        })?;

    if !status.success() {
        return Err(NbciError::Execution(format!(
            "{} exited with status {}",
            config.executor_program,
            status.code().unwrap_or(-1)
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use nbci_storage::LocalStore;

    use super::*;

    const NOTEBOOK: &str = r#"{
 "cells": [
  {"cell_type": "code", "metadata": {"tags": ["no_execute"]}, "outputs": [], "execution_count": null, "source": "!pip install x"},
  {"cell_type": "code", "metadata": {}, "outputs": [], "execution_count": null, "source": "PROJECT_ID = \"[your-project-id]\""}
 ],
 "metadata": {},
 "nbformat": 4,
 "nbformat_minor": 5
}"#;

    fn plan() -> PreprocessPlan {
        let map = ReplacementMap::new([("[your-project-id]", "demo")]).expect("map");
        PreprocessPlan::new(&["no_execute".to_string()], map, SubstitutionMode::Literal)
            .expect("plan")
    }

    fn executor(program: &str, args: &[&str]) -> LocalConfig {
        LocalConfig {
            executor_program: program.into(),
            executor_args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn base_name_of_paths_and_uris() {
        assert_eq!(base_name("gs://b/dir/a.ipynb").expect("name"), "a.ipynb");
        assert_eq!(base_name("dir/b.ipynb").expect("name"), "b.ipynb");
        assert!(base_name("").is_err());
    }

    #[test]
    fn plan_filters_then_substitutes() {
        let nb = Notebook::from_json(NOTEBOOK).expect("parse");
        let out = plan().apply(nb).expect("apply");
        assert_eq!(out.cells.len(), 1);
        assert_eq!(out.cells[0].source.text(), "PROJECT_ID = \"demo\"");
    }

    #[test]
    fn assign_mode_plan() {
        let map = ReplacementMap::new([("PROJECT_ID", "demo")]).expect("map");
        let plan = PreprocessPlan::new(&[], map, SubstitutionMode::Assign).expect("plan");
        let nb = Notebook::from_json(NOTEBOOK).expect("parse");
        let out = plan.apply(nb).expect("apply");
        assert_eq!(out.cells.len(), 2);
        assert_eq!(out.cells[1].source.text(), "PROJECT_ID = \"demo\"");
    }

    #[tokio::test]
    async fn successful_execution_lands_in_success() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("intro.ipynb");
        std::fs::write(&source, NOTEBOOK).expect("write");
        let out = dir.path().join("out");

        let exec = LocalExecution {
            notebook_source: source.to_string_lossy().into_owned(),
            output_folder_or_uri: out.to_string_lossy().into_owned(),
            staging_dir: dir.path().join("staging"),
            executor: executor("true", &["{input}"]),
        };
        let uri = execute_local(&exec, &plan(), &LocalStore).await.expect("execute");

        let written = out.join(SUCCESS_DIR).join("intro.ipynb");
        assert_eq!(uri, written.display().to_string());
        let nb = Notebook::read(&written).expect("read output");
        assert_eq!(nb.cells.len(), 1);
    }

    #[tokio::test]
    async fn failed_execution_lands_in_failure_and_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("broken.ipynb");
        std::fs::write(&source, NOTEBOOK).expect("write");
        let out = dir.path().join("out");

        let exec = LocalExecution {
            notebook_source: source.to_string_lossy().into_owned(),
            output_folder_or_uri: out.to_string_lossy().into_owned(),
            staging_dir: dir.path().join("staging"),
            executor: executor("false", &[]),
        };
        let err = execute_local(&exec, &plan(), &LocalStore).await.unwrap_err();

        assert!(matches!(err, NbciError::Execution(_)));
        assert!(out.join(FAILURE_DIR).join("broken.ipynb").exists());
        assert!(!out.join(SUCCESS_DIR).exists());
    }

    #[tokio::test]
    async fn invalid_notebook_fails_before_execution() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("bad.ipynb");
        std::fs::write(&source, "not json").expect("write");

        let exec = LocalExecution {
            notebook_source: source.to_string_lossy().into_owned(),
            output_folder_or_uri: dir.path().join("out").to_string_lossy().into_owned(),
            staging_dir: dir.path().join("staging"),
            executor: executor("true", &[]),
        };
        let err = execute_local(&exec, &plan(), &LocalStore).await.unwrap_err();
        assert!(matches!(err, NbciError::Notebook { .. }));
    }
}
