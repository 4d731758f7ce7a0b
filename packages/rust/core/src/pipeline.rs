//! End-to-end `run` pipeline: manifest → detect → archive → preprocess → submit → results.

use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use chrono::Local;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use nbci_discovery::{Vcs, detect_notebooks, read_test_paths};
use nbci_shared::{ExecutionResult, NbciError, ReplacementMap, Result, SubstitutionMode};
use nbci_storage::{ObjectStore, join_uri};

use crate::archive::archive_code_and_upload;
use crate::execute::PreprocessPlan;
use crate::remote::{JobStatus, NotebookRunner, RemoteJob};
use crate::report::sort_results;

/// Sub-folder of the staging location for uploaded, preprocessed notebooks.
pub const STAGED_NOTEBOOKS_DIR: &str = "notebooks";
/// Default sub-folder of the staging location for executed notebooks.
pub const EXECUTED_NOTEBOOKS_DIR: &str = "executed_notebooks";

/// Configuration for [`run_changed_notebooks`].
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Manifest listing the folders to check.
    pub test_paths_file: PathBuf,
    /// Compare against this branch; `None` runs every tracked notebook.
    pub base_branch: Option<String>,
    /// Remote the base branch lives on. Empty means a local branch.
    pub git_remote: String,
    /// `gs://` URI (or local folder) receiving archives and staged notebooks.
    pub staging_bucket: String,
    /// Where executed notebooks go. Defaults to `<staging>/executed_notebooks`.
    pub output_root: Option<String>,
    /// Local scratch directory.
    pub staging_dir: PathBuf,
    /// Container image the remote job runs in.
    pub container_uri: String,
    pub skip_tags: Vec<String>,
    pub replacements: ReplacementMap,
    pub mode: SubstitutionMode,
}

impl RunConfig {
    pub fn output_root(&self) -> String {
        self.output_root
            .clone()
            .unwrap_or_else(|| join_uri(&self.staging_bucket, EXECUTED_NOTEBOOKS_DIR))
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before a notebook is preprocessed and submitted.
    fn notebook_started(&self, notebook: &Path, current: usize, total: usize);
    /// Called once the notebook's result is known.
    fn notebook_finished(&self, result: &ExecutionResult);
    /// Called when the pipeline completes.
    fn done(&self, results: &[ExecutionResult]);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn notebook_started(&self, _notebook: &Path, _current: usize, _total: usize) {}
    fn notebook_finished(&self, _result: &ExecutionResult) {}
    fn done(&self, _results: &[ExecutionResult]) {}
}

/// The external systems a run talks to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub vcs: &'a dyn Vcs,
    pub store: &'a dyn ObjectStore,
    pub runner: &'a dyn NotebookRunner,
}

/// Run every changed notebook and return the results, passes first.
///
/// Configuration problems, detection failures and a failed source archive
/// abort the run. Anything that goes wrong with a single notebook is
/// recorded in its result instead.
#[instrument(skip_all, fields(
    manifest = %config.test_paths_file.display(),
    base = config.base_branch.as_deref().unwrap_or("-")
))]
pub async fn run_changed_notebooks(
    config: &RunConfig,
    collab: Collaborators<'_>,
    progress: &dyn ProgressReporter,
) -> Result<Vec<ExecutionResult>> {
    let start = Instant::now();

    progress.phase("Reading test paths");
    let roots = read_test_paths(&config.test_paths_file)?;
    let plan = PreprocessPlan::new(&config.skip_tags, config.replacements.clone(), config.mode)?;

    progress.phase("Detecting changed notebooks");
    let notebooks = detect_notebooks(
        collab.vcs,
        &roots,
        config.base_branch.as_deref(),
        &config.git_remote,
    )
    .await?;

    if notebooks.is_empty() {
        info!("no notebooks modified");
        progress.done(&[]);
        return Ok(Vec::new());
    }
    info!(count = notebooks.len(), "notebooks to run");

    progress.phase("Archiving source code");
    tokio::fs::create_dir_all(&config.staging_dir)
        .await
        .map_err(|e| NbciError::io(&config.staging_dir, e))?;
    let code_archive_uri = archive_code_and_upload(
        collab.vcs,
        collab.store,
        &config.staging_dir,
        &config.staging_bucket,
        Local::now(),
    )
    .await?;

    progress.phase("Executing notebooks");
    let total = notebooks.len();
    let mut results = Vec::with_capacity(total);
    for (i, notebook) in notebooks.iter().enumerate() {
        progress.notebook_started(notebook, i + 1, total);
        let result = execute_notebook(config, &plan, collab, &code_archive_uri, notebook).await;
        progress.notebook_finished(&result);
        results.push(result);
    }

    sort_results(&mut results);
    progress.done(&results);

    let failed = results.iter().filter(|r| !r.is_pass()).count();
    info!(
        total,
        failed,
        elapsed_ms = start.elapsed().as_millis(),
        "run complete"
    );

    Ok(results)
}

/// Preprocess, stage and execute one notebook. Never fails: errors land in
/// the returned result.
#[instrument(skip_all, fields(notebook = %notebook.display()))]
pub async fn execute_notebook(
    config: &RunConfig,
    plan: &PreprocessPlan,
    collab: Collaborators<'_>,
    code_archive_uri: &str,
    notebook: &Path,
) -> ExecutionResult {
    let start = Instant::now();
    let output_uri = join_uri(&config.output_root(), &relative_uri_path(notebook));

    let outcome = stage_and_submit(config, plan, collab, code_archive_uri, notebook, &output_uri).await;
    let duration = start.elapsed();

    match outcome {
        Ok(JobStatus::Succeeded) => {
            info!(elapsed_ms = duration.as_millis(), "notebook passed");
            ExecutionResult::passed(notebook, output_uri, duration)
        }
        Ok(JobStatus::Failed { code, detail }) => {
            let message = job_failure_message(code, &detail);
            warn!(%message, "notebook failed");
            ExecutionResult::failed(notebook, output_uri, duration, message)
        }
        Err(e) => {
            warn!(error = %e, "notebook could not be executed");
            ExecutionResult::failed(notebook, output_uri, duration, e.to_string())
        }
    }
}

async fn stage_and_submit(
    config: &RunConfig,
    plan: &PreprocessPlan,
    collab: Collaborators<'_>,
    code_archive_uri: &str,
    notebook: &Path,
    output_uri: &str,
) -> Result<JobStatus> {
    let staged = config.staging_dir.join(notebook);
    plan.apply_file(&collab.vcs.root().join(notebook), &staged)?;

    let staged_name = format!(
        "{}/{}",
        Local::now().format("%Y%m%d%H%M%S"),
        relative_uri_path(notebook)
    );
    let dest = join_uri(&join_uri(&config.staging_bucket, STAGED_NOTEBOOKS_DIR), &staged_name);
    let notebook_uri = collab.store.upload(&staged, &dest).await?;

    let job = RemoteJob {
        code_archive_uri: code_archive_uri.to_string(),
        notebook_uri,
        output_uri: output_uri.to_string(),
        container_uri: config.container_uri.clone(),
        display_name: format!("nbci-{}", Uuid::now_v7()),
    };
    collab.runner.run(&job).await
}

/// Repo-relative notebook path as `/`-separated URI segments, so notebooks
/// sharing a file name in different folders never collide.
fn relative_uri_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn job_failure_message(code: Option<i32>, detail: &str) -> String {
    let head = match code {
        Some(code) => format!("remote job failed with exit code {code}"),
        None => "remote job was terminated".to_string(),
    };
    if detail.is_empty() {
        head
    } else {
        format!("{head}: {detail}")
    }
}
