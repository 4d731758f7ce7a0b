//! Remote notebook execution.
//!
//! A [`NotebookRunner`] takes a staged notebook plus the archived source tree
//! and runs it somewhere else, blocking until the job finishes.
//! [`CommandRunner`] does this by invoking a CLI (by default
//! `gcloud builds submit`) with an argument template.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use nbci_shared::{NbciError, RemoteConfig, Result};

/// Number of trailing stderr lines kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Everything a remote job needs to execute one notebook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJob {
    pub code_archive_uri: String,
    pub notebook_uri: String,
    pub output_uri: String,
    pub container_uri: String,
    pub display_name: String,
}

/// Final state of a remote job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Succeeded,
    Failed { code: Option<i32>, detail: String },
}

/// Submits a notebook for execution and waits for it to finish.
#[async_trait]
pub trait NotebookRunner: Send + Sync {
    /// `Err` means the job could not be submitted at all; a job that ran and
    /// failed is reported as [`JobStatus::Failed`].
    async fn run(&self, job: &RemoteJob) -> Result<JobStatus>;
}

/// Substitute `{name}` placeholders in `template`.
pub(crate) fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), value)
    })
}

/// Keep the last `n` non-empty lines of `text`.
pub(crate) fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// [`NotebookRunner`] that shells out to a configured program.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: String,
    args: Vec<String>,
}

impl CommandRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }

    /// Argument list with the job's values filled in.
    pub fn render_args(&self, job: &RemoteJob) -> Vec<String> {
        let vars = [
            ("code_archive_uri", job.code_archive_uri.as_str()),
            ("notebook_uri", job.notebook_uri.as_str()),
            ("output_uri", job.output_uri.as_str()),
            ("container_uri", job.container_uri.as_str()),
            ("display_name", job.display_name.as_str()),
        ];
        self.args
            .iter()
            .map(|arg| render_template(arg, &vars))
            .collect()
    }
}

#[async_trait]
impl NotebookRunner for CommandRunner {
    #[instrument(skip_all, fields(program = %self.program, job = %job.display_name))]
    async fn run(&self, job: &RemoteJob) -> Result<JobStatus> {
        let args = self.render_args(job);
        info!(notebook = %job.notebook_uri, output = %job.output_uri, "submitting remote job");
        debug!(?args, "runner arguments");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                NbciError::Execution(format!(
                    "failed to spawn {}: {e}. Is it installed?",
                    self.program
                ))
            })?;

        debug!(stdout = %String::from_utf8_lossy(&output.stdout), "runner output");

        if output.status.success() {
            return Ok(JobStatus::Succeeded);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(JobStatus::Failed {
            code: output.status.code(),
            detail: tail_lines(&stderr, STDERR_TAIL_LINES),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> RemoteJob {
        RemoteJob {
            code_archive_uri: "gs://b/code_archives/src.tar.gz".into(),
            notebook_uri: "gs://b/notebooks/20240101000000_a.ipynb".into(),
            output_uri: "gs://b/executed_notebooks/a.ipynb".into(),
            container_uri: "gcr.io/x/y:latest".into(),
            display_name: "nb-1".into(),
        }
    }

    #[test]
    fn template_rendering() {
        assert_eq!(
            render_template("--in={input} --out={output} {missing}", &[
                ("input", "a"),
                ("output", "b")
            ]),
            "--in=a --out=b {missing}"
        );
    }

    #[test]
    fn default_args_fill_every_placeholder() {
        let runner = CommandRunner::from_config(&RemoteConfig::default());
        let args = runner.render_args(&job());
        assert_eq!(args[0], "builds");
        assert_eq!(args[2], "gs://b/code_archives/src.tar.gz");
        assert!(args.iter().all(|a| !a.contains('{')));
        assert!(args[4].contains("_OUTPUT_URI=gs://b/executed_notebooks/a.ipynb"));
    }

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(tail_lines("a\n\nb\nc\n", 2), "b\nc");
        assert_eq!(tail_lines("only", 5), "only");
    }

    #[tokio::test]
    async fn successful_command_succeeds() {
        let runner = CommandRunner::new("true", vec![]);
        assert_eq!(runner.run(&job()).await.expect("run"), JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn failing_command_reports_stderr() {
        let runner = CommandRunner::new(
            "sh",
            vec!["-c".into(), "echo 'job {display_name} broke' >&2; exit 3".into()],
        );
        match runner.run(&job()).await.expect("run") {
            JobStatus::Failed { code, detail } => {
                assert_eq!(code, Some(3));
                assert_eq!(detail, "job nb-1 broke");
            }
            JobStatus::Succeeded => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let runner = CommandRunner::new("nbci-test-no-such-runner", vec![]);
        let err = runner.run(&job()).await.unwrap_err();
        assert!(matches!(err, NbciError::Execution(_)));
    }
}
