//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use nbci_core::execute::{LocalExecution, PreprocessPlan, execute_local};
use nbci_core::pipeline::{Collaborators, ProgressReporter, RunConfig, run_changed_notebooks};
use nbci_core::remote::CommandRunner;
use nbci_core::report::render_table;
use nbci_discovery::{GitCli, detect_notebooks, read_test_paths};
use nbci_notebook::Notebook;
use nbci_shared::{AppConfig, ExecutionResult, ReplacementMap, init_config, load_config, load_config_from};
use nbci_storage::RoutingStore;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// nbci: run changed Jupyter notebooks in CI.
#[derive(Parser)]
#[command(
    name = "nbci",
    version,
    about = "Detect changed notebooks, preprocess them, execute them and report the results.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.nbci/nbci.toml).
    #[arg(long, global = true, env = "NBCI_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Execute every notebook changed relative to the base branch and print a results table.
    Run {
        /// Newline-delimited file of folders to check for notebooks.
        #[arg(long)]
        test_paths_file: PathBuf,

        /// Only run notebooks that differ from this branch. Runs all when omitted.
        #[arg(long)]
        base_branch: Option<String>,

        /// Where executed notebooks are written (defaults to <staging-bucket>/executed_notebooks).
        #[arg(long)]
        output_folder: Option<String>,

        /// Value substituted for the project id placeholder.
        #[arg(long)]
        variable_project_id: String,

        /// Value substituted for the region placeholder.
        #[arg(long)]
        variable_region: String,

        /// gs:// URI (or local folder) for archives and staged notebooks.
        #[arg(long)]
        staging_bucket: String,

        /// Container image the notebooks run in (overrides config).
        #[arg(long)]
        container_uri: Option<String>,

        /// Repository root.
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Exit non-zero if any notebook failed.
        #[arg(long)]
        fail_on_error: bool,
    },

    /// List the notebooks `run` would execute, without executing them.
    Changed {
        #[arg(long)]
        test_paths_file: PathBuf,

        #[arg(long)]
        base_branch: Option<String>,

        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },

    /// Preprocess one notebook and write the result.
    Preprocess {
        /// Notebook to preprocess.
        notebook: PathBuf,

        /// Output path. Prints to stdout when omitted.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Replacement as TOKEN=VALUE (repeatable).
        #[arg(long = "var", value_name = "TOKEN=VALUE")]
        vars: Vec<String>,
    },

    /// Preprocess and execute one notebook locally, filing it under success/ or failure/.
    Execute {
        /// Local path or gs:// URI of the notebook.
        #[arg(long)]
        notebook_source: String,

        /// Local folder or gs:// URI for the executed notebook.
        #[arg(long)]
        output_folder_or_uri: String,

        /// Replacement as TOKEN=VALUE (repeatable).
        #[arg(long = "var", value_name = "TOKEN=VALUE")]
        vars: Vec<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

const CRATES: [&str; 6] = [
    "nbci_cli",
    "nbci_core",
    "nbci_discovery",
    "nbci_notebook",
    "nbci_storage",
    "nbci_shared",
];

fn default_filter(verbose: u8) -> String {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    CRATES
        .iter()
        .map(|c| format!("{c}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(cli.verbose)));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Run {
            test_paths_file,
            base_branch,
            output_folder,
            variable_project_id,
            variable_region,
            staging_bucket,
            container_uri,
            repo,
            fail_on_error,
        } => {
            let replacements = run_replacements(&config, &variable_project_id, &variable_region)?;
            let run_config = RunConfig {
                test_paths_file,
                base_branch,
                git_remote: config.execution.git_remote.clone(),
                staging_bucket,
                output_root: output_folder,
                staging_dir: PathBuf::from(&config.execution.staging_dir),
                container_uri: container_uri.unwrap_or_else(|| config.execution.container_uri.clone()),
                skip_tags: config.preprocess.skip_tags.clone(),
                replacements,
                mode: config.variables.mode,
            };
            cmd_run(&config, &run_config, &repo, fail_on_error).await
        }
        Command::Changed {
            test_paths_file,
            base_branch,
            repo,
        } => cmd_changed(&config, &test_paths_file, base_branch.as_deref(), &repo).await,
        Command::Preprocess { notebook, out, vars } => {
            cmd_preprocess(&config, &notebook, out.as_deref(), &vars)
        }
        Command::Execute {
            notebook_source,
            output_folder_or_uri,
            vars,
        } => cmd_execute(&config, notebook_source, output_folder_or_uri, &vars).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

/// Map the configured placeholder tokens to the values given on the command line.
fn run_replacements(config: &AppConfig, project_id: &str, region: &str) -> Result<ReplacementMap> {
    let (project_token, region_token) = config.variables.tokens();
    Ok(ReplacementMap::new([
        (project_token, project_id),
        (region_token, region),
    ])?)
}

fn plan_for(config: &AppConfig, vars: &[String]) -> Result<PreprocessPlan> {
    let replacements = ReplacementMap::from_assignments(vars)?;
    Ok(PreprocessPlan::new(
        &config.preprocess.skip_tags,
        replacements,
        config.variables.mode,
    )?)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config: &AppConfig, run_config: &RunConfig, repo: &Path, fail_on_error: bool) -> Result<()> {
    let vcs = GitCli::new(repo);
    let store = RoutingStore::new(config.storage.gsutil_program.clone());
    let runner = CommandRunner::from_config(&config.remote);
    let collab = Collaborators {
        vcs: &vcs,
        store: &store,
        runner: &runner,
    };

    info!(
        staging = %run_config.staging_bucket,
        output = %run_config.output_root(),
        "running changed notebooks"
    );

    let reporter = CliProgress::new();
    let results = run_changed_notebooks(run_config, collab, &reporter).await?;

    if results.is_empty() {
        println!("No notebooks modified in this pull request.");
        return Ok(());
    }

    println!("\n=== RESULTS ===\n");
    println!("{}", render_table(&results));
    println!("\n=== END RESULTS ===\n");

    let failed = results.iter().filter(|r| !r.is_pass()).count();
    if fail_on_error && failed > 0 {
        return Err(eyre!("{failed} of {} notebooks failed", results.len()));
    }
    Ok(())
}

async fn cmd_changed(
    config: &AppConfig,
    test_paths_file: &Path,
    base_branch: Option<&str>,
    repo: &Path,
) -> Result<()> {
    let roots = read_test_paths(test_paths_file)?;
    let vcs = GitCli::new(repo);
    let notebooks = detect_notebooks(&vcs, &roots, base_branch, &config.execution.git_remote).await?;

    if notebooks.is_empty() {
        info!("no notebooks modified");
    }
    for notebook in notebooks {
        println!("{}", notebook.display());
    }
    Ok(())
}

fn cmd_preprocess(config: &AppConfig, notebook: &Path, out: Option<&Path>, vars: &[String]) -> Result<()> {
    let plan = plan_for(config, vars)?;

    match out {
        Some(dest) => {
            plan.apply_file(notebook, dest)?;
            info!(from = %notebook.display(), to = %dest.display(), "preprocessed notebook");
        }
        None => {
            let nb = plan.apply(Notebook::read(notebook)?)?;
            print!("{}", nb.to_json()?);
        }
    }
    Ok(())
}

async fn cmd_execute(
    config: &AppConfig,
    notebook_source: String,
    output_folder_or_uri: String,
    vars: &[String],
) -> Result<()> {
    let plan = plan_for(config, vars)?;
    let store = RoutingStore::new(config.storage.gsutil_program.clone());
    let exec = LocalExecution {
        notebook_source,
        output_folder_or_uri,
        staging_dir: PathBuf::from(&config.execution.staging_dir),
        executor: config.local.clone(),
    };

    let uri = execute_local(&exec, &plan, &store).await?;
    println!("Executed notebook written to: {uri}");
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self::with_bar(spinner)
    }

    fn with_bar(spinner: ProgressBar) -> Self {
        Self { spinner }
    }
}

/// Clears the spinner when a run bails out before `done`.
impl Drop for CliProgress {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn notebook_started(&self, notebook: &Path, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Running [{current}/{total}] {}", notebook.display()));
    }

    fn notebook_finished(&self, result: &ExecutionResult) {
        let status = if result.is_pass() { "passed" } else { "FAILED" };
        self.spinner
            .println(format!("  {status}  {}", result.notebook.display()));
    }

    fn done(&self, _results: &[ExecutionResult]) {
        self.spinner.finish_and_clear();
    }
}
