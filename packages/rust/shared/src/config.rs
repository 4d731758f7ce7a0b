//! Application configuration for nbci.
//!
//! User config lives at `~/.nbci/nbci.toml` unless `--config` points elsewhere.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NbciError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "nbci.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".nbci";

// ---------------------------------------------------------------------------
// Config structs (matching nbci.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Execution defaults.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Notebook preprocessing.
    #[serde(default)]
    pub preprocess: PreprocessConfig,

    /// Placeholder tokens injected into notebooks.
    #[serde(default)]
    pub variables: VariablesConfig,

    /// Remote build submission.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Object storage.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Local notebook execution (`nbci execute`).
    #[serde(default)]
    pub local: LocalConfig,
}

/// `[execution]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Container image the remote job runs notebooks in.
    #[serde(default = "default_container_uri")]
    pub container_uri: String,

    /// Local directory where preprocessed notebooks and archives are staged.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,

    /// Git remote the base branch is resolved against. Empty means a local ref.
    #[serde(default = "default_git_remote")]
    pub git_remote: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            container_uri: default_container_uri(),
            staging_dir: default_staging_dir(),
            git_remote: default_git_remote(),
        }
    }
}

fn default_container_uri() -> String {
    "gcr.io/cloud-devrel-public-resources/python-samples-testing-docker:latest".into()
}
fn default_staging_dir() -> String {
    "staging".into()
}
fn default_git_remote() -> String {
    "origin".into()
}

/// `[preprocess]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Cell tags that exclude a cell from execution.
    #[serde(default = "default_skip_tags")]
    pub skip_tags: Vec<String>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            skip_tags: default_skip_tags(),
        }
    }
}

fn default_skip_tags() -> Vec<String> {
    vec!["no_execute".into()]
}

/// How replacement keys are matched in code cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubstitutionMode {
    /// Replace every literal occurrence of the token.
    #[default]
    Literal,
    /// Replace the bracketed placeholder in `NAME = "[...]"` assignments.
    Assign,
}

/// `[variables]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariablesConfig {
    #[serde(default)]
    pub mode: SubstitutionMode,

    /// Token replaced by `--variable-project-id`.
    #[serde(default = "default_project_id_token")]
    pub project_id_token: String,

    /// Token replaced by `--variable-region`.
    #[serde(default = "default_region_token")]
    pub region_token: String,
}

impl Default for VariablesConfig {
    fn default() -> Self {
        Self {
            mode: SubstitutionMode::default(),
            project_id_token: default_project_id_token(),
            region_token: default_region_token(),
        }
    }
}

fn default_project_id_token() -> String {
    "[your-project-id]".into()
}
fn default_region_token() -> String {
    "[your-region]".into()
}

impl VariablesConfig {
    /// Tokens keyed for the configured mode. In `assign` mode the keys are
    /// variable names rather than placeholder literals.
    pub fn tokens(&self) -> (&str, &str) {
        match self.mode {
            SubstitutionMode::Literal => {
                (self.project_id_token.as_str(), self.region_token.as_str())
            }
            SubstitutionMode::Assign => ("PROJECT_ID", "REGION"),
        }
    }
}

/// `[remote]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Program that submits the remote job.
    #[serde(default = "default_remote_program")]
    pub program: String,

    /// Argument template. Supports `{code_archive_uri}`, `{notebook_uri}`,
    /// `{output_uri}`, `{container_uri}` and `{display_name}`.
    #[serde(default = "default_remote_args")]
    pub args: Vec<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            program: default_remote_program(),
            args: default_remote_args(),
        }
    }
}

fn default_remote_program() -> String {
    "gcloud".into()
}
fn default_remote_args() -> Vec<String> {
    [
        "builds",
        "submit",
        "{code_archive_uri}",
        "--config=.cloud-build/notebook-execution.yaml",
        "--substitutions=_NOTEBOOK_URI={notebook_uri},_OUTPUT_URI={output_uri},_CONTAINER_URI={container_uri},_DISPLAY_NAME={display_name}",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Program used for `gs://` copies.
    #[serde(default = "default_gsutil_program")]
    pub gsutil_program: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            gsutil_program: default_gsutil_program(),
        }
    }
}

fn default_gsutil_program() -> String {
    "gsutil".into()
}

/// `[local]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Program that executes a notebook in place.
    #[serde(default = "default_executor_program")]
    pub executor_program: String,

    /// Argument template. Supports `{input}` and `{output}`.
    #[serde(default = "default_executor_args")]
    pub executor_args: Vec<String>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            executor_program: default_executor_program(),
            executor_args: default_executor_args(),
        }
    }
}

fn default_executor_program() -> String {
    "papermill".into()
}
fn default_executor_args() -> Vec<String> {
    vec!["{input}".into(), "{output}".into(), "--log-output".into()]
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.nbci/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| NbciError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.nbci/nbci.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| NbciError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| NbciError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| NbciError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| NbciError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| NbciError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("container_uri"));
        assert!(toml_str.contains("no_execute"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.execution.staging_dir, "staging");
        assert_eq!(parsed.remote.program, "gcloud");
        assert_eq!(parsed.variables.mode, SubstitutionMode::Literal);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[variables]
mode = "assign"

[local]
executor_program = "jupyter"
executor_args = ["nbconvert", "--execute", "{input}", "--output", "{output}"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.variables.mode, SubstitutionMode::Assign);
        assert_eq!(config.variables.tokens(), ("PROJECT_ID", "REGION"));
        assert_eq!(config.local.executor_args.len(), 5);
        assert_eq!(config.execution.git_remote, "origin");
        assert_eq!(config.preprocess.skip_tags, vec!["no_execute".to_string()]);
    }

    #[test]
    fn literal_tokens_come_from_config() {
        let vars = VariablesConfig::default();
        assert_eq!(vars.tokens(), ("[your-project-id]", "[your-region]"));
    }

    #[test]
    fn load_config_from_reports_parse_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nbci.toml");
        std::fs::write(&path, "[execution\nbroken").expect("write");

        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
        assert!(matches!(err, NbciError::Config { .. }));
    }
}
