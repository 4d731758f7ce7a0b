//! Shared types, error model, and configuration for nbci.
//!
//! This crate is the foundation depended on by all other nbci crates.
//! It provides:
//! - [`NbciError`], the unified error type
//! - Domain types ([`ExecutionResult`], [`Outcome`], [`ReplacementMap`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ExecutionConfig, LocalConfig, PreprocessConfig, RemoteConfig, StorageConfig,
    SubstitutionMode, VariablesConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from,
};
pub use error::{NbciError, Result};
pub use types::{ExecutionResult, NOTEBOOK_EXTENSION, Outcome, ReplacementMap};
