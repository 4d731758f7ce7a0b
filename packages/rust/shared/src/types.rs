//! Core domain types for notebook runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NbciError, Result};

/// File extension (without the dot) identifying notebook files.
pub const NOTEBOOK_EXTENSION: &str = "ipynb";

// ---------------------------------------------------------------------------
// ReplacementMap
// ---------------------------------------------------------------------------

/// Placeholder token → replacement value, validated at construction.
///
/// Keys are never empty and no value contains any key. That makes a second
/// application a no-op for ordinary placeholder maps, but not in general: a
/// value can still combine with neighbouring text, or with another value, to
/// spell a key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ReplacementMap(BTreeMap<String, String>);

impl ReplacementMap {
    /// Build a map from `(token, value)` pairs.
    pub fn new<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (k, v) in pairs {
            let key: String = k.into();
            if key.is_empty() {
                return Err(NbciError::validation("replacement key must not be empty"));
            }
            if map.insert(key.clone(), v.into()).is_some() {
                return Err(NbciError::validation(format!(
                    "duplicate replacement key '{key}'"
                )));
            }
        }

        for (key, value) in &map {
            if let Some(inner) = map.keys().find(|k| value.contains(k.as_str())) {
                return Err(NbciError::validation(format!(
                    "value for '{key}' contains placeholder '{inner}'"
                )));
            }
        }

        Ok(Self(map))
    }

    /// Parse `KEY=VALUE` strings as given on the command line.
    pub fn from_assignments<S: AsRef<str>>(items: &[S]) -> Result<Self> {
        let pairs = items
            .iter()
            .map(|item| {
                let item = item.as_ref();
                item.split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .ok_or_else(|| {
                        NbciError::validation(format!("expected KEY=VALUE, got '{item}'"))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(pairs)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Iterate entries with longer keys first, then lexicographically.
    ///
    /// Longer tokens go first so a token that is a prefix of another never
    /// consumes part of the longer one.
    pub fn iter_longest_first(&self) -> impl Iterator<Item = (&str, &str)> {
        let mut entries: Vec<(&str, &str)> =
            self.0.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));
        entries.into_iter()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

/// How a single notebook run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed { message: String },
}

/// Result record for one notebook, produced once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Notebook path relative to the repository root.
    pub notebook: PathBuf,
    /// Where the executed notebook was (or would have been) written.
    pub output_uri: String,
    /// Wall-clock time spent on this notebook.
    pub duration: Duration,
    pub outcome: Outcome,
}

impl ExecutionResult {
    pub fn passed(
        notebook: impl Into<PathBuf>,
        output_uri: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            notebook: notebook.into(),
            output_uri: output_uri.into(),
            duration,
            outcome: Outcome::Passed,
        }
    }

    pub fn failed(
        notebook: impl Into<PathBuf>,
        output_uri: impl Into<String>,
        duration: Duration,
        message: impl Into<String>,
    ) -> Self {
        Self {
            notebook: notebook.into(),
            output_uri: output_uri.into(),
            duration,
            outcome: Outcome::Failed {
                message: message.into(),
            },
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self.outcome, Outcome::Passed)
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Passed => None,
            Outcome::Failed { message } => Some(message.as_str()),
        }
    }

    /// Base name of the notebook file, e.g. `intro.ipynb`.
    pub fn file_name(&self) -> String {
        file_name_of(&self.notebook)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacement_map_rejects_empty_key() {
        let err = ReplacementMap::new([("", "x")]).unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn replacement_map_rejects_value_containing_key() {
        let err = ReplacementMap::new([("PROJECT", "my-PROJECT")]).unwrap_err();
        assert!(err.to_string().contains("contains placeholder"));

        let err = ReplacementMap::new([("A", "1"), ("B", "xAx")]).unwrap_err();
        assert!(err.to_string().contains("'B'"));
    }

    #[test]
    fn replacement_map_orders_longest_first() {
        let map = ReplacementMap::new([("[id]", "1"), ("[id-long]", "2"), ("[ab]", "3")])
            .expect("valid map");
        let keys: Vec<_> = map.iter_longest_first().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["[id-long]", "[ab]", "[id]"]);
    }

    #[test]
    fn replacement_map_from_assignments() {
        let map = ReplacementMap::from_assignments(&["PROJECT_ID=demo", "REGION=us-central1"])
            .expect("parse");
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("REGION"), Some("us-central1"));

        assert!(ReplacementMap::from_assignments(&["novalue"]).is_err());
        assert!(ReplacementMap::from_assignments(&["A=1", "A=2"]).is_err());
    }

    #[test]
    fn result_accessors() {
        let ok = ExecutionResult::passed("nb/a.ipynb", "gs://b/a.ipynb", Duration::from_secs(3));
        assert!(ok.is_pass());
        assert_eq!(ok.error_message(), None);
        assert_eq!(ok.file_name(), "a.ipynb");

        let bad = ExecutionResult::failed("b.ipynb", "", Duration::ZERO, "boom");
        assert!(!bad.is_pass());
        assert_eq!(bad.error_message(), Some("boom"));
    }
}
