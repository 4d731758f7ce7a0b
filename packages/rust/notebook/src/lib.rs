//! Jupyter notebook document model and preprocessing passes.
//!
//! Notebooks are read and written as nbformat v4 JSON. Everything the model
//! does not interpret (outputs, execution counts, attachments, unknown
//! top-level keys) is carried through untouched so a read/write cycle only
//! changes what the preprocessors change.

mod preprocess;

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use nbci_shared::{NbciError, Result};

pub use preprocess::{
    AssignVariables, Preprocessor, RemoveNoExecuteCells, UpdateVariables, preprocess,
};

/// Only nbformat major version this crate reads.
pub const SUPPORTED_NBFORMAT: u32 = 4;

// ---------------------------------------------------------------------------
// Notebook
// ---------------------------------------------------------------------------

/// A notebook document: ordered cells plus notebook-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub nbformat: u32,
    pub nbformat_minor: u32,
    /// Top-level keys not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Notebook {
    /// Parse a notebook from its JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let nb: Notebook = serde_json::from_str(json)
            .map_err(|e| NbciError::notebook(format!("invalid notebook JSON: {e}")))?;

        if nb.nbformat != SUPPORTED_NBFORMAT {
            return Err(NbciError::notebook(format!(
                "unsupported nbformat {} (expected {SUPPORTED_NBFORMAT})",
                nb.nbformat
            )));
        }

        Ok(nb)
    }

    /// Read a notebook file from disk.
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| NbciError::io(path, e))?;
        Self::from_json(&content).map_err(|e| match e {
            NbciError::Notebook { message } => {
                NbciError::notebook(format!("{}: {message}", path.display()))
            }
            other => other,
        })
    }

    /// Serialize the way Jupyter does: one-space indent, trailing newline.
    pub fn to_json(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;

        let mut out = String::from_utf8(buf)
            .map_err(|e| NbciError::notebook(format!("serialized notebook is not UTF-8: {e}")))?;
        out.push('\n');
        Ok(out)
    }

    /// Write the notebook to disk, creating parent directories as needed.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| NbciError::io(parent, e))?;
        }
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|e| NbciError::io(path, e))
    }
}

// ---------------------------------------------------------------------------
// Cell
// ---------------------------------------------------------------------------

/// Cell kinds defined by nbformat v4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Code,
    Markdown,
    Raw,
}

/// A single notebook cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub cell_type: CellType,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub source: Source,
    /// `outputs`, `execution_count`, `id`, `attachments`, ...
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Cell {
    /// A code cell with no outputs.
    pub fn code(source: impl Into<String>) -> Self {
        let mut extra = Map::new();
        extra.insert("execution_count".into(), Value::Null);
        extra.insert("outputs".into(), Value::Array(Vec::new()));
        Self {
            cell_type: CellType::Code,
            metadata: Map::new(),
            source: Source::Text(source.into()),
            extra,
        }
    }

    pub fn markdown(source: impl Into<String>) -> Self {
        Self {
            cell_type: CellType::Markdown,
            metadata: Map::new(),
            source: Source::Text(source.into()),
            extra: Map::new(),
        }
    }

    /// Builder-style helper that sets `metadata.tags`.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = tags.into_iter().map(|t| Value::String(t.into())).collect();
        self.metadata.insert("tags".into(), Value::Array(tags));
        self
    }

    pub fn is_code(&self) -> bool {
        self.cell_type == CellType::Code
    }

    /// String entries of `metadata.tags`; anything malformed is ignored.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.metadata
            .get("tags")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags().any(|t| t == tag)
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Cell source, stored either as one string or as a list of lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Source {
    Text(String),
    Lines(Vec<String>),
}

impl Source {
    /// The full source text.
    pub fn text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Lines(lines) => lines.concat(),
        }
    }

    /// Replace the text, keeping the on-disk representation.
    pub fn set_text(&mut self, text: String) {
        match self {
            Self::Text(s) => *s = text,
            Self::Lines(lines) => {
                *lines = text.split_inclusive('\n').map(String::from).collect();
            }
        }
    }
}
