//! Preprocessing passes applied to a notebook before it is executed.
//!
//! Each pass consumes a [`Notebook`] and returns the transformed document.
//! [`preprocess`] runs passes in sequence; the first error aborts the chain.

use regex::{Captures, Regex};
use tracing::debug;

use nbci_shared::{NbciError, ReplacementMap, Result};

use crate::Notebook;

/// A single notebook transformation.
pub trait Preprocessor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn preprocess(&self, nb: Notebook) -> Result<Notebook>;
}

/// Run `passes` in order over `nb`.
pub fn preprocess(mut nb: Notebook, passes: &[&dyn Preprocessor]) -> Result<Notebook> {
    for pass in passes {
        let before = nb.cells.len();
        nb = pass.preprocess(nb)?;
        debug!(pass = pass.name(), before, after = nb.cells.len(), "preprocessor applied");
    }
    Ok(nb)
}

// ---------------------------------------------------------------------------
// Cell filter
// ---------------------------------------------------------------------------

/// Drops every cell tagged with one of the skip tags.
#[derive(Debug, Clone)]
pub struct RemoveNoExecuteCells {
    skip_tags: Vec<String>,
}

impl RemoveNoExecuteCells {
    pub fn new<I, S>(skip_tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            skip_tags: skip_tags.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for RemoveNoExecuteCells {
    fn default() -> Self {
        Self::new(["no_execute"])
    }
}

impl Preprocessor for RemoveNoExecuteCells {
    fn name(&self) -> &'static str {
        "remove_no_execute_cells"
    }

    fn preprocess(&self, mut nb: Notebook) -> Result<Notebook> {
        nb.cells
            .retain(|cell| !self.skip_tags.iter().any(|tag| cell.has_tag(tag)));
        Ok(nb)
    }
}

// ---------------------------------------------------------------------------
// Literal token substitution
// ---------------------------------------------------------------------------

/// Replaces every literal occurrence of each token in code cell sources.
///
/// All tokens are matched in a single left-to-right scan, longer tokens
/// winning at the same position, so replaced text is never rescanned within
/// one application. Applying the pass a second time is not guaranteed to be
/// a no-op: a value can combine with the text around it to spell a token.
#[derive(Debug, Clone)]
pub struct UpdateVariables {
    replacements: ReplacementMap,
    matcher: Option<Regex>,
}

impl UpdateVariables {
    pub fn new(replacements: ReplacementMap) -> Result<Self> {
        let matcher = if replacements.is_empty() {
            None
        } else {
            let pattern = replacements
                .iter_longest_first()
                .map(|(token, _)| regex::escape(token))
                .collect::<Vec<_>>()
                .join("|");
            let re = Regex::new(&pattern)
                .map_err(|e| NbciError::validation(format!("cannot match replacement tokens: {e}")))?;
            Some(re)
        };
        Ok(Self {
            replacements,
            matcher,
        })
    }

    /// Apply the map to one piece of source text.
    pub fn apply(&self, source: &str) -> String {
        let Some(matcher) = &self.matcher else {
            return source.to_string();
        };
        matcher
            .replace_all(source, |caps: &Captures| {
                self.replacements.get(&caps[0]).unwrap_or(&caps[0]).to_string()
            })
            .into_owned()
    }
}

impl Preprocessor for UpdateVariables {
    fn name(&self) -> &'static str {
        "update_variables"
    }

    fn preprocess(&self, mut nb: Notebook) -> Result<Notebook> {
        if self.matcher.is_none() {
            return Ok(nb);
        }
        for cell in nb.cells.iter_mut().filter(|c| c.is_code()) {
            let text = cell.source.text();
            let updated = self.apply(&text);
            if updated != text {
                cell.source.set_text(updated);
            }
        }
        Ok(nb)
    }
}

// ---------------------------------------------------------------------------
// Assignment-style substitution
// ---------------------------------------------------------------------------

/// Fills bracketed placeholders on the right-hand side of assignments.
///
/// For a map entry `PROJECT_ID -> my-proj`, the line
/// `PROJECT_ID = "[your-project-id]"` becomes `PROJECT_ID = "my-proj"`.
#[derive(Debug, Clone)]
pub struct AssignVariables {
    rules: Vec<(Regex, String)>,
}

impl AssignVariables {
    pub fn new(replacements: &ReplacementMap) -> Result<Self> {
        let rules = replacements
            .iter_longest_first()
            .map(|(name, value)| {
                let pattern = format!(r#"({}.*?=.*?["'])\[.+?\](["'])"#, regex::escape(name));
                Regex::new(&pattern)
                    .map(|re| (re, value.to_string()))
                    .map_err(|e| NbciError::validation(format!("bad variable name '{name}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn apply(&self, source: &str) -> String {
        self.rules.iter().fold(source.to_string(), |text, (re, value)| {
            re.replace_all(&text, |caps: &Captures| {
                format!("{}{}{}", &caps[1], value, &caps[2])
            })
            .into_owned()
        })
    }
}

impl Preprocessor for AssignVariables {
    fn name(&self) -> &'static str {
        "assign_variables"
    }

    fn preprocess(&self, mut nb: Notebook) -> Result<Notebook> {
        for cell in nb.cells.iter_mut().filter(|c| c.is_code()) {
            let text = cell.source.text();
            let updated = self.apply(&text);
            if updated != text {
                cell.source.set_text(updated);
            }
        }
        Ok(nb)
    }
}
