//! Language-agnostic definition index.
//!
//! The ground-truth builder and the semantic harness tools only ever ask
//! two questions of a source file: "what definitions does it contain" and
//! "what is the smallest definition enclosing this line". Each language
//! backend answers through [`DefinitionIndexer`]; everything downstream is
//! grammar-agnostic. A file that fails to parse yields an empty index and
//! callers choose their own fallback.

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Definition classification exposed to the rest of the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefKind {
    Function,
    Class,
}

/// One function or class definition in a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub kind: DefKind,

    /// Declared name.
    pub name: String,

    /// Enclosing class / impl target, when nested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,

    /// Header text: definition start to body start, whitespace collapsed,
    /// trailing body introducer stripped.
    pub signature: String,

    /// 1-based inclusive line span of the whole definition.
    pub start_line: u32,
    pub end_line: u32,
}

impl Definition {
    pub fn span(&self) -> u32 {
        self.end_line - self.start_line
    }

    pub fn contains_line(&self, line: u32) -> bool {
        self.start_line <= line && line <= self.end_line
    }
}

/// All definitions of one file, ordered by `(start_line, end_line)`.
#[derive(Debug, Clone, Default)]
pub struct AstIndex {
    defs: Vec<Definition>,
}

impl AstIndex {
    pub fn new(mut defs: Vec<Definition>) -> Self {
        defs.sort_by_key(|d| (d.start_line, d.end_line));
        Self { defs }
    }

    /// The degenerate index a parse failure produces.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn definitions(&self) -> &[Definition] {
        &self.defs
    }

    /// Smallest enclosing definition of any kind; ties break to the
    /// earliest start.
    pub fn find_enclosing(&self, line: u32) -> Option<&Definition> {
        self.defs
            .iter()
            .filter(|d| d.contains_line(line))
            .min_by_key(|d| (d.span(), d.start_line))
    }

    /// Smallest enclosing function definition, skipping class scopes.
    pub fn enclosing_function(&self, line: u32) -> Option<&Definition> {
        self.defs
            .iter()
            .filter(|d| d.kind == DefKind::Function && d.contains_line(line))
            .min_by_key(|d| (d.span(), d.start_line))
    }

    /// Definitions matching a name, exact match on the declared name.
    pub fn by_name(&self, name: &str) -> impl Iterator<Item = &Definition> {
        self.defs.iter().filter(move |d| d.name == name)
    }
}

/// One per supported language. Implementations must return an empty index
/// (not an error) when the parser flags the root node as erroneous.
pub trait DefinitionIndexer: Send + Sync {
    /// Canonical lowercase language label.
    fn language(&self) -> &'static str;

    /// Whether this indexer is responsible for the path, by extension.
    fn handles(&self, path: &Path) -> bool;

    /// Index `content` into definitions.
    fn index(&self, content: &str) -> Result<AstIndex>;
}

/// The set of language backends active for a run.
pub struct IndexerRegistry {
    indexers: Vec<Box<dyn DefinitionIndexer>>,
}

impl IndexerRegistry {
    /// Build indexers for the named languages. Unknown labels are an error
    /// so config typos surface immediately.
    pub fn with_languages(languages: &[String]) -> Result<Self> {
        let mut indexers: Vec<Box<dyn DefinitionIndexer>> = Vec::new();
        for lang in languages {
            match lang.to_lowercase().as_str() {
                "python" => indexers.push(Box::new(super::python_ast::PythonIndexer::new()?)),
                "rust" => indexers.push(Box::new(super::rust_ast::RustIndexer::new()?)),
                other => anyhow::bail!("Unsupported language: {other}"),
            }
        }
        Ok(Self { indexers })
    }

    pub fn for_path(&self, path: &Path) -> Option<&dyn DefinitionIndexer> {
        self.indexers
            .iter()
            .find(|ix| ix.handles(path))
            .map(Box::as_ref)
    }

    pub fn languages(&self) -> Vec<&'static str> {
        self.indexers.iter().map(|ix| ix.language()).collect()
    }
}

/// Collapse internal whitespace in a definition header and strip the
/// trailing body introducer (`:` for Python, `{` for Rust).
pub(crate) fn clean_signature(raw: &str) -> String {
    let mut sig = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    while sig.ends_with(':') || sig.ends_with('{') {
        sig.pop();
        sig.truncate(sig.trim_end().len());
    }
    sig
}
