//! Repo-rooted tool execution for the agent loop.
//!
//! Every tool operates strictly beneath one repository root; path
//! arguments that escape it are rejected. Results are plain strings the
//! model reads back, and every failure is reported as an `Error: …`
//! string rather than an exception, which is also the shape the trace
//! analyzer keys on. The lexical tools (grep/glob/view) and semantic
//! tools (symbol/type/callgraph lookups) form the two disjoint channel
//! sets of the dual harness.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use globset::Glob;
use grep_regex::RegexMatcher;
use grep_searcher::SearcherBuilder;
use grep_searcher::sinks::UTF8;
use moka::sync::Cache;
use serde::Deserialize;
use serde_json::json;

use crate::core::callgraph::FileCallGraph;
use crate::harness::message::{ToolCall, ToolDefinition};
use crate::infra::io::{read_file_smart, slice_lines};
use crate::infra::line_index::NewlineIndex;
use crate::infra::walk::RepoWalker;
use crate::parsers::index::{AstIndex, DefKind, IndexerRegistry};

const VIEW_FILE_DEFAULT_WINDOW: u32 = 400;
const VIEW_DIRECTORY_MAX_ENTRIES: usize = 300;
const GREP_MAX_MATCHES: usize = 100;
const GLOB_MAX_MATCHES: usize = 200;
const SYMBOL_MAX_MATCHES: usize = 50;
const SYMBOL_MAX_FILES: usize = 2000;

/// The terminal tool name; its call is intercepted by the loop.
pub const REPORT_BACK: &str = "report_back";

/// Which tool subset an agent sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChannel {
    /// Single-channel harness: everything.
    Full,
    /// grep/glob/view only.
    Lexical,
    /// symbol/type/callgraph lookups (plus file viewing).
    Semantic,
}

impl ToolChannel {
    pub fn allowed(&self) -> &'static [&'static str] {
        match self {
            ToolChannel::Full => &[
                "view_file",
                "view_directory",
                "grep_search",
                "glob",
                "search_symbol",
                "find_symbol",
                "list_symbols",
                "call_graph",
                "get_type",
            ],
            ToolChannel::Lexical => &["view_file", "view_directory", "grep_search", "glob"],
            ToolChannel::Semantic => &[
                "view_file",
                "search_symbol",
                "find_symbol",
                "list_symbols",
                "call_graph",
                "get_type",
            ],
        }
    }

    /// Definitions advertised to the model, report_back included.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .allowed()
            .iter()
            .filter_map(|name| tool_definition(name))
            .collect();
        defs.push(report_back_definition());
        defs
    }
}

pub struct ToolExecutor {
    repo_root: PathBuf,
    registry: Arc<IndexerRegistry>,
    channel: ToolChannel,
    walker: RepoWalker,

    /// Per-file definition cache shared across turns of one case.
    index_cache: Cache<PathBuf, Arc<AstIndex>>,
}

impl ToolExecutor {
    pub fn new(repo_root: &Path, registry: Arc<IndexerRegistry>, channel: ToolChannel) -> Result<Self> {
        Ok(Self {
            repo_root: repo_root.to_path_buf(),
            registry,
            channel,
            walker: RepoWalker::for_repo()?,
            index_cache: Cache::new(2048),
        })
    }

    pub fn channel(&self) -> ToolChannel {
        self.channel
    }

    /// Execute one tool call, never panicking and never returning Err:
    /// failures become `Error: …` strings for the model to read.
    pub fn execute(&self, call: &ToolCall) -> String {
        if !self.channel.allowed().contains(&call.name.as_str()) {
            return format!("Error: tool '{}' is not available", call.name);
        }

        let result = match call.name.as_str() {
            "view_file" => self.view_file(&call.arguments),
            "view_directory" => self.view_directory(&call.arguments),
            "grep_search" => self.grep_search(&call.arguments),
            "glob" => self.glob(&call.arguments),
            "search_symbol" => self.search_symbol(&call.arguments),
            "find_symbol" => self.find_symbol(&call.arguments),
            "list_symbols" => self.list_symbols(&call.arguments),
            "call_graph" => self.call_graph(&call.arguments),
            "get_type" => self.get_type(&call.arguments),
            other => Err(anyhow::anyhow!("unknown tool '{other}'")),
        };

        match result {
            Ok(text) => text,
            Err(err) => format!("Error: {err:#}"),
        }
    }

    /// Resolve a path argument inside the repo, rejecting escapes.
    fn resolve(&self, raw: &str) -> Result<PathBuf> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            bail!("empty path");
        }

        let candidate = Path::new(trimmed);
        let joined = if candidate.is_absolute() {
            candidate
                .strip_prefix(&self.repo_root)
                .map(|rel| self.repo_root.join(rel))
                .map_err(|_| anyhow::anyhow!("path '{trimmed}' is outside the repository"))?
        } else {
            self.repo_root.join(candidate)
        };

        // No parent traversal; symlink tricks are bounded by the checkout
        if joined
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            bail!("path '{trimmed}' is outside the repository");
        }

        Ok(joined)
    }

    fn relative<'p>(&self, path: &'p Path) -> &'p Path {
        path.strip_prefix(&self.repo_root).unwrap_or(path)
    }

    fn view_file(&self, arguments: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Args {
            path: String,
            start_line: Option<u32>,
            end_line: Option<u32>,
        }
        let args: Args = parse_args(arguments)?;
        let path = self.resolve(&args.path)?;

        let content = read_file_smart(&path)?;
        let total = NewlineIndex::build(content.bytes()).line_count() as u32;
        if total == 0 {
            return Ok(format!("{} is empty", args.path));
        }

        let start = args.start_line.unwrap_or(1).max(1);
        let end = args
            .end_line
            .unwrap_or_else(|| start.saturating_add(VIEW_FILE_DEFAULT_WINDOW - 1))
            .min(total);
        if start > end || start > total {
            bail!("invalid line range {start}-{end} (file has {total} lines)");
        }

        let body = slice_lines(&content, crate::core::ranges::LineRange(start, end));
        let mut out = String::with_capacity(body.len() + 64);
        out.push_str(&format!(
            "{} lines {start}-{end} of {total}\n",
            self.relative(&path).display()
        ));
        for (offset, line) in body.lines().enumerate() {
            out.push_str(&format!("{:>6}| {line}\n", start + offset as u32));
        }
        Ok(out)
    }

    fn view_directory(&self, arguments: &str) -> Result<String> {
        #[derive(Deserialize, Default)]
        struct Args {
            path: Option<String>,
        }
        let args: Args = parse_args_or_default(arguments)?;

        let root = match &args.path {
            Some(p) => self.resolve(p)?,
            None => self.repo_root.clone(),
        };
        if !root.is_dir() {
            bail!("'{}' is not a directory", self.relative(&root).display());
        }

        let files = self.walker.walk_files(&root);
        let total = files.len();
        let mut out = String::new();
        out.push_str(&format!(
            "{} files under {}\n",
            total,
            self.relative(&root).display()
        ));
        for file in files.iter().take(VIEW_DIRECTORY_MAX_ENTRIES) {
            out.push_str(&format!("{}\n", self.relative(file).display()));
        }
        if total > VIEW_DIRECTORY_MAX_ENTRIES {
            out.push_str(&format!(
                "... {} more not shown\n",
                total - VIEW_DIRECTORY_MAX_ENTRIES
            ));
        }
        Ok(out)
    }

    fn grep_search(&self, arguments: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Args {
            pattern: String,
            glob: Option<String>,
        }
        let args: Args = parse_args(arguments)?;

        let matcher = RegexMatcher::new(&args.pattern)
            .with_context(|| format!("invalid pattern '{}'", args.pattern))?;
        let glob_filter = match &args.glob {
            Some(g) => Some(
                Glob::new(g)
                    .with_context(|| format!("invalid glob '{g}'"))?
                    .compile_matcher(),
            ),
            None => None,
        };

        let mut searcher = SearcherBuilder::new().line_number(true).build();
        let mut matches: Vec<String> = Vec::new();

        'files: for file in self.walker.walk_files(&self.repo_root) {
            let rel = self.relative(&file).to_path_buf();
            if let Some(filter) = &glob_filter
                && !filter.is_match(&rel)
            {
                continue;
            }

            let rel_display = rel.display().to_string();
            let sink = UTF8(|line_number, line| {
                matches.push(format!("{rel_display}:{line_number}: {}", line.trim_end()));
                Ok(matches.len() < GREP_MAX_MATCHES)
            });
            // Binary or unreadable files are skipped silently
            let _ = searcher.search_path(&matcher, &file, sink);

            if matches.len() >= GREP_MAX_MATCHES {
                matches.push(format!("... capped at {GREP_MAX_MATCHES} matches"));
                break 'files;
            }
        }

        if matches.is_empty() {
            Ok(format!("no matches for '{}'", args.pattern))
        } else {
            Ok(matches.join("\n"))
        }
    }

    fn glob(&self, arguments: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Args {
            pattern: String,
        }
        let args: Args = parse_args(arguments)?;

        let matcher = Glob::new(&args.pattern)
            .with_context(|| format!("invalid glob '{}'", args.pattern))?
            .compile_matcher();

        let mut out: Vec<String> = Vec::new();
        for file in self.walker.walk_files(&self.repo_root) {
            let rel = self.relative(&file);
            if matcher.is_match(rel) {
                out.push(rel.display().to_string());
                if out.len() >= GLOB_MAX_MATCHES {
                    out.push(format!("... capped at {GLOB_MAX_MATCHES} matches"));
                    break;
                }
            }
        }

        if out.is_empty() {
            Ok(format!("no files match '{}'", args.pattern))
        } else {
            Ok(out.join("\n"))
        }
    }

    fn search_symbol(&self, arguments: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Args {
            name: String,
        }
        let args: Args = parse_args(arguments)?;
        let needle = args.name.trim();
        if needle.is_empty() {
            bail!("empty symbol name");
        }

        let mut out: Vec<String> = Vec::new();
        for file in self.indexable_files() {
            let Some(index) = self.index_for(&file) else {
                continue;
            };
            for def in index.definitions() {
                if def.name.contains(needle) {
                    out.push(self.format_definition(&file, def));
                    if out.len() >= SYMBOL_MAX_MATCHES {
                        out.push(format!("... capped at {SYMBOL_MAX_MATCHES} matches"));
                        return Ok(out.join("\n"));
                    }
                }
            }
        }

        if out.is_empty() {
            Ok(format!("no symbols matching '{needle}'"))
        } else {
            Ok(out.join("\n"))
        }
    }

    fn find_symbol(&self, arguments: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Args {
            name: String,
            path: Option<String>,
        }
        let args: Args = parse_args(arguments)?;

        let files: Vec<PathBuf> = match &args.path {
            Some(p) => vec![self.resolve(p)?],
            None => self.indexable_files(),
        };

        let mut out: Vec<String> = Vec::new();
        for file in files {
            let Some(index) = self.index_for(&file) else {
                continue;
            };
            for def in index.by_name(&args.name) {
                out.push(self.format_definition(&file, def));
            }
        }

        if out.is_empty() {
            Ok(format!("no definition of '{}' found", args.name))
        } else {
            Ok(out.join("\n"))
        }
    }

    fn list_symbols(&self, arguments: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Args {
            path: String,
        }
        let args: Args = parse_args(arguments)?;
        let file = self.resolve(&args.path)?;

        let Some(index) = self.index_for(&file) else {
            bail!("'{}' has no parseable definitions", args.path);
        };

        let mut out: Vec<String> = Vec::new();
        for def in index.definitions() {
            out.push(self.format_definition(&file, def));
        }
        if out.is_empty() {
            Ok(format!("{} defines no symbols", args.path))
        } else {
            Ok(out.join("\n"))
        }
    }

    fn call_graph(&self, arguments: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Args {
            function: String,
            path: String,
        }
        let args: Args = parse_args(arguments)?;
        // Containment check up front; the graph works on relative paths
        let resolved = self.resolve(&args.path)?;
        let rel = self.relative(&resolved).to_path_buf();

        let graph = FileCallGraph::build(&self.repo_root, &rel.to_string_lossy(), &self.registry)
            .ok_or_else(|| anyhow::anyhow!("no call graph available for '{}'", args.path))?;

        let report = graph.describe(&args.function);
        if report.is_empty() {
            bail!("function '{}' not found in '{}'", args.function, args.path);
        }
        Ok(report)
    }

    fn get_type(&self, arguments: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct Args {
            name: String,
        }
        let args: Args = parse_args(arguments)?;

        let mut out: Vec<String> = Vec::new();
        for file in self.indexable_files() {
            let Some(index) = self.index_for(&file) else {
                continue;
            };
            for def in index.by_name(&args.name) {
                let kind = match def.kind {
                    DefKind::Function => "function",
                    DefKind::Class => "class",
                };
                out.push(format!(
                    "{} ({kind}): {}",
                    self.relative(&file).display(),
                    def.signature
                ));
            }
        }

        if out.is_empty() {
            Ok(format!("no declaration of '{}' found", args.name))
        } else {
            Ok(out.join("\n"))
        }
    }

    fn indexable_files(&self) -> Vec<PathBuf> {
        self.walker
            .walk_files(&self.repo_root)
            .into_iter()
            .filter(|p| self.registry.for_path(p).is_some())
            .take(SYMBOL_MAX_FILES)
            .collect()
    }

    fn index_for(&self, file: &Path) -> Option<Arc<AstIndex>> {
        if let Some(cached) = self.index_cache.get(file) {
            return if cached.is_empty() { None } else { Some(cached) };
        }

        let indexer = self.registry.for_path(file)?;
        let content = read_file_smart(file).ok()?;
        let index = indexer
            .index(&content.text())
            .map(Arc::new)
            .unwrap_or_else(|_| Arc::new(AstIndex::empty()));

        self.index_cache.insert(file.to_path_buf(), index.clone());
        if index.is_empty() { None } else { Some(index) }
    }

    fn format_definition(&self, file: &Path, def: &crate::parsers::index::Definition) -> String {
        let container = def
            .container
            .as_deref()
            .map(|c| format!(" in {c}"))
            .unwrap_or_default();
        format!(
            "{}:{}-{}{container}: {}",
            self.relative(file).display(),
            def.start_line,
            def.end_line,
            def.signature
        )
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: &str) -> Result<T> {
    serde_json::from_str(arguments).context("invalid tool arguments")
}

fn parse_args_or_default<T: serde::de::DeserializeOwned + Default>(arguments: &str) -> Result<T> {
    let trimmed = arguments.trim();
    if trimmed.is_empty() || trimmed == "{}" {
        return Ok(T::default());
    }
    parse_args(trimmed)
}

fn string_param(description: &str) -> serde_json::Value {
    json!({"type": "string", "description": description})
}

fn tool_definition(name: &str) -> Option<ToolDefinition> {
    let (description, parameters) = match name {
        "view_file" => (
            "Read a file with line numbers, optionally restricted to a line range.",
            json!({
                "type": "object",
                "properties": {
                    "path": string_param("Repo-relative file path"),
                    "start_line": {"type": "integer", "description": "First line, 1-indexed"},
                    "end_line": {"type": "integer", "description": "Last line, inclusive"}
                },
                "required": ["path"]
            }),
        ),
        "view_directory" => (
            "List files under a directory (repo root by default).",
            json!({
                "type": "object",
                "properties": {
                    "path": string_param("Repo-relative directory path")
                }
            }),
        ),
        "grep_search" => (
            "Regex search across the repository, returning path:line matches.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": string_param("Regular expression"),
                    "glob": string_param("Optional glob restricting searched files")
                },
                "required": ["pattern"]
            }),
        ),
        "glob" => (
            "List files matching a glob pattern.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": string_param("Glob pattern, e.g. src/**/*.py")
                },
                "required": ["pattern"]
            }),
        ),
        "search_symbol" => (
            "Find definitions whose name contains the given text.",
            json!({
                "type": "object",
                "properties": {
                    "name": string_param("Symbol name or fragment")
                },
                "required": ["name"]
            }),
        ),
        "find_symbol" => (
            "Find exact definitions of a symbol, optionally within one file.",
            json!({
                "type": "object",
                "properties": {
                    "name": string_param("Exact symbol name"),
                    "path": string_param("Optional repo-relative file path")
                },
                "required": ["name"]
            }),
        ),
        "list_symbols" => (
            "List every definition in a file with its line span and signature.",
            json!({
                "type": "object",
                "properties": {
                    "path": string_param("Repo-relative file path")
                },
                "required": ["path"]
            }),
        ),
        "call_graph" => (
            "Show what a function calls and what calls it, within its file.",
            json!({
                "type": "object",
                "properties": {
                    "function": string_param("Function name"),
                    "path": string_param("Repo-relative file path")
                },
                "required": ["function", "path"]
            }),
        ),
        "get_type" => (
            "Show the declaration header of a named symbol.",
            json!({
                "type": "object",
                "properties": {
                    "name": string_param("Symbol name")
                },
                "required": ["name"]
            }),
        ),
        _ => return None,
    };

    Some(ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    })
}

/// The terminal tool: deliver the located files and finish.
pub fn report_back_definition() -> ToolDefinition {
    ToolDefinition {
        name: REPORT_BACK.to_string(),
        description: "Deliver the final answer: the files and 1-indexed inclusive \
                      line ranges where the described change belongs. Ends the search."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "files": {
                    "type": "object",
                    "description": "Map of repo-relative path to list of [start, end] line ranges",
                    "additionalProperties": {
                        "type": "array",
                        "items": {
                            "type": "array",
                            "items": {"type": "integer"},
                            "minItems": 2,
                            "maxItems": 2
                        }
                    }
                },
                "explanation": string_param("Short rationale for the selection")
            },
            "required": ["files"]
        }),
    }
}
