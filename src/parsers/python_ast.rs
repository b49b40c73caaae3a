//! Filepath: src/parsers/python_ast.rs
//! ------------------------------------------------------------------
//! Python definition indexer built on Tree-sitter 0.25.x.
//! Goals:
//!   - Walk the whole tree once, collecting function and class
//!     definitions with class-ancestry attribution.
//!   - Extract the header as the signature: definition start to
//!     body start, whitespace collapsed, trailing ':' stripped.
//!   - Degrade to an empty index when the root node carries errors,
//!     so callers can apply their own fallback policy.
//!
//! Notes:
//!   - Methods are attributed to their nearest enclosing class;
//!     functions nested inside functions keep that class container.
//!   - Decorated definitions appear under decorated_definition
//!     wrappers; the recursive walk reaches them without a special
//!     case, and ranges cover the def itself, not its decorators.
//! ------------------------------------------------------------------

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tree_sitter::{Language, Node, Parser};

use super::index::{AstIndex, DefKind, Definition, DefinitionIndexer, clean_signature};

/// Indexes Python functions, methods, and classes.
pub struct PythonIndexer {
    /// Python language handle for Tree-sitter.
    language: Language,
}

impl PythonIndexer {
    pub fn new() -> Result<Self> {
        // Obtain the Tree-sitter language for Python.
        let language = tree_sitter_python::LANGUAGE.into();
        Ok(Self { language })
    }
}

impl DefinitionIndexer for PythonIndexer {
    fn language(&self) -> &'static str {
        "python"
    }

    fn handles(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some("py")
    }

    fn index(&self, content: &str) -> Result<AstIndex> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.language)
            .context("set Python language")?;

        let tree = parser
            .parse(content, None)
            .ok_or_else(|| anyhow!("Failed to parse Python source"))?;

        // Syntactically broken files produce no ground truth; the caller
        // decides whether that rejects the file or triggers a fallback.
        if tree.root_node().has_error() {
            return Ok(AstIndex::empty());
        }

        let bytes = content.as_bytes();
        let mut defs = Vec::with_capacity(16);
        collect(tree.root_node(), bytes, None, &mut defs);
        Ok(AstIndex::new(defs))
    }
}

/// Recursive collection with class-ancestry threading.
fn collect(node: Node, bytes: &[u8], container: Option<&str>, defs: &mut Vec<Definition>) {
    let mut class_name: Option<String> = None;

    match node.kind() {
        "class_definition" => {
            if let Some(name) = field_text(node, "name", bytes) {
                defs.push(Definition {
                    kind: DefKind::Class,
                    name: name.clone(),
                    container: container.map(str::to_string),
                    signature: signature_of(node, bytes),
                    start_line: node.start_position().row as u32 + 1,
                    end_line: node.end_position().row as u32 + 1,
                });
                class_name = Some(name);
            }
        }
        "function_definition" => {
            if let Some(name) = field_text(node, "name", bytes) {
                defs.push(Definition {
                    kind: DefKind::Function,
                    name,
                    container: container.map(str::to_string),
                    signature: signature_of(node, bytes),
                    start_line: node.start_position().row as u32 + 1,
                    end_line: node.end_position().row as u32 + 1,
                });
            }
        }
        _ => {}
    }

    // Children of a class see that class as container; everything else
    // inherits the caller's.
    let next = class_name.as_deref().or(container);

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect(child, bytes, next, defs);
    }
}

fn field_text(node: Node, field: &str, bytes: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .and_then(|n| n.utf8_text(bytes).ok())
        .map(str::to_string)
}

/// Header bytes: definition start up to the body block.
fn signature_of(node: Node, bytes: &[u8]) -> String {
    let start = node.start_byte();
    let end = node
        .child_by_field_name("body")
        .map(|b| b.start_byte())
        .unwrap_or_else(|| node.end_byte());

    let raw = String::from_utf8_lossy(&bytes[start..end.max(start)]);
    clean_signature(raw.trim())
}
