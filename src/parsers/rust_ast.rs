//! Rust definition indexer on Tree-sitter.
//!
//! Same contract as the Python backend: functions with impl/trait
//! attribution, impl and trait blocks as the class-like scopes, header
//! signatures up to the body brace. Methods inside `impl Foo` carry
//! `Foo` as their container.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tree_sitter::{Language, Node, Parser};

use super::index::{AstIndex, DefKind, Definition, DefinitionIndexer, clean_signature};

pub struct RustIndexer {
    language: Language,
}

impl RustIndexer {
    pub fn new() -> Result<Self> {
        let language = tree_sitter_rust::LANGUAGE.into();
        Ok(Self { language })
    }
}

impl DefinitionIndexer for RustIndexer {
    fn language(&self) -> &'static str {
        "rust"
    }

    fn handles(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some("rs")
    }

    fn index(&self, content: &str) -> Result<AstIndex> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.language)
            .context("set Rust language")?;

        let tree = parser
            .parse(content, None)
            .ok_or_else(|| anyhow!("Failed to parse Rust source"))?;

        if tree.root_node().has_error() {
            return Ok(AstIndex::empty());
        }

        let bytes = content.as_bytes();
        let mut defs = Vec::with_capacity(16);
        collect(tree.root_node(), bytes, None, &mut defs);
        Ok(AstIndex::new(defs))
    }
}

fn collect(node: Node, bytes: &[u8], container: Option<&str>, defs: &mut Vec<Definition>) {
    let mut scope_name: Option<String> = None;

    match node.kind() {
        // impl/trait blocks are the class-like scopes for Rust
        "impl_item" => {
            if let Some(name) = impl_target_name(node, bytes) {
                defs.push(Definition {
                    kind: DefKind::Class,
                    name: name.clone(),
                    container: container.map(str::to_string),
                    signature: signature_of(node, bytes),
                    start_line: node.start_position().row as u32 + 1,
                    end_line: node.end_position().row as u32 + 1,
                });
                scope_name = Some(name);
            }
        }
        "trait_item" => {
            if let Some(name) = field_text(node, "name", bytes) {
                defs.push(Definition {
                    kind: DefKind::Class,
                    name: name.clone(),
                    container: container.map(str::to_string),
                    signature: signature_of(node, bytes),
                    start_line: node.start_position().row as u32 + 1,
                    end_line: node.end_position().row as u32 + 1,
                });
                scope_name = Some(name);
            }
        }
        "function_item" => {
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

    let next = scope_name.as_deref().or(container);

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

/// Target name of an impl block: the `type` field's text, whitespace
/// collapsed so `impl Foo <T>` and `impl Foo<T>` agree.
fn impl_target_name(node: Node, bytes: &[u8]) -> Option<String> {
    let t = node.child_by_field_name("type")?;
    let raw = t.utf8_text(bytes).ok()?;
    Some(raw.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn signature_of(node: Node, bytes: &[u8]) -> String {
    let start = node.start_byte();
    let end = node
        .child_by_field_name("body")
        .map(|b| b.start_byte())
        .unwrap_or_else(|| node.end_byte());

    let raw = String::from_utf8_lossy(&bytes[start..end.max(start)]);
    clean_signature(raw.trim())
}
