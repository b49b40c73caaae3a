//! Same-file call graphs for soft-context proposals.
//!
//! For every file carrying hard ground truth, build a directed graph of
//! its function definitions with caller→callee edges, then walk outward
//! from the GT functions. Callees that are not themselves ground truth
//! become `ContextEntry` candidates: related code an agent plausibly needs
//! to read, without being scored as a required find.
//!
//! Resolution is by bare name within one file. That under-links (imports,
//! aliasing) and over-links (shadowed names) in the usual static-analysis
//! ways; context entries are auxiliary signal, so both failure modes are
//! tolerable.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;
use tree_sitter::{Language, Node, Parser};

use crate::core::ranges::LineRange;
use crate::core::schema::{ContextEntry, GroundTruthEntry};
use crate::infra::io::read_file_smart;
use crate::parsers::index::{DefKind, Definition, IndexerRegistry};

/// Relevance attributed to a callee `depth` hops from ground truth.
fn relevance_for_depth(depth: usize) -> f64 {
    0.5_f64.powi(depth as i32)
}

#[derive(Debug, Clone)]
struct FunctionNode {
    def: Definition,
}

/// Propose soft-context entries for one case: direct (and optionally
/// deeper) callees of the hard-GT functions, deduplicated and stripped of
/// anything already in ground truth.
pub fn propose_soft_context(
    repo_root: &Path,
    hard_gt: &[GroundTruthEntry],
    registry: &IndexerRegistry,
    max_depth: usize,
) -> Vec<ContextEntry> {
    let gt_files: BTreeSet<&str> = hard_gt.iter().map(|e| e.path.as_str()).collect();
    let gt_keys: BTreeSet<(&str, &str, u32)> = hard_gt
        .iter()
        .map(|e| (e.path.as_str(), e.function.as_str(), e.range.start()))
        .collect();

    let mut proposals: Vec<ContextEntry> = Vec::new();

    for rel_path in gt_files {
        let Some(graph) = FileCallGraph::build(repo_root, rel_path, registry) else {
            continue;
        };

        // Seed with the GT functions living in this file
        let seeds: Vec<NodeIndex> = hard_gt
            .iter()
            .filter(|e| e.path == rel_path)
            .filter_map(|e| graph.node_for(&e.function, e.range.start()))
            .collect();

        for (node, depth) in graph.reach(&seeds, max_depth) {
            let def = &graph.graph[node].def;
            if gt_keys.contains(&(rel_path, def.name.as_str(), def.start_line)) {
                continue;
            }
            let Some(range) = LineRange::new(def.start_line, def.end_line) else {
                continue;
            };
            proposals.push(ContextEntry {
                path: rel_path.to_string(),
                function: def.name.clone(),
                range,
                signature: Some(def.signature.clone()),
                relevance_score: Some(relevance_for_depth(depth)),
            });
        }
    }

    // One proposal per (path, function, start); keep the highest relevance
    let mut best: BTreeMap<(String, String, u32), ContextEntry> = BTreeMap::new();
    for p in proposals {
        let key = (p.path.clone(), p.function.clone(), p.range.start());
        match best.get(&key) {
            Some(existing) if existing.relevance_score >= p.relevance_score => {}
            _ => {
                best.insert(key, p);
            }
        }
    }

    best.into_values().collect()
}

/// One file's functions and caller→callee edges.
pub struct FileCallGraph {
    graph: DiGraph<FunctionNode, ()>,
}

impl FileCallGraph {
    /// Parse and link a file; `None` when the file is unreadable, has no
    /// language backend, or fails to parse.
    pub fn build(repo_root: &Path, rel_path: &str, registry: &IndexerRegistry) -> Option<Self> {
        let full_path = repo_root.join(rel_path);
        let indexer = registry.for_path(&full_path)?;
        let content = read_file_smart(&full_path).ok()?;
        let text = content.text();

        let index = indexer.index(&text).ok()?;
        if index.is_empty() {
            return None;
        }

        let language: Language = match indexer.language() {
            "python" => tree_sitter_python::LANGUAGE.into(),
            "rust" => tree_sitter_rust::LANGUAGE.into(),
            other => {
                debug!(language = other, "no call extraction for language");
                return None;
            }
        };

        let mut parser = Parser::new();
        parser.set_language(&language).ok()?;
        let tree = parser.parse(text.as_ref(), None)?;
        if tree.root_node().has_error() {
            return None;
        }

        let bytes = text.as_bytes();

        let mut graph: DiGraph<FunctionNode, ()> = DiGraph::new();
        let mut by_name: HashMap<String, Vec<NodeIndex>> = HashMap::new();

        for def in index.definitions() {
            if def.kind != DefKind::Function {
                continue;
            }
            let node = graph.add_node(FunctionNode { def: def.clone() });
            by_name.entry(def.name.clone()).or_default().push(node);
        }

        // Link each function to the definitions of the names it calls
        let nodes: Vec<NodeIndex> = graph.node_indices().collect();
        for node in nodes {
            let (start, end) = {
                let def = &graph[node].def;
                (def.start_line, def.end_line)
            };
            let called = called_names_in_span(tree.root_node(), bytes, start, end);
            for name in called {
                if let Some(callees) = by_name.get(&name) {
                    for &callee in callees {
                        if callee != node {
                            graph.update_edge(node, callee, ());
                        }
                    }
                }
            }
        }

        Some(Self { graph })
    }

    fn node_for(&self, name: &str, start_line: u32) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .find(|&n| self.graph[n].def.name == name && self.graph[n].def.start_line == start_line)
    }

    /// Callees and callers of every definition matching `function`, as
    /// name lists. Used by the harness call_graph tool.
    pub fn edges_of(&self, function: &str) -> Vec<(&Definition, Vec<String>, Vec<String>)> {
        self.graph
            .node_indices()
            .filter(|&n| self.graph[n].def.name == function)
            .map(|n| {
                let mut callees: Vec<String> = self
                    .graph
                    .neighbors_directed(n, petgraph::Direction::Outgoing)
                    .map(|m| self.graph[m].def.name.clone())
                    .collect();
                callees.sort();
                callees.dedup();
                let mut callers: Vec<String> = self
                    .graph
                    .neighbors_directed(n, petgraph::Direction::Incoming)
                    .map(|m| self.graph[m].def.name.clone())
                    .collect();
                callers.sort();
                callers.dedup();
                (&self.graph[n].def, callees, callers)
            })
            .collect()
    }

    /// Text rendering of `edges_of`, one stanza per matching definition.
    pub fn describe(&self, function: &str) -> String {
        let mut out = String::new();
        for (def, callees, callers) in self.edges_of(function) {
            out.push_str(&format!(
                "{} ({}-{})\n",
                def.name, def.start_line, def.end_line
            ));
            out.push_str(&format!(
                "  calls: {}\n",
                if callees.is_empty() {
                    "(none)".to_string()
                } else {
                    callees.join(", ")
                }
            ));
            out.push_str(&format!(
                "  called by: {}\n",
                if callers.is_empty() {
                    "(none)".to_string()
                } else {
                    callers.join(", ")
                }
            ));
        }
        out
    }

    /// Nodes reachable from the seeds within `max_depth` hops, with their
    /// discovery depth. Seeds themselves are not reported.
    fn reach(&self, seeds: &[NodeIndex], max_depth: usize) -> Vec<(NodeIndex, usize)> {
        let mut depth_of: HashMap<NodeIndex, usize> = seeds.iter().map(|&s| (s, 0)).collect();
        let mut frontier: Vec<NodeIndex> = seeds.to_vec();
        let mut out = Vec::new();

        for depth in 1..=max_depth {
            let mut next = Vec::new();
            for &node in &frontier {
                for callee in self.graph.neighbors(node) {
                    if !depth_of.contains_key(&callee) {
                        depth_of.insert(callee, depth);
                        out.push((callee, depth));
                        next.push(callee);
                    }
                }
            }
            frontier = next;
            if frontier.is_empty() {
                break;
            }
        }

        out
    }
}

/// Called names inside a 1-based line span, language-neutral over the
/// call shapes the two grammars emit.
fn called_names_in_span(root: Node, bytes: &[u8], start_line: u32, end_line: u32) -> Vec<String> {
    let mut names = Vec::new();
    collect_calls(root, bytes, start_line, end_line, &mut names);
    names.sort();
    names.dedup();
    names
}

fn collect_calls(node: Node, bytes: &[u8], start_line: u32, end_line: u32, out: &mut Vec<String>) {
    let node_start = node.start_position().row as u32 + 1;
    let node_end = node.end_position().row as u32 + 1;
    if node_end < start_line || node_start > end_line {
        return;
    }

    if matches!(node.kind(), "call" | "call_expression") {
        if let Some(func) = node.child_by_field_name("function") {
            if let Some(name) = callee_name(func, bytes) {
                out.push(name);
            }
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_calls(child, bytes, start_line, end_line, out);
    }
}

/// The bare name of a call target: `f`, `obj.f`, `Type::f`, `self.f`.
fn callee_name(node: Node, bytes: &[u8]) -> Option<String> {
    match node.kind() {
        "identifier" => node.utf8_text(bytes).ok().map(str::to_string),
        // Python obj.method; the attribute field is the called name
        "attribute" => node
            .child_by_field_name("attribute")
            .and_then(|n| n.utf8_text(bytes).ok())
            .map(str::to_string),
        // Rust obj.method(...)
        "field_expression" => node
            .child_by_field_name("field")
            .and_then(|n| n.utf8_text(bytes).ok())
            .map(str::to_string),
        // Rust Type::assoc(...)
        "scoped_identifier" => node
            .child_by_field_name("name")
            .and_then(|n| n.utf8_text(bytes).ok())
            .map(str::to_string),
        _ => None,
    }
}
