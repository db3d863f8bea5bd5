//! Topology parsing, compilation, and path walking.
//!
//! The topology is a declarative JSON tree mapping records or AST matches to
//! directory paths. It is compiled once at open into [`Level`] records; path
//! resolution walks segments down to a level (directory) or a (level, leaf)
//! pair (file).

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::template;

// ---------------------------------------------------------------------------
// Topology document
// ---------------------------------------------------------------------------

fn default_version() -> String {
    "v1".to_string()
}

/// Default name of the records table.
pub fn default_table() -> String {
    "results".to_string()
}

/// A file-producing schema entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeafDef {
    pub name: String,
    #[serde(default)]
    pub content_template: String,
}

/// One directory level of the topology.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaNode {
    pub name: String,
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub children: Vec<SchemaNode>,
    #[serde(default)]
    pub files: Vec<LeafDef>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_self_match: bool,
}

/// Top-level topology document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topology {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default)]
    pub nodes: Vec<SchemaNode>,
}

impl Topology {
    pub fn from_json(text: &str) -> Result<Self> {
        let topo: Topology = serde_json::from_str(text)
            .map_err(|e| Error::Topology(format!("invalid topology document: {e}")))?;
        Ok(topo)
    }

    /// Serialized form served as `_schema.json`: indent 2, trailing newline.
    pub fn to_pretty_json(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Compiled levels
// ---------------------------------------------------------------------------

/// Compiled form of a [`SchemaNode`].
#[derive(Debug, Clone)]
pub struct Level {
    /// Raw name template.
    pub name_template: String,
    /// JSON-path or AST-query selector; empty for pure grouping levels.
    pub selector: String,
    pub files: Vec<LeafDef>,
    pub children: Vec<Level>,
    pub depth: usize,
    /// Static iff the name template contains no template delimiters.
    pub is_static: bool,
    pub skip_self_match: bool,
}

impl Level {
    /// The single templated child shape of this level, if any.
    pub fn dynamic_child(&self) -> Option<&Level> {
        self.children.iter().find(|c| !c.is_static)
    }

    pub fn static_child(&self, name: &str) -> Option<&Level> {
        self.children.iter().find(|c| c.is_static && c.name_template == name)
    }

    pub fn file_def(&self, name: &str) -> Option<&LeafDef> {
        self.files.iter().find(|f| f.name == name)
    }

    /// True when this level's selector is an AST query rather than a path
    /// query: the syntactic form starts with `(`.
    pub fn is_ast_selector(&self) -> bool {
        self.selector.trim_start().starts_with('(')
    }
}

/// Compiled topology: table name plus compiled root levels.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    pub version: String,
    pub table: String,
    pub roots: Vec<Level>,
}

fn compile_node(node: &SchemaNode, depth: usize) -> Result<Level> {
    let children: Vec<Level> =
        node.children.iter().map(|c| compile_node(c, depth + 1)).collect::<Result<_>>()?;

    let dynamic = children.iter().filter(|c| !c.is_static).count();
    if dynamic > 1 {
        return Err(Error::Topology(format!(
            "level `{}` has {dynamic} templated child shapes; at most one is supported",
            node.name
        )));
    }

    Ok(Level {
        name_template: node.name.clone(),
        selector: node.selector.clone(),
        files: node.files.clone(),
        children,
        depth,
        is_static: template::is_static(&node.name),
        skip_self_match: node.skip_self_match,
    })
}

/// Compile the topology tree. Static-named roots are table scan roots,
/// addressable by their literal name; dynamic roots belong to source-tree
/// ingestion and render one directory per ingested file or match.
pub fn compile(topology: &Topology) -> Result<CompiledSchema> {
    let roots: Vec<Level> =
        topology.nodes.iter().map(|n| compile_node(n, 0)).collect::<Result<_>>()?;
    Ok(CompiledSchema { version: topology.version.clone(), table: topology.table.clone(), roots })
}

impl CompiledSchema {
    /// Roots materialized by the streaming table scan.
    pub fn scan_roots(&self) -> impl Iterator<Item = &Level> {
        self.roots.iter().filter(|r| r.is_static)
    }
}

// ---------------------------------------------------------------------------
// Path walking
// ---------------------------------------------------------------------------

/// Result of resolving a path against the schema.
#[derive(Debug)]
pub enum WalkTarget<'a> {
    Dir(&'a Level),
    File(&'a Level, &'a LeafDef),
}

/// Walk a slash path to its schema target. The first segment must match a
/// static root; each later segment either matches a static file name at the
/// current level, matches a static child level, or descends into the single
/// templated child shape.
pub fn walk_path<'a>(schema: &'a CompiledSchema, path: &str) -> Result<WalkTarget<'a>> {
    let path = crate::node::normalize_id(path);
    let mut segments = path.split('/').filter(|s| !s.is_empty());

    let root_name = segments
        .next()
        .ok_or_else(|| Error::NotFound("empty path has no schema target".to_string()))?;
    let mut level = schema
        .roots
        .iter()
        .find(|r| r.name_template == root_name)
        .ok_or_else(|| Error::NotFound(format!("no schema root `{root_name}`")))?;

    for seg in segments {
        if let Some(leaf) = level.file_def(seg) {
            return Ok(WalkTarget::File(level, leaf));
        }
        if let Some(child) = level.static_child(seg) {
            level = child;
            continue;
        }
        match level.dynamic_child() {
            Some(child) => level = child,
            None => {
                return Err(Error::NotFound(format!("path `{path}` walks past schema leaf")))
            }
        }
    }
    Ok(WalkTarget::Dir(level))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn cve_topology() -> Topology {
        Topology::from_json(
            r#"{
                "version": "v1",
                "table": "results",
                "nodes": [{
                    "name": "by-cve",
                    "children": [{
                        "name": "{{slice(item.cve.published, 0, 4)}}",
                        "children": [{
                            "name": "{{slice(item.cve.published, 5, 7)}}",
                            "children": [{
                                "name": "{{item.cve.id}}",
                                "files": [{
                                    "name": "description",
                                    "content_template": "{{first(item.cve.descriptions).value}}"
                                }]
                            }]
                        }]
                    }]
                }]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let topo = Topology::from_json(r#"{"nodes": []}"#).unwrap();
        assert_eq!(topo.version, "v1");
        assert_eq!(topo.table, "results");
    }

    #[test]
    fn test_compile_flags_and_depth() {
        let schema = compile(&cve_topology()).unwrap();
        assert_eq!(schema.roots.len(), 1);
        let root = &schema.roots[0];
        assert!(root.is_static);
        assert_eq!(root.depth, 0);
        let year = root.dynamic_child().unwrap();
        assert!(!year.is_static);
        assert_eq!(year.depth, 1);
        let month = year.dynamic_child().unwrap();
        let cve = month.dynamic_child().unwrap();
        assert_eq!(cve.depth, 3);
        assert_eq!(cve.files.len(), 1);
    }

    #[test]
    fn test_dynamic_roots_are_not_scan_roots() {
        let topo =
            Topology::from_json(r#"{"nodes": [{"name": "{{file.stem}}"}, {"name": "by-cve"}]}"#)
                .unwrap();
        let schema = compile(&topo).unwrap();
        let scan: Vec<&str> = schema.scan_roots().map(|r| r.name_template.as_str()).collect();
        assert_eq!(scan, vec!["by-cve"]);
    }

    #[test]
    fn test_two_templated_children_rejected() {
        let topo = Topology::from_json(
            r#"{"nodes": [{"name": "r", "children": [{"name": "{{a}}"}, {"name": "{{b}}"}]}]}"#,
        )
        .unwrap();
        assert!(matches!(compile(&topo), Err(Error::Topology(_))));
    }

    #[test]
    fn test_walk_to_dir_and_file() {
        let schema = compile(&cve_topology()).unwrap();
        match walk_path(&schema, "by-cve/2024/01/CVE-2024-0001").unwrap() {
            WalkTarget::Dir(level) => assert_eq!(level.depth, 3),
            other => panic!("expected dir, got {other:?}"),
        }
        match walk_path(&schema, "by-cve/2024/01/CVE-2024-0001/description").unwrap() {
            WalkTarget::File(level, leaf) => {
                assert_eq!(level.depth, 3);
                assert_eq!(leaf.name, "description");
            }
            other => panic!("expected file, got {other:?}"),
        }
    }

    #[test]
    fn test_walk_accepts_leading_slash() {
        let schema = compile(&cve_topology()).unwrap();
        assert!(walk_path(&schema, "/by-cve/2024").is_ok());
    }

    #[test]
    fn test_walk_unknown_root() {
        let schema = compile(&cve_topology()).unwrap();
        assert!(walk_path(&schema, "nope/2024").unwrap_err().is_not_found());
    }

    #[test]
    fn test_walk_static_child_levels() {
        let topo = Topology::from_json(
            r#"{"nodes": [{
                "name": "{{file.stem}}",
                "selector": "(source_file) @scope",
                "children": [
                    {"name": "functions", "children": [{
                        "name": "{{name}}",
                        "selector": "(function_declaration name: (identifier) @name) @scope",
                        "files": [{"name": "source"}]
                    }]}
                ]
            }]}"#,
        )
        .unwrap();
        let level = compile_node(&topo.nodes[0].children[0], 0).unwrap();
        assert!(level.is_static);
        assert_eq!(level.dynamic_child().unwrap().files[0].name, "source");
        assert!(level.dynamic_child().unwrap().is_ast_selector());
    }

    #[test]
    fn test_pretty_json_trailing_newline() {
        let out = cve_topology().to_pretty_json().unwrap();
        assert!(out.ends_with('\n'));
        assert!(out.contains("\"by-cve\""));
    }
}
