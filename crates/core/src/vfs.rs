//! Virtual file surface over a projection: the serialized topology at
//! `_schema.json`, per-directory `context` files, and the `_diagnostics/`
//! directory reporting write-back status.
//!
//! [`ProjectionView`] stitches the graph store, any table projections, and
//! these synthetic files into one read interface; the hot-swap facade wraps
//! a `ProjectionView`.

use dashmap::DashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::facade::GraphReader;
use crate::node::{base_name, normalize_id, parent_id, Node, NodeContent, ROOT_ID};
use crate::schema::Topology;
use crate::store::GraphStore;
use crate::tablescan::TableProjection;

/// Name of the serialized-topology file at the projection root.
pub const SCHEMA_FILE: &str = "_schema.json";

/// Per-directory file exposing the node's context property.
pub const CONTEXT_FILE: &str = "context";

/// Node property holding the per-file context blob.
pub const CONTEXT_PROPERTY: &str = "context";

/// Node property naming the source language.
pub const LANG_PROPERTY: &str = "lang";

/// Node property naming the declared package.
pub const PACKAGE_PROPERTY: &str = "package";

/// Fallback grouping directory for unparseable or mismatched files.
pub const FALLBACK_DIR: &str = "_project_files";

/// Virtual diagnostics directory under writable directories.
pub const DIAG_DIR: &str = "_diagnostics";

pub const KEY_WRITE_STATUS: &str = "last-write-status";
pub const KEY_AST_ERRORS: &str = "ast-errors";

const WRITE_STATUS_DEFAULT: &str = "no writes yet";
const AST_ERRORS_DEFAULT: &str = "none";

// ---------------------------------------------------------------------------
// Diagnostics store
// ---------------------------------------------------------------------------

/// Last diagnostic line per (directory, key); written by the write-back
/// pipeline and served through `_diagnostics/` files.
#[derive(Default)]
pub struct DiagnosticStore {
    entries: DashMap<(String, String), String>,
}

impl DiagnosticStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, dir: &str, key: &str, line: impl Into<String>) {
        self.entries.insert((dir.to_string(), key.to_string()), line.into());
    }

    pub fn get(&self, dir: &str, key: &str) -> Option<String> {
        self.entries.get(&(dir.to_string(), key.to_string())).map(|e| e.value().clone())
    }

    /// The stored line, or the key's placeholder default.
    pub fn line_or_default(&self, dir: &str, key: &str) -> String {
        self.get(dir, key).unwrap_or_else(|| {
            match key {
                KEY_WRITE_STATUS => WRITE_STATUS_DEFAULT,
                _ => AST_ERRORS_DEFAULT,
            }
            .to_string()
        })
    }
}

// ---------------------------------------------------------------------------
// Projection view
// ---------------------------------------------------------------------------

/// Combined read view: source-tree store, table projections, and the
/// virtual file surface.
pub struct ProjectionView {
    store: Arc<GraphStore>,
    tables: Vec<Arc<TableProjection>>,
    diags: Arc<DiagnosticStore>,
    schema_json: Vec<u8>,
}

impl ProjectionView {
    pub fn new(
        store: Arc<GraphStore>,
        tables: Vec<Arc<TableProjection>>,
        diags: Arc<DiagnosticStore>,
        topology: &Topology,
    ) -> Result<Self> {
        Ok(ProjectionView {
            store,
            tables,
            diags,
            schema_json: topology.to_pretty_json()?.into_bytes(),
        })
    }

    pub fn diagnostics(&self) -> Arc<DiagnosticStore> {
        self.diags.clone()
    }

    fn table_for(&self, id: &str) -> Option<&Arc<TableProjection>> {
        let first = id.split('/').next().unwrap_or(id);
        self.tables.iter().find(|t| t.root_name() == first)
    }

    /// Classify a path into the virtual surface, if it belongs there.
    fn virtual_node(&self, id: &str) -> Option<Result<Arc<Node>>> {
        if id == SCHEMA_FILE {
            return Some(Ok(Arc::new(Node::file(
                SCHEMA_FILE,
                NodeContent::Inline(self.schema_json.clone()),
            ))));
        }

        // <dir>/_diagnostics and <dir>/_diagnostics/<key>
        if base_name(id) == DIAG_DIR {
            let dir = parent_id(id).unwrap_or(ROOT_ID);
            if self.store.get_node(dir).is_err() {
                return Some(Err(Error::NotFound(id.to_string())));
            }
            let mut node = Node::dir(id);
            node.add_child(&format!("{id}/{KEY_WRITE_STATUS}"));
            node.add_child(&format!("{id}/{KEY_AST_ERRORS}"));
            return Some(Ok(Arc::new(node)));
        }
        if let Some(parent) = parent_id(id) {
            if base_name(parent) == DIAG_DIR {
                let key = base_name(id);
                if key != KEY_WRITE_STATUS && key != KEY_AST_ERRORS {
                    return Some(Err(Error::NotFound(id.to_string())));
                }
                let dir = parent_id(parent).unwrap_or(ROOT_ID);
                let mut line = self.diags.line_or_default(dir, key);
                line.push('\n');
                return Some(Ok(Arc::new(Node::file(id, NodeContent::Inline(line.into_bytes())))));
            }
        }

        // <dir>/context when the directory node carries a context blob.
        if base_name(id) == CONTEXT_FILE {
            if let Some(dir) = parent_id(id) {
                if let Ok(dir_node) = self.store.get_node(dir) {
                    if let Some(blob) = dir_node.properties.get(CONTEXT_PROPERTY) {
                        if !blob.is_empty()
                            && !dir_node.children.iter().any(|c| c == id)
                        {
                            return Some(Ok(Arc::new(Node::file(
                                id,
                                NodeContent::Inline(blob.clone()),
                            ))));
                        }
                    }
                }
            }
        }
        None
    }

    /// True when the directory holds at least one origin-backed file.
    fn is_writable_dir(&self, node: &Node) -> bool {
        node.is_dir()
            && node.children.iter().any(|c| {
                self.store.get_node(c).is_ok_and(|n| !n.is_dir() && n.origin.is_some())
            })
    }

    fn decorate_children(&self, id: &str, node: &Node, mut children: Vec<String>) -> Vec<String> {
        if let Some(blob) = node.properties.get(CONTEXT_PROPERTY) {
            if !blob.is_empty() {
                let ctx = format!("{id}/{CONTEXT_FILE}");
                if !children.contains(&ctx) {
                    children.push(ctx);
                }
            }
        }
        if self.is_writable_dir(node) {
            children.push(format!("{id}/{DIAG_DIR}"));
        }
        children.sort();
        children.dedup();
        children
    }
}

impl GraphReader for ProjectionView {
    fn get_node(&self, id: &str) -> Result<Arc<Node>> {
        let id = normalize_id(id);
        if id == ROOT_ID {
            let mut root = Node::dir(ROOT_ID);
            root.children = self.list_children(ROOT_ID)?;
            return Ok(Arc::new(root));
        }
        if let Some(virt) = self.virtual_node(id) {
            return virt;
        }
        if let Some(table) = self.table_for(id) {
            return table.get_node(id);
        }
        self.store.get_node(id)
    }

    fn list_children(&self, id: &str) -> Result<Vec<String>> {
        let id = normalize_id(id);
        if id == ROOT_ID {
            let mut roots = self.store.list_children(ROOT_ID)?;
            roots.extend(self.tables.iter().map(|t| t.root_name().to_string()));
            roots.push(SCHEMA_FILE.to_string());
            roots.sort();
            roots.dedup();
            return Ok(roots);
        }
        if let Some(virt) = self.virtual_node(id) {
            return virt.map(|n| n.children.clone());
        }
        if let Some(table) = self.table_for(id) {
            return table.list_children(id);
        }
        let node = self.store.get_node(id)?;
        Ok(self.decorate_children(id, &node, node.children.clone()))
    }

    fn read_content(&self, id: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
        let id = normalize_id(id);
        if let Some(virt) = self.virtual_node(id) {
            let node = virt?;
            let bytes = match &node.content {
                NodeContent::Inline(b) => b,
                _ => return Ok(0),
            };
            let offset = offset as usize;
            if offset >= bytes.len() {
                return Ok(0);
            }
            let n = (bytes.len() - offset).min(buf.len());
            buf[..n].copy_from_slice(&bytes[offset..offset + n]);
            return Ok(n);
        }
        if let Some(table) = self.table_for(id) {
            return table.read_content(id, buf, offset);
        }
        self.store.read_content(id, buf, offset)
    }

    fn invalidate(&self, id: &str) {
        self.store.invalidate(id);
        if let Some(table) = self.table_for(id) {
            table.invalidate(id);
        }
    }

    fn close(&self) {
        for table in &self.tables {
            table.close();
        }
        self.store.close();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::read_to_vec;
    use crate::node::SourceOrigin;

    fn view_with_store(store: Arc<GraphStore>) -> ProjectionView {
        let topology = Topology::from_json(r#"{"nodes": []}"#).unwrap();
        ProjectionView::new(store, Vec::new(), Arc::new(DiagnosticStore::new()), &topology)
            .unwrap()
    }

    #[test]
    fn test_schema_json_served_at_root() {
        let view = view_with_store(Arc::new(GraphStore::new()));
        let roots = view.list_children("").unwrap();
        assert!(roots.contains(&SCHEMA_FILE.to_string()));
        let bytes = read_to_vec(&view, SCHEMA_FILE).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.ends_with('\n'));
        assert!(text.contains("\"version\""));
    }

    #[test]
    fn test_context_file_from_property() {
        let store = Arc::new(GraphStore::new());
        store.add_root(Node::dir("pkg").with_property(CONTEXT_PROPERTY, &b"import \"fmt\""[..]));
        let view = view_with_store(store);

        let children = view.list_children("pkg").unwrap();
        assert!(children.contains(&"pkg/context".to_string()));
        assert_eq!(read_to_vec(&view, "pkg/context").unwrap(), b"import \"fmt\"");
    }

    #[test]
    fn test_context_absent_without_property() {
        let store = Arc::new(GraphStore::new());
        store.add_root(Node::dir("pkg"));
        let view = view_with_store(store);
        assert!(!view.list_children("pkg").unwrap().contains(&"pkg/context".to_string()));
    }

    #[test]
    fn test_diagnostics_defaults_and_updates() {
        let store = Arc::new(GraphStore::new());
        let mut dir = Node::dir("a/functions/F");
        dir.add_child("a/functions/F/source");
        store.add_node(Node::dir("a"));
        store.add_node(dir);
        store.add_node(
            Node::file("a/functions/F/source", NodeContent::Inline(b"func F() {}".to_vec()))
                .with_origin(SourceOrigin::new("/src/a.go", 0, 11)),
        );
        let diags = Arc::new(DiagnosticStore::new());
        let topology = Topology::from_json(r#"{"nodes": []}"#).unwrap();
        let view =
            ProjectionView::new(store, Vec::new(), diags.clone(), &topology).unwrap();

        // Writable dir lists _diagnostics.
        let children = view.list_children("a/functions/F").unwrap();
        assert!(children.contains(&"a/functions/F/_diagnostics".to_string()));

        let status_path = "a/functions/F/_diagnostics/last-write-status";
        assert_eq!(read_to_vec(&view, status_path).unwrap(), b"no writes yet\n");

        diags.set("a/functions/F", KEY_WRITE_STATUS, "syntax error at line 1, column 20: oops");
        let line = read_to_vec(&view, status_path).unwrap();
        assert!(line.starts_with(b"syntax error"));

        let errors_path = "a/functions/F/_diagnostics/ast-errors";
        assert_eq!(read_to_vec(&view, errors_path).unwrap(), b"none\n");
    }

    #[test]
    fn test_diagnostics_unknown_key_not_found() {
        let store = Arc::new(GraphStore::new());
        store.add_root(Node::dir("a"));
        let view = view_with_store(store);
        assert!(view
            .get_node("a/_diagnostics/other")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_children_stay_sorted_with_virtual_entries() {
        let store = Arc::new(GraphStore::new());
        let mut dir = Node::dir("zz").with_property(CONTEXT_PROPERTY, &b"ctx"[..]);
        dir.add_child("zz/alpha");
        dir.add_child("zz/zeta");
        store.add_root(dir);
        store.add_node(Node::dir("zz/alpha"));
        store.add_node(Node::dir("zz/zeta"));
        let view = view_with_store(store);
        let children = view.list_children("zz").unwrap();
        let mut sorted = children.clone();
        sorted.sort();
        assert_eq!(children, sorted);
    }
}
