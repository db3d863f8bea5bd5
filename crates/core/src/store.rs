//! In-memory graph store: node map, root list, and the file→nodes bitmap
//! index, all guarded by a single reader-writer lock.
//!
//! Origin-bearing nodes get dense, monotonically assigned internal ids;
//! ids are never reused within a session. The per-file roaring bitmap is
//! what makes `delete_file_nodes` and `shift_origins` proportional to the
//! affected group rather than the whole store.

use roaring::RoaringBitmap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;
use tracing::debug;

use crate::cache::{CachedBytes, ContentResolver, FifoCache, CONTENT_CACHE_CAPACITY};
use crate::error::{Error, Result};
use crate::facade::GraphReader;
use crate::node::{normalize_id, parent_id, Node, NodeContent, SourceOrigin, ROOT_ID};

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

struct StoreInner {
    nodes: HashMap<String, Arc<Node>>,
    /// Sorted top-level identifiers.
    roots: Vec<String>,
    /// Identifier → live dense id, for origin-bearing nodes.
    ids: HashMap<String, u32>,
    /// Dense id → identifier, append-only within a session.
    names: Vec<String>,
    /// Source file path → bitmap of live dense ids.
    file_index: HashMap<PathBuf, RoaringBitmap>,
}

/// The store exclusively owns its nodes. Readers get short-lived shared
/// views (`Arc<Node>`); published nodes are never mutated in place.
pub struct GraphStore {
    inner: RwLock<StoreInner>,
    resolver: Option<Arc<dyn ContentResolver>>,
    content_cache: Mutex<FifoCache<String, CachedBytes>>,
    /// Token → node-id pairs accumulated during ingestion, drained into the
    /// cross-reference index at flush time.
    pending_refs: Mutex<Vec<(String, String)>>,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A store whose lazy content-references resolve through `resolver`.
    pub fn with_resolver(resolver: Arc<dyn ContentResolver>) -> Self {
        Self::build(Some(resolver))
    }

    fn build(resolver: Option<Arc<dyn ContentResolver>>) -> Self {
        GraphStore {
            inner: RwLock::new(StoreInner {
                nodes: HashMap::new(),
                roots: Vec::new(),
                ids: HashMap::new(),
                names: Vec::new(),
                file_index: HashMap::new(),
            }),
            resolver,
            content_cache: Mutex::new(FifoCache::new(CONTENT_CACHE_CAPACITY)),
            pending_refs: Mutex::new(Vec::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    // -- mutators -----------------------------------------------------------

    /// Insert a top-level node. Idempotent by identifier.
    pub fn add_root(&self, node: Node) {
        let mut inner = self.write();
        let id = node.id.clone();
        insert_node(&mut inner, node);
        if let Err(pos) = inner.roots.binary_search(&id) {
            inner.roots.insert(pos, id);
        }
    }

    /// Insert a node. Directory duplicates merge child lists (first writer
    /// wins for everything else); origin-bearing nodes are indexed under
    /// their source file path with a freshly assigned dense id.
    pub fn add_node(&self, node: Node) {
        let mut inner = self.write();
        insert_node(&mut inner, node);
    }

    /// Append `child` to the child list of `parent`, keeping it sorted.
    pub fn add_child(&self, parent: &str, child: &str) -> Result<()> {
        let mut inner = self.write();
        let parent_arc = inner
            .nodes
            .get_mut(normalize_id(parent))
            .ok_or_else(|| Error::NotFound(parent.to_string()))?;
        Arc::make_mut(parent_arc).add_child(child);
        Ok(())
    }

    /// Record a referenced token against a node identifier; drained later
    /// into the cross-reference index.
    pub fn add_ref(&self, token: &str, node_id: &str) {
        let mut pending = self.pending_refs.lock().unwrap_or_else(|e| e.into_inner());
        pending.push((token.to_string(), node_id.to_string()));
    }

    /// Take the accumulated (token, node-id) pairs.
    pub fn drain_refs(&self) -> Vec<(String, String)> {
        let mut pending = self.pending_refs.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *pending)
    }

    /// Remove every node whose origin lies in `file_path`, detaching each
    /// from its parent's child list and from the file index.
    pub fn delete_file_nodes(&self, file_path: &Path) {
        let mut inner = self.write();
        delete_file_nodes_locked(&mut inner, file_path);
    }

    /// Adjust the origin ranges of every node in `file_path` starting at or
    /// after `after_byte` by `delta` (which may be negative).
    pub fn shift_origins(&self, file_path: &Path, after_byte: usize, delta: i64) {
        let mut inner = self.write();
        let Some(bitmap) = inner.file_index.get(file_path) else { return };
        let affected: Vec<String> = bitmap
            .iter()
            .filter_map(|dense| inner.names.get(dense as usize).cloned())
            .collect();
        for id in affected {
            let Some(node_arc) = inner.nodes.get_mut(&id) else { continue };
            let needs_shift = node_arc
                .origin
                .as_ref()
                .is_some_and(|o| o.start >= after_byte);
            if !needs_shift {
                continue;
            }
            let node = Arc::make_mut(node_arc);
            if let Some(origin) = node.origin.as_mut() {
                origin.start = (origin.start as i64 + delta) as usize;
                origin.end = (origin.end as i64 + delta) as usize;
            }
        }
    }

    /// Atomically replace the node group of `file_path`: the old group is
    /// deleted and the new nodes inserted under one write lock, so readers
    /// see either the old group or the new group, never a mix.
    pub fn replace_file_nodes(&self, file_path: &Path, new_nodes: Vec<Node>) {
        let mut inner = self.write();
        delete_file_nodes_locked(&mut inner, file_path);
        let count = new_nodes.len();
        for node in new_nodes {
            insert_node(&mut inner, node);
        }
        debug!(file = %file_path.display(), nodes = count, "replaced file node group");
    }

    /// Remove one node, detaching it from its parent's child list (or the
    /// root list) and from the file index.
    pub fn remove_node(&self, id: &str) -> Result<()> {
        let mut inner = self.write();
        let id = normalize_id(id).to_string();
        if !inner.nodes.contains_key(&id) {
            return Err(Error::NotFound(id));
        }
        unindex(&mut inner, &id);
        inner.nodes.remove(&id);
        match parent_id(&id) {
            Some(p) => {
                if let Some(parent) = inner.nodes.get_mut(p) {
                    Arc::make_mut(parent).children.retain(|c| c != &id);
                }
            }
            None => inner.roots.retain(|r| r != &id),
        }
        Ok(())
    }

    /// Stash bytes rejected by write-back validation on the node.
    pub fn stash_draft(&self, id: &str, bytes: Vec<u8>) -> Result<()> {
        let mut inner = self.write();
        let node_arc = inner
            .nodes
            .get_mut(normalize_id(id))
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        Arc::make_mut(node_arc).draft = Some(bytes);
        Ok(())
    }

    /// Install the committed content of a write-back: new inline bytes, the
    /// post-splice origin, a fresh modification time, and no draft.
    pub fn apply_write(&self, id: &str, bytes: Vec<u8>, origin: SourceOrigin) -> Result<()> {
        let mut inner = self.write();
        let node_arc = inner
            .nodes
            .get_mut(normalize_id(id))
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let node = Arc::make_mut(node_arc);
        node.content = NodeContent::Inline(bytes);
        node.origin = Some(origin);
        node.mtime = SystemTime::now();
        node.draft = None;
        Ok(())
    }

    // -- introspection ------------------------------------------------------

    pub fn node_count(&self) -> usize {
        self.read().nodes.len()
    }

    /// Dense internal id of an origin-bearing node, if assigned.
    pub fn dense_id(&self, id: &str) -> Option<u32> {
        self.read().ids.get(normalize_id(id)).copied()
    }

    /// Identifiers currently indexed under a source file path.
    pub fn file_nodes(&self, file_path: &Path) -> Vec<String> {
        let inner = self.read();
        let Some(bitmap) = inner.file_index.get(file_path) else { return Vec::new() };
        let mut out: Vec<String> = bitmap
            .iter()
            .filter_map(|dense| inner.names.get(dense as usize).cloned())
            .collect();
        out.sort();
        out
    }
}

// ---------------------------------------------------------------------------
// Lock-held helpers
// ---------------------------------------------------------------------------

fn insert_node(inner: &mut StoreInner, mut node: Node) {
    let id = node.id.clone();

    let existing_dir = inner.nodes.get(&id).is_some_and(|n| n.is_dir());
    if existing_dir && node.is_dir() {
        // First writer wins; later duplicates only merge children.
        let merged = Arc::make_mut(inner.nodes.get_mut(&id).expect("checked above"));
        for child in std::mem::take(&mut node.children) {
            merged.add_child(&child);
        }
        return;
    }
    if inner.nodes.contains_key(&id) {
        // Replacing an origin-bearing node retires its old dense id.
        unindex(inner, &id);
    }

    if let Some(origin) = &node.origin {
        let dense = inner.names.len() as u32;
        inner.names.push(id.clone());
        inner.ids.insert(id.clone(), dense);
        inner.file_index.entry(origin.file_path.clone()).or_default().insert(dense);
    }
    node.children.sort();
    node.children.dedup();
    inner.nodes.insert(id, Arc::new(node));
}

fn unindex(inner: &mut StoreInner, id: &str) {
    let Some(dense) = inner.ids.remove(id) else { return };
    let Some(node) = inner.nodes.get(id) else { return };
    if let Some(origin) = &node.origin {
        if let Some(bitmap) = inner.file_index.get_mut(&origin.file_path) {
            bitmap.remove(dense);
            if bitmap.is_empty() {
                inner.file_index.remove(&origin.file_path);
            }
        }
    }
}

fn delete_file_nodes_locked(inner: &mut StoreInner, file_path: &Path) {
    let Some(bitmap) = inner.file_index.remove(file_path) else { return };
    let removed: Vec<String> = bitmap
        .iter()
        .filter_map(|dense| inner.names.get(dense as usize).cloned())
        .collect();
    for id in &removed {
        inner.nodes.remove(id);
        inner.ids.remove(id);
        match parent_id(id) {
            Some(p) => {
                if let Some(parent) = inner.nodes.get_mut(p) {
                    Arc::make_mut(parent).children.retain(|c| c != id);
                }
            }
            None => inner.roots.retain(|r| r != id),
        }
    }
    debug!(file = %file_path.display(), nodes = removed.len(), "deleted file node group");
}

fn copy_range(bytes: &[u8], buf: &mut [u8], offset: u64) -> usize {
    let offset = offset as usize;
    if offset >= bytes.len() {
        return 0;
    }
    let n = (bytes.len() - offset).min(buf.len());
    buf[..n].copy_from_slice(&bytes[offset..offset + n]);
    n
}

// ---------------------------------------------------------------------------
// Read interface
// ---------------------------------------------------------------------------

impl GraphReader for GraphStore {
    fn get_node(&self, id: &str) -> Result<Arc<Node>> {
        let id = normalize_id(id);
        self.read().nodes.get(id).cloned().ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn list_children(&self, id: &str) -> Result<Vec<String>> {
        let id = normalize_id(id);
        let inner = self.read();
        if id == ROOT_ID {
            return Ok(inner.roots.clone());
        }
        inner
            .nodes
            .get(id)
            .map(|n| n.children.clone())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn read_content(&self, id: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
        let id = normalize_id(id);
        // The node view is taken under the shared lock; the lock is released
        // before the resolver runs.
        let node = self.get_node(id)?;
        match &node.content {
            NodeContent::Inline(bytes) => Ok(copy_range(bytes, buf, offset)),
            NodeContent::Empty => Ok(0),
            NodeContent::Lazy(cref) => {
                {
                    let cache = self.content_cache.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some(bytes) = cache.get(&id.to_string()) {
                        return Ok(copy_range(bytes, buf, offset));
                    }
                }
                let resolver = self.resolver.as_ref().ok_or_else(|| {
                    Error::ResolverFailure(format!("no resolver configured for `{id}`"))
                })?;
                let bytes: CachedBytes = Arc::new(resolver.resolve(cref)?);
                {
                    let mut cache = self.content_cache.lock().unwrap_or_else(|e| e.into_inner());
                    cache.insert(id.to_string(), bytes.clone());
                }
                if cref.rendered_len != bytes.len() as u64 {
                    let mut inner = self.write();
                    if let Some(node_arc) = inner.nodes.get_mut(id) {
                        if let NodeContent::Lazy(c) = &mut Arc::make_mut(node_arc).content {
                            c.rendered_len = bytes.len() as u64;
                        }
                    }
                }
                Ok(copy_range(&bytes, buf, offset))
            }
        }
    }

    fn invalidate(&self, id: &str) {
        let mut cache = self.content_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.remove(&normalize_id(id).to_string());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ContentRef;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn origin_file(id: &str, path: &str, start: usize, end: usize) -> Node {
        Node::file(id, NodeContent::Inline(vec![b'x'; end - start]))
            .with_origin(SourceOrigin::new(path, start, end))
    }

    #[test]
    fn test_get_node_normalizes() {
        let store = GraphStore::new();
        store.add_root(Node::dir("a"));
        assert_eq!(store.get_node("/a").unwrap().id, "a");
        assert!(store.get_node("/missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_roots_sorted_idempotent() {
        let store = GraphStore::new();
        store.add_root(Node::dir("zeta"));
        store.add_root(Node::dir("alpha"));
        store.add_root(Node::dir("zeta"));
        assert_eq!(store.list_children(ROOT_ID).unwrap(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_dir_merge_first_writer_wins() {
        let store = GraphStore::new();
        let mut first = Node::dir("pkg").with_property("lang", &b"go"[..]);
        first.add_child("pkg/a");
        store.add_node(first);

        let mut second = Node::dir("pkg").with_property("lang", &b"python"[..]);
        second.add_child("pkg/b");
        store.add_node(second);

        let merged = store.get_node("pkg").unwrap();
        assert_eq!(merged.children, vec!["pkg/a", "pkg/b"]);
        assert_eq!(merged.properties.get("lang").unwrap(), b"go");
    }

    #[test]
    fn test_dense_ids_monotonic_never_reused() {
        let store = GraphStore::new();
        store.add_node(origin_file("a/source", "/src/a.go", 0, 10));
        let first = store.dense_id("a/source").unwrap();
        store.delete_file_nodes(Path::new("/src/a.go"));
        assert!(store.dense_id("a/source").is_none());
        store.add_node(origin_file("a/source", "/src/a.go", 0, 10));
        let second = store.dense_id("a/source").unwrap();
        assert!(second > first, "ids must never be reused within a session");
    }

    #[test]
    fn test_file_index_coverage() {
        let store = GraphStore::new();
        store.add_node(origin_file("a/f/source", "/src/a.go", 0, 10));
        store.add_node(origin_file("a/g/source", "/src/a.go", 10, 20));
        store.add_node(origin_file("b/h/source", "/src/b.go", 0, 5));
        assert_eq!(store.file_nodes(Path::new("/src/a.go")), vec!["a/f/source", "a/g/source"]);
        assert_eq!(store.file_nodes(Path::new("/src/b.go")), vec!["b/h/source"]);
    }

    #[test]
    fn test_delete_file_nodes_detaches_parents() {
        let store = GraphStore::new();
        let mut dir = Node::dir("a");
        dir.add_child("a/source");
        dir.add_child("a/other");
        store.add_root(dir);
        store.add_node(origin_file("a/source", "/src/a.go", 0, 10));
        store.add_node(Node::file("a/other", NodeContent::Empty));

        store.delete_file_nodes(Path::new("/src/a.go"));
        assert!(store.get_node("a/source").unwrap_err().is_not_found());
        assert_eq!(store.get_node("a").unwrap().children, vec!["a/other"]);
        assert!(store.file_nodes(Path::new("/src/a.go")).is_empty());
    }

    #[test]
    fn test_shift_origins() {
        let store = GraphStore::new();
        store.add_node(origin_file("a/f/source", "/src/a.go", 0, 40));
        store.add_node(origin_file("a/g/source", "/src/a.go", 40, 80));
        store.shift_origins(Path::new("/src/a.go"), 40, 10);

        let f = store.get_node("a/f/source").unwrap();
        assert_eq!(f.origin.as_ref().unwrap().start, 0);
        assert_eq!(f.origin.as_ref().unwrap().end, 40);

        let g = store.get_node("a/g/source").unwrap();
        assert_eq!(g.origin.as_ref().unwrap().start, 50);
        assert_eq!(g.origin.as_ref().unwrap().end, 90);
    }

    #[test]
    fn test_shift_origins_negative_delta() {
        let store = GraphStore::new();
        store.add_node(origin_file("a/g/source", "/src/a.go", 40, 80));
        store.shift_origins(Path::new("/src/a.go"), 0, -15);
        let g = store.get_node("a/g/source").unwrap();
        assert_eq!(g.origin.as_ref().unwrap().start, 25);
        assert_eq!(g.origin.as_ref().unwrap().end, 65);
    }

    #[test]
    fn test_replace_file_nodes_atomic_group_swap() {
        let store = GraphStore::new();
        store.add_node(origin_file("a/n1", "/src/a.go", 0, 10));
        store.add_node(origin_file("a/n2", "/src/a.go", 10, 20));
        store.add_node(origin_file("a/n3", "/src/a.go", 20, 30));

        store.replace_file_nodes(
            Path::new("/src/a.go"),
            vec![origin_file("a/n1", "/src/a.go", 0, 12), origin_file("a/n4", "/src/a.go", 12, 25)],
        );

        assert!(store.get_node("a/n2").unwrap_err().is_not_found());
        assert!(store.get_node("a/n3").unwrap_err().is_not_found());
        assert!(store.get_node("a/n1").is_ok());
        assert!(store.get_node("a/n4").is_ok());
        assert_eq!(store.file_nodes(Path::new("/src/a.go")), vec!["a/n1", "a/n4"]);
    }

    #[test]
    fn test_read_content_inline_offsets() {
        let store = GraphStore::new();
        store.add_node(Node::file("f", NodeContent::Inline(b"hello world".to_vec())));
        let mut buf = [0u8; 5];
        assert_eq!(store.read_content("f", &mut buf, 0).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(store.read_content("f", &mut buf, 6).unwrap(), 5);
        assert_eq!(&buf, b"world");
        assert_eq!(store.read_content("f", &mut buf, 11).unwrap(), 0);
        assert_eq!(store.read_content("f", &mut buf, 99).unwrap(), 0);
    }

    #[test]
    fn test_read_content_lazy_resolves_and_caches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let resolver = move |cref: &ContentRef| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(format!("rendered:{}", cref.key).into_bytes())
        };
        let store = GraphStore::with_resolver(Arc::new(resolver));
        store.add_node(Node::file(
            "f",
            NodeContent::Lazy(ContentRef {
                table: "results".into(),
                key: "A".into(),
                template: "{{x}}".into(),
                rendered_len: 0,
            }),
        ));

        let mut buf = [0u8; 64];
        let n = store.read_content("f", &mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"rendered:A");
        store.read_content("f", &mut buf, 0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1, "second read must hit the cache");

        // First resolution back-fills the rendered length.
        assert_eq!(store.get_node("f").unwrap().size(), 10);

        // Invalidation forces a re-render.
        store.invalidate("f");
        store.read_content("f", &mut buf, 0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_read_content_lazy_without_resolver_fails() {
        let store = GraphStore::new();
        store.add_node(Node::file(
            "f",
            NodeContent::Lazy(ContentRef {
                table: "t".into(),
                key: "k".into(),
                template: String::new(),
                rendered_len: 1,
            }),
        ));
        let mut buf = [0u8; 4];
        assert!(matches!(
            store.read_content("f", &mut buf, 0),
            Err(Error::ResolverFailure(_))
        ));
    }

    #[test]
    fn test_pending_refs_drain() {
        let store = GraphStore::new();
        store.add_ref("Println", "pkg/main/source");
        store.add_ref("Sprintf", "pkg/main/source");
        let refs = store.drain_refs();
        assert_eq!(refs.len(), 2);
        assert!(store.drain_refs().is_empty());
    }
}
