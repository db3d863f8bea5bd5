//! Streaming table-scan projection: materialize a directory tree from a
//! table of JSON records without copying bulk data.
//!
//! The table is read exactly once, on first reference to the schema root.
//! Field-set analysis projects only the fields the name templates need via
//! `json_extract`, so per-row parse cost is independent of record size.
//! Children are published as sorted, deduplicated slices every `SCAN_BATCH`
//! rows; file content renders lazily on demand.

use dashmap::DashMap;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::cache::{CachedBytes, FifoCache, RENDER_CACHE_CAPACITY};
use crate::error::{Error, Result};
use crate::facade::GraphReader;
use crate::node::{normalize_id, parent_id, ContentRef, Node, NodeContent};
use crate::schema::{CompiledSchema, Level, WalkTarget};
use crate::template::TemplateEngine;

/// Rows accumulated between child-slice publications.
pub const SCAN_BATCH: usize = 50_000;

/// Read-only connections kept for point lookups.
const POOL_CAPACITY: usize = 4;

// ---------------------------------------------------------------------------
// Read pool
// ---------------------------------------------------------------------------

struct ReadPool {
    path: PathBuf,
    conns: Mutex<Vec<Connection>>,
}

impl ReadPool {
    fn new(path: PathBuf) -> Self {
        ReadPool { path, conns: Mutex::new(Vec::new()) }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = {
            let mut conns = self.conns.lock().unwrap_or_else(|e| e.into_inner());
            conns.pop()
        };
        let conn = match conn {
            Some(c) => c,
            None => Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)?,
        };
        let out = f(&conn);
        let mut conns = self.conns.lock().unwrap_or_else(|e| e.into_inner());
        if conns.len() < POOL_CAPACITY {
            conns.push(conn);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Scan statistics
// ---------------------------------------------------------------------------

/// Diagnostic counters for one scan; failures are counted, not swallowed.
#[derive(Debug, Clone, Default)]
pub struct ScanStats {
    pub rows: u64,
    pub null_skips: u64,
    pub render_failures: u64,
    pub batches: u64,
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Lazily scanned projection of one schema root over one records table.
pub struct TableProjection {
    schema: CompiledSchema,
    root_name: String,
    engine: Arc<dyn TemplateEngine>,
    /// Root-relative dir path → sorted, deduplicated child identifiers
    /// (also root-relative). `""` keys the root itself.
    children: DashMap<String, Arc<Vec<String>>>,
    /// Leaf directory → record primary key.
    leaf_dirs: DashMap<String, String>,
    content_cache: Mutex<FifoCache<String, CachedBytes>>,
    size_cache: DashMap<String, u64>,
    scan_state: OnceLock<std::result::Result<ScanStats, String>>,
    cancelled: AtomicBool,
    pool: ReadPool,
    mtime: SystemTime,
}

impl TableProjection {
    /// Build a projection for the scan root named `root_name` in `schema`,
    /// backed by the SQLite database at `db_path`. The scan itself runs on
    /// first reference.
    pub fn new(
        db_path: impl Into<PathBuf>,
        schema: CompiledSchema,
        root_name: &str,
        engine: Arc<dyn TemplateEngine>,
    ) -> Result<Self> {
        if !schema.scan_roots().any(|r| r.name_template == root_name) {
            return Err(Error::Topology(format!("no static scan root named `{root_name}`")));
        }
        let db_path = db_path.into();
        Ok(TableProjection {
            schema,
            root_name: root_name.to_string(),
            engine,
            children: DashMap::new(),
            leaf_dirs: DashMap::new(),
            content_cache: Mutex::new(FifoCache::new(RENDER_CACHE_CAPACITY)),
            size_cache: DashMap::new(),
            scan_state: OnceLock::new(),
            cancelled: AtomicBool::new(false),
            pool: ReadPool::new(db_path),
            mtime: SystemTime::now(),
        })
    }

    pub fn root_name(&self) -> &str {
        &self.root_name
    }

    /// Request that a running scan stop at its next batch boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Counters from the completed scan, forcing the scan if needed.
    pub fn scan_stats(&self) -> Result<ScanStats> {
        self.ensure_scanned().cloned()
    }

    fn root_level(&self) -> &Level {
        self.schema
            .roots
            .iter()
            .find(|r| r.name_template == self.root_name)
            .expect("validated in new()")
    }

    /// Strip the root name from an external identifier, yielding the
    /// root-relative path (`""` for the root itself).
    fn to_relative<'a>(&self, id: &'a str) -> Option<&'a str> {
        let id = normalize_id(id);
        if id == self.root_name {
            Some("")
        } else {
            id.strip_prefix(&self.root_name)?.strip_prefix('/')
        }
    }

    // -- scan ---------------------------------------------------------------

    fn ensure_scanned(&self) -> Result<&ScanStats> {
        let state = self.scan_state.get_or_init(|| self.scan().map_err(|e| e.to_string()));
        state.as_ref().map_err(|e| Error::ScanError(e.clone()))
    }

    /// Dotted field paths required by the name templates under the root.
    fn required_fields(&self) -> Result<Vec<String>> {
        fn collect(
            level: &Level,
            engine: &dyn TemplateEngine,
            out: &mut Vec<String>,
        ) -> Result<()> {
            out.extend(engine.field_paths(&level.name_template)?);
            for leaf in &level.files {
                out.extend(engine.field_paths(&leaf.name)?);
            }
            for child in &level.children {
                collect(child, engine, out)?;
            }
            Ok(())
        }
        let mut fields = Vec::new();
        collect(self.root_level(), self.engine.as_ref(), &mut fields)?;
        fields.sort();
        fields.dedup();
        Ok(fields)
    }

    fn scan(&self) -> Result<ScanStats> {
        let started = std::time::Instant::now();
        let fields = self.required_fields()?;
        let mut sql = String::from("SELECT \"id\"");
        for field in &fields {
            sql.push_str(&format!(", json_extract(\"record\", '$.{field}')"));
        }
        sql.push_str(&format!(" FROM \"{}\"", self.schema.table));

        let conn =
            Connection::open_with_flags(&self.pool.path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        // Snapshot-consistent against concurrent table mutation.
        let tx = conn.unchecked_transaction()?;

        let mut stats = ScanStats::default();
        let mut working: std::collections::HashMap<String, Vec<String>> =
            std::collections::HashMap::new();
        {
            let mut stmt = tx.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut in_batch = 0usize;
            while let Some(row) = rows.next().map_err(|e| Error::ScanError(e.to_string()))? {
                stats.rows += 1;
                let pk: String = row.get(0).map_err(|e| Error::ScanError(e.to_string()))?;

                let mut scope = Value::Object(serde_json::Map::new());
                let mut null_field = false;
                for (i, field) in fields.iter().enumerate() {
                    let value = column_to_json(row.get_ref(i + 1).map_err(|e| {
                        Error::ScanError(e.to_string())
                    })?);
                    if value.is_null() {
                        null_field = true;
                        break;
                    }
                    insert_dotted(&mut scope, field, value);
                }
                if null_field {
                    stats.null_skips += 1;
                    continue;
                }

                if let Err(e) = self.emit_row(self.root_level(), "", &pk, &scope, &mut working) {
                    stats.render_failures += 1;
                    warn!(pk = %pk, error = %e, "row skipped: render failure");
                    continue;
                }

                in_batch += 1;
                if in_batch >= SCAN_BATCH {
                    self.flush_batch(&mut working);
                    stats.batches += 1;
                    in_batch = 0;
                    debug!(rows = stats.rows, batches = stats.batches, "scan progress");
                    if self.cancelled.load(Ordering::SeqCst) {
                        return Err(Error::ScanError("scan cancelled".to_string()));
                    }
                }
            }
        }
        self.flush_batch(&mut working);
        stats.batches += 1;

        // The root exists even when the table is empty.
        self.children.entry(String::new()).or_insert_with(|| Arc::new(Vec::new()));

        info!(
            root = %self.root_name,
            rows = stats.rows,
            null_skips = stats.null_skips,
            render_failures = stats.render_failures,
            time_ms = started.elapsed().as_millis() as u64,
            "table scan complete"
        );
        Ok(stats)
    }

    /// Walk the compiled levels for one record, accumulating parent→child
    /// edges and leaf-directory records.
    fn emit_row(
        &self,
        level: &Level,
        parent: &str,
        pk: &str,
        scope: &Value,
        working: &mut std::collections::HashMap<String, Vec<String>>,
    ) -> Result<()> {
        // The root level names the projection itself and produces no segment.
        let dir = if level.depth == 0 {
            parent.to_string()
        } else {
            let seg = self.engine.render(&level.name_template, scope)?;
            if seg.is_empty() || seg.contains('/') {
                return Err(Error::Template(format!(
                    "name template `{}` rendered invalid segment `{seg}`",
                    level.name_template
                )));
            }
            let dir =
                if parent.is_empty() { seg } else { format!("{parent}/{seg}") };
            working.entry(parent.to_string()).or_default().push(dir.clone());
            dir
        };

        if !level.files.is_empty() {
            self.leaf_dirs.entry(dir.clone()).or_insert_with(|| pk.to_string());
            for leaf in &level.files {
                let file_name = self.engine.render(&leaf.name, scope)?;
                working
                    .entry(dir.clone())
                    .or_default()
                    .push(format!("{dir}/{file_name}"));
            }
        }
        for child in &level.children {
            self.emit_row(child, &dir, pk, scope, working)?;
        }
        Ok(())
    }

    /// Sort and compact each accumulated child list, merge it with any
    /// previously published slice, publish atomically, and clear.
    fn flush_batch(&self, working: &mut std::collections::HashMap<String, Vec<String>>) {
        for (parent, mut kids) in working.drain() {
            kids.sort();
            kids.dedup();
            let merged = match self.children.get(&parent) {
                Some(existing) => merge_sorted(&existing, &kids),
                None => kids,
            };
            self.children.insert(parent, Arc::new(merged));
        }
    }

    // -- content ------------------------------------------------------------

    /// Resolve a schema file leaf to its rendered bytes, filling the
    /// content and size caches.
    fn resolve_content(&self, rel: &str) -> Result<CachedBytes> {
        {
            let cache = self.content_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(bytes) = cache.get(&rel.to_string()) {
                return Ok(bytes.clone());
            }
        }
        let parent = parent_id(rel)
            .ok_or_else(|| Error::NotFound(format!("{}/{rel}", self.root_name)))?;
        let pk = self
            .leaf_dirs
            .get(parent)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::NotFound(format!("{}/{rel}", self.root_name)))?;
        let leaf = match self.walk_file(rel)? {
            Some(leaf) => leaf,
            None => return Err(Error::NotFound(format!("{}/{rel}", self.root_name))),
        };

        let record: String = self.pool.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT \"record\" FROM \"{}\" WHERE \"id\" = ?1", self.schema.table),
                [pk.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| Error::ResolverFailure(format!("record `{pk}`: {e}")))
        })?;
        let scope: Value = serde_json::from_str(&record)
            .map_err(|e| Error::ResolverFailure(format!("record `{pk}`: {e}")))?;
        let rendered = self
            .engine
            .render(&leaf.content_template, &scope)
            .map_err(|e| Error::ResolverFailure(e.to_string()))?;

        let bytes: CachedBytes = Arc::new(rendered.into_bytes());
        self.size_cache.insert(rel.to_string(), bytes.len() as u64);
        let mut cache = self.content_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(rel.to_string(), bytes.clone());
        Ok(bytes)
    }

    /// Schema walk for a root-relative path that should be a file leaf.
    fn walk_file(&self, rel: &str) -> Result<Option<crate::schema::LeafDef>> {
        let full = format!("{}/{rel}", self.root_name);
        match crate::schema::walk_path(&self.schema, &full) {
            Ok(WalkTarget::File(_, leaf)) => Ok(Some(leaf.clone())),
            Ok(WalkTarget::Dir(_)) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Directory-containment test: binary search in the parent's slice.
    fn contains(&self, rel: &str) -> bool {
        if rel.is_empty() {
            return true;
        }
        let parent = parent_id(rel).unwrap_or("");
        match self.children.get(parent) {
            Some(kids) => kids.binary_search_by(|k| k.as_str().cmp(rel)).is_ok(),
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn column_to_json(value: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => {
            let text = String::from_utf8_lossy(t).into_owned();
            let trimmed = text.trim_start();
            if trimmed.starts_with('[') || trimmed.starts_with('{') {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            } else {
                Value::String(text)
            }
        }
        ValueRef::Blob(_) => Value::Null,
    }
}

/// Insert `value` at a dotted path, creating intermediate objects.
fn insert_dotted(scope: &mut Value, path: &str, value: Value) {
    let mut cur = scope;
    let mut segs = path.split('.').peekable();
    while let Some(seg) = segs.next() {
        let obj = match cur.as_object_mut() {
            Some(o) => o,
            None => return,
        };
        if segs.peek().is_none() {
            obj.insert(seg.to_string(), value);
            return;
        }
        cur = obj
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
}

fn merge_sorted(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => {
                out.push(a[i].clone());
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(b[j].clone());
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push(a[i].clone());
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend(b[j..].iter().cloned());
    out
}

// ---------------------------------------------------------------------------
// Read interface
// ---------------------------------------------------------------------------

impl GraphReader for TableProjection {
    fn get_node(&self, id: &str) -> Result<Arc<Node>> {
        let rel = self
            .to_relative(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?
            .to_string();
        self.ensure_scanned()?;

        if self.children.contains_key(&rel) || rel.is_empty() {
            let mut node = Node::dir(normalize_id(id));
            node.mtime = self.mtime;
            if let Some(kids) = self.children.get(&rel) {
                node.children = kids.to_vec();
            }
            return Ok(Arc::new(node));
        }

        if !self.contains(&rel) {
            return Err(Error::NotFound(id.to_string()));
        }

        // A file leaf. Stat requests after the first resolution are served
        // from the size cache without re-rendering.
        let size = match self.size_cache.get(&rel) {
            Some(len) => *len,
            None => self.resolve_content(&rel)?.len() as u64,
        };
        let parent = parent_id(&rel).unwrap_or("");
        let pk = self
            .leaf_dirs
            .get(parent)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let template = self
            .walk_file(&rel)?
            .map(|leaf| leaf.content_template)
            .unwrap_or_default();
        let mut node = Node::file(
            normalize_id(id),
            NodeContent::Lazy(ContentRef {
                table: self.schema.table.clone(),
                key: pk,
                template,
                rendered_len: size,
            }),
        );
        node.mtime = self.mtime;
        Ok(Arc::new(node))
    }

    fn list_children(&self, id: &str) -> Result<Vec<String>> {
        let rel = self
            .to_relative(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?
            .to_string();
        self.ensure_scanned()?;
        self.children
            .get(&rel)
            .map(|kids| kids.to_vec())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn read_content(&self, id: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
        let rel = self
            .to_relative(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?
            .to_string();
        self.ensure_scanned()?;
        if self.children.contains_key(&rel) {
            return Ok(0);
        }
        if !self.contains(&rel) {
            return Err(Error::NotFound(id.to_string()));
        }
        let bytes = self.resolve_content(&rel)?;
        let offset = offset as usize;
        if offset >= bytes.len() {
            return Ok(0);
        }
        let n = (bytes.len() - offset).min(buf.len());
        buf[..n].copy_from_slice(&bytes[offset..offset + n]);
        Ok(n)
    }

    fn invalidate(&self, id: &str) {
        if let Some(rel) = self.to_relative(id) {
            self.size_cache.remove(rel);
            let mut cache = self.content_cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.remove(&rel.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{compile, Topology};
    use crate::template::MiniTemplate;

    fn cve_schema() -> CompiledSchema {
        compile(
            &Topology::from_json(
                r#"{
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
            .unwrap(),
        )
        .unwrap()
    }

    fn record(id: &str, published: &str, desc: &str) -> (String, String) {
        (
            id.to_string(),
            format!(
                r#"{{"item":{{"cve":{{"id":"{id}","published":"{published}","descriptions":[{{"value":"{desc}"}}]}}}}}}"#
            ),
        )
    }

    fn build_db(rows: &[(String, String)]) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let conn = Connection::open(file.path()).unwrap();
        conn.execute("CREATE TABLE results (id TEXT PRIMARY KEY, record TEXT)", [])
            .unwrap();
        for (id, rec) in rows {
            conn.execute("INSERT INTO results (id, record) VALUES (?1, ?2)", [id, rec])
                .unwrap();
        }
        file
    }

    fn projection(db: &tempfile::NamedTempFile) -> TableProjection {
        TableProjection::new(db.path(), cve_schema(), "by-cve", Arc::new(MiniTemplate)).unwrap()
    }

    fn s1_rows() -> Vec<(String, String)> {
        vec![
            record("CVE-2024-0001", "2024-01-15T00:00:00Z", "desc A"),
            record("CVE-2024-0002", "2024-02-01T00:00:00Z", "desc B"),
            record("CVE-2023-0001", "2023-06-01T00:00:00Z", "desc C"),
        ]
    }

    #[test]
    fn test_s1_temporal_sharding() {
        let db = build_db(&s1_rows());
        let proj = projection(&db);

        assert_eq!(proj.list_children("by-cve").unwrap(), vec!["2023", "2024"]);
        assert_eq!(
            proj.list_children("by-cve/2024").unwrap(),
            vec!["2024/01", "2024/02"]
        );
        let bytes =
            crate::facade::read_to_vec(&proj, "by-cve/2024/01/CVE-2024-0001/description")
                .unwrap();
        assert_eq!(bytes, b"desc A");
    }

    #[test]
    fn test_scan_determinism_independent_of_row_order() {
        let mut rows = s1_rows();
        let db1 = build_db(&rows);
        rows.reverse();
        let db2 = build_db(&rows);
        let (p1, p2) = (projection(&db1), projection(&db2));
        assert_eq!(
            p1.list_children("by-cve").unwrap(),
            p2.list_children("by-cve").unwrap()
        );
        assert_eq!(
            p1.list_children("by-cve/2024/02/CVE-2024-0002").unwrap(),
            p2.list_children("by-cve/2024/02/CVE-2024-0002").unwrap()
        );
    }

    #[test]
    fn test_empty_table_root_exists() {
        let db = build_db(&[]);
        let proj = projection(&db);
        assert!(proj.get_node("by-cve").unwrap().is_dir());
        assert!(proj.list_children("by-cve").unwrap().is_empty());
        let stats = proj.scan_stats().unwrap();
        assert_eq!(stats.rows, 0);
    }

    #[test]
    fn test_null_field_rows_skipped_and_counted() {
        let mut rows = s1_rows();
        rows.push(("X-1".to_string(), r#"{"item":{"cve":{"id":"X-1"}}}"#.to_string()));
        let db = build_db(&rows);
        let proj = projection(&db);
        assert_eq!(proj.list_children("by-cve").unwrap(), vec!["2023", "2024"]);
        assert_eq!(proj.scan_stats().unwrap().null_skips, 1);
    }

    #[test]
    fn test_stat_after_read_uses_size_cache() {
        let db = build_db(&s1_rows());
        let proj = projection(&db);
        let id = "by-cve/2024/01/CVE-2024-0001/description";
        let node = proj.get_node(id).unwrap();
        assert_eq!(node.size(), 6);
        // Second stat comes from the size cache.
        assert_eq!(proj.get_node(id).unwrap().size(), 6);
    }

    #[test]
    fn test_unknown_paths_not_found() {
        let db = build_db(&s1_rows());
        let proj = projection(&db);
        assert!(proj.get_node("by-cve/1999").unwrap_err().is_not_found());
        assert!(proj
            .get_node("by-cve/2024/01/CVE-2024-0001/nope")
            .unwrap_err()
            .is_not_found());
        assert!(proj.get_node("elsewhere").unwrap_err().is_not_found());
    }

    #[test]
    fn test_invalidate_clears_caches() {
        let db = build_db(&s1_rows());
        let proj = projection(&db);
        let id = "by-cve/2024/01/CVE-2024-0001/description";
        proj.get_node(id).unwrap();
        assert!(proj.size_cache.contains_key("2024/01/CVE-2024-0001/description"));
        proj.invalidate(id);
        assert!(!proj.size_cache.contains_key("2024/01/CVE-2024-0001/description"));
    }

    #[test]
    fn test_merge_sorted_compacts_duplicates() {
        let a = vec!["a".to_string(), "c".to_string()];
        let b = vec!["b".to_string(), "c".to_string(), "d".to_string()];
        assert_eq!(merge_sorted(&a, &b), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_duplicate_dirs_across_rows_compacted() {
        let rows = vec![
            record("CVE-2024-0001", "2024-01-15T00:00:00Z", "one"),
            record("CVE-2024-0009", "2024-01-20T00:00:00Z", "nine"),
        ];
        let db = build_db(&rows);
        let proj = projection(&db);
        // Both rows land in 2024/01; the slice holds it once.
        assert_eq!(proj.list_children("by-cve/2024").unwrap(), vec!["2024/01"]);
        assert_eq!(
            proj.list_children("by-cve/2024/01").unwrap(),
            vec!["2024/01/CVE-2024-0001", "2024/01/CVE-2024-0009"]
        );
    }
}
