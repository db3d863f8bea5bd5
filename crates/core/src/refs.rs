//! Cross-reference index: token → file-path sets, accumulated in memory,
//! flushed once into a sidecar SQLite store, and served back through point
//! lookups and the `mache_refs` virtual table.
//!
//! The sidecar is a derived index rebuilt each session; any prior backing
//! file is removed at open to avoid stale file-id collisions. The virtual
//! table binding is process-global, keyed by a per-store registry token and
//! unregistered on close.

use dashmap::DashMap;
use roaring::RoaringBitmap;
use rusqlite::ffi;
use rusqlite::types::ValueRef;
use rusqlite::vtab::{
    read_only_module, Context, CreateVTab, IndexConstraintOp, IndexInfo, VTab, VTabConnection,
    VTabCursor, VTabKind, Values,
};
use rusqlite::Connection;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::os::raw::c_int;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Name of the virtual-table module and of the virtual table itself.
pub const REFS_VTAB: &str = "mache_refs";

// ---------------------------------------------------------------------------
// Sidecar connection pool
// ---------------------------------------------------------------------------

/// Two connections: one for the outer virtual-table cursor, one for the
/// inner bitmap-expansion queries issued while that cursor is open.
const SIDECAR_POOL_CAPACITY: usize = 2;

struct SidecarPool {
    conns: Mutex<Vec<Connection>>,
}

struct PooledConn {
    conn: Option<Connection>,
    pool: Arc<SidecarPool>,
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let mut conns = self.pool.conns.lock().unwrap_or_else(|e| e.into_inner());
            conns.push(conn);
        }
    }
}

impl std::ops::Deref for PooledConn {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl SidecarPool {
    fn acquire(pool: &Arc<SidecarPool>) -> Result<PooledConn> {
        let mut conns = pool.conns.lock().unwrap_or_else(|e| e.into_inner());
        let conn = conns.pop().ok_or_else(|| {
            Error::RefIndex("sidecar connection pool exhausted (limit 2)".to_string())
        })?;
        Ok(PooledConn { conn: Some(conn), pool: pool.clone() })
    }
}

// ---------------------------------------------------------------------------
// Global module registry
// ---------------------------------------------------------------------------

fn registry() -> &'static Mutex<HashMap<String, Arc<SidecarPool>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<SidecarPool>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn registry_get(key: &str) -> Option<Arc<SidecarPool>> {
    registry().lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
}

fn next_registry_key() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("mache-refs-{}-{}", std::process::id(), COUNTER.fetch_add(1, Ordering::SeqCst))
}

// ---------------------------------------------------------------------------
// Reference index
// ---------------------------------------------------------------------------

/// Result set of an ad-hoc read-only query.
#[derive(Debug, Clone)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub struct RefIndex {
    registry_key: String,
    file_ids: DashMap<String, u32>,
    pending: DashMap<String, RoaringBitmap>,
    next_file_id: AtomicU32,
    flushed: AtomicBool,
    pool: Arc<SidecarPool>,
}

impl RefIndex {
    /// Open (and wipe) the sidecar store at `db_path` and register the
    /// virtual-table binding for this instance.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path: PathBuf = db_path.as_ref().to_path_buf();
        wipe_sidecar(&db_path)?;

        let registry_key = next_registry_key();
        let mut conns = Vec::with_capacity(SIDECAR_POOL_CAPACITY);
        for _ in 0..SIDECAR_POOL_CAPACITY {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
            conn.create_module(REFS_VTAB, read_only_module::<RefsTab>(), None)?;
            conns.push(conn);
        }
        conns[0].execute_batch(
            "CREATE TABLE IF NOT EXISTS node_refs (
                token TEXT PRIMARY KEY,
                bitmap BLOB
            );
            CREATE TABLE IF NOT EXISTS file_ids (
                id INTEGER PRIMARY KEY,
                path TEXT UNIQUE NOT NULL
            );",
        )?;
        conns[0].execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {REFS_VTAB} USING {REFS_VTAB}('{registry_key}')"
        ))?;

        let pool = Arc::new(SidecarPool { conns: Mutex::new(conns) });
        registry()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(registry_key.clone(), pool.clone());
        debug!(db = %db_path.display(), key = %registry_key, "reference index opened");

        Ok(RefIndex {
            registry_key,
            file_ids: DashMap::new(),
            pending: DashMap::new(),
            next_file_id: AtomicU32::new(0),
            flushed: AtomicBool::new(false),
            pool,
        })
    }

    pub fn registry_key(&self) -> &str {
        &self.registry_key
    }

    /// Record that `path` references `token`. Thread-safe, no I/O.
    pub fn add_ref(&self, token: &str, path: &str) {
        let file_id = *self
            .file_ids
            .entry(path.to_string())
            .or_insert_with(|| self.next_file_id.fetch_add(1, Ordering::SeqCst));
        self.pending.entry(token.to_string()).or_default().insert(file_id);
    }

    /// Write the accumulated mappings in a single transaction. Only the
    /// first call does work; repeated calls leave the store unchanged.
    pub fn flush(&self) -> Result<()> {
        if self.flushed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let conn = SidecarPool::acquire(&self.pool)?;
        let tx = conn.unchecked_transaction()?;
        {
            let mut file_stmt =
                tx.prepare("INSERT OR IGNORE INTO file_ids (id, path) VALUES (?1, ?2)")?;
            for entry in self.file_ids.iter() {
                file_stmt.execute(rusqlite::params![*entry.value(), entry.key()])?;
            }
            let mut ref_stmt = tx.prepare(
                "INSERT INTO node_refs (token, bitmap) VALUES (?1, ?2)
                 ON CONFLICT(token) DO UPDATE SET bitmap = excluded.bitmap",
            )?;
            for entry in self.pending.iter() {
                let mut blob = Vec::with_capacity(entry.value().serialized_size());
                entry
                    .value()
                    .serialize_into(&mut blob)
                    .map_err(|e| Error::RefIndex(format!("bitmap serialization: {e}")))?;
                ref_stmt.execute(rusqlite::params![entry.key(), blob])?;
            }
        }
        tx.commit()?;
        info!(
            tokens = self.pending.len(),
            files = self.file_ids.len(),
            "reference index flushed"
        );
        Ok(())
    }

    /// Paths referencing `token`: point lookup, bitmap expansion, and one
    /// batched IN-clause path resolution. Sorted by path.
    pub fn get_callers(&self, token: &str) -> Result<Vec<String>> {
        let conn = SidecarPool::acquire(&self.pool)?;
        let blob: Option<Vec<u8>> = conn
            .query_row("SELECT bitmap FROM node_refs WHERE token = ?1", [token], |row| {
                row.get(0)
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        let Some(blob) = blob else { return Ok(Vec::new()) };
        let bitmap = RoaringBitmap::deserialize_from(&blob[..])
            .map_err(|e| Error::RefIndex(format!("bitmap for `{token}`: {e}")))?;
        resolve_paths(&conn, bitmap.iter().collect()).map_err(Error::from)
    }

    /// Run an arbitrary read-only SQL query against the sidecar store; the
    /// `mache_refs` virtual table and the backing `node_refs` / `file_ids`
    /// tables are all visible.
    pub fn query(&self, sql: &str) -> Result<QueryOutput> {
        let conn = SidecarPool::acquire(&self.pool)?;
        let mut stmt = conn.prepare(sql)?;
        if !stmt.readonly() {
            return Err(Error::RefIndex("only read-only queries are served".to_string()));
        }
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let ncols = columns.len();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut fields = Vec::with_capacity(ncols);
            for i in 0..ncols {
                fields.push(render_column(row.get_ref(i)?));
            }
            out.push(fields);
        }
        Ok(QueryOutput { columns, rows: out })
    }

    /// Unregister the virtual-table binding. Also runs on drop.
    pub fn close(&self) {
        registry().lock().unwrap_or_else(|e| e.into_inner()).remove(&self.registry_key);
    }
}

impl Drop for RefIndex {
    fn drop(&mut self) {
        self.close();
    }
}

fn wipe_sidecar(db_path: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut path = db_path.as_os_str().to_os_string();
        path.push(suffix);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn render_column(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => format!("<blob {} bytes>", b.len()),
    }
}

/// Batched file-id → path resolution. Returns paths sorted.
fn resolve_paths(conn: &Connection, ids: Vec<u32>) -> rusqlite::Result<Vec<String>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql =
        format!("SELECT path FROM file_ids WHERE id IN ({placeholders}) ORDER BY path");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), |row| row.get(0))?;
    rows.collect()
}

// ---------------------------------------------------------------------------
// Virtual table: mache_refs(token TEXT, path TEXT)
// ---------------------------------------------------------------------------

/// Index strategies, cost-ordered. Encoded as `idx_num` between
/// `best_index` and `filter`.
const IDX_SCAN: c_int = 0;
const IDX_EQ: c_int = 1;
const IDX_LIKE: c_int = 2;
const IDX_GLOB: c_int = 3;

#[repr(C)]
struct RefsTab {
    /// Base class. Must be first.
    base: ffi::sqlite3_vtab,
    registry_key: String,
}

unsafe impl<'vtab> VTab<'vtab> for RefsTab {
    type Aux = ();
    type Cursor = RefsCursor<'vtab>;

    fn connect(
        _db: &mut VTabConnection,
        _aux: Option<&()>,
        args: &[&[u8]],
    ) -> rusqlite::Result<(String, Self)> {
        // args: module name, database name, table name, then module args.
        let key = args
            .get(3)
            .map(|a| String::from_utf8_lossy(a).trim().trim_matches(['\'', '"']).to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                rusqlite::Error::ModuleError(format!(
                    "{REFS_VTAB} requires one module argument naming a registry entry"
                ))
            })?;
        let tab = RefsTab { base: ffi::sqlite3_vtab::default(), registry_key: key };
        Ok(("CREATE TABLE x(token TEXT, path TEXT)".to_string(), tab))
    }

    fn best_index(&self, info: &mut IndexInfo) -> rusqlite::Result<()> {
        let mut chosen: Option<(usize, c_int)> = None;
        for (i, constraint) in info.constraints().enumerate() {
            if !constraint.is_usable() || constraint.column() != 0 {
                continue;
            }
            let strategy = match constraint.operator() {
                IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_EQ => IDX_EQ,
                IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_LIKE => IDX_LIKE,
                IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_GLOB => IDX_GLOB,
                _ => continue,
            };
            // Point lookups beat filter scans.
            match chosen {
                Some((_, IDX_EQ)) => {}
                _ if strategy == IDX_EQ => chosen = Some((i, strategy)),
                None => chosen = Some((i, strategy)),
                _ => {}
            }
        }
        match chosen {
            Some((i, strategy)) => {
                let mut usage = info.constraint_usage(i);
                usage.set_argv_index(1);
                usage.set_omit(strategy == IDX_EQ);
                info.set_idx_num(strategy);
                info.set_estimated_cost(if strategy == IDX_EQ { 1.0 } else { 100.0 });
            }
            None => {
                info.set_idx_num(IDX_SCAN);
                info.set_estimated_cost(10_000.0);
            }
        }
        Ok(())
    }

    fn open(&'vtab mut self) -> rusqlite::Result<RefsCursor<'vtab>> {
        Ok(RefsCursor {
            base: ffi::sqlite3_vtab_cursor::default(),
            registry_key: self.registry_key.clone(),
            rows: Vec::new(),
            pos: 0,
            phantom: PhantomData,
        })
    }
}

impl<'vtab> CreateVTab<'vtab> for RefsTab {
    const KIND: VTabKind = VTabKind::Default;
}

#[repr(C)]
struct RefsCursor<'vtab> {
    /// Base class. Must be first.
    base: ffi::sqlite3_vtab_cursor,
    registry_key: String,
    rows: Vec<(String, String)>,
    pos: usize,
    phantom: PhantomData<&'vtab RefsTab>,
}

unsafe impl VTabCursor for RefsCursor<'_> {
    /// Materializes the full outer result set before returning, so the
    /// inner connection is free again by the time rows are stepped.
    fn filter(
        &mut self,
        idx_num: c_int,
        _idx_str: Option<&str>,
        args: &Values<'_>,
    ) -> rusqlite::Result<()> {
        let pool = registry_get(&self.registry_key).ok_or_else(|| {
            rusqlite::Error::ModuleError(format!(
                "no reference store registered under `{}`",
                self.registry_key
            ))
        })?;
        let conn = SidecarPool::acquire(&pool).map_err(module_err)?;

        let (sql, pattern) = match idx_num {
            IDX_EQ => ("SELECT token, bitmap FROM node_refs WHERE token = ?1", Some(())),
            IDX_LIKE => ("SELECT token, bitmap FROM node_refs WHERE token LIKE ?1", Some(())),
            IDX_GLOB => ("SELECT token, bitmap FROM node_refs WHERE token GLOB ?1", Some(())),
            _ => ("SELECT token, bitmap FROM node_refs ORDER BY token", None),
        };

        let mut stmt = conn.prepare(sql)?;
        let mut matched: Vec<(String, RoaringBitmap)> = Vec::new();
        let mut collect = |row: &rusqlite::Row<'_>| -> rusqlite::Result<()> {
            let token: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            let bitmap = RoaringBitmap::deserialize_from(&blob[..]).map_err(|e| {
                rusqlite::Error::ModuleError(format!("bitmap for `{token}`: {e}"))
            })?;
            matched.push((token, bitmap));
            Ok(())
        };
        if pattern.is_some() {
            let arg: String = args.get(0)?;
            let mut rows = stmt.query([arg])?;
            while let Some(row) = rows.next()? {
                collect(row)?;
            }
        } else {
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                collect(row)?;
            }
        }

        self.rows.clear();
        for (token, bitmap) in matched {
            for path in resolve_paths(&conn, bitmap.iter().collect())? {
                self.rows.push((token.clone(), path));
            }
        }
        self.pos = 0;
        Ok(())
    }

    fn next(&mut self) -> rusqlite::Result<()> {
        self.pos += 1;
        Ok(())
    }

    fn eof(&self) -> bool {
        self.pos >= self.rows.len()
    }

    fn column(&self, ctx: &mut Context, i: c_int) -> rusqlite::Result<()> {
        let (token, path) = &self.rows[self.pos];
        match i {
            0 => ctx.set_result(token),
            1 => ctx.set_result(path),
            _ => Err(rusqlite::Error::ModuleError(format!("no column {i}"))),
        }
    }

    fn rowid(&self) -> rusqlite::Result<i64> {
        Ok(self.pos as i64)
    }
}

fn module_err(e: Error) -> rusqlite::Error {
    rusqlite::Error::ModuleError(e.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_index() -> (tempfile::TempDir, RefIndex) {
        let dir = tempfile::tempdir().unwrap();
        let index = RefIndex::open(dir.path().join("refs.db")).unwrap();
        (dir, index)
    }

    fn seed_s3(index: &RefIndex) {
        index.add_ref("Println", "pkg/main/source");
        index.add_ref("Println", "pkg/util/source");
        index.add_ref("Sprintf", "pkg/main/source");
        index.flush().unwrap();
    }

    #[test]
    fn test_s3_point_query() {
        let (_dir, index) = temp_index();
        seed_s3(&index);

        let callers = index.get_callers("Println").unwrap();
        assert_eq!(callers, vec!["pkg/main/source", "pkg/util/source"]);
        assert_eq!(index.get_callers("Sprintf").unwrap(), vec!["pkg/main/source"]);
        assert!(index.get_callers("Missing").unwrap().is_empty());

        let out = index
            .query("SELECT path FROM mache_refs WHERE token = 'Println' ORDER BY path")
            .unwrap();
        assert_eq!(out.columns, vec!["path"]);
        let paths: Vec<&str> = out.rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(paths, vec!["pkg/main/source", "pkg/util/source"]);
    }

    #[test]
    fn test_s3_like_prefix_query() {
        let (_dir, index) = temp_index();
        index.add_ref("MyFunc", "a/source");
        index.add_ref("MyHelper", "b/source");
        index.add_ref("Other", "c/source");
        index.flush().unwrap();

        let out = index
            .query("SELECT token, path FROM mache_refs WHERE token LIKE 'My%' ORDER BY token")
            .unwrap();
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[0][0], "MyFunc");
        assert_eq!(out.rows[1][0], "MyHelper");
    }

    #[test]
    fn test_glob_and_full_scan() {
        let (_dir, index) = temp_index();
        seed_s3(&index);

        let glob = index
            .query("SELECT path FROM mache_refs WHERE token GLOB 'Sprint*'")
            .unwrap();
        assert_eq!(glob.rows.len(), 1);

        let all = index.query("SELECT token, path FROM mache_refs").unwrap();
        assert_eq!(all.rows.len(), 3, "one row per (token, path) pair");
    }

    #[test]
    fn test_flush_idempotent() {
        let (_dir, index) = temp_index();
        seed_s3(&index);
        let before = index.query("SELECT token, path FROM mache_refs ORDER BY token, path").unwrap();
        index.flush().unwrap();
        index.flush().unwrap();
        let after = index.query("SELECT token, path FROM mache_refs ORDER BY token, path").unwrap();
        assert_eq!(before.rows, after.rows);
    }

    #[test]
    fn test_wipe_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refs.db");
        {
            let index = RefIndex::open(&path).unwrap();
            index.add_ref("Old", "stale/source");
            index.flush().unwrap();
        }
        let index = RefIndex::open(&path).unwrap();
        let out = index.query("SELECT count(*) FROM node_refs").unwrap();
        assert_eq!(out.rows[0][0], "0", "prior backing file must be removed at open");
    }

    #[test]
    fn test_write_queries_rejected() {
        let (_dir, index) = temp_index();
        seed_s3(&index);
        assert!(index.query("DELETE FROM node_refs").is_err());
    }

    #[test]
    fn test_registry_unregistered_on_close() {
        let (_dir, index) = temp_index();
        let key = index.registry_key().to_string();
        assert!(registry_get(&key).is_some());
        drop(index);
        assert!(registry_get(&key).is_none());
    }

    #[test]
    fn test_same_path_single_file_id() {
        let (_dir, index) = temp_index();
        index.add_ref("A", "pkg/source");
        index.add_ref("B", "pkg/source");
        index.flush().unwrap();
        let out = index.query("SELECT count(*) FROM file_ids").unwrap();
        assert_eq!(out.rows[0][0], "1");
    }
}
