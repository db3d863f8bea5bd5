//! Source-tree ingestion: walk a directory, parse each file with the AST
//! backend (or route JSON data files through the path-query backend), and
//! materialize construct nodes per the topology.
//!
//! Directory nodes go straight to the store and merge idempotently; file
//! nodes are buffered per source file and installed in one atomic
//! `replace_file_nodes` call. Unparseable files and grammar mismatches are
//! routed to the fallback grouping directory, never fatal.

use dashmap::DashMap;
use rayon::prelude::*;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ast::{
    self, compile_selector, extend_over_comments, parse, reference_tokens, ParsedFile,
};
use crate::error::{Error, Result};
use crate::facade::GraphReader;
use crate::node::{Node, NodeContent, SourceOrigin};
use crate::refs::RefIndex;
use crate::schema::{CompiledSchema, Level};
use crate::store::GraphStore;
use crate::template::TemplateEngine;
use crate::vfs::{CONTEXT_PROPERTY, FALLBACK_DIR, LANG_PROPERTY, PACKAGE_PROPERTY};

/// Leaf name that receives reference tokens and implicit truncation.
pub const SOURCE_LEAF: &str = "source";

/// Directory base names never descended into.
const SKIP_DIRS: &[&str] = &["target", "node_modules", "dist", "build"];

/// Object and archive extensions skipped without reading.
const OBJECT_EXTS: &[&str] = &[
    "o", "a", "so", "dylib", "obj", "lib", "rlib", "zip", "tar", "gz", "tgz", "jar", "class",
    "pyc", "wasm", "exe", "dll",
];

/// NUL byte within this prefix marks a file as binary.
const BINARY_SNIFF_LEN: usize = 512;

// ---------------------------------------------------------------------------
// Path-query backend seam
// ---------------------------------------------------------------------------

/// Query interface for table-style data files. The engine ships a dotted
/// descent; richer JSON-path backends plug in here.
pub trait PathQuery: Send + Sync {
    /// Values matched by `selector` under `root`.
    fn matches(&self, root: &Value, selector: &str) -> Vec<Value>;
}

/// Dotted-path descent with array fan-out at every step.
#[derive(Default)]
pub struct DottedPathQuery;

impl PathQuery for DottedPathQuery {
    fn matches(&self, root: &Value, selector: &str) -> Vec<Value> {
        let mut current = vec![root.clone()];
        for seg in selector.split('.').filter(|s| !s.is_empty()) {
            let mut next = Vec::new();
            for value in current {
                let stepped = match value {
                    Value::Array(items) => {
                        items.iter().filter_map(|v| v.get(seg)).cloned().collect()
                    }
                    other => other.get(seg).cloned().into_iter().collect::<Vec<_>>(),
                };
                next.extend(stepped);
            }
            current = next;
        }
        // A trailing array fans out into one match per element.
        current
            .into_iter()
            .flat_map(|v| match v {
                Value::Array(items) => items,
                other => vec![other],
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    pub files: u64,
    pub skipped: u64,
    pub parse_failures: u64,
    pub constructs: u64,
    pub refs_emitted: u64,
}

#[derive(Debug, Default)]
struct FileReport {
    constructs: u64,
    refs: u64,
    fallback: bool,
}

// ---------------------------------------------------------------------------
// Per-file context
// ---------------------------------------------------------------------------

struct FileCtx {
    abs: PathBuf,
    file_name: String,
    stem: String,
    size: usize,
    language: Option<&'static str>,
    package: Option<String>,
    context: Vec<u8>,
}

impl FileCtx {
    fn file_scope(&self) -> Value {
        serde_json::json!({
            "file": {
                "name": self.file_name,
                "stem": self.stem,
                "path": self.abs.to_string_lossy(),
                "language": self.language,
                "package": self.package,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Buffering target
// ---------------------------------------------------------------------------

/// Routes directory inserts directly to the store but buffers file inserts
/// until the per-file group is complete.
struct BufferingTarget<'a> {
    store: &'a GraphStore,
    file_path: PathBuf,
    buffered: Vec<Node>,
}

impl<'a> BufferingTarget<'a> {
    fn new(store: &'a GraphStore, file_path: PathBuf) -> Self {
        BufferingTarget { store, file_path, buffered: Vec::new() }
    }

    fn insert_dir(&self, node: Node) {
        let id = node.id.clone();
        match crate::node::parent_id(&id) {
            None => self.store.add_root(node),
            Some(parent) => {
                self.store.add_node(node);
                let _ = self.store.add_child(parent, &id);
            }
        }
    }

    fn insert_file(&mut self, node: Node) {
        self.buffered.push(node);
    }

    /// Atomically replace this file's node group with the buffered nodes.
    fn commit(self) {
        self.store.replace_file_nodes(&self.file_path, self.buffered);
    }
}

// ---------------------------------------------------------------------------
// Ingestor
// ---------------------------------------------------------------------------

enum RoutedInput {
    Ast(ParsedFile),
    Json(Value),
    Fallback(String),
}

pub struct SourceIngestor {
    store: Arc<GraphStore>,
    schema: CompiledSchema,
    engine: Arc<dyn TemplateEngine>,
    path_backend: Arc<dyn PathQuery>,
    /// Definition registry: `name` and `package.name` → construct node id.
    definitions: DashMap<String, String>,
}

impl SourceIngestor {
    pub fn new(
        store: Arc<GraphStore>,
        schema: CompiledSchema,
        engine: Arc<dyn TemplateEngine>,
    ) -> Self {
        SourceIngestor {
            store,
            schema,
            engine,
            path_backend: Arc::new(DottedPathQuery),
            definitions: DashMap::new(),
        }
    }

    pub fn with_path_backend(mut self, backend: Arc<dyn PathQuery>) -> Self {
        self.path_backend = backend;
        self
    }

    /// Look up the construct node representing a definition.
    pub fn lookup_definition(&self, name: &str) -> Option<String> {
        self.definitions.get(name).map(|e| e.value().clone())
    }

    /// Drain the store's accumulated (token, node-id) pairs into the
    /// cross-reference index and flush it.
    pub fn publish_refs(&self, refs: &RefIndex) -> Result<()> {
        for (token, node_id) in self.store.drain_refs() {
            refs.add_ref(&token, &node_id);
        }
        refs.flush()
    }

    /// Walk `root` and ingest every eligible file, in sorted path order.
    /// Sorted order is what makes the dedup-suffix assignment stable: the
    /// lexicographically first file producing an identifier keeps the base
    /// name.
    pub fn ingest_dir(&self, root: &Path) -> Result<IngestStats> {
        let started = std::time::Instant::now();
        let mut stats = IngestStats::default();

        let mut files = Vec::new();
        let walker = ignore::WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .filter_entry(|entry| {
                if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                    let name = entry.file_name().to_string_lossy();
                    return !SKIP_DIRS.contains(&name.as_ref());
                }
                true
            })
            .build();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = entry.into_path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if OBJECT_EXTS.contains(&ext) {
                stats.skipped += 1;
                continue;
            }
            files.push(path);
        }
        files.sort();

        // Read and parse in parallel; node construction stays sequential so
        // dedup-suffix assignment follows the sorted order.
        let routed: Vec<(PathBuf, std::io::Result<(PathBuf, Vec<u8>, RoutedInput)>)> = files
            .into_par_iter()
            .map(|path| {
                let loaded = self.load_and_route(&path);
                (path, loaded)
            })
            .collect();

        for (path, loaded) in routed {
            match loaded {
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "unreadable file skipped");
                    stats.skipped += 1;
                }
                Ok((_, _, RoutedInput::Fallback(reason))) if reason == "binary" => {
                    stats.skipped += 1;
                }
                Ok((canonical, source, routed)) => {
                    let report = self.build_file(&canonical, source, routed);
                    stats.files += 1;
                    if report.fallback {
                        stats.parse_failures += 1;
                    }
                    stats.constructs += report.constructs;
                    stats.refs_emitted += report.refs;
                }
            }
        }

        info!(
            files = stats.files,
            skipped = stats.skipped,
            parse_failures = stats.parse_failures,
            constructs = stats.constructs,
            refs = stats.refs_emitted,
            time_ms = started.elapsed().as_millis() as u64,
            "source tree ingested"
        );
        Ok(stats)
    }

    /// Ingest (or re-ingest) one file.
    pub fn ingest_file(&self, path: &Path) -> Result<()> {
        let (canonical, source, routed) = self.load_and_route(path)?;
        if let RoutedInput::Fallback(reason) = &routed {
            if reason == "binary" {
                return Ok(());
            }
        }
        self.build_file(&canonical, source, routed);
        Ok(())
    }

    // -- routing ------------------------------------------------------------

    /// Resolve to the canonical absolute path, read, and classify.
    fn load_and_route(&self, path: &Path) -> std::io::Result<(PathBuf, Vec<u8>, RoutedInput)> {
        let canonical = fs::canonicalize(path)?;
        let source = fs::read(&canonical)?;
        if source[..source.len().min(BINARY_SNIFF_LEN)].contains(&0) {
            return Ok((canonical, source, RoutedInput::Fallback("binary".to_string())));
        }
        let ext = canonical.extension().and_then(|e| e.to_str()).unwrap_or("");
        if ext == "json" {
            return Ok(match serde_json::from_slice::<Value>(&source) {
                Ok(value) => (canonical, source, RoutedInput::Json(value)),
                Err(e) => {
                    let reason = format!("invalid JSON: {e}");
                    (canonical, source, RoutedInput::Fallback(reason))
                }
            });
        }
        let routed = match ast::language_for_ext(ext) {
            Some(spec) => match parse(source.clone(), spec) {
                Ok(parsed) => RoutedInput::Ast(parsed),
                Err(e) => RoutedInput::Fallback(e.to_string()),
            },
            None => RoutedInput::Fallback(format!("unsupported extension `{ext}`")),
        };
        Ok((canonical, source, routed))
    }

    // -- per-file build -----------------------------------------------------

    fn build_file(&self, abs: &Path, source: Vec<u8>, routed: RoutedInput) -> FileReport {
        let mut report = FileReport::default();
        match routed {
            RoutedInput::Ast(parsed) => {
                let ctx = FileCtx {
                    abs: abs.to_path_buf(),
                    file_name: file_name_of(abs),
                    stem: stem_of(abs),
                    size: source.len(),
                    language: Some(parsed.spec.name),
                    package: parsed.package_name(),
                    context: parsed.context_blob(),
                };
                // Compile every selector against this file's grammar before
                // touching the store, so a mismatch re-routes the file
                // without leaving partial construct directories behind.
                if let Err(e) = self.precheck_selectors(&parsed) {
                    warn!(file = %abs.display(), error = %e, "re-routed to fallback");
                    self.fallback_file(abs, source);
                    return FileReport { fallback: true, ..FileReport::default() };
                }

                let mut target = BufferingTarget::new(&self.store, abs.to_path_buf());
                let mut failed: Option<Error> = None;
                for root in self.ast_roots() {
                    if let Err(e) = self.walk_ast_level(
                        root,
                        &parsed,
                        parsed.root(),
                        None,
                        &ctx,
                        &mut target,
                        &mut report,
                    ) {
                        failed = Some(e);
                        break;
                    }
                }
                match failed {
                    // Render failures mid-walk still re-route; never fatal.
                    Some(e) => {
                        warn!(file = %abs.display(), error = %e, "re-routed to fallback");
                        self.fallback_file(abs, source);
                        report = FileReport { fallback: true, ..FileReport::default() };
                    }
                    None => target.commit(),
                }
            }
            RoutedInput::Json(value) => {
                let ctx = FileCtx {
                    abs: abs.to_path_buf(),
                    file_name: file_name_of(abs),
                    stem: stem_of(abs),
                    size: source.len(),
                    language: None,
                    package: None,
                    context: Vec::new(),
                };
                let mut target = BufferingTarget::new(&self.store, abs.to_path_buf());
                for root in self.json_roots() {
                    self.walk_json_level(root, &value, None, &ctx, &mut target, &mut report);
                }
                target.commit();
            }
            RoutedInput::Fallback(reason) => {
                debug!(file = %abs.display(), reason = %reason, "fallback grouping");
                self.fallback_file(abs, source);
                report.fallback = true;
            }
        }
        report
    }

    /// Compile every AST selector in the schema against the file's grammar.
    fn precheck_selectors(&self, parsed: &ParsedFile) -> Result<()> {
        fn check(level: &Level, parsed: &ParsedFile) -> Result<()> {
            if level.is_ast_selector() {
                compile_selector(&level.selector, parsed.spec)?;
            }
            for child in &level.children {
                check(child, parsed)?;
            }
            Ok(())
        }
        for root in self.ast_roots() {
            check(root, parsed)?;
        }
        Ok(())
    }

    /// Schema roots whose first selector is an AST query.
    fn ast_roots(&self) -> impl Iterator<Item = &Level> {
        self.schema
            .roots
            .iter()
            .filter(|r| first_selector(r).is_some_and(|s| s.trim_start().starts_with('(')))
    }

    /// Schema roots whose first selector is a path query.
    fn json_roots(&self) -> impl Iterator<Item = &Level> {
        self.schema
            .roots
            .iter()
            .filter(|r| first_selector(r).is_some_and(|s| !s.trim_start().starts_with('(')))
    }

    #[allow(clippy::too_many_arguments)]
    fn walk_ast_level(
        &self,
        level: &Level,
        parsed: &ParsedFile,
        node: tree_sitter::Node<'_>,
        parent: Option<&str>,
        ctx: &FileCtx,
        target: &mut BufferingTarget<'_>,
        report: &mut FileReport,
    ) -> Result<()> {
        if level.selector.is_empty() {
            let scope = ctx.file_scope();
            let name = self.engine.render(&level.name_template, &scope)?;
            if name.is_empty() {
                return Ok(());
            }
            let id = self.insert_construct(parent, &name, ctx, target, report)?;
            self.emit_files(level, parsed, node, &id, &scope, ctx, target, report);
            for child in &level.children {
                self.walk_ast_level(child, parsed, node, Some(&id), ctx, target, report)?;
            }
            return Ok(());
        }

        let selector = compile_selector(&level.selector, parsed.spec)?;
        for m in selector.matches(node, &parsed.source) {
            let scope_node = m.scope.unwrap_or(node);
            if level.skip_self_match && scope_node.id() == node.id() {
                continue;
            }
            let mut scope_map = m.captures.clone();
            if let Value::Object(file_obj) = ctx.file_scope() {
                for (k, v) in file_obj {
                    scope_map.insert(k, v);
                }
            }
            let (ext_start, ext_end) = extend_over_comments(scope_node, parsed.spec);
            scope_map.insert(
                "scope".to_string(),
                serde_json::json!({
                    "text": String::from_utf8_lossy(&parsed.source[ext_start..ext_end]),
                    "start": ext_start,
                    "end": ext_end,
                }),
            );
            let scope = Value::Object(scope_map);

            let name = self.engine.render(&level.name_template, &scope)?;
            if name.is_empty() {
                continue;
            }
            let name = self.dedup_name(parent, &name, &ctx.abs);
            let id = self.insert_construct(parent, &name, ctx, target, report)?;

            self.definitions.entry(name.clone()).or_insert_with(|| id.clone());
            if let Some(pkg) = &ctx.package {
                self.definitions
                    .entry(format!("{pkg}.{name}"))
                    .or_insert_with(|| id.clone());
            }

            self.emit_files(level, parsed, scope_node, &id, &scope, ctx, target, report);
            for child in &level.children {
                self.walk_ast_level(child, parsed, scope_node, Some(&id), ctx, target, report)?;
            }
        }
        Ok(())
    }

    /// Emit one file node per leaf definition, with origin taken from the
    /// construct's (comment-extended) byte range.
    #[allow(clippy::too_many_arguments)]
    fn emit_files(
        &self,
        level: &Level,
        parsed: &ParsedFile,
        scope_node: tree_sitter::Node<'_>,
        construct_id: &str,
        scope: &Value,
        ctx: &FileCtx,
        target: &mut BufferingTarget<'_>,
        report: &mut FileReport,
    ) {
        for leaf in &level.files {
            let file_name = match self.engine.render(&leaf.name, scope) {
                Ok(n) if !n.is_empty() => n,
                _ => continue,
            };
            let file_id = format!("{construct_id}/{file_name}");
            let (start, end) = extend_over_comments(scope_node, parsed.spec);
            let content = if leaf.content_template.is_empty() {
                parsed.source[start..end].to_vec()
            } else {
                match self.engine.render(&leaf.content_template, scope) {
                    Ok(text) => text.into_bytes(),
                    Err(e) => {
                        warn!(file = %file_id, error = %e, "content render failed");
                        continue;
                    }
                }
            };
            let mut file_node = Node::file(&file_id, NodeContent::Inline(content))
                .with_origin(SourceOrigin::new(&ctx.abs, start, end));
            if let Some(lang) = ctx.language {
                file_node = file_node.with_property(LANG_PROPERTY, lang.as_bytes());
            }
            target.insert_file(file_node);
            let _ = self.store.add_child(construct_id, &file_id);

            if file_name == SOURCE_LEAF {
                for token in reference_tokens(scope_node, &parsed.source) {
                    self.store.add_ref(&token, &file_id);
                    report.refs += 1;
                }
            }
        }
    }

    fn walk_json_level(
        &self,
        level: &Level,
        value: &Value,
        parent: Option<&str>,
        ctx: &FileCtx,
        target: &mut BufferingTarget<'_>,
        report: &mut FileReport,
    ) {
        let matches: Vec<Value> = if level.selector.is_empty() {
            vec![value.clone()]
        } else {
            self.path_backend.matches(value, &level.selector)
        };
        for m in matches {
            let mut scope_map = match &m {
                Value::Object(obj) => obj.clone(),
                other => {
                    let mut map = serde_json::Map::new();
                    map.insert("value".to_string(), other.clone());
                    map
                }
            };
            if let Value::Object(file_obj) = ctx.file_scope() {
                for (k, v) in file_obj {
                    scope_map.insert(k, v);
                }
            }
            let scope = Value::Object(scope_map);
            let name = match self.engine.render(&level.name_template, &scope) {
                Ok(n) if !n.is_empty() => n,
                _ => continue,
            };
            let name = self.dedup_name(parent, &name, &ctx.abs);
            let id = match self.insert_construct(parent, &name, ctx, target, report) {
                Ok(id) => id,
                Err(_) => continue,
            };
            self.definitions.entry(name.clone()).or_insert_with(|| id.clone());

            for leaf in &level.files {
                let file_name = match self.engine.render(&leaf.name, &scope) {
                    Ok(n) if !n.is_empty() => n,
                    _ => continue,
                };
                let content = match self.engine.render(&leaf.content_template, &scope) {
                    Ok(text) => text.into_bytes(),
                    Err(_) => continue,
                };
                let file_id = format!("{id}/{file_name}");
                target.insert_file(
                    Node::file(&file_id, NodeContent::Inline(content))
                        .with_origin(SourceOrigin::new(&ctx.abs, 0, ctx.size)),
                );
                let _ = self.store.add_child(&id, &file_id);
            }
            for child in &level.children {
                self.walk_json_level(child, &m, Some(&id), ctx, target, report);
            }
        }
    }

    /// Create (or merge into) a construct directory node.
    fn insert_construct(
        &self,
        parent: Option<&str>,
        name: &str,
        ctx: &FileCtx,
        target: &BufferingTarget<'_>,
        report: &mut FileReport,
    ) -> Result<String> {
        let id = match parent {
            Some(p) => format!("{p}/{name}"),
            None => name.to_string(),
        };
        let mut node = Node::dir(&id);
        if let Some(lang) = ctx.language {
            node = node.with_property(LANG_PROPERTY, lang.as_bytes());
        }
        if let Some(pkg) = &ctx.package {
            node = node.with_property(PACKAGE_PROPERTY, pkg.as_bytes());
        }
        if !ctx.context.is_empty() {
            node = node.with_property(CONTEXT_PROPERTY, ctx.context.clone());
        }
        target.insert_dir(node);
        report.constructs += 1;
        Ok(id)
    }

    /// If a node with this identifier already has file children produced by
    /// another source file, derive a suffixed name: dots→underscores,
    /// prefixed by `.from_`.
    fn dedup_name(&self, parent: Option<&str>, name: &str, current_file: &Path) -> String {
        let id = match parent {
            Some(p) => format!("{p}/{name}"),
            None => name.to_string(),
        };
        let Ok(existing) = self.store.get_node(&id) else { return name.to_string() };
        if !existing.is_dir() {
            return name.to_string();
        }
        let foreign = existing.children.iter().any(|c| {
            self.store
                .get_node(c)
                .is_ok_and(|n| !n.is_dir() && n.origin.as_ref().is_some_and(|o| o.file_path != current_file))
        });
        if !foreign {
            return name.to_string();
        }
        let suffix = file_name_of(current_file).replace('.', "_");
        format!("{name}.from_{suffix}")
    }

    /// Route a file's raw bytes into the fallback grouping directory.
    fn fallback_file(&self, abs: &Path, source: Vec<u8>) {
        self.store.add_root(Node::dir(FALLBACK_DIR));
        let len = source.len();
        let id = format!("{FALLBACK_DIR}/{}", file_name_of(abs));
        let node = Node::file(&id, NodeContent::Inline(source))
            .with_origin(SourceOrigin::new(abs, 0, len));
        let _ = self.store.add_child(FALLBACK_DIR, &id);
        self.store.replace_file_nodes(abs, vec![node]);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn file_name_of(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

fn stem_of(path: &Path) -> String {
    path.file_stem().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

fn first_selector(level: &Level) -> Option<&str> {
    if !level.selector.is_empty() {
        return Some(&level.selector);
    }
    level.children.iter().find_map(first_selector)
}

/// Languages eligible for ingestion, exposed for adapters that pre-filter.
pub fn supported_extensions() -> HashSet<&'static str> {
    let mut exts = HashSet::new();
    for lang in ["rs", "ts", "tsx", "js", "py", "go", "c", "h", "cpp", "java", "json"] {
        exts.insert(lang);
    }
    exts
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
