//! Write-back pipeline: validate → format → lint → splice → shift siblings
//! → update node → invalidate caches → publish diagnostic.
//!
//! Syntax-invalid writes are a firewall, not an error: the bytes are
//! stashed as a draft, a diagnostic is published under the parent
//! directory, and the write reports success to the protocol. Only
//! system-level failures (I/O on splice) surface as errors.

use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ast::validate_snippet;
use crate::error::{Error, Result};
use crate::facade::{read_to_vec, GraphReader};
use crate::ingest::SOURCE_LEAF;
use crate::node::{base_name, normalize_id, parent_id, SourceOrigin};
use crate::store::GraphStore;
use crate::vfs::{DiagnosticStore, KEY_AST_ERRORS, KEY_WRITE_STATUS, LANG_PROPERTY};

// ---------------------------------------------------------------------------
// Formatter and linter seams
// ---------------------------------------------------------------------------

/// Language-specific formatter hook. `None` means no formatter applies or
/// it failed; the original bytes pass through unchanged either way.
pub trait ContentFormatter: Send + Sync {
    fn format(&self, language: &str, bytes: &[u8]) -> Option<Vec<u8>>;
}

/// Formatter that never reformats.
pub struct NoopFormatter;

impl ContentFormatter for NoopFormatter {
    fn format(&self, _language: &str, _bytes: &[u8]) -> Option<Vec<u8>> {
        None
    }
}

/// Pipes bytes through an external formatter command (stdin → stdout).
#[derive(Default)]
pub struct CommandFormatter {
    commands: HashMap<String, Vec<String>>,
}

impl CommandFormatter {
    /// The stock bindings: `gofmt` for Go, `rustfmt` for Rust.
    pub fn new() -> Self {
        let mut commands = HashMap::new();
        commands.insert("go".to_string(), vec!["gofmt".to_string()]);
        commands.insert(
            "rust".to_string(),
            vec!["rustfmt".to_string(), "--emit".to_string(), "stdout".to_string()],
        );
        CommandFormatter { commands }
    }

    pub fn with_command(mut self, language: &str, argv: Vec<String>) -> Self {
        self.commands.insert(language.to_string(), argv);
        self
    }
}

impl ContentFormatter for CommandFormatter {
    fn format(&self, language: &str, bytes: &[u8]) -> Option<Vec<u8>> {
        let argv = self.commands.get(language)?;
        let (program, args) = argv.split_first()?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .ok()?;
        child.stdin.take()?.write_all(bytes).ok()?;
        let output = child.wait_with_output().ok()?;
        if output.status.success() && !output.stdout.is_empty() {
            Some(output.stdout)
        } else {
            None
        }
    }
}

/// Advisory linter hook; findings are recorded, never fail a write.
pub trait ContentLinter: Send + Sync {
    fn lint(&self, language: &str, bytes: &[u8]) -> Vec<String>;
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The edit was spliced into the source file.
    Applied,
    /// Validation rejected the bytes; they are held as a draft and the
    /// diagnostic surface explains why. The client still sees success.
    Rejected,
}

pub struct WritePipeline {
    store: Arc<GraphStore>,
    diags: Arc<DiagnosticStore>,
    formatter: Arc<dyn ContentFormatter>,
    linter: Option<Arc<dyn ContentLinter>>,
}

impl WritePipeline {
    pub fn new(store: Arc<GraphStore>, diags: Arc<DiagnosticStore>) -> Self {
        WritePipeline { store, diags, formatter: Arc::new(NoopFormatter), linter: None }
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn ContentFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn with_linter(mut self, linter: Arc<dyn ContentLinter>) -> Self {
        self.linter = Some(linter);
        self
    }

    pub fn diagnostics(&self) -> Arc<DiagnosticStore> {
        self.diags.clone()
    }

    /// Run the full pipeline for a closed writable node.
    pub fn commit(&self, node_id: &str, new_bytes: &[u8]) -> Result<WriteOutcome> {
        let id = normalize_id(node_id).to_string();
        let node = self.store.get_node(&id)?;
        let origin = node.origin.clone().ok_or_else(|| {
            Error::SpliceFailure(format!("node `{id}` has no source origin"))
        })?;
        let parent = parent_id(&id).unwrap_or("").to_string();
        let language = node
            .properties
            .get(LANG_PROPERTY)
            .and_then(|b| std::str::from_utf8(b).ok())
            .unwrap_or("")
            .to_string();

        // 1. Validate. Syntax errors stop here: draft + diagnostic, success
        //    to the caller, source file untouched.
        let issues = validate_snippet(&language, new_bytes);
        if !issues.is_empty() {
            self.store.stash_draft(&id, new_bytes.to_vec())?;
            self.diags.set(&parent, KEY_WRITE_STATUS, issues[0].to_string());
            let all: Vec<String> = issues.iter().map(|i| i.to_string()).collect();
            self.diags.set(&parent, KEY_AST_ERRORS, all.join("; "));
            debug!(node = %id, issues = issues.len(), "write rejected by validation");
            return Ok(WriteOutcome::Rejected);
        }

        // 2. Format; any failure passes the original through.
        let formatted =
            self.formatter.format(&language, new_bytes).unwrap_or_else(|| new_bytes.to_vec());

        // 3. Lint, advisory only.
        if let Some(linter) = &self.linter {
            let findings = linter.lint(&language, &formatted);
            if !findings.is_empty() {
                self.diags.set(&parent, KEY_AST_ERRORS, findings.join("; "));
            }
        }

        // 4. Splice into the source file.
        splice(&origin, &formatted)?;

        // 5. Shift siblings below the edit.
        let delta = formatted.len() as i64 - origin.len() as i64;
        if delta != 0 {
            self.store.shift_origins(&origin.file_path, origin.end, delta);
        }

        // 6–7. Update the node, drop stale caches.
        let new_origin = SourceOrigin::new(
            origin.file_path.clone(),
            origin.start,
            origin.start + formatted.len(),
        );
        self.store.apply_write(&id, formatted, new_origin)?;
        self.store.invalidate(&id);

        // 8. Publish.
        self.diags.set(&parent, KEY_WRITE_STATUS, "ok");
        Ok(WriteOutcome::Applied)
    }

    /// A filesystem-level remove on a writable node: a splice with empty
    /// new bytes, then the node itself goes away.
    pub fn remove(&self, node_id: &str) -> Result<()> {
        let id = normalize_id(node_id).to_string();
        let node = self.store.get_node(&id)?;
        let origin = node.origin.clone().ok_or_else(|| {
            Error::SpliceFailure(format!("node `{id}` has no source origin"))
        })?;
        splice(&origin, b"")?;
        if !origin.is_empty() {
            self.store.shift_origins(&origin.file_path, origin.end, -(origin.len() as i64));
        }
        self.store.remove_node(&id)?;
        self.store.invalidate(&id);
        if let Some(parent) = parent_id(&id) {
            self.diags.set(parent, KEY_WRITE_STATUS, "ok");
        }
        Ok(())
    }

    /// Start an open-for-write session on a writable node.
    ///
    /// The `source` leaf treats every non-append open as if truncation were
    /// requested; other leaves start from the current content.
    pub fn open_write(&self, node_id: &str, append: bool) -> Result<WriteSession<'_>> {
        let id = normalize_id(node_id).to_string();
        let node = self.store.get_node(&id)?;
        if node.origin.is_none() {
            return Err(Error::SpliceFailure(format!("node `{id}` is not writable")));
        }
        let buffer = if !append && base_name(&id) == SOURCE_LEAF {
            Vec::new()
        } else {
            read_to_vec(self.store.as_ref(), &id)?
        };
        Ok(WriteSession { pipeline: self, node_id: id, buffer, wrote: false })
    }
}

/// One open-for-write window over a node. Write-back fires on close only if
/// at least one write occurred, so a truncate-then-close sequence does not
/// erase source content.
pub struct WriteSession<'a> {
    pipeline: &'a WritePipeline,
    node_id: String,
    buffer: Vec<u8>,
    wrote: bool,
}

impl WriteSession<'_> {
    pub fn write_at(&mut self, offset: u64, data: &[u8]) {
        let offset = offset as usize;
        if self.buffer.len() < offset {
            self.buffer.resize(offset, 0);
        }
        let end = offset + data.len();
        if self.buffer.len() < end {
            self.buffer.resize(end, 0);
        }
        self.buffer[offset..end].copy_from_slice(data);
        self.wrote = true;
    }

    /// Close the session. Returns the pipeline outcome, or `None` when no
    /// write occurred and write-back did not fire.
    pub fn close(self) -> Result<Option<WriteOutcome>> {
        if !self.wrote {
            return Ok(None);
        }
        self.pipeline.commit(&self.node_id, &self.buffer).map(Some)
    }
}

// ---------------------------------------------------------------------------
// Splice
// ---------------------------------------------------------------------------

fn splice_err(origin: &SourceOrigin, e: impl std::fmt::Display) -> Error {
    Error::SpliceFailure(format!("{}: {e}", origin.file_path.display()))
}

/// Replace `origin`'s byte range with `new_bytes`: rebuild the file as
/// prefix + new + suffix, write it to a temporary in the same directory
/// with the original permissions, then rename over the original.
fn splice(origin: &SourceOrigin, new_bytes: &[u8]) -> Result<()> {
    let path = &origin.file_path;
    let source = fs::read(path).map_err(|e| splice_err(origin, e))?;
    if origin.end > source.len() {
        return Err(Error::SpliceFailure(format!(
            "{}: origin [{}, {}) exceeds file length {}",
            path.display(),
            origin.start,
            origin.end,
            source.len()
        )));
    }

    let mut out = Vec::with_capacity(source.len() - origin.len() + new_bytes.len());
    out.extend_from_slice(&source[..origin.start]);
    out.extend_from_slice(new_bytes);
    out.extend_from_slice(&source[origin.end..]);

    let tmp = temp_sibling(path)?;
    fs::write(&tmp, &out).map_err(|e| splice_err(origin, e))?;
    if let Ok(meta) = fs::metadata(path) {
        let _ = fs::set_permissions(&tmp, meta.permissions());
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        warn!(file = %path.display(), "splice rename failed");
        splice_err(origin, e)
    })?;
    Ok(())
}

fn temp_sibling(path: &Path) -> Result<std::path::PathBuf> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let dir = path
        .parent()
        .ok_or_else(|| Error::SpliceFailure(format!("{}: no parent directory", path.display())))?;
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    Ok(dir.join(format!(
        ".{name}.mache-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    )))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
