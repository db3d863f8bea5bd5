//! tree-sitter AST backend: parsing, selector queries, syntax validation,
//! per-file context extraction, and reference-token collection.
//!
//! Selectors whose syntactic form starts with `(` compile to tree-sitter
//! queries; the `@scope` capture names the construct's byte range and is
//! what origins are built from.

use serde_json::Value;
use std::collections::BTreeSet;
use streaming_iterator::StreamingIterator;
use tree_sitter::{Language, Parser, Query, QueryCursor, Tree};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Language registry
// ---------------------------------------------------------------------------

/// Static description of one supported grammar.
pub struct LanguageSpec {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
    /// Node kinds treated as comments when extending origins backward.
    pub comment_kinds: &'static [&'static str],
    /// Top-level node kinds collected into the per-file context blob.
    pub context_kinds: &'static [&'static str],
    /// Node kind of the package declaration, for languages that have one.
    pub package_kind: Option<&'static str>,
    language: fn() -> Language,
}

impl LanguageSpec {
    pub fn language(&self) -> Language {
        (self.language)()
    }
}

fn lang_rust() -> Language {
    tree_sitter_rust::LANGUAGE.into()
}
fn lang_typescript() -> Language {
    tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
}
fn lang_javascript() -> Language {
    tree_sitter_javascript::LANGUAGE.into()
}
fn lang_python() -> Language {
    tree_sitter_python::LANGUAGE.into()
}
fn lang_go() -> Language {
    tree_sitter_go::LANGUAGE.into()
}
fn lang_c() -> Language {
    tree_sitter_c::LANGUAGE.into()
}
fn lang_cpp() -> Language {
    tree_sitter_cpp::LANGUAGE.into()
}
fn lang_java() -> Language {
    tree_sitter_java::LANGUAGE.into()
}

static LANGUAGES: &[LanguageSpec] = &[
    LanguageSpec {
        name: "rust",
        extensions: &["rs"],
        comment_kinds: &["line_comment", "block_comment"],
        context_kinds: &["use_declaration", "const_item", "static_item", "extern_crate_declaration"],
        package_kind: None,
        language: lang_rust,
    },
    LanguageSpec {
        name: "typescript",
        extensions: &["ts", "tsx"],
        comment_kinds: &["comment"],
        context_kinds: &["import_statement", "lexical_declaration", "variable_declaration"],
        package_kind: None,
        language: lang_typescript,
    },
    LanguageSpec {
        name: "javascript",
        extensions: &["js", "jsx", "mjs", "cjs"],
        comment_kinds: &["comment"],
        context_kinds: &["import_statement", "lexical_declaration", "variable_declaration"],
        package_kind: None,
        language: lang_javascript,
    },
    LanguageSpec {
        name: "python",
        extensions: &["py", "pyi"],
        comment_kinds: &["comment"],
        context_kinds: &["import_statement", "import_from_statement"],
        package_kind: None,
        language: lang_python,
    },
    LanguageSpec {
        name: "go",
        extensions: &["go"],
        comment_kinds: &["comment"],
        context_kinds: &["package_clause", "import_declaration", "var_declaration", "const_declaration"],
        package_kind: Some("package_clause"),
        language: lang_go,
    },
    LanguageSpec {
        name: "c",
        extensions: &["c", "h"],
        comment_kinds: &["comment"],
        context_kinds: &["preproc_include", "declaration"],
        package_kind: None,
        language: lang_c,
    },
    LanguageSpec {
        name: "cpp",
        extensions: &["cpp", "cc", "cxx", "hpp", "hh", "hxx"],
        comment_kinds: &["comment"],
        context_kinds: &["preproc_include", "declaration", "using_declaration"],
        package_kind: None,
        language: lang_cpp,
    },
    LanguageSpec {
        name: "java",
        extensions: &["java"],
        comment_kinds: &["line_comment", "block_comment"],
        context_kinds: &["package_declaration", "import_declaration"],
        package_kind: Some("package_declaration"),
        language: lang_java,
    },
];

/// Map a file extension to its language, if supported.
pub fn language_for_ext(ext: &str) -> Option<&'static LanguageSpec> {
    LANGUAGES.iter().find(|l| l.extensions.contains(&ext))
}

/// Look up a language by its registered name.
pub fn language_by_name(name: &str) -> Option<&'static LanguageSpec> {
    LANGUAGES.iter().find(|l| l.name == name)
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// A parsed source file; the tree borrows nothing, the source is owned.
pub struct ParsedFile {
    pub tree: Tree,
    pub source: Vec<u8>,
    pub spec: &'static LanguageSpec,
}

/// Parse a file with the grammar for `spec`.
pub fn parse(source: Vec<u8>, spec: &'static LanguageSpec) -> Result<ParsedFile> {
    let mut parser = Parser::new();
    parser
        .set_language(&spec.language())
        .map_err(|e| Error::ParseFailure(format!("{}: {e}", spec.name)))?;
    let tree = parser
        .parse(&source, None)
        .ok_or_else(|| Error::ParseFailure(format!("{} parser returned no tree", spec.name)))?;
    Ok(ParsedFile { tree, source, spec })
}

/// A single syntax problem reported by validation.
#[derive(Debug, Clone)]
pub struct SyntaxIssue {
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
    pub message: String,
}

impl std::fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "syntax error at line {}, column {}: {}", self.line, self.column, self.message)
    }
}

impl ParsedFile {
    pub fn root(&self) -> tree_sitter::Node<'_> {
        self.tree.root_node()
    }

    pub fn text(&self, node: tree_sitter::Node<'_>) -> &str {
        node.utf8_text(&self.source).unwrap_or("")
    }

    /// Collect ERROR and MISSING nodes.
    pub fn syntax_errors(&self) -> Vec<SyntaxIssue> {
        let mut issues = Vec::new();
        if !self.root().has_error() {
            return issues;
        }
        collect_errors(self.root(), &mut issues);
        issues
    }

    /// One blob of the file's semantic surroundings: package declaration,
    /// imports, and top-level constants/variables, in source order.
    pub fn context_blob(&self) -> Vec<u8> {
        let mut parts: Vec<&str> = Vec::new();
        let root = self.root();
        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            if self.spec.context_kinds.contains(&child.kind()) {
                parts.push(self.text(child));
            }
        }
        parts.join("\n").into_bytes()
    }

    /// The declared package name, for languages with a notion of package.
    pub fn package_name(&self) -> Option<String> {
        let kind = self.spec.package_kind?;
        let root = self.root();
        let mut cursor = root.walk();
        let decl = root.children(&mut cursor).find(|c| c.kind() == kind)?;
        let text = self.text(decl);
        let name = text
            .trim_start_matches("package")
            .trim()
            .trim_end_matches(';')
            .trim();
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }
}

fn collect_errors(node: tree_sitter::Node<'_>, out: &mut Vec<SyntaxIssue>) {
    if node.is_error() || node.is_missing() {
        let pos = node.start_position();
        out.push(SyntaxIssue {
            line: pos.row + 1,
            column: pos.column + 1,
            message: if node.is_missing() {
                format!("missing {}", node.kind())
            } else {
                "unexpected tokens".to_string()
            },
        });
        return;
    }
    if !node.has_error() {
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_errors(child, out);
    }
}

/// Validate a write-back payload with the grammar registered under
/// `lang_name`. Unknown languages pass validation.
pub fn validate_snippet(lang_name: &str, bytes: &[u8]) -> Vec<SyntaxIssue> {
    let Some(spec) = language_by_name(lang_name) else { return Vec::new() };
    match parse(bytes.to_vec(), spec) {
        Ok(parsed) => parsed.syntax_errors(),
        Err(e) => vec![SyntaxIssue { line: 1, column: 1, message: e.to_string() }],
    }
}

// ---------------------------------------------------------------------------
// Selector queries
// ---------------------------------------------------------------------------

/// A compiled AST selector.
#[derive(Debug)]
pub struct Selector {
    query: Query,
    scope_idx: Option<u32>,
}

/// One selector match: capture texts plus the `@scope` node, if captured.
pub struct AstMatch<'t> {
    pub captures: serde_json::Map<String, Value>,
    pub scope: Option<tree_sitter::Node<'t>>,
}

/// Compile an AST query. A failure here means the selector targets a
/// different grammar than the file's; callers route such files to the
/// fallback grouping directory.
pub fn compile_selector(selector: &str, spec: &'static LanguageSpec) -> Result<Selector> {
    let query = Query::new(&spec.language(), selector)
        .map_err(|e| Error::SchemaMismatch(format!("{} selector `{selector}`: {e}", spec.name)))?;
    let scope_idx = query.capture_index_for_name("scope");
    Ok(Selector { query, scope_idx })
}

impl Selector {
    /// Run the query under `node`, collecting capture texts per match.
    pub fn matches<'t>(
        &self,
        node: tree_sitter::Node<'t>,
        source: &'t [u8],
    ) -> Vec<AstMatch<'t>> {
        let mut cursor = QueryCursor::new();
        let mut out = Vec::new();
        let names = self.query.capture_names();
        let mut it = cursor.matches(&self.query, node, source);
        while let Some(m) = it.next() {
            let mut captures = serde_json::Map::new();
            let mut scope = None;
            for cap in m.captures {
                let name = names[cap.index as usize];
                let text = cap.node.utf8_text(source).unwrap_or("").to_string();
                captures.insert(name.to_string(), Value::String(text));
                if Some(cap.index) == self.scope_idx {
                    scope = Some(cap.node);
                }
            }
            out.push(AstMatch { captures, scope });
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Origin extension and reference tokens
// ---------------------------------------------------------------------------

/// Extend a construct's byte range backward over adjacent preceding
/// comments. A comment is adjacent when the gap to the construct (or to the
/// previously absorbed comment) is at most 2 bytes.
pub fn extend_over_comments(
    scope: tree_sitter::Node<'_>,
    spec: &LanguageSpec,
) -> (usize, usize) {
    let mut start = scope.start_byte();
    let end = scope.end_byte();
    let mut prev = scope.prev_sibling();
    while let Some(sib) = prev {
        if !spec.comment_kinds.contains(&sib.kind()) {
            break;
        }
        if start.saturating_sub(sib.end_byte()) > 2 {
            break;
        }
        start = sib.start_byte();
        prev = sib.prev_sibling();
    }
    (start, end)
}

const IDENTIFIER_KINDS: &[&str] = &[
    "identifier",
    "type_identifier",
    "field_identifier",
    "property_identifier",
    "shorthand_property_identifier",
    "package_identifier",
];

/// Deduplicated, sorted list of identifier tokens mentioned inside a scope.
pub fn reference_tokens(scope: tree_sitter::Node<'_>, source: &[u8]) -> Vec<String> {
    let mut tokens = BTreeSet::new();
    collect_tokens(scope, source, &mut tokens);
    tokens.into_iter().collect()
}

fn collect_tokens(node: tree_sitter::Node<'_>, source: &[u8], out: &mut BTreeSet<String>) {
    if IDENTIFIER_KINDS.contains(&node.kind()) {
        if let Ok(text) = node.utf8_text(source) {
            if !text.is_empty() {
                out.insert(text.to_string());
            }
        }
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_tokens(child, source, out);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
