//! Minimum template language for node names and file content.
//!
//! `{{ … }}` expressions over a JSON scope: dotted field paths plus the
//! three helpers `json(v)`, `first(list)`, and `slice(s, start, end)`.
//! The renderer behind the projection is pluggable through
//! [`TemplateEngine`]; [`MiniTemplate`] is the built-in implementation.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::error::{Error, Result};

/// Delimiter that marks a name template as dynamic.
pub const TEMPLATE_OPEN: &str = "{{";

fn expr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^}]*)\}\}").unwrap())
}

// ---------------------------------------------------------------------------
// Engine seam
// ---------------------------------------------------------------------------

/// Renderer interface the projection engine programs against.
pub trait TemplateEngine: Send + Sync {
    /// Render a template against a JSON scope.
    fn render(&self, template: &str, scope: &Value) -> Result<String>;

    /// Dotted record-field paths the template reads. Paths produced by
    /// helper results (e.g. the `.value` in `first(xs).value`) are not
    /// record fields and are excluded.
    fn field_paths(&self, template: &str) -> Result<Vec<String>>;
}

/// True iff the template contains no `{{ … }}` delimiters.
pub fn is_static(template: &str) -> bool {
    !template.contains(TEMPLATE_OPEN)
}

// ---------------------------------------------------------------------------
// Expression AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    /// Dotted path into the scope.
    Path(Vec<String>),
    /// Integer literal (helper argument).
    Int(i64),
    /// Helper call with an optional postfix path applied to the result.
    Call { name: String, args: Vec<Expr>, postfix: Vec<String> },
}

#[derive(Debug, Clone)]
enum Seg {
    Literal(String),
    Expr(Expr),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    src: &'a str,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Parser { chars: src.chars().collect(), pos: 0, src }
    }

    fn err(&self, msg: &str) -> Error {
        Error::Template(format!("{msg} in expression `{}`", self.src))
    }

    fn skip_ws(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Option<String> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_alphabetic() || c == '_' => self.pos += 1,
            _ => return None,
        }
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        Some(self.chars[start..self.pos].iter().collect())
    }

    fn dotted(&mut self, first: String) -> Vec<String> {
        let mut segs = vec![first];
        while self.eat('.') {
            match self.ident() {
                Some(seg) => segs.push(seg),
                None => break,
            }
        }
        segs
    }

    fn int(&mut self) -> Option<i64> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start || (self.pos == start + 1 && self.chars[start] == '-') {
            self.pos = start;
            return None;
        }
        self.chars[start..self.pos].iter().collect::<String>().parse().ok()
    }

    fn expr(&mut self) -> Result<Expr> {
        self.skip_ws();
        if let Some(n) = self.int() {
            return Ok(Expr::Int(n));
        }
        let name = self.ident().ok_or_else(|| self.err("expected identifier"))?;
        self.skip_ws();
        if self.eat('(') {
            let mut args = Vec::new();
            self.skip_ws();
            if !self.eat(')') {
                loop {
                    args.push(self.expr()?);
                    self.skip_ws();
                    if self.eat(')') {
                        break;
                    }
                    if !self.eat(',') {
                        return Err(self.err("expected `,` or `)`"));
                    }
                }
            }
            let postfix = if self.eat('.') {
                let first = self.ident().ok_or_else(|| self.err("expected field after `.`"))?;
                self.dotted(first)
            } else {
                Vec::new()
            };
            Ok(Expr::Call { name, args, postfix })
        } else {
            Ok(Expr::Path(self.dotted(name)))
        }
    }

    fn parse_full(mut self) -> Result<Expr> {
        let expr = self.expr()?;
        self.skip_ws();
        if self.pos != self.chars.len() {
            return Err(self.err("trailing characters"));
        }
        Ok(expr)
    }
}

fn compile(template: &str) -> Result<Vec<Seg>> {
    let mut segs = Vec::new();
    let mut last = 0;
    for m in expr_re().find_iter(template) {
        if m.start() > last {
            segs.push(Seg::Literal(template[last..m.start()].to_string()));
        }
        let body = &template[m.start() + 2..m.end() - 2];
        segs.push(Seg::Expr(Parser::new(body).parse_full()?));
        last = m.end();
    }
    if last < template.len() {
        segs.push(Seg::Literal(template[last..].to_string()));
    }
    Ok(segs)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn lookup<'v>(scope: &'v Value, path: &[String]) -> &'v Value {
    let mut cur = scope;
    for seg in path {
        match cur.get(seg) {
            Some(v) => cur = v,
            None => return &Value::Null,
        }
    }
    cur
}

/// Scalar rendering: strings verbatim, null empty, everything else as JSON.
fn render_value(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn eval(expr: &Expr, scope: &Value) -> Result<Value> {
    match expr {
        Expr::Int(n) => Ok(Value::from(*n)),
        Expr::Path(path) => Ok(lookup(scope, path).clone()),
        Expr::Call { name, args, postfix } => {
            let vals: Vec<Value> =
                args.iter().map(|a| eval(a, scope)).collect::<Result<_>>()?;
            let out = match name.as_str() {
                "json" => {
                    let v = vals.first().cloned().unwrap_or(Value::Null);
                    Value::String(serde_json::to_string(&v)?)
                }
                "first" => match vals.first() {
                    Some(Value::Array(items)) => items.first().cloned().unwrap_or(Value::Null),
                    _ => Value::Null,
                },
                "slice" => {
                    let s = vals.first().map(render_value).unwrap_or_default();
                    let chars: Vec<char> = s.chars().collect();
                    let clamp = |v: &Value| -> usize {
                        v.as_i64().unwrap_or(0).max(0).min(chars.len() as i64) as usize
                    };
                    let start = vals.get(1).map(clamp).unwrap_or(0);
                    let end = vals.get(2).map(clamp).unwrap_or(chars.len());
                    if start >= end {
                        Value::String(String::new())
                    } else {
                        Value::String(chars[start..end].iter().collect())
                    }
                }
                other => return Err(Error::Template(format!("unknown helper `{other}`"))),
            };
            if postfix.is_empty() {
                Ok(out)
            } else {
                Ok(lookup(&out, postfix).clone())
            }
        }
    }
}

fn collect_paths(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Path(path) => out.push(path.join(".")),
        Expr::Int(_) => {}
        Expr::Call { args, .. } => {
            for a in args {
                collect_paths(a, out);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MiniTemplate
// ---------------------------------------------------------------------------

/// The built-in renderer implementing exactly the minimum template language.
#[derive(Default)]
pub struct MiniTemplate;

impl TemplateEngine for MiniTemplate {
    fn render(&self, template: &str, scope: &Value) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        for seg in compile(template)? {
            match seg {
                Seg::Literal(s) => out.push_str(&s),
                Seg::Expr(e) => out.push_str(&render_value(&eval(&e, scope)?)),
            }
        }
        Ok(out)
    }

    fn field_paths(&self, template: &str) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        for seg in compile(template)? {
            if let Seg::Expr(e) = seg {
                collect_paths(&e, &mut paths);
            }
        }
        paths.sort();
        paths.dedup();
        Ok(paths)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(t: &str, scope: &Value) -> String {
        MiniTemplate.render(t, scope).unwrap()
    }

    #[test]
    fn test_static_detection() {
        assert!(is_static("functions"));
        assert!(!is_static("{{name}}"));
        assert!(!is_static("prefix-{{a.b}}"));
    }

    #[test]
    fn test_field_reference() {
        let scope = json!({"item": {"cve": {"id": "CVE-2024-0001"}}});
        assert_eq!(render("{{item.cve.id}}", &scope), "CVE-2024-0001");
        assert_eq!(render("x-{{item.cve.id}}-y", &scope), "x-CVE-2024-0001-y");
    }

    #[test]
    fn test_missing_field_renders_empty() {
        let scope = json!({"a": 1});
        assert_eq!(render("{{b.c}}", &scope), "");
    }

    #[test]
    fn test_slice_helper() {
        let scope = json!({"published": "2024-01-15T00:00:00Z"});
        assert_eq!(render("{{slice(published, 0, 4)}}", &scope), "2024");
        assert_eq!(render("{{slice(published, 5, 7)}}", &scope), "01");
        // Clamping and inverted ranges.
        assert_eq!(render("{{slice(published, 0, 999)}}", &scope), "2024-01-15T00:00:00Z");
        assert_eq!(render("{{slice(published, 7, 5)}}", &scope), "");
        assert_eq!(render("{{slice(published, -3, 2)}}", &scope), "20");
    }

    #[test]
    fn test_first_helper_with_postfix() {
        let scope = json!({"descriptions": [{"value": "desc A"}, {"value": "desc B"}]});
        assert_eq!(render("{{first(descriptions).value}}", &scope), "desc A");
        let empty = json!({"descriptions": []});
        assert_eq!(render("{{first(descriptions).value}}", &empty), "");
    }

    #[test]
    fn test_json_helper() {
        let scope = json!({"tags": ["a", "b"]});
        assert_eq!(render("{{json(tags)}}", &scope), r#"["a","b"]"#);
        assert_eq!(render("{{json(missing)}}", &scope), "null");
    }

    #[test]
    fn test_unknown_helper_is_an_error() {
        let scope = json!({});
        assert!(MiniTemplate.render("{{upper(x)}}", &scope).is_err());
    }

    #[test]
    fn test_field_paths_exclude_helper_postfix() {
        let paths = MiniTemplate
            .field_paths("{{slice(item.cve.published, 0, 4)}}/{{first(item.cve.descriptions).value}}")
            .unwrap();
        assert_eq!(paths, vec!["item.cve.descriptions", "item.cve.published"]);
    }

    #[test]
    fn test_field_paths_dedup() {
        let paths = MiniTemplate.field_paths("{{a.b}}-{{a.b}}-{{c}}").unwrap();
        assert_eq!(paths, vec!["a.b", "c"]);
    }

    #[test]
    fn test_non_string_scalar_rendering() {
        let scope = json!({"n": 7, "b": true});
        assert_eq!(render("{{n}}/{{b}}", &scope), "7/true");
    }
}
