//! Deterministic template renderer.
//!
//! The substitution language is deliberately tiny: variable expansion with
//! an optional format spec, boolean/presence conditionals, and iteration
//! over the fixed `bars` sequence. No expressions, no arithmetic, no
//! user-defined helpers. Identical context and template bytes produce
//! byte-identical output on every platform; line endings are LF.
//!
//! Syntax:
//! ```text
//! {{ key }}            value with its natural formatting
//! {{ key:04x }}        zero-padded lowercase hex, width 4
//! {{ key:06X }}        zero-padded uppercase hex, width 6
//! {{ key:d }}          decimal
//! {{ key:lower }}      lowercased string
//! {% if key %} ... {% else %} ... {% endif %}
//! {% for bar in bars %} ... {% endfor %}
//! ```

use crate::context::{RenderContext, Value};
use pciforge_core::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Var { key: String, spec: Option<String> },
    If { key: String, then: Vec<Node>, els: Vec<Node> },
    For { binding: String, seq: String, body: Vec<Node> },
}

/// A parsed template, reusable across renders.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(name: &str, source: &str) -> Result<Self> {
        let mut parser = Parser {
            name,
            rest: source,
        };
        let nodes = parser.parse_nodes(&[])?;
        Ok(Self {
            name: name.to_string(),
            nodes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render against a context. Every referenced key must be declared;
    /// an unknown key is a hard [`Error::TemplateRender`].
    pub fn render(&self, ctx: &RenderContext) -> Result<String> {
        let mut out = String::new();
        render_nodes(&self.name, &self.nodes, ctx, None, &mut out)?;
        // Normalize line endings once, at the boundary.
        if out.contains('\r') {
            out = out.replace("\r\n", "\n").replace('\r', "\n");
        }
        Ok(out)
    }

    /// All context keys this template can reference. Keys under a `for`
    /// binding are expanded over the fixed sequence length.
    pub fn referenced_keys(&self, seq_len: u64) -> Vec<String> {
        let mut keys = Vec::new();
        collect_keys(&self.nodes, None, seq_len, &mut keys);
        keys.sort();
        keys.dedup();
        keys
    }
}

struct Parser<'a> {
    name: &'a str,
    rest: &'a str,
}

impl<'a> Parser<'a> {
    fn err(&self, reason: impl Into<String>) -> Error {
        Error::TemplateRender {
            template: self.name.to_string(),
            reason: reason.into(),
        }
    }

    /// Parse until one of `terminators` (block keywords) or end of input.
    /// Returns the nodes; the terminator itself is left for the caller to
    /// consume via `take_tag`.
    fn parse_nodes(&mut self, terminators: &[&str]) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        loop {
            let var = self.rest.find("{{");
            let tag = self.rest.find("{%");
            let next = match (var, tag) {
                (Some(v), Some(t)) => v.min(t),
                (Some(v), None) => v,
                (None, Some(t)) => t,
                (None, None) => {
                    if !terminators.is_empty() {
                        return Err(self.err(format!(
                            "unterminated block, expected one of {terminators:?}"
                        )));
                    }
                    if !self.rest.is_empty() {
                        nodes.push(Node::Text(self.rest.to_string()));
                        self.rest = "";
                    }
                    return Ok(nodes);
                }
            };

            if next > 0 {
                nodes.push(Node::Text(self.rest[..next].to_string()));
                self.rest = &self.rest[next..];
            }

            if self.rest.starts_with("{{") {
                nodes.push(self.parse_var()?);
                continue;
            }

            // Peek the tag keyword without consuming; terminators belong to
            // the enclosing block.
            let keyword = self.peek_tag_keyword()?;
            if terminators.contains(&keyword.as_str()) {
                return Ok(nodes);
            }
            match keyword.as_str() {
                "if" => nodes.push(self.parse_if()?),
                "for" => nodes.push(self.parse_for()?),
                other => return Err(self.err(format!("unknown tag '{other}'"))),
            }
        }
    }

    fn parse_var(&mut self) -> Result<Node> {
        let close = self
            .rest
            .find("}}")
            .ok_or_else(|| self.err("unterminated '{{'"))?;
        let inner = self.rest[2..close].trim();
        self.rest = &self.rest[close + 2..];

        let (key, spec) = match inner.split_once(':') {
            Some((key, spec)) => (key.trim(), Some(spec.trim().to_string())),
            None => (inner, None),
        };
        if key.is_empty() {
            return Err(self.err("empty variable reference"));
        }
        Ok(Node::Var {
            key: key.to_string(),
            spec,
        })
    }

    fn peek_tag_keyword(&self) -> Result<String> {
        let close = self
            .rest
            .find("%}")
            .ok_or_else(|| self.err("unterminated '{%'"))?;
        let inner = self.rest[2..close].trim();
        Ok(inner.split_whitespace().next().unwrap_or("").to_string())
    }

    /// Consume one `{% ... %}` tag and return its whitespace-split words.
    fn take_tag(&mut self) -> Result<Vec<String>> {
        let close = self
            .rest
            .find("%}")
            .ok_or_else(|| self.err("unterminated '{%'"))?;
        let inner = self.rest[2..close].trim().to_string();
        self.rest = &self.rest[close + 2..];
        let words: Vec<String> = inner.split_whitespace().map(str::to_string).collect();
        if words.is_empty() {
            return Err(self.err("empty '{%' tag"));
        }
        Ok(words)
    }

    fn parse_if(&mut self) -> Result<Node> {
        let words = self.take_tag()?;
        if words.len() != 2 {
            return Err(self.err("'if' takes exactly one key"));
        }
        let key = words[1].clone();

        let then = self.parse_nodes(&["else", "endif"])?;
        let mut els = Vec::new();
        let closing = self.take_tag()?;
        match closing[0].as_str() {
            "else" => {
                els = self.parse_nodes(&["endif"])?;
                let endif = self.take_tag()?;
                if endif[0] != "endif" {
                    return Err(self.err("expected 'endif'"));
                }
            }
            "endif" => {}
            other => return Err(self.err(format!("expected 'else' or 'endif', got '{other}'"))),
        }
        Ok(Node::If { key, then, els })
    }

    fn parse_for(&mut self) -> Result<Node> {
        let words = self.take_tag()?;
        if words.len() != 4 || words[2] != "in" {
            return Err(self.err("'for' syntax is: for <binding> in <sequence>"));
        }
        let binding = words[1].clone();
        let seq = words[3].clone();
        if seq != "bars" {
            return Err(self.err(format!("unknown sequence '{seq}', only 'bars' is iterable")));
        }

        let body = self.parse_nodes(&["endfor"])?;
        let endfor = self.take_tag()?;
        if endfor[0] != "endfor" {
            return Err(self.err("expected 'endfor'"));
        }
        Ok(Node::For { binding, seq, body })
    }
}

/// Active loop binding: references to `<binding>.x` resolve to `<seq>.<i>.x`.
struct LoopScope<'a> {
    binding: &'a str,
    seq: &'a str,
    index: u64,
}

fn resolve_key(key: &str, scope: Option<&LoopScope>) -> String {
    if let Some(scope) = scope {
        if let Some(field) = key.strip_prefix(scope.binding) {
            if let Some(field) = field.strip_prefix('.') {
                return format!("{}.{}.{}", scope.seq, scope.index, field);
            }
        }
    }
    key.to_string()
}

fn render_nodes(
    template: &str,
    nodes: &[Node],
    ctx: &RenderContext,
    scope: Option<&LoopScope>,
    out: &mut String,
) -> Result<()> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var { key, spec } => {
                let resolved = resolve_key(key, scope);
                let value = ctx.get(&resolved).ok_or_else(|| Error::TemplateRender {
                    template: template.to_string(),
                    reason: format!("undeclared key '{resolved}'"),
                })?;
                out.push_str(&format_value(template, &resolved, value, spec.as_deref())?);
            }
            Node::If { key, then, els } => {
                let resolved = resolve_key(key, scope);
                let value = ctx.get(&resolved).ok_or_else(|| Error::TemplateRender {
                    template: template.to_string(),
                    reason: format!("undeclared key '{resolved}' in condition"),
                })?;
                let branch = if value.truthy() { then } else { els };
                render_nodes(template, branch, ctx, scope, out)?;
            }
            Node::For { binding, seq, body } => {
                let len_key = format!("{seq}.len");
                let len = match ctx.get(&len_key) {
                    Some(Value::UInt(n)) => *n,
                    _ => {
                        return Err(Error::TemplateRender {
                            template: template.to_string(),
                            reason: format!("sequence '{seq}' has no length key"),
                        })
                    }
                };
                for index in 0..len {
                    let inner = LoopScope {
                        binding,
                        seq,
                        index,
                    };
                    render_nodes(template, body, ctx, Some(&inner), out)?;
                }
            }
        }
    }
    Ok(())
}

fn format_value(template: &str, key: &str, value: &Value, spec: Option<&str>) -> Result<String> {
    let bad_spec = |reason: String| Error::TemplateRender {
        template: template.to_string(),
        reason,
    };

    match spec {
        None => Ok(match value {
            Value::Str(s) => s.clone(),
            Value::UInt(n) => n.to_string(),
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Null => String::new(),
        }),
        Some("d") => match value {
            Value::UInt(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
            _ => Err(bad_spec(format!("key '{key}' is not numeric, cannot apply ':d'"))),
        },
        Some("lower") => match value {
            Value::Str(s) => Ok(s.to_lowercase()),
            _ => Err(bad_spec(format!("key '{key}' is not a string, cannot apply ':lower'"))),
        },
        Some("upper") => match value {
            Value::Str(s) => Ok(s.to_uppercase()),
            _ => Err(bad_spec(format!("key '{key}' is not a string, cannot apply ':upper'"))),
        },
        Some(spec) => {
            // Hex with optional zero-pad width: "x", "04x", "06X".
            if spec.is_empty() || !spec.is_ascii() {
                return Err(bad_spec(format!("bad format spec '{spec}' for key '{key}'")));
            }
            let (width, radix) = spec.split_at(spec.len() - 1);
            let width: usize = if width.is_empty() {
                0
            } else {
                width
                    .parse()
                    .map_err(|_| bad_spec(format!("bad format spec '{spec}' for key '{key}'")))?
            };
            let n = match value {
                Value::UInt(n) => *n,
                _ => {
                    return Err(bad_spec(format!(
                        "key '{key}' is not numeric, cannot apply ':{spec}'"
                    )))
                }
            };
            match radix {
                "x" => Ok(format!("{n:0width$x}")),
                "X" => Ok(format!("{n:0width$X}")),
                _ => Err(bad_spec(format!("bad format spec '{spec}' for key '{key}'"))),
            }
        }
    }
}

fn collect_keys(nodes: &[Node], scope: Option<(&str, &str)>, seq_len: u64, keys: &mut Vec<String>) {
    let expand = |key: &str, keys: &mut Vec<String>| {
        if let Some((binding, seq)) = scope {
            if let Some(field) = key.strip_prefix(binding) {
                if let Some(field) = field.strip_prefix('.') {
                    for i in 0..seq_len {
                        keys.push(format!("{seq}.{i}.{field}"));
                    }
                    return;
                }
            }
        }
        keys.push(key.to_string());
    };

    for node in nodes {
        match node {
            Node::Text(_) => {}
            Node::Var { key, .. } => expand(key, keys),
            Node::If { key, then, els } => {
                expand(key, keys);
                collect_keys(then, scope, seq_len, keys);
                collect_keys(els, scope, seq_len, keys);
            }
            Node::For { binding, seq, body } => {
                keys.push(format!("{seq}.len"));
                collect_keys(body, Some((binding, seq)), seq_len, keys);
            }
        }
    }
}
