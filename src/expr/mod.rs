//! The expression sandbox (spec §4.1): fail-closed boolean guards and
//! `{{ }}` template resolution over a flat, fixed binding environment.
//!
//! A small hand-rolled AST-enum interpreter (`Expr` enum with
//! `Literal`/`Identifier`/binary variants): a tokenizer ([`lexer`]), a
//! recursive-descent precedence-climbing parser ([`parser`]), and a
//! tree-walking evaluator ([`eval`]). No third-party crate offers an
//! embeddable expression language for this, so the sandbox is hand-rolled,
//! per the design note (§9): "replace any unbounded host-expression
//! evaluator with a small recursive-descent parser + tree-walking evaluator
//! over a fixed environment."

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

pub use eval::Env;

use tracing::warn;

/// Maximum source length accepted by the parser; longer expressions are
/// rejected before tokenization (fail-closed, logged).
pub const MAX_EXPR_LEN: usize = 2048;

/// Maximum AST depth accepted after parsing; deeper trees are rejected
/// before evaluation (fail-closed, logged).
pub const MAX_AST_DEPTH: usize = 64;

/// Evaluates a guard expression to a boolean. Any parse or evaluation
/// failure — including exceeding [`MAX_EXPR_LEN`]/[`MAX_AST_DEPTH`] — yields
/// `false` and is logged at `warn` level. An absent guard is `true` by
/// convention at the call site ([`crate::runtime`]), not here.
#[must_use]
pub fn evaluate_guard(expr: &str, env: &Env) -> bool {
    match evaluate_checked(expr, env) {
        Ok(value) => truthy(&value),
        Err(reason) => {
            warn!(expr, reason = %reason, "guard evaluation failed, treating as false");
            false
        }
    }
}

/// Resolves every `{{ expr }}` placeholder in `template` against `env`.
///
/// Each placeholder is replaced by the string form of its value (`""` for
/// null, canonical JSON text for structured values, plain text otherwise). A
/// placeholder that fails to parse or evaluate is left verbatim (including
/// its `{{ }}` delimiters) and a warning is logged; the rest of the template
/// still renders.
#[must_use]
pub fn resolve_template(template: &str, env: &Env) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            // No closing delimiter: preserve the remainder verbatim.
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let inner = after_open[..end].trim();
        match evaluate_checked(inner, env) {
            Ok(value) => out.push_str(&eval::display(&value)),
            Err(reason) => {
                warn!(placeholder = inner, reason = %reason, "template placeholder failed, preserving verbatim");
                out.push_str("{{");
                out.push_str(&after_open[..end]);
                out.push_str("}}");
            }
        }
        rest = &after_open[end + 2..];
    }
    out.push_str(rest);
    out
}

fn evaluate_checked(expr: &str, env: &Env) -> Result<serde_json::Value, String> {
    if expr.len() > MAX_EXPR_LEN {
        return Err(format!("expression exceeds max length ({MAX_EXPR_LEN})"));
    }
    let ast = parser::parse(expr).map_err(|e| e.to_string())?;
    if ast.depth() > MAX_AST_DEPTH {
        return Err(format!("expression exceeds max depth ({MAX_AST_DEPTH})"));
    }
    eval::evaluate(&ast, env).map_err(|e| e.to_string())
}

fn truthy(v: &serde_json::Value) -> bool {
    match v {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}
