//! Tree-walking evaluator over a fixed, flat binding environment.

use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use super::ast::{BinOp, Expr, Literal, UnOp};

/// The flat binding environment an expression evaluates against: attribute
/// keys (`"nodeName.attrName"`), plus the well-known reserved
/// `errorCount`/`errors`/`activeState` bindings (§4.1).
pub type Env = FxHashMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("type error: {0}")]
    Type(String),
    #[error("division by zero")]
    DivideByZero,
}

/// Evaluates an already-parsed expression to a JSON value.
///
/// Unknown identifiers evaluate to `null` rather than failing (spec §9:
/// "reject unknown identifiers to a warning, evaluating them as null").
pub fn evaluate(expr: &Expr, env: &Env) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(lit) => Ok(literal_to_value(lit)),
        Expr::Ident(name) => Ok(resolve_ident(name, env)),
        Expr::Unary { op, expr } => {
            let v = evaluate(expr, env)?;
            eval_unary(*op, v)
        }
        Expr::Binary { op, left, right } => {
            let l = evaluate(left, env)?;
            let r = evaluate(right, env)?;
            eval_binary(*op, l, r)
        }
    }
}

fn literal_to_value(lit: &Literal) -> Value {
    match lit {
        Literal::Int(n) => Value::from(*n),
        Literal::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
        Literal::Str(s) => Value::String(s.clone()),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Null => Value::Null,
    }
}

/// Resolves an identifier, trying a direct flat-map lookup first (covering
/// the common `"a.x"` dotted-key case), then falling back to splitting on the
/// first `.` and indexing into a structured binding's field. Unresolvable
/// names evaluate to `null`, with a warning logged.
fn resolve_ident(name: &str, env: &Env) -> Value {
    if let Some(v) = env.get(name) {
        return v.clone();
    }
    if let Some((head, rest)) = name.split_once('.') {
        if let Some(base) = env.get(head) {
            if let Some(v) = base.pointer(&format!("/{}", rest.replace('.', "/"))) {
                return v.clone();
            }
        }
    }
    warn!(identifier = name, "unknown identifier in expression, evaluating as null");
    Value::Null
}

fn eval_unary(op: UnOp, v: Value) -> Result<Value, EvalError> {
    match op {
        UnOp::Not => Ok(Value::Bool(!truthy(&v))),
        UnOp::Neg => match v {
            Value::Number(n) if n.is_i64() => Ok(Value::from(-n.as_i64().unwrap())),
            Value::Number(n) if n.is_f64() => Ok(Value::from(-n.as_f64().unwrap())),
            other => Err(EvalError::Type(format!("cannot negate {other}"))),
        },
    }
}

fn eval_binary(op: BinOp, l: Value, r: Value) -> Result<Value, EvalError> {
    use BinOp::*;
    match op {
        Or => Ok(Value::Bool(truthy(&l) || truthy(&r))),
        And => Ok(Value::Bool(truthy(&l) && truthy(&r))),
        Eq => Ok(Value::Bool(l == r)),
        NotEq => Ok(Value::Bool(l != r)),
        Lt | LtEq | Gt | GtEq => compare(op, &l, &r),
        Add => add(l, r),
        Sub | Mul | Div | Mod => arithmetic(op, l, r),
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn as_f64(v: &Value) -> Result<f64, EvalError> {
    v.as_f64()
        .ok_or_else(|| EvalError::Type(format!("expected number, got {v}")))
}

fn compare(op: BinOp, l: &Value, r: &Value) -> Result<Value, EvalError> {
    if let (Value::String(a), Value::String(b)) = (l, r) {
        let ord = a.cmp(b);
        return Ok(Value::Bool(match op {
            BinOp::Lt => ord.is_lt(),
            BinOp::LtEq => ord.is_le(),
            BinOp::Gt => ord.is_gt(),
            BinOp::GtEq => ord.is_ge(),
            _ => unreachable!(),
        }));
    }
    let a = as_f64(l)?;
    let b = as_f64(r)?;
    Ok(Value::Bool(match op {
        BinOp::Lt => a < b,
        BinOp::LtEq => a <= b,
        BinOp::Gt => a > b,
        BinOp::GtEq => a >= b,
        _ => unreachable!(),
    }))
}

/// `+` doubles as string concatenation, per spec §4.1.
fn add(l: Value, r: Value) -> Result<Value, EvalError> {
    match (&l, &r) {
        (Value::String(_), _) | (_, Value::String(_)) => {
            Ok(Value::String(format!("{}{}", display(&l), display(&r))))
        }
        _ => {
            let a = as_f64(&l)?;
            let b = as_f64(&r)?;
            Ok(number_value(a + b))
        }
    }
}

fn arithmetic(op: BinOp, l: Value, r: Value) -> Result<Value, EvalError> {
    let a = as_f64(&l)?;
    let b = as_f64(&r)?;
    let result = match op {
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(EvalError::DivideByZero);
            }
            a / b
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(EvalError::DivideByZero);
            }
            a % b
        }
        _ => unreachable!(),
    };
    Ok(number_value(result))
}

fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
    }
}

/// Stringification used by both `+` concatenation and template resolution:
/// `""` for null, canonical JSON text for structured values, plain text otherwise.
#[must_use]
pub fn display(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(v).unwrap_or_default(),
    }
}
