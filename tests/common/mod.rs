//! Shared scaffolding for the scenario tests: a minimal expression
//! evaluator and a few `Program` construction helpers.
//!
//! This crate never parses the DSL itself — `Expr` is an opaque
//! `serde_json::Value` handed to an external `ExpressionEvaluator`. These
//! tests stand in for that external parser with a tiny tagged-object
//! grammar (`{"op": "...", ...}`) just expressive enough to drive the
//! scenarios below.
#![allow(dead_code)]

use std::sync::Arc;

use reqon::executor::context::ActionContext;
use reqon::program::{Expr, ExprError, ExpressionEvaluator};
use reqon::value::Value;

pub struct TestEvaluator;

impl ExpressionEvaluator for TestEvaluator {
    fn evaluate(&self, expr: &Expr, ctx: &ActionContext, current: Option<&Value>) -> Result<Value, ExprError> {
        let op = expr.get("op").and_then(|v| v.as_str()).ok_or_else(|| ExprError::Other("missing op".to_string()))?;
        match op {
            "lit" => {
                let raw = expr.get("value").cloned().unwrap_or(serde_json::Value::Null);
                Ok(Value::from_json(raw))
            }
            "current" => Ok(current.cloned().unwrap_or(Value::Null)),
            "field" => {
                let path = expr.get("path").and_then(|v| v.as_str()).unwrap_or_default();
                Ok(current.and_then(|c| c.get_path(path)).cloned().unwrap_or(Value::Null))
            }
            "var" => {
                let name = expr.get("name").and_then(|v| v.as_str()).ok_or_else(|| ExprError::Other("var needs name".to_string()))?;
                ctx.lookup_variable(name).cloned().ok_or_else(|| ExprError::UnresolvedIdentifier(name.to_string()))
            }
            "get" => {
                let from = expr.get("from").ok_or_else(|| ExprError::Other("get needs from".to_string()))?;
                let path = expr.get("path").and_then(|v| v.as_str()).unwrap_or_default();
                let base = self.evaluate(from, ctx, current)?;
                Ok(base.get_path(path).cloned().unwrap_or(Value::Null))
            }
            "len" => {
                let of = expr.get("of").ok_or_else(|| ExprError::Other("len needs of".to_string()))?;
                let value = self.evaluate(of, ctx, current)?;
                let len = match &value {
                    Value::List(items) => items.len(),
                    Value::Object(fields) => fields.len(),
                    _ => 0,
                };
                Ok(Value::Int(len as i64))
            }
            "eq" => {
                let a = expr.get("a").ok_or_else(|| ExprError::Other("eq needs a".to_string()))?;
                let b = expr.get("b").ok_or_else(|| ExprError::Other("eq needs b".to_string()))?;
                let left = self.evaluate(a, ctx, current)?;
                let right = self.evaluate(b, ctx, current)?;
                Ok(Value::Bool(left.values_equal(&right)))
            }
            "lt" => {
                let a = expr.get("a").ok_or_else(|| ExprError::Other("lt needs a".to_string()))?;
                let b = expr.get("b").ok_or_else(|| ExprError::Other("lt needs b".to_string()))?;
                let left = self.evaluate(a, ctx, current)?;
                let right = self.evaluate(b, ctx, current)?;
                let ordering = left.partial_compare(&right).ok_or_else(|| ExprError::Other("values not comparable".to_string()))?;
                Ok(Value::Bool(ordering == std::cmp::Ordering::Less))
            }
            "add" => {
                let a = expr.get("a").ok_or_else(|| ExprError::Other("add needs a".to_string()))?;
                let b = expr.get("b").ok_or_else(|| ExprError::Other("add needs b".to_string()))?;
                let left = self.evaluate(a, ctx, current)?;
                let right = self.evaluate(b, ctx, current)?;
                left.add(&right).map_err(|e| ExprError::Other(e.to_string()))
            }
            other => Err(ExprError::Other(format!("unsupported test op '{other}'"))),
        }
    }
}

pub fn lit(value: serde_json::Value) -> Expr {
    serde_json::json!({ "op": "lit", "value": value })
}

pub fn field(path: &str) -> Expr {
    serde_json::json!({ "op": "field", "path": path })
}

pub fn var(name: &str) -> Expr {
    serde_json::json!({ "op": "var", "name": name })
}

pub fn get(from: Expr, path: &str) -> Expr {
    serde_json::json!({ "op": "get", "from": from, "path": path })
}

pub fn current() -> Expr {
    serde_json::json!({ "op": "current" })
}

pub fn len_is_zero(of: Expr) -> Expr {
    serde_json::json!({ "op": "eq", "a": { "op": "len", "of": of }, "b": { "op": "lit", "value": 0 } })
}

pub fn eq(a: Expr, b: Expr) -> Expr {
    serde_json::json!({ "op": "eq", "a": a, "b": b })
}

pub fn lt(a: Expr, b: Expr) -> Expr {
    serde_json::json!({ "op": "lt", "a": a, "b": b })
}

pub fn add(a: Expr, b: Expr) -> Expr {
    serde_json::json!({ "op": "add", "a": a, "b": b })
}

#[allow(dead_code)]
pub fn evaluator() -> Arc<dyn ExpressionEvaluator> {
    Arc::new(TestEvaluator)
}
