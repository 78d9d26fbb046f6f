//! The dynamic value universe expressions and steps operate on.
//!
//! Mirrors `{null, bool, int, float, string, list, object, date}` from the
//! data model. Kept as a tagged union rather than leaning on `serde_json::Value`
//! directly so arithmetic coercion and schema type names have one home instead
//! of being reimplemented at every call site.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use thiserror::Error;

use crate::utils::collections::ValueMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Date(DateTime<Utc>),
    List(Vec<Value>),
    Object(ValueMap),
}

#[derive(Debug, Error)]
pub enum ValueError {
    #[error("cannot add {left} and {right}")]
    Incompatible { left: &'static str, right: &'static str },
    #[error("string concatenation with non-string {other} requires explicit interpolation")]
    RequiresInterpolation { other: &'static str },
}

impl Value {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "int",
            Value::Float(_) => "number",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::List(_) => "array",
            Value::Object(_) => "object",
        }
    }

    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Date(_) => true,
            Value::List(l) => !l.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&ValueMap> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(o) => o.get(name),
            _ => None,
        }
    }

    /// Dotted-path lookup, e.g. `user.profile.name`.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.') {
            current = current.get_field(segment)?;
        }
        Some(current)
    }

    /// `int + float → float`, `string + string → concat`, any other
    /// string/non-string pairing is an error (must be interpolated
    /// explicitly by the expression evaluator, not silently coerced here).
    pub fn add(&self, other: &Value) -> Result<Value, ValueError> {
        use Value::{Float, Int, String as Str};
        match (self, other) {
            (Int(a), Int(b)) => Ok(Int(a + b)),
            (Int(a), Float(b)) => Ok(Float(*a as f64 + b)),
            (Float(a), Int(b)) => Ok(Float(a + *b as f64)),
            (Float(a), Float(b)) => Ok(Float(a + b)),
            (Str(a), Str(b)) => Ok(Str(format!("{a}{b}"))),
            (Str(_), other) => Err(ValueError::RequiresInterpolation { other: other.type_name() }),
            (other, Str(_)) => Err(ValueError::RequiresInterpolation { other: other.type_name() }),
            (a, b) => Err(ValueError::Incompatible {
                left: a.type_name(),
                right: b.type_name(),
            }),
        }
    }

    /// Strict equality — no cross-kind coercion (`"5" == 5` is `false`).
    #[must_use]
    pub fn values_equal(&self, other: &Value) -> bool {
        self == other
    }

    #[must_use]
    pub fn partial_compare(&self, other: &Value) -> Option<Ordering> {
        use Value::{Date, Float, Int, String as Str};
        match (self, other) {
            (Int(a), Int(b)) => a.partial_cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
            (Str(a), Str(b)) => a.partial_cmp(b),
            (Date(a), Date(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn from_json(json: Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or_default())
                }
            }
            Json::String(s) => Value::String(s),
            Json::Array(arr) => Value::List(arr.into_iter().map(Value::from_json).collect()),
            Json::Object(map) => {
                let mut out = ValueMap::default();
                for (k, v) in map {
                    out.insert(k, Value::from_json(v));
                }
                Value::Object(out)
            }
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
            Value::String(s) => Json::String(s.clone()),
            Value::Date(d) => Json::String(d.to_rfc3339()),
            Value::List(l) => Json::Array(l.iter().map(Value::to_json).collect()),
            Value::Object(o) => {
                let mut map = serde_json::Map::new();
                for (k, v) in o {
                    map.insert(k.clone(), v.to_json());
                }
                Json::Object(map)
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::{Bool, Date, Float, Int, List, Null, Object, String as Str};
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Int(a), Float(b)) | (Float(b), Int(a)) => (*a as f64) == *b,
            (Str(a), Str(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Object(a), Object(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Value::List(_) | Value::Object(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        Value::from_json(json)
    }
}

impl From<Value> for Json {
    fn from(value: Value) -> Self {
        value.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_plus_float_widens() {
        assert_eq!(Value::Int(1).add(&Value::Float(2.5)).unwrap(), Value::Float(3.5));
    }

    #[test]
    fn string_concat() {
        let out = Value::String("a".into()).add(&Value::String("b".into())).unwrap();
        assert_eq!(out, Value::String("ab".into()));
    }

    #[test]
    fn string_plus_number_is_error() {
        assert!(Value::String("a".into()).add(&Value::Int(1)).is_err());
    }

    #[test]
    fn no_cross_kind_equality() {
        assert!(!Value::String("5".into()).values_equal(&Value::Int(5)));
    }

    #[test]
    fn dotted_path_lookup() {
        let mut inner = ValueMap::default();
        inner.insert("name".to_string(), Value::String("Ada".into()));
        let mut outer = ValueMap::default();
        outer.insert("user".to_string(), Value::Object(inner));
        let v = Value::Object(outer);
        assert_eq!(v.get_path("user.name"), Some(&Value::String("Ada".into())));
    }
}
