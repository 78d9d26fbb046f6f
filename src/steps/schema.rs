//! Structural schema matching for `match` step arms (spec §4.5, §4.6).
//!
//! A value "matches" a schema when every required field is present with a
//! compatible type; optional fields are checked only when present. `array`
//! and `object` field types recurse into their declared nested shape, so a
//! sub-object or sub-array's own fields are checked structurally rather than
//! just its outer tag. The wildcard schema name (`_`) matches anything
//! without a lookup.

use crate::executor::context::MissionContext;
use crate::program::{FieldType, SchemaDef, SchemaField, WILDCARD_SCHEMA};
use crate::value::Value;

use super::StepError;

fn value_matches_type(value: &Value, ty: &FieldType) -> bool {
    match ty {
        FieldType::String => matches!(value, Value::String(_)),
        FieldType::Number => matches!(value, Value::Int(_) | Value::Float(_)),
        FieldType::Int => matches!(value, Value::Int(_)),
        FieldType::Decimal => matches!(value, Value::Float(_)),
        FieldType::Boolean => matches!(value, Value::Bool(_)),
        FieldType::Null => matches!(value, Value::Null),
        FieldType::Date => matches!(value, Value::Date(_)),
        FieldType::Array { items } => match value {
            Value::List(elements) => match items {
                Some(item_ty) => elements.iter().all(|el| value_matches_type(el, item_ty)),
                None => true,
            },
            _ => false,
        },
        FieldType::Object { fields } => match value {
            Value::Object(_) => fields_match(value, fields),
            _ => false,
        },
    }
}

fn fields_match(value: &Value, fields: &[SchemaField]) -> bool {
    for field in fields {
        match value.get_field(&field.name) {
            Some(found) => {
                if !value_matches_type(found, &field.ty) {
                    return false;
                }
            }
            None if field.required => return false,
            None => {}
        }
    }
    true
}

#[must_use]
pub fn matches_schema(value: &Value, schema: &SchemaDef) -> bool {
    fields_match(value, &schema.fields)
}

/// Resolves `schema_name` against the program's declared schemas and tests
/// `value` against it. The wildcard name always matches.
pub fn schema_matches(mission: &MissionContext, schema_name: &str, value: &Value) -> Result<bool, StepError> {
    if schema_name == WILDCARD_SCHEMA {
        return Ok(true);
    }
    let schema = mission
        .schema_def(schema_name)
        .ok_or_else(|| StepError::UnknownSchema(schema_name.to_string()))?;
    Ok(matches_schema(value, schema))
}
