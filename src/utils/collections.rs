//! Shared collection type aliases and constructors.

use rustc_hash::FxHashMap;

/// The map type used for loosely-typed JSON-valued key/value bags (raw
/// record bodies straight off the wire, before they're lifted into
/// [`crate::value::Value`]).
pub type ExtraMap = FxHashMap<String, serde_json::Value>;

#[must_use]
pub fn new_extra_map() -> ExtraMap {
    FxHashMap::default()
}

/// The map type backing [`crate::value::Value::Object`] and variable
/// scopes (`MissionContext`/`ActionContext`) — keyed to this crate's own
/// dynamic value, not raw JSON.
pub type ValueMap = FxHashMap<String, crate::value::Value>;

#[must_use]
pub fn new_value_map() -> ValueMap {
    FxHashMap::default()
}
