// SPDX-License-Identifier: MIT

//! Runtime state container
//!
//! `FlowState` holds the named fields of a running workflow. All mutation
//! goes through `update`, which dispatches on the field's declared reducer;
//! nodes never hold a mutable reference to state.

use serde_json::{Map, Value};
use std::collections::HashMap;

use super::schema::{ReducerType, StateSchema};

/// Partial state mapping returned by nodes, merged key-wise into `FlowState`
pub type StateUpdate = HashMap<String, Value>;

/// Runtime workflow state with reducer support
#[derive(Debug, Clone, Default)]
pub struct FlowState {
    /// Current field values
    fields: HashMap<String, Value>,
    /// Reducer for each declared field
    reducers: HashMap<String, ReducerType>,
}

impl FlowState {
    /// Create state from a schema, applying declared defaults
    pub fn from_schema(schema: &StateSchema) -> Self {
        let mut fields = HashMap::new();
        let mut reducers = HashMap::new();

        for (name, def) in &schema.fields {
            if let Some(default) = &def.default {
                fields.insert(name.clone(), default.clone());
            }
            reducers.insert(name.clone(), def.reducer);
        }

        Self { fields, reducers }
    }

    /// Create an empty state with no declared reducers
    pub fn empty() -> Self {
        Self::default()
    }

    /// Merge one value into a field using its reducer. Fields without a
    /// declared reducer overwrite.
    pub fn update(&mut self, key: &str, value: Value) {
        let reducer = self
            .reducers
            .get(key)
            .copied()
            .unwrap_or(ReducerType::Overwrite);

        match reducer {
            ReducerType::Overwrite => {
                self.fields.insert(key.to_string(), value);
            }
            ReducerType::Append => {
                let arr = self
                    .fields
                    .entry(key.to_string())
                    .or_insert(Value::Array(vec![]));
                if let Value::Array(a) = arr {
                    match value {
                        Value::Array(new_items) => a.extend(new_items),
                        other => a.push(other),
                    }
                }
            }
            ReducerType::Max => {
                let current = self.fields.get(key).and_then(|v| v.as_f64());
                if let Some(new) = value.as_f64() {
                    if current.is_none() || new > current.unwrap_or(f64::MIN) {
                        self.fields.insert(key.to_string(), value);
                    }
                }
            }
            ReducerType::Min => {
                let current = self.fields.get(key).and_then(|v| v.as_f64());
                if let Some(new) = value.as_f64() {
                    if current.is_none() || new < current.unwrap_or(f64::MAX) {
                        self.fields.insert(key.to_string(), value);
                    }
                }
            }
            ReducerType::Merge => {
                let current = self
                    .fields
                    .entry(key.to_string())
                    .or_insert(Value::Object(Map::new()));
                if let (Value::Object(current_obj), Value::Object(new_obj)) = (current, value) {
                    for (k, v) in new_obj {
                        current_obj.insert(k, v);
                    }
                }
            }
        }
    }

    /// Merge a partial update, every key through its reducer
    pub fn apply(&mut self, update: StateUpdate) {
        for (key, value) in update {
            self.update(&key, value);
        }
    }

    /// Get a field value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Convenience accessors for the common scalar reads in routing code
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    /// All current field values
    pub fn values(&self) -> &HashMap<String, Value> {
        &self.fields
    }

    /// Overwrite raw field contents, bypassing reducers. Used when
    /// restoring a checkpointed snapshot.
    pub fn restore(&mut self, values: HashMap<String, Value>) {
        self.fields = values;
    }

    /// Convert state to a JSON object
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}
