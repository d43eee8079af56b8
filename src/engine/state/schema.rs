// SPDX-License-Identifier: MIT

//! State schema definitions
//!
//! A `StateSchema` declares the shape of workflow state: one
//! `StateFieldDef` per named field with its type, merge reducer, and
//! optional default. Schemas are serde-loadable from YAML or JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Declared shape of workflow state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSchema {
    #[serde(flatten)]
    pub fields: HashMap<String, StateFieldDef>,
}

/// Definition of a single state field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFieldDef {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub reducer: ReducerType,
    #[serde(default)]
    pub default: Option<Value>,
}

/// Value type of a state field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    /// Union-typed fields (e.g. review feedback that is boolean or string)
    Any,
}

/// Strategy for merging a new value into an existing field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReducerType {
    #[default]
    Overwrite,
    Append,
    Max,
    Min,
    Merge,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field, builder style
    pub fn field(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        reducer: ReducerType,
    ) -> Self {
        self.fields.insert(
            name.into(),
            StateFieldDef {
                field_type,
                reducer,
                default: None,
            },
        );
        self
    }

    /// Declare a field with a default value
    pub fn field_with_default(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        reducer: ReducerType,
        default: Value,
    ) -> Self {
        self.fields.insert(
            name.into(),
            StateFieldDef {
                field_type,
                reducer,
                default: Some(default),
            },
        );
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Check a value against a field's declared type. Unknown fields pass:
    /// the schema constrains declared fields, it does not close the set.
    pub fn validate(&self, name: &str, value: &Value) -> Result<(), String> {
        let def = match self.fields.get(name) {
            Some(def) => def,
            None => return Ok(()),
        };

        let ok = match def.field_type {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Any => true,
        };

        // Null is how "unset" travels through updates; every field accepts it
        if ok || value.is_null() {
            Ok(())
        } else {
            Err(format!(
                "field '{}' expects {:?}, got {}",
                name, def.field_type, value
            ))
        }
    }
}
