//! Weaver settings.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use netweave_codegen::ContainerKind;
use netweave_types::ir::AccuracySpec;
use netweave_types::{ErrorCode, Subject, WeaveError, WeaveResult};

/// Declared type of the generated dictionary default fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DictionaryBacking {
    /// A dictionary-typed field.
    #[default]
    Map,
    /// A list of key/value entries, for hosts that cannot store maps.
    SerializableList,
}

/// Configuration for one weaving pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaverSettings {
    pub default_string_capacity: u32,
    pub default_array_capacity: u32,
    pub default_list_capacity: u32,
    pub default_dictionary_capacity: u32,
    /// Named quantization steps referenced by `Accuracy(named)`.
    pub accuracy_defaults: BTreeMap<String, f32>,
    /// Inject null-state guards into generated behaviour accessors.
    pub null_checks: bool,
    pub dictionary_backing: DictionaryBacking,
    /// Emit RPC usage warnings.
    pub check_rpc_usage: bool,
}

impl Default for WeaverSettings {
    fn default() -> Self {
        Self {
            default_string_capacity: 16,
            default_array_capacity: 1,
            default_list_capacity: 1,
            default_dictionary_capacity: 1,
            accuracy_defaults: BTreeMap::new(),
            null_checks: true,
            dictionary_backing: DictionaryBacking::Map,
            check_rpc_usage: true,
        }
    }
}

impl WeaverSettings {
    /// Parse settings from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn with_accuracy(mut self, name: impl Into<String>, value: f32) -> Self {
        self.accuracy_defaults.insert(name.into(), value);
        self
    }

    pub fn default_capacity(&self, kind: ContainerKind) -> u32 {
        match kind {
            ContainerKind::Text => self.default_string_capacity,
            ContainerKind::Array => self.default_array_capacity,
            ContainerKind::LinkedList => self.default_list_capacity,
            ContainerKind::Dictionary => self.default_dictionary_capacity,
        }
    }

    /// Resolve an accuracy annotation to a positive step.
    pub fn resolve_accuracy(&self, spec: &AccuracySpec, subject: &Subject) -> WeaveResult<f32> {
        let value = match spec {
            AccuracySpec::Value(v) => *v,
            AccuracySpec::Named(name) => {
                *self.accuracy_defaults.get(name).ok_or_else(|| {
                    WeaveError::configuration(
                        ErrorCode::UNKNOWN_ACCURACY,
                        subject.clone(),
                        format!("no accuracy named `{name}` in the settings"),
                    )
                    .with_suggestion(format!(
                        "add `{name}` to accuracy_defaults or use a literal value"
                    ))
                })?
            }
        };
        if !(value.is_finite() && value > 0.0) {
            return Err(WeaveError::configuration(
                ErrorCode::INVALID_ATTRIBUTE,
                subject.clone(),
                format!("accuracy must be a positive number, got {value}"),
            ));
        }
        Ok(value)
    }
}
