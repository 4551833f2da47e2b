//! Built-in defaults (layer 1)

use serde_json::Value;

use super::effective::ConfigError;
use super::settings::MatrixSettings;

/// Built-in default configuration values
#[derive(Debug, Clone, Default)]
pub struct BuiltinDefaults {
    settings: MatrixSettings,
}

impl BuiltinDefaults {
    pub fn settings(&self) -> &MatrixSettings {
        &self.settings
    }

    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> Result<Value, ConfigError> {
        let mut value = serde_json::to_value(&self.settings)
            .map_err(|e| ConfigError::ParseError(format!("defaults: {}", e)))?;
        strip_nulls(&mut value);
        Ok(value)
    }
}

/// Unset optional keys are left out of the base layer so every later
/// layer sees them as absent.
fn strip_nulls(value: &mut Value) {
    if let Value::Object(map) = value {
        map.retain(|_, v| !v.is_null());
        for v in map.values_mut() {
            strip_nulls(v);
        }
    }
}
