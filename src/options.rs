//! Startup option descriptors.
//!
//! Options are declared to the builder as an ordered list; the set is
//! advertised in the manifest and the values the operator configured
//! arrive in `init.options`, where each one runs through its parse
//! callback. A callback rejecting a value is fatal.

use serde_json::Value;

/// Parses and stores one configured value. Returns a human-readable
/// reason on rejection.
pub type OptionCallback = Box<dyn Fn(&Value) -> Result<(), String> + Send>;

/// One option the plugin accepts, as advertised in the manifest.
pub struct ConfigOption {
    pub(crate) name: String,
    pub(crate) value_type: String,
    pub(crate) description: String,
    pub(crate) handler: OptionCallback,
}

impl ConfigOption {
    pub fn new(
        name: impl Into<String>,
        value_type: impl Into<String>,
        description: impl Into<String>,
        handler: impl Fn(&Value) -> Result<(), String> + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            value_type: value_type.into(),
            description: description.into(),
            handler: Box::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

// -----------------------------------------------------------------------------
// Parse helpers for the common value shapes
// -----------------------------------------------------------------------------

/// Interpret an option value as a u64. The node hands string options
/// through as strings, so both forms are accepted.
pub fn u64_option(value: &Value) -> Result<u64, String> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| format!("'{n}' is not an unsigned number")),
        Value::String(s) => s
            .parse::<u64>()
            .map_err(|_| format!("'{s}' is not a number")),
        other => Err(format!("'{other}' is not a number")),
    }
}

/// Interpret an option value as a string.
pub fn string_option(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(format!("'{other}' is not a string")),
    }
}

/// Interpret an option value as a bool ("true"/"false" strings included).
pub fn bool_option(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" => Ok(true),
        Value::String(s) if s == "false" => Ok(false),
        other => Err(format!("'{other}' is not a bool")),
    }
}
