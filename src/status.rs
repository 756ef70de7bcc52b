use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

pub const UNKNOWN: &str = "unknown";

/// Last known state of a remote resource.
///
/// Two statuses are equal when their phases (the discriminant) are equal, the
/// provider-specific fields are not compared.
#[derive(Clone, Debug, Serialize)]
pub struct Status {
    phase: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Status {
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            fields: Map::new(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN)
    }

    /// Build a status from a JSON object, reading the phase from `discriminant`.
    pub fn from_value(value: Value, discriminant: &str) -> Self {
        let fields = match value {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        let phase = fields
            .get(discriminant)
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN)
            .to_string();
        Self { phase, fields }
    }

    pub fn from_slice(body: &[u8], discriminant: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::from_value(serde_json::from_slice(body)?, discriminant))
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn is(&self, phase: &str) -> bool {
        self.phase == phase
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// A boolean sub-condition, `None` when absent or not a boolean.
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.field(name).and_then(Value::as_bool)
    }
}

impl PartialEq for Status {
    fn eq(&self, other: &Self) -> bool {
        self.phase == other.phase
    }
}

impl Eq for Status {}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.phase)
    }
}
