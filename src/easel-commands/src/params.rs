//! Parameter schemas and validation.
//!
//! A command may declare an ordered [`ParameterSchema`]. Before a command runs,
//! its parameters are resolved against the schema: defaults are filled in,
//! required parameters are checked, and values are checked against the
//! declared [`ParameterKind`] and valid-value set. Parameters the schema does
//! not mention are passed through untouched.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ParameterError;

/// Parameter values passed to a command.
pub type Parameters = serde_json::Map<String, Value>;

/// Semantic type expected for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    String,
    Integer,
    Number,
    Boolean,
    /// Filesystem path, carried as a string.
    Path,
    /// Hex color (`#rgb`, `#rrggbb` or `#rrggbbaa`).
    Color,
    Array,
    Object,
    Any,
}

impl ParameterKind {
    /// Check whether a JSON value is acceptable for this kind.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String | Self::Path => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Color => value.as_str().is_some_and(is_hex_color),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }

    /// Parse a flat string (as given on a command line) into a value of this kind.
    pub fn coerce(&self, name: &str, raw: &str) -> Result<Value, ParameterError> {
        let invalid = |message: String| ParameterError::InvalidValue {
            name: name.to_string(),
            message,
        };

        match self {
            Self::String | Self::Path | Self::Color => Ok(Value::String(raw.to_string())),
            Self::Integer => raw
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|e| invalid(format!("'{raw}' is not an integer ({e})"))),
            Self::Number => {
                let parsed = raw
                    .trim()
                    .parse::<f64>()
                    .map_err(|e| invalid(format!("'{raw}' is not a number ({e})")))?;
                serde_json::Number::from_f64(parsed)
                    .map(Value::Number)
                    .ok_or_else(|| invalid(format!("'{raw}' is not a finite number")))
            }
            Self::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
                _ => Err(invalid(format!("'{raw}' is not a boolean"))),
            },
            Self::Array | Self::Object => serde_json::from_str(raw)
                .map_err(|e| invalid(format!("'{raw}' is not valid JSON ({e})"))),
            // Best effort: JSON literal if it parses, plain string otherwise.
            Self::Any => Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))),
        }
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Path => "path",
            Self::Color => "color",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

fn is_hex_color(s: &str) -> bool {
    let Some(hex) = s.strip_prefix('#') else {
        return false;
    };
    matches!(hex.len(), 3 | 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit())
}

fn describe_value(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Declaration of a single parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Expected semantic type
    pub kind: ParameterKind,

    /// Whether the parameter must be supplied (unless it has a default)
    #[serde(default)]
    pub required: bool,

    /// Value used when the parameter is absent
    #[serde(default)]
    pub default: Option<Value>,

    /// Enumerated set of accepted values
    #[serde(default)]
    pub allowed: Option<Vec<Value>>,

    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,
}

impl ParameterSpec {
    /// Create an optional parameter of the given kind.
    pub fn new(kind: ParameterKind) -> Self {
        Self {
            kind,
            required: false,
            default: None,
            allowed: None,
            description: None,
        }
    }

    /// Mark the parameter as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Restrict the parameter to a set of values.
    pub fn allowed<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Set the description.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Validate a supplied value against this spec.
    pub fn check(&self, name: &str, value: &Value) -> Result<(), ParameterError> {
        if !self.kind.matches(value) {
            return Err(ParameterError::TypeMismatch {
                name: name.to_string(),
                expected: self.kind.to_string(),
                found: describe_value(value).to_string(),
            });
        }

        if let Some(allowed) = &self.allowed {
            if !allowed.contains(value) {
                let allowed = allowed
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(ParameterError::NotAllowed {
                    name: name.to_string(),
                    value: value.to_string(),
                    allowed,
                });
            }
        }

        Ok(())
    }
}

/// Ordered mapping from parameter name to its declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSchema {
    params: IndexMap<String, ParameterSpec>,
}

impl ParameterSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter, keeping declaration order.
    pub fn with(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.params.insert(name.into(), spec);
        self
    }

    /// Look up a parameter declaration.
    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.params.get(name)
    }

    /// Iterate declarations in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterSpec)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Resolve supplied parameters: fill defaults, enforce required
    /// parameters, and check kinds and valid sets.
    ///
    /// A `null` value counts as absent.
    pub fn resolve(&self, supplied: &Parameters) -> Result<Parameters, ParameterError> {
        let mut resolved = supplied.clone();

        for (name, spec) in &self.params {
            match supplied.get(name).filter(|v| !v.is_null()) {
                Some(value) => spec.check(name, value)?,
                None => {
                    resolved.remove(name);
                    if let Some(default) = &spec.default {
                        resolved.insert(name.clone(), default.clone());
                    } else if spec.required {
                        return Err(ParameterError::Missing(name.clone()));
                    }
                }
            }
        }

        Ok(resolved)
    }

    /// Check supplied parameters without keeping the resolved copy.
    pub fn validate(&self, supplied: &Parameters) -> Result<(), ParameterError> {
        self.resolve(supplied).map(|_| ())
    }

    /// Convert flat `name -> string` pairs into typed parameters.
    ///
    /// Declared parameters are parsed with their kind; undeclared ones are
    /// parsed as [`ParameterKind::Any`].
    pub fn coerce_flat<I, K, V>(&self, flat: I) -> Result<Parameters, ParameterError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut params = Parameters::new();
        for (name, raw) in flat {
            let name = name.into();
            let kind = self
                .params
                .get(&name)
                .map(|spec| spec.kind)
                .unwrap_or(ParameterKind::Any);
            let value = kind.coerce(&name, raw.as_ref())?;
            params.insert(name, value);
        }
        Ok(params)
    }
}
