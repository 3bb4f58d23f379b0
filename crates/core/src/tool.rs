//! Tool trait: the abstraction over agent capabilities.
//!
//! A tool declares its arguments as a list of [`ParamSpec`] field
//! descriptors. The Model Adapter validates the model's raw JSON arguments
//! against them before the tool ever runs, so `call` only sees typed,
//! coerced values in [`ToolArgs`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::warn;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// The type of a single argument slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Enum(Vec<String>),
}

/// A named, typed argument slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub description: String,
    pub kind: ParamKind,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind,
            required: true,
        }
    }

    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, ParamKind::String)
    }

    pub fn integer(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, ParamKind::Integer)
    }

    pub fn number(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, ParamKind::Number)
    }

    pub fn boolean(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, description, ParamKind::Boolean)
    }

    pub fn one_of<I, S>(name: impl Into<String>, description: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            description,
            ParamKind::Enum(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Validate and coerce one raw value.
    ///
    /// Models frequently quote numbers and booleans, so `"3"` is accepted
    /// for an integer slot and `"true"` for a boolean one. Failures are
    /// returned as a reason string; the caller adds tool/argument context.
    pub fn parse(&self, raw: &Value) -> std::result::Result<Value, String> {
        match (&self.kind, raw) {
            (ParamKind::String, Value::String(_)) => Ok(raw.clone()),
            (ParamKind::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
            (ParamKind::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),
            (ParamKind::String, _) => Err("expected a string".into()),

            (ParamKind::Integer, Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    return Ok(json!(i));
                }
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(json!(f as i64)),
                    _ => Err(format!("expected an integer, got {n}")),
                }
            }
            (ParamKind::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(|i| json!(i))
                .map_err(|_| format!("expected an integer, got \"{s}\"")),
            (ParamKind::Integer, _) => Err("expected an integer".into()),

            (ParamKind::Number, Value::Number(_)) => Ok(raw.clone()),
            (ParamKind::Number, Value::String(s)) => match s.trim().parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(json!(f)),
                _ => Err(format!("expected a number, got \"{s}\"")),
            },
            (ParamKind::Number, _) => Err("expected a number".into()),

            (ParamKind::Boolean, Value::Bool(_)) => Ok(raw.clone()),
            (ParamKind::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str()
            {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(format!("expected a boolean, got \"{s}\"")),
            },
            (ParamKind::Boolean, _) => Err("expected a boolean".into()),

            (ParamKind::Enum(values), Value::String(s)) => {
                if values.iter().any(|v| v == s) {
                    Ok(raw.clone())
                } else {
                    Err(format!("expected one of: {}", values.join(", ")))
                }
            }
            (ParamKind::Enum(values), _) => Err(format!("expected one of: {}", values.join(", "))),
        }
    }

    /// JSON-Schema fragment for this slot.
    pub fn json_schema(&self) -> Value {
        let mut schema = match &self.kind {
            ParamKind::String => json!({ "type": "string" }),
            ParamKind::Integer => json!({ "type": "integer" }),
            ParamKind::Number => json!({ "type": "number" }),
            ParamKind::Boolean => json!({ "type": "boolean" }),
            ParamKind::Enum(values) => json!({ "type": "string", "enum": values }),
        };
        if !self.description.is_empty() {
            schema["description"] = Value::String(self.description.clone());
        }
        schema
    }
}

/// Build the object schema for a whole parameter list.
pub fn object_schema(params: &[ParamSpec]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for param in params {
        properties.insert(param.name.clone(), param.json_schema());
        if param.required {
            required.push(Value::String(param.name.clone()));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Validated, coerced arguments for one tool call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs {
    tool: String,
    values: Map<String, Value>,
}

impl ToolArgs {
    /// Parse the model's JSON argument string against `params`.
    ///
    /// An empty string counts as `{}`. Keys not declared in `params` are
    /// dropped.
    pub fn parse(
        tool: &str,
        params: &[ParamSpec],
        raw: &str,
    ) -> std::result::Result<Self, ToolError> {
        let raw = raw.trim();
        let parsed: Value = if raw.is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments(e.to_string()))?
        };
        let Value::Object(object) = parsed else {
            return Err(ToolError::InvalidArguments(
                "arguments must be a JSON object".into(),
            ));
        };

        let mut values = Map::new();
        for param in params {
            match object.get(&param.name) {
                None | Some(Value::Null) => {
                    if param.required {
                        return Err(ToolError::InvalidArgument {
                            tool: tool.to_string(),
                            argument: param.name.clone(),
                            reason: "missing required argument".into(),
                        });
                    }
                }
                Some(raw_value) => {
                    let value =
                        param
                            .parse(raw_value)
                            .map_err(|reason| ToolError::InvalidArgument {
                                tool: tool.to_string(),
                                argument: param.name.clone(),
                                reason,
                            })?;
                    values.insert(param.name.clone(), value);
                }
            }
        }

        Ok(Self {
            tool: tool.to_string(),
            values,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(Value::as_i64)
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(Value::as_f64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(Value::as_bool)
    }

    /// A string argument that must be present.
    pub fn require_str(&self, name: &str) -> std::result::Result<&str, ToolError> {
        self.str(name).ok_or_else(|| ToolError::InvalidArgument {
            tool: self.tool.clone(),
            argument: name.to_string(),
            reason: "missing required argument".into(),
        })
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }
}

/// The outcome of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Text shown to the model as the tool output
    pub output: String,

    /// Optional structured data, kept on the tool part for the UI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolResult {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            data: None,
        }
    }

    /// Stringify an arbitrary JSON result. Strings are used as-is, anything
    /// else is serialized and also kept as `data`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(s) => Self::text(s),
            other => Self {
                output: other.to_string(),
                data: Some(other),
            },
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<String> for ToolResult {
    fn from(output: String) -> Self {
        Self::text(output)
    }
}

impl From<&str> for ToolResult {
    fn from(output: &str) -> Self {
        Self::text(output)
    }
}

/// The core Tool trait.
///
/// Orchestration tools (prompt, interview, sub-agent dispatch) and the
/// caller's domain tools all implement this.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The name the model calls this tool by.
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// The argument slots.
    fn params(&self) -> Vec<ParamSpec>;

    /// Execute the tool with validated arguments.
    async fn call(&self, args: ToolArgs) -> std::result::Result<ToolResult, ToolError>;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value {
        object_schema(&self.params())
    }

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// An ordered, fixed set of tools.
///
/// Names are not required to be unique: lookup returns the first match and
/// a duplicate is only reported with a warning. Cloning is cheap.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        let set = Self { tools };
        set.warn_duplicates();
        set
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.push(tool);
        self
    }

    pub fn push(&mut self, tool: Arc<dyn Tool>) {
        if self.find(tool.name()).is_some() {
            warn!(tool = %tool.name(), "Duplicate tool name; the earlier tool shadows it");
        }
        self.tools.push(tool);
    }

    pub fn extend(&mut self, other: ToolSet) {
        for tool in other.tools {
            self.push(tool);
        }
    }

    /// First tool with the given name.
    pub fn find(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn warn_duplicates(&self) {
        for (i, tool) in self.tools.iter().enumerate() {
            if self.tools[..i].iter().any(|t| t.name() == tool.name()) {
                warn!(tool = %tool.name(), "Duplicate tool name; the earlier tool shadows it");
            }
        }
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
