use std::{collections::HashMap, fmt};

use serde_json::{Map, Value};
use tracing::{debug, instrument};

use super::{
    errors::ToolError,
    tool::{FunctionParameters, Property, Tool, ToolCall},
};

/// Local tools keyed by function name.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool, replacing any earlier tool with the same name.
    pub fn register(&mut self, tool: Tool) -> &mut Self {
        self.tools.insert(tool.name().to_owned(), tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Binds a model-issued call to its tool. See [`resolve_call`].
    pub fn resolve(&self, call: &ToolCall) -> Result<ResolvedToolCall, ToolError> {
        resolve_call(call, self)
    }
}

impl FromIterator<Tool> for ToolRegistry {
    fn from_iter<I: IntoIterator<Item = Tool>>(iter: I) -> Self {
        let mut registry = Self::new();
        for tool in iter {
            registry.register(tool);
        }
        registry
    }
}

/// A tool call checked against its tool's schema, ready to be run by the caller.
#[derive(Clone)]
pub struct ResolvedToolCall {
    pub tool: Tool,
    pub arguments: Map<String, Value>,
}

impl fmt::Debug for ResolvedToolCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedToolCall")
            .field("name", &self.tool.name())
            .field("arguments", &self.arguments)
            .finish()
    }
}

/// Two resolved calls are equal when they name the same function with the same arguments.
impl PartialEq for ResolvedToolCall {
    fn eq(&self, other: &Self) -> bool {
        self.tool.function == other.tool.function && self.arguments == other.arguments
    }
}

impl ResolvedToolCall {
    pub fn name(&self) -> &str {
        self.tool.name()
    }

    pub async fn invoke(&self) -> Result<Value, ToolError> {
        self.tool.execute(Value::Object(self.arguments.clone())).await
    }

    pub fn invoke_blocking(&self) -> Result<Value, ToolError> {
        self.tool.execute_blocking(Value::Object(self.arguments.clone()))
    }
}

/// Looks up `call` in `registry` and validates its arguments against the tool's schema.
///
/// Arguments must be a JSON object (a JSON-encoded object string is accepted);
/// every required parameter must be present, no undeclared parameter may appear,
/// and each value must already have the declared JSON type.
#[instrument(name = "tool.resolve", skip_all, fields(tool = %call.function.name))]
pub fn resolve_call(call: &ToolCall, registry: &ToolRegistry) -> Result<ResolvedToolCall, ToolError> {
    let name = &call.function.name;
    let tool = registry
        .get(name)
        .ok_or_else(|| ToolError::UnknownTool(name.clone()))?;

    let invalid = |reason: String| ToolError::InvalidArguments {
        tool: name.clone(),
        reason,
    };

    let arguments = match &call.function.arguments {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            _ => return Err(invalid("arguments must be a JSON object".into())),
        },
        _ => return Err(invalid("arguments must be a JSON object".into())),
    };

    check_arguments(&tool.function.parameters, &arguments).map_err(&invalid)?;
    // catches what the schema cannot express: non-nullable defaults, map values, integer widths
    if let Some(check) = &tool.argument_check {
        check(&Value::Object(arguments.clone())).map_err(&invalid)?;
    }
    debug!(args = arguments.len(), "resolved tool call");

    Ok(ResolvedToolCall {
        tool: tool.clone(),
        arguments,
    })
}

fn check_arguments(params: &FunctionParameters, args: &Map<String, Value>) -> Result<(), String> {
    if let Some(missing) = params.required.iter().find(|r| !args.contains_key(r.as_str())) {
        return Err(format!("missing required argument `{missing}`"));
    }

    for (key, value) in args {
        let Some(property) = params.properties.get(key) else {
            return Err(format!("unexpected argument `{key}`"));
        };
        if value.is_null() && !params.is_required(key) {
            continue;
        }
        check_value(property, value, key)?;
    }
    Ok(())
}

fn check_value(property: &Property, value: &Value, path: &str) -> Result<(), String> {
    let matches = match property.property_type.as_str() {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    };
    if !matches {
        return Err(format!(
            "`{path}` should be {} but got {}",
            property.property_type,
            json_kind(value)
        ));
    }

    if let Some(allowed) = &property.enum_values {
        if !allowed.contains(value) {
            return Err(format!("`{path}` must be one of {}", Value::Array(allowed.clone())));
        }
    }

    match value {
        Value::Array(items) => {
            if let Some(item) = &property.items {
                for (i, v) in items.iter().enumerate() {
                    check_value(item, v, &format!("{path}[{i}]"))?;
                }
            }
        }
        Value::Object(map) => {
            if let Some(fields) = &property.properties {
                let nested = FunctionParameters {
                    param_type: "object".into(),
                    properties: fields.clone(),
                    required: property.required.clone().unwrap_or_default(),
                };
                check_arguments(&nested, map).map_err(|e| format!("in `{path}`: {e}"))?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
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
