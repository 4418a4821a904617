use std::{collections::BTreeMap, fmt, future::Future, pin::Pin, sync::Arc};

use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::{errors::ToolError, schema};

/// Defines the type of tool available. Currently, only 'function' is supported.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    Function,
}

/// Signature for an asynchronous tool executor function.
///
/// Accepts a JSON [`Value`] of arguments and produces a JSON result
/// or a [`ToolError`] if execution fails.
pub type AsyncToolFn = Arc<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send>>
        + Send
        + Sync,
>;

/// Signature for a blocking tool executor function.
pub type BlockingToolFn = Arc<dyn Fn(Value) -> Result<Value, ToolError> + Send + Sync>;

/// Checks that an argument object decodes into the callable's argument type.
pub type ArgumentCheck = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// The local half of a tool: what runs when the model calls it.
#[derive(Clone)]
pub enum ToolExecutor {
    Blocking(BlockingToolFn),
    Async(AsyncToolFn),
}

impl fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolExecutor::Blocking(_) => f.write_str("<blocking_fn>"),
            ToolExecutor::Async(_) => f.write_str("<async_fn>"),
        }
    }
}

/// Defines a tool (function) that the model can call.
///
/// Only the schema goes over the wire; a tool deserialized from JSON has no
/// executor and fails with [`ToolError::MissingExecutor`] when run.
#[derive(Serialize, Clone, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: Function,
    #[serde(skip)]
    pub executor: Option<ToolExecutor>,
    /// Set for tools built from typed callables; run when a call is resolved.
    #[serde(skip)]
    pub argument_check: Option<ArgumentCheck>,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("tool_type", &self.tool_type)
            .field("function", &self.function)
            .field("executor", &self.executor)
            .field("argument_check", &self.argument_check.is_some())
            .finish()
    }
}

impl Tool {
    /// Builds a tool from a blocking callable taking a typed argument struct.
    ///
    /// The parameter schema comes from `A`'s [`JsonSchema`] impl and the function
    /// description from `A`'s doc comment. Derivation happens once per callable type.
    ///
    /// ```ignore
    /// /// Add two integers.
    /// #[derive(Deserialize, JsonSchema)]
    /// struct AddArgs { x: i64, y: i64 }
    ///
    /// let add = Tool::from_fn("add", |a: AddArgs| Ok(a.x + a.y))?;
    /// ```
    pub fn from_fn<A, R, F>(name: impl Into<String>, f: F) -> Result<Self, ToolError>
    where
        A: JsonSchema + DeserializeOwned + 'static,
        R: Serialize,
        F: Fn(A) -> Result<R, ToolError> + Send + Sync + 'static,
    {
        let derived = schema::cached_schema::<F, A>()?;
        let name = name.into();
        let tool_name = name.clone();

        let executor: BlockingToolFn = Arc::new(move |args: Value| {
            let args = decode_arguments::<A>(&tool_name, args)?;
            encode_output(f(args)?)
        });

        Ok(Self::with_schema::<A>(name, &derived, ToolExecutor::Blocking(executor)))
    }

    /// Async counterpart of [`Tool::from_fn`].
    pub fn from_async_fn<A, R, F, Fut>(name: impl Into<String>, f: F) -> Result<Self, ToolError>
    where
        A: JsonSchema + DeserializeOwned + Send + 'static,
        R: Serialize,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ToolError>> + Send + 'static,
    {
        let derived = schema::cached_schema::<F, A>()?;
        let name = name.into();
        let tool_name = name.clone();

        let executor: AsyncToolFn = Arc::new(move |args: Value| {
            let pending = decode_arguments::<A>(&tool_name, args).map(&f);
            Box::pin(async move { encode_output(pending?.await?) })
        });

        Ok(Self::with_schema::<A>(name, &derived, ToolExecutor::Async(executor)))
    }

    fn with_schema<A>(name: String, derived: &schema::DerivedSchema, executor: ToolExecutor) -> Self
    where
        A: DeserializeOwned + 'static,
    {
        let argument_check: ArgumentCheck = Arc::new(|args: &Value| {
            serde_json::from_value::<A>(args.clone())
                .map(drop)
                .map_err(|e| e.to_string())
        });

        Self {
            tool_type: ToolType::Function,
            function: Function {
                name,
                description: derived.description.clone(),
                parameters: derived.parameters.clone(),
            },
            executor: Some(executor),
            argument_check: Some(argument_check),
        }
    }

    /// Runs the tool with already-validated arguments.
    pub async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        match &self.executor {
            Some(ToolExecutor::Blocking(f)) => f(args),
            Some(ToolExecutor::Async(f)) => f(args).await,
            None => Err(ToolError::MissingExecutor(self.name().to_owned())),
        }
    }

    /// Runs the tool on the current thread.
    ///
    /// Async executors are driven with a local executor, so they must not rely
    /// on a surrounding tokio runtime.
    pub fn execute_blocking(&self, args: Value) -> Result<Value, ToolError> {
        match &self.executor {
            Some(ToolExecutor::Blocking(f)) => f(args),
            Some(ToolExecutor::Async(f)) => futures::executor::block_on(f(args)),
            None => Err(ToolError::MissingExecutor(self.name().to_owned())),
        }
    }

    /// Gets the name of the tool from its function definition.
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

fn decode_arguments<A: DeserializeOwned>(tool: &str, args: Value) -> Result<A, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_owned(),
        reason: e.to_string(),
    })
}

fn encode_output<R: Serialize>(out: R) -> Result<Value, ToolError> {
    serde_json::to_value(out).map_err(|e| ToolError::Execution(format!("unserializable tool output: {e}")))
}

/// Defines a function, its description, and its arguments.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub description: String,
    pub parameters: FunctionParameters,
}

/// Defines the arguments for a function using a JSON schema-like structure.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FunctionParameters {
    #[serde(rename = "type")]
    pub param_type: String,
    pub properties: BTreeMap<String, Property>,
    pub required: Vec<String>,
}

impl FunctionParameters {
    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }
}

/// Defines a single property within function arguments.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Property {
    #[serde(rename = "type")]
    pub property_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    /// Element schema for `array` properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Property>>,
    /// Field schemas for `object` properties with a declared shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, Property>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
}

impl Property {
    pub fn new(property_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            property_type: property_type.into(),
            description: description.into(),
            enum_values: None,
            items: None,
            properties: None,
            required: None,
        }
    }
}

/// Represents a tool call requested by the model.
///
/// Tool calls reference a function name and include JSON arguments.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Optional identifier for the tool call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The type of the tool (defaults to [`ToolType::Function`]).
    ///
    /// Ollama omits this field, so a default is supplied.
    #[serde(default = "default_tool_call_type", skip_serializing_if = "is_default_tool_call_type")]
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    /// Function being called.
    pub function: ToolCallFunction,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: None,
            tool_type: ToolType::Function,
            function: ToolCallFunction {
                name: name.into(),
                arguments,
            },
        }
    }
}

fn default_tool_call_type() -> ToolType {
    ToolType::Function
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_default_tool_call_type(tool_type: &ToolType) -> bool {
    *tool_type == default_tool_call_type()
}

/// Contains the name and arguments for a function call.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolCallFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}
