use thiserror::Error;

/// Errors raised while describing, resolving or running a tool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// A parameter type could not be expressed as a JSON schema the model understands.
    #[error("tool schema error: {0}")]
    Schema(String),
    /// The model asked for a tool that is not in the registry.
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    /// The model's arguments do not match the tool's parameter schema.
    #[error("invalid arguments for tool `{tool}`: {reason}")]
    InvalidArguments { tool: String, reason: String },
    /// The tool ran and failed.
    #[error("tool execution failed: {0}")]
    Execution(String),
    /// The tool has a schema but nothing to run, e.g. after deserialization.
    #[error("tool `{0}` has no executor")]
    MissingExecutor(String),
    #[error("function name is required")]
    MissingFunctionName,
    #[error("function description is required")]
    MissingFunctionDescription,
}
