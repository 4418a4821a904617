use std::{collections::BTreeMap, sync::Arc};

use serde_json::Value;

use super::{
    errors::ToolError,
    tool::{AsyncToolFn, Function, FunctionParameters, Property, Tool, ToolExecutor, ToolType},
};

/// Explicit descriptor for tools whose arguments have no Rust type,
/// e.g. schemas loaded from configuration.
#[derive(Default)]
pub struct ToolBuilder {
    function_name: Option<String>,
    function_description: Option<String>,
    function_properties: BTreeMap<String, Property>,
    function_required: Vec<String>,
    executor: Option<ToolExecutor>,
}

impl std::fmt::Debug for ToolBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBuilder")
            .field("function_name", &self.function_name)
            .field("function_description", &self.function_description)
            .field("function_properties", &self.function_properties)
            .field("function_required", &self.function_required)
            .field("executor", &self.executor)
            .finish()
    }
}

impl ToolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name of the function for the tool. (Required)
    pub fn function_name(mut self, name: impl Into<String>) -> Self {
        self.function_name = Some(name.into());
        self
    }

    /// Sets the description of the function for the tool. (Required)
    pub fn function_description<T>(mut self, description: T) -> Self
    where
        T: Into<String>,
    {
        self.function_description = Some(description.into());
        self
    }

    /// Adds a property to the function's parameters.
    ///
    /// # parameters
    /// * `name` - The name of the property.
    /// * `property_type` - The JSON schema type of the property (e.g., "string", "number", "boolean").
    /// * `description` - A description of what the property represents.
    pub fn add_property(
        mut self,
        name: impl Into<String>,
        property_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.function_properties
            .insert(name.into(), Property::new(property_type, description));
        self
    }

    /// Adds a fully specified property, e.g. an enum or a nested object.
    pub fn add_property_schema(mut self, name: impl Into<String>, property: Property) -> Self {
        self.function_properties.insert(name.into(), property);
        self
    }

    /// Marks a property as required. `build` fails if it was never added.
    pub fn add_required_property(mut self, name: impl Into<String>) -> Self {
        self.function_required.push(name.into());
        self
    }

    /// Sets an asynchronous executor.
    pub fn executor(mut self, exec: AsyncToolFn) -> Self {
        self.executor = Some(ToolExecutor::Async(exec));
        self
    }

    /// Sets a blocking executor over raw JSON arguments.
    pub fn executor_fn<F>(mut self, exec: F) -> Self
    where
        F: Fn(Value) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        self.executor = Some(ToolExecutor::Blocking(Arc::new(exec)));
        self
    }

    /// Consumes the builder and attempts to create a `Tool`.
    pub fn build(self) -> Result<Tool, ToolError> {
        let function_name = self.function_name.ok_or(ToolError::MissingFunctionName)?;
        let function_description = self
            .function_description
            .ok_or(ToolError::MissingFunctionDescription)?;
        let executor = self
            .executor
            .ok_or_else(|| ToolError::MissingExecutor(function_name.clone()))?;

        if let Some(missing) = self
            .function_required
            .iter()
            .find(|r| !self.function_properties.contains_key(*r))
        {
            return Err(ToolError::Schema(format!(
                "required parameter `{missing}` of `{function_name}` has no property"
            )));
        }

        Ok(Tool {
            tool_type: ToolType::Function,
            function: Function {
                name: function_name,
                description: function_description,
                parameters: FunctionParameters {
                    param_type: "object".to_string(),
                    properties: self.function_properties,
                    required: self.function_required,
                },
            },
            executor: Some(executor),
            argument_check: None,
        })
    }
}
