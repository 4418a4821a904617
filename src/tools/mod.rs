mod errors;
mod registry;
mod schema;
mod tool;
mod tool_builder;

pub use errors::ToolError;
pub use registry::{resolve_call, ResolvedToolCall, ToolRegistry};
pub use schema::{build_schema, DerivedSchema};
pub use tool::*;
pub use tool_builder::*;
