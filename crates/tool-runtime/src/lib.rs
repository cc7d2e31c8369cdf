pub mod signature;
pub mod tool;

pub use signature::{ParamType, ToolParameter, ToolSignature};
pub use tool::{Tool, ToolContext, ToolDefinition, ToolError, ToolResult};
