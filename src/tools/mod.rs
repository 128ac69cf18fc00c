//! Tools the model can call during a chat turn

pub mod executor;
pub mod portfolio;
pub mod registry;

pub use executor::{execute_all, execute_tool, resolve_all, ToolResult};
pub use registry::{ToolDescriptor, ToolProvider, ToolRegistry};
