//! Tool execution for calls made by the LLM

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm_engine::provider::{LlmError, ToolCall};
use crate::tools::registry::ToolRegistry;

/// Result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
    pub is_error: bool,
}

/// Check that every call names a registered tool before any of them runs
pub fn resolve_all(registry: &ToolRegistry, calls: &[ToolCall]) -> Result<(), LlmError> {
    match calls.iter().find(|c| registry.get(c.name()).is_none()) {
        Some(call) => Err(LlmError::UnknownTool(call.name().to_string())),
        None => Ok(()),
    }
}

/// Execute a tool call and return the result
///
/// Provider failures are reported back to the model as an error result.
pub fn execute_tool(registry: &ToolRegistry, call: &ToolCall) -> Result<ToolResult, LlmError> {
    let tool = registry
        .get(call.name())
        .ok_or_else(|| LlmError::UnknownTool(call.name().to_string()))?;

    let arguments = call.arguments();
    log::debug!("Executing tool '{}' with args: {}", tool.name, arguments);

    let (content, is_error) = match tool.invoke(&arguments) {
        Ok(value) => (render_value(&value), false),
        Err(e) => {
            log::warn!("Tool '{}' failed: {:#}", tool.name, e);
            (format!("Error: {}", e), true)
        }
    };

    Ok(ToolResult {
        tool_call_id: call.id.clone(),
        name: tool.name.clone(),
        content,
        is_error,
    })
}

/// Run a whole round of calls in order
pub fn execute_all(registry: &ToolRegistry, calls: &[ToolCall]) -> Result<Vec<ToolResult>, LlmError> {
    resolve_all(registry, calls)?;
    calls.iter().map(|c| execute_tool(registry, c)).collect()
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
