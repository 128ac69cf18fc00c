//! Which model families ship a chat template with a tool slot.
//!
//! Everything else goes through prompt-level tool calling, see
//! `llm_engine::tool_orchestration`.

/// Name fragments of families whose template renders tool definitions.
/// Matching is case-insensitive on the repo id or weight file name.
pub const NATIVE_TOOL_MODELS: &[&str] = &[
    "qwen",
    "hermes",
    "mistral",
    "mixtral",
    "command-r",
    "functionary",
    "firefunction",
    "nexusraven",
    "gorilla",
];

pub fn has_native_tool_support(model_id: &str) -> bool {
    let id = model_id.to_ascii_lowercase();
    NATIVE_TOOL_MODELS.iter().any(|family| id.contains(family))
}

/// Like [`has_native_tool_support`], but an explicit answer from the caller
/// takes precedence over the name lookup.
pub fn has_native_tool_support_with_override(model_id: &str, user_override: Option<bool>) -> bool {
    user_override.unwrap_or_else(|| has_native_tool_support(model_id))
}
