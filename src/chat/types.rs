//! Chat session configuration and state

use serde::{Deserialize, Serialize};

/// Default cap on tool-call rounds within one turn
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 5;

/// Per-session generation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// First message of every fresh log; empty means no system message
    pub system_prompt: String,
    pub max_tool_rounds: usize,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            max_tokens: Some(2048),
            temperature: Some(0.7),
        }
    }
}

impl SessionConfig {
    pub fn with_system_prompt(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            ..Default::default()
        }
    }
}

/// Where a session is within its current turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    /// A model request is generating
    AwaitingModel,
    /// Tool providers are running
    ToolDispatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"system_prompt": "be brief"}"#).unwrap();
        assert_eq!(config.system_prompt, "be brief");
        assert_eq!(config.max_tool_rounds, 5);
        assert_eq!(config.max_tokens, Some(2048));
    }
}
