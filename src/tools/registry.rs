//! Tool registry
//!
//! Named, externally-provided data-fetch capabilities the model may call.

use anyhow::Result;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::llm_engine::provider::{LlmError, ToolDefinition};

/// Pure synchronous data-fetch function invoked with the model's arguments
pub type ToolProvider = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// A tool the model can call, with an observable invocation counter
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object
    pub parameters: Value,
    provider: ToolProvider,
    invocations: AtomicU64,
}

impl ToolDescriptor {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        provider: F,
    ) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            provider: Arc::new(provider),
            invocations: AtomicU64::new(0),
        }
    }

    /// Run the provider. The counter is bumped whether or not it succeeds.
    pub fn invoke(&self, arguments: &Value) -> Result<Value> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        (self.provider)(arguments)
    }

    pub fn invocation_count(&self) -> u64 {
        self.invocations.load(Ordering::SeqCst)
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("invocations", &self.invocation_count())
            .finish()
    }
}

/// Ordered set of tools with unique names
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<ToolDescriptor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tools(tools: Vec<Arc<ToolDescriptor>>) -> Result<Self, LlmError> {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, tool: Arc<ToolDescriptor>) -> Result<(), LlmError> {
        if self.get(&tool.name).is_some() {
            return Err(LlmError::Configuration(format!(
                "Tool '{}' is registered twice",
                tool.name
            )));
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ToolDescriptor>> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ToolDescriptor>> {
        self.tools.iter()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }
}
