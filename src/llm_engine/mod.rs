//! LLM Engine module
//!
//! Supports two backend families:
//! - Local models run by the inference sidecar (safetensors or GGUF weights)
//! - The system model service (OS-provided models over its local HTTP API)

pub mod provider;
pub mod providers;
pub mod model_manager;
pub mod tool_orchestration;
pub mod engine;

pub use provider::{
    single_chunk_stream, Attachment, AttachmentKind, CompletionRequest, LlmError, LlmProvider,
    Message, MessageRole, ProviderCapabilities, ResponseChunk, ResponseStream, TextStream,
    ToolCall, ToolDefinition,
};
pub use engine::LlmEngine;
