//! Streaming chat sessions with tool calling over on-device language models
//!
//! A model is picked from [`LlmModel`], its assets are fetched with resumable
//! downloads, and a [`Session`] wraps the resulting backend client with a
//! message log and a [`ToolRegistry`]. [`LlmEngine`] ties these together for
//! an application.

pub mod chat;
pub mod llm_engine;
pub mod tools;

pub use chat::{Session, SessionConfig, SessionState};
pub use llm_engine::model_manager::{LlmModel, LlmModelManager, ModelDescriptor, ModelFactory};
pub use llm_engine::{LlmEngine, LlmError, LlmProvider, Message, TextStream};
pub use tools::{ToolDescriptor, ToolRegistry};

/// Initialize env_logger to output to stderr (reads RUST_LOG env var)
///
/// Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
