//! LLM Provider implementations
//!
//! Each provider implements the LlmProvider trait for a specific backend

pub mod sidecar_provider;
pub mod system_provider;

pub use sidecar_provider::{SidecarConfig, SidecarLoadParams, SidecarProvider, WeightFormat};
pub use system_provider::{SystemConfig, SystemProvider};
