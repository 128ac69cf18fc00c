//! LLM Model Registry - the closed set of supported models

use serde::{Deserialize, Serialize};

use super::types::{Globs, ModelDescriptor};

/// Context window used for every quantized-local model
const LLAMA_CONTEXT_LENGTH: u32 = 10240;
const MLX_CONTEXT_LENGTH: u32 = 8192;
const SYSTEM_CONTEXT_LENGTH: u32 = 4096;

/// Model served by the system model service when `SystemDefault` is selected
pub const SYSTEM_DEFAULT_MODEL: &str = "llama3.2";

const MMPROJ_F16: &str = "mmproj-model-f16.gguf";

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LlmModel {
    Qwen3,
    Qwen3_4b,
    Qwen2_5Vl3b,
    Gemma3_4bMlx,
    Phi4Mini,
    Gemma3,
    Gemma3_4b,
    MobileVlm3b,
    SystemDefault,
}

impl Default for LlmModel {
    fn default() -> Self {
        LlmModel::Qwen3
    }
}

impl LlmModel {
    pub fn all() -> &'static [LlmModel] {
        &[
            LlmModel::Qwen3,
            LlmModel::Qwen3_4b,
            LlmModel::Qwen2_5Vl3b,
            LlmModel::Gemma3_4bMlx,
            LlmModel::Phi4Mini,
            LlmModel::Gemma3,
            LlmModel::Gemma3_4b,
            LlmModel::MobileVlm3b,
            LlmModel::SystemDefault,
        ]
    }

    /// Remote repository reference, also the download key and label
    pub fn id(&self) -> &'static str {
        match self {
            LlmModel::Qwen3 => "mlx-community/Qwen3-1.7B-4bit",
            LlmModel::Qwen3_4b => "mlx-community/Qwen3-4B-4bit",
            LlmModel::Qwen2_5Vl3b => "mlx-community/Qwen2.5-VL-3B-Instruct-abliterated-4bit",
            LlmModel::Gemma3_4bMlx => "mlx-community/gemma-3-4b-it-qat-4bit",
            LlmModel::Phi4Mini => "unsloth/Phi-4-mini-instruct-GGUF",
            LlmModel::Gemma3 => "lmstudio-community/gemma-3-1B-it-qat-GGUF",
            LlmModel::Gemma3_4b => "lmstudio-community/gemma-3-4B-it-qat-GGUF",
            LlmModel::MobileVlm3b => "Blombert/MobileVLM-3B-GGUF",
            LlmModel::SystemDefault => "system-default",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LlmModel::Qwen3 => "MLX / Qwen3 1.7B",
            LlmModel::Qwen3_4b => "MLX / Qwen3 4B",
            LlmModel::Qwen2_5Vl3b => "MLX / Qwen2.5VL 3B",
            LlmModel::Gemma3_4bMlx => "MLX / Gemma3 4B",
            LlmModel::Phi4Mini => "llama.cpp / Phi-4 Mini 3.8B",
            LlmModel::Gemma3 => "llama.cpp / Gemma3 1B",
            LlmModel::Gemma3_4b => "llama.cpp / Gemma3 4B",
            LlmModel::MobileVlm3b => "llama.cpp / MobileVLM 3B",
            LlmModel::SystemDefault => "System model service",
        }
    }

    /// GGUF weights file for quantized-local models
    pub fn filename(&self) -> Option<&'static str> {
        match self {
            LlmModel::Phi4Mini => Some("Phi-4-mini-instruct-Q4_K_M.gguf"),
            LlmModel::Gemma3 => Some("gemma-3-1B-it-QAT-Q4_0.gguf"),
            LlmModel::Gemma3_4b => Some("gemma-3-4B-it-QAT-Q4_0.gguf"),
            LlmModel::MobileVlm3b => Some("ggml-MobileVLM-3B-q5_k_s.gguf"),
            _ => None,
        }
    }

    /// Vision projector file; Gemma3 4B only ships one for desktop builds
    pub fn mmproj_filename(&self) -> Option<&'static str> {
        match self {
            LlmModel::Gemma3_4b if cfg!(any(target_os = "ios", target_os = "android")) => None,
            LlmModel::Gemma3_4b | LlmModel::MobileVlm3b => Some(MMPROJ_F16),
            _ => None,
        }
    }

    pub fn supports_vision(&self) -> bool {
        match self {
            LlmModel::Qwen2_5Vl3b | LlmModel::Gemma3_4bMlx | LlmModel::MobileVlm3b => true,
            LlmModel::Gemma3_4b => self.mmproj_filename().is_some(),
            _ => false,
        }
    }

    pub fn extra_eos(&self) -> Vec<String> {
        match self {
            LlmModel::Gemma3_4bMlx => vec!["<end_of_turn>".to_string()],
            _ => Vec::new(),
        }
    }

    pub fn supports_tools(&self) -> bool {
        matches!(
            self,
            LlmModel::Qwen3
                | LlmModel::Qwen3_4b
                | LlmModel::Phi4Mini
                | LlmModel::Gemma3
                | LlmModel::Gemma3_4b
        )
    }

    pub fn descriptor(&self) -> ModelDescriptor {
        match self {
            LlmModel::Qwen3 | LlmModel::Qwen3_4b | LlmModel::Qwen2_5Vl3b | LlmModel::Gemma3_4bMlx => {
                ModelDescriptor::AcceleratedLocal {
                    id: self.id().to_string(),
                    globs: Globs::mlx(),
                    context_length: MLX_CONTEXT_LENGTH,
                    extra_eos: self.extra_eos(),
                    supports_tools: self.supports_tools(),
                    supports_vision: self.supports_vision(),
                }
            }
            LlmModel::Phi4Mini | LlmModel::Gemma3 | LlmModel::Gemma3_4b | LlmModel::MobileVlm3b => {
                ModelDescriptor::QuantizedLocal {
                    id: self.id().to_string(),
                    model_file: self.filename().unwrap_or_default().to_string(),
                    mmproj_file: self.mmproj_filename().map(str::to_string),
                    context_length: LLAMA_CONTEXT_LENGTH,
                    extra_eos: self.extra_eos(),
                    supports_tools: self.supports_tools(),
                    supports_vision: self.supports_vision(),
                }
            }
            LlmModel::SystemDefault => ModelDescriptor::OsProvided {
                model: SYSTEM_DEFAULT_MODEL.to_string(),
                context_length: SYSTEM_CONTEXT_LENGTH,
            },
        }
    }

    pub fn from_id(id: &str) -> Option<LlmModel> {
        Self::all().iter().copied().find(|m| m.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_engine::model_manager::types::BackendKind;

    #[test]
    fn test_every_descriptor_validates() {
        for model in LlmModel::all() {
            let descriptor = model.descriptor();
            assert!(descriptor.validate().is_ok(), "{} is invalid", model.id());
            assert_eq!(descriptor.supports_tools(), model.supports_tools());
            assert_eq!(descriptor.supports_vision(), model.supports_vision());
        }
    }

    #[test]
    fn test_backend_kinds() {
        assert_eq!(LlmModel::Qwen3.descriptor().kind(), BackendKind::AcceleratedLocal);
        assert_eq!(LlmModel::Phi4Mini.descriptor().kind(), BackendKind::QuantizedLocal);
        assert_eq!(LlmModel::SystemDefault.descriptor().kind(), BackendKind::OsProvided);
    }

    #[test]
    fn test_ids_round_trip() {
        for model in LlmModel::all() {
            assert_eq!(LlmModel::from_id(model.id()), Some(*model));
        }
        assert_eq!(LlmModel::from_id("nope"), None);
    }

    #[test]
    fn test_gemma_mlx_stops_on_end_of_turn() {
        assert_eq!(LlmModel::Gemma3_4bMlx.extra_eos(), vec!["<end_of_turn>"]);
        assert!(LlmModel::Qwen3.extra_eos().is_empty());
    }
}
