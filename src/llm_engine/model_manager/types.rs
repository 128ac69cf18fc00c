//! Descriptors and progress types shared by the model store and downloader

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::llm_engine::provider::LlmError;
use super::tool_support::has_native_tool_support;

/// Which engine family a descriptor is constructed with
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    AcceleratedLocal,
    QuantizedLocal,
    OsProvided,
}

/// File patterns selecting the assets of a remote repository
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Globs(pub Vec<String>);

impl Globs {
    /// Weights directory of an accelerated-local model
    pub fn mlx() -> Self {
        Self(vec!["*.safetensors".to_string(), "*.json".to_string()])
    }

    /// Exactly the named files
    pub fn files<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn patterns(&self) -> &[String] {
        &self.0
    }
}

/// Declarative description of how to obtain and construct a model's backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelDescriptor {
    /// Safetensors weights directory served by the accelerated engine
    AcceleratedLocal {
        id: String,
        globs: Globs,
        context_length: u32,
        extra_eos: Vec<String>,
        supports_tools: bool,
        supports_vision: bool,
    },
    /// Single GGUF weights file, optionally with a vision projector
    QuantizedLocal {
        id: String,
        model_file: String,
        mmproj_file: Option<String>,
        context_length: u32,
        extra_eos: Vec<String>,
        supports_tools: bool,
        supports_vision: bool,
    },
    /// Model provided by the operating system's model service
    OsProvided {
        model: String,
        context_length: u32,
    },
}

impl ModelDescriptor {
    /// Descriptor for an arbitrary GGUF repository
    ///
    /// Tool support is derived from the model name.
    pub fn custom_gguf(repo: impl Into<String>, model_file: impl Into<String>) -> Self {
        let id = repo.into();
        let model_file = model_file.into();
        let supports_tools = has_native_tool_support(&id) || has_native_tool_support(&model_file);
        ModelDescriptor::QuantizedLocal {
            id,
            model_file,
            mmproj_file: None,
            context_length: 10240,
            extra_eos: Vec::new(),
            supports_tools,
            supports_vision: false,
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            ModelDescriptor::AcceleratedLocal { .. } => BackendKind::AcceleratedLocal,
            ModelDescriptor::QuantizedLocal { .. } => BackendKind::QuantizedLocal,
            ModelDescriptor::OsProvided { .. } => BackendKind::OsProvided,
        }
    }

    /// Remote repository reference; absent for OS-provided models
    pub fn remote_id(&self) -> Option<&str> {
        match self {
            ModelDescriptor::AcceleratedLocal { id, .. }
            | ModelDescriptor::QuantizedLocal { id, .. } => Some(id),
            ModelDescriptor::OsProvided { .. } => None,
        }
    }

    /// Patterns of every remote asset the model needs; None when nothing is
    /// downloaded
    pub fn globs(&self) -> Option<Globs> {
        match self {
            ModelDescriptor::AcceleratedLocal { globs, .. } => Some(globs.clone()),
            ModelDescriptor::QuantizedLocal {
                model_file,
                mmproj_file,
                ..
            } => Some(Globs::files(
                std::iter::once(model_file.clone()).chain(mmproj_file.clone()),
            )),
            ModelDescriptor::OsProvided { .. } => None,
        }
    }

    pub fn context_length(&self) -> u32 {
        match self {
            ModelDescriptor::AcceleratedLocal { context_length, .. }
            | ModelDescriptor::QuantizedLocal { context_length, .. }
            | ModelDescriptor::OsProvided { context_length, .. } => *context_length,
        }
    }

    pub fn extra_eos(&self) -> &[String] {
        match self {
            ModelDescriptor::AcceleratedLocal { extra_eos, .. }
            | ModelDescriptor::QuantizedLocal { extra_eos, .. } => extra_eos,
            ModelDescriptor::OsProvided { .. } => &[],
        }
    }

    pub fn supports_tools(&self) -> bool {
        match self {
            ModelDescriptor::AcceleratedLocal { supports_tools, .. }
            | ModelDescriptor::QuantizedLocal { supports_tools, .. } => *supports_tools,
            ModelDescriptor::OsProvided { .. } => false,
        }
    }

    pub fn supports_vision(&self) -> bool {
        match self {
            ModelDescriptor::AcceleratedLocal { supports_vision, .. }
            | ModelDescriptor::QuantizedLocal { supports_vision, .. } => *supports_vision,
            ModelDescriptor::OsProvided { .. } => false,
        }
    }

    /// Reject descriptors that declare missing or invalid files
    pub fn validate(&self) -> Result<(), LlmError> {
        match self {
            ModelDescriptor::AcceleratedLocal { id, globs, .. } => {
                require_repo(id)?;
                if globs.is_empty() || globs.patterns().iter().any(|g| g.trim().is_empty()) {
                    return Err(LlmError::Configuration(format!(
                        "{} declares no weight files",
                        id
                    )));
                }
            }
            ModelDescriptor::QuantizedLocal {
                id,
                model_file,
                mmproj_file,
                supports_vision,
                ..
            } => {
                require_repo(id)?;
                require_gguf(id, model_file)?;
                if let Some(mmproj) = mmproj_file {
                    require_gguf(id, mmproj)?;
                }
                if *supports_vision && mmproj_file.is_none() {
                    return Err(LlmError::Configuration(format!(
                        "{} supports vision but declares no projector file",
                        id
                    )));
                }
            }
            ModelDescriptor::OsProvided { model, .. } => {
                if model.trim().is_empty() {
                    return Err(LlmError::Configuration(
                        "OS-provided model has no name".to_string(),
                    ));
                }
            }
        }
        if self.context_length() == 0 {
            return Err(LlmError::Configuration(
                "Context length must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn require_repo(id: &str) -> Result<(), LlmError> {
    if id.trim().is_empty() {
        return Err(LlmError::Configuration(
            "Model has an empty repository id".to_string(),
        ));
    }
    Ok(())
}

fn require_gguf(id: &str, file: &str) -> Result<(), LlmError> {
    if file.trim().is_empty() || !file.to_lowercase().ends_with(".gguf") {
        return Err(LlmError::Configuration(format!(
            "{} declares invalid weight file '{}'",
            id, file
        )));
    }
    Ok(())
}

/// Snapshot of one transfer, published to progress subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadProgress {
    pub model_id: String,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    /// Combined fraction in [0, 1]
    pub fraction: f64,
    pub status: DownloadStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Verifying,
    Complete,
    Failed(String),
}

impl DownloadStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, DownloadStatus::Complete | DownloadStatus::Failed(_))
    }
}

/// One transfer of a repository's matching files into a destination directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadTask {
    pub repo_id: String,
    pub globs: Globs,
    pub destination: PathBuf,
    pub status: DownloadStatus,
    pub fraction: f64,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
}

impl DownloadTask {
    pub fn progress(&self) -> DownloadProgress {
        DownloadProgress {
            model_id: self.repo_id.clone(),
            downloaded_bytes: self.downloaded_bytes,
            total_bytes: self.total_bytes,
            fraction: self.fraction,
            status: self.status.clone(),
        }
    }
}

/// Information about a locally downloaded model repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalModelInfo {
    pub id: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub files: Vec<String>,
}
