//! Turns a model descriptor into a ready backend client

use std::path::PathBuf;
use std::sync::Arc;

use crate::llm_engine::provider::{LlmError, LlmProvider};
use crate::llm_engine::providers::sidecar_provider::find_sidecar_path;
use crate::llm_engine::providers::{
    SidecarConfig, SidecarLoadParams, SidecarProvider, SystemConfig, SystemProvider, WeightFormat,
};
use crate::tools::ToolRegistry;
use super::downloader::FileDownloader;
use super::manager::LlmModelManager;
use super::tool_support::has_native_tool_support;
use super::types::ModelDescriptor;

pub struct ModelFactory {
    descriptor: ModelDescriptor,
    manager: Arc<LlmModelManager>,
    sidecar_path: Option<PathBuf>,
    sidecar_args: Vec<String>,
    system: SystemConfig,
}

impl ModelFactory {
    pub fn new(descriptor: ModelDescriptor, manager: Arc<LlmModelManager>) -> Self {
        Self {
            descriptor,
            manager,
            sidecar_path: None,
            sidecar_args: Vec::new(),
            system: SystemConfig::default(),
        }
    }

    /// Use a specific engine binary instead of searching for one
    pub fn with_sidecar(mut self, path: PathBuf, args: Vec<String>) -> Self {
        self.sidecar_path = Some(path);
        self.sidecar_args = args;
        self
    }

    pub fn with_system_config(mut self, config: SystemConfig) -> Self {
        self.system = config;
        self
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn downloader(&self) -> Option<FileDownloader> {
        self.manager.downloader_for(&self.descriptor)
    }

    fn system_config(&self) -> SystemConfig {
        match &self.descriptor {
            ModelDescriptor::OsProvided {
                model,
                context_length,
            } => SystemConfig {
                model: model.clone(),
                context_length: Some(*context_length),
                ..self.system.clone()
            },
            _ => self.system.clone(),
        }
    }

    /// Fail early when the platform cannot run this model at all
    pub async fn prewarm(&self) -> Result<(), LlmError> {
        self.descriptor.validate()?;
        match &self.descriptor {
            ModelDescriptor::OsProvided { .. } => {
                SystemProvider::new(self.system_config())?.prewarm().await
            }
            _ => find_sidecar_path(self.sidecar_path.as_deref()).map(|_| ()),
        }
    }

    /// Whether every required asset is present; always true without assets
    pub fn is_downloaded(&self) -> bool {
        self.downloader().map(|d| d.is_downloaded()).unwrap_or(true)
    }

    /// Weights file, or weights directory for accelerated-local models
    pub fn model_path(&self) -> Option<PathBuf> {
        match &self.descriptor {
            ModelDescriptor::AcceleratedLocal { id, .. } => Some(self.manager.repo_dir(id)),
            ModelDescriptor::QuantizedLocal { id, model_file, .. } => {
                Some(self.manager.repo_dir(id).join(model_file))
            }
            ModelDescriptor::OsProvided { .. } => None,
        }
    }

    pub fn mmproj_path(&self) -> Option<PathBuf> {
        match &self.descriptor {
            ModelDescriptor::QuantizedLocal {
                id,
                mmproj_file: Some(mmproj),
                ..
            } => Some(self.manager.repo_dir(id).join(mmproj)),
            _ => None,
        }
    }

    /// Acquire every remote asset, reporting a fraction that ends at 1.0
    pub async fn download_model<F>(&self, on_progress: F) -> Result<(), LlmError>
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.descriptor.validate()?;
        match self.downloader() {
            Some(downloader) => downloader.download(on_progress).await,
            None => {
                on_progress(1.0);
                Ok(())
            }
        }
    }

    /// Construct the backend client; all-or-nothing
    pub async fn make_client(&self, tools: &ToolRegistry) -> Result<Arc<dyn LlmProvider>, LlmError> {
        self.descriptor.validate()?;

        if !tools.is_empty() && !self.descriptor.supports_tools() {
            return Err(LlmError::UnsupportedOperation(format!(
                "{} does not support tool calling",
                self.descriptor.remote_id().unwrap_or("This model")
            )));
        }
        if !self.is_downloaded() {
            return Err(LlmError::Configuration(format!(
                "Assets for {} are not downloaded",
                self.descriptor.remote_id().unwrap_or_default()
            )));
        }

        let provider: Arc<dyn LlmProvider> = match &self.descriptor {
            ModelDescriptor::OsProvided { .. } => Arc::new(SystemProvider::new(self.system_config())?),
            local => {
                let model_path = self
                    .model_path()
                    .ok_or_else(|| LlmError::Configuration("Model has no weights path".to_string()))?;
                let format = match local {
                    ModelDescriptor::AcceleratedLocal { .. } => WeightFormat::Safetensors,
                    _ => WeightFormat::Gguf,
                };
                let id = local.remote_id().unwrap_or_default();
                let config = SidecarConfig {
                    sidecar_path: self.sidecar_path.clone(),
                    args: self.sidecar_args.clone(),
                    load: SidecarLoadParams {
                        model_path,
                        format,
                        mmproj_path: self.mmproj_path(),
                        context_length: local.context_length(),
                        extra_eos: local.extra_eos().to_vec(),
                    },
                    native_tools: has_native_tool_support(id),
                    supports_tools: local.supports_tools(),
                    supports_vision: local.supports_vision(),
                };
                Arc::new(SidecarProvider::new(config))
            }
        };

        if let Err(e) = provider.prewarm().await {
            log::error!("Failed to start {} backend: {}", provider.provider_name(), e);
            let _ = provider.shutdown().await;
            return Err(e);
        }
        Ok(provider)
    }
}
