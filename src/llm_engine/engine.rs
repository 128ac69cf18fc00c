//! LLM Engine - model selection and the active session
//!
//! Handles model load/unload, download progress, tool enablement, and
//! forwards prompts to the current `Session`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::chat::{Session, SessionConfig};
use crate::llm_engine::model_manager::{LlmModel, LlmModelManager, ModelFactory};
use crate::llm_engine::provider::{Attachment, LlmError, Message, TextStream};
use crate::llm_engine::providers::SystemConfig;
use crate::tools::ToolRegistry;

struct EngineState {
    model: LlmModel,
    tools_enabled: bool,
    session: Option<Arc<Session>>,
}

/// The main LLM engine that owns the selected model and its session
pub struct LlmEngine {
    manager: Arc<LlmModelManager>,
    tools: Arc<ToolRegistry>,
    config: SessionConfig,
    sidecar: Option<(PathBuf, Vec<String>)>,
    system: SystemConfig,
    state: RwLock<EngineState>,
    /// Cancels the load in progress, if any
    load_token: Mutex<CancellationToken>,
    loading: AtomicUsize,
    progress: watch::Sender<f64>,
}

impl LlmEngine {
    pub fn new(
        manager: Arc<LlmModelManager>,
        tools: Arc<ToolRegistry>,
        system_prompt: impl Into<String>,
    ) -> Self {
        let model = LlmModel::default();
        let (progress, _) = watch::channel(0.0);
        Self {
            manager,
            config: SessionConfig::with_system_prompt(system_prompt),
            state: RwLock::new(EngineState {
                model,
                tools_enabled: false,
                session: None,
            }),
            tools,
            sidecar: None,
            system: SystemConfig::default(),
            load_token: Mutex::new(CancellationToken::new()),
            loading: AtomicUsize::new(0),
            progress,
        }
    }

    /// Session settings other than the system prompt
    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a specific engine binary for local models
    pub fn with_sidecar(mut self, path: PathBuf, args: Vec<String>) -> Self {
        self.sidecar = Some((path, args));
        self
    }

    pub fn with_system_config(mut self, config: SystemConfig) -> Self {
        self.system = config;
        self
    }

    pub fn manager(&self) -> &Arc<LlmModelManager> {
        &self.manager
    }

    pub async fn model(&self) -> LlmModel {
        self.state.read().await.model
    }

    /// Select another model; the current one is unloaded and must be loaded again
    ///
    /// Tools stay enabled only if the new model can call them.
    pub async fn set_model(&self, model: LlmModel) -> Result<(), LlmError> {
        self.cancel_load();
        let previous = {
            let mut state = self.state.write().await;
            if state.model == model && state.session.is_some() {
                return Ok(());
            }
            state.model = model;
            state.tools_enabled = state.tools_enabled && model.supports_tools();
            state.session.take()
        };
        log::info!("Selected model {}", model.id());
        self.progress.send_replace(0.0);
        shutdown_session(previous).await;
        Ok(())
    }

    /// Off until `toggle_tools` turns it on
    pub async fn tools_enabled(&self) -> bool {
        self.state.read().await.tools_enabled
    }

    /// Flip tool enablement, rebuilding the session if one is loaded
    pub async fn toggle_tools(&self) -> Result<bool, LlmError> {
        let (enabled, loaded) = {
            let mut state = self.state.write().await;
            let enable = !state.tools_enabled;
            if enable && !state.model.supports_tools() {
                return Err(LlmError::UnsupportedOperation(format!(
                    "{} does not support tool calling",
                    state.model.name()
                )));
            }
            if enable && self.tools.is_empty() {
                return Err(LlmError::InvalidRequest("No tools are registered".to_string()));
            }
            state.tools_enabled = enable;
            (enable, state.session.is_some())
        };
        log::info!("Tools {}", if enabled { "enabled" } else { "disabled" });
        if loaded {
            self.load().await?;
        }
        Ok(enabled)
    }

    fn factory(&self, model: LlmModel) -> ModelFactory {
        let factory = ModelFactory::new(model.descriptor(), Arc::clone(&self.manager))
            .with_system_config(self.system.clone());
        match &self.sidecar {
            Some((path, args)) => factory.with_sidecar(path.clone(), args.clone()),
            None => factory,
        }
    }

    fn cancel_load(&self) -> CancellationToken {
        let mut token = self.load_token.lock().unwrap_or_else(|e| e.into_inner());
        token.cancel();
        *token = CancellationToken::new();
        token.clone()
    }

    /// Download the selected model if needed and start a fresh session
    ///
    /// A load still running is cancelled first, and so is this one when
    /// `set_model` or `unload` is called before it finishes.
    pub async fn load(&self) -> Result<(), LlmError> {
        let token = self.cancel_load();
        let _loading = LoadingGuard::new(&self.loading);

        let (model, tools_enabled, previous) = {
            let mut state = self.state.write().await;
            (state.model, state.tools_enabled, state.session.take())
        };
        shutdown_session(previous).await;

        log::info!("Loading {} ({})", model.name(), model.id());
        self.progress.send_replace(0.0);
        let factory = self.factory(model);

        let session = tokio::select! {
            _ = token.cancelled() => {
                log::info!("Load of {} was cancelled", model.id());
                return Err(LlmError::Cancelled);
            }
            session = self.build_session(&factory, tools_enabled) => session?,
        };

        let mut state = self.state.write().await;
        if token.is_cancelled() || state.model != model {
            drop(state);
            shutdown_session(Some(Arc::new(session))).await;
            return Err(LlmError::Cancelled);
        }
        state.session = Some(Arc::new(session));
        log::info!("{} is ready", model.name());
        Ok(())
    }

    async fn build_session(
        &self,
        factory: &ModelFactory,
        tools_enabled: bool,
    ) -> Result<Session, LlmError> {
        let progress = self.progress.clone();
        factory
            .download_model(move |fraction| {
                progress.send_if_modified(|current| {
                    if fraction > *current {
                        *current = fraction;
                        true
                    } else {
                        false
                    }
                });
            })
            .await?;

        let tools = if tools_enabled {
            Arc::clone(&self.tools)
        } else {
            Arc::new(ToolRegistry::new())
        };
        let provider = factory.make_client(&tools).await?;
        match Session::new(Arc::clone(&provider), tools, self.config.clone()) {
            Ok(session) => Ok(session),
            Err(e) => {
                let _ = provider.shutdown().await;
                Err(e)
            }
        }
    }

    /// Drop the session and stop its backend
    pub async fn unload(&self) {
        self.cancel_load();
        let previous = self.state.write().await.session.take();
        shutdown_session(previous).await;
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.session.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst) > 0
    }

    /// Fraction of the last or current model download
    pub fn download_progress(&self) -> f64 {
        *self.progress.borrow()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<f64> {
        self.progress.subscribe()
    }

    pub async fn session(&self) -> Option<Arc<Session>> {
        self.state.read().await.session.clone()
    }

    /// Start a turn on the loaded session
    pub async fn ask(
        &self,
        prompt: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<TextStream, LlmError> {
        let session = self.session().await.ok_or(LlmError::NotInitialized)?;
        session.stream_response(prompt, attachments)
    }

    pub async fn messages(&self) -> Vec<Message> {
        match self.session().await {
            Some(session) => session.messages(),
            None => Vec::new(),
        }
    }

    /// Clear the conversation back to the system prompt
    pub async fn reset_messages(&self) -> Result<(), LlmError> {
        let session = self.session().await.ok_or(LlmError::NotInitialized)?;
        session.reset(&self.config.system_prompt)
    }
}

async fn shutdown_session(session: Option<Arc<Session>>) {
    if let Some(session) = session {
        if let Err(e) = session.provider().shutdown().await {
            log::warn!("Failed to stop {} backend: {}", session.provider().provider_name(), e);
        }
    }
}

struct LoadingGuard<'a>(&'a AtomicUsize);

impl<'a> LoadingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
