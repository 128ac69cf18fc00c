//! The platform's own model service.
//!
//! Speaks the Ollama HTTP API (`/api/version`, `/api/tags`, `/api/chat`) on
//! localhost:11434 by default. Answers arrive whole and there is no tool
//! calling, so every stream here is a single fragment.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::llm_engine::provider::{
    single_chunk_stream, single_response_stream, CompletionRequest, LlmError, LlmProvider,
    Message, ProviderCapabilities, ResponseStream, TextStream, ToolCall,
};
use crate::tools::ToolResult;

#[derive(Serialize, Deserialize)]
struct ChatTurn {
    role: String,
    content: String,
}

impl From<&Message> for ChatTurn {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
        }
    }
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<ChatTurn>,
    stream: bool,
    options: SamplingOptions<'a>,
}

/// Field names follow the service's `options` object
#[derive(Serialize)]
struct SamplingOptions<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Deserialize)]
struct ChatReply {
    message: ChatTurn,
}

#[derive(Deserialize)]
struct Installed {
    models: Vec<InstalledModel>,
}

#[derive(Deserialize)]
struct InstalledModel {
    name: String,
}

#[derive(Deserialize)]
struct ServiceVersion {
    version: String,
}

/// Where the service lives and which of its models to use
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub model: String,
    /// Context window override, sent as `num_ctx`
    pub context_length: Option<u32>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            timeout_secs: 120,
            model: crate::llm_engine::model_manager::registry::SYSTEM_DEFAULT_MODEL.to_string(),
            context_length: None,
        }
    }
}

/// Whether an installed tag such as `llama3.2:latest` satisfies `wanted`
fn is_installed(tags: &[String], wanted: &str) -> bool {
    tags.iter()
        .any(|tag| tag == wanted || tag.split(':').next() == Some(wanted))
}

pub struct SystemProvider {
    config: SystemConfig,
    client: Client,
    /// One request in flight at a time
    busy: Arc<Mutex<()>>,
}

impl SystemProvider {
    pub fn new(config: SystemConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::ProviderUnavailable(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            busy: Arc::new(Mutex::new(())),
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// GET a service endpoint; any failure means the service is not usable
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, LlmError> {
        let url = self.endpoint(path);
        let unavailable = |reason: String| {
            LlmError::ProviderUnavailable(format!("model service at {}: {}", url, reason))
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(format!("HTTP {}", status)));
        }
        response.json().await.map_err(|e| unavailable(e.to_string()))
    }

    /// Version string reported by the running service
    pub async fn check_connection(&self) -> Result<String, LlmError> {
        self.get_json::<ServiceVersion>("version")
            .await
            .map(|v| v.version)
    }

    /// Models installed in the service
    pub async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let installed: Installed = self.get_json("tags").await?;
        Ok(installed.models.into_iter().map(|m| m.name).collect())
    }

    async fn chat(&self, request: CompletionRequest) -> Result<String, LlmError> {
        self.capabilities()
            .check_request(self.provider_name(), &request)?;

        let body = ChatBody {
            model: &self.config.model,
            messages: request.messages.iter().map(ChatTurn::from).collect(),
            stream: false,
            options: SamplingOptions {
                temperature: request.temperature,
                top_p: request.top_p,
                num_predict: request.max_tokens,
                num_ctx: self.config.context_length,
                stop: request.stop.as_deref(),
            },
        };

        let _busy = self.busy.lock().await;
        let response = self
            .client
            .post(self.endpoint("chat"))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(format!("Chat request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::InferenceFailed(format!("HTTP {}: {}", status, detail)));
        }

        let reply: ChatReply = response
            .json()
            .await
            .map_err(|e| LlmError::RequestFailed(format!("Failed to decode chat reply: {}", e)))?;
        Ok(reply.message.content)
    }
}

#[async_trait]
impl LlmProvider for SystemProvider {
    fn provider_name(&self) -> &'static str {
        "system"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: false,
            tool_calling: false,
            vision: false,
        }
    }

    async fn prewarm(&self) -> Result<(), LlmError> {
        let version = self.check_connection().await?;
        let models = self.list_models().await?;

        if !is_installed(&models, &self.config.model) {
            return Err(LlmError::ProviderUnavailable(format!(
                "{} is not installed in the model service (have {})",
                self.config.model,
                models.join(", ")
            )));
        }

        log::info!("Model service {} serving {}", version, self.config.model);
        Ok(())
    }

    async fn text(&self, request: CompletionRequest) -> Result<String, LlmError> {
        self.chat(request).await
    }

    async fn text_stream(&self, request: CompletionRequest) -> Result<TextStream, LlmError> {
        Ok(single_chunk_stream(self.chat(request).await?))
    }

    async fn response_stream(&self, request: CompletionRequest) -> Result<ResponseStream, LlmError> {
        Ok(single_response_stream(self.chat(request).await?))
    }

    async fn generate_tool_calls(&self, _request: CompletionRequest) -> Result<Vec<ToolCall>, LlmError> {
        Err(LlmError::UnsupportedOperation(
            "Tool calls are not supported by the system model".to_string(),
        ))
    }

    async fn resume(
        &self,
        _tool_calls: &[ToolCall],
        _tool_outputs: &[ToolResult],
        _original_request: &CompletionRequest,
    ) -> Result<String, LlmError> {
        Err(LlmError::UnsupportedOperation(
            "Resuming after tool calls is not supported by the system model".to_string(),
        ))
    }

    async fn shutdown(&self) -> Result<(), LlmError> {
        log::debug!("Released model service client");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use futures_util::TryStreamExt;
    use tokio::net::TcpListener;

    async fn start_service(models: Vec<&'static str>) -> String {
        let tags = serde_json::json!({
            "models": models.iter().map(|m| serde_json::json!({"name": m})).collect::<Vec<_>>()
        });
        let app = Router::new()
            .route("/api/version", get(|| async { Json(serde_json::json!({"version": "0.5.0"})) }))
            .route(
                "/api/tags",
                get(move || {
                    let tags = tags.clone();
                    async move { Json(tags) }
                }),
            )
            .route(
                "/api/chat",
                post(|Json(body): Json<serde_json::Value>| async move {
                    let last = body["messages"]
                        .as_array()
                        .and_then(|m| m.last())
                        .and_then(|m| m["content"].as_str())
                        .unwrap_or("")
                        .to_string();
                    Json(serde_json::json!({
                        "model": body["model"],
                        "message": {"role": "assistant", "content": format!("echo: {}", last)},
                        "done": true
                    }))
                }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn provider(base_url: String) -> SystemProvider {
        SystemProvider::new(SystemConfig {
            base_url,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_stream_is_single_fragment() {
        let provider = provider(start_service(vec!["llama3.2:latest"]).await);
        provider.prewarm().await.unwrap();

        let chunks: Vec<String> = provider
            .text_stream(CompletionRequest::new(vec![Message::user("hello")]))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks, vec!["echo: hello"]);
    }

    #[tokio::test]
    async fn test_prewarm_requires_installed_model() {
        let provider = provider(start_service(vec!["mistral:latest"]).await);
        assert!(matches!(
            provider.prewarm().await,
            Err(LlmError::ProviderUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let provider = provider("http://127.0.0.1:9".to_string());
        assert!(matches!(
            provider.prewarm().await,
            Err(LlmError::ProviderUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_tool_operations_unsupported() {
        let provider = provider("http://127.0.0.1:9".to_string());
        let request = CompletionRequest::new(vec![Message::user("hi")]);
        assert!(matches!(
            provider.generate_tool_calls(request.clone()).await,
            Err(LlmError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            provider.resume(&[], &[], &request).await,
            Err(LlmError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            provider.resume_stream(&[], &[], &request).await,
            Err(LlmError::UnsupportedOperation(_))
        ));
    }
}
