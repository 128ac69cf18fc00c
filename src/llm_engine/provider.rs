//! Backend-neutral chat vocabulary and the `LlmProvider` seam.
//!
//! Both the sidecar engine and the system model service sit behind
//! `dyn LlmProvider`; sessions never see which one they are driving.

use async_trait::async_trait;
use base64::Engine as _;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tools::ToolResult;

/// Everything that can go wrong between a prompt and its answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LlmError {
    /// Descriptor declares missing or invalid files
    Configuration(String),
    /// Network-level transfer failure (partial bytes are kept)
    TransferFailed(String),
    /// No remote asset matched the requested patterns
    AssetNotFound(String),
    /// Platform capability missing (engine binary, system service)
    ProviderUnavailable(String),
    /// Operation not advertised by the backend
    UnsupportedOperation(String),
    /// Model referenced a tool that is not registered
    UnknownTool(String),
    /// Tool-call round cap reached
    ToolLoopExceeded(usize),
    /// Backend-internal failure (context overflow, engine error)
    InferenceFailed(String),
    /// Transport to the engine failed
    RequestFailed(String),
    /// Request rejected before reaching the backend
    InvalidRequest(String),
    /// A previous turn is still being consumed
    SessionBusy,
    /// Operation cancelled by the caller
    Cancelled,
    /// No model loaded
    NotInitialized,
    /// Anything without a dedicated variant
    Other(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::Configuration(msg) => write!(f, "invalid model configuration: {}", msg),
            LlmError::TransferFailed(msg) => write!(f, "transfer failed: {}", msg),
            LlmError::AssetNotFound(msg) => write!(f, "no matching asset: {}", msg),
            LlmError::ProviderUnavailable(msg) => write!(f, "backend unavailable: {}", msg),
            LlmError::UnsupportedOperation(msg) => write!(f, "unsupported: {}", msg),
            LlmError::UnknownTool(name) => write!(f, "model asked for unknown tool `{}`", name),
            LlmError::ToolLoopExceeded(rounds) => {
                write!(f, "gave up after {} tool rounds", rounds)
            }
            LlmError::InferenceFailed(msg) => write!(f, "generation failed: {}", msg),
            LlmError::RequestFailed(msg) => write!(f, "engine transport error: {}", msg),
            LlmError::InvalidRequest(msg) => write!(f, "bad request: {}", msg),
            LlmError::SessionBusy => write!(f, "a previous answer is still streaming"),
            LlmError::Cancelled => write!(f, "cancelled"),
            LlmError::NotInitialized => write!(f, "no model loaded"),
            LlmError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for LlmError {}

/// Who authored a transcript entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
}

/// Media payload carried by a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn image(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            kind: AttachmentKind::Image,
            mime_type: mime_type.into(),
            data,
        }
    }

    /// Base64 payload as sent to the engines
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

/// One transcript entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Set on assistant turns that requested tools
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// On tool turns, the id of the call being answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// One invocation the model asked for, OpenAI-shaped
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: &serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.to_string(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Parsed arguments; malformed JSON becomes an empty object
    pub fn arguments(&self) -> serde_json::Value {
        if self.function.arguments.trim().is_empty() {
            return serde_json::json!({});
        }
        serde_json::from_str(&self.function.arguments).unwrap_or_else(|_| serde_json::json!({}))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON text as emitted by the model
    pub arguments: String,
}

/// Name, description and JSON Schema of a callable tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl Message {
    fn with_role(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            attachments: Vec::new(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content)
    }

    pub fn user_with_attachments(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            attachments,
            ..Self::with_role(MessageRole::User, content)
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, content)
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::with_role(MessageRole::Assistant, content)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(MessageRole::Tool, content)
        }
    }
}

/// Everything a backend needs for one generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    /// `None` leaves the cap to the backend
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    /// `auto`, `none` or `required`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            max_tokens: None,
            temperature: Some(0.7),
            top_p: None,
            stop: None,
            tools: None,
            tool_choice: None,
        }
    }
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_system_and_user(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self::new(vec![Message::system(system), Message::user(user)])
    }

    pub fn has_tools(&self) -> bool {
        self.tools.as_ref().map(|t| !t.is_empty()).unwrap_or(false)
    }

    pub fn has_attachments(&self) -> bool {
        self.messages.iter().any(|m| !m.attachments.is_empty())
    }

    /// The request that continues `self` after the given tool round.
    ///
    /// Appends the assistant tool-call message followed by one tool message per
    /// output, in call order.
    pub fn continued(&self, tool_calls: &[ToolCall], tool_outputs: &[ToolResult]) -> Self {
        self.continued_after("", tool_calls, tool_outputs)
    }

    /// Like `continued`, keeping the text the model produced alongside its
    /// tool calls in the assistant message
    pub fn continued_after(
        &self,
        text: &str,
        tool_calls: &[ToolCall],
        tool_outputs: &[ToolResult],
    ) -> Self {
        let mut next = self.clone();
        next.messages
            .push(Message::assistant_with_tool_calls(text, tool_calls.to_vec()));
        for output in tool_outputs {
            next.messages
                .push(Message::tool_result(&output.tool_call_id, &output.content));
        }
        next
    }
}

/// One element of a response stream, in backend emission order
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseChunk {
    Text(String),
    ToolCall(ToolCall),
}

/// Lazy, finite, non-restartable sequence of text fragments
pub type TextStream = BoxStream<'static, Result<String, LlmError>>;

/// Lazy sequence of text and tool-call fragments
pub type ResponseStream = BoxStream<'static, Result<ResponseChunk, LlmError>>;

/// Degrade a complete answer into a stream of exactly one fragment
pub fn single_chunk_stream(text: String) -> TextStream {
    stream::once(async move { Ok(text) }).boxed()
}

/// Degrade a complete answer into a response stream of exactly one text fragment
pub fn single_response_stream(text: String) -> ResponseStream {
    stream::once(async move { Ok(ResponseChunk::Text(text)) }).boxed()
}

/// What a backend advertises; requests needing more are refused up front
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ProviderCapabilities {
    /// Emits one fragment per generated chunk; otherwise streams degrade to a
    /// single fragment
    pub streaming: bool,
    pub tool_calling: bool,
    pub vision: bool,
}

impl ProviderCapabilities {
    /// Fail early when a request needs something this backend lacks
    pub fn check_request(&self, provider: &str, request: &CompletionRequest) -> Result<(), LlmError> {
        if request.has_tools() && !self.tool_calling {
            return Err(LlmError::UnsupportedOperation(format!(
                "{} does not support tool calling",
                provider
            )));
        }
        if request.has_attachments() && !self.vision {
            return Err(LlmError::UnsupportedOperation(format!(
                "{} does not accept image attachments",
                provider
            )));
        }
        Ok(())
    }

    pub fn require_tool_calling(&self, provider: &str) -> Result<(), LlmError> {
        if self.tool_calling {
            Ok(())
        } else {
            Err(LlmError::UnsupportedOperation(format!(
                "Tool calls are not supported by {}",
                provider
            )))
        }
    }
}

/// A chat backend.
///
/// Only one request may be in flight per instance; implementations serialize
/// generations internally, and a live stream counts as in flight until it is
/// exhausted or dropped.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short identifier used in logs and error messages
    fn provider_name(&self) -> &'static str;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Eagerly prepare the backend
    async fn prewarm(&self) -> Result<(), LlmError> {
        Ok(())
    }

    /// Single-shot completion
    async fn text(&self, request: CompletionRequest) -> Result<String, LlmError>;

    /// Text fragments as they are generated
    async fn text_stream(&self, request: CompletionRequest) -> Result<TextStream, LlmError>;

    /// Text and tool-call fragments as they are generated
    async fn response_stream(&self, request: CompletionRequest) -> Result<ResponseStream, LlmError>;

    /// Tool-calls-only request
    async fn generate_tool_calls(&self, request: CompletionRequest) -> Result<Vec<ToolCall>, LlmError>;

    /// Continue generation once tool outputs are available
    async fn resume(
        &self,
        tool_calls: &[ToolCall],
        tool_outputs: &[ToolResult],
        original_request: &CompletionRequest,
    ) -> Result<String, LlmError>;

    /// Streaming form of `resume`; later rounds may request tools again
    async fn resume_stream(
        &self,
        tool_calls: &[ToolCall],
        tool_outputs: &[ToolResult],
        original_request: &CompletionRequest,
    ) -> Result<ResponseStream, LlmError> {
        self.capabilities().require_tool_calling(self.provider_name())?;
        self.response_stream(original_request.continued(tool_calls, tool_outputs))
            .await
    }

    /// Release the backend; the instance is unusable afterwards
    async fn shutdown(&self) -> Result<(), LlmError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continued_request_orders_tool_messages() {
        let request = CompletionRequest::with_system_and_user("sys", "hi");
        let call = ToolCall::new("get_holdings", &serde_json::json!({}));
        let output = ToolResult {
            tool_call_id: call.id.clone(),
            name: "get_holdings".to_string(),
            content: "[]".to_string(),
            is_error: false,
        };

        let next = request.continued(&[call.clone()], &[output]);

        assert_eq!(next.messages.len(), 4);
        assert_eq!(next.messages[2].role, MessageRole::Assistant);
        assert_eq!(next.messages[2].tool_calls.as_ref().unwrap()[0], call);
        assert_eq!(next.messages[3].role, MessageRole::Tool);
        assert_eq!(next.messages[3].tool_call_id.as_deref(), Some(call.id.as_str()));
    }

    #[test]
    fn test_tool_call_arguments_fallback() {
        let mut call = ToolCall::new("x", &serde_json::json!({"limit": 3}));
        assert_eq!(call.arguments()["limit"], 3);

        call.function.arguments = "not json".to_string();
        assert_eq!(call.arguments(), serde_json::json!({}));
    }

    #[test]
    fn test_attachment_serializes_as_base64() {
        let message = Message::user_with_attachments(
            "look",
            vec![Attachment::image("image/png", vec![1, 2, 3])],
        );
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["attachments"][0]["data"], "AQID");

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_capabilities_reject_unadvertised_tools() {
        let caps = ProviderCapabilities {
            streaming: false,
            tool_calling: false,
            vision: false,
        };
        let mut request = CompletionRequest::new(vec![Message::user("hi")]);
        assert!(caps.check_request("system", &request).is_ok());

        request.tools = Some(vec![ToolDefinition {
            name: "t".to_string(),
            description: String::new(),
            parameters: serde_json::json!({}),
        }]);
        assert!(matches!(
            caps.check_request("system", &request),
            Err(LlmError::UnsupportedOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_single_chunk_stream_yields_once() {
        let chunks: Vec<_> = single_chunk_stream("whole answer".to_string())
            .collect::<Vec<_>>()
            .await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap(), "whole answer");
    }
}
