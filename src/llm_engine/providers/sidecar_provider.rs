//! Local inference in a child process.
//!
//! The engine binary loads GGUF or safetensors weights and speaks JSON-RPC 2.0,
//! one object per line, on its stdin/stdout. A streaming `complete` call
//! answers with any number of `{"token": ..}` results followed by one
//! `{"done": true, ..}` result carrying the full content.

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

use crate::llm_engine::provider::{
    CompletionRequest, LlmError, LlmProvider, Message, ProviderCapabilities, ResponseChunk,
    ResponseStream, TextStream, ToolCall, ToolDefinition,
};
use crate::llm_engine::tool_orchestration::{parse_tool_calls, simulate_tools};
use crate::tools::ToolResult;

/// Default generation budget when a request sets none
const DEFAULT_MAX_TOKENS: u32 = 512;

#[derive(Serialize)]
struct RpcCall<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct RpcReply {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcFault>,
}

#[derive(Deserialize)]
struct RpcFault {
    code: i32,
    message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WeightFormat {
    Gguf,
    Safetensors,
}

/// Parameters of the sidecar's `initialize` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarLoadParams {
    pub model_path: PathBuf,
    pub format: WeightFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mmproj_path: Option<PathBuf>,
    pub context_length: u32,
    pub extra_eos: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarConfig {
    /// Path to the sidecar binary; searched next to the executable when unset
    pub sidecar_path: Option<PathBuf>,
    /// Extra arguments passed to the sidecar
    pub args: Vec<String>,
    pub load: SidecarLoadParams,
    /// Model's chat template handles tools itself
    pub native_tools: bool,
    pub supports_tools: bool,
    pub supports_vision: bool,
}

impl SidecarConfig {
    pub fn new(load: SidecarLoadParams) -> Self {
        Self {
            sidecar_path: None,
            args: Vec::new(),
            load,
            native_tools: false,
            supports_tools: false,
            supports_vision: false,
        }
    }
}

const SIDECAR_BINARY: &str = if cfg!(windows) { "llm-sidecar.exe" } else { "llm-sidecar" };

/// Places the engine binary may live when no path is configured: beside the
/// running executable, then in `target/{debug,release}` of up to three
/// ancestor directories.
fn sidecar_candidates() -> Vec<PathBuf> {
    let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    else {
        return Vec::new();
    };

    let mut candidates = vec![exe_dir.join(SIDECAR_BINARY)];
    for ancestor in exe_dir.ancestors().skip(1).take(3) {
        for profile in ["debug", "release"] {
            candidates.push(ancestor.join("target").join(profile).join(SIDECAR_BINARY));
        }
    }
    candidates
}

/// Resolve the engine binary, honouring an explicit path when one is given.
pub fn find_sidecar_path(configured: Option<&Path>) -> Result<PathBuf, LlmError> {
    if let Some(path) = configured {
        return if path.exists() {
            Ok(path.to_path_buf())
        } else {
            Err(LlmError::ProviderUnavailable(format!(
                "No engine binary at {}",
                path.display()
            )))
        };
    }

    let found = sidecar_candidates().into_iter().find(|path| path.exists());
    match found {
        Some(path) => {
            log::debug!("Using engine binary {}", path.display());
            Ok(path)
        }
        None => Err(LlmError::ProviderUnavailable(format!(
            "{} not found next to the executable",
            SIDECAR_BINARY
        ))),
    }
}

fn transport(context: &'static str) -> impl Fn(std::io::Error) -> LlmError {
    move |e| LlmError::RequestFailed(format!("{}: {}", context, e))
}

struct SidecarProcess {
    child: Child,
    stdin: tokio::process::ChildStdin,
    stdout: BufReader<tokio::process::ChildStdout>,
    request_id: u64,
}

impl SidecarProcess {
    async fn write_request<P: Serialize>(&mut self, method: &str, params: P) -> Result<(), LlmError> {
        self.request_id += 1;
        let call = RpcCall {
            jsonrpc: "2.0",
            id: self.request_id,
            method,
            params,
        };
        let mut frame = serde_json::to_vec(&call)
            .map_err(|e| LlmError::InvalidRequest(format!("Failed to encode `{}` call: {}", method, e)))?;
        frame.push(b'\n');

        self.stdin.write_all(&frame).await.map_err(transport("Failed to write to engine"))?;
        self.stdin.flush().await.map_err(transport("Failed to flush engine stdin"))
    }

    async fn read_result(&mut self) -> Result<serde_json::Value, LlmError> {
        let mut line = String::new();
        let read = self
            .stdout
            .read_line(&mut line)
            .await
            .map_err(transport("Failed to read from engine"))?;
        if read == 0 {
            return Err(LlmError::RequestFailed("Engine exited unexpectedly".to_string()));
        }

        let reply: RpcReply = serde_json::from_str(&line).map_err(|e| {
            LlmError::RequestFailed(format!("Failed to decode engine reply {:?}: {}", line.trim_end(), e))
        })?;
        match (reply.result, reply.error) {
            (_, Some(fault)) => Err(LlmError::InferenceFailed(format!(
                "{} (code {})",
                fault.message, fault.code
            ))),
            (Some(result), None) => Ok(result),
            (None, None) => Err(LlmError::RequestFailed(
                "Engine reply has neither result nor error".to_string(),
            )),
        }
    }

    async fn call<P: Serialize>(&mut self, method: &str, params: P) -> Result<serde_json::Value, LlmError> {
        self.write_request(method, params).await?;
        self.read_result().await
    }

    fn kill(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// A generation holding the sidecar exclusively
///
/// Dropped before the engine reported `done`, it kills the process; the next
/// request respawns it with the same model.
struct InFlight {
    slot: OwnedMutexGuard<Option<SidecarProcess>>,
    finished: bool,
}

impl InFlight {
    async fn next_result(&mut self) -> Result<serde_json::Value, LlmError> {
        let process = self.slot.as_mut().ok_or(LlmError::NotInitialized)?;
        match process.read_result().await {
            Ok(result) => Ok(result),
            Err(e) => {
                // The process is in an unknown state; start fresh next time
                if let Some(mut process) = self.slot.take() {
                    process.kill();
                }
                self.finished = true;
                Err(e)
            }
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(mut process) = self.slot.take() {
                log::info!("Generation abandoned, stopping sidecar");
                process.kill();
            }
        }
    }
}

pub struct SidecarProvider {
    config: SidecarConfig,
    process: Arc<Mutex<Option<SidecarProcess>>>,
}

impl SidecarProvider {
    pub fn new(config: SidecarConfig) -> Self {
        Self {
            config,
            process: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &SidecarConfig {
        &self.config
    }

    fn spawn(&self) -> Result<SidecarProcess, LlmError> {
        let binary = find_sidecar_path(self.config.sidecar_path.as_deref())?;
        log::info!("Spawning inference engine {}", binary.display());

        let mut command = Command::new(&binary);
        command
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        // CREATE_NO_WINDOW
        #[cfg(target_os = "windows")]
        command.creation_flags(0x0800_0000);

        let mut child = command.spawn().map_err(|e| {
            LlmError::ProviderUnavailable(format!("Failed to start {}: {}", binary.display(), e))
        })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.start_kill();
            return Err(LlmError::ProviderUnavailable(
                "Engine started without piped stdio".to_string(),
            ));
        };

        Ok(SidecarProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            request_id: 0,
        })
    }

    /// Spawn the engine and load the configured weights into it
    async fn start_sidecar(&self) -> Result<SidecarProcess, LlmError> {
        let mut process = self.spawn()?;

        let result = match process.call("initialize", &self.config.load).await {
            Ok(result) => result,
            Err(e) => {
                process.kill();
                return Err(e);
            }
        };

        if result["success"].as_bool() == Some(true) {
            log::info!("Engine ready with {}", self.config.load.model_path.display());
            return Ok(process);
        }
        process.kill();
        Err(LlmError::InferenceFailed(format!(
            "Engine failed to load {}: {}",
            self.config.load.model_path.display(),
            result["error"].as_str().unwrap_or("no reason given")
        )))
    }

    /// Take the engine exclusively, spawning it if it is not running
    async fn acquire(&self) -> Result<OwnedMutexGuard<Option<SidecarProcess>>, LlmError> {
        let mut guard = Arc::clone(&self.process).lock_owned().await;
        if guard.is_none() {
            *guard = Some(self.start_sidecar().await?);
        }
        Ok(guard)
    }

    /// Send a `complete` request and hand back the in-flight generation
    async fn begin(&self, request: &CompletionRequest, stream: bool) -> Result<InFlight, LlmError> {
        let params = completion_params(request, stream);
        let guard = self.acquire().await?;
        let mut inflight = InFlight {
            slot: guard,
            finished: false,
        };
        let process = inflight.slot.as_mut().ok_or(LlmError::NotInitialized)?;
        process.write_request("complete", params).await?;
        Ok(inflight)
    }

    /// Prepare a request for the engine; tools are simulated for models
    /// without a native tool template
    fn prepare(&self, request: &CompletionRequest) -> Result<(CompletionRequest, bool), LlmError> {
        self.capabilities()
            .check_request(self.provider_name(), request)?;
        let simulate = request.has_tools() && !self.config.native_tools;
        if simulate {
            Ok((simulate_tools(request), true))
        } else {
            Ok((request.clone(), false))
        }
    }

    /// Non-streaming completion returning text and tool calls
    async fn complete(&self, request: &CompletionRequest) -> Result<(String, Vec<ToolCall>), LlmError> {
        let (wire, simulate) = self.prepare(request)?;
        let mut inflight = self.begin(&wire, false).await?;

        let result = loop {
            let result = inflight.next_result().await?;
            if is_done(&result) {
                inflight.finished = true;
                break result;
            }
        };

        let content = result
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .to_string();

        if simulate {
            Ok(parse_tool_calls(&content))
        } else {
            Ok((content, parse_native_tool_calls(&result)))
        }
    }
}

fn is_done(result: &serde_json::Value) -> bool {
    result.get("done").and_then(|d| d.as_bool()).unwrap_or(false)
}

fn parse_native_tool_calls(result: &serde_json::Value) -> Vec<ToolCall> {
    result
        .get("tool_calls")
        .and_then(|tc| serde_json::from_value::<Vec<ToolCall>>(tc.clone()).ok())
        .unwrap_or_default()
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<&'a [ToolCall]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
    /// Base64 image payloads
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(m: &'a Message) -> Self {
        Self {
            role: m.role.as_str(),
            content: &m.content,
            tool_calls: m.tool_calls.as_deref(),
            tool_call_id: m.tool_call_id.as_deref(),
            images: m.attachments.iter().map(|a| a.to_base64()).collect(),
        }
    }
}

/// Params of the engine's `complete` method
#[derive(Serialize)]
struct CompleteParams<'a> {
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
}

fn completion_params(request: &CompletionRequest, stream: bool) -> CompleteParams<'_> {
    CompleteParams {
        messages: request.messages.iter().map(WireMessage::from).collect(),
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        stream,
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop.as_deref(),
        tools: request.tools.as_deref(),
        tool_choice: request.tool_choice.as_deref(),
    }
}

#[async_trait]
impl LlmProvider for SidecarProvider {
    fn provider_name(&self) -> &'static str {
        "sidecar"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            tool_calling: self.config.supports_tools,
            vision: self.config.supports_vision,
        }
    }

    async fn prewarm(&self) -> Result<(), LlmError> {
        self.acquire().await.map(|_| ())
    }

    async fn text(&self, request: CompletionRequest) -> Result<String, LlmError> {
        self.complete(&request).await.map(|(text, _)| text)
    }

    async fn text_stream(&self, request: CompletionRequest) -> Result<TextStream, LlmError> {
        let stream = self.response_stream(request).await?;
        Ok(stream
            .try_filter_map(|chunk| async move {
                Ok(match chunk {
                    ResponseChunk::Text(text) => Some(text),
                    ResponseChunk::ToolCall(_) => None,
                })
            })
            .boxed())
    }

    async fn response_stream(&self, request: CompletionRequest) -> Result<ResponseStream, LlmError> {
        let (wire, simulate) = self.prepare(&request)?;
        let mut inflight = self.begin(&wire, true).await?;

        let stream = try_stream! {
            // Simulated tool calls can only be told apart from text once the
            // whole answer is in
            let mut buffered = String::new();
            loop {
                let result = inflight.next_result().await?;
                if let Some(token) = result.get("token").and_then(|t| t.as_str()) {
                    if simulate {
                        buffered.push_str(token);
                    } else if !token.is_empty() {
                        yield ResponseChunk::Text(token.to_string());
                    }
                }
                if is_done(&result) {
                    inflight.finished = true;
                    if simulate {
                        let (text, calls) = parse_tool_calls(&buffered);
                        if !text.is_empty() {
                            yield ResponseChunk::Text(text);
                        }
                        for call in calls {
                            yield ResponseChunk::ToolCall(call);
                        }
                    } else {
                        for call in parse_native_tool_calls(&result) {
                            yield ResponseChunk::ToolCall(call);
                        }
                    }
                    break;
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn generate_tool_calls(&self, request: CompletionRequest) -> Result<Vec<ToolCall>, LlmError> {
        self.capabilities()
            .require_tool_calling(self.provider_name())?;
        let mut request = request;
        if self.config.native_tools {
            request.tool_choice = Some("required".to_string());
        }
        self.complete(&request).await.map(|(_, calls)| calls)
    }

    async fn resume(
        &self,
        tool_calls: &[ToolCall],
        tool_outputs: &[ToolResult],
        original_request: &CompletionRequest,
    ) -> Result<String, LlmError> {
        self.capabilities()
            .require_tool_calling(self.provider_name())?;
        self.text(original_request.continued(tool_calls, tool_outputs))
            .await
    }

    async fn shutdown(&self) -> Result<(), LlmError> {
        let mut guard = self.process.lock().await;
        let Some(mut process) = guard.take() else {
            return Ok(());
        };
        if let Err(e) = process.call("shutdown", serde_json::json!({})).await {
            log::debug!("Engine did not acknowledge shutdown: {}", e);
        }
        let _ = process.child.kill().await;
        log::info!("Inference engine stopped");
        Ok(())
    }
}
