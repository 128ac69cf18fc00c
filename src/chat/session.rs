//! A conversation with one backend client
//!
//! The session owns the message log and the tool registry, and drives the
//! request / tool-dispatch / resume loop of each turn as a lazy text stream.
//! Messages produced during a turn are staged. A turn that fails leaves the
//! prior log plus the user message; a turn that completes, or is dropped by
//! its consumer, commits what it staged.

use async_stream::try_stream;
use futures_util::{StreamExt, TryStreamExt};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, OwnedMutexGuard};

use crate::chat::types::{SessionConfig, SessionState};
use crate::llm_engine::provider::{
    Attachment, CompletionRequest, LlmError, LlmProvider, Message, MessageRole, ResponseChunk,
    TextStream,
};
use crate::tools::{execute_all, resolve_all, ToolRegistry};

pub struct Session {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    config: SessionConfig,
    log: Arc<Mutex<Vec<Message>>>,
    turn: Arc<tokio::sync::Mutex<()>>,
    state: Arc<watch::Sender<SessionState>>,
}

impl Session {
    /// Wrap a backend client; tools require a client that can call them
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        config: SessionConfig,
    ) -> Result<Self, LlmError> {
        let initial = initial_log(&config.system_prompt);
        Self::with_messages(provider, tools, config, initial)
    }

    /// Like `new`, continuing an existing conversation
    pub fn with_messages(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        config: SessionConfig,
        messages: Vec<Message>,
    ) -> Result<Self, LlmError> {
        if !tools.is_empty() {
            provider
                .capabilities()
                .require_tool_calling(provider.provider_name())?;
        }
        let (state, _) = watch::channel(SessionState::Idle);
        log::info!(
            "Session created on {} backend with {} tool(s)",
            provider.provider_name(),
            tools.len()
        );
        Ok(Self {
            provider,
            tools,
            config,
            log: Arc::new(Mutex::new(messages)),
            turn: Arc::new(tokio::sync::Mutex::new(())),
            state: Arc::new(state),
        })
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Snapshot of the committed log
    pub fn messages(&self) -> Vec<Message> {
        lock_log(&self.log).clone()
    }

    /// Replace the log; fails while a turn is running
    pub fn set_messages(&self, messages: Vec<Message>) -> Result<(), LlmError> {
        let _turn = self.turn.try_lock().map_err(|_| LlmError::SessionBusy)?;
        *lock_log(&self.log) = messages;
        Ok(())
    }

    /// Start over with only the given system prompt
    pub fn reset(&self, system_prompt: &str) -> Result<(), LlmError> {
        self.set_messages(initial_log(system_prompt))
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Run one turn, yielding text fragments as the backend produces them
    ///
    /// The turn holds the session until the returned stream is exhausted or
    /// dropped; a second turn meanwhile fails with `SessionBusy`.
    pub fn stream_response(
        &self,
        prompt: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<TextStream, LlmError> {
        let lock = Arc::clone(&self.turn)
            .try_lock_owned()
            .map_err(|_| LlmError::SessionBusy)?;

        if !attachments.is_empty() && !self.provider.capabilities().vision {
            return Err(LlmError::UnsupportedOperation(format!(
                "{} does not accept image attachments",
                self.provider.provider_name()
            )));
        }

        let user = if attachments.is_empty() {
            Message::user(prompt)
        } else {
            Message::user_with_attachments(prompt, attachments)
        };
        let history = {
            let mut entries = lock_log(&self.log);
            entries.push(user);
            entries.clone()
        };

        let request = self.request(history);
        let guard = TurnGuard {
            state: Arc::clone(&self.state),
            shared_log: Arc::clone(&self.log),
            staged: Vec::new(),
            failed: false,
            _lock: lock,
        };
        let provider = Arc::clone(&self.provider);
        let tools = Arc::clone(&self.tools);
        let max_rounds = self.config.max_tool_rounds;

        let stream = try_stream! {
            let mut guard = guard;
            let mut current = request;
            let mut rounds = 0usize;

            guard.set(SessionState::AwaitingModel);
            let mut response = provider
                .response_stream(current.clone())
                .await
                .map_err(|e| guard.fail(e))?;

            loop {
                let mut text = String::new();
                let mut calls = Vec::new();
                while let Some(chunk) = response.next().await {
                    match chunk.map_err(|e| guard.fail(e))? {
                        ResponseChunk::Text(fragment) => {
                            text.push_str(&fragment);
                            yield fragment;
                        }
                        ResponseChunk::ToolCall(call) => calls.push(call),
                    }
                }

                if calls.is_empty() {
                    guard.stage([Message::assistant(text)]);
                    guard.commit();
                    break;
                }

                if rounds >= max_rounds {
                    log::warn!("Tool loop reached max rounds ({})", max_rounds);
                    Err::<(), _>(guard.fail(LlmError::ToolLoopExceeded(max_rounds)))?;
                }
                rounds += 1;

                guard.set(SessionState::ToolDispatch);
                resolve_all(&tools, &calls).map_err(|e| guard.fail(e))?;
                log::info!(
                    "Tool round {}: {:?}",
                    rounds,
                    calls.iter().map(|c| c.name()).collect::<Vec<_>>()
                );
                let outputs = execute_all(&tools, &calls).map_err(|e| guard.fail(e))?;

                let next = current.continued_after(&text, &calls, &outputs);
                guard.stage(next.messages[current.messages.len()..].iter().cloned());

                guard.set(SessionState::AwaitingModel);
                response = provider
                    .resume_stream(&calls, &outputs, &current)
                    .await
                    .map_err(|e| guard.fail(e))?;
                current = next;
            }
        };
        Ok(stream.boxed())
    }

    /// Run one turn and collect every fragment
    pub async fn respond(&self, prompt: impl Into<String>) -> Result<String, LlmError> {
        self.stream_response(prompt, Vec::new())?
            .try_collect::<Vec<_>>()
            .await
            .map(|fragments| fragments.concat())
    }

    fn request(&self, messages: Vec<Message>) -> CompletionRequest {
        let has_tools = !self.tools.is_empty();
        CompletionRequest {
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            tools: has_tools.then(|| self.tools.definitions()),
            tool_choice: has_tools.then(|| "auto".to_string()),
            ..Default::default()
        }
    }
}

fn initial_log(system_prompt: &str) -> Vec<Message> {
    if system_prompt.is_empty() {
        Vec::new()
    } else {
        vec![Message::system(system_prompt)]
    }
}

fn lock_log(shared_log: &Mutex<Vec<Message>>) -> MutexGuard<'_, Vec<Message>> {
    shared_log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn commit(shared_log: &Mutex<Vec<Message>>, staged: Vec<Message>) {
    let tool_messages = staged.iter().filter(|m| m.role == MessageRole::Tool).count();
    log::debug!(
        "Committing {} message(s), {} tool result(s)",
        staged.len(),
        tool_messages
    );
    lock_log(shared_log).extend(staged);
}

/// Holds the turn lock and the staged messages of a live stream
///
/// When the stream ends or is dropped the session returns to Idle. Staged
/// messages of a turn that did not fail are committed at that point, so
/// tool rounds that already ran survive a cancelled turn.
struct TurnGuard {
    state: Arc<watch::Sender<SessionState>>,
    shared_log: Arc<Mutex<Vec<Message>>>,
    staged: Vec<Message>,
    failed: bool,
    _lock: OwnedMutexGuard<()>,
}

impl TurnGuard {
    fn set(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    fn stage(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.staged.extend(messages);
    }

    fn commit(&mut self) {
        commit(&self.shared_log, std::mem::take(&mut self.staged));
    }

    /// Discard everything staged; the turn ends with `e`
    fn fail(&mut self, e: LlmError) -> LlmError {
        self.failed = true;
        self.staged.clear();
        e
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if !self.failed && !self.staged.is_empty() {
            log::info!(
                "Turn cancelled, keeping {} message(s) from finished tool rounds",
                self.staged.len()
            );
            self.commit();
        }
        self.state.send_replace(SessionState::Idle);
    }
}
