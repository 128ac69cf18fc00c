//! Session turns against in-memory backends and a local model service

use async_trait::async_trait;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

use llm_session::chat::{Session, SessionConfig, SessionState};
use llm_session::llm_engine::provider::{
    CompletionRequest, LlmError, LlmProvider, Message, MessageRole, ProviderCapabilities,
    ResponseChunk, ResponseStream, TextStream, ToolCall,
};
use llm_session::llm_engine::providers::{SystemConfig, SystemProvider};
use llm_session::tools::portfolio::{load_portfolio_data, portfolio_tools, PORTFOLIO_SYSTEM_PROMPT};
use llm_session::tools::{ToolRegistry, ToolResult};

const PORTFOLIO: &str = r#"{
    "holdings": [
        {"symbol": "VTI", "name": "Total Market", "asset_class": "Equity", "region": "United States", "quantity": 10, "market_value": 2500},
        {"symbol": "VXUS", "name": "Intl Stock", "asset_class": "Equity", "region": "International", "quantity": 5, "market_value": 300}
    ],
    "transactions": [
        {"date": "2024-01-05", "type": "BUY", "symbol": "VTI", "amount": 12000},
        {"date": "2024-02-10", "type": "BUY", "symbol": "VXUS", "amount": 300},
        {"date": "2024-03-01", "type": "TRANSFER", "symbol": "CASH", "amount": -25000}
    ],
    "portfolio_value": [{"date": "2024-01-31", "value": 4000}]
}"#;

type Policy = dyn Fn(&CompletionRequest) -> Vec<ResponseChunk> + Send + Sync;

/// Streams whatever its policy decides for the request it is given
struct PolicyModel {
    policy: Box<Policy>,
    requests: AtomicUsize,
}

impl PolicyModel {
    fn new<F>(policy: F) -> Arc<Self>
    where
        F: Fn(&CompletionRequest) -> Vec<ResponseChunk> + Send + Sync + 'static,
    {
        Arc::new(Self {
            policy: Box::new(policy),
            requests: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LlmProvider for PolicyModel {
    fn provider_name(&self) -> &'static str {
        "policy"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            tool_calling: true,
            vision: false,
        }
    }

    async fn text(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let chunks = self.response_stream(request).await?.try_collect::<Vec<_>>().await?;
        Ok(chunks
            .into_iter()
            .filter_map(|c| match c {
                ResponseChunk::Text(t) => Some(t),
                ResponseChunk::ToolCall(_) => None,
            })
            .collect())
    }

    async fn text_stream(&self, request: CompletionRequest) -> Result<TextStream, LlmError> {
        let text = self.text(request).await?;
        Ok(stream::once(async move { Ok(text) }).boxed())
    }

    async fn response_stream(&self, request: CompletionRequest) -> Result<ResponseStream, LlmError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let chunks = (self.policy)(&request);
        Ok(stream::iter(chunks.into_iter().map(Ok)).boxed())
    }

    async fn generate_tool_calls(&self, request: CompletionRequest) -> Result<Vec<ToolCall>, LlmError> {
        Ok((self.policy)(&request)
            .into_iter()
            .filter_map(|c| match c {
                ResponseChunk::ToolCall(call) => Some(call),
                ResponseChunk::Text(_) => None,
            })
            .collect())
    }

    async fn resume(
        &self,
        tool_calls: &[ToolCall],
        tool_outputs: &[ToolResult],
        original_request: &CompletionRequest,
    ) -> Result<String, LlmError> {
        self.text(original_request.continued(tool_calls, tool_outputs)).await
    }
}

fn words(text: &str) -> Vec<ResponseChunk> {
    text.split_inclusive(' ')
        .map(|w| ResponseChunk::Text(w.to_string()))
        .collect()
}

/// Picks tools by keyword, then answers from the tool output
fn keyword_policy(request: &CompletionRequest) -> Vec<ResponseChunk> {
    let last = request.messages.last().expect("request has messages");
    if last.role == MessageRole::Tool {
        let rows = serde_json::from_str::<serde_json::Value>(&last.content)
            .ok()
            .and_then(|v| v.as_array().map(|a| a.len()))
            .unwrap_or(0);
        return words(&format!("I found {} matching entries.", rows));
    }

    let question = last.content.to_lowercase();
    let mut chunks = Vec::new();
    if question.contains("transaction") {
        let min_amount: f64 = question
            .split(|c: char| !(c.is_ascii_digit() || c == ','))
            .filter_map(|n| n.replace(',', "").parse().ok())
            .next()
            .unwrap_or(0.0);
        chunks.push(ResponseChunk::ToolCall(ToolCall::new(
            "get_transactions",
            &json!({"min_amount": min_amount}),
        )));
    }
    if question.contains("holding") {
        chunks.push(ResponseChunk::ToolCall(ToolCall::new("get_holdings", &json!({}))));
    }
    if chunks.is_empty() {
        return words("I can only answer portfolio questions.");
    }
    chunks
}

fn portfolio_registry() -> Arc<ToolRegistry> {
    let data = Arc::new(load_portfolio_data(PORTFOLIO).unwrap());
    Arc::new(ToolRegistry::from_tools(portfolio_tools(data)).unwrap())
}

fn counts(tools: &ToolRegistry) -> (u64, u64, u64) {
    let count = |name| tools.get(name).unwrap().invocation_count();
    (
        count("get_holdings"),
        count("get_transactions"),
        count("get_portfolio_value"),
    )
}

fn portfolio_session(model: Arc<PolicyModel>, tools: Arc<ToolRegistry>) -> Session {
    Session::new(
        model,
        tools,
        SessionConfig::with_system_prompt(PORTFOLIO_SYSTEM_PROMPT),
    )
    .unwrap()
}

#[tokio::test]
async fn test_large_transactions_use_only_transaction_tool() {
    let tools = portfolio_registry();
    let session = portfolio_session(PolicyModel::new(keyword_policy), Arc::clone(&tools));

    let fragments: Vec<String> = session
        .stream_response("List all transactions greater than $10,000.", Vec::new())
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    assert!(fragments.len() > 1);
    assert_eq!(fragments.concat(), "I found 2 matching entries.");

    let (holdings, transactions, value) = counts(&tools);
    assert!(transactions > 0);
    assert_eq!(holdings, 0);
    assert_eq!(value, 0);

    let roles: Vec<_> = session.messages().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        [
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool,
            MessageRole::Assistant,
        ]
    );
}

#[tokio::test]
async fn test_unrelated_question_calls_no_tools() {
    let tools = portfolio_registry();
    let session = portfolio_session(PolicyModel::new(keyword_policy), Arc::clone(&tools));

    let answer = session.respond("What's the weather like?").await.unwrap();
    assert_eq!(answer, "I can only answer portfolio questions.");
    assert_eq!(counts(&tools), (0, 0, 0));
    assert_eq!(session.messages().len(), 3);
}

#[tokio::test]
async fn test_tool_results_follow_their_calls_every_round() {
    // Round one asks for holdings, round two for transactions, then answers
    let policy = |request: &CompletionRequest| {
        let rounds = request
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::Tool)
            .count();
        match rounds {
            0 => vec![
                ResponseChunk::Text("Checking. ".to_string()),
                ResponseChunk::ToolCall(ToolCall::new("get_holdings", &json!({}))),
            ],
            1 => vec![ResponseChunk::ToolCall(ToolCall::new(
                "get_transactions",
                &json!({"limit": 1}),
            ))],
            _ => words("All done."),
        }
    };
    let tools = portfolio_registry();
    let session = portfolio_session(PolicyModel::new(policy), Arc::clone(&tools));

    let answer = session.respond("Summarize my account").await.unwrap();
    assert_eq!(answer, "Checking. All done.");
    assert_eq!(counts(&tools), (1, 1, 0));

    let log = session.messages();
    assert_eq!(log.len(), 7);
    for (i, message) in log.iter().enumerate() {
        if message.role != MessageRole::Tool {
            continue;
        }
        let call_ids: Vec<&str> = log[i - 1]
            .tool_calls
            .as_ref()
            .expect("tool result follows a tool-call message")
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(call_ids, vec![message.tool_call_id.as_deref().unwrap()]);
        assert_ne!(log[i + 1].role, MessageRole::Tool);
    }
    assert_eq!(log[6], Message::assistant("All done."));
}

#[tokio::test]
async fn test_round_cap_aborts_turn_only() {
    let model = PolicyModel::new(|request: &CompletionRequest| {
        let last = request.messages.last().unwrap();
        if last.role == MessageRole::User && last.content == "fine" {
            return words("ok");
        }
        vec![ResponseChunk::ToolCall(ToolCall::new("get_portfolio_value", &json!({})))]
    });
    let tools = portfolio_registry();
    let session = portfolio_session(Arc::clone(&model), Arc::clone(&tools));
    let prior = session.messages();

    let err = session.respond("forever").await.unwrap_err();
    assert_eq!(err, LlmError::ToolLoopExceeded(5));
    assert_eq!(counts(&tools).2, 5);
    assert_eq!(model.requests.load(Ordering::SeqCst), 6);

    let mut expected = prior;
    expected.push(Message::user("forever"));
    assert_eq!(session.messages(), expected);

    assert_eq!(session.respond("fine").await.unwrap(), "ok");
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_unknown_tool_runs_nothing() {
    let model = PolicyModel::new(|_: &CompletionRequest| {
        vec![
            ResponseChunk::ToolCall(ToolCall::new("get_holdings", &json!({}))),
            ResponseChunk::ToolCall(ToolCall::new("get_weather", &json!({}))),
        ]
    });
    let tools = portfolio_registry();
    let session = portfolio_session(model, Arc::clone(&tools));

    let err = session.respond("holdings and weather").await.unwrap_err();
    assert_eq!(err, LlmError::UnknownTool("get_weather".to_string()));
    assert_eq!(counts(&tools), (0, 0, 0));
    assert_eq!(session.messages().len(), 2);
}

#[tokio::test]
async fn test_second_turn_is_busy_until_stream_dropped() {
    let tools = portfolio_registry();
    let session = portfolio_session(PolicyModel::new(keyword_policy), tools);

    let mut first = session
        .stream_response("List holdings", Vec::new())
        .unwrap();
    let _ = first.next().await;
    assert!(matches!(
        session.stream_response("again", Vec::new()),
        Err(LlmError::SessionBusy)
    ));

    drop(first);
    assert_eq!(session.state(), SessionState::Idle);
    // Dropping mid-turn commits nothing beyond the user message
    assert_eq!(session.messages().len(), 2);
    assert!(session.respond("hello").await.is_ok());
}

#[tokio::test]
async fn test_state_is_observable() {
    let session = portfolio_session(PolicyModel::new(keyword_policy), portfolio_registry());
    let mut states = session.subscribe_state();

    let mut stream = session
        .stream_response("List holdings", Vec::new())
        .unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "I ");
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), SessionState::AwaitingModel);

    while stream.next().await.is_some() {}
    drop(stream);
    assert_eq!(session.state(), SessionState::Idle);
}

async fn start_model_service() -> String {
    let app = Router::new()
        .route("/api/version", get(|| async { Json(json!({"version": "0.5.0"})) }))
        .route(
            "/api/tags",
            get(|| async { Json(json!({"models": [{"name": "llama3.2:latest"}]})) }),
        )
        .route(
            "/api/chat",
            post(|Json(body): Json<serde_json::Value>| async move {
                let turns = body["messages"].as_array().map(|m| m.len()).unwrap_or(0);
                Json(json!({
                    "message": {"role": "assistant", "content": format!("This is a long answer after {} messages.", turns)},
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

#[tokio::test]
async fn test_non_streaming_backend_yields_single_fragment() {
    let provider = Arc::new(
        SystemProvider::new(SystemConfig {
            base_url: start_model_service().await,
            ..Default::default()
        })
        .unwrap(),
    );
    provider.prewarm().await.unwrap();

    let err = Session::new(provider.clone(), portfolio_registry(), SessionConfig::default())
        .err()
        .unwrap();
    assert!(matches!(err, LlmError::UnsupportedOperation(_)));

    let session = Session::new(
        provider.clone(),
        Arc::new(ToolRegistry::new()),
        SessionConfig::with_system_prompt("sys"),
    )
    .unwrap();
    let fragments: Vec<String> = session
        .stream_response("hello", Vec::new())
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(fragments, vec!["This is a long answer after 2 messages."]);

    let request = CompletionRequest::new(vec![Message::user("hi")]);
    assert!(matches!(
        provider.generate_tool_calls(request).await,
        Err(LlmError::UnsupportedOperation(_))
    ));
}
