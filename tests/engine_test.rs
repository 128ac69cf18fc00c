//! Engine load / ask / unload against a local model service

use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::TryStreamExt;
use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::net::TcpListener;

use llm_session::llm_engine::model_manager::DownloaderConfig;
use llm_session::llm_engine::provider::MessageRole;
use llm_session::llm_engine::providers::SystemConfig;
use llm_session::tools::portfolio::{load_portfolio_data, portfolio_tools};
use llm_session::{LlmEngine, LlmError, LlmModel, LlmModelManager, ToolRegistry};

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
                let question = body["messages"]
                    .as_array()
                    .and_then(|m| m.last())
                    .and_then(|m| m["content"].as_str())
                    .unwrap_or("")
                    .to_string();
                Json(json!({
                    "message": {"role": "assistant", "content": format!("You asked: {}", question)},
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

fn engine(models: &tempfile::TempDir, base_url: String) -> LlmEngine {
    let data = Arc::new(load_portfolio_data(r#"{"holdings": [], "transactions": [], "portfolio_value": []}"#).unwrap());
    let tools = ToolRegistry::from_tools(portfolio_tools(data)).unwrap();
    LlmEngine::new(
        Arc::new(LlmModelManager::with_config(
            models.path().to_path_buf(),
            DownloaderConfig {
                hub_url: base_url.clone(),
                ..Default::default()
            },
        )),
        Arc::new(tools),
        "You are terse.",
    )
    .with_system_config(SystemConfig {
        base_url,
        ..Default::default()
    })
}

#[tokio::test]
async fn test_system_model_lifecycle() {
    llm_session::init_logging();
    let models = tempdir().unwrap();
    let engine = engine(&models, start_model_service().await);

    engine.set_model(LlmModel::SystemDefault).await.unwrap();
    assert!(!engine.tools_enabled().await);

    engine.load().await.unwrap();
    assert!(engine.is_loaded().await);
    assert!(!engine.is_loading());
    assert_eq!(engine.download_progress(), 1.0);

    let answer: Vec<String> = engine
        .ask("How are you?", Vec::new())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(answer, vec!["You asked: How are you?"]);

    let roles: Vec<_> = engine.messages().await.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        [MessageRole::System, MessageRole::User, MessageRole::Assistant]
    );

    engine.reset_messages().await.unwrap();
    assert_eq!(engine.messages().await.len(), 1);

    engine.unload().await;
    assert!(matches!(
        engine.ask("still there?", Vec::new()).await,
        Err(LlmError::NotInitialized)
    ));
}

#[tokio::test]
async fn test_load_fails_when_service_is_missing() {
    let models = tempdir().unwrap();
    let engine = engine(&models, "http://127.0.0.1:9".to_string());
    engine.set_model(LlmModel::SystemDefault).await.unwrap();

    assert!(matches!(
        engine.load().await,
        Err(LlmError::ProviderUnavailable(_))
    ));
    assert!(!engine.is_loaded().await);
}

#[tokio::test]
async fn test_local_model_without_assets_fails_to_load() {
    let models = tempdir().unwrap();
    let engine = engine(&models, "http://127.0.0.1:9".to_string());
    engine.set_model(LlmModel::MobileVlm3b).await.unwrap();

    // Nothing listens on the hub address, so the download fails first
    let err = engine.load().await.unwrap_err();
    assert!(matches!(err, LlmError::TransferFailed(_)), "{:?}", err);
    assert!(!engine.is_loaded().await);
}
