use axum::extract::{State, rejection::JsonRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing::{get, post}};
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};

use crate::completion::{ErrorBody, ExchangeReply};
use crate::models::{LanguageModel, ModelRequest};
use crate::orchestrator::EMPTY_REPLY_FALLBACK;
use crate::prompt::{HistoryEntry, build_messages};
use crate::settings::CompletionSettings;

#[derive(Clone, Default)]
pub struct AppState {
    pub model: Option<Arc<dyn LanguageModel>>,
    pub completion: CompletionSettings,
}

impl AppState {
    pub fn new(model: Arc<dyn LanguageModel>, completion: CompletionSettings) -> Self {
        Self { model: Some(model), completion }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    pub message: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<HistoryEntry>,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

#[tracing::instrument(skip_all, fields(history = tracing::field::Empty))]
async fn chat(State(state): State<AppState>, body: Result<Json<ChatBody>, JsonRejection>) -> Response {
    metrics::counter!("chat_requests_total").increment(1);
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "unreadable chat request");
            return error(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };
    let message = match body.message {
        Some(m) if !m.is_empty() => m,
        _ => return error(StatusCode::BAD_REQUEST, "Message is required"),
    };
    tracing::Span::current().record("history", body.conversation_history.len());

    let Some(model) = state.model.as_ref() else {
        tracing::error!("chat request received but no model is configured");
        return error(StatusCode::INTERNAL_SERVER_ERROR, "OpenAI API key not configured");
    };

    let settings = &state.completion;
    let req = ModelRequest {
        model: settings.model.clone(),
        messages: build_messages(&body.conversation_history, &message, settings.history_window),
        temperature: Some(settings.temperature),
        max_tokens: Some(settings.max_tokens),
    };

    match model.generate(req).await {
        Ok(resp) => {
            let response = if resp.content.is_empty() {
                EMPTY_REPLY_FALLBACK.to_string()
            } else {
                resp.content
            };
            Json(ExchangeReply { response }).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "upstream model call failed");
            metrics::counter!("chat_upstream_failures_total").increment(1);
            error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get response from AI")
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, model = %state.completion.model, "completion endpoint listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}
