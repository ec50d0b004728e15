use crate::backend::{self, BackendReply};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::translate::anthropic_types::MessagesRequest;
use crate::translate::detect::{gemini_model_endpoint, GeminiEndpoint, AVAILABLE_ENDPOINTS};
use crate::translate::gemini_types::GenerateContentRequest;
use crate::translate::normalize::{anthropic_to_canonical, gemini_to_canonical, openai_to_canonical};
use crate::translate::openai_types::ChatCompletionRequest;
use crate::translate::response::{
    canonical_to_anthropic, canonical_to_gemini, canonical_to_openai, error_envelope,
};
use crate::translate::{translate_stream, CanonicalRequest, Dialect, FrameStream};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub client: reqwest::Client,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/messages", post(handle_messages))
        .route("/v1/generateContent", post(handle_generate_content))
        .route("/v1beta/models/:model_action", post(handle_gemini_model))
        .route("/v1/models/:model_action", post(handle_gemini_model))
        .route("/v1/models", get(handle_models))
        .route("/health", get(handle_health))
        .route("/", get(handle_info))
        .fallback(handle_not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    handle_request(state, Dialect::OpenAi, None, body).await
}

async fn handle_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    handle_request(state, Dialect::Anthropic, None, body).await
}

async fn handle_generate_content(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    handle_request(state, Dialect::Gemini, None, body).await
}

async fn handle_gemini_model(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    match gemini_model_endpoint(uri.path()) {
        Some(endpoint) => handle_request(state, Dialect::Gemini, Some(endpoint), body).await,
        None => handle_not_found(method, uri).await,
    }
}

/// Normalize, dispatch, and answer in the caller's dialect.
async fn handle_request(
    state: Arc<AppState>,
    dialect: Dialect,
    endpoint: Option<GeminiEndpoint>,
    body: Bytes,
) -> Response {
    let req = match normalize_body(dialect, endpoint.as_ref(), &body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(dialect = %dialect, error = %e, "Rejecting request body");
            return error_response(dialect, &e);
        }
    };

    let requested_model = req.model.clone();
    tracing::info!(
        dialect = %dialect,
        model = %requested_model,
        stream = req.stream,
        messages = req.messages.len(),
        "Request received"
    );

    match backend::dispatch(req, &state.config, &state.client).await {
        Ok(BackendReply::Stream {
            body,
            dialect: upstream,
        }) => sse_response(translate_stream(body, upstream, dialect, &requested_model)),
        Ok(BackendReply::Json {
            response,
            raw,
            dialect: upstream,
        }) => match dialect {
            Dialect::OpenAi if upstream == Dialect::OpenAi => Json(raw).into_response(),
            Dialect::OpenAi => Json(canonical_to_openai(&response, &requested_model)).into_response(),
            Dialect::Anthropic => {
                Json(canonical_to_anthropic(&response, &requested_model)).into_response()
            }
            Dialect::Gemini => Json(canonical_to_gemini(&response)).into_response(),
        },
        Err(e) => {
            tracing::error!(dialect = %dialect, status = e.status_code(), error = %e, "Request failed");
            error_response(dialect, &e)
        }
    }
}

/// Parse the inbound body in `dialect` and normalize it.
pub fn normalize_body(
    dialect: Dialect,
    endpoint: Option<&GeminiEndpoint>,
    body: &[u8],
) -> Result<CanonicalRequest, GatewayError> {
    let invalid = |e: serde_json::Error| GatewayError::invalid_request(format!("Invalid request body: {e}"));
    Ok(match dialect {
        Dialect::OpenAi => {
            openai_to_canonical(serde_json::from_slice::<ChatCompletionRequest>(body).map_err(invalid)?)
        }
        Dialect::Anthropic => {
            anthropic_to_canonical(serde_json::from_slice::<MessagesRequest>(body).map_err(invalid)?)
        }
        Dialect::Gemini => gemini_to_canonical(
            serde_json::from_slice::<GenerateContentRequest>(body).map_err(invalid)?,
            endpoint,
        ),
    })
}

fn sse_response(frames: FrameStream) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(frames))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn error_response(dialect: Dialect, err: &GatewayError) -> Response {
    let (status, body) = error_envelope(dialect, err);
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(body)).into_response()
}

async fn handle_health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_info(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "backend": {
            "name": state.config.backend.name,
            "format": state.config.backend.effective_format(),
        },
        "endpoints": AVAILABLE_ENDPOINTS,
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<Value> {
    let models: Vec<Value> = state
        .config
        .advertised_models()
        .into_iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "owned_by": state.config.backend.name,
            })
        })
        .collect();

    Json(json!({ "data": models, "object": "list" }))
}

async fn handle_not_found(method: Method, uri: Uri) -> Response {
    tracing::warn!(method = %method, path = %uri.path(), "Unknown endpoint");
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Not Found",
            "message": format!("Path {method} {} does not exist", uri.path()),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "availableEndpoints": AVAILABLE_ENDPOINTS,
        })),
    )
        .into_response()
}
