//! Backend dispatch: materialize the canonical request for the configured
//! backend, send it, and lift the reply back into canonical form.

use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::providers::BackendFormat;
use crate::translate::anthropic_types::MessagesResponse;
use crate::translate::gemini_types::GenerateContentResponse;
use crate::translate::openai_types::ChatCompletionResponse;
use crate::translate::request::{self, Materialized};
use crate::translate::response::{
    anthropic_response_to_canonical, gemini_response_to_canonical, openai_response_to_canonical,
};
use crate::translate::{CanonicalRequest, CanonicalResponse, Dialect};

pub type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// What the backend sent back.
pub enum BackendReply {
    Json {
        response: CanonicalResponse,
        /// The reply exactly as received, for same-dialect passthrough.
        raw: Value,
        dialect: Dialect,
    },
    Stream {
        body: ByteStream,
        dialect: Dialect,
    },
}

impl std::fmt::Debug for BackendReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json { dialect, .. } => f.debug_struct("Json").field("dialect", dialect).finish_non_exhaustive(),
            Self::Stream { dialect, .. } => f.debug_struct("Stream").field("dialect", dialect).finish_non_exhaustive(),
        }
    }
}

/// Send `req` to the configured backend.
///
/// The model id is rewritten per configuration and the per-model reasoning
/// directive attached before materializing. A non-2xx reply becomes
/// [`GatewayError::Backend`] carrying the upstream status and message.
pub async fn dispatch(
    mut req: CanonicalRequest,
    config: &GatewayConfig,
    client: &reqwest::Client,
) -> Result<BackendReply> {
    let backend = &config.backend;
    let format = backend.effective_format();
    let base_url = backend.effective_base_url()?;
    let api_key = backend.resolve_api_key()?;

    req.model = config.resolve_model(&req.model);
    req.reasoning = config.reasoning_for(&req.model);

    let url = format.endpoint_url(&base_url, &req.model, req.stream);
    let system_prompt = config.system_prompt.as_deref();

    tracing::info!(
        backend = %backend.name,
        format = %format,
        model = %req.model,
        stream = req.stream,
        "Dispatching to backend"
    );

    let builder = match format {
        BackendFormat::OpenAi => post(client, &url, request::to_openai(&req, system_prompt, &api_key)),
        BackendFormat::Common => post(client, &url, request::to_common(&req, system_prompt, &api_key)),
        BackendFormat::Anthropic => {
            post(client, &url, request::to_anthropic(&req, system_prompt, &api_key))
        }
        BackendFormat::Gemini => post(client, &url, request::to_gemini(&req, system_prompt, &api_key)),
    };

    let response = builder
        .send()
        .await
        .map_err(|e| GatewayError::provider(format!("Request to {url} failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = upstream_error_message(&body)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or_default().to_string());
        tracing::warn!(status = status.as_u16(), message = %message, "Backend returned an error");
        return Err(GatewayError::backend(status.as_u16(), message));
    }

    let dialect = format.dialect();

    if req.stream {
        return Ok(BackendReply::Stream {
            body: response.bytes_stream().boxed(),
            dialect,
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| GatewayError::provider(format!("Failed to read backend response: {e}")))?;
    let raw: Value = serde_json::from_str(&body).map_err(|e| {
        GatewayError::translation(format!(
            "Backend response is not JSON: {e}. Body: {}",
            truncate(&body, 300)
        ))
    })?;

    let response = lift(dialect, raw.clone())?;
    if let Some(usage) = response.usage {
        tracing::info!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Backend completed"
        );
    }

    Ok(BackendReply::Json {
        response,
        raw,
        dialect,
    })
}

fn post<T: Serialize>(
    client: &reqwest::Client,
    url: &str,
    materialized: Materialized<T>,
) -> reqwest::RequestBuilder {
    client
        .post(url)
        .headers(materialized.headers)
        .json(&materialized.body)
}

/// Lift a backend reply in `dialect` into canonical form.
pub fn lift(dialect: Dialect, raw: Value) -> Result<CanonicalResponse> {
    let lifted = match dialect {
        Dialect::OpenAi => {
            serde_json::from_value::<ChatCompletionResponse>(raw).map(openai_response_to_canonical)
        }
        Dialect::Anthropic => {
            serde_json::from_value::<MessagesResponse>(raw).map(anthropic_response_to_canonical)
        }
        Dialect::Gemini => serde_json::from_value::<GenerateContentResponse>(raw)
            .map(gemini_response_to_canonical),
    };
    lifted.map_err(|e| GatewayError::translation(format!("Unexpected {dialect} response: {e}")))
}

/// Pull a human-readable message out of an error body in any dialect.
fn upstream_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let message = value
        .pointer("/error/message")
        .or_else(|| value.get("message"))
        .or_else(|| value.get("error").filter(|e| e.is_string()))
        .and_then(Value::as_str)
        .map(str::to_string);
    message.or_else(|| Some(truncate(body, 500).to_string()).filter(|s| !s.is_empty()))
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
