//! Endpoint → dialect detection.
//!
//! The dialect is chosen from the endpoint the caller hit, never inferred
//! from the shape of the body.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    OpenAi,
    Anthropic,
    Gemini,
}

impl Dialect {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::OpenAi => "openai",
            Dialect::Anthropic => "anthropic",
            Dialect::Gemini => "gemini",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(Dialect::OpenAi),
            "anthropic" => Some(Dialect::Anthropic),
            "gemini" | "google" => Some(Dialect::Gemini),
            _ => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Endpoints listed in the not-found response.
pub const AVAILABLE_ENDPOINTS: &[&str] = &[
    "POST /v1/chat/completions (OpenAI format)",
    "POST /v1/messages (Anthropic format)",
    "POST /v1/generateContent (Gemini format)",
    "POST /v1beta/models/{model}:generateContent (Gemini format)",
    "POST /v1beta/models/{model}:streamGenerateContent (Gemini format)",
    "GET /v1/models",
];

/// Map an inbound path to its dialect. `None` means the endpoint is unknown.
#[must_use]
pub fn detect_format(path: &str) -> Option<Dialect> {
    match path {
        "/v1/chat/completions" => Some(Dialect::OpenAi),
        "/v1/messages" => Some(Dialect::Anthropic),
        "/v1/generateContent" => Some(Dialect::Gemini),
        other => gemini_model_endpoint(other).map(|_| Dialect::Gemini),
    }
}

/// A Gemini model-scoped endpoint: `/v1beta/models/{model}:{action}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiEndpoint {
    pub model: String,
    pub stream: bool,
}

/// Parse the Gemini model-scoped path forms (`/v1beta/...` and `/v1/...`).
#[must_use]
pub fn gemini_model_endpoint(path: &str) -> Option<GeminiEndpoint> {
    let rest = path
        .strip_prefix("/v1beta/models/")
        .or_else(|| path.strip_prefix("/v1/models/"))?;
    let (model, action) = rest.rsplit_once(':')?;
    if model.is_empty() || model.contains('/') {
        return None;
    }
    let stream = match action {
        "generateContent" => false,
        "streamGenerateContent" => true,
        _ => return None,
    };
    Some(GeminiEndpoint {
        model: model.to_string(),
        stream,
    })
}
