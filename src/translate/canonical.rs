//! The canonical request/response model every dialect is converted through.
//!
//! Shapes follow the `OpenAI` chat-completions vocabulary (role names,
//! `image_url` parts, `finish_reason` values, usage field names), but tool
//! calls and tool results are first-class content parts so that part order
//! survives conversion between dialects.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ImageUrl {
        image_url: ImageRef,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Map<String, Value>,
    },
    ToolResult {
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        content: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// An image reference: either a `data:` URL carrying inline base64 data or
/// a remote URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl CanonicalMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Concatenation of every text part, in order.
    #[must_use]
    pub fn text_content(&self) -> String {
        match &self.content {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// Tool-call parts as `(id, name, arguments)`.
    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &str, &Map<String, Value>)> {
        self.content.as_parts().iter().filter_map(|p| match p {
            ContentPart::ToolCall {
                id,
                name,
                arguments,
            } => Some((id.as_str(), name.as_str(), arguments)),
            _ => None,
        })
    }
}

impl MessageContent {
    /// Borrow the parts; plain text is exposed as an empty slice.
    #[must_use]
    pub fn as_parts(&self) -> &[ContentPart] {
        match self {
            MessageContent::Text(_) => &[],
            MessageContent::Parts(parts) => parts,
        }
    }

    /// Owned parts, with plain text promoted to a single text part.
    #[must_use]
    pub fn to_parts(&self) -> Vec<ContentPart> {
        match self {
            MessageContent::Text(t) => vec![ContentPart::Text { text: t.clone() }],
            MessageContent::Parts(parts) => parts.clone(),
        }
    }

    /// A lone text part collapses to plain text; anything else stays parts.
    #[must_use]
    pub fn from_parts(mut parts: Vec<ContentPart>) -> Self {
        if parts.len() == 1 {
            if let ContentPart::Text { .. } = &parts[0] {
                if let Some(ContentPart::Text { text }) = parts.pop() {
                    return MessageContent::Text(text);
                }
            }
        }
        MessageContent::Parts(parts)
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRequest {
    pub model: String,
    pub messages: Vec<CanonicalMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDeclaration>>,
    /// Set by the gateway from per-model configuration, never by callers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningDirective>,
    /// The caller's own thinking flag, kept verbatim for `auto` reasoning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<Value>,
    #[serde(default)]
    pub stream: bool,
    /// Unrecognized top-level fields of an `OpenAI` request.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningLevel {
    Off,
    Auto,
    Low,
    Medium,
    High,
}

impl ReasoningLevel {
    /// Unrecognized levels are treated as `off`.
    #[must_use]
    pub fn parse(level: &str) -> Self {
        match level.trim().to_ascii_lowercase().as_str() {
            "auto" => Self::Auto,
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            _ => Self::Off,
        }
    }

    /// Fixed thinking budget for the explicit levels.
    #[must_use]
    pub fn budget_tokens(self) -> Option<u32> {
        match self {
            Self::Low => Some(4096),
            Self::Medium => Some(12288),
            Self::High => Some(24576),
            Self::Off | Self::Auto => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Auto => "auto",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningDirective {
    pub level: ReasoningLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u32>,
}

/// Resolved thinking setting for a backend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Thinking {
    Disabled,
    Enabled { budget_tokens: Option<u32> },
}

impl CanonicalRequest {
    /// Apply the reasoning policy: explicit levels use their fixed budgets,
    /// `auto` keeps the caller's own thinking flag when there is one, and
    /// `off` or a missing directive disables thinking.
    #[must_use]
    pub fn resolve_thinking(&self) -> Thinking {
        let Some(directive) = self.reasoning else {
            return Thinking::Disabled;
        };
        match directive.level {
            ReasoningLevel::Low | ReasoningLevel::Medium | ReasoningLevel::High => {
                Thinking::Enabled {
                    budget_tokens: directive.level.budget_tokens(),
                }
            }
            ReasoningLevel::Auto => match &self.thinking {
                None | Some(Value::Null) | Some(Value::Bool(false)) => Thinking::Disabled,
                Some(flag) => {
                    if flag.get("type").and_then(Value::as_str) == Some("disabled") {
                        return Thinking::Disabled;
                    }
                    let own_budget = flag
                        .get("budget_tokens")
                        .and_then(Value::as_u64)
                        .and_then(|b| u32::try_from(b).ok());
                    Thinking::Enabled {
                        budget_tokens: own_budget.or(directive.budget_tokens),
                    }
                }
            },
            ReasoningLevel::Off => Thinking::Disabled,
        }
    }

    /// Leading system messages and the rest of the conversation.
    #[must_use]
    pub fn split_leading_system(&self) -> (&[CanonicalMessage], &[CanonicalMessage]) {
        let n = self
            .messages
            .iter()
            .take_while(|m| m.role == Role::System)
            .count();
        self.messages.split_at(n)
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub choices: Vec<CanonicalChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalChoice {
    pub index: u32,
    pub message: CanonicalMessage,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl CanonicalResponse {
    #[must_use]
    pub fn first_choice(&self) -> Option<&CanonicalChoice> {
        self.choices.first()
    }
}

// ---------------------------------------------------------------------------
// Finish reasons
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Other(String),
}

impl FinishReason {
    #[must_use]
    pub fn parse(reason: &str) -> Self {
        match reason {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "content_filter" => Self::ContentFilter,
            "tool_calls" | "function_call" => Self::ToolCalls,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ContentFilter => "content_filter",
            Self::ToolCalls => "tool_calls",
            Self::Other(other) => other,
        }
    }

    /// Gemini `finishReason`; anything unrecognized is `STOP`.
    #[must_use]
    pub fn to_gemini(&self) -> &'static str {
        match self {
            Self::Length => "MAX_TOKENS",
            Self::ContentFilter => "SAFETY",
            Self::Stop | Self::ToolCalls | Self::Other(_) => "STOP",
        }
    }

    /// Anthropic `stop_reason`; anything unrecognized is `end_turn`.
    #[must_use]
    pub fn to_anthropic(&self) -> &'static str {
        match self {
            Self::Length => "max_tokens",
            Self::ContentFilter => "stop_sequence",
            Self::ToolCalls => "tool_use",
            Self::Stop | Self::Other(_) => "end_turn",
        }
    }

    #[must_use]
    pub fn from_gemini(reason: &str) -> Self {
        match reason {
            "STOP" => Self::Stop,
            "MAX_TOKENS" => Self::Length,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
                Self::ContentFilter
            }
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn from_anthropic(reason: &str) -> Self {
        match reason {
            "end_turn" | "stop_sequence" => Self::Stop,
            "max_tokens" => Self::Length,
            "tool_use" => Self::ToolCalls,
            "refusal" => Self::ContentFilter,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for FinishReason {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<FinishReason> for String {
    fn from(r: FinishReason) -> Self {
        r.as_str().to_string()
    }
}

// ---------------------------------------------------------------------------
// Stream events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta {
        text: String,
    },
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    /// End of the stream, with whatever finish reason and usage the backend
    /// reported before it.
    Terminal {
        finish_reason: Option<FinishReason>,
        usage: Option<Usage>,
    },
}

// ---------------------------------------------------------------------------
// Tool arguments
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ToolArgumentsError {
    #[error("tool arguments are not valid JSON: {0}")]
    Syntax(#[from] serde_json::Error),
    #[error("tool arguments must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Parse stringified tool-call arguments into a JSON object. An empty string
/// means "no arguments" and yields an empty object.
pub fn parse_tool_arguments(raw: &str) -> Result<Map<String, Value>, ToolArgumentsError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        Value::Null => Err(ToolArgumentsError::NotAnObject("null")),
        Value::Bool(_) => Err(ToolArgumentsError::NotAnObject("boolean")),
        Value::Number(_) => Err(ToolArgumentsError::NotAnObject("number")),
        Value::String(_) => Err(ToolArgumentsError::NotAnObject("string")),
        Value::Array(_) => Err(ToolArgumentsError::NotAnObject("array")),
    }
}

/// Build a tool-call part from stringified arguments. Arguments that do not
/// parse to an object fall back to a text part holding the raw string.
pub fn tool_call_part(id: &str, name: &str, raw_arguments: &str) -> ContentPart {
    match parse_tool_arguments(raw_arguments) {
        Ok(arguments) => ContentPart::ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        },
        Err(e) => {
            tracing::warn!(tool = %name, error = %e, "Keeping unparseable tool arguments as text");
            ContentPart::Text {
                text: raw_arguments.to_string(),
            }
        }
    }
}

/// Coerce an already-decoded JSON value into tool arguments.
pub fn arguments_from_value(value: Value) -> Result<Map<String, Value>, ToolArgumentsError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        Value::String(s) => parse_tool_arguments(&s),
        Value::Bool(_) => Err(ToolArgumentsError::NotAnObject("boolean")),
        Value::Number(_) => Err(ToolArgumentsError::NotAnObject("number")),
        Value::Array(_) => Err(ToolArgumentsError::NotAnObject("array")),
    }
}
