//! Materialize a [`CanonicalRequest`] into a backend request body plus the
//! headers that backend expects.
//!
//! Materialization never fails: missing values are filled with documented
//! defaults (for example Anthropic's required `max_tokens`).

use std::sync::LazyLock;

use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Map, Value};

use super::anthropic_types::{
    ContentBlock, ImageSource, Message, MessageContent as AnthropicContent, MessagesRequest,
    Role as AnthropicRole, SystemBlock, SystemContent, Tool, ToolResultContent,
};
use super::canonical::{
    CanonicalMessage, CanonicalRequest, ContentPart, MessageContent, ReasoningLevel, Role,
    Thinking,
};
use super::gemini_types::{
    Content, FileData, FunctionCall, FunctionDeclaration, FunctionResponse, GeminiTool,
    GenerateContentRequest, GenerationConfig, InlineData, Part, SystemInstruction,
    ThinkingConfig,
};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage, ChatTool, ChatToolCall,
    ChatToolCallFunction, ContentPart as ChatPart, ImageUrlDetail, StopSequences, StreamOptions,
};

/// Anthropic requires `max_tokens`; this is used when the caller sent none.
pub const DEFAULT_ANTHROPIC_MAX_TOKENS: u64 = 4096;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

static DATA_URL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^data:([^;]+);base64,(.+)$")
        .map_err(|e| tracing::error!(error = %e, "Invalid data URL pattern"))
        .ok()
});

/// A backend request body together with its headers.
#[derive(Debug, Clone)]
pub struct Materialized<T> {
    pub body: T,
    pub headers: HeaderMap,
}

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

/// Canonical → Anthropic Messages request.
pub fn to_anthropic(
    req: &CanonicalRequest,
    system_prompt: Option<&str>,
    api_key: &str,
) -> Materialized<MessagesRequest> {
    let (leading, rest) = req.split_leading_system();

    let system = prepend_anthropic_system(anthropic_system(leading), system_prompt);

    let messages = rest.iter().map(anthropic_message).collect();

    let thinking = match (req.reasoning, req.resolve_thinking()) {
        (None, _) => req.thinking.clone(),
        (Some(_), Thinking::Disabled) => None,
        (Some(_), Thinking::Enabled { budget_tokens }) => Some(json!({
            "type": "enabled",
            "budget_tokens": budget_tokens
                .or(ReasoningLevel::Medium.budget_tokens())
                .unwrap_or_default(),
        })),
    };

    let body = MessagesRequest {
        model: req.model.clone(),
        max_tokens: Some(req.max_tokens.unwrap_or(DEFAULT_ANTHROPIC_MAX_TOKENS)),
        messages,
        system,
        stream: req.stream.then_some(true),
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        tools: req.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| Tool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.parameters.clone(),
                })
                .collect()
        }),
        stop_sequences: req.stop.clone(),
        thinking,
        extra: Map::new(),
    };

    let headers = build_headers(&[
        ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ("x-api-key", api_key.to_string()),
        ("content-type", "application/json".to_string()),
    ]);

    Materialized { body, headers }
}

fn anthropic_system(leading: &[CanonicalMessage]) -> Option<SystemContent> {
    match leading {
        [] => None,
        [only] => Some(match &only.content {
            MessageContent::Text(text) => SystemContent::Text(text.clone()),
            MessageContent::Parts(parts) => SystemContent::Blocks(
                parts
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::Text { text } => Some(SystemBlock::Text { text: text.clone() }),
                        _ => None,
                    })
                    .collect(),
            ),
        }),
        many => Some(SystemContent::Text(
            many.iter()
                .map(CanonicalMessage::text_content)
                .collect::<Vec<_>>()
                .join("\n"),
        )),
    }
}

fn prepend_anthropic_system(
    system: Option<SystemContent>,
    prompt: Option<&str>,
) -> Option<SystemContent> {
    let Some(prompt) = prompt.filter(|p| !p.is_empty()) else {
        return system;
    };
    Some(match system {
        None => SystemContent::Text(prompt.to_string()),
        Some(SystemContent::Text(existing)) => SystemContent::Text(format!("{prompt}\n{existing}")),
        Some(SystemContent::Blocks(mut blocks)) => {
            blocks.insert(
                0,
                SystemBlock::Text {
                    text: prompt.to_string(),
                },
            );
            SystemContent::Blocks(blocks)
        }
    })
}

fn anthropic_message(msg: &CanonicalMessage) -> Message {
    // Non-leading system messages have no Anthropic slot; send them as user turns.
    let role = match msg.role {
        Role::Assistant => AnthropicRole::Assistant,
        Role::User | Role::System => AnthropicRole::User,
    };

    let content = match &msg.content {
        MessageContent::Text(text) => AnthropicContent::Text(text.clone()),
        MessageContent::Parts(parts) => {
            AnthropicContent::Blocks(parts.iter().map(anthropic_block).collect())
        }
    };

    Message { role, content }
}

fn anthropic_block(part: &ContentPart) -> ContentBlock {
    match part {
        ContentPart::Text { text } => ContentBlock::Text { text: text.clone() },
        ContentPart::ImageUrl { image_url } => {
            let source = match split_data_url(&image_url.url) {
                Some((media_type, data)) => ImageSource::Base64 {
                    media_type: media_type.to_string(),
                    data: data.to_string(),
                },
                None => ImageSource::Url {
                    url: image_url.url.clone(),
                },
            };
            ContentBlock::Image { source }
        }
        ContentPart::ToolCall {
            id,
            name,
            arguments,
        } => ContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: Value::Object(arguments.clone()),
        },
        ContentPart::ToolResult {
            tool_call_id,
            content,
            is_error,
            ..
        } => ContentBlock::ToolResult {
            tool_use_id: tool_call_id.clone(),
            content: tool_result_content(content),
            is_error: *is_error,
        },
    }
}

fn tool_result_content(content: &Value) -> Option<ToolResultContent> {
    match content {
        Value::Null => None,
        Value::String(s) => Some(ToolResultContent::Text(s.clone())),
        other => Some(
            serde_json::from_value::<ToolResultContent>(other.clone())
                .unwrap_or_else(|_| ToolResultContent::Text(other.to_string())),
        ),
    }
}

// ---------------------------------------------------------------------------
// OpenAI and common
// ---------------------------------------------------------------------------

/// Canonical → `OpenAI` chat-completions request, keeping every extension.
pub fn to_openai(
    req: &CanonicalRequest,
    system_prompt: Option<&str>,
    api_key: &str,
) -> Materialized<ChatCompletionRequest> {
    Materialized {
        body: chat_request(req, system_prompt, false),
        headers: bearer_headers(api_key),
    }
}

/// Canonical → the portable chat-completions core understood by generic
/// `OpenAI`-compatible servers: no `stream_options`, no extra fields, no
/// reasoning controls.
pub fn to_common(
    req: &CanonicalRequest,
    system_prompt: Option<&str>,
    api_key: &str,
) -> Materialized<ChatCompletionRequest> {
    Materialized {
        body: chat_request(req, system_prompt, true),
        headers: bearer_headers(api_key),
    }
}

fn chat_request(
    req: &CanonicalRequest,
    system_prompt: Option<&str>,
    portable: bool,
) -> ChatCompletionRequest {
    let mut messages: Vec<ChatMessage> = req.messages.iter().flat_map(chat_messages).collect();
    prepend_chat_system(&mut messages, system_prompt);

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| ChatTool {
                tool_type: "function".to_string(),
                function: ChatFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    });

    let mut body = ChatCompletionRequest {
        model: req.model.clone(),
        messages,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: None,
        stream: req.stream.then_some(true),
        stream_options: None,
        tools,
        stop: req.stop.clone().map(StopSequences::Many),
        reasoning_effort: None,
        thinking: None,
        extra: Map::new(),
    };

    if portable {
        return body;
    }

    let mut extra = req.extra.clone();
    let caller_effort = extra
        .remove("reasoning_effort")
        .and_then(|v| v.as_str().map(str::to_string));

    body.top_k = req.top_k;
    let caller_stream_options = extra
        .remove("stream_options")
        .and_then(|v| serde_json::from_value::<StreamOptions>(v).ok());
    body.stream_options = req.stream.then(|| {
        caller_stream_options.unwrap_or(StreamOptions {
            include_usage: true,
            extra: Map::new(),
        })
    });
    body.thinking = req.thinking.clone();
    body.reasoning_effort = match req.reasoning.map(|d| d.level) {
        None | Some(ReasoningLevel::Auto) => caller_effort,
        Some(ReasoningLevel::Off) => None,
        Some(level) => Some(level.as_str().to_string()),
    };
    if matches!(req.reasoning.map(|d| d.level), Some(ReasoningLevel::Off)) {
        body.thinking = None;
    }
    body.extra = extra;
    body
}

/// One canonical message can expand to several chat messages: tool results
/// become separate `tool`-role messages, flushing any user content before them.
fn chat_messages(msg: &CanonicalMessage) -> Vec<ChatMessage> {
    match (&msg.role, &msg.content) {
        (Role::System, content) => vec![ChatMessage::new(
            "system",
            Some(ChatContent::Text(match content {
                MessageContent::Text(t) => t.clone(),
                MessageContent::Parts(_) => msg.text_content(),
            })),
        )],
        (Role::User, MessageContent::Text(text)) => {
            vec![ChatMessage::new("user", Some(ChatContent::Text(text.clone())))]
        }
        (Role::Assistant, MessageContent::Text(text)) => {
            vec![ChatMessage::new(
                "assistant",
                Some(ChatContent::Text(text.clone())),
            )]
        }
        (Role::User, MessageContent::Parts(parts)) => chat_user_messages(parts),
        (Role::Assistant, MessageContent::Parts(parts)) => vec![chat_assistant_message(parts)],
    }
}

fn chat_user_messages(parts: &[ContentPart]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut pending: Vec<ChatPart> = Vec::new();

    for part in parts {
        match part {
            ContentPart::Text { text } => pending.push(ChatPart::Text { text: text.clone() }),
            ContentPart::ImageUrl { image_url } => pending.push(ChatPart::ImageUrl {
                image_url: ImageUrlDetail {
                    url: image_url.url.clone(),
                    detail: None,
                },
            }),
            ContentPart::ToolResult {
                tool_call_id,
                content,
                is_error,
                ..
            } => {
                if !pending.is_empty() {
                    messages.push(ChatMessage::new(
                        "user",
                        Some(collapse_chat_parts(std::mem::take(&mut pending))),
                    ));
                }
                let mut tool = ChatMessage::new(
                    "tool",
                    Some(ChatContent::Text(tool_result_text(content, *is_error))),
                );
                tool.tool_call_id = Some(tool_call_id.clone());
                messages.push(tool);
            }
            ContentPart::ToolCall { name, .. } => {
                tracing::debug!(tool = %name, "Dropping tool call found in a user message");
            }
        }
    }

    if !pending.is_empty() || messages.is_empty() {
        messages.push(ChatMessage::new("user", Some(collapse_chat_parts(pending))));
    }

    messages
}

fn chat_assistant_message(parts: &[ContentPart]) -> ChatMessage {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for part in parts {
        match part {
            ContentPart::Text { text: t } => text.push_str(t),
            ContentPart::ToolCall {
                id,
                name,
                arguments,
            } => tool_calls.push(ChatToolCall {
                id: id.clone(),
                call_type: "function".to_string(),
                function: ChatToolCallFunction {
                    name: name.clone(),
                    arguments: serde_json::to_string(arguments).unwrap_or_default(),
                },
            }),
            ContentPart::ImageUrl { .. } | ContentPart::ToolResult { .. } => {
                tracing::debug!("Dropping non-text part from assistant message");
            }
        }
    }

    let mut msg = ChatMessage::new(
        "assistant",
        (!text.is_empty() || tool_calls.is_empty()).then_some(ChatContent::Text(text)),
    );
    msg.tool_calls = (!tool_calls.is_empty()).then_some(tool_calls);
    msg
}

fn collapse_chat_parts(mut parts: Vec<ChatPart>) -> ChatContent {
    match parts.as_slice() {
        [] => ChatContent::Text(String::new()),
        [ChatPart::Text { .. }] => match parts.pop() {
            Some(ChatPart::Text { text }) => ChatContent::Text(text),
            _ => ChatContent::Parts(parts),
        },
        _ => ChatContent::Parts(parts),
    }
}

fn tool_result_text(content: &Value, is_error: Option<bool>) -> String {
    let prefix = if is_error == Some(true) { "ERROR: " } else { "" };
    match content {
        Value::String(s) => format!("{prefix}{s}"),
        Value::Null => format!("{prefix}(no content)"),
        Value::Array(items) => {
            // Anthropic-style content blocks: keep the text.
            let text = items
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n");
            format!("{prefix}{text}")
        }
        other => format!("{prefix}{other}"),
    }
}

fn prepend_chat_system(messages: &mut Vec<ChatMessage>, prompt: Option<&str>) {
    let Some(prompt) = prompt.filter(|p| !p.is_empty()) else {
        return;
    };
    if let Some(first) = messages.first_mut().filter(|m| m.role == "system") {
        let merged = match &first.content {
            Some(ChatContent::Text(existing)) => Some(format!("{prompt}\n{existing}")),
            _ => None,
        };
        if let Some(merged) = merged {
            first.content = Some(ChatContent::Text(merged));
            return;
        }
    }
    messages.insert(
        0,
        ChatMessage::new("system", Some(ChatContent::Text(prompt.to_string()))),
    );
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

/// Canonical → Gemini `generateContent` request. The model travels in the
/// URL, so the body carries none.
pub fn to_gemini(
    req: &CanonicalRequest,
    system_prompt: Option<&str>,
    api_key: &str,
) -> Materialized<GenerateContentRequest> {
    let mut system_text = String::new();
    if let Some(prompt) = system_prompt.filter(|p| !p.is_empty()) {
        system_text.push_str(prompt);
        system_text.push('\n');
    }

    let mut contents = Vec::with_capacity(req.messages.len());
    for msg in &req.messages {
        if msg.role == Role::System {
            system_text.push_str(&msg.text_content());
            system_text.push('\n');
            continue;
        }
        let parts: Vec<Part> = msg.content.to_parts().iter().filter_map(gemini_part).collect();
        if parts.is_empty() {
            continue;
        }
        let role = if msg.role == Role::Assistant { "model" } else { "user" };
        contents.push(Content {
            role: Some(role.to_string()),
            parts,
        });
    }

    let system_text = system_text.trim();
    let system_instruction = (!system_text.is_empty()).then(|| {
        SystemInstruction::Content(Content {
            role: None,
            parts: vec![Part::text(system_text)],
        })
    });

    let thinking_config = match req.resolve_thinking() {
        Thinking::Enabled { budget_tokens } => Some(ThinkingConfig {
            thinking_budget: budget_tokens,
            include_thoughts: None,
        }),
        Thinking::Disabled => None,
    };

    let generation_config = GenerationConfig {
        max_output_tokens: req.max_tokens.or_else(|| {
            req.extra
                .get("max_completion_tokens")
                .and_then(Value::as_u64)
        }),
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        stop_sequences: req.stop.clone(),
        candidate_count: req
            .extra
            .get("n")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok()),
        thinking_config,
        stream: None,
    };

    let tools = req.tools.as_ref().filter(|t| !t.is_empty()).map(|tools| {
        vec![GeminiTool {
            function_declarations: tools
                .iter()
                .map(|t| FunctionDeclaration {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: Some(t.parameters.clone()).filter(|p| match p {
                        Value::Null => false,
                        Value::Object(map) => !map.is_empty(),
                        _ => true,
                    }),
                })
                .collect(),
        }]
    });

    let body = GenerateContentRequest {
        model: None,
        contents,
        system_instruction,
        generation_config: Some(generation_config),
        tools,
        extra: Map::new(),
    };

    let headers = build_headers(&[
        ("content-type", "application/json".to_string()),
        ("x-goog-api-key", api_key.to_string()),
        ("x-session-id", uuid::Uuid::new_v4().to_string()),
        ("x-assistant-message-id", uuid::Uuid::new_v4().to_string()),
    ]);

    Materialized { body, headers }
}

fn gemini_part(part: &ContentPart) -> Option<Part> {
    match part {
        ContentPart::Text { text } if text.is_empty() => None,
        ContentPart::Text { text } => Some(Part::text(text.clone())),
        ContentPart::ImageUrl { image_url } => {
            if let Some((mime_type, data)) = split_data_url(&image_url.url) {
                return Some(Part {
                    inline_data: Some(InlineData {
                        mime_type: mime_type.to_string(),
                        data: data.to_string(),
                    }),
                    ..Part::default()
                });
            }
            if image_url.url.starts_with("data:") {
                tracing::debug!("Dropping malformed data URL");
                return None;
            }
            if let Some(mime_type) = &image_url.mime_type {
                return Some(Part {
                    file_data: Some(FileData {
                        mime_type: Some(mime_type.clone()),
                        file_uri: image_url.url.clone(),
                    }),
                    ..Part::default()
                });
            }
            // Remote URL: left for a later fetch-and-embed step.
            Some(Part {
                inline_data: Some(InlineData {
                    mime_type: guess_mime_type(&image_url.url).to_string(),
                    data: image_url.url.clone(),
                }),
                ..Part::default()
            })
        }
        ContentPart::ToolCall {
            name, arguments, ..
        } => Some(Part {
            function_call: Some(FunctionCall {
                name: name.clone(),
                args: Value::Object(arguments.clone()),
            }),
            ..Part::default()
        }),
        ContentPart::ToolResult {
            tool_call_id,
            name,
            content,
            ..
        } => Some(Part {
            function_response: Some(FunctionResponse {
                name: name.clone().unwrap_or_else(|| tool_call_id.clone()),
                response: match content {
                    Value::Object(_) => content.clone(),
                    other => json!({ "content": other }),
                },
            }),
            ..Part::default()
        }),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Split `data:<mime>;base64,<data>` into its MIME type and payload.
pub fn split_data_url(url: &str) -> Option<(&str, &str)> {
    let re = DATA_URL.as_ref()?;
    let caps = re.captures(url)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

/// Guess an image MIME type from a URL's file extension.
#[must_use]
pub fn guess_mime_type(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        _ => "image/jpeg",
    }
}

fn bearer_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    match HeaderValue::from_str(&format!("Bearer {api_key}")) {
        Ok(value) => {
            headers.insert(AUTHORIZATION, value);
        }
        Err(_) => tracing::warn!("API key contains characters not allowed in a header"),
    }
    headers
}

fn build_headers(pairs: &[(&'static str, String)]) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(pairs.len());
    for &(name, ref value) in pairs {
        match HeaderValue::from_str(value) {
            Ok(v) => {
                headers.insert(HeaderName::from_static(name), v);
            }
            Err(_) => tracing::warn!(header = name, "Skipping header with an invalid value"),
        }
    }
    headers
}
