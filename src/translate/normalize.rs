//! Normalize inbound requests of every dialect into a [`CanonicalRequest`].
//!
//! Malformed pieces never fail the request: a part with no recognized content
//! is dropped, and a message left without parts is dropped with it.

use serde_json::{json, Map, Value};

use super::anthropic_types::{
    default_model, ContentBlock, ImageSource, Message, MessageContent as AnthropicContent,
    MessagesRequest, Role as AnthropicRole, SystemBlock, SystemContent,
};
use super::canonical::{
    arguments_from_value, tool_call_part, CanonicalMessage, CanonicalRequest, ContentPart,
    ImageRef, MessageContent, Role, ToolDeclaration,
};
use super::detect::GeminiEndpoint;
use super::gemini_types::{
    Content, GenerateContentRequest, Part, SystemInstruction, ThinkingConfig,
};
use super::openai_types::{ChatCompletionRequest, ChatContent, ChatMessage, ContentPart as ChatPart};

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

/// Translate an Anthropic Messages request into the canonical form.
pub fn anthropic_to_canonical(req: MessagesRequest) -> CanonicalRequest {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    if let Some(system) = req.system {
        match system {
            SystemContent::Text(text) if !text.is_empty() => {
                messages.push(CanonicalMessage::text(Role::System, text));
            }
            SystemContent::Blocks(blocks) if !blocks.is_empty() => {
                let parts = blocks
                    .into_iter()
                    .map(|b| match b {
                        SystemBlock::Text { text } => ContentPart::Text { text },
                    })
                    .collect();
                messages.push(CanonicalMessage {
                    role: Role::System,
                    content: MessageContent::Parts(parts),
                });
            }
            _ => {}
        }
    }

    messages.extend(req.messages.into_iter().filter_map(anthropic_message));

    CanonicalRequest {
        model: req.model,
        messages,
        max_tokens: req.max_tokens.filter(|t| *t > 0),
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        stop: req.stop_sequences,
        tools: req.tools.map(|tools| {
            tools
                .into_iter()
                .map(|t| ToolDeclaration {
                    name: t.name,
                    description: t.description,
                    parameters: t.input_schema,
                })
                .collect()
        }),
        reasoning: None,
        thinking: req.thinking,
        stream: req.stream.unwrap_or(false),
        extra: Map::new(),
    }
}

fn anthropic_message(msg: Message) -> Option<CanonicalMessage> {
    let role = match msg.role {
        AnthropicRole::User => Role::User,
        AnthropicRole::Assistant => Role::Assistant,
    };

    let content = match msg.content {
        AnthropicContent::Text(text) => MessageContent::Text(text),
        AnthropicContent::Blocks(blocks) => {
            let parts: Vec<ContentPart> = blocks.into_iter().filter_map(anthropic_block).collect();
            if parts.is_empty() {
                tracing::debug!(role = ?role, "Dropping Anthropic message with no usable blocks");
                return None;
            }
            MessageContent::Parts(parts)
        }
    };

    Some(CanonicalMessage { role, content })
}

fn anthropic_block(block: ContentBlock) -> Option<ContentPart> {
    match block {
        ContentBlock::Text { text } => Some(ContentPart::Text { text }),
        ContentBlock::Image { source } => {
            let url = match source {
                ImageSource::Base64 { media_type, data } => {
                    format!("data:{media_type};base64,{data}")
                }
                ImageSource::Url { url } => url,
                ImageSource::Unsupported => {
                    tracing::debug!("Dropping Anthropic image with unsupported source");
                    return None;
                }
            };
            Some(ContentPart::ImageUrl {
                image_url: ImageRef {
                    url,
                    mime_type: None,
                },
            })
        }
        ContentBlock::ToolUse { id, name, input } => Some(match arguments_from_value(input.clone()) {
            Ok(arguments) => ContentPart::ToolCall {
                id,
                name,
                arguments,
            },
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "Keeping tool_use input as text");
                ContentPart::Text {
                    text: input.to_string(),
                }
            }
        }),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => Some(ContentPart::ToolResult {
            tool_call_id: tool_use_id,
            name: None,
            content: content
                .and_then(|c| serde_json::to_value(c).ok())
                .unwrap_or(Value::Null),
            is_error,
        }),
        ContentBlock::Thinking { .. } | ContentBlock::Unsupported => {
            tracing::debug!("Dropping unsupported Anthropic content block");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

/// Translate a Gemini `generateContent` request into the canonical form.
///
/// `endpoint` carries the model and streaming flag of the model-scoped URL
/// forms; the body's own `model` wins when both are present.
pub fn gemini_to_canonical(
    req: GenerateContentRequest,
    endpoint: Option<&GeminiEndpoint>,
) -> CanonicalRequest {
    let mut messages = Vec::with_capacity(req.contents.len() + 1);

    if let Some(instruction) = req.system_instruction {
        let text = match instruction {
            SystemInstruction::Text(text) => text,
            SystemInstruction::Content(content) => content
                .parts
                .into_iter()
                .filter_map(|p| p.text.filter(|t| !t.is_empty()))
                .collect::<Vec<_>>()
                .join("\n"),
        };
        if !text.is_empty() {
            messages.push(CanonicalMessage::text(Role::System, text));
        }
    }

    messages.extend(req.contents.into_iter().filter_map(gemini_content));

    let config = req.generation_config.unwrap_or_default();
    if config.top_k.is_some() {
        tracing::debug!("Dropping Gemini topK: no canonical equivalent");
    }

    let tools: Vec<ToolDeclaration> = req
        .tools
        .unwrap_or_default()
        .into_iter()
        .flat_map(|t| t.function_declarations)
        .map(|d| ToolDeclaration {
            name: d.name,
            description: d.description,
            parameters: d.parameters.unwrap_or_else(|| Value::Object(Map::new())),
        })
        .collect();

    let model = req
        .model
        .or_else(|| endpoint.map(|e| e.model.clone()))
        .unwrap_or_else(default_model);

    CanonicalRequest {
        model,
        messages,
        max_tokens: config.max_output_tokens.filter(|t| *t > 0),
        temperature: config.temperature,
        top_p: config.top_p,
        top_k: None,
        stop: config.stop_sequences,
        tools: (!tools.is_empty()).then_some(tools),
        reasoning: None,
        thinking: config.thinking_config.map(|tc| gemini_thinking(&tc)),
        stream: config.stream.unwrap_or(false) || endpoint.is_some_and(|e| e.stream),
        extra: Map::new(),
    }
}

/// A caller's `thinkingConfig` as a canonical thinking flag. A zero budget
/// switches thinking off.
fn gemini_thinking(config: &ThinkingConfig) -> Value {
    match config.thinking_budget {
        Some(0) => json!({"type": "disabled"}),
        Some(budget) => json!({"type": "enabled", "budget_tokens": budget}),
        None => json!({"type": "enabled"}),
    }
}

fn gemini_content(content: Content) -> Option<CanonicalMessage> {
    let role = if content.role.as_deref() == Some("model") {
        Role::Assistant
    } else {
        Role::User
    };

    let parts: Vec<ContentPart> = content.parts.into_iter().filter_map(gemini_part).collect();
    if parts.is_empty() {
        tracing::debug!(role = ?role, "Dropping Gemini content with no usable parts");
        return None;
    }

    Some(CanonicalMessage {
        role,
        content: MessageContent::from_parts(parts),
    })
}

fn gemini_part(part: Part) -> Option<ContentPart> {
    if let Some(text) = part.text.filter(|t| !t.is_empty()) {
        return Some(ContentPart::Text { text });
    }
    if let Some(inline) = part.inline_data {
        return Some(ContentPart::ImageUrl {
            image_url: ImageRef {
                url: format!("data:{};base64,{}", inline.mime_type, inline.data),
                mime_type: None,
            },
        });
    }
    if let Some(file) = part.file_data {
        return Some(ContentPart::ImageUrl {
            image_url: ImageRef {
                url: file.file_uri,
                mime_type: file.mime_type,
            },
        });
    }
    if let Some(call) = part.function_call {
        return Some(match arguments_from_value(call.args.clone()) {
            Ok(arguments) => ContentPart::ToolCall {
                id: call.name.clone(),
                name: call.name,
                arguments,
            },
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "Keeping functionCall args as text");
                ContentPart::Text {
                    text: call.args.to_string(),
                }
            }
        });
    }
    if let Some(response) = part.function_response {
        return Some(ContentPart::ToolResult {
            tool_call_id: response.name.clone(),
            name: Some(response.name),
            content: response.response,
            is_error: None,
        });
    }

    tracing::debug!("Dropping Gemini part with no recognized key");
    None
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

/// Lift an `OpenAI` chat-completions request into the canonical form.
///
/// This is close to the identity: tool calls move from the message level into
/// content parts and `tool`-role messages become tool-result parts.
pub fn openai_to_canonical(req: ChatCompletionRequest) -> CanonicalRequest {
    let messages = req
        .messages
        .into_iter()
        .filter_map(openai_message)
        .collect();

    let mut extra = req.extra;
    if let Some(effort) = req.reasoning_effort {
        extra.insert("reasoning_effort".to_string(), Value::String(effort));
    }
    if let Some(options) = req.stream_options.and_then(|o| serde_json::to_value(o).ok()) {
        extra.insert("stream_options".to_string(), options);
    }

    let model = if req.model.is_empty() {
        default_model()
    } else {
        req.model
    };

    CanonicalRequest {
        model,
        messages,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        stop: req.stop.map(|s| s.into_vec()),
        tools: req.tools.map(|tools| {
            tools
                .into_iter()
                .map(|t| ToolDeclaration {
                    name: t.function.name,
                    description: t.function.description,
                    parameters: t.function.parameters,
                })
                .collect()
        }),
        reasoning: None,
        thinking: req.thinking,
        stream: req.stream.unwrap_or(false),
        extra,
    }
}

fn openai_message(msg: ChatMessage) -> Option<CanonicalMessage> {
    match msg.role.as_str() {
        "tool" | "function" => {
            let content = msg
                .content
                .map(|c| Value::String(chat_content_text(&c)))
                .unwrap_or(Value::Null);
            let tool_call_id = msg
                .tool_call_id
                .or_else(|| msg.name.clone())
                .unwrap_or_default();
            return Some(CanonicalMessage {
                role: Role::User,
                content: MessageContent::Parts(vec![ContentPart::ToolResult {
                    tool_call_id,
                    name: msg.name,
                    content,
                    is_error: None,
                }]),
            });
        }
        _ => {}
    }

    let role = match msg.role.as_str() {
        "system" | "developer" => Role::System,
        "assistant" => Role::Assistant,
        _ => Role::User,
    };

    let tool_calls = msg.tool_calls.unwrap_or_default();
    let content = match msg.content {
        None if tool_calls.is_empty() => MessageContent::Text(String::new()),
        Some(ChatContent::Text(text)) if tool_calls.is_empty() => MessageContent::Text(text),
        content => {
            let mut parts: Vec<ContentPart> = match content {
                None => Vec::new(),
                Some(ChatContent::Text(text)) if text.is_empty() => Vec::new(),
                Some(ChatContent::Text(text)) => vec![ContentPart::Text { text }],
                Some(ChatContent::Parts(parts)) => {
                    parts.into_iter().filter_map(openai_part).collect()
                }
            };
            parts.extend(
                tool_calls
                    .iter()
                    .map(|tc| tool_call_part(&tc.id, &tc.function.name, &tc.function.arguments)),
            );
            if parts.is_empty() {
                tracing::debug!(role = %msg.role, "Dropping OpenAI message with no usable parts");
                return None;
            }
            MessageContent::Parts(parts)
        }
    };

    Some(CanonicalMessage { role, content })
}

fn openai_part(part: ChatPart) -> Option<ContentPart> {
    match part {
        ChatPart::Text { text } => Some(ContentPart::Text { text }),
        ChatPart::ImageUrl { image_url } => Some(ContentPart::ImageUrl {
            image_url: ImageRef {
                url: image_url.url,
                mime_type: None,
            },
        }),
        ChatPart::Unsupported => {
            tracing::debug!("Dropping unsupported OpenAI content part");
            None
        }
    }
}

fn chat_content_text(content: &ChatContent) -> String {
    match content {
        ChatContent::Text(t) => t.clone(),
        ChatContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ChatPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(""),
    }
}
