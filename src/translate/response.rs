//! Non-streaming responses: backend replies are lifted into a
//! [`CanonicalResponse`] and materialized again in the caller's dialect.
//! Error envelopes for every dialect live here too.

use serde_json::{json, Value};

use super::anthropic_types::{
    ErrorResponse, MessagesResponse, ResponseContentBlock, Usage as AnthropicUsage,
};
use super::canonical::{
    arguments_from_value, tool_call_part, CanonicalChoice, CanonicalMessage, CanonicalResponse,
    ContentPart, FinishReason, MessageContent, Role, Usage,
};
use super::detect::Dialect;
use super::gemini_types::{
    Candidate, Content, FunctionCall, GeminiErrorResponse, GenerateContentResponse, Part,
    UsageMetadata,
};
use super::openai_types::{
    ChatCompletionResponse, ChatError, ChatErrorResponse, ChatToolCall, ChatToolCallFunction,
    ChatUsage, Choice, ChoiceMessage,
};
use crate::error::GatewayError;

// ---------------------------------------------------------------------------
// Canonical → caller dialect
// ---------------------------------------------------------------------------

/// Canonical → Gemini `generateContent` reply.
pub fn canonical_to_gemini(resp: &CanonicalResponse) -> GenerateContentResponse {
    let choice = resp.first_choice();

    let parts = match choice {
        Some(c) => {
            let calls: Vec<Part> = c
                .message
                .tool_calls()
                .map(|(_, name, args)| Part {
                    function_call: Some(FunctionCall {
                        name: name.to_string(),
                        args: Value::Object(args.clone()),
                    }),
                    ..Part::default()
                })
                .collect();
            if calls.is_empty() {
                vec![Part::text(c.message.text_content())]
            } else {
                calls
            }
        }
        None => vec![Part::text("")],
    };

    let finish_reason = choice
        .and_then(|c| c.finish_reason.as_ref())
        .map_or("STOP", FinishReason::to_gemini);

    let usage = resp.usage.unwrap_or_default();

    GenerateContentResponse {
        candidates: vec![Candidate {
            content: Some(Content {
                role: Some("model".to_string()),
                parts,
            }),
            finish_reason: Some(finish_reason.to_string()),
            index: 0,
            safety_ratings: Some(Vec::new()),
        }],
        usage_metadata: Some(UsageMetadata {
            prompt_token_count: usage.prompt_tokens,
            candidates_token_count: usage.completion_tokens,
            total_token_count: usage.total_tokens,
        }),
        model_version: resp.model.clone(),
    }
}

/// Canonical → Anthropic Messages reply. `requested_model` fills in when the
/// backend did not name one.
pub fn canonical_to_anthropic(resp: &CanonicalResponse, requested_model: &str) -> MessagesResponse {
    let choice = resp.first_choice();
    let mut content = Vec::new();

    if let Some(c) = choice {
        let text = c.message.text_content();
        let has_calls = c.message.tool_calls().next().is_some();
        if !text.is_empty() || !has_calls {
            content.push(ResponseContentBlock::Text { text });
        }
        content.extend(
            c.message
                .tool_calls()
                .map(|(id, name, args)| ResponseContentBlock::ToolUse {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: Value::Object(args.clone()),
                }),
        );
    } else {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = choice
        .and_then(|c| c.finish_reason.as_ref())
        .map_or("end_turn", FinishReason::to_anthropic);

    let usage = resp.usage.unwrap_or_default();

    MessagesResponse {
        id: resp
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("msg_{}", chrono::Utc::now().timestamp_millis())),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: resp
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| requested_model.to_string()),
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: None,
        },
    }
}

/// Canonical → `OpenAI` chat completion. Used only when the backend spoke
/// another dialect.
pub fn canonical_to_openai(resp: &CanonicalResponse, requested_model: &str) -> ChatCompletionResponse {
    let choices = resp
        .choices
        .iter()
        .map(|c| {
            let tool_calls: Vec<ChatToolCall> = c
                .message
                .tool_calls()
                .map(|(id, name, args)| ChatToolCall {
                    id: id.to_string(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: name.to_string(),
                        arguments: serde_json::to_string(args).unwrap_or_default(),
                    },
                })
                .collect();
            let text = c.message.text_content();
            Choice {
                index: c.index,
                message: ChoiceMessage {
                    role: "assistant".to_string(),
                    content: (!text.is_empty() || tool_calls.is_empty()).then_some(text),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                },
                finish_reason: c.finish_reason.as_ref().map(|r| r.as_str().to_string()),
            }
        })
        .collect();

    ChatCompletionResponse {
        id: resp
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp().unsigned_abs(),
        model: resp
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| requested_model.to_string()),
        choices,
        usage: resp.usage.map(|u| ChatUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    }
}

// ---------------------------------------------------------------------------
// Backend dialect → canonical
// ---------------------------------------------------------------------------

pub fn openai_response_to_canonical(resp: ChatCompletionResponse) -> CanonicalResponse {
    let choices = resp
        .choices
        .into_iter()
        .map(|c| {
            let tool_calls = c.message.tool_calls.unwrap_or_default();
            let content = if tool_calls.is_empty() {
                MessageContent::Text(c.message.content.unwrap_or_default())
            } else {
                let mut parts: Vec<ContentPart> = c
                    .message
                    .content
                    .filter(|t| !t.is_empty())
                    .map(|text| ContentPart::Text { text })
                    .into_iter()
                    .collect();
                parts.extend(
                    tool_calls
                        .iter()
                        .map(|tc| tool_call_part(&tc.id, &tc.function.name, &tc.function.arguments)),
                );
                MessageContent::Parts(parts)
            };
            CanonicalChoice {
                index: c.index,
                message: CanonicalMessage {
                    role: Role::Assistant,
                    content,
                },
                finish_reason: c.finish_reason.as_deref().map(FinishReason::parse),
            }
        })
        .collect();

    CanonicalResponse {
        id: Some(resp.id).filter(|s| !s.is_empty()),
        model: Some(resp.model).filter(|s| !s.is_empty()),
        choices,
        usage: resp.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    }
}

pub fn anthropic_response_to_canonical(resp: MessagesResponse) -> CanonicalResponse {
    let parts: Vec<ContentPart> = resp
        .content
        .into_iter()
        .filter_map(|block| match block {
            ResponseContentBlock::Text { text } => Some(ContentPart::Text { text }),
            ResponseContentBlock::ToolUse { id, name, input } => {
                Some(match arguments_from_value(input.clone()) {
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
                })
            }
            ResponseContentBlock::Unsupported => None,
        })
        .collect();

    let content = if parts.is_empty() {
        MessageContent::Text(String::new())
    } else {
        MessageContent::from_parts(parts)
    };

    let input = resp.usage.input_tokens;
    let output = resp.usage.output_tokens;

    CanonicalResponse {
        id: Some(resp.id).filter(|s| !s.is_empty()),
        model: Some(resp.model).filter(|s| !s.is_empty()),
        choices: vec![CanonicalChoice {
            index: 0,
            message: CanonicalMessage {
                role: Role::Assistant,
                content,
            },
            finish_reason: resp.stop_reason.as_deref().map(FinishReason::from_anthropic),
        }],
        usage: Some(Usage {
            prompt_tokens: input,
            completion_tokens: output,
            total_tokens: input + output,
        }),
    }
}

pub fn gemini_response_to_canonical(resp: GenerateContentResponse) -> CanonicalResponse {
    let choices = resp
        .candidates
        .into_iter()
        .map(|candidate| {
            let mut parts = Vec::new();
            for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                if let Some(call) = part.function_call {
                    parts.push(match arguments_from_value(call.args.clone()) {
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
                } else if let Some(text) = part.text {
                    parts.push(ContentPart::Text { text });
                }
            }

            let has_calls = parts
                .iter()
                .any(|p| matches!(p, ContentPart::ToolCall { .. }));
            let finish_reason = candidate
                .finish_reason
                .as_deref()
                .map(FinishReason::from_gemini)
                .map(|r| match r {
                    FinishReason::Stop if has_calls => FinishReason::ToolCalls,
                    other => other,
                });

            let content = if has_calls {
                MessageContent::Parts(parts)
            } else {
                MessageContent::Text(
                    parts
                        .into_iter()
                        .filter_map(|p| match p {
                            ContentPart::Text { text } => Some(text),
                            _ => None,
                        })
                        .collect(),
                )
            };

            CanonicalChoice {
                index: candidate.index,
                message: CanonicalMessage {
                    role: Role::Assistant,
                    content,
                },
                finish_reason,
            }
        })
        .collect();

    CanonicalResponse {
        id: None,
        model: resp.model_version,
        choices,
        usage: resp.usage_metadata.map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        }),
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Build the caller-dialect error body for `err`, with the status to send.
pub fn error_envelope(dialect: Dialect, err: &GatewayError) -> (u16, Value) {
    let status = err.status_code();
    let message = err.public_message();

    let body = match dialect {
        Dialect::OpenAi => serde_json::to_value(ChatErrorResponse {
            error: ChatError {
                message,
                error_type: openai_error_type(status).to_string(),
                code: None,
            },
        }),
        Dialect::Anthropic => {
            serde_json::to_value(ErrorResponse::new(anthropic_error_type(status), message))
        }
        Dialect::Gemini => serde_json::to_value(GeminiErrorResponse::new(status, message)),
    };

    let body = body.unwrap_or_else(|_| {
        json!({ "error": { "message": crate::error::DEFAULT_ERROR_MESSAGE, "type": "internal_error" } })
    });
    (status, body)
}

fn openai_error_type(status: u16) -> &'static str {
    match status {
        400 | 404 | 422 => "invalid_request_error",
        401 | 403 => "authentication_error",
        429 => "rate_limit_error",
        _ => "internal_error",
    }
}

fn anthropic_error_type(status: u16) -> &'static str {
    match status {
        400 | 422 => "invalid_request_error",
        401 => "authentication_error",
        403 => "permission_error",
        404 => "not_found_error",
        429 => "rate_limit_error",
        529 => "overloaded_error",
        _ => "api_error",
    }
}
