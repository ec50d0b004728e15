//! Incremental SSE translation between dialects.
//!
//! [`StreamTranslator`] is a line-oriented state machine: bytes go in, whole
//! destination frames come out. Upstream lines are decoded into canonical
//! [`StreamEvent`]s and re-encoded for the destination. The terminal frame is
//! emitted exactly once; after it every further input is ignored.
//!
//! [`translate_stream`] wraps the translator around an upstream byte stream
//! as a pull-driven, abortable [`FrameStream`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::{AbortHandle, Abortable};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};

use super::anthropic_types::{
    Delta, DeltaUsage, MessageDeltaBody, ResponseContentBlock, StreamEvent as AnthropicEvent,
};
use super::canonical::{parse_tool_arguments, FinishReason, StreamEvent, Usage};
use super::detect::Dialect;
use super::gemini_types::{
    Content, FunctionCall, GenerateContentResponse, Part, StreamCandidate, StreamChunk,
    UsageMetadata,
};
use super::openai_types::{
    ChatCompletionChunk, ChatUsage, ChunkChoice, ChunkDelta, ChunkToolCall, ChunkToolCallFunction,
};

/// Tool call being assembled for a Gemini destination, which has no
/// incremental argument syntax.
#[derive(Debug, Default)]
struct PendingToolCall {
    name: String,
    arguments: String,
}

#[derive(Debug)]
pub struct StreamTranslator {
    upstream: Dialect,
    destination: Dialect,
    buffer: Vec<u8>,
    terminated: bool,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    saw_tool_calls: bool,

    // Anthropic upstream: content block index -> tool call index.
    anthropic_tool_blocks: HashMap<usize, u32>,
    next_tool_index: u32,

    // Anthropic destination: tool indices whose content_block_start went out.
    opened_tool_blocks: HashSet<u32>,

    // Gemini destination.
    pending_tools: BTreeMap<u32, PendingToolCall>,

    // OpenAI destination.
    chunk_id: String,
    created: u64,
    model: String,
    role_sent: bool,
}

impl StreamTranslator {
    pub fn new(upstream: Dialect, destination: Dialect) -> Self {
        Self {
            upstream,
            destination,
            buffer: Vec::new(),
            terminated: false,
            finish_reason: None,
            usage: None,
            saw_tool_calls: false,
            anthropic_tool_blocks: HashMap::new(),
            next_tool_index: 0,
            opened_tool_blocks: HashSet::new(),
            pending_tools: BTreeMap::new(),
            chunk_id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created: chrono::Utc::now().timestamp().unsigned_abs(),
            model: String::new(),
            role_sent: false,
        }
    }

    /// Model name stamped on re-encoded `OpenAI` chunks.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Feed raw upstream bytes, returning every destination frame completed
    /// by them. A line split across calls is held until its newline arrives.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut frames = Vec::new();
        if self.terminated {
            return frames;
        }

        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.process_line(&line[..pos], &mut frames);
            if self.terminated {
                self.buffer.clear();
                break;
            }
        }
        frames
    }

    /// Upstream ended: flush the trailing partial line, then emit the
    /// terminal frame unless one already went out.
    pub fn finish(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        if self.terminated {
            return frames;
        }
        let rest = std::mem::take(&mut self.buffer);
        if !rest.is_empty() {
            self.process_line(&rest, &mut frames);
        }
        if !self.terminated {
            self.terminate(&mut frames);
        }
        frames
    }

    fn process_line(&mut self, raw: &[u8], frames: &mut Vec<String>) {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        // event:, id: and retry: lines carry nothing the payload lacks.
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.terminate(frames);
            return;
        }

        let decoded = match self.upstream {
            Dialect::OpenAi => self.decode_openai(data),
            Dialect::Anthropic => self.decode_anthropic(data),
            Dialect::Gemini => self.decode_gemini(data),
        };
        let events = match decoded {
            Ok(events) => events,
            Err(e) => {
                tracing::debug!(upstream = %self.upstream, error = %e, "Skipping unparseable stream line");
                return;
            }
        };

        for event in events {
            if let StreamEvent::Terminal { .. } = event {
                self.terminate(frames);
                return;
            }
            self.encode(&event, frames);
        }
    }

    fn terminate(&mut self, frames: &mut Vec<String>) {
        if self.terminated {
            return;
        }
        let event = StreamEvent::Terminal {
            finish_reason: self.finish_reason.clone(),
            usage: self.usage,
        };
        self.encode(&event, frames);
        self.terminated = true;
    }

    // -- Decoders --

    fn decode_openai(&mut self, data: &str) -> serde_json::Result<Vec<StreamEvent>> {
        let chunk: ChatCompletionChunk = serde_json::from_str(data)?;
        let mut events = Vec::new();

        if let Some(u) = chunk.usage {
            self.usage = Some(Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(events);
        };

        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            events.push(StreamEvent::TextDelta { text });
        }
        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = tc
                .function
                .map(|f| (f.name, f.arguments.unwrap_or_default()))
                .unwrap_or_default();
            events.push(StreamEvent::ToolCallDelta {
                index: tc.index,
                id: tc.id,
                name,
                arguments,
            });
        }
        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(FinishReason::parse(&reason));
        }
        Ok(events)
    }

    fn decode_anthropic(&mut self, data: &str) -> serde_json::Result<Vec<StreamEvent>> {
        let event: AnthropicEvent = serde_json::from_str(data)?;
        let mut events = Vec::new();

        match event {
            AnthropicEvent::MessageStart { message } => {
                self.usage = Some(Usage {
                    prompt_tokens: message.usage.input_tokens,
                    completion_tokens: message.usage.output_tokens,
                    total_tokens: message.usage.input_tokens + message.usage.output_tokens,
                });
            }
            AnthropicEvent::ContentBlockStart {
                index,
                content_block: ResponseContentBlock::ToolUse { id, name, .. },
            } => {
                let tool_index = self.next_tool_index;
                self.next_tool_index += 1;
                self.anthropic_tool_blocks.insert(index, tool_index);
                events.push(StreamEvent::ToolCallDelta {
                    index: tool_index,
                    id: Some(id),
                    name: Some(name),
                    arguments: String::new(),
                });
            }
            AnthropicEvent::ContentBlockDelta { index, delta } => match delta {
                Delta::TextDelta { text } if !text.is_empty() => {
                    events.push(StreamEvent::TextDelta { text });
                }
                Delta::InputJsonDelta { partial_json } => {
                    if let Some(&tool_index) = self.anthropic_tool_blocks.get(&index) {
                        events.push(StreamEvent::ToolCallDelta {
                            index: tool_index,
                            id: None,
                            name: None,
                            arguments: partial_json,
                        });
                    }
                }
                _ => {}
            },
            AnthropicEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason {
                    self.finish_reason = Some(FinishReason::from_anthropic(&reason));
                }
                let mut merged = self.usage.unwrap_or_default();
                if let Some(input) = usage.input_tokens {
                    merged.prompt_tokens = input;
                }
                merged.completion_tokens = usage.output_tokens;
                merged.total_tokens = merged.prompt_tokens + merged.completion_tokens;
                self.usage = Some(merged);
            }
            AnthropicEvent::MessageStop => events.push(StreamEvent::Terminal {
                finish_reason: None,
                usage: None,
            }),
            AnthropicEvent::Error { error } => {
                tracing::warn!(error_type = %error.error_type, message = %error.message, "Upstream stream reported an error");
            }
            AnthropicEvent::ContentBlockStart { .. }
            | AnthropicEvent::ContentBlockStop { .. }
            | AnthropicEvent::Ping => {}
        }
        Ok(events)
    }

    fn decode_gemini(&mut self, data: &str) -> serde_json::Result<Vec<StreamEvent>> {
        let chunk: GenerateContentResponse = serde_json::from_str(data)?;
        let mut events = Vec::new();

        if let Some(u) = chunk.usage_metadata {
            self.usage = Some(Usage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            });
        }

        let Some(candidate) = chunk.candidates.into_iter().next() else {
            return Ok(events);
        };

        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(call) = part.function_call {
                let index = self.next_tool_index;
                self.next_tool_index += 1;
                events.push(StreamEvent::ToolCallDelta {
                    index,
                    id: Some(call.name.clone()),
                    name: Some(call.name),
                    arguments: call.args.to_string(),
                });
            } else if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::TextDelta { text });
            }
        }

        if let Some(reason) = candidate.finish_reason {
            let has_calls = self.next_tool_index > 0;
            self.finish_reason = Some(match FinishReason::from_gemini(&reason) {
                FinishReason::Stop if has_calls => FinishReason::ToolCalls,
                other => other,
            });
        }
        Ok(events)
    }

    // -- Encoders --

    fn encode(&mut self, event: &StreamEvent, frames: &mut Vec<String>) {
        if let StreamEvent::ToolCallDelta { .. } = event {
            self.saw_tool_calls = true;
        }
        match self.destination {
            Dialect::Gemini => self.encode_gemini(event, frames),
            Dialect::Anthropic => self.encode_anthropic(event, frames),
            Dialect::OpenAi => self.encode_openai(event, frames),
        }
    }

    fn encode_gemini(&mut self, event: &StreamEvent, frames: &mut Vec<String>) {
        match event {
            StreamEvent::TextDelta { text } => {
                frames.extend(data_frame(&gemini_chunk(
                    Some(vec![Part::text(text.clone())]),
                    None,
                    None,
                )));
            }
            StreamEvent::ToolCallDelta {
                index,
                name,
                arguments,
                ..
            } => {
                let pending = self.pending_tools.entry(*index).or_default();
                if let Some(name) = name {
                    pending.name.clone_from(name);
                }
                pending.arguments.push_str(arguments);
            }
            StreamEvent::Terminal {
                finish_reason,
                usage,
            } => {
                if !self.pending_tools.is_empty() {
                    let parts = std::mem::take(&mut self.pending_tools)
                        .into_values()
                        .map(|call| Part {
                            function_call: Some(FunctionCall {
                                args: Value::Object(
                                    parse_tool_arguments(&call.arguments).unwrap_or_else(|e| {
                                        tracing::warn!(tool = %call.name, error = %e, "Sending empty args for unparseable tool arguments");
                                        Map::new()
                                    }),
                                ),
                                name: call.name,
                            }),
                            ..Part::default()
                        })
                        .collect();
                    frames.extend(data_frame(&gemini_chunk(Some(parts), None, None)));
                }
                let reason = finish_reason.as_ref().map_or("STOP", FinishReason::to_gemini);
                let usage_metadata = usage.map(|u| UsageMetadata {
                    prompt_token_count: u.prompt_tokens,
                    candidates_token_count: u.completion_tokens,
                    total_token_count: u.total_tokens,
                });
                frames.extend(data_frame(&gemini_chunk(
                    None,
                    Some(reason.to_string()),
                    usage_metadata,
                )));
            }
        }
    }

    fn encode_anthropic(&mut self, event: &StreamEvent, frames: &mut Vec<String>) {
        match event {
            StreamEvent::TextDelta { text } => {
                frames.extend(event_frame(&AnthropicEvent::ContentBlockDelta {
                    index: 0,
                    delta: Delta::TextDelta { text: text.clone() },
                }));
            }
            StreamEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                // Block 0 is the text block; tool blocks follow it.
                let block = *index as usize + 1;
                if !self.opened_tool_blocks.contains(index) {
                    let Some(name) = name else {
                        tracing::debug!(index, "Dropping tool delta before its name is known");
                        return;
                    };
                    self.opened_tool_blocks.insert(*index);
                    frames.extend(event_frame(&AnthropicEvent::ContentBlockStart {
                        index: block,
                        content_block: ResponseContentBlock::ToolUse {
                            id: id
                                .clone()
                                .unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4().simple())),
                            name: name.clone(),
                            input: Value::Object(Map::new()),
                        },
                    }));
                }
                if !arguments.is_empty() {
                    frames.extend(event_frame(&AnthropicEvent::ContentBlockDelta {
                        index: block,
                        delta: Delta::InputJsonDelta {
                            partial_json: arguments.clone(),
                        },
                    }));
                }
            }
            StreamEvent::Terminal {
                finish_reason,
                usage,
            } => {
                if let Some(reason) = finish_reason {
                    frames.extend(event_frame(&AnthropicEvent::MessageDelta {
                        delta: MessageDeltaBody {
                            stop_reason: Some(reason.to_anthropic().to_string()),
                            stop_sequence: None,
                        },
                        usage: DeltaUsage {
                            input_tokens: usage.map(|u| u.prompt_tokens),
                            output_tokens: usage.map_or(0, |u| u.completion_tokens),
                        },
                    }));
                }
                frames.extend(event_frame(&AnthropicEvent::MessageStop));
            }
        }
    }

    fn encode_openai(&mut self, event: &StreamEvent, frames: &mut Vec<String>) {
        let (delta, finish_reason, usage) = match event {
            StreamEvent::TextDelta { text } => (
                ChunkDelta {
                    role: self.take_role(),
                    content: Some(text.clone()),
                    tool_calls: None,
                },
                None,
                None,
            ),
            StreamEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => (
                ChunkDelta {
                    role: self.take_role(),
                    content: None,
                    tool_calls: Some(vec![ChunkToolCall {
                        index: *index,
                        id: id.clone(),
                        call_type: id.as_ref().map(|_| "function".to_string()),
                        function: Some(ChunkToolCallFunction {
                            name: name.clone(),
                            arguments: Some(arguments.clone()),
                        }),
                    }]),
                },
                None,
                None,
            ),
            StreamEvent::Terminal {
                finish_reason,
                usage,
            } => {
                let reason = finish_reason.clone().unwrap_or(if self.saw_tool_calls {
                    FinishReason::ToolCalls
                } else {
                    FinishReason::Stop
                });
                (
                    ChunkDelta::default(),
                    Some(reason.as_str().to_string()),
                    usage.map(|u| ChatUsage {
                        prompt_tokens: u.prompt_tokens,
                        completion_tokens: u.completion_tokens,
                        total_tokens: u.total_tokens,
                    }),
                )
            }
        };

        let is_terminal = finish_reason.is_some();
        let chunk = ChatCompletionChunk {
            id: self.chunk_id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        };
        frames.extend(data_frame(&chunk));
        if is_terminal {
            frames.push("data: [DONE]\n\n".to_string());
        }
    }

    fn take_role(&mut self) -> Option<String> {
        if self.role_sent {
            return None;
        }
        self.role_sent = true;
        Some("assistant".to_string())
    }
}

fn gemini_chunk(
    parts: Option<Vec<Part>>,
    finish_reason: Option<String>,
    usage_metadata: Option<UsageMetadata>,
) -> StreamChunk {
    let has_parts = parts.is_some();
    StreamChunk {
        candidates: vec![StreamCandidate {
            content: parts.map(|parts| Content { role: None, parts }),
            finish_reason,
            role: has_parts.then(|| "model".to_string()),
            index: 0,
        }],
        usage_metadata,
    }
}

fn data_frame<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_string(value)
        .map(|json| format!("data: {json}\n\n"))
        .map_err(|e| tracing::error!(error = %e, "Failed to serialize stream frame"))
        .ok()
}

fn event_frame(event: &AnthropicEvent) -> Option<String> {
    serde_json::to_string(event)
        .map(|json| format!("event: {}\ndata: {json}\n\n", event.event_name()))
        .map_err(|e| tracing::error!(error = %e, "Failed to serialize stream event"))
        .ok()
}

// ---------------------------------------------------------------------------
// Frame stream
// ---------------------------------------------------------------------------

/// Destination frames pulled from an upstream byte stream.
///
/// Owns the upstream: dropping it drops the upstream response and releases
/// the connection. [`FrameStream::abort_handle`] stops it from outside; an
/// aborted stream yields nothing more and never polls the upstream again.
pub struct FrameStream {
    inner: Abortable<BoxStream<'static, Result<Bytes, std::io::Error>>>,
    handle: AbortHandle,
}

impl FrameStream {
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.clone()
    }
}

impl Stream for FrameStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl std::fmt::Debug for FrameStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameStream")
            .field("aborted", &self.inner.is_aborted())
            .finish_non_exhaustive()
    }
}

/// Translate an upstream SSE byte stream into destination frames. When both
/// sides speak the same dialect the bytes pass through unmodified.
pub fn translate_stream<S, E>(
    upstream: S,
    upstream_dialect: Dialect,
    destination: Dialect,
    model: &str,
) -> FrameStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let frames: BoxStream<'static, Result<Bytes, std::io::Error>> =
        if upstream_dialect == destination {
            upstream
                .map(|chunk| chunk.map_err(|e| std::io::Error::other(e.to_string())))
                .boxed()
        } else {
            let mut translator =
                StreamTranslator::new(upstream_dialect, destination).with_model(model);
            async_stream::stream! {
                tokio::pin!(upstream);

                while let Some(chunk) = upstream.next().await {
                    let chunk = match chunk {
                        Ok(c) => c,
                        Err(e) => {
                            // No terminal frame: the caller must see a broken stream.
                            tracing::warn!(error = %e, "Upstream byte stream failed");
                            yield Err(std::io::Error::other(e.to_string()));
                            return;
                        }
                    };
                    for frame in translator.push(&chunk) {
                        yield Ok(Bytes::from(frame));
                    }
                    if translator.is_terminated() {
                        break;
                    }
                }

                for frame in translator.finish() {
                    yield Ok(Bytes::from(frame));
                }
            }
            .boxed()
        };

    let (handle, registration) = AbortHandle::new_pair();
    FrameStream {
        inner: Abortable::new(frames, registration),
        handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;

    fn feed_all(translator: &mut StreamTranslator, input: &[u8]) -> Vec<String> {
        let mut frames = translator.push(input);
        frames.extend(translator.finish());
        frames
    }

    #[test]
    fn test_openai_to_anthropic_text_and_stop() {
        let mut t = StreamTranslator::new(Dialect::OpenAi, Dialect::Anthropic);
        let frames = feed_all(
            &mut t,
            b"data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n\
              data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\
              data: [DONE]\n",
        );

        assert_eq!(
            frames,
            vec![
                "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"He\"}}\n\n",
                "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"llo\"}}\n\n",
                "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
            ]
        );
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let mut t = StreamTranslator::new(Dialect::OpenAi, Dialect::Gemini);
        let frames = feed_all(
            &mut t,
            b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\
              data: {not json\n\
              data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\
              data: [DONE]\n",
        );

        assert_eq!(
            frames,
            vec![
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"a\"}]},\"role\":\"model\",\"index\":0}]}\n\n",
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"b\"}]},\"role\":\"model\",\"index\":0}]}\n\n",
                "data: {\"candidates\":[{\"finishReason\":\"STOP\",\"index\":0}]}\n\n",
            ]
        );
    }

    #[test]
    fn test_finish_reason_and_usage_fold_into_terminal() {
        let mut t = StreamTranslator::new(Dialect::OpenAi, Dialect::Gemini);
        let frames = feed_all(
            &mut t,
            b"data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"length\"}]}\n\
              data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":4,\"total_tokens\":7}}\n\
              data: [DONE]\n",
        );
        assert_eq!(
            frames,
            vec!["data: {\"candidates\":[{\"finishReason\":\"MAX_TOKENS\",\"index\":0}],\"usageMetadata\":{\"promptTokenCount\":3,\"candidatesTokenCount\":4,\"totalTokenCount\":7}}\n\n"]
        );

        let mut t = StreamTranslator::new(Dialect::OpenAi, Dialect::Anthropic);
        let frames = feed_all(
            &mut t,
            b"data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\ndata: [DONE]\n",
        );
        assert_eq!(frames.len(), 2);
        assert!(frames[0].starts_with("event: message_delta\n"));
        assert!(frames[0].contains("\"stop_reason\":\"end_turn\""));
        assert!(frames[1].starts_with("event: message_stop\n"));
    }

    #[test]
    fn test_duplicate_done_and_trailing_input_ignored() {
        let mut t = StreamTranslator::new(Dialect::OpenAi, Dialect::Anthropic);
        let mut frames = t.push(b"data: [DONE]\ndata: [DONE]\n");
        frames.extend(t.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n"));
        frames.extend(t.push(b"data: [DONE]\n"));
        frames.extend(t.finish());

        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("message_stop"));
        assert!(t.is_terminated());
    }

    #[test]
    fn test_chunk_boundaries_do_not_matter() {
        let input = "data: {\"choices\":[{\"delta\":{\"content\":\"héllo 🌍\"}}]}\r\n\r\n\
                     : keep-alive\n\
                     data: {\"choices\":[{\"delta\":{\"content\":\"ünïcode\"}}]}\n\
                     data: [DONE]\n"
            .as_bytes();

        let mut whole = StreamTranslator::new(Dialect::OpenAi, Dialect::Anthropic);
        let expected = feed_all(&mut whole, input);
        assert_eq!(expected.len(), 3);

        for split in 1..input.len() {
            let mut t = StreamTranslator::new(Dialect::OpenAi, Dialect::Anthropic);
            let mut frames = t.push(&input[..split]);
            frames.extend(t.push(&input[split..]));
            frames.extend(t.finish());
            assert_eq!(frames, expected, "split at byte {split}");
        }

        let mut t = StreamTranslator::new(Dialect::OpenAi, Dialect::Anthropic);
        let mut frames = Vec::new();
        for byte in input {
            frames.extend(t.push(std::slice::from_ref(byte)));
        }
        frames.extend(t.finish());
        assert_eq!(frames, expected);
    }

    #[test]
    fn test_trailing_line_without_newline_is_processed() {
        let mut t = StreamTranslator::new(Dialect::OpenAi, Dialect::Anthropic);
        let frames = feed_all(&mut t, b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}");
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("\"text\":\"x\""));
        assert!(frames[1].contains("message_stop"));
    }

    #[test]
    fn test_anthropic_upstream_to_openai() {
        let mut t = StreamTranslator::new(Dialect::Anthropic, Dialect::OpenAi).with_model("claude");
        let frames = feed_all(
            &mut t,
            b"event: message_start\n\
              data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"usage\":{\"input_tokens\":9,\"output_tokens\":1}}}\n\n\
              event: content_block_delta\n\
              data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n\
              event: message_delta\n\
              data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":5}}\n\n\
              event: message_stop\n\
              data: {\"type\":\"message_stop\"}\n\n",
        );

        assert_eq!(frames.len(), 3);
        let first: Value =
            serde_json::from_str(frames[0].trim().trim_start_matches("data: ")).unwrap();
        assert_eq!(first["object"], "chat.completion.chunk");
        assert_eq!(first["model"], "claude");
        assert_eq!(first["choices"][0]["delta"]["content"], "Hi");
        assert_eq!(first["choices"][0]["delta"]["role"], "assistant");

        let last: Value =
            serde_json::from_str(frames[1].trim().trim_start_matches("data: ")).unwrap();
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
        assert_eq!(last["usage"]["prompt_tokens"], 9);
        assert_eq!(last["usage"]["completion_tokens"], 5);
        assert_eq!(frames[2], "data: [DONE]\n\n");
    }

    #[test]
    fn test_gemini_upstream_tool_call_to_anthropic() {
        let mut t = StreamTranslator::new(Dialect::Gemini, Dialect::Anthropic);
        let frames = feed_all(
            &mut t,
            b"data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"functionCall\":{\"name\":\"lookup\",\"args\":{\"q\":\"x\"}}}]},\"finishReason\":\"STOP\"}]}\n\n",
        );

        assert_eq!(frames.len(), 4);
        assert!(frames[0].starts_with("event: content_block_start\n"));
        assert!(frames[0].contains("\"name\":\"lookup\""));
        assert!(frames[1].contains("\"partial_json\":\"{\\\"q\\\":\\\"x\\\"}\""));
        assert!(frames[2].contains("\"stop_reason\":\"tool_use\""));
        assert!(frames[3].contains("message_stop"));
    }

    #[test]
    fn test_openai_tool_deltas_to_gemini() {
        let mut t = StreamTranslator::new(Dialect::OpenAi, Dialect::Gemini);
        let frames = feed_all(
            &mut t,
            b"data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"type\":\"function\",\"function\":{\"name\":\"lookup\",\"arguments\":\"{\\\"q\\\":\"}}]}}]}\n\
              data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"x\\\"}\"}}]},\"finish_reason\":\"tool_calls\"}]}\n\
              data: [DONE]\n",
        );

        assert_eq!(
            frames,
            vec![
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"functionCall\":{\"name\":\"lookup\",\"args\":{\"q\":\"x\"}}}]},\"role\":\"model\",\"index\":0}]}\n\n",
                "data: {\"candidates\":[{\"finishReason\":\"STOP\",\"index\":0}]}\n\n",
            ]
        );
    }

    #[tokio::test]
    async fn test_frame_stream_translates() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n")),
            Ok(Bytes::from_static(b"data: [DONE]\n")),
        ];
        let frames: Vec<_> =
            translate_stream(futures::stream::iter(chunks), Dialect::OpenAi, Dialect::Anthropic, "m")
                .collect()
                .await;
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(Result::is_ok));
    }

    #[test]
    fn test_frame_stream_only_reads_when_polled() {
        use tokio_test::{assert_pending, assert_ready};

        let (tx, rx) = mpsc::unbounded::<Result<Bytes, std::io::Error>>();
        let mut frames =
            tokio_test::task::spawn(translate_stream(rx, Dialect::OpenAi, Dialect::Gemini, "m"));
        assert_pending!(frames.poll_next());

        tx.unbounded_send(Ok(Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
        )))
        .unwrap();
        assert!(frames.is_woken());
        let frame = assert_ready!(frames.poll_next()).unwrap().unwrap();
        assert!(String::from_utf8_lossy(&frame).contains("\"text\":\"a\""));
        assert_pending!(frames.poll_next());

        drop(tx);
        let last = assert_ready!(frames.poll_next()).unwrap().unwrap();
        assert!(String::from_utf8_lossy(&last).contains("\"finishReason\":\"STOP\""));
        assert!(assert_ready!(frames.poll_next()).is_none());
    }

    #[tokio::test]
    async fn test_upstream_failure_emits_no_terminal_frame() {
        for destination in [Dialect::Anthropic, Dialect::Gemini] {
            let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
                Ok(Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n")),
                Err(std::io::Error::other("connection reset")),
                Ok(Bytes::from_static(b"data: [DONE]\n")),
            ];
            let frames: Vec<_> =
                translate_stream(futures::stream::iter(chunks), Dialect::OpenAi, destination, "m")
                    .collect()
                    .await;

            assert_eq!(frames.len(), 2, "{destination}");
            let first = String::from_utf8_lossy(frames[0].as_ref().unwrap()).into_owned();
            assert!(first.contains("He"));
            assert!(!first.contains("message_stop") && !first.contains("finishReason"));
            assert!(frames[1].is_err());
        }
    }

    #[tokio::test]
    async fn test_same_dialect_passes_through() {
        let raw = Bytes::from_static(b"data: {\"anything\":true}\n\n");
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![Ok(raw.clone())];
        let frames: Vec<_> =
            translate_stream(futures::stream::iter(chunks), Dialect::OpenAi, Dialect::OpenAi, "m")
                .collect()
                .await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap(), &raw);
    }

    #[tokio::test]
    async fn test_drop_releases_upstream() {
        let (tx, rx) = mpsc::unbounded::<Result<Bytes, std::io::Error>>();
        tx.unbounded_send(Ok(Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
        )))
        .unwrap();

        let mut frames = translate_stream(rx, Dialect::OpenAi, Dialect::Gemini, "m");
        assert!(frames.next().await.is_some());
        assert!(!tx.is_closed());

        drop(frames);
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_abort_stops_consumption() {
        let (tx, rx) = mpsc::unbounded::<Result<Bytes, std::io::Error>>();
        tx.unbounded_send(Ok(Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
        )))
        .unwrap();

        let mut frames = translate_stream(rx, Dialect::OpenAi, Dialect::Anthropic, "m");
        frames.abort_handle().abort();
        assert!(frames.next().await.is_none());
    }
}
