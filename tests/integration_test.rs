use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use dialect_bridge::config::BackendConfig;
use dialect_bridge::providers::BackendFormat;
use dialect_bridge::translate::anthropic_types::MessagesRequest;
use dialect_bridge::translate::canonical::{
    CanonicalMessage, ContentPart, FinishReason, ImageRef, MessageContent, Role,
};
use dialect_bridge::translate::gemini_types::GenerateContentRequest;
use dialect_bridge::translate::normalize::{anthropic_to_canonical, gemini_to_canonical};
use dialect_bridge::translate::request::{to_anthropic, to_gemini};
use dialect_bridge::translate::{CanonicalRequest, Dialect, StreamTranslator};
use dialect_bridge::{build_router, AppState, GatewayConfig};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// Pure translation scenarios
// ---------------------------------------------------------------------------

#[test]
fn gemini_single_text_part_normalizes_to_string_content() {
    let req: GenerateContentRequest =
        serde_json::from_value(json!({"contents": [{"role": "user", "parts": [{"text": "hi"}]}]}))
            .unwrap();
    let canonical = gemini_to_canonical(req, None);

    assert_eq!(
        canonical.messages,
        vec![CanonicalMessage {
            role: Role::User,
            content: MessageContent::Text("hi".into()),
        }]
    );
    assert_eq!(
        serde_json::to_value(&canonical.messages).unwrap(),
        json!([{"role": "user", "content": "hi"}])
    );
}

#[test]
fn openai_stream_becomes_anthropic_frames() {
    let mut t = StreamTranslator::new(Dialect::OpenAi, Dialect::Anthropic);
    let mut frames = t.push(
        b"data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n\n\
          data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\n\
          data: [DONE]\n\n",
    );
    frames.extend(t.finish());

    let deltas: Vec<&String> = frames
        .iter()
        .filter(|f| f.starts_with("event: content_block_delta"))
        .collect();
    assert_eq!(deltas.len(), 2);
    assert!(deltas[0].contains("\"text\":\"He\""));
    assert!(deltas[1].contains("\"text\":\"llo\""));
    assert_eq!(
        frames.iter().filter(|f| f.starts_with("event: message_stop")).count(),
        1
    );
    assert!(frames.last().unwrap().starts_with("event: message_stop"));
}

#[test]
fn malformed_line_does_not_abort_stream() {
    for destination in [Dialect::OpenAi, Dialect::Anthropic, Dialect::Gemini] {
        let mut t = StreamTranslator::new(Dialect::Anthropic, destination);
        let mut frames = t.push(
            b"event: content_block_delta\n\
              data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"one\"}}\n\n\
              data: {not json\n\n\
              data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"two\"}}\n\n\
              data: {\"type\":\"message_stop\"}\n\n",
        );
        frames.extend(t.finish());

        let joined = frames.concat();
        assert!(joined.contains("one"), "{destination}: {joined}");
        assert!(joined.contains("two"), "{destination}: {joined}");
        assert!(t.is_terminated());
    }
}

#[test]
fn data_url_image_survives_gemini_round_trip() {
    let url = "data:image/png;base64,AAAA";
    let canonical = CanonicalRequest {
        model: "gemini-2.0-flash".into(),
        messages: vec![CanonicalMessage {
            role: Role::User,
            content: MessageContent::Parts(vec![ContentPart::ImageUrl {
                image_url: ImageRef {
                    url: url.into(),
                    mime_type: None,
                },
            }]),
        }],
        ..Default::default()
    };

    let gemini = to_gemini(&canonical, None, "key").body;
    let wire = serde_json::to_value(&gemini).unwrap();
    assert_eq!(
        wire["contents"][0]["parts"][0]["inlineData"],
        json!({"mimeType": "image/png", "data": "AAAA"})
    );

    let back = gemini_to_canonical(serde_json::from_value(wire).unwrap(), None);
    match back.messages[0].content.as_parts() {
        [ContentPart::ImageUrl { image_url }] => assert_eq!(image_url.url, url),
        other => panic!("unexpected parts: {other:?}"),
    }
}

#[test]
fn anthropic_request_round_trips_through_canonical() {
    let original = json!({
        "model": "claude-sonnet-4",
        "max_tokens": 256,
        "system": "Be brief.",
        "temperature": 0.2,
        "messages": [
            {"role": "user", "content": "What's the weather in Paris?"},
            {"role": "assistant", "content": [
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Paris"}}
            ]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "18C and sunny"}
            ]}
        ],
        "tools": [{
            "name": "get_weather",
            "description": "Look up the weather",
            "input_schema": {"type": "object", "properties": {"city": {"type": "string"}}}
        }]
    });

    let req: MessagesRequest = serde_json::from_value(original.clone()).unwrap();
    let canonical = anthropic_to_canonical(req);
    let materialized = to_anthropic(&canonical, None, "key").body;

    assert_eq!(serde_json::to_value(&materialized).unwrap(), original);
}

#[test]
fn finish_reason_mapping_is_total() {
    for reason in ["stop", "length", "content_filter", "tool_calls", "mystery", ""] {
        let parsed = FinishReason::parse(reason);
        assert!(!parsed.to_gemini().is_empty());
        assert!(!parsed.to_anthropic().is_empty());
    }
    assert_eq!(FinishReason::parse("mystery").to_gemini(), "STOP");
    assert_eq!(FinishReason::parse("mystery").to_anthropic(), "end_turn");
    assert_eq!(FinishReason::from_gemini("OTHER").to_anthropic(), "end_turn");
}

// ---------------------------------------------------------------------------
// End to end through the HTTP surface
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Recorded {
    body: Option<Value>,
    headers: Option<HeaderMap>,
}

type Recorder = Arc<Mutex<Recorded>>;

const OPENAI_SSE: &str = "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"He\"}}]}\n\n\
                          data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"llo\"},\"finish_reason\":\"stop\"}]}\n\n\
                          data: [DONE]\n\n";

async fn mock_openai(
    State(recorder): State<Recorder>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let stream = body["stream"].as_bool().unwrap_or(false);
    let model = body["model"].clone();
    {
        let mut rec = recorder.lock().unwrap();
        rec.body = Some(body);
        rec.headers = Some(headers);
    }

    if model == "overloaded" {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": {"message": "slow down", "type": "rate_limit"}})),
        )
            .into_response();
    }

    if stream {
        return ([("content-type", "text/event-stream")], OPENAI_SSE).into_response();
    }

    Json(json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "created": 1,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Hello"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
    }))
    .into_response()
}

async fn mock_gemini(
    State(recorder): State<Recorder>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    {
        let mut rec = recorder.lock().unwrap();
        rec.body = Some(body);
        rec.headers = Some(headers);
    }
    Json(json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"functionCall": {"name": "lookup", "args": {"q": "rust"}}}]},
            "finishReason": "STOP",
            "index": 0
        }],
        "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6}
    }))
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Start a mock backend plus a gateway pointed at it; returns the gateway
/// address and the recorder for what the backend received.
async fn start_gateway(
    format: BackendFormat,
    key_env: &str,
    configure: impl FnOnce(&mut GatewayConfig),
) -> (SocketAddr, Recorder) {
    std::env::set_var(key_env, "test-key");

    let recorder: Recorder = Arc::default();
    let mock = Router::new()
        .route("/v1/chat/completions", post(mock_openai))
        .route("/v1beta/models/:model_action", post(mock_gemini))
        .with_state(recorder.clone());
    let backend_addr = serve(mock).await;

    let base_url = match format {
        BackendFormat::Gemini => format!("http://{backend_addr}/v1beta"),
        _ => format!("http://{backend_addr}/v1"),
    };
    let mut config = GatewayConfig::new(BackendConfig {
        name: "mock".into(),
        base_url: Some(base_url),
        api_key_env: Some(key_env.into()),
        format: Some(format),
        model: None,
    });
    configure(&mut config);

    let state = Arc::new(AppState {
        config,
        client: reqwest::Client::new(),
    });
    let gateway_addr = serve(build_router(state)).await;
    (gateway_addr, recorder)
}

#[tokio::test]
async fn anthropic_caller_reaches_openai_backend() {
    let (addr, recorder) = start_gateway(BackendFormat::OpenAi, "DIALECT_BRIDGE_TEST_KEY_A", |c| {
        c.system_prompt = Some("Gateway says hi.".into());
        c.models.insert("claude-sonnet-4".into(), "gpt-4o-mini".into());
    })
    .await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/v1/messages"))
        .json(&json!({
            "model": "claude-sonnet-4",
            "max_tokens": 64,
            "system": "Be brief.",
            "messages": [{"role": "user", "content": "Say hello"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();

    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert_eq!(body["content"][0]["type"], "text");
    assert_eq!(body["content"][0]["text"], "Hello");
    assert_eq!(body["stop_reason"], "end_turn");
    assert_eq!(body["usage"]["input_tokens"], 5);
    assert_eq!(body["usage"]["output_tokens"], 1);

    let rec = recorder.lock().unwrap();
    let sent = rec.body.as_ref().unwrap();
    assert_eq!(sent["model"], "gpt-4o-mini");
    assert_eq!(sent["messages"][0]["role"], "system");
    assert_eq!(sent["messages"][0]["content"], "Gateway says hi.\nBe brief.");
    assert_eq!(sent["messages"][1], json!({"role": "user", "content": "Say hello"}));
    assert_eq!(
        rec.headers.as_ref().unwrap()["authorization"],
        "Bearer test-key"
    );
}

#[tokio::test]
async fn gemini_stream_caller_gets_gemini_frames() {
    let (addr, recorder) =
        start_gateway(BackendFormat::Common, "DIALECT_BRIDGE_TEST_KEY_B", |_| {}).await;

    let resp = reqwest::Client::new()
        .post(format!(
            "http://{addr}/v1beta/models/gemini-2.0-flash:streamGenerateContent"
        ))
        .json(&json!({"contents": [{"role": "user", "parts": [{"text": "hi"}]}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    let text = resp.text().await.unwrap();

    let frames: Vec<Value> = text
        .split("\n\n")
        .filter_map(|f| f.strip_prefix("data: "))
        .map(|f| serde_json::from_str(f).unwrap())
        .collect();
    assert_eq!(frames.len(), 3, "{text}");
    assert_eq!(frames[0]["candidates"][0]["content"]["parts"][0]["text"], "He");
    assert_eq!(frames[1]["candidates"][0]["content"]["parts"][0]["text"], "llo");
    assert_eq!(frames[2]["candidates"][0]["finishReason"], "STOP");
    assert!(!text.contains("[DONE]"));

    let rec = recorder.lock().unwrap();
    let sent = rec.body.as_ref().unwrap();
    assert_eq!(sent["model"], "gemini-2.0-flash");
    assert_eq!(sent["stream"], true);
    assert!(sent.get("stream_options").is_none());
}

#[tokio::test]
async fn openai_caller_gets_backend_reply_verbatim() {
    let (addr, _) = start_gateway(BackendFormat::OpenAi, "DIALECT_BRIDGE_TEST_KEY_C", |_| {}).await;

    let body: Value = reqwest::Client::new()
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["id"], "chatcmpl-mock");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello");
}

#[tokio::test]
async fn openai_caller_reaches_gemini_backend_with_tool_call() {
    let (addr, recorder) =
        start_gateway(BackendFormat::Gemini, "DIALECT_BRIDGE_TEST_KEY_D", |_| {}).await;

    let body: Value = reqwest::Client::new()
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&json!({
            "model": "gemini-2.0-flash",
            "messages": [
                {"role": "system", "content": "Use tools."},
                {"role": "user", "content": "search rust"}
            ],
            "tools": [{"type": "function", "function": {"name": "lookup", "parameters": {"type": "object"}}}]
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["finish_reason"], "tool_calls");
    let call = &body["choices"][0]["message"]["tool_calls"][0];
    assert_eq!(call["function"]["name"], "lookup");
    let args: Value = serde_json::from_str(call["function"]["arguments"].as_str().unwrap()).unwrap();
    assert_eq!(args, json!({"q": "rust"}));
    assert_eq!(body["usage"]["total_tokens"], 6);

    let rec = recorder.lock().unwrap();
    let sent = rec.body.as_ref().unwrap();
    assert_eq!(sent["systemInstruction"]["parts"][0]["text"], "Use tools.");
    assert_eq!(sent["contents"][0]["role"], "user");
    assert_eq!(
        sent["tools"][0]["functionDeclarations"][0]["name"],
        "lookup"
    );
    assert_eq!(rec.headers.as_ref().unwrap()["x-goog-api-key"], "test-key");
}

#[tokio::test]
async fn backend_error_uses_caller_envelope() {
    let (addr, _) = start_gateway(BackendFormat::OpenAi, "DIALECT_BRIDGE_TEST_KEY_E", |_| {}).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/v1/messages"))
        .json(&json!({
            "model": "overloaded",
            "max_tokens": 8,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 429);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "rate_limit_error");
    assert_eq!(body["error"]["message"], "slow down");
}

#[tokio::test]
async fn bad_body_and_unknown_path() {
    let (addr, _) = start_gateway(BackendFormat::OpenAi, "DIALECT_BRIDGE_TEST_KEY_F", |_| {}).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/v1/chat/completions"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");

    let resp = client
        .post(format!("http://{addr}/v1/completions"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Not Found");
    assert_eq!(body["message"], "Path POST /v1/completions does not exist");
    assert!(body["availableEndpoints"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e.as_str().is_some_and(|s| s.contains("/v1/messages"))));

    let resp = client
        .post(format!("http://{addr}/v1beta/models/gemini-pro:embedContent"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn info_health_and_models() {
    let (addr, _) = start_gateway(BackendFormat::Common, "DIALECT_BRIDGE_TEST_KEY_G", |c| {
        c.models.insert("gpt-4o".into(), "llama-3".into());
    })
    .await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let info: Value = client
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["name"], "dialect-bridge");
    assert_eq!(info["backend"]["format"], "common");

    let models: Value = client
        .get(format!("http://{addr}/v1/models"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(models["object"], "list");
    assert!(models["data"]
        .as_array()
        .unwrap()
        .iter()
        .any(|m| m["id"] == "gpt-4o"));
}
