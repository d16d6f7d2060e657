// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gen_magic::llm::message::{Message, Role};
use gen_magic::llm::provider::{
    CompletionRequest, CompletionStream, LlmProvider, StreamEnd, StreamEvent,
};
use gen_magic::llm::providers::OpenRouterProvider;

fn sse(chunks: &[String]) -> String {
    chunks
        .iter()
        .map(|chunk| format!("data: {}\n\n", chunk))
        .collect()
}

fn delta(text: &str) -> String {
    json!({"choices": [{"delta": {"content": text}}]}).to_string()
}

fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

fn request() -> CompletionRequest {
    CompletionRequest::new(
        "openai/gpt-4o",
        vec![Message::system("Be brief."), Message::user("Say hello")],
    )
}

async fn collect(mut stream: CompletionStream) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}

fn last_end(events: &[StreamEvent]) -> StreamEnd {
    match events.last() {
        Some(StreamEvent::End(end)) => end.clone(),
        other => panic!("expected a terminal End event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stream_preserves_fragment_order() {
    let server = MockServer::start().await;
    let body = sse(&[
        json!({"choices": [{"delta": {"role": "assistant", "content": ""}}]}).to_string(),
        delta("Hel"),
        delta("lo"),
        delta(" world"),
        json!({"choices": [], "usage": {"prompt_tokens": 7, "completion_tokens": 3}}).to_string(),
        "[DONE]".to_string(),
    ]);
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(body))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenRouterProvider::with_base_url("test-key", server.uri());
    let events = collect(provider.complete_stream(request()).unwrap()).await;

    assert_eq!(
        events[0],
        StreamEvent::NewMessage(Message::new(Role::Assistant, ""))
    );
    let appended: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Append { index: 0, text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(appended, vec!["Hel", "lo", " world"]);

    assert!(events.iter().any(|e| matches!(
        e,
        StreamEvent::Usage(u) if u.input_tokens == 7 && u.output_tokens == 3
    )));
    assert_eq!(last_end(&events), StreamEnd::Completed);
}

#[tokio::test]
async fn test_nothing_after_done_is_delivered() {
    let server = MockServer::start().await;
    let body = sse(&[
        delta("only"),
        "[DONE]".to_string(),
        delta("ignored"),
    ]);
    Mock::given(method("POST"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let provider = OpenRouterProvider::with_base_url("test-key", server.uri());
    let events = collect(provider.complete_stream(request()).unwrap()).await;

    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], StreamEvent::NewMessage(m) if m.content == "only"));
    assert_eq!(last_end(&events), StreamEnd::Completed);
}

#[tokio::test]
async fn test_missing_done_still_completes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse_response(sse(&[delta("a"), delta("b")])))
        .mount(&server)
        .await;

    let provider = OpenRouterProvider::with_base_url("test-key", server.uri());
    let events = collect(provider.complete_stream(request()).unwrap()).await;

    assert_eq!(events.len(), 3);
    assert_eq!(last_end(&events), StreamEnd::Completed);
}

#[tokio::test]
async fn test_request_body_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(header("accept", "text/event-stream"))
        .and(header("x-title", "gen-magic"))
        .and(body_partial_json(json!({
            "model": "openai/gpt-4o",
            "stream": true,
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "Say hello"}
            ]
        })))
        .respond_with(sse_response(sse(&[delta("hi"), "[DONE]".to_string()])))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenRouterProvider::with_base_url("test-key", server.uri());
    let events = collect(provider.complete_stream(request()).unwrap()).await;

    // An unmatched request would get wiremock's 404 and end in Failed
    assert_eq!(last_end(&events), StreamEnd::Completed);
}

#[tokio::test]
async fn test_unauthorized_ends_with_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": {"message": "No auth credentials found"}})),
        )
        .mount(&server)
        .await;

    let provider = OpenRouterProvider::with_base_url("bad-key", server.uri());
    let events = collect(provider.complete_stream(request()).unwrap()).await;

    assert_eq!(events.len(), 1);
    match last_end(&events) {
        StreamEnd::Failed(reason) => assert!(reason.contains("Authentication failed")),
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rate_limit_reports_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "12"))
        .mount(&server)
        .await;

    let provider = OpenRouterProvider::with_base_url("test-key", server.uri());
    let events = collect(provider.complete_stream(request()).unwrap()).await;

    match last_end(&events) {
        StreamEnd::Failed(reason) => assert!(reason.contains("12 seconds")),
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_mid_stream_error_keeps_earlier_text() {
    let server = MockServer::start().await;
    let body = sse(&[
        delta("partial"),
        json!({"error": {"message": "upstream overloaded"}}).to_string(),
        delta("never"),
    ]);
    Mock::given(method("POST"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let provider = OpenRouterProvider::with_base_url("test-key", server.uri());
    let events = collect(provider.complete_stream(request()).unwrap()).await;

    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], StreamEvent::NewMessage(m) if m.content == "partial"));
    match last_end(&events) {
        StreamEnd::Failed(reason) => assert!(reason.contains("upstream overloaded")),
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_endpoint_fails_in_stream() {
    // Port 9 (discard) is expected to refuse connections on test hosts
    let provider = OpenRouterProvider::with_base_url("test-key", "http://127.0.0.1:9");
    let stream = provider.complete_stream(request()).unwrap();
    let events = collect(stream).await;

    assert_eq!(events.len(), 1);
    assert!(last_end(&events).is_failure());
}

#[tokio::test]
async fn test_cancel_while_waiting_for_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            sse_response(sse(&[delta("late"), "[DONE]".to_string()]))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let provider = OpenRouterProvider::with_base_url("test-key", server.uri());
    let stream = provider.complete_stream(request()).unwrap();
    let cancel = stream.cancel_handle();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let events = tokio::time::timeout(Duration::from_secs(5), collect(stream))
        .await
        .expect("cancelled stream should end promptly");
    assert_eq!(events, vec![StreamEvent::End(StreamEnd::Cancelled)]);
}

#[tokio::test]
async fn test_image_prompt_sent_as_content_parts() {
    use base64::Engine;
    use gen_magic::llm::message::Image;
    use image::{DynamicImage, RgbaImage};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "What is this?"}]}
            ]
        })))
        .respond_with(sse_response(sse(&[delta("a dot"), "[DONE]".to_string()])))
        .mount(&server)
        .await;

    let image = Image::from_raster(DynamicImage::ImageRgba8(RgbaImage::new(1, 1))).unwrap();
    assert!(base64::engine::general_purpose::STANDARD
        .decode(image.base64())
        .is_ok());

    let prompt = Message::user("What is this?").with_images(vec![image]);
    let request = CompletionRequest::new("openai/gpt-4o", vec![prompt]);

    let provider = OpenRouterProvider::with_base_url("test-key", server.uri());
    let events = collect(provider.complete_stream(request).unwrap()).await;
    assert_eq!(last_end(&events), StreamEnd::Completed);
}

/// Serves one chunked SSE delta, then holds the body open. The returned
/// receiver fires once the client closes the connection.
async fn open_ended_server() -> (String, tokio::sync::oneshot::Receiver<()>) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }

        let event = format!("data: {}\n\n", delta("first"));
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n{:x}\r\n{}\r\n",
            event.len(),
            event
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();

        // Never finish the body; wait for the client to hang up.
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
        let _ = closed_tx.send(());
    });

    (format!("http://{}", addr), closed_rx)
}

#[tokio::test]
async fn test_cancel_mid_body_closes_connection() {
    let (base_url, closed) = open_ended_server().await;

    let provider = OpenRouterProvider::with_base_url("test-key", base_url);
    let mut stream = provider.complete_stream(request()).unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("first delta should arrive");
    assert!(matches!(first, Some(StreamEvent::NewMessage(ref m)) if m.content == "first"));

    stream.cancel_handle().cancel();
    assert_eq!(
        stream.next().await,
        Some(StreamEvent::End(StreamEnd::Cancelled))
    );
    assert_eq!(stream.next().await, None);

    tokio::time::timeout(Duration::from_secs(5), closed)
        .await
        .expect("connection should be closed after cancel")
        .unwrap();
}
