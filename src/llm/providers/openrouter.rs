// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! OpenRouter API provider implementation
//!
//! Implements the LlmProvider trait for OpenRouter, which provides access
//! to many models through a single OpenAI-compatible streaming API.
//!
//! The HTTP request is opened inside the spawned task so the caller gets its
//! [`CompletionStream`] back immediately. Every exit path of that task (end of
//! stream, network error, cancellation, consumer gone) drops the response
//! body, which releases the connection.

use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ApiError, GenMagicError, Result};
use crate::llm::message::{Message, ModelDefinition, Role};
use crate::llm::provider::{
    CompletionRequest, CompletionStream, LlmProvider, StreamEnd, StreamEvent, StreamSender,
    Usage, DEFAULT_STREAM_BUFFER,
};
use crate::llm::providers::common::{
    construct_api_url, extract_data_payload, extract_error_summary, parse_retry_after_seconds,
    take_line,
};

/// Default API base for OpenRouter
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// OpenRouter provider
#[derive(Clone)]
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    base_url: String,
    site_url: Option<String>,
    site_name: Option<String>,
    buffer: usize,
}

impl std::fmt::Debug for OpenRouterProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterProvider")
            .field("base_url", &self.base_url)
            .field("api_key_set", &!self.api_key.is_empty())
            .field("site_url", &self.site_url)
            .field("site_name", &self.site_name)
            .field("buffer", &self.buffer)
            .finish()
    }
}

impl OpenRouterProvider {
    /// Create a new OpenRouter provider
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, OPENROUTER_BASE_URL)
    }

    /// Create with a custom base URL
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            site_url: None,
            site_name: Some("gen-magic".to_string()),
            buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    /// Create from a model definition; an empty endpoint means the default
    /// OpenRouter base URL.
    pub fn from_definition(def: &ModelDefinition) -> Self {
        let base_url = if def.api_endpoint.trim().is_empty() {
            OPENROUTER_BASE_URL
        } else {
            def.api_endpoint.trim()
        };
        Self::with_base_url(def.api_key.clone(), base_url)
    }

    /// Share an existing HTTP client (and its connection pool)
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Set the site URL for OpenRouter rankings
    pub fn with_site_url(mut self, url: impl Into<String>) -> Self {
        self.site_url = Some(url.into());
        self
    }

    /// Set the site name for OpenRouter rankings
    pub fn with_site_name(mut self, name: impl Into<String>) -> Self {
        self.site_name = Some(name.into());
        self
    }

    /// Capacity of the event channel handed to the consumer
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        construct_api_url(&self.base_url, "chat/completions")
    }

    /// Convert internal messages to OpenRouter/OpenAI format
    fn convert_messages(&self, messages: &[Message]) -> Vec<OpenRouterMessage> {
        messages
            .iter()
            .map(|m| {
                let content = if m.images.is_empty() {
                    OpenRouterContent::Text(m.content.clone())
                } else {
                    let mut parts = vec![OpenRouterContentPart::Text {
                        text: m.content.clone(),
                    }];
                    parts.extend(m.images.iter().map(|img| OpenRouterContentPart::ImageUrl {
                        image_url: OpenRouterImageUrl {
                            url: img.data_url(),
                        },
                    }));
                    OpenRouterContent::Parts(parts)
                };
                OpenRouterMessage {
                    role: m.role.as_str().to_string(),
                    content,
                }
            })
            .collect()
    }

    /// Build the request body
    fn build_request(&self, request: &CompletionRequest) -> OpenRouterRequest {
        OpenRouterRequest {
            model: request.model.clone(),
            messages: self.convert_messages(&request.messages),
            stream: true,
            usage: Some(OpenRouterUsageRequest { include: true }),
        }
    }

    fn http_request(&self, body: &OpenRouterRequest) -> RequestBuilder {
        let mut req = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", &self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream");

        // Optional headers for OpenRouter rankings
        if let Some(ref site_url) = self.site_url {
            req = req.header("HTTP-Referer", site_url);
        }
        if let Some(ref site_name) = self.site_name {
            req = req.header("X-Title", site_name);
        }

        req.json(body)
    }
}

/// Map a failed HTTP response to an API error
fn parse_error(status: u16, retry_after: Option<u64>, body: &str) -> ApiError {
    let message = extract_error_summary(body).unwrap_or_else(|| body.trim().to_string());

    match status {
        401 | 403 => ApiError::AuthenticationFailed,
        429 => ApiError::RateLimited(
            retry_after.map_or(60, |secs| u32::try_from(secs).unwrap_or(u32::MAX)),
        ),
        404 => ApiError::ModelNotFound(message),
        _ => {
            let lower = message.to_ascii_lowercase();
            if lower.contains("model") && lower.contains("not") && lower.contains("found") {
                ApiError::ModelNotFound(message)
            } else {
                ApiError::ServerError { status, message }
            }
        }
    }
}

impl LlmProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn complete_stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        if request.model.trim().is_empty() {
            return Err(GenMagicError::Validation(
                "model definition has no model identifier".to_string(),
            ));
        }

        let body = self.build_request(&request);
        let http = self.http_request(&body);
        let (tx, stream) = CompletionStream::channel(self.buffer);

        debug!(
            model = %request.model,
            messages = body.messages.len(),
            endpoint = %self.endpoint(),
            "opening openrouter stream"
        );
        tokio::spawn(run_stream(http, tx));

        Ok(stream)
    }
}

async fn run_stream(http: RequestBuilder, tx: StreamSender) {
    let cancel = tx.cancel_handle().clone();

    let end = tokio::select! {
        biased;
        _ = cancel.cancelled() => StreamEnd::Cancelled,
        end = read_stream(http, &tx) => end,
    };

    match end {
        StreamEnd::Cancelled => debug!("openrouter stream cancelled"),
        StreamEnd::Completed => {
            debug!("openrouter stream completed");
            tx.send(StreamEvent::End(StreamEnd::Completed)).await;
        }
        StreamEnd::Failed(reason) => {
            warn!(%reason, "error streaming response");
            tx.send(StreamEvent::End(StreamEnd::Failed(reason))).await;
        }
    }
}

async fn read_stream(http: RequestBuilder, tx: &StreamSender) -> StreamEnd {
    let response = match http.send().await {
        Ok(response) => response,
        Err(e) => return StreamEnd::Failed(format!("error requesting streaming response: {}", e)),
    };

    let status = response.status();
    if !status.is_success() {
        let retry_after = parse_retry_after_seconds(response.headers());
        let body = response.text().await.unwrap_or_default();
        return StreamEnd::Failed(parse_error(status.as_u16(), retry_after, &body).to_string());
    }

    let mut bytes = response.bytes_stream();
    let mut decoder = ChunkDecoder::default();

    while let Some(chunk) = bytes.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return StreamEnd::Failed(ApiError::StreamError(e.to_string()).to_string()),
        };

        for step in decoder.feed(&chunk) {
            match step {
                DecodeStep::Event(event) => {
                    if !tx.send(event).await {
                        return StreamEnd::Cancelled;
                    }
                }
                DecodeStep::Done => return StreamEnd::Completed,
                DecodeStep::Error(message) => return StreamEnd::Failed(message),
            }
        }
    }

    for step in decoder.finish() {
        match step {
            DecodeStep::Event(event) => {
                if !tx.send(event).await {
                    return StreamEnd::Cancelled;
                }
            }
            DecodeStep::Done => break,
            DecodeStep::Error(message) => return StreamEnd::Failed(message),
        }
    }

    // Connection closed without [DONE]: still a normal end.
    StreamEnd::Completed
}

/// Outcome of decoding one SSE line
#[derive(Debug, Clone, PartialEq)]
enum DecodeStep {
    Event(StreamEvent),
    Done,
    Error(String),
}

/// Incremental SSE decoder turning OpenRouter chunks into stream events.
///
/// The first delta of the response becomes `NewMessage`; every later
/// non-empty delta becomes an `Append` onto it. Nothing is concatenated here.
#[derive(Debug, Default)]
struct ChunkDecoder {
    buffer: Vec<u8>,
    messages: usize,
}

impl ChunkDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Vec<DecodeStep> {
        self.buffer.extend_from_slice(chunk);
        let mut steps = Vec::new();
        while let Some(line) = take_line(&mut self.buffer) {
            if self.decode_line(&line, &mut steps) {
                break;
            }
        }
        steps
    }

    /// Decode whatever is left once the connection closes
    fn finish(&mut self) -> Vec<DecodeStep> {
        let line = std::mem::take(&mut self.buffer);
        let mut steps = Vec::new();
        if !line.is_empty() {
            self.decode_line(&line, &mut steps);
        }
        steps
    }

    /// Returns true when the line terminates the stream
    fn decode_line(&mut self, raw: &[u8], steps: &mut Vec<DecodeStep>) -> bool {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(e) => {
                warn!("invalid UTF-8 in stream: {}", e);
                return false;
            }
        };

        if line.is_empty() || line.starts_with(':') {
            return false;
        }

        let Some(data) = extract_data_payload(line) else {
            return false;
        };

        if data == "[DONE]" {
            steps.push(DecodeStep::Done);
            return true;
        }

        let chunk = match serde_json::from_str::<OpenRouterStreamChunk>(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "skipping malformed stream chunk");
                return false;
            }
        };

        for choice in chunk.choices {
            let text = choice.delta.content.unwrap_or_default();
            if self.messages == 0 {
                let role = choice
                    .delta
                    .role
                    .as_deref()
                    .and_then(Role::parse)
                    .unwrap_or(Role::Assistant);
                self.messages = 1;
                steps.push(DecodeStep::Event(StreamEvent::NewMessage(Message::new(
                    role, text,
                ))));
            } else if !text.is_empty() {
                steps.push(DecodeStep::Event(StreamEvent::Append {
                    index: self.messages - 1,
                    text,
                }));
            }
        }

        if let Some(usage) = chunk.usage {
            steps.push(DecodeStep::Event(StreamEvent::Usage(Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                cost: usage.cost,
            })));
        }

        if let Some(error) = chunk.error {
            steps.push(DecodeStep::Error(
                ApiError::StreamError(error.message).to_string(),
            ));
            return true;
        }

        false
    }
}

// OpenRouter API types (OpenAI-compatible format)

#[derive(Debug, Serialize)]
struct OpenRouterRequest {
    model: String,
    messages: Vec<OpenRouterMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<OpenRouterUsageRequest>,
}

#[derive(Debug, Serialize)]
struct OpenRouterUsageRequest {
    include: bool,
}

#[derive(Debug, Serialize)]
struct OpenRouterMessage {
    role: String,
    content: OpenRouterContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenRouterContent {
    Text(String),
    Parts(Vec<OpenRouterContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenRouterContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenRouterImageUrl },
}

#[derive(Debug, Serialize)]
struct OpenRouterImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct OpenRouterUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    cost: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterErrorDetail {
    message: String,
}

// Streaming types
#[derive(Debug, Deserialize)]
struct OpenRouterStreamChunk {
    #[serde(default)]
    choices: Vec<OpenRouterStreamChoice>,
    #[serde(default)]
    usage: Option<OpenRouterUsage>,
    #[serde(default)]
    error: Option<OpenRouterErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterStreamChoice {
    #[serde(default)]
    delta: OpenRouterStreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct OpenRouterStreamDelta {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
}
