// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM Provider trait and related types
//!
//! Defines the abstraction layer for different LLM backends. A provider turns
//! a [`CompletionRequest`] into a [`CompletionStream`]: a bounded, ordered
//! channel of [`StreamEvent`]s fed by a background task, plus a
//! [`CancelHandle`] that stops that task.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::error::Result;
use crate::llm::message::{Message, Role, Turn};

/// Default capacity of the event channel between a provider task and its
/// consumer.
pub const DEFAULT_STREAM_BUFFER: usize = 1024;

/// Capability implemented once per upstream API
pub trait LlmProvider: Send + Sync {
    /// Get the provider name (e.g., "openrouter")
    fn name(&self) -> &str;

    /// Start a streaming completion.
    ///
    /// Returns as soon as the background task is spawned. Failures after this
    /// point end the stream with [`StreamEnd::Failed`] rather than an `Err`.
    /// Must be called from within a Tokio runtime.
    fn complete_stream(&self, request: CompletionRequest) -> Result<CompletionStream>;
}

/// Request for a streaming completion
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Model to use
    pub model: String,

    /// Conversation in send order: system first, prompt last
    pub messages: Vec<Message>,
}

impl CompletionRequest {
    /// Create a new completion request
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
        }
    }

    /// Build the conversation sent upstream.
    ///
    /// The system message goes first. Every response message of every turn in
    /// `context` follows in order under its own role; only user and assistant
    /// messages are forwarded. The prompt goes last.
    pub fn from_conversation(
        model: impl Into<String>,
        system: &Message,
        prompt: &Message,
        context: &[Turn],
    ) -> Self {
        let mut messages = Vec::with_capacity(2 + context.len());
        messages.push(Message {
            role: Role::System,
            ..system.clone()
        });

        for turn in context {
            for msg in &turn.response {
                match msg.role {
                    Role::User | Role::Assistant => messages.push(Message {
                        delta: false,
                        ..msg.clone()
                    }),
                    other => {
                        warn!(
                            role = %other,
                            turn = %turn.id,
                            "unsupported message role in chat context, skipping"
                        );
                    }
                }
            }
        }

        messages.push(Message {
            role: Role::User,
            ..prompt.clone()
        });

        Self::new(model, messages)
    }

    /// The prompt (last message)
    pub fn prompt(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens
    pub input_tokens: u32,
    /// Output tokens
    pub output_tokens: u32,
    /// Cost in credits, when the provider reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl Usage {
    /// Get total tokens used
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// How a stream ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StreamEnd {
    /// Provider finished normally
    Completed,
    /// The cancel handle was invoked
    Cancelled,
    /// Connection could not be opened or broke mid-stream
    Failed(String),
}

impl StreamEnd {
    pub fn is_failure(&self) -> bool {
        matches!(self, StreamEnd::Failed(_))
    }
}

/// Events from a streaming response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Start of a new response message
    NewMessage(Message),

    /// Text to append onto response message `index`
    Append { index: usize, text: String },

    /// Usage accounting, usually just before the end
    Usage(Usage),

    /// Final event; nothing follows it
    End(StreamEnd),
}

impl StreamEvent {
    /// Render as a delta-flagged message, for consumers that track the last
    /// message themselves.
    pub fn to_fragment(&self, role: Role) -> Option<Message> {
        match self {
            StreamEvent::NewMessage(msg) => Some(Message {
                delta: false,
                ..msg.clone()
            }),
            StreamEvent::Append { text, .. } => Some(Message::fragment(role, text.clone())),
            StreamEvent::Usage(_) | StreamEvent::End(_) => None,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, StreamEvent::End(_))
    }
}

/// Stops an in-flight completion. Cloneable; cancelling more than once, or
/// after the stream ended, does nothing.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Producer half handed to a provider's background task
#[derive(Debug, Clone)]
pub struct StreamSender {
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancelHandle,
}

impl StreamSender {
    /// Deliver one event, waiting for buffer space. Returns `false` once the
    /// stream is cancelled or the consumer is gone; the task should stop.
    pub async fn send(&self, event: StreamEvent) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            res = self.tx.send(event) => res.is_ok(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }
}

/// Consumer half: a live, ordered sequence of events
#[derive(Debug)]
pub struct CompletionStream {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancelHandle,
    finished: bool,
}

impl CompletionStream {
    /// Create a connected sender/stream pair with the given buffer capacity
    pub fn channel(capacity: usize) -> (StreamSender, CompletionStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancelHandle::new();
        (
            StreamSender {
                tx,
                cancel: cancel.clone(),
            },
            CompletionStream {
                rx,
                cancel,
                finished: false,
            },
        )
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Next event, or `None` once the terminal `End` has been returned.
    ///
    /// Cancellation takes priority over buffered events: after the handle is
    /// invoked the next call yields `End(Cancelled)`, but only once every
    /// [`StreamSender`] is gone, so the producer has released its connection
    /// by the time the stream counts as closed. Producers must stop on
    /// cancellation for this to return.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }

        let event = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.drain_producer().await;
                StreamEvent::End(StreamEnd::Cancelled)
            }
            received = self.rx.recv() => received.unwrap_or_else(|| {
                StreamEvent::End(StreamEnd::Failed(
                    "provider stream closed without an end marker".to_string(),
                ))
            }),
        };

        if event.is_end() {
            self.finished = true;
            self.rx.close();
        }
        Some(event)
    }

    /// Discard buffered events until the producer drops its sender
    async fn drain_producer(&mut self) {
        self.rx.close();
        let mut discarded = 0usize;
        while self.rx.recv().await.is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            trace!(discarded, "dropped buffered events after cancellation");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for CompletionStream {
    fn drop(&mut self) {
        // Nobody is listening any more; let the producer release its connection.
        self.cancel.cancel();
    }
}
