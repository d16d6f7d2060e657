// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Mock LLM provider for testing
//!
//! Provides a scripted implementation of the LlmProvider trait that replays
//! a fixed sequence of stream events on a background task, plus a
//! [`MockDispatcher`] so session tests never touch the network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{GenMagicError, Result};
use crate::llm::factory::CompletionDispatcher;
use crate::llm::message::{Message, ModelDefinition, Role};
use crate::llm::provider::{
    CompletionRequest, CompletionStream, LlmProvider, StreamEnd, StreamEvent, Usage,
};

/// A mock LLM provider for testing
#[derive(Clone)]
pub struct MockProvider {
    /// Provider name
    name: String,
    /// Configured script
    script: Arc<Mutex<MockScript>>,
    /// Call counter
    call_count: Arc<AtomicUsize>,
    /// Recorded requests
    recorded_requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

/// What the mock plays back for each call
#[derive(Clone, Debug)]
pub struct MockScript {
    /// Events sent before the terminal event
    pub events: Vec<StreamEvent>,
    /// Terminal event sent after `events`
    pub end: StreamEnd,
    /// Pause before each event
    pub delay: Duration,
    /// Send this many events, then wait until cancelled
    pub stall_after: Option<usize>,
    /// Fail synchronously instead of streaming
    pub fail_with: Option<String>,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            events: fragments_to_events(&["Mock response"]),
            end: StreamEnd::Completed,
            delay: Duration::ZERO,
            stall_after: None,
            fail_with: None,
        }
    }
}

/// First fragment starts an assistant message, the rest append to it
pub fn fragments_to_events(fragments: &[&str]) -> Vec<StreamEvent> {
    fragments
        .iter()
        .enumerate()
        .map(|(i, text)| {
            if i == 0 {
                StreamEvent::NewMessage(Message::new(Role::Assistant, *text))
            } else {
                StreamEvent::Append {
                    index: 0,
                    text: (*text).to_string(),
                }
            }
        })
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Mock provider lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create a new mock provider
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            script: Arc::new(Mutex::new(MockScript::default())),
            call_count: Arc::new(AtomicUsize::new(0)),
            recorded_requests: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Create a mock provider with a custom name
    pub fn with_name(name: impl Into<String>) -> Self {
        let mut provider = Self::new();
        provider.name = name.into();
        provider
    }

    /// Stream these fragments: the first as a new message, the rest as appends
    pub fn with_fragments(self, fragments: &[&str]) -> Self {
        lock(&self.script).events = fragments_to_events(fragments);
        self
    }

    /// Stream exactly these events before the end marker
    pub fn with_events(self, events: Vec<StreamEvent>) -> Self {
        lock(&self.script).events = events;
        self
    }

    /// Append a usage report after the scripted events
    pub fn with_usage(self, usage: Usage) -> Self {
        lock(&self.script).events.push(StreamEvent::Usage(usage));
        self
    }

    /// Terminal event to send
    pub fn with_end(self, end: StreamEnd) -> Self {
        lock(&self.script).end = end;
        self
    }

    /// Pause before every event
    pub fn with_delay(self, delay: Duration) -> Self {
        lock(&self.script).delay = delay;
        self
    }

    /// Send `n` events and then hold the stream open until cancelled
    pub fn stall_after(self, n: usize) -> Self {
        lock(&self.script).stall_after = Some(n);
        self
    }

    /// Fail every call synchronously with a validation error
    pub fn failing(self, message: impl Into<String>) -> Self {
        lock(&self.script).fail_with = Some(message.into());
        self
    }

    /// Get the number of times complete_stream() was called
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Get all recorded requests
    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        lock(&self.recorded_requests).clone()
    }

    /// Get the last request made
    pub fn last_request(&self) -> Option<CompletionRequest> {
        lock(&self.recorded_requests).last().cloned()
    }

    /// Reset call count and recorded requests
    pub fn reset(&self) {
        self.call_count.store(0, Ordering::SeqCst);
        lock(&self.recorded_requests).clear();
    }
}

impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete_stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.recorded_requests).push(request);

        let script = lock(&self.script).clone();
        if let Some(message) = script.fail_with {
            return Err(GenMagicError::Validation(message));
        }

        let (tx, stream) = CompletionStream::channel(16);
        tokio::spawn(async move {
            for (sent, event) in script.events.into_iter().enumerate() {
                if script.stall_after == Some(sent) {
                    tx.cancel_handle().cancelled().await;
                    return;
                }
                if !script.delay.is_zero() {
                    tokio::time::sleep(script.delay).await;
                }
                if !tx.send(event).await {
                    return;
                }
            }
            if script.stall_after.is_some() {
                tx.cancel_handle().cancelled().await;
                return;
            }
            tx.send(StreamEvent::End(script.end)).await;
        });

        Ok(stream)
    }
}

/// Dispatcher that routes a set of API kinds to one [`MockProvider`]
#[derive(Clone)]
pub struct MockDispatcher {
    provider: MockProvider,
    apis: Vec<String>,
}

impl MockDispatcher {
    /// Accepts the "mock" API kind only
    pub fn new(provider: MockProvider) -> Self {
        Self {
            provider,
            apis: vec!["mock".to_string()],
        }
    }

    /// Also accept another API kind
    pub fn accepting(mut self, api: impl Into<String>) -> Self {
        self.apis.push(api.into());
        self
    }

    pub fn provider(&self) -> &MockProvider {
        &self.provider
    }
}

impl CompletionDispatcher for MockDispatcher {
    fn resolve(&self, definition: &ModelDefinition) -> Result<Arc<dyn LlmProvider>> {
        let api = definition.api.trim();
        if self.apis.iter().any(|known| known.eq_ignore_ascii_case(api)) {
            Ok(Arc::new(self.provider.clone()))
        } else {
            Err(GenMagicError::UnsupportedApi(definition.api.clone()))
        }
    }
}
