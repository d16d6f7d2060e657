// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Consumer-side notifications for a chat session
//!
//! The session controller reports every change to the open turn through a
//! [`SessionObserver`]. Callbacks run on the task draining the stream, in
//! stream order, and must not block for long.

use std::io::Write;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;
use uuid::Uuid;

use crate::llm::message::{Message, Turn};
use crate::llm::provider::StreamEnd;

/// Receives session events
pub trait SessionObserver: Send + Sync {
    /// A response message started; `index` is its position in the turn
    fn on_new_message(&self, turn_id: Uuid, index: usize, message: &Message);

    /// `text` was appended onto response message `index`
    fn on_append(&self, turn_id: Uuid, index: usize, text: &str);

    /// The turn closed and was appended to history
    fn on_stream_end(&self, turn: &Turn);

    /// A request started (`true`) or finished (`false`)
    fn on_busy_changed(&self, _busy: bool) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {
    fn on_new_message(&self, _turn_id: Uuid, _index: usize, _message: &Message) {}
    fn on_append(&self, _turn_id: Uuid, _index: usize, _text: &str) {}
    fn on_stream_end(&self, _turn: &Turn) {}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("observer lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Format the trailer printed once a turn closes
pub fn format_stream_end(end: Option<&StreamEnd>) -> Option<String> {
    match end {
        Some(StreamEnd::Cancelled) => Some("[cancelled]".to_string()),
        Some(StreamEnd::Failed(reason)) => Some(format!("[stream ended early: {}]", reason)),
        Some(StreamEnd::Completed) | None => None,
    }
}

/// Streams response text to a writer as it arrives
pub struct ConsoleObserver<W: Write + Send> {
    out: Mutex<W>,
    show_usage: bool,
}

impl ConsoleObserver<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleObserver<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            show_usage: false,
        }
    }

    /// Print token usage after each turn
    pub fn with_usage(mut self, show: bool) -> Self {
        self.show_usage = show;
        self
    }

    fn write(&self, text: &str) {
        let mut out = lock(&self.out);
        // Console output is best effort; a closed stdout must not kill the stream.
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> SessionObserver for ConsoleObserver<W> {
    fn on_new_message(&self, _turn_id: Uuid, index: usize, message: &Message) {
        if index > 0 {
            self.write("\n\n");
        }
        self.write(message.text());
    }

    fn on_append(&self, _turn_id: Uuid, _index: usize, text: &str) {
        self.write(text);
    }

    fn on_stream_end(&self, turn: &Turn) {
        let mut tail = String::from("\n");
        if let Some(trailer) = format_stream_end(turn.outcome.as_ref()) {
            tail.push_str(&trailer);
            tail.push('\n');
        }
        if self.show_usage {
            if let Some(ref usage) = turn.usage {
                tail.push_str(&format!(
                    "[{} in / {} out tokens]\n",
                    usage.input_tokens, usage.output_tokens
                ));
            }
        }
        self.write(&tail);
    }
}

/// One observed callback
#[derive(Debug, Clone, PartialEq)]
pub enum ObservedEvent {
    NewMessage {
        turn_id: Uuid,
        index: usize,
        text: String,
    },
    Append {
        turn_id: Uuid,
        index: usize,
        text: String,
    },
    StreamEnd {
        turn_id: Uuid,
        text: String,
        outcome: Option<StreamEnd>,
    },
    Busy(bool),
}

/// Records every callback, for tests and headless consumers
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
    count: watch::Sender<usize>,
}

impl Default for RecordingObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingObserver {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            events: Mutex::new(Vec::new()),
            count,
        }
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        lock(&self.events).clone()
    }

    /// Events excluding busy notifications
    pub fn stream_events(&self) -> Vec<ObservedEvent> {
        self.events()
            .into_iter()
            .filter(|e| !matches!(e, ObservedEvent::Busy(_)))
            .collect()
    }

    /// Resolves once at least `n` new-message/append events were seen
    pub async fn wait_for_fragments(&self, n: usize) {
        let mut rx = self.count.subscribe();
        // The sender lives in self, so this only errors if self is gone.
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    fn record(&self, event: ObservedEvent) {
        let is_fragment = matches!(
            event,
            ObservedEvent::NewMessage { .. } | ObservedEvent::Append { .. }
        );
        lock(&self.events).push(event);
        if is_fragment {
            self.count.send_modify(|count| *count += 1);
        }
    }
}

impl SessionObserver for RecordingObserver {
    fn on_new_message(&self, turn_id: Uuid, index: usize, message: &Message) {
        self.record(ObservedEvent::NewMessage {
            turn_id,
            index,
            text: message.text().to_string(),
        });
    }

    fn on_append(&self, turn_id: Uuid, index: usize, text: &str) {
        self.record(ObservedEvent::Append {
            turn_id,
            index,
            text: text.to_string(),
        });
    }

    fn on_stream_end(&self, turn: &Turn) {
        self.record(ObservedEvent::StreamEnd {
            turn_id: turn.id,
            text: turn.response_text(),
            outcome: turn.outcome.clone(),
        });
    }

    fn on_busy_changed(&self, busy: bool) {
        self.record(ObservedEvent::Busy(busy));
    }
}
