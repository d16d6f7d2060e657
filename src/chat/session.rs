// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat session management
//!
//! [`SessionController`] owns the rolling turn history and the single
//! in-flight request of one chat session. A submission is validated,
//! windowed and dispatched synchronously; the stream is then drained on a
//! spawned task that folds events into the open turn, notifies the observer
//! and finally appends the closed turn to history.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::chat::history::{SessionHistory, DEFAULT_MAX_HISTORY};
use crate::chat::observer::SessionObserver;
use crate::chat::streaming::{TurnAccumulator, TurnUpdate};
use crate::config::Settings;
use crate::error::{GenMagicError, Result};
use crate::llm::factory::CompletionDispatcher;
use crate::llm::message::{Image, Message, ModelDefinition, Turn};
use crate::llm::provider::{CancelHandle, CompletionStream, StreamEnd};
use crate::project::Agent;

/// Default assistant persona
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// Default number of prior turns replayed with each prompt
pub const DEFAULT_CONTEXT_TURNS: usize = 5;

/// Session policy values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// System prompt used when no agent overrides it
    pub system_prompt: String,
    /// Maximum turns retained in history
    pub max_history: usize,
    /// Context turns used when the caller has no preference
    pub context_turns: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_history: DEFAULT_MAX_HISTORY,
            context_turns: DEFAULT_CONTEXT_TURNS,
        }
    }
}

impl ChatConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            system_prompt: settings.chat.system_prompt.clone(),
            max_history: settings.chat.max_history.max(1),
            context_turns: settings.chat.context_turns,
        }
    }
}

#[derive(Debug)]
struct SessionState {
    history: SessionHistory,
    definition: Option<ModelDefinition>,
    agent: Option<Agent>,
    in_flight: Option<CancelHandle>,
}

fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("session state lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Orchestrates prompts through the dispatcher to the observer
pub struct SessionController {
    dispatcher: Arc<dyn CompletionDispatcher>,
    observer: Arc<dyn SessionObserver>,
    config: ChatConfig,
    state: Arc<Mutex<SessionState>>,
}

impl SessionController {
    pub fn new(
        dispatcher: Arc<dyn CompletionDispatcher>,
        observer: Arc<dyn SessionObserver>,
        config: ChatConfig,
    ) -> Self {
        let state = SessionState {
            history: SessionHistory::new(config.max_history),
            definition: None,
            agent: None,
            in_flight: None,
        };
        Self {
            dispatcher,
            observer,
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Model definition used by subsequent submissions
    pub fn set_definition(&self, definition: ModelDefinition) {
        lock(&self.state).definition = Some(definition);
    }

    pub fn definition(&self) -> Option<ModelDefinition> {
        lock(&self.state).definition.clone()
    }

    /// Agent whose system prompt replaces the default persona
    pub fn set_agent(&self, agent: Option<Agent>) {
        lock(&self.state).agent = agent;
    }

    pub fn agent(&self) -> Option<Agent> {
        lock(&self.state).agent.clone()
    }

    /// Snapshot of the closed turns, oldest first
    pub fn history(&self) -> Vec<Turn> {
        lock(&self.state).history.to_vec()
    }

    pub fn clear_history(&self) {
        lock(&self.state).history.clear();
    }

    pub fn is_in_flight(&self) -> bool {
        lock(&self.state).in_flight.is_some()
    }

    /// Interpret a context-turns text field: empty means 0, unparseable
    /// means 0 (logged), and the result is clamped to `[0, max_history]`.
    pub fn parse_context_turns(&self, text: &str) -> usize {
        let text = text.trim();
        if text.is_empty() {
            return 0;
        }
        match text.parse::<i64>() {
            Ok(n) if n < 0 => 0,
            Ok(n) => usize::try_from(n)
                .unwrap_or(usize::MAX)
                .min(self.config.max_history),
            Err(e) => {
                warn!(input = %text, error = %e, "invalid context length, using 0");
                0
            }
        }
    }

    fn system_message(&self, agent: Option<&Agent>) -> Message {
        match agent {
            Some(agent) if !agent.system_prompt.trim().is_empty() => {
                Message::system(agent.system_prompt.clone())
            }
            _ => Message::system(self.config.system_prompt.clone()),
        }
    }

    /// Submit a prompt replaying up to `context_turns + 1` prior turns.
    ///
    /// Fails without touching history when the prompt is blank, a request
    /// is already in flight, no definition is selected, or the dispatcher
    /// rejects the definition. Must be called within a Tokio runtime.
    pub fn submit(&self, prompt: &str, context_turns: usize) -> Result<PendingTurn> {
        self.submit_with_images(prompt, Vec::new(), context_turns)
    }

    /// [`submit`](Self::submit) with images attached to the prompt
    pub fn submit_with_images(
        &self,
        prompt: &str,
        images: Vec<Image>,
        context_turns: usize,
    ) -> Result<PendingTurn> {
        if prompt.trim().is_empty() {
            return Err(GenMagicError::Validation("prompt is empty".to_string()));
        }

        let (turn, stream) = {
            let mut state = lock(&self.state);
            if state.in_flight.is_some() {
                return Err(GenMagicError::Busy);
            }
            let definition = state.definition.clone().ok_or_else(|| {
                GenMagicError::Validation("no model definition selected".to_string())
            })?;

            let context_turns = context_turns.min(self.config.max_history);
            let window = state.history.window(context_turns);
            let system = self.system_message(state.agent.as_ref());
            let prompt = Message::user(prompt).with_images(images);

            let stream =
                self.dispatcher
                    .chat_completion(&definition, &system, &prompt, &window)?;

            debug!(
                api = %definition.api,
                model = %definition.model,
                window = window.len(),
                "dispatched chat completion"
            );

            state.in_flight = Some(stream.cancel_handle());
            (Turn::new(definition, system, prompt), stream)
        };

        let id = turn.id;
        let cancel = stream.cancel_handle();
        self.observer.on_busy_changed(true);

        let handle = tokio::spawn(drive_turn(
            stream,
            turn,
            Arc::clone(&self.state),
            Arc::clone(&self.observer),
        ));

        Ok(PendingTurn { id, cancel, handle })
    }

    /// Cancel the in-flight request, if any. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        match lock(&self.state).in_flight.as_ref() {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }
}

/// Clears the in-flight slot if the turn task unwinds before closing
struct InFlightGuard {
    state: Arc<Mutex<SessionState>>,
    cancel: CancelHandle,
    armed: bool,
}

impl InFlightGuard {
    fn new(state: Arc<Mutex<SessionState>>, cancel: CancelHandle) -> Self {
        Self {
            state,
            cancel,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.armed {
            warn!("turn task ended abnormally, releasing in-flight slot");
            self.cancel.cancel();
            lock(&self.state).in_flight = None;
        }
    }
}

async fn drive_turn(
    mut stream: CompletionStream,
    turn: Turn,
    state: Arc<Mutex<SessionState>>,
    observer: Arc<dyn SessionObserver>,
) -> Turn {
    let mut guard = InFlightGuard::new(Arc::clone(&state), stream.cancel_handle());
    let id = turn.id;
    let mut acc = TurnAccumulator::new(turn);

    while let Some(event) = stream.next().await {
        match acc.process_event(event) {
            TurnUpdate::NewMessage { index } => {
                if let Some(message) = acc.turn().response.get(index) {
                    observer.on_new_message(id, index, message);
                }
            }
            TurnUpdate::Appended { index, text } => observer.on_append(id, index, &text),
            TurnUpdate::Ended(end) => debug!(turn = %id, outcome = ?end, "stream ended"),
            TurnUpdate::Usage(_) | TurnUpdate::Ignored => {}
        }
    }

    let stats = acc.stats().clone();
    let turn = acc.finish(StreamEnd::Completed);
    debug!(
        turn = %id,
        messages = stats.message_count,
        appends = stats.append_count,
        chars = stats.total_text_chars,
        "turn closed"
    );

    {
        let mut state = lock(&state);
        let evicted = state.history.push(turn.clone());
        if evicted > 0 {
            debug!(evicted, "history bound reached, dropped oldest turns");
        }
        state.in_flight = None;
        guard.disarm();
    }

    observer.on_stream_end(&turn);
    observer.on_busy_changed(false);
    turn
}

/// Handle to a submitted turn
#[derive(Debug)]
pub struct PendingTurn {
    id: Uuid,
    cancel: CancelHandle,
    handle: JoinHandle<Turn>,
}

impl PendingTurn {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Cancel this turn; no-op once it has closed
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wait for the closed turn, already appended to history.
    ///
    /// If the turn task panicked the session is released for new prompts but
    /// the partial turn is not recorded.
    pub async fn wait(self) -> Result<Turn> {
        self.handle
            .await
            .map_err(|e| GenMagicError::Connection(format!("stream task failed: {}", e)))
    }
}
