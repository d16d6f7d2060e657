// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use gen_magic::chat::observer::ObservedEvent;
use gen_magic::chat::{ChatConfig, RecordingObserver, SessionController, SessionHistory};
use gen_magic::error::{GenMagicError, Result};
use gen_magic::llm::message::{Message, ModelDefinition, Role, Turn};
use gen_magic::llm::mock_provider::{MockDispatcher, MockProvider};
use gen_magic::llm::provider::{
    CompletionRequest, CompletionStream, LlmProvider, StreamEnd, StreamEvent, Usage,
};
use gen_magic::llm::CompletionDispatcher;

fn session(
    provider: MockProvider,
    config: ChatConfig,
) -> (SessionController, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::new());
    let controller = SessionController::new(
        Arc::new(MockDispatcher::new(provider)),
        observer.clone(),
        config,
    );
    controller.set_definition(ModelDefinition::new("mock", "mock-model").with_name("Mock"));
    (controller, observer)
}

fn appends(events: &[ObservedEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ObservedEvent::Append { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_fragments_reach_observer_in_order() {
    let provider = MockProvider::new().with_fragments(&["", "Hel", "lo", " world"]);
    let (controller, observer) = session(provider, ChatConfig::default());

    let pending = controller.submit("greet me", 5).unwrap();
    let turn_id = pending.id();
    let turn = pending.wait().await.unwrap();

    let events = observer.stream_events();
    assert_eq!(
        events[0],
        ObservedEvent::NewMessage {
            turn_id,
            index: 0,
            text: String::new(),
        }
    );
    assert_eq!(appends(&events), vec!["Hel", "lo", " world"]);
    assert_eq!(
        events.last(),
        Some(&ObservedEvent::StreamEnd {
            turn_id,
            text: "Hello world".to_string(),
            outcome: Some(StreamEnd::Completed),
        })
    );

    assert_eq!(turn.response.len(), 1);
    assert_eq!(turn.response[0].role, Role::Assistant);
    assert_eq!(turn.response_text(), "Hello world");
    assert_eq!(controller.history(), vec![turn]);
}

#[tokio::test]
async fn test_unsupported_api_fails_before_dispatch() {
    let provider = MockProvider::new();
    let (controller, observer) = session(provider.clone(), ChatConfig::default());
    controller.set_definition(ModelDefinition::new("bogus", "whatever"));

    let err = controller.submit("hello", 3).unwrap_err();

    assert!(matches!(err, GenMagicError::UnsupportedApi(ref api) if api == "bogus"));
    assert_eq!(provider.call_count(), 0);
    assert!(controller.history().is_empty());
    assert!(!controller.is_in_flight());
    assert!(observer.events().is_empty());
}

#[tokio::test]
async fn test_cancel_mid_stream_keeps_partial_text() {
    let provider = MockProvider::new()
        .with_fragments(&["a", "b", "c", "d", "e"])
        .stall_after(2);
    let (controller, observer) = session(provider, ChatConfig::default());

    let pending = controller.submit("spell it", 0).unwrap();
    observer.wait_for_fragments(2).await;
    assert!(controller.cancel());

    let turn = tokio::time::timeout(Duration::from_secs(5), pending.wait())
        .await
        .expect("cancelled turn should close promptly")
        .unwrap();

    assert_eq!(turn.outcome, Some(StreamEnd::Cancelled));
    assert_eq!(turn.response_text(), "ab");

    let events = observer.stream_events();
    assert_eq!(appends(&events), vec!["b"]);
    assert!(matches!(
        events.last(),
        Some(ObservedEvent::StreamEnd {
            outcome: Some(StreamEnd::Cancelled),
            ..
        })
    ));
    assert_eq!(controller.history().len(), 1);
}

/// Provider whose connection takes a while to tear down after cancellation
struct SlowTeardownProvider {
    released: Arc<AtomicBool>,
}

impl LlmProvider for SlowTeardownProvider {
    fn name(&self) -> &str {
        "slow-teardown"
    }

    fn complete_stream(&self, _request: CompletionRequest) -> Result<CompletionStream> {
        let (tx, stream) = CompletionStream::channel(4);
        let released = Arc::clone(&self.released);
        tokio::spawn(async move {
            tx.send(StreamEvent::NewMessage(Message::assistant("partial")))
                .await;
            tx.cancel_handle().cancelled().await;
            tokio::time::sleep(Duration::from_millis(150)).await;
            released.store(true, Ordering::SeqCst);
        });
        Ok(stream)
    }
}

struct SlowTeardownDispatcher {
    released: Arc<AtomicBool>,
}

impl CompletionDispatcher for SlowTeardownDispatcher {
    fn resolve(&self, _definition: &ModelDefinition) -> Result<Arc<dyn LlmProvider>> {
        Ok(Arc::new(SlowTeardownProvider {
            released: Arc::clone(&self.released),
        }))
    }
}

#[tokio::test]
async fn test_cancelled_turn_closes_after_provider_releases() {
    let released = Arc::new(AtomicBool::new(false));
    let observer = Arc::new(RecordingObserver::new());
    let controller = SessionController::new(
        Arc::new(SlowTeardownDispatcher {
            released: Arc::clone(&released),
        }),
        observer.clone(),
        ChatConfig::default(),
    );
    controller.set_definition(ModelDefinition::new("slow", "m"));

    let pending = controller.submit("go", 0).unwrap();
    observer.wait_for_fragments(1).await;
    assert!(controller.cancel());

    let turn = tokio::time::timeout(Duration::from_secs(5), pending.wait())
        .await
        .expect("cancelled turn should close")
        .unwrap();

    assert_eq!(turn.outcome, Some(StreamEnd::Cancelled));
    assert_eq!(turn.response_text(), "partial");
    assert!(released.load(Ordering::SeqCst));
    assert!(!controller.is_in_flight());
}

#[tokio::test]
async fn test_pending_turn_cancel_handle() {
    let provider = MockProvider::new().with_fragments(&["x", "y"]).stall_after(1);
    let (controller, observer) = session(provider, ChatConfig::default());

    let pending = controller.submit("go", 0).unwrap();
    observer.wait_for_fragments(1).await;
    pending.cancel();

    let turn = pending.wait().await.unwrap();
    assert_eq!(turn.outcome, Some(StreamEnd::Cancelled));
    assert_eq!(turn.response_text(), "x");
    assert!(!controller.is_in_flight());
}

#[tokio::test]
async fn test_context_replays_responses_only() {
    let first = vec![
        StreamEvent::NewMessage(Message::system("internal note")),
        StreamEvent::NewMessage(Message::assistant("first answer")),
    ];
    let provider = MockProvider::new().with_events(first);
    let (controller, _) = session(provider.clone(), ChatConfig::default());

    controller.submit("first question", 0).unwrap().wait().await.unwrap();

    provider.reset();
    controller.submit("second question", 0).unwrap().wait().await.unwrap();

    let request = provider.last_request().unwrap();
    let sent: Vec<(Role, &str)> = request
        .messages
        .iter()
        .map(|m| (m.role, m.text()))
        .collect();
    assert_eq!(
        sent,
        vec![
            (Role::System, "You are a helpful AI assistant."),
            (Role::Assistant, "first answer"),
            (Role::User, "second question"),
        ]
    );
}

#[tokio::test]
async fn test_context_window_size() {
    let provider = MockProvider::new().with_fragments(&["ok"]);
    let (controller, _) = session(provider.clone(), ChatConfig::default());

    for i in 0..4 {
        controller
            .submit(&format!("q{}", i), 0)
            .unwrap()
            .wait()
            .await
            .unwrap();
    }

    // Zero extra context still replays the latest turn
    controller.submit("q4", 0).unwrap().wait().await.unwrap();
    assert_eq!(provider.last_request().unwrap().messages.len(), 3);

    // 2 extra turns replays three responses
    controller.submit("q5", 2).unwrap().wait().await.unwrap();
    assert_eq!(provider.last_request().unwrap().messages.len(), 5);
}

#[tokio::test]
async fn test_history_is_bounded() {
    let config = ChatConfig {
        max_history: 2,
        ..ChatConfig::default()
    };
    let (controller, _) = session(MockProvider::new(), config);

    for prompt in ["one", "two", "three"] {
        controller.submit(prompt, 0).unwrap().wait().await.unwrap();
    }

    let prompts: Vec<String> = controller
        .history()
        .iter()
        .map(|t| t.prompt.text().to_string())
        .collect();
    assert_eq!(prompts, vec!["two", "three"]);
}

#[tokio::test]
async fn test_provider_failure_closes_turn() {
    let provider = MockProvider::new()
        .with_fragments(&["half"])
        .with_end(StreamEnd::Failed("connection reset".to_string()));
    let (controller, observer) = session(provider, ChatConfig::default());

    let turn = controller.submit("try", 0).unwrap().wait().await.unwrap();

    assert_eq!(
        turn.outcome,
        Some(StreamEnd::Failed("connection reset".to_string()))
    );
    assert_eq!(turn.response_text(), "half");
    assert_eq!(controller.history().len(), 1);
    assert_eq!(observer.events().last(), Some(&ObservedEvent::Busy(false)));
}

#[tokio::test]
async fn test_synchronous_provider_error_leaves_session_idle() {
    let provider = MockProvider::new().failing("model missing");
    let (controller, observer) = session(provider, ChatConfig::default());

    assert!(controller.submit("hi", 0).is_err());
    assert!(!controller.is_in_flight());
    assert!(controller.history().is_empty());
    assert!(observer.events().is_empty());
}

#[tokio::test]
async fn test_usage_is_recorded_on_turn() {
    let provider = MockProvider::new().with_fragments(&["hi"]).with_usage(Usage {
        input_tokens: 12,
        output_tokens: 4,
        cost: None,
    });
    let (controller, _) = session(provider, ChatConfig::default());

    let turn = controller.submit("count", 0).unwrap().wait().await.unwrap();
    let usage = turn.usage.expect("usage should be recorded");
    assert_eq!(usage.total_tokens(), 16);
}

#[tokio::test]
async fn test_new_submission_allowed_after_close() {
    let provider = MockProvider::new()
        .with_fragments(&["slow"])
        .with_delay(Duration::from_millis(20));
    let (controller, _) = session(provider.clone(), ChatConfig::default());

    let first = controller.submit("one", 0).unwrap();
    assert!(matches!(controller.submit("two", 0), Err(GenMagicError::Busy)));
    first.wait().await.unwrap();

    controller.submit("two", 0).unwrap().wait().await.unwrap();
    assert_eq!(provider.call_count(), 2);
}

fn closed_turn(n: usize) -> Turn {
    let mut turn = Turn::new(
        ModelDefinition::new("mock", "m"),
        Message::system("sys"),
        Message::user(format!("q{}", n)),
    );
    turn.response.push(Message::assistant(format!("a{}", n)));
    turn.outcome = Some(StreamEnd::Completed);
    turn
}

proptest! {
    #[test]
    fn prop_history_never_exceeds_bound(max in 1usize..20, pushes in 0usize..50) {
        let mut history = SessionHistory::new(max);
        for n in 0..pushes {
            history.push(closed_turn(n));
            prop_assert!(history.len() <= max);
        }
        prop_assert_eq!(history.len(), pushes.min(max));
        if pushes > 0 {
            let expected = format!("q{}", pushes - 1);
            prop_assert_eq!(history.last().map(|t| t.prompt.text().to_string()), Some(expected));
        }
    }

    #[test]
    fn prop_window_length(max in 1usize..20, pushes in 0usize..30, context in 0usize..40) {
        let mut history = SessionHistory::new(max);
        for n in 0..pushes {
            history.push(closed_turn(n));
        }
        let window = history.window(context);
        prop_assert_eq!(window.len(), (context + 1).min(history.len()));
        if let (Some(last), Some(newest)) = (window.last(), history.last()) {
            prop_assert_eq!(last.id, newest.id);
        }
    }
}
