// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Streaming response handling
//!
//! This module folds provider stream events into the open [`Turn`] without
//! doing any I/O, so the session controller's bookkeeping can be tested on
//! its own.

use tracing::warn;

use crate::llm::message::{Message, Role, Turn};
use crate::llm::provider::{StreamEnd, StreamEvent, Usage};

/// Accumulator for one streaming turn
#[derive(Debug)]
pub struct TurnAccumulator {
    /// Turn being filled in
    turn: Turn,
    /// Counters for logging
    stats: StreamStats,
}

impl TurnAccumulator {
    pub fn new(turn: Turn) -> Self {
        Self {
            turn,
            stats: StreamStats::default(),
        }
    }

    pub fn turn(&self) -> &Turn {
        &self.turn
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Whether an end event has been folded in
    pub fn is_closed(&self) -> bool {
        self.turn.is_closed()
    }

    /// Process a stream event and report what changed
    pub fn process_event(&mut self, event: StreamEvent) -> TurnUpdate {
        if self.turn.is_closed() {
            return TurnUpdate::Ignored;
        }

        match event {
            StreamEvent::NewMessage(message) => self.start_message(Message {
                delta: false,
                ..message
            }),
            StreamEvent::Append { index, text } => {
                let len = self.turn.response.len();
                if len == 0 {
                    // Nothing to append onto: the fragment starts the response.
                    return self.start_message(Message::new(Role::Assistant, text));
                }

                let index = if index < len {
                    index
                } else {
                    warn!(index, len, "append targets unknown message, using last");
                    len - 1
                };

                self.turn.response[index].push_text(&text);
                self.stats.total_text_chars += text.len();
                self.stats.append_count += 1;
                TurnUpdate::Appended { index, text }
            }
            StreamEvent::Usage(usage) => {
                self.turn.usage = Some(usage.clone());
                TurnUpdate::Usage(usage)
            }
            StreamEvent::End(end) => {
                self.turn.outcome = Some(end.clone());
                TurnUpdate::Ended(end)
            }
        }
    }

    fn start_message(&mut self, message: Message) -> TurnUpdate {
        self.stats.total_text_chars += message.content.len();
        self.stats.message_count += 1;
        self.turn.response.push(message);
        TurnUpdate::NewMessage {
            index: self.turn.response.len() - 1,
        }
    }

    /// Close the turn if no end event arrived and hand it back
    pub fn finish(mut self, fallback: StreamEnd) -> Turn {
        if self.turn.outcome.is_none() {
            self.turn.outcome = Some(fallback);
        }
        self.turn
    }
}

/// Result of folding one event into the turn
#[derive(Debug, Clone, PartialEq)]
pub enum TurnUpdate {
    /// A response message was appended at `index`
    NewMessage { index: usize },
    /// `text` was concatenated onto response message `index`
    Appended { index: usize, text: String },
    /// Usage was recorded
    Usage(Usage),
    /// The turn is now closed
    Ended(StreamEnd),
    /// Event arrived after the end and was dropped
    Ignored,
}

impl TurnUpdate {
    /// Text to display for this update, if any
    pub fn text(&self) -> Option<&str> {
        match self {
            TurnUpdate::Appended { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, TurnUpdate::Ended(_))
    }
}

/// Statistics about a streaming response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Total text bytes received
    pub total_text_chars: usize,
    /// Number of append events applied
    pub append_count: usize,
    /// Number of response messages started
    pub message_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::message::ModelDefinition;

    fn open_turn() -> Turn {
        Turn::new(
            ModelDefinition::new("mock", "m"),
            Message::system("sys"),
            Message::user("hi"),
        )
    }

    fn append(index: usize, text: &str) -> StreamEvent {
        StreamEvent::Append {
            index,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_accumulator_assembles_fragments() {
        let mut acc = TurnAccumulator::new(open_turn());

        assert_eq!(
            acc.process_event(StreamEvent::NewMessage(Message::assistant(""))),
            TurnUpdate::NewMessage { index: 0 }
        );
        for piece in ["Hel", "lo", " world"] {
            let update = acc.process_event(append(0, piece));
            assert_eq!(update.text(), Some(piece));
        }
        assert!(acc
            .process_event(StreamEvent::End(StreamEnd::Completed))
            .is_end());

        let turn = acc.finish(StreamEnd::Completed);
        assert_eq!(turn.response.len(), 1);
        assert_eq!(turn.response[0].text(), "Hello world");
        assert_eq!(turn.outcome, Some(StreamEnd::Completed));
    }

    #[test]
    fn test_accumulator_multiple_messages() {
        let mut acc = TurnAccumulator::new(open_turn());
        acc.process_event(StreamEvent::NewMessage(Message::assistant("one")));
        acc.process_event(StreamEvent::NewMessage(Message::assistant("two")));
        acc.process_event(append(1, "!"));
        acc.process_event(append(0, "?"));

        let turn = acc.finish(StreamEnd::Completed);
        assert_eq!(turn.response[0].text(), "one?");
        assert_eq!(turn.response[1].text(), "two!");
    }

    #[test]
    fn test_append_without_message_starts_one() {
        let mut acc = TurnAccumulator::new(open_turn());
        assert_eq!(
            acc.process_event(append(0, "orphan")),
            TurnUpdate::NewMessage { index: 0 }
        );
        assert_eq!(acc.turn().response[0].role, Role::Assistant);
    }

    #[test]
    fn test_append_out_of_range_targets_last() {
        let mut acc = TurnAccumulator::new(open_turn());
        acc.process_event(StreamEvent::NewMessage(Message::assistant("a")));
        assert_eq!(
            acc.process_event(append(7, "b")),
            TurnUpdate::Appended {
                index: 0,
                text: "b".to_string()
            }
        );
    }

    #[test]
    fn test_new_message_clears_delta_flag() {
        let mut acc = TurnAccumulator::new(open_turn());
        acc.process_event(StreamEvent::NewMessage(Message::fragment(
            Role::Assistant,
            "x",
        )));
        assert!(!acc.turn().response[0].delta);
    }

    #[test]
    fn test_events_after_end_are_ignored() {
        let mut acc = TurnAccumulator::new(open_turn());
        acc.process_event(StreamEvent::NewMessage(Message::assistant("a")));
        acc.process_event(StreamEvent::End(StreamEnd::Cancelled));
        assert_eq!(acc.process_event(append(0, "late")), TurnUpdate::Ignored);

        let turn = acc.finish(StreamEnd::Completed);
        assert_eq!(turn.response[0].text(), "a");
        assert_eq!(turn.outcome, Some(StreamEnd::Cancelled));
    }

    #[test]
    fn test_usage_is_recorded() {
        let mut acc = TurnAccumulator::new(open_turn());
        let usage = Usage {
            input_tokens: 3,
            output_tokens: 4,
            cost: None,
        };
        acc.process_event(StreamEvent::Usage(usage.clone()));
        assert_eq!(acc.turn().usage, Some(usage));
    }

    #[test]
    fn test_finish_without_end_uses_fallback() {
        let acc = TurnAccumulator::new(open_turn());
        assert!(!acc.is_closed());
        let turn = acc.finish(StreamEnd::Cancelled);
        assert_eq!(turn.outcome, Some(StreamEnd::Cancelled));
    }

    #[test]
    fn test_stats() {
        let mut acc = TurnAccumulator::new(open_turn());
        acc.process_event(StreamEvent::NewMessage(Message::assistant("ab")));
        acc.process_event(append(0, "cd"));
        acc.process_event(append(0, "e"));
        assert_eq!(
            acc.stats(),
            &StreamStats {
                total_text_chars: 5,
                append_count: 2,
                message_count: 1,
            }
        );
    }
}
