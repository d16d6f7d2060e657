// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Bounded turn history for a chat session

use std::collections::VecDeque;

use crate::llm::message::Turn;

/// Default number of turns retained per session
pub const DEFAULT_MAX_HISTORY: usize = 100;

/// Ordered, FIFO-bounded sequence of closed turns
#[derive(Debug, Clone)]
pub struct SessionHistory {
    turns: VecDeque<Turn>,
    max_turns: usize,
}

impl Default for SessionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl SessionHistory {
    /// A bound of zero is treated as one.
    pub fn new(max_turns: usize) -> Self {
        let max_turns = max_turns.max(1);
        Self {
            turns: VecDeque::with_capacity(max_turns.min(DEFAULT_MAX_HISTORY)),
            max_turns,
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Append a closed turn, evicting the oldest ones past the bound.
    /// Returns how many turns were evicted.
    pub fn push(&mut self, turn: Turn) -> usize {
        self.turns.push_back(turn);
        let mut evicted = 0;
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Suffix replayed alongside the next prompt: `min(context_turns + 1, len)`
    /// most recent turns, oldest first.
    pub fn window(&self, context_turns: usize) -> Vec<Turn> {
        let begin = self
            .turns
            .len()
            .saturating_sub(context_turns.saturating_add(1));
        self.turns.range(begin..).cloned().collect()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn to_vec(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
