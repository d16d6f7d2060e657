// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat session management
//!
//! This module provides the session controller and its parts: the bounded
//! turn history, the event accumulator and the observer interface consumed
//! by the display layer.

pub mod history;
pub mod observer;
pub mod session;
pub mod streaming;

pub use history::SessionHistory;
pub use observer::{ConsoleObserver, NoopObserver, RecordingObserver, SessionObserver};
pub use session::{ChatConfig, PendingTurn, SessionController};
pub use streaming::{TurnAccumulator, TurnUpdate};
