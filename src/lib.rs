// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! gen-magic - streaming LLM chat backed by a local project file.
//!
//! This crate exposes the shared runtime used by the `gen-magic` CLI
//! (`src/main.rs`).
//!
//! Architecture highlights:
//! - `llm`: message model, streaming provider abstraction, OpenRouter adapter
//!   and the dispatcher that routes model definitions to adapters
//! - `chat`: session controller, bounded turn history and observers
//! - `project`: SQLite-backed model definitions, agents and settings
//! - `config`: user settings in `~/.gen-magic/settings.json`
//! - `cli`: command-line argument definitions

pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod project;

pub use error::{GenMagicError, Result};
