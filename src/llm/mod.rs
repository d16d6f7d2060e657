// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM module for gen-magic
//!
//! Message model, the streaming provider abstraction, the OpenRouter adapter
//! and the dispatcher that routes model definitions to adapters.

pub mod factory;
pub mod message;
pub mod mock_provider;
pub mod provider;
pub mod providers;

pub use factory::{CompletionDispatcher, ProviderFactory};
pub use message::*;
pub use provider::*;
