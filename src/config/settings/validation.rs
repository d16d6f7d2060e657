// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use crate::error::{GenMagicError, Result};

use super::Settings;

impl Settings {
    /// Get the API key for OpenRouter, checking env var first.
    pub fn get_openrouter_api_key(&self) -> Option<String> {
        // Priority: env var > config file.
        std::env::var(&self.providers.openrouter.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.providers.openrouter.api_key.clone())
    }

    /// Reject unusable values and clamp the rest, returning a warning for
    /// every adjustment made.
    pub fn validate(&mut self) -> Result<Vec<String>> {
        if self.chat.max_history == 0 {
            return Err(GenMagicError::Config(
                "chat.max_history must be at least 1".to_string(),
            ));
        }
        if self.chat.stream_buffer == 0 {
            return Err(GenMagicError::Config(
                "chat.stream_buffer must be at least 1".to_string(),
            ));
        }

        let mut warnings = Vec::new();
        if self.chat.context_turns > self.chat.max_history {
            warnings.push(format!(
                "chat.context_turns {} exceeds chat.max_history {}, clamping",
                self.chat.context_turns, self.chat.max_history
            ));
            self.chat.context_turns = self.chat.max_history;
        }
        if self.chat.system_prompt.trim().is_empty() {
            warnings.push("chat.system_prompt is empty, using the default".to_string());
            self.chat.system_prompt = crate::chat::session::DEFAULT_SYSTEM_PROMPT.to_string();
        }

        Ok(warnings)
    }
}
