// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for gen-magic
//!
//! Handles loading and saving settings from ~/.gen-magic/settings.json

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod io;
mod validation;

/// Main settings structure, stored in ~/.gen-magic/settings.json
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    /// Chat session policy
    #[serde(default)]
    pub chat: ChatSettings,

    /// Project database location
    #[serde(default)]
    pub project: ProjectSettings,

    /// LLM provider configurations
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// Chat session policy values
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSettings {
    /// Prior turns replayed with each prompt (beyond the latest one)
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,

    /// Turns retained in session history
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Persona used when no agent is selected
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Capacity of the provider event channel
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,

    /// Print token usage after each response
    #[serde(default)]
    pub show_usage: bool,
}

/// Project database settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectSettings {
    /// Path to the SQLite project file
    #[serde(default = "default_project_path")]
    pub path: PathBuf,
}

/// Configuration for LLM providers
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProvidersConfig {
    /// OpenRouter configuration (many models via a single API)
    #[serde(default)]
    pub openrouter: OpenRouterConfig,
}

/// OpenRouter configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenRouterConfig {
    /// API key (if stored directly, not recommended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default = "default_openrouter_api_key_env")]
    pub api_key_env: String,

    /// Base URL used for new model definitions
    #[serde(default = "default_openrouter_base_url")]
    pub base_url: String,

    /// Sent as X-Title for OpenRouter app attribution
    #[serde(default = "default_site_name")]
    pub site_name: String,
}

fn default_context_turns() -> usize {
    crate::chat::session::DEFAULT_CONTEXT_TURNS
}

fn default_max_history() -> usize {
    crate::chat::history::DEFAULT_MAX_HISTORY
}

fn default_system_prompt() -> String {
    crate::chat::session::DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_stream_buffer() -> usize {
    crate::llm::provider::DEFAULT_STREAM_BUFFER
}

fn default_project_path() -> PathBuf {
    Settings::gen_magic_home().join("project.db")
}

fn default_openrouter_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_openrouter_base_url() -> String {
    crate::llm::providers::openrouter::OPENROUTER_BASE_URL.to_string()
}

fn default_site_name() -> String {
    "gen-magic".to_string()
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            context_turns: default_context_turns(),
            max_history: default_max_history(),
            system_prompt: default_system_prompt(),
            stream_buffer: default_stream_buffer(),
            show_usage: false,
        }
    }
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            path: default_project_path(),
        }
    }
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_openrouter_api_key_env(),
            base_url: default_openrouter_base_url(),
            site_name: default_site_name(),
        }
    }
}
