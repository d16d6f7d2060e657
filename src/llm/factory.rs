// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider factory for routing model definitions to LLM providers
//!
//! The session layer only ever talks to a [`CompletionDispatcher`]. The
//! production implementation, [`ProviderFactory`], maps a definition's API
//! kind onto a provider and holds no per-request state.

use std::sync::Arc;

use reqwest::Client;
use tracing::debug;

use crate::config::Settings;
use crate::error::{GenMagicError, Result};
use crate::llm::message::{Message, ModelDefinition, Turn};
use crate::llm::provider::{
    CompletionRequest, CompletionStream, LlmProvider, DEFAULT_STREAM_BUFFER,
};
use crate::llm::providers::OpenRouterProvider;

/// Single entry point from the session layer to any provider
pub trait CompletionDispatcher: Send + Sync {
    /// Pick the provider for a definition. Fails with
    /// [`GenMagicError::UnsupportedApi`] before any network activity when the
    /// API kind is unknown.
    fn resolve(&self, definition: &ModelDefinition) -> Result<Arc<dyn LlmProvider>>;

    /// Start a streaming chat completion for `prompt`, replaying `context`.
    fn chat_completion(
        &self,
        definition: &ModelDefinition,
        system: &Message,
        prompt: &Message,
        context: &[Turn],
    ) -> Result<CompletionStream> {
        let provider = self.resolve(definition)?;
        let request =
            CompletionRequest::from_conversation(&definition.model, system, prompt, context);
        provider.complete_stream(request)
    }
}

/// Factory for creating LLM providers
#[derive(Clone)]
pub struct ProviderFactory {
    client: Client,
    buffer: usize,
    site_name: Option<String>,
    base_url: Option<String>,
    fallback_api_key: Option<String>,
}

impl std::fmt::Debug for ProviderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderFactory")
            .field("buffer", &self.buffer)
            .field("site_name", &self.site_name)
            .field("base_url", &self.base_url)
            .field("fallback_api_key_set", &self.fallback_api_key.is_some())
            .finish()
    }
}

impl Default for ProviderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderFactory {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            buffer: DEFAULT_STREAM_BUFFER,
            site_name: None,
            base_url: None,
            fallback_api_key: None,
        }
    }

    /// Build from application settings. The configured OpenRouter base URL
    /// and key stand in for a definition's blank endpoint and key.
    pub fn from_settings(settings: &Settings) -> Self {
        let openrouter = &settings.providers.openrouter;
        let base_url = Some(openrouter.base_url.trim())
            .filter(|url| !url.is_empty())
            .map(str::to_string);
        Self {
            client: Client::new(),
            buffer: settings.chat.stream_buffer,
            site_name: Some(openrouter.site_name.clone()),
            base_url,
            fallback_api_key: settings.get_openrouter_api_key(),
        }
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Endpoint used when a definition leaves its own blank
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_fallback_api_key(mut self, key: impl Into<String>) -> Self {
        self.fallback_api_key = Some(key.into());
        self
    }

    /// Create an OpenRouter provider for a definition
    pub fn create_openrouter(&self, definition: &ModelDefinition) -> OpenRouterProvider {
        let mut def = definition.clone();
        if def.api_key.trim().is_empty() {
            if let Some(ref key) = self.fallback_api_key {
                def.api_key = key.clone();
            }
        }
        if def.api_endpoint.trim().is_empty() {
            if let Some(ref url) = self.base_url {
                def.api_endpoint = url.clone();
            }
        }

        let mut provider = OpenRouterProvider::from_definition(&def)
            .with_client(self.client.clone())
            .with_buffer(self.buffer);
        if let Some(ref name) = self.site_name {
            provider = provider.with_site_name(name);
        }
        provider
    }

    /// List all supported API kinds
    pub fn supported_apis() -> &'static [&'static str] {
        &["openrouter"]
    }

    /// Check whether an API kind is known, ignoring case
    pub fn is_supported(api: &str) -> bool {
        let api = api.trim();
        Self::supported_apis()
            .iter()
            .any(|known| known.eq_ignore_ascii_case(api))
    }
}

impl CompletionDispatcher for ProviderFactory {
    fn resolve(&self, definition: &ModelDefinition) -> Result<Arc<dyn LlmProvider>> {
        match definition.api.trim().to_ascii_lowercase().as_str() {
            "openrouter" => {
                debug!(model = %definition.model, "dispatching to openrouter");
                Ok(Arc::new(self.create_openrouter(definition)))
            }
            _ => Err(GenMagicError::UnsupportedApi(definition.api.clone())),
        }
    }
}
