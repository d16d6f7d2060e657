// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Project records and the read interface the chat core depends on

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::llm::message::ModelDefinition;

/// A named persona bound to a model definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Store row id, if persisted
    #[serde(default)]
    pub id: Option<i64>,

    pub name: String,

    /// Model definition the agent talks through
    #[serde(default)]
    pub model_id: Option<i64>,

    /// System prompt replacing the default persona
    pub system_prompt: String,
}

impl Agent {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            model_id: None,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn with_model(mut self, model_id: i64) -> Self {
        self.model_id = Some(model_id);
        self
    }
}

/// Id and display name of a stored model definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub id: i64,
    pub name: String,
}

/// A known provider API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSummary {
    /// API kind tag, e.g. "openrouter"
    pub id: String,
    pub name: String,
}

/// Read access to stored model definitions and agents
pub trait ProjectStore {
    /// Fails with `NotFound` when no definition has this id
    fn get_model_definition(&self, id: i64) -> Result<ModelDefinition>;

    /// All definitions, in creation order
    fn list_model_definitions(&self) -> Result<Vec<ModelSummary>>;

    /// Fails with `NotFound` when no agent has this id
    fn get_agent(&self, id: i64) -> Result<Agent>;

    /// All agents, in creation order
    fn list_agents(&self) -> Result<Vec<Agent>>;
}
