// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap
//!
//! Defines all command-line arguments and subcommands for gen-magic.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// gen-magic - streaming LLM chat for your terminal
#[derive(Parser, Debug)]
#[command(name = "gen-magic")]
#[command(version, about = "Streaming LLM chat backed by a local project")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Project database path (overrides settings)
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format for listings
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start interactive chat session (default when no command given)
    Chat(ChatArgs),

    /// Ask a single question (non-interactive)
    Ask(AskArgs),

    /// Model definition management
    #[command(alias = "llms")]
    Models(ModelsArgs),

    /// Agent management
    Agents(AgentsArgs),

    /// List known provider APIs
    Apis,
}

/// Arguments for the chat subcommand
#[derive(clap::Args, Debug, Default)]
pub struct ChatArgs {
    /// Model definition id to use
    #[arg(short, long)]
    pub model: Option<i64>,

    /// Agent id whose system prompt to use
    #[arg(short, long)]
    pub agent: Option<i64>,

    /// Prior turns replayed with each prompt
    #[arg(short = 'n', long)]
    pub context: Option<String>,

    /// Print token usage after each response
    #[arg(long)]
    pub usage: bool,
}

/// Arguments for the ask subcommand
#[derive(clap::Args, Debug)]
pub struct AskArgs {
    /// The question to ask
    pub prompt: String,

    /// Model definition id to use
    #[arg(short, long)]
    pub model: Option<i64>,

    /// Agent id whose system prompt to use
    #[arg(short, long)]
    pub agent: Option<i64>,

    /// PNG images to attach to the prompt
    #[arg(short, long, num_args = 1..)]
    pub image: Vec<PathBuf>,

    /// Print token usage after the response
    #[arg(long)]
    pub usage: bool,
}

/// Arguments for model definition management
#[derive(clap::Args, Debug)]
pub struct ModelsArgs {
    #[command(subcommand)]
    pub command: ModelsCommands,
}

/// Model definition subcommands
#[derive(Subcommand, Debug)]
pub enum ModelsCommands {
    /// List stored model definitions
    List,

    /// Add a model definition
    Add {
        /// Display name
        name: String,

        /// Model identifier, e.g. "openai/gpt-4o"
        #[arg(short, long)]
        model: Option<String>,

        /// Provider API kind
        #[arg(long)]
        api: Option<String>,

        /// API endpoint URL
        #[arg(long)]
        endpoint: Option<String>,

        /// API key (falls back to the environment when omitted)
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Remove a model definition
    Remove {
        /// Model definition id
        id: i64,
    },
}

/// Arguments for agent management
#[derive(clap::Args, Debug)]
pub struct AgentsArgs {
    #[command(subcommand)]
    pub command: AgentsCommands,
}

/// Agent subcommands
#[derive(Subcommand, Debug)]
pub enum AgentsCommands {
    /// List stored agents
    List,

    /// Add an agent
    Add {
        /// Display name
        name: String,

        /// System prompt
        #[arg(short, long)]
        system: Option<String>,

        /// Model definition id the agent uses
        #[arg(short, long)]
        model: Option<i64>,
    },

    /// Remove an agent
    Remove {
        /// Agent id
        id: i64,
    },
}

/// Output format
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
