// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! gen-magic - streaming LLM chat for your terminal
//!
//! Entry point for the gen-magic CLI application.

use clap::Parser;
use tracing::warn;

use gen_magic::cli::{ChatArgs, Cli, Commands};
use gen_magic::config::Settings;
use gen_magic::error::Result;

#[path = "main/chat_runtime.rs"]
mod chat_runtime;
#[path = "main/cli_commands.rs"]
mod cli_commands;

use chat_runtime::{open_project, run_ask, run_chat};
use cli_commands::{run_agents_command, run_apis_command, run_models_command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    // Load settings
    let mut settings = match cli.config {
        Some(ref path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    for warning in settings.validate()? {
        warn!("{}", warning);
    }
    if let Some(ref path) = cli.project {
        settings.project.path = path.clone();
    }

    let project = open_project(&settings)?;

    // Dispatch to appropriate command
    match cli.command {
        None => run_chat(ChatArgs::default(), settings, project).await?,
        Some(Commands::Chat(args)) => run_chat(args, settings, project).await?,
        Some(Commands::Ask(args)) => run_ask(args, settings, project).await?,
        Some(Commands::Models(args)) => run_models_command(args, &project, cli.format)?,
        Some(Commands::Agents(args)) => run_agents_command(args, &project, cli.format)?,
        Some(Commands::Apis) => run_apis_command(&project, cli.format)?,
    }

    Ok(())
}

/// Logs go to stderr so streamed responses on stdout stay clean.
/// `RUST_LOG` directives are kept; `-v`/`-vv` raise this crate's level.
fn init_tracing(verbose: u8) {
    let mut env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::Level::WARN.into())
        .from_env_lossy();

    let directive = match verbose {
        0 => None,
        1 => Some("gen_magic=debug"),
        _ => Some("gen_magic=trace"),
    };
    if let Some(directive) = directive {
        if let Ok(parsed) = directive.parse() {
            env_filter = env_filter.add_directive(parsed);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
