// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::io::{self, Write};

use crossterm::{
    style::{Color, ResetColor, SetForegroundColor},
    ExecutableCommand,
};
use serde::Serialize;

use gen_magic::cli::{AgentsArgs, AgentsCommands, ModelsArgs, ModelsCommands, OutputFormat};
use gen_magic::error::{GenMagicError, Result};
use gen_magic::llm::message::ModelDefinition;
use gen_magic::project::{Agent, ProjectStore, SqliteProject};

/// Print the colored "you: " prompt
pub(super) fn print_user_prompt() -> Result<()> {
    let mut stdout = io::stdout();
    stdout.execute(SetForegroundColor(Color::Green))?;
    print!("you: ");
    stdout.execute(ResetColor)?;
    stdout.flush()?;
    Ok(())
}

/// Print the speaker label the streamed response follows
pub(super) fn print_response_prefix(speaker: &str) -> Result<()> {
    let mut stdout = io::stdout();
    stdout.execute(SetForegroundColor(Color::Cyan))?;
    print!("\n{}: ", speaker);
    stdout.execute(ResetColor)?;
    stdout.flush()?;
    Ok(())
}

pub(super) fn print_error(err: &GenMagicError) -> Result<()> {
    let mut stdout = io::stdout();
    stdout.execute(SetForegroundColor(Color::Red))?;
    println!("\nError: {}", err);
    stdout.execute(ResetColor)?;
    Ok(())
}

pub(super) fn print_notice(text: &str) -> Result<()> {
    let mut stdout = io::stdout();
    stdout.execute(SetForegroundColor(Color::DarkGrey))?;
    println!("{}", text);
    stdout.execute(ResetColor)?;
    Ok(())
}

pub(super) fn print_welcome(
    definition: &ModelDefinition,
    agent: Option<&Agent>,
    context_turns: usize,
) -> Result<()> {
    let mut stdout = io::stdout();
    stdout.execute(SetForegroundColor(Color::Cyan))?;
    println!("gen-magic v{}", env!("CARGO_PKG_VERSION"));
    stdout.execute(ResetColor)?;

    println!("  model:   {} ({}, {})", display_name(definition), definition.model, definition.api);
    if let Some(agent) = agent {
        println!("  agent:   {}", agent.name);
    }
    println!("  context: {} prior turns", context_turns);
    print_notice("Type /help for commands, Ctrl-C cancels a response.")?;
    println!();
    Ok(())
}

pub(super) fn print_help() -> Result<()> {
    println!();
    println!("Commands:");
    println!("  /clear   Forget earlier turns");
    println!("  /help    Show this help");
    println!("  /exit    Leave the session");
    println!();
    print_notice("Ctrl-C cancels a streaming response; at the prompt it exits.")
}

fn display_name(definition: &ModelDefinition) -> &str {
    if definition.name.is_empty() {
        &definition.model
    } else {
        &definition.name
    }
}

/// Listing view of a model definition; never carries the key itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(super) struct ModelView {
    pub(super) id: Option<i64>,
    pub(super) name: String,
    pub(super) api: String,
    pub(super) endpoint: String,
    pub(super) model: String,
    pub(super) has_api_key: bool,
}

impl From<&ModelDefinition> for ModelView {
    fn from(def: &ModelDefinition) -> Self {
        Self {
            id: def.id,
            name: def.name.clone(),
            api: def.api.clone(),
            endpoint: def.api_endpoint.clone(),
            model: def.model.clone(),
            has_api_key: !def.api_key.is_empty(),
        }
    }
}

pub(super) fn describe_models(project: &SqliteProject) -> Result<Vec<ModelView>> {
    project
        .list_model_definitions()?
        .iter()
        .map(|summary| {
            project
                .get_model_definition(summary.id)
                .map(|def| ModelView::from(&def))
        })
        .collect()
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Create a definition from CLI values. The placeholder row is removed again
/// when the values are rejected.
pub(super) fn add_model(
    project: &SqliteProject,
    name: String,
    model: Option<String>,
    api: Option<String>,
    endpoint: Option<String>,
    api_key: Option<String>,
) -> Result<ModelDefinition> {
    let mut def = project.new_model_definition()?;
    def.name = name;
    if let Some(model) = model {
        def.model = model;
    }
    if let Some(api) = api {
        def.api = api.trim().to_lowercase();
    }
    if let Some(endpoint) = endpoint {
        def.api_endpoint = endpoint;
    }
    if let Some(key) = api_key {
        def.api_key = key;
    }

    if let Err(e) = project.set_model_definition(&def) {
        if let Some(id) = def.id {
            project.delete_model_definition(id)?;
        }
        return Err(e);
    }
    Ok(def)
}

pub(super) fn add_agent(
    project: &SqliteProject,
    name: String,
    system: Option<String>,
    model: Option<i64>,
) -> Result<Agent> {
    if let Some(model_id) = model {
        // Surface a missing model as NotFound instead of a foreign key failure
        project.get_model_definition(model_id)?;
    }

    let mut agent = project.new_agent()?;
    agent.name = name;
    if let Some(system) = system {
        agent.system_prompt = system;
    }
    agent.model_id = model;
    project.set_agent(&agent)?;
    Ok(agent)
}

pub(super) fn run_models_command(
    args: ModelsArgs,
    project: &SqliteProject,
    format: OutputFormat,
) -> Result<()> {
    match args.command {
        ModelsCommands::List => {
            let models = describe_models(project)?;
            if format == OutputFormat::Json {
                return print_json(&models);
            }
            if models.is_empty() {
                println!("No model definitions. Add one with 'gen-magic models add <name>'.");
                return Ok(());
            }
            for m in &models {
                println!(
                    "{:>4}  {:<24} {:<12} {}{}",
                    m.id.unwrap_or_default(),
                    m.name,
                    m.api,
                    m.model,
                    if m.has_api_key { "  [key]" } else { "" }
                );
            }
        }
        ModelsCommands::Add {
            name,
            model,
            api,
            endpoint,
            api_key,
        } => {
            let def = add_model(project, name, model, api, endpoint, api_key)?;
            let view = ModelView::from(&def);
            if format == OutputFormat::Json {
                return print_json(&view);
            }
            println!(
                "Added model definition {} ({})",
                view.id.unwrap_or_default(),
                view.name
            );
        }
        ModelsCommands::Remove { id } => {
            project.delete_model_definition(id)?;
            if format == OutputFormat::Text {
                println!("Removed model definition {}", id);
            }
        }
    }
    Ok(())
}

pub(super) fn run_agents_command(
    args: AgentsArgs,
    project: &SqliteProject,
    format: OutputFormat,
) -> Result<()> {
    match args.command {
        AgentsCommands::List => {
            let agents = project.list_agents()?;
            if format == OutputFormat::Json {
                return print_json(&agents);
            }
            if agents.is_empty() {
                println!("No agents. Add one with 'gen-magic agents add <name>'.");
                return Ok(());
            }
            for agent in &agents {
                let model = agent
                    .model_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:>4}  {:<24} model {:<4} {}",
                    agent.id.unwrap_or_default(),
                    agent.name,
                    model,
                    first_line(&agent.system_prompt)
                );
            }
        }
        AgentsCommands::Add {
            name,
            system,
            model,
        } => {
            let agent = add_agent(project, name, system, model)?;
            if format == OutputFormat::Json {
                return print_json(&agent);
            }
            println!(
                "Added agent {} ({})",
                agent.id.unwrap_or_default(),
                agent.name
            );
        }
        AgentsCommands::Remove { id } => {
            project.delete_agent(id)?;
            if format == OutputFormat::Text {
                println!("Removed agent {}", id);
            }
        }
    }
    Ok(())
}

pub(super) fn run_apis_command(project: &SqliteProject, format: OutputFormat) -> Result<()> {
    let apis = project.list_apis()?;
    if format == OutputFormat::Json {
        return print_json(&apis);
    }
    for api in &apis {
        println!("{:<12} {}", api.id, api.name);
    }
    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}
