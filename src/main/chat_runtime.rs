// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use gen_magic::chat::{ChatConfig, ConsoleObserver, PendingTurn, SessionController, SessionObserver};
use gen_magic::cli::{AskArgs, ChatArgs};
use gen_magic::config::Settings;
use gen_magic::error::{GenMagicError, Result};
use gen_magic::llm::message::{Image, ModelDefinition, Turn};
use gen_magic::llm::provider::StreamEnd;
use gen_magic::llm::ProviderFactory;
use gen_magic::project::{Agent, ProjectStore, SqliteProject};

use super::cli_commands::{
    print_error, print_help, print_notice, print_response_prefix, print_user_prompt,
    print_welcome,
};

/// Project setting holding the id of the most recently used model definition
pub(super) const LAST_MODEL_SETTING: &str = "chat.last-model";

pub(super) fn open_project(settings: &Settings) -> Result<SqliteProject> {
    debug!(path = %settings.project.path.display(), "opening project");
    SqliteProject::open(&settings.project.path)
}

pub(super) fn resolve_agent(project: &SqliteProject, requested: Option<i64>) -> Result<Option<Agent>> {
    requested.map(|id| project.get_agent(id)).transpose()
}

/// Pick the model definition for a session: an explicit id wins, then the
/// agent's model, then the last one used, then the first stored.
pub(super) fn resolve_model(
    project: &SqliteProject,
    requested: Option<i64>,
    agent: Option<&Agent>,
) -> Result<ModelDefinition> {
    if let Some(id) = requested.or_else(|| agent.and_then(|a| a.model_id)) {
        return project.get_model_definition(id);
    }

    let last = project.int_setting(LAST_MODEL_SETTING, 0);
    if last > 0 {
        match project.get_model_definition(last) {
            Ok(definition) => return Ok(definition),
            Err(GenMagicError::NotFound(_)) => debug!(id = last, "last used model is gone"),
            Err(e) => return Err(e),
        }
    }

    let first = project
        .list_model_definitions()?
        .into_iter()
        .next()
        .ok_or_else(|| {
            GenMagicError::Config(
                "No model definitions found. Add one with 'gen-magic models add <name> --model <id>'."
                    .to_string(),
            )
        })?;
    project.get_model_definition(first.id)
}

pub(super) fn remember_model(project: &SqliteProject, definition: &ModelDefinition) {
    if let Some(id) = definition.id {
        if let Err(e) = project.set_int_setting(LAST_MODEL_SETTING, id) {
            warn!(error = %e, "failed to record last used model");
        }
    }
}

/// Fail fast when neither the definition nor the environment supplies a key
pub(super) fn ensure_api_key(definition: &ModelDefinition, settings: &Settings) -> Result<()> {
    if !definition.api_key.trim().is_empty() || settings.get_openrouter_api_key().is_some() {
        return Ok(());
    }
    Err(GenMagicError::Config(format!(
        "No API key for model \"{}\". Set {} or store one with 'gen-magic models add --api-key'.",
        definition.name, settings.providers.openrouter.api_key_env
    )))
}

pub(super) fn build_controller(
    settings: &Settings,
    observer: Arc<dyn SessionObserver>,
) -> SessionController {
    let factory = ProviderFactory::from_settings(settings);
    SessionController::new(Arc::new(factory), observer, ChatConfig::from_settings(settings))
}

pub(super) fn load_images(paths: &[PathBuf]) -> Result<Vec<Image>> {
    paths
        .iter()
        .map(|path| {
            let raster = image::open(path)
                .map_err(|e| GenMagicError::Decoding(format!("{}: {}", path.display(), e)))?;
            Image::from_raster(raster)
        })
        .collect()
}

/// A line typed at the chat prompt
#[derive(Debug, PartialEq, Eq)]
pub(super) enum ReplInput<'a> {
    Empty,
    Exit,
    Clear,
    Help,
    Prompt(&'a str),
}

pub(super) fn parse_repl_input(line: &str) -> ReplInput<'_> {
    let trimmed = line.trim();
    match trimmed {
        "" => ReplInput::Empty,
        "/exit" | "/quit" | "exit" | "quit" => ReplInput::Exit,
        "/clear" => ReplInput::Clear,
        "/help" => ReplInput::Help,
        _ => ReplInput::Prompt(trimmed),
    }
}

/// Read stdin on a plain thread so an idle prompt never holds up shutdown
fn spawn_input_reader() -> mpsc::Receiver<io::Result<String>> {
    let (tx, rx) = mpsc::channel(1);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        loop {
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.blocking_send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        }
    });
    rx
}

/// Wait for a turn to close, cancelling it on Ctrl-C
async fn await_turn(pending: PendingTurn) -> Result<Turn> {
    let cancel = pending.cancel_handle();
    let wait = pending.wait();
    tokio::pin!(wait);

    tokio::select! {
        biased;
        turn = &mut wait => turn,
        _ = tokio::signal::ctrl_c() => {
            debug!("interrupt received, cancelling turn");
            cancel.cancel();
            wait.await
        }
    }
}

pub(super) async fn run_chat(
    args: ChatArgs,
    settings: Settings,
    project: SqliteProject,
) -> Result<()> {
    let agent = resolve_agent(&project, args.agent)?;
    let definition = resolve_model(&project, args.model, agent.as_ref())?;
    ensure_api_key(&definition, &settings)?;
    remember_model(&project, &definition);

    let observer = ConsoleObserver::stdout().with_usage(args.usage || settings.chat.show_usage);
    let controller = build_controller(&settings, Arc::new(observer));
    let context_turns = match args.context {
        Some(ref text) => controller.parse_context_turns(text),
        None => controller.config().context_turns,
    };

    print_welcome(&definition, agent.as_ref(), context_turns)?;
    let speaker = if definition.name.is_empty() {
        definition.model.clone()
    } else {
        definition.name.clone()
    };
    controller.set_definition(definition);
    controller.set_agent(agent);

    let mut input = spawn_input_reader();
    loop {
        print_user_prompt()?;

        let line = tokio::select! {
            line = input.recv() => line,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let line = match line {
            Some(line) => line?,
            None => {
                println!();
                break;
            }
        };

        match parse_repl_input(&line) {
            ReplInput::Empty => continue,
            ReplInput::Exit => break,
            ReplInput::Help => print_help()?,
            ReplInput::Clear => {
                controller.clear_history();
                print_notice("History cleared.")?;
            }
            ReplInput::Prompt(prompt) => {
                // The prefix must be on screen before the first fragment can arrive.
                print_response_prefix(&speaker)?;
                match controller.submit(prompt, context_turns) {
                    Ok(pending) => {
                        if let Err(e) = await_turn(pending).await {
                            print_error(&e)?;
                        }
                    }
                    Err(e) => print_error(&e)?,
                }
            }
        }
    }

    debug!(turns = controller.history().len(), "chat session finished");
    println!("Goodbye!");
    Ok(())
}

pub(super) async fn run_ask(args: AskArgs, settings: Settings, project: SqliteProject) -> Result<()> {
    let agent = resolve_agent(&project, args.agent)?;
    let definition = resolve_model(&project, args.model, agent.as_ref())?;
    ensure_api_key(&definition, &settings)?;
    let images = load_images(&args.image)?;

    let observer = ConsoleObserver::stdout().with_usage(args.usage || settings.chat.show_usage);
    let controller = build_controller(&settings, Arc::new(observer));
    controller.set_definition(definition);
    controller.set_agent(agent);

    let pending = controller.submit_with_images(&args.prompt, images, 0)?;
    let turn = await_turn(pending).await?;

    match turn.outcome {
        Some(StreamEnd::Failed(reason)) => Err(GenMagicError::Connection(reason)),
        _ => Ok(()),
    }
}
