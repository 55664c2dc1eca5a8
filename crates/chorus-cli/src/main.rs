//! chorus - a cast of chat personas in a local terminal room

mod commands;
mod config;
mod offline;

use anyhow::Context;
use chorus_agent::{
    ChatId, Coordinator, LocalRoom, Persona, RandomDice, RoomEvent, RoomPost, StoreHandle,
};
use chorus_ai::ChatModel;
use chorus_ai::providers::openai::OpenAIProvider;
use clap::Parser;
use commands::ConsoleCommand;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// chorus - chat personas taking turns in a shared room
#[derive(Parser, Debug)]
#[command(name = "chorus")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: $CHORUS_CONFIG_PATH or the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Chat id to start in
    #[arg(long, default_value_t = 1)]
    chat: ChatId,

    /// Name to post under
    #[arg(long, default_value = "you")]
    name: String,

    /// Use canned replies instead of calling a model
    #[arg(long)]
    offline: bool,

    /// Seed all randomness, for reproducible runs
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("chorus=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let path = args.config.clone().unwrap_or_else(config::Config::config_path);

    if args.init_config {
        let path = config::Config::init(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        println!("Config file at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let cfg = config::Config::load(&path)?;
    let model = build_model(&cfg, args.offline)?;

    let store = match args.seed {
        Some(seed) => Coordinator::spawn_with_dice(Box::new(RandomDice::seeded(seed))),
        None => Coordinator::spawn(),
    };
    let room = LocalRoom::new();
    let cancel = CancellationToken::new();
    let names: HashMap<String, String> = cfg
        .personas
        .iter()
        .map(|p| (p.id.to_string(), p.display_name.clone()))
        .collect();

    let printer = tokio::spawn(print_room(room.subscribe(), names, cancel.clone()));
    let personas = spawn_personas(&cfg, &args, &room, &store, &model, &cancel)?;

    println!(
        "{} personas in chat {}. Type :help for commands.",
        personas.len(),
        args.chat
    );
    run_console(&room, args.chat, args.name.clone(), &cancel).await?;

    cancel.cancel();
    for task in personas {
        let _ = task.await;
    }
    let _ = printer.await;
    store.shutdown().await;
    Ok(())
}

fn build_model(cfg: &config::Config, offline: bool) -> anyhow::Result<Arc<dyn ChatModel>> {
    if offline {
        return Ok(Arc::new(offline::OfflineModel::new()));
    }
    let Some(api_key) = cfg.api_key() else {
        anyhow::bail!(
            "no API key: set {} or [model].api_key, or run with --offline",
            config::API_KEY_ENV
        );
    };
    let mut provider = OpenAIProvider::new(api_key);
    if let Some(base_url) = &cfg.model.base_url {
        provider = provider.with_base_url(base_url.clone());
    }
    Ok(Arc::new(provider))
}

fn spawn_personas(
    cfg: &config::Config,
    args: &Args,
    room: &LocalRoom,
    store: &StoreHandle,
    model: &Arc<dyn ChatModel>,
    cancel: &CancellationToken,
) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let mut tasks = Vec::new();
    for (i, settings) in cfg.persona_settings().into_iter().enumerate() {
        let id = settings.persona.id.clone();
        let handle = settings.persona.handle.clone();
        let transport = Arc::new(room.member(id.clone()));
        let persona = match args.seed {
            Some(seed) => {
                let dice = RandomDice::seeded(seed.wrapping_add(i as u64 + 1));
                Persona::with_dice(settings, store.clone(), model.clone(), transport, Box::new(dice))
            }
            None => Persona::new(settings, store.clone(), model.clone(), transport),
        }
        .with_context(|| format!("failed to set up persona '{}'", id))?;

        let inbox = room.attach(id, handle);
        tasks.push(tokio::spawn(persona.run(inbox, cancel.clone())));
    }
    Ok(tasks)
}

async fn print_room(
    mut events: broadcast::Receiver<RoomEvent>,
    names: HashMap<String, String>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(RoomEvent::Post(post)) if post.sender_is_bot => {
                let name = names.get(&post.sender_id).unwrap_or(&post.sender_id);
                println!("[chat {}] {}: {}", post.chat_id, name, post.text);
            }
            Ok(RoomEvent::Typing { chat_id, sender_id }) => {
                let name = names.get(&sender_id).unwrap_or(&sender_id);
                println!("[chat {}] {} is typing...", chat_id, name);
            }
            Ok(RoomEvent::Post(_)) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "console fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn run_console(
    room: &LocalRoom,
    mut chat_id: ChatId,
    mut name: String,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };

        match commands::parse(&line) {
            ConsoleCommand::Say(text) => room.post(RoomPost::human(chat_id, name.clone(), text)),
            ConsoleCommand::Reply { persona, text } => {
                room.post(RoomPost::human(chat_id, name.clone(), text).replying_to(persona));
            }
            ConsoleCommand::SwitchChat(id) => {
                chat_id = id;
                println!("Now in chat {}", chat_id);
            }
            ConsoleCommand::Rename(new_name) => {
                name = new_name;
                println!("Posting as {}", name);
            }
            ConsoleCommand::Help => println!("{}", commands::help_message()),
            ConsoleCommand::Quit => break,
            ConsoleCommand::Empty => {}
            ConsoleCommand::Invalid(message) => eprintln!("{}", message),
        }
    }
    Ok(())
}
