//! Subscriber CLI commands
//!
//! Manages the persisted subscriber list from the command line. Every change
//! goes through the store's commit path, so it is safe to run while `watch`
//! or `bot` is running against the same file.

use anyhow::{bail, Context, Result};
use argh::FromArgs;

use crate::config::{AppConfig, DEFAULT_CONFIG_PATH};
use crate::subscribers::{ChatId, StoreError, SubscriberStore};

/// Manage auto-subscribed recipients
#[derive(FromArgs)]
#[argh(subcommand, name = "subscribers")]
pub struct SubscribersCommand {
    #[argh(subcommand)]
    action: SubscribersAction,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum SubscribersAction {
    List(ListArgs),
    Add(AddArgs),
    Remove(RemoveArgs),
}

/// List subscribers
#[derive(FromArgs)]
#[argh(subcommand, name = "list")]
struct ListArgs {
    /// path to the config file (default: config.yaml)
    #[argh(option, short = 'c', default = "String::from(DEFAULT_CONFIG_PATH)")]
    config: String,

    /// output format: table, json (default: table)
    #[argh(option, short = 'f', default = "String::from(\"table\")")]
    format: String,
}

/// Add a subscriber by chat id
#[derive(FromArgs)]
#[argh(subcommand, name = "add")]
struct AddArgs {
    /// chat id to add
    #[argh(positional)]
    chat_id: String,

    /// path to the config file (default: config.yaml)
    #[argh(option, short = 'c', default = "String::from(DEFAULT_CONFIG_PATH)")]
    config: String,
}

/// Remove a subscriber by chat id
#[derive(FromArgs)]
#[argh(subcommand, name = "remove")]
struct RemoveArgs {
    /// chat id to remove
    #[argh(positional)]
    chat_id: String,

    /// path to the config file (default: config.yaml)
    #[argh(option, short = 'c', default = "String::from(DEFAULT_CONFIG_PATH)")]
    config: String,
}

fn open_store(config_path: &str) -> Result<SubscriberStore> {
    let config = AppConfig::load(config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;
    Ok(SubscriberStore::new(config.subscribers.path))
}

fn parse_chat_id(raw: &str) -> Result<ChatId> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("chat id must not be empty");
    }
    Ok(ChatId::new(trimmed))
}

impl SubscribersCommand {
    pub async fn run(self) -> Result<()> {
        match self.action {
            SubscribersAction::List(args) => list_subscribers(args),
            SubscribersAction::Add(args) => add_subscriber(args),
            SubscribersAction::Remove(args) => remove_subscriber(args),
        }
    }
}

fn list_subscribers(args: ListArgs) -> Result<()> {
    let store = open_store(&args.config)?;
    let snapshot = match store.read_snapshot() {
        Ok(s) => s,
        Err(e @ StoreError::Corrupt { .. }) => {
            eprintln!("warning: {}", e);
            eprintln!("The file will be moved aside on the next change.");
            Default::default()
        }
        Err(e) => return Err(e.into()),
    };

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    if snapshot.is_empty() {
        println!("No subscribers in {}.", store.path().display());
        println!("Users subscribe by messaging the bot, or add one with: stormwatch subscribers add <chat-id>");
        return Ok(());
    }

    println!("{:<20} FIRST SEEN", "CHAT ID");
    println!("{}", "-".repeat(50));
    for id in &snapshot.subscribers {
        let seen = snapshot
            .first_seen(id)
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<20} {}", id, seen);
    }
    println!();
    println!("{} subscriber(s)", snapshot.len());

    Ok(())
}

fn add_subscriber(args: AddArgs) -> Result<()> {
    let chat_id = parse_chat_id(&args.chat_id)?;
    let store = open_store(&args.config)?;

    if store.add(chat_id.clone())? {
        println!("Added subscriber: {}", chat_id);
    } else {
        println!("{} is already subscribed", chat_id);
    }
    Ok(())
}

fn remove_subscriber(args: RemoveArgs) -> Result<()> {
    let chat_id = parse_chat_id(&args.chat_id)?;
    let store = open_store(&args.config)?;

    if store.remove(chat_id.clone())? {
        println!("Removed subscriber: {}", chat_id);
    } else {
        bail!("{} is not subscribed", chat_id);
    }
    Ok(())
}
