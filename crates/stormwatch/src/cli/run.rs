//! `run`, `watch` and `bot` commands.
//!
//! All three load and validate the config, resolve credentials, and build a
//! [`Monitor`] before any forecast is fetched. Configuration and credential
//! problems are returned as errors; per-location and per-recipient failures
//! only show up in the pass summary.

use anyhow::{bail, Context, Result};
use argh::FromArgs;
use std::sync::Arc;

use crate::bot::Bot;
use crate::commentary::{ClaudeClient, ClaudeError};
use crate::config::{AppConfig, DEFAULT_CONFIG_PATH};
use crate::dispatch::{ConsoleSender, MessageSender};
use crate::forecast::OpenWeatherMapClient;
use crate::monitor::{Monitor, MonitorSettings};
use crate::scheduler::run_scheduler;
use crate::subscribers::{ChatId, SubscriberStore};
use crate::telegram::{DeliveryError, TelegramClient};

/// Run one monitoring pass and exit
#[derive(FromArgs)]
#[argh(subcommand, name = "run")]
pub struct RunCommand {
    /// path to the config file (default: config.yaml)
    #[argh(option, short = 'c', default = "String::from(DEFAULT_CONFIG_PATH)")]
    config: String,

    /// send only to this chat id instead of every recipient
    #[argh(option)]
    dev_chat_id: Option<String>,

    /// print messages to stdout instead of sending them
    #[argh(switch)]
    dry_run: bool,
}

/// Run passes on the configured schedule until Ctrl+C
#[derive(FromArgs)]
#[argh(subcommand, name = "watch")]
pub struct WatchCommand {
    /// path to the config file (default: config.yaml)
    #[argh(option, short = 'c', default = "String::from(DEFAULT_CONFIG_PATH)")]
    config: String,

    /// send only to this chat id instead of every recipient
    #[argh(option)]
    dev_chat_id: Option<String>,
}

/// Run the interactive bot (long polling) until Ctrl+C
#[derive(FromArgs)]
#[argh(subcommand, name = "bot")]
pub struct BotCommand {
    /// path to the config file (default: config.yaml)
    #[argh(option, short = 'c', default = "String::from(DEFAULT_CONFIG_PATH)")]
    config: String,
}

/// Everything a command needs once config and credentials check out.
struct Prepared {
    config: AppConfig,
    telegram: Arc<TelegramClient>,
    monitor: Monitor,
}

async fn prepare(config_path: &str, dev_chat_id: Option<String>, dry_run: bool) -> Result<Prepared> {
    let config = AppConfig::load(config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;
    log::info!("[Monitor] configuration loaded from {}", config_path);

    let timeout = config.http_timeout();
    let api_key = config.openweathermap_api_key()?;
    let provider = Arc::new(OpenWeatherMapClient::new(api_key, timeout)?);
    let telegram = Arc::new(TelegramClient::new(config.telegram.bot_token.clone(), timeout)?);

    if !dry_run {
        match telegram.get_me().await {
            Ok(me) => log::info!(
                "[Monitor] connected as @{}",
                me.username.as_deref().unwrap_or(&me.first_name)
            ),
            Err(e @ DeliveryError::Unauthorized(_)) => bail!("telegram bot token rejected: {}", e),
            Err(e) => log::warn!("[Monitor] could not verify the bot token: {}", e),
        }
    }

    let settings = MonitorSettings {
        chat_ids: config.telegram.chat_ids.clone(),
        send_summary_when_quiet: config.telegram.send_summary_when_quiet,
        auto_subscribe: config.telegram.auto_subscribe,
        include_emoji: config.telegram.message_format.include_emoji,
        alert_delay: config.alert_delay(),
        dev_chat_id: dev_chat_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .map(ChatId::new),
        dry_run,
    };

    let sender: Arc<dyn MessageSender> = if dry_run {
        Arc::new(ConsoleSender)
    } else {
        telegram.clone()
    };
    let store = SubscriberStore::new(config.subscribers.path.clone());

    let mut monitor = Monitor::new(config.locations(), config.rules(), provider, sender, store)
        .with_settings(settings);
    if config.telegram.auto_subscribe {
        monitor = monitor.with_updates(telegram.clone());
    }
    if config.commentary.enabled {
        match ClaudeClient::from_env(config.commentary.clone(), timeout) {
            Ok(client) => monitor = monitor.with_commentator(Arc::new(client)),
            Err(ClaudeError::MissingApiKey) => {
                log::debug!("[Commentary] ANTHROPIC_API_KEY not set, skipping commentary")
            }
            Err(e) => log::warn!("[Commentary] disabled: {}", e),
        }
    }

    Ok(Prepared {
        config,
        telegram,
        monitor,
    })
}

impl RunCommand {
    pub async fn run(self) -> Result<()> {
        let (_shutdown_tx, mut shutdown_rx) = super::setup_shutdown()?;
        let prepared = prepare(&self.config, self.dev_chat_id, self.dry_run).await?;

        let summary = prepared.monitor.run_once(&mut shutdown_rx).await;
        summary.log();
        Ok(())
    }
}

impl WatchCommand {
    pub async fn run(self) -> Result<()> {
        let (_shutdown_tx, shutdown_rx) = super::setup_shutdown()?;
        let prepared = prepare(&self.config, self.dev_chat_id, false).await?;
        let schedule = prepared.config.schedule()?;
        let monitor = &prepared.monitor;

        let job = || {
            let mut shutdown = shutdown_rx.clone();
            async move {
                let summary = monitor.run_once(&mut shutdown).await;
                summary.log();
            }
        };
        run_scheduler(schedule, job, shutdown_rx.clone()).await;
        Ok(())
    }
}

impl BotCommand {
    pub async fn run(self) -> Result<()> {
        let (_shutdown_tx, shutdown_rx) = super::setup_shutdown()?;
        let prepared = prepare(&self.config, None, false).await?;
        if prepared.config.telegram.auto_subscribe {
            log::info!("[Bot] the bot handles subscriptions; disable telegram.auto_subscribe for any `watch` sharing this token");
        }

        let bot = Bot::new(
            prepared.telegram.clone(),
            prepared.telegram,
            Arc::new(prepared.monitor),
        );
        bot.run(shutdown_rx).await?;
        Ok(())
    }
}
