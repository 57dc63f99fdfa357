//! Interactive long-polling bot.
//!
//! Every chat that writes to the bot is subscribed (and `/stop` removes it)
//! through the same commit path the scheduled passes use, so the two
//! processes can share one subscriber file. Commands:
//!
//! - `/start`, `/help`: welcome text with the chat id
//! - `/status`: locations, enabled alerts, subscriber count
//! - `/check`: run a pass now, delivered only to the asking chat
//! - `/stop`, `/unsubscribe`: leave the subscriber list

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::alerts::message::escape;
use crate::alerts::AlertRule;
use crate::autosubscribe::{collect_changes, parse_command, UpdateSource, UPDATE_BATCH_LIMIT};
use crate::dispatch::{DeliveryOptions, MessageSender};
use crate::forecast::Location;
use crate::monitor::{cancelled, shutdown_requested, Monitor};
use crate::subscribers::ChatId;
use crate::telegram::{DeliveryError, IncomingMessage};

/// Long-poll timeout passed to `getUpdates`.
pub const POLL_TIMEOUT_SECS: u64 = 30;

/// Back-off after a failed poll.
const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    Status,
    Check,
    Stop,
}

impl BotCommand {
    pub fn parse(text: &str) -> Option<Self> {
        match parse_command(text)?.as_str() {
            "start" => Some(Self::Start),
            "help" => Some(Self::Help),
            "status" => Some(Self::Status),
            "check" => Some(Self::Check),
            "stop" | "unsubscribe" => Some(Self::Stop),
            _ => None,
        }
    }
}

pub fn help_text(chat_id: &ChatId) -> String {
    format!(
        "🌤️ *Weather alert bot*\n\n\
         I watch the forecast and message you when a configured threshold is exceeded. \
         You are subscribed.\n\n\
         *Commands:*\n\
         \u{20}\u{20}/check - check the weather now\n\
         \u{20}\u{20}/status - show the current configuration\n\
         \u{20}\u{20}/stop - unsubscribe\n\
         \u{20}\u{20}/help - show this message\n\n\
         Your chat id: `{}`",
        chat_id
    )
}

pub fn status_text(locations: &[Location], rules: &[AlertRule], subscribers: usize) -> String {
    let mut lines = vec!["📊 *Current configuration*".to_string(), String::new()];

    lines.push(format!("*Locations:* {}", locations.len()));
    for loc in locations {
        lines.push(format!("  • {}: {}", escape(&loc.name), escape(&loc.describe())));
    }
    lines.push(String::new());

    let enabled: Vec<&AlertRule> = rules.iter().filter(|r| r.enabled).collect();
    lines.push(format!("*Enabled alerts:* {}", enabled.len()));
    for rule in enabled {
        lines.push(format!(
            "  • {} (next {} day(s))",
            escape(rule.kind.kind().as_str()),
            rule.check_days_ahead
        ));
    }
    lines.push(String::new());
    lines.push(format!("*Subscribers:* {}", subscribers));

    lines.join("\n")
}

/// The interactive bot loop.
pub struct Bot {
    updates: Arc<dyn UpdateSource>,
    sender: Arc<dyn MessageSender>,
    monitor: Arc<Monitor>,
    poll_timeout_secs: u64,
    retry_delay: Duration,
}

impl Bot {
    pub fn new(updates: Arc<dyn UpdateSource>, sender: Arc<dyn MessageSender>, monitor: Arc<Monitor>) -> Self {
        Self {
            updates,
            sender,
            monitor,
            poll_timeout_secs: POLL_TIMEOUT_SECS,
            retry_delay: RETRY_DELAY,
        }
    }

    pub fn with_poll_timeout(mut self, secs: u64) -> Self {
        self.poll_timeout_secs = secs;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Poll until shutdown. Only a rejected bot token ends the loop early.
    pub async fn run(&self, mut shutdown: watch::Receiver<()>) -> Result<(), DeliveryError> {
        log::info!("[Bot] polling for messages (Ctrl+C to stop)");
        let mut offset: Option<i64> = None;

        loop {
            if shutdown_requested(&shutdown) {
                break;
            }

            let batch = tokio::select! {
                result = self.updates.fetch_updates(offset, UPDATE_BATCH_LIMIT, self.poll_timeout_secs) => result,
                _ = cancelled(&mut shutdown) => break,
            };

            let updates = match batch {
                Ok(updates) => updates,
                Err(e @ DeliveryError::Unauthorized(_)) => {
                    log::error!("[Bot] bot token rejected: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    log::warn!("[Bot] polling failed: {}; retrying in {:?}", e, self.retry_delay);
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry_delay) => continue,
                        _ = cancelled(&mut shutdown) => break,
                    }
                }
            };

            if updates.is_empty() {
                continue;
            }

            // Unacknowledged until the changes are on disk; the batch comes back.
            let (changes, last_update_id) = collect_changes(&updates);
            if let Err(e) = self.monitor.store().commit(&changes) {
                log::error!(
                    "[Bot] failed to persist subscribers: {}; retrying batch in {:?}",
                    e,
                    self.retry_delay
                );
                tokio::select! {
                    _ = tokio::time::sleep(self.retry_delay) => continue,
                    _ = cancelled(&mut shutdown) => break,
                }
            }

            for message in updates.iter().filter_map(|u| u.message.as_ref()) {
                self.handle(message, &mut shutdown).await;
                if shutdown_requested(&shutdown) {
                    break;
                }
            }

            if let Some(last) = last_update_id {
                offset = Some(last + 1);
            }
        }

        log::info!("[Bot] shutdown signal received, exiting");
        Ok(())
    }

    async fn handle(&self, message: &IncomingMessage, shutdown: &mut watch::Receiver<()>) {
        let chat_id = ChatId::from(message.chat.id);
        let Some(command) = message.text.as_deref().and_then(BotCommand::parse) else {
            return;
        };
        log::info!("[Bot] {:?} from {} ({})", command, chat_id, message.chat.display_name());

        match command {
            BotCommand::Start | BotCommand::Help => {
                self.reply(&chat_id, &help_text(&chat_id)).await;
            }
            BotCommand::Status => {
                let subscribers = self.monitor.store().snapshot().len();
                let text = status_text(self.monitor.locations(), self.monitor.rules(), subscribers);
                self.reply(&chat_id, &text).await;
            }
            BotCommand::Stop => {
                self.reply(
                    &chat_id,
                    "👋 You have been unsubscribed. Send any message to subscribe again.",
                )
                .await;
            }
            BotCommand::Check => {
                self.reply(&chat_id, "⏳ Checking weather conditions...").await;
                let summary = self.monitor.check_for(chat_id.clone(), shutdown).await;
                if summary.interrupted {
                    return;
                }
                if summary.locations_checked == 0 && !summary.location_errors.is_empty() {
                    self.reply(&chat_id, "❌ Could not fetch any forecast right now. Try again later.")
                        .await;
                } else if summary.alerts.is_empty() && !summary.report_sent {
                    self.reply(
                        &chat_id,
                        "✅ No weather alerts at this time. All conditions are within normal ranges.",
                    )
                    .await;
                }
            }
        }
    }

    async fn reply(&self, chat_id: &ChatId, text: &str) {
        if let Err(e) = self.sender.deliver(chat_id, text, DeliveryOptions::markdown()).await {
            log::warn!("[Bot] reply to {} failed: {}", chat_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::RuleKind;
    use crate::dispatch::mock::MockSender;
    use crate::forecast::{Forecast, ForecastProvider, ProviderError};
    use crate::subscribers::SubscriberStore;
    use crate::telegram::{Chat, Update};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct NoForecasts;

    #[async_trait]
    impl ForecastProvider for NoForecasts {
        async fn get_forecast(&self, location: &Location) -> Result<Forecast, ProviderError> {
            Err(ProviderError::Unavailable(location.name.clone()))
        }
    }

    /// Hands out one batch of updates, then fires shutdown on the next poll.
    struct OneBatch {
        batch: Mutex<Option<Vec<Update>>>,
        shutdown: watch::Sender<()>,
    }

    #[async_trait]
    impl UpdateSource for OneBatch {
        async fn fetch_updates(&self, _offset: Option<i64>, _limit: u32, _timeout: u64) -> Result<Vec<Update>, DeliveryError> {
            let taken = self.batch.lock().unwrap().take();
            match taken {
                Some(batch) => Ok(batch),
                None => {
                    let _ = self.shutdown.send(());
                    std::future::pending().await
                }
            }
        }
    }

    /// Hands out the same batch `polls` times, recording every offset, then
    /// fires shutdown.
    struct Redelivering {
        batch: Vec<Update>,
        polls: Mutex<usize>,
        offsets: Mutex<Vec<Option<i64>>>,
        shutdown: watch::Sender<()>,
    }

    #[async_trait]
    impl UpdateSource for Redelivering {
        async fn fetch_updates(&self, offset: Option<i64>, _limit: u32, _timeout: u64) -> Result<Vec<Update>, DeliveryError> {
            self.offsets.lock().unwrap().push(offset);
            let remaining = {
                let mut polls = self.polls.lock().unwrap();
                let remaining = *polls;
                *polls = polls.saturating_sub(1);
                remaining
            };
            if remaining > 0 {
                return Ok(self.batch.clone());
            }
            let _ = self.shutdown.send(());
            std::future::pending().await
        }
    }

    fn message(id: i64, chat: i64, text: &str) -> Update {
        Update {
            update_id: id,
            message: Some(IncomingMessage {
                message_id: id,
                chat: Chat {
                    id: chat,
                    kind: "private".to_string(),
                    username: None,
                    first_name: Some("Kim".to_string()),
                    title: None,
                },
                text: Some(text.to_string()),
                date: 1_709_535_600,
            }),
        }
    }

    #[test]
    fn command_names() {
        assert_eq!(BotCommand::parse("/start"), Some(BotCommand::Start));
        assert_eq!(BotCommand::parse("/check@storm_bot"), Some(BotCommand::Check));
        assert_eq!(BotCommand::parse("/unsubscribe"), Some(BotCommand::Stop));
        assert_eq!(BotCommand::parse("/weather"), None);
        assert_eq!(BotCommand::parse("hello"), None);
    }

    #[test]
    fn status_lists_enabled_rules_only() {
        let locations = vec![Location::city("Home_1", "London, UK")];
        let rules = vec![
            AlertRule::new(RuleKind::Wind { threshold_kmh: 50.0 }, 1),
            AlertRule::new(RuleKind::Precipitation { threshold_mm: 30.0 }, 2).disabled(),
        ];
        let text = status_text(&locations, &rules, 3);
        assert!(text.contains("*Locations:* 1"));
        assert!(text.contains("  • Home\\_1: London, UK"));
        assert!(text.contains("*Enabled alerts:* 1"));
        assert!(text.contains("  • wind (next 1 day(s))"));
        assert!(!text.contains("precipitation"));
        assert!(text.ends_with("*Subscribers:* 3"));
    }

    #[test]
    fn help_shows_chat_id() {
        assert!(help_text(&ChatId::from(42)).ends_with("Your chat id: `42`"));
    }

    #[tokio::test]
    async fn messages_subscribe_and_commands_reply() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriberStore::new(dir.path().join("subscribers.json"));
        store.add("7").unwrap();

        let sender = Arc::new(MockSender::new());
        let monitor = Arc::new(Monitor::new(
            vec![Location::city("Home", "London")],
            Vec::new(),
            Arc::new(NoForecasts),
            sender.clone(),
            store.clone(),
        ));

        let (tx, rx) = watch::channel(());
        let source = Arc::new(OneBatch {
            batch: Mutex::new(Some(vec![
                message(1, 5, "/start"),
                message(2, 6, "hi"),
                message(3, 7, "/stop"),
            ])),
            shutdown: tx,
        });

        let bot = Bot::new(source, sender.clone(), monitor);
        bot.run(rx).await.unwrap();

        assert_eq!(store.load(), vec![ChatId::from(5), ChatId::from(6)]);

        let sent = sender.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, ChatId::from(5));
        assert!(sent[0].1.contains("Your chat id: `5`"));
        assert_eq!(sent[1].0, ChatId::from(7));
        assert!(sent[1].1.contains("unsubscribed"));
    }

    #[tokio::test]
    async fn failed_commit_leaves_updates_unacknowledged() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be: every commit fails.
        let store = SubscriberStore::new(dir.path());

        let sender = Arc::new(MockSender::new());
        let monitor = Arc::new(Monitor::new(
            vec![Location::city("Home", "London")],
            Vec::new(),
            Arc::new(NoForecasts),
            sender.clone(),
            store,
        ));

        let (tx, rx) = watch::channel(());
        let source = Arc::new(Redelivering {
            batch: vec![message(1, 5, "/start")],
            polls: Mutex::new(2),
            offsets: Mutex::new(Vec::new()),
            shutdown: tx,
        });

        let bot = Bot::new(source.clone(), sender.clone(), monitor).with_retry_delay(Duration::ZERO);
        bot.run(rx).await.unwrap();

        assert_eq!(*source.offsets.lock().unwrap(), vec![None, None, None]);
        assert!(sender.sent().is_empty(), "no reply before the subscription is stored");
    }
}
