//! Auto-subscribe: turn pending bot messages into subscriber changes.
//!
//! Anyone who writes to the bot is subscribed; `/stop` or `/unsubscribe`
//! removes them. The latest message from a chat decides. Changes are
//! committed through the store's read-merge-write path and only then are the
//! updates acknowledged, so a failed commit leaves them pending for the next
//! pass.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::subscribers::{Changes, ChatId, CommitReport, StoreError, Subscriber, SubscriberStore};
use crate::telegram::{DeliveryError, Update};

/// Maximum updates fetched per pass.
pub const UPDATE_BATCH_LIMIT: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum AutoSubscribeError {
    #[error("failed to fetch updates: {0}")]
    Fetch(#[from] DeliveryError),
    #[error("failed to persist subscribers: {0}")]
    Store(#[from] StoreError),
}

/// Source of pending bot updates.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// `offset = last_update_id + 1` acknowledges everything before it.
    async fn fetch_updates(&self, offset: Option<i64>, limit: u32, poll_timeout_secs: u64) -> Result<Vec<Update>, DeliveryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Subscribe,
    Unsubscribe,
}

/// Extract a bot command name: `/Stop@storm_bot now` -> `stop`.
pub fn parse_command(text: &str) -> Option<String> {
    let first = text.split_whitespace().next()?;
    let name = first.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or(name);
    if name.is_empty() {
        return None;
    }
    Some(name.to_lowercase())
}

/// What a message means for its chat's subscription.
pub fn intent_for(text: Option<&str>) -> Intent {
    match text.and_then(parse_command).as_deref() {
        Some("stop") | Some("unsubscribe") => Intent::Unsubscribe,
        _ => Intent::Subscribe,
    }
}

/// Fold a batch of updates into subscriber changes.
///
/// Returns the changes and the highest update id seen, if any.
pub fn collect_changes(updates: &[Update]) -> (Changes, Option<i64>) {
    let mut changes = Changes::new();
    let mut last_update_id = None;

    for update in updates {
        last_update_id = Some(last_update_id.map_or(update.update_id, |id: i64| id.max(update.update_id)));
        let Some(message) = &update.message else {
            continue;
        };
        let chat_id = ChatId::from(message.chat.id);
        match intent_for(message.text.as_deref()) {
            Intent::Subscribe => {
                let seen = DateTime::from_timestamp(message.date, 0).unwrap_or_else(Utc::now);
                log::debug!(
                    "[Subscribers] {} ({}) wrote to the bot",
                    chat_id,
                    message.chat.display_name()
                );
                changes.add(Subscriber::new(chat_id, seen));
            }
            Intent::Unsubscribe => {
                log::debug!("[Subscribers] {} asked to unsubscribe", chat_id);
                changes.remove(chat_id);
            }
        }
    }

    (changes, last_update_id)
}

/// Outcome of one auto-subscribe pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutoSubscribeOutcome {
    pub updates: usize,
    pub commit: CommitReport,
}

/// Drain pending updates, commit the resulting changes, then acknowledge.
pub async fn process_pending(source: &dyn UpdateSource, store: &SubscriberStore) -> Result<AutoSubscribeOutcome, AutoSubscribeError> {
    let updates = source.fetch_updates(None, UPDATE_BATCH_LIMIT, 0).await?;
    if updates.is_empty() {
        log::debug!("[Subscribers] no pending bot messages");
        return Ok(AutoSubscribeOutcome::default());
    }

    let (changes, last_update_id) = collect_changes(&updates);
    let commit = store.commit(&changes)?;

    if !commit.added.is_empty() {
        log::info!("[Subscribers] {} new subscriber(s)", commit.added.len());
    }
    if !commit.removed.is_empty() {
        log::info!("[Subscribers] {} unsubscribed", commit.removed.len());
    }

    if let Some(last) = last_update_id {
        if let Err(e) = source.fetch_updates(Some(last + 1), 1, 0).await {
            log::warn!("[Subscribers] failed to acknowledge updates up to {}: {}", last, e);
        } else {
            log::debug!("[Subscribers] acknowledged updates (offset {})", last + 1);
        }
    }

    Ok(AutoSubscribeOutcome {
        updates: updates.len(),
        commit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::{Chat, IncomingMessage};
    use std::sync::Mutex;

    fn update(id: i64, chat: i64, text: &str) -> Update {
        Update {
            update_id: id,
            message: Some(IncomingMessage {
                message_id: id,
                chat: Chat {
                    id: chat,
                    kind: "private".to_string(),
                    username: None,
                    first_name: Some("Test".to_string()),
                    title: None,
                },
                text: Some(text.to_string()),
                date: 1_709_535_600,
            }),
        }
    }

    struct ScriptedSource {
        pending: Vec<Update>,
        calls: Mutex<Vec<Option<i64>>>,
    }

    #[async_trait]
    impl UpdateSource for ScriptedSource {
        async fn fetch_updates(&self, offset: Option<i64>, _limit: u32, _timeout: u64) -> Result<Vec<Update>, DeliveryError> {
            self.calls.lock().unwrap().push(offset);
            Ok(match offset {
                None => self.pending.clone(),
                Some(_) => Vec::new(),
            })
        }
    }

    #[test]
    fn command_parsing() {
        assert_eq!(parse_command("/start").as_deref(), Some("start"));
        assert_eq!(parse_command("  /Stop@storm_bot please").as_deref(), Some("stop"));
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("/"), None);
    }

    #[test]
    fn intents() {
        assert_eq!(intent_for(Some("/unsubscribe")), Intent::Unsubscribe);
        assert_eq!(intent_for(Some("hi there")), Intent::Subscribe);
        assert_eq!(intent_for(None), Intent::Subscribe);
    }

    #[test]
    fn last_message_per_chat_wins() {
        let updates = vec![
            update(10, 1, "/start"),
            update(11, 2, "hello"),
            update(12, 1, "/stop"),
            update(13, 2, "/stop"),
            update(14, 2, "changed my mind"),
        ];
        let (changes, last) = collect_changes(&updates);
        assert_eq!(last, Some(14));
        assert_eq!(changes.removed, vec![ChatId::from(1)]);
        assert_eq!(changes.added.len(), 1);
        assert_eq!(changes.added[0].chat_id, ChatId::from(2));
    }

    #[tokio::test]
    async fn commits_then_acknowledges() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriberStore::new(dir.path().join("subscribers.json"));
        store.add("999").unwrap();

        let source = ScriptedSource {
            pending: vec![update(40, 123, "/start"), update(41, 999, "/stop")],
            calls: Mutex::new(Vec::new()),
        };
        let outcome = process_pending(&source, &store).await.unwrap();

        assert_eq!(outcome.updates, 2);
        assert_eq!(outcome.commit.added, vec![ChatId::from(123)]);
        assert_eq!(outcome.commit.removed, vec![ChatId::from(999)]);
        assert_eq!(store.load(), vec![ChatId::from(123)]);
        assert_eq!(*source.calls.lock().unwrap(), vec![None, Some(42)]);
    }

    #[tokio::test]
    async fn nothing_pending_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SubscriberStore::new(dir.path().join("subscribers.json"));
        let source = ScriptedSource {
            pending: Vec::new(),
            calls: Mutex::new(Vec::new()),
        };
        let outcome = process_pending(&source, &store).await.unwrap();
        assert_eq!(outcome.updates, 0);
        assert!(!store.path().exists());
        assert_eq!(source.calls.lock().unwrap().len(), 1);
    }
}
