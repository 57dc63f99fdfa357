//! Per-recipient message delivery.
//!
//! A broadcast is a sequence of independent deliveries: one recipient
//! failing never stops delivery to the rest. Results are aggregated into a
//! [`DeliveryReport`], which is what gets reported to the operator.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::alerts::{message, AlertRecord};
use crate::subscribers::ChatId;
use crate::telegram::DeliveryError;

/// Pause between consecutive alerts, to stay under Bot API rate limits.
pub const DEFAULT_ALERT_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageFormat {
    #[default]
    Markdown,
    Html,
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryOptions {
    pub format: MessageFormat,
    /// Deliver without an audible notification.
    pub silent: bool,
}

impl DeliveryOptions {
    pub fn markdown() -> Self {
        Self::default()
    }

    pub fn html() -> Self {
        Self {
            format: MessageFormat::Html,
            silent: false,
        }
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }
}

/// Anything that can deliver a text message to one chat.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn deliver(&self, chat_id: &ChatId, text: &str, options: DeliveryOptions) -> Result<(), DeliveryError>;
}

/// Aggregate outcome of one or more broadcasts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReport {
    pub delivered: BTreeSet<ChatId>,
    pub failed: BTreeMap<ChatId, DeliveryError>,
    /// Shutdown arrived before every delivery was attempted.
    pub interrupted: bool,
}

impl DeliveryReport {
    /// Fold another report in. A chat counts as delivered if any message
    /// reached it; its latest failure is kept only if none did.
    pub fn merge(&mut self, other: DeliveryReport) {
        for chat in other.delivered {
            self.failed.remove(&chat);
            self.delivered.insert(chat);
        }
        for (chat, err) in other.failed {
            if !self.delivered.contains(&chat) {
                self.failed.insert(chat, err);
            }
        }
        self.interrupted |= other.interrupted;
    }

    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty() && self.failed.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Sends alerts and reports to a recipient list through a [`MessageSender`].
pub struct Dispatcher {
    sender: Arc<dyn MessageSender>,
    alert_delay: Duration,
    use_emoji: bool,
    shutdown: Option<watch::Receiver<()>>,
}

impl Dispatcher {
    pub fn new(sender: Arc<dyn MessageSender>) -> Self {
        Self {
            sender,
            alert_delay: DEFAULT_ALERT_DELAY,
            use_emoji: true,
            shutdown: None,
        }
    }

    pub fn with_alert_delay(mut self, delay: Duration) -> Self {
        self.alert_delay = delay;
        self
    }

    pub fn with_emoji(mut self, use_emoji: bool) -> Self {
        self.use_emoji = use_emoji;
        self
    }

    /// Abort in-flight and remaining deliveries when this fires.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Deliver `text` to every recipient, in order.
    pub async fn broadcast(&self, recipients: &[ChatId], text: &str, options: DeliveryOptions) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut shutdown = self.shutdown.clone();

        for chat_id in recipients {
            if shutdown_requested(&shutdown) {
                log::warn!("[Dispatch] shutdown requested, skipping remaining recipients");
                report.interrupted = true;
                break;
            }
            let outcome = tokio::select! {
                result = self.sender.deliver(chat_id, text, options) => Some(result),
                _ = wait_for_shutdown(&mut shutdown) => None,
            };
            match outcome {
                Some(Ok(())) => {
                    log::debug!("[Dispatch] delivered to {}", chat_id);
                    report.failed.remove(chat_id);
                    report.delivered.insert(chat_id.clone());
                }
                Some(Err(e)) => {
                    log::warn!("[Dispatch] delivery to {} failed: {}", chat_id, e);
                    if !report.delivered.contains(chat_id) {
                        report.failed.insert(chat_id.clone(), e);
                    }
                }
                None => {
                    log::warn!("[Dispatch] shutdown requested, skipping remaining recipients");
                    report.interrupted = true;
                    break;
                }
            }
        }

        report
    }

    /// Broadcast each alert in turn, pausing between alerts.
    ///
    /// High and Severe alerts notify audibly; the rest are delivered silently.
    pub async fn send_alerts(&self, alerts: &[AlertRecord], recipients: &[ChatId]) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut shutdown = self.shutdown.clone();

        for (i, alert) in alerts.iter().enumerate() {
            if i > 0 && !self.alert_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.alert_delay) => {}
                    _ = wait_for_shutdown(&mut shutdown) => {
                        report.interrupted = true;
                        break;
                    }
                }
            }

            let text = if self.use_emoji {
                alert.message_text.clone()
            } else {
                message::render(alert, false)
            };
            let options = DeliveryOptions::markdown().silent(!alert.severity.is_loud());

            log::info!(
                "[Dispatch] sending {} alert for {} to {} recipient(s)",
                alert.kind,
                alert.location_name,
                recipients.len()
            );
            let sent = self.broadcast(recipients, &text, options).await;
            let interrupted = sent.interrupted;
            report.merge(sent);
            if interrupted {
                break;
            }
        }

        report
    }
}

fn shutdown_requested(shutdown: &Option<watch::Receiver<()>>) -> bool {
    shutdown
        .as_ref()
        .is_some_and(|rx| rx.has_changed().unwrap_or(false))
}

/// Resolves when shutdown is signalled. Never resolves without a receiver,
/// or once the sender is gone.
async fn wait_for_shutdown(shutdown: &mut Option<watch::Receiver<()>>) {
    match shutdown {
        Some(rx) => {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

/// Prints messages to stdout instead of sending them. Used by `--dry-run`.
#[derive(Debug, Default)]
pub struct ConsoleSender;

#[async_trait]
impl MessageSender for ConsoleSender {
    async fn deliver(&self, chat_id: &ChatId, text: &str, options: DeliveryOptions) -> Result<(), DeliveryError> {
        println!(
            "── to {} ({:?}{}) ──",
            chat_id,
            options.format,
            if options.silent { ", silent" } else { "" }
        );
        println!("{}", text);
        println!();
        Ok(())
    }
}

// ── MockSender for testing ──────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::mock::MockSender;
    use super::*;
    use crate::alerts::{AlertKind, Severity};
    use chrono::NaiveDate;

    fn ids(list: &[&str]) -> Vec<ChatId> {
        list.iter().map(|s| ChatId::from(*s)).collect()
    }

    fn alert(kind: AlertKind, severity: Severity) -> AlertRecord {
        AlertRecord {
            location_name: "Home".to_string(),
            kind,
            day_offset: 1,
            date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            severity,
            triggering_values: Default::default(),
            matched_conditions: Vec::new(),
            headline: "Something is coming".to_string(),
            message_text: "rendered".to_string(),
        }
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_broadcast() {
        let sender = Arc::new(MockSender::new().fail_for("123", DeliveryError::Blocked("blocked".into())));
        let dispatcher = Dispatcher::new(sender.clone());

        let report = dispatcher
            .broadcast(&ids(&["123", "456"]), "hello", DeliveryOptions::markdown())
            .await;

        assert_eq!(report.delivered, ids(&["456"]).into_iter().collect());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[&ChatId::from("123")].reason(), "blocked");
        assert_eq!(sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn alerts_go_to_everyone_with_severity_based_silence() {
        let sender = Arc::new(MockSender::new());
        let dispatcher = Dispatcher::new(sender.clone()).with_alert_delay(Duration::ZERO);
        let alerts = vec![
            alert(AlertKind::Wind, Severity::Moderate),
            alert(AlertKind::Storm, Severity::Severe),
        ];

        let report = dispatcher.send_alerts(&alerts, &ids(&["1", "2"])).await;
        assert_eq!(report.delivered.len(), 2);
        assert!(!report.has_failures());

        let sent = sender.sent();
        assert_eq!(sent.len(), 4);
        assert!(sent[0].2.silent);
        assert!(!sent[2].2.silent);
    }

    #[tokio::test]
    async fn emoji_free_rendering_replaces_cached_text() {
        let sender = Arc::new(MockSender::new());
        let dispatcher = Dispatcher::new(sender.clone())
            .with_alert_delay(Duration::ZERO)
            .with_emoji(false);
        dispatcher
            .send_alerts(&[alert(AlertKind::Wind, Severity::High)], &ids(&["1"]))
            .await;
        assert!(sender.sent()[0].1.starts_with("*WIND ALERT* [HIGH]"));
    }

    #[test]
    fn merge_prefers_any_success() {
        let mut report = DeliveryReport::default();
        report
            .failed
            .insert(ChatId::from("1"), DeliveryError::Network("timeout".into()));

        let mut later = DeliveryReport::default();
        later.delivered.insert(ChatId::from("1"));
        later
            .failed
            .insert(ChatId::from("2"), DeliveryError::RateLimit { retry_after: None });
        report.merge(later);

        let mut last = DeliveryReport::default();
        last.failed
            .insert(ChatId::from("1"), DeliveryError::Network("reset".into()));
        report.merge(last);

        assert!(report.delivered.contains(&ChatId::from("1")));
        assert!(!report.failed.contains_key(&ChatId::from("1")));
        assert_eq!(report.failed[&ChatId::from("2")].reason(), "rate_limit");
    }

    #[tokio::test]
    async fn shutdown_skips_remaining_recipients() {
        let sender = Arc::new(MockSender::new());
        let (tx, rx) = watch::channel(());
        tx.send(()).unwrap();
        let dispatcher = Dispatcher::new(sender.clone()).with_shutdown(rx);

        let report = dispatcher
            .broadcast(&ids(&["1", "2"]), "hello", DeliveryOptions::markdown())
            .await;
        assert!(report.interrupted);
        assert!(report.delivered.is_empty());
        assert!(sender.sent().is_empty());
        drop(tx);
    }
}
