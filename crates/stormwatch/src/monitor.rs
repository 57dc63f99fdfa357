//! One monitoring pass: subscribe, fetch, evaluate, deliver.
//!
//! Per-item failures (one location, one recipient) are logged with the item
//! key and folded into the [`RunSummary`]; the pass itself always completes
//! unless shutdown interrupts it.

use chrono::{Local, NaiveDate};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::alerts::{evaluate, AlertRecord, AlertRule};
use crate::autosubscribe::{process_pending, UpdateSource};
use crate::commentary::{build_context, Commentator};
use crate::dispatch::{DeliveryOptions, DeliveryReport, Dispatcher, MessageSender, DEFAULT_ALERT_DELAY};
use crate::forecast::{Forecast, ForecastProvider, Location, ProviderError};
use crate::report;
use crate::subscribers::{ChatId, SubscriberStore};

/// Pseudo-recipient used by dry runs when nobody is subscribed yet.
const DRY_RUN_RECIPIENT: &str = "dry-run";

/// Pass-level switches, mostly from the `telegram:` config section.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Always-included recipients, before persisted subscribers.
    pub chat_ids: Vec<ChatId>,
    pub send_summary_when_quiet: bool,
    pub auto_subscribe: bool,
    pub include_emoji: bool,
    pub alert_delay: Duration,
    /// Send only to this chat instead of the full recipient list.
    pub dev_chat_id: Option<ChatId>,
    pub dry_run: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            chat_ids: Vec::new(),
            send_summary_when_quiet: true,
            auto_subscribe: true,
            include_emoji: true,
            alert_delay: DEFAULT_ALERT_DELAY,
            dev_chat_id: None,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// No alerts and no errors.
    Quiet,
    /// Alerts fired and every check succeeded.
    Alerted,
    /// Some location or recipient failed.
    Degraded,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quiet => f.write_str("quiet"),
            Self::Alerted => f.write_str("alerted"),
            Self::Degraded => f.write_str("degraded"),
        }
    }
}

/// Aggregate result of one pass, reported to the operator.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Locations whose forecast was fetched and evaluated.
    pub locations_checked: usize,
    pub location_errors: BTreeMap<String, ProviderError>,
    pub alerts: Vec<AlertRecord>,
    pub recipients: Vec<ChatId>,
    pub delivery: DeliveryReport,
    pub new_subscribers: Vec<ChatId>,
    /// A weather report went out instead of alerts.
    pub report_sent: bool,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn outcome(&self) -> RunOutcome {
        if !self.location_errors.is_empty() || self.delivery.has_failures() {
            RunOutcome::Degraded
        } else if !self.alerts.is_empty() {
            RunOutcome::Alerted
        } else {
            RunOutcome::Quiet
        }
    }

    /// Log the summary at a level matching its outcome.
    pub fn log(&self) {
        let outcome = self.outcome();
        let line = format!(
            "[Monitor] pass {}: {} location(s) checked, {} failed, {} alert(s), {} delivered, {} failed deliveries{}",
            outcome,
            self.locations_checked,
            self.location_errors.len(),
            self.alerts.len(),
            self.delivery.delivered.len(),
            self.delivery.failed.len(),
            if self.interrupted { " (interrupted)" } else { "" }
        );
        match outcome {
            RunOutcome::Degraded => log::warn!("{}", line),
            _ => log::info!("{}", line),
        }
        for (name, err) in &self.location_errors {
            log::warn!("[Monitor]   location {}: {} ({})", name, err, err.reason());
        }
        for (chat, err) in &self.delivery.failed {
            log::warn!("[Monitor]   recipient {}: {} ({})", chat, err, err.reason());
        }
    }
}

/// Runs monitoring passes over a fixed set of locations and rules.
pub struct Monitor {
    locations: Vec<Location>,
    rules: Vec<AlertRule>,
    provider: Arc<dyn ForecastProvider>,
    sender: Arc<dyn MessageSender>,
    updates: Option<Arc<dyn UpdateSource>>,
    commentator: Option<Arc<dyn Commentator>>,
    store: SubscriberStore,
    settings: MonitorSettings,
}

impl Monitor {
    pub fn new(
        locations: Vec<Location>,
        rules: Vec<AlertRule>,
        provider: Arc<dyn ForecastProvider>,
        sender: Arc<dyn MessageSender>,
        store: SubscriberStore,
    ) -> Self {
        Self {
            locations,
            rules,
            provider,
            sender,
            updates: None,
            commentator: None,
            store,
            settings: MonitorSettings::default(),
        }
    }

    /// Enable auto-subscribe from this update source.
    pub fn with_updates(mut self, updates: Arc<dyn UpdateSource>) -> Self {
        self.updates = Some(updates);
        self
    }

    pub fn with_commentator(mut self, commentator: Arc<dyn Commentator>) -> Self {
        self.commentator = Some(commentator);
        self
    }

    pub fn with_settings(mut self, settings: MonitorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn store(&self) -> &SubscriberStore {
        &self.store
    }

    /// One full pass to the configured recipients.
    pub async fn run_once(&self, shutdown: &mut watch::Receiver<()>) -> RunSummary {
        self.run_pass(shutdown, None).await
    }

    /// One pass delivered only to `chat_id`, without auto-subscribe.
    pub async fn check_for(&self, chat_id: ChatId, shutdown: &mut watch::Receiver<()>) -> RunSummary {
        self.run_pass(shutdown, Some(vec![chat_id])).await
    }

    async fn run_pass(&self, shutdown: &mut watch::Receiver<()>, only: Option<Vec<ChatId>>) -> RunSummary {
        let mut summary = RunSummary::default();

        // ── Auto-subscribe ──
        if only.is_none() && self.settings.auto_subscribe && !self.settings.dry_run {
            if let Some(updates) = &self.updates {
                let outcome = tokio::select! {
                    result = process_pending(updates.as_ref(), &self.store) => Some(result),
                    _ = cancelled(shutdown) => None,
                };
                match outcome {
                    Some(Ok(outcome)) => {
                        summary.new_subscribers = outcome.commit.added;
                    }
                    Some(Err(e)) => log::warn!("[Subscribers] auto-subscribe skipped: {}", e),
                    None => return interrupted(summary),
                }
            }
        }

        // ── Fetch and evaluate ──
        log::info!("[Monitor] checking {} location(s)", self.locations.len());
        let mut forecasts = Vec::new();
        for location in &self.locations {
            if shutdown_requested(shutdown) {
                return interrupted(summary);
            }
            let result = tokio::select! {
                result = self.provider.get_forecast(location) => Some(result),
                _ = cancelled(shutdown) => None,
            };
            match result {
                Some(Ok(forecast)) => {
                    let alerts = evaluate(&location.name, &forecast.days, &self.rules);
                    for alert in &alerts {
                        log::info!(
                            "[Monitor] {} alert for {} on {} ({}): {}",
                            alert.kind,
                            alert.location_name,
                            alert.date,
                            alert.severity.as_str(),
                            alert.headline
                        );
                    }
                    summary.locations_checked += 1;
                    summary.alerts.extend(alerts);
                    forecasts.push(forecast);
                }
                Some(Err(e)) => {
                    log::warn!("[Monitor] skipping {} ({}): {}", location.name, location.describe(), e);
                    summary.location_errors.insert(location.name.clone(), e);
                }
                None => return interrupted(summary),
            }
        }

        // ── Deliver ──
        let recipients = only.unwrap_or_else(|| self.recipients());
        if recipients.is_empty() {
            log::warn!("[Monitor] no chat ids configured and no subscribers; nothing to deliver");
            return summary;
        }
        summary.recipients = recipients.clone();

        let dispatcher = Dispatcher::new(self.sender.clone())
            .with_alert_delay(self.settings.alert_delay)
            .with_emoji(self.settings.include_emoji)
            .with_shutdown(shutdown.clone());

        if !summary.alerts.is_empty() {
            log::info!(
                "[Monitor] sending {} alert(s) to {} recipient(s)",
                summary.alerts.len(),
                recipients.len()
            );
            summary.delivery = dispatcher.send_alerts(&summary.alerts, &recipients).await;
        } else if self.settings.send_summary_when_quiet && !forecasts.is_empty() {
            let comment = self.comment(&forecasts).await;
            let text = report::render(&forecasts, report_date(&forecasts), comment.as_deref());
            log::info!("[Monitor] no alerts, sending weather report to {} recipient(s)", recipients.len());
            summary.delivery = dispatcher
                .broadcast(&recipients, &text, DeliveryOptions::html().silent(true))
                .await;
            summary.report_sent = true;
        } else {
            log::info!("[Monitor] no alerts");
        }
        summary.interrupted = summary.delivery.interrupted;

        summary
    }

    /// Dev override, else configured chat ids followed by persisted
    /// subscribers, without duplicates.
    pub fn recipients(&self) -> Vec<ChatId> {
        if let Some(dev) = &self.settings.dev_chat_id {
            log::info!("[Monitor] dev mode: sending only to {}", dev);
            return vec![dev.clone()];
        }

        let mut seen = HashSet::new();
        let mut recipients: Vec<ChatId> = self
            .settings
            .chat_ids
            .iter()
            .chain(self.store.load().iter())
            .filter(|id| seen.insert((*id).clone()))
            .cloned()
            .collect();

        if recipients.is_empty() && self.settings.dry_run {
            recipients.push(ChatId::from(DRY_RUN_RECIPIENT));
        }
        recipients
    }

    async fn comment(&self, forecasts: &[Forecast]) -> Option<String> {
        let commentator = self.commentator.as_ref()?;
        let context = build_context(forecasts, report_date(forecasts));
        commentator.comment(&context).await
    }
}

/// "Today" as the forecasts see it, in the first location's own timezone.
fn report_date(forecasts: &[Forecast]) -> NaiveDate {
    forecasts
        .first()
        .map(|f| f.today)
        .unwrap_or_else(|| Local::now().date_naive())
}

fn interrupted(mut summary: RunSummary) -> RunSummary {
    log::warn!("[Monitor] shutdown requested, abandoning the rest of the pass");
    summary.interrupted = true;
    summary
}

pub(crate) fn shutdown_requested(shutdown: &watch::Receiver<()>) -> bool {
    shutdown.has_changed().unwrap_or(false)
}

/// Resolves when shutdown is signalled; never once the sender is gone.
pub(crate) async fn cancelled(shutdown: &mut watch::Receiver<()>) {
    if shutdown.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}
