//! Status command for a quick configuration overview
//!
//! Shows what a pass would do without touching the network:
//! - locations and how they are resolved
//! - alert rules (enabled and disabled) with their thresholds
//! - the schedule and its next occurrence
//! - recipients: configured chat ids and persisted subscribers
//!
//! Supports `-f json` for machine-readable output.

use anyhow::{Context, Result};
use argh::FromArgs;
use chrono::{Local, Utc};
use serde::Serialize;

use crate::alerts::{AlertRule, RuleKind};
use crate::config::{AppConfig, DEFAULT_CONFIG_PATH};
use crate::subscribers::SubscriberStore;

/// Show the configuration overview (no network access)
#[derive(FromArgs)]
#[argh(subcommand, name = "status")]
pub struct StatusCommand {
    /// path to the config file (default: config.yaml)
    #[argh(option, short = 'c', default = "String::from(DEFAULT_CONFIG_PATH)")]
    config: String,

    /// output format: table, json (default: table)
    #[argh(option, short = 'f', default = "String::from(\"table\")")]
    format: String,
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    config_path: String,
    locations: Vec<LocationStatus>,
    alerts: Vec<RuleStatus>,
    schedule: ScheduleStatus,
    recipients: RecipientStatus,
    weather_api_key: bool,
    commentary: bool,
}

#[derive(Debug, Serialize)]
struct LocationStatus {
    name: String,
    source: String,
}

#[derive(Debug, Serialize)]
struct RuleStatus {
    kind: String,
    enabled: bool,
    days_ahead: u32,
    condition: String,
}

#[derive(Debug, Serialize)]
struct ScheduleStatus {
    cron: String,
    timezone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_run: Option<String>,
}

#[derive(Debug, Serialize)]
struct RecipientStatus {
    configured: usize,
    subscribers: usize,
    subscribers_file: String,
    auto_subscribe: bool,
}

/// Human-readable trigger condition of a rule.
fn describe_rule(rule: &AlertRule) -> String {
    match &rule.kind {
        RuleKind::Wind { threshold_kmh } => format!("wind >= {:.0} km/h", threshold_kmh),
        RuleKind::Storm {
            wind_gust_threshold_kmh,
            precipitation_threshold_mm,
        } => format!(
            "gusts >= {:.0} km/h or precipitation >= {:.1} mm",
            wind_gust_threshold_kmh, precipitation_threshold_mm
        ),
        RuleKind::Temperature { min_temp_c, max_temp_c } => {
            let mut parts = Vec::new();
            if let Some(min) = min_temp_c {
                parts.push(format!("below {:.1} °C", min));
            }
            if let Some(max) = max_temp_c {
                parts.push(format!("above {:.1} °C", max));
            }
            parts.join(" or ")
        }
        RuleKind::Precipitation { threshold_mm } => format!("precipitation >= {:.1} mm", threshold_mm),
        RuleKind::WeatherCondition { watched } => watched
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn collect_status(config_path: &str, config: &AppConfig) -> StatusOutput {
    let locations = config
        .locations()
        .into_iter()
        .map(|loc| LocationStatus {
            source: loc.describe(),
            name: loc.name,
        })
        .collect();

    let alerts = config
        .rules()
        .iter()
        .map(|rule| RuleStatus {
            kind: rule.kind.kind().to_string(),
            enabled: rule.enabled,
            days_ahead: rule.check_days_ahead,
            condition: describe_rule(rule),
        })
        .collect();

    let schedule = match config.schedule() {
        Ok(s) => ScheduleStatus {
            cron: s.expression().to_string(),
            timezone: s.timezone().to_string(),
            next_run: s
                .next_after(Utc::now())
                .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()),
        },
        Err(e) => ScheduleStatus {
            cron: format!("invalid: {}", e),
            timezone: String::new(),
            next_run: None,
        },
    };

    let store = SubscriberStore::new(config.subscribers.path.clone());
    let recipients = RecipientStatus {
        configured: config.telegram.chat_ids.len(),
        subscribers: store.snapshot().len(),
        subscribers_file: config.subscribers.path.display().to_string(),
        auto_subscribe: config.telegram.auto_subscribe,
    };

    StatusOutput {
        config_path: config_path.to_string(),
        locations,
        alerts,
        schedule,
        recipients,
        weather_api_key: config.openweathermap_api_key().is_ok(),
        commentary: config.commentary.enabled,
    }
}

fn print_table(status: &StatusOutput) {
    println!("stormwatch status");
    println!("=================");
    println!("Config:        {}", status.config_path);
    let key_symbol = if status.weather_api_key { "✓" } else { "✗" };
    println!("Weather key:   {} {}", key_symbol, if status.weather_api_key { "set" } else { "missing" });
    println!(
        "Commentary:    {}",
        if status.commentary { "enabled" } else { "disabled" }
    );

    println!();
    println!("{:<20} SOURCE", "LOCATION");
    println!("{}", "-".repeat(60));
    for loc in &status.locations {
        println!("{:<20} {}", loc.name, loc.source);
    }

    println!();
    println!("{:<3} {:<18} {:<5} CONDITION", "ON", "ALERT", "DAYS");
    println!("{}", "-".repeat(60));
    for rule in &status.alerts {
        let enabled = if rule.enabled { "yes" } else { "no" };
        println!(
            "{:<3} {:<18} {:<5} {}",
            enabled, rule.kind, rule.days_ahead, rule.condition
        );
    }

    println!();
    println!(
        "Schedule:      {} ({})",
        status.schedule.cron, status.schedule.timezone
    );
    if let Some(next) = &status.schedule.next_run {
        println!("Next run:      {}", next);
    }
    println!(
        "Recipients:    {} configured, {} subscribed ({})",
        status.recipients.configured,
        status.recipients.subscribers,
        status.recipients.subscribers_file
    );
    println!(
        "Auto-subscribe: {}",
        if status.recipients.auto_subscribe { "on" } else { "off" }
    );
}

fn print_json(status: &StatusOutput) -> Result<()> {
    let json = serde_json::to_string_pretty(status)?;
    println!("{}", json);
    Ok(())
}

impl StatusCommand {
    pub async fn run(self) -> Result<()> {
        let config = AppConfig::load(&self.config)
            .with_context(|| format!("failed to load configuration from {}", self.config))?;
        let status = collect_status(&self.config, &config);

        match self.format.as_str() {
            "json" => print_json(&status)?,
            _ => print_table(&status),
        }

        Ok(())
    }
}
