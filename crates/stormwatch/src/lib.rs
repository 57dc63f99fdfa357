//! Stormwatch: scheduled weather-threshold alerts delivered over Telegram.
//!
//! A pass fetches forecasts for the configured locations, evaluates them
//! against alert rules, and broadcasts the resulting alerts (or a quiet
//! weather report) to configured chats plus auto-subscribed users.

pub mod alerts;
pub mod autosubscribe;
pub mod bot;
pub mod cli;
pub mod commentary;
pub mod config;
pub mod dispatch;
pub mod forecast;
pub mod monitor;
pub mod report;
pub mod scheduler;
pub mod subscribers;
pub mod telegram;

pub use config::{AppConfig, ConfigError};
pub use monitor::{Monitor, MonitorSettings, RunOutcome, RunSummary};
