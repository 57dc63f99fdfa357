//! Threshold alerts: rule definitions, evaluation, and message rendering.

pub mod evaluator;
pub mod message;
pub mod rules;

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::forecast::Condition;

pub use evaluator::evaluate;
pub use rules::{AlertRule, AlertsConfig, RuleKind};

/// The five alert families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Wind,
    Storm,
    Temperature,
    Precipitation,
    WeatherCondition,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wind => "wind",
            Self::Storm => "storm",
            Self::Temperature => "temperature",
            Self::Precipitation => "precipitation",
            Self::WeatherCondition => "weather_condition",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Wind => "💨",
            Self::Storm => "⛈️",
            Self::Temperature => "🌡️",
            Self::Precipitation => "🌧️",
            Self::WeatherCondition => "⚠️",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How bad an alert is. Low and Moderate alerts are delivered silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Moderate,
    High,
    Severe,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Severe => "severe",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Low => "🟢",
            Self::Moderate => "🟡",
            Self::High => "🟠",
            Self::Severe => "🔴",
        }
    }

    /// Whether recipients should get an audible notification.
    pub fn is_loud(&self) -> bool {
        *self >= Self::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fired rule for one location and day. Consumed once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub location_name: String,
    pub kind: AlertKind,
    pub day_offset: u32,
    pub date: NaiveDate,
    pub severity: Severity,
    /// Measured values that caused the trigger, next to the thresholds they crossed.
    pub triggering_values: BTreeMap<String, f64>,
    /// Watched conditions that matched (weather_condition rules only).
    pub matched_conditions: Vec<Condition>,
    /// One-sentence summary, e.g. "High winds expected, sustained up to 55 km/h".
    pub headline: String,
    /// Fully rendered Telegram Markdown message (emoji enabled).
    pub message_text: String,
}

impl AlertRecord {
    /// Value recorded under `key`, if any.
    pub fn value(&self, key: &str) -> Option<f64> {
        self.triggering_values.get(key).copied()
    }
}
