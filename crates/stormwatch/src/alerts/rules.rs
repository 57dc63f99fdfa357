//! Alert rule definitions.
//!
//! Rules are declared under `alerts:` in the config file, one entry per kind:
//!
//! ```yaml
//! alerts:
//!   wind:
//!     enabled: true
//!     threshold_kmh: 50
//!     check_days_ahead: 1
//!   storm:
//!     enabled: true
//!     wind_gust_threshold_kmh: 70
//!     precipitation_threshold_mm: 20
//!   temperature:
//!     enabled: true
//!     min_temp_c: -5
//!     max_temp_c: 35
//!   precipitation:
//!     enabled: false
//!     threshold_mm: 30
//!   weather_conditions:
//!     enabled: true
//!     alert_on: [thunderstorm, snow]
//! ```
//!
//! A missing entry or `enabled: false` disables that kind. Every entry accepts
//! `check_days_ahead` (default 1).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::AlertKind;
use crate::forecast::Condition;

/// A single rule. Loaded once from config and immutable during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRule {
    pub enabled: bool,
    /// Which forecast day to inspect (0 = today).
    pub check_days_ahead: u32,
    pub kind: RuleKind,
}

/// Per-kind thresholds. Each variant carries only the fields it needs.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleKind {
    Wind {
        threshold_kmh: f64,
    },
    Storm {
        wind_gust_threshold_kmh: f64,
        precipitation_threshold_mm: f64,
    },
    /// Either bound may be absent, in which case it is not checked.
    Temperature {
        min_temp_c: Option<f64>,
        max_temp_c: Option<f64>,
    },
    Precipitation {
        threshold_mm: f64,
    },
    WeatherCondition {
        watched: BTreeSet<Condition>,
    },
}

impl RuleKind {
    pub fn kind(&self) -> AlertKind {
        match self {
            Self::Wind { .. } => AlertKind::Wind,
            Self::Storm { .. } => AlertKind::Storm,
            Self::Temperature { .. } => AlertKind::Temperature,
            Self::Precipitation { .. } => AlertKind::Precipitation,
            Self::WeatherCondition { .. } => AlertKind::WeatherCondition,
        }
    }
}

impl AlertRule {
    pub fn new(kind: RuleKind, check_days_ahead: u32) -> Self {
        Self {
            enabled: true,
            check_days_ahead,
            kind,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

// ── Config file format ──────────────────────────────────────────────

/// The `alerts:` section of the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default)]
    pub wind: Option<WindConfig>,
    #[serde(default)]
    pub storm: Option<StormConfig>,
    #[serde(default)]
    pub temperature: Option<TemperatureConfig>,
    #[serde(default)]
    pub precipitation: Option<PrecipitationConfig>,
    #[serde(default, alias = "weather_condition")]
    pub weather_conditions: Option<WeatherConditionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_wind_threshold")]
    pub threshold_kmh: f64,
    #[serde(default = "default_days_ahead")]
    pub check_days_ahead: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StormConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_storm_gust_threshold")]
    pub wind_gust_threshold_kmh: f64,
    #[serde(default = "default_storm_precipitation_threshold")]
    pub precipitation_threshold_mm: f64,
    #[serde(default = "default_days_ahead")]
    pub check_days_ahead: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemperatureConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub min_temp_c: Option<f64>,
    #[serde(default)]
    pub max_temp_c: Option<f64>,
    #[serde(default = "default_days_ahead")]
    pub check_days_ahead: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecipitationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_precipitation_threshold")]
    pub threshold_mm: f64,
    #[serde(default = "default_days_ahead")]
    pub check_days_ahead: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConditionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub alert_on: BTreeSet<Condition>,
    #[serde(default = "default_days_ahead")]
    pub check_days_ahead: u32,
}

fn default_days_ahead() -> u32 {
    1
}

fn default_wind_threshold() -> f64 {
    50.0
}

fn default_storm_gust_threshold() -> f64 {
    70.0
}

fn default_storm_precipitation_threshold() -> f64 {
    20.0
}

fn default_precipitation_threshold() -> f64 {
    30.0
}

impl AlertsConfig {
    /// Build the rule set, in a fixed kind order. Disabled entries are kept
    /// with `enabled: false` so status output can list them.
    pub fn rules(&self) -> Vec<AlertRule> {
        let mut rules = Vec::new();
        if let Some(c) = &self.wind {
            rules.push(AlertRule {
                enabled: c.enabled,
                check_days_ahead: c.check_days_ahead,
                kind: RuleKind::Wind {
                    threshold_kmh: c.threshold_kmh,
                },
            });
        }
        if let Some(c) = &self.storm {
            rules.push(AlertRule {
                enabled: c.enabled,
                check_days_ahead: c.check_days_ahead,
                kind: RuleKind::Storm {
                    wind_gust_threshold_kmh: c.wind_gust_threshold_kmh,
                    precipitation_threshold_mm: c.precipitation_threshold_mm,
                },
            });
        }
        if let Some(c) = &self.temperature {
            rules.push(AlertRule {
                enabled: c.enabled,
                check_days_ahead: c.check_days_ahead,
                kind: RuleKind::Temperature {
                    min_temp_c: c.min_temp_c,
                    max_temp_c: c.max_temp_c,
                },
            });
        }
        if let Some(c) = &self.precipitation {
            rules.push(AlertRule {
                enabled: c.enabled,
                check_days_ahead: c.check_days_ahead,
                kind: RuleKind::Precipitation {
                    threshold_mm: c.threshold_mm,
                },
            });
        }
        if let Some(c) = &self.weather_conditions {
            rules.push(AlertRule {
                enabled: c.enabled,
                check_days_ahead: c.check_days_ahead,
                kind: RuleKind::WeatherCondition {
                    watched: c.alert_on.clone(),
                },
            });
        }
        rules
    }

    /// Check thresholds for values that can never make sense.
    pub fn validate(&self) -> Result<(), String> {
        let non_negative = [
            ("alerts.wind.threshold_kmh", self.wind.as_ref().map(|c| c.threshold_kmh)),
            (
                "alerts.storm.wind_gust_threshold_kmh",
                self.storm.as_ref().map(|c| c.wind_gust_threshold_kmh),
            ),
            (
                "alerts.storm.precipitation_threshold_mm",
                self.storm.as_ref().map(|c| c.precipitation_threshold_mm),
            ),
            (
                "alerts.precipitation.threshold_mm",
                self.precipitation.as_ref().map(|c| c.threshold_mm),
            ),
        ];
        for (field, value) in non_negative {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(format!("'{}' must be a non-negative number, got {}", field, v));
                }
            }
        }

        if let Some(t) = &self.temperature {
            if t.enabled && t.min_temp_c.is_none() && t.max_temp_c.is_none() {
                return Err(
                    "'alerts.temperature' is enabled but sets neither min_temp_c nor max_temp_c"
                        .to_string(),
                );
            }
            if let (Some(lo), Some(hi)) = (t.min_temp_c, t.max_temp_c) {
                if lo > hi {
                    return Err(format!(
                        "'alerts.temperature.min_temp_c' ({}) is above max_temp_c ({})",
                        lo, hi
                    ));
                }
            }
        }

        if let Some(w) = &self.weather_conditions {
            if w.enabled && w.alert_on.is_empty() {
                return Err("'alerts.weather_conditions' is enabled but 'alert_on' is empty".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_alerts_section() {
        let yaml = r#"
wind:
  enabled: true
  threshold_kmh: 45
  check_days_ahead: 0
storm:
  enabled: true
temperature:
  enabled: true
  min_temp_c: -5
  max_temp_c: 35
precipitation:
  enabled: false
weather_conditions:
  enabled: true
  alert_on: [Thunderstorm, snow]
"#;
        let config: AlertsConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        let rules = config.rules();
        assert_eq!(rules.len(), 5);

        assert_eq!(rules[0].kind, RuleKind::Wind { threshold_kmh: 45.0 });
        assert_eq!(rules[0].check_days_ahead, 0);
        assert_eq!(
            rules[1].kind,
            RuleKind::Storm {
                wind_gust_threshold_kmh: 70.0,
                precipitation_threshold_mm: 20.0
            }
        );
        assert_eq!(rules[1].check_days_ahead, 1);
        assert!(!rules[3].enabled);
        assert_eq!(rules[3].kind, RuleKind::Precipitation { threshold_mm: 30.0 });
        match &rules[4].kind {
            RuleKind::WeatherCondition { watched } => {
                assert!(watched.contains(&Condition::Thunderstorm));
                assert!(watched.contains(&Condition::Snow));
            }
            other => panic!("expected WeatherCondition, got {:?}", other),
        }
    }

    #[test]
    fn missing_sections_produce_no_rules() {
        let config: AlertsConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.rules().is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_condition_is_rejected() {
        let yaml = "weather_conditions:\n  enabled: true\n  alert_on: [sunshine]\n";
        let result: Result<AlertsConfig, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_negative_threshold() {
        let yaml = "wind:\n  enabled: true\n  threshold_kmh: -1\n";
        let config: AlertsConfig = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("alerts.wind.threshold_kmh"));
    }

    #[test]
    fn validate_rejects_boundless_temperature_rule() {
        let yaml = "temperature:\n  enabled: true\n";
        let config: AlertsConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_temperature_bounds() {
        let yaml = "temperature:\n  enabled: true\n  min_temp_c: 10\n  max_temp_c: 0\n";
        let config: AlertsConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().unwrap_err().contains("min_temp_c"));
    }
}
