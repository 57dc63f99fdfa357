//! Rule evaluation against per-day forecast summaries.
//!
//! Each enabled rule inspects the day at its `check_days_ahead` offset and
//! yields zero or more [`AlertRecord`]s. Evaluation is pure: no I/O, no
//! errors. A rule whose day lies outside the forecast window is skipped with
//! a warning.

use std::collections::{BTreeMap, BTreeSet};

use super::{message, AlertKind, AlertRecord, AlertRule, RuleKind, Severity};
use crate::forecast::{select_day, Condition, ForecastDay};

/// Temperature overshoot (°C beyond the bound) that raises severity to High.
const TEMPERATURE_HIGH_MARGIN_C: f64 = 5.0;

/// A fired rule before it is bound to a location and rendered.
struct Trigger {
    kind: AlertKind,
    severity: Severity,
    headline: String,
    values: BTreeMap<String, f64>,
    matched: Vec<Condition>,
}

impl Trigger {
    fn new(kind: AlertKind, severity: Severity, headline: String) -> Self {
        Self {
            kind,
            severity,
            headline,
            values: BTreeMap::new(),
            matched: Vec::new(),
        }
    }

    fn value(mut self, key: &str, value: f64) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }
}

/// Evaluate `rules` against one location's forecast.
///
/// Records come back in rule order. Empty rules or an empty forecast give `[]`.
pub fn evaluate(location_name: &str, days: &[ForecastDay], rules: &[AlertRule]) -> Vec<AlertRecord> {
    let mut records = Vec::new();

    for rule in rules.iter().filter(|r| r.enabled) {
        let Some(day) = select_day(days, rule.check_days_ahead) else {
            log::warn!(
                "No forecast data {} day(s) ahead for {}, skipping {} rule",
                rule.check_days_ahead,
                location_name,
                rule.kind.kind()
            );
            continue;
        };

        for trigger in check(&rule.kind, day) {
            records.push(into_record(location_name, day, trigger));
        }
    }

    records
}

fn check(kind: &RuleKind, day: &ForecastDay) -> Vec<Trigger> {
    match kind {
        RuleKind::Wind { threshold_kmh } => check_wind(day, *threshold_kmh).into_iter().collect(),
        RuleKind::Storm {
            wind_gust_threshold_kmh,
            precipitation_threshold_mm,
        } => check_storm(day, *wind_gust_threshold_kmh, *precipitation_threshold_mm)
            .into_iter()
            .collect(),
        RuleKind::Temperature {
            min_temp_c,
            max_temp_c,
        } => check_temperature(day, *min_temp_c, *max_temp_c),
        RuleKind::Precipitation { threshold_mm } => {
            check_precipitation(day, *threshold_mm).into_iter().collect()
        }
        RuleKind::WeatherCondition { watched } => {
            check_conditions(day, watched).into_iter().collect()
        }
    }
}

fn check_wind(day: &ForecastDay, threshold: f64) -> Option<Trigger> {
    let speed = day.wind_speed_kmh;
    if speed < threshold {
        return None;
    }
    let severity = if speed >= threshold * 1.5 {
        Severity::Severe
    } else if speed >= threshold * 1.2 {
        Severity::High
    } else {
        Severity::Moderate
    };
    Some(
        Trigger::new(
            AlertKind::Wind,
            severity,
            format!("High winds expected, sustained up to {:.0} km/h", speed),
        )
        .value("wind_speed_kmh", speed)
        .value("threshold_kmh", threshold),
    )
}

fn check_storm(day: &ForecastDay, gust_threshold: f64, precip_threshold: f64) -> Option<Trigger> {
    let gust = day.wind_gust_kmh >= gust_threshold;
    let precip = day.precipitation_mm >= precip_threshold;

    let (severity, headline) = match (gust, precip) {
        (true, true) => (
            Severity::Severe,
            format!(
                "Storm conditions expected with gusts up to {:.0} km/h and {:.1} mm of precipitation",
                day.wind_gust_kmh, day.precipitation_mm
            ),
        ),
        (true, false) => (
            Severity::High,
            format!(
                "Storm conditions expected with gusts up to {:.0} km/h",
                day.wind_gust_kmh
            ),
        ),
        (false, true) => (
            Severity::High,
            format!(
                "Storm conditions expected with {:.1} mm of precipitation",
                day.precipitation_mm
            ),
        ),
        (false, false) => return None,
    };

    let mut trigger = Trigger::new(AlertKind::Storm, severity, headline);
    if gust {
        trigger = trigger
            .value("wind_gust_kmh", day.wind_gust_kmh)
            .value("gust_threshold_kmh", gust_threshold);
    }
    if precip {
        trigger = trigger
            .value("precipitation_mm", day.precipitation_mm)
            .value("precipitation_threshold_mm", precip_threshold);
    }
    Some(trigger)
}

/// Each bound is checked on its own and reported as a separate record.
fn check_temperature(day: &ForecastDay, min_bound: Option<f64>, max_bound: Option<f64>) -> Vec<Trigger> {
    let mut triggers = Vec::new();

    if let Some(bound) = min_bound {
        if day.min_temp_c < bound {
            let severity = if bound - day.min_temp_c > TEMPERATURE_HIGH_MARGIN_C {
                Severity::High
            } else {
                Severity::Moderate
            };
            triggers.push(
                Trigger::new(
                    AlertKind::Temperature,
                    severity,
                    format!("Very cold temperatures expected with lows of {:.0}°C", day.min_temp_c),
                )
                .value("min_temp_c", day.min_temp_c)
                .value("min_threshold_c", bound),
            );
        }
    }

    if let Some(bound) = max_bound {
        if day.max_temp_c > bound {
            let severity = if day.max_temp_c - bound > TEMPERATURE_HIGH_MARGIN_C {
                Severity::High
            } else {
                Severity::Moderate
            };
            triggers.push(
                Trigger::new(
                    AlertKind::Temperature,
                    severity,
                    format!("Very hot temperatures expected with highs of {:.0}°C", day.max_temp_c),
                )
                .value("max_temp_c", day.max_temp_c)
                .value("max_threshold_c", bound),
            );
        }
    }

    triggers
}

fn check_precipitation(day: &ForecastDay, threshold: f64) -> Option<Trigger> {
    let total = day.precipitation_mm;
    if total < threshold {
        return None;
    }
    let severity = if total >= threshold * 2.0 {
        Severity::Severe
    } else if total >= threshold * 1.5 {
        Severity::High
    } else {
        Severity::Moderate
    };
    Some(
        Trigger::new(
            AlertKind::Precipitation,
            severity,
            format!(
                "Heavy precipitation expected ({:.1} mm) with {:.0}% probability",
                total, day.precipitation_probability_pct
            ),
        )
        .value("precipitation_mm", total)
        .value("threshold_mm", threshold)
        .value("precipitation_probability_pct", day.precipitation_probability_pct),
    )
}

fn check_conditions(day: &ForecastDay, watched: &BTreeSet<Condition>) -> Option<Trigger> {
    let mut matched: Vec<Condition> = day
        .conditions
        .iter()
        .chain(std::iter::once(&day.condition_category))
        .filter(|c| watched.contains(c))
        .copied()
        .collect();
    if matched.is_empty() {
        return None;
    }
    // Most severe first, no repeats.
    matched.sort_by(|a, b| b.cmp(a));
    matched.dedup();

    let severity = if matched
        .iter()
        .any(|c| matches!(c, Condition::Thunderstorm | Condition::Tornado | Condition::Squall))
    {
        Severity::High
    } else {
        Severity::Moderate
    };
    let names: Vec<&str> = matched.iter().map(|c| c.as_str()).collect();

    let mut trigger = Trigger::new(
        AlertKind::WeatherCondition,
        severity,
        format!("Adverse weather conditions expected: {}", names.join(", ")),
    );
    trigger.matched = matched;
    Some(trigger)
}

fn into_record(location_name: &str, day: &ForecastDay, trigger: Trigger) -> AlertRecord {
    let mut record = AlertRecord {
        location_name: location_name.to_string(),
        kind: trigger.kind,
        day_offset: day.day_offset,
        date: day.date,
        severity: trigger.severity,
        triggering_values: trigger.values,
        matched_conditions: trigger.matched,
        headline: trigger.headline,
        message_text: String::new(),
    };
    record.message_text = message::render(&record, true);
    record
}
