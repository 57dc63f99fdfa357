//! Telegram Markdown rendering for alert records.

use super::AlertRecord;

/// Render an alert as a Telegram (legacy) Markdown message.
pub fn render(record: &AlertRecord, use_emoji: bool) -> String {
    let kind = record.kind.as_str().to_uppercase().replace('_', " ");
    let mut lines = Vec::new();

    if use_emoji {
        lines.push(format!(
            "{} *{} ALERT* {}",
            record.kind.emoji(),
            kind,
            record.severity.emoji()
        ));
    } else {
        lines.push(format!(
            "*{} ALERT* [{}]",
            kind,
            record.severity.as_str().to_uppercase()
        ));
    }
    lines.push(String::new());

    let date = record.date.format("%A, %B %d");
    if use_emoji {
        lines.push(format!("📍 *Location:* {}", escape(&record.location_name)));
        lines.push(format!("📅 *Date:* {}", date));
    } else {
        lines.push(format!("*Location:* {}", escape(&record.location_name)));
        lines.push(format!("*Date:* {}", date));
    }
    lines.push(String::new());

    lines.push(format!("*{}*", escape(&record.headline)));

    let has_details = !record.triggering_values.is_empty() || !record.matched_conditions.is_empty();
    if has_details {
        lines.push(String::new());
        lines.push("*Details:*".to_string());
        for (key, value) in &record.triggering_values {
            lines.push(format!("  • {}: {:.1}", label(key), value));
        }
        if !record.matched_conditions.is_empty() {
            let names: Vec<&str> = record.matched_conditions.iter().map(|c| c.as_str()).collect();
            lines.push(format!("  • Conditions: {}", names.join(", ")));
        }
    }

    lines.join("\n")
}

/// Human label for a triggering value key, e.g. `wind_speed_kmh` -> `Wind speed (km/h)`.
fn label(key: &str) -> String {
    const UNITS: [(&str, &str); 4] = [("_kmh", "km/h"), ("_mm", "mm"), ("_pct", "%"), ("_c", "°C")];

    let (stem, unit) = UNITS
        .iter()
        .find_map(|(suffix, unit)| key.strip_suffix(suffix).map(|stem| (stem, Some(*unit))))
        .unwrap_or((key, None));

    let words = stem.replace('_', " ");
    let mut chars = words.chars();
    let mut text = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => String::new(),
    };
    if let Some(unit) = unit {
        text.push_str(&format!(" ({})", unit));
    }
    text
}

/// Escape characters that legacy Markdown would treat as markup.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertKind, Severity};
    use crate::forecast::Condition;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn wind_record() -> AlertRecord {
        let mut values = BTreeMap::new();
        values.insert("wind_speed_kmh".to_string(), 55.0);
        values.insert("threshold_kmh".to_string(), 50.0);
        AlertRecord {
            location_name: "Home".to_string(),
            kind: AlertKind::Wind,
            day_offset: 1,
            date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            severity: Severity::Moderate,
            triggering_values: values,
            matched_conditions: Vec::new(),
            headline: "High winds expected, sustained up to 55 km/h".to_string(),
            message_text: String::new(),
        }
    }

    #[test]
    fn renders_emoji_layout() {
        let text = render(&wind_record(), true);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "💨 *WIND ALERT* 🟡");
        assert_eq!(lines[2], "📍 *Location:* Home");
        assert_eq!(lines[3], "📅 *Date:* Monday, March 04");
        assert_eq!(lines[5], "*High winds expected, sustained up to 55 km/h*");
        assert!(text.contains("  • Wind speed (km/h): 55.0"));
        assert!(text.contains("  • Threshold (km/h): 50.0"));
    }

    #[test]
    fn renders_plain_header_without_emoji() {
        let text = render(&wind_record(), false);
        assert!(text.starts_with("*WIND ALERT* [MODERATE]"));
        assert!(!text.contains('📍'));
    }

    #[test]
    fn lists_matched_conditions() {
        let mut record = wind_record();
        record.kind = AlertKind::WeatherCondition;
        record.triggering_values.clear();
        record.matched_conditions = vec![Condition::Thunderstorm, Condition::Snow];
        let text = render(&record, true);
        assert!(text.contains("*WEATHER CONDITION ALERT*"));
        assert!(text.contains("  • Conditions: thunderstorm, snow"));
    }

    #[test]
    fn labels_carry_units() {
        assert_eq!(label("min_temp_c"), "Min temp (°C)");
        assert_eq!(label("precipitation_probability_pct"), "Precipitation probability (%)");
        assert_eq!(label("threshold_mm"), "Threshold (mm)");
        assert_eq!(label("other"), "Other");
    }

    #[test]
    fn location_markup_is_escaped() {
        let mut record = wind_record();
        record.location_name = "north_field".to_string();
        assert!(render(&record, true).contains("north\\_field"));
    }
}
