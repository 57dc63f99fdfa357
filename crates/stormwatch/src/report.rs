//! "All quiet" weather report, sent when a pass raises no alerts.
//!
//! Telegram HTML: per location, the next three available days with
//! condition, temperatures, a temperature bar, wind and precipitation.

use chrono::NaiveDate;

use crate::forecast::{Condition, Forecast, ForecastDay};

/// Days shown per location.
const DAYS_SHOWN: usize = 3;

/// Beaufort-style descriptor for a wind speed.
pub fn wind_descriptor(kmh: f64) -> &'static str {
    match kmh {
        k if k < 12.0 => "Calm",
        k if k < 20.0 => "Light breeze",
        k if k < 29.0 => "Gentle breeze",
        k if k < 39.0 => "Moderate wind",
        k if k < 50.0 => "Fresh wind",
        k if k < 62.0 => "Strong wind",
        k if k < 75.0 => "Near gale",
        k if k < 89.0 => "Gale",
        _ => "Storm force",
    }
}

pub fn condition_emoji(condition: Condition, precipitation_mm: f64) -> &'static str {
    match condition {
        Condition::Thunderstorm | Condition::Tornado | Condition::Squall => "⛈️",
        Condition::Snow => "🌨️",
        Condition::Rain if precipitation_mm > 10.0 => "🌧️",
        Condition::Rain | Condition::Drizzle => "🌦️",
        Condition::Clouds => "☁️",
        Condition::Clear => "☀️",
        Condition::Fog | Condition::Dust => "🌫️",
        Condition::Other => "🌤️",
    }
}

fn temperature_emoji(celsius: f64) -> &'static str {
    match celsius {
        t if t >= 30.0 => "🔥",
        t if t >= 20.0 => "🟠",
        t if t >= 10.0 => "🟢",
        t if t >= 0.0 => "🔵",
        _ => "🧊",
    }
}

/// 11-cell bar over -10..40 °C, filled between the low and the high.
pub fn temperature_bar(min_c: f64, max_c: f64) -> String {
    let cell = |t: f64| ((t + 10.0) / 5.0).floor().clamp(0.0, 10.0) as usize;
    let (lo, hi) = (cell(min_c), cell(max_c));
    (0..=10)
        .map(|i| if (lo..=hi).contains(&i) { '█' } else { '░' })
        .collect()
}

/// Light up to 10 mm, Moderate up to 20 mm, Heavy beyond.
pub fn precipitation_intensity(mm: f64) -> (&'static str, &'static str) {
    if mm > 20.0 {
        ("🌧️🌧️🌧️", "Heavy")
    } else if mm > 10.0 {
        ("🌧️🌧️", "Moderate")
    } else {
        ("💧", "Light")
    }
}

fn wind_emoji(gust_kmh: f64) -> &'static str {
    if gust_kmh > 40.0 {
        "💨💨💨"
    } else if gust_kmh > 25.0 {
        "💨💨"
    } else {
        "💨"
    }
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Render the report for every successfully fetched location.
pub fn render(forecasts: &[Forecast], today: NaiveDate, comment: Option<&str>) -> String {
    let mut lines = vec!["<b>WEATHER REPORT</b>".to_string(), String::new()];

    if let Some(comment) = comment.map(str::trim).filter(|c| !c.is_empty()) {
        lines.push(format!("<i>💬 {}</i>", escape_html(comment)));
        lines.push(String::new());
    }

    lines.push(format!("📅 <b>{}</b>", today.format("%A, %B %d, %Y")));
    lines.push(String::new());

    for forecast in forecasts {
        lines.push(format!("<b>📍 {}</b>", escape_html(&forecast.location_name)));
        if let Some(place) = &forecast.place {
            lines.push(format!("<i>{}</i>", escape_html(place)));
        }
        lines.push(String::new());
        lines.push("━━━━━━━━━━━━━━━━━━━━━".to_string());
        lines.push(String::new());

        for day in forecast.days.iter().take(DAYS_SHOWN) {
            render_day(&mut lines, day);
        }
    }

    lines.push("✅ <i>No weather alerts</i>".to_string());
    lines.join("\n")
}

fn render_day(lines: &mut Vec<String>, day: &ForecastDay) {
    let name = if day.day_offset == 0 {
        "TODAY".to_string()
    } else {
        day.date.format("%A").to_string().to_uppercase()
    };
    let emoji = condition_emoji(day.condition_category, day.precipitation_mm);
    lines.push(format!("{} <b>{}</b> {}", emoji, name, emoji));
    lines.push(String::new());

    lines.push(format!(
        "🌡️ <b>High {:.0}°C</b> {} • <b>Low {:.0}°C</b>",
        day.max_temp_c,
        temperature_emoji(day.max_temp_c),
        day.min_temp_c
    ));
    lines.push(format!(
        "<code>{}</code> <i>{:.0}° → {:.0}°</i>",
        temperature_bar(day.min_temp_c, day.max_temp_c),
        day.min_temp_c,
        day.max_temp_c
    ));
    lines.push(String::new());

    let descriptor = wind_descriptor(day.wind_gust_kmh.max(day.wind_speed_kmh));
    let mut wind = format!(
        "{} <b>{:.0} km/h</b>",
        wind_emoji(day.wind_gust_kmh),
        day.wind_speed_kmh
    );
    if day.wind_gust_kmh > day.wind_speed_kmh {
        wind.push_str(&format!(" (gusts <b>{:.0}</b>)", day.wind_gust_kmh));
    }
    wind.push_str(&format!(" • <i>{}</i>", descriptor));
    lines.push(wind);

    if day.precipitation_mm > 0.0 {
        let (emoji, intensity) = precipitation_intensity(day.precipitation_mm);
        lines.push(format!(
            "{} <b>{:.1} mm</b> <i>({})</i>",
            emoji, day.precipitation_mm, intensity
        ));
    }

    lines.push(String::new());
    lines.push("┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈".to_string());
    lines.push(String::new());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(offset: u32, min: f64, max: f64, gust: f64, precip: f64, condition: Condition) -> ForecastDay {
        ForecastDay {
            date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap() + chrono::Days::new(offset as u64),
            day_offset: offset,
            min_temp_c: min,
            max_temp_c: max,
            wind_speed_kmh: 15.0,
            wind_gust_kmh: gust,
            precipitation_mm: precip,
            precipitation_probability_pct: 40.0,
            condition_category: condition,
            conditions: vec![condition],
        }
    }

    #[test]
    fn bar_spans_low_to_high() {
        assert_eq!(temperature_bar(-10.0, -10.0), "█░░░░░░░░░░");
        assert_eq!(temperature_bar(5.0, 15.0), "░░░███░░░░░");
        assert_eq!(temperature_bar(-30.0, 60.0), "███████████");
    }

    #[test]
    fn descriptors_follow_beaufort_bands() {
        assert_eq!(wind_descriptor(5.0), "Calm");
        assert_eq!(wind_descriptor(12.0), "Light breeze");
        assert_eq!(wind_descriptor(55.0), "Strong wind");
        assert_eq!(wind_descriptor(120.0), "Storm force");
    }

    #[test]
    fn intensity_bands() {
        assert_eq!(precipitation_intensity(10.0).1, "Light");
        assert_eq!(precipitation_intensity(15.0).1, "Moderate");
        assert_eq!(precipitation_intensity(20.5).1, "Heavy");
    }

    #[test]
    fn report_layout() {
        let forecast = Forecast {
            location_name: "Home & Garden".to_string(),
            place: Some("London, GB".to_string()),
            today: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            days: vec![
                day(0, 4.0, 12.0, 30.0, 0.0, Condition::Clouds),
                day(1, 6.0, 14.0, 45.0, 12.5, Condition::Rain),
                day(2, 2.0, 9.0, 10.0, 0.0, Condition::Clear),
                day(3, 1.0, 8.0, 10.0, 0.0, Condition::Snow),
            ],
        };
        let text = render(&[forecast], NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(), Some("Bring a brolly."));

        assert!(text.starts_with("<b>WEATHER REPORT</b>"));
        assert!(text.contains("<i>💬 Bring a brolly.</i>"));
        assert!(text.contains("📅 <b>Monday, March 04, 2024</b>"));
        assert!(text.contains("<b>📍 Home &amp; Garden</b>"));
        assert!(text.contains("☁️ <b>TODAY</b> ☁️"));
        assert!(text.contains("🌧️ <b>TUESDAY</b> 🌧️"));
        assert!(text.contains("(gusts <b>45</b>)"));
        assert!(text.contains("🌧️🌧️ <b>12.5 mm</b> <i>(Moderate)</i>"));
        assert!(!text.contains("THURSDAY"));
        assert!(text.ends_with("✅ <i>No weather alerts</i>"));
    }

    #[test]
    fn report_without_comment() {
        let text = render(&[], NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(), None);
        assert!(!text.contains("💬"));
    }
}
