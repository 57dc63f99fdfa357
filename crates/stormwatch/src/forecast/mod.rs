//! Forecast domain types and the provider boundary.
//!
//! A provider turns a configured [`Location`] into a [`Forecast`]: one
//! [`ForecastDay`] summary per local calendar day, with `day_offset` counted
//! from the location's own "today". Providers never panic on bad data; every
//! failure comes back as a [`ProviderError`] so the caller can skip that
//! location and carry on with the rest.

pub mod openweathermap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use openweathermap::OpenWeatherMapClient;

/// Errors from forecast providers.
///
/// All variants are recoverable: the affected location is skipped for the
/// current pass.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("rate limited: {0}")]
    RateLimit(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Short machine-friendly reason, used in run summaries.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::RateLimit(_) => "rate_limit",
            Self::NotFound(_) => "not_found",
            Self::Network(_) => "network",
            Self::Unavailable(_) => "unavailable",
            Self::Malformed(_) => "malformed",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// How a location is resolved to coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationResolver {
    /// Free-form city query, e.g. "London, UK". Geocoded on every fetch.
    City(String),
    Coordinates { lat: f64, lon: f64 },
}

/// A monitored location. Names are unique within a config.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub name: String,
    pub resolver: LocationResolver,
}

impl Location {
    pub fn city(name: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resolver: LocationResolver::City(city.into()),
        }
    }

    pub fn coordinates(name: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            name: name.into(),
            resolver: LocationResolver::Coordinates { lat, lon },
        }
    }

    /// Human-readable description of where the forecast comes from.
    pub fn describe(&self) -> String {
        match &self.resolver {
            LocationResolver::City(city) => city.clone(),
            LocationResolver::Coordinates { lat, lon } => format!("({:.4}, {:.4})", lat, lon),
        }
    }
}

/// Weather condition category.
///
/// Variants are declared in ascending severity, so `Ord` ranks them and
/// `max()` over a day's conditions yields the dominant one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Condition {
    Clear,
    Other,
    Clouds,
    Dust,
    Fog,
    Drizzle,
    Rain,
    Snow,
    Squall,
    Thunderstorm,
    Tornado,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::Other => "other",
            Self::Clouds => "clouds",
            Self::Dust => "dust",
            Self::Fog => "fog",
            Self::Drizzle => "drizzle",
            Self::Rain => "rain",
            Self::Snow => "snow",
            Self::Squall => "squall",
            Self::Thunderstorm => "thunderstorm",
            Self::Tornado => "tornado",
        }
    }

    /// Map a provider's free-form category (OpenWeatherMap `weather[].main`)
    /// onto a known condition. Unknown categories become `Other`.
    pub fn from_provider(main: &str) -> Self {
        main.parse().unwrap_or(Self::Other)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "clear" => Ok(Self::Clear),
            "clouds" | "cloudy" => Ok(Self::Clouds),
            "drizzle" => Ok(Self::Drizzle),
            "rain" => Ok(Self::Rain),
            "snow" => Ok(Self::Snow),
            "thunderstorm" | "thunder" => Ok(Self::Thunderstorm),
            "fog" | "mist" | "haze" | "smoke" => Ok(Self::Fog),
            "dust" | "sand" | "ash" => Ok(Self::Dust),
            "squall" => Ok(Self::Squall),
            "tornado" => Ok(Self::Tornado),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown weather condition: {}", other)),
        }
    }
}

impl TryFrom<String> for Condition {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Condition> for String {
    fn from(value: Condition) -> Self {
        value.as_str().to_string()
    }
}

/// One local calendar day of aggregated forecast for one location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastDay {
    pub date: NaiveDate,
    /// Days after the location's local today (0 = today).
    pub day_offset: u32,
    pub min_temp_c: f64,
    pub max_temp_c: f64,
    pub wind_speed_kmh: f64,
    pub wind_gust_kmh: f64,
    pub precipitation_mm: f64,
    pub precipitation_probability_pct: f64,
    /// Most severe condition observed during the day.
    pub condition_category: Condition,
    /// Every distinct condition observed during the day, most severe first.
    pub conditions: Vec<Condition>,
}

/// A fetched forecast, produced fresh on every pass and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub location_name: String,
    /// Place name reported by the provider, e.g. "London, GB".
    pub place: Option<String>,
    /// Local date of the location when the forecast was fetched.
    pub today: NaiveDate,
    pub days: Vec<ForecastDay>,
}

impl Forecast {
    /// The day at `offset` days after the location's today, if the window covers it.
    pub fn day(&self, offset: u32) -> Option<&ForecastDay> {
        select_day(&self.days, offset)
    }
}

/// Select the forecast day at a given offset.
pub fn select_day(days: &[ForecastDay], offset: u32) -> Option<&ForecastDay> {
    days.iter().find(|d| d.day_offset == offset)
}

/// Source of forecasts for configured locations.
///
/// Implementations must bound every network call with a timeout.
#[async_trait]
pub trait ForecastProvider: Send + Sync {
    async fn get_forecast(&self, location: &Location) -> Result<Forecast>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_parsing_is_case_insensitive() {
        assert_eq!("Thunderstorm".parse::<Condition>().unwrap(), Condition::Thunderstorm);
        assert_eq!("SNOW".parse::<Condition>().unwrap(), Condition::Snow);
        assert_eq!(" mist ".parse::<Condition>().unwrap(), Condition::Fog);
        assert!("sunshine".parse::<Condition>().is_err());
    }

    #[test]
    fn unknown_provider_condition_maps_to_other() {
        assert_eq!(Condition::from_provider("Volcano"), Condition::Other);
        assert_eq!(Condition::from_provider("Haze"), Condition::Fog);
    }

    #[test]
    fn condition_ordering_ranks_severity() {
        let worst = [Condition::Clouds, Condition::Thunderstorm, Condition::Rain]
            .into_iter()
            .max()
            .unwrap();
        assert_eq!(worst, Condition::Thunderstorm);
        assert!(Condition::Clear < Condition::Drizzle);
    }

    #[test]
    fn condition_serde_round_trips_through_names() {
        let json = serde_json::to_string(&Condition::Snow).unwrap();
        assert_eq!(json, "\"snow\"");
        let parsed: Condition = serde_json::from_str("\"Thunder\"").unwrap();
        assert_eq!(parsed, Condition::Thunderstorm);
    }

    #[test]
    fn provider_error_reason_strings() {
        assert_eq!(ProviderError::Network("timeout".into()).reason(), "network");
        assert_eq!(ProviderError::RateLimit("429".into()).reason(), "rate_limit");
        assert!(ProviderError::NotFound("Atlantis".into())
            .to_string()
            .contains("Atlantis"));
    }

    #[test]
    fn location_describe() {
        assert_eq!(Location::city("Home", "London, UK").describe(), "London, UK");
        assert_eq!(
            Location::coordinates("Cabin", 46.5, 7.9).describe(),
            "(46.5000, 7.9000)"
        );
    }
}
