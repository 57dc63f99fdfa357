//! OpenWeatherMap forecast client.
//!
//! Uses the free 5-day / 3-hour forecast endpoint and the direct geocoding
//! endpoint. Three-hour samples are bucketed into local calendar days using
//! the timezone offset the API reports for the resolved city.

use super::{Condition, Forecast, ForecastDay, ForecastProvider, Location, LocationResolver};
use super::{ProviderError, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

const FORECAST_URL: &str = "https://api.openweathermap.org/data/2.5/forecast";
const GEOCODING_URL: &str = "http://api.openweathermap.org/geo/1.0/direct";

/// m/s to km/h.
const MS_TO_KMH: f64 = 3.6;

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GeoEntry {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    list: Vec<Sample>,
    city: City,
}

#[derive(Debug, Deserialize)]
struct City {
    #[serde(default)]
    name: String,
    #[serde(default)]
    country: String,
    /// Shift in seconds from UTC.
    #[serde(default)]
    timezone: i32,
}

#[derive(Debug, Deserialize)]
struct Sample {
    dt: i64,
    main: MainBlock,
    #[serde(default)]
    weather: Vec<WeatherBlock>,
    wind: WindBlock,
    #[serde(default)]
    rain: Option<VolumeBlock>,
    #[serde(default)]
    snow: Option<VolumeBlock>,
    /// Probability of precipitation, 0.0..=1.0.
    #[serde(default)]
    pop: f64,
}

#[derive(Debug, Deserialize)]
struct MainBlock {
    temp_min: f64,
    temp_max: f64,
}

#[derive(Debug, Deserialize)]
struct WeatherBlock {
    main: String,
}

#[derive(Debug, Deserialize)]
struct WindBlock {
    speed: f64,
    #[serde(default)]
    gust: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct VolumeBlock {
    #[serde(rename = "3h", default)]
    three_hours: f64,
}

// ── Aggregation ─────────────────────────────────────────────────────

#[derive(Debug)]
struct DayAccumulator {
    min_temp_c: f64,
    max_temp_c: f64,
    wind_speed_kmh: f64,
    wind_gust_kmh: f64,
    precipitation_mm: f64,
    precipitation_probability_pct: f64,
    conditions: BTreeSet<Condition>,
}

impl DayAccumulator {
    fn new() -> Self {
        Self {
            min_temp_c: f64::INFINITY,
            max_temp_c: f64::NEG_INFINITY,
            wind_speed_kmh: 0.0,
            wind_gust_kmh: 0.0,
            precipitation_mm: 0.0,
            precipitation_probability_pct: 0.0,
            conditions: BTreeSet::new(),
        }
    }

    fn push(&mut self, sample: &Sample) {
        self.min_temp_c = self.min_temp_c.min(sample.main.temp_min);
        self.max_temp_c = self.max_temp_c.max(sample.main.temp_max);
        self.wind_speed_kmh = self.wind_speed_kmh.max(sample.wind.speed * MS_TO_KMH);
        self.wind_gust_kmh = self
            .wind_gust_kmh
            .max(sample.wind.gust.unwrap_or(0.0) * MS_TO_KMH);
        self.precipitation_mm += sample.rain.as_ref().map_or(0.0, |r| r.three_hours)
            + sample.snow.as_ref().map_or(0.0, |s| s.three_hours);
        self.precipitation_probability_pct = self.precipitation_probability_pct.max(sample.pop * 100.0);
        for w in &sample.weather {
            self.conditions.insert(Condition::from_provider(&w.main));
        }
    }

    fn finish(self, date: NaiveDate, day_offset: u32) -> ForecastDay {
        // Most severe first.
        let conditions: Vec<Condition> = self.conditions.into_iter().rev().collect();
        let condition_category = conditions.first().copied().unwrap_or(Condition::Other);
        ForecastDay {
            date,
            day_offset,
            min_temp_c: self.min_temp_c,
            max_temp_c: self.max_temp_c,
            wind_speed_kmh: self.wind_speed_kmh,
            wind_gust_kmh: self.wind_gust_kmh,
            precipitation_mm: self.precipitation_mm,
            precipitation_probability_pct: self.precipitation_probability_pct,
            condition_category,
            conditions,
        }
    }
}

/// Parse a raw forecast response body into per-day summaries.
///
/// `now` anchors "today" in the location's timezone; samples dated before
/// that local day are dropped.
pub fn parse_forecast(location_name: &str, body: &str, now: DateTime<Utc>) -> Result<Forecast> {
    let response: ForecastResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;

    let offset = FixedOffset::east_opt(response.city.timezone)
        .ok_or_else(|| ProviderError::Malformed(format!("bad timezone offset: {}", response.city.timezone)))?;
    let today = now.with_timezone(&offset).date_naive();

    let mut buckets: BTreeMap<NaiveDate, DayAccumulator> = BTreeMap::new();
    for sample in &response.list {
        let at = DateTime::from_timestamp(sample.dt, 0)
            .ok_or_else(|| ProviderError::Malformed(format!("bad timestamp: {}", sample.dt)))?;
        let date = at.with_timezone(&offset).date_naive();
        if date < today {
            continue;
        }
        buckets.entry(date).or_insert_with(DayAccumulator::new).push(sample);
    }

    let days = buckets
        .into_iter()
        .map(|(date, acc)| {
            let day_offset = (date - today).num_days() as u32;
            acc.finish(date, day_offset)
        })
        .collect();

    let place = match (response.city.name.is_empty(), response.city.country.is_empty()) {
        (true, _) => None,
        (false, true) => Some(response.city.name),
        (false, false) => Some(format!("{}, {}", response.city.name, response.city.country)),
    };

    Ok(Forecast {
        location_name: location_name.to_string(),
        place,
        today,
        days,
    })
}

/// Map a non-success HTTP status onto a provider error.
fn classify_status(status: u16, body: &str) -> ProviderError {
    let detail = format!("HTTP {}: {}", status, body.trim());
    match status {
        401 | 403 => ProviderError::Auth(detail),
        404 => ProviderError::NotFound(detail),
        429 => ProviderError::RateLimit(detail),
        _ => ProviderError::Unavailable(detail),
    }
}

/// Map a transport failure, dropping the URL since it carries `appid`.
fn classify_transport(err: reqwest::Error) -> ProviderError {
    let err = err.without_url();
    if err.is_decode() {
        ProviderError::Malformed(err.to_string())
    } else {
        ProviderError::Network(err.to_string())
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// OpenWeatherMap client. Every request is bounded by the configured timeout.
#[derive(Debug, Clone)]
pub struct OpenWeatherMapClient {
    client: reqwest::Client,
    api_key: String,
}

impl OpenWeatherMapClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
        })
    }

    async fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &body));
        }
        Ok(body)
    }

    /// Resolve a city query to coordinates via the geocoding API.
    pub async fn geocode(&self, city: &str) -> Result<(f64, f64)> {
        let body = self
            .get_text(
                GEOCODING_URL,
                &[
                    ("q", city.to_string()),
                    ("limit", "1".to_string()),
                    ("appid", self.api_key.clone()),
                ],
            )
            .await?;
        let entries: Vec<GeoEntry> =
            serde_json::from_str(&body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
        entries
            .first()
            .map(|e| (e.lat, e.lon))
            .ok_or_else(|| ProviderError::NotFound(format!("city not found: {}", city)))
    }
}

#[async_trait]
impl ForecastProvider for OpenWeatherMapClient {
    async fn get_forecast(&self, location: &Location) -> Result<Forecast> {
        let (lat, lon) = match &location.resolver {
            LocationResolver::Coordinates { lat, lon } => (*lat, *lon),
            LocationResolver::City(city) => self.geocode(city).await?,
        };
        log::debug!(
            "fetching forecast for {} at ({:.4}, {:.4})",
            location.name,
            lat,
            lon
        );

        let body = self
            .get_text(
                FORECAST_URL,
                &[
                    ("lat", lat.to_string()),
                    ("lon", lon.to_string()),
                    ("units", "metric".to_string()),
                    ("appid", self.api_key.clone()),
                ],
            )
            .await?;

        parse_forecast(&location.name, &body, Utc::now())
    }
}
