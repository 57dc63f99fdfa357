//! Optional one-line AI comment for the weather report.
//!
//! Uses the Anthropic Messages API over raw reqwest. Commentary is
//! decoration: a missing key, a timeout or an API error only costs the
//! comment, never the report.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::forecast::Forecast;
use crate::report::wind_descriptor;

// ── Constants ───────────────────────────────────────────────────────

/// Anthropic Messages API endpoint.
const API_URL: &str = "https://api.anthropic.com/v1/messages";

/// API version header value.
const API_VERSION: &str = "2023-06-01";

const DEFAULT_MODEL: &str = "claude-haiku-4-5";

const DEFAULT_MAX_TOKENS: u32 = 100;

/// Placeholder the prompt template must contain.
pub const SUMMARY_PLACEHOLDER: &str = "{weather_summary}";

// ── Config ──────────────────────────────────────────────────────────

/// The `commentary:` section of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentaryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for CommentaryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prompt: default_prompt(),
            model: default_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_prompt() -> String {
    "Write one short, witty sentence about this weather forecast. No emoji. Forecast: {weather_summary}"
        .to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

// ── Errors ──────────────────────────────────────────────────────────

/// Errors from Claude API operations.
#[derive(Debug, thiserror::Error)]
pub enum ClaudeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("ANTHROPIC_API_KEY not set")]
    MissingApiKey,

    #[error("empty response")]
    Empty,
}

pub type Result<T> = std::result::Result<T, ClaudeError>;

// ── Seam ────────────────────────────────────────────────────────────

/// Produces a short comment for a one-line forecast summary.
#[async_trait]
pub trait Commentator: Send + Sync {
    /// `None` when no comment could be produced, for whatever reason.
    async fn comment(&self, weather_summary: &str) -> Option<String>;
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [ApiMessage<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

// ── Client ──────────────────────────────────────────────────────────

/// A minimal Claude API client for single-turn text prompts.
#[derive(Debug)]
pub struct ClaudeClient {
    client: reqwest::Client,
    api_key: String,
    config: CommentaryConfig,
    timeout: Duration,
}

impl ClaudeClient {
    /// Create a client from the `ANTHROPIC_API_KEY` environment variable.
    pub fn from_env(config: CommentaryConfig, timeout: Duration) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ClaudeError::MissingApiKey)?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            config,
            timeout,
        })
    }

    /// Send a single user prompt and return the concatenated text reply.
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let body = ApiRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            messages: [ApiMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(API_URL)
            .timeout(self.timeout)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ClaudeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let api_response: ApiResponse = response.json().await?;
        let text = extract_text(&api_response);
        if text.is_empty() {
            return Err(ClaudeError::Empty);
        }
        Ok(text)
    }
}

fn extract_text(response: &ApiResponse) -> String {
    response
        .content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            ContentBlock::Other => None,
        })
        .collect::<Vec<_>>()
        .join("")
        .trim()
        .to_string()
}

/// Fill the prompt template. A template without the placeholder gets the
/// summary appended.
pub fn build_prompt(template: &str, weather_summary: &str) -> String {
    if template.contains(SUMMARY_PLACEHOLDER) {
        template.replace(SUMMARY_PLACEHOLDER, weather_summary)
    } else {
        format!("{}\n\n{}", template.trim_end(), weather_summary)
    }
}

#[async_trait]
impl Commentator for ClaudeClient {
    async fn comment(&self, weather_summary: &str) -> Option<String> {
        let prompt = build_prompt(&self.config.prompt, weather_summary);
        log::debug!("[Commentary] prompt: {}", prompt);
        match self.complete(&prompt).await {
            Ok(text) => {
                log::info!("[Commentary] {}", text);
                Some(text)
            }
            Err(e) => {
                log::warn!("[Commentary] failed to generate comment: {}", e);
                None
            }
        }
    }
}

// ── Context ─────────────────────────────────────────────────────────

/// One-line description of the forecasts for the prompt, e.g.
/// `Home, Saturday in March (weekend); Today: 4-12°C, wind 30km/h (Gentle breeze)...`.
pub fn build_context(forecasts: &[Forecast], today: NaiveDate) -> String {
    let mut parts = Vec::new();

    let weekend = matches!(today.weekday(), Weekday::Sat | Weekday::Sun);
    let names: Vec<&str> = forecasts.iter().map(|f| f.location_name.as_str()).collect();
    let mut header = format!(
        "{}, {} in {}",
        if names.is_empty() { "Unknown".to_string() } else { names.join(" / ") },
        today.format("%A"),
        today.format("%B")
    );
    if weekend {
        header.push_str(" (weekend)");
    }
    parts.push(header);

    for forecast in forecasts {
        let mut prev_max: Option<f64> = None;
        let mut prev_gust: Option<f64> = None;

        for day in forecast.days.iter().take(3) {
            let name = if day.day_offset == 0 {
                "Today".to_string()
            } else {
                day.date.format("%A").to_string()
            };
            let mut desc = format!("{}: {:.0}-{:.0}°C", name, day.min_temp_c, day.max_temp_c);
            if forecasts.len() > 1 {
                desc = format!("{} {}", forecast.location_name, desc);
            }

            if let Some(prev) = prev_max {
                let change = day.max_temp_c - prev;
                if change.abs() >= 5.0 {
                    let trend = if change > 0.0 { "warmer" } else { "cooler" };
                    desc.push_str(&format!(" ({:.0}° {})", change.abs(), trend));
                }
            }
            prev_max = Some(day.max_temp_c);

            let gust = day.wind_gust_kmh;
            desc.push_str(&format!(", wind {:.0}km/h ({})", gust, wind_descriptor(gust)));
            if let Some(prev) = prev_gust {
                if (gust - prev).abs() >= 15.0 {
                    desc.push_str(if gust > prev { " increasing" } else { " decreasing" });
                }
            }
            prev_gust = Some(gust);

            if day.precipitation_mm > 0.0 {
                desc.push_str(&format!(", rain {:.1}mm", day.precipitation_mm));
            }

            let conditions: Vec<&str> = day.conditions.iter().map(|c| c.as_str()).collect();
            desc.push_str(&format!(" ({})", conditions.join(", ")));

            parts.push(desc);
        }
    }

    parts.join("; ")
}

// ── Tests ───────────────────────────────────────────────────────────
