//! Configuration file loading and validation.
//!
//! The file is parsed to a YAML value, `${VAR}` references in string values
//! are substituted, and only then deserialized into [`AppConfig`]. Any
//! problem here is fatal: nothing runs on a half-valid config.

pub mod substitution;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alerts::{AlertRule, AlertsConfig};
use crate::commentary::CommentaryConfig;
use crate::forecast::Location;
use crate::scheduler::{time_to_cron, Schedule, ScheduleTimezone};
use crate::subscribers::ChatId;

pub use substitution::{SubstitutionContext, SubstitutionError};

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Environment variable that takes precedence over `api_keys.openweathermap`.
pub const OPENWEATHERMAP_KEY_ENV: &str = "OPENWEATHERMAP_API_KEY";

const DEFAULT_RUN_TIME: &str = "07:00";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Substitution error: {0}")]
    Substitution(#[from] SubstitutionError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("OpenWeatherMap API key missing: set {OPENWEATHERMAP_KEY_ENV} or api_keys.openweathermap")]
    MissingApiKey,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

// ── Sections ────────────────────────────────────────────────────────

/// Root of `config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub api_keys: ApiKeys,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub subscribers: SubscribersConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default, alias = "claude")]
    pub commentary: CommentaryConfig,
}

/// A monitored location: either a city query or explicit coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

impl LocationConfig {
    /// Coordinates win over a city query when both are given.
    pub fn to_location(&self) -> Option<Location> {
        match (self.lat, self.lon, &self.city) {
            (Some(lat), Some(lon), _) => Some(Location::coordinates(&self.name, lat, lon)),
            (_, _, Some(city)) if !city.trim().is_empty() => Some(Location::city(&self.name, city.trim())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_ids: Vec<ChatId>,
    #[serde(default)]
    pub message_format: MessageFormatConfig,
    #[serde(default = "default_true")]
    pub send_summary_when_quiet: bool,
    #[serde(default = "default_true")]
    pub auto_subscribe: bool,
    #[serde(default = "default_alert_delay_ms")]
    pub alert_delay_ms: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_ids: Vec::new(),
            message_format: MessageFormatConfig::default(),
            send_summary_when_quiet: true,
            auto_subscribe: true,
            alert_delay_ms: default_alert_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageFormatConfig {
    #[serde(default = "default_true")]
    pub include_emoji: bool,
}

impl Default for MessageFormatConfig {
    fn default() -> Self {
        Self { include_emoji: true }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeys {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openweathermap: Option<String>,
}

/// When `watch` runs a pass. `cron` wins over `time`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribersConfig {
    #[serde(default = "default_subscribers_path")]
    pub path: PathBuf,
}

impl Default for SubscribersConfig {
    fn default() -> Self {
        Self {
            path: default_subscribers_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_alert_delay_ms() -> u64 {
    500
}

fn default_subscribers_path() -> PathBuf {
    PathBuf::from("subscribers.json")
}

fn default_timeout_secs() -> u64 {
    10
}

// ── Loading ─────────────────────────────────────────────────────────

impl AppConfig {
    /// Load `.env` (if present), then read, substitute and validate `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(env_path) => log::debug!("loaded environment from {}", env_path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => log::warn!("failed to load .env: {}", e),
        }
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, without validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, substituting from the process
    /// environment.
    pub fn parse(yaml: &str) -> Result<Self> {
        Self::parse_with(yaml, &SubstitutionContext::new())
    }

    pub fn parse_with(yaml: &str, ctx: &SubstitutionContext) -> Result<Self> {
        let mut value: serde_yaml::Value =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        if value.is_null() {
            return Err(ConfigError::ParseError("empty configuration".to_string()));
        }
        ctx.substitute_value(&mut value)?;
        serde_yaml::from_value(value).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Check everything that would otherwise fail halfway through a pass.
    pub fn validate(&self) -> Result<()> {
        if self.locations.is_empty() {
            return Err(invalid("at least one location is required"));
        }

        let mut names = HashSet::new();
        for loc in &self.locations {
            let name = loc.name.trim();
            if name.is_empty() {
                return Err(invalid("location without a name"));
            }
            if !names.insert(name) {
                return Err(invalid(format!("duplicate location name '{}'", name)));
            }
            if loc.lat.is_some() != loc.lon.is_some() {
                return Err(invalid(format!("location '{}': lat and lon must be given together", name)));
            }
            if let Some(lat) = loc.lat {
                if !(-90.0..=90.0).contains(&lat) {
                    return Err(invalid(format!("location '{}': latitude {} out of range", name, lat)));
                }
            }
            if let Some(lon) = loc.lon {
                if !(-180.0..=180.0).contains(&lon) {
                    return Err(invalid(format!("location '{}': longitude {} out of range", name, lon)));
                }
            }
            if loc.to_location().is_none() {
                return Err(invalid(format!("location '{}' needs a city or lat/lon", name)));
            }
        }

        if self.telegram.bot_token.trim().is_empty() {
            return Err(invalid("telegram.bot_token is required"));
        }
        if self.telegram.chat_ids.iter().any(|id| id.as_str().trim().is_empty()) {
            return Err(invalid("telegram.chat_ids contains an empty id"));
        }

        self.alerts
            .validate()
            .map_err(|e| invalid(format!("alerts: {}", e)))?;

        self.schedule()?;

        if self.http.timeout_secs == 0 {
            return Err(invalid("http.timeout_secs must be greater than zero"));
        }

        Ok(())
    }

    // ── Derived values ──────────────────────────────────────────────

    /// Configured locations, in file order. Entries that fail validation
    /// are skipped.
    pub fn locations(&self) -> Vec<Location> {
        self.locations.iter().filter_map(LocationConfig::to_location).collect()
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.alerts.rules()
    }

    /// The `watch` schedule: `cron` if set, else daily at `time` (default 07:00).
    pub fn schedule(&self) -> Result<Schedule> {
        let timezone: ScheduleTimezone = self
            .schedule
            .timezone
            .as_deref()
            .unwrap_or("local")
            .parse()
            .map_err(|e| invalid(format!("schedule: {}", e)))?;

        let expr = match (&self.schedule.cron, &self.schedule.time) {
            (Some(cron), _) => cron.clone(),
            (None, Some(time)) => time_to_cron(time).map_err(|e| invalid(format!("schedule: {}", e)))?,
            (None, None) => time_to_cron(DEFAULT_RUN_TIME).map_err(|e| invalid(format!("schedule: {}", e)))?,
        };

        Schedule::new(&expr, timezone).map_err(|e| invalid(format!("schedule: {}", e)))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    pub fn alert_delay(&self) -> Duration {
        Duration::from_millis(self.telegram.alert_delay_ms)
    }

    /// `OPENWEATHERMAP_API_KEY` first, then `api_keys.openweathermap`.
    pub fn openweathermap_api_key(&self) -> Result<String> {
        self.resolve_api_key(std::env::var(OPENWEATHERMAP_KEY_ENV).ok())
    }

    fn resolve_api_key(&self, env_value: Option<String>) -> Result<String> {
        env_value
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                self.api_keys
                    .openweathermap
                    .clone()
                    .filter(|k| !k.trim().is_empty())
            })
            .ok_or(ConfigError::MissingApiKey)
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::RuleKind;

    const SAMPLE: &str = r#"
locations:
  - name: Home
    city: "London, UK"
  - name: Cabin
    lat: 46.5
    lon: 7.9
alerts:
  wind: { enabled: true, threshold_kmh: 50, check_days_ahead: 1 }
  temperature: { enabled: true, min_temp_c: -5, max_temp_c: 35 }
  weather_conditions: { enabled: true, alert_on: [thunderstorm, snow] }
telegram:
  bot_token: "${TEST_BOT_TOKEN}"
  chat_ids: [123456789, "-100200300"]
api_keys:
  openweathermap: from-file
schedule:
  time: "06:30"
  timezone: UTC
"#;

    fn sample() -> AppConfig {
        let ctx = SubstitutionContext::isolated().with_env("TEST_BOT_TOKEN", "123:abc");
        AppConfig::parse_with(SAMPLE, &ctx).unwrap()
    }

    #[test]
    fn test_parse_sample() {
        let config = sample();
        config.validate().unwrap();

        assert_eq!(config.telegram.bot_token, "123:abc");
        assert_eq!(
            config.telegram.chat_ids,
            vec![ChatId::from("123456789"), ChatId::from("-100200300")]
        );
        assert!(config.telegram.send_summary_when_quiet);
        assert!(config.telegram.message_format.include_emoji);
        assert_eq!(config.subscribers.path, PathBuf::from("subscribers.json"));
        assert_eq!(config.http_timeout(), Duration::from_secs(10));
        assert!(!config.commentary.enabled);

        let locations = config.locations();
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[1], Location::coordinates("Cabin", 46.5, 7.9));
    }

    #[test]
    fn test_rules_from_config() {
        let rules = sample().rules();
        let wind = rules.iter().find(|r| matches!(r.kind, RuleKind::Wind { .. })).unwrap();
        assert!(wind.enabled);
        assert_eq!(wind.check_days_ahead, 1);
    }

    #[test]
    fn test_schedule_from_time() {
        let schedule = sample().schedule().unwrap();
        assert_eq!(schedule.expression(), "0 30 6 * * *");
        assert_eq!(schedule.timezone(), ScheduleTimezone::Utc);
    }

    #[test]
    fn test_cron_wins_over_time() {
        let mut config = sample();
        config.schedule.cron = Some("0 */6 * * *".to_string());
        assert_eq!(config.schedule().unwrap().expression(), "0 0 */6 * * *");
    }

    #[test]
    fn test_undefined_variable_is_an_error() {
        let err = AppConfig::parse_with(SAMPLE, &SubstitutionContext::isolated()).unwrap_err();
        assert!(matches!(err, ConfigError::Substitution(_)));
    }

    #[test]
    fn test_rejects_bad_coordinates() {
        let mut config = sample();
        config.locations[1].lat = Some(95.0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let mut config = sample();
        config.locations[1].name = "Home".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("duplicate location name"));
    }

    #[test]
    fn test_rejects_location_without_place() {
        let mut config = sample();
        config.locations[0].city = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_missing_token_and_bad_schedule() {
        let mut config = sample();
        config.telegram.bot_token = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = sample();
        config.schedule.time = Some("25:00".to_string());
        assert!(config.validate().is_err());

        let mut config = sample();
        config.schedule.timezone = Some("Mars/Olympus".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_condition() {
        let yaml = SAMPLE.replace("[thunderstorm, snow]", "[thunderstorm, sunshine]");
        let ctx = SubstitutionContext::isolated().with_env("TEST_BOT_TOKEN", "x");
        assert!(matches!(AppConfig::parse_with(&yaml, &ctx), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_rejects_negative_threshold() {
        let yaml = SAMPLE.replace("threshold_kmh: 50", "threshold_kmh: -5");
        let ctx = SubstitutionContext::isolated().with_env("TEST_BOT_TOKEN", "x");
        let config = AppConfig::parse_with(&yaml, &ctx).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_precedence() {
        let config = sample();
        assert_eq!(config.resolve_api_key(Some("from-env".into())).unwrap(), "from-env");
        assert_eq!(config.resolve_api_key(Some(" ".into())).unwrap(), "from-file");
        assert_eq!(config.resolve_api_key(None).unwrap(), "from-file");

        let mut config = sample();
        config.api_keys.openweathermap = None;
        assert!(matches!(config.resolve_api_key(None), Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn test_empty_file() {
        assert!(AppConfig::parse_with("", &SubstitutionContext::isolated()).is_err());
    }
}
