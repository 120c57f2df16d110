use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

/// Prefix for environment overrides, e.g. `HEARTH__CALENDAR__UTC_OFFSET_HOURS=2`.
const ENV_PREFIX: &str = "HEARTH";
const ENV_SEPARATOR: &str = "__";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a one-line summary of all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the published dashboard snapshot
    pub data_dir: PathBuf,

    /// Refresh loop settings
    pub refresh: RefreshConfig,

    /// Timeline engine settings
    pub calendar: CalendarConfig,

    /// Keyword table overrides; built-in tables are used when unset
    pub classification: ClassificationConfig,

    /// Calendar feeds, processed in the order listed
    pub feeds: Vec<FeedConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Minutes between refresh cycles
    pub interval_minutes: u32,

    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,

    /// Retries for transient fetch failures
    pub max_retries: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 1,
            request_timeout_secs: 15,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkHours {
    /// First hidden hour (inclusive)
    pub start: u32,
    /// First visible hour after work (exclusive bound)
    pub end: u32,
}

impl Default for WorkHours {
    fn default() -> Self {
        Self { start: 9, end: 18 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// Fixed offset applied to UTC timestamps. No DST handling.
    pub utc_offset_hours: i32,

    /// Number of days in the forward-looking window, today included
    pub window_days: u32,

    /// Owner name for entries shared by the household
    pub shared_identity: String,

    /// Hours hidden on parent work calendars
    pub work_hours: WorkHours,

    /// Merge identical events that appear on several calendars
    pub collapse_shared_events: bool,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: 1,
            window_days: 7,
            shared_identity: "family".to_string(),
            work_hours: WorkHours::default(),
            collapse_shared_events: false,
        }
    }
}

/// Wire format of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    #[default]
    Ics,
    Google,
}

/// Household role of a feed's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeedRole {
    #[default]
    Household,
    ParentWork,
    Child,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Display name, also the policy key
    pub name: String,

    /// ICS feed URL (`format = "ics"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Upstream calendar id (`format = "google"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar_id: Option<String>,

    /// API key for the upstream calendar API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default)]
    pub format: FeedFormat,

    #[serde(default)]
    pub role: FeedRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelLocationConfig {
    pub keyword: String,
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelerConfig {
    pub name: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub travel_locations: Option<Vec<TravelLocationConfig>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub travelers: Option<Vec<TravelerConfig>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub closure_keywords: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hearth");

        Self {
            data_dir,
            refresh: RefreshConfig::default(),
            calendar: CalendarConfig::default(),
            classification: ClassificationConfig::default(),
            feeds: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from `path`, layering `HEARTH__*` environment overrides.
    ///
    /// A default file is written first when `path` does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("Writing default configuration to {}", path.display());
            Self::default().save_to(path)?;
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Load configuration and validate it
    ///
    /// Warnings are logged; errors fail the load.
    pub fn load_validated(path: Option<&Path>) -> anyhow::Result<(Self, ValidationResult)> {
        let config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.feeds.is_empty() {
            result.add_warning("feeds", "No calendar feeds configured");
        }

        let mut seen = HashSet::new();
        for (i, feed) in self.feeds.iter().enumerate() {
            let field = format!("feeds[{}]", i);

            if feed.name.trim().is_empty() {
                result.add_error(format!("{}.name", field), "Feed name must not be empty");
            } else if !seen.insert(feed.name.as_str()) {
                result.add_error(
                    format!("{}.name", field),
                    format!("Duplicate feed name: {}", feed.name),
                );
            }

            match feed.format {
                FeedFormat::Ics => match &feed.url {
                    Some(url) => self.validate_url(url, &format!("{}.url", field), &mut result),
                    None => result.add_error(format!("{}.url", field), "ICS feeds need a url"),
                },
                FeedFormat::Google => {
                    if feed.calendar_id.as_deref().map_or(true, str::is_empty) {
                        result.add_error(
                            format!("{}.calendar_id", field),
                            "Google feeds need a calendar_id",
                        );
                    }
                    if feed.api_key.as_deref().map_or(true, str::is_empty) {
                        result.add_error(
                            format!("{}.api_key", field),
                            "Google feeds need an api_key",
                        );
                    }
                }
            }
        }

        let hours = self.calendar.work_hours;
        if hours.start >= hours.end || hours.end > 24 {
            result.add_error(
                "calendar.work_hours",
                format!("Invalid work hours {}..{}", hours.start, hours.end),
            );
        }

        if self.calendar.window_days == 0 {
            result.add_error("calendar.window_days", "Window must cover at least one day");
        } else if self.calendar.window_days > 31 {
            result.add_warning("calendar.window_days", "Window is longer than a month");
        }

        if !(-12..=14).contains(&self.calendar.utc_offset_hours) {
            result.add_error("calendar.utc_offset_hours", "Offset must be within -12..=14");
        }

        if self.calendar.shared_identity.trim().is_empty() {
            result.add_error("calendar.shared_identity", "Shared identity must not be empty");
        }

        if self.refresh.interval_minutes == 0 {
            result.add_error("refresh.interval_minutes", "Refresh interval must be at least 1");
        } else if self.refresh.interval_minutes > 1440 {
            result.add_warning(
                "refresh.interval_minutes",
                "Refresh interval is more than 24 hours",
            );
        }

        result
    }

    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Path to the snapshot file inside `data_dir`
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("snapshot.json")
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir()
            .ok_or(ConfigError::NoConfigDir)?
            .join("hearth");

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    fn ics_feed(name: &str, url: &str) -> FeedConfig {
        FeedConfig {
            name: name.to_string(),
            url: Some(url.to_string()),
            calendar_id: None,
            api_key: None,
            format: FeedFormat::Ics,
            role: FeedRole::Household,
        }
    }

    #[test]
    fn test_default_config_is_valid_with_warning() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
        assert!(result.warnings.iter().any(|w| w.field == "feeds"));
    }

    #[test]
    fn test_invalid_feed_url() {
        let mut config = Config::default();
        config.feeds.push(ics_feed("family", "not-a-url"));
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "feeds[0].url"));
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = Config::default();
        config.feeds.push(ics_feed("family", "ftp://example.com/cal.ics"));
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_duplicate_feed_names() {
        let mut config = Config::default();
        config.feeds.push(ics_feed("papa", "https://example.com/a.ics"));
        config.feeds.push(ics_feed("papa", "https://example.com/b.ics"));
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.message.contains("Duplicate")));
    }

    #[test]
    fn test_google_feed_requires_credentials() {
        let mut config = Config::default();
        config.feeds.push(FeedConfig {
            name: "daddy".into(),
            url: None,
            calendar_id: Some("primary".into()),
            api_key: None,
            format: FeedFormat::Google,
            role: FeedRole::Household,
        });
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "feeds[0].api_key"));
    }

    #[test]
    fn test_inverted_work_hours() {
        let mut config = Config::default();
        config.calendar.work_hours = WorkHours { start: 18, end: 9 };
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "calendar.work_hours"));
    }

    #[test]
    fn test_zero_window_is_error() {
        let mut config = Config::default();
        config.calendar.window_days = 0;
        assert!(!config.validate().is_valid());
    }

    #[test]
    fn test_load_from_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();

        assert!(path.exists());
        assert_eq!(config.calendar.utc_offset_hours, 1);
        assert_eq!(config.calendar.shared_identity, "family");
        assert!(config.feeds.is_empty());
    }

    #[test]
    fn test_load_from_parses_feeds_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/tmp/hearth"

[calendar]
window_days = 5

[classification]
closure_keywords = ["inset day"]

[[feeds]]
name = "papa"
url = "https://example.com/papa.ics"
role = "parent_work"

[[feeds]]
name = "wren"
url = "https://example.com/wren.ics"
role = "child"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/hearth"));
        assert_eq!(config.calendar.window_days, 5);
        assert_eq!(config.calendar.work_hours, WorkHours::default());
        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.feeds[0].role, FeedRole::ParentWork);
        assert_eq!(config.feeds[1].role, FeedRole::Child);
        assert_eq!(config.feeds[1].format, FeedFormat::Ics);
        assert_eq!(
            config.classification.closure_keywords,
            Some(vec!["inset day".to_string()])
        );
        assert!(config.validate().is_valid());
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[calendar]
collapse_shared_events = false

[refresh]
max_retries = 1
"#,
        )
        .unwrap();

        // Keys nothing else in this module asserts on after loading.
        std::env::set_var("HEARTH__CALENDAR__COLLAPSE_SHARED_EVENTS", "true");
        std::env::set_var("HEARTH__REFRESH__MAX_RETRIES", "7");
        let loaded = Config::load_from(&path);
        std::env::remove_var("HEARTH__CALENDAR__COLLAPSE_SHARED_EVENTS");
        std::env::remove_var("HEARTH__REFRESH__MAX_RETRIES");

        let config = loaded.unwrap();
        assert!(config.calendar.collapse_shared_events);
        assert_eq!(config.refresh.max_retries, 7);
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert!(summary.contains("field1"));
        assert!(summary.contains("field2"));
    }
}
