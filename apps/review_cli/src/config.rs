use std::{collections::HashMap, fs, path::Path};

use review_core::{
    aggregate::UnknownCsvField, parse_csv_fields, sync::DEFAULT_CONTACT, AggregateConfig,
    AggregationPolicy, ScoreSubmitMode, SyncSettings,
};
use shared::domain::Email;
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "review.toml";
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_LOG_FILTER: &str = "info";
const SENTINEL_SCORE: f64 = 50.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid server url '{value}': {source}")]
    InvalidServerUrl {
        value: String,
        source: url::ParseError,
    },
    #[error("no reviewer email configured; pass --user or set REVIEW_USER_EMAIL")]
    MissingUserEmail,
    #[error("unknown aggregation policy '{0}' (expected average, average-ignore-50 or ordinal)")]
    UnknownAggregation(String),
    #[error("unknown score mode '{0}' (expected immediate or batched)")]
    UnknownScoreMode(String),
    #[error(transparent)]
    CsvFields(#[from] UnknownCsvField),
}

/// Raw settings as read from `review.toml`, the environment and flags, in
/// that order of precedence (later wins).
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_url: String,
    pub user_email: Option<String>,
    pub contact: String,
    pub aggregation: String,
    pub score_mode: String,
    pub csv_fields: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            user_email: None,
            contact: DEFAULT_CONTACT.into(),
            aggregation: "average".into(),
            score_mode: "immediate".into(),
            csv_fields: None,
        }
    }
}

/// Settings validated into the types the controller runs on.
#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    pub server_url: Url,
    pub sync: SyncSettings,
}

pub fn load_settings(path: &Path) -> Settings {
    let mut settings = Settings::default();
    match fs::read_to_string(path) {
        Ok(raw) => settings.apply_file(&raw),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "could not read config file"),
    }
    settings.apply_env(|key| std::env::var(key).ok());
    settings
}

impl Settings {
    pub fn apply_file(&mut self, raw: &str) {
        let file_cfg = match toml::from_str::<HashMap<String, String>>(raw) {
            Ok(file_cfg) => file_cfg,
            Err(err) => {
                warn!(error = %err, "ignoring malformed config file");
                return;
            }
        };
        if let Some(v) = file_cfg.get("server_url") {
            self.server_url = v.clone();
        }
        if let Some(v) = file_cfg.get("user_email") {
            self.user_email = Some(v.clone());
        }
        if let Some(v) = file_cfg.get("contact") {
            self.contact = v.clone();
        }
        if let Some(v) = file_cfg.get("aggregation") {
            self.aggregation = v.clone();
        }
        if let Some(v) = file_cfg.get("score_mode") {
            self.score_mode = v.clone();
        }
        if let Some(v) = file_cfg.get("csv_fields") {
            self.csv_fields = Some(v.clone());
        }
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("REVIEW_SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = lookup("APP__SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = lookup("REVIEW_USER_EMAIL") {
            self.user_email = Some(v);
        }
        if let Some(v) = lookup("REVIEW_CONTACT") {
            self.contact = v;
        }
        if let Some(v) = lookup("REVIEW_AGGREGATION") {
            self.aggregation = v;
        }
        if let Some(v) = lookup("REVIEW_SCORE_MODE") {
            self.score_mode = v;
        }
        if let Some(v) = lookup("REVIEW_CSV_FIELDS") {
            self.csv_fields = Some(v);
        }
    }

    pub fn resolve(&self) -> Result<ResolvedSettings, ConfigError> {
        let server_url =
            Url::parse(self.server_url.trim()).map_err(|source| ConfigError::InvalidServerUrl {
                value: self.server_url.clone(),
                source,
            })?;

        let user_email = self
            .user_email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .ok_or(ConfigError::MissingUserEmail)?;

        let mut aggregate = AggregateConfig {
            policy: parse_aggregation(&self.aggregation)?,
            ..AggregateConfig::default()
        };
        if let Some(raw) = &self.csv_fields {
            aggregate.csv_fields = parse_csv_fields(raw)?;
        }

        Ok(ResolvedSettings {
            server_url,
            sync: SyncSettings {
                current_user: Email::from(user_email),
                aggregate,
                score_mode: parse_score_mode(&self.score_mode)?,
                contact: self.contact.clone(),
            },
        })
    }
}

pub fn parse_aggregation(raw: &str) -> Result<AggregationPolicy, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "average" => Ok(AggregationPolicy::Average {
            ignore_sentinel: None,
        }),
        "average-ignore-50" => Ok(AggregationPolicy::Average {
            ignore_sentinel: Some(SENTINEL_SCORE),
        }),
        "ordinal" => Ok(AggregationPolicy::Ordinal),
        _ => Err(ConfigError::UnknownAggregation(raw.to_string())),
    }
}

pub fn parse_score_mode(raw: &str) -> Result<ScoreSubmitMode, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "immediate" => Ok(ScoreSubmitMode::Immediate),
        "batched" => Ok(ScoreSubmitMode::Batched),
        _ => Err(ConfigError::UnknownScoreMode(raw.to_string())),
    }
}

/// Log directives from `RUST_LOG`; unset, blank or unparsable values fall
/// back to [`DEFAULT_LOG_FILTER`].
pub fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .map(str::trim)
        .filter(|directives| !directives.is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
