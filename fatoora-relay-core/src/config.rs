//! Configuration and portal selection.
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use thiserror::Error;

/// Environment variable pointing at a TOML config file.
pub const CONFIG_PATH_ENV: &str = "FATOORA_RELAY_CONFIG";
/// Forces a single base URL for every portal (proxies, mocks).
pub const BASE_URL_ENV: &str = "FATOORA_RELAY_BASE_URL";
pub const STORE_DIR_ENV: &str = "FATOORA_RELAY_STORE_DIR";
pub const ACCEPT_LANGUAGE_ENV: &str = "FATOORA_RELAY_ACCEPT_LANGUAGE";

/// ZATCA portal an identity is onboarded against.
///
/// The portal selects the API base URL and the certificate template name
/// embedded in the CSR.
/// - Sandbox: the "Integration Sandbox" (developer portal).
/// - Simulation: the "Simulation Test Environment", which requires sign-up.
/// - Production: the live environment.
///
/// # Examples
/// ```rust
/// use std::str::FromStr;
/// use fatoora_relay_core::config::PortalType;
///
/// let portal = PortalType::from_str("Simulation")?;
/// assert_eq!(portal, PortalType::Simulation);
/// # Ok::<(), fatoora_relay_core::config::PortalParseError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortalType {
    Sandbox,
    Simulation,
    Production,
}

/// Error returned when parsing a [`PortalType`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortalParseError {
    #[error("invalid portal type: {input}")]
    Invalid { input: String },
}

impl FromStr for PortalType {
    type Err = PortalParseError;
    fn from_str(portal: &str) -> Result<PortalType, PortalParseError> {
        match portal.trim().to_ascii_lowercase().as_str() {
            "sandbox" | "non_production" | "developer-portal" => Ok(PortalType::Sandbox),
            "simulation" => Ok(PortalType::Simulation),
            "production" => Ok(PortalType::Production),
            _ => Err(PortalParseError::Invalid {
                input: portal.to_string(),
            }),
        }
    }
}

impl fmt::Display for PortalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PortalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortalType::Sandbox => "sandbox",
            PortalType::Simulation => "simulation",
            PortalType::Production => "production",
        }
    }

    pub fn default_endpoint_url(&self) -> &'static str {
        match self {
            PortalType::Sandbox => "https://gw-fatoora.zatca.gov.sa/e-invoicing/developer-portal/",
            PortalType::Simulation => "https://gw-fatoora.zatca.gov.sa/e-invoicing/simulation/",
            PortalType::Production => "https://gw-fatoora.zatca.gov.sa/e-invoicing/core/",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value for '{key}': {message}")]
    Invalid { key: &'static str, message: String },
}

/// Whether invoices go to the authority when saved or wait for the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionMode {
    #[default]
    Immediate,
    Background,
}

/// Base URLs per portal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalEndpoints {
    pub sandbox: String,
    pub simulation: String,
    pub production: String,
}

impl Default for PortalEndpoints {
    fn default() -> Self {
        Self {
            sandbox: PortalType::Sandbox.default_endpoint_url().into(),
            simulation: PortalType::Simulation.default_endpoint_url().into(),
            production: PortalType::Production.default_endpoint_url().into(),
        }
    }
}

impl PortalEndpoints {
    pub fn for_portal(&self, portal: PortalType) -> &str {
        match portal {
            PortalType::Sandbox => &self.sandbox,
            PortalType::Simulation => &self.simulation,
            PortalType::Production => &self.production,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_parallel: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_parallel: 1 }
    }
}

/// Daily window in which the background sweep may talk to the authority.
///
/// A window whose start is after its end wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendWindow {
    #[serde(with = "hh_mm")]
    pub start: NaiveTime,
    #[serde(with = "hh_mm")]
    pub end: NaiveTime,
}

impl SendWindow {
    pub fn contains(&self, now: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= now && now <= self.end
        } else {
            now >= self.start || now <= self.end
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub lookback_hours: u32,
    pub window: Option<SendWindow>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 24,
            window: None,
        }
    }
}

/// Runtime configuration for the relay.
///
/// # Examples
/// ```rust
/// use fatoora_relay_core::config::{Config, SubmissionMode};
///
/// let config = Config::from_toml_str(r#"
///     accept_language = "ar"
///     submission_mode = "background"
///     [batch]
///     max_parallel = 4
/// "#)?;
/// assert_eq!(config.accept_language, "ar");
/// assert_eq!(config.submission_mode, SubmissionMode::Background);
/// assert_eq!(config.batch.max_parallel, 4);
/// # Ok::<(), fatoora_relay_core::config::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoints: PortalEndpoints,
    pub base_url_override: Option<String>,
    pub accept_language: String,
    pub onboarding_timeout_secs: u64,
    pub invoice_timeout_secs: u64,
    pub submission_mode: SubmissionMode,
    pub batch: BatchConfig,
    pub sweep: SweepConfig,
    pub store_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            endpoints: PortalEndpoints::default(),
            base_url_override: None,
            accept_language: "en".into(),
            onboarding_timeout_secs: 30,
            invoice_timeout_secs: 300,
            submission_mode: SubmissionMode::Immediate,
            batch: BatchConfig::default(),
            sweep: SweepConfig::default(),
            store_dir: PathBuf::from("./fatoora-relay-data"),
        }
    }
}

impl Config {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` (or `FATOORA_RELAY_CONFIG`), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                tracing::info!(path = %path.display(), "loaded relay config");
                toml::from_str(&raw)?
            }
            None => Config::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(url) = non_empty_env(BASE_URL_ENV) {
            tracing::debug!(%url, "base URL overridden from environment");
            self.base_url_override = Some(url);
        }
        if let Some(dir) = non_empty_env(STORE_DIR_ENV) {
            self.store_dir = PathBuf::from(dir);
        }
        if let Some(lang) = non_empty_env(ACCEPT_LANGUAGE_ENV) {
            self.accept_language = lang;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.accept_language.as_str(), "en" | "ar") {
            return Err(ConfigError::Invalid {
                key: "accept_language",
                message: format!("expected 'en' or 'ar', got '{}'", self.accept_language),
            });
        }
        if self.batch.max_parallel == 0 {
            return Err(ConfigError::Invalid {
                key: "batch.max_parallel",
                message: "must be at least 1".into(),
            });
        }
        if self.onboarding_timeout_secs == 0 || self.invoice_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "timeouts",
                message: "timeouts must be positive".into(),
            });
        }
        Ok(())
    }

    /// Base URL for `portal`, always ending in `/`.
    pub fn base_url(&self, portal: PortalType) -> String {
        let url = self
            .base_url_override
            .as_deref()
            .unwrap_or_else(|| self.endpoints.for_portal(portal));
        if url.ends_with('/') {
            url.to_string()
        } else {
            format!("{url}/")
        }
    }

    pub fn onboarding_timeout(&self) -> Duration {
        Duration::from_secs(self.onboarding_timeout_secs)
    }

    pub fn invoice_timeout(&self) -> Duration {
        Duration::from_secs(self.invoice_timeout_secs)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

mod hh_mm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).expect("valid time")
    }

    #[test]
    fn portal_parses_aliases() {
        assert_eq!("non_production".parse::<PortalType>().unwrap(), PortalType::Sandbox);
        assert_eq!("Sandbox".parse::<PortalType>().unwrap(), PortalType::Sandbox);
        assert_eq!("PRODUCTION".parse::<PortalType>().unwrap(), PortalType::Production);
        assert!("staging".parse::<PortalType>().is_err());
    }

    #[test]
    fn base_url_override_wins_and_gets_trailing_slash() {
        let config = Config {
            base_url_override: Some("http://127.0.0.1:9000/api".into()),
            ..Config::default()
        };
        assert_eq!(config.base_url(PortalType::Production), "http://127.0.0.1:9000/api/");
        assert_eq!(
            Config::default().base_url(PortalType::Simulation),
            "https://gw-fatoora.zatca.gov.sa/e-invoicing/simulation/"
        );
    }

    #[test]
    fn send_window_wraps_past_midnight() {
        let window = SendWindow {
            start: t(22, 0),
            end: t(2, 0),
        };
        assert!(window.contains(t(23, 30)));
        assert!(window.contains(t(1, 0)));
        assert!(!window.contains(t(12, 0)));

        let day = SendWindow {
            start: t(8, 0),
            end: t(17, 0),
        };
        assert!(day.contains(t(8, 0)));
        assert!(!day.contains(t(18, 0)));
    }

    #[test]
    fn toml_config_parses_window_and_rejects_bad_values() {
        let config = Config::from_toml_str(
            r#"
            [sweep]
            lookback_hours = 12
            window = { start = "22:00", end = "02:30" }
            "#,
        )
        .expect("config parses");
        assert_eq!(config.sweep.lookback_hours, 12);
        assert_eq!(config.sweep.window.map(|w| w.end), Some(t(2, 30)));

        let err = Config::from_toml_str("accept_language = \"fr\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "accept_language", .. }));

        let err = Config::from_toml_str("[batch]\nmax_parallel = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "batch.max_parallel", .. }));
    }
}
