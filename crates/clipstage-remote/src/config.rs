//! Backend connection settings

use std::time::Duration;
use url::Url;

pub const BACKEND_URL_VAR: &str = "CLIPSTAGE_BACKEND_URL";
pub const TIMEOUT_VAR: &str = "CLIPSTAGE_TIMEOUT_SECS";
pub const API_TOKEN_VAR: &str = "CLIPSTAGE_API_TOKEN";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No backend configured. Set CLIPSTAGE_BACKEND_URL")]
    NoBackendConfigured,
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    pub base_url: Url,
    pub timeout_secs: u64,
    pub api_token: Option<String>,
}

impl RemoteConfig {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ConfigError::Invalid(format!("{BACKEND_URL_VAR}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::Invalid(format!(
                "{BACKEND_URL_VAR}: {base_url} cannot carry a path"
            )));
        }
        Ok(Self {
            base_url,
            timeout_secs: 30,
            api_token: None,
        })
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = lookup(BACKEND_URL_VAR).ok_or(ConfigError::NoBackendConfigured)?;
        let mut config = Self::new(&url)?;

        if let Some(raw) = lookup(TIMEOUT_VAR) {
            config.timeout_secs = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{TIMEOUT_VAR}: {raw:?} is not a number")))?;
        }
        config.api_token = lookup(API_TOKEN_VAR).filter(|t| !t.trim().is_empty());
        Ok(config)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn missing_backend_is_reported() {
        assert!(matches!(
            RemoteConfig::from_lookup(lookup(&[])),
            Err(ConfigError::NoBackendConfigured)
        ));
    }

    #[test]
    fn reads_all_variables() {
        let config = RemoteConfig::from_lookup(lookup(&[
            (BACKEND_URL_VAR, "https://api.example.com/v1"),
            (TIMEOUT_VAR, "12"),
            (API_TOKEN_VAR, "secret"),
        ]))
        .unwrap();
        assert_eq!(config.base_url.as_str(), "https://api.example.com/v1");
        assert_eq!(config.timeout(), Duration::from_secs(12));
        assert_eq!(config.api_token.as_deref(), Some("secret"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            RemoteConfig::from_lookup(lookup(&[(BACKEND_URL_VAR, "not a url")])),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RemoteConfig::from_lookup(lookup(&[
                (BACKEND_URL_VAR, "http://localhost:8080"),
                (TIMEOUT_VAR, "soon"),
            ])),
            Err(ConfigError::Invalid(_))
        ));
        assert!(RemoteConfig::new("mailto:someone@example.com").is_err());
    }
}
