use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::client::Endpoints;
use crate::error::{DerivError, DerivResult};

/// Client settings
/// * endpoint - The WebSocket endpoint, without the `app_id` query parameter
/// * app_id - The registered application id
/// * token - Optional API token stamped on every request
/// * timeout_secs - Handshake and response timeout in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    pub app_id: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
}

fn default_endpoint() -> String {
    Endpoints::DEFAULT_WS_URI.to_string()
}

fn default_timeout_secs() -> f64 {
    60.0
}

impl ClientConfig {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            endpoint: default_endpoint(),
            app_id: app_id.into(),
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: f64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Load settings from the optional `config/deriv` file, then `DERIV_*`
    /// environment variables (`DERIV_APP_ID`, `DERIV_TOKEN`, ...).
    pub fn load() -> DerivResult<Self> {
        let config = Config::builder()
            .add_source(File::with_name("config/deriv").required(false))
            .add_source(Environment::with_prefix("DERIV").try_parsing(true))
            .build()?;

        let settings: Self = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(source: &str) -> DerivResult<Self> {
        let config = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?;

        let settings: Self = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> DerivResult<()> {
        if self.app_id.trim().is_empty() {
            return Err(DerivError::Config("app_id is required".to_string()));
        }

        if self.endpoint.trim().is_empty() {
            return Err(DerivError::Config("endpoint cannot be empty".to_string()));
        }

        if !self.timeout_secs.is_finite() || self.timeout_secs <= 0.0 {
            return Err(DerivError::Config(format!(
                "timeout_secs must be a positive number, got {}",
                self.timeout_secs
            )));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }

    /// The endpoint with the application id attached.
    pub fn url(&self) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}app_id={}", self.endpoint, separator, self.app_id)
    }
}
