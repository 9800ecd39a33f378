use std::env;
use thiserror::Error;

const DEFAULT_MIXPANEL_API_HOST: &str = "https://api.mixpanel.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable must be set")]
    MissingVar(&'static str),
}

#[derive(Debug, Clone)]
pub struct MixpanelConfig {
    pub token: String,
    pub api_host: String,
}

/// Process configuration, resolved once at startup. A missing gateway key is
/// fatal before the first request is served; a missing analytics token only
/// switches reporting into no-op mode.
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway_api_url: String,
    pub gateway_api_key: String,
    pub mixpanel: Option<MixpanelConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
        let gateway_api_url = lookup("GATEWAY_API_URL")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingVar("GATEWAY_API_URL"))?;
        let gateway_api_key = lookup("GATEWAY_API_KEY")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingVar("GATEWAY_API_KEY"))?;

        let mixpanel = lookup("MIXPANEL_TOKEN")
            .filter(|s| !s.is_empty())
            .map(|token| MixpanelConfig {
                token,
                api_host: lookup("MIXPANEL_API_HOST")
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| DEFAULT_MIXPANEL_API_HOST.to_string()),
            });

        Ok(Config {
            gateway_api_url,
            gateway_api_key,
            mixpanel,
        })
    }
}
