//! Application configuration.
//!
//! Values come from the environment (a `.env` file is loaded first when
//! present). Command-line flags override them.

use std::env;

use crate::error::ConfigError;

/// Default LMS API base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:9090";

/// Default HTTP port of `rosterload serve`.
pub const DEFAULT_PORT: u16 = 3000;

/// Page size used when listing existing users.
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Maximum upload size (in bytes).
///
/// 10 MB limit.
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Runtime configuration of an import workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    /// LMS API base URL (`ROSTERLOAD_API_URL`)
    pub api_url: String,
    /// Bearer token forwarded to the LMS API (`ROSTERLOAD_API_TOKEN`)
    pub api_token: Option<String>,
    /// Send a welcome message to each created user (`ROSTERLOAD_SEND_WELCOME`)
    pub send_welcome: bool,
    /// Page size when loading existing users (`ROSTERLOAD_PAGE_SIZE`)
    pub page_size: u32,
    /// Port of the HTTP service (`ROSTERLOAD_PORT`)
    pub port: u16,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            send_welcome: true,
            page_size: DEFAULT_PAGE_SIZE,
            port: DEFAULT_PORT,
        }
    }
}

impl ImportConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            api_url: get("ROSTERLOAD_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_url),
            api_token: get("ROSTERLOAD_API_TOKEN"),
            send_welcome: match get("ROSTERLOAD_SEND_WELCOME") {
                Some(v) => parse_bool("ROSTERLOAD_SEND_WELCOME", &v)?,
                None => defaults.send_welcome,
            },
            page_size: parse_or("ROSTERLOAD_PAGE_SIZE", get("ROSTERLOAD_PAGE_SIZE"), defaults.page_size)?,
            port: parse_or("ROSTERLOAD_PORT", get("ROSTERLOAD_PORT"), defaults.port)?,
        })
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { name, value: value.to_string() }),
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(v) => v.parse().map_err(|_| ConfigError::InvalidValue { name, value: v }),
        None => Ok(default),
    }
}
