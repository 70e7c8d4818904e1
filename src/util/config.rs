#![allow(dead_code)]

//! Operator configuration: the ship-from address, the home country default,
//! service endpoints, and the carrier API key.
//!
//! Stored as JSON in the platform config directory. Endpoints and the API key
//! can be overridden per invocation through environment variables.

use std::fs;
use std::io;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Address;

const APP_QUALIFIER: &str = "com";
const APP_ORG: &str = "RateKeeper";
const APP_NAME: &str = "RateKeeper";

const CONFIG_FILENAME: &str = "config.json";

pub const DEFAULT_CARRIER_BASE_URL: &str = "https://api.easypost.com/v2/";
pub const DEFAULT_ORDERS_BASE_URL: &str = "http://localhost:3000/api/";
pub const DEFAULT_HOME_COUNTRY: &str = "US";

pub const CARRIER_URL_ENV: &str = "RATE_KEEPER_CARRIER_URL";
pub const ORDERS_URL_ENV: &str = "RATE_KEEPER_ORDERS_URL";
pub const API_KEY_ENV: &str = "RATE_KEEPER_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config directory unavailable")]
    StorageUnavailable,
    #[error("no config file at {}; create one with an `origin` address before shipping", .0.display())]
    Missing(PathBuf),
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Ship-from address used for every quote.
    pub origin: Address,
    #[serde(default = "default_home_country")]
    pub home_country: String,
    #[serde(default = "default_carrier_base_url")]
    pub carrier_base_url: String,
    #[serde(default = "default_orders_base_url")]
    pub orders_base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_home_country() -> String {
    DEFAULT_HOME_COUNTRY.to_string()
}

fn default_carrier_base_url() -> String {
    DEFAULT_CARRIER_BASE_URL.to_string()
}

fn default_orders_base_url() -> String {
    DEFAULT_ORDERS_BASE_URL.to_string()
}

pub fn config_path() -> Result<PathBuf, ConfigError> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .map(|dirs| dirs.config_dir().join(CONFIG_FILENAME))
        .ok_or(ConfigError::StorageUnavailable)
}

/// Load the config file and apply environment overrides.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let path = config_path()?;
    if !path.exists() {
        return Err(ConfigError::Missing(path));
    }
    let content = fs::read_to_string(&path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    finish(config)
}

/// Parse a config document directly. Used by tests.
pub fn config_from_str(content: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_json::from_str(content)?;
    finish(config)
}

fn finish(mut config: AppConfig) -> Result<AppConfig, ConfigError> {
    if let Ok(url) = std::env::var(CARRIER_URL_ENV) {
        if !url.trim().is_empty() {
            config.carrier_base_url = url;
        }
    }
    if let Ok(url) = std::env::var(ORDERS_URL_ENV) {
        if !url.trim().is_empty() {
            config.orders_base_url = url;
        }
    }
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.trim().is_empty() {
            config.api_key = Some(key);
        }
    }

    config.origin.apply_home_country(&config.home_country);
    config
        .origin
        .validate()
        .map_err(|e| ConfigError::Invalid(format!("origin {e}")))?;
    Ok(config)
}
