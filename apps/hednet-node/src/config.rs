use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.hednetio.ovh";
pub const DEFAULT_CHANNEL_URL: &str = "wss://api.hednetio.ovh/websocket";

const DEFAULT_RESOURCES: [&str; 2] = [
    "https://job.hednetio.ovh/500MB-CZIPtestfile.org.zip",
    "https://job.hednetio.ovh/500MB-CZIPtestfilea.org.zip",
];

const DEFAULT_CHUNK_DELAY_MS: u64 = 100;
const DEFAULT_REPORT_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;
const DEFAULT_IDLE_SECS: u64 = 3600;
const DEFAULT_POINTS_PER_HOUR: f64 = 10.0;
const DEFAULT_RECONNECT_DELAY_SECS: u64 = 10;
const DEFAULT_ERROR_BACKOFF_SECS: u64 = 60;

/// Node agent configuration. Every tunable the loop depends on lives here;
/// nothing is hardcoded in the worker or channel manager.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub base_url: Url,
    pub channel_url: Url,
    pub token: String,
    pub resources: Vec<Url>,
    pub chunk_delay: Duration,
    pub report_threshold: u64,
    pub idle_wait: Duration,
    pub points_per_hour: f64,
    pub reconnect_delay: Duration,
    pub error_backoff: Duration,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid api url: {0}")]
    InvalidApiUrl(String),
    #[error("invalid channel url: {0}")]
    InvalidChannelUrl(String),
    #[error("invalid resource url '{0}': {1}")]
    InvalidResource(String, String),
    #[error("resource list cannot be empty")]
    EmptyResources,
    #[error("access token cannot be empty")]
    MissingToken,
}

impl NodeConfig {
    /// Build a config from explicit URLs and token, pulling the remaining
    /// tunables (and an optional resource list override) from the
    /// environment.
    pub fn build(api_url: &str, channel_url: &str, token: &str) -> Result<Self, ConfigError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ConfigError::MissingToken);
        }

        let base_url = parse_http_url(api_url)?;
        let channel_url = parse_channel_url(channel_url)?;

        let resources = match std::env::var("HEDNET_RESOURCES") {
            Ok(raw) => parse_resources(&raw)?,
            Err(_) => DEFAULT_RESOURCES
                .iter()
                .map(|raw| {
                    Url::parse(raw).map_err(|err| {
                        ConfigError::InvalidResource(raw.to_string(), err.to_string())
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        Ok(Self {
            base_url,
            channel_url,
            token: token.to_string(),
            resources,
            chunk_delay: Duration::from_millis(env_u64(
                "HEDNET_CHUNK_DELAY_MS",
                DEFAULT_CHUNK_DELAY_MS,
            )),
            report_threshold: env_u64(
                "HEDNET_REPORT_THRESHOLD_BYTES",
                DEFAULT_REPORT_THRESHOLD_BYTES,
            ),
            idle_wait: Duration::from_secs(env_u64("HEDNET_IDLE_SECS", DEFAULT_IDLE_SECS)),
            points_per_hour: env_f64("HEDNET_POINTS_PER_HOUR", DEFAULT_POINTS_PER_HOUR),
            reconnect_delay: Duration::from_secs(env_u64(
                "HEDNET_RECONNECT_DELAY_SECS",
                DEFAULT_RECONNECT_DELAY_SECS,
            )),
            error_backoff: Duration::from_secs(env_u64(
                "HEDNET_ERROR_BACKOFF_SECS",
                DEFAULT_ERROR_BACKOFF_SECS,
            )),
        })
    }
}

fn parse_http_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|err| ConfigError::InvalidApiUrl(err.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidApiUrl(format!(
            "unsupported scheme '{other}'"
        ))),
    }
}

fn parse_channel_url(raw: &str) -> Result<Url, ConfigError> {
    let url =
        Url::parse(raw.trim()).map_err(|err| ConfigError::InvalidChannelUrl(err.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::InvalidChannelUrl(format!(
            "unsupported scheme '{other}'"
        ))),
    }
}

fn parse_resources(raw: &str) -> Result<Vec<Url>, ConfigError> {
    let mut resources = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let url = Url::parse(entry)
            .map_err(|err| ConfigError::InvalidResource(entry.to_string(), err.to_string()))?;
        resources.push(url);
    }
    if resources.is_empty() {
        return Err(ConfigError::EmptyResources);
    }
    Ok(resources)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
