use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

const PING_PATH: &str = "device/ext/ping";
const REPORT_PATH: &str = "device/ext/bandwidth_point";
const USER_AGENT: &str = "HedNet-VPS-Node/1.0";

/// Usage submitted to the service on every report.
#[derive(Debug, Clone, Serialize)]
pub struct BandwidthReport {
    pub added_point: f64,
    pub total_bytes: u64,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid api endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("access token is not a valid header value")]
    InvalidToken,
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),
}

#[async_trait]
pub(crate) trait ApiBackend: Send + Sync {
    async fn ping(&self, base_url: &Url) -> Result<(), ApiError>;

    async fn submit_report(
        &self,
        base_url: &Url,
        report: &BandwidthReport,
    ) -> Result<(), ApiError>;
}

/// Pre-authenticated client for the node control endpoints. All outbound
/// calls carry the bearer token through the client's default headers.
#[derive(Clone)]
pub struct ApiClient {
    base_url: Arc<Url>,
    backend: Arc<dyn ApiBackend>,
}

impl ApiClient {
    pub fn new(base_url: Url, token: &str) -> Result<Self, ApiError> {
        let backend = Arc::new(ReqwestApiBackend::new(token)?);
        Ok(Self {
            base_url: Arc::new(base_url),
            backend,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_backend(base_url: Url, backend: Arc<dyn ApiBackend>) -> Self {
        Self {
            base_url: Arc::new(base_url),
            backend,
        }
    }

    /// One-shot liveness/identity probe. True only on a success status; any
    /// transport error or non-success status is logged and reported as false.
    /// No retries — the caller decides whether to proceed.
    pub async fn authenticate(&self) -> bool {
        match self.backend.ping(&self.base_url).await {
            Ok(()) => {
                info!("authentication successful");
                true
            }
            Err(ApiError::HttpStatus(status)) => {
                error!(%status, "authentication failed");
                false
            }
            Err(err) => {
                error!(error = %err, "authentication error");
                false
            }
        }
    }

    pub async fn submit(&self, report: &BandwidthReport) -> Result<(), ApiError> {
        self.backend.submit_report(&self.base_url, report).await
    }
}

/// Default headers shared by the control-plane client and the download
/// client, matching what the browser extension sends.
pub(crate) fn default_headers(token: &str) -> Result<HeaderMap, ApiError> {
    let mut auth =
        HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| ApiError::InvalidToken)?;
    auth.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, auth);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    Ok(headers)
}

struct ReqwestApiBackend {
    client: reqwest::Client,
}

impl ReqwestApiBackend {
    fn new(token: &str) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .default_headers(default_headers(token)?)
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ApiBackend for ReqwestApiBackend {
    async fn ping(&self, base_url: &Url) -> Result<(), ApiError> {
        let endpoint = base_url
            .join(PING_PATH)
            .map_err(|err| ApiError::InvalidEndpoint(format!("{PING_PATH}: {err}")))?;
        let response = self.client.get(endpoint).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::HttpStatus(response.status()));
        }
        Ok(())
    }

    async fn submit_report(
        &self,
        base_url: &Url,
        report: &BandwidthReport,
    ) -> Result<(), ApiError> {
        let endpoint = base_url
            .join(REPORT_PATH)
            .map_err(|err| ApiError::InvalidEndpoint(format!("{REPORT_PATH}: {err}")))?;
        let response = self.client.post(endpoint).json(report).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::HttpStatus(response.status()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StaticBackend {
        ping_ok: bool,
        pinged: AtomicBool,
    }

    #[async_trait]
    impl ApiBackend for StaticBackend {
        async fn ping(&self, _base_url: &Url) -> Result<(), ApiError> {
            self.pinged.store(true, Ordering::SeqCst);
            if self.ping_ok {
                Ok(())
            } else {
                Err(ApiError::HttpStatus(StatusCode::UNAUTHORIZED))
            }
        }

        async fn submit_report(
            &self,
            _base_url: &Url,
            _report: &BandwidthReport,
        ) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn base() -> Url {
        Url::parse("https://api.hednetio.ovh").unwrap()
    }

    #[tokio::test]
    async fn authenticate_returns_true_on_success() {
        let backend = Arc::new(StaticBackend {
            ping_ok: true,
            pinged: AtomicBool::new(false),
        });
        let client = ApiClient::with_backend(base(), backend.clone());
        assert!(client.authenticate().await);
        assert!(backend.pinged.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn authenticate_returns_false_on_rejected_status() {
        let backend = Arc::new(StaticBackend {
            ping_ok: false,
            pinged: AtomicBool::new(false),
        });
        let client = ApiClient::with_backend(base(), backend);
        assert!(!client.authenticate().await);
    }

    #[test]
    fn report_payload_uses_wire_field_names() {
        let report = BandwidthReport {
            added_point: 10.0 / 3600.0,
            total_bytes: 123,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert!(value.get("added_point").is_some());
        assert_eq!(value.get("total_bytes").and_then(|v| v.as_u64()), Some(123));
    }

    #[test]
    fn token_becomes_sensitive_bearer_header() {
        let headers = default_headers("secret").unwrap();
        let auth = headers.get(header::AUTHORIZATION).unwrap();
        assert!(auth.is_sensitive());
        assert_eq!(auth.to_str().unwrap(), "Bearer secret");
    }

    #[test]
    fn control_characters_in_token_are_rejected() {
        let err = default_headers("bad\ntoken").unwrap_err();
        assert!(matches!(err, ApiError::InvalidToken));
    }
}
