//! HTTP client for the management API.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::error::{PmtaApiError, Result};
use crate::model::{self, DomainQueueStatus, MtaStatus, QueueSummary, VmtaStatus};

/// Request timeout for every management call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Connection settings for [`PmtaClient`].
#[derive(Debug, Clone)]
pub struct PmtaClientConfig {
    /// Base URL of the management listener, e.g. `http://127.0.0.1:8080/`.
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for PmtaClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Management API client.
///
/// A single `reqwest::Client` is shared by all calls. Requests are never retried;
/// callers decide how to degrade on failure.
#[derive(Debug, Clone)]
pub struct PmtaClient {
    http: Client,
    base_url: Url,
}

impl PmtaClient {
    pub fn new(config: &PmtaClientConfig) -> Result<Self> {
        install_rustls_provider();

        let base_url = normalize_base_url(&config.base_url)?;
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| PmtaApiError::InvalidUrl(format!("{path}: {e}")))
    }

    async fn get_xml(&self, path: &str) -> Result<String> {
        let mut url = self.endpoint(path)?;
        url.query_pairs_mut().append_pair("format", "xml");

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(endpoint = path, status = status.as_u16(), "Management API call failed");
            return Err(PmtaApiError::status(path, status.as_u16()));
        }
        Ok(response.text().await?)
    }

    /// `GET /status`.
    pub async fn status(&self) -> Result<MtaStatus> {
        let body = self.get_xml("status").await?;
        model::parse_status(&body)
    }

    /// `GET /queues`.
    pub async fn queues(&self) -> Result<Vec<QueueSummary>> {
        let body = self.get_xml("queues").await?;
        model::parse_queues(&body)
    }

    /// `GET /vmtas`.
    pub async fn vmtas(&self) -> Result<Vec<VmtaStatus>> {
        let body = self.get_xml("vmtas").await?;
        model::parse_vmtas(&body)
    }

    /// `GET /domains`.
    pub async fn domains(&self) -> Result<Vec<DomainQueueStatus>> {
        let body = self.get_xml("domains").await?;
        model::parse_domains(&body)
    }

    /// `POST /reload`: re-read the MTA configuration.
    pub async fn reload(&self) -> Result<()> {
        let url = self.endpoint("reload")?;
        let response = self.http.post(url).send().await?;
        ensure_success("reload", response.status())
    }

    /// `POST /configFile`: replace the configuration file with `contents`.
    pub async fn upload_config(&self, contents: impl Into<String>) -> Result<()> {
        let url = self.endpoint("configFile")?;
        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(contents.into())
            .send()
            .await?;
        ensure_success("configFile", response.status())
    }
}

fn ensure_success(endpoint: &str, status: reqwest::StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(PmtaApiError::status(endpoint, status.as_u16()))
    }
}

/// Parse the base URL and make sure relative joins keep its path.
fn normalize_base_url(raw: &str) -> Result<Url> {
    let mut url =
        Url::parse(raw.trim()).map_err(|e| PmtaApiError::InvalidUrl(format!("{raw}: {e}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
