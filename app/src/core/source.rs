use derive_more::derive::{Display, Error};
use reqwest::Url;
use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;

#[derive(Debug, Display, Error)]
pub enum FetchError {
    #[display("Invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[display("Network error requesting {url}: {reason}")]
    Network { url: String, reason: String },

    #[display("Unexpected status {status} from {url}")]
    BadStatus { url: String, status: u16 },

    #[display("Error parsing response of {url}: {reason}")]
    Parse { url: String, reason: String },
}

impl FetchError {
    /// Everything but a malformed URL may succeed on the next attempt.
    pub fn is_transient(&self) -> bool {
        !matches!(self, FetchError::InvalidUrl { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::InvalidUrl { .. } => "invalid_url",
            FetchError::Network { .. } => "network",
            FetchError::BadStatus { .. } => "bad_status",
            FetchError::Parse { .. } => "parse",
        }
    }

    pub fn parse(url: impl Into<String>, reason: impl ToString) -> Self {
        FetchError::Parse {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Plain GET. Implementations return the complete body, also for error statuses.
pub trait HttpGet: Send + Sync + 'static {
    fn get(&self, url: Url) -> impl Future<Output = anyhow::Result<HttpResponse>> + Send;
}

#[derive(Debug, Clone)]
pub struct ExternalHttpClient {
    client: ClientWithMiddleware,
}

impl ExternalHttpClient {
    pub fn new(client: ClientWithMiddleware) -> Self {
        Self { client }
    }
}

impl HttpGet for ExternalHttpClient {
    async fn get(&self, url: Url) -> anyhow::Result<HttpResponse> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

pub fn validate_url(url: &str) -> Result<Url, FetchError> {
    let invalid = |reason: String| FetchError::InvalidUrl {
        url: url.to_string(),
        reason,
    };

    let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", parsed.scheme())));
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }

    Ok(parsed)
}

#[tracing::instrument(skip(http))]
pub async fn fetch_raw<H: HttpGet>(http: &H, url: &str) -> Result<Vec<u8>, FetchError> {
    let parsed = validate_url(url)?;

    let response = http.get(parsed).await.map_err(|e| FetchError::Network {
        url: url.to_string(),
        reason: format!("{:#}", e),
    })?;

    if response.status >= 300 {
        tracing::warn!(
            "Request to {} failed with status {}: {}",
            url,
            response.status,
            String::from_utf8_lossy(&response.body[..response.body.len().min(200)])
        );

        return Err(FetchError::BadStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    Ok(response.body)
}

pub async fn fetch_json<T: DeserializeOwned, H: HttpGet>(http: &H, url: &str) -> Result<T, FetchError> {
    let body = fetch_raw(http, url).await?;
    serde_json::from_slice(&body).map_err(|e| FetchError::parse(url, e))
}
