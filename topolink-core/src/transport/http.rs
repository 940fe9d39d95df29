use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, Method, RequestBuilder};

use super::{Transport, TransportResponse, error_message};
use crate::error::TransportError;
use crate::settings::ClientSettings;

/// reqwest-backed transport for the simulation server.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    api_version: String,
    timeout: Duration,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpTransport {
    /// Client for `base_url` with a per-request `timeout`.
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let base_url = normalize_base_url(base_url.into());
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        info!("[HttpTransport] Created transport for {}", base_url);

        Ok(Self {
            client,
            base_url,
            api_version: "v2".to_string(),
            timeout,
        })
    }

    /// Client configured from the server and controller settings.
    pub fn from_settings(
        settings: &ClientSettings,
    ) -> Result<Self, TransportError> {
        Ok(Self::new(
            settings.server.base_url(),
            settings.controller.request_timeout(),
        )?
        .with_api_version(settings.controller.api_version.clone()))
    }

    /// Prefix for relative paths; an empty string disables prefixing.
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into().trim_matches('/').to_string();
        self
    }

    /// Normalized base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the full URL for `path`.
    ///
    /// Absolute URLs pass through untouched; paths that already carry the
    /// version segment are only joined to the base.
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let path = path.trim_start_matches('/');
        if self.api_version.is_empty()
            || path == self.api_version
            || path.starts_with(&format!("{}/", self.api_version))
        {
            format!("{}/{}", self.base_url, path)
        } else {
            format!("{}/{}/{}", self.base_url, self.api_version, path)
        }
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        url: &str,
    ) -> Result<TransportResponse, TransportError> {
        let response = request.send().await.map_err(|e| {
            debug!("[HttpTransport] {} failed: {}", url, e);
            TransportError::from(e)
        })?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;

        if (200..300).contains(&status) {
            Ok(TransportResponse { status, body })
        } else {
            let message = error_message(status, &body);
            warn!(
                "[HttpTransport] {} answered {}: {}",
                url, status, message
            );
            Err(TransportError::Http { status, message })
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<TransportResponse, TransportError> {
        let url = self.build_url(path);
        debug!("[HttpTransport] {} {}", method, url);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        self.execute(request, &url).await.map_err(|e| match e {
            TransportError::Timeout(_) => TransportError::Timeout(self.timeout),
            other => other,
        })
    }

    async fn request_synchronous(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let url = self.build_url(path);
        let request = self.client.get(&url).timeout(timeout);
        self.execute(request, &url).await.map_err(|e| match e {
            TransportError::Timeout(_) => TransportError::Timeout(timeout),
            other => other,
        })
    }
}

/// Many users type `localhost:3080`, which reqwest rejects; add a scheme
/// when missing and drop the trailing slash so joins stay single-slashed.
fn normalize_base_url(raw: String) -> String {
    let trimmed = raw.trim().trim_end_matches('/').to_string();
    let with_scheme =
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed
        } else {
            format!("http://{}", trimmed)
        };
    if with_scheme != raw {
        warn!(
            "[HttpTransport] Normalized base URL from '{}' to '{}'",
            raw, with_scheme
        );
    }
    with_scheme
}
