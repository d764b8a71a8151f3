//! HTTP implementation of [`Backend`] on top of `reqwest`.
//!
//! Every request carries `Authorization: Bearer <api key>` and
//! `X-Device-ID: <device id>`. A package `download_url` on another origin is
//! fetched without them.
//!
//! | operation              | request                              |
//! |------------------------|--------------------------------------|
//! | `test_connection`      | `GET  /health`                       |
//! | `check_access`         | `POST /access/check`                 |
//! | `sync_offline_logs`    | `POST /access/sync`                  |
//! | `get_whitelist`        | `GET  /devices/{device_id}/whitelist`|
//! | `check_updates`        | `GET  /updates/check`                |
//! | `download_update`      | `GET  /updates/{id}/download`        |
//! | `report_update_status` | `POST /updates/{id}/status`          |

use crate::backend::Backend;
use crate::error::{BackendError, BackendResult};
use crate::types::{AccessDecision, UpdateMetadata, UpdateStatus};
use bytes::Bytes;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};
use turnkey_core::{AccessEvent, CardId, DaemonConfig, Direction};

/// Header naming the calling device.
pub const DEVICE_ID_HEADER: &str = "X-Device-ID";

/// Configuration for [`HttpBackend`].
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    pub base_url: String,
    pub api_key: String,
    pub device_id: String,
    /// Upper bound for every API request.
    pub timeout: Duration,
    /// Upper bound for a package download, body included.
    pub download_timeout: Duration,
}

impl From<&DaemonConfig> for HttpBackendConfig {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            base_url: config.backend.url.clone(),
            api_key: config.backend.api_key.clone(),
            device_id: config.device.id.clone(),
            timeout: config.backend.connection_timeout,
            download_timeout: config.backend.download_timeout,
        }
    }
}

#[derive(Debug, Serialize)]
struct AccessCheckRequest<'a> {
    device_id: &'a str,
    card_id: &'a CardId,
    direction: Direction,
    timestamp: chrono::DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct SyncRequest<'a> {
    device_id: &'a str,
    logs: &'a [AccessEvent],
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WhitelistResponse {
    Plain(Vec<String>),
    Wrapped { cards: Vec<String> },
}

#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    device_id: &'a str,
    status: UpdateStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    timestamp: chrono::DateTime<Utc>,
}

/// Backend reached over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpBackend {
    config: HttpBackendConfig,
    client: Client,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::Configuration(e.to_string()))?;
        debug!(base_url = %config.base_url, "HTTP backend client created");
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &HttpBackendConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Whether `url` shares scheme, host and port with the base URL.
    fn same_origin(&self, url: &str) -> bool {
        match (Url::parse(&self.config.base_url), Url::parse(url)) {
            (Ok(base), Ok(target)) => base.origin() == target.origin(),
            _ => false,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        trace!(%method, path, "backend request");
        self.client
            .request(method, self.url(path))
            .bearer_auth(&self.config.api_key)
            .header(DEVICE_ID_HEADER, &self.config.device_id)
    }

    fn ensure_success(response: Response, endpoint: &str) -> BackendResult<Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(BackendError::status(status.as_u16(), endpoint))
        }
    }
}

impl Backend for HttpBackend {
    async fn test_connection(&self) -> bool {
        match self.request(Method::GET, "/health").send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "backend health probe failed");
                false
            }
        }
    }

    async fn check_access(&self, card: &CardId, direction: Direction) -> BackendResult<AccessDecision> {
        let body = AccessCheckRequest {
            device_id: &self.config.device_id,
            card_id: card,
            direction,
            timestamp: Utc::now(),
        };
        let response = self
            .request(Method::POST, "/access/check")
            .json(&body)
            .send()
            .await?;
        let response = Self::ensure_success(response, "/access/check")?;
        response
            .json::<AccessDecision>()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }

    async fn sync_offline_logs(&self, events: &[AccessEvent]) -> BackendResult<bool> {
        let body = SyncRequest {
            device_id: &self.config.device_id,
            logs: events,
        };
        let response = self
            .request(Method::POST, "/access/sync")
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), events = events.len(), "offline sync rejected");
            return Ok(false);
        }
        Ok(true)
    }

    async fn get_whitelist(&self) -> BackendResult<Vec<CardId>> {
        let endpoint = format!("/devices/{}/whitelist", self.config.device_id);
        let response = self.request(Method::GET, &endpoint).send().await?;
        let response = Self::ensure_success(response, &endpoint)?;
        let raw = match response
            .json::<WhitelistResponse>()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?
        {
            WhitelistResponse::Plain(cards) | WhitelistResponse::Wrapped { cards } => cards,
        };

        let mut cards = Vec::with_capacity(raw.len());
        for value in raw {
            match CardId::new(value) {
                Ok(card) => cards.push(card),
                Err(e) => warn!(error = %e, "skipping invalid whitelist entry"),
            }
        }
        Ok(cards)
    }

    async fn check_updates(&self) -> BackendResult<Option<UpdateMetadata>> {
        let response = self
            .request(Method::GET, "/updates/check")
            .query(&[("device_id", self.config.device_id.as_str())])
            .send()
            .await?;
        if matches!(response.status(), StatusCode::NO_CONTENT | StatusCode::NOT_FOUND) {
            return Ok(None);
        }
        let response = Self::ensure_success(response, "/updates/check")?;
        response
            .json::<UpdateMetadata>()
            .await
            .map(Some)
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }

    async fn download_update(&self, metadata: &UpdateMetadata) -> BackendResult<Bytes> {
        let endpoint = format!("/updates/{}/download", metadata.id);
        let request = match &metadata.download_url {
            Some(url) if self.same_origin(url) => self
                .client
                .get(url)
                .bearer_auth(&self.config.api_key)
                .header(DEVICE_ID_HEADER, &self.config.device_id),
            Some(url) => {
                debug!(%url, "package hosted elsewhere, downloading without credentials");
                self.client.get(url)
            }
            None => self.request(Method::GET, &endpoint),
        };
        let response = request
            .timeout(self.config.download_timeout)
            .send()
            .await?;
        let response = Self::ensure_success(response, &endpoint)?;
        let bytes = response.bytes().await?;
        debug!(update_id = %metadata.id, bytes = bytes.len(), "update package downloaded");
        Ok(bytes)
    }

    async fn report_update_status(
        &self,
        update_id: &str,
        status: UpdateStatus,
        error: Option<&str>,
    ) -> BackendResult<()> {
        let endpoint = format!("/updates/{update_id}/status");
        let body = StatusReport {
            device_id: &self.config.device_id,
            status,
            error,
            timestamp: Utc::now(),
        };
        let response = self.request(Method::POST, &endpoint).json(&body).send().await?;
        Self::ensure_success(response, &endpoint)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base_url: &str) -> HttpBackend {
        HttpBackend::new(HttpBackendConfig {
            base_url: base_url.to_string(),
            api_key: "key".to_string(),
            device_id: "turnstile_001".to_string(),
            timeout: Duration::from_secs(1),
            download_timeout: Duration::from_secs(30),
        })
        .unwrap()
    }

    #[rstest::rstest]
    #[case("http://host/api/updates/u-1/download", true)]
    #[case("http://host:80/cdn/pkg.zip", true)]
    #[case("https://host/api/updates/u-1/download", false)]
    #[case("http://host:8080/api/pkg.zip", false)]
    #[case("http://mirror.example.com/pkg.zip", false)]
    #[case("not a url", false)]
    fn test_same_origin(#[case] url: &str, #[case] expected: bool) {
        assert_eq!(backend("http://host/api").same_origin(url), expected);
    }

    #[test]
    fn test_url_joining() {
        assert_eq!(
            backend("http://host/api/").url("/health"),
            "http://host/api/health"
        );
        assert_eq!(
            backend("http://host/api").url("updates/check"),
            "http://host/api/updates/check"
        );
    }

    #[test]
    fn test_config_from_daemon_config() {
        let mut daemon = DaemonConfig::default();
        daemon.backend.api_key = "secret".to_string();
        let config = HttpBackendConfig::from(&daemon);
        assert_eq!(config.api_key, "secret");
        assert_eq!(config.device_id, "turnstile_001");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.download_timeout, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_offline() {
        // Port 9 (discard) on localhost is closed in test environments.
        let backend = backend("http://127.0.0.1:9");
        assert!(!backend.test_connection().await);
        let result = backend
            .check_access(&CardId::new("1").unwrap(), Direction::In)
            .await;
        assert!(matches!(result, Err(BackendError::Http(_))));
    }
}
