use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domains::sync::types::{PullRequest, PullResponse, PushRequest, PushResponse};
use crate::errors::{ServiceError, ServiceResult, SyncError, SyncResult};
use crate::types::Timestamp;

/// The central store that is authoritative for every record.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Every change the server accepted after `last_pulled_at`, plus the server time of the pull.
    async fn pull_changes(&self, last_pulled_at: Option<Timestamp>) -> SyncResult<PullResponse>;

    /// Submit one batch of local changes.
    async fn push_changes(&self, request: &PushRequest) -> SyncResult<PushResponse>;
}

/// JSON-over-HTTP remote authority.
///
/// `POST {base}/sync/pull` and `POST {base}/sync/push`. The bearer token is
/// supplied by whatever session layer the host application uses.
pub struct HttpRemoteAuthority {
    client: Client,
    base_url: String,
    bearer_token: RwLock<Option<String>>,
}

impl HttpRemoteAuthority {
    pub fn new(base_url: &str, request_timeout: Duration) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ServiceError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: RwLock::new(None),
        })
    }

    pub fn set_bearer_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.bearer_token.write() {
            *guard = token;
        }
    }

    fn bearer_token(&self) -> Option<String> {
        self.bearer_token.read().ok().and_then(|guard| guard.clone())
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> SyncResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(token) = self.bearer_token() {
            request = request.header(reqwest::header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<R>()
                .await
                .map_err(|e| SyncError::Protocol(format!("Failed to parse response from {}: {}", path, e)));
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to get error details".to_string());
        Err(status_error(status, &body))
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemoteAuthority {
    async fn pull_changes(&self, last_pulled_at: Option<Timestamp>) -> SyncResult<PullResponse> {
        debug!("Pulling changes since {:?}", last_pulled_at);
        self.post("/sync/pull", &PullRequest { last_pulled_at }).await
    }

    async fn push_changes(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        debug!("Pushing {} record(s)", request.record_count());
        self.post("/sync/push", request).await
    }
}

fn transport_error(error: reqwest::Error) -> SyncError {
    if error.is_timeout() {
        SyncError::Timeout
    } else {
        SyncError::Network(error.to_string())
    }
}

/// Map a non-success HTTP status onto the sync error taxonomy.
pub(crate) fn status_error(status: StatusCode, body: &str) -> SyncError {
    match status {
        StatusCode::UPGRADE_REQUIRED => SyncError::SchemaIncompatible(format!(
            "server requires a newer application version: {}",
            body
        )),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SyncError::AuthenticationFailed(format!("{}: {}", status, body))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => SyncError::Timeout,
        _ => SyncError::Server(format!("Server returned error {}: {}", status, body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(status_error(StatusCode::UPGRADE_REQUIRED, "").is_fatal());
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, "expired"),
            SyncError::AuthenticationFailed(_)
        ));
        let server = status_error(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert!(matches!(server, SyncError::Server(_)));
        assert!(server.is_transient());
        assert!(matches!(status_error(StatusCode::GATEWAY_TIMEOUT, ""), SyncError::Timeout));
    }

    #[test]
    fn test_base_url_normalised() {
        let remote = HttpRemoteAuthority::new("https://revenue.example.org/api/", Duration::from_secs(5)).unwrap();
        assert_eq!(remote.base_url, "https://revenue.example.org/api");
        assert_eq!(remote.bearer_token(), None);
        remote.set_bearer_token(Some("abc".into()));
        assert_eq!(remote.bearer_token().as_deref(), Some("abc"));
    }
}
