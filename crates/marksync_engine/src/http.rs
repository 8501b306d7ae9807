//! HTTP implementation of the remote client.
//!
//! Transport failures and HTTP statuses are folded into [`SyncError`] with
//! the retryable/fatal classification the queue consumes: 429 and 5xx are
//! retryable, other 4xx are fatal, and a 404 on `get_record` maps to `None`.

use crate::error::{SyncError, SyncResult};
use crate::remote::{NewRecord, RecordPatch, RemoteClient, RemoteRecord};
use reqwest::{Method, RequestBuilder, StatusCode};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_BODY_LIMIT: usize = 200;

/// A reqwest-backed client for the remote record store.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpRemoteClient {
    /// Creates a client for the given base URL with the default timeout.
    pub fn new(base_url: impl Into<String>) -> SyncResult<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Creates a client with an explicit request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::remote_fatal(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: None,
        })
    }

    /// Sets the bearer token sent with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn record_url(&self, container_id: &str, record_id: Option<&str>) -> String {
        match record_id {
            Some(id) => format!("{}/containers/{container_id}/records/{id}", self.base_url),
            None => format!("{}/containers/{container_id}/records", self.base_url),
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> SyncResult<(StatusCode, String)> {
        let response = builder.send().await.map_err(classify_transport)?;
        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;
        Ok((status, body))
    }

    fn decode_record(body: &str) -> SyncResult<RemoteRecord> {
        serde_json::from_str(body)
            .map_err(|e| SyncError::Serialization(format!("invalid record response: {e}")))
    }
}

impl RemoteClient for HttpRemoteClient {
    async fn create_record(
        &self,
        container_id: &str,
        record: &NewRecord,
    ) -> SyncResult<RemoteRecord> {
        let url = self.record_url(container_id, None);
        let (status, body) = self
            .send(self.request(Method::POST, &url).json(record))
            .await?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }
        Self::decode_record(&body)
    }

    async fn update_record(
        &self,
        container_id: &str,
        record_id: &str,
        patch: &RecordPatch,
    ) -> SyncResult<RemoteRecord> {
        let url = self.record_url(container_id, Some(record_id));
        let (status, body) = self
            .send(self.request(Method::PATCH, &url).json(patch))
            .await?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }
        Self::decode_record(&body)
    }

    async fn delete_record(&self, container_id: &str, record_id: &str) -> SyncResult<()> {
        let url = self.record_url(container_id, Some(record_id));
        let (status, body) = self.send(self.request(Method::DELETE, &url)).await?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }
        Ok(())
    }

    async fn get_record(
        &self,
        container_id: &str,
        record_id: &str,
    ) -> SyncResult<Option<RemoteRecord>> {
        let url = self.record_url(container_id, Some(record_id));
        let (status, body) = self.send(self.request(Method::GET, &url)).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }
        Self::decode_record(&body).map(Some)
    }
}

/// Maps an HTTP error status to a classified sync error.
fn classify_status(status: StatusCode, body: &str) -> SyncError {
    let snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    let message = format!("http {status}: {snippet}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SyncError::remote_retryable(message)
    } else {
        SyncError::remote_fatal(message)
    }
}

/// Maps a transport-level failure (connect, reset, timeout) to a
/// retryable error; response-decoding failures are serialization errors.
fn classify_transport(err: reqwest::Error) -> SyncError {
    if err.is_decode() {
        SyncError::Serialization(err.to_string())
    } else {
        SyncError::remote_retryable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down").is_retryable());
        assert!(classify_status(StatusCode::INTERNAL_SERVER_ERROR, "").is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!classify_status(StatusCode::BAD_REQUEST, "").is_retryable());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "").is_retryable());
        assert!(!classify_status(StatusCode::NOT_FOUND, "").is_retryable());
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let err = classify_status(StatusCode::BAD_REQUEST, &body);
        assert!(err.to_string().len() < 400);
    }

    #[test]
    fn url_construction() {
        let client = HttpRemoteClient::new("https://records.example.com/api/").unwrap();
        assert_eq!(client.base_url(), "https://records.example.com/api");
        assert_eq!(
            client.record_url("db-1", None),
            "https://records.example.com/api/containers/db-1/records"
        );
        assert_eq!(
            client.record_url("db-1", Some("rec-7")),
            "https://records.example.com/api/containers/db-1/records/rec-7"
        );
    }
}
