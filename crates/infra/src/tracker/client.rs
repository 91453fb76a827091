//! Reqwest-based client of the external time-tracking service.
//!
//! Every response and transport failure is folded into [`TrackerError`]
//! right here; workflow bodies never see raw HTTP. The classification table
//! is deliberate and narrow:
//!
//! - 401 -> invalid credential
//! - 500 with a body matching "unable to validate token" -> invalid
//!   credential (the service reports dead keys this way on some endpoints)
//! - 500 with a body matching "request rate too large" -> hard rate failure,
//!   never retried
//! - everything else (404, 408, 429, 503, other 5xx, transport, timeout)
//!   -> transient, retried on the fixed delay

use std::time::Duration;

use async_trait::async_trait;
use leavesync_core::TrackerClient;
use leavesync_domain::{
    ApiCredential, AuthOutcome, EntryPayload, LeaveSyncError, TrackerError,
};
use reqwest::{Client as ReqwestClient, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};

const API_KEY_HEADER: &str = "X-Api-Key";

/// Configuration of the tracker client.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Base URL of the tracker API, without a trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { base_url: "https://api.tracker.example/v1".to_string(), timeout: Duration::from_secs(30) }
    }
}

/// HTTP adapter implementing the tracker port.
pub struct TrackerApiClient {
    client: ReqwestClient,
    config: TrackerConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentUserResponse {
    #[allow(dead_code)]
    id: String,
    workspace_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceResponse {
    #[allow(dead_code)]
    id: String,
    memberships: Vec<Membership>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Membership {
    user_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct CreatedEntryResponse {
    id: String,
}

impl TrackerApiClient {
    pub fn new(config: TrackerConfig) -> Result<Self, LeaveSyncError> {
        let client = ReqwestClient::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LeaveSyncError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    /// Send a request under the configured timeout and classify the result.
    async fn send(&self, builder: RequestBuilder) -> Result<Response, TrackerError> {
        let response = tokio::time::timeout(self.config.timeout, builder.send())
            .await
            .map_err(|_| {
                TrackerError::Transient(format!(
                    "request timed out after {:?}",
                    self.config.timeout
                ))
            })?
            .map_err(|e| TrackerError::Transient(format!("transport failure: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(%status, body = %truncate(&body), "tracker returned an error response");
        Err(classify_response(status, &body))
    }

    async fn parse<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, TrackerError> {
        response
            .json::<T>()
            .await
            .map_err(|e| TrackerError::Transient(format!("malformed tracker response: {e}")))
    }
}

#[async_trait]
impl TrackerClient for TrackerApiClient {
    /// Probe the credential via `GET /current-user`. Credential rejections
    /// come back as an invalid [`AuthOutcome`] instead of an error so the
    /// caller can fail the record and fire the one-shot notification.
    #[instrument(skip(self, credential))]
    async fn authenticate(
        &self,
        credential: &ApiCredential,
    ) -> Result<AuthOutcome, TrackerError> {
        let builder =
            self.client.get(self.url("/current-user")).header(API_KEY_HEADER, &credential.api_key);

        match self.send(builder).await {
            Ok(response) => {
                let user: CurrentUserResponse = Self::parse(response).await?;
                Ok(AuthOutcome { valid: true, workspace_ids: user.workspace_ids })
            }
            Err(TrackerError::InvalidCredential(_)) => Ok(AuthOutcome::invalid()),
            Err(other) => Err(other),
        }
    }

    #[instrument(skip(self, credential), fields(workspace_id, external_user_id))]
    async fn is_user_in_workspace(
        &self,
        credential: &ApiCredential,
        workspace_id: &str,
        external_user_id: &str,
    ) -> Result<bool, TrackerError> {
        let builder = self
            .client
            .get(self.url(&format!("/workspaces/{workspace_id}")))
            .header(API_KEY_HEADER, &credential.api_key);

        let response = self.send(builder).await?;
        let workspace: WorkspaceResponse = Self::parse(response).await?;
        Ok(workspace
            .memberships
            .iter()
            .any(|m| m.user_id == external_user_id && m.status.eq_ignore_ascii_case("active")))
    }

    #[instrument(skip(self, credential, entry), fields(workspace_id))]
    async fn create_entry(
        &self,
        credential: &ApiCredential,
        workspace_id: &str,
        entry: &EntryPayload,
    ) -> Result<String, TrackerError> {
        let builder = self
            .client
            .post(self.url(&format!("/workspaces/{workspace_id}/entries")))
            .header(API_KEY_HEADER, &credential.api_key)
            .json(entry);

        let response = self.send(builder).await?;
        let created: CreatedEntryResponse = Self::parse(response).await?;
        debug!(external_id = %created.id, "entry created");
        Ok(created.id)
    }

    #[instrument(skip(self, credential), fields(workspace_id, external_item_id))]
    async fn delete_entry(
        &self,
        credential: &ApiCredential,
        workspace_id: &str,
        external_item_id: &str,
    ) -> Result<(), TrackerError> {
        let builder = self
            .client
            .delete(self.url(&format!("/workspaces/{workspace_id}/entries/{external_item_id}")))
            .header(API_KEY_HEADER, &credential.api_key);

        self.send(builder).await?;
        Ok(())
    }
}

/// Fold a non-success response into a [`TrackerError`].
pub fn classify_response(status: StatusCode, body: &str) -> TrackerError {
    let summary = format!("{status}: {}", truncate(body));
    match status {
        StatusCode::UNAUTHORIZED => TrackerError::InvalidCredential(summary),
        StatusCode::INTERNAL_SERVER_ERROR => {
            let lower = body.to_lowercase();
            if lower.contains("unable to validate token") {
                TrackerError::InvalidCredential("unable to validate token".into())
            } else if lower.contains("request rate too large") {
                TrackerError::RateExceeded("request rate too large".into())
            } else {
                TrackerError::Transient(summary)
            }
        }
        // 404/408/429/503 and anything unlisted retry on the fixed delay.
        _ => TrackerError::Transient(summary),
    }
}

fn truncate(body: &str) -> &str {
    let end = body.char_indices().nth(200).map_or(body.len(), |(i, _)| i);
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_is_a_credential_failure() {
        let err = classify_response(StatusCode::UNAUTHORIZED, "");
        assert!(matches!(err, TrackerError::InvalidCredential(_)));
    }

    #[test]
    fn invalid_token_body_is_matched_case_insensitively() {
        let err = classify_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"message": "Unable to validate Token"}"#,
        );
        assert!(matches!(err, TrackerError::InvalidCredential(_)));
    }

    #[test]
    fn rate_too_large_body_is_a_hard_failure() {
        let err = classify_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"message": "Request rate too large"}"#,
        );
        assert!(matches!(err, TrackerError::RateExceeded(_)));
    }

    #[test]
    fn other_server_errors_are_transient() {
        for status in [
            StatusCode::NOT_FOUND,
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::BAD_GATEWAY,
            StatusCode::INTERNAL_SERVER_ERROR,
        ] {
            let err = classify_response(status, "something broke");
            assert!(err.is_transient(), "{status} must be transient");
        }
    }

    #[test]
    fn unlisted_statuses_default_to_transient() {
        assert!(classify_response(StatusCode::IM_A_TEAPOT, "").is_transient());
        assert!(classify_response(StatusCode::CONFLICT, "").is_transient());
    }
}
