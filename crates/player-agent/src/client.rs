//! HTTP client for the coordinator
//!
//! Two underlying clients: a short-timeout one for the poll endpoints, where
//! a hung request must not stall the loop past its interval, and a
//! long-timeout one for media and update downloads. Connection failures and
//! 5xx responses map to `Transient` so callers know a retry is worthwhile;
//! `Unauthorized` is terminal and forces re-registration.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use signage_gateway_core::models::{
    AcknowledgeResponse, BroadcastContent, CheckUpdatesResponse, ContentDecision,
    DeviceConfigResponse, HeartbeatRequest, HeartbeatResponse, RegisterRequest, RegisterResponse,
    UpdateProgressReport, DEVICE_KEY_HEADER,
};
use signage_gateway_core::{Result, SignageError};

use crate::identity::DeviceIdentity;

const POLL_TIMEOUT: Duration = Duration::from_secs(10);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct CoordinatorClient {
    poll: reqwest::Client,
    download: reqwest::Client,
    base: String,
}

impl CoordinatorClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let poll = reqwest::Client::builder()
            .timeout(POLL_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SignageError::Configuration {
                message: format!("building http client: {}", e),
                key: None,
            })?;
        let download = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SignageError::Configuration {
                message: format!("building download client: {}", e),
                key: None,
            })?;
        Ok(Self {
            poll,
            download,
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse> {
        let response = self
            .poll
            .post(format!("{}/api/devices/register", self.base))
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        parse_json(response).await
    }

    pub async fn heartbeat(
        &self,
        identity: &DeviceIdentity,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse> {
        let response = self
            .poll
            .post(format!(
                "{}/api/devices/{}/heartbeat",
                self.base, identity.device_id
            ))
            .header(DEVICE_KEY_HEADER, &identity.credential)
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        parse_json(response).await
    }

    pub async fn resolve(&self, identity: &DeviceIdentity) -> Result<ContentDecision> {
        let response = self
            .poll
            .get(format!(
                "{}/api/devices/{}/resolve",
                self.base, identity.device_id
            ))
            .header(DEVICE_KEY_HEADER, &identity.credential)
            .send()
            .await
            .map_err(transport)?;
        parse_json(response).await
    }

    pub async fn device_config(&self, identity: &DeviceIdentity) -> Result<DeviceConfigResponse> {
        let response = self
            .poll
            .get(format!(
                "{}/api/devices/{}/config",
                self.base, identity.device_id
            ))
            .header(DEVICE_KEY_HEADER, &identity.credential)
            .send()
            .await
            .map_err(transport)?;
        parse_json(response).await
    }

    pub async fn active_broadcasts(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<Vec<BroadcastContent>> {
        let response = self
            .poll
            .get(format!(
                "{}/api/devices/{}/broadcasts",
                self.base, identity.device_id
            ))
            .header(DEVICE_KEY_HEADER, &identity.credential)
            .send()
            .await
            .map_err(transport)?;
        parse_json(response).await
    }

    pub async fn acknowledge_broadcast(
        &self,
        identity: &DeviceIdentity,
        broadcast_id: Uuid,
    ) -> Result<AcknowledgeResponse> {
        let response = self
            .poll
            .post(format!(
                "{}/api/devices/{}/broadcasts/{}/acknowledge",
                self.base, identity.device_id, broadcast_id
            ))
            .header(DEVICE_KEY_HEADER, &identity.credential)
            .send()
            .await
            .map_err(transport)?;
        parse_json(response).await
    }

    pub async fn broadcast_displayed(
        &self,
        identity: &DeviceIdentity,
        broadcast_id: Uuid,
    ) -> Result<()> {
        let response = self
            .poll
            .post(format!(
                "{}/api/devices/{}/broadcasts/{}/displayed",
                self.base, identity.device_id, broadcast_id
            ))
            .header(DEVICE_KEY_HEADER, &identity.credential)
            .send()
            .await
            .map_err(transport)?;
        expect_success(response).await
    }

    pub async fn check_updates(&self, identity: &DeviceIdentity) -> Result<CheckUpdatesResponse> {
        let response = self
            .poll
            .get(format!(
                "{}/api/devices/{}/updates",
                self.base, identity.device_id
            ))
            .header(DEVICE_KEY_HEADER, &identity.credential)
            .send()
            .await
            .map_err(transport)?;
        parse_json(response).await
    }

    pub async fn report_update_progress(
        &self,
        identity: &DeviceIdentity,
        update_id: Uuid,
        report: &UpdateProgressReport,
    ) -> Result<()> {
        let response = self
            .poll
            .post(format!(
                "{}/api/devices/{}/updates/{}/progress",
                self.base, identity.device_id, update_id
            ))
            .header(DEVICE_KEY_HEADER, &identity.credential)
            .json(report)
            .send()
            .await
            .map_err(transport)?;
        expect_success(response).await
    }

    /// Stream a coordinator-relative download path into `dest`.
    pub async fn download_to(
        &self,
        identity: &DeviceIdentity,
        download_path: &str,
        dest: &Path,
    ) -> Result<u64> {
        let response = self
            .download
            .get(format!("{}{}", self.base, download_path))
            .query(&[("device_id", identity.device_id.to_string())])
            .header(DEVICE_KEY_HEADER, &identity.credential)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_status(status, read_error_body(response).await));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| SignageError::Storage(format!("creating {}: {}", dest.display(), e)))?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(transport)?;
            file.write_all(&chunk)
                .await
                .map_err(|e| SignageError::Storage(format!("writing {}: {}", dest.display(), e)))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| SignageError::Storage(format!("flushing {}: {}", dest.display(), e)))?;
        debug!(path = %dest.display(), bytes = written, "download complete");
        Ok(written)
    }

    pub async fn upload_screenshot(&self, identity: &DeviceIdentity, png: Vec<u8>) -> Result<()> {
        let response = self
            .download
            .post(format!(
                "{}/api/devices/{}/screenshot",
                self.base, identity.device_id
            ))
            .header(DEVICE_KEY_HEADER, &identity.credential)
            .header("Content-Type", "image/png")
            .body(png)
            .send()
            .await
            .map_err(transport)?;
        expect_success(response).await
    }
}

fn transport(e: reqwest::Error) -> SignageError {
    SignageError::Transient(format!("coordinator unreachable: {}", e))
}

async fn read_error_body(response: reqwest::Response) -> String {
    match response.json::<serde_json::Value>().await {
        Ok(body) => body["error"].as_str().unwrap_or_default().to_string(),
        Err(_) => String::new(),
    }
}

fn error_from_status(status: StatusCode, message: String) -> SignageError {
    match status {
        StatusCode::UNAUTHORIZED => SignageError::Unauthorized(message),
        StatusCode::NOT_FOUND => SignageError::NotFound(message),
        StatusCode::BAD_REQUEST => SignageError::Validation(message),
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            SignageError::InvalidState(message)
        }
        s if s.is_server_error() => SignageError::Transient(message),
        s => SignageError::Transient(format!("unexpected status {}: {}", s, message)),
    }
}

async fn parse_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(error_from_status(status, read_error_body(response).await));
    }
    response
        .json()
        .await
        .map_err(|e| SignageError::Transient(format!("decoding response: {}", e)))
}

async fn expect_success(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    if !status.is_success() {
        return Err(error_from_status(status, read_error_body(response).await));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_error_taxonomy() {
        assert!(matches!(
            error_from_status(StatusCode::UNAUTHORIZED, String::new()),
            SignageError::Unauthorized(_)
        ));
        assert!(matches!(
            error_from_status(StatusCode::NOT_FOUND, String::new()),
            SignageError::NotFound(_)
        ));
        assert!(matches!(
            error_from_status(StatusCode::CONFLICT, String::new()),
            SignageError::InvalidState(_)
        ));
        assert!(matches!(
            error_from_status(StatusCode::UNPROCESSABLE_ENTITY, String::new()),
            SignageError::InvalidState(_)
        ));
        assert!(matches!(
            error_from_status(StatusCode::SERVICE_UNAVAILABLE, String::new()),
            SignageError::Transient(_)
        ));
    }

    #[test]
    fn transient_errors_are_retryable() {
        let err = error_from_status(StatusCode::INTERNAL_SERVER_ERROR, "db down".to_string());
        assert!(err.is_transient());
        let err = error_from_status(StatusCode::UNAUTHORIZED, String::new());
        assert!(!err.is_transient());
    }

    #[test]
    fn base_url_trailing_slash_is_stripped() {
        let client = CoordinatorClient::new("http://localhost:8090/").unwrap();
        assert_eq!(client.base, "http://localhost:8090");
    }
}
