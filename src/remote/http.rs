//! HTTP implementations of the remote services

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::types::{
    DeviceConfigRequest, DeviceConfigResponse, RemoteDeviceConfig, UploadHeader, UploadReceipt,
};
use super::{DeviceConfigService, MediaUploadService};
use crate::config::RemoteConfig;
use crate::error::{AppError, Result};

/// Header carrying the JSON-encoded [`UploadHeader`]
pub const UPLOAD_HEADER_NAME: &str = "X-Upload-Header";

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

/// Decode the device-config service's doubly encoded answer
pub fn decode_device_config(body: &str) -> Result<RemoteDeviceConfig> {
    let outer: DeviceConfigResponse = serde_json::from_str(body)?;
    let inner_text = outer
        .config_data
        .ok_or_else(|| AppError::Remote("device-config response lacks config_data".to_string()))?;
    let inner: DeviceConfigResponse = serde_json::from_str(&inner_text)?;

    Ok(RemoteDeviceConfig {
        user_id: inner.userid.unwrap_or_default(),
        config_text: inner.config_data.ok_or_else(|| {
            AppError::Remote("device-config payload lacks config_data".to_string())
        })?,
    })
}

/// Device-config service at `{db_url}/device-config`
pub struct HttpDeviceConfigService {
    client: reqwest::Client,
    server_url: String,
}

impl HttpDeviceConfigService {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.request_timeout())?,
            server_url: config.db_url.clone(),
        })
    }
}

#[async_trait]
impl DeviceConfigService for HttpDeviceConfigService {
    async fn fetch_device_config(
        &self,
        device_serial: &str,
        current_config: &str,
    ) -> Result<RemoteDeviceConfig> {
        let url = endpoint(&self.server_url, "device-config");
        debug!("Fetching device config for {} from {}", device_serial, url);

        let response = self
            .client
            .post(&url)
            .json(&DeviceConfigRequest {
                deviceid: device_serial,
                current_config_data: current_config,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Remote(format!(
                "device-config returned {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        decode_device_config(&body)
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

/// Upload service: bearer token from `{auth_url}/login`, files streamed to
/// `{db_url}/upload`
pub struct HttpMediaUploadService {
    client: reqwest::Client,
    auth_url: String,
    db_url: String,
    username: String,
    password: String,
    /// Token cached for the rest of the pass
    token: Mutex<Option<String>>,
}

impl HttpMediaUploadService {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.request_timeout())?,
            auth_url: config.auth_url.clone(),
            db_url: config.db_url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            token: Mutex::new(None),
        })
    }

    async fn token(&self) -> Result<Option<String>> {
        if self.auth_url.trim().is_empty() {
            return Ok(None);
        }

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(Some(token.clone()));
        }

        let response = self
            .client
            .post(endpoint(&self.auth_url, "login"))
            .json(&LoginRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Remote(format!(
                "login returned {}",
                response.status()
            )));
        }

        let login: LoginResponse = response.json().await?;
        *cached = Some(login.token.clone());
        Ok(Some(login.token))
    }
}

#[async_trait]
impl MediaUploadService for HttpMediaUploadService {
    async fn upload_file(&self, header: &UploadHeader, file: &Path) -> Result<UploadReceipt> {
        let header_json = serde_json::to_string(header)?;
        let stream = ReaderStream::new(tokio::fs::File::open(file).await?);

        let mut request = self
            .client
            .post(endpoint(&self.db_url, "upload"))
            .header(UPLOAD_HEADER_NAME, header_json)
            .body(reqwest::Body::wrap_stream(stream));

        request = match self.token().await? {
            Some(token) => request.bearer_auth(token),
            None => request.basic_auth(&self.username, Some(&self.password)),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!("Upload of {} rejected with {}", file.display(), status);
            if status == reqwest::StatusCode::UNAUTHORIZED {
                // Force a fresh login on the next file
                *self.token.lock().await = None;
            }
            return Ok(UploadReceipt::default());
        }

        Ok(response.json().await?)
    }
}
