//! Remote service payloads

use serde::{Deserialize, Serialize};

/// Configuration returned by the device-config service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDeviceConfig {
    /// User the device is currently assigned to
    pub user_id: String,
    /// Authoritative settings document, as text
    pub config_text: String,
}

/// Request body for `POST {db_url}/device-config`
#[derive(Debug, Clone, Serialize)]
pub struct DeviceConfigRequest<'a> {
    pub deviceid: &'a str,
    pub current_config_data: &'a str,
}

/// Response body of the device-config service
///
/// The outer document's `config_data` is itself a JSON document of the same
/// shape; the inner one carries the effective values.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfigResponse {
    #[serde(default)]
    pub userid: Option<String>,
    #[serde(default)]
    pub config_data: Option<String>,
}

/// Per-file upload metadata, built immediately before each upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadHeader {
    /// `YYYY-MM-DD`
    pub datestr: String,
    /// `HHMMSS`
    pub timestr: String,
    /// Device serial number
    pub devicestr: String,
    /// User id reported by the device-config service
    pub userstr: String,
    /// Lower-cased file extension
    pub datatype: String,
    /// File length in bytes
    pub datasize: u64,
}

/// Upload service answer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub success: bool,
    /// Identifier assigned to the stored recording
    #[serde(default, alias = "security_id")]
    pub assigned_id: String,
}

impl UploadReceipt {
    /// Only a successful answer carrying an identifier confirms storage
    pub fn is_confirmed(&self) -> bool {
        self.success && !self.assigned_id.is_empty()
    }
}
