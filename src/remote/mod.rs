//! Remote services consumed by the ingest pipeline
//!
//! The pipeline only depends on the two traits here. [`http`] provides the
//! reqwest-backed implementations used by the binary.

pub mod http;
pub mod types;

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

pub use http::{HttpDeviceConfigService, HttpMediaUploadService};
pub use types::{RemoteDeviceConfig, UploadHeader, UploadReceipt};

/// Device configuration authority
#[async_trait]
pub trait DeviceConfigService: Send + Sync {
    /// Fetch the authoritative configuration for `device_serial`, sending the
    /// card's current settings text along
    async fn fetch_device_config(
        &self,
        device_serial: &str,
        current_config: &str,
    ) -> Result<RemoteDeviceConfig>;
}

/// Recording upload endpoint
#[async_trait]
pub trait MediaUploadService: Send + Sync {
    /// Upload one file; transport failures surface as `Err`, rejections as a
    /// receipt with `success == false`
    async fn upload_file(&self, header: &UploadHeader, file: &Path) -> Result<UploadReceipt>;
}
