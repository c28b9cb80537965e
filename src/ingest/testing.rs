//! In-memory collaborators for pipeline tests
//!
//! `FakeVolumeServices` "mounts" a volume by replacing the private directory
//! with a symlink to a backing directory, so validation, reconciliation and
//! uploads run against real files while every device call is recorded.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::remote::{
    DeviceConfigService, MediaUploadService, RemoteDeviceConfig, UploadHeader, UploadReceipt,
};
use crate::volume::{DeviceHandle, VolumeServices};

pub type EventLog = Arc<Mutex<Vec<String>>>;

pub struct FakeVolumeServices {
    sources: HashMap<String, PathBuf>,
    events: EventLog,
    /// Number of failed lock attempts before the lock succeeds
    lock_failures: u32,
    fail_mount: bool,
    fail_enumerate: bool,
}

impl FakeVolumeServices {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            events: Arc::new(Mutex::new(Vec::new())),
            lock_failures: 0,
            fail_mount: false,
            fail_enumerate: false,
        }
    }

    pub fn with_volume(mut self, id: &str, source: &Path) -> Self {
        self.sources.insert(id.to_string(), source.to_path_buf());
        self
    }

    pub fn with_lock_failures(mut self, failures: u32) -> Self {
        self.lock_failures = failures;
        self
    }

    pub fn with_mount_failure(mut self) -> Self {
        self.fail_mount = true;
        self
    }

    pub fn with_enumeration_failure(mut self) -> Self {
        self.fail_enumerate = true;
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl VolumeServices for FakeVolumeServices {
    fn enumerate(&self) -> Result<Vec<String>> {
        if self.fail_enumerate {
            return Err(AppError::Internal("enumeration unavailable".to_string()));
        }
        let mut ids: Vec<String> = self.sources.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn mount_points(&self, _id: &str) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }

    fn label(&self, id: &str) -> Result<String> {
        Ok(id.trim_start_matches("/dev/").to_uppercase())
    }

    fn stable_id(&self, _id: &str) -> Option<String> {
        None
    }

    fn remove_mount_point(&self, mount_point: &Path) -> Result<()> {
        self.record(format!("remove-mount {}", mount_point.display()));
        Ok(())
    }

    fn mount_private(&self, id: &str, target: &Path) -> Result<()> {
        self.record(format!("mount {}", id));
        if self.fail_mount {
            return Err(AppError::mount(target, "unknown filesystem"));
        }
        let source = self
            .sources
            .get(id)
            .ok_or_else(|| AppError::device(id, "no such volume"))?;
        std::fs::remove_dir(target)?;
        symlink(source, target)?;
        Ok(())
    }

    fn unmount_private(&self, target: &Path) -> Result<()> {
        let is_link = std::fs::symlink_metadata(target)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if is_link {
            self.record("unmount".to_string());
            std::fs::remove_file(target)?;
            std::fs::create_dir(target)?;
        }
        Ok(())
    }

    fn open_device(&self, id: &str) -> Result<Box<dyn DeviceHandle>> {
        self.record(format!("open {}", id));
        Ok(Box::new(FakeDevice {
            events: self.events.clone(),
            lock_failures_left: self.lock_failures,
        }))
    }
}

struct FakeDevice {
    events: EventLog,
    lock_failures_left: u32,
}

impl DeviceHandle for FakeDevice {
    fn try_lock(&mut self) -> Result<()> {
        if self.lock_failures_left > 0 {
            self.lock_failures_left -= 1;
            self.events.lock().push("lock-busy".to_string());
            return Err(AppError::device("fake", "busy"));
        }
        self.events.lock().push("lock".to_string());
        Ok(())
    }

    fn dismount(&mut self) -> Result<()> {
        self.events.lock().push("dismount".to_string());
        Ok(())
    }

    fn allow_media_removal(&mut self) -> Result<()> {
        self.events.lock().push("media-removal".to_string());
        // Card readers commonly refuse this; must not matter
        Err(AppError::device("fake", "not supported"))
    }

    fn eject(&mut self) -> Result<()> {
        self.events.lock().push("eject".to_string());
        Ok(())
    }
}

pub struct FakeConfigService {
    response: Option<RemoteDeviceConfig>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeConfigService {
    pub fn new(user_id: &str, config_text: &str) -> Self {
        Self {
            response: Some(RemoteDeviceConfig {
                user_id: user_id.to_string(),
                config_text: config_text.to_string(),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            response: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl DeviceConfigService for FakeConfigService {
    async fn fetch_device_config(
        &self,
        device_serial: &str,
        current_config: &str,
    ) -> Result<RemoteDeviceConfig> {
        self.calls
            .lock()
            .push((device_serial.to_string(), current_config.to_string()));
        self.response
            .clone()
            .ok_or_else(|| AppError::Remote("connection refused".to_string()))
    }
}

pub struct FakeUploadService {
    default: Option<UploadReceipt>,
    receipts: HashMap<String, UploadReceipt>,
    headers: Mutex<Vec<UploadHeader>>,
}

impl FakeUploadService {
    pub fn with_default(default: UploadReceipt) -> Self {
        Self {
            default: Some(default),
            receipts: HashMap::new(),
            headers: Mutex::new(Vec::new()),
        }
    }

    pub fn confirming() -> Self {
        Self::with_default(UploadReceipt {
            success: true,
            assigned_id: "rec-1".to_string(),
        })
    }

    /// Every upload fails at the transport level
    pub fn unreachable() -> Self {
        Self {
            default: None,
            receipts: HashMap::new(),
            headers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_receipt(mut self, file_name: &str, receipt: UploadReceipt) -> Self {
        self.receipts.insert(file_name.to_string(), receipt);
        self
    }

    pub fn headers(&self) -> Vec<UploadHeader> {
        self.headers.lock().clone()
    }
}

#[async_trait]
impl MediaUploadService for FakeUploadService {
    async fn upload_file(&self, header: &UploadHeader, file: &Path) -> Result<UploadReceipt> {
        self.headers.lock().push(header.clone());
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if let Some(receipt) = self.receipts.get(&name) {
            return Ok(receipt.clone());
        }
        self.default
            .clone()
            .ok_or_else(|| AppError::Remote("connection reset".to_string()))
    }
}
