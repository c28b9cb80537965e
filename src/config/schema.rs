use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
///
/// Read once at startup from the JSON file given on the command line.
/// The legacy `authUrl`/`dbUrl` spellings are accepted as aliases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Remote service endpoints and credentials
    #[serde(flatten)]
    pub remote: RemoteConfig,
    /// Seen-volume ledger settings
    pub ledger: LedgerConfig,
    /// Volume discovery and device control settings
    pub volume: VolumeConfig,
    /// Expected on-card layout
    pub layout: LayoutConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            ledger: LedgerConfig::default(),
            volume: VolumeConfig::default(),
            layout: LayoutConfig::default(),
        }
    }
}

/// Remote config/upload service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Authentication service base URL
    #[serde(alias = "authUrl")]
    pub auth_url: String,
    /// Database service base URL (device config + uploads)
    #[serde(alias = "dbUrl")]
    pub db_url: String,
    pub username: String,
    pub password: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            auth_url: String::new(),
            db_url: String::new(),
            username: String::new(),
            password: String::new(),
            request_timeout_secs: 300,
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Seen-volume ledger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Backing file for the ledger
    pub path: PathBuf,
    /// Cool-down window in seconds
    pub ttl_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("idTimeout.json"),
            ttl_secs: 60,
        }
    }
}

/// Volume discovery and device control settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Parent directory of private mount points
    pub work_dir: PathBuf,
    /// Only consider volumes on removable media
    pub removable_only: bool,
    /// Filesystem types tried in order when udev does not report one
    pub mount_fs_types: Vec<String>,
    /// Exclusive lock attempts before giving up
    pub lock_max_attempts: u32,
    /// Delay between lock attempts in milliseconds
    pub lock_retry_delay_ms: u64,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            removable_only: true,
            mount_fs_types: vec!["vfat".to_string(), "exfat".to_string(), "ntfs3".to_string()],
            lock_max_attempts: 30,
            lock_retry_delay_ms: 1000,
        }
    }
}

impl VolumeConfig {
    pub fn lock_retry_delay(&self) -> Duration {
        Duration::from_millis(self.lock_retry_delay_ms)
    }
}

/// Expected on-card layout, relative to the volume root
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Device settings file
    pub settings_path: PathBuf,
    /// Media directory holding one subdirectory per recording session
    pub media_dir: PathBuf,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            settings_path: PathBuf::from("MISC/settings.json"),
            media_dir: PathBuf::from("DCIM"),
        }
    }
}
