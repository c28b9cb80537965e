//! Volume lifecycle
//!
//! Drives one volume through
//!
//! ```text
//! Discovered -> Gated -> Mounted -> Validated -> Processed
//!     -> Locking -> Locked | LockTimedOut -> Dismounted -> Ejected -> Cleaned
//! ```
//!
//! Every stage after `Mounted` returns a `Result`; an `Err` from
//! reconciliation or upload jumps straight to the eject sequence
//! (`VolumeOutcome::Aborted`) so a card that keeps failing is powered down
//! instead of being read over and over. The private mount directory is
//! removed on every path.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::reconcile::{ConfigReconciler, ReconcileResult};
use super::upload::{MediaUploader, UploadSummary};
use super::validator::ContentValidator;
use crate::config::AppConfig;
use crate::error::Result;
use crate::ledger::SeenVolumeLedger;
use crate::remote::{DeviceConfigService, MediaUploadService};
use crate::utils::LogThrottler;
use crate::volume::{DeviceHandle, Volume, VolumeServices};

/// Lifecycle states, used for logging transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeState {
    Discovered,
    Gated,
    Mounted,
    Validated,
    Processed,
    Locking,
    Locked,
    LockTimedOut,
    Dismounted,
    Ejected,
    Cleaned,
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Bounded retry for the exclusive device lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Locked { attempts: u32 },
    TimedOut { attempts: u32 },
    /// The device could not even be opened
    DeviceUnavailable,
}

/// Result of the best-effort eject sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EjectReport {
    pub lock: LockOutcome,
    pub dismounted: bool,
    pub media_removal_allowed: bool,
    pub ejected: bool,
}

impl EjectReport {
    fn unavailable() -> Self {
        Self {
            lock: LockOutcome::DeviceUnavailable,
            dismounted: false,
            media_removal_allowed: false,
            ejected: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Public mount points exist but none has the expected layout
    NoValidMountPoint,
    /// The private mount could not be established
    MountFailed(String),
    /// The private mount does not have the expected layout
    InvalidLayout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    pub device_serial: String,
    pub reconcile: ReconcileResult,
    pub uploads: UploadSummary,
}

/// Tagged outcome of processing one volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeOutcome {
    /// Already processed within the ledger TTL
    Skipped,
    /// Not a camera card (or not mountable); reconsidered next pass
    Rejected(RejectReason),
    Processed {
        report: ProcessReport,
        eject: EjectReport,
    },
    /// Processing failed; the card was ejected anyway
    Aborted { error: String, eject: EjectReport },
}

/// Orchestrates claim, validation, reconciliation, upload and eject of a
/// volume
pub struct VolumeLifecycleManager {
    services: Arc<dyn VolumeServices>,
    validator: ContentValidator,
    reconciler: ConfigReconciler,
    uploader: MediaUploader,
    work_dir: PathBuf,
    lock_policy: LockPolicy,
    throttler: LogThrottler,
}

impl VolumeLifecycleManager {
    pub fn new(
        services: Arc<dyn VolumeServices>,
        validator: ContentValidator,
        reconciler: ConfigReconciler,
        uploader: MediaUploader,
        work_dir: impl Into<PathBuf>,
        lock_policy: LockPolicy,
    ) -> Self {
        Self {
            services,
            validator,
            reconciler,
            uploader,
            work_dir: work_dir.into(),
            lock_policy,
            throttler: LogThrottler::with_secs(10),
        }
    }

    pub fn from_config(
        config: &AppConfig,
        services: Arc<dyn VolumeServices>,
        config_service: Arc<dyn DeviceConfigService>,
        upload_service: Arc<dyn MediaUploadService>,
    ) -> Self {
        Self::new(
            services,
            ContentValidator::new(&config.layout),
            ConfigReconciler::new(config_service, config.layout.settings_path.clone()),
            MediaUploader::new(upload_service),
            config.volume.work_dir.clone(),
            LockPolicy {
                max_attempts: config.volume.lock_max_attempts,
                delay: config.volume.lock_retry_delay(),
            },
        )
    }

    /// True if the volume should be processed this pass
    pub fn gate(&self, volume: &Volume, ledger: &SeenVolumeLedger) -> bool {
        !ledger.contains(&volume.ledger_key())
    }

    /// Private mount directory of a volume
    pub fn private_mount_path(&self, volume: &Volume) -> PathBuf {
        self.work_dir.join(volume.label.mount_dir_name())
    }

    pub async fn process_volume(
        &self,
        volume: &Volume,
        ledger: &mut SeenVolumeLedger,
    ) -> VolumeOutcome {
        self.transition(volume, VolumeState::Discovered);

        if !self.gate(volume, ledger) {
            info!(
                "Volume {} ({}) rejected by seen-volume ledger",
                volume.id, volume.label
            );
            self.transition(volume, VolumeState::Cleaned);
            return VolumeOutcome::Skipped;
        }
        self.transition(volume, VolumeState::Gated);

        if volume.has_mount_points() {
            info!(
                "Volume {} has public mounts; checking whether any is valid",
                volume.id
            );
            let valid = volume
                .mount_points
                .iter()
                .any(|mp| self.validator.is_valid_layout(mp));
            if !valid {
                info!("Volume {}: no valid mount point, ignoring", volume.id);
                return VolumeOutcome::Rejected(RejectReason::NoValidMountPoint);
            }

            info!(
                "Volume {}: removing public mount points to protect data from user access",
                volume.id
            );
            for mount_point in &volume.mount_points {
                if let Err(e) = self.services.remove_mount_point(mount_point) {
                    warn!("Failed to remove {}: {}", mount_point.display(), e);
                }
            }
        }

        let private = self.private_mount_path(volume);
        info!("Mounting volume {} at {}", volume.id, private.display());
        if let Err(e) = self.claim(volume, &private) {
            warn!("Volume {}: private mount failed: {}", volume.id, e);
            self.cleanup(volume, &private);
            return VolumeOutcome::Rejected(RejectReason::MountFailed(e.to_string()));
        }
        self.transition(volume, VolumeState::Mounted);

        if !self.validator.is_valid_layout(&private) {
            info!("Volume {}: invalid layout, releasing", volume.id);
            self.cleanup(volume, &private);
            return VolumeOutcome::Rejected(RejectReason::InvalidLayout);
        }
        self.transition(volume, VolumeState::Validated);

        // Remembered before processing so a card that fails mid-way is not
        // picked up again on the next pass
        ledger.remember(&volume.ledger_key());
        if let Err(e) = ledger.flush() {
            warn!("Failed to persist ledger: {}", e);
        }

        let processed = self.process_contents(&private).await;
        if processed.is_ok() {
            self.transition(volume, VolumeState::Processed);
        }

        let eject = self.eject(volume, &private).await;
        self.cleanup(volume, &private);

        match processed {
            Ok(report) => VolumeOutcome::Processed { report, eject },
            Err(e) => {
                error!(
                    "Volume {} processing failed, device was ejected: {}",
                    volume.id, e
                );
                VolumeOutcome::Aborted {
                    error: e.to_string(),
                    eject,
                }
            }
        }
    }

    /// Create the private directory and bind the volume to it
    fn claim(&self, volume: &Volume, private: &Path) -> Result<()> {
        // Leftover from an interrupted run
        self.services.unmount_private(private)?;
        std::fs::create_dir_all(private)?;
        self.services.mount_private(&volume.id, private)
    }

    async fn process_contents(&self, private: &Path) -> Result<ProcessReport> {
        let device_serial = self.reconciler.device_serial(private).await?;
        let reconcile = self.reconciler.reconcile(private, &device_serial).await?;

        let uploads = self
            .uploader
            .upload_all(
                &self.validator.media_root(private),
                &device_serial,
                &reconcile.resolved_user_id,
            )
            .await;

        Ok(ProcessReport {
            device_serial,
            reconcile,
            uploads,
        })
    }

    /// Release the private binding, then lock, dismount, allow removal and
    /// eject. Nothing here fails the volume: each step is attempted and its
    /// result only reported.
    async fn eject(&self, volume: &Volume, private: &Path) -> EjectReport {
        info!("Ejecting volume {}", volume.id);

        if let Err(e) = self.services.unmount_private(private) {
            warn!("Failed to release {}: {}", private.display(), e);
        }

        let mut device = match self.services.open_device(&volume.id) {
            Ok(device) => device,
            Err(e) => {
                warn!("Cannot open device {} for eject: {}", volume.id, e);
                return EjectReport::unavailable();
            }
        };

        self.transition(volume, VolumeState::Locking);
        let lock = self.acquire_lock(device.as_mut(), &volume.id).await;
        match lock {
            LockOutcome::Locked { .. } => self.transition(volume, VolumeState::Locked),
            _ => self.transition(volume, VolumeState::LockTimedOut),
        }

        let dismounted = best_effort(&volume.id, "dismount", device.dismount());
        if dismounted {
            self.transition(volume, VolumeState::Dismounted);
        }
        let media_removal_allowed =
            best_effort(&volume.id, "allow media removal", device.allow_media_removal());
        let ejected = best_effort(&volume.id, "eject", device.eject());
        if ejected {
            self.transition(volume, VolumeState::Ejected);
        }

        EjectReport {
            lock,
            dismounted,
            media_removal_allowed,
            ejected,
        }
    }

    async fn acquire_lock(&self, device: &mut dyn DeviceHandle, id: &str) -> LockOutcome {
        let key = format!("lock:{}", id);
        let max_attempts = self.lock_policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match device.try_lock() {
                Ok(()) => {
                    self.throttler.finish(&key);
                    debug!("Locked {} after {} attempt(s)", id, attempt);
                    return LockOutcome::Locked { attempts: attempt };
                }
                Err(e) => {
                    if let Some(suppressed) = self.throttler.check(&key) {
                        info!(
                            "Trying to lock volume {} (attempt {}/{}, {} suppressed): {}",
                            id, attempt, max_attempts, suppressed, e
                        );
                    }
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(self.lock_policy.delay).await;
            }
        }

        self.throttler.finish(&key);
        warn!(
            "Could not lock volume {} after {} attempts, ejecting anyway",
            id, max_attempts
        );
        LockOutcome::TimedOut {
            attempts: max_attempts,
        }
    }

    /// Unconditionally tear down the private mount point
    fn cleanup(&self, volume: &Volume, private: &Path) {
        if let Err(e) = self.services.unmount_private(private) {
            warn!("Failed to unmount {}: {}", private.display(), e);
        }
        // remove_dir only removes an empty directory, never card contents
        match std::fs::remove_dir(private) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", private.display(), e),
        }
        self.transition(volume, VolumeState::Cleaned);
    }

    fn transition(&self, volume: &Volume, state: VolumeState) {
        debug!("Volume {} -> {}", volume.id, state);
    }
}

fn best_effort(id: &str, step: &str, result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            debug!("Volume {}: {} failed (ignored): {}", id, step, e);
            false
        }
    }
}
