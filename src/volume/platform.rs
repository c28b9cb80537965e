//! Platform volume services
//!
//! Everything the pipeline needs from the operating system, expressed over
//! owned, decoded values. Implementations own all raw handle and buffer work.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// OS-level volume operations
pub trait VolumeServices: Send + Sync {
    /// Identifiers of all volumes currently attached
    fn enumerate(&self) -> Result<Vec<String>>;

    /// Public mount points of a volume
    fn mount_points(&self, id: &str) -> Result<Vec<PathBuf>>;

    /// Raw filesystem label, empty when the filesystem has none
    fn label(&self, id: &str) -> Result<String>;

    /// Stable filesystem identifier, if the platform can report one
    fn stable_id(&self, id: &str) -> Option<String>;

    /// Remove a public mount point
    fn remove_mount_point(&self, mount_point: &Path) -> Result<()>;

    /// Bind the volume to an existing, empty private directory
    fn mount_private(&self, id: &str, target: &Path) -> Result<()>;

    /// Release a private mount binding; succeeds if nothing is mounted there
    fn unmount_private(&self, target: &Path) -> Result<()>;

    /// Open the underlying device for the lock/dismount/eject sequence
    fn open_device(&self, id: &str) -> Result<Box<dyn DeviceHandle>>;
}

/// Control handle on the device backing a volume
///
/// Every call is a single attempt; retry policy lives with the caller.
pub trait DeviceHandle: Send {
    /// Acquire exclusive access to the device
    fn try_lock(&mut self) -> Result<()>;

    /// Dismount the filesystem from the device
    fn dismount(&mut self) -> Result<()>;

    /// Allow the medium to be physically removed
    fn allow_media_removal(&mut self) -> Result<()>;

    /// Eject the medium
    fn eject(&mut self) -> Result<()>;
}
