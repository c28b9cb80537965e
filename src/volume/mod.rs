//! Volume discovery and device control
//!
//! ```text
//! VolumeDirectory --> VolumeServices (trait) --> LinuxVolumeServices
//!                                                  sysfs / udev / mount(2)
//! ```

pub mod directory;
pub mod linux;
pub mod platform;
pub mod types;

pub use directory::VolumeDirectory;
pub use linux::LinuxVolumeServices;
pub use platform::{DeviceHandle, VolumeServices};
pub use types::{Volume, VolumeLabel, NONAME_LABEL};
