//! Linux volume services
//!
//! Volumes are block devices found under `/sys/class/block`. Labels, UUIDs
//! and filesystem types come from the udev database, mount points from
//! `/proc/self/mountinfo`. The exclusive "lock" is an `O_EXCL` open of the
//! device node, which the kernel refuses with `EBUSY` while anything still
//! has the filesystem mounted.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::mount::{mount, umount, umount2, MntFlags, MsFlags};
use tracing::{debug, info, warn};

use super::platform::{DeviceHandle, VolumeServices};
use crate::error::{AppError, Result};

/// sysfs mount point
pub const SYSFS_PATH: &str = "/sys";

/// udev runtime database
pub const UDEV_DATA_PATH: &str = "/run/udev/data";

/// Mount table of this process's namespace
pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// Block device name prefixes that never hold camera media
const IGNORED_PREFIXES: &[&str] = &["loop", "ram", "zram", "dm-", "md", "nbd"];

nix::ioctl_none!(blk_flsbuf, 0x12, 97);
nix::ioctl_none_bad!(cdrom_eject, 0x5309);
nix::ioctl_write_int_bad!(cdrom_lockdoor, 0x5329);

/// Volume services backed by sysfs, udev and mount(2)
#[derive(Debug, Clone)]
pub struct LinuxVolumeServices {
    sysfs_root: PathBuf,
    udev_root: PathBuf,
    mountinfo: PathBuf,
    removable_only: bool,
    fs_types: Vec<String>,
}

impl LinuxVolumeServices {
    pub fn new(removable_only: bool, fs_types: Vec<String>) -> Self {
        Self {
            sysfs_root: PathBuf::from(SYSFS_PATH),
            udev_root: PathBuf::from(UDEV_DATA_PATH),
            mountinfo: PathBuf::from(MOUNTINFO_PATH),
            removable_only,
            fs_types,
        }
    }

    /// Point the service at alternative sysfs/udev/mountinfo locations
    pub fn with_roots(
        mut self,
        sysfs_root: impl Into<PathBuf>,
        udev_root: impl Into<PathBuf>,
        mountinfo: impl Into<PathBuf>,
    ) -> Self {
        self.sysfs_root = sysfs_root.into();
        self.udev_root = udev_root.into();
        self.mountinfo = mountinfo.into();
        self
    }

    fn class_block(&self) -> PathBuf {
        self.sysfs_root.join("class/block")
    }

    /// Kernel name of a device node (`/dev/sdb1` -> `sdb1`)
    fn kernel_name(id: &str) -> Result<&str> {
        Path::new(id)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AppError::device(id, "not a device node path"))
    }

    /// `major:minor` of a block device
    fn dev_numbers(&self, id: &str) -> Result<String> {
        let name = Self::kernel_name(id)?;
        let dev = fs::read_to_string(self.class_block().join(name).join("dev"))
            .map_err(|e| AppError::device(id, format!("reading dev numbers: {}", e)))?;
        Ok(dev.trim().to_string())
    }

    fn udev_props(&self, id: &str) -> HashMap<String, String> {
        let dev = match self.dev_numbers(id) {
            Ok(dev) => dev,
            Err(_) => return HashMap::new(),
        };
        match fs::read_to_string(self.udev_root.join(format!("b{}", dev))) {
            Ok(text) => parse_udev_props(&text),
            Err(e) => {
                debug!("No udev data for {} ({}): {}", id, dev, e);
                HashMap::new()
            }
        }
    }

    /// Decide whether a `/sys/class/block` entry is a candidate volume
    fn is_candidate(&self, name: &str) -> bool {
        if IGNORED_PREFIXES.iter().any(|p| name.starts_with(p)) {
            return false;
        }

        let entry = self.class_block().join(name);
        if read_trimmed(&entry.join("size")).and_then(|s| s.parse::<u64>().ok()) == Some(0) {
            return false;
        }

        let canonical = match fs::canonicalize(&entry) {
            Ok(path) => path,
            Err(_) => return false,
        };
        let is_partition = entry.join("partition").exists();
        let disk_dir = if is_partition {
            match canonical.parent() {
                Some(parent) => parent.to_path_buf(),
                None => return false,
            }
        } else {
            // Partitioned disks are represented by their partitions
            if has_partitions(&canonical, name) {
                return false;
            }
            canonical.clone()
        };

        if self.removable_only {
            let removable = read_trimmed(&disk_dir.join("removable")).as_deref() == Some("1");
            let on_usb = canonical.to_string_lossy().contains("/usb");
            if !removable && !on_usb {
                return false;
            }
        }

        true
    }

    fn fs_types_for(&self, id: &str) -> Vec<String> {
        match self.udev_props(id).remove("ID_FS_TYPE") {
            Some(fs_type) if !fs_type.is_empty() => vec![fs_type],
            _ => self.fs_types.clone(),
        }
    }
}

impl VolumeServices for LinuxVolumeServices {
    fn enumerate(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(self.class_block())?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| self.is_candidate(name))
            .collect();
        names.sort();

        Ok(names.into_iter().map(|name| format!("/dev/{}", name)).collect())
    }

    fn mount_points(&self, id: &str) -> Result<Vec<PathBuf>> {
        let dev = self.dev_numbers(id)?;
        let text = fs::read_to_string(&self.mountinfo)?;
        Ok(parse_mountinfo(&text, &dev))
    }

    fn label(&self, id: &str) -> Result<String> {
        let mut props = self.udev_props(id);
        if let Some(encoded) = props.remove("ID_FS_LABEL_ENC") {
            return Ok(decode_udev_escapes(&encoded));
        }
        Ok(props.remove("ID_FS_LABEL").unwrap_or_default())
    }

    fn stable_id(&self, id: &str) -> Option<String> {
        self.udev_props(id)
            .remove("ID_FS_UUID")
            .filter(|uuid| !uuid.is_empty())
    }

    fn remove_mount_point(&self, mount_point: &Path) -> Result<()> {
        umount(mount_point).map_err(|e| AppError::mount(mount_point, e))
    }

    fn mount_private(&self, id: &str, target: &Path) -> Result<()> {
        let flags = MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC;
        let mut last_error = None;

        for fs_type in self.fs_types_for(id) {
            match mount(
                Some(Path::new(id)),
                target,
                Some(fs_type.as_str()),
                flags,
                None::<&str>,
            ) {
                Ok(()) => {
                    debug!("Mounted {} ({}) at {}", id, fs_type, target.display());
                    return Ok(());
                }
                Err(e) => {
                    debug!("Mount {} as {} failed: {}", id, fs_type, e);
                    last_error = Some(e);
                }
            }
        }

        Err(AppError::mount(
            target,
            match last_error {
                Some(e) => format!("{}: {}", id, e),
                None => format!("{}: no filesystem types to try", id),
            },
        ))
    }

    fn unmount_private(&self, target: &Path) -> Result<()> {
        match umount2(target, MntFlags::empty()) {
            Ok(()) => Ok(()),
            // Not a mount point (already released)
            Err(Errno::EINVAL) | Err(Errno::ENOENT) => Ok(()),
            Err(e) => Err(AppError::mount(target, e)),
        }
    }

    fn open_device(&self, id: &str) -> Result<Box<dyn DeviceHandle>> {
        let name = Self::kernel_name(id)?;
        let entry = self.class_block().join(name);
        let canonical = fs::canonicalize(&entry)
            .map_err(|e| AppError::device(id, format!("resolving sysfs entry: {}", e)))?;
        let disk_dir = if entry.join("partition").exists() {
            canonical.parent().map(Path::to_path_buf).unwrap_or(canonical)
        } else {
            canonical
        };

        Ok(Box::new(LinuxDevice {
            node: PathBuf::from(id),
            dev: self.dev_numbers(id)?,
            disk_dir,
            mountinfo: self.mountinfo.clone(),
            file: None,
        }))
    }
}

/// Open device node plus the sysfs directory of its disk
struct LinuxDevice {
    node: PathBuf,
    dev: String,
    disk_dir: PathBuf,
    mountinfo: PathBuf,
    file: Option<File>,
}

impl LinuxDevice {
    fn name(&self) -> String {
        self.node.display().to_string()
    }

    /// File descriptor for ioctls, opened non-exclusively if the lock was
    /// never acquired
    fn raw_fd(&mut self) -> Result<RawFd> {
        if let Some(file) = &self.file {
            return Ok(file.as_raw_fd());
        }
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.node)
            .map_err(|e| AppError::device(self.name(), e))?;
        let fd = file.as_raw_fd();
        self.file = Some(file);
        Ok(fd)
    }
}

impl DeviceHandle for LinuxDevice {
    fn try_lock(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_EXCL | libc::O_NONBLOCK)
            .open(&self.node)
            .map_err(|e| AppError::device(self.name(), format!("exclusive open: {}", e)))?;
        self.file = Some(file);
        Ok(())
    }

    fn dismount(&mut self) -> Result<()> {
        let text = fs::read_to_string(&self.mountinfo)?;
        for mount_point in parse_mountinfo(&text, &self.dev) {
            debug!("Detaching leftover mount {}", mount_point.display());
            if let Err(e) = umount2(&mount_point, MntFlags::MNT_DETACH) {
                warn!("Failed to detach {}: {}", mount_point.display(), e);
            }
        }

        let fd = self.raw_fd()?;
        // SAFETY: fd is an open descriptor owned by self.file
        unsafe { blk_flsbuf(fd) }
            .map_err(|e| AppError::device(self.name(), format!("BLKFLSBUF: {}", e)))?;
        Ok(())
    }

    fn allow_media_removal(&mut self) -> Result<()> {
        let fd = self.raw_fd()?;
        // SAFETY: fd is an open descriptor owned by self.file
        unsafe { cdrom_lockdoor(fd, 0) }
            .map_err(|e| AppError::device(self.name(), format!("CDROM_LOCKDOOR: {}", e)))?;
        Ok(())
    }

    fn eject(&mut self) -> Result<()> {
        let fd = self.raw_fd()?;
        // SAFETY: fd is an open descriptor owned by self.file
        if unsafe { cdrom_eject(fd) }.is_ok() {
            return Ok(());
        }

        // Card readers and cameras rarely implement the eject command;
        // removing the SCSI device detaches the medium the same way.
        self.file = None;
        let delete = self.disk_dir.join("device/delete");
        write_sysfs(&delete, "1").map_err(|e| AppError::device(self.name(), e))?;
        info!("Removed {} via {}", self.name(), delete.display());
        Ok(())
    }
}

/// Write a sysfs attribute in a single write() including the newline
fn write_sysfs(path: &Path, value: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    let mut buf = value.as_bytes().to_vec();
    buf.push(b'\n');
    file.write_all(&buf)?;
    file.flush()
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn has_partitions(disk_dir: &Path, name: &str) -> bool {
    fs::read_dir(disk_dir)
        .map(|entries| {
            entries.filter_map(|e| e.ok()).any(|e| {
                e.file_name().to_string_lossy().starts_with(name)
                    && e.path().join("partition").exists()
            })
        })
        .unwrap_or(false)
}

/// Mount points of device `dev` (`major:minor`) in mountinfo text
pub fn parse_mountinfo(text: &str, dev: &str) -> Vec<PathBuf> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let dev_field = fields.nth(2)?;
            let mount_point = fields.nth(1)?;
            (dev_field == dev).then(|| PathBuf::from(unescape_octal(mount_point)))
        })
        .collect()
}

/// Decode `\040`-style escapes used by the kernel in mount tables
fn unescape_octal(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let code = s
            .get(i + 1..i + 4)
            .filter(|_| bytes[i] == b'\\')
            .and_then(|digits| u8::from_str_radix(digits, 8).ok());
        match code {
            Some(code) => {
                out.push(code);
                i += 4;
            }
            None => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).to_string()
}

/// `E:KEY=VALUE` properties from a udev database entry
pub fn parse_udev_props(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| line.strip_prefix("E:"))
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Decode udev `\xNN` escapes (`ID_FS_LABEL_ENC`)
pub fn decode_udev_escapes(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&b'x') {
            if let Some(code) = s
                .get(i + 2..i + 4)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                out.push(code);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}
