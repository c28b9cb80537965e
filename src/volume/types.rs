//! Volume data types

use std::fmt;
use std::path::PathBuf;

/// Label used when a filesystem carries no label
pub const NONAME_LABEL: &str = "NONAME";

/// Filesystem label of a volume, empty labels normalized to [`NONAME_LABEL`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeLabel(String);

impl VolumeLabel {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            Self(NONAME_LABEL.to_string())
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory name for the private mount point
    ///
    /// Labels come from the card and may contain anything; keep the result to
    /// a single, non-hidden path component.
    pub fn mount_dir_name(&self) -> String {
        let name: String = self
            .0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let name = name.trim_start_matches('.').to_string();
        if name.is_empty() {
            NONAME_LABEL.to_string()
        } else {
            name
        }
    }
}

impl Default for VolumeLabel {
    fn default() -> Self {
        Self::new("")
    }
}

impl fmt::Display for VolumeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One logical volume as seen during a single enumeration pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// Opaque platform identifier (device node on Linux)
    pub id: String,
    /// Current public mount points, possibly none
    pub mount_points: Vec<PathBuf>,
    /// Filesystem label
    pub label: VolumeLabel,
    /// Stable filesystem identifier, when the platform can report one
    pub stable_id: Option<String>,
}

impl Volume {
    /// Key under which this volume is recorded in the seen-volume ledger
    ///
    /// Labels collide across cards (every unlabeled card is `NONAME`), so the
    /// filesystem UUID is preferred and the label is only a fallback.
    pub fn ledger_key(&self) -> String {
        match &self.stable_id {
            Some(id) if !id.is_empty() => format!("uuid:{}", id),
            _ => self.label.as_str().to_string(),
        }
    }

    pub fn has_mount_points(&self) -> bool {
        !self.mount_points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_label_is_noname() {
        assert_eq!(VolumeLabel::new("").as_str(), NONAME_LABEL);
        assert_eq!(VolumeLabel::new("   ").as_str(), NONAME_LABEL);
        assert_eq!(VolumeLabel::default().as_str(), NONAME_LABEL);
        assert_eq!(VolumeLabel::new("CAM001").as_str(), "CAM001");
    }

    #[test]
    fn test_mount_dir_name_is_single_component() {
        assert_eq!(VolumeLabel::new("CAM 001").mount_dir_name(), "CAM_001");
        assert_eq!(VolumeLabel::new("../etc").mount_dir_name(), "__etc");
        assert_eq!(VolumeLabel::new("..").mount_dir_name(), "NONAME");
    }

    #[test]
    fn test_ledger_key_prefers_stable_id() {
        let mut volume = Volume {
            id: "/dev/sdb1".to_string(),
            mount_points: Vec::new(),
            label: VolumeLabel::new(""),
            stable_id: Some("1234-ABCD".to_string()),
        };
        assert_eq!(volume.ledger_key(), "uuid:1234-ABCD");

        volume.stable_id = None;
        assert_eq!(volume.ledger_key(), "NONAME");
    }
}
