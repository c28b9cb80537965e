use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::LayoutConfig;

/// Checks that a mounted volume looks like a camera card
///
/// The settings file decides. A missing media directory is only reported:
/// cards that have never recorded anything have no media directory but must
/// still go through configuration reconciliation.
#[derive(Debug, Clone)]
pub struct ContentValidator {
    settings_path: PathBuf,
    media_dir: PathBuf,
}

impl ContentValidator {
    pub fn new(layout: &LayoutConfig) -> Self {
        Self {
            settings_path: layout.settings_path.clone(),
            media_dir: layout.media_dir.clone(),
        }
    }

    pub fn settings_file(&self, mount_path: &Path) -> PathBuf {
        mount_path.join(&self.settings_path)
    }

    pub fn media_root(&self, mount_path: &Path) -> PathBuf {
        mount_path.join(&self.media_dir)
    }

    pub fn is_valid_layout(&self, mount_path: &Path) -> bool {
        info!("Checking layout of {}", mount_path.display());

        if !self.settings_file(mount_path).is_file() {
            info!(
                "{}: no {} found",
                mount_path.display(),
                self.settings_path.display()
            );
            return false;
        }

        if !self.media_root(mount_path).is_dir() {
            warn!(
                "{}: no {} directory found",
                mount_path.display(),
                self.media_dir.display()
            );
        }

        info!("{}: layout is valid", mount_path.display());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn validator() -> ContentValidator {
        ContentValidator::new(&LayoutConfig::default())
    }

    #[test]
    fn test_full_layout_is_valid() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("MISC")).unwrap();
        fs::write(dir.path().join("MISC/settings.json"), "{}").unwrap();
        fs::create_dir_all(dir.path().join("DCIM")).unwrap();

        assert!(validator().is_valid_layout(dir.path()));
    }

    #[test]
    fn test_settings_without_media_dir_is_valid() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("MISC")).unwrap();
        fs::write(dir.path().join("MISC/settings.json"), "{}").unwrap();

        assert!(validator().is_valid_layout(dir.path()));
    }

    #[test]
    fn test_missing_settings_is_invalid() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("DCIM/100MEDIA")).unwrap();

        assert!(!validator().is_valid_layout(dir.path()));
    }

    #[test]
    fn test_settings_directory_is_invalid() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("MISC/settings.json")).unwrap();
        fs::create_dir_all(dir.path().join("DCIM")).unwrap();

        assert!(!validator().is_valid_layout(dir.path()));
    }
}
