use std::sync::Arc;

use tracing::{debug, warn};

use super::platform::VolumeServices;
use super::types::{Volume, VolumeLabel};

/// Snapshot enumeration of attached volumes
pub struct VolumeDirectory {
    services: Arc<dyn VolumeServices>,
}

impl VolumeDirectory {
    pub fn new(services: Arc<dyn VolumeServices>) -> Self {
        Self { services }
    }

    /// List every volume attached right now
    ///
    /// Never fails: if enumeration cannot start the pass sees no volumes, and
    /// a volume whose details cannot be read is reported with what is known.
    pub fn list_volumes(&self) -> Vec<Volume> {
        let ids = match self.services.enumerate() {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Volume enumeration failed: {}", e);
                return Vec::new();
            }
        };

        ids.into_iter().map(|id| self.describe(id)).collect()
    }

    fn describe(&self, id: String) -> Volume {
        let mount_points = self.services.mount_points(&id).unwrap_or_else(|e| {
            warn!("Failed to resolve mount points of {}: {}", id, e);
            Vec::new()
        });

        let label = match self.services.label(&id) {
            Ok(raw) => VolumeLabel::new(raw),
            Err(e) => {
                warn!("Failed to read label of {}: {}", id, e);
                VolumeLabel::default()
            }
        };

        let stable_id = self.services.stable_id(&id);

        debug!(
            "Volume {} label={} stable_id={:?} mounts={:?}",
            id, label, stable_id, mount_points
        );

        Volume {
            id,
            mount_points,
            label,
            stable_id,
        }
    }
}
