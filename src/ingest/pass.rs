use tracing::{info, warn};

use super::lifecycle::{VolumeLifecycleManager, VolumeOutcome};
use crate::ledger::SeenVolumeLedger;
use crate::volume::VolumeDirectory;

/// Counters for one ingest pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub volumes: u32,
    pub skipped: u32,
    pub rejected: u32,
    pub processed: u32,
    pub aborted: u32,
}

impl PassSummary {
    fn record(&mut self, outcome: &VolumeOutcome) {
        match outcome {
            VolumeOutcome::Skipped => self.skipped += 1,
            VolumeOutcome::Rejected(_) => self.rejected += 1,
            VolumeOutcome::Processed { .. } => self.processed += 1,
            VolumeOutcome::Aborted { .. } => self.aborted += 1,
        }
    }
}

/// Process every attached volume once, strictly one after another
///
/// Volume failures never end the pass. The ledger is flushed at the end.
pub async fn run_pass(
    directory: &VolumeDirectory,
    manager: &VolumeLifecycleManager,
    ledger: &mut SeenVolumeLedger,
) -> PassSummary {
    let volumes = directory.list_volumes();
    info!("Found {} volume(s)", volumes.len());

    let mut summary = PassSummary::default();
    for volume in &volumes {
        summary.volumes += 1;
        let outcome = manager.process_volume(volume, ledger).await;
        summary.record(&outcome);
    }

    if let Err(e) = ledger.flush() {
        warn!("Failed to persist ledger {}: {}", ledger.path().display(), e);
    }

    info!(
        "Pass done: {} volume(s), {} processed, {} aborted, {} rejected, {} skipped",
        summary.volumes, summary.processed, summary.aborted, summary.rejected, summary.skipped
    );
    summary
}
