//! Seen-volume ledger
//!
//! Persisted, TTL-scoped record of volumes already processed, so a pass
//! started by the scheduler shortly after the previous one does not pick the
//! same card up again. The ledger is advisory: losing the file only means
//! volumes are processed once more.
//!
//! On-disk format is a JSON document `{"items": [{"text": .., "time": ..}]}`
//! with `time` in Unix seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

/// Tolerated clock skew for entries stamped ahead of the current time
pub const FUTURE_SKEW_SECS: i64 = 300;

/// One processed volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenEntry {
    /// Dedupe key (volume label or stable identifier)
    #[serde(rename = "text")]
    pub key: String,
    /// Unix timestamp of first processing
    pub time: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    items: Vec<SeenEntry>,
}

/// Persisted TTL set of processed volume keys
#[derive(Debug)]
pub struct SeenVolumeLedger {
    path: PathBuf,
    ttl_secs: i64,
    entries: Vec<SeenEntry>,
}

impl SeenVolumeLedger {
    /// Load the ledger from `path`, pruning expired entries
    ///
    /// A missing or malformed file yields an empty ledger.
    pub fn open(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self::open_at(path, ttl, now_secs())
    }

    pub fn open_at(path: impl Into<PathBuf>, ttl: Duration, now: i64) -> Self {
        let path = path.into();
        let entries = match load_entries(&path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Ledger {} unreadable, starting empty: {}", path.display(), e);
                Vec::new()
            }
        };

        let mut ledger = Self {
            path,
            ttl_secs: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
            entries,
        };
        ledger.prune_at(now);
        debug!(
            "Ledger {} loaded with {} live entries",
            ledger.path.display(),
            ledger.entries.len()
        );
        ledger
    }

    /// True if a live entry exists for `key`
    pub fn contains(&self, key: &str) -> bool {
        self.contains_at(key, now_secs())
    }

    pub fn contains_at(&self, key: &str, now: i64) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.key == key && !self.is_expired(entry, now))
    }

    /// Record `key` as processed now
    ///
    /// Does not deduplicate: callers check [`contains`](Self::contains)
    /// first, a second call adds a second entry for the same key.
    pub fn remember(&mut self, key: &str) {
        self.remember_at(key, now_secs());
    }

    pub fn remember_at(&mut self, key: &str, now: i64) {
        self.entries.push(SeenEntry {
            key: key.to_string(),
            time: now,
        });
    }

    /// Prune expired entries and write the ledger to its backing file
    pub fn flush(&mut self) -> Result<()> {
        self.flush_at(now_secs())
    }

    pub fn flush_at(&mut self, now: i64) -> Result<()> {
        self.prune_at(now);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = LedgerFile {
            items: self.entries.clone(),
        };
        let json = serde_json::to_string(&file)?;

        // Write-then-rename so a crash never leaves a truncated ledger
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Drop expired entries
    pub fn prune_at(&mut self, now: i64) {
        let ttl = self.ttl_secs;
        self.entries.retain(|entry| !entry_expired(entry, now, ttl));
    }

    pub fn entries(&self) -> &[SeenEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_expired(&self, entry: &SeenEntry, now: i64) -> bool {
        entry_expired(entry, now, self.ttl_secs)
    }
}

/// Older than the TTL, or stamped further in the future than the clock skew
/// allows (clock stepped back, foreign time units)
fn entry_expired(entry: &SeenEntry, now: i64, ttl_secs: i64) -> bool {
    entry.time > now.saturating_add(FUTURE_SKEW_SECS)
        || now.saturating_sub(entry.time) > ttl_secs
}

fn load_entries(path: &Path) -> Result<Vec<SeenEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)?;
    // `null` and `{}` are both accepted as empty
    let file: Option<LedgerFile> = serde_json::from_str(&text)?;
    Ok(file.map(|f| f.items).unwrap_or_default())
}

fn now_secs() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_ttl_window() {
        let dir = tempdir().unwrap();
        let mut ledger = SeenVolumeLedger::open_at(dir.path().join("seen.json"), TTL, 0);

        ledger.remember_at("CAM001", 0);

        assert!(ledger.contains_at("CAM001", 30));
        assert!(ledger.contains_at("CAM001", 60));
        assert!(!ledger.contains_at("CAM001", 61));

        ledger.prune_at(61);
        assert!(ledger.is_empty());
        assert!(!ledger.contains_at("CAM001", 61));
    }

    #[test]
    fn test_unknown_key() {
        let dir = tempdir().unwrap();
        let mut ledger = SeenVolumeLedger::open_at(dir.path().join("seen.json"), TTL, 0);
        ledger.remember_at("CAM001", 0);
        assert!(!ledger.contains_at("CAM002", 1));
    }

    #[test]
    fn test_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seen.json");

        let mut ledger = SeenVolumeLedger::open_at(&path, TTL, 100);
        ledger.remember_at("CAM001", 100);
        ledger.flush_at(100).unwrap();

        let reopened = SeenVolumeLedger::open_at(&path, TTL, 130);
        assert!(reopened.contains_at("CAM001", 130));

        // Expired entries are pruned on load
        let later = SeenVolumeLedger::open_at(&path, TTL, 200);
        assert!(later.is_empty());
    }

    #[test]
    fn test_flush_prunes_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seen.json");

        let mut ledger = SeenVolumeLedger::open_at(&path, TTL, 0);
        ledger.remember_at("OLD", 0);
        ledger.remember_at("NEW", 50);

        ledger.flush_at(100).unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        ledger.flush_at(100).unwrap();
        let second = std::fs::read_to_string(&path).unwrap();

        assert_eq!(first, second);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.entries()[0].key, "NEW");
    }

    #[test]
    fn test_duplicate_remember_adds_second_entry() {
        let dir = tempdir().unwrap();
        let mut ledger = SeenVolumeLedger::open_at(dir.path().join("seen.json"), TTL, 0);
        ledger.remember_at("CAM001", 0);
        ledger.remember_at("CAM001", 1);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_malformed_file_is_empty_ledger() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seen.json");
        std::fs::write(&path, "{{{ garbage").unwrap();

        let mut ledger = SeenVolumeLedger::open_at(&path, TTL, 0);
        assert!(ledger.is_empty());

        // And the next flush repairs it
        ledger.remember_at("CAM001", 0);
        ledger.flush_at(0).unwrap();
        let reopened = SeenVolumeLedger::open_at(&path, TTL, 1);
        assert!(reopened.contains_at("CAM001", 1));
    }

    #[test]
    fn test_null_and_empty_documents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seen.json");

        std::fs::write(&path, "null").unwrap();
        assert!(SeenVolumeLedger::open_at(&path, TTL, 0).is_empty());

        std::fs::write(&path, "{}").unwrap();
        assert!(SeenVolumeLedger::open_at(&path, TTL, 0).is_empty());
    }

    #[test]
    fn test_legacy_format_is_readable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seen.json");
        std::fs::write(&path, r#"{"items":[{"text":"NONAME","time":1000}]}"#).unwrap();

        let ledger = SeenVolumeLedger::open_at(&path, TTL, 1010);
        assert!(ledger.contains_at("NONAME", 1010));
    }

    #[test]
    fn test_future_dated_entry_is_dropped_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seen.json");
        // FILETIME ticks from an older ledger writer
        std::fs::write(
            &path,
            r#"{"items":[{"text":"NONAME","time":133500000000000000}]}"#,
        )
        .unwrap();

        let now = 1_700_000_000;
        let mut ledger = SeenVolumeLedger::open_at(&path, TTL, now);
        assert!(ledger.is_empty());
        assert!(!ledger.contains_at("NONAME", now));

        ledger.flush_at(now).unwrap();
        let reopened = SeenVolumeLedger::open_at(&path, TTL, now + 10 * 365 * 86_400);
        assert!(!reopened.contains_at("NONAME", now + 10 * 365 * 86_400));
    }

    #[test]
    fn test_clock_step_back() {
        let dir = tempdir().unwrap();
        let mut ledger = SeenVolumeLedger::open_at(dir.path().join("seen.json"), TTL, 0);
        ledger.remember_at("CAM001", 10_000);

        // Small skew is tolerated
        assert!(ledger.contains_at("CAM001", 10_000 - FUTURE_SKEW_SECS));
        // Anything further ahead no longer blocks the card
        assert!(!ledger.contains_at("CAM001", 10_000 - FUTURE_SKEW_SECS - 1));
        ledger.prune_at(1_000);
        assert!(ledger.is_empty());
    }
}
