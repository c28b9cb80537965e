//! Media scan and upload
//!
//! Recordings live one directory below the media root
//! (`DCIM/<session>/<file>`). File names carry their metadata:
//! `<a>_<b>_<DDMMYYYYHHMMSS>[_...].<ext>`.

use std::fs::FileType;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::remote::{MediaUploadService, UploadHeader};

/// Per-volume upload counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub uploaded: u32,
    pub skipped: u32,
    pub failed: u32,
}

/// Metadata derived from a recording's file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaName {
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HHMMSS`
    pub time: String,
    /// Lower-cased extension without the dot
    pub data_type: String,
}

/// Why a file name was not accepted as a recording
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    /// Fewer than three underscore-separated fields
    #[error("fewer than three name fields")]
    TooFewFields,
    /// Third field does not start with 14 digits
    #[error("bad timestamp field {0:?}")]
    BadTimestamp(String),
}

/// Parse a recording file name
pub fn parse_media_name(path: &Path) -> Result<MediaName, NameError> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    let fields: Vec<&str> = stem.split('_').collect();
    if fields.len() < 3 {
        return Err(NameError::TooFewFields);
    }

    let stamp = fields[2];
    let digits = stamp.get(..14).filter(|d| d.bytes().all(|b| b.is_ascii_digit()));
    let digits = match digits {
        Some(d) => d,
        None => return Err(NameError::BadTimestamp(stamp.to_string())),
    };

    let day = &digits[0..2];
    let month = &digits[2..4];
    let year = &digits[4..8];

    Ok(MediaName {
        date: format!("{}-{}-{}", year, month, day),
        time: digits[8..14].to_string(),
        data_type: path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default(),
    })
}

/// Scans a card's media directory and uploads every recording
pub struct MediaUploader {
    service: Arc<dyn MediaUploadService>,
}

impl MediaUploader {
    pub fn new(service: Arc<dyn MediaUploadService>) -> Self {
        Self { service }
    }

    /// Upload all recordings below `media_root`, one at a time
    ///
    /// A file is deleted only after the service confirms it with a non-empty
    /// id; anything else leaves it on the card for a later pass.
    pub async fn upload_all(
        &self,
        media_root: &Path,
        device_serial: &str,
        user_id: &str,
    ) -> UploadSummary {
        let mut summary = UploadSummary::default();

        let sessions = match list_dir(media_root, true).await {
            Ok(dirs) => dirs,
            Err(e) => {
                warn!("Cannot scan {}: {}", media_root.display(), e);
                return summary;
            }
        };

        for session in sessions {
            let files = match list_dir(&session, false).await {
                Ok(files) => files,
                Err(e) => {
                    warn!("Cannot scan {}: {}", session.display(), e);
                    continue;
                }
            };

            for file in files {
                self.upload_one(&file, device_serial, user_id, &mut summary).await;
            }
        }

        info!(
            "Uploads from {}: {} uploaded, {} skipped, {} failed",
            media_root.display(),
            summary.uploaded,
            summary.skipped,
            summary.failed
        );
        summary
    }

    async fn upload_one(
        &self,
        file: &Path,
        device_serial: &str,
        user_id: &str,
        summary: &mut UploadSummary,
    ) {
        let name = match parse_media_name(file) {
            Ok(name) => name,
            Err(NameError::TooFewFields) => {
                debug!("Skipping {}: not a recording", file.display());
                summary.skipped += 1;
                return;
            }
            Err(NameError::BadTimestamp(field)) => {
                warn!("Skipping {}: bad timestamp field {:?}", file.display(), field);
                summary.skipped += 1;
                return;
            }
        };

        let datasize = match tokio::fs::metadata(file).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("Cannot stat {}: {}", file.display(), e);
                summary.failed += 1;
                return;
            }
        };

        let header = UploadHeader {
            datestr: name.date,
            timestr: name.time,
            devicestr: device_serial.to_string(),
            userstr: user_id.to_string(),
            datatype: name.data_type,
            datasize,
        };

        info!("Uploading {} ({} bytes)", file.display(), datasize);
        let receipt = match self.service.upload_file(&header, file).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!("Upload of {} failed: {}", file.display(), e);
                summary.failed += 1;
                return;
            }
        };

        if !receipt.is_confirmed() {
            warn!(
                "Upload of {} not confirmed (success={}, id={:?})",
                file.display(),
                receipt.success,
                receipt.assigned_id
            );
            summary.failed += 1;
            return;
        }

        match tokio::fs::remove_file(file).await {
            Ok(()) => {
                info!("Uploaded {} as {}", file.display(), receipt.assigned_id);
                summary.uploaded += 1;
            }
            Err(e) => {
                warn!(
                    "Uploaded {} as {} but could not delete it: {}",
                    file.display(),
                    receipt.assigned_id,
                    e
                );
                summary.failed += 1;
            }
        }
    }
}

/// Directory entries of one kind, in enumeration order
///
/// Only opening the directory can fail; an unreadable entry is logged and
/// skipped, and a failed read ends the listing with what was collected.
async fn list_dir(dir: &Path, dirs: bool) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut out = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("Listing of {} cut short: {}", dir.display(), e);
                break;
            }
        };
        let path = entry.path();
        if let Some(path) = keep_entry(path, entry.file_type().await, dirs) {
            out.push(path);
        }
    }
    Ok(out)
}

fn keep_entry(
    path: PathBuf,
    file_type: std::io::Result<FileType>,
    dirs: bool,
) -> Option<PathBuf> {
    match file_type {
        Ok(t) if (dirs && t.is_dir()) || (!dirs && t.is_file()) => Some(path),
        Ok(_) => None,
        Err(e) => {
            warn!("Skipping unreadable entry {}: {}", path.display(), e);
            None
        }
    }
}
