//! Local cache cleanup after an upload

use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

const SECONDS_PER_DAY: f64 = 24.0 * 60.0 * 60.0;

/// Counts from one prune pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: usize,
    pub kept: usize,
}

/// Oldest acceptable change time for a retention window in days; `None`
/// when the window reaches past the representable date range, in which case
/// nothing is old enough to remove
pub fn cutoff(now: DateTime<Utc>, days_to_keep: f64) -> Option<DateTime<Utc>> {
    let millis = (days_to_keep * SECONDS_PER_DAY * 1000.0).round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return None;
    }
    let window = Duration::try_milliseconds(millis as i64)?;
    now.checked_sub_signed(window)
}

/// Delete regular files under `root` whose ctime is before the retention
/// window. Directories stay, and nothing under `skip` is touched.
pub fn prune_local_cache(
    root: &Path,
    skip: &Path,
    days_to_keep: f64,
    now: DateTime<Utc>,
) -> Result<PruneReport> {
    info!(
        "Deleting local files older than \"{}\" days old",
        days_to_keep
    );

    let oldest = cutoff(now, days_to_keep);
    let mut report = PruneReport::default();
    if oldest.is_none() {
        info!("Retention window of {} days keeps every local file", days_to_keep);
    }

    let walker = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| entry.path() != skip);

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = entry.metadata()?;
        let changed = DateTime::<Utc>::from_timestamp(metadata.ctime(), metadata.ctime_nsec() as u32);
        match (changed, oldest) {
            (Some(changed), Some(oldest)) if changed < oldest => {
                debug!("Removing {}", entry.path().display());
                fs::remove_file(entry.path())?;
                report.removed += 1;
            }
            _ => report.kept += 1,
        }
    }

    info!(
        "Local cleanup removed {} file(s), kept {}",
        report.removed, report.kept
    );
    Ok(report)
}
