//! One upload run: deletes, copy to the cloud, local cleanup

use crate::config::Config;
use crate::error::{Error, Result};
use crate::mounts::layout::{MountLayout, MountRole, WHITEOUT_DIR_NAME};
use crate::state::StatePaths;
use crate::sync::deletes::{DeleteReconciler, ReconcileReport};
use crate::sync::lock::UploadLock;
use crate::sync::prune::{prune_local_cache, PruneReport};
use crate::tools::rclone::EXIT_FATAL_ERROR;
use crate::tools::{Encfs, Rclone, RetryPolicy, ToolRunner};
use chrono::Utc;
use std::path::Path;
use tracing::{info, warn};

/// What an upload run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub deletes: ReconcileReport,
    /// Whether the copy ran (false when there was nothing to upload)
    pub copied: bool,
    /// The remote refused more data; the run stopped before pruning
    pub quota_reached: bool,
    pub pruned: Option<PruneReport>,
}

/// Coordinates a full upload under the upload lock
pub struct UploadCoordinator<'a> {
    config: &'a Config,
    runner: &'a dyn ToolRunner,
    layout: MountLayout,
    state_paths: StatePaths,
    retry: RetryPolicy,
}

impl<'a> UploadCoordinator<'a> {
    pub fn new(config: &'a Config, runner: &'a dyn ToolRunner) -> Self {
        UploadCoordinator {
            config,
            runner,
            layout: MountLayout::from_config(config),
            state_paths: StatePaths::from_config(config),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn run(&self) -> Result<UploadReport> {
        let _lock = UploadLock::acquire(&self.state_paths.upload_lock())?;
        let mut report = UploadReport::default();

        report.deletes = DeleteReconciler::new(self.config, self.runner)
            .with_retry(self.retry)
            .run()?;

        // keep pending whiteout markers off the cloud
        let exclude = Encfs::from_config(self.config).encode(
            self.runner,
            self.layout.path(MountRole::RemoteEncrypted),
            Path::new(WHITEOUT_DIR_NAME),
        )?;

        let local_encrypted = self.layout.path(MountRole::LocalEncrypted);
        if has_entries(local_encrypted)? {
            let rclone = Rclone::from_config(self.config);
            let copy = rclone.copy_to_cloud(local_encrypted, Some(&exclude));
            let copied = self.retry.run_if(
                "Uploading to cloud drive",
                |e| e.is_tool_failure() && !is_quota_error(e),
                || self.runner.check(&copy),
            );
            match copied {
                Ok(()) => report.copied = true,
                Err(e) if is_quota_error(&e) => {
                    warn!("Upload limit reached, stopping this run without local cleanup");
                    report.quota_reached = true;
                    return Ok(report);
                }
                Err(e) => return Err(e),
            }
        } else {
            info!("{} is empty - nothing to upload", local_encrypted.display());
        }

        info!("Upload Complete - Syncing changes");
        report.pruned = Some(prune_local_cache(
            self.layout.path(MountRole::LocalDecrypted),
            &self.layout.whiteout_dir(),
            self.config.days_to_keep_local,
            Utc::now(),
        )?);
        Ok(report)
    }
}

fn is_quota_error(e: &Error) -> bool {
    matches!(e, Error::ToolFailed { status: Some(code), .. } if *code == EXIT_FATAL_ERROR)
}

fn has_entries(dir: &Path) -> Result<bool> {
    Ok(std::fs::read_dir(dir)?.next().is_some())
}
