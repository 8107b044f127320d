//! Propagating local deletions to the cloud
//!
//! unionfs-fuse cannot delete from the read-only remote branch, so it records
//! a deletion as a `<name>_HIDDEN~` marker under `.unionfs-fuse/` in the
//! writable branch. Each marker is turned into a remote delete (or purge for
//! directories) and then removed.

use crate::config::Config;
use crate::error::Result;
use crate::mounts::layout::{MountLayout, MountRole};
use crate::tools::{Encfs, Rclone, RetryPolicy, ToolRunner};
use std::ffi::OsStr;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

/// Suffix unionfs-fuse appends to whiteout marker names
pub const HIDDEN_SUFFIX: &str = "_HIDDEN~";

/// One whiteout marker found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhiteoutMarker {
    /// Marker location on disk
    pub local_path: PathBuf,
    /// Plaintext path it hides, relative to the union root
    pub hidden_path: PathBuf,
    pub is_dir: bool,
}

/// Outcome of one reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub markers: usize,
    pub deleted_remote: usize,
    pub absent_remote: usize,
    pub failures: usize,
    /// Whether the whiteout directory was removed
    pub cleared: bool,
}

/// Strip the marker suffix from a relative marker path
pub fn hidden_path(relative_marker: &Path) -> Option<PathBuf> {
    let name = relative_marker.file_name()?.as_bytes();
    let stripped = name.strip_suffix(HIDDEN_SUFFIX.as_bytes())?;
    if stripped.is_empty() {
        return None;
    }
    let stripped = Path::new(OsStr::from_bytes(stripped));
    Some(match relative_marker.parent() {
        Some(parent) => parent.join(stripped),
        None => stripped.to_path_buf(),
    })
}

/// Collect every marker under `whiteout_dir`, not descending into
/// directory markers
pub fn find_markers(whiteout_dir: &Path) -> Result<Vec<WhiteoutMarker>> {
    let mut markers = Vec::new();
    let mut walker = WalkDir::new(whiteout_dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry?;
        let relative = match entry.path().strip_prefix(whiteout_dir) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let Some(hidden) = hidden_path(relative) else {
            continue;
        };

        let is_dir = entry.file_type().is_dir();
        if is_dir {
            walker.skip_current_dir();
        }
        markers.push(WhiteoutMarker {
            local_path: entry.path().to_path_buf(),
            hidden_path: hidden,
            is_dir,
        });
    }
    Ok(markers)
}

/// Turns whiteout markers into remote deletions
pub struct DeleteReconciler<'a> {
    runner: &'a dyn ToolRunner,
    encfs: Encfs<'a>,
    rclone: Rclone,
    layout: MountLayout,
    retry: RetryPolicy,
}

impl<'a> DeleteReconciler<'a> {
    pub fn new(config: &'a Config, runner: &'a dyn ToolRunner) -> Self {
        DeleteReconciler {
            runner,
            encfs: Encfs::from_config(config),
            rclone: Rclone::from_config(config),
            layout: MountLayout::from_config(config),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn run(&self) -> Result<ReconcileReport> {
        let whiteout_dir = self.layout.whiteout_dir();
        let mut report = ReconcileReport::default();

        if !whiteout_dir.is_dir() {
            info!("No .unionfs-fuse/ directory found, nothing to delete");
            return Ok(report);
        }

        let markers = find_markers(&whiteout_dir)?;
        report.markers = markers.len();

        for marker in &markers {
            self.reconcile(marker, &mut report)?;
        }

        if report.failures == 0 {
            // an empty whiteout dir would otherwise be uploaded
            fs::remove_dir_all(&whiteout_dir)?;
            report.cleared = true;
        } else {
            warn!(
                "Not clearing {} as there were {} failure(s)",
                whiteout_dir.display(),
                report.failures
            );
        }

        info!(
            "Delete sync: {} marker(s), {} deleted remotely, {} not on cloud drive, {} failed",
            report.markers, report.deleted_remote, report.absent_remote, report.failures
        );
        Ok(report)
    }

    fn reconcile(&self, marker: &WhiteoutMarker, report: &mut ReconcileReport) -> Result<()> {
        let encoded = self.encfs.encode(
            self.runner,
            self.layout.path(MountRole::RemoteEncrypted),
            &marker.hidden_path,
        )?;
        if encoded.is_empty() {
            error!(
                "Empty name returned from encfsctl for {} - skipping",
                marker.hidden_path.display()
            );
            report.failures += 1;
            return Ok(());
        }

        let remote_path = self.rclone.remote_path(&encoded);
        info!("Attempting to delete \"{}\"", remote_path);

        if self.rclone.exists(self.runner, &remote_path)? {
            info!(
                "{} exists on cloud drive - deleting",
                marker.hidden_path.display()
            );
            let deleted = self.retry.run(&format!("Deleting {}", remote_path), || {
                self.rclone.remove(self.runner, &remote_path, marker.is_dir)
            });
            if let Err(e) = deleted {
                error!("Failed to delete {}: {}", remote_path, e);
                report.failures += 1;
                return Ok(());
            }
            report.deleted_remote += 1;
        } else {
            info!("{} is not on cloud drive", marker.hidden_path.display());
            report.absent_remote += 1;
        }

        if marker.is_dir {
            fs::remove_dir_all(&marker.local_path)?;
        } else {
            fs::remove_file(&marker.local_path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::error::Error;
    use crate::tools::runner::tests::{exit, ok, FakeRunner};
    use crate::tools::{Invocation, ToolOutput};
    use tempfile::TempDir;

    /// encfsctl "encodes" by upper-casing; rclone sees `present` as existing
    fn scripted(present: &'static [&'static str]) -> impl Fn(&Invocation) -> ToolOutput {
        move |inv| {
            let args: Vec<String> = inv
                .arg_values()
                .iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect();
            let last = args.last().cloned().unwrap_or_default();
            if inv.program() == OsStr::new("encfsctl") {
                return ok(&format!("{}\n", last.to_uppercase()));
            }
            if args.iter().any(|a| a == "ls") {
                return if present.iter().any(|p| last.ends_with(p)) {
                    ok("")
                } else {
                    exit(3)
                };
            }
            ok("")
        }
    }

    fn setup() -> (TempDir, Config, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample_config();
        config.mount_base = dir.path().to_path_buf();
        let whiteout = MountLayout::from_config(&config).whiteout_dir();
        fs::create_dir_all(&whiteout).unwrap();
        (dir, config, whiteout)
    }

    fn reconciler<'a>(config: &'a Config, runner: &'a FakeRunner) -> DeleteReconciler<'a> {
        DeleteReconciler::new(config, runner).with_retry(RetryPolicy::immediate(2))
    }

    #[test]
    fn test_hidden_path_strips_suffix() {
        assert_eq!(
            hidden_path(Path::new("a/b.txt_HIDDEN~")),
            Some(PathBuf::from("a/b.txt"))
        );
        assert_eq!(hidden_path(Path::new("c_HIDDEN~")), Some(PathBuf::from("c")));
        assert_eq!(hidden_path(Path::new("a/plain.txt")), None);
        assert_eq!(hidden_path(Path::new("_HIDDEN~")), None);
    }

    #[test]
    fn test_find_markers_skips_directory_marker_contents() {
        let (_dir, _config, whiteout) = setup();
        fs::create_dir_all(whiteout.join("a")).unwrap();
        fs::write(whiteout.join("a/b.txt_HIDDEN~"), "").unwrap();
        fs::create_dir_all(whiteout.join("c_HIDDEN~/inner")).unwrap();
        fs::write(whiteout.join("c_HIDDEN~/inner/d_HIDDEN~"), "").unwrap();

        let markers = find_markers(&whiteout).unwrap();
        let hidden: Vec<_> = markers.iter().map(|m| m.hidden_path.clone()).collect();
        assert_eq!(hidden, vec![PathBuf::from("a/b.txt"), PathBuf::from("c")]);
        assert!(!markers[0].is_dir);
        assert!(markers[1].is_dir);
    }

    #[test]
    fn test_file_and_directory_markers_are_deleted_remotely() {
        let (_dir, config, whiteout) = setup();
        fs::create_dir_all(whiteout.join("a")).unwrap();
        fs::write(whiteout.join("a/b.txt_HIDDEN~"), "").unwrap();
        fs::create_dir_all(whiteout.join("c_HIDDEN~")).unwrap();

        let runner = FakeRunner::new(scripted(&["A/B.TXT", "/C"]));
        let report = reconciler(&config, &runner).run().unwrap();

        assert_eq!(
            report,
            ReconcileReport {
                markers: 2,
                deleted_remote: 2,
                absent_remote: 0,
                failures: 0,
                cleared: true,
            }
        );
        let deletes = runner.calls_labelled("rclone delete");
        assert_eq!(deletes.len(), 1);
        assert!(deletes[0].to_string().ends_with("delete gdrive:/encrypted/A/B.TXT"));
        let purges = runner.calls_labelled("rclone purge");
        assert_eq!(purges.len(), 1);
        assert!(purges[0].to_string().ends_with("purge gdrive:/encrypted/C"));
        assert!(!whiteout.exists());
    }

    #[test]
    fn test_absent_remote_skips_delete_but_removes_marker() {
        let (_dir, config, whiteout) = setup();
        fs::write(whiteout.join("gone.txt_HIDDEN~"), "").unwrap();

        let runner = FakeRunner::new(scripted(&[]));
        let report = reconciler(&config, &runner).run().unwrap();

        assert_eq!(report.absent_remote, 1);
        assert_eq!(report.deleted_remote, 0);
        assert!(runner.calls_labelled("rclone delete").is_empty());
        assert!(report.cleared);
        assert!(!whiteout.exists());
    }

    #[test]
    fn test_empty_encoding_keeps_whiteout_dir() {
        let (_dir, config, whiteout) = setup();
        let marker = whiteout.join("x_HIDDEN~");
        fs::write(&marker, "").unwrap();

        let runner = FakeRunner::new(|inv| {
            if inv.program() == OsStr::new("encfsctl") {
                ok("\n")
            } else {
                ok("")
            }
        });
        let report = reconciler(&config, &runner).run().unwrap();

        assert_eq!(report.failures, 1);
        assert!(!report.cleared);
        assert!(marker.exists());
        assert!(runner.calls_labelled("rclone ls").is_empty());
    }

    #[test]
    fn test_failed_remote_delete_is_retried_then_kept() {
        let (_dir, config, whiteout) = setup();
        let marker = whiteout.join("f_HIDDEN~");
        fs::write(&marker, "").unwrap();

        let runner = FakeRunner::new(|inv| {
            if inv.program() == OsStr::new("encfsctl") {
                ok("F")
            } else if inv.label() == "rclone delete" {
                exit(1)
            } else {
                ok("")
            }
        });
        let report = reconciler(&config, &runner).run().unwrap();

        assert_eq!(runner.calls_labelled("rclone delete").len(), 2);
        assert_eq!(report.failures, 1);
        assert!(marker.exists());
        assert!(whiteout.exists());
    }

    #[test]
    fn test_second_run_does_nothing() {
        let (_dir, config, whiteout) = setup();
        fs::write(whiteout.join("a_HIDDEN~"), "").unwrap();

        let runner = FakeRunner::new(scripted(&["/A"]));
        reconciler(&config, &runner).run().unwrap();
        let calls_after_first = runner.calls.borrow().len();

        let report = reconciler(&config, &runner).run().unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(runner.calls.borrow().len(), calls_after_first);
    }

    #[test]
    fn test_encode_failure_aborts() {
        let (_dir, config, whiteout) = setup();
        fs::write(whiteout.join("a_HIDDEN~"), "").unwrap();

        let runner = FakeRunner::new(|_| exit(1));
        let err = reconciler(&config, &runner).run().unwrap_err();
        assert!(matches!(err, Error::ToolFailed { .. }));
    }
}
