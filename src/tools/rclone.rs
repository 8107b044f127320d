//! rclone invocations against the configured remote

use crate::config::Config;
use crate::error::Result;
use crate::tools::runner::{Invocation, Output, ToolRunner};
use std::path::{Path, PathBuf};
use tracing::debug;

/// rclone exit code for errors more retries won't fix, including
/// `--drive-stop-on-upload-limit` tripping
pub const EXIT_FATAL_ERROR: i32 = 7;

/// Upload bandwidth cap
pub const UPLOAD_BANDWIDTH_LIMIT: &str = "8M";

/// Files larger than this are skipped by uploads
pub const UPLOAD_MAX_FILE_SIZE: &str = "200G";

/// rclone bound to one binary, config file and remote
#[derive(Debug, Clone)]
pub struct Rclone {
    binary: PathBuf,
    config_file: PathBuf,
    remote: String,
    cloud_path: String,
    env: Vec<(String, String)>,
    verbose: bool,
}

impl Rclone {
    pub fn from_config(config: &Config) -> Self {
        Rclone {
            binary: config.rclone.clone(),
            config_file: config.rclone_config_path.clone(),
            remote: config.rclone_remote.clone(),
            cloud_path: config.path_on_cloud_drive.clone(),
            env: config.proxy_env(),
            verbose: config.verbose,
        }
    }

    fn base(&self) -> Invocation {
        let mut invocation = Invocation::new(&self.binary)
            .arg("--config")
            .arg(&self.config_file);
        for (key, value) in &self.env {
            invocation = invocation.env(key, value);
        }
        invocation
    }

    /// `<remote>:<cloud path>`, where uploads land
    pub fn cloud_root(&self) -> String {
        format!("{}:{}", self.remote, self.cloud_path)
    }

    /// `<remote>:<cloud path>/<encoded>` for an encoded relative path
    pub fn remote_path(&self, encoded: &str) -> String {
        format!("{}/{}", self.cloud_root(), encoded)
    }

    /// Whether `remote_path` exists; rclone exits non-zero when it doesn't
    pub fn exists(&self, runner: &dyn ToolRunner, remote_path: &str) -> Result<bool> {
        let invocation = self
            .base()
            .args(["ls", "--max-depth", "1"])
            .arg(remote_path);
        let output = runner.run(&invocation, Output::Capture)?;
        debug!("{} exited with {:?}", invocation.label(), output.status);
        Ok(output.success())
    }

    /// Delete a remote file, or purge a remote directory with its contents
    pub fn remove(&self, runner: &dyn ToolRunner, remote_path: &str, is_dir: bool) -> Result<()> {
        // `rclone delete` only removes files inside a directory, never the directory
        let command = if is_dir { "purge" } else { "delete" };
        runner.check(&self.base().arg(command).arg(remote_path))
    }

    /// Copy `source` to the cloud root, skipping `exclude` (an encoded name)
    pub fn copy_to_cloud(&self, source: &Path, exclude: Option<&str>) -> Invocation {
        let mut invocation = self.base().arg("-v");
        if self.verbose {
            invocation = invocation.arg("-v");
        }
        invocation = invocation.arg("copy");
        if let Some(name) = exclude.filter(|n| !n.is_empty()) {
            invocation = invocation.arg("--exclude").arg(format!("/{}/*", name));
        }
        invocation
            .args(["--bwlimit", UPLOAD_BANDWIDTH_LIMIT])
            .args(["--max-size", UPLOAD_MAX_FILE_SIZE])
            .arg("--drive-stop-on-upload-limit")
            .arg(source)
            .arg(self.cloud_root())
    }

    /// Foreground read-only mount of the whole remote at `mountpoint`
    pub fn mount(&self, mountpoint: &Path) -> Invocation {
        self.base()
            .arg("mount")
            .arg(format!("{}:/", self.remote))
            .arg(mountpoint)
            .args([
                "--allow-other",
                "--read-only",
                "--umask",
                "000",
                "-vv",
                "--fast-list",
                "--dir-cache-time",
                "24h",
            ])
    }

    /// Server-side move between two remote paths
    pub fn move_to(&self, runner: &dyn ToolRunner, from: &str, to: &str) -> Result<()> {
        runner.check(&self.base().arg("moveto").arg(from).arg(to))
    }

    pub fn mkdir(&self, runner: &dyn ToolRunner, remote_path: &str) -> Result<()> {
        runner.check(&self.base().arg("mkdir").arg(remote_path))
    }
}
