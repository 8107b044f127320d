//! Path translation and direct remote operations

use crate::config::Config;
use crate::error::{Error, Result};
use crate::mounts::layout::{MountLayout, MountRole};
use crate::tools::{Encfs, Rclone, RetryPolicy, ToolRunner};
use std::path::{Component, Path, PathBuf};
use tracing::info;

/// Helpers that work on the cloud copy by plaintext path
pub struct RemoteOps<'a> {
    runner: &'a dyn ToolRunner,
    encfs: Encfs<'a>,
    rclone: Rclone,
    root: PathBuf,
    retry: RetryPolicy,
}

impl<'a> RemoteOps<'a> {
    pub fn new(config: &'a Config, runner: &'a dyn ToolRunner) -> Self {
        RemoteOps {
            runner,
            encfs: Encfs::from_config(config),
            rclone: Rclone::from_config(config),
            root: MountLayout::from_config(config)
                .path(MountRole::RemoteEncrypted)
                .to_path_buf(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Encrypted form of a plaintext relative path
    pub fn encoded_path(&self, plain: &Path) -> Result<String> {
        let plain = relative(plain)?;
        let encoded = self.encfs.encode(self.runner, &self.root, plain)?;
        if encoded.is_empty() {
            return Err(Error::InvalidPath(format!(
                "encfsctl returned an empty name for \"{}\"",
                plain.display()
            )));
        }
        Ok(encoded)
    }

    /// Plaintext form of an encrypted relative path
    pub fn decoded_path(&self, encoded: &str) -> Result<String> {
        let encoded = encoded.trim_start_matches('/');
        self.encfs.decode(self.runner, &self.root, encoded)
    }

    /// Move a file or directory on the remote, by plaintext paths
    pub fn move_path(&self, from: &Path, to: &Path) -> Result<()> {
        let source = self.rclone.remote_path(&self.encoded_path(from)?);
        let target = self.rclone.remote_path(&self.encoded_path(to)?);
        info!("Moving \"{}\" to \"{}\"", source, target);
        self.retry.run(&format!("Moving {}", source), || {
            self.rclone.move_to(self.runner, &source, &target)
        })
    }

    /// Create a directory on the remote, by plaintext path
    pub fn make_dir(&self, path: &Path) -> Result<()> {
        let target = self.rclone.remote_path(&self.encoded_path(path)?);
        info!("Creating \"{}\"", target);
        self.retry.run(&format!("Creating {}", target), || {
            self.rclone.mkdir(self.runner, &target)
        })
    }
}

/// Paths are relative to the union root; a leading `/` is dropped, `..` is
/// rejected
fn relative(path: &Path) -> Result<&Path> {
    if path.components().any(|c| c == Component::ParentDir) {
        return Err(Error::InvalidPath(format!(
            "\"{}\" must not contain \"..\"",
            path.display()
        )));
    }
    let stripped = path.strip_prefix("/").unwrap_or(path);
    if stripped.as_os_str().is_empty() {
        return Err(Error::InvalidPath("empty path".to_string()));
    }
    Ok(stripped)
}
