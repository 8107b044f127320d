//! Files shared between separate invocations of the tool

use crate::config::Config;
use std::path::{Path, PathBuf};

/// Upload lock file name
pub const UPLOAD_LOCK_FILE: &str = "upload.pid";

/// Sentinel telling the remount keeper to stop
pub const UNMOUNT_SENTINEL_FILE: &str = "unmount.acd";

/// screen session name for the remount keeper
pub const KEEPER_SESSION_NAME: &str = "cloud-drive-tools-mount";

/// Locations of the cross-invocation state files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    dir: PathBuf,
}

impl StatePaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        StatePaths { dir: dir.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.state_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn upload_lock(&self) -> PathBuf {
        self.dir.join(UPLOAD_LOCK_FILE)
    }

    pub fn unmount_sentinel(&self) -> PathBuf {
        self.dir.join(UNMOUNT_SENTINEL_FILE)
    }

    /// screen log for a keeper started by process `pid`
    pub fn screen_log(&self, pid: u32) -> PathBuf {
        self.dir.join(format!("cloud-drive-tools-screenlog.{}", pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;

    #[test]
    fn test_state_files_live_next_to_the_program() {
        let state = StatePaths::from_config(&sample_config());
        assert_eq!(state.dir(), Path::new("/opt/cdt/bin"));
        assert_eq!(state.upload_lock(), PathBuf::from("/opt/cdt/bin/upload.pid"));
        assert_eq!(
            state.unmount_sentinel(),
            PathBuf::from("/opt/cdt/bin/unmount.acd")
        );
        assert_eq!(
            state.screen_log(42),
            PathBuf::from("/opt/cdt/bin/cloud-drive-tools-screenlog.42")
        );
    }
}
