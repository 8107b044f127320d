//! Bringing the layer stack up and tearing it down
//!
//! Mount order:
//! 1. rclone mount of the remote (in a detached screen session running the keeper)
//! 2. encfs --reverse: local plaintext → local ciphertext
//! 3. encfs: remote ciphertext → remote plaintext
//! 4. unionfs-fuse: local plaintext (RW) over remote plaintext (RO) at data_dir

use crate::config::Config;
use crate::error::{Error, Result};
use crate::mounts::layout::{MountLayout, MountRole};
use crate::mounts::table::{self, PROC_MOUNTS};
use crate::state::{StatePaths, KEEPER_SESSION_NAME};
use crate::tools::{Encfs, Invocation, ToolRunner};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Time the keeper gets to notice the sentinel and exit
pub const UNMOUNT_GRACE: Duration = Duration::from_secs(6);

/// Polls for the remote mount before giving up
pub const REMOTE_WAIT_ATTEMPTS: u32 = 5;

/// Delay between remote mount polls
pub const REMOTE_WAIT_DELAY: Duration = Duration::from_secs(5);

/// Progress of a mount run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    DirsCreated,
    RemoteMounting,
    RemoteReady,
    LocalLayersMounted,
    UnionMounted,
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MountState::Unmounted => "unmounted",
            MountState::DirsCreated => "directories created",
            MountState::RemoteMounting => "remote mounting",
            MountState::RemoteReady => "remote ready",
            MountState::LocalLayersMounted => "encrypted layers mounted",
            MountState::UnionMounted => "union mounted",
        };
        f.write_str(name)
    }
}

/// Waits used by the lifecycle; shortened in tests
#[derive(Debug, Clone, Copy)]
pub struct LifecycleTiming {
    pub unmount_grace: Duration,
    pub wait_attempts: u32,
    pub wait_delay: Duration,
}

impl Default for LifecycleTiming {
    fn default() -> Self {
        LifecycleTiming {
            unmount_grace: UNMOUNT_GRACE,
            wait_attempts: REMOTE_WAIT_ATTEMPTS,
            wait_delay: REMOTE_WAIT_DELAY,
        }
    }
}

/// Mount/unmount orchestration for one configuration
pub struct MountLifecycle<'a> {
    config: &'a Config,
    runner: &'a dyn ToolRunner,
    layout: MountLayout,
    state_paths: StatePaths,
    mount_table: PathBuf,
    timing: LifecycleTiming,
    state: MountState,
}

impl<'a> MountLifecycle<'a> {
    pub fn new(config: &'a Config, runner: &'a dyn ToolRunner) -> Self {
        MountLifecycle {
            config,
            runner,
            layout: MountLayout::from_config(config),
            state_paths: StatePaths::from_config(config),
            mount_table: PathBuf::from(PROC_MOUNTS),
            timing: LifecycleTiming::default(),
            state: MountState::Unmounted,
        }
    }

    pub fn with_mount_table(mut self, path: impl Into<PathBuf>) -> Self {
        self.mount_table = path.into();
        self
    }

    pub fn with_state_paths(mut self, state_paths: StatePaths) -> Self {
        self.state_paths = state_paths;
        self
    }

    pub fn with_timing(mut self, timing: LifecycleTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn layout(&self) -> &MountLayout {
        &self.layout
    }

    pub fn state(&self) -> MountState {
        self.state
    }

    fn advance(&mut self, next: MountState) {
        debug!("Mount state: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Unmount `mountpoint` if the mount table lists it. Returns whether an
    /// unmount was performed; a path that isn't mounted only gets a warning.
    pub fn unmount(&self, mountpoint: &Path) -> Result<bool> {
        if !table::is_mountpoint(&self.mount_table, mountpoint)? {
            warn!(
                "Cannot unmount \"{}\" - it is not mounted",
                mountpoint.display()
            );
            return Ok(false);
        }

        info!("Unmounting \"{}\"", mountpoint.display());
        self.runner.check(&fusermount_unmount(mountpoint))?;
        Ok(true)
    }

    /// Tear down every layer, stopping the remount keeper on the way
    pub fn unmount_all(&mut self) -> Result<()> {
        info!("Unmounting all cloud drive mountpoints");

        self.unmount(self.layout.path(MountRole::UnionView))?;

        let sentinel = self.state_paths.unmount_sentinel();
        touch(&sentinel)?;
        self.unmount(self.layout.path(MountRole::RemoteEncrypted))?;

        std::thread::sleep(self.timing.unmount_grace);
        match std::fs::remove_file(&sentinel) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Unmount sentinel already removed by the keeper");
            }
            Err(e) => return Err(e.into()),
        }

        self.unmount(self.layout.path(MountRole::RemoteDecrypted))?;
        self.unmount(self.layout.path(MountRole::LocalEncrypted))?;
        self.advance(MountState::Unmounted);
        Ok(())
    }

    /// Create every mountpoint directory; existing ones are fine
    pub fn create_directories(&mut self) -> Result<()> {
        for mountpoint in self.layout.mountpoints() {
            match std::fs::create_dir_all(&mountpoint.path) {
                Ok(()) => {}
                // another invocation may be creating the same tree
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(
                        "Directory \"{}\" already exists",
                        mountpoint.path.display()
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.advance(MountState::DirsCreated);
        Ok(())
    }

    /// Launch the remount keeper in a detached screen session
    pub fn start_remote_keeper(&mut self) -> Result<()> {
        info!("Mounting cloud storage drive");
        std::fs::create_dir_all(self.state_paths.dir())?;
        self.runner.check(&self.keeper_invocation())?;
        self.advance(MountState::RemoteMounting);
        Ok(())
    }

    fn keeper_invocation(&self) -> Invocation {
        Invocation::new("screen")
            .arg("-L")
            .arg("-Logfile")
            .arg(self.state_paths.screen_log(std::process::id()))
            .arg("-dm")
            .arg("-S")
            .arg(KEEPER_SESSION_NAME)
            .arg(&self.config.cloud_drive_tools_path)
            .arg("acd-cli-mount")
            .arg("-c")
            .arg(&self.config.source)
    }

    /// Poll until the remote data path is visible, failing after the
    /// configured number of attempts
    pub fn wait_for_remote_mount(&mut self) -> Result<()> {
        let remote_mount = self.layout.remote_mount();
        let mut attempts = 0;
        while !remote_mount.exists() {
            attempts += 1;
            if attempts > self.timing.wait_attempts {
                return Err(Error::RemoteMountTimeout {
                    path: remote_mount,
                    attempts: self.timing.wait_attempts,
                });
            }
            info!(
                "Remote mount {} does not exist yet, waiting",
                remote_mount.display()
            );
            std::thread::sleep(self.timing.wait_delay);
        }
        self.advance(MountState::RemoteReady);
        Ok(())
    }

    /// Mount both encfs layers
    pub fn mount_encrypted_layers(&mut self) -> Result<()> {
        let encfs = Encfs::from_config(self.config);

        info!("Mounting local encrypted filesystem");
        self.runner.check(&encfs.mount_reverse(
            self.layout.path(MountRole::LocalDecrypted),
            self.layout.path(MountRole::LocalEncrypted),
        ))?;

        info!("Mounting cloud decrypted filesystem");
        self.runner.check(&encfs.mount_forward(
            self.layout.remote_mount().as_os_str(),
            self.layout.path(MountRole::RemoteDecrypted),
        ))?;

        self.advance(MountState::LocalLayersMounted);
        Ok(())
    }

    /// Mount the union of local (RW) and remote (RO) plaintext at data_dir
    pub fn mount_union(&mut self) -> Result<()> {
        info!("Mounting UnionFS");
        let invocation = Invocation::new("unionfs-fuse")
            .arg("-o")
            .arg("cow,allow_other")
            .arg(self.layout.union_branches())
            .arg(self.layout.path(MountRole::UnionView));
        self.runner.check(&invocation)?;
        self.advance(MountState::UnionMounted);
        Ok(())
    }

    /// Full mount: optional teardown, directories, remote, encfs, union
    pub fn mount(&mut self, unmount_first: bool) -> Result<()> {
        if unmount_first {
            self.unmount_all()?;
        }
        self.create_directories()?;
        self.start_remote_keeper()?;
        self.wait_for_remote_mount()?;
        self.mount_encrypted_layers()?;
        self.mount_union()?;
        info!("All layers mounted at {}", self.layout.path(MountRole::UnionView).display());
        Ok(())
    }

    /// Second phase of a split mount: everything above the remote mount
    pub fn mount_data_dir(&mut self) -> Result<()> {
        self.create_directories()?;
        self.mount_encrypted_layers()?;
        self.mount_union()
    }
}

/// `fusermount -u <path>`
pub fn fusermount_unmount(mountpoint: &Path) -> Invocation {
    Invocation::new("fusermount").arg("-u").arg(mountpoint)
}

fn touch(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(())
}
