//! Remount keeper
//!
//! Runs `rclone mount` in the foreground and restarts it whenever it exits,
//! until the unmount sentinel appears or the process is told to stop.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::mounts::layout::{MountLayout, MountRole};
use crate::mounts::lifecycle::{fusermount_unmount, UNMOUNT_GRACE};
use crate::mounts::table::{self, PROC_MOUNTS};
use crate::state::StatePaths;
use crate::tools::{Invocation, Rclone};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::watch;
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, error, info, warn};

/// Pause between an exit of the mount and the next attempt
pub const RESTART_DELAY: Duration = Duration::from_secs(2);

/// How often the sentinel file is checked
pub const SENTINEL_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Keeps the remote mounted
pub struct RemoteMountKeeper {
    mount: Invocation,
    mountpoint: PathBuf,
    mount_table: PathBuf,
    sentinel: PathBuf,
    restart_delay: Duration,
    poll_interval: Duration,
    shutdown_grace: Duration,
    handle_signals: bool,
}

impl RemoteMountKeeper {
    pub fn new(mount: Invocation, mountpoint: PathBuf, sentinel: PathBuf) -> Self {
        RemoteMountKeeper {
            mount,
            mountpoint,
            mount_table: PathBuf::from(PROC_MOUNTS),
            sentinel,
            restart_delay: RESTART_DELAY,
            poll_interval: SENTINEL_POLL_INTERVAL,
            shutdown_grace: UNMOUNT_GRACE,
            handle_signals: true,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let layout = MountLayout::from_config(config);
        let mountpoint = layout.path(MountRole::RemoteEncrypted).to_path_buf();
        let mount = Rclone::from_config(config).mount(&mountpoint);
        Self::new(
            mount,
            mountpoint,
            StatePaths::from_config(config).unmount_sentinel(),
        )
    }

    pub fn with_mount_table(mut self, path: impl Into<PathBuf>) -> Self {
        self.mount_table = path.into();
        self
    }

    pub fn with_timing(
        mut self,
        restart_delay: Duration,
        poll_interval: Duration,
        shutdown_grace: Duration,
    ) -> Self {
        self.restart_delay = restart_delay;
        self.poll_interval = poll_interval;
        self.shutdown_grace = shutdown_grace;
        self
    }

    /// Disable SIGINT/SIGTERM handling (the sentinel still works)
    pub fn without_signal_handling(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Run until shutdown. Returns how many times the mount was started.
    pub async fn run(&self) -> Result<u32> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let watcher = tokio::spawn(watch_for_shutdown(
            self.sentinel.clone(),
            self.poll_interval,
            self.handle_signals,
            shutdown_tx,
        ));

        info!("Keeping {} mounted", self.mountpoint.display());
        let result = self.keep_mounted(&mut shutdown_rx).await;
        watcher.abort();
        let runs = result?;

        match std::fs::remove_file(&self.sentinel) {
            Ok(()) => debug!("Removed unmount sentinel {}", self.sentinel.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!("Remount keeper stopped after {} run(s)", runs);
        Ok(runs)
    }

    async fn keep_mounted(&self, shutdown_rx: &mut watch::Receiver<bool>) -> Result<u32> {
        let mut runs = 0;
        loop {
            if *shutdown_rx.borrow() || self.sentinel.exists() {
                break;
            }

            self.clear_stale_mount().await?;

            info!("Starting {}", self.mount);
            let mut child = self.spawn_mount()?;
            runs += 1;

            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => warn!("{} exited with {}", self.mount.label(), status),
                        Err(e) => error!("Failed to wait for {}: {}", self.mount.label(), e),
                    }
                    tokio::select! {
                        _ = sleep(self.restart_delay) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
                _ = shutdown_rx.changed() => {
                    self.stop_mount(&mut child).await;
                    break;
                }
            }
        }

        Ok(runs)
    }

    fn spawn_mount(&self) -> Result<Child> {
        Command::from(self.mount.to_command())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::ToolLaunch {
                tool: self.mount.label(),
                source,
            })
    }

    /// Give the mount time to exit on its own, then kill it
    async fn stop_mount(&self, child: &mut Child) {
        info!("Stopping {}", self.mount.label());
        match timeout(self.shutdown_grace, child.wait()).await {
            Ok(Ok(status)) => debug!("{} exited with {}", self.mount.label(), status),
            Ok(Err(e)) => warn!("Failed to wait for {}: {}", self.mount.label(), e),
            Err(_) => {
                warn!(
                    "{} still running after {:?}, killing it",
                    self.mount.label(),
                    self.shutdown_grace
                );
                if let Err(e) = child.kill().await {
                    error!("Failed to kill {}: {}", self.mount.label(), e);
                }
            }
        }
    }

    /// A crashed rclone leaves a dead FUSE mount behind; clear it first
    async fn clear_stale_mount(&self) -> Result<()> {
        if !table::is_mountpoint(&self.mount_table, &self.mountpoint)? {
            return Ok(());
        }
        info!("Clearing stale mount at {}", self.mountpoint.display());
        let unmount = fusermount_unmount(&self.mountpoint);
        match Command::from(unmount.to_command()).status().await {
            Ok(status) if status.success() => {}
            Ok(status) => warn!("{} exited with {}", unmount, status),
            Err(e) => warn!("Failed to run {}: {}", unmount, e),
        }
        Ok(())
    }
}

/// Flip the shutdown flag once the sentinel appears or a stop signal arrives
async fn watch_for_shutdown(
    sentinel: PathBuf,
    poll_interval: Duration,
    handle_signals: bool,
    shutdown: watch::Sender<bool>,
) {
    let mut ticker = interval(poll_interval);
    let mut terminate = if handle_signals {
        match signal(SignalKind::terminate()) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                None
            }
        }
    } else {
        None
    };

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if sentinel.exists() {
                    info!("Unmount requested via {}", sentinel.display());
                    break;
                }
            }
            _ = tokio::signal::ctrl_c(), if handle_signals => {
                info!("Received interrupt, shutting down");
                break;
            }
            Some(()) = next_signal(&mut terminate) => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    let _ = shutdown.send(true);
}

async fn next_signal(signal: &mut Option<Signal>) -> Option<()> {
    match signal {
        Some(s) => s.recv().await,
        None => std::future::pending().await,
    }
}
