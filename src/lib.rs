//! cloud-drive-tools - Encrypted cloud drive orchestration
//!
//! Stacks encfs, unionfs-fuse and an rclone mount so that new files land in
//! an encrypted local cache, reads fall through to the cloud copy, and a
//! periodic upload pushes the cache (and any deletions) to the remote.

pub mod config;
pub mod error;
pub mod logging;
pub mod mounts;
pub mod remote;
pub mod state;
pub mod sync;
pub mod tools;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::mounts::{MountLayout, MountLifecycle, RemoteMountKeeper};
    pub use crate::sync::{DeleteReconciler, UploadCoordinator};
    pub use crate::tools::{SystemRunner, ToolRunner};
}
