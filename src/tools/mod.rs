//! External tool plumbing
//!
//! Wraps the programs this crate orchestrates:
//! - encfs / encfsctl for encryption and name encoding
//! - rclone for the remote mount, existence checks, deletes and uploads
//! - process running, retries and dependency checks shared by all of them

pub mod deps;
pub mod encfs;
pub mod rclone;
pub mod retry;
pub mod runner;

pub use encfs::Encfs;
pub use rclone::Rclone;
pub use retry::RetryPolicy;
pub use runner::{Invocation, Output, SystemRunner, ToolOutput, ToolRunner};
