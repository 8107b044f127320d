//! Error types for cloud-drive-tools

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Exit code used for configuration problems
pub const EXIT_CONFIG: i32 = 2;

/// Exit code used when an external tool is missing
pub const EXIT_MISSING_DEPENDENCY: i32 = 3;

/// Errors raised while orchestrating the mount, sync and upload workflow
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration has missing required keys and/or unknown keys
    #[error("{}", describe_key_problems(.path, .missing, .unknown))]
    ConfigKeys {
        path: PathBuf,
        missing: Vec<String>,
        unknown: Vec<String>,
    },

    /// Configuration parsed but holds an unusable value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// One or more external tools are not available
    #[error("{}", describe_missing_tools(.0))]
    MissingDependency(Vec<String>),

    /// An external tool could not be started
    #[error("Failed to launch {tool}: {source}")]
    ToolLaunch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// An external tool exited unsuccessfully
    #[error("{tool} failed with {}", describe_status(.status))]
    ToolFailed { tool: String, status: Option<i32> },

    /// The cloud storage mount never became visible
    #[error("Remote mount {} not found after {attempts} attempts", .path.display())]
    RemoteMountTimeout { path: PathBuf, attempts: u32 },

    /// Another upload run holds the lock
    #[error("Upload already running (pid {pid}, lock file {})", .lock_file.display())]
    UploadInProgress { pid: i32, lock_file: PathBuf },

    /// A path could not be used as requested
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Directory traversal error
    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
}

impl Error {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) | Error::ConfigKeys { .. } | Error::InvalidConfig(_) => EXIT_CONFIG,
            Error::MissingDependency(_) => EXIT_MISSING_DEPENDENCY,
            Error::ToolFailed {
                status: Some(code), ..
            } if *code != 0 => *code,
            _ => 1,
        }
    }

    /// Whether this error is an external tool failure
    pub fn is_tool_failure(&self) -> bool {
        matches!(self, Error::ToolFailed { .. })
    }
}

fn describe_key_problems(path: &Path, missing: &[String], unknown: &[String]) -> String {
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!(
            "Using configuration file at \"{}\". Missing the following configuration keys: {}.",
            path.display(),
            missing.join(", ")
        ));
    }
    if !unknown.is_empty() {
        parts.push(format!(
            "Using configuration file at \"{}\". The following keys were given but are not valid: {}.",
            path.display(),
            unknown.join(", ")
        ));
    }
    parts.join(" ")
}

fn describe_missing_tools(tools: &[String]) -> String {
    tools
        .iter()
        .map(|tool| format!("\"{}\" is not available on the PATH.", tool))
        .collect::<Vec<_>>()
        .join(" ")
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {}", code),
        None => "termination by signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_keys_message_lists_both_groups() {
        let err = Error::ConfigKeys {
            path: PathBuf::from("vars.yaml"),
            missing: vec!["data_dir".into(), "rclone".into()],
            unknown: vec!["plexdrive".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Missing the following configuration keys: data_dir, rclone."));
        assert!(msg.contains("not valid: plexdrive."));
        assert_eq!(err.exit_code(), EXIT_CONFIG);
    }

    #[test]
    fn test_tool_failure_exit_code_propagates() {
        let err = Error::ToolFailed {
            tool: "rclone copy".into(),
            status: Some(7),
        };
        assert_eq!(err.exit_code(), 7);
        assert!(err.to_string().contains("exit status 7"));

        let killed = Error::ToolFailed {
            tool: "encfs".into(),
            status: None,
        };
        assert_eq!(killed.exit_code(), 1);
    }
}
