//! Checks that every external tool the workflow shells out to is installed

use crate::config::Config;
use crate::error::{Error, Result};
use std::ffi::{OsStr, OsString};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Tools always looked up on PATH
pub const PATH_TOOLS: &[&str] = &["unionfs-fuse", "encfs", "encfsctl", "fusermount", "screen"];

/// Resolve a tool name to an executable file.
///
/// Names containing a `/` are checked as given; bare names are searched
/// for on `search_path`.
pub fn find_executable(name: &OsStr, search_path: Option<&OsStr>) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if name.to_string_lossy().contains('/') {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let search_path = search_path?;
    std::env::split_paths(search_path)
        .map(|dir| dir.join(candidate))
        .find(|path| is_executable(path))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Fail with one error naming every tool that cannot be found
pub fn check_dependencies(config: &Config) -> Result<()> {
    let path_var: Option<OsString> = std::env::var_os("PATH");
    check_tools(
        std::iter::once(config.rclone.as_os_str())
            .chain(PATH_TOOLS.iter().map(|t| OsStr::new(*t))),
        path_var.as_deref(),
    )
}

fn check_tools<'a>(
    tools: impl IntoIterator<Item = &'a OsStr>,
    search_path: Option<&OsStr>,
) -> Result<()> {
    let missing: Vec<String> = tools
        .into_iter()
        .filter(|tool| find_executable(tool, search_path).is_none())
        .map(|tool| tool.to_string_lossy().into_owned())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::MissingDependency(missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_tool(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn test_find_on_search_path() {
        let dir = tempfile::tempdir().unwrap();
        make_tool(dir.path(), "encfs", 0o755);
        make_tool(dir.path(), "screen", 0o644);

        let search = dir.path().as_os_str();
        assert_eq!(
            find_executable(OsStr::new("encfs"), Some(search)),
            Some(dir.path().join("encfs"))
        );
        assert!(find_executable(OsStr::new("screen"), Some(search)).is_none());
        assert!(find_executable(OsStr::new("encfs"), None).is_none());
    }

    #[test]
    fn test_explicit_path_checked_directly() {
        let dir = tempfile::tempdir().unwrap();
        let rclone = make_tool(dir.path(), "rclone", 0o700);
        assert_eq!(find_executable(rclone.as_os_str(), None), Some(rclone.clone()));

        let missing = dir.path().join("nope");
        assert!(find_executable(missing.as_os_str(), None).is_none());
    }

    #[test]
    fn test_check_tools_reports_every_missing_tool() {
        let dir = tempfile::tempdir().unwrap();
        make_tool(dir.path(), "encfs", 0o755);

        let err = check_tools(
            ["encfs", "encfsctl", "screen"].iter().map(|t| OsStr::new(*t)),
            Some(dir.path().as_os_str()),
        )
        .unwrap_err();

        match err {
            Error::MissingDependency(tools) => {
                assert_eq!(tools, vec!["encfsctl".to_string(), "screen".to_string()])
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
