//! Live mount table lookups (Linux `/proc/mounts`)

use crate::error::Result;
use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

/// Default mount table location
pub const PROC_MOUNTS: &str = "/proc/mounts";

/// Snapshot of the mount targets listed in a mount table
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    targets: Vec<PathBuf>,
}

impl MountTable {
    /// Read the mount table at `source`
    pub fn load(source: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(source)?;
        Ok(Self::parse(&contents))
    }

    /// Parse mount table text; the mount target is the second field
    pub fn parse(contents: &str) -> Self {
        let targets = contents
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .map(unescape)
            .collect();
        MountTable { targets }
    }

    /// Whether `path` is a mount target. Comparison is component-wise, so
    /// trailing or doubled separators don't matter.
    pub fn contains(&self, path: &Path) -> bool {
        self.targets.iter().any(|target| target == path)
    }

    pub fn targets(&self) -> &[PathBuf] {
        &self.targets
    }
}

/// Check one path against the mount table at `source`
pub fn is_mountpoint(source: &Path, path: &Path) -> Result<bool> {
    Ok(MountTable::load(source)?.contains(path))
}

/// Undo the kernel's octal escaping of whitespace and backslashes (`\040`)
fn unescape(field: &str) -> PathBuf {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    PathBuf::from(OsString::from_vec(out))
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3
        && digits[0] <= b'3'
        && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}
