//! Named mountpoints derived from the configuration

use crate::config::Config;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

/// Directory unionfs-fuse keeps its whiteout markers in, inside the RW branch
pub const WHITEOUT_DIR_NAME: &str = ".unionfs-fuse";

/// Role a mountpoint plays in the layer stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MountRole {
    /// Raw (still encrypted) view of the cloud remote
    RemoteEncrypted,
    /// Decrypting view over the remote
    RemoteDecrypted,
    /// Encrypting view over the local cache
    LocalEncrypted,
    /// Local plaintext cache; the writable union branch
    LocalDecrypted,
    /// Merged union view, mounted at `data_dir`
    UnionView,
}

impl MountRole {
    pub const ALL: [MountRole; 5] = [
        MountRole::RemoteEncrypted,
        MountRole::RemoteDecrypted,
        MountRole::LocalEncrypted,
        MountRole::LocalDecrypted,
        MountRole::UnionView,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MountRole::RemoteEncrypted => "remote-encrypted",
            MountRole::RemoteDecrypted => "remote-decrypted",
            MountRole::LocalEncrypted => "local-encrypted",
            MountRole::LocalDecrypted => "local-decrypted",
            MountRole::UnionView => "union-view",
        }
    }
}

impl fmt::Display for MountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mountpoint path tagged with its role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    pub role: MountRole,
    pub path: PathBuf,
}

/// The fixed set of mountpoints for one configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountLayout {
    remote_encrypted: PathBuf,
    remote_decrypted: PathBuf,
    local_encrypted: PathBuf,
    local_decrypted: PathBuf,
    data_dir: PathBuf,
    cloud_path: String,
}

impl MountLayout {
    pub fn new(mount_base: &Path, data_dir: &Path, cloud_path: &str) -> Self {
        MountLayout {
            remote_encrypted: mount_base.join("acd-encrypted"),
            remote_decrypted: mount_base.join("acd-decrypted"),
            local_encrypted: mount_base.join("local-encrypted"),
            local_decrypted: mount_base.join("local-decrypted"),
            data_dir: data_dir.to_path_buf(),
            cloud_path: cloud_path.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.mount_base, &config.data_dir, &config.path_on_cloud_drive)
    }

    pub fn path(&self, role: MountRole) -> &Path {
        match role {
            MountRole::RemoteEncrypted => &self.remote_encrypted,
            MountRole::RemoteDecrypted => &self.remote_decrypted,
            MountRole::LocalEncrypted => &self.local_encrypted,
            MountRole::LocalDecrypted => &self.local_decrypted,
            MountRole::UnionView => &self.data_dir,
        }
    }

    pub fn mountpoints(&self) -> Vec<MountPoint> {
        MountRole::ALL
            .iter()
            .map(|role| MountPoint {
                role: *role,
                path: self.path(*role).to_path_buf(),
            })
            .collect()
    }

    /// Where the encrypted cloud data appears once the remote is mounted.
    ///
    /// The cloud path may itself start with `/`; joining with `Path::join`
    /// would then discard the mountpoint, so this is a plain string
    /// concatenation with a `//` separator.
    pub fn remote_mount(&self) -> PathBuf {
        let mut joined: OsString = self.remote_encrypted.clone().into_os_string();
        joined.push("//");
        joined.push(&self.cloud_path);
        PathBuf::from(joined)
    }

    /// unionfs-fuse whiteout directory inside the local plaintext branch
    pub fn whiteout_dir(&self) -> PathBuf {
        self.local_decrypted.join(WHITEOUT_DIR_NAME)
    }

    /// unionfs-fuse branch specification: local writable over remote read-only
    pub fn union_branches(&self) -> OsString {
        let mut branches = self.local_decrypted.clone().into_os_string();
        branches.push("=RW:");
        branches.push(&self.remote_decrypted);
        branches.push("=RO");
        branches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;

    #[test]
    fn test_layout_from_config() {
        let layout = MountLayout::from_config(&sample_config());
        assert_eq!(
            layout.path(MountRole::RemoteEncrypted),
            Path::new("/mnt/cdt/acd-encrypted")
        );
        assert_eq!(
            layout.path(MountRole::LocalDecrypted),
            Path::new("/mnt/cdt/local-decrypted")
        );
        assert_eq!(layout.path(MountRole::UnionView), Path::new("/srv/media"));
        assert_eq!(layout.mountpoints().len(), 5);
        assert_eq!(
            layout.whiteout_dir(),
            PathBuf::from("/mnt/cdt/local-decrypted/.unionfs-fuse")
        );
    }

    #[test]
    fn test_remote_mount_keeps_adjacent_separators() {
        let layout = MountLayout::new(Path::new("/mnt/remote"), Path::new("/data"), "/foo");
        assert_eq!(
            layout.remote_mount().as_os_str(),
            "/mnt/remote/acd-encrypted///foo"
        );

        let relative = MountLayout::new(Path::new("/mnt/base"), Path::new("/data"), "foo/bar");
        assert_eq!(
            relative.remote_mount().as_os_str(),
            "/mnt/base/acd-encrypted//foo/bar"
        );
    }

    #[test]
    fn test_union_branches() {
        let layout = MountLayout::new(Path::new("/m"), Path::new("/data"), "x");
        assert_eq!(
            layout.union_branches(),
            OsString::from("/m/local-decrypted=RW:/m/acd-decrypted=RO")
        );
    }

    #[test]
    fn test_role_names() {
        let names: Vec<_> = MountRole::ALL.iter().map(|r| r.to_string()).collect();
        assert_eq!(
            names,
            [
                "remote-encrypted",
                "remote-decrypted",
                "local-encrypted",
                "local-decrypted",
                "union-view"
            ]
        );
    }
}
