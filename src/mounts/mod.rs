//! Mount stack: layout, live mount table, lifecycle and the remount keeper

pub mod keeper;
pub mod layout;
pub mod lifecycle;
pub mod table;

pub use keeper::RemoteMountKeeper;
pub use layout::{MountLayout, MountPoint, MountRole, WHITEOUT_DIR_NAME};
pub use lifecycle::{MountLifecycle, MountState};
pub use table::MountTable;
