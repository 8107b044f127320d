//! Moving local changes to the cloud
//!
//! - `deletes`: whiteout markers → remote deletions
//! - `upload`: the locked upload run
//! - `prune`: local cache cleanup once data is uploaded

pub mod deletes;
pub mod lock;
pub mod prune;
pub mod upload;

pub use deletes::{DeleteReconciler, ReconcileReport, HIDDEN_SUFFIX};
pub use lock::UploadLock;
pub use prune::PruneReport;
pub use upload::{UploadCoordinator, UploadReport};
