pub mod direct_link;
pub mod download_coordinator;
pub mod save;
pub mod transfer_manager;

pub use download_coordinator::{BatchSummary, DownloadCoordinator};
pub use save::DirectorySink;
pub use transfer_manager::{ManagerSettings, StartOutcome, TransferManager};
