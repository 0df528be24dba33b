pub mod error;
pub mod identifier;
pub mod model;

pub use error::AppError;
pub use identifier::ExtensionId;
pub use model::{DownloadEvent, DownloadId, DownloadSnapshot, DownloadStatus};
