use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use uuid::Uuid;

use super::AppError;

/// Opaque key of one registered download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DownloadId(Uuid);

impl DownloadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DownloadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Read-only view of a download record handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadSnapshot {
    pub id: DownloadId,
    pub filename: String,
    pub status: DownloadStatus,
    /// `None` while pending, or while the byte source did not advertise a length.
    pub progress: Option<u8>,
    pub is_paused: bool,
    pub source_url: Option<String>,
    pub size: Option<usize>,
    pub direct_link: Option<String>,
    pub cached: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum DownloadEvent {
    Registered { id: DownloadId, filename: String },
    Started { id: DownloadId, filename: String },
    Progress { id: DownloadId, progress: u8 },
    Paused { id: DownloadId },
    Resumed { id: DownloadId },
    Completed { id: DownloadId, filename: String, bytes: usize },
    Saved { id: DownloadId, path: PathBuf },
    SavedFromCache { id: DownloadId, filename: String, path: PathBuf },
    SaveFailed { id: DownloadId, error: AppError },
    Failed { id: DownloadId, error: AppError },
    Cancelled { id: DownloadId },
    Removed { id: DownloadId },
}

impl DownloadEvent {
    pub fn id(&self) -> DownloadId {
        match self {
            DownloadEvent::Registered { id, .. }
            | DownloadEvent::Started { id, .. }
            | DownloadEvent::Progress { id, .. }
            | DownloadEvent::Paused { id }
            | DownloadEvent::Resumed { id }
            | DownloadEvent::Completed { id, .. }
            | DownloadEvent::Saved { id, .. }
            | DownloadEvent::SavedFromCache { id, .. }
            | DownloadEvent::SaveFailed { id, .. }
            | DownloadEvent::Failed { id, .. }
            | DownloadEvent::Cancelled { id }
            | DownloadEvent::Removed { id } => *id,
        }
    }

    /// Status line for the event, if it is worth telling the user about.
    pub fn describe(&self) -> Option<String> {
        match self {
            DownloadEvent::Registered { filename, .. } => {
                Some(format!("Getting download information for {}...", filename))
            }
            DownloadEvent::Started { filename, .. } => {
                Some(format!("Downloading {}...", filename))
            }
            DownloadEvent::Progress { progress, .. } => {
                Some(format!("Downloading: {}%", progress))
            }
            DownloadEvent::Removed { .. } => None,
            DownloadEvent::Paused { .. } => Some("Download paused".to_string()),
            DownloadEvent::Resumed { .. } => Some("Download resumed".to_string()),
            DownloadEvent::Completed { filename, bytes, .. } => Some(format!(
                "Download completed: {} ({:.2} MB)",
                filename,
                *bytes as f64 / 1024.0 / 1024.0
            )),
            DownloadEvent::Saved { path, .. } => Some(format!("Saved: {}", path.display())),
            DownloadEvent::SavedFromCache { filename, path, .. } => Some(format!(
                "Found {} in cache, saved to {}",
                filename,
                path.display()
            )),
            DownloadEvent::SaveFailed { error, .. } => Some(format!("Save failed: {}", error)),
            DownloadEvent::Failed { error, .. } => Some(format!("Download failed: {}", error)),
            DownloadEvent::Cancelled { .. } => Some("Download cancelled".to_string()),
        }
    }
}
