use std::time::Duration;

use tracing::{debug, info, warn};

use super::transfer_manager::{StartOutcome, TransferManager, TransferOutcome};
use crate::{
    api::{MarketplaceClient, ResolvedPackage},
    domain::{AppError, DownloadId},
    utils::{extract_package_name, extract_package_names},
};

/// Tally of one batch submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Lines rejected without being registered.
    pub rejected: Vec<String>,
}

impl BatchSummary {
    pub fn message(&self) -> String {
        let mut line = format!(
            "Download completed! Success: {}, Failed: {}",
            self.succeeded, self.failed
        );
        if self.cancelled > 0 {
            line.push_str(&format!(", Cancelled: {}", self.cancelled));
        }
        line
    }
}

#[derive(Clone)]
pub struct DownloadCoordinator {
    api_client: MarketplaceClient,
    manager: TransferManager,
    batch_delay: Duration,
}

impl DownloadCoordinator {
    pub fn new(api_client: MarketplaceClient, manager: TransferManager, batch_delay: Duration) -> Self {
        Self {
            api_client,
            manager,
            batch_delay,
        }
    }

    pub fn manager(&self) -> &TransferManager {
        &self.manager
    }

    pub async fn prepare_download(
        &self,
        identifier: &str,
        version: Option<&str>,
    ) -> Result<ResolvedPackage, AppError> {
        self.api_client
            .resolve(identifier, version)
            .await
            .map_err(AppError::from)
    }

    /// Register, resolve and start one identifier or marketplace URL.
    ///
    /// Resolution failures leave the record listed as failed.
    pub async fn fetch(&self, input: &str, version: Option<&str>) -> Result<StartOutcome, AppError> {
        let identifier = extract_package_name(input);
        let id = DownloadId::new();
        self.manager.register(id, &identifier)?;

        let package = match self.prepare_download(&identifier, version).await {
            Ok(package) => package,
            Err(error) => {
                warn!(%identifier, %error, status = error.status_code(), "Resolution failed");
                // Already gone if the user cancelled while we were resolving
                let _ = self.manager.fail(id, error.clone());
                return Err(error);
            }
        };

        match self
            .manager
            .start(id, &package.download_url, &package.filename)
            .await
        {
            Err(AppError::UnknownDownload(_)) => Err(AppError::Cancelled),
            other => other,
        }
    }

    /// Fetch a newline-separated list, one item at a time.
    pub async fn fetch_batch(&self, input: &str, version: Option<&str>) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let mut attempted = 0usize;

        for identifier in extract_package_names(input) {
            if !identifier.contains('.') {
                warn!(%identifier, "Skipping malformed batch entry");
                summary.failed += 1;
                summary.rejected.push(identifier);
                continue;
            }

            if attempted > 0 {
                tokio::time::sleep(self.batch_delay).await;
            }
            attempted += 1;

            match self.fetch(&identifier, version).await {
                Ok(StartOutcome::Cached(_)) => summary.succeeded += 1,
                Ok(StartOutcome::Started(handle)) => {
                    debug!(id = %handle.id(), %identifier, "Waiting for transfer");
                    match handle.wait().await {
                        TransferOutcome::Completed { bytes, saved_to } => {
                            debug!(%identifier, bytes, ?saved_to, "Batch item finished");
                            summary.succeeded += 1;
                        }
                        TransferOutcome::Failed(error) => {
                            warn!(%identifier, %error, "Batch item failed");
                            summary.failed += 1;
                        }
                        TransferOutcome::Cancelled => summary.cancelled += 1,
                    }
                }
                Err(AppError::Cancelled) => summary.cancelled += 1,
                Err(_) => summary.failed += 1,
            }
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            rejected = ?summary.rejected,
            "Batch finished"
        );
        summary
    }
}
