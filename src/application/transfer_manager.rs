use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, TryStreamExt};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::direct_link::{BlobRegistry, DirectLink};
use super::save::SaveSink;
use crate::api::MarketplaceClient;
use crate::domain::{AppError, DownloadEvent, DownloadId, DownloadSnapshot, DownloadStatus};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct ManagerSettings {
    /// Reuse a completed payload with the same filename instead of fetching again.
    pub use_cache_check: bool,
    /// Save finished payloads right away; otherwise keep a direct link for the user.
    pub auto_download: bool,
    /// How long an uncached, saved record stays listed.
    pub grace_period: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            use_cache_check: true,
            auto_download: true,
            grace_period: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    Completed {
        bytes: usize,
        saved_to: Option<PathBuf>,
    },
    Failed(AppError),
    Cancelled,
}

#[derive(Debug)]
pub struct TransferHandle {
    id: DownloadId,
    join: JoinHandle<TransferOutcome>,
}

impl TransferHandle {
    pub fn id(&self) -> DownloadId {
        self.id
    }

    pub async fn wait(self) -> TransferOutcome {
        self.join
            .await
            .unwrap_or_else(|e| TransferOutcome::Failed(AppError::Internal(e.to_string())))
    }
}

#[derive(Debug)]
pub enum StartOutcome {
    Started(TransferHandle),
    /// Served from an earlier payload; nothing was fetched.
    Cached(PathBuf),
}

/// Control side of one running transfer. Owned by its record.
struct TransferControl {
    cancel: CancellationToken,
    pause: watch::Sender<bool>,
}

struct DownloadRecord {
    seq: u64,
    filename: String,
    progress: Option<u8>,
    status: DownloadStatus,
    is_paused: bool,
    cancel_handle: Option<TransferControl>,
    source_url: Option<String>,
    materialized_blob: Option<Bytes>,
    direct_link: Option<DirectLink>,
    cleanup: Option<CancellationToken>,
    error: Option<String>,
}

impl DownloadRecord {
    fn new(filename: &str, seq: u64) -> Self {
        Self {
            seq,
            filename: filename.to_string(),
            progress: None,
            status: DownloadStatus::Pending,
            is_paused: false,
            cancel_handle: None,
            source_url: None,
            materialized_blob: None,
            direct_link: None,
            cleanup: None,
            error: None,
        }
    }

    fn cached_payload(&self, filename: &str) -> Option<Bytes> {
        if self.status == DownloadStatus::Completed && self.filename == filename {
            self.materialized_blob.clone()
        } else {
            None
        }
    }

    fn snapshot(&self, id: DownloadId) -> DownloadSnapshot {
        DownloadSnapshot {
            id,
            filename: self.filename.clone(),
            status: self.status,
            progress: match self.status {
                DownloadStatus::Pending => None,
                _ => self.progress,
            },
            is_paused: self.status == DownloadStatus::Downloading && self.is_paused,
            source_url: self.source_url.clone(),
            size: self.materialized_blob.as_ref().map(Bytes::len),
            direct_link: self.direct_link.as_ref().map(DirectLink::url),
            cached: self.materialized_blob.is_some(),
            error: self.error.clone(),
        }
    }

    /// Drop everything the record owns outside the map.
    fn release(mut self, blobs: &BlobRegistry) {
        if let Some(control) = self.cancel_handle.take() {
            control.cancel.cancel();
        }
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.cancel();
        }
        if let Some(link) = self.direct_link.take() {
            blobs.revoke(link);
        }
    }
}

enum Launch {
    Cached(Bytes),
    Transfer {
        cancel: CancellationToken,
        paused: watch::Receiver<bool>,
    },
}

/// Owns every download of the session and the tasks streaming them.
///
/// All state lives in one map; each operation does its read-modify-write
/// under a single lock scope and never holds the lock across an await.
#[derive(Clone)]
pub struct TransferManager {
    client: MarketplaceClient,
    records: Arc<Mutex<HashMap<DownloadId, DownloadRecord>>>,
    blobs: BlobRegistry,
    sink: Arc<dyn SaveSink>,
    events: broadcast::Sender<DownloadEvent>,
    settings: ManagerSettings,
    cache_check: Arc<AtomicBool>,
    next_seq: Arc<AtomicU64>,
}

impl TransferManager {
    pub fn new(client: MarketplaceClient, sink: Arc<dyn SaveSink>, settings: ManagerSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            client,
            records: Arc::new(Mutex::new(HashMap::new())),
            blobs: BlobRegistry::new(),
            sink,
            events,
            settings,
            cache_check: Arc::new(AtomicBool::new(settings.use_cache_check)),
            next_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    fn records(&self) -> MutexGuard<'_, HashMap<DownloadId, DownloadRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: DownloadEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    #[cfg(test)]
    pub fn blobs(&self) -> &BlobRegistry {
        &self.blobs
    }

    pub fn cache_check(&self) -> bool {
        self.cache_check.load(Ordering::Relaxed)
    }

    pub fn set_cache_check(&self, enabled: bool) {
        self.cache_check.store(enabled, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Vec<DownloadSnapshot> {
        let records = self.records();
        let mut entries: Vec<_> = records
            .iter()
            .map(|(id, record)| (record.seq, record.snapshot(*id)))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, snapshot)| snapshot).collect()
    }

    pub fn get(&self, id: DownloadId) -> Option<DownloadSnapshot> {
        self.records().get(&id).map(|record| record.snapshot(id))
    }

    pub fn register(&self, id: DownloadId, placeholder: &str) -> Result<(), AppError> {
        let mut records = self.records();
        if records.contains_key(&id) {
            return Err(AppError::DuplicateDownload(id));
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        records.insert(id, DownloadRecord::new(placeholder, seq));
        debug!(%id, placeholder, "Registered download");
        self.publish(DownloadEvent::Registered {
            id,
            filename: placeholder.to_string(),
        });
        Ok(())
    }

    /// Begin fetching `url` for a pending record.
    pub async fn start(
        &self,
        id: DownloadId,
        url: &str,
        filename: &str,
    ) -> Result<StartOutcome, AppError> {
        let client = self.client.clone();
        let source = url.to_string();
        let fetch = async move {
            let (total, stream) = client.download_stream(&source).await?;
            Ok::<_, AppError>((total, stream.map_err(AppError::from)))
        };
        self.launch(id, url, filename, fetch).await
    }

    async fn launch<F, S>(
        &self,
        id: DownloadId,
        url: &str,
        filename: &str,
        fetch: F,
    ) -> Result<StartOutcome, AppError>
    where
        F: Future<Output = Result<(Option<u64>, S), AppError>> + Send + 'static,
        S: Stream<Item = Result<Bytes, AppError>> + Send + Unpin + 'static,
    {
        let launch = {
            let mut records = self.records();
            let status = records
                .get(&id)
                .map(|record| record.status)
                .ok_or(AppError::UnknownDownload(id))?;
            if status != DownloadStatus::Pending {
                return Err(AppError::InvalidTransition {
                    id,
                    status,
                    operation: "start",
                });
            }

            let hit = if self.cache_check() {
                records
                    .iter()
                    .filter(|(other, _)| **other != id)
                    .find_map(|(_, record)| record.cached_payload(filename))
            } else {
                None
            };

            match hit {
                Some(payload) => {
                    if let Some(record) = records.remove(&id) {
                        record.release(&self.blobs);
                    }
                    Launch::Cached(payload)
                }
                None => {
                    let cancel = CancellationToken::new();
                    let (pause, paused) = watch::channel(false);
                    if let Some(record) = records.get_mut(&id) {
                        record.status = DownloadStatus::Downloading;
                        record.filename = filename.to_string();
                        record.source_url = Some(url.to_string());
                        record.progress = None;
                        record.is_paused = false;
                        record.cancel_handle = Some(TransferControl {
                            cancel: cancel.clone(),
                            pause,
                        });
                    }
                    self.publish(DownloadEvent::Started {
                        id,
                        filename: filename.to_string(),
                    });
                    Launch::Transfer { cancel, paused }
                }
            }
        };

        match launch {
            Launch::Cached(payload) => {
                info!(%id, filename, "Found package in cache, skipping download");
                let path = match self.save_payload(filename, payload).await {
                    Ok(path) => path,
                    Err(error) => {
                        self.publish(DownloadEvent::SaveFailed {
                            id,
                            error: error.clone(),
                        });
                        return Err(error);
                    }
                };
                self.publish(DownloadEvent::SavedFromCache {
                    id,
                    filename: filename.to_string(),
                    path: path.clone(),
                });
                Ok(StartOutcome::Cached(path))
            }
            Launch::Transfer { cancel, paused } => {
                info!(%id, filename, url, "Starting download");
                let manager = self.clone();
                let join =
                    tokio::spawn(async move { manager.run_transfer(id, cancel, paused, fetch).await });
                Ok(StartOutcome::Started(TransferHandle { id, join }))
            }
        }
    }

    async fn run_transfer<F, S>(
        self,
        id: DownloadId,
        cancel: CancellationToken,
        mut paused: watch::Receiver<bool>,
        fetch: F,
    ) -> TransferOutcome
    where
        F: Future<Output = Result<(Option<u64>, S), AppError>> + Send + 'static,
        S: Stream<Item = Result<Bytes, AppError>> + Send + Unpin + 'static,
    {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.abandon(id),
            response = fetch => response,
        };
        let (total, mut body) = match response {
            Ok(response) => response,
            Err(error) => return self.fail_transfer(id, &cancel, error),
        };

        let mut chunks: Vec<Bytes> = Vec::new();
        let mut received: u64 = 0;

        loop {
            if !hold_while_paused(&mut paused, &cancel).await {
                return self.abandon(id);
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.abandon(id),
                next = body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    received += chunk.len() as u64;
                    chunks.push(chunk);
                    if let Some(progress) = percent(received, total) {
                        self.advance(id, progress);
                    }
                }
                Some(Err(error)) => return self.fail_transfer(id, &cancel, error),
                None => break,
            }
        }

        drop(body);
        // A pause that landed on the final read still holds completion.
        if !hold_while_paused(&mut paused, &cancel).await {
            return self.abandon(id);
        }

        let mut payload = BytesMut::with_capacity(received as usize);
        for chunk in chunks {
            payload.extend_from_slice(&chunk);
        }
        self.complete(id, payload.freeze()).await
    }

    fn advance(&self, id: DownloadId, progress: u8) {
        let mut records = self.records();
        if let Some(record) = records.get_mut(&id) {
            let moved = record.progress.map_or(true, |current| progress > current);
            if record.status == DownloadStatus::Downloading && !record.is_paused && moved {
                record.progress = Some(progress);
                self.publish(DownloadEvent::Progress { id, progress });
            }
        }
    }

    /// Cancelled transfers vanish without a trace.
    fn abandon(&self, id: DownloadId) -> TransferOutcome {
        let mut records = self.records();
        let live = records
            .get(&id)
            .is_some_and(|record| record.status == DownloadStatus::Downloading);
        if live {
            if let Some(record) = records.remove(&id) {
                record.release(&self.blobs);
            }
        }
        debug!(%id, "Transfer abandoned");
        TransferOutcome::Cancelled
    }

    fn fail_transfer(
        &self,
        id: DownloadId,
        cancel: &CancellationToken,
        error: AppError,
    ) -> TransferOutcome {
        if cancel.is_cancelled() {
            return self.abandon(id);
        }
        match self.fail(id, error.clone()) {
            Ok(()) => TransferOutcome::Failed(error),
            Err(_) => TransferOutcome::Cancelled,
        }
    }

    async fn complete(&self, id: DownloadId, payload: Bytes) -> TransferOutcome {
        let auto_download = self.settings.auto_download;
        let filename = {
            let mut records = self.records();
            let Some(record) = records.get_mut(&id) else {
                return TransferOutcome::Cancelled;
            };
            if record.status != DownloadStatus::Downloading {
                return TransferOutcome::Cancelled;
            }

            record.status = DownloadStatus::Completed;
            record.progress = Some(100);
            record.is_paused = false;
            record.cancel_handle = None;
            record.materialized_blob = Some(payload.clone());
            if !auto_download {
                if let Some(stale) = record.direct_link.take() {
                    self.blobs.revoke(stale);
                }
                record.direct_link = Some(self.blobs.create(payload.clone()));
            }

            self.publish(DownloadEvent::Completed {
                id,
                filename: record.filename.clone(),
                bytes: payload.len(),
            });
            record.filename.clone()
        };
        info!(%id, filename, bytes = payload.len(), "Download completed");

        let mut saved_to = None;
        if auto_download {
            match self.save_payload(&filename, payload.clone()).await {
                Ok(path) => {
                    self.publish(DownloadEvent::Saved {
                        id,
                        path: path.clone(),
                    });
                    saved_to = Some(path);
                }
                Err(error) => {
                    warn!(%id, %error, "Failed to save package");
                    self.publish(DownloadEvent::SaveFailed { id, error });
                }
            }
            if !self.cache_check() {
                self.schedule_cleanup(id);
            }
        }

        TransferOutcome::Completed {
            bytes: payload.len(),
            saved_to,
        }
    }

    /// Hand the payload to the sink through a short-lived link.
    async fn save_payload(&self, filename: &str, payload: Bytes) -> Result<PathBuf, AppError> {
        let link = self.blobs.create(payload);
        let bytes = self.blobs.resolve(&link).unwrap_or_default();
        let result = self.sink.save(filename, bytes).await;
        self.blobs.revoke(link);
        result
    }

    fn schedule_cleanup(&self, id: DownloadId) {
        let token = CancellationToken::new();
        {
            let mut records = self.records();
            let Some(record) = records.get_mut(&id) else {
                return;
            };
            if record.status != DownloadStatus::Completed || record.direct_link.is_some() {
                return;
            }
            if let Some(previous) = record.cleanup.replace(token.clone()) {
                previous.cancel();
            }
        }

        let manager = self.clone();
        let grace = self.settings.grace_period;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(grace) => manager.expire(id, &token),
            }
        });
    }

    fn expire(&self, id: DownloadId, token: &CancellationToken) {
        let mut records = self.records();
        if token.is_cancelled() {
            return;
        }
        if let Some(record) = records.remove(&id) {
            record.release(&self.blobs);
            debug!(%id, "Removed finished download");
            self.publish(DownloadEvent::Removed { id });
        }
    }

    pub fn fail(&self, id: DownloadId, error: AppError) -> Result<(), AppError> {
        let mut records = self.records();
        let record = records.get_mut(&id).ok_or(AppError::UnknownDownload(id))?;
        match record.status {
            DownloadStatus::Pending | DownloadStatus::Downloading => {}
            status => {
                return Err(AppError::InvalidTransition {
                    id,
                    status,
                    operation: "fail",
                })
            }
        }

        record.status = DownloadStatus::Failed;
        record.progress = None;
        record.is_paused = false;
        record.error = Some(error.to_string());
        if let Some(control) = record.cancel_handle.take() {
            control.cancel.cancel();
        }
        warn!(%id, %error, "Download failed");
        self.publish(DownloadEvent::Failed { id, error });
        Ok(())
    }

    pub fn pause(&self, id: DownloadId) -> Result<(), AppError> {
        self.set_paused(id, true, "pause")
    }

    pub fn resume(&self, id: DownloadId) -> Result<(), AppError> {
        self.set_paused(id, false, "resume")
    }

    fn set_paused(&self, id: DownloadId, paused: bool, operation: &'static str) -> Result<(), AppError> {
        let mut records = self.records();
        let record = records.get_mut(&id).ok_or(AppError::UnknownDownload(id))?;
        if record.status != DownloadStatus::Downloading {
            return Err(AppError::InvalidTransition {
                id,
                status: record.status,
                operation,
            });
        }
        self.apply_pause(id, record, paused);
        Ok(())
    }

    fn apply_pause(&self, id: DownloadId, record: &mut DownloadRecord, paused: bool) {
        if record.is_paused == paused {
            return;
        }
        record.is_paused = paused;
        if let Some(control) = &record.cancel_handle {
            control.pause.send_replace(paused);
        }
        debug!(%id, paused, "Pause state changed");
        self.publish(if paused {
            DownloadEvent::Paused { id }
        } else {
            DownloadEvent::Resumed { id }
        });
    }

    /// Stop a pending or running download and forget it.
    pub fn cancel(&self, id: DownloadId) -> Result<(), AppError> {
        let mut records = self.records();
        let status = records
            .get(&id)
            .map(|record| record.status)
            .ok_or(AppError::UnknownDownload(id))?;
        if !matches!(status, DownloadStatus::Pending | DownloadStatus::Downloading) {
            return Err(AppError::InvalidTransition {
                id,
                status,
                operation: "cancel",
            });
        }
        if let Some(record) = records.remove(&id) {
            record.release(&self.blobs);
        }
        info!(%id, "Download cancelled");
        self.publish(DownloadEvent::Cancelled { id });
        Ok(())
    }

    pub fn clear(&self, id: DownloadId) -> Result<(), AppError> {
        self.remove_finished(id, "clear", |status| {
            matches!(status, DownloadStatus::Completed | DownloadStatus::Failed)
        })
    }

    pub fn remove_failed(&self, id: DownloadId) -> Result<(), AppError> {
        self.remove_finished(id, "remove", |status| status == DownloadStatus::Failed)
    }

    fn remove_finished(
        &self,
        id: DownloadId,
        operation: &'static str,
        allowed: fn(DownloadStatus) -> bool,
    ) -> Result<(), AppError> {
        let mut records = self.records();
        let status = records
            .get(&id)
            .map(|record| record.status)
            .ok_or(AppError::UnknownDownload(id))?;
        if !allowed(status) {
            return Err(AppError::InvalidTransition {
                id,
                status,
                operation,
            });
        }
        if let Some(record) = records.remove(&id) {
            record.release(&self.blobs);
        }
        self.publish(DownloadEvent::Removed { id });
        Ok(())
    }

    /// Drop every completed payload held by the session.
    pub fn clear_cache(&self) -> usize {
        let mut records = self.records();
        let completed: Vec<DownloadId> = records
            .iter()
            .filter(|(_, record)| record.status == DownloadStatus::Completed)
            .map(|(id, _)| *id)
            .collect();
        for id in &completed {
            if let Some(record) = records.remove(id) {
                record.release(&self.blobs);
            }
            self.publish(DownloadEvent::Removed { id: *id });
        }
        info!(
            count = completed.len(),
            live_links = self.blobs.live_count(),
            "Download cache cleared"
        );
        completed.len()
    }

    /// Save a completed payload again without touching the network.
    pub async fn redownload_cached(&self, id: DownloadId) -> Result<PathBuf, AppError> {
        let (filename, payload) = {
            let records = self.records();
            let record = records.get(&id).ok_or(AppError::UnknownDownload(id))?;
            if record.status != DownloadStatus::Completed {
                return Err(AppError::InvalidTransition {
                    id,
                    status: record.status,
                    operation: "redownload",
                });
            }
            let payload = record
                .materialized_blob
                .clone()
                .ok_or(AppError::NothingCached(id))?;
            (record.filename.clone(), payload)
        };

        let path = self.save_payload(&filename, payload).await?;
        self.publish(DownloadEvent::SavedFromCache {
            id,
            filename,
            path: path.clone(),
        });
        Ok(path)
    }

    /// Source URL for fetching outside the app. A running transfer is paused.
    pub fn request_direct_link(&self, id: DownloadId) -> Result<String, AppError> {
        let mut records = self.records();
        let record = records.get_mut(&id).ok_or(AppError::UnknownDownload(id))?;
        let url = record.source_url.clone().ok_or(AppError::NoSourceUrl(id))?;
        if record.status == DownloadStatus::Downloading {
            self.apply_pause(id, record, true);
        }
        Ok(url)
    }

    /// Filename and bytes behind a record's direct link.
    pub fn direct_link_payload(&self, id: DownloadId) -> Result<(String, Bytes), AppError> {
        let records = self.records();
        let record = records.get(&id).ok_or(AppError::UnknownDownload(id))?;
        let payload = record
            .direct_link
            .as_ref()
            .and_then(|link| self.blobs.resolve(link))
            .ok_or(AppError::NothingCached(id))?;
        Ok((record.filename.clone(), payload))
    }
}

/// Wait until the transfer is not paused. `false` means it was cancelled.
async fn hold_while_paused(paused: &mut watch::Receiver<bool>, cancel: &CancellationToken) -> bool {
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        if !*paused.borrow_and_update() {
            return true;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            changed = paused.changed() => {
                if changed.is_err() {
                    // Record dropped its control half.
                    return false;
                }
            }
        }
    }
}

fn percent(received: u64, total: Option<u64>) -> Option<u8> {
    let total = total.filter(|t| *t > 0)?;
    let ratio = (received as f64 / total as f64 * 100.0).round();
    Some(ratio.min(100.0) as u8)
}
