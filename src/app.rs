use crate::api::MarketplaceClient;
use crate::application::{
    BatchSummary, DirectorySink, DownloadCoordinator, StartOutcome, TransferManager,
};
use crate::config::Settings;
use crate::domain::{AppError, DownloadEvent, DownloadId};
use crate::ui::{DownloadMessage, DownloadView, InputMode};
use crate::utils::extract_package_names;
use iced::{Subscription, Task};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::debug;

const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

pub struct DownloadApp {
    view: DownloadView,
    coordinator: DownloadCoordinator,
    events: broadcast::Receiver<DownloadEvent>,
}

impl DownloadApp {
    pub fn new(settings: Settings) -> Self {
        let api_client = MarketplaceClient::new(settings.api_config());
        let sink = Arc::new(DirectorySink::new(settings.download_dir.clone()));
        let manager = TransferManager::new(api_client.clone(), sink, settings.manager_settings());
        let events = manager.subscribe();
        let coordinator = DownloadCoordinator::new(api_client, manager, settings.batch_delay());

        Self {
            view: DownloadView::new(settings.use_cache_check),
            coordinator,
            events,
        }
    }

    fn manager(&self) -> &TransferManager {
        self.coordinator.manager()
    }

    fn version(&self) -> Option<String> {
        let version = &self.view.version;
        (!version.trim().is_empty()).then(|| version.clone())
    }

    /// Pull the latest state from the manager.
    fn refresh(&mut self) {
        self.view.downloads = self.manager().snapshot();
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    debug!(id = %event.id(), ?event, "Download event");
                    if let Some(line) = event.describe() {
                        self.view.status_message = line;
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "Status line skipped events");
                }
                Err(_) => break,
            }
        }
    }

    fn report(&mut self, result: Result<(), AppError>) {
        if let Err(e) = result {
            self.view.status_message = format!("Error: {}", e);
        }
    }
}

#[derive(Debug, Clone)]
pub enum Message {
    UiMessage(DownloadMessage),
    Tick,
    /// Status line once a single submission has been resolved
    SingleFinished(Result<String, AppError>),
    BatchFinished(BatchSummary),
    /// Where a payload ended up on disk
    SaveFinished(Result<PathBuf, AppError>),
    /// (Download, Selected Path)
    LinkSaveSelected(DownloadId, Option<PathBuf>),
}

pub fn update(app: &mut DownloadApp, message: Message) -> Task<Message> {
    match message {
        Message::UiMessage(ui_msg) => {
            app.view.update(ui_msg.clone());
            return handle_ui(app, ui_msg);
        }
        Message::Tick => app.refresh(),
        Message::SingleFinished(result) => {
            app.refresh();
            app.view.status_message = match result {
                Ok(line) => line,
                Err(AppError::Cancelled) => "Download cancelled".to_string(),
                Err(e) => format!("Error: {}", e),
            };
        }
        Message::BatchFinished(summary) => {
            app.refresh();
            app.view.is_batch_running = false;
            app.view.status_message = summary.message();
        }
        Message::SaveFinished(result) => {
            app.view.status_message = match result {
                Ok(path) => format!("Saved: {}", path.display()),
                Err(e) => format!("Save failed: {}", e),
            };
        }
        Message::LinkSaveSelected(id, path) => match path {
            Some(path) => match app.manager().direct_link_payload(id) {
                Ok((_, payload)) => {
                    app.view.status_message = format!("Saving to: {}", path.display());
                    return Task::perform(
                        async move {
                            tokio::fs::write(&path, &payload)
                                .await
                                .map(|_| path)
                                .map_err(|e| AppError::Io(e.to_string()))
                        },
                        Message::SaveFinished,
                    );
                }
                Err(e) => app.view.status_message = format!("Error: {}", e),
            },
            None => {
                // User cancelled dialog
                app.view.status_message = "Save cancelled".to_string();
            }
        },
    }
    Task::none()
}

fn handle_ui(app: &mut DownloadApp, message: DownloadMessage) -> Task<Message> {
    match message {
        DownloadMessage::DownloadPressed => return submit(app),
        DownloadMessage::CacheCheckToggled => {
            app.manager().set_cache_check(app.view.use_cache_check);
        }
        DownloadMessage::ClearCachePressed => {
            let cleared = app.manager().clear_cache();
            app.refresh();
            app.view.status_message = format!("Download cache cleared ({} removed)", cleared);
        }
        DownloadMessage::Pause(id) => {
            let result = app.manager().pause(id);
            app.report(result);
        }
        DownloadMessage::Resume(id) => {
            let result = app.manager().resume(id);
            app.report(result);
        }
        DownloadMessage::Cancel(id) => {
            let result = app.manager().cancel(id);
            app.report(result);
        }
        DownloadMessage::Clear(id) => {
            let result = app.manager().clear(id);
            app.report(result);
        }
        DownloadMessage::Remove(id) => {
            let result = app.manager().remove_failed(id);
            app.report(result);
        }
        DownloadMessage::DirectLink(id) => match app.manager().request_direct_link(id) {
            Ok(url) => app.view.status_message = format!("Direct link (download paused): {}", url),
            Err(e) => app.view.status_message = format!("Error: {}", e),
        },
        DownloadMessage::Redownload(id) => {
            if let Some(item) = app.manager().get(id) {
                app.view.status_message = format!("Saving {} again...", item.filename);
            }
            let manager = app.manager().clone();
            return Task::perform(
                async move { manager.redownload_cached(id).await },
                Message::SaveFinished,
            );
        }
        DownloadMessage::SaveLink(id) => match app.manager().direct_link_payload(id) {
            Ok((filename, _)) => {
                app.view.status_message = "Please select save location...".to_string();
                return Task::perform(
                    async move {
                        rfd::AsyncFileDialog::new()
                            .set_file_name(&filename)
                            .save_file()
                            .await
                            .map(|handle| handle.path().to_path_buf())
                    },
                    move |path| Message::LinkSaveSelected(id, path),
                );
            }
            Err(e) => app.view.status_message = format!("Error: {}", e),
        },
        _ => {}
    }
    app.refresh();
    Task::none()
}

fn submit(app: &mut DownloadApp) -> Task<Message> {
    let coordinator = app.coordinator.clone();
    let version = app.version();

    match app.view.mode {
        InputMode::Single => {
            let input = app.view.extension.trim().to_string();
            if input.is_empty() {
                app.view.status_message = "Please enter an extension name".to_string();
                return Task::none();
            }
            app.view.status_message = "Getting download information...".to_string();

            Task::perform(
                async move {
                    let outcome = coordinator.fetch(&input, version.as_deref()).await;
                    outcome.map(|outcome| match outcome {
                        StartOutcome::Started(_) => "Starting download...".to_string(),
                        StartOutcome::Cached(path) => {
                            format!("Found {} in cache, saved to {}", input, path.display())
                        }
                    })
                },
                Message::SingleFinished,
            )
        }
        InputMode::Batch => {
            let input = app.view.batch_list.text();
            let count = extract_package_names(&input).len();
            if count == 0 {
                app.view.status_message = "Please enter at least one extension".to_string();
                return Task::none();
            }
            app.view.is_batch_running = true;
            app.view.status_message = format!("Downloading {} extensions...", count);

            Task::perform(
                async move { coordinator.fetch_batch(&input, version.as_deref()).await },
                Message::BatchFinished,
            )
        }
    }
}

pub fn subscription(_app: &DownloadApp) -> Subscription<Message> {
    iced::time::every(REFRESH_INTERVAL).map(|_| Message::Tick)
}

pub fn view(app: &DownloadApp) -> iced::Element<'_, Message> {
    app.view.view().map(Message::UiMessage)
}
