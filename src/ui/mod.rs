use iced::{
    widget::{
        button, column, progress_bar, row, scrollable, text, text_editor, text_input, Column, Row,
        Space,
    },
    Element, Length,
};

use crate::domain::{DownloadId, DownloadSnapshot, DownloadStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Single,
    Batch,
}

/// Main view state
pub struct DownloadView {
    pub mode: InputMode,
    pub extension: String,
    pub version: String,
    pub batch_list: text_editor::Content,
    pub status_message: String,
    pub use_cache_check: bool,
    pub is_batch_running: bool,
    pub downloads: Vec<DownloadSnapshot>,
}

impl DownloadView {
    pub fn new(use_cache_check: bool) -> Self {
        Self {
            mode: InputMode::Single,
            extension: String::new(),
            version: String::new(),
            batch_list: text_editor::Content::new(),
            status_message: "Enter an extension to download".to_string(),
            use_cache_check,
            is_batch_running: false,
            downloads: Vec::new(),
        }
    }
}

impl Default for DownloadView {
    fn default() -> Self {
        Self::new(true)
    }
}

#[derive(Debug, Clone)]
pub enum DownloadMessage {
    ModeSelected(InputMode),
    ExtensionChanged(String),
    VersionChanged(String),
    BatchEdited(text_editor::Action),
    DownloadPressed,
    CacheCheckToggled,
    ClearCachePressed,
    Pause(DownloadId),
    Resume(DownloadId),
    Cancel(DownloadId),
    DirectLink(DownloadId),
    SaveLink(DownloadId),
    Redownload(DownloadId),
    Clear(DownloadId),
    Remove(DownloadId),
}

impl DownloadView {
    pub fn update(&mut self, message: DownloadMessage) {
        match message {
            DownloadMessage::ModeSelected(mode) => {
                self.mode = mode;
            }
            DownloadMessage::ExtensionChanged(extension) => {
                self.extension = extension;
            }
            DownloadMessage::VersionChanged(version) => {
                self.version = version;
            }
            DownloadMessage::BatchEdited(action) => {
                self.batch_list.perform(action);
            }
            DownloadMessage::CacheCheckToggled => {
                self.use_cache_check = !self.use_cache_check;
            }
            _ => {
                // Will be handled by the app
            }
        }
    }

    pub fn view(&self) -> Element<'_, DownloadMessage> {
        let cache_label = if self.use_cache_check {
            "Cache check: on"
        } else {
            "Cache check: off"
        };

        let form: Element<'_, DownloadMessage> = match self.mode {
            InputMode::Single => column![
                text("Extension Name").size(16),
                text_input("e.g., ms-python.python", &self.extension)
                    .on_input(DownloadMessage::ExtensionChanged)
                    .padding(10),
                text("Format: publisher.extension-name or a marketplace URL").size(12),
            ]
            .spacing(6)
            .into(),
            InputMode::Batch => column![
                text("Extensions List").size(16),
                text_editor(&self.batch_list)
                    .placeholder("ms-python.python\nbradlc.vscode-tailwindcss")
                    .on_action(DownloadMessage::BatchEdited)
                    .height(Length::Fixed(140.0)),
                text("One extension or marketplace URL per line").size(12),
            ]
            .spacing(6)
            .into(),
        };

        let submit_label = match (self.mode, self.is_batch_running) {
            (_, true) => "Downloading...",
            (InputMode::Single, false) => "Download Extension",
            (InputMode::Batch, false) => "Download All Extensions",
        };

        let downloads = Column::with_children(self.downloads.iter().map(download_row)).spacing(12);

        column![
            text("VS Code Extension Downloader").size(32),
            text("Download VSIX packages from the VS Code Marketplace").size(14),
            Space::new().height(Length::Fixed(10.0)),
            row![
                button(cache_label).on_press(DownloadMessage::CacheCheckToggled),
                button("Clear Cache").on_press(DownloadMessage::ClearCachePressed),
            ]
            .spacing(10),
            row![
                button("Single Extension")
                    .on_press(DownloadMessage::ModeSelected(InputMode::Single)),
                button("Multiple Extensions")
                    .on_press(DownloadMessage::ModeSelected(InputMode::Batch)),
            ]
            .spacing(10),
            form,
            text("Version (optional)").size(16),
            text_input("e.g., 1.2.3 (leave empty for latest)", &self.version)
                .on_input(DownloadMessage::VersionChanged)
                .padding(10),
            button(submit_label)
                .on_press_maybe((!self.is_batch_running).then_some(DownloadMessage::DownloadPressed))
                .padding([10, 20]),
            text(&self.status_message).size(14),
            Space::new().height(Length::Fixed(10.0)),
            scrollable(downloads).height(Length::Fill),
        ]
        .padding(20)
        .spacing(10)
        .into()
    }
}

fn download_row(item: &DownloadSnapshot) -> Element<'_, DownloadMessage> {
    let id = item.id;
    let mut controls = Row::new().spacing(6);

    match item.status {
        DownloadStatus::Pending => {
            controls = controls.push(button("Cancel").on_press(DownloadMessage::Cancel(id)));
        }
        DownloadStatus::Downloading => {
            controls = if item.is_paused {
                controls.push(button("Resume").on_press(DownloadMessage::Resume(id)))
            } else {
                controls.push(button("Pause").on_press(DownloadMessage::Pause(id)))
            };
            controls = controls
                .push(button("Direct link").on_press(DownloadMessage::DirectLink(id)))
                .push(button("Cancel").on_press(DownloadMessage::Cancel(id)));
        }
        DownloadStatus::Completed => {
            if item.direct_link.is_some() {
                controls = controls.push(button("Save").on_press(DownloadMessage::SaveLink(id)));
            }
            if item.cached {
                controls =
                    controls.push(button("Redownload").on_press(DownloadMessage::Redownload(id)));
            }
            controls = controls.push(button("Clear").on_press(DownloadMessage::Clear(id)));
        }
        DownloadStatus::Failed => {
            controls = controls.push(button("Remove").on_press(DownloadMessage::Remove(id)));
        }
    }

    let mut details = column![text(&item.filename).size(14), text(status_line(item)).size(12)]
        .spacing(4);
    if item.status == DownloadStatus::Downloading {
        if let Some(progress) = item.progress {
            details = details.push(progress_bar(0.0..=100.0, f32::from(progress)));
        }
    }

    column![details, controls].spacing(6).into()
}

fn status_line(item: &DownloadSnapshot) -> String {
    match item.status {
        DownloadStatus::Pending => "Getting download information...".to_string(),
        DownloadStatus::Downloading if item.is_paused => match item.progress {
            Some(progress) => format!("Paused at {}%", progress),
            None => "Paused".to_string(),
        },
        DownloadStatus::Downloading => match item.progress {
            Some(progress) => format!("Downloading: {}%", progress),
            None => "Downloading...".to_string(),
        },
        DownloadStatus::Completed => match item.size {
            Some(size) => format!("Completed, {:.2} MB", size as f64 / 1024.0 / 1024.0),
            None => "Completed".to_string(),
        },
        DownloadStatus::Failed => match &item.error {
            Some(error) => format!("Failed: {}", error),
            None => "Failed".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(status: DownloadStatus) -> DownloadSnapshot {
        DownloadSnapshot {
            id: DownloadId::new(),
            filename: "ms-python.python-1.0.0.vsix".to_string(),
            status,
            progress: None,
            is_paused: false,
            source_url: None,
            size: None,
            direct_link: None,
            cached: false,
            error: None,
        }
    }

    #[test]
    fn test_status_line() {
        let mut item = snapshot(DownloadStatus::Downloading);
        item.progress = Some(42);
        assert_eq!(status_line(&item), "Downloading: 42%");

        item.is_paused = true;
        assert_eq!(status_line(&item), "Paused at 42%");

        let mut done = snapshot(DownloadStatus::Completed);
        done.size = Some(3 * 1024 * 1024);
        assert_eq!(status_line(&done), "Completed, 3.00 MB");
    }

    #[test]
    fn test_update_edits_inputs() {
        let mut view = DownloadView::default();
        view.update(DownloadMessage::ExtensionChanged("a.b".to_string()));
        view.update(DownloadMessage::CacheCheckToggled);
        view.update(DownloadMessage::ModeSelected(InputMode::Batch));

        assert_eq!(view.extension, "a.b");
        assert!(!view.use_cache_check);
        assert_eq!(view.mode, InputMode::Batch);
    }
}
