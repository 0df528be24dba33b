mod api;
mod app;
mod application;
mod config;
mod domain;
mod ui;
mod utils;

use iced::window;
use tracing::info;

fn main() -> iced::Result {
    dotenvy::dotenv().ok();
    let settings = config::Settings::new().expect("Failed to load configuration");

    tracing_subscriber::fmt()
        .with_env_filter(&settings.log_level)
        .init();

    info!(
        download_dir = %settings.download_dir.display(),
        "Starting VSIX Fetch"
    );

    iced::application(
        move || app::DownloadApp::new(settings.clone()),
        app::update,
        app::view,
    )
    .title("VSIX Fetch")
    .subscription(app::subscription)
    .window(window::Settings {
        size: iced::Size::new(720.0, 860.0),
        ..Default::default()
    })
    .run()
}
