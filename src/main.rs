use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod gemini;
mod handler;
mod tui;
mod ui;

use app::App;
use config::Config;
use gemini::GeminiClient;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_logging()?;

    let config = Config::load().unwrap_or_else(|_| Config::new());
    let gemini = GeminiClient::new(&config);
    let mut app = App::new(gemini);

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();
    let tx = events.sender();

    while !app.should_quit {
        terminal.draw(|frame| ui::render(&mut app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(&mut app, event, &tx).await?,
            None => break,
        }
    }

    tui::restore()?;
    Ok(())
}

/// Logs go to a file under the config dir; the TUI owns the terminal.
fn init_logging() -> Result<WorkerGuard> {
    let log_dir = dirs::config_dir()
        .context("Could not determine config directory")?
        .join("ana");
    std::fs::create_dir_all(&log_dir)?;

    let appender = tracing_appender::rolling::never(&log_dir, "ana.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Ok(guard)
}
