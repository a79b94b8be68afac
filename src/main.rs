use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod handler;
mod ollama;
mod segment;
mod tui;
mod ui;

use app::App;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let mut events = tui::EventHandler::new();
    let mut app = App::new(events.sender());

    // Initial availability probe; the tick handler re-probes every 5s while
    // the server is unhealthy.
    app.spawn_probe();

    let result = run(&mut terminal, &mut app, &mut events).await;

    tui::restore()?;
    result
}

async fn run(terminal: &mut tui::Tui, app: &mut App, events: &mut tui::EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event),
            None => break,
        }
    }
    Ok(())
}

/// Log to a file under the config directory; stderr belongs to the terminal UI.
fn init_tracing() -> Result<()> {
    let log_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join("ollama-chat");
    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::File::create(log_dir.join("ollama-chat.log"))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();

    Ok(())
}
