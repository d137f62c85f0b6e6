use std::io::stdout;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossterm::event::{EnableBracketedPaste, EventStream};
use crossterm::execute;
use crossterm::terminal::{EnterAlternateScreen, enable_raw_mode};
use futures::StreamExt;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tokio::sync::mpsc;
use tokio::time;

use termlink::{
    App, AppEvent, EventBus, HostProcess, Invoker, Settings, init_tracing, install_panic_hook,
    restore_terminal,
};

#[derive(Parser, Debug)]
#[command(
    name = "termlink",
    version,
    about = "Terminal-session client for a host-managed SSH backend"
)]
struct Cli {
    /// Path to the settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host bridge executable (overrides the settings file)
    #[arg(long)]
    host_command: Option<String>,

    /// Log level (trace, debug, info, warn, error); defaults to the
    /// settings file value
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> termlink::Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => Settings::default_path()?,
    };
    let mut settings = Settings::load_or_create(&config_path)?;
    if let Some(host_command) = cli.host_command {
        settings.host_command = host_command;
    }

    let log_level = cli.log_level.unwrap_or_else(|| settings.log_level.clone());
    let _log_guard = init_tracing(&log_level)?;
    install_panic_hook();

    let bridge = Arc::new(HostProcess::spawn(
        &settings.host_command,
        &settings.host_args,
    )?);
    let invoker: Arc<dyn Invoker> = bridge.clone();
    let bus: Arc<dyn EventBus> = bridge;

    // The read-only host directory comes from the host process.
    let hosts = invoker.list_hosts().await?;
    tracing::info!(count = hosts.len(), "host directory loaded");

    enable_raw_mode()?;
    execute!(stdout(), EnterAlternateScreen, EnableBracketedPaste)?;
    let terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let (tx, mut rx) = mpsc::channel::<AppEvent>(256);

    // Keyboard/resize events and the render tick share one queue.
    let pump_tx = tx.clone();
    let tick_interval = Duration::from_millis(settings.tick_interval_ms.max(10));
    tokio::spawn(async move {
        let mut ticker = time::interval(tick_interval);
        let mut event_stream = EventStream::new();
        loop {
            tokio::select! {
                event_result = event_stream.next() => {
                    let event = match event_result {
                        None => break,
                        Some(Err(_)) => break, // IO error on stdin
                        Some(Ok(event)) => event,
                    };
                    if pump_tx.send(AppEvent::Input(event)).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if pump_tx.send(AppEvent::Tick).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut app = App::new(terminal, settings, invoker, bus, hosts, tx);
    let result = app.run(&mut rx).await;

    restore_terminal()?;
    result
}
