//! Process-level plumbing: tracing setup and terminal restoration.

use crossterm::cursor::Show;
use crossterm::event::DisableBracketedPaste;
use crossterm::execute;
use crossterm::terminal::{LeaveAlternateScreen, disable_raw_mode};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{AppError, Result};

/// Put the terminal back into its shell state. Safe to call twice; the
/// panic hook and the normal exit path both end up here.
pub fn restore_terminal() -> std::io::Result<()> {
    disable_raw_mode()?;
    execute!(std::io::stdout(), LeaveAlternateScreen, DisableBracketedPaste, Show)
}

/// Restore the terminal before the default panic output runs, so the
/// message is not swallowed by the alternate screen.
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = restore_terminal();
        default_hook(info);
    }));
}

/// File-backed tracing: `termlink.log` in the working directory through a
/// non-blocking writer, with `RUST_LOG` overriding the configured level.
/// The returned guard flushes the writer on drop and must outlive the
/// app.
pub fn init_tracing(level: &str) -> Result<WorkerGuard> {
    let appender = tracing_appender::rolling::never(".", "termlink.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_line_number(true)
                .with_ansi(false),
        )
        .try_init()
        .map_err(|e| AppError::ConfigError(format!("tracing init failed: {e}")))?;
    Ok(guard)
}
