mod app;
mod bridge;
mod config;
mod error;
mod events;
mod input;
mod session;
mod term;
mod ui;
mod utils;

// Re-export commonly used types
pub use app::{App, AppMode};
pub use bridge::wire::{AuthMethod, ChannelEvent, Envelope, Status};
pub use bridge::{EventBus, HostProcess, Invoker, ListenerHandle};
pub use config::Settings;
pub use error::{AppError, Result};
pub use events::AppEvent;
pub use session::{Host, Session, SessionRegistry, SessionView, ViewOptions};
pub use term::TerminalScreen;
pub use ui::HostListPane;
pub use utils::{init_tracing, install_panic_hook, restore_terminal};
