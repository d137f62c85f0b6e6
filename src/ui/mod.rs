mod hosts;
mod overlay;
mod terminal;

pub use hosts::{HostListPane, draw_host_list};
pub use overlay::{draw_error_popup, draw_session_overlay};
pub use terminal::draw_terminal;
