//! Application modes and the main event loop.
//!
//! The loop owns all state and reacts to one mpsc queue of interleaved
//! input, tick, and channel events. At most one session view is mounted
//! at a time (the active session); detached sessions stay in the registry
//! and replay their recorded output on re-attach.

use std::sync::Arc;
use std::time::Instant;

use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::Terminal;
use ratatui::backend::Backend;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::bridge::wire::ChannelEvent;
use crate::bridge::{EventBus, Invoker};
use crate::config::Settings;
use crate::error::{AppError, Result};
use crate::events::AppEvent;
use crate::input::encode_key_event_to_string;
use crate::session::{Host, SessionRegistry, SessionView};
use crate::ui::{self, HostListPane};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    HostList {
        pane: HostListPane,
        host_selected: usize,
        session_selected: usize,
    },
    Terminal,
}

impl AppMode {
    fn host_list() -> Self {
        AppMode::HostList {
            pane: HostListPane::Hosts,
            host_selected: 0,
            session_selected: 0,
        }
    }
}

/// What a key press in terminal mode asks for, decided while the view and
/// session are borrowed and acted on afterwards.
enum TerminalAction {
    Forward(String),
    Scroll(i32),
    ScrollToBottom,
    Retry,
    CloseSession(String),
    AcceptKey,
    DeclineKey(String),
}

/// App is the main application
pub struct App<B: Backend> {
    pub mode: AppMode,
    pub registry: SessionRegistry,
    pub error: Option<AppError>,
    hosts: Vec<Host>,
    view: Option<SessionView>,
    invoker: Arc<dyn Invoker>,
    bus: Arc<dyn EventBus>,
    tx: mpsc::Sender<AppEvent>,
    settings: Settings,
    terminal: Terminal<B>,
    needs_redraw: bool,
    should_quit: bool,
}

impl<B: Backend> App<B> {
    pub fn new(
        terminal: Terminal<B>,
        settings: Settings,
        invoker: Arc<dyn Invoker>,
        bus: Arc<dyn EventBus>,
        hosts: Vec<Host>,
        tx: mpsc::Sender<AppEvent>,
    ) -> Self {
        Self {
            mode: AppMode::host_list(),
            registry: SessionRegistry::new(),
            error: None,
            hosts,
            view: None,
            invoker,
            bus,
            tx,
            settings,
            terminal,
            needs_redraw: true,
            should_quit: false,
        }
    }

    pub async fn run(&mut self, rx: &mut mpsc::Receiver<AppEvent>) -> Result<()> {
        loop {
            // A streaming session keeps redrawing while output arrives.
            let mut screen_active = false;
            if let Some(view) = self.view.as_ref()
                && let Some(screen) = view.screen()
                && screen.last_change.elapsed().as_millis() < 100
            {
                screen_active = true;
            }
            if self.should_redraw() || screen_active {
                self.draw()?;
            }

            let Some(event) = rx.recv().await else {
                tracing::warn!("App event channel closed");
                break;
            };

            match event {
                AppEvent::Tick => self.on_tick().await,
                AppEvent::Input(input) => self.on_input(input).await,
                AppEvent::Channel {
                    session,
                    epoch,
                    event,
                } => self.on_channel(session, epoch, event).await,
            }

            if self.should_quit {
                break;
            }
        }
        Ok(())
    }

    pub fn mark_redraw(&mut self) {
        self.needs_redraw = true;
    }

    fn should_redraw(&mut self) -> bool {
        let redraw = self.needs_redraw;
        self.needs_redraw = false;
        redraw
    }

    fn draw(&mut self) -> Result<()> {
        let Self {
            mode,
            registry,
            error,
            hosts,
            view,
            terminal,
            ..
        } = self;
        terminal.draw(|frame| {
            let area = frame.area();
            match mode {
                AppMode::HostList {
                    pane,
                    host_selected,
                    session_selected,
                } => {
                    ui::draw_host_list(
                        area,
                        hosts,
                        registry,
                        *pane,
                        *host_selected,
                        *session_selected,
                        frame,
                    );
                }
                AppMode::Terminal => {
                    if let Some(view) = view.as_mut()
                        && let Some(session) = registry.get(view.session_id())
                    {
                        let title = format!(
                            " {} - {} ",
                            session.host.display_name(),
                            session.status.label()
                        );
                        let show_cursor = view.focused() && !session.overlay_open();
                        if let Some(screen) = view.screen_mut() {
                            ui::draw_terminal(area, screen, &title, frame, show_cursor);
                        }
                        if session.overlay_open() {
                            ui::draw_session_overlay(area, session, frame);
                        }
                    }
                }
            }
            if let Some(err) = error {
                ui::draw_error_popup(area, &err.to_string(), frame);
            }
        })?;
        Ok(())
    }

    /// Grid geometry of the terminal widget: full width, height minus the
    /// title border row. (rows, cols)
    fn grid_size(&self) -> (u16, u16) {
        match self.terminal.size() {
            Ok(size) => (size.height.saturating_sub(1).max(1), size.width.max(1)),
            Err(_) => (23, 80),
        }
    }

    async fn on_tick(&mut self) {
        let mut redraw = false;
        if let Some(view) = self.view.as_mut() {
            redraw = view.flush_resize(Instant::now()).await;
        }
        if redraw {
            self.mark_redraw();
        }
    }

    async fn on_input(&mut self, input: Event) {
        match input {
            Event::Key(key) if key.kind == KeyEventKind::Press => self.on_key(key).await,
            Event::Paste(data) => {
                if let Some(view) = self.view.as_ref() {
                    view.send_input(data).await;
                }
            }
            Event::Resize(cols, rows) => {
                if let Some(view) = self.view.as_mut() {
                    view.note_resize(cols.max(1), rows.saturating_sub(1).max(1), Instant::now());
                }
                self.mark_redraw();
            }
            _ => {}
        }
    }

    async fn on_channel(&mut self, session_id: String, epoch: u64, event: ChannelEvent) {
        let Self {
            view,
            registry,
            needs_redraw,
            ..
        } = self;
        let Some(view) = view.as_mut() else {
            tracing::debug!(session = %session_id, "channel event without a mounted view");
            return;
        };
        if view.session_id() != session_id {
            tracing::debug!(session = %session_id, "channel event for a detached session");
            return;
        }
        let Some(session) = registry.get_mut(&session_id) else {
            return;
        };
        if view.handle_event(session, epoch, event).await {
            *needs_redraw = true;
        }
    }

    async fn on_key(&mut self, key: KeyEvent) {
        if self.error.is_some() {
            if matches!(key.code, KeyCode::Enter | KeyCode::Esc) {
                self.error = None;
                self.mark_redraw();
            }
            return;
        }
        match self.mode {
            AppMode::HostList { .. } => self.on_host_list_key(key).await,
            AppMode::Terminal => self.on_terminal_key(key).await,
        }
    }

    async fn on_host_list_key(&mut self, key: KeyEvent) {
        let AppMode::HostList {
            pane,
            host_selected,
            session_selected,
        } = self.mode
        else {
            return;
        };

        match key.code {
            KeyCode::Char('q') | KeyCode::Char('Q') => self.should_quit = true,
            KeyCode::Tab => {
                let next = match pane {
                    HostListPane::Hosts => HostListPane::Sessions,
                    HostListPane::Sessions => HostListPane::Hosts,
                };
                self.mode = AppMode::HostList {
                    pane: next,
                    host_selected,
                    session_selected,
                };
                self.mark_redraw();
            }
            KeyCode::Up | KeyCode::Char('k') | KeyCode::Down | KeyCode::Char('j') => {
                let up = matches!(key.code, KeyCode::Up | KeyCode::Char('k'));
                let moved = match pane {
                    HostListPane::Hosts => step_selection(host_selected, self.hosts.len(), up),
                    HostListPane::Sessions => {
                        step_selection(session_selected, self.registry.len(), up)
                    }
                };
                self.mode = match pane {
                    HostListPane::Hosts => AppMode::HostList {
                        pane,
                        host_selected: moved,
                        session_selected,
                    },
                    HostListPane::Sessions => AppMode::HostList {
                        pane,
                        host_selected,
                        session_selected: moved,
                    },
                };
                self.mark_redraw();
            }
            KeyCode::Enter => match pane {
                HostListPane::Hosts => {
                    if let Some(host) = self.hosts.get(host_selected).cloned() {
                        self.open_session(host);
                    }
                }
                HostListPane::Sessions => {
                    let id = self
                        .registry
                        .sessions()
                        .get(session_selected)
                        .map(|s| s.id.clone());
                    if let Some(id) = id {
                        self.attach_session(id);
                    }
                }
            },
            KeyCode::Char('x') | KeyCode::Char('X') => {
                if pane == HostListPane::Sessions {
                    let target = self
                        .registry
                        .sessions()
                        .get(session_selected)
                        .map(|s| (s.id.clone(), s.status.is_error()));
                    if let Some((id, errored)) = target {
                        self.close_session(id, !errored).await;
                    }
                }
            }
            _ => {}
        }
    }

    async fn on_terminal_key(&mut self, key: KeyEvent) {
        // Detach works in every phase, including while the overlay blocks.
        if key.code == KeyCode::Char('q') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.detach_session();
            return;
        }

        let action = {
            let Self { view, registry, .. } = self;
            let Some(view) = view.as_mut() else {
                return;
            };
            let Some(session) = registry.get(view.session_id()) else {
                return;
            };

            if session.overlay_open() {
                let prompt_open = session.fingerprint.is_some() && !session.status.is_error();
                match key.code {
                    KeyCode::Char('y') | KeyCode::Char('Y') if prompt_open => {
                        Some(TerminalAction::AcceptKey)
                    }
                    KeyCode::Char('n') | KeyCode::Char('N') if prompt_open => {
                        Some(TerminalAction::DeclineKey(session.id.clone()))
                    }
                    KeyCode::Char('r') | KeyCode::Char('R') if session.status.is_error() => {
                        Some(TerminalAction::Retry)
                    }
                    KeyCode::Esc if session.status.is_error() => {
                        Some(TerminalAction::CloseSession(session.id.clone()))
                    }
                    _ => None,
                }
            } else {
                let Some(screen) = view.screen_mut() else {
                    return;
                };
                let interactive = screen.alternate_screen() || screen.application_cursor();
                let app_cursor = screen.application_cursor();
                if !interactive {
                    match key.code {
                        KeyCode::PageUp => {
                            let page = (screen.size().0.saturating_sub(1)) as i32;
                            Some(TerminalAction::Scroll(page))
                        }
                        KeyCode::PageDown => {
                            let page = (screen.size().0.saturating_sub(1)) as i32;
                            Some(TerminalAction::Scroll(-page))
                        }
                        KeyCode::End => Some(TerminalAction::ScrollToBottom),
                        _ => encode_key_event_to_string(app_cursor, &key)
                            .map(TerminalAction::Forward),
                    }
                } else {
                    encode_key_event_to_string(app_cursor, &key).map(TerminalAction::Forward)
                }
            }
        };

        let Some(action) = action else {
            return;
        };
        match action {
            TerminalAction::Forward(data) => {
                if let Some(view) = self.view.as_mut() {
                    if let Some(screen) = view.screen_mut()
                        && screen.scrolled_back()
                    {
                        screen.scroll_to_bottom();
                    }
                    view.send_input(data).await;
                }
            }
            TerminalAction::Scroll(delta) => {
                if let Some(screen) = self.view.as_mut().and_then(|v| v.screen_mut()) {
                    screen.scroll_by(delta);
                }
                self.mark_redraw();
            }
            TerminalAction::ScrollToBottom => {
                if let Some(screen) = self.view.as_mut().and_then(|v| v.screen_mut()) {
                    screen.scroll_to_bottom();
                }
                self.mark_redraw();
            }
            TerminalAction::Retry => {
                let (rows, cols) = self.grid_size();
                let Self { view, registry, .. } = self;
                if let Some(view) = view.as_mut()
                    && let Some(session) = registry.get_mut(view.session_id())
                {
                    view.retry(session, rows, cols);
                }
                self.mark_redraw();
            }
            TerminalAction::CloseSession(id) => {
                // The error path already stopped the host-side future.
                self.close_session(id, false).await;
            }
            TerminalAction::AcceptKey => {
                let Self { view, registry, .. } = self;
                if let Some(view) = view.as_mut()
                    && let Some(session) = registry.get_mut(view.session_id())
                {
                    view.accept_host_key(session).await;
                }
                self.mark_redraw();
            }
            TerminalAction::DeclineKey(id) => {
                if let Some(view) = self.view.as_mut() {
                    view.decline_host_key().await;
                }
                // Stopping the future was the decline; just drop the session.
                self.close_session(id, false).await;
            }
        }
    }

    /// Mint a session for `host` and mount it.
    pub fn open_session(&mut self, host: Host) {
        let id = Uuid::new_v4().to_string();
        self.registry.add(id.clone(), host);
        self.attach_session(id);
    }

    /// Mount `id` as the active session, detaching any current view.
    pub fn attach_session(&mut self, id: String) {
        if let Some(mut view) = self.view.take() {
            view.unmount();
        }
        let Some(host) = self.registry.host_for(&id).cloned() else {
            tracing::warn!(session = %id, "attach for an unknown session");
            return;
        };
        self.registry.set_active(Some(id.clone()));
        let (rows, cols) = self.grid_size();
        let mut view = SessionView::new(
            id.clone(),
            host,
            Arc::clone(&self.invoker),
            Arc::clone(&self.bus),
            self.tx.clone(),
            self.settings.view_options(),
        );
        if let Some(session) = self.registry.get(&id) {
            view.mount(session, rows, cols);
        }
        self.view = Some(view);
        self.mode = AppMode::Terminal;
        self.mark_redraw();
    }

    /// Leave the session running host-side and return to the launcher.
    pub fn detach_session(&mut self) {
        if let Some(mut view) = self.view.take() {
            view.unmount();
        }
        self.registry.set_active(None);
        self.mode = AppMode::host_list();
        self.mark_redraw();
    }

    /// Close a session for good. The stop RPC precedes registry removal
    /// so the host never keeps running unobserved; `issue_stop` is false
    /// on paths where the future was already stopped (error, decline).
    pub async fn close_session(&mut self, id: String, issue_stop: bool) {
        if issue_stop && let Err(err) = self.invoker.stop_future(&id).await {
            tracing::warn!(%err, session = %id, "stop_future failed");
            self.error = Some(err);
        }
        if self.view.as_ref().is_some_and(|v| v.session_id() == id) {
            if let Some(mut view) = self.view.take() {
                view.unmount();
            }
            self.mode = AppMode::host_list();
        }
        self.registry.remove(&id);
        self.mark_redraw();
    }

    #[cfg(test)]
    pub(crate) fn view_mut(&mut self) -> Option<&mut SessionView> {
        self.view.as_mut()
    }
}

fn step_selection(selected: usize, len: usize, up: bool) -> usize {
    if len == 0 {
        return 0;
    }
    if up {
        selected.saturating_sub(1)
    } else {
        (selected + 1).min(len - 1)
    }
}
