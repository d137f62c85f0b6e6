//! The mounted terminal session view.
//!
//! Owns the (listener, widget) pair for one session, reflects the
//! connection state machine driven by inbound channel events, and handles
//! the retry/close/trust/resize lifecycle. The host side is reached only
//! through the injected [`Invoker`] and [`EventBus`] seams.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bridge::wire::{ChannelEvent, Status};
use crate::bridge::{EventBus, Invoker, ListenerHandle};
use crate::events::AppEvent;
use crate::term::TerminalScreen;

use super::{Host, Session};

/// Collapse a drag-resize burst into one host notification.
pub const RESIZE_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
pub struct ViewOptions {
    pub scrollback_lines: usize,
    /// Cap on the replayable output log, bytes.
    pub history_cap: usize,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            scrollback_lines: 10_000,
            history_cap: 1 << 20,
        }
    }
}

/// Listener and widget are acquired and torn down as a pair. The listener
/// is released strictly before the widget so no delivery can land in a
/// disposed grid; field order keeps the same guarantee on a plain drop.
struct SessionResources {
    listener: ListenerHandle,
    cancel: CancellationToken,
    _forwarder: JoinHandle<()>,
    screen: TerminalScreen,
}

impl SessionResources {
    fn teardown(self) {
        self.listener.unlisten();
        self.cancel.cancel();
        drop(self.screen);
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingResize {
    cols: u16,
    rows: u16,
    deadline: Instant,
}

pub struct SessionView {
    session_id: String,
    host: Host,
    invoker: Arc<dyn Invoker>,
    bus: Arc<dyn EventBus>,
    tx: mpsc::Sender<AppEvent>,
    options: ViewOptions,
    resources: Option<SessionResources>,
    /// Bumped on every listener bind; deliveries tagged with an older
    /// epoch belong to a superseded binding and are dropped.
    epoch: u64,
    pending_resize: Option<PendingResize>,
    start_task: Option<JoinHandle<()>>,
    focused: bool,
}

impl SessionView {
    pub fn new(
        session_id: String,
        host: Host,
        invoker: Arc<dyn Invoker>,
        bus: Arc<dyn EventBus>,
        tx: mpsc::Sender<AppEvent>,
        options: ViewOptions,
    ) -> Self {
        Self {
            session_id,
            host,
            invoker,
            bus,
            tx,
            options,
            resources: None,
            epoch: 0,
            pending_resize: None,
            start_task: None,
            focused: false,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn focused(&self) -> bool {
        self.focused
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn screen(&self) -> Option<&TerminalScreen> {
        self.resources.as_ref().map(|r| &r.screen)
    }

    pub fn screen_mut(&mut self) -> Option<&mut TerminalScreen> {
        self.resources.as_mut().map(|r| &mut r.screen)
    }

    /// Bind the channel listener, create the widget (replaying any
    /// recorded output), and issue exactly one start request for this
    /// mount. The listener is bound before anything can be emitted, and a
    /// start rejection comes back as a `ConnectionFailed` status.
    pub fn mount(&mut self, session: &Session, rows: u16, cols: u16) {
        self.epoch += 1;
        let epoch = self.epoch;

        let (listener, mut events) = self.bus.listen(&self.session_id);
        let cancel = CancellationToken::new();
        let cancel_for_task = cancel.clone();
        let forward_tx = self.tx.clone();
        let forward_id = self.session_id.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_for_task.cancelled() => break,
                    maybe_event = events.recv() => {
                        let Some(event) = maybe_event else { break };
                        let delivery = AppEvent::Channel {
                            session: forward_id.clone(),
                            epoch,
                            event,
                        };
                        if forward_tx.send(delivery).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let mut screen = TerminalScreen::new(rows, cols, self.options.scrollback_lines);
        if !session.history.is_empty() {
            screen.process_bytes(&session.history);
        }
        self.resources = Some(SessionResources {
            listener,
            cancel,
            _forwarder: forwarder,
            screen,
        });
        self.focused = session.status.is_streaming();

        let invoker = Arc::clone(&self.invoker);
        let start_tx = self.tx.clone();
        let session_id = self.session_id.clone();
        let host_id = self.host.id.clone();
        self.start_task = Some(tokio::spawn(async move {
            if let Err(err) = invoker.start_terminal_stream(&host_id, &session_id).await {
                tracing::warn!(%err, session = %session_id, "session start rejected");
                let failure = AppEvent::Channel {
                    session: session_id.clone(),
                    epoch,
                    event: ChannelEvent::Status(Status::ConnectionFailed),
                };
                let _ = start_tx.send(failure).await;
            }
        }));
    }

    /// Release the (listener, widget) pair. The session itself stays in
    /// the registry; a later mount replays its history.
    pub fn unmount(&mut self) {
        if let Some(resources) = self.resources.take() {
            resources.teardown();
        }
        if let Some(task) = self.start_task.take() {
            task.abort();
        }
        self.pending_resize = None;
        self.focused = false;
    }

    /// Apply one inbound channel event. Returns whether a redraw is due.
    pub async fn handle_event(
        &mut self,
        session: &mut Session,
        epoch: u64,
        event: ChannelEvent,
    ) -> bool {
        if epoch != self.epoch {
            tracing::debug!(session = %self.session_id, "dropping delivery from a superseded binding");
            return false;
        }
        match event {
            ChannelEvent::Output(bytes) => {
                session.push_history(&bytes, self.options.history_cap);
                if let Some(resources) = self.resources.as_mut() {
                    resources.screen.process_bytes(&bytes);
                }
                true
            }
            ChannelEvent::Status(status) => {
                self.apply_status(session, status).await;
                true
            }
            // Client-to-host shapes; a well-behaved host never sends these.
            ChannelEvent::Input(_) | ChannelEvent::WindowChange(..) | ChannelEvent::TrustDecision(_) => {
                tracing::debug!(session = %self.session_id, "ignoring client-bound event from host");
                false
            }
        }
    }

    async fn apply_status(&mut self, session: &mut Session, status: Status) {
        tracing::debug!(session = %self.session_id, status = status.label(), "status transition");
        if let Status::NewPublicKeyFound(fingerprint) = &status {
            session.fingerprint = Some(fingerprint.clone());
        }
        session.status = status;

        if session.status.is_streaming() {
            // The host only learns the real geometry once streaming begins.
            if let Some(resources) = self.resources.as_ref() {
                let (rows, cols) = resources.screen.size();
                self.emit(ChannelEvent::WindowChange(cols, rows)).await;
            }
            self.focused = true;
        } else if session.status.is_error() {
            if let Err(err) = self.invoker.stop_future(&self.session_id).await {
                tracing::warn!(%err, session = %self.session_id, "stop_future failed");
            }
        }
    }

    /// Forward keystroke/paste data. Wired unconditionally; before
    /// streaming the host discards it.
    pub async fn send_input(&self, data: String) {
        self.emit(ChannelEvent::Input(data)).await;
    }

    /// Record a geometry change; applied and emitted once the burst has
    /// settled for [`RESIZE_DEBOUNCE`].
    pub fn note_resize(&mut self, cols: u16, rows: u16, now: Instant) {
        self.pending_resize = Some(PendingResize {
            cols,
            rows,
            deadline: now + RESIZE_DEBOUNCE,
        });
    }

    /// Flush a settled resize. Returns whether the widget changed.
    pub async fn flush_resize(&mut self, now: Instant) -> bool {
        let Some(pending) = self.pending_resize else {
            return false;
        };
        if now < pending.deadline {
            return false;
        }
        self.pending_resize = None;
        let Some(resources) = self.resources.as_mut() else {
            return false;
        };
        resources.screen.resize(pending.rows, pending.cols);
        self.emit(ChannelEvent::WindowChange(pending.cols, pending.rows))
            .await;
        true
    }

    /// The user accepted an unrecognized host key: answer the prompt and
    /// persist the fingerprint through the host record.
    pub async fn accept_host_key(&mut self, session: &mut Session) {
        let Some(fingerprint) = session.fingerprint.clone() else {
            return;
        };
        self.emit(ChannelEvent::TrustDecision(true)).await;
        if let Err(err) = self
            .invoker
            .update_host_fingerprint(&self.host.id, &fingerprint)
            .await
        {
            tracing::warn!(%err, host = %self.host.id, "failed to persist fingerprint");
        }
    }

    /// The user declined the host key: stopping the host-side future is
    /// the decline signal; the caller removes the session afterwards.
    pub async fn decline_host_key(&mut self) {
        if let Err(err) = self.invoker.stop_future(&self.session_id).await {
            tracing::warn!(%err, session = %self.session_id, "stop_future failed");
        }
    }

    /// Manual reconnect, enabled only from an error state. Tears the old
    /// (listener, widget) pair down, resets to `Pending` and runs the
    /// full start sequence again rather than repairing in place.
    pub fn retry(&mut self, session: &mut Session, rows: u16, cols: u16) {
        if !session.status.is_error() {
            return;
        }
        if let Some(resources) = self.resources.take() {
            resources.teardown();
        }
        if let Some(task) = self.start_task.take() {
            task.abort();
        }
        session.status = Status::Pending;
        session.fingerprint = None;
        session.history.clear();
        self.mount(session, rows, cols);
    }

    async fn emit(&self, event: ChannelEvent) {
        if let Err(err) = self.bus.emit(&self.session_id, event).await {
            tracing::warn!(%err, session = %self.session_id, "channel emit failed");
        }
    }

    #[cfg(test)]
    pub(crate) async fn wait_for_start(&mut self) {
        if let Some(task) = self.start_task.take() {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use bytes::Bytes;
    use tokio::time::timeout;

    use super::*;
    use crate::bridge::test_support::FakeBridge;

    struct Harness {
        bridge: FakeBridge,
        rx: mpsc::Receiver<AppEvent>,
        session: Session,
        view: SessionView,
    }

    fn test_host() -> Host {
        Host {
            id: "h1".into(),
            label: Some("box".into()),
            address: "10.0.0.1".into(),
            port: 22,
            fingerprint: None,
        }
    }

    fn harness() -> Harness {
        let bridge = FakeBridge::default();
        let (tx, rx) = mpsc::channel(64);
        let host = test_host();
        let session = Session::new("sess-1".into(), host.clone());
        let invoker: Arc<dyn Invoker> = Arc::new(bridge.clone());
        let bus: Arc<dyn EventBus> = Arc::new(bridge.clone());
        let view = SessionView::new(
            "sess-1".into(),
            host,
            invoker,
            bus,
            tx,
            ViewOptions::default(),
        );
        Harness {
            bridge,
            rx,
            session,
            view,
        }
    }

    async fn mounted() -> Harness {
        let mut h = harness();
        h.view.mount(&h.session, 24, 80);
        h.view.wait_for_start().await;
        h
    }

    async fn deliver(h: &mut Harness, event: ChannelEvent) {
        let epoch = h.view.epoch();
        h.view.handle_event(&mut h.session, epoch, event).await;
    }

    #[tokio::test]
    async fn output_renders_in_delivery_order_per_session() {
        let mut a = mounted().await;
        let b = mounted().await;

        deliver(&mut a, ChannelEvent::Output(Bytes::from_static(b"hello "))).await;
        deliver(&mut a, ChannelEvent::Output(Bytes::from_static(b"world"))).await;

        assert!(a.view.screen().unwrap().contents().starts_with("hello world"));
        assert!(b.view.screen().unwrap().contents().trim().is_empty());
    }

    #[tokio::test]
    async fn input_is_emitted_but_meaningless_before_streaming() {
        let mut h = mounted().await;

        h.view.send_input("ls\n".into()).await;

        assert!(
            h.bridge
                .emitted()
                .contains(&("sess-1".into(), ChannelEvent::Input("ls\n".into())))
        );
        assert_eq!(h.session.status, Status::Pending);
        assert!(h.view.screen().unwrap().contents().trim().is_empty());
    }

    #[tokio::test]
    async fn bound_listener_forwards_events_with_the_current_epoch() {
        let mut h = mounted().await;

        h.bridge
            .push("sess-1", ChannelEvent::Output(Bytes::from_static(b"hi")))
            .await
            .unwrap();

        let delivery = timeout(Duration::from_secs(1), h.rx.recv())
            .await
            .expect("forwarder delivered nothing")
            .expect("app channel closed");
        match delivery {
            AppEvent::Channel {
                session,
                epoch,
                event,
            } => {
                assert_eq!(session, "sess-1");
                assert_eq!(epoch, h.view.epoch());
                assert_eq!(event, ChannelEvent::Output(Bytes::from_static(b"hi")));
            }
            other => panic!("unexpected app event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unmount_unbinds_the_listener_before_the_widget_goes_away() {
        let mut h = mounted().await;
        assert!(h.bridge.has_listener("sess-1"));

        h.view.unmount();

        assert!(!h.bridge.has_listener("sess-1"));
        assert!(h.view.screen().is_none());
        assert!(
            h.bridge
                .push("sess-1", ChannelEvent::Output(Bytes::from_static(b"late")))
                .await
                .is_err(),
            "delivery after unmount must have nowhere to go"
        );
    }

    #[tokio::test]
    async fn stale_epoch_deliveries_are_dropped() {
        let mut h = mounted().await;
        let stale = h.view.epoch();

        deliver(&mut h, ChannelEvent::Status(Status::ConnectionFailed)).await;
        h.view.retry(&mut h.session, 24, 80);
        h.view.wait_for_start().await;

        let applied = h
            .view
            .handle_event(
                &mut h.session,
                stale,
                ChannelEvent::Output(Bytes::from_static(b"ghost")),
            )
            .await;
        assert!(!applied);
        assert!(h.view.screen().unwrap().contents().trim().is_empty());
    }

    #[tokio::test]
    async fn retry_runs_exactly_one_new_start_and_binding() {
        let mut h = mounted().await;
        assert_eq!(h.bridge.starts(), 1);
        assert_eq!(h.bridge.binds(), 1);

        deliver(&mut h, ChannelEvent::Status(Status::ConnectionFailed)).await;
        h.view.retry(&mut h.session, 24, 80);
        h.view.wait_for_start().await;

        assert_eq!(h.bridge.starts(), 2);
        assert_eq!(h.bridge.binds(), 2);
        assert!(h.bridge.has_listener("sess-1"));
        assert_eq!(h.session.status, Status::Pending);

        // Retry outside an error state is inert.
        h.view.retry(&mut h.session, 24, 80);
        assert_eq!(h.bridge.starts(), 2);
        assert_eq!(h.bridge.binds(), 2);
    }

    #[tokio::test]
    async fn accepting_a_new_host_key_confirms_and_persists() {
        let mut h = mounted().await;

        deliver(
            &mut h,
            ChannelEvent::Status(Status::NewPublicKeyFound("AA:BB:CC".into())),
        )
        .await;
        assert_eq!(h.session.fingerprint.as_deref(), Some("AA:BB:CC"));
        assert!(h.session.overlay_open());

        h.view.accept_host_key(&mut h.session).await;

        assert!(
            h.bridge
                .emitted()
                .contains(&("sess-1".into(), ChannelEvent::TrustDecision(true)))
        );
        assert_eq!(
            h.bridge.fingerprints(),
            vec![("h1".to_string(), "AA:BB:CC".to_string())]
        );
    }

    #[tokio::test]
    async fn declining_stops_the_session_without_persisting() {
        let mut h = mounted().await;

        deliver(
            &mut h,
            ChannelEvent::Status(Status::NewPublicKeyFound("AA:BB:CC".into())),
        )
        .await;
        h.view.decline_host_key().await;

        assert_eq!(h.bridge.stops(), vec!["sess-1".to_string()]);
        assert!(h.bridge.fingerprints().is_empty());
    }

    #[tokio::test]
    async fn streaming_reports_geometry_and_dismisses_the_overlay() {
        let mut h = mounted().await;

        deliver(&mut h, ChannelEvent::Status(Status::StartStreaming)).await;

        assert_eq!(
            h.bridge.emitted().last(),
            Some(&("sess-1".into(), ChannelEvent::WindowChange(80, 24)))
        );
        assert!(!h.session.overlay_open());
        assert!(h.view.focused());
    }

    #[tokio::test]
    async fn resize_bursts_collapse_to_one_emission() {
        let mut h = mounted().await;
        deliver(&mut h, ChannelEvent::Status(Status::StartStreaming)).await;
        h.bridge.inner.emitted.lock().unwrap().clear();

        let t0 = Instant::now();
        h.view.note_resize(100, 30, t0);
        h.view.note_resize(120, 40, t0 + Duration::from_millis(30));

        assert!(!h.view.flush_resize(t0 + Duration::from_millis(90)).await);
        assert!(h.bridge.emitted().is_empty());

        assert!(h.view.flush_resize(t0 + Duration::from_millis(140)).await);
        assert_eq!(
            h.bridge.emitted(),
            vec![("sess-1".into(), ChannelEvent::WindowChange(120, 40))]
        );
        assert_eq!(h.view.screen().unwrap().size(), (40, 120));

        assert!(!h.view.flush_resize(t0 + Duration::from_millis(300)).await);
        assert_eq!(h.bridge.emitted().len(), 1);
    }

    #[tokio::test]
    async fn every_error_status_stops_the_future_and_opens_the_overlay() {
        for status in [
            Status::AuthFailed,
            Status::ConnectionTimeout,
            Status::ConnectionFailed,
        ] {
            let mut h = mounted().await;
            deliver(&mut h, ChannelEvent::Status(status.clone())).await;

            assert!(h.session.status.is_error(), "{status:?}");
            assert!(h.session.overlay_open(), "{status:?}");
            assert_eq!(h.bridge.stops(), vec!["sess-1".to_string()], "{status:?}");
        }
    }

    #[tokio::test]
    async fn rejected_start_surfaces_as_connection_failure() {
        let mut h = harness();
        h.bridge.inner.fail_start.store(true, Ordering::Relaxed);

        h.view.mount(&h.session, 24, 80);
        h.view.wait_for_start().await;

        let delivery = timeout(Duration::from_secs(1), h.rx.recv())
            .await
            .expect("no failure surfaced")
            .expect("app channel closed");
        match delivery {
            AppEvent::Channel { epoch, event, .. } => {
                assert_eq!(epoch, h.view.epoch());
                assert_eq!(event, ChannelEvent::Status(Status::ConnectionFailed));
            }
            other => panic!("unexpected app event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn remount_replays_recorded_history() {
        let mut h = mounted().await;
        deliver(&mut h, ChannelEvent::Output(Bytes::from_static(b"transcript"))).await;
        assert_eq!(h.session.history, b"transcript");

        h.view.unmount();
        h.view.mount(&h.session, 24, 80);
        h.view.wait_for_start().await;

        assert!(h.view.screen().unwrap().contents().starts_with("transcript"));
        assert_eq!(h.bridge.starts(), 2, "one start per mount");
    }
}
