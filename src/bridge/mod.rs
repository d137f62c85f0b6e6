//! Boundary to the native host process.
//!
//! Everything the client knows about SSH arrives through two seams: a
//! request/response [`Invoker`] and a per-session pub/sub [`EventBus`].
//! The concrete [`HostProcess`] speaks both over the host's stdio; tests
//! substitute in-memory fakes.

mod process;
pub mod wire;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::session::Host;
use wire::ChannelEvent;

pub use process::HostProcess;

/// Named RPC operations implemented by the host process.
///
/// A rejection of `start_terminal_stream` is reported to the session as a
/// `ConnectionFailed` status; callers never retry automatically.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn list_hosts(&self) -> Result<Vec<Host>>;

    /// Ask the host to open an SSH session and stream it over the channel
    /// named by `terminal_id`. Idempotent host-side for an id that is
    /// already streaming.
    async fn start_terminal_stream(&self, host_id: &str, terminal_id: &str) -> Result<()>;

    /// Cancel the host-side future backing `id` (terminal or tunnel).
    async fn stop_future(&self, id: &str) -> Result<()>;

    /// Persist a fingerprint the user chose to trust.
    async fn update_host_fingerprint(&self, host_id: &str, fingerprint: &str) -> Result<()>;
}

/// Per-session named event channel.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn emit(&self, channel: &str, event: ChannelEvent) -> Result<()>;

    /// Register the single inbound listener for `channel`. Events are
    /// delivered in arrival order until the returned handle is dropped.
    fn listen(&self, channel: &str) -> (ListenerHandle, mpsc::Receiver<ChannelEvent>);
}

/// RAII unlisten guard. Dropping (or calling [`unlisten`]) removes the
/// subscription; no event is delivered to its receiver afterwards.
///
/// [`unlisten`]: ListenerHandle::unlisten
pub struct ListenerHandle {
    unlisten: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerHandle {
    pub fn new(unlisten: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unlisten: Some(Box::new(unlisten)),
        }
    }

    pub fn unlisten(mut self) {
        if let Some(f) = self.unlisten.take() {
            f();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unlisten.take() {
            f();
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("active", &self.unlisten.is_some())
            .finish()
    }
}

/// In-memory bridge double shared by the session-view and app tests.
#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::wire::ChannelEvent;
    use super::{EventBus, Invoker, ListenerHandle};
    use crate::error::{AppError, Result};
    use crate::session::Host;

    #[derive(Default)]
    pub(crate) struct FakeInner {
        pub(crate) emitted: Mutex<Vec<(String, ChannelEvent)>>,
        pub(crate) starts: Mutex<Vec<(String, String)>>,
        pub(crate) stops: Mutex<Vec<String>>,
        pub(crate) fingerprints: Mutex<Vec<(String, String)>>,
        pub(crate) listeners: Mutex<HashMap<String, (u64, mpsc::Sender<ChannelEvent>)>>,
        pub(crate) bind_count: AtomicUsize,
        pub(crate) next_listener: AtomicU64,
        pub(crate) fail_start: AtomicBool,
        pub(crate) hosts: Mutex<Vec<Host>>,
    }

    #[derive(Default, Clone)]
    pub(crate) struct FakeBridge {
        pub(crate) inner: Arc<FakeInner>,
    }

    impl FakeBridge {
        pub(crate) fn emitted(&self) -> Vec<(String, ChannelEvent)> {
            self.inner.emitted.lock().unwrap().clone()
        }

        pub(crate) fn starts(&self) -> usize {
            self.inner.starts.lock().unwrap().len()
        }

        pub(crate) fn stops(&self) -> Vec<String> {
            self.inner.stops.lock().unwrap().clone()
        }

        pub(crate) fn fingerprints(&self) -> Vec<(String, String)> {
            self.inner.fingerprints.lock().unwrap().clone()
        }

        pub(crate) fn binds(&self) -> usize {
            self.inner.bind_count.load(Ordering::Relaxed)
        }

        pub(crate) fn has_listener(&self, channel: &str) -> bool {
            self.inner.listeners.lock().unwrap().contains_key(channel)
        }

        /// Deliver an inbound event the way the host would.
        pub(crate) async fn push(&self, channel: &str, event: ChannelEvent) -> Result<()> {
            let sender = self
                .inner
                .listeners
                .lock()
                .unwrap()
                .get(channel)
                .map(|(_, tx)| tx.clone());
            match sender {
                Some(tx) => tx
                    .send(event)
                    .await
                    .map_err(|_| AppError::BridgeError("listener receiver gone".into())),
                None => Err(AppError::BridgeError("no listener bound".into())),
            }
        }
    }

    #[async_trait]
    impl Invoker for FakeBridge {
        async fn list_hosts(&self) -> Result<Vec<Host>> {
            Ok(self.inner.hosts.lock().unwrap().clone())
        }

        async fn start_terminal_stream(&self, host_id: &str, terminal_id: &str) -> Result<()> {
            self.inner
                .starts
                .lock()
                .unwrap()
                .push((host_id.into(), terminal_id.into()));
            if self.inner.fail_start.load(Ordering::Relaxed) {
                return Err(AppError::RpcError {
                    method: "start_terminal_stream".into(),
                    message: "boom".into(),
                });
            }
            Ok(())
        }

        async fn stop_future(&self, id: &str) -> Result<()> {
            self.inner.stops.lock().unwrap().push(id.into());
            Ok(())
        }

        async fn update_host_fingerprint(&self, host_id: &str, fingerprint: &str) -> Result<()> {
            self.inner
                .fingerprints
                .lock()
                .unwrap()
                .push((host_id.into(), fingerprint.into()));
            Ok(())
        }
    }

    #[async_trait]
    impl EventBus for FakeBridge {
        async fn emit(&self, channel: &str, event: ChannelEvent) -> Result<()> {
            self.inner
                .emitted
                .lock()
                .unwrap()
                .push((channel.into(), event));
            Ok(())
        }

        fn listen(&self, channel: &str) -> (ListenerHandle, mpsc::Receiver<ChannelEvent>) {
            let (tx, rx) = mpsc::channel(64);
            let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
            self.inner
                .listeners
                .lock()
                .unwrap()
                .insert(channel.to_string(), (id, tx));
            self.inner.bind_count.fetch_add(1, Ordering::Relaxed);
            let inner = Arc::clone(&self.inner);
            let channel_name = channel.to_string();
            let handle = ListenerHandle::new(move || {
                let mut listeners = inner.listeners.lock().unwrap();
                if listeners
                    .get(&channel_name)
                    .is_some_and(|(current, _)| *current == id)
                {
                    listeners.remove(&channel_name);
                }
            });
            (handle, rx)
        }
    }
}
