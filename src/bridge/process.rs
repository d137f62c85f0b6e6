//! Stdio transport to the host process.
//!
//! The host executable is spawned once per app run and speaks
//! newline-delimited JSON on its stdio: `{"id", "method", "params"}`
//! requests answered by `{"id", "result"}` or `{"id", "error"}`, and
//! `{"channel", "payload"}` frames carrying channel events in both
//! directions. One listener per channel; rebinding replaces the previous
//! subscription.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

use super::wire::{ChannelEvent, Envelope, Status};
use super::{EventBus, Invoker, ListenerHandle};
use crate::error::{AppError, Result};
use crate::session::Host;

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OutboundFrame<'a> {
    Request {
        id: u64,
        method: &'a str,
        params: Value,
    },
    Event {
        channel: &'a str,
        payload: Envelope,
    },
}

// Untagged: a response always carries `id` without `method`, an event
// frame carries `channel`. Order matters, responses first.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InboundFrame {
    Response {
        id: u64,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    Event {
        channel: String,
        payload: Envelope,
    },
}

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<std::result::Result<Value, String>>>>;
type SubscriberMap = Mutex<HashMap<String, (u64, mpsc::Sender<ChannelEvent>)>>;

struct Shared {
    stdin_tx: mpsc::Sender<String>,
    pending: PendingMap,
    subscribers: SubscriberMap,
    next_request: AtomicU64,
    next_listener: AtomicU64,
}

/// Bridge to a spawned host process. Implements both [`Invoker`] and
/// [`EventBus`]; the child is killed when the bridge is dropped.
pub struct HostProcess {
    shared: Arc<Shared>,
    _child: Mutex<Child>,
}

impl HostProcess {
    pub fn spawn(command: &str, args: &[String]) -> Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::BridgeError(format!("failed to spawn host process `{command}`: {e}"))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::BridgeError("host process stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::BridgeError("host process stdout unavailable".into()))?;

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(256);
        tokio::spawn(async move {
            while let Some(line) = stdin_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    break;
                }
            }
        });

        let shared = Arc::new(Shared {
            stdin_tx,
            pending: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(1),
            next_listener: AtomicU64::new(1),
        });

        let reader_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => dispatch_line(&reader_shared, &line).await,
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(%err, "host stdout read failed");
                        break;
                    }
                }
            }
            host_down(&reader_shared).await;
        });

        Ok(Self {
            shared,
            _child: Mutex::new(child),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.shared.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        match self.shared.pending.lock() {
            Ok(mut pending) => {
                pending.insert(id, tx);
            }
            Err(_) => return Err(AppError::BridgeError("request table poisoned".into())),
        }

        let frame = serde_json::to_string(&OutboundFrame::Request { id, method, params })?;
        if self.shared.stdin_tx.send(frame).await.is_err() {
            if let Ok(mut pending) = self.shared.pending.lock() {
                pending.remove(&id);
            }
            return Err(AppError::BridgeError("host process is gone".into()));
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(AppError::RpcError {
                method: method.into(),
                message,
            }),
            Err(_) => Err(AppError::BridgeError(
                "host process closed before responding".into(),
            )),
        }
    }
}

async fn dispatch_line(shared: &Shared, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let frame = match serde_json::from_str::<InboundFrame>(line) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::warn!(%err, "dropping unrecognized host frame");
            return;
        }
    };
    match frame {
        InboundFrame::Response { id, result, error } => {
            let waiter = match shared.pending.lock() {
                Ok(mut pending) => pending.remove(&id),
                Err(_) => None,
            };
            let Some(waiter) = waiter else {
                tracing::debug!(id, "response without a pending request");
                return;
            };
            let outcome = match error {
                Some(message) => Err(message),
                None => Ok(result.unwrap_or(Value::Null)),
            };
            let _ = waiter.send(outcome);
        }
        InboundFrame::Event { channel, payload } => {
            deliver(shared, &channel, payload.data).await;
        }
    }
}

async fn deliver(shared: &Shared, channel: &str, event: ChannelEvent) {
    let entry = match shared.subscribers.lock() {
        Ok(subs) => subs.get(channel).map(|(id, tx)| (*id, tx.clone())),
        Err(_) => None,
    };
    let Some((id, tx)) = entry else {
        tracing::debug!(channel, "event for a channel without a listener");
        return;
    };
    if tx.send(event).await.is_err() {
        // Receiver vanished without unlistening; prune our binding only.
        if let Ok(mut subs) = shared.subscribers.lock() {
            if subs.get(channel).is_some_and(|(current, _)| *current == id) {
                subs.remove(channel);
            }
        }
    }
}

/// The host stream ended: every open session is told the connection
/// failed and every in-flight request is rejected.
async fn host_down(shared: &Shared) {
    tracing::warn!("host process stream ended");
    let listeners: Vec<mpsc::Sender<ChannelEvent>> = match shared.subscribers.lock() {
        Ok(subs) => subs.values().map(|(_, tx)| tx.clone()).collect(),
        Err(_) => Vec::new(),
    };
    for tx in listeners {
        let _ = tx.send(ChannelEvent::Status(Status::ConnectionFailed)).await;
    }
    let waiters: Vec<_> = match shared.pending.lock() {
        Ok(mut pending) => pending.drain().map(|(_, tx)| tx).collect(),
        Err(_) => Vec::new(),
    };
    for tx in waiters {
        let _ = tx.send(Err("host process exited".into()));
    }
}

#[async_trait]
impl Invoker for HostProcess {
    async fn list_hosts(&self) -> Result<Vec<Host>> {
        let value = self.call("list_hosts", json!({})).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn start_terminal_stream(&self, host_id: &str, terminal_id: &str) -> Result<()> {
        self.call(
            "start_terminal_stream",
            json!({ "hostId": host_id, "terminalId": terminal_id }),
        )
        .await
        .map(|_| ())
    }

    async fn stop_future(&self, id: &str) -> Result<()> {
        self.call("stop_future", json!({ "id": id })).await.map(|_| ())
    }

    async fn update_host_fingerprint(&self, host_id: &str, fingerprint: &str) -> Result<()> {
        self.call(
            "update_host_fingerprint",
            json!({ "hostId": host_id, "fingerprint": fingerprint }),
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl EventBus for HostProcess {
    async fn emit(&self, channel: &str, event: ChannelEvent) -> Result<()> {
        let frame = serde_json::to_string(&OutboundFrame::Event {
            channel,
            payload: Envelope { data: event },
        })?;
        self.shared
            .stdin_tx
            .send(frame)
            .await
            .map_err(|_| AppError::BridgeError("host process is gone".into()))
    }

    fn listen(&self, channel: &str) -> (ListenerHandle, mpsc::Receiver<ChannelEvent>) {
        let (tx, rx) = mpsc::channel(256);
        let id = self.shared.next_listener.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subs) = self.shared.subscribers.lock() {
            subs.insert(channel.to_string(), (id, tx));
        }
        let shared = Arc::clone(&self.shared);
        let channel_name = channel.to_string();
        let handle = ListenerHandle::new(move || {
            if let Ok(mut subs) = shared.subscribers.lock() {
                // A newer binding may have replaced ours; leave it alone.
                if subs.get(&channel_name).is_some_and(|(current, _)| *current == id) {
                    subs.remove(&channel_name);
                }
            }
        });
        (handle, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn shared_for_tests() -> (Arc<Shared>, mpsc::Receiver<String>) {
        let (stdin_tx, stdin_rx) = mpsc::channel(16);
        let shared = Arc::new(Shared {
            stdin_tx,
            pending: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(1),
            next_listener: AtomicU64::new(1),
        });
        (shared, stdin_rx)
    }

    #[test]
    fn outbound_frames_serialize_to_wire_shape() {
        let request = serde_json::to_string(&OutboundFrame::Request {
            id: 7,
            method: "stop_future",
            params: json!({ "id": "abc" }),
        })
        .unwrap();
        assert_eq!(request, r#"{"id":7,"method":"stop_future","params":{"id":"abc"}}"#);

        let event = serde_json::to_string(&OutboundFrame::Event {
            channel: "sess-1",
            payload: Envelope {
                data: ChannelEvent::Input("ls".into()),
            },
        })
        .unwrap();
        assert_eq!(event, r#"{"channel":"sess-1","payload":{"data":{"in":"ls"}}}"#);
    }

    #[test]
    fn inbound_frames_discriminate_responses_from_events() {
        match serde_json::from_str::<InboundFrame>(r#"{"id":3,"result":{"ok":true}}"#).unwrap() {
            InboundFrame::Response { id, result, error } => {
                assert_eq!(id, 3);
                assert!(result.is_some());
                assert!(error.is_none());
            }
            InboundFrame::Event { .. } => panic!("parsed a response as an event"),
        }

        match serde_json::from_str::<InboundFrame>(
            r#"{"channel":"sess-1","payload":{"data":{"out":[104,105]}}}"#,
        )
        .unwrap()
        {
            InboundFrame::Event { channel, payload } => {
                assert_eq!(channel, "sess-1");
                assert_eq!(payload.data, ChannelEvent::Output(Bytes::from_static(b"hi")));
            }
            InboundFrame::Response { .. } => panic!("parsed an event as a response"),
        }
    }

    #[tokio::test]
    async fn dispatch_routes_events_to_the_channel_listener() {
        let (shared, _stdin_rx) = shared_for_tests();
        let (tx, mut rx) = mpsc::channel(16);
        shared
            .subscribers
            .lock()
            .unwrap()
            .insert("sess-1".into(), (1, tx));

        dispatch_line(
            &shared,
            r#"{"channel":"sess-1","payload":{"data":{"status":{"type":"Connecting"}}}}"#,
        )
        .await;
        dispatch_line(&shared, r#"{"channel":"other","payload":{"data":{"in":"x"}}}"#).await;

        assert_eq!(
            rx.try_recv().unwrap(),
            ChannelEvent::Status(Status::Connecting)
        );
        assert!(rx.try_recv().is_err(), "event for another channel leaked");
    }

    #[tokio::test]
    async fn dispatch_resolves_pending_requests() {
        let (shared, _stdin_rx) = shared_for_tests();
        let (tx, rx) = oneshot::channel();
        shared.pending.lock().unwrap().insert(9, tx);

        dispatch_line(&shared, r#"{"id":9,"error":"no such host"}"#).await;

        assert_eq!(rx.await.unwrap(), Err("no such host".into()));
        assert!(shared.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_host_frames_are_dropped() {
        let (shared, _stdin_rx) = shared_for_tests();
        let (tx, mut rx) = mpsc::channel(16);
        shared
            .subscribers
            .lock()
            .unwrap()
            .insert("sess-1".into(), (1, tx));

        dispatch_line(&shared, "garbage").await;
        dispatch_line(&shared, r#"{"channel":"sess-1","payload":{"data":{"nope":0}}}"#).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn host_down_fails_sessions_and_requests() {
        let (shared, _stdin_rx) = shared_for_tests();
        let (sub_tx, mut sub_rx) = mpsc::channel(16);
        shared
            .subscribers
            .lock()
            .unwrap()
            .insert("sess-1".into(), (1, sub_tx));
        let (req_tx, req_rx) = oneshot::channel();
        shared.pending.lock().unwrap().insert(1, req_tx);

        host_down(&shared).await;

        assert_eq!(
            sub_rx.try_recv().unwrap(),
            ChannelEvent::Status(Status::ConnectionFailed)
        );
        assert!(req_rx.await.unwrap().is_err());
    }
}
