//! Session domain: one logical terminal connection from connect-request
//! to close, plus the registry tracking which sessions are open.

mod registry;
mod view;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bridge::wire::Status;

pub use registry::SessionRegistry;
pub use view::{SessionView, ViewOptions};

/// Connection target metadata from the host directory. Read-only here;
/// editing hosts belongs to the host-management surface, not this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl Host {
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.address)
    }

    pub fn host_port(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// One terminal session. The id is minted client-side and doubles as the
/// event-channel name; status and fingerprint are advanced only by
/// inbound channel events and by local retry/close actions.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub host: Host,
    pub status: Status,
    /// Fingerprint carried by a pending `NewPublicKeyFound` prompt.
    pub fingerprint: Option<String>,
    /// Output seen while mounted, replayed into a fresh widget on
    /// remount so switching away does not lose terminal content.
    pub history: Vec<u8>,
    pub opened_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: String, host: Host) -> Self {
        Self {
            id,
            host,
            status: Status::Pending,
            fingerprint: None,
            history: Vec::new(),
            opened_at: Utc::now(),
        }
    }

    /// The overlay blocks interaction whenever the session is not
    /// streaming; only a trust prompt can reopen it afterwards.
    pub fn overlay_open(&self) -> bool {
        !self.status.is_streaming()
    }

    pub fn push_history(&mut self, bytes: &[u8], cap: usize) {
        self.history.extend_from_slice(bytes);
        if self.history.len() > cap {
            let excess = self.history.len() - cap;
            self.history.drain(..excess);
        }
    }
}
