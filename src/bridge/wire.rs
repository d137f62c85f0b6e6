//! Wire format of the per-session event channel.
//!
//! The host process emits and accepts one envelope shape per channel
//! message: `{"data": {...}}` where the inner object is keyed by exactly
//! one of `in`, `out`, `size`, `status`, `trustPublicKey`. Parsing is
//! centralized here; a payload matching none of the known shapes is
//! dropped, never interpreted as output.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Authentication mechanism the host reports while authenticating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "PascalCase")]
pub enum AuthMethod {
    Password,
    PublicKey,
    KeyboardInteractive,
}

/// Connection phase of one session, as reported over its channel.
///
/// Tagging matches the host emitter: `{"type": "...", "data": ...}` with
/// PascalCase names. `ConnectionTimeout` and `ConnectionFailed` both occur
/// in the wild depending on host version; both are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "PascalCase")]
pub enum Status {
    Pending,
    Connecting,
    SessionCreated,
    TryingToAuthenticate(AuthMethod),
    AuthSuccess,
    AuthFailed,
    ChannelOpened,
    StartStreaming,
    NewPublicKeyFound(String),
    ConnectionTimeout,
    ConnectionFailed,
}

impl Status {
    /// Terminal failure states. Reaching one of these stops the host-side
    /// future and parks the overlay in error mode.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Status::AuthFailed | Status::ConnectionTimeout | Status::ConnectionFailed
        )
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Status::StartStreaming)
    }

    /// Progress percentage for the connection gauge. Errors report the
    /// phase they failed out of as zero, like the original overlay.
    pub fn progress(&self) -> u16 {
        match self {
            Status::Pending => 0,
            Status::Connecting => 20,
            Status::SessionCreated => 40,
            Status::TryingToAuthenticate(_) | Status::NewPublicKeyFound(_) => 55,
            Status::AuthSuccess => 70,
            Status::ChannelOpened => 85,
            Status::StartStreaming => 100,
            Status::AuthFailed | Status::ConnectionTimeout | Status::ConnectionFailed => 0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Status::Pending => "Pending",
            Status::Connecting => "Connecting",
            Status::SessionCreated => "Session created",
            Status::TryingToAuthenticate(AuthMethod::Password) => "Authenticating (password)",
            Status::TryingToAuthenticate(AuthMethod::PublicKey) => "Authenticating (public key)",
            Status::TryingToAuthenticate(AuthMethod::KeyboardInteractive) => {
                "Authenticating (keyboard interactive)"
            }
            Status::AuthSuccess => "Authenticated",
            Status::AuthFailed => "Authentication failed",
            Status::ChannelOpened => "Channel opened",
            Status::StartStreaming => "Streaming",
            Status::NewPublicKeyFound(_) => "Unknown host key",
            Status::ConnectionTimeout => "Connection timed out",
            Status::ConnectionFailed => "Connection failed",
        }
    }
}

/// One message on a session channel, in either direction.
///
/// Inbound traffic is `Output`/`Status`; the client sends `Input`,
/// `WindowChange` and `TrustDecision`. The host tolerates (ignores) input
/// before it reports `StartStreaming`, so no direction check is enforced
/// at this layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelEvent {
    #[serde(rename = "in")]
    Input(String),
    #[serde(rename = "out")]
    Output(Bytes),
    #[serde(rename = "size")]
    WindowChange(u16, u16),
    #[serde(rename = "status")]
    Status(Status),
    // Older hosts spell the trust answer "confirm".
    #[serde(rename = "trustPublicKey", alias = "confirm")]
    TrustDecision(bool),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub data: ChannelEvent,
}

impl ChannelEvent {
    /// Single deserialization boundary for channel payloads. Unknown or
    /// malformed shapes fail closed.
    pub fn parse(raw: &str) -> Option<ChannelEvent> {
        match serde_json::from_str::<Envelope>(raw) {
            Ok(envelope) => Some(envelope.data),
            Err(err) => {
                tracing::warn!(%err, "dropping unrecognized channel payload");
                None
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&Envelope { data: self.clone() })
    }
}
