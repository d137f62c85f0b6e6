//! Open-session registry: which sessions exist, which one is active.
//!
//! An explicit service owned by the app and injected where needed, so the
//! session view can be exercised against a plain value in tests. Single
//! writer (the UI); the host only ever sees session ids.

use super::{Host, Session};

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Vec<Session>,
    active: Option<String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly minted session. Ids are caller-supplied and
    /// must not collide with an open session.
    pub fn add(&mut self, id: String, host: Host) {
        debug_assert!(self.get(&id).is_none(), "session id reused while open");
        self.sessions.push(Session::new(id, host));
    }

    /// Drop a session. Clears the active pointer if it pointed here.
    pub fn remove(&mut self, id: &str) {
        self.sessions.retain(|s| s.id != id);
        if self.active.as_deref() == Some(id) {
            self.active = None;
        }
    }

    pub fn set_active(&mut self, id: Option<String>) {
        self.active = id;
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn host_for(&self, id: &str) -> Option<&Host> {
        self.get(id).map(|s| &s.host)
    }

    /// Open sessions in open order, for the session strip.
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(id: &str) -> Host {
        Host {
            id: id.into(),
            label: None,
            address: "example.com".into(),
            port: 22,
            fingerprint: None,
        }
    }

    #[test]
    fn add_then_remove_keeps_open_order() {
        let mut registry = SessionRegistry::new();
        registry.add("s1".into(), host("h1"));
        registry.add("s2".into(), host("h2"));
        registry.add("s3".into(), host("h1"));

        registry.remove("s2");

        let ids: Vec<&str> = registry.sessions().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["s1", "s3"]);
        assert_eq!(registry.host_for("s3").map(|h| h.id.as_str()), Some("h1"));
    }

    #[test]
    fn removing_the_active_session_clears_the_pointer() {
        let mut registry = SessionRegistry::new();
        registry.add("s1".into(), host("h1"));
        registry.add("s2".into(), host("h2"));
        registry.set_active(Some("s1".into()));

        registry.remove("s2");
        assert_eq!(registry.active(), Some("s1"));

        registry.remove("s1");
        assert_eq!(registry.active(), None);
        assert!(registry.is_empty());
    }
}
