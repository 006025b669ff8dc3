use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A call under negotiation or in progress.
///
/// Which fields are populated depends on the side observing the call:
/// the caller knows the callee up front but has no call id until the
/// server assigns one; the callee receives the caller's identity in the
/// incoming-call payload, possibly without `to_user_id` (servers may
/// drop it when relaying).
#[derive(Debug, Clone)]
pub struct CallSession {
    /// Assigned by the answering side of negotiation. Required on all
    /// signaling messages once known.
    pub call_id: Option<String>,
    /// Logical media room both participants join. Stable for the
    /// call's lifetime.
    pub room_id: String,
    pub from_user_id: String,
    pub from_user_name: String,
    pub to_user_id: Option<String>,
    /// Fixed at call creation; audio-only calls never attempt video.
    pub is_video_call: bool,
    /// Associates the call with a pre-existing conversation thread.
    /// May be attached after creation.
    pub chat_id: Option<String>,
    /// Origination time as reported by the signaling layer.
    pub timestamp: Option<DateTime<Utc>>,
}

impl CallSession {
    /// Create the caller-side session for a new outgoing call.
    ///
    /// The room id is generated locally; the call id arrives later with
    /// the server's answer.
    pub fn outgoing(
        from_user_id: &str,
        from_user_name: &str,
        to_user_id: &str,
        is_video_call: bool,
        chat_id: Option<String>,
    ) -> Self {
        Self {
            call_id: None,
            room_id: Uuid::new_v4().to_string(),
            from_user_id: from_user_id.to_string(),
            from_user_name: from_user_name.to_string(),
            to_user_id: Some(to_user_id.to_string()),
            is_video_call,
            chat_id,
            timestamp: Some(Utc::now()),
        }
    }

    /// Whether an inbound message bearing `call_id` refers to this call.
    pub fn matches_call_id(&self, call_id: &str) -> bool {
        self.call_id.as_deref() == Some(call_id)
    }

    pub fn assign_call_id(&mut self, call_id: String) {
        self.call_id = Some(call_id);
    }

    pub fn set_chat_id(&mut self, chat_id: Option<String>) {
        self.chat_id = chat_id;
    }
}

/// Two sessions are the same call iff their call ids match. Sessions
/// that have not been assigned a call id yet are compared by room id.
impl PartialEq for CallSession {
    fn eq(&self, other: &Self) -> bool {
        match (&self.call_id, &other.call_id) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.room_id == other.room_id,
            _ => false,
        }
    }
}

impl Eq for CallSession {}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(call_id: Option<&str>, room_id: &str) -> CallSession {
        CallSession {
            call_id: call_id.map(str::to_string),
            room_id: room_id.to_string(),
            from_user_id: "u1".to_string(),
            from_user_name: "Alice".to_string(),
            to_user_id: Some("u2".to_string()),
            is_video_call: true,
            chat_id: None,
            timestamp: None,
        }
    }

    #[test]
    fn equality_by_call_id() {
        let a = session(Some("c1"), "r1");
        let b = session(Some("c1"), "r2");
        let c = session(Some("c2"), "r1");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn unassigned_sessions_compare_by_room() {
        let a = session(None, "r1");
        let b = session(None, "r1");
        let c = session(None, "r2");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn assigned_never_equals_unassigned() {
        let a = session(Some("c1"), "r1");
        let b = session(None, "r1");
        assert_ne!(a, b);
    }

    #[test]
    fn outgoing_generates_room_and_caches_callee() {
        let s = CallSession::outgoing("u1", "Alice", "u2", false, Some("chat-9".to_string()));
        assert!(s.call_id.is_none());
        assert!(!s.room_id.is_empty());
        assert_eq!(s.to_user_id.as_deref(), Some("u2"));
        assert!(!s.is_video_call);
        assert_eq!(s.chat_id.as_deref(), Some("chat-9"));
    }

    #[test]
    fn matches_call_id_requires_assignment() {
        let mut s = CallSession::outgoing("u1", "Alice", "u2", true, None);
        assert!(!s.matches_call_id("c1"));
        s.assign_call_id("c1".to_string());
        assert!(s.matches_call_id("c1"));
        assert!(!s.matches_call_id("c2"));
    }
}
