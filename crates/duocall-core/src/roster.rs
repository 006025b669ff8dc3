use crate::protocol::RoomUser;

/// Tracks membership of the joined call room.
///
/// Updated by the signaling event loop from `room-participants`,
/// `user-joined` and `user-left`. Cleared on call teardown.
#[derive(Debug, Clone, Default)]
pub struct RoomRoster {
    room_id: Option<String>,
    participants: Vec<RoomUser>,
}

impl RoomRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    /// Replace the whole membership list, as sent by `room-participants`.
    pub fn set_participants(&mut self, room_id: String, participants: Vec<RoomUser>) {
        self.room_id = Some(room_id);
        self.participants = participants;
    }

    pub fn add_user(&mut self, room_id: &str, user: RoomUser) {
        if self.room_id.as_deref() != Some(room_id) {
            self.room_id = Some(room_id.to_string());
            self.participants.clear();
        }
        if !self.participants.iter().any(|p| p.user_id == user.user_id) {
            self.participants.push(user);
        }
    }

    pub fn remove_user(&mut self, user_id: &str) {
        self.participants.retain(|p| p.user_id != user_id);
    }

    pub fn participants(&self) -> &[RoomUser] {
        &self.participants
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn clear(&mut self) {
        self.room_id = None;
        self.participants.clear();
    }
}
