use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::CallError;
use crate::session::CallSession;

/// Control messages sent by the client over the signaling connection.
///
/// Wire shape is one JSON object per message:
/// `{"event": "<kebab-case-name>", "data": { ... }}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    Register(RegisterData),
    CallRequest(CallRequestData),
    CallResponse(CallResponseData),
    CancelCall(CancelCallData),
    EndCall(EndCallData),
    JoinCall(JoinCallData),
    LeaveCall(LeaveCallData),
    Offer(RtcSignalData),
    Answer(RtcSignalData),
    IceCandidate(RtcSignalData),
    MediaFrame(MediaFrameData),
    GetConnectionStatus,
    GetServerStats,
}

/// Control messages received from the signaling server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    RegisterSuccess(RegisterSuccessData),
    RegisterError(FailureData),
    IncomingCall(IncomingCallData),
    CallStarted(CallStartedData),
    CallResponse(CallResponseData),
    CallCancelled(CancelCallData),
    CallEnded(CallEndedData),
    CallTimeout(CallRefData),
    CallRequestFailed(FailureData),
    CallResponseFailed(FailureData),
    JoinCallRoom(JoinCallRoomData),
    UserJoined(UserJoinedData),
    UserLeft(UserLeftData),
    RoomParticipants(RoomParticipantsData),
    Offer(RtcSignalData),
    Answer(RtcSignalData),
    IceCandidate(RtcSignalData),
    MediaFrame(MediaFrameData),
    ConnectionStatus(ConnectionStatusData),
    UserOnlineStatus(UserOnlineStatusData),
    ServerStats(serde_json::Value),
    /// Vocabulary the server knows but this client does not. Dropped
    /// with a debug log instead of killing the session.
    #[serde(other, deserialize_with = "ignore_unknown_data")]
    Unknown,
}

/// Accepts and discards whatever `data` payload accompanies an event
/// name this client does not recognize, so `ServerEvent::Unknown` can
/// deserialize regardless of content.
fn ignore_unknown_data<'de, D: serde::Deserializer<'de>>(d: D) -> Result<(), D::Error> {
    serde::de::IgnoredAny::deserialize(d).map(|_| ())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterData {
    pub user_id: String,
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSuccessData {
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Generic failure payload; the server may or may not give a reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureData {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequestData {
    pub room_id: String,
    pub from_user_id: String,
    pub from_user_name: String,
    pub to_user_id: String,
    pub is_video_call: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
}

/// Payload of an inbound `incoming-call`.
///
/// `to_user_id` is genuinely optional: servers relaying the message may
/// drop it, and nothing downstream blocks on its presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCallData {
    pub call_id: String,
    pub room_id: String,
    pub from_user_id: String,
    pub from_user_name: String,
    #[serde(default)]
    pub to_user_id: Option<String>,
    pub is_video_call: bool,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<IncomingCallData> for CallSession {
    fn from(data: IncomingCallData) -> Self {
        CallSession {
            call_id: Some(data.call_id),
            room_id: data.room_id,
            from_user_id: data.from_user_id,
            from_user_name: data.from_user_name,
            to_user_id: data.to_user_id,
            is_video_call: data.is_video_call,
            chat_id: data.chat_id,
            timestamp: data.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStartedData {
    pub call_id: String,
    #[serde(default)]
    pub room_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResponseData {
    pub call_id: String,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelCallData {
    pub call_id: String,
}

/// Reference to a call by id, where the server may omit it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRefData {
    #[serde(default)]
    pub call_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndCallData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEndedData {
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinCallData {
    pub room_id: String,
    pub user_id: String,
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveCallData {
    pub room_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinCallRoomData {
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserJoinedData {
    pub room_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLeftData {
    pub room_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUser {
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomParticipantsData {
    pub room_id: String,
    pub participants: Vec<RoomUser>,
}

/// WebRTC-style negotiation payload shared by `offer`, `answer` and
/// `ice-candidate`. Exactly one of the three fields must be set, and it
/// must match the event name carrying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcSignalData {
    pub room_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<serde_json::Value>,
}

impl RtcSignalData {
    pub fn offer(room_id: &str, offer: serde_json::Value) -> Self {
        Self {
            room_id: room_id.to_string(),
            offer: Some(offer),
            answer: None,
            candidate: None,
        }
    }

    pub fn answer(room_id: &str, answer: serde_json::Value) -> Self {
        Self {
            room_id: room_id.to_string(),
            offer: None,
            answer: Some(answer),
            candidate: None,
        }
    }

    pub fn candidate(room_id: &str, candidate: serde_json::Value) -> Self {
        Self {
            room_id: room_id.to_string(),
            offer: None,
            answer: None,
            candidate: Some(candidate),
        }
    }

    fn signal_count(&self) -> usize {
        [
            self.offer.is_some(),
            self.answer.is_some(),
            self.candidate.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    /// Enforce the exactly-one-signal contract.
    pub fn validate(&self) -> Result<(), CallError> {
        if self.signal_count() == 1 {
            Ok(())
        } else {
            Err(CallError::Protocol(format!(
                "rtc signal for room {} must carry exactly one of offer/answer/candidate",
                self.room_id
            )))
        }
    }
}

/// Origin of a media frame relative to the receiving client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameRole {
    Local,
    Remote,
}

/// An opaque encoded still/video frame exchanged at the protocol layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFrameData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub role: FrameRole,
    /// Base64-encoded image blob. The codec never inspects the bytes.
    pub frame: String,
}

impl MediaFrameData {
    pub fn from_bytes(room_id: Option<String>, role: FrameRole, bytes: &[u8]) -> Self {
        Self {
            room_id,
            role,
            frame: BASE64.encode(bytes),
        }
    }

    pub fn decode_frame(&self) -> Result<Vec<u8>, CallError> {
        BASE64
            .decode(&self.frame)
            .map_err(|e| CallError::Protocol(format!("invalid media frame encoding: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatusData {
    #[serde(default)]
    pub user_id: Option<String>,
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOnlineStatusData {
    pub user_id: String,
    pub online: bool,
}

/// Encode an outbound control message to its wire form.
pub fn encode(event: &ClientEvent) -> Result<String, CallError> {
    if let ClientEvent::Offer(data) | ClientEvent::Answer(data) | ClientEvent::IceCandidate(data) =
        event
    {
        data.validate()?;
    }
    serde_json::to_string(event).map_err(|e| CallError::Protocol(format!("encode failed: {e}")))
}

/// Decode an inbound wire frame into a typed server event.
///
/// Malformed frames yield `CallError::Protocol`; callers log and drop
/// them without touching session state.
pub fn decode(raw: &str) -> Result<ServerEvent, CallError> {
    let event: ServerEvent = serde_json::from_str(raw)
        .map_err(|e| CallError::Protocol(format!("decode failed: {e}")))?;
    if let ServerEvent::Offer(data) | ServerEvent::Answer(data) | ServerEvent::IceCandidate(data) =
        &event
    {
        data.validate()?;
    }
    Ok(event)
}
