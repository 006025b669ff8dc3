use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::errors::CallError;
use crate::events::{CallEvent, CallEventListener, EventEmitter};
use crate::media_quality::{NetworkQuality, profile_for};
use crate::protocol::{
    self, ClientEvent, FrameRole, JoinCallData, LeaveCallData, MediaFrameData, RegisterData,
    RtcSignalData, ServerEvent,
};
use crate::roster::RoomRoster;
use crate::session::CallSession;
use crate::state::{CallState, CallStateMachine};
use crate::transport::SignalingTransport;

/// How long an outgoing call rings before the client gives up on its
/// own, independent of the server's `call-timeout`.
const RING_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
struct LocalUser {
    user_id: String,
    user_name: String,
}

/// Owns the call session state and the signaling connection.
///
/// All state mutation is serialized through the machine's mutex: user
/// actions and the inbound receive loop both go through it, so an
/// accept racing a cancel can never interleave. Constructed once at
/// startup with the transport injected, then shared via `Arc`.
pub struct CallManager {
    machine: Arc<Mutex<CallStateMachine>>,
    transport: Arc<dyn SignalingTransport>,
    emitter: EventEmitter,
    roster: Arc<Mutex<RoomRoster>>,
    local_user: Arc<Mutex<Option<LocalUser>>>,
    ring_timer: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
    network_quality: Arc<Mutex<Option<NetworkQuality>>>,
    ring_timeout: Duration,
}

impl CallManager {
    pub fn new(transport: Arc<dyn SignalingTransport>) -> Self {
        Self::with_ring_timeout(transport, Duration::from_secs(RING_TIMEOUT_SECS))
    }

    pub fn with_ring_timeout(transport: Arc<dyn SignalingTransport>, ring_timeout: Duration) -> Self {
        Self {
            machine: Arc::new(Mutex::new(CallStateMachine::new())),
            transport,
            emitter: EventEmitter::new(),
            roster: Arc::new(Mutex::new(RoomRoster::new())),
            local_user: Arc::new(Mutex::new(None)),
            ring_timer: Arc::new(Mutex::new(None)),
            network_quality: Arc::new(Mutex::new(None)),
            ring_timeout,
        }
    }

    /// Register a listener for call events.
    pub fn add_listener(&self, listener: Arc<dyn CallEventListener>) {
        self.emitter.add_listener(listener);
    }

    /// Get the current call state.
    pub async fn state(&self) -> CallState {
        self.machine.lock().await.state().clone()
    }

    /// Get the current session, if a call is active.
    pub async fn session(&self) -> Option<CallSession> {
        self.machine.lock().await.state().session().cloned()
    }

    /// Get a snapshot of the call room membership.
    pub async fn room_participants(&self) -> Vec<protocol::RoomUser> {
        self.roster.lock().await.participants().to_vec()
    }

    /// Connect the transport and register this client's identity.
    ///
    /// Registration completes when `register-success` arrives on the
    /// receive path; until then call actions fail with `NotConnected`.
    pub async fn register(&self, user_id: &str, user_name: &str) -> Result<(), CallError> {
        self.transport.connect(user_id, user_name).await?;
        *self.local_user.lock().await = Some(LocalUser {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
        });
        self.send(&ClientEvent::Register(RegisterData {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
        }))
        .await
    }

    /// Start an outgoing call.
    ///
    /// Returns the new session once the request is on the wire. The
    /// callee's display name never travels in the request, so the
    /// presenter caches it at this point.
    pub async fn make_call(
        &self,
        to_user_id: &str,
        is_video_call: bool,
        chat_id: Option<String>,
    ) -> Result<CallSession, CallError> {
        let local = self
            .local_user
            .lock()
            .await
            .clone()
            .ok_or(CallError::NotConnected)?;

        let mut machine = self.machine.lock().await;
        let (session, request) = machine.make_call(
            &local.user_id,
            &local.user_name,
            to_user_id,
            is_video_call,
            chat_id,
        )?;
        self.emitter.emit(CallEvent::StateChanged(machine.state().clone()));

        match self.send(&request).await {
            Ok(()) => {
                machine.request_sent();
                tracing::info!("call request sent to {to_user_id} (room {})", session.room_id);
                self.emitter.emit(CallEvent::StateChanged(machine.state().clone()));
                drop(machine);
                self.arm_ring_timer().await;
                Ok(session)
            }
            Err(e) => {
                tracing::warn!("call request send failed: {e}");
                machine.request_failed("could not reach signaling server");
                self.emitter.emit(CallEvent::StateChanged(machine.state().clone()));
                Err(CallError::CallFailed(
                    "could not reach signaling server".to_string(),
                ))
            }
        }
    }

    /// Accept the ringing incoming call.
    ///
    /// If the response cannot be sent the caller never learns we
    /// accepted, so the call fails rather than pretending to be live.
    pub async fn accept_call(&self) -> Result<(), CallError> {
        let mut machine = self.machine.lock().await;
        let response = machine.accept_call()?;
        if let Err(e) = self.send(&response).await {
            tracing::warn!("call-response send failed: {e}");
            machine.signaling_failed("could not reach signaling server");
            let state = machine.state().clone();
            drop(machine);
            self.teardown().await;
            self.emitter.emit(CallEvent::StateChanged(state));
            return Err(CallError::CallFailed(
                "could not reach signaling server".to_string(),
            ));
        }
        let state = machine.state().clone();
        drop(machine);
        self.join_current_room().await;
        self.emitter.emit(CallEvent::StateChanged(state));
        Ok(())
    }

    /// Decline the ringing incoming call. The local decline stands even
    /// when the response cannot be sent; the server's own timeout covers
    /// the caller.
    pub async fn reject_call(&self) -> Result<(), CallError> {
        let mut machine = self.machine.lock().await;
        let response = machine.reject_call()?;
        let sent = self.send(&response).await;
        let state = machine.state().clone();
        drop(machine);
        self.teardown().await;
        self.emitter.emit(CallEvent::StateChanged(state));
        sent.map_err(|e| {
            tracing::warn!("call-response send failed: {e}");
            CallError::CallFailed("could not reach signaling server".to_string())
        })
    }

    /// Hang up the active call. Idempotent; local teardown happens
    /// whether or not the outbound messages can be flushed.
    pub async fn end_call(&self) -> Result<(), CallError> {
        let mut machine = self.machine.lock().await;
        let Some(message) = machine.end_call() else {
            return Ok(());
        };
        let state = machine.state().clone();
        let local = self.local_user.lock().await.clone();
        drop(machine);

        self.teardown().await;
        self.emitter.emit(CallEvent::StateChanged(state));

        if let Err(e) = self.send(&message).await {
            tracing::warn!("end-call send failed: {e}");
        }
        if let (ClientEvent::EndCall(data), Some(local)) = (&message, local) {
            if let Some(room_id) = &data.room_id {
                let leave = ClientEvent::LeaveCall(LeaveCallData {
                    room_id: room_id.clone(),
                    user_id: local.user_id,
                });
                if let Err(e) = self.send(&leave).await {
                    tracing::warn!("leave-call send failed: {e}");
                }
            }
        }
        Ok(())
    }

    /// Abort the outgoing call before it is answered. Optimistic and
    /// idempotent: state moves to ended now, the `call-cancelled` echo
    /// is treated as confirmation.
    pub async fn cancel_call(&self) -> Result<(), CallError> {
        let mut machine = self.machine.lock().await;
        let was_active = machine.state().is_active();
        let message = machine.cancel_call();
        let state = machine.state().clone();
        drop(machine);

        // Only an outgoing call can be cancelled; anything else is a
        // no-op rather than an error.
        if !(was_active && state == CallState::Ended) {
            return Ok(());
        }

        self.teardown().await;
        self.emitter.emit(CallEvent::StateChanged(state));

        if let Some(message) = message {
            if let Err(e) = self.send(&message).await {
                tracing::warn!("cancel-call send failed: {e}");
            }
        }
        Ok(())
    }

    /// Reset a terminal `Ended`/`Failed` state back to idle.
    pub async fn clear_to_idle(&self) {
        let mut machine = self.machine.lock().await;
        if machine.clear_to_idle() {
            self.emitter.emit(CallEvent::StateChanged(machine.state().clone()));
        }
    }

    /// Send a WebRTC offer for the active call's room.
    pub async fn send_offer(&self, offer: serde_json::Value) -> Result<(), CallError> {
        let room_id = self.active_room_id().await?;
        self.send(&ClientEvent::Offer(RtcSignalData::offer(&room_id, offer)))
            .await
            .map_err(|e| CallError::WebRtc(e.to_string()))
    }

    /// Send a WebRTC answer for the active call's room.
    pub async fn send_answer(&self, answer: serde_json::Value) -> Result<(), CallError> {
        let room_id = self.active_room_id().await?;
        self.send(&ClientEvent::Answer(RtcSignalData::answer(&room_id, answer)))
            .await
            .map_err(|e| CallError::WebRtc(e.to_string()))
    }

    /// Send an ICE candidate for the active call's room.
    pub async fn send_ice_candidate(&self, candidate: serde_json::Value) -> Result<(), CallError> {
        let room_id = self.active_room_id().await?;
        self.send(&ClientEvent::IceCandidate(RtcSignalData::candidate(
            &room_id, candidate,
        )))
        .await
        .map_err(|e| CallError::WebRtc(e.to_string()))
    }

    /// Send one encoded media frame for the active call.
    pub async fn send_media_frame(&self, role: FrameRole, bytes: &[u8]) -> Result<(), CallError> {
        let room_id = self.active_room_id().await?;
        self.send(&ClientEvent::MediaFrame(MediaFrameData::from_bytes(
            Some(room_id),
            role,
            bytes,
        )))
        .await
    }

    pub async fn request_connection_status(&self) -> Result<(), CallError> {
        self.send(&ClientEvent::GetConnectionStatus).await
    }

    pub async fn request_server_stats(&self) -> Result<(), CallError> {
        self.send(&ClientEvent::GetServerStats).await
    }

    /// Report a change in measured network quality.
    ///
    /// Advisory: re-derives the target media profile and broadcasts it
    /// when the classification changes during an active call.
    pub async fn set_network_quality(&self, quality: NetworkQuality) {
        let mut current = self.network_quality.lock().await;
        if *current == Some(quality) {
            return;
        }
        *current = Some(quality);
        drop(current);

        if self.machine.lock().await.state().is_active() {
            self.emitter
                .emit(CallEvent::MediaProfileChanged(profile_for(quality)));
        }
    }

    /// The transport connection dropped.
    pub async fn connection_lost(&self) {
        let mut machine = self.machine.lock().await;
        let changed = machine.connection_lost();
        let state = machine.state().clone();
        drop(machine);

        self.teardown().await;
        if changed {
            tracing::warn!("signaling connection lost during a call");
            self.emitter.emit(CallEvent::StateChanged(state));
        }
    }

    /// Spawn the inbound receive loop.
    ///
    /// Frames must be delivered in the order the transport received
    /// them; the loop applies them one at a time so they are never
    /// reordered. When the channel closes the connection is treated as
    /// lost.
    pub fn start(self: &Arc<Self>, receiver: mpsc::UnboundedReceiver<String>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.recv_loop(receiver).await;
        })
    }

    async fn recv_loop(&self, mut receiver: mpsc::UnboundedReceiver<String>) {
        while let Some(frame) = receiver.recv().await {
            self.handle_frame(&frame).await;
        }
        tracing::info!("signaling receive loop ended");
        self.connection_lost().await;
    }

    /// Decode and apply one inbound wire frame. Malformed frames are
    /// logged and dropped; they never tear down the session.
    pub async fn handle_frame(&self, raw: &str) {
        match protocol::decode(raw) {
            Ok(event) => self.handle_server_event(event).await,
            Err(e) => tracing::warn!("dropping malformed signaling frame: {e}"),
        }
    }

    async fn handle_server_event(&self, event: ServerEvent) {
        match &event {
            ServerEvent::RegisterSuccess(data) => {
                let mut machine = self.machine.lock().await;
                machine.apply(&event);
                drop(machine);
                let user_id = match &data.user_id {
                    Some(id) => id.clone(),
                    None => self
                        .local_user
                        .lock()
                        .await
                        .as_ref()
                        .map(|u| u.user_id.clone())
                        .unwrap_or_default(),
                };
                tracing::info!("registered with signaling server as {user_id}");
                self.emitter.emit(CallEvent::Registered { user_id });
            }

            ServerEvent::RegisterError(data) => {
                self.machine.lock().await.apply(&event);
                let reason = data
                    .reason
                    .clone()
                    .unwrap_or_else(|| "registration rejected".to_string());
                tracing::warn!("registration failed: {reason}");
                self.emitter.emit(CallEvent::RegistrationFailed(reason));
            }

            ServerEvent::IncomingCall(_)
            | ServerEvent::CallStarted(_)
            | ServerEvent::CallResponse(_)
            | ServerEvent::CallCancelled(_)
            | ServerEvent::CallEnded(_)
            | ServerEvent::CallTimeout(_)
            | ServerEvent::CallRequestFailed(_)
            | ServerEvent::CallResponseFailed(_) => {
                self.apply_lifecycle(&event).await;
            }

            ServerEvent::JoinCallRoom(data) => {
                tracing::debug!("server requested room join: {}", data.room_id);
                self.join_room(&data.room_id).await;
            }

            ServerEvent::UserJoined(data) => {
                let mut roster = self.roster.lock().await;
                roster.add_user(
                    &data.room_id,
                    protocol::RoomUser {
                        user_id: data.user_id.clone(),
                        user_name: data.user_name.clone(),
                    },
                );
                let participants = roster.participants().to_vec();
                drop(roster);
                self.emitter.emit(CallEvent::RosterChanged(participants));
            }

            ServerEvent::UserLeft(data) => {
                let mut roster = self.roster.lock().await;
                roster.remove_user(&data.user_id);
                let participants = roster.participants().to_vec();
                drop(roster);
                self.emitter.emit(CallEvent::RosterChanged(participants));
            }

            ServerEvent::RoomParticipants(data) => {
                let mut roster = self.roster.lock().await;
                roster.set_participants(data.room_id.clone(), data.participants.clone());
                let participants = roster.participants().to_vec();
                drop(roster);
                self.emitter.emit(CallEvent::RosterChanged(participants));
            }

            ServerEvent::Offer(data) | ServerEvent::Answer(data) | ServerEvent::IceCandidate(data) => {
                self.emitter.emit(CallEvent::RtcSignal(data.clone()));
            }

            ServerEvent::MediaFrame(data) => match data.decode_frame() {
                Ok(bytes) => self.emitter.emit(CallEvent::MediaFrame {
                    role: data.role,
                    bytes,
                }),
                Err(e) => tracing::warn!("dropping undecodable media frame: {e}"),
            },

            ServerEvent::ConnectionStatus(data) => {
                self.emitter.emit(CallEvent::ConnectionStatus(data.clone()));
            }

            ServerEvent::UserOnlineStatus(data) => {
                self.emitter.emit(CallEvent::UserOnlineStatus {
                    user_id: data.user_id.clone(),
                    online: data.online,
                });
            }

            ServerEvent::ServerStats(stats) => {
                self.emitter.emit(CallEvent::ServerStats(stats.clone()));
            }

            ServerEvent::Unknown => {
                tracing::debug!("ignoring unknown signaling event");
            }
        }
    }

    async fn apply_lifecycle(&self, event: &ServerEvent) {
        let mut machine = self.machine.lock().await;
        let was_in_call = matches!(machine.state(), CallState::InCall(_));
        let applied = machine.apply(event);
        let state = machine.state().clone();
        drop(machine);

        if let Some(outbound) = applied.outbound {
            // Busy rejection for a second incoming call.
            if let Err(e) = self.send(&outbound).await {
                tracing::warn!("busy rejection send failed: {e}");
            }
        }

        if !applied.changed {
            tracing::debug!("signaling event did not apply to the current session");
            return;
        }

        match &state {
            CallState::Incoming(session) => {
                tracing::info!(
                    "incoming call from {} ({})",
                    session.from_user_name,
                    session.from_user_id
                );
                self.emitter.emit(CallEvent::IncomingCall(session.clone()));
            }
            CallState::InCall(_) => {
                self.abort_ring_timer().await;
                if !was_in_call {
                    self.join_current_room().await;
                }
            }
            CallState::Idle | CallState::Ended | CallState::Failed { .. } => {
                self.teardown().await;
            }
            CallState::Connecting(_) | CallState::Outgoing(_) => {}
        }

        self.emitter.emit(CallEvent::StateChanged(state));
    }

    async fn active_room_id(&self) -> Result<String, CallError> {
        self.machine
            .lock()
            .await
            .state()
            .session()
            .map(|s| s.room_id.clone())
            .ok_or(CallError::NotConnected)
    }

    async fn join_current_room(&self) {
        let room_id = match self.machine.lock().await.state().session() {
            Some(session) => session.room_id.clone(),
            None => return,
        };
        self.join_room(&room_id).await;
    }

    async fn join_room(&self, room_id: &str) {
        let Some(local) = self.local_user.lock().await.clone() else {
            return;
        };
        let join = ClientEvent::JoinCall(JoinCallData {
            room_id: room_id.to_string(),
            user_id: local.user_id,
            user_name: local.user_name,
        });
        if let Err(e) = self.send(&join).await {
            tracing::warn!("join-call send failed: {e}");
        }
    }

    async fn send(&self, event: &ClientEvent) -> Result<(), CallError> {
        let frame = protocol::encode(event)?;
        self.transport.send(frame).await
    }

    /// Local teardown: stop timers and clear the roster. Runs
    /// synchronously with the state transition that ends the call,
    /// before any outbound message is flushed.
    async fn teardown(&self) {
        self.abort_ring_timer().await;
        self.roster.lock().await.clear();
    }

    /// Arm the outgoing ring timer. Always aborts a previous timer
    /// first; accept/end cycles must never leak duplicates.
    async fn arm_ring_timer(&self) {
        let machine = self.machine.clone();
        let emitter = self.emitter.clone();
        let roster = self.roster.clone();
        let timeout = self.ring_timeout;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut machine = machine.lock().await;
            if machine.ring_timeout() {
                let state = machine.state().clone();
                drop(machine);
                tracing::info!("outgoing call timed out after {}s", timeout.as_secs());
                roster.lock().await.clear();
                emitter.emit(CallEvent::StateChanged(state));
            }
        });

        let mut slot = self.ring_timer.lock().await;
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    async fn abort_ring_timer(&self) {
        if let Some(handle) = self.ring_timer.lock().await.take() {
            handle.abort();
        }
    }
}
