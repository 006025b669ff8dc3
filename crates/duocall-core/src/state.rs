use crate::errors::CallError;
use crate::protocol::{
    CallResponseData, CancelCallData, ClientEvent, EndCallData, ServerEvent,
};
use crate::session::CallSession;

/// The authoritative state of the current call, if any.
///
/// Every consumption site switches exhaustively over this; a state is
/// never silently ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum CallState {
    Idle,
    /// Outgoing call-request handed to the transport, not yet confirmed.
    Connecting(CallSession),
    /// Outgoing call acknowledged; ringing on the far side. The call id
    /// may still be unassigned until the server's first answer names it.
    Outgoing(CallSession),
    Incoming(CallSession),
    InCall(CallSession),
    Failed { reason: String },
    Ended,
}

impl CallState {
    /// A session that is neither idle nor torn down.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            CallState::Connecting(_)
                | CallState::Outgoing(_)
                | CallState::Incoming(_)
                | CallState::InCall(_)
        )
    }

    pub fn session(&self) -> Option<&CallSession> {
        match self {
            CallState::Connecting(s)
            | CallState::Outgoing(s)
            | CallState::Incoming(s)
            | CallState::InCall(s) => Some(s),
            CallState::Idle | CallState::Failed { .. } | CallState::Ended => None,
        }
    }
}

/// Result of applying an inbound server event.
#[derive(Debug, Default)]
pub struct Applied {
    /// The state transitioned; observers should be notified.
    pub changed: bool,
    /// A message the machine wants sent in response (e.g. a busy
    /// rejection for an incoming call while another is active).
    pub outbound: Option<ClientEvent>,
}

impl Applied {
    fn unchanged() -> Self {
        Self::default()
    }

    fn changed() -> Self {
        Self {
            changed: true,
            outbound: None,
        }
    }
}

/// Pure transition core of the call session machine.
///
/// Holds no timers, sockets or tasks; local actions and decoded server
/// events go in, the new state plus the messages to send come out. The
/// async shell (`CallManager`) serializes all access through one mutex.
#[derive(Debug)]
pub struct CallStateMachine {
    state: CallState,
    registered: bool,
}

impl CallStateMachine {
    pub fn new() -> Self {
        Self {
            state: CallState::Idle,
            registered: false,
        }
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    fn current_call_id(&self) -> Option<&str> {
        self.state.session().and_then(|s| s.call_id.as_deref())
    }

    /// Messages naming a call id other than the current session's are
    /// stale leftovers from a previous call and must not be applied.
    fn is_stale(&self, call_id: &str) -> bool {
        match self.current_call_id() {
            Some(current) => current != call_id,
            // No id assigned yet: the first server message naming one
            // binds it to the session.
            None => false,
        }
    }

    /// Start an outgoing call. The caller's own identity comes from
    /// registration; the callee identity is cached by the presenter.
    ///
    /// Guards: must be registered, and no other session may be active.
    /// `Failed`/`Ended` count as observed terminal states and are
    /// cleared implicitly by the next user-initiated call.
    pub fn make_call(
        &mut self,
        from_user_id: &str,
        from_user_name: &str,
        to_user_id: &str,
        is_video_call: bool,
        chat_id: Option<String>,
    ) -> Result<(CallSession, ClientEvent), CallError> {
        if !self.registered {
            return Err(CallError::NotConnected);
        }
        if self.state.is_active() {
            return Err(CallError::AlreadyInCall);
        }

        let session =
            CallSession::outgoing(from_user_id, from_user_name, to_user_id, is_video_call, chat_id);
        let request = ClientEvent::CallRequest(crate::protocol::CallRequestData {
            room_id: session.room_id.clone(),
            from_user_id: session.from_user_id.clone(),
            from_user_name: session.from_user_name.clone(),
            to_user_id: to_user_id.to_string(),
            is_video_call,
            chat_id: session.chat_id.clone(),
        });
        self.state = CallState::Connecting(session.clone());
        Ok((session, request))
    }

    /// The call-request was handed to the transport successfully.
    pub fn request_sent(&mut self) -> bool {
        if let CallState::Connecting(session) = &self.state {
            self.state = CallState::Outgoing(session.clone());
            true
        } else {
            false
        }
    }

    /// The call-request could not be sent at all.
    pub fn request_failed(&mut self, reason: &str) -> bool {
        match &self.state {
            CallState::Connecting(_) | CallState::Outgoing(_) => {
                self.state = CallState::Failed {
                    reason: reason.to_string(),
                };
                true
            }
            _ => false,
        }
    }

    /// Accept the ringing incoming call.
    pub fn accept_call(&mut self) -> Result<ClientEvent, CallError> {
        let CallState::Incoming(session) = &self.state else {
            return Err(CallError::CallFailed("no incoming call to accept".to_string()));
        };
        let call_id = session
            .call_id
            .clone()
            .ok_or_else(|| CallError::Protocol("incoming call without call id".to_string()))?;
        let response = ClientEvent::CallResponse(CallResponseData {
            call_id,
            accepted: true,
        });
        self.state = CallState::InCall(session.clone());
        Ok(response)
    }

    /// Decline the ringing incoming call and return to idle.
    pub fn reject_call(&mut self) -> Result<ClientEvent, CallError> {
        let CallState::Incoming(session) = &self.state else {
            return Err(CallError::CallFailed("no incoming call to reject".to_string()));
        };
        let call_id = session
            .call_id
            .clone()
            .ok_or_else(|| CallError::Protocol("incoming call without call id".to_string()))?;
        let response = ClientEvent::CallResponse(CallResponseData {
            call_id,
            accepted: false,
        });
        self.state = CallState::Idle;
        Ok(response)
    }

    /// Hang up the active call. Idempotent: a second invocation is a
    /// no-op and sends nothing.
    pub fn end_call(&mut self) -> Option<ClientEvent> {
        match &self.state {
            CallState::InCall(session) => {
                let message = ClientEvent::EndCall(EndCallData {
                    room_id: Some(session.room_id.clone()),
                    call_id: session.call_id.clone(),
                    reason: None,
                });
                self.state = CallState::Ended;
                Some(message)
            }
            _ => None,
        }
    }

    /// Abort an outgoing call before it is answered. Optimistic: the
    /// state moves to `Ended` without waiting for the `call-cancelled`
    /// echo. Idempotent in terminal states.
    pub fn cancel_call(&mut self) -> Option<ClientEvent> {
        match &self.state {
            CallState::Connecting(session) | CallState::Outgoing(session) => {
                // No call id yet means the server never saw the call;
                // there is nothing to reference on the wire.
                let message = session
                    .call_id
                    .clone()
                    .map(|call_id| ClientEvent::CancelCall(CancelCallData { call_id }));
                self.state = CallState::Ended;
                message
            }
            _ => None,
        }
    }

    /// An outbound signaling message for the active call could not be
    /// handed to the transport; the session cannot continue.
    pub fn signaling_failed(&mut self, reason: &str) -> bool {
        if self.state.is_active() {
            self.state = CallState::Failed {
                reason: reason.to_string(),
            };
            true
        } else {
            false
        }
    }

    /// Explicit reset after a terminal state has been observed.
    pub fn clear_to_idle(&mut self) -> bool {
        match &self.state {
            CallState::Failed { .. } | CallState::Ended => {
                self.state = CallState::Idle;
                true
            }
            _ => false,
        }
    }

    /// The transport dropped. An active call cannot survive this.
    pub fn connection_lost(&mut self) -> bool {
        self.registered = false;
        if self.state.is_active() {
            self.state = CallState::Failed {
                reason: "connection lost".to_string(),
            };
            true
        } else {
            false
        }
    }

    /// Local ring timer fired with the outgoing call still unanswered.
    pub fn ring_timeout(&mut self) -> bool {
        match &self.state {
            CallState::Connecting(_) | CallState::Outgoing(_) => {
                self.state = CallState::Failed {
                    reason: "timeout".to_string(),
                };
                true
            }
            _ => false,
        }
    }

    /// Apply a lifecycle event received from the server.
    ///
    /// Events referencing a stale call id are dropped without touching
    /// state; rapid call churn must not let a leftover message from a
    /// previous call corrupt the current one.
    pub fn apply(&mut self, event: &ServerEvent) -> Applied {
        match event {
            ServerEvent::RegisterSuccess(_) => {
                self.registered = true;
                Applied::unchanged()
            }
            ServerEvent::RegisterError(_) => {
                self.registered = false;
                Applied::unchanged()
            }

            ServerEvent::IncomingCall(data) => {
                if self.state.is_active() {
                    // Busy: decline locally before any other signaling.
                    return Applied {
                        changed: false,
                        outbound: Some(ClientEvent::CallResponse(CallResponseData {
                            call_id: data.call_id.clone(),
                            accepted: false,
                        })),
                    };
                }
                self.state = CallState::Incoming(data.clone().into());
                Applied::changed()
            }

            ServerEvent::CallStarted(data) => {
                if self.is_stale(&data.call_id) {
                    return Applied::unchanged();
                }
                match &self.state {
                    CallState::Connecting(session) | CallState::Outgoing(session) => {
                        let mut session = session.clone();
                        session.assign_call_id(data.call_id.clone());
                        self.state = CallState::InCall(session);
                        Applied::changed()
                    }
                    // Already in the call (accepted call-response won
                    // the race); confirmation is a no-op.
                    _ => Applied::unchanged(),
                }
            }

            ServerEvent::CallResponse(data) => {
                if self.is_stale(&data.call_id) {
                    return Applied::unchanged();
                }
                match &self.state {
                    CallState::Connecting(session) | CallState::Outgoing(session) => {
                        let mut session = session.clone();
                        session.assign_call_id(data.call_id.clone());
                        self.state = if data.accepted {
                            CallState::InCall(session)
                        } else {
                            CallState::Failed {
                                reason: "call declined".to_string(),
                            }
                        };
                        Applied::changed()
                    }
                    _ => Applied::unchanged(),
                }
            }

            ServerEvent::CallCancelled(data) => {
                if self.is_stale(&data.call_id) {
                    return Applied::unchanged();
                }
                match &self.state {
                    // Caller gave up before we answered.
                    CallState::Incoming(_) => {
                        self.state = CallState::Idle;
                        Applied::changed()
                    }
                    // Echo of our own optimistic cancel.
                    _ => Applied::unchanged(),
                }
            }

            ServerEvent::CallEnded(data) => {
                if let Some(call_id) = &data.call_id {
                    if self.is_stale(call_id) {
                        return Applied::unchanged();
                    }
                }
                match &self.state {
                    CallState::InCall(_) => {
                        self.state = CallState::Ended;
                        Applied::changed()
                    }
                    _ => Applied::unchanged(),
                }
            }

            ServerEvent::CallTimeout(data) => {
                if let Some(call_id) = &data.call_id {
                    if self.is_stale(call_id) {
                        return Applied::unchanged();
                    }
                }
                if self.ring_timeout() {
                    Applied::changed()
                } else {
                    Applied::unchanged()
                }
            }

            ServerEvent::CallRequestFailed(data) => {
                let reason = data
                    .reason
                    .clone()
                    .unwrap_or_else(|| "call request failed".to_string());
                if self.request_failed(&reason) {
                    Applied::changed()
                } else {
                    Applied::unchanged()
                }
            }

            ServerEvent::CallResponseFailed(data) => {
                let reason = data
                    .reason
                    .clone()
                    .unwrap_or_else(|| "call response failed".to_string());
                match &self.state {
                    CallState::Connecting(_) | CallState::Outgoing(_) | CallState::InCall(_) => {
                        self.state = CallState::Failed { reason };
                        Applied::changed()
                    }
                    _ => Applied::unchanged(),
                }
            }

            // Room membership, rtc negotiation, media frames and
            // diagnostics do not move the lifecycle; the manager routes
            // them elsewhere.
            ServerEvent::JoinCallRoom(_)
            | ServerEvent::UserJoined(_)
            | ServerEvent::UserLeft(_)
            | ServerEvent::RoomParticipants(_)
            | ServerEvent::Offer(_)
            | ServerEvent::Answer(_)
            | ServerEvent::IceCandidate(_)
            | ServerEvent::MediaFrame(_)
            | ServerEvent::ConnectionStatus(_)
            | ServerEvent::UserOnlineStatus(_)
            | ServerEvent::ServerStats(_)
            | ServerEvent::Unknown => Applied::unchanged(),
        }
    }
}

impl Default for CallStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        CallEndedData, CallRefData, CallStartedData, FailureData, IncomingCallData,
        RegisterSuccessData,
    };

    fn registered_machine() -> CallStateMachine {
        let mut machine = CallStateMachine::new();
        machine.apply(&ServerEvent::RegisterSuccess(RegisterSuccessData {
            user_id: Some("u1".to_string()),
        }));
        machine
    }

    fn incoming_data(call_id: &str) -> IncomingCallData {
        IncomingCallData {
            call_id: call_id.to_string(),
            room_id: "r2".to_string(),
            from_user_id: "u3".to_string(),
            from_user_name: "Ann".to_string(),
            to_user_id: None,
            is_video_call: false,
            chat_id: None,
            timestamp: None,
        }
    }

    fn started(call_id: &str) -> ServerEvent {
        ServerEvent::CallStarted(CallStartedData {
            call_id: call_id.to_string(),
            room_id: None,
        })
    }

    #[test]
    fn make_call_requires_registration() {
        let mut machine = CallStateMachine::new();
        let err = machine
            .make_call("u1", "Alice", "u2", true, None)
            .unwrap_err();
        assert!(matches!(err, CallError::NotConnected));
        assert_eq!(*machine.state(), CallState::Idle);
    }

    #[test]
    fn outgoing_happy_path() {
        let mut machine = registered_machine();
        let (session, request) = machine.make_call("u1", "Alice", "u2", true, None).unwrap();
        assert!(matches!(machine.state(), CallState::Connecting(_)));
        match request {
            ClientEvent::CallRequest(data) => {
                assert_eq!(data.to_user_id, "u2");
                assert_eq!(data.room_id, session.room_id);
                assert!(data.is_video_call);
            }
            other => panic!("expected CallRequest, got {other:?}"),
        }

        assert!(machine.request_sent());
        assert!(matches!(machine.state(), CallState::Outgoing(_)));

        let applied = machine.apply(&started("c1"));
        assert!(applied.changed);
        match machine.state() {
            CallState::InCall(session) => assert!(session.matches_call_id("c1")),
            other => panic!("expected InCall, got {other:?}"),
        }
    }

    #[test]
    fn busy_guard_rejects_second_outgoing_call() {
        let mut machine = registered_machine();
        machine.make_call("u1", "Alice", "u2", true, None).unwrap();
        machine.request_sent();
        machine.apply(&started("c1"));

        let err = machine
            .make_call("u1", "Alice", "u4", false, None)
            .unwrap_err();
        assert!(matches!(err, CallError::AlreadyInCall));
        // Existing session untouched.
        match machine.state() {
            CallState::InCall(session) => assert!(session.matches_call_id("c1")),
            other => panic!("expected InCall, got {other:?}"),
        }
    }

    #[test]
    fn incoming_while_busy_is_declined_without_state_change() {
        let mut machine = registered_machine();
        machine.make_call("u1", "Alice", "u2", true, None).unwrap();
        machine.request_sent();
        machine.apply(&started("c1"));

        let applied = machine.apply(&ServerEvent::IncomingCall(incoming_data("c9")));
        assert!(!applied.changed);
        match applied.outbound {
            Some(ClientEvent::CallResponse(data)) => {
                assert_eq!(data.call_id, "c9");
                assert!(!data.accepted);
            }
            other => panic!("expected busy rejection, got {other:?}"),
        }
        assert!(matches!(machine.state(), CallState::InCall(_)));
    }

    #[test]
    fn incoming_reject_flow() {
        let mut machine = registered_machine();
        let applied = machine.apply(&ServerEvent::IncomingCall(incoming_data("c2")));
        assert!(applied.changed);
        match machine.state() {
            CallState::Incoming(session) => {
                assert_eq!(session.from_user_name, "Ann");
                assert!(session.to_user_id.is_none());
            }
            other => panic!("expected Incoming, got {other:?}"),
        }

        let response = machine.reject_call().unwrap();
        match response {
            ClientEvent::CallResponse(data) => {
                assert_eq!(data.call_id, "c2");
                assert!(!data.accepted);
            }
            other => panic!("expected CallResponse, got {other:?}"),
        }
        assert_eq!(*machine.state(), CallState::Idle);
    }

    #[test]
    fn incoming_accept_flow() {
        let mut machine = registered_machine();
        machine.apply(&ServerEvent::IncomingCall(incoming_data("c2")));
        let response = machine.accept_call().unwrap();
        match response {
            ClientEvent::CallResponse(data) => {
                assert_eq!(data.call_id, "c2");
                assert!(data.accepted);
            }
            other => panic!("expected CallResponse, got {other:?}"),
        }
        assert!(matches!(machine.state(), CallState::InCall(_)));
    }

    #[test]
    fn caller_cancel_before_answer_returns_incoming_to_idle() {
        let mut machine = registered_machine();
        machine.apply(&ServerEvent::IncomingCall(incoming_data("c2")));
        let applied = machine.apply(&ServerEvent::CallCancelled(CancelCallData {
            call_id: "c2".to_string(),
        }));
        assert!(applied.changed);
        assert_eq!(*machine.state(), CallState::Idle);
    }

    #[test]
    fn stale_call_id_is_dropped() {
        let mut machine = registered_machine();
        machine.make_call("u1", "Alice", "u2", true, None).unwrap();
        machine.request_sent();
        machine.apply(&started("A"));

        let applied = machine.apply(&ServerEvent::CallEnded(CallEndedData {
            call_id: Some("B".to_string()),
            reason: None,
        }));
        assert!(!applied.changed);
        match machine.state() {
            CallState::InCall(session) => assert!(session.matches_call_id("A")),
            other => panic!("expected InCall, got {other:?}"),
        }
    }

    #[test]
    fn end_call_is_idempotent_and_sends_once() {
        let mut machine = registered_machine();
        machine.make_call("u1", "Alice", "u2", true, None).unwrap();
        machine.request_sent();
        machine.apply(&started("c1"));

        let first = machine.end_call();
        assert!(matches!(first, Some(ClientEvent::EndCall(_))));
        assert_eq!(*machine.state(), CallState::Ended);

        let second = machine.end_call();
        assert!(second.is_none());
        assert_eq!(*machine.state(), CallState::Ended);
    }

    #[test]
    fn cancel_is_optimistic_and_echo_is_a_no_op() {
        let mut machine = registered_machine();
        machine.make_call("u1", "Alice", "u2", true, None).unwrap();
        machine.request_sent();
        // Server named the call before we cancelled.
        if let CallState::Outgoing(session) = &machine.state {
            let mut session = session.clone();
            session.assign_call_id("c3".to_string());
            machine.state = CallState::Outgoing(session);
        }

        let message = machine.cancel_call();
        match message {
            Some(ClientEvent::CancelCall(data)) => assert_eq!(data.call_id, "c3"),
            other => panic!("expected CancelCall, got {other:?}"),
        }
        assert_eq!(*machine.state(), CallState::Ended);

        // Echo confirms, changes nothing.
        let applied = machine.apply(&ServerEvent::CallCancelled(CancelCallData {
            call_id: "c3".to_string(),
        }));
        assert!(!applied.changed);
        assert_eq!(*machine.state(), CallState::Ended);

        // Second cancel is a no-op too.
        assert!(machine.cancel_call().is_none());
    }

    #[test]
    fn cancel_without_call_id_sends_nothing() {
        let mut machine = registered_machine();
        machine.make_call("u1", "Alice", "u2", true, None).unwrap();
        assert!(machine.cancel_call().is_none());
        assert_eq!(*machine.state(), CallState::Ended);
    }

    #[test]
    fn signaling_failed_only_fails_active_sessions() {
        let mut machine = registered_machine();
        assert!(!machine.signaling_failed("could not reach signaling server"));
        assert_eq!(*machine.state(), CallState::Idle);

        machine.apply(&ServerEvent::IncomingCall(incoming_data("c2")));
        machine.accept_call().unwrap();
        assert!(machine.signaling_failed("could not reach signaling server"));
        assert_eq!(
            *machine.state(),
            CallState::Failed {
                reason: "could not reach signaling server".to_string()
            }
        );
    }

    #[test]
    fn timeout_fails_the_call_and_machine_recovers() {
        let mut machine = registered_machine();
        machine.make_call("u1", "Alice", "u2", true, None).unwrap();
        machine.request_sent();
        if let CallState::Outgoing(session) = &machine.state {
            let mut session = session.clone();
            session.assign_call_id("c3".to_string());
            machine.state = CallState::Outgoing(session);
        }

        let applied = machine.apply(&ServerEvent::CallTimeout(CallRefData {
            call_id: Some("c3".to_string()),
        }));
        assert!(applied.changed);
        assert_eq!(
            *machine.state(),
            CallState::Failed {
                reason: "timeout".to_string()
            }
        );

        // Not stuck: a fresh call clears the terminal state.
        assert!(machine.make_call("u1", "Alice", "u2", true, None).is_ok());
        assert!(matches!(machine.state(), CallState::Connecting(_)));
    }

    #[test]
    fn declined_response_fails_the_call() {
        let mut machine = registered_machine();
        machine.make_call("u1", "Alice", "u2", true, None).unwrap();
        machine.request_sent();
        let applied = machine.apply(&ServerEvent::CallResponse(CallResponseData {
            call_id: "c1".to_string(),
            accepted: false,
        }));
        assert!(applied.changed);
        assert_eq!(
            *machine.state(),
            CallState::Failed {
                reason: "call declined".to_string()
            }
        );
    }

    #[test]
    fn request_failed_event_carries_reason() {
        let mut machine = registered_machine();
        machine.make_call("u1", "Alice", "u2", true, None).unwrap();
        machine.request_sent();
        machine.apply(&ServerEvent::CallRequestFailed(FailureData {
            reason: Some("user not available".to_string()),
        }));
        assert_eq!(
            *machine.state(),
            CallState::Failed {
                reason: "user not available".to_string()
            }
        );
    }

    #[test]
    fn connection_lost_in_call_fails_instead_of_hanging() {
        let mut machine = registered_machine();
        machine.make_call("u1", "Alice", "u2", true, None).unwrap();
        machine.request_sent();
        machine.apply(&started("c1"));

        assert!(machine.connection_lost());
        assert_eq!(
            *machine.state(),
            CallState::Failed {
                reason: "connection lost".to_string()
            }
        );
        assert!(!machine.is_registered());
    }

    #[test]
    fn connection_lost_when_idle_changes_nothing() {
        let mut machine = registered_machine();
        assert!(!machine.connection_lost());
        assert_eq!(*machine.state(), CallState::Idle);
    }

    #[test]
    fn clear_to_idle_only_from_terminal_states() {
        let mut machine = registered_machine();
        assert!(!machine.clear_to_idle());

        machine.make_call("u1", "Alice", "u2", true, None).unwrap();
        machine.request_sent();
        machine.apply(&started("c1"));
        assert!(!machine.clear_to_idle());

        machine.end_call();
        assert!(machine.clear_to_idle());
        assert_eq!(*machine.state(), CallState::Idle);
    }

    #[test]
    fn late_call_started_after_accept_race_is_a_no_op() {
        let mut machine = registered_machine();
        machine.make_call("u1", "Alice", "u2", true, None).unwrap();
        machine.request_sent();
        machine.apply(&ServerEvent::CallResponse(CallResponseData {
            call_id: "c1".to_string(),
            accepted: true,
        }));
        assert!(matches!(machine.state(), CallState::InCall(_)));

        let applied = machine.apply(&started("c1"));
        assert!(!applied.changed);
        assert!(matches!(machine.state(), CallState::InCall(_)));
    }
}
