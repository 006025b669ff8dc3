use std::sync::Arc;

use crate::media_quality::MediaProfile;
use crate::protocol::{ConnectionStatusData, FrameRole, RoomUser, RtcSignalData};
use crate::session::CallSession;
use crate::state::CallState;

/// Events emitted by the call core to registered listeners.
///
/// UI shells subscribe to these instead of polling; every state
/// transition of the session machine is broadcast as `StateChanged`.
#[derive(Debug, Clone)]
pub enum CallEvent {
    StateChanged(CallState),
    Registered { user_id: String },
    RegistrationFailed(String),
    IncomingCall(CallSession),
    RtcSignal(RtcSignalData),
    MediaFrame { role: FrameRole, bytes: Vec<u8> },
    MediaProfileChanged(MediaProfile),
    RosterChanged(Vec<RoomUser>),
    UserOnlineStatus { user_id: String, online: bool },
    ConnectionStatus(ConnectionStatusData),
    ServerStats(serde_json::Value),
}

/// Observer side of the call core, implemented by UI shells and
/// platform bridges. Invoked synchronously on whichever task performed
/// the transition, so heavy work belongs on the implementor's side.
pub trait CallEventListener: Send + Sync {
    fn on_event(&self, event: CallEvent);
}

/// Fan-out registry shared by the manager and its spawned timers.
///
/// Listeners are registered once at wiring time and live as long as
/// the core; there is no removal.
#[derive(Clone)]
pub struct EventEmitter {
    listeners: Arc<std::sync::RwLock<Vec<Arc<dyn CallEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(std::sync::RwLock::new(Vec::new())),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn CallEventListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    pub fn emit(&self, event: CallEvent) {
        let listeners = self.listeners.read().unwrap();
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}
