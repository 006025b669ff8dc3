use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::call::CallManager;
use crate::errors::CallError;
use crate::events::{CallEvent, CallEventListener};
use crate::state::CallState;

/// Local media capture permissions, as granted by the OS.
///
/// Queried before a call is attempted; a refusal surfaces as
/// `PermissionDenied` and no signaling is sent. Re-queried on every
/// attempt, so a renewed OS grant is picked up without restart.
pub trait MediaPermissions: Send + Sync {
    fn microphone_granted(&self) -> bool;
    fn camera_granted(&self) -> bool;
}

/// Default gate for platforms that handle permissions elsewhere.
pub struct AlwaysGranted;

impl MediaPermissions for AlwaysGranted {
    fn microphone_granted(&self) -> bool {
        true
    }

    fn camera_granted(&self) -> bool {
        true
    }
}

/// The other party of the current or last call, as the UI names them.
///
/// Cached at call-initiation time for outgoing calls: the protocol
/// never carries the callee's display name back to the caller.
#[derive(Debug, Clone, Default)]
struct PeerInfo {
    user_id: Option<String>,
    user_name: Option<String>,
    chat_id: Option<String>,
}

struct PresenterShared {
    state: std::sync::Mutex<CallState>,
    duration_secs: Arc<AtomicU64>,
    duration_timer: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    peer: std::sync::Mutex<PeerInfo>,
}

impl PresenterShared {
    fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(CallState::Idle),
            duration_secs: Arc::new(AtomicU64::new(0)),
            duration_timer: std::sync::Mutex::new(None),
            peer: std::sync::Mutex::new(PeerInfo::default()),
        }
    }

    /// Arm the one-second duration ticker. A previous ticker is always
    /// aborted first so repeated accept/end cycles never leak one.
    fn start_duration_timer(&self) {
        self.duration_secs.store(0, Ordering::SeqCst);
        let secs = self.duration_secs.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.tick().await;
            loop {
                interval.tick().await;
                secs.fetch_add(1, Ordering::SeqCst);
            }
        });
        if let Some(old) = self.duration_timer.lock().unwrap().replace(handle) {
            old.abort();
        }
    }

    fn stop_duration_timer(&self) {
        if let Some(handle) = self.duration_timer.lock().unwrap().take() {
            handle.abort();
        }
        self.duration_secs.store(0, Ordering::SeqCst);
    }

    fn apply_state(&self, state: CallState) {
        let was_in_call = matches!(*self.state.lock().unwrap(), CallState::InCall(_));
        let is_in_call = matches!(state, CallState::InCall(_));
        if is_in_call && !was_in_call {
            self.start_duration_timer();
        } else if was_in_call && !is_in_call {
            self.stop_duration_timer();
        }
        *self.state.lock().unwrap() = state;
    }
}

struct PresenterListener(Arc<PresenterShared>);

impl CallEventListener for PresenterListener {
    fn on_event(&self, event: CallEvent) {
        match event {
            CallEvent::StateChanged(state) => self.0.apply_state(state),
            CallEvent::IncomingCall(session) => {
                // From the callee's perspective the peer is the caller.
                let mut peer = self.0.peer.lock().unwrap();
                peer.user_id = Some(session.from_user_id);
                peer.user_name = Some(session.from_user_name);
                peer.chat_id = session.chat_id;
            }
            _ => {}
        }
    }
}

/// UI-facing surface of the call core.
///
/// Forwards user actions to the [`CallManager`] and maintains the
/// derived display values (duration, status text, peer identity) from
/// the events it observes. Local capability flags (audio/video/camera
/// facing) live here and imply no renegotiation.
pub struct CallPresenter {
    manager: Arc<CallManager>,
    permissions: Arc<dyn MediaPermissions>,
    shared: Arc<PresenterShared>,
    audio_enabled: AtomicBool,
    video_enabled: AtomicBool,
    front_camera: AtomicBool,
}

impl CallPresenter {
    pub fn new(manager: Arc<CallManager>) -> Self {
        Self::with_permissions(manager, Arc::new(AlwaysGranted))
    }

    pub fn with_permissions(
        manager: Arc<CallManager>,
        permissions: Arc<dyn MediaPermissions>,
    ) -> Self {
        let shared = Arc::new(PresenterShared::new());
        manager.add_listener(Arc::new(PresenterListener(shared.clone())));
        Self {
            manager,
            permissions,
            shared,
            audio_enabled: AtomicBool::new(true),
            video_enabled: AtomicBool::new(true),
            front_camera: AtomicBool::new(true),
        }
    }

    /// Start an outgoing call to `to_user_id`.
    ///
    /// The display name is caller-supplied and cached here; the wire
    /// protocol does not echo it back.
    pub async fn make_call(
        &self,
        to_user_id: &str,
        to_user_name: &str,
        is_video_call: bool,
        chat_id: Option<String>,
    ) -> Result<(), CallError> {
        self.check_permissions(is_video_call)?;

        // A previous ended/failed call is cleared by the next user
        // action, never automatically.
        self.manager.clear_to_idle().await;

        self.manager
            .make_call(to_user_id, is_video_call, chat_id.clone())
            .await?;

        // Cached only once the call is actually under way; a rejected
        // attempt must not clobber the peer of a live call.
        let mut peer = self.shared.peer.lock().unwrap();
        peer.user_id = Some(to_user_id.to_string());
        peer.user_name = Some(to_user_name.to_string());
        peer.chat_id = chat_id;
        Ok(())
    }

    /// Accept the ringing incoming call.
    pub async fn accept_call(&self) -> Result<(), CallError> {
        let is_video_call = self
            .manager
            .session()
            .await
            .map(|s| s.is_video_call)
            .unwrap_or(false);
        self.check_permissions(is_video_call)?;
        self.manager.accept_call().await
    }

    /// Decline the ringing incoming call.
    pub async fn reject_call(&self) -> Result<(), CallError> {
        self.manager.reject_call().await
    }

    /// Hang up the active call. Idempotent.
    pub async fn end_call(&self) -> Result<(), CallError> {
        self.manager.end_call().await
    }

    /// Abort the outgoing call before it is answered. Idempotent.
    pub async fn cancel_call(&self) -> Result<(), CallError> {
        self.manager.cancel_call().await
    }

    /// Toggle the local microphone flag. Returns the new value.
    pub fn toggle_audio(&self) -> bool {
        let enabled = !self.audio_enabled.load(Ordering::SeqCst);
        self.audio_enabled.store(enabled, Ordering::SeqCst);
        tracing::info!("audio enabled: {enabled}");
        enabled
    }

    /// Toggle the local camera flag. Returns the new value.
    pub fn toggle_video(&self) -> bool {
        let enabled = !self.video_enabled.load(Ordering::SeqCst);
        self.video_enabled.store(enabled, Ordering::SeqCst);
        tracing::info!("video enabled: {enabled}");
        enabled
    }

    /// Flip between front and back camera. Returns true when the front
    /// camera is now selected.
    pub fn switch_camera(&self) -> bool {
        let front = !self.front_camera.load(Ordering::SeqCst);
        self.front_camera.store(front, Ordering::SeqCst);
        tracing::info!("front camera: {front}");
        front
    }

    pub fn is_audio_enabled(&self) -> bool {
        self.audio_enabled.load(Ordering::SeqCst)
    }

    pub fn is_video_enabled(&self) -> bool {
        self.video_enabled.load(Ordering::SeqCst)
    }

    /// Observed call state snapshot.
    pub fn call_state(&self) -> CallState {
        self.shared.state.lock().unwrap().clone()
    }

    /// Seconds elapsed since entering the active call; zero otherwise.
    pub fn call_duration(&self) -> u64 {
        self.shared.duration_secs.load(Ordering::SeqCst)
    }

    /// Short human-readable label for the current state.
    pub fn call_status_text(&self) -> String {
        match &*self.shared.state.lock().unwrap() {
            CallState::Idle => String::new(),
            CallState::Connecting(_) => "Connecting...".to_string(),
            CallState::Outgoing(_) => "Calling...".to_string(),
            CallState::Incoming(_) => "Incoming call".to_string(),
            CallState::InCall(_) => "In call".to_string(),
            CallState::Failed { reason } => CallError::from_reason(reason).user_message(),
            CallState::Ended => "Call ended".to_string(),
        }
    }

    pub fn to_user_id(&self) -> Option<String> {
        self.shared.peer.lock().unwrap().user_id.clone()
    }

    pub fn to_user_name(&self) -> Option<String> {
        self.shared.peer.lock().unwrap().user_name.clone()
    }

    pub fn chat_id(&self) -> Option<String> {
        self.shared.peer.lock().unwrap().chat_id.clone()
    }

    fn check_permissions(&self, is_video_call: bool) -> Result<(), CallError> {
        if !self.permissions.microphone_granted() {
            return Err(CallError::PermissionDenied);
        }
        if is_video_call && !self.permissions.camera_granted() {
            return Err(CallError::PermissionDenied);
        }
        Ok(())
    }
}
