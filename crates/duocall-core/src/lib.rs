//! Duocall call-signaling core.
//!
//! Session state machine, wire codec and presenter layer for two-party
//! voice/video calls over a persistent signaling connection. Pure Rust
//! crate with no platform dependencies; the transport and the media
//! pipeline are injected by the embedding application.

pub mod call;
pub mod errors;
pub mod events;
pub mod media_quality;
pub mod presenter;
pub mod protocol;
pub mod roster;
pub mod session;
pub mod state;
pub mod transport;

pub use call::CallManager;
pub use errors::CallError;
pub use events::{CallEvent, CallEventListener};
pub use media_quality::{MediaProfile, NetworkQuality, profile_for};
pub use presenter::{CallPresenter, MediaPermissions};
pub use session::CallSession;
pub use state::CallState;
pub use transport::SignalingTransport;
