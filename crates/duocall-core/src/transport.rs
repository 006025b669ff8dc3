use async_trait::async_trait;

use crate::errors::CallError;

/// The persistent bidirectional signaling connection.
///
/// Implemented outside this crate (typically a websocket client);
/// reconnect and keepalive policy live there too. The core only needs
/// connect and fire-and-forget send; inbound frames are delivered over
/// the channel handed to [`crate::call::CallManager::start`], and a
/// dropped connection is reported via
/// [`crate::call::CallManager::connection_lost`].
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Establish the connection and identify this client.
    async fn connect(&self, user_id: &str, user_name: &str) -> Result<(), CallError>;

    /// Send one encoded wire frame. Must not block on acknowledgment.
    async fn send(&self, frame: String) -> Result<(), CallError>;

    fn is_connected(&self) -> bool;
}
