use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("not connected to signaling server")]
    NotConnected,
    #[error("another call is already in progress")]
    AlreadyInCall,
    #[error("user is not available")]
    UserNotAvailable,
    #[error("call failed: {0}")]
    CallFailed(String),
    #[error("media negotiation failed: {0}")]
    WebRtc(String),
    #[error("media permission denied")]
    PermissionDenied,
    #[error("call timed out")]
    Timeout,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl CallError {
    /// Classify a terminal failure reason reported by the signaling
    /// layer into the error taxonomy.
    pub fn from_reason(reason: &str) -> CallError {
        match reason {
            "timeout" => CallError::Timeout,
            "user not available" | "user-not-available" => CallError::UserNotAvailable,
            other => CallError::CallFailed(other.to_string()),
        }
    }

    /// Short text suitable for rendering as the call status line.
    pub fn user_message(&self) -> String {
        match self {
            CallError::NotConnected => "Not connected".to_string(),
            CallError::AlreadyInCall => "Already in a call".to_string(),
            CallError::UserNotAvailable => "User not available".to_string(),
            CallError::CallFailed(reason) => reason.clone(),
            CallError::WebRtc(_) => "Media connection failed".to_string(),
            CallError::PermissionDenied => "Camera or microphone access denied".to_string(),
            CallError::Timeout => "No answer".to_string(),
            CallError::Protocol(_) | CallError::Transport(_) => "Connection error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reasons_classify_into_the_taxonomy() {
        assert!(matches!(CallError::from_reason("timeout"), CallError::Timeout));
        assert!(matches!(
            CallError::from_reason("user not available"),
            CallError::UserNotAvailable
        ));
        assert!(matches!(
            CallError::from_reason("line busy"),
            CallError::CallFailed(_)
        ));
    }

    #[test]
    fn classified_reasons_render_friendly_status_text() {
        assert_eq!(CallError::from_reason("timeout").user_message(), "No answer");
        assert_eq!(
            CallError::from_reason("user not available").user_message(),
            "User not available"
        );
        assert_eq!(CallError::from_reason("line busy").user_message(), "line busy");
    }
}
