use serde::{Deserialize, Serialize};

/// Measured network quality classification, as reported by the media
/// pipeline during an active call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkQuality {
    Poor,
    Fair,
    Good,
    Excellent,
}

/// Target capture configuration for a given network quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaProfile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_enabled: bool,
}

impl MediaProfile {
    /// Audio-only fallback used when the network cannot carry video.
    pub const AUDIO_ONLY: MediaProfile = MediaProfile {
        width: 0,
        height: 0,
        fps: 0,
        video_enabled: false,
    };
}

/// Map a network quality classification to its target media profile.
///
/// Pure lookup, total over the four classes. The result is advisory
/// input to the media pipeline; re-evaluated whenever the reported
/// classification changes during a call.
pub fn profile_for(quality: NetworkQuality) -> MediaProfile {
    match quality {
        NetworkQuality::Poor => MediaProfile::AUDIO_ONLY,
        NetworkQuality::Fair => MediaProfile {
            width: 360,
            height: 240,
            fps: 15,
            video_enabled: true,
        },
        NetworkQuality::Good => MediaProfile {
            width: 480,
            height: 360,
            fps: 24,
            video_enabled: true,
        },
        NetworkQuality::Excellent => MediaProfile {
            width: 720,
            height: 480,
            fps: 30,
            video_enabled: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [NetworkQuality; 4] = [
        NetworkQuality::Poor,
        NetworkQuality::Fair,
        NetworkQuality::Good,
        NetworkQuality::Excellent,
    ];

    #[test]
    fn mapping_is_total_and_deterministic() {
        for q in ALL {
            assert_eq!(profile_for(q), profile_for(q));
        }
    }

    #[test]
    fn poor_disables_video() {
        let p = profile_for(NetworkQuality::Poor);
        assert!(!p.video_enabled);
        assert_eq!(p.width, 0);
        assert_eq!(p.height, 0);
        assert_eq!(p.fps, 0);
    }

    #[test]
    fn profiles_scale_with_quality() {
        let fair = profile_for(NetworkQuality::Fair);
        let good = profile_for(NetworkQuality::Good);
        let excellent = profile_for(NetworkQuality::Excellent);
        assert_eq!((fair.width, fair.height, fair.fps), (360, 240, 15));
        assert_eq!((good.width, good.height, good.fps), (480, 360, 24));
        assert_eq!((excellent.width, excellent.height, excellent.fps), (720, 480, 30));
        assert!(fair.video_enabled && good.video_enabled && excellent.video_enabled);
    }
}
