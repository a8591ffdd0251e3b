//! Media transport model
//!
//! Types exchanged with the media transport collaborator: local track
//! handles, join credentials, transport events and recording artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of media a call carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Microphone only
    #[default]
    Audio,
    /// Microphone and camera
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

impl MediaKind {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "audio" => Some(MediaKind::Audio),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }

    /// Tracks a local participant publishes for this media kind
    pub fn tracks(&self) -> &'static [TrackKind] {
        match self {
            MediaKind::Audio => &[TrackKind::Audio],
            MediaKind::Video => &[TrackKind::Audio, TrackKind::Video],
        }
    }
}

/// A single published track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Handle to the local microphone (and camera) capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTracks {
    /// Transport-assigned handle id
    pub id: Uuid,

    /// Media kind the tracks were acquired for
    pub kind: MediaKind,
}

impl LocalTracks {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
        }
    }

    /// Whether a camera track was acquired
    pub fn has_video(&self) -> bool {
        self.kind == MediaKind::Video
    }
}

/// Short-lived credential authorizing one participant on one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinCredential {
    /// Opaque credential presented to the media transport
    pub credential: String,

    /// When the credential stops being accepted
    pub expires_at: DateTime<Utc>,
}

impl JoinCredential {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Connection state reported by the media transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

/// Events emitted by a joined media connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A remote participant published a track
    ParticipantPublished {
        participant_id: String,
        track: TrackKind,
    },
    /// A remote participant stopped publishing a track
    ParticipantUnpublished {
        participant_id: String,
        track: TrackKind,
    },
    /// A remote participant left the channel
    ParticipantLeft { participant_id: String },
    /// The underlying connection changed state
    ConnectionStateChanged(ConnectionState),
    /// A payload arrived on the session data channel
    DataReceived {
        participant_id: String,
        payload: Vec<u8>,
    },
}

/// Captured recording handed to the storage collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingArtifact {
    /// Channel the recording was captured on
    pub channel_name: String,

    /// Container mime type (e.g. `video/webm`)
    pub mime_type: String,

    /// Encoded media bytes
    pub data: Vec<u8>,

    /// Capture start
    pub started_at: DateTime<Utc>,

    /// Capture end
    pub stopped_at: DateTime<Utc>,
}

impl RecordingArtifact {
    /// Capture duration in whole seconds
    pub fn duration_secs(&self) -> i64 {
        (self.stopped_at - self.started_at).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_tracks() {
        assert_eq!(MediaKind::Audio.tracks(), &[TrackKind::Audio]);
        assert_eq!(
            MediaKind::Video.tracks(),
            &[TrackKind::Audio, TrackKind::Video]
        );
        assert_eq!(MediaKind::from_str("VIDEO"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_str("fax"), None);
    }

    #[test]
    fn test_credential_expiry() {
        let expired = JoinCredential {
            credential: "c".to_string(),
            expires_at: Utc::now() - chrono::Duration::seconds(1),
        };
        assert!(expired.is_expired());
    }
}
