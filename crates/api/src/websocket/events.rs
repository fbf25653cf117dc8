//! WebSocket event types and serialization
//!
//! Every frame is a JSON object tagged by `type` with the signal name
//! (`join`, `audio-stream`, `partner-online`, ...) and camelCase payload
//! fields alongside it. Payload fields are optional on the way in: the relay
//! forwards whatever the client sent and leaves absent fields out.

use serde::{Deserialize, Serialize};

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Signals sent from a client to the relay
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Bind this connection to a user. `pair_id` selects the pairing room.
    Join {
        user_id: Option<String>,
        username: Option<String>,
        pair_id: Option<String>,
    },

    /// Ask the partner to enter Together Mode
    StartTogetherMode {
        user_id: Option<String>,
        username: Option<String>,
    },

    AcceptTogetherMode { user_id: Option<String> },

    EndTogetherMode { user_id: Option<String> },

    /// Raw microphone samples captured during Together Mode
    AudioStream {
        user_id: Option<String>,
        audio_data: Option<Vec<f64>>,
    },

    NewPhoto {
        user_id: Option<String>,
        photo_url: Option<String>,
        caption: Option<String>,
    },

    NewVoiceMessage {
        user_id: Option<String>,
        duration: Option<f64>,
    },

    Typing {
        user_id: Option<String>,
        username: Option<String>,
    },

    /// Share the sender's local sunset clock time (e.g. "19:42")
    SunsetTime {
        user_id: Option<String>,
        sunset_time: Option<String>,
    },
}

impl ClientEvent {
    /// Signal name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::StartTogetherMode { .. } => "start-together-mode",
            Self::AcceptTogetherMode { .. } => "accept-together-mode",
            Self::EndTogetherMode { .. } => "end-together-mode",
            Self::AudioStream { .. } => "audio-stream",
            Self::NewPhoto { .. } => "new-photo",
            Self::NewVoiceMessage { .. } => "new-voice-message",
            Self::Typing { .. } => "typing",
            Self::SunsetTime { .. } => "sunset-time",
        }
    }

    /// Map a relayed signal to the event its peers receive.
    ///
    /// Returns `None` for `join`, which updates presence instead of being
    /// forwarded verbatim.
    pub fn into_relay_event(self) -> Option<ServerEvent> {
        let event = match self {
            Self::Join { .. } => return None,
            Self::StartTogetherMode { user_id, username } => {
                ServerEvent::TogetherModeRequest { user_id, username }
            }
            Self::AcceptTogetherMode { user_id } => ServerEvent::TogetherModeAccepted { user_id },
            Self::EndTogetherMode { user_id } => ServerEvent::TogetherModeEnded { user_id },
            Self::AudioStream { user_id, audio_data } => {
                ServerEvent::IncomingAudio { user_id, audio_data }
            }
            Self::NewPhoto {
                user_id,
                photo_url,
                caption,
            } => ServerEvent::PhotoUploaded {
                user_id,
                photo_url,
                caption,
            },
            Self::NewVoiceMessage { user_id, duration } => {
                ServerEvent::VoiceMessageReceived { user_id, duration }
            }
            Self::Typing { user_id, username } => ServerEvent::PartnerTyping { user_id, username },
            Self::SunsetTime {
                user_id,
                sunset_time,
            } => ServerEvent::PartnerSunset {
                user_id,
                sunset_time,
            },
        };
        Some(event)
    }
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from the relay to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    PartnerOnline {
        user_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },

    PartnerOffline { user_id: String },

    TogetherModeRequest {
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },

    TogetherModeAccepted {
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },

    TogetherModeEnded {
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },

    IncomingAudio {
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        audio_data: Option<Vec<f64>>,
    },

    PhotoUploaded {
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        photo_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },

    VoiceMessageReceived {
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration: Option<f64>,
    },

    PartnerTyping {
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },

    PartnerSunset {
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sunset_time: Option<String>,
    },

    /// Periodic reminder for clients to recompute and share their sunset
    CheckSunset,
}

impl ServerEvent {
    /// Signal name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::PartnerOnline { .. } => "partner-online",
            Self::PartnerOffline { .. } => "partner-offline",
            Self::TogetherModeRequest { .. } => "together-mode-request",
            Self::TogetherModeAccepted { .. } => "together-mode-accepted",
            Self::TogetherModeEnded { .. } => "together-mode-ended",
            Self::IncomingAudio { .. } => "incoming-audio",
            Self::PhotoUploaded { .. } => "photo-uploaded",
            Self::VoiceMessageReceived { .. } => "voice-message-received",
            Self::PartnerTyping { .. } => "partner-typing",
            Self::PartnerSunset { .. } => "partner-sunset",
            Self::CheckSunset => "check-sunset",
        }
    }

    /// Audio frames tolerate loss and are dropped quietly under congestion
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::IncomingAudio { .. })
    }
}
